//! Command-line front end for the CA and the signing pipeline.
//!
//! Usage:
//!   pdf_certsign issue-root  --ca-dir DIR [--config FILE]
//!   pdf_certsign issue-leaf  --ca-dir DIR --name NAME [--email EMAIL] [--years N] [--config FILE]
//!   pdf_certsign revoke      --ca-dir DIR --serial N [--config FILE]
//!   pdf_certsign build-crl   --ca-dir DIR [--config FILE]
//!   pdf_certsign sign        --bundle FILE --input IN --output OUT [--config FILE]
//!   pdf_certsign verify      --ca-dir DIR --input IN [--no-crl]
//!   pdf_certsign blank       --pages N --output OUT
//!
//! Passphrases come from PDF_CERTSIGN_CA_PASSPHRASE and
//! PDF_CERTSIGN_LEAF_PASSPHRASE. Set RUST_LOG=debug for details.

use der::DecodePem;
use pdf_certsign::ca::authority::{CRL_FILE, ROOT_CERT_FILE};
use pdf_certsign::ca::{CertificateAuthority, Crl, SubjectInfo};
use pdf_certsign::config::{passphrase_from_env, SigningConfig, ENV_CA_PASSPHRASE, ENV_LEAF_PASSPHRASE};
use pdf_certsign::error::exit_code;
use pdf_certsign::keystore::write_atomic;
use pdf_certsign::provider::LocalKeyProvider;
use pdf_certsign::signatures::{verify, SigningEngine};
use pdf_certsign::writer::blank_document;
use pdf_certsign::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use x509_cert::Certificate;

const USAGE: &str = "usage: pdf_certsign <issue-root|issue-leaf|revoke|build-crl|sign|verify|blank> [options]";

struct Args {
    command: String,
    options: HashMap<String, String>,
    flags: Vec<String>,
}

impl Args {
    fn parse() -> Option<Self> {
        let mut args = std::env::args().skip(1);
        let command = args.next()?;
        let mut options = HashMap::new();
        let mut flags = Vec::new();
        let rest: Vec<String> = args.collect();

        let mut i = 0;
        while i < rest.len() {
            let key = rest[i].strip_prefix("--")?.to_string();
            match rest.get(i + 1) {
                Some(value) if !value.starts_with("--") => {
                    options.insert(key, value.clone());
                    i += 2;
                },
                _ => {
                    flags.push(key);
                    i += 1;
                },
            }
        }
        Some(Self {
            command,
            options,
            flags,
        })
    }

    fn required(&self, key: &str) -> Result<&str> {
        self.options
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| Error::Config(format!("missing --{}", key)))
    }

    fn path(&self, key: &str) -> Result<PathBuf> {
        self.required(key).map(PathBuf::from)
    }

    fn number<T: std::str::FromStr>(&self, key: &str, default: Option<T>) -> Result<T> {
        match (self.options.get(key), default) {
            (Some(v), _) => v
                .parse()
                .map_err(|_| Error::Config(format!("--{} must be a number, got {:?}", key, v))),
            (None, Some(d)) => Ok(d),
            (None, None) => Err(Error::Config(format!("missing --{}", key))),
        }
    }

    fn config(&self) -> Result<SigningConfig> {
        match self.options.get("config") {
            Some(path) => SigningConfig::load(path),
            None => SigningConfig::from_env(),
        }
    }

    fn authority(&self) -> Result<CertificateAuthority> {
        CertificateAuthority::open(self.path("ca-dir")?, self.config()?, passphrase_from_env(ENV_CA_PASSPHRASE)?)
    }
}

fn read_root(ca_dir: &Path) -> Result<Certificate> {
    let path = ca_dir.join(ROOT_CERT_FILE);
    let pem = std::fs::read(&path).map_err(|e| Error::NotFound(format!("{}: {}", path.display(), e)))?;
    Certificate::from_pem(&pem).map_err(|e| Error::Storage(format!("{}: {}", path.display(), e)))
}

fn run(args: &Args) -> Result<()> {
    match args.command.as_str() {
        "issue-root" => {
            let ca = args.authority()?;
            let state = ca.bootstrap_root()?;
            println!("root ready in {}, next serial {}", ca.dir().display(), state.next_serial);
        },
        "issue-leaf" => {
            let ca = args.authority()?;
            let config = args.config()?;
            let mut subject = SubjectInfo::individual(args.required("name")?)?;
            if let Some(email) = args.options.get("email") {
                subject = subject.with_email(email.as_str());
            }
            let years = args.number("years", Some(config.ca.leaf_validity_years))?;
            let issued = ca.issue_leaf_certificate(&subject, years, &passphrase_from_env(ENV_LEAF_PASSPHRASE)?)?;
            println!("issued serial {} -> {}", issued.serial, issued.bundle_path.display());
        },
        "revoke" => {
            let ca = args.authority()?;
            let entry = ca.revoke(args.number("serial", None)?)?;
            println!("revoked serial {} at {}", entry.serial, entry.revocation_time);
        },
        "build-crl" => {
            let ca = args.authority()?;
            let crl = ca.build_crl()?;
            println!(
                "{} revocation(s), next update {:?} -> {}",
                crl.revoked_serials().len(),
                crl.next_update(),
                ca.crl_path().display()
            );
        },
        "sign" => {
            let provider = LocalKeyProvider::from_file(args.path("bundle")?, &passphrase_from_env(ENV_LEAF_PASSPHRASE)?)?;
            let engine = SigningEngine::new(provider, args.config()?);
            let output = args.path("output")?;
            match engine.sign(&std::fs::read(args.path("input")?)?) {
                Ok(signed) => write_atomic(&output, &signed)?,
                Err(Error::PartialSigning(partial)) => {
                    write_atomic(&output, &partial.partially_approved)?;
                    return Err(Error::PartialSigning(partial));
                },
                Err(e) => return Err(e),
            }
            println!("signed {}", output.display());
        },
        "verify" => {
            let ca_dir = args.path("ca-dir")?;
            let root = read_root(&ca_dir)?;
            let crl = if args.flags.iter().any(|f| f == "no-crl") {
                None
            } else {
                let path = ca_dir.join(CRL_FILE);
                let der = std::fs::read(&path).map_err(|e| Error::NotFound(format!("{}: {}", path.display(), e)))?;
                Some(Crl::from_der(&der)?)
            };
            let data = std::fs::read(args.path("input")?)?;
            let report = verify(&data, &[root], crl.as_ref())?;
            for record in &report.signatures {
                println!(
                    "{:<28} rev {:>2}  crypto {:<5}  chain {:?}  covers {}",
                    record.field_name,
                    record.revision_index,
                    record.cryptographic_validity,
                    record.chain_status,
                    record.covers_byte_range
                );
            }
            println!(
                "{:?}, {} of {} signature(s) valid",
                report.modification_status,
                report.signatures_valid,
                report.signatures.len()
            );
            if !report.is_fully_valid() {
                return Err(Error::Signing("document did not verify".to_string()));
            }
        },
        "blank" => {
            let pages = args.number("pages", Some(1usize))?;
            write_atomic(&args.path("output")?, &blank_document(pages)?)?;
        },
        other => return Err(Error::Config(format!("unknown command {:?}", other))),
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Some(args) = Args::parse() else {
        eprintln!("{}", USAGE);
        return ExitCode::from(exit_code::USAGE as u8);
    };
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            if let Error::PartialSigning(partial) = &e {
                for failure in &partial.failed_pages {
                    log::error!("page {}: {}", failure.page_index + 1, failure.reason);
                }
            }
            ExitCode::from(e.exit_code() as u8)
        },
    }
}
