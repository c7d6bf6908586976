//! Root bootstrap, leaf issuance, revocation and CRL publication.

use super::crl::Crl;
use super::state::{CaState, RevocationEntry, ROOT_SERIAL};
use super::subject::SubjectInfo;
use super::to_x509_time;
use crate::config::{CaConfig, SigningConfig};
use crate::error::{Error, Result};
use crate::keystore::{write_atomic, KeyBundle, KeyMaterialStore};
use crate::provider::LocalSigner;
use chrono::{DateTime, Duration, Utc};
use der::asn1::{Ia5String, ObjectIdentifier};
use der::{DecodePem, EncodePem};
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::LineEnding;
use rsa::RsaPrivateKey;
use secrecy::SecretString;
use sha2::Sha256;
use spki::SubjectPublicKeyInfoOwned;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::ext::pkix::crl::dp::DistributionPoint;
use x509_cert::ext::pkix::name::{DistributionPointName, GeneralName};
use x509_cert::ext::pkix::{
    AccessDescription, AuthorityInfoAccessSyntax, CrlDistributionPoints, ExtendedKeyUsage, SubjectAltName,
};
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::Validity;
use x509_cert::Certificate;

/// id-kp-codeSigning
pub const ID_KP_CODE_SIGNING: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.3");
/// id-kp-emailProtection
pub const ID_KP_EMAIL_PROTECTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.4");
/// id-kp-clientAuth
pub const ID_KP_CLIENT_AUTH: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.2");
/// id-ad-caIssuers
pub const ID_AD_CA_ISSUERS: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.48.2");

/// Root certificate file inside the CA directory.
pub const ROOT_CERT_FILE: &str = "ca_cert.pem";
/// Published CRL file inside the CA directory.
pub const CRL_FILE: &str = "ca.crl";

/// A freshly issued leaf and where its bundle was stored.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    /// Serial number
    pub serial: u64,
    /// Leaf certificate
    pub certificate: Certificate,
    /// Key, certificate and root
    pub bundle: KeyBundle,
    /// Sealed bundle file
    pub bundle_path: PathBuf,
}

struct CaInner {
    state: CaState,
    root_key: RsaPrivateKey,
}

/// The certificate authority.
///
/// Serial allocation, revocation and CRL signing all run under one lock, so
/// an `Arc<CertificateAuthority>` can be shared between threads.
pub struct CertificateAuthority {
    dir: PathBuf,
    config: CaConfig,
    passphrase: SecretString,
    store: KeyMaterialStore,
    inner: Mutex<Option<CaInner>>,
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("dir", &self.dir)
            .field("bootstrapped", &self.is_bootstrapped())
            .finish()
    }
}

impl CertificateAuthority {
    /// Open the CA directory `dir`, loading the root if one exists.
    ///
    /// A directory without a root is fine; call
    /// [`bootstrap_root`](Self::bootstrap_root) to create it.
    pub fn open(dir: impl Into<PathBuf>, config: SigningConfig, passphrase: SecretString) -> Result<Self> {
        config.validate()?;
        let dir = dir.into();
        let store = KeyMaterialStore::new(&dir, config.keystore)?;
        let ca = Self {
            dir,
            config: config.ca,
            passphrase,
            store,
            inner: Mutex::new(None),
        };
        {
            let mut inner = ca.lock()?;
            *inner = ca.load_existing()?;
        }
        Ok(ca)
    }

    /// CA directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether root material is loaded.
    pub fn is_bootstrapped(&self) -> bool {
        self.inner.lock().map(|inner| inner.is_some()).unwrap_or(false)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<CaInner>>> {
        self.inner
            .lock()
            .map_err(|_| Error::Storage("CA state lock poisoned".to_string()))
    }

    fn load_existing(&self) -> Result<Option<CaInner>> {
        let cert_path = self.dir.join(ROOT_CERT_FILE);
        match (cert_path.exists(), self.store.has_root_key()) {
            (false, false) => Ok(None),
            (true, true) => {
                let pem = std::fs::read(&cert_path)
                    .map_err(|e| Error::Storage(format!("reading {}: {}", cert_path.display(), e)))?;
                let root_certificate = Certificate::from_pem(&pem)
                    .map_err(|e| Error::Storage(format!("{}: {}", cert_path.display(), e)))?;
                let root_key = self.store.load_root_key(&self.passphrase)?;
                if !key_matches_certificate(&root_key, &root_certificate)? {
                    return Err(Error::Storage(format!(
                        "root key in {} does not match {}",
                        self.dir.display(),
                        ROOT_CERT_FILE
                    )));
                }
                let state = CaState::load(&self.dir, root_certificate)?;
                log::debug!("loaded CA root, next serial {}", state.next_serial);
                Ok(Some(CaInner { state, root_key }))
            },
            (cert, _) => Err(Error::Storage(format!(
                "incomplete CA in {}: {} without {}",
                self.dir.display(),
                if cert { "certificate" } else { "key" },
                if cert { "key" } else { "certificate" }
            ))),
        }
    }

    /// Create the root on first use; afterwards return the existing one.
    pub fn bootstrap_root(&self) -> Result<CaState> {
        let mut inner = self.lock()?;
        if let Some(existing) = inner.as_ref() {
            return Ok(existing.state.clone());
        }

        log::info!("generating {}-bit root key", self.config.root_key_bits);
        let root_key = RsaPrivateKey::new(&mut rsa::rand_core::OsRng, self.config.root_key_bits)?;
        let now = Utc::now();
        let root_certificate = build_root_certificate(
            &root_key,
            &self.config.root_subject,
            now,
            now + Duration::days(365 * i64::from(self.config.root_validity_years)),
        )?;

        self.store.save_root_key(&root_key, &self.passphrase)?;
        write_atomic(
            &self.dir.join(ROOT_CERT_FILE),
            root_certificate.to_pem(LineEnding::LF)?.as_bytes(),
        )?;
        let state = CaState::new(root_certificate);
        CaState::persist_counter(&self.dir, state.next_serial)?;
        state.persist_ledger(&self.dir)?;

        log::info!("created root CA {}", state.root_certificate.tbs_certificate.subject);
        *inner = Some(CaInner {
            state: state.clone(),
            root_key,
        });
        Ok(state)
    }

    /// Issue a leaf signing certificate valid for `validity_years`, and
    /// store its bundle sealed under `bundle_passphrase`.
    pub fn issue_leaf_certificate(
        &self,
        subject: &SubjectInfo,
        validity_years: u32,
        bundle_passphrase: &SecretString,
    ) -> Result<IssuedCertificate> {
        if validity_years == 0 {
            return Err(Error::InvalidSpec("validity must be at least one year".to_string()));
        }
        let subject_name = subject.to_name()?;
        let leaf_key = RsaPrivateKey::new(&mut rsa::rand_core::OsRng, self.config.leaf_key_bits)?;

        let (serial, certificate, root) = {
            let mut guard = self.lock()?;
            let inner = guard
                .as_mut()
                .ok_or_else(|| Error::Signing("CA root is not bootstrapped".to_string()))?;

            let serial = inner.state.next_serial;
            if serial > self.config.max_serial {
                return Err(Error::SerialExhausted(self.config.max_serial));
            }
            // The advanced counter is durable before the serial is used.
            CaState::persist_counter(&self.dir, serial + 1)?;
            inner.state.next_serial = serial + 1;

            let now = Utc::now();
            let not_after = now + Duration::days(365 * i64::from(validity_years));
            let certificate = self.build_leaf_certificate(inner, serial, subject, subject_name, &leaf_key, now, not_after)?;

            inner.state.issued_serials.insert(serial);
            inner.state.persist_ledger(&self.dir)?;
            (serial, certificate, inner.state.root_certificate.clone())
        };
        log::info!("issued serial {} to {}", serial, subject.common_name);

        let bundle = KeyBundle {
            private_key: leaf_key,
            certificate: certificate.clone(),
            chain: vec![root],
        };
        let bundle_path = self
            .store
            .save_bundle(&leaf_bundle_name(serial), &bundle, bundle_passphrase)?;
        Ok(IssuedCertificate {
            serial,
            certificate,
            bundle,
            bundle_path,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn build_leaf_certificate(
        &self,
        inner: &CaInner,
        serial: u64,
        subject: &SubjectInfo,
        subject_name: x509_cert::name::Name,
        leaf_key: &RsaPrivateKey,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Result<Certificate> {
        let signer = SigningKey::<Sha256>::new(inner.root_key.clone());
        let profile = Profile::Leaf {
            issuer: inner.state.root_certificate.tbs_certificate.subject.clone(),
            enable_key_agreement: false,
            enable_key_encipherment: false,
        };
        let mut builder = CertificateBuilder::new(
            profile,
            SerialNumber::from(serial),
            Validity {
                not_before: to_x509_time(not_before)?,
                not_after: to_x509_time(not_after)?,
            },
            subject_name,
            public_key_info(leaf_key)?,
            &signer,
        )?;

        builder.add_extension(&ExtendedKeyUsage(vec![
            ID_KP_CODE_SIGNING,
            ID_KP_EMAIL_PROTECTION,
            ID_KP_CLIENT_AUTH,
        ]))?;
        if let Some(email) = &subject.email {
            builder.add_extension(&SubjectAltName(vec![GeneralName::Rfc822Name(Ia5String::new(email)?)]))?;
        }
        builder.add_extension(&CrlDistributionPoints(vec![DistributionPoint {
            distribution_point: Some(DistributionPointName::FullName(vec![
                GeneralName::UniformResourceIdentifier(Ia5String::new(&self.config.crl_url)?),
            ])),
            reasons: None,
            crl_issuer: None,
        }]))?;
        builder.add_extension(&AuthorityInfoAccessSyntax(vec![AccessDescription {
            access_method: ID_AD_CA_ISSUERS,
            access_location: GeneralName::UniformResourceIdentifier(Ia5String::new(&self.config.ca_issuers_url)?),
        }]))?;

        Ok(builder.build::<rsa::pkcs1v15::Signature>()?)
    }

    /// Revoke `serial`. Revoking twice keeps the first entry.
    pub fn revoke(&self, serial: u64) -> Result<RevocationEntry> {
        let mut guard = self.lock()?;
        let inner = guard
            .as_mut()
            .ok_or_else(|| Error::Signing("CA root is not bootstrapped".to_string()))?;
        if serial == ROOT_SERIAL {
            return Err(Error::InvalidSpec("the root certificate cannot be revoked".to_string()));
        }
        if !inner.state.is_issued(serial) {
            return Err(Error::NotFound(format!("serial {} was never issued", serial)));
        }
        if let Some(existing) = inner.state.revocation(serial) {
            log::debug!("serial {} already revoked at {}", serial, existing.revocation_time);
            return Ok(existing.clone());
        }

        let entry = RevocationEntry {
            serial,
            revocation_time: Utc::now(),
        };
        inner.state.revocations.push(entry.clone());
        inner.state.persist_ledger(&self.dir)?;
        log::info!("revoked serial {}", serial);
        Ok(entry)
    }

    /// Sign a CRL over every revocation and write it to `ca.crl`.
    pub fn build_crl(&self) -> Result<Crl> {
        let guard = self.lock()?;
        let inner = guard
            .as_ref()
            .ok_or_else(|| Error::Signing("CA root is not bootstrapped".to_string()))?;
        let now = Utc::now();
        let crl = Crl::build(
            &inner.state.root_certificate,
            &LocalSigner::new(inner.root_key.clone()),
            &inner.state.revocations,
            now,
            now + Duration::days(i64::from(self.config.crl_validity_days)),
        )?;
        write_atomic(&self.dir.join(CRL_FILE), crl.der())?;
        Ok(crl)
    }

    /// Path of the published CRL.
    pub fn crl_path(&self) -> PathBuf {
        self.dir.join(CRL_FILE)
    }

    /// Snapshot of the CA state.
    pub fn state(&self) -> Result<CaState> {
        let guard = self.lock()?;
        guard
            .as_ref()
            .map(|inner| inner.state.clone())
            .ok_or_else(|| Error::NotFound("CA root is not bootstrapped".to_string()))
    }

    /// The root certificate (the trust anchor for verification).
    pub fn root_certificate(&self) -> Result<Certificate> {
        Ok(self.state()?.root_certificate)
    }

    /// Serials issued to leaves.
    pub fn issued_serials(&self) -> Result<BTreeSet<u64>> {
        Ok(self.state()?.issued_serials)
    }

    /// Whether `serial` has been revoked.
    pub fn is_revoked(&self, serial: u64) -> Result<bool> {
        Ok(self.state()?.revocation(serial).is_some())
    }

    /// Load the bundle issued under `serial`.
    pub fn load_leaf_bundle(&self, serial: u64, passphrase: &SecretString) -> Result<KeyBundle> {
        self.store.load_bundle(&leaf_bundle_name(serial), passphrase)
    }
}

/// Bundle name used for the leaf with `serial`.
pub fn leaf_bundle_name(serial: u64) -> String {
    format!("leaf_{}", serial)
}

fn public_key_info(key: &RsaPrivateKey) -> Result<SubjectPublicKeyInfoOwned> {
    SubjectPublicKeyInfoOwned::from_key(key.to_public_key()).map_err(Error::crypto)
}

/// Whether `key` is the private half of the key in `certificate`.
pub fn key_matches_certificate(key: &RsaPrivateKey, certificate: &Certificate) -> Result<bool> {
    Ok(public_key_info(key)? == certificate.tbs_certificate.subject_public_key_info)
}

fn build_root_certificate(
    key: &RsaPrivateKey,
    subject: &SubjectInfo,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> Result<Certificate> {
    let signer = SigningKey::<Sha256>::new(key.clone());
    let builder = CertificateBuilder::new(
        Profile::Root,
        SerialNumber::from(ROOT_SERIAL),
        Validity {
            not_before: to_x509_time(not_before)?,
            not_after: to_x509_time(not_after)?,
        },
        subject.to_name()?,
        public_key_info(key)?,
        &signer,
    )?;
    Ok(builder.build::<rsa::pkcs1v15::Signature>()?)
}

#[cfg(test)]
pub(crate) fn self_signed_for_tests(key: &RsaPrivateKey, subject: &SubjectInfo) -> Result<Certificate> {
    let now = Utc::now();
    build_root_certificate(key, subject, now - Duration::days(1), now + Duration::days(365))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::KdfParams;
    use x509_parser::prelude::{FromDer, X509Certificate};

    fn config() -> SigningConfig {
        SigningConfig::default()
            .with_root_key_bits(3072)
            .with_max_serial(3)
            .with_kdf(KdfParams {
                memory_cost: 1024,
                time_cost: 1,
                parallelism: 1,
            })
    }

    fn secret(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    #[test]
    fn test_leaf_extensions_and_exhaustion() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::open(dir.path(), config(), secret("root")).unwrap();
        assert!(matches!(
            ca.issue_leaf_certificate(&SubjectInfo::new("EARLY").unwrap(), 1, &secret("leaf")),
            Err(Error::Signing(_))
        ));
        ca.bootstrap_root().unwrap();

        let subject = SubjectInfo::individual("TEST SIGNER").unwrap().with_email("signer@example.com");
        let leaf = ca.issue_leaf_certificate(&subject, 3, &secret("leaf")).unwrap();
        assert_eq!(leaf.serial, 2);
        assert!(leaf.bundle_path.exists());
        assert!(key_matches_certificate(&leaf.bundle.private_key, &leaf.certificate).unwrap());

        let der = der::Encode::to_der(&leaf.certificate).unwrap();
        let (_, parsed) = X509Certificate::from_der(&der).unwrap();
        assert!(!parsed.is_ca());
        let ku = parsed.key_usage().unwrap().unwrap().value;
        assert!(ku.digital_signature() && ku.non_repudiation() && !ku.key_cert_sign());
        let eku = parsed.extended_key_usage().unwrap().unwrap().value;
        assert!(eku.code_signing && eku.email_protection && eku.client_auth);
        assert!(parsed.subject_alternative_name().unwrap().is_some());
        let root_subject = der::Encode::to_der(&ca.root_certificate().unwrap().tbs_certificate.subject).unwrap();
        assert_eq!(parsed.issuer().as_raw(), &root_subject[..]);

        assert_eq!(ca.issue_leaf_certificate(&subject, 1, &secret("leaf")).unwrap().serial, 3);
        assert!(matches!(
            ca.issue_leaf_certificate(&subject, 1, &secret("leaf")),
            Err(Error::SerialExhausted(3))
        ));
    }

    #[test]
    fn test_revoke_rules() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::open(dir.path(), config(), secret("root")).unwrap();
        ca.bootstrap_root().unwrap();
        let leaf = ca
            .issue_leaf_certificate(&SubjectInfo::new("REVOKE ME").unwrap(), 1, &secret("leaf"))
            .unwrap();

        assert!(matches!(ca.revoke(99), Err(Error::NotFound(_))));
        assert!(matches!(ca.revoke(ROOT_SERIAL), Err(Error::InvalidSpec(_))));
        let first = ca.revoke(leaf.serial).unwrap();
        let second = ca.revoke(leaf.serial).unwrap();
        assert_eq!(first, second);
        assert!(ca.is_revoked(leaf.serial).unwrap());

        let crl = ca.build_crl().unwrap();
        assert!(crl.verify(&ca.root_certificate().unwrap()));
        assert_eq!(crl.revoked_serials(), vec![leaf.serial]);
        assert!(ca.crl_path().exists());
    }
}
