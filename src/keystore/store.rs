//! On-disk key material.
//!
//! Root keys live in `ca_key.sealed`; leaf bundles (private key, certificate,
//! issuing chain) in `<name>.bundle`. When the configured Argon2 parameters
//! are rejected the store falls back to encrypted PKCS#8 PEM (`ca_key.pem`,
//! `<name>.pem`) and says so in the log.

use super::container::{KdfParams, SealedContainer};
use crate::error::{Error, Result};
use base64::{engine::general_purpose, Engine as _};
use der::{Decode, DecodePem, Encode, EncodePem};
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use x509_cert::Certificate;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const ROOT_KEY_SEALED: &str = "ca_key.sealed";
const ROOT_KEY_PEM: &str = "ca_key.pem";
const ROOT_KEY_ALGORITHM: &str = "rsa-pkcs8-der";
const BUNDLE_ALGORITHM: &str = "pdf-certsign-bundle-v1";
const ENCRYPTED_KEY_LABEL: &str = "ENCRYPTED PRIVATE KEY";

/// A signing key with its certificate and issuing chain.
#[derive(Clone)]
pub struct KeyBundle {
    /// Private key
    pub private_key: RsaPrivateKey,
    /// Leaf certificate
    pub certificate: Certificate,
    /// Issuer certificates, root last
    pub chain: Vec<Certificate>,
}

impl std::fmt::Debug for KeyBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyBundle")
            .field("private_key", &"[REDACTED]")
            .field("certificate_serial", &self.certificate.tbs_certificate.serial_number)
            .field("chain", &format!("{} certificate(s)", self.chain.len()))
            .finish()
    }
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct BundlePayload {
    private_key: String,
    certificate: String,
    chain: Vec<String>,
}

/// Write `bytes` to `path` atomically: temp file in the same directory,
/// `sync_all`, rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| Error::Storage(format!("temp file in {}: {}", dir.display(), e)))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| Error::Storage(format!("writing {}: {}", path.display(), e)))?;
    tmp.persist(path)
        .map_err(|e| Error::Storage(format!("replacing {}: {}", path.display(), e.error)))?;
    Ok(())
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| Error::Storage(format!("reading {}: {}", path.display(), e)))
}

/// Directory of sealed key material.
#[derive(Debug, Clone)]
pub struct KeyMaterialStore {
    dir: PathBuf,
    kdf: KdfParams,
}

impl KeyMaterialStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>, kdf: KdfParams) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| Error::Storage(format!("creating {}: {}", dir.display(), e)))?;
        Ok(Self { dir, kdf })
    }

    /// Store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether a root key has been stored in either format.
    pub fn has_root_key(&self) -> bool {
        self.dir.join(ROOT_KEY_SEALED).exists() || self.dir.join(ROOT_KEY_PEM).exists()
    }

    /// Persist the root private key.
    pub fn save_root_key(&self, key: &RsaPrivateKey, passphrase: &SecretString) -> Result<PathBuf> {
        let der = key.to_pkcs8_der().map_err(Error::crypto)?;
        match self.kdf.to_argon2() {
            Ok(_) => {
                let container = SealedContainer::seal(passphrase, der.as_bytes(), ROOT_KEY_ALGORITHM, self.kdf)?;
                let path = self.dir.join(ROOT_KEY_SEALED);
                write_atomic(&path, container.to_json()?.as_bytes())?;
                Ok(path)
            },
            Err(e) => {
                log::warn!("{}; storing root key as encrypted PKCS#8 PEM instead", e);
                let pem = encrypt_key_pem(key, passphrase)?;
                let path = self.dir.join(ROOT_KEY_PEM);
                write_atomic(&path, pem.as_bytes())?;
                Ok(path)
            },
        }
    }

    /// Load the root private key.
    pub fn load_root_key(&self, passphrase: &SecretString) -> Result<RsaPrivateKey> {
        let sealed = self.dir.join(ROOT_KEY_SEALED);
        if sealed.exists() {
            let json = String::from_utf8(read_file(&sealed)?)
                .map_err(|_| Error::Storage(format!("{} is not UTF-8", sealed.display())))?;
            let der = SealedContainer::from_json(&json)?.open(passphrase)?;
            return RsaPrivateKey::from_pkcs8_der(&der)
                .map_err(|e| Error::Storage(format!("root key in {}: {}", sealed.display(), e)));
        }
        let pem_path = self.dir.join(ROOT_KEY_PEM);
        if pem_path.exists() {
            let pem = Zeroizing::new(String::from_utf8_lossy(&read_file(&pem_path)?).into_owned());
            return decrypt_key_pem(&pem, passphrase);
        }
        Err(Error::NotFound(format!("no root key in {}", self.dir.display())))
    }

    /// Persist a leaf bundle under `name`; returns the file written.
    pub fn save_bundle(&self, name: &str, bundle: &KeyBundle, passphrase: &SecretString) -> Result<PathBuf> {
        check_bundle_name(name)?;
        match self.kdf.to_argon2() {
            Ok(_) => {
                let path = self.dir.join(format!("{}.bundle", name));
                write_atomic(&path, seal_bundle(bundle, passphrase, self.kdf)?.as_bytes())?;
                log::debug!("sealed bundle written to {}", path.display());
                Ok(path)
            },
            Err(e) => {
                log::warn!("{}; writing {} as encrypted PKCS#8 PEM", e, name);
                let path = self.dir.join(format!("{}.pem", name));
                write_atomic(&path, bundle_to_pem(bundle, passphrase)?.as_bytes())?;
                Ok(path)
            },
        }
    }

    /// Load the bundle stored under `name` in either format.
    pub fn load_bundle(&self, name: &str, passphrase: &SecretString) -> Result<KeyBundle> {
        check_bundle_name(name)?;
        let sealed = self.dir.join(format!("{}.bundle", name));
        if sealed.exists() {
            return load_bundle_file(&sealed, passphrase);
        }
        let pem = self.dir.join(format!("{}.pem", name));
        if pem.exists() {
            return load_bundle_file(&pem, passphrase);
        }
        Err(Error::NotFound(format!("no bundle named {:?} in {}", name, self.dir.display())))
    }
}

fn check_bundle_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(Error::Storage(format!("invalid bundle name {:?}", name)));
    }
    Ok(())
}

/// Seal a bundle as JSON text (the `.bundle` format).
pub fn seal_bundle(bundle: &KeyBundle, passphrase: &SecretString, kdf: KdfParams) -> Result<String> {
    let key_der = bundle.private_key.to_pkcs8_der().map_err(Error::crypto)?;
    let payload = BundlePayload {
        private_key: general_purpose::STANDARD.encode(key_der.as_bytes()),
        certificate: bundle.certificate.to_pem(LineEnding::LF)?,
        chain: bundle
            .chain
            .iter()
            .map(|c| c.to_pem(LineEnding::LF))
            .collect::<std::result::Result<_, _>>()?,
    };
    let plaintext = Zeroizing::new(serde_json::to_vec(&payload)?);
    SealedContainer::seal(passphrase, &plaintext, BUNDLE_ALGORITHM, kdf)?.to_json()
}

/// Read a bundle from a `.bundle` or `.pem` file.
pub fn load_bundle_file(path: &Path, passphrase: &SecretString) -> Result<KeyBundle> {
    let raw = Zeroizing::new(read_file(path)?);
    let text = std::str::from_utf8(&raw).map_err(|_| Error::Storage(format!("{} is not UTF-8", path.display())))?;

    if text.trim_start().starts_with('{') {
        let container = SealedContainer::from_json(text)?;
        let plaintext = container.open(passphrase)?;
        let payload: BundlePayload = serde_json::from_slice(&plaintext)
            .map_err(|e| Error::Storage(format!("bundle payload in {}: {}", path.display(), e)))?;
        let key_der = Zeroizing::new(
            general_purpose::STANDARD
                .decode(&payload.private_key)
                .map_err(|e| Error::Storage(format!("bundle key encoding: {}", e)))?,
        );
        let private_key = RsaPrivateKey::from_pkcs8_der(&key_der)
            .map_err(|e| Error::Storage(format!("bundle key in {}: {}", path.display(), e)))?;
        let certificate = Certificate::from_pem(payload.certificate.as_bytes())?;
        let chain = payload
            .chain
            .iter()
            .map(|pem| Certificate::from_pem(pem.as_bytes()))
            .collect::<std::result::Result<_, _>>()?;
        return Ok(KeyBundle {
            private_key,
            certificate,
            chain,
        });
    }

    bundle_from_pem(text, passphrase)
}

fn encrypt_key_pem(key: &RsaPrivateKey, passphrase: &SecretString) -> Result<Zeroizing<String>> {
    key.to_pkcs8_encrypted_pem(&mut rsa::rand_core::OsRng, passphrase.expose_secret().as_bytes(), LineEnding::LF)
        .map_err(Error::crypto)
}

fn decrypt_key_pem(pem: &str, passphrase: &SecretString) -> Result<RsaPrivateKey> {
    if !pem.contains(&format!("-----BEGIN {}-----", ENCRYPTED_KEY_LABEL)) {
        return Err(Error::Storage("no encrypted private key block".to_string()));
    }
    RsaPrivateKey::from_pkcs8_encrypted_pem(pem, passphrase.expose_secret().as_bytes())
        .map_err(|_| Error::WrongCredential("cannot decrypt PKCS#8 private key".to_string()))
}

/// Fallback format: encrypted key block followed by certificate blocks.
fn bundle_to_pem(bundle: &KeyBundle, passphrase: &SecretString) -> Result<Zeroizing<String>> {
    let mut out = encrypt_key_pem(&bundle.private_key, passphrase)?;
    out.push_str(&bundle.certificate.to_pem(LineEnding::LF)?);
    for cert in &bundle.chain {
        out.push_str(&cert.to_pem(LineEnding::LF)?);
    }
    Ok(out)
}

fn bundle_from_pem(text: &str, passphrase: &SecretString) -> Result<KeyBundle> {
    let end_marker = format!("-----END {}-----", ENCRYPTED_KEY_LABEL);
    let key_end = text
        .find(&end_marker)
        .map(|p| p + end_marker.len())
        .ok_or_else(|| Error::Storage("PEM bundle has no encrypted private key".to_string()))?;
    let private_key = decrypt_key_pem(&text[..key_end], passphrase)?;

    let mut certs = Certificate::load_pem_chain(text[key_end..].trim_start().as_bytes())?;
    if certs.is_empty() {
        return Err(Error::Storage("PEM bundle has no certificate".to_string()));
    }
    let certificate = certs.remove(0);
    Ok(KeyBundle {
        private_key,
        certificate,
        chain: certs,
    })
}

/// DER of a certificate, for callers that hash or compare encodings.
pub fn certificate_der(cert: &Certificate) -> Result<Vec<u8>> {
    Ok(cert.to_der()?)
}

/// Parse a DER certificate.
pub fn certificate_from_der(der: &[u8]) -> Result<Certificate> {
    Ok(Certificate::from_der(der)?)
}
