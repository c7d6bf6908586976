//! Where signing keys come from.
//!
//! The signing engine never touches a private key directly. It asks a
//! [`KeyProvider`] for a [`SigningIdentity`]: a certificate, its issuing chain
//! and a [`RawSigner`] that produces RSA PKCS#1 v1.5 / SHA-256 signatures.
//! Software keys are served by [`LocalKeyProvider`]; hardware tokens plug in
//! through [`HardwareTokenBackend`] and never release their key.

use crate::error::{Error, Result};
use crate::keystore::{load_bundle_file, KeyBundle, KeyMaterialStore};
use der::Decode;
use rsa::pkcs1v15::SigningKey;
use rsa::RsaPrivateKey;
use secrecy::SecretString;
use sha2::Sha256;
use signature::{SignatureEncoding, Signer};
use std::path::Path;
use std::sync::{Arc, Mutex};
use x509_cert::Certificate;

/// Produces raw signatures without exposing the key.
pub trait RawSigner: Send + Sync {
    /// RSA PKCS#1 v1.5 signature over SHA-256 of `message`.
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;
}

/// In-process RSA key.
pub struct LocalSigner {
    key: SigningKey<Sha256>,
}

impl LocalSigner {
    /// Wrap a private key.
    pub fn new(private_key: RsaPrivateKey) -> Self {
        Self {
            key: SigningKey::<Sha256>::new(private_key),
        }
    }
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LocalSigner([REDACTED])")
    }
}

impl RawSigner for LocalSigner {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let signature = self.key.try_sign(message)?;
        Ok(signature.to_vec())
    }
}

/// Everything needed to produce one PDF signature.
pub struct SigningIdentity {
    /// The signing operation
    pub signer: Box<dyn RawSigner>,
    /// Signer certificate
    pub certificate: Certificate,
    /// Issuer certificates, root last
    pub chain: Vec<Certificate>,
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("subject", &self.certificate.tbs_certificate.subject.to_string())
            .field("chain", &self.chain.len())
            .finish()
    }
}

/// Source of signing identities.
pub trait KeyProvider: Send + Sync {
    /// Signer, certificate and chain for the next signature.
    fn signing_identity(&self) -> Result<SigningIdentity>;
}

/// Key material held in memory, loaded from a [`KeyMaterialStore`] bundle.
#[derive(Debug, Clone)]
pub struct LocalKeyProvider {
    bundle: KeyBundle,
}

impl LocalKeyProvider {
    /// Use an already loaded bundle.
    pub fn new(bundle: KeyBundle) -> Self {
        Self { bundle }
    }

    /// Load bundle `name` from `store`.
    pub fn from_store(store: &KeyMaterialStore, name: &str, passphrase: &SecretString) -> Result<Self> {
        Ok(Self::new(store.load_bundle(name, passphrase)?))
    }

    /// Load a `.bundle` or `.pem` file.
    pub fn from_file(path: impl AsRef<Path>, passphrase: &SecretString) -> Result<Self> {
        Ok(Self::new(load_bundle_file(path.as_ref(), passphrase)?))
    }

    /// Signer certificate.
    pub fn certificate(&self) -> &Certificate {
        &self.bundle.certificate
    }
}

impl KeyProvider for LocalKeyProvider {
    fn signing_identity(&self) -> Result<SigningIdentity> {
        Ok(SigningIdentity {
            signer: Box::new(LocalSigner::new(self.bundle.private_key.clone())),
            certificate: self.bundle.certificate.clone(),
            chain: self.bundle.chain.clone(),
        })
    }
}

/// Operations a hardware signing token must support.
///
/// Device discovery, PIN entry and transport are the backend's business.
pub trait HardwareTokenBackend: Send {
    /// Short backend name for log messages.
    fn backend_name(&self) -> &str;

    /// Whether a usable token is connected.
    fn is_present(&mut self) -> bool;

    /// DER certificate matching the token's signing key.
    fn get_certificate_der(&mut self) -> Result<Vec<u8>>;

    /// DER issuer certificates, root last.
    fn get_chain_der(&mut self) -> Result<Vec<Vec<u8>>> {
        Ok(Vec::new())
    }

    /// RSA PKCS#1 v1.5 / SHA-256 signature over `message`.
    fn sign_message(&mut self, message: &[u8]) -> Result<Vec<u8>>;
}

/// Backend for machines without a token; always unavailable.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHardwareToken;

impl HardwareTokenBackend for NoHardwareToken {
    fn backend_name(&self) -> &str {
        "none"
    }

    fn is_present(&mut self) -> bool {
        false
    }

    fn get_certificate_der(&mut self) -> Result<Vec<u8>> {
        Err(Error::HardwareUnavailable("no hardware token backend configured".to_string()))
    }

    fn sign_message(&mut self, _message: &[u8]) -> Result<Vec<u8>> {
        Err(Error::HardwareUnavailable("no hardware token backend configured".to_string()))
    }
}

/// [`KeyProvider`] over a hardware token.
pub struct HardwareKeyProvider<B: HardwareTokenBackend + 'static> {
    backend: Arc<Mutex<B>>,
}

impl<B: HardwareTokenBackend + 'static> HardwareKeyProvider<B> {
    /// Wrap a backend.
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(Mutex::new(backend)),
        }
    }
}

fn lock_backend<B>(backend: &Mutex<B>) -> Result<std::sync::MutexGuard<'_, B>> {
    backend
        .lock()
        .map_err(|_| Error::HardwareUnavailable("token backend lock poisoned".to_string()))
}

struct TokenSigner<B: HardwareTokenBackend> {
    backend: Arc<Mutex<B>>,
}

impl<B: HardwareTokenBackend> RawSigner for TokenSigner<B> {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let mut backend = lock_backend(&self.backend)?;
        if !backend.is_present() {
            return Err(Error::HardwareUnavailable(format!(
                "{} token removed before signing",
                backend.backend_name()
            )));
        }
        backend.sign_message(message)
    }
}

impl<B: HardwareTokenBackend + 'static> KeyProvider for HardwareKeyProvider<B> {
    fn signing_identity(&self) -> Result<SigningIdentity> {
        let mut backend = lock_backend(&self.backend)?;
        if !backend.is_present() {
            return Err(Error::HardwareUnavailable(format!(
                "no {} token present",
                backend.backend_name()
            )));
        }
        let certificate = Certificate::from_der(&backend.get_certificate_der()?)
            .map_err(|e| Error::HardwareUnavailable(format!("token certificate unreadable: {}", e)))?;
        let chain = backend
            .get_chain_der()?
            .iter()
            .map(|der| Certificate::from_der(der))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        log::info!(
            "using {} token certificate {}",
            backend.backend_name(),
            certificate.tbs_certificate.subject
        );
        Ok(SigningIdentity {
            signer: Box::new(TokenSigner {
                backend: Arc::clone(&self.backend),
            }),
            certificate,
            chain,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use der::Encode;
    use rsa::pkcs1v15::VerifyingKey;
    use signature::Verifier;

    fn key() -> RsaPrivateKey {
        RsaPrivateKey::new(&mut rsa::rand_core::OsRng, 2048).unwrap()
    }

    #[test]
    fn test_local_signer_produces_pkcs1v15() {
        let key = key();
        let signer = LocalSigner::new(key.clone());
        let sig = signer.sign(b"message").unwrap();
        assert_eq!(sig.len(), 256);

        let verifying = VerifyingKey::<Sha256>::new(key.to_public_key());
        let sig = rsa::pkcs1v15::Signature::try_from(sig.as_slice()).unwrap();
        assert!(verifying.verify(b"message", &sig).is_ok());
        assert_eq!(format!("{:?}", signer), "LocalSigner([REDACTED])");
    }

    #[test]
    fn test_missing_token_is_unavailable() {
        let provider = HardwareKeyProvider::new(NoHardwareToken);
        let err = provider.signing_identity().unwrap_err();
        assert!(matches!(err, Error::HardwareUnavailable(_)));
        assert_eq!(err.exit_code(), crate::error::exit_code::HARDWARE_UNAVAILABLE);
    }

    struct SoftToken {
        signer: LocalSigner,
        cert_der: Vec<u8>,
        present: bool,
    }

    impl HardwareTokenBackend for SoftToken {
        fn backend_name(&self) -> &str {
            "soft"
        }
        fn is_present(&mut self) -> bool {
            self.present
        }
        fn get_certificate_der(&mut self) -> Result<Vec<u8>> {
            Ok(self.cert_der.clone())
        }
        fn sign_message(&mut self, message: &[u8]) -> Result<Vec<u8>> {
            self.signer.sign(message)
        }
    }

    #[test]
    fn test_token_backed_identity_signs() {
        let key = key();
        let subject = crate::ca::subject::SubjectInfo::new("TOKEN USER").unwrap();
        let cert = crate::ca::authority::self_signed_for_tests(&key, &subject).unwrap();
        let provider = HardwareKeyProvider::new(SoftToken {
            signer: LocalSigner::new(key),
            cert_der: cert.to_der().unwrap(),
            present: true,
        });

        let identity = provider.signing_identity().unwrap();
        assert_eq!(identity.certificate, cert);
        assert!(identity.chain.is_empty());
        let sig = identity.signer.sign(b"abc").unwrap();
        assert!(crate::signatures::cms::verify_rsa_sha256(&cert, b"abc", &sig));
    }
}
