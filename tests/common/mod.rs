//! Shared fixtures for the integration tests.
//!
//! Generating a root key is slow, so one CA is created per test binary and
//! shared through a `OnceLock`. Tests that need a signer issue their own leaf.

#![allow(dead_code)]

use pdf_certsign::ca::{CertificateAuthority, SubjectInfo};
use pdf_certsign::config::SigningConfig;
use pdf_certsign::keystore::KdfParams;
use pdf_certsign::provider::LocalKeyProvider;
use secrecy::SecretString;
use std::sync::OnceLock;
use tempfile::TempDir;

pub struct Fixture {
    _dir: TempDir,
    pub ca: CertificateAuthority,
}

/// Cheap Argon2 costs so sealing does not dominate test time.
pub fn fast_kdf() -> KdfParams {
    KdfParams {
        memory_cost: 1024,
        time_cost: 1,
        parallelism: 1,
    }
}

pub fn test_config() -> SigningConfig {
    SigningConfig::default().with_root_key_bits(3072).with_kdf(fast_kdf())
}

pub fn secret(s: &str) -> SecretString {
    SecretString::from(s.to_string())
}

pub fn fixture() -> &'static Fixture {
    static FIXTURE: OnceLock<Fixture> = OnceLock::new();
    FIXTURE.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::open(dir.path(), test_config(), secret("root passphrase")).unwrap();
        ca.bootstrap_root().unwrap();
        Fixture { _dir: dir, ca }
    })
}

/// Issue a fresh leaf for `name`; returns its provider and serial.
pub fn issue_signer(name: &str) -> (LocalKeyProvider, u64) {
    let issued = fixture()
        .ca
        .issue_leaf_certificate(&SubjectInfo::individual(name).unwrap(), 3, &secret("leaf passphrase"))
        .unwrap();
    (LocalKeyProvider::new(issued.bundle), issued.serial)
}
