//! Integration tests for the certificate authority.
//!
//! - Root bootstrap is idempotent and survives reopening
//! - Serial allocation under concurrent issuance
//! - Revocation and CRL publication

mod common;

use common::{fixture, secret, test_config};
use pdf_certsign::ca::{CertificateAuthority, Crl, SubjectInfo};
use pdf_certsign::Error;
use std::collections::BTreeSet;

#[test]
fn test_bootstrap_is_idempotent_and_persistent() {
    let dir = tempfile::tempdir().unwrap();
    let ca = CertificateAuthority::open(dir.path(), test_config(), secret("root")).unwrap();
    assert!(!ca.is_bootstrapped());
    assert!(matches!(ca.state(), Err(Error::NotFound(_))));

    let first = ca.bootstrap_root().unwrap();
    let second = ca.bootstrap_root().unwrap();
    assert_eq!(first.root_certificate, second.root_certificate);
    assert_eq!(first.next_serial, 2);

    let issued = ca
        .issue_leaf_certificate(&SubjectInfo::individual("Persisted Signer").unwrap(), 1, &secret("leaf"))
        .unwrap();
    assert_eq!(issued.serial, 2);
    drop(ca);

    let reopened = CertificateAuthority::open(dir.path(), test_config(), secret("root")).unwrap();
    assert!(reopened.is_bootstrapped());
    let state = reopened.state().unwrap();
    assert_eq!(state.root_certificate, first.root_certificate);
    assert_eq!(state.next_serial, 3);
    assert!(state.issued_serials.contains(&2));

    let bundle = reopened.load_leaf_bundle(2, &secret("leaf")).unwrap();
    assert_eq!(bundle.certificate, issued.certificate);

    let wrong = CertificateAuthority::open(dir.path(), test_config(), secret("not the root"));
    assert!(matches!(wrong, Err(Error::WrongCredential(_))));
}

#[test]
fn test_concurrent_issuance_yields_unique_serials() {
    let ca = &fixture().ca;
    let serials: Vec<u64> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                scope.spawn(move || {
                    let subject = SubjectInfo::individual(format!("Concurrent Signer {}", i)).unwrap();
                    ca.issue_leaf_certificate(&subject, 1, &secret("leaf")).unwrap().serial
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let unique: BTreeSet<u64> = serials.iter().copied().collect();
    assert_eq!(unique.len(), serials.len());
    assert!(serials.iter().all(|s| *s >= 2));

    let state = ca.state().unwrap();
    assert!(unique.is_subset(&state.issued_serials));
    assert!(state.next_serial > *unique.iter().next_back().unwrap());
}

#[test]
fn test_revocation_and_crl() {
    let ca = &fixture().ca;
    let issued = ca
        .issue_leaf_certificate(&SubjectInfo::individual("Revoked Signer").unwrap(), 1, &secret("leaf"))
        .unwrap();
    assert!(!ca.is_revoked(issued.serial).unwrap());

    let entry = ca.revoke(issued.serial).unwrap();
    let again = ca.revoke(issued.serial).unwrap();
    assert_eq!(entry, again);
    assert!(ca.is_revoked(issued.serial).unwrap());

    assert!(matches!(ca.revoke(1), Err(Error::InvalidSpec(_))));
    assert!(matches!(ca.revoke(u64::from(u32::MAX) - 7), Err(Error::NotFound(_))));

    let crl = ca.build_crl().unwrap();
    let root = ca.root_certificate().unwrap();
    assert!(crl.verify(&root));
    assert!(crl.revoked_serials().contains(&issued.serial));
    assert!(crl.is_revoked(&issued.certificate.tbs_certificate.serial_number));
    assert!(!crl.is_stale(chrono::Utc::now()));

    let published = Crl::from_der(&std::fs::read(ca.crl_path()).unwrap()).unwrap();
    assert_eq!(published.der(), crl.der());
}
