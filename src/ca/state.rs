//! Persistent CA bookkeeping: serial counter, issued serials, revocations.
//!
//! `serial.txt` holds the next serial as a bare integer; `ledger.json`
//! holds issued and revoked serials. Both are replaced atomically.

use crate::error::{Error, Result};
use crate::keystore::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use x509_cert::Certificate;

/// Serial of the root certificate.
pub const ROOT_SERIAL: u64 = 1;

pub(crate) const SERIAL_FILE: &str = "serial.txt";
pub(crate) const LEDGER_FILE: &str = "ledger.json";

/// A revoked serial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationEntry {
    /// Revoked serial
    pub serial: u64,
    /// When it was revoked
    pub revocation_time: DateTime<Utc>,
}

/// Public CA state. The root private key is held separately by the authority.
#[derive(Debug, Clone, PartialEq)]
pub struct CaState {
    /// Self-signed root
    pub root_certificate: Certificate,
    /// Next serial to hand out
    pub next_serial: u64,
    /// Every serial issued to a leaf
    pub issued_serials: BTreeSet<u64>,
    /// Revocations in the order they were recorded
    pub revocations: Vec<RevocationEntry>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Ledger {
    issued_serials: BTreeSet<u64>,
    revocations: Vec<RevocationEntry>,
}

impl CaState {
    /// Fresh state right after the root has been created.
    pub fn new(root_certificate: Certificate) -> Self {
        Self {
            root_certificate,
            next_serial: ROOT_SERIAL + 1,
            issued_serials: BTreeSet::new(),
            revocations: Vec::new(),
        }
    }

    /// Whether `serial` was issued by this CA (the root counts).
    pub fn is_issued(&self, serial: u64) -> bool {
        serial == ROOT_SERIAL || self.issued_serials.contains(&serial)
    }

    /// Revocation entry for `serial`, if any.
    pub fn revocation(&self, serial: u64) -> Option<&RevocationEntry> {
        self.revocations.iter().find(|r| r.serial == serial)
    }

    /// Load the counter and ledger from `dir`.
    ///
    /// A counter behind the ledger is moved forward so a serial is never
    /// handed out twice.
    pub(crate) fn load(dir: &Path, root_certificate: Certificate) -> Result<Self> {
        let mut state = Self::new(root_certificate);

        let serial_path = dir.join(SERIAL_FILE);
        if serial_path.exists() {
            let text = std::fs::read_to_string(&serial_path)
                .map_err(|e| Error::Storage(format!("reading {}: {}", serial_path.display(), e)))?;
            state.next_serial = text
                .trim()
                .parse()
                .map_err(|_| Error::Storage(format!("{} does not hold an integer", serial_path.display())))?;
        }

        let ledger_path = dir.join(LEDGER_FILE);
        if ledger_path.exists() {
            let text = std::fs::read_to_string(&ledger_path)
                .map_err(|e| Error::Storage(format!("reading {}: {}", ledger_path.display(), e)))?;
            let ledger: Ledger = serde_json::from_str(&text)?;
            state.issued_serials = ledger.issued_serials;
            state.revocations = ledger.revocations;
        }

        let floor = state
            .issued_serials
            .iter()
            .next_back()
            .map_or(ROOT_SERIAL + 1, |max| max + 1);
        if state.next_serial < floor {
            log::warn!(
                "serial counter {} is behind the ledger; continuing at {}",
                state.next_serial,
                floor
            );
            state.next_serial = floor;
        }
        Ok(state)
    }

    pub(crate) fn persist_counter(dir: &Path, next_serial: u64) -> Result<()> {
        write_atomic(&dir.join(SERIAL_FILE), format!("{}\n", next_serial).as_bytes())
    }

    pub(crate) fn persist_ledger(&self, dir: &Path) -> Result<()> {
        let ledger = Ledger {
            issued_serials: self.issued_serials.clone(),
            revocations: self.revocations.clone(),
        };
        write_atomic(&dir.join(LEDGER_FILE), serde_json::to_string_pretty(&ledger)?.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cert() -> Certificate {
        let key = rsa::RsaPrivateKey::new(&mut rsa::rand_core::OsRng, 2048).unwrap();
        let subject = crate::ca::SubjectInfo::new("STATE TEST").unwrap();
        crate::ca::authority::self_signed_for_tests(&key, &subject).unwrap()
    }

    #[test]
    fn test_counter_and_ledger_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let root = cert();

        let mut state = CaState::new(root.clone());
        state.issued_serials.insert(2);
        state.revocations.push(RevocationEntry {
            serial: 2,
            revocation_time: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
        });
        CaState::persist_counter(dir.path(), 3).unwrap();
        state.persist_ledger(dir.path()).unwrap();

        let loaded = CaState::load(dir.path(), root).unwrap();
        assert_eq!(loaded.next_serial, 3);
        assert!(loaded.is_issued(2));
        assert!(loaded.is_issued(ROOT_SERIAL));
        assert!(!loaded.is_issued(3));
        assert_eq!(loaded.revocation(2).map(|r| r.serial), Some(2));
    }

    #[test]
    fn test_counter_behind_ledger_moves_forward() {
        let dir = tempfile::tempdir().unwrap();
        let root = cert();
        let mut state = CaState::new(root.clone());
        state.issued_serials.extend([2, 3, 9]);
        state.persist_ledger(dir.path()).unwrap();
        CaState::persist_counter(dir.path(), 4).unwrap();

        assert_eq!(CaState::load(dir.path(), root).unwrap().next_serial, 10);
    }

    #[test]
    fn test_corrupt_counter_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SERIAL_FILE), "seven").unwrap();
        assert!(matches!(CaState::load(dir.path(), cert()), Err(Error::Storage(_))));
    }
}
