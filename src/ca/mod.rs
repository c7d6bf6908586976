//! Private certificate authority.
//!
//! One self-signed RSA root issues leaf signing certificates and CRLs. All
//! mutable state ([`CaState`]) and the root key sit behind a single mutex in
//! [`CertificateAuthority`].
//!
//! ```no_run
//! use pdf_certsign::ca::{CertificateAuthority, SubjectInfo};
//! use pdf_certsign::config::SigningConfig;
//! use secrecy::SecretString;
//!
//! let ca = CertificateAuthority::open("ca", SigningConfig::default(), SecretString::from("root pass".to_string()))?;
//! ca.bootstrap_root()?;
//! let leaf = ca.issue_leaf_certificate(
//!     &SubjectInfo::individual("TEST SIGNER")?,
//!     3,
//!     &SecretString::from("leaf pass".to_string()),
//! )?;
//! println!("issued serial {}", leaf.serial);
//! # Ok::<(), pdf_certsign::Error>(())
//! ```

pub mod authority;
pub mod crl;
pub mod state;
pub mod subject;

pub use authority::{CertificateAuthority, IssuedCertificate};
pub use crl::Crl;
pub use state::{CaState, RevocationEntry};
pub use subject::SubjectInfo;

use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, Utc};
use der::asn1::{GeneralizedTime, UtcTime};
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::Time;

/// X.509 time: `UTCTime` before 2050, `GeneralizedTime` from then on.
pub(crate) fn to_x509_time(at: DateTime<Utc>) -> Result<Time> {
    let secs = u64::try_from(at.timestamp())
        .map_err(|_| Error::Crypto(format!("time {} before 1970", at)))?;
    let duration = std::time::Duration::from_secs(secs);
    if at.year() < 2050 {
        Ok(Time::UtcTime(UtcTime::from_unix_duration(duration)?))
    } else {
        Ok(Time::GeneralTime(GeneralizedTime::from_unix_duration(duration)?))
    }
}

pub(crate) fn from_x509_time(time: &Time) -> DateTime<Utc> {
    let secs = i64::try_from(time.to_unix_duration().as_secs()).unwrap_or(i64::MAX);
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Numeric value of a serial that fits in 64 bits.
pub fn serial_to_u64(serial: &SerialNumber) -> Option<u64> {
    let bytes = serial.as_bytes();
    let significant: Vec<u8> = bytes.iter().copied().skip_while(|b| *b == 0).collect();
    if significant.len() > 8 {
        return None;
    }
    Some(significant.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_time_encoding_switches_at_2050() {
        let before = Utc.with_ymd_and_hms(2049, 12, 31, 23, 59, 59).unwrap();
        let after = Utc.with_ymd_and_hms(2050, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(to_x509_time(before).unwrap(), Time::UtcTime(_)));
        assert!(matches!(to_x509_time(after).unwrap(), Time::GeneralTime(_)));
        assert_eq!(from_x509_time(&to_x509_time(after).unwrap()), after);
    }

    #[test]
    fn test_serial_round_trip() {
        for n in [1u64, 2, 127, 128, 255, 65_536, u64::MAX] {
            assert_eq!(serial_to_u64(&SerialNumber::from(n)), Some(n));
        }
    }
}
