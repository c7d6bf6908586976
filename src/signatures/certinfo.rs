//! Certificate fields needed for signing and reporting.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use der::Encode;
use x509_cert::Certificate;
use x509_parser::prelude::{FromDer, X509Certificate};

/// Readable certificate summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    /// Subject CN, or the full subject when there is none
    pub common_name: String,
    /// Subject distinguished name
    pub subject: String,
    /// Issuer distinguished name
    pub issuer: String,
    /// Start of validity
    pub not_before: DateTime<Utc>,
    /// End of validity
    pub not_after: DateTime<Utc>,
    /// DER of the whole certificate
    pub cert_der: Vec<u8>,
}

impl CertificateInfo {
    /// Summarize `certificate`.
    pub fn from_certificate(certificate: &Certificate) -> Result<Self> {
        let der = certificate.to_der()?;
        Self::from_der(&der)
    }

    /// Summarize a DER certificate.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::Crypto(format!("certificate: {}", e)))?;
        let subject = cert.subject().to_string();
        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| subject.clone());
        let validity = cert.validity();
        let to_utc = |ts: i64| DateTime::<Utc>::from_timestamp(ts, 0).unwrap_or_default();
        Ok(Self {
            common_name,
            subject,
            issuer: cert.issuer().to_string(),
            not_before: to_utc(validity.not_before.timestamp()),
            not_after: to_utc(validity.not_after.timestamp()),
            cert_der: der.to_vec(),
        })
    }

    /// `not_before <= at <= not_after`.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::SubjectInfo;
    use chrono::Duration;

    #[test]
    fn test_summary() {
        let key = rsa::RsaPrivateKey::new(&mut rsa::rand_core::OsRng, 2048).unwrap();
        let subject = SubjectInfo::new("Jane Roe").unwrap().with_organization("ACME");
        let cert = crate::ca::authority::self_signed_for_tests(&key, &subject).unwrap();

        let info = CertificateInfo::from_certificate(&cert).unwrap();
        assert_eq!(info.common_name, "Jane Roe");
        assert!(info.subject.contains("O=ACME"));
        assert_eq!(info.subject, info.issuer);
        assert!(info.is_valid_at(Utc::now()));
        assert!(!info.is_valid_at(Utc::now() + Duration::days(400)));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(CertificateInfo::from_der(&[0x30, 0x03, 0x02]), Err(Error::Crypto(_))));
    }
}
