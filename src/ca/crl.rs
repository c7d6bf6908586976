//! Version 2 certificate revocation lists.

use super::state::RevocationEntry;
use super::{from_x509_time, serial_to_u64, to_x509_time};
use crate::error::{Error, Result};
use crate::provider::RawSigner;
use crate::signatures::cms::{verify_rsa_sha256, ID_SHA256_WITH_RSA};
use chrono::{DateTime, Utc};
use der::asn1::BitString;
use der::{Any, Decode, Encode};
use spki::AlgorithmIdentifierOwned;
use x509_cert::crl::{CertificateList, RevokedCert, TbsCertList};
use x509_cert::serial_number::SerialNumber;
use x509_cert::{Certificate, Version};

/// A signed CRL with its DER encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct Crl {
    list: CertificateList,
    der: Vec<u8>,
}

impl Crl {
    /// Sign a CRL listing `revocations` as issuer `issuer`.
    pub fn build(
        issuer: &Certificate,
        signer: &dyn RawSigner,
        revocations: &[RevocationEntry],
        this_update: DateTime<Utc>,
        next_update: DateTime<Utc>,
    ) -> Result<Self> {
        if next_update <= this_update {
            return Err(Error::Crypto("CRL nextUpdate must follow thisUpdate".to_string()));
        }
        let algorithm = AlgorithmIdentifierOwned {
            oid: ID_SHA256_WITH_RSA,
            parameters: Some(Any::encode_from(&der::asn1::Null)?),
        };

        let revoked = revocations
            .iter()
            .map(|entry| {
                Ok(RevokedCert {
                    serial_number: SerialNumber::from(entry.serial),
                    revocation_date: to_x509_time(entry.revocation_time)?,
                    crl_entry_extensions: None,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let tbs = TbsCertList {
            version: Version::V2,
            signature: algorithm.clone(),
            issuer: issuer.tbs_certificate.subject.clone(),
            this_update: to_x509_time(this_update)?,
            next_update: Some(to_x509_time(next_update)?),
            revoked_certificates: if revoked.is_empty() { None } else { Some(revoked) },
            crl_extensions: None,
        };
        let signature = signer.sign(&tbs.to_der()?)?;
        let list = CertificateList {
            tbs_cert_list: tbs,
            signature_algorithm: algorithm,
            signature: BitString::from_bytes(&signature)?,
        };
        let der = list.to_der()?;
        log::info!("built CRL with {} revoked serial(s)", revocations.len());
        Ok(Self { list, der })
    }

    /// Parse a DER CRL.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let list = CertificateList::from_der(der)
            .map_err(|e| Error::Storage(format!("CRL: {}", e)))?;
        Ok(Self {
            list,
            der: der.to_vec(),
        })
    }

    /// DER encoding.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// `thisUpdate`.
    pub fn this_update(&self) -> DateTime<Utc> {
        from_x509_time(&self.list.tbs_cert_list.this_update)
    }

    /// `nextUpdate`, when present.
    pub fn next_update(&self) -> Option<DateTime<Utc>> {
        self.list.tbs_cert_list.next_update.as_ref().map(from_x509_time)
    }

    /// Past `nextUpdate` at `at`. A CRL without `nextUpdate` is never stale.
    pub fn is_stale(&self, at: DateTime<Utc>) -> bool {
        self.next_update().is_some_and(|next| at > next)
    }

    /// Issued by `issuer` (name match) and signed by its key.
    pub fn verify(&self, issuer: &Certificate) -> bool {
        if self.list.tbs_cert_list.issuer != issuer.tbs_certificate.subject {
            return false;
        }
        if self.list.signature_algorithm.oid != ID_SHA256_WITH_RSA {
            return false;
        }
        let Ok(tbs) = self.list.tbs_cert_list.to_der() else { return false };
        let Some(signature) = self.list.signature.as_bytes() else { return false };
        verify_rsa_sha256(issuer, &tbs, signature)
    }

    /// Whether `serial` is listed.
    pub fn is_revoked(&self, serial: &SerialNumber) -> bool {
        self.list
            .tbs_cert_list
            .revoked_certificates
            .iter()
            .flatten()
            .any(|r| &r.serial_number == serial)
    }

    /// Listed serials that fit in 64 bits.
    pub fn revoked_serials(&self) -> Vec<u64> {
        self.list
            .tbs_cert_list
            .revoked_certificates
            .iter()
            .flatten()
            .filter_map(|r| serial_to_u64(&r.serial_number))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::SubjectInfo;
    use crate::provider::LocalSigner;
    use chrono::Duration;
    use rsa::RsaPrivateKey;

    fn issuer() -> (RsaPrivateKey, Certificate) {
        let key = RsaPrivateKey::new(&mut rsa::rand_core::OsRng, 2048).unwrap();
        let cert = crate::ca::authority::self_signed_for_tests(&key, &SubjectInfo::new("CRL ISSUER").unwrap()).unwrap();
        (key, cert)
    }

    #[test]
    fn test_build_and_check() {
        let (key, cert) = issuer();
        let now = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let entries = [RevocationEntry {
            serial: 5,
            revocation_time: now,
        }];
        let crl = Crl::build(&cert, &LocalSigner::new(key), &entries, now, now + Duration::days(30)).unwrap();

        assert!(crl.verify(&cert));
        assert!(crl.is_revoked(&SerialNumber::from(5u64)));
        assert!(!crl.is_revoked(&SerialNumber::from(6u64)));
        assert_eq!(crl.revoked_serials(), vec![5]);
        assert_eq!(crl.this_update(), now);
        assert!(!crl.is_stale(now + Duration::days(29)));
        assert!(crl.is_stale(now + Duration::days(31)));

        let parsed = Crl::from_der(crl.der()).unwrap();
        assert_eq!(parsed, crl);
    }

    #[test]
    fn test_wrong_issuer_fails() {
        let (key, cert) = issuer();
        let (_, other) = issuer();
        let now = Utc::now();
        let crl = Crl::build(&cert, &LocalSigner::new(key), &[], now, now + Duration::days(1)).unwrap();
        assert!(crl.verify(&cert));
        assert!(!crl.verify(&other));
        assert!(crl.revoked_serials().is_empty());
    }

    #[test]
    fn test_next_update_must_follow() {
        let (key, cert) = issuer();
        let now = Utc::now();
        assert!(Crl::build(&cert, &LocalSigner::new(key), &[], now, now).is_err());
    }
}
