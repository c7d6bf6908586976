//! PDF signature verification.
//!
//! For every signature field the verifier checks the byte range against the
//! revision that contains it, the CMS digest and RSA signature, and the
//! signer certificate against the trust roots and an optional CRL. The
//! certifying signature then decides how later revisions are judged.

use super::byterange::ByteRangeCalculator;
use super::certinfo::CertificateInfo;
use super::cms::{verify_rsa_sha256, ParsedSignature, ID_SHA256_WITH_RSA};
use super::docmdp;
use super::types::{ChainStatus, DocumentPermissionLevel, ModificationStatus, SignatureRecord, VerificationReport};
use crate::ca::Crl;
use crate::document::{PdfDocument, SignatureField};
use crate::error::{Error, Result};
use crate::object::Object;
use chrono::{DateTime, Utc};
use der::Encode;
use x509_cert::Certificate;

/// Verifier for the signatures of a PDF document.
///
/// ```no_run
/// use der::DecodePem;
/// use pdf_certsign::signatures::SignatureVerifier;
/// use pdf_certsign::Error;
/// use x509_cert::Certificate;
///
/// let root = Certificate::from_pem(std::fs::read("ca/ca_cert.pem")?).map_err(|e| Error::Storage(e.to_string()))?;
/// let verifier = SignatureVerifier::new(vec![root]);
/// let report = verifier.verify(&std::fs::read("signed.pdf")?)?;
/// println!("{:?}, {} valid", report.modification_status, report.signatures_valid);
/// # Ok::<(), pdf_certsign::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    trusted_roots: Vec<Certificate>,
    crl: Option<Crl>,
    validation_time: Option<DateTime<Utc>>,
}

impl SignatureVerifier {
    /// Verifier trusting `trusted_roots`.
    pub fn new(trusted_roots: Vec<Certificate>) -> Self {
        Self {
            trusted_roots,
            crl: None,
            validation_time: None,
        }
    }

    /// Add a trusted root certificate.
    pub fn add_trusted_root(&mut self, root: Certificate) {
        self.trusted_roots.push(root);
    }

    /// Check revocation against `crl`.
    pub fn with_crl(mut self, crl: Crl) -> Self {
        self.crl = Some(crl);
        self
    }

    /// Judge CRL freshness at `at` instead of now.
    pub fn with_validation_time(mut self, at: DateTime<Utc>) -> Self {
        self.validation_time = Some(at);
        self
    }

    fn now(&self) -> DateTime<Utc> {
        self.validation_time.unwrap_or_else(Utc::now)
    }

    /// Verify every signature in `pdf`.
    pub fn verify(&self, pdf: &[u8]) -> Result<VerificationReport> {
        let doc = PdfDocument::from_bytes(pdf.to_vec())?;
        let mut records = doc
            .signature_fields()?
            .iter()
            .map(|field| self.verify_field(&doc, field))
            .collect::<Result<Vec<_>>>()?;
        records.sort_by_key(|r| r.byte_range[2] + r.byte_range[3]);

        let certifying: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_certifying)
            .map(|(i, _)| i)
            .collect();
        let overall_permission = certifying
            .first()
            .and_then(|&i| records[i].permission_level_if_certifying);

        let modification_status = match certifying.as_slice() {
            [] => ModificationStatus::NotCertified,
            [0] => {
                let level = overall_permission.unwrap_or(DocumentPermissionLevel::FormFillingAndCommentingOnly);
                match docmdp::first_violation(&doc, records[0].revision_index, level)? {
                    Some(reason) => {
                        log::warn!("document modified after certification: {}", reason);
                        ModificationStatus::ModifiedAfterCertification
                    },
                    None => ModificationStatus::Unmodified,
                }
            },
            [_] => ModificationStatus::CertificationNotFirst,
            _ => ModificationStatus::MultipleCertifications,
        };

        let signatures_valid = records.iter().filter(|r| r.is_valid()).count();
        log::info!(
            "verified {} signature(s): {} valid, {:?}",
            records.len(),
            signatures_valid,
            modification_status
        );
        Ok(VerificationReport {
            signatures: records,
            overall_permission,
            modification_status,
            signatures_valid,
        })
    }

    fn verify_field(&self, doc: &PdfDocument, field: &SignatureField) -> Result<SignatureRecord> {
        let byte_range = field
            .byte_range()
            .ok_or_else(|| Error::malformed(format!("{}: /ByteRange is not four integers", field.name)))?;
        let signed = ByteRangeCalculator::extract_signed_bytes(doc.data(), &byte_range)?;
        let end = (byte_range[2] + byte_range[3]) as usize;

        let ending = doc.revision_ending_at(end);
        let covers_byte_range =
            ending.is_some() && ByteRangeCalculator::validate_byte_range(doc.data(), &byte_range, end).is_ok();
        let revision_index = ending
            .or_else(|| doc.revision_containing(end.saturating_sub(1)))
            .unwrap_or_else(|| doc.latest_revision());
        if !covers_byte_range {
            log::warn!("{}: byte range does not cover its revision", field.name);
        }

        let is_certifying = docmdp::is_certifying(&field.sig);
        let permission_level_if_certifying = if is_certifying {
            docmdp::permission_of(&field.sig)
        } else {
            None
        };

        let contents = field.sig.get("Contents").and_then(Object::as_string).unwrap_or_default();
        let parsed = match ParsedSignature::parse(contents) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("{}: unreadable signature: {}", field.name, e);
                return Ok(SignatureRecord {
                    field_name: field.name.clone(),
                    signer_subject: String::new(),
                    cryptographic_validity: false,
                    chain_validity: false,
                    chain_status: ChainStatus::Unreadable(e.to_string()),
                    covers_byte_range,
                    byte_range,
                    revision_index,
                    is_certifying,
                    permission_level_if_certifying,
                    signing_time: None,
                });
            },
        };

        let cryptographic_validity = parsed.verify(&signed).unwrap_or(false);
        let signing_time = parsed.signing_time;
        let (signer_subject, chain_status) = match CertificateInfo::from_certificate(&parsed.signer_certificate) {
            Ok(info) => {
                let status = self.chain_status(&parsed.signer_certificate, &info, signing_time);
                (info.subject, status)
            },
            Err(e) => (String::new(), ChainStatus::Unreadable(e.to_string())),
        };
        log::debug!(
            "{}: crypto {}, chain {:?}, revision {}",
            field.name,
            cryptographic_validity,
            chain_status,
            revision_index
        );

        Ok(SignatureRecord {
            field_name: field.name.clone(),
            signer_subject,
            cryptographic_validity,
            chain_validity: chain_status.is_valid(),
            chain_status,
            covers_byte_range,
            byte_range,
            revision_index,
            is_certifying,
            permission_level_if_certifying,
            signing_time,
        })
    }

    fn chain_status(
        &self,
        certificate: &Certificate,
        info: &CertificateInfo,
        signing_time: Option<DateTime<Utc>>,
    ) -> ChainStatus {
        let Some(root) = self.trusted_roots.iter().find(|root| issued_by(certificate, root)) else {
            return ChainStatus::UntrustedIssuer;
        };
        if !info.is_valid_at(signing_time.unwrap_or_else(|| self.now())) {
            return ChainStatus::OutsideValidity;
        }
        let Some(crl) = &self.crl else {
            return ChainStatus::RevocationNotChecked;
        };
        if !crl.verify(root) {
            ChainStatus::InvalidCrl
        } else if crl.is_stale(self.now()) {
            ChainStatus::StaleCrl
        } else if crl.is_revoked(&certificate.tbs_certificate.serial_number) {
            ChainStatus::Revoked
        } else {
            ChainStatus::Valid
        }
    }
}

/// `certificate` names `issuer` as its issuer and carries its signature.
pub fn issued_by(certificate: &Certificate, issuer: &Certificate) -> bool {
    if certificate.tbs_certificate.issuer != issuer.tbs_certificate.subject {
        return false;
    }
    if certificate.signature_algorithm.oid != ID_SHA256_WITH_RSA {
        return false;
    }
    let Ok(tbs) = certificate.tbs_certificate.to_der() else { return false };
    let Some(signature) = certificate.signature.as_bytes() else { return false };
    verify_rsa_sha256(issuer, &tbs, signature)
}

/// Verify `pdf` against `trust_roots`, checking revocation when `crl` is given.
pub fn verify(pdf: &[u8], trust_roots: &[Certificate], crl: Option<&Crl>) -> Result<VerificationReport> {
    let mut verifier = SignatureVerifier::new(trust_roots.to_vec());
    if let Some(crl) = crl {
        verifier = verifier.with_crl(crl.clone());
    }
    verifier.verify(pdf)
}
