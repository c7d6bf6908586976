//! Signature specs, plans and verification results.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};

/// `/Filter` written into every signature dictionary.
pub const SIGNATURE_FILTER: &str = "Adobe.PPKLite";
/// `/SubFilter` written into every signature dictionary.
pub const SIGNATURE_SUB_FILTER: &str = "adbe.pkcs7.detached";

/// Field name of the certifying signature.
pub const CERTIFICATION_FIELD: &str = "CertificationSignature";

/// Field name of the approval signature on 1-based page `n`.
pub fn approval_field_name(page_number: usize) -> String {
    format!("ApprovalSignaturePage{}", page_number)
}

/// Change permissions granted by a certifying signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DocumentPermissionLevel {
    /// No DocMDP restriction.
    NoRestriction,
    /// Form filling, signing and commenting only (`/P 2`, `/P 3` read as this too).
    FormFillingAndCommentingOnly,
    /// No changes at all (`/P 1`).
    NoChangesAllowed,
}

impl DocumentPermissionLevel {
    /// DocMDP `/P` value, `None` for [`NoRestriction`](Self::NoRestriction).
    pub fn docmdp_p(self) -> Option<i64> {
        match self {
            DocumentPermissionLevel::NoRestriction => None,
            DocumentPermissionLevel::FormFillingAndCommentingOnly => Some(2),
            DocumentPermissionLevel::NoChangesAllowed => Some(1),
        }
    }

    /// Level for a `/P` value read from a file.
    pub fn from_docmdp_p(p: i64) -> Option<Self> {
        match p {
            1 => Some(DocumentPermissionLevel::NoChangesAllowed),
            2 | 3 => Some(DocumentPermissionLevel::FormFillingAndCommentingOnly),
            _ => None,
        }
    }
}

/// Widget rectangle in default user space (`[llx lly urx ury]`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignatureRect {
    /// Lower-left x
    pub llx: f64,
    /// Lower-left y
    pub lly: f64,
    /// Upper-right x
    pub urx: f64,
    /// Upper-right y
    pub ury: f64,
}

impl SignatureRect {
    /// Validated rectangle with positive width and height.
    pub fn new(llx: f64, lly: f64, urx: f64, ury: f64) -> Result<Self> {
        if ![llx, lly, urx, ury].iter().all(|v| v.is_finite()) {
            return Err(Error::InvalidSpec("rectangle coordinates must be finite".to_string()));
        }
        if urx <= llx || ury <= lly {
            return Err(Error::InvalidSpec(format!(
                "rectangle [{} {} {} {}] has no area",
                llx, lly, urx, ury
            )));
        }
        Ok(Self { llx, lly, urx, ury })
    }

    /// The `(450, 50, 580, 120)` box used for approval signatures.
    pub fn default_approval() -> Self {
        Self {
            llx: 450.0,
            lly: 50.0,
            urx: 580.0,
            ury: 120.0,
        }
    }

    /// Width of the box.
    pub fn width(&self) -> f64 {
        self.urx - self.llx
    }

    /// Height of the box.
    pub fn height(&self) -> f64 {
        self.ury - self.lly
    }
}

fn check_text(what: &str, value: &str) -> Result<()> {
    if value.chars().any(|c| c.is_control()) {
        return Err(Error::InvalidSpec(format!("{} contains control characters", what)));
    }
    Ok(())
}

fn check_field_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidSpec("field name is empty".to_string()));
    }
    if name.contains('.') {
        return Err(Error::InvalidSpec(format!("field name {:?} contains '.'", name)));
    }
    check_text("field name", name)
}

/// The one certifying signature of a document.
///
/// The widget is invisible (`/Rect [0 0 0 0]`).
#[derive(Debug, Clone, PartialEq)]
pub struct CertifyingSignatureSpec {
    field_name: String,
    permission: DocumentPermissionLevel,
    reason: String,
    location: String,
}

impl CertifyingSignatureSpec {
    /// Validated spec. `NoRestriction` cannot be certified since it has no `/P` value.
    pub fn new(
        field_name: impl Into<String>,
        permission: DocumentPermissionLevel,
        reason: impl Into<String>,
        location: impl Into<String>,
    ) -> Result<Self> {
        let spec = Self {
            field_name: field_name.into(),
            permission,
            reason: reason.into(),
            location: location.into(),
        };
        check_field_name(&spec.field_name)?;
        check_text("reason", &spec.reason)?;
        check_text("location", &spec.location)?;
        if permission.docmdp_p().is_none() {
            return Err(Error::InvalidSpec(
                "a certifying signature needs a DocMDP permission level".to_string(),
            ));
        }
        Ok(spec)
    }

    /// `CertificationSignature`, no changes allowed.
    pub fn no_changes(reason: impl Into<String>, location: impl Into<String>) -> Result<Self> {
        Self::new(CERTIFICATION_FIELD, DocumentPermissionLevel::NoChangesAllowed, reason, location)
    }

    /// Field name.
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// Permission level written to `/TransformParams /P`.
    pub fn permission(&self) -> DocumentPermissionLevel {
        self.permission
    }

    /// `/Reason`.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// `/Location`.
    pub fn location(&self) -> &str {
        &self.location
    }
}

/// A visible approval signature on one page.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalSignatureSpec {
    field_name: String,
    page_index: usize,
    rect: SignatureRect,
    reason: String,
    location: String,
}

impl ApprovalSignatureSpec {
    /// Validated spec for the 0-based `page_index`.
    pub fn new(
        field_name: impl Into<String>,
        page_index: usize,
        rect: SignatureRect,
        reason: impl Into<String>,
        location: impl Into<String>,
    ) -> Result<Self> {
        let spec = Self {
            field_name: field_name.into(),
            page_index,
            rect,
            reason: reason.into(),
            location: location.into(),
        };
        check_field_name(&spec.field_name)?;
        check_text("reason", &spec.reason)?;
        check_text("location", &spec.location)?;
        // Re-validate in case the rectangle was built by struct literal.
        SignatureRect::new(rect.llx, rect.lly, rect.urx, rect.ury)?;
        Ok(spec)
    }

    /// `ApprovalSignaturePage{n}` in the default box.
    pub fn for_page(page_index: usize, reason: impl Into<String>, location: impl Into<String>) -> Result<Self> {
        Self::new(
            approval_field_name(page_index + 1),
            page_index,
            SignatureRect::default_approval(),
            reason,
            location,
        )
    }

    /// Field name.
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// 0-based page the widget sits on.
    pub fn page_index(&self) -> usize {
        self.page_index
    }

    /// Widget rectangle.
    pub fn rect(&self) -> SignatureRect {
        self.rect
    }

    /// `/Reason`.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// `/Location`, also printed in the appearance.
    pub fn location(&self) -> &str {
        &self.location
    }
}

/// One signature revision to append.
#[derive(Debug, Clone, PartialEq)]
pub enum SignaturePlan {
    /// Certifying signature with DocMDP.
    Certify(CertifyingSignatureSpec),
    /// Approval signature.
    Approve(ApprovalSignatureSpec),
}

impl SignaturePlan {
    /// Field name of the planned signature.
    pub fn field_name(&self) -> &str {
        match self {
            SignaturePlan::Certify(s) => s.field_name(),
            SignaturePlan::Approve(s) => s.field_name(),
        }
    }
}

/// What the engine does when an approval signature fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Keep the certified document and report per-page results.
    #[default]
    KeepCertified,
    /// Stop at the first failure and return its error.
    AbortAll,
}

/// A page whose approval signature could not be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFailure {
    /// 0-based page index
    pub page_index: usize,
    /// Error text
    pub reason: String,
}

/// Outcome of a signing run in which some approvals failed.
#[derive(Debug, Clone)]
pub struct PartialSigning {
    /// Document after the certifying revision only.
    pub certified: Vec<u8>,
    /// Document after every approval that succeeded.
    pub partially_approved: Vec<u8>,
    /// 0-based pages that were approved.
    pub completed_pages: Vec<usize>,
    /// Pages that failed.
    pub failed_pages: Vec<PageFailure>,
}

/// Result of checking a signer certificate against the trust roots and CRL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStatus {
    /// Issued by a trust root, in validity at signing time, not revoked.
    Valid,
    /// No CRL was supplied; revocation was not checked.
    RevocationNotChecked,
    /// No trust root matches the issuer name or signature.
    UntrustedIssuer,
    /// Signing time outside the certificate's validity window.
    OutsideValidity,
    /// Serial listed on the CRL.
    Revoked,
    /// CRL past its `nextUpdate`.
    StaleCrl,
    /// CRL not issued or not correctly signed by the trust root.
    InvalidCrl,
    /// Certificate could not be read from the signature.
    Unreadable(String),
}

impl ChainStatus {
    /// Whether the chain is acceptable.
    pub fn is_valid(&self) -> bool {
        matches!(self, ChainStatus::Valid | ChainStatus::RevocationNotChecked)
    }
}

/// Document-level result of modification analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModificationStatus {
    /// No certifying signature present.
    NotCertified,
    /// Certified, and later revisions only add permitted signatures.
    Unmodified,
    /// A later revision changed something the permission level forbids.
    ModifiedAfterCertification,
    /// The certifying signature is not the first signature.
    CertificationNotFirst,
    /// More than one certifying signature.
    MultipleCertifications,
}

/// One verified signature.
#[derive(Debug, Clone)]
pub struct SignatureRecord {
    /// Field name
    pub field_name: String,
    /// Signer certificate subject (RFC 4514 string)
    pub signer_subject: String,
    /// Digest and RSA signature check out
    pub cryptographic_validity: bool,
    /// Chain status is acceptable
    pub chain_validity: bool,
    /// Detailed chain status
    pub chain_status: ChainStatus,
    /// The byte range covers its whole revision except `/Contents`
    pub covers_byte_range: bool,
    /// `/ByteRange`
    pub byte_range: [i64; 4],
    /// 0-based revision the signature belongs to
    pub revision_index: usize,
    /// Whether the signature carries a DocMDP reference
    pub is_certifying: bool,
    /// DocMDP level when certifying
    pub permission_level_if_certifying: Option<DocumentPermissionLevel>,
    /// CMS `signingTime`
    pub signing_time: Option<DateTime<Utc>>,
}

impl SignatureRecord {
    /// Cryptographically and chain valid, and covering its revision.
    pub fn is_valid(&self) -> bool {
        self.cryptographic_validity && self.chain_validity && self.covers_byte_range
    }
}

/// Verification of a whole document.
#[derive(Debug, Clone)]
pub struct VerificationReport {
    /// Signatures in byte range order
    pub signatures: Vec<SignatureRecord>,
    /// Permission level of the certifying signature, if any
    pub overall_permission: Option<DocumentPermissionLevel>,
    /// Modification analysis
    pub modification_status: ModificationStatus,
    /// Count of records that are both cryptographically and chain valid
    pub signatures_valid: usize,
}

impl VerificationReport {
    /// Certified, unmodified, and every signature valid.
    pub fn is_fully_valid(&self) -> bool {
        self.modification_status == ModificationStatus::Unmodified
            && self.signatures.iter().all(SignatureRecord::is_valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_mapping() {
        assert_eq!(DocumentPermissionLevel::NoChangesAllowed.docmdp_p(), Some(1));
        assert_eq!(DocumentPermissionLevel::FormFillingAndCommentingOnly.docmdp_p(), Some(2));
        assert_eq!(DocumentPermissionLevel::NoRestriction.docmdp_p(), None);
        assert_eq!(
            DocumentPermissionLevel::from_docmdp_p(3),
            Some(DocumentPermissionLevel::FormFillingAndCommentingOnly)
        );
        assert_eq!(DocumentPermissionLevel::from_docmdp_p(7), None);
    }

    #[test]
    fn test_rect_validation() {
        assert!(SignatureRect::new(0.0, 0.0, 10.0, 10.0).is_ok());
        assert!(SignatureRect::new(10.0, 0.0, 10.0, 10.0).is_err());
        assert!(SignatureRect::new(0.0, 0.0, f64::NAN, 10.0).is_err());
        let r = SignatureRect::default_approval();
        assert_eq!((r.width(), r.height()), (130.0, 70.0));
    }

    #[test]
    fn test_certifying_spec_validation() {
        let spec = CertifyingSignatureSpec::no_changes("Document certified - no changes allowed", "Chennai").unwrap();
        assert_eq!(spec.field_name(), CERTIFICATION_FIELD);
        assert_eq!(spec.permission(), DocumentPermissionLevel::NoChangesAllowed);

        let err = CertifyingSignatureSpec::new("Cert", DocumentPermissionLevel::NoRestriction, "r", "l");
        assert!(matches!(err, Err(Error::InvalidSpec(_))));
        assert!(CertifyingSignatureSpec::new("", DocumentPermissionLevel::NoChangesAllowed, "r", "l").is_err());
        assert!(CertifyingSignatureSpec::new("a.b", DocumentPermissionLevel::NoChangesAllowed, "r", "l").is_err());
    }

    #[test]
    fn test_approval_spec_validation() {
        let spec = ApprovalSignatureSpec::for_page(2, "Approved", "Chennai").unwrap();
        assert_eq!(spec.field_name(), "ApprovalSignaturePage3");
        assert_eq!(spec.page_index(), 2);

        let flat = SignatureRect {
            llx: 5.0,
            lly: 5.0,
            urx: 5.0,
            ury: 9.0,
        };
        assert!(ApprovalSignatureSpec::new("A", 0, flat, "r", "l").is_err());
        assert!(ApprovalSignatureSpec::new("A", 0, SignatureRect::default_approval(), "bad\nreason", "l").is_err());
    }

    #[test]
    fn test_chain_status_validity() {
        assert!(ChainStatus::Valid.is_valid());
        assert!(ChainStatus::RevocationNotChecked.is_valid());
        assert!(!ChainStatus::Revoked.is_valid());
        assert!(!ChainStatus::StaleCrl.is_valid());
    }
}
