//! PDF digital signatures.
//!
//! ## Features
//!
//! - **Certification**: one DocMDP certifying signature per document
//! - **Approval**: one visible approval signature per page, each in its own
//!   incremental revision
//! - **Verification**: byte range coverage, CMS digest and RSA signature,
//!   chain and CRL checks, DocMDP modification analysis
//!
//! ## Signature Format
//!
//! - `/Filter /Adobe.PPKLite`, `/SubFilter /adbe.pkcs7.detached`
//! - CMS SignedData over SHA-256 with RSA PKCS#1 v1.5, signed attributes
//!   `contentType`, `messageDigest` and `signingTime`
//!
//! ## PDF Specification Reference
//!
//! - ISO 32000-1:2008 Section 12.8 - Digital Signatures
//! - ISO 32000-1:2008 Section 12.8.2.2 - DocMDP

pub mod appearance;
pub mod byterange;
pub mod certinfo;
pub mod cms;
pub mod docmdp;
pub mod engine;
pub mod types;
pub mod verifier;

pub use appearance::SignatureAppearance;
pub use byterange::ByteRangeCalculator;
pub use certinfo::CertificateInfo;
pub use engine::{append_signature, pdf_date, AppendOptions, SigningEngine, SigningState};
pub use types::{
    approval_field_name, ApprovalSignatureSpec, CertifyingSignatureSpec, ChainStatus, DocumentPermissionLevel,
    FailurePolicy, ModificationStatus, PageFailure, PartialSigning, SignaturePlan, SignatureRecord, SignatureRect,
    VerificationReport, CERTIFICATION_FIELD,
};
pub use verifier::{verify, SignatureVerifier};
