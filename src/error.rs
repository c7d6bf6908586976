//! Error types for the certificate authority and the signing pipeline.
//!
//! Every fallible operation in the crate returns [`Result`]. Lower-level
//! decoder errors are folded into `Crypto` or `Storage` with their message.

use crate::signatures::PartialSigning;

/// Result type alias for crate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while issuing certificates or signing PDFs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Key, certificate, CRL or counter persistence failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A password-protected container could not be opened with the given secret.
    #[error("Wrong credential: {0}")]
    WrongCredential(String),

    /// Key generation, signing or digest failure.
    #[error("Cryptographic failure: {0}")]
    Crypto(String),

    /// The signing operation could not be carried out.
    #[error("Signing error: {0}")]
    Signing(String),

    /// A certificate failed to validate against its claimed issuer.
    #[error("Chain of trust error: {0}")]
    ChainOfTrust(String),

    /// Input PDF lacks the structure needed to locate or compute byte ranges.
    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    /// Certification succeeded but one or more approval signatures failed.
    #[error("Partial signing: {} page(s) failed", .0.failed_pages.len())]
    PartialSigning(Box<PartialSigning>),

    /// A serial, certificate or field that was asked for does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The signing certificate is outside its validity window.
    #[error("Certificate expired or not yet valid: {0}")]
    CertificateExpired(String),

    /// The input document already carries a certifying signature.
    #[error("Document already certified by {0}")]
    AlreadyCertified(String),

    /// The hardware signing backend is absent or refused the operation.
    #[error("Signing hardware unavailable: {0}")]
    HardwareUnavailable(String),

    /// The configured serial number upper bound has been reached.
    #[error("Serial numbers exhausted (limit {0})")]
    SerialExhausted(u64),

    /// A signature spec failed validation at construction.
    #[error("Invalid signature spec: {0}")]
    InvalidSpec(String),

    /// Configuration file or environment override is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Parse error at specific byte offset
    #[error("Failed to parse object at byte {offset}: {reason}")]
    ParseError {
        /// Byte offset where error occurred
        offset: usize,
        /// Reason for parse failure
        reason: String,
    },

    /// Referenced object not found in cross-reference table
    #[error("Object not found: {0} {1} R")]
    ObjectNotFound(u32, u16),

    /// Stream decoding error
    #[error("Stream decoding error: {0}")]
    Decode(String),

    /// Unsupported stream filter
    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Process exit codes for the command-style operations.
pub mod exit_code {
    /// Operation completed.
    pub const SUCCESS: i32 = 0;
    /// Any failure without a dedicated code.
    pub const FAILURE: i32 = 1;
    /// Certificate, serial or bundle not found.
    pub const CERTIFICATE_NOT_FOUND: i32 = 2;
    /// Certificate expired or not yet valid.
    pub const CERTIFICATE_EXPIRED: i32 = 3;
    /// Wrong passphrase or container decryption failure.
    pub const WRONG_CREDENTIAL: i32 = 4;
    /// Signing hardware unavailable.
    pub const HARDWARE_UNAVAILABLE: i32 = 5;
    /// Serial number space exhausted.
    pub const SERIAL_EXHAUSTED: i32 = 6;
    /// Input document is malformed.
    pub const MALFORMED_INPUT: i32 = 7;
    /// Bad command line.
    pub const USAGE: i32 = 64;
}

impl Error {
    /// Map the error onto the exit code contract of the command-line surface.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::NotFound(_) => exit_code::CERTIFICATE_NOT_FOUND,
            Error::CertificateExpired(_) => exit_code::CERTIFICATE_EXPIRED,
            Error::WrongCredential(_) => exit_code::WRONG_CREDENTIAL,
            Error::HardwareUnavailable(_) => exit_code::HARDWARE_UNAVAILABLE,
            Error::SerialExhausted(_) => exit_code::SERIAL_EXHAUSTED,
            Error::MalformedDocument(_)
            | Error::ParseError { .. }
            | Error::ObjectNotFound(..)
            | Error::Decode(_)
            | Error::UnsupportedFilter(_) => exit_code::MALFORMED_INPUT,
            _ => exit_code::FAILURE,
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Error::MalformedDocument(reason.into())
    }

    pub(crate) fn crypto(reason: impl std::fmt::Display) -> Self {
        Error::Crypto(reason.to_string())
    }
}

impl From<der::Error> for Error {
    fn from(e: der::Error) -> Self {
        Error::Crypto(format!("DER: {}", e))
    }
}

impl From<rsa::Error> for Error {
    fn from(e: rsa::Error) -> Self {
        Error::Crypto(format!("RSA: {}", e))
    }
}

impl From<signature::Error> for Error {
    fn from(e: signature::Error) -> Self {
        Error::Crypto(format!("signature: {}", e))
    }
}

impl From<x509_cert::builder::Error> for Error {
    fn from(e: x509_cert::builder::Error) -> Self {
        Error::Crypto(format!("certificate builder: {}", e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Storage(format!("JSON: {}", e))
    }
}
