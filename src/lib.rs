// Allow some clippy lints that are too pedantic for this project
#![allow(clippy::too_many_arguments)]
#![allow(clippy::type_complexity)]
// Allow unused for tests
#![cfg_attr(test, allow(dead_code))]

//! # pdf_certsign
//!
//! Private X.509 certificate authority and DocMDP-certified PDF signing.
//!
//! ## Core Features
//!
//! ### Certificate Authority
//! - **Root bootstrap**: RSA root key sealed at rest, self-signed root certificate
//! - **Leaf issuance**: monotonic serials, code-signing/e-mail EKUs, CRL and AIA pointers
//! - **Revocation**: persisted ledger, signed version 2 CRLs
//!
//! ### Signing
//! - **Certification**: one invisible DocMDP `/P 1` signature
//! - **Approval**: one visible signature per page, each in its own incremental revision
//! - **Key providers**: sealed local bundles or a hardware token backend
//!
//! ### Verification
//! - **Integrity**: byte range coverage per revision, CMS digest and RSA signature
//! - **Trust**: issuer, validity at signing time, CRL status
//! - **Modification analysis**: what changed after the certifying revision
//!
//! ## Quick Start
//!
//! ```no_run
//! use pdf_certsign::ca::{CertificateAuthority, SubjectInfo};
//! use pdf_certsign::config::SigningConfig;
//! use pdf_certsign::provider::LocalKeyProvider;
//! use pdf_certsign::signatures::{verify, SigningEngine};
//! use secrecy::SecretString;
//!
//! # fn main() -> pdf_certsign::Result<()> {
//! let config = SigningConfig::default();
//! let ca = CertificateAuthority::open("ca", config.clone(), SecretString::from("root pass".to_string()))?;
//! ca.bootstrap_root()?;
//!
//! let leaf_pass = SecretString::from("leaf pass".to_string());
//! let issued = ca.issue_leaf_certificate(&SubjectInfo::individual("Jane Roe")?, 3, &leaf_pass)?;
//!
//! let engine = SigningEngine::new(LocalKeyProvider::new(issued.bundle), config);
//! let signed = engine.sign(&std::fs::read("contract.pdf")?)?;
//!
//! let report = verify(&signed, &[ca.root_certificate()?], Some(&ca.build_crl()?))?;
//! assert!(report.is_fully_valid());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

// Error handling
pub mod error;

// Core PDF parsing
pub mod document;
pub mod lexer;
pub mod object;
pub mod objstm;
pub mod parser;
pub mod xref;

// Stream decoders
pub mod decoders;

// PDF writing (fixtures and incremental updates)
pub mod writer;

// Certificate authority
pub mod ca;

// Key storage and signing providers
pub mod keystore;
pub mod provider;

// Digital signatures
pub mod signatures;

// Configuration
pub mod config;

pub use document::PdfDocument;
pub use error::{Error, Result};
