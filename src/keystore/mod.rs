//! Persistent key material.
//!
//! - [`container`]: Argon2id + AES-256-GCM sealed JSON envelope
//! - [`store`]: root key and leaf bundle files, with an encrypted PKCS#8 PEM
//!   fallback

pub mod container;
pub mod store;

pub use container::{KdfParams, SealedContainer};
pub use store::{load_bundle_file, write_atomic, KeyBundle, KeyMaterialStore};
