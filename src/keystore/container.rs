//! Password-sealed container.
//!
//! A JSON envelope holding AES-256-GCM ciphertext under a key derived from
//! the passphrase with Argon2id. The KDF parameters travel inside the
//! envelope so a container stays readable after the defaults change.

use crate::error::{Error, Result};
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose, Engine as _};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_cost: u32,
    /// Number of iterations
    pub time_cost: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_cost: 19456,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Argon2 parameters, or `Error::Config` when Argon2 rejects them.
    pub fn to_argon2(self) -> Result<Params> {
        Params::new(self.memory_cost, self.time_cost, self.parallelism, Some(KEY_LEN))
            .map_err(|e| Error::Config(format!("Argon2 parameters rejected: {}", e)))
    }
}

/// Sealed key material, as stored on disk.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SealedContainer {
    /// Base64 AES-256-GCM ciphertext (tag appended).
    encrypted_data: String,
    /// Base64 96-bit nonce.
    nonce: String,
    /// Base64 Argon2 salt.
    salt: String,
    /// What the plaintext is.
    algorithm_id: String,
    /// RFC 3339 creation time.
    created_at: String,
    #[serde(default = "default_memory_cost")]
    memory_cost: u32,
    #[serde(default = "default_time_cost")]
    time_cost: u32,
    #[serde(default = "default_parallelism")]
    parallelism: u32,
}

fn default_memory_cost() -> u32 {
    KdfParams::default().memory_cost
}
fn default_time_cost() -> u32 {
    KdfParams::default().time_cost
}
fn default_parallelism() -> u32 {
    KdfParams::default().parallelism
}

fn derive_key(passphrase: &SecretString, salt: &[u8], params: KdfParams) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2()?);
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(passphrase.expose_secret().as_bytes(), salt, &mut key[..])
        .map_err(Error::crypto)?;
    Ok(key)
}

impl SealedContainer {
    /// Encrypt `plaintext` under `passphrase`.
    pub fn seal(passphrase: &SecretString, plaintext: &[u8], algorithm_id: &str, params: KdfParams) -> Result<Self> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let key = derive_key(passphrase, &salt, params)?;

        let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(Error::crypto)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher.encrypt(&nonce, plaintext).map_err(Error::crypto)?;

        Ok(Self {
            encrypted_data: general_purpose::STANDARD.encode(ciphertext),
            nonce: general_purpose::STANDARD.encode(nonce),
            salt: general_purpose::STANDARD.encode(salt),
            algorithm_id: algorithm_id.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            memory_cost: params.memory_cost,
            time_cost: params.time_cost,
            parallelism: params.parallelism,
        })
    }

    /// Decrypt. A wrong passphrase is `Error::WrongCredential`.
    pub fn open(&self, passphrase: &SecretString) -> Result<Zeroizing<Vec<u8>>> {
        let decode = |field: &str, value: &str| {
            general_purpose::STANDARD
                .decode(value)
                .map_err(|e| Error::Storage(format!("container field {}: {}", field, e)))
        };
        let salt = decode("salt", &self.salt)?;
        let nonce = decode("nonce", &self.nonce)?;
        let ciphertext = decode("encrypted_data", &self.encrypted_data)?;
        if nonce.len() != NONCE_LEN {
            return Err(Error::Storage(format!("container nonce is {} bytes", nonce.len())));
        }

        let key = derive_key(passphrase, &salt, self.kdf_params())?;
        let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(Error::crypto)?;
        cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map(Zeroizing::new)
            .map_err(|_| Error::WrongCredential(format!("cannot open {} container", self.algorithm_id)))
    }

    /// KDF parameters stored in the envelope.
    pub fn kdf_params(&self) -> KdfParams {
        KdfParams {
            memory_cost: self.memory_cost,
            time_cost: self.time_cost,
            parallelism: self.parallelism,
        }
    }

    /// Plaintext kind recorded at seal time.
    pub fn algorithm_id(&self) -> &str {
        &self.algorithm_id
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Storage(format!("sealed container: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Small costs keep the unit tests fast.
    fn fast() -> KdfParams {
        KdfParams {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    fn secret(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    #[test]
    fn test_seal_and_open() {
        let c = SealedContainer::seal(&secret("correct horse"), b"key bytes", "test", fast()).unwrap();
        assert_eq!(c.open(&secret("correct horse")).unwrap().as_slice(), b"key bytes");
        assert_eq!(c.algorithm_id(), "test");
        assert_eq!(c.kdf_params(), fast());
    }

    #[test]
    fn test_wrong_passphrase() {
        let c = SealedContainer::seal(&secret("right"), b"payload", "test", fast()).unwrap();
        assert!(matches!(c.open(&secret("wrong")), Err(Error::WrongCredential(_))));
    }

    #[test]
    fn test_json_envelope() {
        let c = SealedContainer::seal(&secret("pw"), b"payload", "test", fast()).unwrap();
        let json = c.to_json().unwrap();
        assert!(json.contains("\"memory_cost\": 1024"));
        assert!(!json.contains("payload"));
        let back = SealedContainer::from_json(&json).unwrap();
        assert_eq!(back.open(&secret("pw")).unwrap().as_slice(), b"payload");
        assert!(matches!(SealedContainer::from_json("{"), Err(Error::Storage(_))));
    }

    #[test]
    fn test_rejected_params() {
        let bad = KdfParams {
            memory_cost: 1,
            time_cost: 1,
            parallelism: 1,
        };
        assert!(matches!(bad.to_argon2(), Err(Error::Config(_))));
        assert!(SealedContainer::seal(&secret("pw"), b"x", "test", bad).is_err());
    }
}
