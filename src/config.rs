//! Configuration for the certificate authority and the signing pipeline.
//!
//! Loaded from a JSON file (every field optional), then overridden from the
//! environment. Passphrases are never part of the file.

use crate::ca::SubjectInfo;
use crate::error::{Error, Result};
use crate::keystore::KdfParams;
use crate::signatures::SignatureRect;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Overrides the CRL distribution point URL.
pub const ENV_CRL_URL: &str = "PDF_CERTSIGN_CRL_URL";
/// Overrides the AIA caIssuers URL.
pub const ENV_CA_ISSUERS_URL: &str = "PDF_CERTSIGN_CA_ISSUERS_URL";
/// Overrides the signer's UTC offset in minutes.
pub const ENV_UTC_OFFSET_MINUTES: &str = "PDF_CERTSIGN_UTC_OFFSET_MINUTES";
/// Overrides the signing location.
pub const ENV_LOCATION: &str = "PDF_CERTSIGN_LOCATION";
/// Root key passphrase.
pub const ENV_CA_PASSPHRASE: &str = "PDF_CERTSIGN_CA_PASSPHRASE";
/// Leaf bundle passphrase.
pub const ENV_LEAF_PASSPHRASE: &str = "PDF_CERTSIGN_LEAF_PASSPHRASE";

/// Smallest accepted root key.
pub const MIN_ROOT_KEY_BITS: usize = 3072;

/// Certificate authority settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaConfig {
    /// Root certificate subject
    pub root_subject: SubjectInfo,
    /// Root RSA modulus size
    pub root_key_bits: usize,
    /// Leaf RSA modulus size
    pub leaf_key_bits: usize,
    /// Root validity in years
    pub root_validity_years: u32,
    /// Default leaf validity in years
    pub leaf_validity_years: u32,
    /// CRL distribution point written into leaves
    pub crl_url: String,
    /// AIA caIssuers URL written into leaves
    pub ca_issuers_url: String,
    /// Days between `thisUpdate` and `nextUpdate`
    pub crl_validity_days: u32,
    /// Highest serial the CA may hand out
    pub max_serial: u64,
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            root_subject: SubjectInfo::root_default(),
            root_key_bits: 4096,
            leaf_key_bits: 2048,
            root_validity_years: 10,
            leaf_validity_years: 3,
            crl_url: "http://localhost:8000/pdf-signature/crl/".to_string(),
            ca_issuers_url: "http://localhost:8000/pdf-signature/ca-cert/".to_string(),
            crl_validity_days: 30,
            max_serial: u64::from(u32::MAX),
        }
    }
}

/// Signature dictionary and timing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignConfig {
    /// Signer's offset from UTC in minutes (+05:30 is 330)
    pub utc_offset_minutes: i32,
    /// `/Reason` of the certifying signature
    pub certification_reason: String,
    /// `/Location` of every signature
    pub location: String,
    /// `/Reason` of approval signatures
    pub approval_reason: String,
    /// Bytes reserved for the DER signature in `/Contents`
    pub contents_reserve: usize,
}

impl Default for SignConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 330,
            certification_reason: "Document certified - no changes allowed".to_string(),
            location: "Chennai".to_string(),
            approval_reason: "Approved".to_string(),
            contents_reserve: 8192,
        }
    }
}

/// Visible approval box layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppearanceConfig {
    /// `[llx, lly, urx, ury]` of the widget on each page
    pub rect: [f64; 4],
    /// Font size of the signer name line
    pub name_font_size: f64,
    /// Font size of the other lines
    pub font_size: f64,
    /// Left margin inside the box
    pub x_offset: f64,
    /// Baseline of the bottom line
    pub first_baseline: f64,
    /// Distance between baselines
    pub line_spacing: f64,
}

impl Default for AppearanceConfig {
    fn default() -> Self {
        Self {
            rect: [450.0, 50.0, 580.0, 120.0],
            name_font_size: 12.0,
            font_size: 10.0,
            x_offset: 5.0,
            first_baseline: 10.0,
            line_spacing: 15.0,
        }
    }
}

impl AppearanceConfig {
    /// Validated widget rectangle.
    pub fn signature_rect(&self) -> Result<SignatureRect> {
        let [llx, lly, urx, ury] = self.rect;
        SignatureRect::new(llx, lly, urx, ury)
    }
}

/// Complete configuration.
///
/// ```
/// use pdf_certsign::config::SigningConfig;
///
/// let config = SigningConfig::default().with_location("Mumbai").with_utc_offset_minutes(330);
/// assert_eq!(config.signing.location, "Mumbai");
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// CA section
    pub ca: CaConfig,
    /// Signing section
    pub signing: SignConfig,
    /// Appearance section
    pub appearance: AppearanceConfig,
    /// Argon2 costs for sealed containers
    pub keystore: KdfParams,
}

impl SigningConfig {
    /// Create configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| Error::Config(format!("invalid JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON file and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {}", path.display(), e)))?;
        let mut config = Self::from_json(&text)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Defaults with environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally `std::env::var`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup(ENV_CRL_URL) {
            self.ca.crl_url = url;
        }
        if let Some(url) = lookup(ENV_CA_ISSUERS_URL) {
            self.ca.ca_issuers_url = url;
        }
        if let Some(minutes) = lookup(ENV_UTC_OFFSET_MINUTES) {
            self.signing.utc_offset_minutes = minutes
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("{} must be an integer, got {:?}", ENV_UTC_OFFSET_MINUTES, minutes)))?;
        }
        if let Some(location) = lookup(ENV_LOCATION) {
            self.signing.location = location;
        }
        self.validate()
    }

    /// Check ranges the rest of the crate relies on.
    pub fn validate(&self) -> Result<()> {
        if self.ca.root_key_bits < MIN_ROOT_KEY_BITS {
            return Err(Error::Config(format!(
                "root key must be at least {} bits, got {}",
                MIN_ROOT_KEY_BITS, self.ca.root_key_bits
            )));
        }
        if self.ca.leaf_key_bits < 2048 {
            return Err(Error::Config(format!("leaf key must be at least 2048 bits, got {}", self.ca.leaf_key_bits)));
        }
        if self.ca.crl_validity_days == 0 {
            return Err(Error::Config("crl_validity_days must be positive".to_string()));
        }
        if self.ca.max_serial < 2 {
            return Err(Error::Config("max_serial leaves no room for leaf certificates".to_string()));
        }
        if self.signing.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(Error::Config(format!(
                "UTC offset {} minutes is out of range",
                self.signing.utc_offset_minutes
            )));
        }
        if self.signing.contents_reserve < 1024 {
            return Err(Error::Config("contents_reserve below 1024 bytes cannot hold a CMS signature".to_string()));
        }
        self.appearance.signature_rect().map_err(|e| Error::Config(e.to_string()))?;
        Ok(())
    }

    /// Set the root key size.
    pub fn with_root_key_bits(mut self, bits: usize) -> Self {
        self.ca.root_key_bits = bits;
        self
    }

    /// Set the CRL distribution point.
    pub fn with_crl_url(mut self, url: impl Into<String>) -> Self {
        self.ca.crl_url = url.into();
        self
    }

    /// Set the serial upper bound.
    pub fn with_max_serial(mut self, max_serial: u64) -> Self {
        self.ca.max_serial = max_serial;
        self
    }

    /// Set the signer's UTC offset.
    pub fn with_utc_offset_minutes(mut self, minutes: i32) -> Self {
        self.signing.utc_offset_minutes = minutes;
        self
    }

    /// Set the signing location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.signing.location = location.into();
        self
    }

    /// Set the Argon2 costs.
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.keystore = kdf;
        self
    }
}

/// Read a passphrase from environment variable `var`.
pub fn passphrase_from_env(var: &str) -> Result<SecretString> {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => Ok(SecretString::from(value)),
        _ => Err(Error::Config(format!("{} is not set", var))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = SigningConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.signing.utc_offset_minutes, 330);
        assert_eq!(config.ca.root_key_bits, 4096);
        assert_eq!(config.appearance.signature_rect().unwrap(), SignatureRect::default_approval());
    }

    #[test]
    fn test_partial_json() {
        let config = SigningConfig::from_json(r#"{"signing": {"location": "Madurai"}, "ca": {"max_serial": 50}}"#).unwrap();
        assert_eq!(config.signing.location, "Madurai");
        assert_eq!(config.signing.approval_reason, "Approved");
        assert_eq!(config.ca.max_serial, 50);
    }

    #[test]
    fn test_small_root_key_rejected() {
        let err = SigningConfig::from_json(r#"{"ca": {"root_key_bits": 2048}}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_CRL_URL, "https://ca.example/crl"),
            (ENV_UTC_OFFSET_MINUTES, "-300"),
            (ENV_LOCATION, "Toronto"),
        ]
        .into_iter()
        .collect();
        let mut config = SigningConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.ca.crl_url, "https://ca.example/crl");
        assert_eq!(config.signing.utc_offset_minutes, -300);
        assert_eq!(config.signing.location, "Toronto");

        let mut config = SigningConfig::default();
        let bad = config.apply_env(|k| (k == ENV_UTC_OFFSET_MINUTES).then(|| "soon".to_string()));
        assert!(matches!(bad, Err(Error::Config(_))));
    }
}
