//! Certificate subject names.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use x509_cert::name::Name;

/// Distinguished name fields plus an optional e-mail address.
///
/// The e-mail address is not part of the DN; it is carried in the
/// `subjectAltName` extension as an `rfc822Name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectInfo {
    /// CN
    pub common_name: String,
    /// O
    pub organization: Option<String>,
    /// OU
    pub organizational_unit: Option<String>,
    /// C (two letters)
    pub country: Option<String>,
    /// ST
    pub state: Option<String>,
    /// L
    pub locality: Option<String>,
    /// rfc822Name for the SAN extension
    pub email: Option<String>,
}

impl SubjectInfo {
    /// Subject with only a common name.
    pub fn new(common_name: impl Into<String>) -> Result<Self> {
        let common_name = common_name.into();
        if common_name.trim().is_empty() {
            return Err(Error::InvalidSpec("common name is empty".to_string()));
        }
        Ok(Self {
            common_name,
            organization: None,
            organizational_unit: None,
            country: None,
            state: None,
            locality: None,
            email: None,
        })
    }

    /// Individual signer defaults: `O=PERSONAL, OU=Individual` in Chennai, IN.
    pub fn individual(common_name: impl Into<String>) -> Result<Self> {
        Ok(Self::new(common_name)?
            .with_organization("PERSONAL")
            .with_organizational_unit("Individual")
            .with_country("IN")
            .with_state("Tamil Nadu")
            .with_locality("Chennai"))
    }

    /// Default subject of the root authority.
    pub fn root_default() -> Self {
        Self {
            common_name: "FTE PDF Signing Root CA".to_string(),
            organization: Some("FTE Digital Workspace CA".to_string()),
            organizational_unit: Some("Certificate Authority".to_string()),
            country: Some("IN".to_string()),
            state: Some("Tamil Nadu".to_string()),
            locality: Some("Chennai".to_string()),
            email: None,
        }
    }

    /// Set O.
    pub fn with_organization(mut self, value: impl Into<String>) -> Self {
        self.organization = Some(value.into());
        self
    }

    /// Set OU.
    pub fn with_organizational_unit(mut self, value: impl Into<String>) -> Self {
        self.organizational_unit = Some(value.into());
        self
    }

    /// Set C.
    pub fn with_country(mut self, value: impl Into<String>) -> Self {
        self.country = Some(value.into());
        self
    }

    /// Set ST.
    pub fn with_state(mut self, value: impl Into<String>) -> Self {
        self.state = Some(value.into());
        self
    }

    /// Set L.
    pub fn with_locality(mut self, value: impl Into<String>) -> Self {
        self.locality = Some(value.into());
        self
    }

    /// Set the SAN e-mail address.
    pub fn with_email(mut self, value: impl Into<String>) -> Self {
        self.email = Some(value.into());
        self
    }

    /// RFC 4514 form, most specific attribute first.
    pub fn to_rfc4514(&self) -> String {
        let parts = [
            ("CN", Some(&self.common_name)),
            ("OU", self.organizational_unit.as_ref()),
            ("O", self.organization.as_ref()),
            ("L", self.locality.as_ref()),
            ("ST", self.state.as_ref()),
            ("C", self.country.as_ref()),
        ];
        parts
            .iter()
            .filter_map(|(key, value)| value.map(|v| format!("{}={}", key, escape_rfc4514(v))))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// X.509 `Name`.
    pub fn to_name(&self) -> Result<Name> {
        if let Some(country) = &self.country {
            if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(Error::InvalidSpec(format!("country {:?} is not a two-letter code", country)));
            }
        }
        Name::from_str(&self.to_rfc4514())
            .map_err(|e| Error::InvalidSpec(format!("subject {:?}: {}", self.common_name, e)))
    }
}

fn escape_rfc4514(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, c) in value.chars().enumerate() {
        let leading = i == 0 && (c == ' ' || c == '#');
        let trailing = i == last && c == ' ';
        if leading || trailing || matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc4514_order_and_escaping() {
        let s = SubjectInfo::new("Doe, Jane").unwrap().with_organization("ACME").with_country("IN");
        assert_eq!(s.to_rfc4514(), "CN=Doe\\, Jane,O=ACME,C=IN");
        assert!(s.to_name().is_ok());
    }

    #[test]
    fn test_root_default_name() {
        let name = SubjectInfo::root_default().to_name().unwrap();
        let text = name.to_string();
        assert!(text.contains("CN=FTE PDF Signing Root CA"));
        assert!(text.contains("C=IN"));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(SubjectInfo::new("  ").is_err());
        let s = SubjectInfo::new("X").unwrap().with_country("India");
        assert!(matches!(s.to_name(), Err(Error::InvalidSpec(_))));
    }

    #[test]
    fn test_individual_defaults() {
        let s = SubjectInfo::individual("TEST SIGNER").unwrap();
        assert_eq!(s.organization.as_deref(), Some("PERSONAL"));
        assert_eq!(s.locality.as_deref(), Some("Chennai"));
        assert!(s.email.is_none());
    }
}
