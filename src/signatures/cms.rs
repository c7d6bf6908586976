//! Detached CMS SignedData (`adbe.pkcs7.detached`).
//!
//! Signing digests the byte-range content with SHA-256, places the digest in
//! the `messageDigest` signed attribute next to `contentType` and
//! `signingTime`, and signs the DER `SET OF` signed attributes with RSA
//! PKCS#1 v1.5. The raw RSA operation is delegated to a [`RawSigner`] so the
//! private key can live outside this process.

use crate::error::{Error, Result};
use crate::provider::RawSigner;
use chrono::{DateTime, Utc};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedData, SignerIdentifier, SignerInfo, SignerInfos,
};
use der::asn1::{ObjectIdentifier, OctetString, SetOfVec, UtcTime};
use der::{Any, Decode, Encode, SliceReader};
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use sha2::{Digest, Sha256};
use signature::Verifier;
use spki::AlgorithmIdentifierOwned;
use x509_cert::attr::Attribute;
use x509_cert::Certificate;

/// id-data
pub const ID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
/// id-signedData
pub const ID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
/// id-contentType
pub const ID_CONTENT_TYPE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.3");
/// id-messageDigest
pub const ID_MESSAGE_DIGEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");
/// id-signingTime
pub const ID_SIGNING_TIME: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.5");
/// id-sha256
pub const ID_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");
/// sha256WithRSAEncryption
pub const ID_SHA256_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
/// rsaEncryption
pub const ID_RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

fn attribute(oid: ObjectIdentifier, value: Any) -> Result<Attribute> {
    Ok(Attribute {
        oid,
        values: SetOfVec::try_from(vec![value])?,
    })
}

fn sha256_with_rsa() -> Result<AlgorithmIdentifierOwned> {
    Ok(AlgorithmIdentifierOwned {
        oid: ID_SHA256_WITH_RSA,
        parameters: Some(Any::encode_from(&der::asn1::Null)?),
    })
}

/// Build a DER `ContentInfo` holding a detached SignedData over `content`.
///
/// `chain` certificates are embedded after the signer certificate.
pub fn build_signed_data(
    content: &[u8],
    signing_time: DateTime<Utc>,
    certificate: &Certificate,
    chain: &[Certificate],
    signer: &dyn RawSigner,
) -> Result<Vec<u8>> {
    let digest = sha256(content);
    let seconds = u64::try_from(signing_time.timestamp())
        .map_err(|_| Error::Signing("signing time before 1970".to_string()))?;
    let utc = UtcTime::from_unix_duration(std::time::Duration::from_secs(seconds))?;

    let signed_attrs = SetOfVec::try_from(vec![
        attribute(ID_CONTENT_TYPE, Any::encode_from(&ID_DATA)?)?,
        attribute(ID_MESSAGE_DIGEST, Any::encode_from(&OctetString::new(digest)?)?)?,
        attribute(ID_SIGNING_TIME, Any::encode_from(&utc)?)?,
    ])?;

    let to_sign = signed_attrs.to_der()?;
    let signature = signer.sign(&to_sign)?;

    let digest_alg = AlgorithmIdentifierOwned {
        oid: ID_SHA256,
        parameters: None,
    };
    let signer_info = SignerInfo {
        version: CmsVersion::V1,
        sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
            issuer: certificate.tbs_certificate.issuer.clone(),
            serial_number: certificate.tbs_certificate.serial_number.clone(),
        }),
        digest_alg: digest_alg.clone(),
        signed_attrs: Some(signed_attrs),
        signature_algorithm: sha256_with_rsa()?,
        signature: OctetString::new(signature)?,
        unsigned_attrs: None,
    };

    let mut certs = vec![CertificateChoices::Certificate(certificate.clone())];
    for c in chain {
        if c != certificate {
            certs.push(CertificateChoices::Certificate(c.clone()));
        }
    }

    let signed_data = SignedData {
        version: CmsVersion::V1,
        digest_algorithms: SetOfVec::try_from(vec![digest_alg])?,
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: ID_DATA,
            econtent: None,
        },
        certificates: Some(CertificateSet(SetOfVec::try_from(certs)?)),
        crls: None,
        signer_infos: SignerInfos(SetOfVec::try_from(vec![signer_info])?),
    };

    let content_info = ContentInfo {
        content_type: ID_SIGNED_DATA,
        content: Any::encode_from(&signed_data)?,
    };
    let der = content_info.to_der()?;
    log::debug!("built CMS SignedData ({} bytes)", der.len());
    Ok(der)
}

/// A parsed detached signature.
#[derive(Debug, Clone)]
pub struct ParsedSignature {
    /// Certificate matching the signer identifier.
    pub signer_certificate: Certificate,
    /// Every embedded certificate.
    pub certificates: Vec<Certificate>,
    /// `messageDigest` attribute value.
    pub message_digest: Vec<u8>,
    /// `signingTime` attribute value.
    pub signing_time: Option<DateTime<Utc>>,
    digest_oid: ObjectIdentifier,
    signed_attrs_der: Vec<u8>,
    signature: Vec<u8>,
}

impl ParsedSignature {
    /// Parse a `/Contents` value. Trailing zero padding is ignored.
    pub fn parse(contents: &[u8]) -> Result<Self> {
        let mut reader = SliceReader::new(contents).map_err(|e| Error::malformed(format!("CMS: {}", e)))?;
        let content_info =
            ContentInfo::decode(&mut reader).map_err(|e| Error::malformed(format!("CMS ContentInfo: {}", e)))?;
        if content_info.content_type != ID_SIGNED_DATA {
            return Err(Error::malformed(format!(
                "CMS content type {} is not signedData",
                content_info.content_type
            )));
        }
        let signed_data = SignedData::from_der(&content_info.content.to_der()?)
            .map_err(|e| Error::malformed(format!("CMS SignedData: {}", e)))?;

        let certificates: Vec<Certificate> = signed_data
            .certificates
            .iter()
            .flat_map(|set| set.0.iter())
            .filter_map(|choice| match choice {
                CertificateChoices::Certificate(c) => Some(c.clone()),
                _ => None,
            })
            .collect();

        let signer_info = signed_data
            .signer_infos
            .0
            .iter()
            .next()
            .ok_or_else(|| Error::malformed("CMS SignedData has no SignerInfo"))?;

        let signer_certificate = match &signer_info.sid {
            SignerIdentifier::IssuerAndSerialNumber(ias) => certificates
                .iter()
                .find(|c| {
                    c.tbs_certificate.issuer == ias.issuer
                        && c.tbs_certificate.serial_number == ias.serial_number
                })
                .cloned(),
            SignerIdentifier::SubjectKeyIdentifier(_) => certificates.first().cloned(),
        }
        .ok_or_else(|| Error::malformed("signer certificate not embedded in CMS"))?;

        let signed_attrs = signer_info
            .signed_attrs
            .as_ref()
            .ok_or_else(|| Error::malformed("CMS SignerInfo has no signed attributes"))?;

        let mut message_digest = None;
        let mut signing_time = None;
        for attr in signed_attrs.iter() {
            let Some(value) = attr.values.iter().next() else { continue };
            if attr.oid == ID_MESSAGE_DIGEST {
                message_digest = Some(value.value().to_vec());
            } else if attr.oid == ID_SIGNING_TIME {
                let time = x509_cert::time::Time::from_der(&value.to_der()?)?;
                let secs = time.to_unix_duration().as_secs() as i64;
                signing_time = DateTime::<Utc>::from_timestamp(secs, 0);
            }
        }

        Ok(Self {
            signer_certificate,
            certificates,
            message_digest: message_digest
                .ok_or_else(|| Error::malformed("CMS signed attributes lack messageDigest"))?,
            signing_time,
            digest_oid: signer_info.digest_alg.oid,
            signed_attrs_der: signed_attrs.to_der()?,
            signature: signer_info.signature.as_bytes().to_vec(),
        })
    }

    /// Check the digest of `signed_content` and the RSA signature.
    ///
    /// `Ok(false)` means the signature does not match; `Err` means it could
    /// not be evaluated at all.
    pub fn verify(&self, signed_content: &[u8]) -> Result<bool> {
        if self.digest_oid != ID_SHA256 {
            log::debug!("unsupported digest algorithm {}", self.digest_oid);
            return Ok(false);
        }
        if sha256(signed_content) != self.message_digest {
            log::debug!("messageDigest mismatch");
            return Ok(false);
        }
        Ok(verify_rsa_sha256(&self.signer_certificate, &self.signed_attrs_der, &self.signature))
    }
}

/// Verify an RSA PKCS#1 v1.5 / SHA-256 signature with the key in `certificate`.
pub fn verify_rsa_sha256(certificate: &Certificate, message: &[u8], signature_bytes: &[u8]) -> bool {
    let spki = &certificate.tbs_certificate.subject_public_key_info;
    if spki.algorithm.oid != ID_RSA_ENCRYPTION {
        return false;
    }
    let Ok(spki_der) = spki.to_der() else { return false };
    let Ok(public_key) = RsaPublicKey::from_public_key_der(&spki_der) else {
        return false;
    };
    let Ok(signature) = rsa::pkcs1v15::Signature::try_from(signature_bytes) else {
        return false;
    };
    rsa::pkcs1v15::VerifyingKey::<Sha256>::new(public_key)
        .verify(message, &signature)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::subject::SubjectInfo;
    use crate::provider::LocalSigner;
    use rsa::RsaPrivateKey;
    use std::sync::OnceLock;

    fn fixture() -> &'static (RsaPrivateKey, Certificate) {
        static FIXTURE: OnceLock<(RsaPrivateKey, Certificate)> = OnceLock::new();
        FIXTURE.get_or_init(|| {
            let key = RsaPrivateKey::new(&mut rsa::rand_core::OsRng, 2048).unwrap();
            let subject = SubjectInfo::new("CMS TEST").unwrap();
            let cert = crate::ca::authority::self_signed_for_tests(&key, &subject).unwrap();
            (key, cert)
        })
    }

    #[test]
    fn test_sign_and_verify_detached() {
        let (key, cert) = fixture();
        let signer = LocalSigner::new(key.clone());
        let time = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let der = build_signed_data(b"covered bytes", time, cert, &[], &signer).unwrap();

        let mut padded = der.clone();
        padded.extend_from_slice(&[0u8; 64]);
        let parsed = ParsedSignature::parse(&padded).unwrap();

        assert_eq!(parsed.message_digest, sha256(b"covered bytes"));
        assert_eq!(parsed.signing_time, Some(time));
        assert_eq!(&parsed.signer_certificate, cert);
        assert!(parsed.verify(b"covered bytes").unwrap());
        assert!(!parsed.verify(b"covered bytez").unwrap());
    }

    #[test]
    fn test_garbage_contents_is_malformed() {
        assert!(matches!(
            ParsedSignature::parse(&[0u8; 32]),
            Err(Error::MalformedDocument(_))
        ));
    }

    #[test]
    fn test_wrong_key_fails_rsa_check() {
        let (_, cert) = fixture();
        let other = RsaPrivateKey::new(&mut rsa::rand_core::OsRng, 2048).unwrap();
        let signer = LocalSigner::new(other);
        let time = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let der = build_signed_data(b"data", time, cert, &[], &signer).unwrap();
        let parsed = ParsedSignature::parse(&der).unwrap();
        assert!(!parsed.verify(b"data").unwrap());
    }
}
