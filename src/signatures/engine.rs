//! Incremental signing.
//!
//! [`append_signature`] adds one signature revision to a PDF. It does not
//! care what came before, which is what lets tests build badly ordered
//! documents. [`SigningEngine`] drives it through the only supported order:
//! one certifying signature, then one approval per page.

use super::appearance::{self, SignatureAppearance};
use super::byterange::{ByteRangeCalculator, BYTE_RANGE_WIDTH};
use super::certinfo::CertificateInfo;
use super::cms::{build_signed_data, verify_rsa_sha256};
use super::types::{
    approval_field_name, ApprovalSignatureSpec, CertifyingSignatureSpec, DocumentPermissionLevel, FailurePolicy,
    PageFailure, PartialSigning, SignaturePlan, CERTIFICATION_FIELD, SIGNATURE_FILTER, SIGNATURE_SUB_FILTER,
};
use crate::config::{AppearanceConfig, SigningConfig};
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::keystore::write_atomic;
use crate::object::{Dict, Object, ObjectRef};
use crate::provider::{KeyProvider, SigningIdentity};
use crate::writer::incremental::IncrementalUpdate;
use crate::writer::object_serializer::ObjectSerializer;
use crate::writer::pdf_writer::helvetica_font;
use crate::xref::find_from;
use chrono::{DateTime, FixedOffset, Utc};
use std::path::Path;

/// `/SigFlags`: SignaturesExist | AppendOnly.
const SIG_FLAGS: i64 = 3;
/// Annotation flags of the invisible certification widget: Hidden | Locked.
const HIDDEN_WIDGET_FLAGS: i64 = 132;
/// Annotation flags of a visible widget: Print.
const PRINT_WIDGET_FLAGS: i64 = 4;

/// PDF date string, e.g. `D:20240307090500+05'30'`.
pub fn pdf_date(at: &DateTime<FixedOffset>) -> String {
    let seconds = at.offset().local_minus_utc();
    let sign = if seconds < 0 { '-' } else { '+' };
    let minutes = seconds.abs() / 60;
    format!(
        "{}{}{:02}'{:02}'",
        at.format("D:%Y%m%d%H%M%S"),
        sign,
        minutes / 60,
        minutes % 60
    )
}

/// Settings for one appended signature.
#[derive(Debug, Clone)]
pub struct AppendOptions {
    /// Bytes reserved for the DER signature
    pub contents_reserve: usize,
    /// Appearance layout of approval widgets
    pub layout: AppearanceConfig,
}

impl Default for AppendOptions {
    fn default() -> Self {
        Self {
            contents_reserve: 8192,
            layout: AppearanceConfig::default(),
        }
    }
}

/// Append one signature revision to `pdf`.
///
/// The new revision holds the signature dictionary, its field/widget, the
/// updated AcroForm, page and (when certifying) catalog. The ByteRange covers
/// the whole output except the `/Contents` value.
pub fn append_signature(
    pdf: &[u8],
    plan: &SignaturePlan,
    identity: &SigningIdentity,
    signing_time: &DateTime<FixedOffset>,
    options: &AppendOptions,
) -> Result<Vec<u8>> {
    let doc = PdfDocument::from_bytes(pdf.to_vec())?;
    let rev = doc.latest_revision();

    if doc.signature_fields()?.iter().any(|f| f.name == plan.field_name()) {
        return Err(Error::Signing(format!("signature field {} already exists", plan.field_name())));
    }
    let pages = doc.page_refs_at(rev)?;
    let page_index = match plan {
        SignaturePlan::Certify(_) => 0,
        SignaturePlan::Approve(spec) => spec.page_index(),
    };
    let page_ref = *pages.get(page_index).ok_or_else(|| {
        Error::Signing(format!(
            "page {} out of range ({} page(s))",
            page_index + 1,
            pages.len()
        ))
    })?;

    let signer = CertificateInfo::from_certificate(&identity.certificate)?;
    let calc = ByteRangeCalculator::new(options.contents_reserve);
    let serializer = ObjectSerializer::compact();
    let mut update = IncrementalUpdate::new(&doc)?;
    let sig_ref = update.allocate();
    let field_ref = update.allocate();

    // Signature dictionary, written by hand so the placeholders sit at known offsets.
    let mut extra = vec![
        ("M", ObjectSerializer::string(&pdf_date(signing_time))),
        ("Name", ObjectSerializer::string(&signer.common_name)),
    ];
    let (reason, location) = match plan {
        SignaturePlan::Certify(spec) => (spec.reason(), spec.location()),
        SignaturePlan::Approve(spec) => (spec.reason(), spec.location()),
    };
    extra.push(("Reason", ObjectSerializer::string(reason)));
    extra.push(("Location", ObjectSerializer::string(location)));
    if let SignaturePlan::Certify(spec) = plan {
        extra.push(("Reference", docmdp_reference(spec.permission())?));
    }
    let mut sig_body = format!(
        "<< /Type /Sig /Filter /{} /SubFilter /{} /ByteRange {} /Contents {}",
        SIGNATURE_FILTER,
        SIGNATURE_SUB_FILTER,
        ByteRangeCalculator::byte_range_placeholder(),
        calc.generate_placeholder()
    )
    .into_bytes();
    for (key, value) in &extra {
        sig_body.extend_from_slice(format!(" /{} ", key).as_bytes());
        sig_body.extend_from_slice(&serializer.serialize(value));
    }
    sig_body.extend_from_slice(b" >>");
    update.put_raw(sig_ref, sig_body);

    // Merged field and widget annotation.
    let mut field = ObjectSerializer::dict_map(vec![
        ("Type", ObjectSerializer::name("Annot")),
        ("Subtype", ObjectSerializer::name("Widget")),
        ("FT", ObjectSerializer::name("Sig")),
        ("T", ObjectSerializer::string(plan.field_name())),
        ("V", ObjectSerializer::reference(sig_ref)),
        ("P", ObjectSerializer::reference(page_ref)),
    ]);
    match plan {
        SignaturePlan::Certify(_) => {
            field.insert("Rect".into(), ObjectSerializer::rect(0.0, 0.0, 0.0, 0.0));
            field.insert("F".into(), ObjectSerializer::integer(HIDDEN_WIDGET_FLAGS));
        },
        SignaturePlan::Approve(spec) => {
            let r = spec.rect();
            let appearance: SignatureAppearance = appearance::build_with_layout(
                &signer.common_name,
                signing_time,
                spec.location(),
                r,
                &options.layout,
            );
            let ap_ref = update.allocate();
            update.put(ap_ref, &appearance.to_xobject(helvetica_font()));
            field.insert("Rect".into(), ObjectSerializer::rect(r.llx, r.lly, r.urx, r.ury));
            field.insert("F".into(), ObjectSerializer::integer(PRINT_WIDGET_FLAGS));
            field.insert(
                "AP".into(),
                ObjectSerializer::dict(vec![("N", ObjectSerializer::reference(ap_ref))]),
            );
        },
    }
    update.put(field_ref, &Object::Dictionary(field));

    // Page /Annots gains the widget.
    add_annotation(&doc, rev, &mut update, page_ref, field_ref)?;

    // AcroForm /Fields gains the field; the catalog changes when the form is
    // new or direct, or when certifying.
    let catalog_ref = doc.catalog_ref_at(rev)?;
    let mut catalog = doc.catalog_at(rev)?;
    let mut catalog_changed = add_form_field(&doc, rev, &mut update, &mut catalog, field_ref)?;
    if matches!(plan, SignaturePlan::Certify(_)) {
        catalog.insert(
            "Perms".into(),
            ObjectSerializer::dict(vec![("DocMDP", ObjectSerializer::reference(sig_ref))]),
        );
        catalog_changed = true;
    }
    if catalog_changed {
        update.put(catalog_ref, &Object::Dictionary(catalog));
    }

    let appended = update.write(pdf)?;
    let mut bytes = appended.bytes;
    let sig_offset = *appended
        .offsets
        .get(&sig_ref.id)
        .ok_or_else(|| Error::Signing("signature dictionary missing from update".to_string()))?;

    let byte_range_offset = find_from(&bytes, b"/ByteRange ", sig_offset)
        .map(|p| p + b"/ByteRange ".len())
        .ok_or_else(|| Error::Signing("ByteRange placeholder not found".to_string()))?;
    let contents_offset = ByteRangeCalculator::find_contents_offset(&bytes, byte_range_offset + BYTE_RANGE_WIDTH)
        .ok_or_else(|| Error::Signing("Contents placeholder not found".to_string()))?;

    let byte_range = calc.calculate_byte_range(bytes.len(), contents_offset);
    ByteRangeCalculator::patch_byte_range(&mut bytes, byte_range_offset, &byte_range)?;
    log::debug!(
        "{}: ByteRange {} (contents at {})",
        plan.field_name(),
        ByteRangeCalculator::format_byte_range(&byte_range),
        contents_offset
    );

    let signed = ByteRangeCalculator::extract_signed_bytes(&bytes, &byte_range)?;
    let cms = build_signed_data(
        &signed,
        signing_time.with_timezone(&Utc),
        &identity.certificate,
        &identity.chain,
        identity.signer.as_ref(),
    )?;
    calc.insert_signature(&mut bytes, contents_offset, &cms)?;
    Ok(bytes)
}

fn docmdp_reference(permission: DocumentPermissionLevel) -> Result<Object> {
    let p = permission
        .docmdp_p()
        .ok_or_else(|| Error::InvalidSpec("certification needs a DocMDP permission level".to_string()))?;
    let params = ObjectSerializer::dict(vec![
        ("Type", ObjectSerializer::name("TransformParams")),
        ("P", ObjectSerializer::integer(p)),
        ("V", ObjectSerializer::name("1.2")),
    ]);
    let sigref = ObjectSerializer::dict(vec![
        ("Type", ObjectSerializer::name("SigRef")),
        ("TransformMethod", ObjectSerializer::name("DocMDP")),
        ("TransformParams", params),
    ]);
    Ok(ObjectSerializer::array(vec![sigref]))
}

fn add_annotation(
    doc: &PdfDocument,
    rev: usize,
    update: &mut IncrementalUpdate,
    page_ref: ObjectRef,
    widget: ObjectRef,
) -> Result<()> {
    let Object::Dictionary(mut page) = doc.object_at(page_ref.id, rev)? else {
        return Err(Error::malformed(format!("page {} is not a dictionary", page_ref)));
    };
    match page.get("Annots").cloned() {
        Some(Object::Reference(array_ref)) => {
            let mut annots = expect_array(doc.object_at(array_ref.id, rev)?, "page /Annots")?;
            annots.push(Object::Reference(widget));
            update.put(array_ref, &Object::Array(annots));
        },
        Some(Object::Array(mut annots)) => {
            annots.push(Object::Reference(widget));
            page.insert("Annots".into(), Object::Array(annots));
            update.put(page_ref, &Object::Dictionary(page));
        },
        _ => {
            page.insert("Annots".into(), Object::Array(vec![Object::Reference(widget)]));
            update.put(page_ref, &Object::Dictionary(page));
        },
    }
    Ok(())
}

/// Returns whether the catalog itself was modified.
fn add_form_field(
    doc: &PdfDocument,
    rev: usize,
    update: &mut IncrementalUpdate,
    catalog: &mut Dict,
    field: ObjectRef,
) -> Result<bool> {
    match catalog.get("AcroForm").cloned() {
        Some(Object::Reference(form_ref)) => {
            let Object::Dictionary(mut form) = doc.object_at(form_ref.id, rev)? else {
                return Err(Error::malformed("AcroForm is not a dictionary"));
            };
            append_field(doc, rev, update, &mut form, field)?;
            update.put(form_ref, &Object::Dictionary(form));
            Ok(false)
        },
        Some(Object::Dictionary(mut form)) => {
            append_field(doc, rev, update, &mut form, field)?;
            catalog.insert("AcroForm".into(), Object::Dictionary(form));
            Ok(true)
        },
        _ => {
            let form_ref = update.allocate();
            let form = ObjectSerializer::dict(vec![
                ("Fields", ObjectSerializer::array(vec![Object::Reference(field)])),
                ("SigFlags", ObjectSerializer::integer(SIG_FLAGS)),
            ]);
            update.put(form_ref, &form);
            catalog.insert("AcroForm".into(), Object::Reference(form_ref));
            Ok(true)
        },
    }
}

fn append_field(
    doc: &PdfDocument,
    rev: usize,
    update: &mut IncrementalUpdate,
    form: &mut Dict,
    field: ObjectRef,
) -> Result<()> {
    form.insert("SigFlags".into(), ObjectSerializer::integer(SIG_FLAGS));
    match form.get("Fields").cloned() {
        Some(Object::Reference(array_ref)) => {
            let mut fields = expect_array(doc.object_at(array_ref.id, rev)?, "AcroForm /Fields")?;
            fields.push(Object::Reference(field));
            update.put(array_ref, &Object::Array(fields));
        },
        Some(Object::Array(mut fields)) => {
            fields.push(Object::Reference(field));
            form.insert("Fields".into(), Object::Array(fields));
        },
        _ => {
            form.insert("Fields".into(), Object::Array(vec![Object::Reference(field)]));
        },
    }
    Ok(())
}

fn expect_array(obj: Object, what: &str) -> Result<Vec<Object>> {
    match obj {
        Object::Array(items) => Ok(items),
        other => Err(Error::malformed(format!("{} is a {}", what, other.type_name()))),
    }
}

/// Progress of the signing protocol for one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningState {
    /// Nothing applied yet.
    Unsigned,
    /// Certifying signature applied.
    Certified,
    /// Certified plus `k` approvals.
    ApprovalSigned(usize),
    /// Certified and every page approved.
    AllPagesApproved,
}

impl SigningState {
    /// State after the certifying signature.
    fn after_certification(self) -> Result<Self> {
        match self {
            SigningState::Unsigned => Ok(SigningState::Certified),
            other => Err(Error::Signing(format!("cannot certify in state {:?}", other))),
        }
    }

    /// State after one more successful approval.
    fn after_approval(self, page_count: usize) -> Result<Self> {
        let done = match self {
            SigningState::Certified => 1,
            SigningState::ApprovalSigned(k) => k + 1,
            other => {
                return Err(Error::Signing(format!("cannot apply an approval in state {:?}", other)));
            },
        };
        Ok(if done == page_count {
            SigningState::AllPagesApproved
        } else {
            SigningState::ApprovalSigned(done)
        })
    }
}

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Certifies a document and approves every page.
///
/// ```no_run
/// use pdf_certsign::config::SigningConfig;
/// use pdf_certsign::provider::LocalKeyProvider;
/// use pdf_certsign::signatures::SigningEngine;
/// use secrecy::SecretString;
///
/// let provider = LocalKeyProvider::from_file("leaf_2.bundle", &SecretString::from("pass".to_string()))?;
/// let engine = SigningEngine::new(provider, SigningConfig::default());
/// let signed = engine.sign(&std::fs::read("input.pdf")?)?;
/// std::fs::write("signed.pdf", signed)?;
/// # Ok::<(), pdf_certsign::Error>(())
/// ```
pub struct SigningEngine<P: KeyProvider> {
    provider: P,
    config: SigningConfig,
    policy: FailurePolicy,
    clock: Clock,
}

impl<P: KeyProvider> SigningEngine<P> {
    /// Engine using `provider` for every signature.
    pub fn new(provider: P, config: SigningConfig) -> Self {
        Self {
            provider,
            config,
            policy: FailurePolicy::default(),
            clock: Box::new(Utc::now),
        }
    }

    /// What to do when an approval fails.
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the wall clock.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    fn offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.config.signing.utc_offset_minutes * 60).ok_or_else(|| {
            Error::Config(format!(
                "UTC offset {} minutes is out of range",
                self.config.signing.utc_offset_minutes
            ))
        })
    }

    fn now(&self) -> Result<DateTime<FixedOffset>> {
        Ok((self.clock)().with_timezone(&self.offset()?))
    }

    fn options(&self) -> AppendOptions {
        AppendOptions {
            contents_reserve: self.config.signing.contents_reserve,
            layout: self.config.appearance.clone(),
        }
    }

    /// Certify `pdf` and approve each page.
    pub fn sign(&self, pdf: &[u8]) -> Result<Vec<u8>> {
        let doc = PdfDocument::from_bytes(pdf.to_vec())?;
        reject_certified(&doc)?;
        let page_count = doc.page_count()?;
        if page_count == 0 {
            return Err(Error::malformed("document has no pages"));
        }

        let certify = CertifyingSignatureSpec::new(
            CERTIFICATION_FIELD,
            DocumentPermissionLevel::NoChangesAllowed,
            self.config.signing.certification_reason.as_str(),
            self.config.signing.location.as_str(),
        )?;
        let rect = self.config.appearance.signature_rect()?;
        let approvals = (0..page_count)
            .map(|page| {
                ApprovalSignatureSpec::new(
                    approval_field_name(page + 1),
                    page,
                    rect,
                    self.config.signing.approval_reason.as_str(),
                    self.config.signing.location.as_str(),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let identity = self.provider.signing_identity()?;
        preflight(&identity, (self.clock)())?;
        let options = self.options();

        let certified = append_signature(pdf, &SignaturePlan::Certify(certify), &identity, &self.now()?, &options)?;
        let mut state = SigningState::Unsigned.after_certification()?;
        log::info!("certified document ({} bytes)", certified.len());

        let mut current = certified.clone();
        let mut completed_pages = Vec::new();
        let mut failed_pages = Vec::new();
        for spec in approvals {
            let page_index = spec.page_index();
            match append_signature(&current, &SignaturePlan::Approve(spec), &identity, &self.now()?, &options) {
                Ok(next) => {
                    current = next;
                    completed_pages.push(page_index);
                    state = state.after_approval(page_count)?;
                    log::debug!("approved page {} ({:?})", page_index + 1, state);
                },
                Err(e) if self.policy == FailurePolicy::AbortAll => return Err(e),
                Err(e) => {
                    log::warn!("approval of page {} failed: {}", page_index + 1, e);
                    failed_pages.push(PageFailure {
                        page_index,
                        reason: e.to_string(),
                    });
                },
            }
        }

        if !failed_pages.is_empty() {
            return Err(Error::PartialSigning(Box::new(PartialSigning {
                certified,
                partially_approved: current,
                completed_pages,
                failed_pages,
            })));
        }
        log::info!("signed {} page(s), {:?}, {} bytes", page_count, state, current.len());
        Ok(current)
    }

    /// Sign `input` and write the result atomically to `output`.
    pub fn sign_file(&self, input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<()> {
        let data = std::fs::read(input.as_ref())?;
        let signed = self.sign(&data)?;
        write_atomic(output.as_ref(), &signed)
    }
}

/// Error if `doc` already carries a certifying signature.
fn reject_certified(doc: &PdfDocument) -> Result<()> {
    if let Some(field) = doc.signature_fields()?.iter().find(|f| super::docmdp::is_certifying(&f.sig)) {
        return Err(Error::AlreadyCertified(field.name.clone()));
    }
    if doc.catalog()?.get("Perms").and_then(|p| p.get("DocMDP")).is_some() {
        return Err(Error::AlreadyCertified("catalog /Perms /DocMDP".to_string()));
    }
    Ok(())
}

/// Checks that must pass before any byte is written.
fn preflight(identity: &SigningIdentity, now: DateTime<Utc>) -> Result<()> {
    let info = CertificateInfo::from_certificate(&identity.certificate)?;
    if !info.is_valid_at(now) {
        return Err(Error::CertificateExpired(format!(
            "{} valid {} to {}",
            info.common_name, info.not_before, info.not_after
        )));
    }
    if let Some(issuer) = identity.chain.first() {
        if !super::verifier::issued_by(&identity.certificate, issuer) {
            return Err(Error::ChainOfTrust(format!(
                "{} is not signed by the first certificate of its chain",
                info.common_name
            )));
        }
    }
    let probe = b"pdf_certsign key probe";
    let signature = identity.signer.sign(probe)?;
    if !verify_rsa_sha256(&identity.certificate, probe, &signature) {
        return Err(Error::Crypto(format!(
            "signing key does not match the certificate of {}",
            info.common_name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_pdf_date() {
        let ist = FixedOffset::east_opt(330 * 60).unwrap();
        let at = ist.with_ymd_and_hms(2024, 3, 7, 9, 5, 0).unwrap();
        assert_eq!(pdf_date(&at), "D:20240307090500+05'30'");
        let west = FixedOffset::west_opt(5 * 3600).unwrap();
        assert_eq!(pdf_date(&west.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()), "D:20240101000000-05'00'");
    }

    #[test]
    fn test_state_transitions() {
        assert_eq!(SigningState::Certified.after_approval(3).unwrap(), SigningState::ApprovalSigned(1));
        assert_eq!(SigningState::ApprovalSigned(2).after_approval(3).unwrap(), SigningState::AllPagesApproved);
        assert_eq!(SigningState::Certified.after_approval(1).unwrap(), SigningState::AllPagesApproved);
        assert_eq!(SigningState::Unsigned.after_certification().unwrap(), SigningState::Certified);
        assert!(SigningState::Certified.after_certification().is_err());
        assert!(SigningState::Unsigned.after_approval(1).is_err());
        assert!(SigningState::AllPagesApproved.after_approval(1).is_err());
    }

    #[test]
    fn test_docmdp_reference_shape() {
        let reference = docmdp_reference(DocumentPermissionLevel::NoChangesAllowed).unwrap();
        let text = String::from_utf8(ObjectSerializer::compact().serialize(&reference)).unwrap();
        assert!(text.contains("/TransformMethod /DocMDP"));
        assert!(text.contains("/P 1"));
        assert!(text.contains("/V /1.2"));
        assert!(docmdp_reference(DocumentPermissionLevel::NoRestriction).is_err());
    }
}
