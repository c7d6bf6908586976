//! DocMDP modification analysis.
//!
//! Every revision after the certifying one is compared object by object with
//! the revision before it. Under `/P 1` a revision may only add one approval
//! signature with its widget, appearance and font, append to the page
//! `/Annots` and AcroForm `/Fields` arrays, and touch the AcroForm entries a
//! signature needs. A signature only counts when a new `/FT /Sig` field holds
//! it and its byte range ends exactly where the revision does. `/P 2`
//! additionally lets annotations and form fields change.

use super::types::DocumentPermissionLevel;
use crate::document::{PdfDocument, SignatureField};
use crate::error::{Error, Result};
use crate::object::{Dict, Object};
use crate::xref::XRefEntry;
use std::collections::HashSet;

/// AcroForm keys a signature revision may change.
const FORM_KEYS: &[&str] = &["Fields", "SigFlags", "DR"];

/// Whether `sig` carries a DocMDP transform reference.
pub fn is_certifying(sig: &Dict) -> bool {
    docmdp_params(sig).is_some()
}

/// Permission level of a certifying signature dictionary.
///
/// A DocMDP reference without `/P` means `/P 2`.
pub fn permission_of(sig: &Dict) -> Option<DocumentPermissionLevel> {
    let params = docmdp_params(sig)?;
    let p = params
        .and_then(|p| p.get("P"))
        .and_then(Object::as_integer)
        .unwrap_or(2);
    DocumentPermissionLevel::from_docmdp_p(p)
}

/// `Some(TransformParams)` when a DocMDP reference exists; the inner option is
/// `None` when the reference has no parameters.
fn docmdp_params(sig: &Dict) -> Option<Option<&Object>> {
    let references = sig.get("Reference")?.as_array()?;
    references.iter().find_map(|r| {
        (r.get("TransformMethod").and_then(Object::as_name) == Some("DocMDP")).then(|| r.get("TransformParams"))
    })
}

/// What an object is, as far as the rules care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Signature { certifying: bool },
    Widget,
    Annotation,
    Field,
    FormXObject,
    Font,
    Array,
    Catalog,
    AcroForm,
    Page,
    XRefStream,
    Other,
}

fn classify(obj: &Object, is_catalog: bool, is_form: bool) -> Kind {
    if is_catalog {
        return Kind::Catalog;
    }
    if is_form {
        return Kind::AcroForm;
    }
    let dict = match obj {
        Object::Array(_) => return Kind::Array,
        Object::Dictionary(d) => d,
        Object::Stream { dict, .. } => {
            return match (dict_name(dict, "Type"), dict_name(dict, "Subtype")) {
                (Some("XRef"), _) => Kind::XRefStream,
                (_, Some("Form")) => Kind::FormXObject,
                _ => Kind::Other,
            };
        },
        _ => return Kind::Other,
    };
    match dict_name(dict, "Type") {
        Some("Sig") => {
            return Kind::Signature {
                certifying: is_certifying(dict),
            }
        },
        Some("Font") => return Kind::Font,
        Some("Page") => return Kind::Page,
        Some("Catalog") => return Kind::Catalog,
        _ => {},
    }
    if dict.contains_key("ByteRange") && dict.contains_key("Contents") {
        return Kind::Signature {
            certifying: is_certifying(dict),
        };
    }
    match (dict_name(dict, "Subtype"), dict.contains_key("FT")) {
        (Some("Widget"), _) => Kind::Widget,
        (Some(_), false) if dict_name(dict, "Type") == Some("Annot") => Kind::Annotation,
        (_, true) => Kind::Field,
        _ if dict.contains_key("Fields") => Kind::AcroForm,
        _ => Kind::Other,
    }
}

fn dict_name<'a>(dict: &'a Dict, key: &str) -> Option<&'a str> {
    dict.get(key).and_then(Object::as_name)
}

/// `old` is a prefix of `new`.
fn appends_only(old: Option<&Object>, new: Option<&Object>) -> bool {
    match (old, new) {
        (None, None) => true,
        (None, Some(Object::Array(_))) => true,
        (Some(Object::Array(a)), Some(Object::Array(b))) => b.len() >= a.len() && b[..a.len()] == a[..],
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Every key outside `allowed` is unchanged.
fn same_except(old: &Dict, new: &Dict, allowed: &[&str]) -> bool {
    old.keys()
        .chain(new.keys())
        .filter(|k| !allowed.contains(&k.as_str()))
        .all(|k| old.get(k) == new.get(k))
}

fn as_dict(obj: &Object) -> Option<&Dict> {
    match obj {
        Object::Dictionary(d) => Some(d),
        Object::Stream { dict, .. } => Some(dict),
        _ => None,
    }
}

/// Why a revision broke the certification, if it did.
pub fn first_violation(
    doc: &PdfDocument,
    certified_revision: usize,
    level: DocumentPermissionLevel,
) -> Result<Option<String>> {
    if level == DocumentPermissionLevel::NoRestriction {
        return Ok(None);
    }
    let lenient = level == DocumentPermissionLevel::FormFillingAndCommentingOnly;

    for rev in certified_revision + 1..=doc.latest_revision() {
        if let Some(reason) = check_revision(doc, rev, lenient)? {
            log::debug!("revision {} violates DocMDP: {}", rev, reason);
            return Ok(Some(format!("revision {}: {}", rev, reason)));
        }
    }
    Ok(None)
}

/// Whether object `id` was in use as of revision `rev`.
fn in_use(doc: &PdfDocument, id: u32, rev: usize) -> bool {
    doc.entry_at(id, rev).is_some_and(|e| e != XRefEntry::Free)
}

/// Signature fields revision `rev` adds: a new `/FT /Sig` field whose new,
/// non-certifying signature dictionary covers the file from byte 0 up to
/// exactly the end of `rev`.
fn signatures_added(doc: &PdfDocument, rev: usize) -> Result<Vec<SignatureField>> {
    let revision = &doc.revisions()[rev];
    let end = revision.end_offset as i64;
    let is_new = |id: u32| revision.section.entries.contains_key(&id) && !in_use(doc, id, rev - 1);

    Ok(doc
        .signature_fields_at(rev)?
        .into_iter()
        .filter(|f| {
            is_new(f.field_ref.id)
                && f.sig_ref.is_some_and(|r| is_new(r.id))
                && !is_certifying(&f.sig)
                && f.byte_range().is_some_and(|br| br[0] == 0 && br[2] + br[3] == end)
        })
        .collect())
}

fn check_revision(doc: &PdfDocument, rev: usize, lenient: bool) -> Result<Option<String>> {
    let prev = rev - 1;
    let catalog_id = doc.catalog_ref_at(prev)?.id;
    if doc.catalog_ref_at(rev)?.id != catalog_id {
        return Ok(Some("catalog replaced".to_string()));
    }
    let form_id = doc
        .catalog_at(prev)?
        .get("AcroForm")
        .and_then(Object::as_reference)
        .map(|r| r.id);

    let added = signatures_added(doc, rev)?;
    let signed_fields: HashSet<u32> = added.iter().map(|f| f.field_ref.id).collect();
    let signature_dicts: HashSet<u32> = added.iter().filter_map(|f| f.sig_ref).map(|r| r.id).collect();

    let entries: Vec<(u32, XRefEntry)> = doc.revisions()[rev]
        .section
        .entries
        .iter()
        .map(|(id, e)| (*id, *e))
        .collect();

    for (id, entry) in entries {
        if id == 0 {
            continue;
        }
        if entry == XRefEntry::Free {
            if in_use(doc, id, prev) {
                return Ok(Some(format!("object {} deleted", id)));
            }
            continue;
        }
        let new = doc.object_at(id, rev)?;
        let old = match doc.object_at(id, prev) {
            Ok(obj) => Some(obj),
            Err(Error::ObjectNotFound(..)) => None,
            Err(e) => return Err(e),
        };
        if old.as_ref() == Some(&new) {
            continue;
        }
        let is_catalog = id == catalog_id;
        let is_form = form_id == Some(id);
        let kind = classify(&new, is_catalog, is_form);

        let allowed = match (&old, kind) {
            (_, Kind::XRefStream) => true,
            (None, Kind::Signature { certifying: false }) => signature_dicts.contains(&id),
            (_, Kind::Signature { .. }) => false,
            (None, Kind::Widget | Kind::Field) => signed_fields.contains(&id) || lenient,
            (None, Kind::FormXObject | Kind::Font | Kind::Array | Kind::AcroForm) => true,
            (None, Kind::Annotation | Kind::Other) => lenient,
            (None, Kind::Catalog | Kind::Page) => false,
            (Some(old), Kind::Catalog) => match (as_dict(old), as_dict(&new)) {
                (Some(o), Some(n)) => same_except(o, n, &["AcroForm"]),
                _ => false,
            },
            (Some(old), Kind::AcroForm) => match (as_dict(old), as_dict(&new)) {
                (Some(o), Some(n)) => same_except(o, n, FORM_KEYS) && appends_only(o.get("Fields"), n.get("Fields")),
                _ => false,
            },
            (Some(old), Kind::Page) => match (as_dict(old), as_dict(&new)) {
                (Some(o), Some(n)) => same_except(o, n, &["Annots"]) && appends_only(o.get("Annots"), n.get("Annots")),
                _ => false,
            },
            (Some(old), Kind::Array) => appends_only(Some(old), Some(&new)),
            (Some(_), Kind::Widget | Kind::Annotation | Kind::Field) => lenient,
            (Some(_), _) => false,
        };
        if !allowed {
            return Ok(Some(match old {
                None => format!("object {} added ({:?})", id, kind),
                Some(_) => format!("object {} changed ({:?})", id, kind),
            }));
        }
    }

    if !lenient && added.len() != 1 {
        return Ok(Some(format!("{} new signature(s), expected exactly one", added.len())));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::object_serializer::ObjectSerializer as S;

    fn sig(reference: Option<Object>) -> Dict {
        let mut d = S::dict_map(vec![("Type", S::name("Sig"))]);
        if let Some(r) = reference {
            d.insert("Reference".into(), r);
        }
        d
    }

    fn docmdp(p: Option<i64>) -> Object {
        let mut params = vec![("Type", S::name("TransformParams"))];
        if let Some(p) = p {
            params.push(("P", S::integer(p)));
        }
        S::array(vec![S::dict(vec![
            ("TransformMethod", S::name("DocMDP")),
            ("TransformParams", S::dict(params)),
        ])])
    }

    #[test]
    fn test_permission_of() {
        assert_eq!(permission_of(&sig(Some(docmdp(Some(1))))), Some(DocumentPermissionLevel::NoChangesAllowed));
        assert_eq!(
            permission_of(&sig(Some(docmdp(None)))),
            Some(DocumentPermissionLevel::FormFillingAndCommentingOnly)
        );
        assert_eq!(permission_of(&sig(None)), None);
        assert!(!is_certifying(&sig(None)));

        let fieldmdp = S::array(vec![S::dict(vec![("TransformMethod", S::name("FieldMDP"))])]);
        assert!(!is_certifying(&sig(Some(fieldmdp))));
    }

    #[test]
    fn test_appends_only() {
        let a = S::array(vec![S::integer(1)]);
        let ab = S::array(vec![S::integer(1), S::integer(2)]);
        let b = S::array(vec![S::integer(2)]);
        assert!(appends_only(Some(&a), Some(&ab)));
        assert!(!appends_only(Some(&ab), Some(&a)));
        assert!(!appends_only(Some(&a), Some(&b)));
        assert!(appends_only(None, Some(&a)));
        assert!(!appends_only(Some(&a), None));
    }

    #[test]
    fn test_classify() {
        let widget = S::dict(vec![("Type", S::name("Annot")), ("Subtype", S::name("Widget")), ("FT", S::name("Sig"))]);
        assert_eq!(classify(&widget, false, false), Kind::Widget);
        let note = S::dict(vec![("Type", S::name("Annot")), ("Subtype", S::name("Text"))]);
        assert_eq!(classify(&note, false, false), Kind::Annotation);
        let cert = Object::Dictionary(sig(Some(docmdp(Some(1)))));
        assert_eq!(classify(&cert, false, false), Kind::Signature { certifying: true });
        assert_eq!(classify(&S::array(vec![]), false, false), Kind::Array);
        assert_eq!(classify(&S::integer(3), true, false), Kind::Catalog);
    }

    #[test]
    fn test_same_except() {
        let old = S::dict_map(vec![("Type", S::name("Catalog")), ("Pages", S::integer(1))]);
        let mut new = old.clone();
        new.insert("AcroForm".into(), S::integer(9));
        assert!(same_except(&old, &new, &["AcroForm"]));
        new.insert("OpenAction".into(), S::integer(1));
        assert!(!same_except(&old, &new, &["AcroForm"]));
    }
}
