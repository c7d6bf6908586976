//! Revision-aware PDF document model.
//!
//! A signed PDF is a stack of incremental revisions. [`PdfDocument`] keeps the
//! raw bytes and one [`Revision`] per cross-reference section so that any
//! object can be read as it stood at a given revision, which is what byte
//! range coverage and modification analysis are built on.

use crate::error::{Error, Result};
use crate::object::{Dict, Object, ObjectRef};
use crate::objstm::parse_object_stream;
use crate::parser::parse_indirect_object;
use crate::xref::{find_from, read_chain, XRefEntry, XRefSection};
use bytes::Bytes;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Maximum recursion depth for reference resolution and tree walks.
const MAX_RECURSION_DEPTH: u32 = 100;

/// One incremental revision of the file.
#[derive(Debug, Clone)]
pub struct Revision {
    /// Zero-based position in the revision chain (0 = original document).
    pub index: usize,
    /// Offset of this revision's cross-reference section.
    pub xref_offset: usize,
    /// Offset just past this revision's `%%EOF` line.
    pub end_offset: usize,
    /// The section itself.
    pub section: XRefSection,
}

/// A signature form field whose value is a signature dictionary.
#[derive(Debug, Clone)]
pub struct SignatureField {
    /// Fully qualified field name (`/T` values joined by `.`).
    pub name: String,
    /// The field (or merged field/widget) object.
    pub field_ref: ObjectRef,
    /// The signature dictionary, when stored indirectly.
    pub sig_ref: Option<ObjectRef>,
    /// The resolved signature dictionary.
    pub sig: Dict,
}

impl SignatureField {
    /// `/ByteRange` as four offsets, if well-formed.
    pub fn byte_range(&self) -> Option<[i64; 4]> {
        let arr = self.sig.get("ByteRange").and_then(Object::as_array)?;
        let values: Vec<i64> = arr.iter().filter_map(Object::as_integer).collect();
        <[i64; 4]>::try_from(values).ok()
    }
}

/// PDF document opened from memory.
///
/// ```no_run
/// use pdf_certsign::document::PdfDocument;
///
/// let doc = PdfDocument::open("signed.pdf")?;
/// println!("{} revision(s), {} page(s)", doc.revisions().len(), doc.page_count()?);
/// # Ok::<(), pdf_certsign::Error>(())
/// ```
pub struct PdfDocument {
    data: Bytes,
    version: (u8, u8),
    revisions: Vec<Revision>,
    /// Decoded object streams keyed by the stream's file offset.
    objstm_cache: RefCell<HashMap<usize, HashMap<u32, Object>>>,
}

impl std::fmt::Debug for PdfDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfDocument")
            .field("len", &self.data.len())
            .field("version", &self.version)
            .field("revisions", &self.revisions.len())
            .finish()
    }
}

impl PdfDocument {
    /// Read a document from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::from_bytes(data)
    }

    /// Parse a document held in memory.
    pub fn from_bytes(data: impl Into<Bytes>) -> Result<Self> {
        let data: Bytes = data.into();
        let version = parse_header(&data)?;
        let sections = read_chain(&data)?;

        let mut revisions = Vec::with_capacity(sections.len());
        for (index, section) in sections.into_iter().enumerate() {
            let end_offset = revision_end(&data, section.offset)?;
            revisions.push(Revision {
                index,
                xref_offset: section.offset,
                end_offset,
                section,
            });
        }
        log::debug!(
            "opened PDF {}.{} ({} bytes, {} revision(s))",
            version.0,
            version.1,
            data.len(),
            revisions.len()
        );

        Ok(Self {
            data,
            version,
            revisions,
            objstm_cache: RefCell::new(HashMap::new()),
        })
    }

    /// Raw file bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Header version `(major, minor)`.
    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    /// All revisions, oldest first.
    pub fn revisions(&self) -> &[Revision] {
        &self.revisions
    }

    /// Index of the newest revision.
    pub fn latest_revision(&self) -> usize {
        self.revisions.len().saturating_sub(1)
    }

    /// The revision whose bytes contain `offset`.
    pub fn revision_containing(&self, offset: usize) -> Option<usize> {
        self.revisions.iter().position(|r| offset < r.end_offset)
    }

    /// The revision whose bytes end exactly at `end`.
    pub fn revision_ending_at(&self, end: usize) -> Option<usize> {
        self.revisions.iter().position(|r| r.end_offset == end)
    }

    /// Trailer of the newest revision.
    pub fn trailer(&self) -> &Dict {
        self.trailer_at(self.latest_revision())
    }

    /// Trailer as of `rev`.
    pub fn trailer_at(&self, rev: usize) -> &Dict {
        &self.revisions[rev.min(self.latest_revision())].section.trailer
    }

    /// Next unused object number (`/Size` of the newest trailer).
    pub fn next_object_id(&self) -> u32 {
        let declared = self
            .trailer()
            .get("Size")
            .and_then(Object::as_integer)
            .unwrap_or(0)
            .max(0) as u32;
        let highest = self
            .revisions
            .iter()
            .filter_map(|r| r.section.entries.keys().next_back())
            .max()
            .map_or(0, |id| id + 1);
        declared.max(highest)
    }

    /// Look up the cross-reference entry of `id` visible at `rev`.
    pub fn entry_at(&self, id: u32, rev: usize) -> Option<XRefEntry> {
        self.revisions[..=rev.min(self.latest_revision())]
            .iter()
            .rev()
            .find_map(|r| r.section.entries.get(&id).copied())
    }

    /// Load object `id` as it stood at revision `rev`.
    pub fn object_at(&self, id: u32, rev: usize) -> Result<Object> {
        match self.entry_at(id, rev) {
            None | Some(XRefEntry::Free) => Err(Error::ObjectNotFound(id, 0)),
            Some(XRefEntry::InUse { offset, gen }) => {
                let (found, obj) = parse_indirect_object(&self.data, offset)?;
                if found.id != id {
                    return Err(Error::malformed(format!(
                        "xref entry for object {} points at object {} (offset {})",
                        id, found.id, offset
                    )));
                }
                if found.gen != gen {
                    log::debug!("object {} generation {} differs from xref {}", id, found.gen, gen);
                }
                Ok(obj)
            },
            Some(XRefEntry::Compressed { stream_id, .. }) => self.compressed_object(id, stream_id, rev),
        }
    }

    fn compressed_object(&self, id: u32, stream_id: u32, rev: usize) -> Result<Object> {
        let Some(XRefEntry::InUse { offset, .. }) = self.entry_at(stream_id, rev) else {
            return Err(Error::malformed(format!(
                "object stream {} holding object {} is not a direct object",
                stream_id, id
            )));
        };
        if let Some(obj) = self.objstm_cache.borrow().get(&offset).and_then(|m| m.get(&id)) {
            return Ok(obj.clone());
        }
        let (_, stream) = parse_indirect_object(&self.data, offset)?;
        let objects = parse_object_stream(&stream)?;
        let found = objects.get(&id).cloned();
        self.objstm_cache.borrow_mut().insert(offset, objects);
        found.ok_or(Error::ObjectNotFound(id, 0))
    }

    /// Load object `id` from the newest revision.
    pub fn object(&self, id: u32) -> Result<Object> {
        self.object_at(id, self.latest_revision())
    }

    /// Follow references until a direct object is reached.
    pub fn resolve_at(&self, obj: &Object, rev: usize) -> Result<Object> {
        let mut current = obj.clone();
        for _ in 0..MAX_RECURSION_DEPTH {
            match current {
                Object::Reference(r) => current = self.object_at(r.id, rev)?,
                other => return Ok(other),
            }
        }
        Err(Error::malformed("reference chain too deep"))
    }

    /// [`resolve_at`](Self::resolve_at) against the newest revision.
    pub fn resolve(&self, obj: &Object) -> Result<Object> {
        self.resolve_at(obj, self.latest_revision())
    }

    /// `/Root` reference of the newest trailer.
    pub fn catalog_ref(&self) -> Result<ObjectRef> {
        self.catalog_ref_at(self.latest_revision())
    }

    /// `/Root` reference as of `rev`.
    pub fn catalog_ref_at(&self, rev: usize) -> Result<ObjectRef> {
        self.trailer_at(rev)
            .get("Root")
            .and_then(Object::as_reference)
            .ok_or_else(|| Error::malformed("trailer has no indirect /Root"))
    }

    /// Document catalog as of `rev`.
    pub fn catalog_at(&self, rev: usize) -> Result<Dict> {
        let obj = self.object_at(self.catalog_ref_at(rev)?.id, rev)?;
        match obj {
            Object::Dictionary(d) => Ok(d),
            other => Err(Error::malformed(format!("catalog is a {}", other.type_name()))),
        }
    }

    /// Newest document catalog.
    pub fn catalog(&self) -> Result<Dict> {
        self.catalog_at(self.latest_revision())
    }

    /// Page object references in document order, as of `rev`.
    pub fn page_refs_at(&self, rev: usize) -> Result<Vec<ObjectRef>> {
        let catalog = self.catalog_at(rev)?;
        let root = catalog
            .get("Pages")
            .and_then(Object::as_reference)
            .ok_or_else(|| Error::malformed("catalog has no /Pages reference"))?;

        let mut pages = Vec::new();
        let mut visited = HashSet::new();
        self.collect_pages(root, rev, &mut pages, &mut visited, 0)?;

        let declared = self
            .object_at(root.id, rev)?
            .get("Count")
            .and_then(Object::as_integer);
        if declared != Some(pages.len() as i64) {
            log::warn!("page tree /Count {:?} but {} page(s) found walking /Kids", declared, pages.len());
        }
        Ok(pages)
    }

    fn collect_pages(
        &self,
        node: ObjectRef,
        rev: usize,
        pages: &mut Vec<ObjectRef>,
        visited: &mut HashSet<ObjectRef>,
        depth: u32,
    ) -> Result<()> {
        if depth > MAX_RECURSION_DEPTH || !visited.insert(node) {
            return Err(Error::malformed(format!("cycle or excessive depth in page tree at {}", node)));
        }
        let obj = self.object_at(node.id, rev)?;
        match obj.dict_type() {
            Some("Page") => pages.push(node),
            _ => {
                let kids = obj
                    .get("Kids")
                    .map(|k| self.resolve_at(k, rev))
                    .transpose()?
                    .unwrap_or(Object::Array(Vec::new()));
                for kid in kids.as_array().into_iter().flatten() {
                    if let Some(kid) = kid.as_reference() {
                        self.collect_pages(kid, rev, pages, visited, depth + 1)?;
                    }
                }
            },
        }
        Ok(())
    }

    /// Newest page list.
    pub fn page_refs(&self) -> Result<Vec<ObjectRef>> {
        self.page_refs_at(self.latest_revision())
    }

    /// Number of pages in the newest revision.
    pub fn page_count(&self) -> Result<usize> {
        Ok(self.page_refs()?.len())
    }

    /// Signature fields carrying a value, in the order the form lists them.
    pub fn signature_fields(&self) -> Result<Vec<SignatureField>> {
        self.signature_fields_at(self.latest_revision())
    }

    /// Signature fields as of revision `rev`.
    pub fn signature_fields_at(&self, rev: usize) -> Result<Vec<SignatureField>> {
        let catalog = self.catalog_at(rev)?;
        let Some(acroform) = catalog.get("AcroForm") else {
            return Ok(Vec::new());
        };
        let acroform = self.resolve_at(acroform, rev)?;
        let fields = match acroform.get("Fields") {
            Some(f) => self.resolve_at(f, rev)?,
            None => return Ok(Vec::new()),
        };

        let mut out = Vec::new();
        let mut visited = HashSet::new();
        for field in fields.as_array().into_iter().flatten() {
            if let Some(r) = field.as_reference() {
                self.collect_signature_fields(r, "", None, rev, &mut out, &mut visited, 0)?;
            }
        }
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    fn collect_signature_fields(
        &self,
        field_ref: ObjectRef,
        parent_name: &str,
        inherited_ft: Option<&str>,
        rev: usize,
        out: &mut Vec<SignatureField>,
        visited: &mut HashSet<ObjectRef>,
        depth: u32,
    ) -> Result<()> {
        if depth > MAX_RECURSION_DEPTH || !visited.insert(field_ref) {
            return Ok(());
        }
        let field = self.object_at(field_ref.id, rev)?;
        let partial = field
            .get("T")
            .and_then(Object::as_string)
            .map(|t| String::from_utf8_lossy(t).into_owned());
        let name = match (parent_name.is_empty(), partial) {
            (_, None) => parent_name.to_string(),
            (true, Some(t)) => t,
            (false, Some(t)) => format!("{}.{}", parent_name, t),
        };
        let ft = field.get("FT").and_then(Object::as_name).or(inherited_ft);

        if ft == Some("Sig") {
            if let Some(value) = field.get("V") {
                let sig_ref = value.as_reference();
                if let Object::Dictionary(sig) = self.resolve_at(value, rev)? {
                    if sig.contains_key("ByteRange") {
                        out.push(SignatureField {
                            name: name.clone(),
                            field_ref,
                            sig_ref,
                            sig,
                        });
                    }
                }
            }
        }

        let ft = ft.map(str::to_string);
        if let Some(kids) = field.get("Kids").and_then(Object::as_array) {
            for kid in kids.iter().filter_map(Object::as_reference) {
                self.collect_signature_fields(kid, &name, ft.as_deref(), rev, out, visited, depth + 1)?;
            }
        }
        Ok(())
    }
}

fn parse_header(data: &[u8]) -> Result<(u8, u8)> {
    let window = &data[..data.len().min(1024)];
    let pos = find_from(window, b"%PDF-", 0).ok_or_else(|| Error::malformed("missing %PDF- header"))?;
    let digits = &window[pos + 5..];
    let major = digits.first().filter(|c| c.is_ascii_digit()).map(|c| c - b'0');
    let minor = digits.get(2).filter(|c| c.is_ascii_digit()).map(|c| c - b'0');
    match (major, minor) {
        (Some(major), Some(minor)) => Ok((major, minor)),
        _ => Err(Error::malformed("unreadable PDF version in header")),
    }
}

/// Offset just past the `%%EOF` line that closes the section at `offset`.
fn revision_end(data: &[u8], offset: usize) -> Result<usize> {
    let eof = find_from(data, b"%%EOF", offset)
        .ok_or_else(|| Error::malformed(format!("no %%EOF after xref section at {}", offset)))?;
    let mut end = eof + b"%%EOF".len();
    if data.get(end) == Some(&b'\r') {
        end += 1;
    }
    if data.get(end) == Some(&b'\n') {
        end += 1;
    }
    Ok(end)
}
