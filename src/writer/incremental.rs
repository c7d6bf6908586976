//! Incremental updates.
//!
//! An incremental update appends new or replaced objects, a cross-reference
//! table listing only those objects, and a trailer chaining back to the
//! previous section with `/Prev`. Bytes already in the file are never touched,
//! which is what keeps earlier signatures valid.

use super::object_serializer::ObjectSerializer;
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::{Object, ObjectRef};
use std::collections::BTreeMap;

/// Objects to append on top of an existing document.
#[derive(Debug)]
pub struct IncrementalUpdate {
    prev_xref: usize,
    root: ObjectRef,
    info: Option<ObjectRef>,
    id: Option<Object>,
    next_id: u32,
    bodies: BTreeMap<u32, Vec<u8>>,
    serializer: ObjectSerializer,
}

/// Result of [`IncrementalUpdate::write`].
#[derive(Debug)]
pub struct AppendedRevision {
    /// Complete file: base bytes followed by the new revision.
    pub bytes: Vec<u8>,
    /// Absolute offset of each appended object (`id gen obj`).
    pub offsets: BTreeMap<u32, usize>,
    /// Offset of the appended cross-reference table.
    pub xref_offset: usize,
}

impl IncrementalUpdate {
    /// Start an update on top of the newest revision of `doc`.
    pub fn new(doc: &PdfDocument) -> Result<Self> {
        let latest = doc
            .revisions()
            .last()
            .ok_or_else(|| Error::malformed("document has no cross-reference section"))?;
        let trailer = doc.trailer();
        Ok(Self {
            prev_xref: latest.xref_offset,
            root: doc.catalog_ref()?,
            info: trailer.get("Info").and_then(Object::as_reference),
            id: trailer.get("ID").cloned(),
            next_id: doc.next_object_id().max(1),
            bodies: BTreeMap::new(),
            serializer: ObjectSerializer::compact(),
        })
    }

    /// Reserve a fresh object number.
    pub fn allocate(&mut self) -> ObjectRef {
        let r = ObjectRef::new(self.next_id, 0);
        self.next_id += 1;
        r
    }

    /// Add or replace object `r`.
    pub fn put(&mut self, r: ObjectRef, obj: &Object) {
        let body = self.serializer.serialize(obj);
        self.bodies.insert(r.id, body);
    }

    /// Add or replace object `r` with pre-serialized bytes.
    pub fn put_raw(&mut self, r: ObjectRef, body: Vec<u8>) {
        self.bodies.insert(r.id, body);
    }

    /// Object numbers written by this update.
    pub fn object_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.bodies.keys().copied()
    }

    /// Append the update to `base`.
    pub fn write(self, base: &[u8]) -> Result<AppendedRevision> {
        if self.bodies.is_empty() {
            return Err(Error::Signing("incremental update with no objects".to_string()));
        }

        let mut out = Vec::with_capacity(base.len() + self.bodies.values().map(Vec::len).sum::<usize>() + 1024);
        out.extend_from_slice(base);
        if !matches!(base.last(), Some(b'\n') | Some(b'\r')) {
            out.push(b'\n');
        }

        let mut offsets = BTreeMap::new();
        for (id, body) in &self.bodies {
            offsets.insert(*id, out.len());
            out.extend_from_slice(&ObjectSerializer::wrap_indirect(*id, 0, body));
        }

        let xref_offset = out.len();
        out.extend_from_slice(b"xref\n");
        for run in contiguous_runs(&offsets) {
            out.extend_from_slice(format!("{} {}\n", run[0].0, run.len()).as_bytes());
            for (_, offset) in run {
                out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
            }
        }

        let size = self
            .next_id
            .max(offsets.keys().next_back().map_or(0, |id| id + 1));
        let mut trailer = vec![
            ("Size", ObjectSerializer::integer(size as i64)),
            ("Root", ObjectSerializer::reference(self.root)),
            ("Prev", ObjectSerializer::integer(self.prev_xref as i64)),
        ];
        if let Some(info) = self.info {
            trailer.push(("Info", ObjectSerializer::reference(info)));
        }
        if let Some(id) = self.id {
            trailer.push(("ID", id));
        }
        out.extend_from_slice(b"trailer\n");
        out.extend_from_slice(&self.serializer.serialize(&ObjectSerializer::dict(trailer)));
        out.extend_from_slice(format!("\nstartxref\n{}\n%%EOF\n", xref_offset).as_bytes());

        log::debug!(
            "appended revision: {} object(s), xref at {}, {} bytes total",
            offsets.len(),
            xref_offset,
            out.len()
        );
        Ok(AppendedRevision {
            bytes: out,
            offsets,
            xref_offset,
        })
    }
}

/// Split `(id, offset)` pairs into runs of consecutive object numbers.
fn contiguous_runs(offsets: &BTreeMap<u32, usize>) -> Vec<Vec<(u32, usize)>> {
    let mut runs: Vec<Vec<(u32, usize)>> = Vec::new();
    for (&id, &offset) in offsets {
        match runs.last_mut() {
            Some(run) if run.last().map(|(last, _)| last + 1) == Some(id) => run.push((id, offset)),
            _ => runs.push(vec![(id, offset)]),
        }
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::pdf_writer::blank_document;

    #[test]
    fn test_append_revision_is_readable() {
        let base = blank_document(1).unwrap();
        let doc = PdfDocument::from_bytes(base.clone()).unwrap();
        let mut update = IncrementalUpdate::new(&doc).unwrap();
        let extra = update.allocate();
        update.put(extra, &ObjectSerializer::dict(vec![("Note", ObjectSerializer::string("added"))]));

        let appended = update.write(&base).unwrap();
        assert!(appended.bytes.starts_with(&base));

        let doc2 = PdfDocument::from_bytes(appended.bytes).unwrap();
        assert_eq!(doc2.revisions().len(), 2);
        assert_eq!(doc2.revisions()[0].end_offset, base.len());
        assert_eq!(doc2.page_count().unwrap(), 1);
        let note = doc2.object(extra.id).unwrap();
        assert_eq!(note.get("Note").and_then(Object::as_string), Some(&b"added"[..]));
        // Not visible in the original revision.
        assert!(doc2.object_at(extra.id, 0).is_err());
    }

    #[test]
    fn test_replaced_object_keeps_old_version() {
        let base = blank_document(1).unwrap();
        let doc = PdfDocument::from_bytes(base.clone()).unwrap();
        let catalog_ref = doc.catalog_ref().unwrap();
        let mut catalog = doc.catalog().unwrap();
        catalog.insert("Lang".to_string(), ObjectSerializer::string("en"));

        let mut update = IncrementalUpdate::new(&doc).unwrap();
        update.put(catalog_ref, &Object::Dictionary(catalog));
        let doc2 = PdfDocument::from_bytes(update.write(&base).unwrap().bytes).unwrap();

        assert!(doc2.catalog().unwrap().contains_key("Lang"));
        assert!(!doc2.catalog_at(0).unwrap().contains_key("Lang"));
    }

    #[test]
    fn test_empty_update_rejected() {
        let base = blank_document(1).unwrap();
        let doc = PdfDocument::from_bytes(base.clone()).unwrap();
        assert!(IncrementalUpdate::new(&doc).unwrap().write(&base).is_err());
    }

    #[test]
    fn test_contiguous_runs() {
        let offsets: BTreeMap<u32, usize> = [(1, 10), (2, 20), (7, 70), (8, 80), (10, 100)].into_iter().collect();
        let runs = contiguous_runs(&offsets);
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0], vec![(1, 10), (2, 20)]);
        assert_eq!(runs[2], vec![(10, 100)]);
    }
}
