//! Cross-reference sections.
//!
//! Every revision of a PDF ends with a cross-reference section (a classic
//! `xref` table or a `/Type /XRef` stream) plus a trailer. Sections chain
//! backwards through `/Prev`; reading the whole chain yields one
//! [`XRefSection`] per revision, which is what the signature code needs to
//! reason about what each incremental update changed.

use crate::error::{Error, Result};
use crate::lexer::{is_whitespace, skip_ws, unsigned};
use crate::object::{Dict, Object};
use crate::parser::{parse_indirect_object, parse_object};
use std::collections::{BTreeMap, HashSet};

/// Upper bound on `/Prev` hops, guarding against crafted loops.
const MAX_CHAIN_DEPTH: usize = 512;

/// One entry of a cross-reference section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntry {
    /// Object number is free in this revision.
    Free,
    /// Object stored directly in the file at `offset`.
    InUse {
        /// Byte offset of `id gen obj`
        offset: usize,
        /// Generation number
        gen: u16,
    },
    /// Object stored inside an object stream.
    Compressed {
        /// Object number of the containing `/ObjStm`
        stream_id: u32,
        /// Index inside the object stream
        index: u32,
    },
}

/// A single cross-reference section with its trailer.
#[derive(Debug, Clone)]
pub struct XRefSection {
    /// Byte offset the `startxref` (or `/Prev`) pointed at.
    pub offset: usize,
    /// Entries declared by this section only.
    pub entries: BTreeMap<u32, XRefEntry>,
    /// Trailer dictionary (the stream dictionary for xref streams).
    pub trailer: Dict,
    /// Whether the section is an xref stream.
    pub is_stream: bool,
}

impl XRefSection {
    /// `/Prev` offset, if any.
    pub fn prev(&self) -> Option<usize> {
        self.trailer
            .get("Prev")
            .and_then(Object::as_integer)
            .filter(|p| *p >= 0)
            .map(|p| p as usize)
    }
}

/// Locate the offset named by the final `startxref`.
///
/// The file must contain a `%%EOF` marker after that `startxref`; a file that
/// was cut short is reported as malformed rather than being read leniently.
pub fn find_startxref(data: &[u8]) -> Result<usize> {
    let pos = rfind(data, b"startxref").ok_or_else(|| Error::malformed("no startxref keyword"))?;
    let after = &data[pos + b"startxref".len()..];
    let (rest, offset) =
        unsigned(after).map_err(|_| Error::malformed("startxref is not followed by an offset"))?;
    let tail = rest.iter().position(|&c| !is_whitespace(c)).map_or(&rest[rest.len()..], |p| &rest[p..]);
    if !tail.starts_with(b"%%EOF") {
        return Err(Error::malformed("missing %%EOF after final startxref"));
    }
    let offset = offset as usize;
    if offset >= data.len() {
        return Err(Error::malformed(format!(
            "startxref {} beyond file length {}",
            offset,
            data.len()
        )));
    }
    Ok(offset)
}

/// Read every section reachable from the final `startxref`, oldest first.
pub fn read_chain(data: &[u8]) -> Result<Vec<XRefSection>> {
    let mut sections = Vec::new();
    let mut seen = HashSet::new();
    let mut next = Some(find_startxref(data)?);

    while let Some(offset) = next {
        if !seen.insert(offset) {
            return Err(Error::malformed(format!("xref /Prev loop at offset {}", offset)));
        }
        if sections.len() >= MAX_CHAIN_DEPTH {
            return Err(Error::malformed("xref chain too long"));
        }
        let section = read_section(data, offset)?;
        next = section.prev();
        sections.push(section);
    }

    sections.sort_by_key(|s| s.offset);
    log::debug!("read {} cross-reference section(s)", sections.len());
    Ok(sections)
}

/// Read the section at `offset`, table or stream.
pub fn read_section(data: &[u8], offset: usize) -> Result<XRefSection> {
    let at = data
        .get(offset..)
        .ok_or_else(|| Error::malformed(format!("xref offset {} beyond end of file", offset)))?;

    let mut section = if skip_ws(at).starts_with(b"xref") {
        read_table(data, offset)?
    } else {
        read_stream(data, offset)?
    };

    // Hybrid files: the table trailer points at an xref stream holding the
    // compressed entries. Table entries take precedence.
    if let Some(stm) = section.trailer.get("XRefStm").and_then(Object::as_integer) {
        if stm >= 0 && (stm as usize) < data.len() {
            match read_stream(data, stm as usize) {
                Ok(hybrid) => {
                    for (id, entry) in hybrid.entries {
                        section.entries.entry(id).or_insert(entry);
                    }
                },
                Err(e) => log::warn!("ignoring unreadable /XRefStm at {}: {}", stm, e),
            }
        }
    }
    Ok(section)
}

fn read_table(data: &[u8], offset: usize) -> Result<XRefSection> {
    let malformed = |what: &str| Error::malformed(format!("xref table at {}: {}", offset, what));

    let mut input = &skip_ws(&data[offset..])[b"xref".len()..];
    let mut entries = BTreeMap::new();

    loop {
        let rest = skip_ws(input);
        if let Some(after) = rest.strip_prefix(b"trailer") {
            let (_, trailer) = parse_object(after).map_err(|_| malformed("unparseable trailer"))?;
            let trailer = match trailer {
                Object::Dictionary(d) => d,
                _ => return Err(malformed("trailer is not a dictionary")),
            };
            return Ok(XRefSection {
                offset,
                entries,
                trailer,
                is_stream: false,
            });
        }

        let (rest, start) = unsigned(rest).map_err(|_| malformed("bad subsection header"))?;
        let (rest, count) = unsigned(rest).map_err(|_| malformed("bad subsection header"))?;
        let mut cursor = rest;
        for i in 0..count {
            let (r, field1) = unsigned(cursor).map_err(|_| malformed("bad entry"))?;
            let (r, gen) = unsigned(r).map_err(|_| malformed("bad entry"))?;
            let r = skip_ws(r);
            let entry = match r.first() {
                Some(b'n') => XRefEntry::InUse {
                    offset: field1 as usize,
                    gen: gen.min(u16::MAX as u64) as u16,
                },
                Some(b'f') => XRefEntry::Free,
                _ => return Err(malformed("entry type is neither 'n' nor 'f'")),
            };
            let id = start
                .checked_add(i)
                .filter(|id| *id <= u32::MAX as u64)
                .ok_or_else(|| malformed("object number overflow"))? as u32;
            entries.insert(id, entry);
            cursor = &r[1..];
        }
        input = cursor;
    }
}

fn read_stream(data: &[u8], offset: usize) -> Result<XRefSection> {
    let (_, obj) = parse_indirect_object(data, offset)
        .map_err(|e| Error::malformed(format!("no xref table or stream at {}: {}", offset, e)))?;
    if obj.dict_type() != Some("XRef") {
        return Err(Error::malformed(format!("object at {} is not an xref stream", offset)));
    }
    let dict = obj.as_dict().cloned().unwrap_or_default();

    let widths: Vec<usize> = dict
        .get("W")
        .and_then(Object::as_array)
        .map(|w| w.iter().filter_map(Object::as_integer).map(|v| v.max(0) as usize).collect())
        .unwrap_or_default();
    if widths.len() != 3 || widths.iter().any(|w| *w > 8) {
        return Err(Error::malformed(format!("xref stream at {} has invalid /W", offset)));
    }

    let size = dict.get("Size").and_then(Object::as_integer).unwrap_or(0).max(0);
    let index: Vec<i64> = match dict.get("Index").and_then(Object::as_array) {
        Some(arr) => arr.iter().filter_map(Object::as_integer).collect(),
        None => vec![0, size],
    };

    let body = obj.decode_stream_data()?;
    let row_len: usize = widths.iter().sum();
    if row_len == 0 {
        return Err(Error::malformed("xref stream /W sums to zero"));
    }
    let mut rows = body.chunks_exact(row_len);
    let mut entries = BTreeMap::new();

    for pair in index.chunks(2) {
        let [start, count] = pair else { break };
        for i in 0..(*count).max(0) {
            let Some(row) = rows.next() else {
                log::warn!("xref stream at {} shorter than /Index claims", offset);
                break;
            };
            let (f1, rest) = row.split_at(widths[0]);
            let (f2, f3) = rest.split_at(widths[1]);
            // A zero-width type field defaults to type 1.
            let kind = if widths[0] == 0 { 1 } else { read_be(f1) };
            let entry = match kind {
                0 => XRefEntry::Free,
                1 => XRefEntry::InUse {
                    offset: read_be(f2) as usize,
                    gen: read_be(f3).min(u16::MAX as u64) as u16,
                },
                2 => XRefEntry::Compressed {
                    stream_id: read_be(f2) as u32,
                    index: read_be(f3) as u32,
                },
                other => {
                    log::debug!("skipping xref stream entry of unknown type {}", other);
                    continue;
                },
            };
            entries.insert((start + i) as u32, entry);
        }
    }

    Ok(XRefSection {
        offset,
        entries,
        trailer: dict,
        is_stream: true,
    })
}

fn read_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
}

/// Last occurrence of `needle` in `haystack`.
pub fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .rev()
        .find(|&i| &haystack[i..i + needle.len()] == needle)
}

/// First occurrence of `needle` at or after `from`.
pub fn find_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &[u8] = b"%PDF-1.7\n\
1 0 obj\n<< /Type /Catalog >>\nendobj\n\
xref\n0 2\n0000000000 65535 f \n0000000009 00000 n \n\
trailer\n<< /Size 2 /Root 1 0 R >>\nstartxref\n45\n%%EOF\n";

    #[test]
    fn test_find_startxref() {
        assert_eq!(find_startxref(SIMPLE).unwrap(), 45);
    }

    #[test]
    fn test_read_table_section() {
        let chain = read_chain(SIMPLE).unwrap();
        assert_eq!(chain.len(), 1);
        let section = &chain[0];
        assert!(!section.is_stream);
        assert_eq!(section.entries[&0], XRefEntry::Free);
        assert_eq!(section.entries[&1], XRefEntry::InUse { offset: 9, gen: 0 });
        assert_eq!(section.trailer.get("Size").and_then(Object::as_integer), Some(2));
    }

    #[test]
    fn test_eof_marker_after_whitespace() {
        let doc = b"xref\n0 1\n0000000000 65535 f \ntrailer\n<< /Size 1 >>\nstartxref\n0\r\n  %%EOF";
        assert_eq!(find_startxref(doc).unwrap(), 0);
        let comment = b"xref\n0 1\n0000000000 65535 f \ntrailer\n<< /Size 1 >>\nstartxref\n0\n% done\n";
        assert!(matches!(find_startxref(comment), Err(Error::MalformedDocument(_))));
    }

    #[test]
    fn test_truncated_file_is_malformed() {
        let cut = &SIMPLE[..SIMPLE.len() - 10];
        assert!(matches!(find_startxref(cut), Err(Error::MalformedDocument(_))));
    }

    #[test]
    fn test_prev_loop_detected() {
        let mut doc = SIMPLE.to_vec();
        let at = doc.len();
        let tail = format!(
            "xref\n0 1\n0000000000 65535 f \ntrailer\n<< /Size 2 /Prev {at} >>\nstartxref\n{at}\n%%EOF\n"
        );
        doc.extend_from_slice(tail.as_bytes());
        assert!(matches!(read_chain(&doc), Err(Error::MalformedDocument(_))));
    }

    #[test]
    fn test_read_xref_stream() {
        // Two entries (free 0, object 1 at offset 9), W [1 2 1], no filter.
        let rows = [0u8, 0, 0, 0xFF, 1, 0, 9, 0];
        let mut doc = b"%PDF-1.7\n1 0 obj\n<< /Type /Catalog >>\nendobj\n".to_vec();
        let xref_at = doc.len();
        doc.extend_from_slice(
            format!(
                "2 0 obj\n<< /Type /XRef /Size 2 /W [1 2 1] /Root 1 0 R /Length {} >>\nstream\n",
                rows.len()
            )
            .as_bytes(),
        );
        doc.extend_from_slice(&rows);
        doc.extend_from_slice(format!("\nendstream\nendobj\nstartxref\n{}\n%%EOF\n", xref_at).as_bytes());

        let chain = read_chain(&doc).unwrap();
        assert!(chain[0].is_stream);
        assert_eq!(chain[0].entries[&1], XRefEntry::InUse { offset: 9, gen: 0 });
        assert_eq!(chain[0].entries[&0], XRefEntry::Free);
    }

    #[test]
    fn test_rfind_and_find_from() {
        assert_eq!(rfind(b"abcabc", b"bc"), Some(4));
        assert_eq!(find_from(b"abcabc", b"bc", 2), Some(4));
        assert_eq!(find_from(b"abc", b"x", 0), None);
    }
}
