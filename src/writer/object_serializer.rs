//! PDF object serialization.
//!
//! Serializes [`Object`] values to PDF syntax (ISO 32000-1 section 7.3).
//! Output goes straight into a `Vec<u8>`, so serialization cannot fail.

use crate::object::{Dict, Object, ObjectRef};

/// Serializer for PDF objects.
///
/// Dictionary keys are emitted in sorted order so the same object always
/// serializes to the same bytes; signed revisions depend on that.
#[derive(Debug, Clone, Default)]
pub struct ObjectSerializer {
    /// Whether to use compact formatting (no newlines inside dictionaries)
    compact: bool,
}

impl ObjectSerializer {
    /// Create a serializer that puts each dictionary entry on its own line.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a compact serializer (minimal whitespace).
    pub fn compact() -> Self {
        Self { compact: true }
    }

    /// Serialize an object to bytes.
    pub fn serialize(&self, obj: &Object) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_object(&mut buf, obj);
        buf
    }

    /// Serialize an indirect object definition.
    ///
    /// Format: `{id} {gen} obj\n{object}\nendobj\n`
    pub fn serialize_indirect(&self, id: u32, gen: u16, obj: &Object) -> Vec<u8> {
        let body = self.serialize(obj);
        Self::wrap_indirect(id, gen, &body)
    }

    /// Wrap an already serialized body as an indirect object definition.
    pub fn wrap_indirect(id: u32, gen: u16, body: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(body.len() + 32);
        buf.extend_from_slice(format!("{} {} obj\n", id, gen).as_bytes());
        buf.extend_from_slice(body);
        buf.extend_from_slice(b"\nendobj\n");
        buf
    }

    fn write_object(&self, w: &mut Vec<u8>, obj: &Object) {
        match obj {
            Object::Null => w.extend_from_slice(b"null"),
            Object::Boolean(b) => w.extend_from_slice(if *b { &b"true"[..] } else { &b"false"[..] }),
            Object::Integer(i) => w.extend_from_slice(i.to_string().as_bytes()),
            Object::Real(r) => write_real(w, *r),
            Object::String(s) => write_string(w, s),
            Object::Name(n) => write_name(w, n),
            Object::Array(arr) => self.write_array(w, arr),
            Object::Dictionary(dict) => self.write_dictionary(w, dict),
            Object::Stream { dict, data } => self.write_stream(w, dict, data),
            Object::Reference(r) => w.extend_from_slice(r.to_string().as_bytes()),
        }
    }

    fn write_array(&self, w: &mut Vec<u8>, arr: &[Object]) {
        w.push(b'[');
        for (i, obj) in arr.iter().enumerate() {
            if i > 0 {
                w.push(b' ');
            }
            self.write_object(w, obj);
        }
        w.push(b']');
    }

    fn write_dictionary(&self, w: &mut Vec<u8>, dict: &Dict) {
        w.extend_from_slice(b"<<");

        let mut keys: Vec<_> = dict.keys().collect();
        keys.sort();

        for key in keys {
            if let Some(value) = dict.get(key) {
                w.extend_from_slice(if self.compact { &b" "[..] } else { &b"\n  "[..] });
                write_name(w, key);
                w.push(b' ');
                self.write_object(w, value);
            }
        }

        if self.compact {
            w.push(b' ');
        } else if !dict.is_empty() {
            w.push(b'\n');
        }
        w.extend_from_slice(b">>");
    }

    fn write_stream(&self, w: &mut Vec<u8>, dict: &Dict, data: &[u8]) {
        // Length always reflects the bytes actually written.
        let mut dict_with_length = dict.clone();
        dict_with_length.insert("Length".to_string(), Object::Integer(data.len() as i64));

        self.write_dictionary(w, &dict_with_length);
        w.extend_from_slice(b"\nstream\n");
        w.extend_from_slice(data);
        w.extend_from_slice(b"\nendstream");
    }
}

/// Write a real number with at most five decimals and no trailing zeros.
fn write_real(w: &mut Vec<u8>, value: f64) {
    if value.fract() == 0.0 {
        w.extend_from_slice((value as i64).to_string().as_bytes());
    } else {
        let formatted = format!("{:.5}", value);
        let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
        w.extend_from_slice(trimmed.as_bytes());
    }
}

/// Literal string for printable ASCII, hex string otherwise.
fn write_string(w: &mut Vec<u8>, data: &[u8]) {
    let is_printable = data
        .iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b'\t' || (0x20..=0x7E).contains(&b));

    if is_printable {
        w.push(b'(');
        for &byte in data {
            match byte {
                b'(' => w.extend_from_slice(b"\\("),
                b')' => w.extend_from_slice(b"\\)"),
                b'\\' => w.extend_from_slice(b"\\\\"),
                b'\n' => w.extend_from_slice(b"\\n"),
                b'\r' => w.extend_from_slice(b"\\r"),
                b'\t' => w.extend_from_slice(b"\\t"),
                _ => w.push(byte),
            }
        }
        w.push(b')');
    } else {
        w.push(b'<');
        w.extend_from_slice(hex_upper(data).as_bytes());
        w.push(b'>');
    }
}

/// Names start with `/`; anything outside the regular set becomes `#xx`.
fn write_name(w: &mut Vec<u8>, name: &str) {
    w.push(b'/');
    for byte in name.bytes() {
        match byte {
            b'!'
            | b'"'
            | b'$'
            | b'&'
            | b'\''
            | b'*'..=b'.'
            | b'0'..=b';'
            | b'='
            | b'?'
            | b'@'
            | b'A'..=b'Z'
            | b'^'..=b'z'
            | b'|'
            | b'~' => w.push(byte),
            _ => w.extend_from_slice(format!("#{:02X}", byte).as_bytes()),
        }
    }
}

/// Uppercase hex encoding.
pub fn hex_upper(data: &[u8]) -> String {
    use std::fmt::Write;
    data.iter().fold(String::with_capacity(data.len() * 2), |mut s, b| {
        let _ = write!(s, "{:02X}", b);
        s
    })
}

/// Helper functions for building PDF objects.
impl ObjectSerializer {
    /// Create a Name object.
    pub fn name(s: &str) -> Object {
        Object::Name(s.to_string())
    }

    /// Create a String object from a Rust string.
    pub fn string(s: &str) -> Object {
        Object::String(s.as_bytes().to_vec())
    }

    /// Create an Integer object.
    pub fn integer(i: i64) -> Object {
        Object::Integer(i)
    }

    /// Create an Array object.
    pub fn array(items: Vec<Object>) -> Object {
        Object::Array(items)
    }

    /// Create a Dictionary object.
    pub fn dict(entries: Vec<(&str, Object)>) -> Object {
        Object::Dictionary(Self::dict_map(entries))
    }

    /// Create the map behind a dictionary.
    pub fn dict_map(entries: Vec<(&str, Object)>) -> Dict {
        entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    /// Create a Reference object.
    pub fn reference(r: ObjectRef) -> Object {
        Object::Reference(r)
    }

    /// Rectangle array `[llx lly urx ury]` from corner coordinates.
    pub fn rect(llx: f64, lly: f64, urx: f64, ury: f64) -> Object {
        Object::Array(vec![
            Object::Real(llx),
            Object::Real(lly),
            Object::Real(urx),
            Object::Real(ury),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_primitives() {
        let s = ObjectSerializer::compact();
        assert_eq!(s.serialize(&Object::Null), b"null");
        assert_eq!(s.serialize(&Object::Integer(-42)), b"-42");
        assert_eq!(s.serialize(&Object::Real(1.5)), b"1.5");
        assert_eq!(s.serialize(&Object::Real(450.0)), b"450");
        assert_eq!(s.serialize(&ObjectSerializer::reference(ObjectRef::new(7, 0))), b"7 0 R");
    }

    #[test]
    fn test_serialize_strings() {
        let s = ObjectSerializer::compact();
        assert_eq!(s.serialize(&ObjectSerializer::string("a(b)")), b"(a\\(b\\))");
        assert_eq!(s.serialize(&Object::String(vec![0x00, 0xFF])), b"<00FF>");
    }

    #[test]
    fn test_name_escaping() {
        let s = ObjectSerializer::compact();
        assert_eq!(s.serialize(&ObjectSerializer::name("Adobe.PPKLite")), b"/Adobe.PPKLite");
        assert_eq!(s.serialize(&ObjectSerializer::name("A B")), b"/A#20B");
        assert_eq!(s.serialize(&ObjectSerializer::name("1.2")), b"/1.2");
    }

    #[test]
    fn test_dictionary_sorted_and_reparseable() {
        let s = ObjectSerializer::compact();
        let dict = ObjectSerializer::dict(vec![
            ("Type", ObjectSerializer::name("Sig")),
            ("Filter", ObjectSerializer::name("Adobe.PPKLite")),
            ("Rect", ObjectSerializer::rect(450.0, 50.0, 580.0, 120.0)),
        ]);
        let bytes = s.serialize(&dict);
        assert_eq!(
            bytes,
            b"<< /Filter /Adobe.PPKLite /Rect [450 50 580 120] /Type /Sig >>".to_vec()
        );
        let (_, parsed) = crate::parser::parse_object(&bytes).unwrap();
        assert_eq!(parsed, ObjectSerializer::dict(vec![
            ("Type", ObjectSerializer::name("Sig")),
            ("Filter", ObjectSerializer::name("Adobe.PPKLite")),
            ("Rect", Object::Array(vec![
                Object::Integer(450),
                Object::Integer(50),
                Object::Integer(580),
                Object::Integer(120),
            ])),
        ]));
    }

    #[test]
    fn test_stream_length_is_recomputed() {
        let s = ObjectSerializer::compact();
        let obj = Object::Stream {
            dict: ObjectSerializer::dict_map(vec![("Length", Object::Integer(999))]),
            data: bytes::Bytes::from_static(b"BT ET"),
        };
        let out = String::from_utf8(s.serialize_indirect(5, 0, &obj)).unwrap();
        assert!(out.starts_with("5 0 obj\n<< /Length 5 >>\nstream\nBT ET\nendstream"));
        assert!(out.ends_with("endobj\n"));
    }

    #[test]
    fn test_hex_upper() {
        assert_eq!(hex_upper(&[0x30, 0x82, 0x0a]), "30820A");
    }
}
