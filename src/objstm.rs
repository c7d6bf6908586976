//! Object stream parsing (PDF 1.5+).
//!
//! An object stream (`/Type /ObjStm`) holds `/N` objects. Its decoded data
//! starts with `N` pairs of integers (object number, offset relative to
//! `/First`), followed by the objects themselves.

use crate::error::{Error, Result};
use crate::lexer::unsigned;
use crate::object::Object;
use crate::parser::parse_object;
use std::collections::HashMap;

/// Parse an object stream into a map from object number to object.
pub fn parse_object_stream(stream_obj: &Object) -> Result<HashMap<u32, Object>> {
    let dict = match stream_obj {
        Object::Stream { dict, .. } => dict,
        other => {
            return Err(Error::malformed(format!(
                "object stream is a {}, not a Stream",
                other.type_name()
            )))
        },
    };
    if let Some(kind) = stream_obj.dict_type() {
        if kind != "ObjStm" {
            return Err(Error::malformed(format!("expected /Type /ObjStm, got /{}", kind)));
        }
    }

    let n = dict
        .get("N")
        .and_then(Object::as_integer)
        .filter(|n| *n >= 0)
        .ok_or_else(|| Error::malformed("object stream missing /N"))? as usize;
    let first = dict
        .get("First")
        .and_then(Object::as_integer)
        .filter(|f| *f >= 0)
        .ok_or_else(|| Error::malformed("object stream missing /First"))? as usize;

    let data = stream_obj.decode_stream_data()?;
    if first > data.len() {
        return Err(Error::malformed(format!(
            "object stream /First {} beyond decoded length {}",
            first,
            data.len()
        )));
    }

    let mut header = &data[..first];
    let mut pairs = Vec::with_capacity(n);
    for _ in 0..n {
        let (rest, id) = unsigned(header).map_err(|_| Error::malformed("truncated object stream header"))?;
        let (rest, offset) = unsigned(rest).map_err(|_| Error::malformed("truncated object stream header"))?;
        pairs.push((id as u32, offset as usize));
        header = rest;
    }

    let body = &data[first..];
    let mut objects = HashMap::with_capacity(n);
    for (id, offset) in pairs {
        let Some(slice) = body.get(offset..) else {
            log::warn!("object {} offset {} beyond object stream body", id, offset);
            continue;
        };
        match parse_object(slice) {
            Ok((_, obj)) => {
                objects.insert(id, obj);
            },
            Err(e) => log::warn!("object {} in object stream unparseable: {:?}", id, e),
        }
    }
    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Dict;
    use bytes::Bytes;

    fn stream(n: i64, first: i64, data: &[u8]) -> Object {
        let mut dict = Dict::new();
        dict.insert("Type".to_string(), Object::Name("ObjStm".to_string()));
        dict.insert("N".to_string(), Object::Integer(n));
        dict.insert("First".to_string(), Object::Integer(first));
        Object::Stream {
            dict,
            data: Bytes::from(data.to_vec()),
        }
    }

    #[test]
    fn test_two_objects() {
        let pairs = b"10 0 11 3 ";
        let mut data = pairs.to_vec();
        data.extend_from_slice(b"42 << /Type /Catalog >>");
        let objs = parse_object_stream(&stream(2, pairs.len() as i64, &data)).unwrap();
        assert_eq!(objs[&10].as_integer(), Some(42));
        assert_eq!(objs[&11].dict_type(), Some("Catalog"));
    }

    #[test]
    fn test_missing_n_is_malformed() {
        let mut obj = stream(1, 0, b"");
        if let Object::Stream { dict, .. } = &mut obj {
            dict.remove("N");
        }
        assert!(matches!(parse_object_stream(&obj), Err(Error::MalformedDocument(_))));
    }

    #[test]
    fn test_first_beyond_data() {
        assert!(parse_object_stream(&stream(1, 99, b"1 0 ")).is_err());
    }
}
