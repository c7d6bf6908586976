//! PDF object types.

use crate::decoders::DecodeParams;
use crate::error::{Error, Result};
use std::collections::HashMap;

/// Dictionary type shared by dictionaries and stream dictionaries.
pub type Dict = HashMap<String, Object>;

/// PDF object representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    /// Null object
    Null,
    /// `true` or `false`
    Boolean(bool),
    /// Integer value
    Integer(i64),
    /// Real number
    Real(f64),
    /// Literal or hex string, decoded to bytes
    String(Vec<u8>),
    /// Name, stored without the slash
    Name(String),
    /// Array of objects
    Array(Vec<Object>),
    /// Dictionary
    Dictionary(Dict),
    /// Stream with its dictionary
    Stream {
        /// Stream dictionary
        dict: Dict,
        /// Raw (still encoded) stream data
        data: bytes::Bytes,
    },
    /// `id gen R`
    Reference(ObjectRef),
}

/// Reference to an indirect object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    /// Object number
    pub id: u32,
    /// Generation number
    pub gen: u16,
}

impl ObjectRef {
    /// Reference to object `id`, generation `gen`.
    pub fn new(id: u32, gen: u16) -> Self {
        Self { id, gen }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} R", self.id, self.gen)
    }
}

impl Object {
    /// Human-readable type name, without the data.
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Null => "Null",
            Object::Boolean(_) => "Boolean",
            Object::Integer(_) => "Integer",
            Object::Real(_) => "Real",
            Object::String(_) => "String",
            Object::Name(_) => "Name",
            Object::Array(_) => "Array",
            Object::Dictionary(_) => "Dictionary",
            Object::Stream { .. } => "Stream",
            Object::Reference(_) => "Reference",
        }
    }

    /// Integer value, if this is an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Object::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value of an integer or real.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Object::Integer(i) => Some(*i as f64),
            Object::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// Name without the leading slash.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Object::Name(s) => Some(s),
            _ => None,
        }
    }

    /// Dictionary of a dictionary or stream.
    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Object::Dictionary(d) => Some(d),
            Object::Stream { dict, .. } => Some(dict),
            _ => None,
        }
    }

    /// Array items.
    pub fn as_array(&self) -> Option<&Vec<Object>> {
        match self {
            Object::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Target of an indirect reference.
    pub fn as_reference(&self) -> Option<ObjectRef> {
        match self {
            Object::Reference(r) => Some(*r),
            _ => None,
        }
    }

    /// Raw bytes of a string object.
    pub fn as_string(&self) -> Option<&[u8]> {
        match self {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    /// Look up `key` if this is a dictionary or stream.
    pub fn get(&self, key: &str) -> Option<&Object> {
        self.as_dict().and_then(|d| d.get(key))
    }

    /// `/Type` of a dictionary or stream, if present.
    pub fn dict_type(&self) -> Option<&str> {
        self.get("Type").and_then(Object::as_name)
    }

    /// Decode stream data using the filters in the stream dictionary.
    pub fn decode_stream_data(&self) -> Result<Vec<u8>> {
        let Object::Stream { dict, data } = self else {
            return Err(Error::Decode(format!("expected Stream, found {}", self.type_name())));
        };

        let filters: Vec<String> = match dict.get("Filter") {
            Some(Object::Name(name)) => vec![name.clone()],
            Some(Object::Array(arr)) => arr
                .iter()
                .filter_map(|o| o.as_name().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };
        if filters.is_empty() {
            return Ok(data.to_vec());
        }

        let params = decode_params(dict.get("DecodeParms"));
        crate::decoders::decode_stream_with_params(data, &filters, params.as_ref())
    }
}

fn decode_params(obj: Option<&Object>) -> Option<DecodeParams> {
    let dict = match obj? {
        Object::Dictionary(d) => d,
        Object::Array(arr) => arr.iter().find_map(Object::as_dict)?,
        _ => return None,
    };
    let read = |key: &str, default: usize| {
        dict.get(key)
            .and_then(Object::as_integer)
            .map(|v| v.max(0) as usize)
            .unwrap_or(default)
    };
    Some(DecodeParams {
        predictor: dict.get("Predictor").and_then(Object::as_integer).unwrap_or(1),
        columns: read("Columns", 1),
        colors: read("Colors", 1),
        bits_per_component: read("BitsPerComponent", 8),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_ref_display() {
        assert_eq!(ObjectRef::new(12, 0).to_string(), "12 0 R");
    }

    #[test]
    fn test_accessors() {
        let mut d = Dict::new();
        d.insert("Type".to_string(), Object::Name("Sig".to_string()));
        let obj = Object::Dictionary(d);
        assert_eq!(obj.dict_type(), Some("Sig"));
        assert!(obj.get("Missing").is_none());
        assert_eq!(Object::Integer(3).as_number(), Some(3.0));
        assert_eq!(Object::Real(1.5).as_integer(), None);
    }

    #[test]
    fn test_decode_unfiltered_stream() {
        let obj = Object::Stream {
            dict: Dict::new(),
            data: bytes::Bytes::from_static(b"BT ET"),
        };
        assert_eq!(obj.decode_stream_data().unwrap(), b"BT ET");
        assert!(Object::Null.decode_stream_data().is_err());
    }

    #[test]
    fn test_decode_params_from_array() {
        let mut p = Dict::new();
        p.insert("Predictor".to_string(), Object::Integer(12));
        p.insert("Columns".to_string(), Object::Integer(5));
        let params = decode_params(Some(&Object::Array(vec![Object::Dictionary(p)]))).unwrap();
        assert_eq!(params.predictor, 12);
        assert_eq!(params.columns, 5);
        assert_eq!(params.colors, 1);
    }
}
