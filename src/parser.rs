//! PDF object parser.
//!
//! Recursive descent over the lexer's tokens: a token decides the object
//! kind, composite objects (arrays, dictionaries) recurse, and a dictionary
//! followed by the `stream` keyword becomes a stream object.

use crate::error::{Error, Result};
use crate::lexer::{skip_ws, token, Token};
use crate::object::{Dict, Object, ObjectRef};
use nom::IResult;

fn fail<T>(input: &[u8], kind: nom::error::ErrorKind) -> IResult<&[u8], T> {
    Err(nom::Err::Error(nom::error::Error::new(input, kind)))
}

/// Decode escape sequences in a literal string body.
///
/// ```
/// # use pdf_certsign::parser::decode_literal_string_escapes;
/// assert_eq!(decode_literal_string_escapes(b"a\\(b\\)\\101"), b"a(b)A");
/// ```
pub fn decode_literal_string_escapes(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] != b'\\' || i + 1 == raw.len() {
            out.push(raw[i]);
            i += 1;
            continue;
        }
        let esc = raw[i + 1];
        i += 2;
        match esc {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0C),
            b'\n' => {},
            b'\r' => {
                if raw.get(i) == Some(&b'\n') {
                    i += 1;
                }
            },
            b'0'..=b'7' => {
                let mut value = (esc - b'0') as u32;
                for _ in 0..2 {
                    match raw.get(i) {
                        Some(d @ b'0'..=b'7') => {
                            value = value * 8 + (d - b'0') as u32;
                            i += 1;
                        },
                        _ => break,
                    }
                }
                out.push((value & 0xFF) as u8);
            },
            other => out.push(other),
        }
    }
    out
}

/// Decode a hex string body; whitespace ignored, odd digit padded with 0.
pub fn decode_hex(hex_bytes: &[u8]) -> Result<Vec<u8>> {
    let digits: Vec<u8> = hex_bytes
        .iter()
        .copied()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    let nibble = |c: u8| -> Result<u8> {
        (c as char)
            .to_digit(16)
            .map(|d| d as u8)
            .ok_or_else(|| Error::ParseError {
                offset: 0,
                reason: format!("invalid hex digit {:?}", c as char),
            })
    };

    digits
        .chunks(2)
        .map(|pair| -> Result<u8> {
            let hi = nibble(pair[0])?;
            let lo = match pair.get(1) {
                Some(&c) => nibble(c)?,
                None => 0,
            };
            Ok(hi << 4 | lo)
        })
        .collect()
}

/// Parse one PDF object from the start of `input`.
///
/// `int int R` is read as an indirect reference.
pub fn parse_object(input: &[u8]) -> IResult<&[u8], Object> {
    let (rest, tok) = token(input)?;
    match tok {
        Token::Null => Ok((rest, Object::Null)),
        Token::True => Ok((rest, Object::Boolean(true))),
        Token::False => Ok((rest, Object::Boolean(false))),
        Token::Real(r) => Ok((rest, Object::Real(r))),
        Token::Name(n) => Ok((rest, Object::Name(n))),
        Token::Integer(id) => {
            if let Ok((after_gen, Token::Integer(gen))) = token(rest) {
                if let Ok((after_r, Token::R)) = token(after_gen) {
                    if (0..=u32::MAX as i64).contains(&id) && (0..=u16::MAX as i64).contains(&gen) {
                        return Ok((after_r, Object::Reference(ObjectRef::new(id as u32, gen as u16))));
                    }
                }
            }
            Ok((rest, Object::Integer(id)))
        },
        Token::LiteralString(raw) => Ok((rest, Object::String(decode_literal_string_escapes(raw)))),
        Token::HexString(raw) => match decode_hex(raw) {
            Ok(bytes) => Ok((rest, Object::String(bytes))),
            Err(_) => Err(nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::HexDigit))),
        },
        Token::ArrayStart => parse_array(rest),
        Token::DictStart => {
            let (rest, dict) = parse_dictionary(rest)?;
            match token(rest) {
                Ok((stream_body, Token::StreamStart)) => {
                    let (rest, data) = parse_stream_data(stream_body, &dict)?;
                    Ok((
                        rest,
                        Object::Stream {
                            dict,
                            data: bytes::Bytes::from(data),
                        },
                    ))
                },
                _ => Ok((rest, Object::Dictionary(dict))),
            }
        },
        _ => fail(input, nom::error::ErrorKind::Tag),
    }
}

fn parse_array(mut input: &[u8]) -> IResult<&[u8], Object> {
    let mut items = Vec::new();
    loop {
        if let Ok((rest, Token::ArrayEnd)) = token(input) {
            return Ok((rest, Object::Array(items)));
        }
        let (rest, item) = parse_object(input)?;
        items.push(item);
        input = rest;
    }
}

fn parse_dictionary(mut input: &[u8]) -> IResult<&[u8], Dict> {
    let mut dict = Dict::new();
    loop {
        match token(input)? {
            (rest, Token::DictEnd) => return Ok((rest, dict)),
            (rest, Token::Name(key)) => {
                let (rest, value) = parse_object(rest)?;
                dict.insert(key, value);
                input = rest;
            },
            _ => return fail(input, nom::error::ErrorKind::Tag),
        }
    }
}

fn parse_stream_data<'a>(input: &'a [u8], dict: &Dict) -> IResult<&'a [u8], Vec<u8>> {
    let body = if input.starts_with(b"\r\n") {
        &input[2..]
    } else if input.starts_with(b"\n") || input.starts_with(b"\r") {
        &input[1..]
    } else {
        input
    };

    // An indirect /Length cannot be resolved here; fall back to scanning.
    if let Some(length) = dict.get("Length").and_then(Object::as_integer) {
        let length = length.max(0) as usize;
        if length <= body.len() {
            if let Ok((rest, Token::StreamEnd)) = token(&body[length..]) {
                return Ok((rest, body[..length].to_vec()));
            }
        }
        log::debug!("stream /Length {} does not land on endstream, scanning", length);
    }

    let Some(pos) = body.windows(9).position(|w| w == b"endstream") else {
        return fail(input, nom::error::ErrorKind::Eof);
    };
    let mut end = pos;
    // Drop the EOL that precedes the keyword.
    if end > 0 && body[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && body[end - 1] == b'\r' {
        end -= 1;
    }
    Ok((&body[pos + 9..], body[..end].to_vec()))
}

fn object_header(input: &[u8]) -> IResult<&[u8], (i64, i64)> {
    let (rest, id) = token(input)?;
    let (rest, gen) = token(rest)?;
    let (rest, kw) = token(rest)?;
    match (id, gen, kw) {
        (Token::Integer(id), Token::Integer(gen), Token::ObjStart) => Ok((rest, (id, gen))),
        _ => fail(input, nom::error::ErrorKind::Tag),
    }
}

/// Parse `id gen obj <object> endobj` starting at `offset` in `data`.
pub fn parse_indirect_object(data: &[u8], offset: usize) -> Result<(ObjectRef, Object)> {
    let parse_err = |reason: &str| Error::ParseError {
        offset,
        reason: reason.to_string(),
    };
    let input = data.get(offset..).ok_or_else(|| parse_err("offset beyond end of file"))?;

    let (rest, (id, gen)) = object_header(input).map_err(|_| parse_err("expected 'id gen obj'"))?;
    let (rest, object) = parse_object(rest).map_err(|_| parse_err("invalid object body"))?;

    if !skip_ws(rest).starts_with(b"endobj") {
        log::debug!("object {} {} at {} lacks endobj", id, gen, offset);
    }
    if !(0..=u32::MAX as i64).contains(&id) || !(0..=u16::MAX as i64).contains(&gen) {
        return Err(parse_err("object number out of range"));
    }
    Ok((ObjectRef::new(id as u32, gen as u16), object))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reference_vs_integers() {
        let (_, obj) = parse_object(b"[0 1234 5678 9012]").unwrap();
        assert_eq!(
            obj,
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(1234),
                Object::Integer(5678),
                Object::Integer(9012)
            ])
        );
        let (_, obj) = parse_object(b"[3 0 R 4]").unwrap();
        assert_eq!(obj.as_array().unwrap()[0], Object::Reference(ObjectRef::new(3, 0)));
    }

    #[test]
    fn test_parse_signature_dictionary() {
        let input = b"<< /Type /Sig /Filter /Adobe.PPKLite /ByteRange [0 10 20 30] \
                      /Contents <3082> /M (D:20240101120000+05'30') >>";
        let (_, obj) = parse_object(input).unwrap();
        assert_eq!(obj.dict_type(), Some("Sig"));
        assert_eq!(obj.get("Contents").unwrap().as_string(), Some(&[0x30, 0x82][..]));
        assert_eq!(obj.get("M").unwrap().as_string(), Some(&b"D:20240101120000+05'30'"[..]));
    }

    #[test]
    fn test_parse_stream_with_length() {
        let input = b"<< /Length 5 >>\nstream\nBT ET\nendstream";
        let (_, obj) = parse_object(input).unwrap();
        match obj {
            Object::Stream { data, .. } => assert_eq!(&data[..], b"BT ET"),
            other => panic!("expected stream, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_stream_with_indirect_length() {
        let input = b"<< /Length 9 0 R >>\r\nstream\r\nabc\r\nendstream";
        let (_, obj) = parse_object(input).unwrap();
        match obj {
            Object::Stream { data, .. } => assert_eq!(&data[..], b"abc"),
            other => panic!("expected stream, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_indirect_object() {
        let data = b"%PDF-1.7\n4 0 obj\n<< /Type /Page >>\nendobj\n";
        let (r, obj) = parse_indirect_object(data, 9).unwrap();
        assert_eq!(r, ObjectRef::new(4, 0));
        assert_eq!(obj.dict_type(), Some("Page"));
        assert!(parse_indirect_object(b"<< /Type /Page >>", 0).is_err());
        assert!(parse_indirect_object(data, 999).is_err());
    }

    #[test]
    fn test_decode_hex() {
        assert_eq!(decode_hex(b"48 65 6C").unwrap(), b"Hel");
        assert_eq!(decode_hex(b"7").unwrap(), vec![0x70]);
        assert!(decode_hex(b"zz").is_err());
    }

    #[test]
    fn test_unterminated_dictionary_fails() {
        assert!(parse_object(b"<< /Type /Page").is_err());
    }
}
