//! PDF lexer (tokenizer).
//!
//! Splits a byte slice into the atomic tokens of PDF syntax: numbers, literal
//! and hexadecimal strings, names, keywords and delimiters. Whitespace
//! (space, \t, \r, \n, \0, \f) and `%` comments between tokens are skipped.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while, take_while1},
    character::complete::{char, digit0, digit1, one_of},
    combinator::{map, opt, recognize, value},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

/// Token types recognized by the PDF lexer.
#[derive(Debug, PartialEq, Clone)]
pub enum Token<'a> {
    /// Integer number (e.g., 42, -123)
    Integer(i64),
    /// Real number (e.g., 3.14, -.5)
    Real(f64),
    /// Raw bytes between `(` and `)`, escapes not yet decoded
    LiteralString(&'a [u8]),
    /// Raw bytes between `<` and `>`
    HexString(&'a [u8]),
    /// Name with `#XX` escapes decoded
    Name(String),
    /// `true`
    True,
    /// `false`
    False,
    /// `null`
    Null,
    /// `[`
    ArrayStart,
    /// `]`
    ArrayEnd,
    /// `<<`
    DictStart,
    /// `>>`
    DictEnd,
    /// `obj`
    ObjStart,
    /// `endobj`
    ObjEnd,
    /// `stream`
    StreamStart,
    /// `endstream`
    StreamEnd,
    /// `R`
    R,
}

/// PDF whitespace characters.
pub fn is_whitespace(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | b'\n' | 0x00 | 0x0C)
}

fn is_delimiter(c: u8) -> bool {
    matches!(c, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

/// Skip any run of whitespace and comments.
pub fn skip_ws(mut input: &[u8]) -> &[u8] {
    loop {
        let trimmed = input
            .iter()
            .position(|&c| !is_whitespace(c))
            .map_or(&input[input.len()..], |p| &input[p..]);
        if trimmed.first() == Some(&b'%') {
            let comment: IResult<&[u8], &[u8]> =
                take_till(|c| c == b'\r' || c == b'\n')(trimmed);
            match comment {
                Ok((rest, _)) => input = rest,
                Err(_) => return trimmed,
            }
        } else {
            return trimmed;
        }
    }
}

fn number(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, text) = recognize(pair(
        opt(one_of("+-")),
        alt((
            recognize(tuple((digit1, opt(pair(char('.'), digit0))))),
            recognize(pair(char('.'), digit1)),
        )),
    ))(input)?;

    let text = std::str::from_utf8(text)
        .map_err(|_| nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit)))?;
    let token = if text.contains('.') {
        let normalized = text.trim_start_matches('+');
        normalized.parse::<f64>().map(Token::Real)
            .map_err(|_| nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Float)))?
    } else {
        text.trim_start_matches('+').parse::<i64>().map(Token::Integer)
            .map_err(|_| nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit)))?
    };
    Ok((rest, token))
}

fn literal_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (body, _) = char('(')(input)?;
    let mut depth = 1usize;
    let mut i = 0;
    while i < body.len() {
        match body[i] {
            b'\\' => i += 2,
            b'(' => {
                depth += 1;
                i += 1;
            },
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&body[i + 1..], Token::LiteralString(&body[..i])));
                }
                i += 1;
            },
            _ => i += 1,
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Char)))
}

fn hex_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    if input.starts_with(b"<<") {
        return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag)));
    }
    delimited(
        char('<'),
        map(
            take_while(|c: u8| c.is_ascii_hexdigit() || is_whitespace(c)),
            Token::HexString,
        ),
        char('>'),
    )(input)
}

/// Decode `#XX` escapes inside a name.
pub fn decode_name_escapes(raw: &[u8]) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'#' && i + 2 < raw.len() {
            let hex = std::str::from_utf8(&raw[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(raw[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn name(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    preceded(
        char('/'),
        map(
            take_while(|c: u8| !is_whitespace(c) && !is_delimiter(c)),
            |raw: &[u8]| Token::Name(decode_name_escapes(raw)),
        ),
    )(input)
}

fn keyword(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, token) = alt((
        value(Token::DictStart, tag(b"<<")),
        value(Token::DictEnd, tag(b">>")),
        value(Token::ArrayStart, tag(b"[")),
        value(Token::ArrayEnd, tag(b"]")),
        value(Token::True, tag(b"true")),
        value(Token::False, tag(b"false")),
        value(Token::Null, tag(b"null")),
        value(Token::ObjEnd, tag(b"endobj")),
        value(Token::StreamEnd, tag(b"endstream")),
        value(Token::StreamStart, tag(b"stream")),
        value(Token::ObjStart, tag(b"obj")),
        value(Token::R, tag(b"R")),
    ))(input)?;

    // Bare words must end at a delimiter so "Rx" or "nullx" is not accepted.
    let is_word = !matches!(token, Token::DictStart | Token::DictEnd | Token::ArrayStart | Token::ArrayEnd);
    if is_word {
        if let Some(&next) = rest.first() {
            if !is_whitespace(next) && !is_delimiter(next) {
                return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag)));
            }
        }
    }
    Ok((rest, token))
}

/// Parse a single token after skipping whitespace and comments.
pub fn token(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let input = skip_ws(input);
    alt((keyword, name, number, literal_string, hex_string))(input)
}

/// Parse an unsigned decimal integer (used by line-oriented xref parsing).
pub fn unsigned(input: &[u8]) -> IResult<&[u8], u64> {
    let input = skip_ws(input);
    let (rest, digits) = take_while1(|c: u8| c.is_ascii_digit())(input)?;
    let text = std::str::from_utf8(digits)
        .map_err(|_| nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit)))?;
    let n = text
        .parse::<u64>()
        .map_err(|_| nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit)))?;
    Ok((rest, n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers() {
        assert_eq!(token(b"42"), Ok((&b""[..], Token::Integer(42))));
        assert_eq!(token(b"-17 "), Ok((&b" "[..], Token::Integer(-17))));
        assert_eq!(token(b"+.5"), Ok((&b""[..], Token::Real(0.5))));
        assert_eq!(token(b"5."), Ok((&b""[..], Token::Real(5.0))));
        assert_eq!(token(b"0000001234"), Ok((&b""[..], Token::Integer(1234))));
    }

    #[test]
    fn test_strings() {
        assert_eq!(token(b"(a (b) c)"), Ok((&b""[..], Token::LiteralString(b"a (b) c"))));
        assert_eq!(token(b"(esc \\) x)"), Ok((&b""[..], Token::LiteralString(b"esc \\) x"))));
        assert_eq!(token(b"<48 65>"), Ok((&b""[..], Token::HexString(b"48 65"))));
    }

    #[test]
    fn test_names_and_escapes() {
        assert_eq!(token(b"/Type/Sig"), Ok((&b"/Sig"[..], Token::Name("Type".to_string()))));
        assert_eq!(token(b"/adbe.pkcs7.detached"), Ok((&b""[..], Token::Name("adbe.pkcs7.detached".to_string()))));
        assert_eq!(decode_name_escapes(b"A#20B"), "A B");
        assert_eq!(decode_name_escapes(b"A#"), "A#");
    }

    #[test]
    fn test_keywords_and_delimiters() {
        assert_eq!(token(b"<<"), Ok((&b""[..], Token::DictStart)));
        assert_eq!(token(b"endstream\n"), Ok((&b"\n"[..], Token::StreamEnd)));
        assert_eq!(token(b"endobj"), Ok((&b""[..], Token::ObjEnd)));
        assert_eq!(token(b" R]"), Ok((&b"]"[..], Token::R)));
        assert!(token(b"Rx").is_err());
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(token(b"% header\n  7"), Ok((&b""[..], Token::Integer(7))));
        assert_eq!(skip_ws(b"  %c\r\n%d\nX"), b"X");
    }

    #[test]
    fn test_unsigned() {
        assert_eq!(unsigned(b" 0000012345 00000 n"), Ok((&b" 00000 n"[..], 12345)));
    }
}
