//! PDF object parser.
//!
//! Recursive descent over lexer tokens: primitives, arrays, dictionaries,
//! streams, references and `N G obj ... endobj` wrappers.

use crate::error::{Error, Result};
use crate::lexer::{Token, token};
use crate::object::{Dictionary, Object, ObjectRef};
use nom::IResult;
use std::collections::HashMap;

/// Maximum nesting of arrays and dictionaries.
const MAX_NESTING: usize = 256;

/// Decode escape sequences in PDF literal strings.
///
/// ```
/// # use pdf_ltv::parser::decode_literal_string_escapes;
/// assert_eq!(decode_literal_string_escapes(b"Section \\247 1"), b"Section \xa7 1");
/// assert_eq!(decode_literal_string_escapes(b"a\\(b\\)"), b"a(b)");
/// ```
pub fn decode_literal_string_escapes(raw: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(raw.len());
    let mut i = 0;

    while i < raw.len() {
        if raw[i] != b'\\' || i + 1 >= raw.len() {
            result.push(raw[i]);
            i += 1;
            continue;
        }

        let escaped = raw[i + 1];
        i += 2;
        match escaped {
            b'n' => result.push(b'\n'),
            b'r' => result.push(b'\r'),
            b't' => result.push(b'\t'),
            b'b' => result.push(8),
            b'f' => result.push(12),
            b'(' | b')' | b'\\' => result.push(escaped),
            // Line continuation
            b'\n' => {},
            b'\r' => {
                if raw.get(i) == Some(&b'\n') {
                    i += 1;
                }
            },
            b'0'..=b'7' => {
                let mut value = (escaped - b'0') as u32;
                let mut digits = 1;
                while digits < 3 && i < raw.len() && (b'0'..=b'7').contains(&raw[i]) {
                    value = value * 8 + (raw[i] - b'0') as u32;
                    i += 1;
                    digits += 1;
                }
                result.push((value & 0xFF) as u8);
            },
            // Unknown escape: the backslash is dropped
            other => result.push(other),
        }
    }

    result
}

/// Parse a PDF object from input bytes.
///
/// ```
/// use pdf_ltv::parser::parse_object;
///
/// let (_, obj) = parse_object(b"<< /Type /Sig /ByteRange [0 10 20 30] >>").unwrap();
/// assert_eq!(obj.dict_type(), Some("Sig"));
/// ```
pub fn parse_object(input: &[u8]) -> IResult<&[u8], Object> {
    parse_object_nested(input, 0)
}

fn parse_object_nested(input: &[u8], depth: usize) -> IResult<&[u8], Object> {
    if depth > MAX_NESTING {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::TooLarge,
        )));
    }

    let (input, tok) = token(input)?;

    match tok {
        Token::Null => Ok((input, Object::Null)),
        Token::True => Ok((input, Object::Boolean(true))),
        Token::False => Ok((input, Object::Boolean(false))),
        Token::Integer(i) => {
            // `id gen R` is a reference; otherwise a plain integer
            if let Ok((after_gen, Token::Integer(gen))) = token(input) {
                if let Ok((after_r, Token::R)) = token(after_gen) {
                    return Ok((after_r, Object::Reference(ObjectRef::new(i as u32, gen as u16))));
                }
            }
            Ok((input, Object::Integer(i)))
        },
        Token::Real(r) => Ok((input, Object::Real(r))),
        Token::LiteralString(bytes) => {
            Ok((input, Object::String(decode_literal_string_escapes(bytes))))
        },
        Token::HexString(hex_bytes) => match decode_hex(hex_bytes) {
            Ok(decoded) => Ok((input, Object::String(decoded))),
            Err(_) => Err(nom::Err::Failure(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Fail,
            ))),
        },
        Token::Name(name) => Ok((input, Object::Name(name))),
        Token::ArrayStart => parse_array(input, depth),
        Token::DictStart => {
            let (remaining, dict) = parse_dictionary(input, depth)?;
            if let Ok((stream_input, Token::StreamStart)) = token(remaining) {
                let (rest, data) = parse_stream_data(stream_input, &dict)?;
                return Ok((
                    rest,
                    Object::Stream {
                        dict,
                        data: bytes::Bytes::from(data),
                    },
                ));
            }
            Ok((remaining, Object::Dictionary(dict)))
        },
        _ => Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag))),
    }
}

/// Parse stream data after the `stream` keyword.
///
/// A direct `/Length` is trusted when it lands on `endstream`; otherwise the
/// data runs up to the next `endstream` keyword minus its end-of-line marker.
fn parse_stream_data<'a>(input: &'a [u8], dict: &Dictionary) -> IResult<&'a [u8], Vec<u8>> {
    let input = if input.starts_with(b"\r\n") {
        &input[2..]
    } else if input.starts_with(b"\n") || input.starts_with(b"\r") {
        &input[1..]
    } else {
        log::warn!("No end-of-line after stream keyword");
        input
    };

    if let Some(length) = dict.get("Length").and_then(|o| o.as_integer()) {
        let length = length.max(0) as usize;
        if length <= input.len() {
            if let Ok((rest, Token::StreamEnd)) = token(&input[length..]) {
                return Ok((rest, input[..length].to_vec()));
            }
        }
        log::debug!("Stream /Length {} does not end at endstream, scanning", length);
    }

    match find_endstream(input) {
        Some(pos) => {
            let mut end = pos;
            if end > 0 && input[end - 1] == b'\n' {
                end -= 1;
            }
            if end > 0 && input[end - 1] == b'\r' {
                end -= 1;
            }
            Ok((&input[pos + b"endstream".len()..], input[..end].to_vec()))
        },
        None => Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Eof))),
    }
}

fn find_endstream(input: &[u8]) -> Option<usize> {
    let keyword = b"endstream";
    input.windows(keyword.len()).position(|window| window == keyword)
}

fn parse_array(input: &[u8], depth: usize) -> IResult<&[u8], Object> {
    let mut objects = Vec::new();
    let mut remaining = input;

    loop {
        if let Ok((rest, Token::ArrayEnd)) = token(remaining) {
            return Ok((rest, Object::Array(objects)));
        }
        let (rest, obj) = parse_object_nested(remaining, depth + 1)?;
        objects.push(obj);
        remaining = rest;
    }
}

fn parse_dictionary(input: &[u8], depth: usize) -> IResult<&[u8], Dictionary> {
    let mut dict = HashMap::new();
    let mut remaining = input;

    loop {
        let (rest, tok) = token(remaining)?;
        match tok {
            Token::DictEnd => return Ok((rest, dict)),
            Token::Name(key) => {
                let (rest, value) = parse_object_nested(rest, depth + 1)?;
                // A null value is equivalent to an absent key
                if !value.is_null() {
                    dict.insert(key, value);
                }
                remaining = rest;
            },
            _ => {
                return Err(nom::Err::Error(nom::error::Error::new(
                    remaining,
                    nom::error::ErrorKind::Tag,
                )));
            },
        }
    }
}

/// Parse an indirect object definition: `id gen obj <object> endobj`.
///
/// `offset` is only used for error reporting.
pub fn parse_indirect_object(input: &[u8], offset: usize) -> Result<(ObjectRef, Object)> {
    let err = |reason: &str| Error::ParseError {
        offset,
        reason: reason.to_string(),
    };

    let (rest, id) = match token(input) {
        Ok((rest, Token::Integer(id))) if id >= 0 => (rest, id as u32),
        _ => return Err(err("expected object number")),
    };
    let (rest, gen) = match token(rest) {
        Ok((rest, Token::Integer(gen))) if gen >= 0 => (rest, gen as u16),
        _ => return Err(err("expected generation number")),
    };
    let rest = match token(rest) {
        Ok((rest, Token::ObjStart)) => rest,
        _ => return Err(err("expected 'obj' keyword")),
    };

    let (_, obj) = parse_object(rest).map_err(|e| Error::ParseError {
        offset,
        reason: format!("object {} {}: {:?}", id, gen, e),
    })?;

    Ok((ObjectRef::new(id, gen), obj))
}

/// Decode a hex string to bytes. Whitespace is ignored; an odd trailing
/// digit is padded with 0.
///
/// ```
/// use pdf_ltv::parser::decode_hex;
///
/// assert_eq!(decode_hex(b"48656C6C6F").unwrap(), b"Hello");
/// assert_eq!(decode_hex(b"7").unwrap(), vec![0x70]);
/// ```
pub fn decode_hex(hex_bytes: &[u8]) -> Result<Vec<u8>> {
    let mut digits: Vec<u8> = hex_bytes
        .iter()
        .filter(|c| !c.is_ascii_whitespace())
        .copied()
        .collect();
    if digits.len() % 2 == 1 {
        digits.push(b'0');
    }

    hex::decode(&digits).map_err(|e| Error::ParseError {
        offset: 0,
        reason: format!("Invalid hex string: {}", e),
    })
}
