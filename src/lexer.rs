//! PDF lexer (tokenizer).
//!
//! Splits a byte slice into PDF tokens: numbers, literal and hex strings,
//! names, keywords and delimiters. Whitespace (space, \t, \r, \n, \0, \f)
//! and comments (% to end of line) between tokens are skipped.

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_till, take_while},
    character::complete::{char, digit1, one_of},
    combinator::{map, opt, value},
    sequence::{delimited, preceded},
};

/// Token types recognized by the PDF lexer.
#[derive(Debug, PartialEq, Clone)]
pub enum Token<'a> {
    /// Integer number (e.g., 42, -123)
    Integer(i64),
    /// Real number (e.g., 3.14, -2.5, .5)
    Real(f64),
    /// Literal string bytes, escapes not yet decoded
    LiteralString(&'a [u8]),
    /// Hexadecimal string digits, whitespace preserved
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
    /// `R` (as in `10 0 R`)
    R,
}

/// Whether a byte is PDF whitespace.
pub fn is_whitespace(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | b'\n' | 0x00 | 0x0C)
}

/// Whether a byte is a PDF delimiter.
pub fn is_delimiter(c: u8) -> bool {
    matches!(c, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

fn whitespace(input: &[u8]) -> IResult<&[u8], ()> {
    let (remaining, ws) = take_while(is_whitespace)(input)?;
    if ws.is_empty() {
        return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Space)));
    }
    Ok((remaining, ()))
}

fn comment(input: &[u8]) -> IResult<&[u8], ()> {
    value((), preceded(char('%'), take_till(|c| c == b'\r' || c == b'\n')))(input)
}

/// Skip any run of whitespace and comments.
pub fn skip_ws(input: &[u8]) -> &[u8] {
    let mut remaining = input;
    loop {
        if let Ok((rest, _)) = whitespace(remaining) {
            remaining = rest;
        } else if let Ok((rest, _)) = comment(remaining) {
            remaining = rest;
        } else {
            return remaining;
        }
    }
}

fn digit_error(input: &[u8]) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit))
}

/// Parse an integer or real number. Leading sign and a leading or trailing
/// decimal point are allowed (`+17`, `.5`, `4.`).
fn parse_number(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (input, sign) = opt(one_of("+-"))(input)?;
    let (input, int_part) = opt(digit1)(input)?;
    let (input, frac_part) = opt(preceded(char('.'), opt(digit1)))(input)?;

    if int_part.is_none() && frac_part.is_none() {
        return Err(digit_error(input));
    }

    let negative = sign == Some('-');
    let int_str = match int_part {
        Some(bytes) => std::str::from_utf8(bytes).map_err(|_| digit_error(input))?,
        None => "0",
    };

    match frac_part {
        Some(frac) => {
            let frac_str = match frac {
                Some(bytes) => std::str::from_utf8(bytes).map_err(|_| digit_error(input))?,
                None => "0",
            };
            let num: f64 = format!("{}.{}", int_str, frac_str)
                .parse()
                .map_err(|_| digit_error(input))?;
            Ok((input, Token::Real(if negative { -num } else { num })))
        },
        None => {
            let num: i64 = int_str.parse().map_err(|_| digit_error(input))?;
            Ok((input, Token::Integer(if negative { -num } else { num })))
        },
    }
}

/// Parse a literal string `( ... )` with balanced parentheses.
///
/// Escape sequences are skipped over but left undecoded; the parser decodes them.
fn parse_literal_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (remaining, _) = char('(')(input)?;
    let mut depth = 1;
    let mut pos = 0;

    while depth > 0 && pos < remaining.len() {
        match remaining[pos] {
            b'\\' => pos += 2,
            b'(' => {
                depth += 1;
                pos += 1;
            },
            b')' => {
                depth -= 1;
                pos += 1;
            },
            _ => pos += 1,
        }
    }

    if depth != 0 || pos > remaining.len() {
        return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag)));
    }

    Ok((&remaining[pos..], Token::LiteralString(&remaining[..pos - 1])))
}

/// Parse a hexadecimal string `< ... >`.
fn parse_hex_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
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

/// Decode `#XX` escape sequences in PDF names.
///
/// ```
/// # use pdf_ltv::lexer::decode_name_escapes;
/// assert_eq!(decode_name_escapes("A#20B#23C"), "A B#C");
/// assert_eq!(decode_name_escapes("Type"), "Type");
/// assert_eq!(decode_name_escapes("A#"), "A#");
/// ```
pub fn decode_name_escapes(name: &str) -> String {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'#' && i + 2 < bytes.len() {
            let decoded = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(byte) = decoded {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn parse_name(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    preceded(
        char('/'),
        map(
            take_while(|c: u8| !is_whitespace(c) && !is_delimiter(c)),
            |bytes| Token::Name(decode_name_escapes(&String::from_utf8_lossy(bytes))),
        ),
    )(input)
}

/// Keywords and delimiters. Longer forms are tried before their prefixes.
fn parse_keyword(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    alt((
        value(Token::False, tag(b"false")),
        value(Token::True, tag(b"true")),
        value(Token::Null, tag(b"null")),
        value(Token::ObjStart, tag(b"obj")),
        value(Token::ObjEnd, tag(b"endobj")),
        value(Token::StreamEnd, tag(b"endstream")),
        value(Token::StreamStart, tag(b"stream")),
        value(Token::DictStart, tag(b"<<")),
        value(Token::DictEnd, tag(b">>")),
        value(Token::ArrayStart, tag(b"[")),
        value(Token::ArrayEnd, tag(b"]")),
        value(Token::R, tag(b"R")),
    ))(input)
}

/// Parse a single PDF token after skipping whitespace and comments.
pub fn token(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let input = skip_ws(input);
    alt((parse_keyword, parse_name, parse_number, parse_literal_string, parse_hex_string))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_integers() {
        assert_eq!(token(b"42"), Ok((&b""[..], Token::Integer(42))));
        assert_eq!(token(b"-123"), Ok((&b""[..], Token::Integer(-123))));
        assert_eq!(token(b"+17"), Ok((&b""[..], Token::Integer(17))));
    }

    #[test]
    fn test_parse_reals() {
        assert_eq!(token(b"-2.5"), Ok((&b""[..], Token::Real(-2.5))));
        assert_eq!(token(b".5"), Ok((&b""[..], Token::Real(0.5))));
        assert_eq!(token(b"4."), Ok((&b""[..], Token::Real(4.0))));
    }

    #[test]
    fn test_parse_literal_string_nested() {
        let result = token(b"(Hello (World)) rest");
        assert_eq!(result, Ok((&b" rest"[..], Token::LiteralString(b"Hello (World)"))));
    }

    #[test]
    fn test_parse_literal_string_escaped_paren() {
        let result = token(b"(a\\)b)");
        assert_eq!(result, Ok((&b""[..], Token::LiteralString(b"a\\)b"))));
    }

    #[test]
    fn test_parse_hex_string() {
        assert_eq!(token(b"<48 65>"), Ok((&b""[..], Token::HexString(b"48 65"))));
    }

    #[test]
    fn test_dict_start_is_not_hex() {
        assert_eq!(token(b"<< /A 1 >>").unwrap().1, Token::DictStart);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(token(b"/Type"), Ok((&b""[..], Token::Name("Type".to_string()))));
        assert_eq!(
            token(b"/ETSI.CAdES.detached"),
            Ok((&b""[..], Token::Name("ETSI.CAdES.detached".to_string())))
        );
        assert_eq!(token(b"/A#20B"), Ok((&b""[..], Token::Name("A B".to_string()))));
    }

    #[test]
    fn test_name_stops_at_delimiter() {
        let (rest, tok) = token(b"/Contents<00>").unwrap();
        assert_eq!(tok, Token::Name("Contents".to_string()));
        assert_eq!(rest, b"<00>");
    }

    #[test]
    fn test_keywords() {
        assert_eq!(token(b"endstream").unwrap().1, Token::StreamEnd);
        assert_eq!(token(b"stream").unwrap().1, Token::StreamStart);
        assert_eq!(token(b"endobj").unwrap().1, Token::ObjEnd);
        assert_eq!(token(b"R").unwrap().1, Token::R);
    }

    #[test]
    fn test_skips_comments() {
        assert_eq!(token(b"% comment\n  42").unwrap().1, Token::Integer(42));
    }
}
