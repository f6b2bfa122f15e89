//! PDF object parser.
//!
//! Recursive-descent parser built on the token stream from [`crate::lexer`].
//! Produces [`Object`] values, including streams and indirect objects.

use crate::error::{Error, Result};
use crate::lexer::{skip_ws, token, Token};
use crate::object::{Dict, Object, ObjectRef};
use nom::error::{Error as NomError, ErrorKind};
use nom::IResult;

/// Nesting depth at which arrays/dictionaries are rejected.
const MAX_DEPTH: usize = 256;

/// Decode escape sequences in the raw content of a literal string.
///
/// Handles `\n \r \t \b \f \( \) \\`, octal `\ddd` and line continuations.
/// An unknown escape keeps the following character and drops the backslash.
pub fn decode_literal_string(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut iter = raw.iter().copied().peekable();

    while let Some(c) = iter.next() {
        if c != b'\\' {
            out.push(c);
            continue;
        }
        let Some(next) = iter.next() else { break };
        match next {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0C),
            b'\n' => {},
            b'\r' => {
                if iter.peek() == Some(&b'\n') {
                    iter.next();
                }
            },
            b'0'..=b'7' => {
                let mut value = (next - b'0') as u32;
                for _ in 0..2 {
                    match iter.peek() {
                        Some(&d @ b'0'..=b'7') => {
                            value = value * 8 + (d - b'0') as u32;
                            iter.next();
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

/// Decode the raw content of a hex string. Whitespace is ignored and an odd
/// trailing digit is padded with `0`.
pub fn decode_hex(raw: &[u8]) -> Result<Vec<u8>> {
    let digits: Vec<u8> = raw.iter().copied().filter(|c| !c.is_ascii_whitespace()).collect();
    digits
        .chunks(2)
        .map(|pair| {
            let text = if pair.len() == 2 {
                [pair[0], pair[1]]
            } else {
                [pair[0], b'0']
            };
            std::str::from_utf8(&text)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| Error::Decode(format!("invalid hex string digit in {:?}", text)))
        })
        .collect()
}

fn nom_fail(input: &[u8], kind: ErrorKind) -> nom::Err<NomError<&[u8]>> {
    nom::Err::Error(NomError::new(input, kind))
}

/// Parse one direct object (a stream when a dictionary is followed by `stream`).
pub fn parse_object(input: &[u8]) -> IResult<&[u8], Object> {
    parse_nested(input, 0)
}

fn parse_nested(input: &[u8], depth: usize) -> IResult<&[u8], Object> {
    if depth > MAX_DEPTH {
        return Err(nom::Err::Failure(NomError::new(input, ErrorKind::TooLarge)));
    }

    let (rest, tok) = token(input)?;
    match tok {
        Token::Null => Ok((rest, Object::Null)),
        Token::True => Ok((rest, Object::Boolean(true))),
        Token::False => Ok((rest, Object::Boolean(false))),
        Token::Real(r) => Ok((rest, Object::Real(r))),
        Token::Name(name) => Ok((rest, Object::Name(name))),
        Token::LiteralString(raw) => Ok((rest, Object::String(decode_literal_string(raw)))),
        Token::HexString(raw) => decode_hex(raw)
            .map(|bytes| (rest, Object::String(bytes)))
            .map_err(|_| nom::Err::Failure(NomError::new(input, ErrorKind::HexDigit))),
        Token::Integer(id) => {
            // `id gen R` is a reference; anything else leaves the integer alone.
            if let Ok((after_gen, Token::Integer(gen))) = token(rest) {
                if let Ok((after_r, Token::R)) = token(after_gen) {
                    if id >= 0 && (0..=u16::MAX as i64).contains(&gen) {
                        return Ok((after_r, Object::Reference(ObjectRef::new(id as u32, gen as u16))));
                    }
                }
            }
            Ok((rest, Object::Integer(id)))
        },
        Token::ArrayStart => {
            let mut items = Vec::new();
            let mut cursor = rest;
            loop {
                if let Ok((after, Token::ArrayEnd)) = token(cursor) {
                    return Ok((after, Object::Array(items)));
                }
                let (after, item) = parse_nested(cursor, depth + 1)?;
                items.push(item);
                cursor = after;
            }
        },
        Token::DictStart => {
            let (after_dict, dict) = parse_dict_body(rest, depth)?;
            match token(after_dict) {
                Ok((after_kw, Token::StreamStart)) => {
                    let (after_stream, data) = parse_stream_data(after_kw, &dict)?;
                    Ok((
                        after_stream,
                        Object::Stream {
                            dict,
                            data: bytes::Bytes::copy_from_slice(data),
                        },
                    ))
                },
                _ => Ok((after_dict, Object::Dictionary(dict))),
            }
        },
        _ => Err(nom_fail(input, ErrorKind::Tag)),
    }
}

fn parse_dict_body(input: &[u8], depth: usize) -> IResult<&[u8], Dict> {
    let mut dict = Dict::new();
    let mut cursor = input;
    loop {
        let (after_key, tok) = token(cursor)?;
        match tok {
            Token::DictEnd => return Ok((after_key, dict)),
            Token::Name(key) => {
                let (after_value, value) = parse_nested(after_key, depth + 1)?;
                // A null value is equivalent to an absent key.
                if !value.is_null() {
                    dict.insert(key, value);
                }
                cursor = after_value;
            },
            _ => return Err(nom_fail(cursor, ErrorKind::Tag)),
        }
    }
}

/// Read stream bytes after the `stream` keyword.
///
/// A direct integer `/Length` is trusted when `endstream` follows it; in all
/// other cases the data runs to the next `endstream`, minus the EOL before it.
fn parse_stream_data<'a>(input: &'a [u8], dict: &Dict) -> IResult<&'a [u8], &'a [u8]> {
    let body = if let Some(rest) = input.strip_prefix(b"\r\n") {
        rest
    } else if let Some(rest) = input.strip_prefix(b"\n").or_else(|| input.strip_prefix(b"\r")) {
        rest
    } else {
        input
    };

    if let Some(len) = dict.get("Length").and_then(|o| o.as_integer()) {
        let len = len.max(0) as usize;
        if len <= body.len() {
            if let Ok((after_ws, ())) = skip_ws(&body[len..]) {
                if let Some(rest) = after_ws.strip_prefix(b"endstream") {
                    return Ok((rest, &body[..len]));
                }
            }
        }
        log::debug!("stream /Length {} does not reach endstream, scanning", len);
    }

    let pos = find_keyword(body, b"endstream").ok_or_else(|| nom_fail(body, ErrorKind::Eof))?;
    let mut data = &body[..pos];
    if let Some(trimmed) = data.strip_suffix(b"\n") {
        data = trimmed;
    }
    if let Some(trimmed) = data.strip_suffix(b"\r") {
        data = trimmed;
    }
    Ok((&body[pos + b"endstream".len()..], data))
}

/// Position of the first occurrence of `keyword` in `haystack`.
pub(crate) fn find_keyword(haystack: &[u8], keyword: &[u8]) -> Option<usize> {
    haystack.windows(keyword.len()).position(|w| w == keyword)
}

/// Parse `id gen obj <object> endobj`.
///
/// A missing `endobj` is tolerated.
pub fn parse_indirect_object(input: &[u8]) -> IResult<&[u8], (ObjectRef, Object)> {
    let (rest, id) = token(input)?;
    let (rest, gen) = token(rest)?;
    let (rest, kw) = token(rest)?;
    let reference = match (id, gen, kw) {
        (Token::Integer(id), Token::Integer(gen), Token::ObjStart) if id >= 0 && gen >= 0 => {
            ObjectRef::new(id as u32, gen as u16)
        },
        _ => return Err(nom_fail(input, ErrorKind::Tag)),
    };

    let (rest, object) = parse_object(rest)?;
    match token(rest) {
        Ok((after, Token::ObjEnd)) => Ok((after, (reference, object))),
        _ => Ok((rest, (reference, object))),
    }
}

/// Parse the indirect object that starts at `offset` and check its identity.
pub fn parse_indirect_at(data: &[u8], offset: usize, expected: ObjectRef) -> Result<Object> {
    let slice = data.get(offset..).ok_or_else(|| Error::ParseError {
        offset,
        reason: "offset beyond end of file".to_string(),
    })?;
    let (_, (found, object)) = parse_indirect_object(slice).map_err(|e| Error::ParseError {
        offset,
        reason: format!("expected object {}: {:?}", expected, e.map(|e| e.code)),
    })?;
    if found.id != expected.id {
        return Err(Error::ParseError {
            offset,
            reason: format!("expected object {}, found {}", expected, found),
        });
    }
    Ok(object)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &[u8]) -> Object {
        parse_object(input).unwrap().1
    }

    #[test]
    fn test_literal_string_escapes() {
        assert_eq!(decode_literal_string(b"a\\nb"), b"a\nb");
        assert_eq!(decode_literal_string(b"\\(x\\)"), b"(x)");
        assert_eq!(decode_literal_string(b"Section \\247"), b"Section \xa7");
        assert_eq!(decode_literal_string(b"split\\\r\nline"), b"splitline");
        assert_eq!(decode_literal_string(b"\\q"), b"q");
    }

    #[test]
    fn test_hex_decoding() {
        assert_eq!(decode_hex(b"48 65 6C6C 6F").unwrap(), b"Hello");
        assert_eq!(decode_hex(b"7").unwrap(), vec![0x70]);
        assert!(decode_hex(b"ZZ").is_err());
    }

    #[test]
    fn test_reference_vs_integers() {
        assert_eq!(parse(b"10 0 R"), Object::Reference(ObjectRef::new(10, 0)));
        let arr = parse(b"[1 2 3 0 R 4]");
        assert_eq!(
            arr,
            Object::Array(vec![
                Object::Integer(1),
                Object::Integer(2),
                Object::Reference(ObjectRef::new(3, 0)),
                Object::Integer(4),
            ])
        );
    }

    #[test]
    fn test_dictionary_drops_null_values() {
        let obj = parse(b"<< /Type /Page /Gone null /Box [0 0 612 792] >>");
        let dict = obj.as_dict().unwrap();
        assert_eq!(dict.get("Type").and_then(|o| o.as_name()), Some("Page"));
        assert!(!dict.contains_key("Gone"));
        assert_eq!(dict.get("Box").and_then(|o| o.as_array()).map(|a| a.len()), Some(4));
    }

    #[test]
    fn test_stream_with_direct_length() {
        let obj = parse(b"<< /Length 5 >>\nstream\nHello\nendstream");
        match obj {
            Object::Stream { data, .. } => assert_eq!(&data[..], b"Hello"),
            other => panic!("expected stream, got {:?}", other),
        }
    }

    #[test]
    fn test_stream_with_indirect_length_scans_for_endstream() {
        let obj = parse(b"<< /Length 9 0 R >>\r\nstream\r\nabc def\r\nendstream");
        match obj {
            Object::Stream { data, .. } => assert_eq!(&data[..], b"abc def"),
            other => panic!("expected stream, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_length_falls_back_to_scan() {
        let obj = parse(b"<< /Length 2 >>\nstream\nHello\nendstream");
        match obj {
            Object::Stream { data, .. } => assert_eq!(&data[..], b"Hello"),
            other => panic!("expected stream, got {:?}", other),
        }
    }

    #[test]
    fn test_indirect_object() {
        let (_, (r, obj)) = parse_indirect_object(b"12 0 obj\n<< /A 1 >>\nendobj\n").unwrap();
        assert_eq!(r, ObjectRef::new(12, 0));
        assert_eq!(obj.as_dict().unwrap().get("A"), Some(&Object::Integer(1)));
    }

    #[test]
    fn test_parse_indirect_at_checks_identity() {
        let data = b"%PDF-1.7\n3 0 obj 42 endobj";
        assert_eq!(parse_indirect_at(data, 9, ObjectRef::new(3, 0)).unwrap(), Object::Integer(42));
        assert!(parse_indirect_at(data, 9, ObjectRef::new(4, 0)).is_err());
        assert!(parse_indirect_at(data, 999, ObjectRef::new(3, 0)).is_err());
    }

    #[test]
    fn test_unbalanced_array_fails() {
        assert!(parse_object(b"[1 2").is_err());
    }
}
