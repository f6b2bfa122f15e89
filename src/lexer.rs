//! PDF lexer (tokenizer).
//!
//! Low-level tokenization of PDF byte streams with `nom`. Whitespace
//! (space, \t, \r, \n, \0, \f) and comments (% to EOL) between tokens are
//! skipped; escape sequences in literal strings are left for the parser.

use nom::{
    branch::alt,
    bytes::complete::{take_till, take_while, take_while1},
    character::complete::{char, digit1, one_of},
    combinator::{map, opt, recognize},
    error::{Error as NomError, ErrorKind},
    sequence::{delimited, pair, preceded},
    IResult,
};

/// Token types recognized by the PDF lexer.
#[derive(Debug, PartialEq, Clone)]
pub enum Token<'a> {
    /// Integer number (e.g. 42, -123)
    Integer(i64),
    /// Real number (e.g. 3.14, -.5)
    Real(f64),
    /// Raw literal string content between the outer parentheses
    LiteralString(&'a [u8]),
    /// Raw hex string content between `<` and `>`
    HexString(&'a [u8]),
    /// Name with `#xx` escapes decoded, without the leading slash
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
    /// Any other run of regular characters (`xref`, `trailer`, `n`, ...)
    Keyword(&'a [u8]),
}

/// PDF whitespace characters.
pub fn is_whitespace(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | b'\n' | 0x00 | 0x0C)
}

/// PDF delimiter characters.
pub fn is_delimiter(c: u8) -> bool {
    matches!(c, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

fn is_regular(c: u8) -> bool {
    !is_whitespace(c) && !is_delimiter(c)
}

fn comment(input: &[u8]) -> IResult<&[u8], &[u8]> {
    preceded(char('%'), take_till(|c| c == b'\r' || c == b'\n'))(input)
}

/// Skip any amount of whitespace and comments.
pub fn skip_ws(input: &[u8]) -> IResult<&[u8], ()> {
    let mut remaining = input;
    loop {
        let (rest, _) = take_while(is_whitespace)(remaining)?;
        match comment(rest) {
            Ok((after, _)) => remaining = after,
            Err(_) => return Ok((rest, ())),
        }
    }
}

fn parse_number(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, text) = recognize(pair(
        opt(one_of("+-")),
        alt((
            recognize(pair(digit1, opt(pair(char('.'), opt(digit1))))),
            recognize(pair(char('.'), digit1)),
        )),
    ))(input)?;

    let fail = || nom::Err::Error(NomError::new(input, ErrorKind::Digit));
    let text = std::str::from_utf8(text).map_err(|_| fail())?;

    if text.contains('.') {
        let value: f64 = text.trim_start_matches('+').parse().map_err(|_| fail())?;
        Ok((rest, Token::Real(value)))
    } else {
        // Out-of-range integers degrade to reals.
        match text.trim_start_matches('+').parse::<i64>() {
            Ok(v) => Ok((rest, Token::Integer(v))),
            Err(_) => text.parse::<f64>().map(|v| (rest, Token::Real(v))).map_err(|_| fail()),
        }
    }
}

fn parse_literal_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (body, _) = char('(')(input)?;
    let mut depth = 1usize;
    let mut pos = 0usize;

    while pos < body.len() {
        match body[pos] {
            b'\\' => pos += 2,
            b'(' => {
                depth += 1;
                pos += 1;
            },
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&body[pos + 1..], Token::LiteralString(&body[..pos])));
                }
                pos += 1;
            },
            _ => pos += 1,
        }
    }

    Err(nom::Err::Error(NomError::new(input, ErrorKind::Char)))
}

fn parse_hex_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    if input.starts_with(b"<<") {
        return Err(nom::Err::Error(NomError::new(input, ErrorKind::Tag)));
    }
    delimited(
        char('<'),
        map(take_while(|c: u8| c.is_ascii_hexdigit() || is_whitespace(c)), Token::HexString),
        char('>'),
    )(input)
}

/// Decode `#xx` escape sequences in a name. Invalid sequences are kept as-is.
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
    String::from_utf8(out).unwrap_or_else(|e| e.into_bytes().iter().map(|&b| b as char).collect())
}

fn parse_name(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    preceded(
        char('/'),
        map(take_while(is_regular), |raw: &[u8]| Token::Name(decode_name_escapes(raw))),
    )(input)
}

fn parse_delimiter(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let token = if input.starts_with(b"<<") {
        Token::DictStart
    } else if input.starts_with(b">>") {
        Token::DictEnd
    } else if input.starts_with(b"[") {
        Token::ArrayStart
    } else if input.starts_with(b"]") {
        Token::ArrayEnd
    } else {
        return Err(nom::Err::Error(NomError::new(input, ErrorKind::Tag)));
    };
    let width = if matches!(token, Token::DictStart | Token::DictEnd) { 2 } else { 1 };
    Ok((&input[width..], token))
}

fn parse_keyword(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, word) = take_while1(is_regular)(input)?;
    let token = match word {
        b"true" => Token::True,
        b"false" => Token::False,
        b"null" => Token::Null,
        b"obj" => Token::ObjStart,
        b"endobj" => Token::ObjEnd,
        b"stream" => Token::StreamStart,
        b"endstream" => Token::StreamEnd,
        b"R" => Token::R,
        other => Token::Keyword(other),
    };
    Ok((rest, token))
}

/// Parse a single token, skipping leading whitespace and comments.
pub fn token(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (input, _) = skip_ws(input)?;
    alt((
        parse_delimiter,
        parse_name,
        parse_number,
        parse_literal_string,
        parse_hex_string,
        parse_keyword,
    ))(input)
}
