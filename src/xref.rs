//! Cross-reference parsing.
//!
//! Locates `startxref`, then walks the chain of cross-reference sections from
//! newest to oldest through `/Prev` (and `/XRefStm` for hybrid files). Both
//! classic tables and PDF 1.5 cross-reference streams are understood. The
//! first entry seen for an object number wins, so newer sections shadow older
//! ones exactly as an incremental update intends.

use crate::error::{Error, Result};
use crate::lexer::{token, Token};
use crate::object::{Dict, Object};
use crate::parser::{parse_indirect_object, parse_object};
use std::collections::{HashMap, HashSet};

/// Longest `/Prev` chain followed before giving up.
const MAX_SECTIONS: usize = 4096;

/// Where an object lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefEntry {
    /// Deleted or never used
    Free,
    /// Stored directly in the file at `offset`
    InUse {
        /// Byte offset of `id gen obj`
        offset: u64,
        /// Generation number
        gen: u16,
    },
    /// Stored inside an object stream
    Compressed {
        /// Object number of the containing object stream
        stream_id: u32,
        /// Index of the object inside the stream
        index: u32,
    },
}

/// Format of a cross-reference section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefStyle {
    /// Classic `xref` table followed by `trailer`
    Table,
    /// PDF 1.5 cross-reference stream
    Stream,
}

/// Merged cross-reference information for one revision of a file.
#[derive(Debug, Clone)]
pub struct CrossRefTable {
    entries: HashMap<u32, XrefEntry>,
    trailer: Dict,
    style: XrefStyle,
    startxref: u64,
}

impl CrossRefTable {
    /// Entry for `id`, if any section mentions it.
    pub fn get(&self, id: u32) -> Option<XrefEntry> {
        self.entries.get(&id).copied()
    }

    /// Trailer dictionary of the newest section.
    pub fn trailer(&self) -> &Dict {
        &self.trailer
    }

    /// Format of the newest section.
    pub fn style(&self) -> XrefStyle {
        self.style
    }

    /// Offset of the newest section (the value after `startxref`).
    pub fn startxref(&self) -> u64 {
        self.startxref
    }

    /// One past the highest object number in use, or the trailer `/Size` if larger.
    pub fn size(&self) -> u32 {
        let from_entries = self.entries.keys().max().map_or(0, |max| max + 1);
        let from_trailer = self
            .trailer
            .get("Size")
            .and_then(|o| o.as_integer())
            .unwrap_or(0)
            .clamp(0, u32::MAX as i64) as u32;
        from_entries.max(from_trailer)
    }

    /// Number of entries known to this table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are known.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Offset recorded after the last `startxref` keyword in `data`.
pub fn find_startxref(data: &[u8]) -> Result<u64> {
    let pos = data
        .windows(b"startxref".len())
        .rposition(|w| w == b"startxref")
        .ok_or_else(|| Error::InvalidXref("startxref not found".to_string()))?;

    match token(&data[pos + b"startxref".len()..]) {
        Ok((_, Token::Integer(offset))) if offset >= 0 => Ok(offset as u64),
        _ => Err(Error::InvalidXref("startxref is not followed by an offset".to_string())),
    }
}

/// Load the full cross-reference chain of `data`.
pub fn load(data: &[u8]) -> Result<CrossRefTable> {
    let startxref = find_startxref(data)?;
    let mut entries = HashMap::new();
    let mut newest: Option<(Dict, XrefStyle)> = None;
    let mut visited = HashSet::new();
    let mut pending = vec![startxref];

    while let Some(offset) = pending.pop() {
        if !visited.insert(offset) {
            log::warn!("cross-reference section at {} visited twice, ignoring", offset);
            continue;
        }
        if visited.len() > MAX_SECTIONS {
            return Err(Error::InvalidXref("too many cross-reference sections".to_string()));
        }

        let (section, trailer, style) = parse_section(data, offset)?;
        for (id, entry) in section {
            entries.entry(id).or_insert(entry);
        }

        // Hybrid files: the stream named by /XRefStm is consulted before /Prev.
        if let Some(prev) = trailer.get("Prev").and_then(|o| o.as_integer()) {
            pending.push(prev.max(0) as u64);
        }
        if let Some(stm) = trailer.get("XRefStm").and_then(|o| o.as_integer()) {
            pending.push(stm.max(0) as u64);
        }

        if newest.is_none() {
            newest = Some((trailer, style));
        }
    }

    let (trailer, style) =
        newest.ok_or_else(|| Error::InvalidXref("no cross-reference section".to_string()))?;
    log::debug!("loaded {} xref entries ({:?}, startxref {})", entries.len(), style, startxref);

    Ok(CrossRefTable {
        entries,
        trailer,
        style,
        startxref,
    })
}

type Section = (Vec<(u32, XrefEntry)>, Dict, XrefStyle);

fn parse_section(data: &[u8], offset: u64) -> Result<Section> {
    let slice = usize::try_from(offset)
        .ok()
        .and_then(|o| data.get(o..))
        .ok_or_else(|| Error::InvalidXref(format!("section offset {} beyond end of file", offset)))?;

    match token(slice) {
        Ok((rest, Token::Keyword(b"xref"))) => parse_table(rest, offset),
        _ => parse_stream_section(slice, offset),
    }
}

fn parse_table(mut input: &[u8], offset: u64) -> Result<Section> {
    let bad = |what: &str| Error::InvalidXref(format!("xref table at {}: {}", offset, what));
    let mut entries = Vec::new();

    loop {
        let (rest, tok) = token(input).map_err(|_| bad("unexpected end"))?;
        match tok {
            Token::Keyword(b"trailer") => {
                let (_, trailer) = parse_object(rest).map_err(|_| bad("unreadable trailer"))?;
                let trailer = match trailer {
                    Object::Dictionary(d) => d,
                    _ => return Err(bad("trailer is not a dictionary")),
                };
                return Ok((entries, trailer, XrefStyle::Table));
            },
            Token::Integer(start) => {
                let (rest, count) = match token(rest) {
                    Ok((r, Token::Integer(c))) => (r, c),
                    _ => return Err(bad("subsection without count")),
                };
                input = rest;
                for i in 0..count.max(0) {
                    let (r1, t1) = token(input).map_err(|_| bad("truncated entry"))?;
                    let (r2, t2) = token(r1).map_err(|_| bad("truncated entry"))?;
                    let (r3, t3) = token(r2).map_err(|_| bad("truncated entry"))?;
                    let entry = match (t1, t2, t3) {
                        (Token::Integer(off), Token::Integer(gen), Token::Keyword(b"n")) => XrefEntry::InUse {
                            offset: off.max(0) as u64,
                            gen: gen.clamp(0, u16::MAX as i64) as u16,
                        },
                        (Token::Integer(_), Token::Integer(_), Token::Keyword(b"f")) => XrefEntry::Free,
                        _ => return Err(bad("malformed entry")),
                    };
                    match start.checked_add(i).and_then(|n| u32::try_from(n).ok()) {
                        Some(number) => entries.push((number, entry)),
                        None => return Err(bad("object number out of range")),
                    }
                    input = r3;
                }
            },
            _ => return Err(bad("expected subsection or trailer")),
        }
    }
}

fn parse_stream_section(slice: &[u8], offset: u64) -> Result<Section> {
    let bad = |what: String| Error::InvalidXref(format!("xref stream at {}: {}", offset, what));
    let (_, (_, object)) =
        parse_indirect_object(slice).map_err(|_| bad("no xref table or stream here".to_string()))?;

    let dict = match &object {
        Object::Stream { dict, .. } if dict.get("Type").and_then(|o| o.as_name()) == Some("XRef") => dict.clone(),
        other => return Err(bad(format!("expected /Type /XRef stream, found {}", other.type_name()))),
    };

    let widths: Vec<usize> = dict
        .get("W")
        .and_then(|o| o.as_array())
        .map(|arr| arr.iter().map(|w| w.as_integer().unwrap_or(0).max(0) as usize).collect())
        .unwrap_or_default();
    if widths.len() != 3 || widths.iter().any(|&w| w > 8) {
        return Err(bad(format!("invalid /W {:?}", widths)));
    }

    let size = dict.get("Size").and_then(|o| o.as_integer()).unwrap_or(0);
    let index: Vec<i64> = match dict.get("Index").and_then(|o| o.as_array()) {
        Some(arr) => arr.iter().filter_map(|o| o.as_integer()).collect(),
        None => vec![0, size],
    };

    let body = object.decode_stream_data()?;
    let row = widths.iter().sum::<usize>();
    if row == 0 {
        return Err(bad("zero-width rows".to_string()));
    }
    let mut rows = body.chunks_exact(row);
    let mut entries = Vec::new();

    for range in index.chunks(2) {
        let (start, count) = match range {
            [s, c] => (*s, *c),
            _ => break,
        };
        for i in 0..count.max(0) {
            let Some(fields) = rows.next() else {
                log::warn!("xref stream at {} shorter than its /Index", offset);
                break;
            };
            let f1 = read_field(&fields[..widths[0]], 1);
            let f2 = read_field(&fields[widths[0]..widths[0] + widths[1]], 0);
            let f3 = read_field(&fields[widths[0] + widths[1]..], 0);
            let entry = match f1 {
                0 => XrefEntry::Free,
                1 => XrefEntry::InUse {
                    offset: f2,
                    gen: f3.min(u16::MAX as u64) as u16,
                },
                2 => XrefEntry::Compressed {
                    stream_id: f2 as u32,
                    index: f3 as u32,
                },
                _ => continue,
            };
            match start.checked_add(i).and_then(|n| u32::try_from(n).ok()) {
                Some(number) => entries.push((number, entry)),
                None => log::warn!("xref stream at {}: object number out of range", offset),
            }
        }
    }

    Ok((entries, dict, XrefStyle::Stream))
}

/// Big-endian field value; an empty field takes `default`.
fn read_field(bytes: &[u8], default: u64) -> u64 {
    if bytes.is_empty() {
        return default;
    }
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classic_file() -> Vec<u8> {
        let mut pdf = b"%PDF-1.4\n".to_vec();
        let o1 = pdf.len();
        pdf.extend_from_slice(b"1 0 obj << /Type /Catalog >> endobj\n");
        let xref = pdf.len();
        pdf.extend_from_slice(
            format!(
                "xref\n0 2\n0000000000 65535 f \n{:010} 00000 n \ntrailer\n<< /Size 2 /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                o1, xref
            )
            .as_bytes(),
        );
        pdf
    }

    #[test]
    fn test_find_startxref_uses_last_occurrence() {
        let data = b"startxref\n10\n%%EOF\nstartxref\n99\n%%EOF";
        assert_eq!(find_startxref(data).unwrap(), 99);
        assert!(find_startxref(b"no marker").is_err());
    }

    #[test]
    fn test_classic_table() {
        let pdf = classic_file();
        let table = load(&pdf).unwrap();
        assert_eq!(table.style(), XrefStyle::Table);
        assert_eq!(table.get(0), Some(XrefEntry::Free));
        assert_eq!(table.get(1), Some(XrefEntry::InUse { offset: 9, gen: 0 }));
        assert_eq!(table.size(), 2);
        assert!(table.trailer().contains_key("Root"));
    }

    #[test]
    fn test_newer_section_shadows_older() {
        let mut pdf = classic_file();
        let prev = find_startxref(&pdf).unwrap();
        let o1 = pdf.len();
        pdf.extend_from_slice(b"1 0 obj << /Type /Catalog /Updated true >> endobj\n");
        let xref = pdf.len();
        pdf.extend_from_slice(
            format!(
                "xref\n1 1\n{:010} 00000 n \ntrailer\n<< /Size 2 /Root 1 0 R /Prev {} >>\nstartxref\n{}\n%%EOF\n",
                o1, prev, xref
            )
            .as_bytes(),
        );

        let table = load(&pdf).unwrap();
        assert_eq!(table.get(1), Some(XrefEntry::InUse { offset: o1 as u64, gen: 0 }));
        assert_eq!(table.get(0), Some(XrefEntry::Free));
        assert_eq!(table.startxref(), xref as u64);
    }

    #[test]
    fn test_xref_stream() {
        let mut pdf = b"%PDF-1.5\n".to_vec();
        let o1 = pdf.len();
        pdf.extend_from_slice(b"1 0 obj << /Type /Catalog >> endobj\n");
        let xref = pdf.len();
        let rows: Vec<u8> = vec![
            0, 0, 0, 0, 0, 0xFF, 0xFF, // 0: free
            1, 0, 0, 0, o1 as u8, 0, 0, // 1: at o1
            1, 0, 0, 0, xref as u8, 0, 0, // 2: the xref stream itself
        ];
        pdf.extend_from_slice(
            format!(
                "2 0 obj << /Type /XRef /Size 3 /W [1 4 2] /Root 1 0 R /Length {} >>\nstream\n",
                rows.len()
            )
            .as_bytes(),
        );
        pdf.extend_from_slice(&rows);
        pdf.extend_from_slice(format!("\nendstream\nendobj\nstartxref\n{}\n%%EOF\n", xref).as_bytes());

        let table = load(&pdf).unwrap();
        assert_eq!(table.style(), XrefStyle::Stream);
        assert_eq!(table.get(1), Some(XrefEntry::InUse { offset: o1 as u64, gen: 0 }));
        assert_eq!(table.size(), 3);
        assert_eq!(table.trailer().get("W").and_then(|o| o.as_array()).map(|a| a.len()), Some(3));
    }

    #[test]
    fn test_prev_cycle_is_ignored() {
        let mut pdf = b"%PDF-1.4\n".to_vec();
        let xref = pdf.len();
        pdf.extend_from_slice(
            format!("xref\n0 1\n0000000000 65535 f \ntrailer\n<< /Size 1 /Prev {} >>\nstartxref\n{}\n%%EOF", xref, xref)
                .as_bytes(),
        );
        assert_eq!(load(&pdf).unwrap().len(), 1);
    }

    #[test]
    fn test_bad_offset() {
        let data = b"%PDF-1.4\nstartxref\n9999\n%%EOF";
        assert!(matches!(load(data), Err(Error::InvalidXref(_))));
    }
}
