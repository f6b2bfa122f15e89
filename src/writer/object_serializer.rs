//! PDF object serialization.
//!
//! Output is deterministic: dictionary keys are written in sorted order and
//! reals are printed with at most five decimals. Incremental sections and the
//! canonical content hash both depend on that.

use crate::object::{Dict, Object, ObjectRef};

/// Serializer for PDF objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectSerializer {
    /// Put each dictionary entry on its own line
    pretty: bool,
}

impl ObjectSerializer {
    /// Compact serializer (single spaces between tokens).
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializer that puts dictionary entries on separate lines.
    pub fn pretty() -> Self {
        Self { pretty: true }
    }

    /// Serialize an object to bytes.
    pub fn serialize(&self, obj: &Object) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_object(&mut buf, obj);
        buf
    }

    /// Serialize `id gen obj ... endobj`.
    pub fn serialize_indirect(&self, reference: ObjectRef, obj: &Object) -> Vec<u8> {
        let mut buf = format!("{} {} obj\n", reference.id, reference.gen).into_bytes();
        self.write_object(&mut buf, obj);
        buf.extend_from_slice(b"\nendobj\n");
        buf
    }

    /// Append the serialization of `obj` to `buf`.
    pub fn write_object(&self, buf: &mut Vec<u8>, obj: &Object) {
        match obj {
            Object::Null => buf.extend_from_slice(b"null"),
            Object::Boolean(b) => buf.extend_from_slice(if *b { &b"true"[..] } else { &b"false"[..] }),
            Object::Integer(i) => buf.extend_from_slice(i.to_string().as_bytes()),
            Object::Real(r) => write_real(buf, *r),
            Object::String(s) => write_string(buf, s),
            Object::Name(n) => write_name(buf, n),
            Object::Array(items) => {
                buf.push(b'[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        buf.push(b' ');
                    }
                    self.write_object(buf, item);
                }
                buf.push(b']');
            },
            Object::Dictionary(dict) => self.write_dict(buf, dict),
            Object::Stream { dict, data } => {
                // /Length always reflects the bytes actually written.
                let mut dict = dict.clone();
                dict.insert("Length".to_string(), Object::Integer(data.len() as i64));
                self.write_dict(buf, &dict);
                buf.extend_from_slice(b"\nstream\n");
                buf.extend_from_slice(data);
                buf.extend_from_slice(b"\nendstream");
            },
            Object::Reference(r) => buf.extend_from_slice(format!("{} {} R", r.id, r.gen).as_bytes()),
        }
    }

    fn write_dict(&self, buf: &mut Vec<u8>, dict: &Dict) {
        let mut keys: Vec<&String> = dict.keys().collect();
        keys.sort();

        buf.extend_from_slice(b"<<");
        for key in keys {
            buf.extend_from_slice(if self.pretty { &b"\n  "[..] } else { &b" "[..] });
            write_name(buf, key);
            buf.push(b' ');
            self.write_object(buf, &dict[key]);
        }
        buf.extend_from_slice(if self.pretty && !dict.is_empty() { b"\n>>" } else { b" >>" });
    }
}

/// Write a real with up to five decimals, trailing zeros trimmed.
pub fn write_real(buf: &mut Vec<u8>, value: f64) {
    if !value.is_finite() {
        buf.push(b'0');
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        buf.extend_from_slice((value as i64).to_string().as_bytes());
    } else {
        let formatted = format!("{:.5}", value);
        let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
        buf.extend_from_slice(if trimmed == "-0" { "0" } else { trimmed }.as_bytes());
    }
}

/// Write a string: literal syntax for printable ASCII, hex otherwise.
pub fn write_string(buf: &mut Vec<u8>, data: &[u8]) {
    let printable = data
        .iter()
        .all(|&b| matches!(b, b'\n' | b'\r' | b'\t') || (0x20..=0x7E).contains(&b));

    if printable {
        buf.push(b'(');
        for &byte in data {
            match byte {
                b'(' | b')' | b'\\' => buf.extend_from_slice(&[b'\\', byte]),
                b'\n' => buf.extend_from_slice(b"\\n"),
                b'\r' => buf.extend_from_slice(b"\\r"),
                b'\t' => buf.extend_from_slice(b"\\t"),
                _ => buf.push(byte),
            }
        }
        buf.push(b')');
    } else {
        buf.push(b'<');
        for byte in data {
            buf.extend_from_slice(format!("{:02X}", byte).as_bytes());
        }
        buf.push(b'>');
    }
}

/// Write a name, escaping delimiters, whitespace and non-ASCII as `#xx`.
pub fn write_name(buf: &mut Vec<u8>, name: &str) {
    buf.push(b'/');
    for byte in name.bytes() {
        let regular = (0x21..=0x7E).contains(&byte)
            && !matches!(byte, b'#' | b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%');
        if regular {
            buf.push(byte);
        } else {
            buf.extend_from_slice(format!("#{:02X}", byte).as_bytes());
        }
    }
}

/// Build a dictionary from `(key, value)` pairs.
pub fn dict<'a>(entries: impl IntoIterator<Item = (&'a str, Object)>) -> Dict {
    entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Name object.
pub fn name(s: &str) -> Object {
    Object::Name(s.to_string())
}

/// String object from UTF-8 text (bytes kept as-is).
pub fn text(s: &str) -> Object {
    Object::String(s.as_bytes().to_vec())
}

/// Rectangle array `[x0 y0 x1 y1]`.
pub fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Object {
    Object::Array(vec![Object::Real(x0), Object::Real(y0), Object::Real(x1), Object::Real(y1)])
}
