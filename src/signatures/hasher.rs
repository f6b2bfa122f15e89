//! Canonical content hashing.
//!
//! The content hash is a SHA-256 over a canonical serialization of what a
//! reader sees: every page (with inherited attributes), everything reachable
//! from it (content streams decoded, resources, annotations) and the first
//! *k* embedded evidence blocks. The information dictionary, the file `/ID`,
//! the catalog's XMP `/Metadata` and cross-reference layout are not part of
//! it, so metadata housekeeping and re-serialization leave the hash alone.
//!
//! ## Canonical form
//!
//! ```text
//! signflow-content-v1\n
//! pages <n>;  then per page  P<index>; <page dict>
//! evidence <k>;  then per block  e<len>:<decoded bytes>
//! ```
//!
//! Values are tagged and length-prefixed so that no two different object
//! graphs share an encoding. Integers and reals share one numeric encoding,
//! dictionary keys are sorted, back-pointers (`/Parent`, `/P`) are skipped and
//! a reference already on the current path is written as a cycle marker.

use super::envelope;
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::{filter_names, Dict, Object, ObjectRef};
use crate::writer::object_serializer::write_real;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

/// Domain separator and version of the canonical form.
pub const HASH_DOMAIN: &str = "signflow-content-v1";

/// Keys that point back up the object graph.
const SKIPPED_KEYS: [&str; 2] = ["Parent", "P"];

/// Stream dictionary keys that describe the encoding rather than the content.
const ENCODING_KEYS: [&str; 4] = ["Length", "Filter", "DecodeParms", "DL"];

/// Computes content hashes.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentHasher;

impl DocumentHasher {
    /// Create a hasher.
    pub fn new() -> Self {
        Self
    }

    /// Hash covering every evidence block currently embedded.
    pub fn hash(&self, doc: &PdfDocument) -> Result<String> {
        let count = envelope::evidence_count(doc)?;
        content_hash(doc, count)
    }

    /// Hash covering only the first `evidence_blocks` evidence blocks.
    pub fn hash_with_evidence(&self, doc: &PdfDocument, evidence_blocks: usize) -> Result<String> {
        content_hash(doc, evidence_blocks)
    }
}

/// Lowercase hex SHA-256 of the canonical form of `doc`, including the first
/// `evidence_blocks` evidence blocks.
///
/// # Errors
///
/// Fails if the page tree cannot be walked or fewer than `evidence_blocks`
/// evidence blocks are embedded.
pub fn content_hash(doc: &PdfDocument, evidence_blocks: usize) -> Result<String> {
    let mut canon = Canonicalizer::new(doc);
    canon.out.update(HASH_DOMAIN.as_bytes());
    canon.out.update(b"\n");

    let pages = doc.pages()?;
    canon.out.update(format!("pages {};", pages.len()).as_bytes());
    for (index, page) in pages.iter().enumerate() {
        canon.out.update(format!("P{};", index).as_bytes());
        canon.path.insert(page.reference);
        let mut out = std::mem::take(&mut canon.out);
        canon.write_dict(&mut out, &page.dict)?;
        canon.out = out;
        canon.path.remove(&page.reference);
    }

    let available = envelope::evidence_count(doc)?;
    if evidence_blocks > available {
        return Err(Error::InvalidPdf(format!(
            "hash requested over {} evidence blocks but only {} are embedded",
            evidence_blocks, available
        )));
    }
    canon.out.update(format!("evidence {};", evidence_blocks).as_bytes());
    for index in 0..evidence_blocks {
        let block = envelope::evidence_bytes(doc, index)?;
        canon.out.update(format!("e{}:", block.len()).as_bytes());
        canon.out.update(&block);
    }

    Ok(format!("{:x}", canon.out.finalize()))
}

struct Canonicalizer<'a> {
    doc: &'a PdfDocument,
    out: Sha256,
    /// References currently being expanded
    path: HashSet<ObjectRef>,
    /// Digests of referenced streams already expanded
    stream_digests: HashMap<ObjectRef, [u8; 32]>,
}

impl<'a> Canonicalizer<'a> {
    fn new(doc: &'a PdfDocument) -> Self {
        Self {
            doc,
            out: Sha256::new(),
            path: HashSet::new(),
            stream_digests: HashMap::new(),
        }
    }

    fn write(&mut self, out: &mut Sha256, obj: &Object) -> Result<()> {
        match obj {
            Object::Null => out.update(b"n;"),
            Object::Boolean(b) => out.update(if *b { b"t;" } else { b"f;" }),
            Object::Integer(i) => write_number(out, *i as f64),
            Object::Real(r) => write_number(out, *r),
            Object::String(s) => write_bytes(out, b's', s),
            Object::Name(n) => write_bytes(out, b'/', n.as_bytes()),
            Object::Array(items) => {
                out.update(format!("[{};", items.len()).as_bytes());
                for item in items {
                    self.write(out, item)?;
                }
                out.update(b"]");
            },
            Object::Dictionary(dict) => self.write_dict(out, dict)?,
            Object::Stream { .. } => {
                let digest = self.stream_digest(obj)?;
                out.update(b"h");
                out.update(digest);
            },
            Object::Reference(r) => self.write_reference(out, *r)?,
        }
        Ok(())
    }

    fn write_dict(&mut self, out: &mut Sha256, dict: &Dict) -> Result<()> {
        let mut keys: Vec<&String> = dict
            .keys()
            .filter(|k| !SKIPPED_KEYS.contains(&k.as_str()))
            .collect();
        keys.sort();

        out.update(format!("<{};", keys.len()).as_bytes());
        for key in keys {
            write_bytes(out, b'/', key.as_bytes());
            self.write(out, &dict[key])?;
        }
        out.update(b">");
        Ok(())
    }

    fn write_reference(&mut self, out: &mut Sha256, reference: ObjectRef) -> Result<()> {
        if self.path.contains(&reference) {
            out.update(format!("c{};", reference.id).as_bytes());
            return Ok(());
        }
        if let Some(digest) = self.stream_digests.get(&reference) {
            out.update(b"h");
            out.update(digest);
            return Ok(());
        }

        let target = match self.doc.get_object(reference) {
            Ok(obj) => obj,
            Err(Error::ObjectNotFound(..)) => Object::Null,
            Err(e) => return Err(e),
        };

        self.path.insert(reference);
        let result = match &target {
            Object::Stream { .. } => self.stream_digest(&target).map(|digest| {
                self.stream_digests.insert(reference, digest);
                out.update(b"h");
                out.update(digest);
            }),
            other => self.write(out, other),
        };
        self.path.remove(&reference);
        result
    }

    /// Digest of a stream: its dictionary without encoding keys plus its
    /// decoded data. Undecodable data is hashed raw, tagged with its filters.
    fn stream_digest(&mut self, stream: &Object) -> Result<[u8; 32]> {
        let (dict, data) = match stream {
            Object::Stream { dict, data } => (dict, data),
            _ => return Ok([0; 32]),
        };

        let mut sub = Sha256::new();
        let content: Dict = dict
            .iter()
            .filter(|(k, _)| !ENCODING_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.write_dict(&mut sub, &content)?;

        match stream.decode_stream_data() {
            Ok(decoded) => write_bytes(&mut sub, b'd', &decoded),
            Err(e) => {
                let filters = dict.get("Filter").map(filter_names).unwrap_or_default();
                log::debug!("hashing undecodable stream raw ({}): {}", filters.join(","), e);
                write_bytes(&mut sub, b'r', filters.join(",").as_bytes());
                write_bytes(&mut sub, b'r', data);
            },
        }
        Ok(sub.finalize().into())
    }
}

fn write_number(out: &mut Sha256, value: f64) {
    let mut buf = vec![b'#'];
    write_real(&mut buf, value);
    buf.push(b';');
    out.update(&buf);
}

fn write_bytes(out: &mut Sha256, tag: u8, data: &[u8]) {
    out.update([tag]);
    out.update(data.len().to_string().as_bytes());
    out.update(b":");
    out.update(data);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectRef;
    use crate::writer::object_serializer::{name, text};
    use crate::writer::{IncrementalUpdate, PdfWriter, PdfWriterConfig};

    fn sample(body: &str, compress: bool) -> PdfDocument {
        let mut writer = PdfWriter::new(PdfWriterConfig::default().with_title("Lease").with_compress(compress));
        writer.add_letter_page().text(body, 72.0, 720.0, 12.0);
        writer.add_letter_page().text("page two", 72.0, 720.0, 12.0);
        PdfDocument::from_bytes(writer.finish().unwrap()).unwrap()
    }

    #[test]
    fn test_hash_is_lowercase_hex_sha256() {
        let hash = content_hash(&sample("hello", false), 0).unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_hash_is_deterministic() {
        let doc = sample("hello", false);
        assert_eq!(content_hash(&doc, 0).unwrap(), content_hash(&doc, 0).unwrap());
        assert_eq!(DocumentHasher::new().hash(&doc).unwrap(), content_hash(&doc, 0).unwrap());
    }

    #[test]
    fn test_hash_ignores_encoding_and_metadata() {
        let plain = sample("hello", false);
        let compressed = sample("hello", true);
        assert_eq!(content_hash(&plain, 0).unwrap(), content_hash(&compressed, 0).unwrap());

        let untitled = {
            let mut writer = PdfWriter::new(PdfWriterConfig::default().with_author("Someone"));
            writer.add_letter_page().text("hello", 72.0, 720.0, 12.0);
            writer.add_letter_page().text("page two", 72.0, 720.0, 12.0);
            PdfDocument::from_bytes(writer.finish().unwrap()).unwrap()
        };
        assert_eq!(content_hash(&plain, 0).unwrap(), content_hash(&untitled, 0).unwrap());
    }

    #[test]
    fn test_hash_sees_content_changes() {
        assert_ne!(
            content_hash(&sample("hello", false), 0).unwrap(),
            content_hash(&sample("hellp", false), 0).unwrap()
        );
    }

    #[test]
    fn test_info_update_keeps_hash() {
        let doc = sample("hello", false);
        let before = content_hash(&doc, 0).unwrap();

        let mut update = IncrementalUpdate::new(&doc);
        let info_ref = doc.info_ref().unwrap();
        let mut info = doc.info().unwrap().unwrap();
        info.insert("Title".to_string(), text("Renamed"));
        update.replace(info_ref, Object::Dictionary(info));
        let updated = PdfDocument::from_bytes(update.write().unwrap()).unwrap();

        assert_eq!(content_hash(&updated, 0).unwrap(), before);
    }

    #[test]
    fn test_resource_change_changes_hash() {
        let doc = sample("hello", false);
        let before = content_hash(&doc, 0).unwrap();

        // Swap the shared font for a different base font.
        let mut update = IncrementalUpdate::new(&doc);
        let font_ref = ObjectRef::new(3, 0);
        let mut font = doc.resolve_dict(&Object::Reference(font_ref)).unwrap();
        font.insert("BaseFont".to_string(), name("Courier"));
        update.replace(font_ref, Object::Dictionary(font));
        let updated = PdfDocument::from_bytes(update.write().unwrap()).unwrap();

        assert_ne!(content_hash(&updated, 0).unwrap(), before);
    }

    #[test]
    fn test_integer_and_real_hash_alike() {
        let mut a = Sha256::new();
        let mut b = Sha256::new();
        write_number(&mut a, 612i64 as f64);
        write_number(&mut b, 612.0);
        assert_eq!(a.finalize(), b.finalize());
    }

    #[test]
    fn test_too_many_evidence_blocks_requested() {
        let err = content_hash(&sample("hello", false), 1).unwrap_err();
        assert!(matches!(err, Error::InvalidPdf(_)));
    }
}
