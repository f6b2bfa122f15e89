//! Incremental updates.
//!
//! An [`IncrementalUpdate`] appends new and replaced objects after the bytes of
//! an existing document, followed by a cross-reference section whose `/Prev`
//! points at the previous one. The original bytes are never touched, so every
//! earlier revision stays recoverable as a prefix of the new file.

use crate::decoders::deflate;
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::{Dict, Object, ObjectRef};
use crate::writer::object_serializer::ObjectSerializer;
use crate::xref::XrefStyle;
use std::collections::BTreeMap;

/// Trailer keys carried over from the previous section.
const CARRIED_TRAILER_KEYS: [&str; 3] = ["Root", "Info", "ID"];

/// Offsets of the objects written in one section plus its trailer.
#[derive(Debug, Default)]
pub(crate) struct XrefSection {
    /// Object number to byte offset
    pub offsets: BTreeMap<u32, u64>,
    /// Trailer entries (`/Size`, `/Root`, `/Prev`, ...)
    pub trailer: Dict,
    /// Emit the free-list head for object 0
    pub free_head: bool,
}

impl XrefSection {
    /// Append a classic `xref` table, trailer and `startxref`.
    pub fn write_table(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.extend_from_slice(b"xref\n");

        let mut rows: Vec<(u32, Option<u64>)> = Vec::new();
        if self.free_head {
            rows.push((0, None));
        }
        rows.extend(self.offsets.iter().map(|(&id, &off)| (id, Some(off))));

        for run in contiguous_runs(&rows) {
            out.extend_from_slice(format!("{} {}\n", run[0].0, run.len()).as_bytes());
            for (_, offset) in run {
                match offset {
                    Some(off) => out.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes()),
                    None => out.extend_from_slice(b"0000000000 65535 f \n"),
                }
            }
        }

        out.extend_from_slice(b"trailer\n");
        ObjectSerializer::new().write_object(out, &Object::Dictionary(self.trailer.clone()));
        out.extend_from_slice(format!("\nstartxref\n{}\n%%EOF\n", start).as_bytes());
    }

    /// Append a cross-reference stream numbered `stream_ref`, then `startxref`.
    ///
    /// The stream lists itself, so `stream_ref` must be below the trailer `/Size`.
    pub fn write_stream(&self, out: &mut Vec<u8>, stream_ref: ObjectRef) -> Result<()> {
        let start = out.len() as u64;
        let mut rows: Vec<(u32, Option<u64>)> = Vec::new();
        if self.free_head {
            rows.push((0, None));
        }
        let mut offsets = self.offsets.clone();
        offsets.insert(stream_ref.id, start);
        rows.extend(offsets.iter().map(|(&id, &off)| (id, Some(off))));

        let mut index = Vec::new();
        let mut body = Vec::with_capacity(rows.len() * 7);
        for run in contiguous_runs(&rows) {
            index.push(Object::Integer(run[0].0 as i64));
            index.push(Object::Integer(run.len() as i64));
            for (_, offset) in run {
                match offset {
                    Some(off) => {
                        let off = u32::try_from(*off).map_err(|_| {
                            Error::EnvelopeWriteFailure("file too large for a 4-byte xref offset".to_string())
                        })?;
                        body.push(1);
                        body.extend_from_slice(&off.to_be_bytes());
                        body.extend_from_slice(&[0, 0]);
                    },
                    None => body.extend_from_slice(&[0, 0, 0, 0, 0, 0xFF, 0xFF]),
                }
            }
        }

        let mut dict = self.trailer.clone();
        dict.insert("Type".to_string(), Object::Name("XRef".to_string()));
        dict.insert(
            "W".to_string(),
            Object::Array(vec![Object::Integer(1), Object::Integer(4), Object::Integer(2)]),
        );
        dict.insert("Index".to_string(), Object::Array(index));
        dict.insert("Filter".to_string(), Object::Name("FlateDecode".to_string()));

        let stream = Object::Stream {
            dict,
            data: deflate(&body)?.into(),
        };
        out.extend_from_slice(&ObjectSerializer::new().serialize_indirect(stream_ref, &stream));
        out.extend_from_slice(format!("startxref\n{}\n%%EOF\n", start).as_bytes());
        Ok(())
    }
}

fn contiguous_runs<T>(rows: &[(u32, T)]) -> Vec<&[(u32, T)]> {
    let mut runs = Vec::new();
    let mut begin = 0;
    for i in 1..=rows.len() {
        if i == rows.len() || rows[i].0 != rows[i - 1].0 + 1 {
            if begin < i {
                runs.push(&rows[begin..i]);
            }
            begin = i;
        }
    }
    runs
}

/// A pending incremental update against one document.
#[derive(Debug)]
pub struct IncrementalUpdate<'a> {
    base: &'a PdfDocument,
    objects: BTreeMap<u32, (ObjectRef, Object)>,
    trailer_overrides: Dict,
    next_id: u32,
}

impl<'a> IncrementalUpdate<'a> {
    /// Start an update on top of `base`.
    pub fn new(base: &'a PdfDocument) -> Self {
        Self {
            base,
            objects: BTreeMap::new(),
            trailer_overrides: Dict::new(),
            next_id: base.xref().size().max(1),
        }
    }

    /// The document being updated.
    pub fn base(&self) -> &'a PdfDocument {
        self.base
    }

    /// Reserve a fresh object number.
    pub fn allocate(&mut self) -> ObjectRef {
        let reference = ObjectRef::new(self.next_id, 0);
        self.next_id += 1;
        reference
    }

    /// Add a new object and return its reference.
    pub fn add(&mut self, object: Object) -> ObjectRef {
        let reference = self.allocate();
        self.objects.insert(reference.id, (reference, object));
        reference
    }

    /// Set the object for `reference`, replacing the base version if any.
    pub fn replace(&mut self, reference: ObjectRef, object: Object) {
        self.objects.insert(reference.id, (reference, object));
    }

    /// Object as it will be after this update (pending version first).
    pub fn current(&self, reference: ObjectRef) -> Result<Object> {
        match self.objects.get(&reference.id) {
            Some((_, object)) => Ok(object.clone()),
            None => self.base.get_object(reference),
        }
    }

    /// Override a trailer entry in the new section.
    pub fn set_trailer_entry(&mut self, key: &str, value: Object) {
        self.trailer_overrides.insert(key.to_string(), value);
    }

    /// Number of objects that will be written.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether nothing has been added or replaced.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Produce the bytes of the updated file.
    ///
    /// The section uses the same cross-reference style as the newest section
    /// of the base document.
    pub fn write(mut self) -> Result<Vec<u8>> {
        let style = self.base.xref().style();
        let stream_ref = match style {
            XrefStyle::Stream => Some(self.allocate()),
            XrefStyle::Table => None,
        };

        let base_bytes = self.base.data();
        let mut out = Vec::with_capacity(base_bytes.len() + 4096);
        out.extend_from_slice(base_bytes);
        if !matches!(out.last(), Some(b'\n') | Some(b'\r')) {
            out.push(b'\n');
        }

        let serializer = ObjectSerializer::new();
        let mut section = XrefSection::default();
        for (id, (reference, object)) in &self.objects {
            section.offsets.insert(*id, out.len() as u64);
            out.extend_from_slice(&serializer.serialize_indirect(*reference, object));
        }

        for key in CARRIED_TRAILER_KEYS {
            if let Some(value) = self.base.trailer().get(key) {
                section.trailer.insert(key.to_string(), value.clone());
            }
        }
        section.trailer.extend(self.trailer_overrides.clone());
        section
            .trailer
            .insert("Size".to_string(), Object::Integer(self.next_id as i64));
        section.trailer.insert(
            "Prev".to_string(),
            Object::Integer(self.base.xref().startxref() as i64),
        );

        match stream_ref {
            Some(stream_ref) => section.write_stream(&mut out, stream_ref)?,
            None => section.write_table(&mut out),
        }

        log::debug!(
            "incremental update: {} objects, {} -> {} bytes ({:?})",
            self.objects.len(),
            base_bytes.len(),
            out.len(),
            style
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{PdfWriter, PdfWriterConfig};

    fn base_pdf(xref_stream: bool) -> Vec<u8> {
        let mut writer = PdfWriter::new(PdfWriterConfig::default().with_xref_stream(xref_stream));
        writer.add_page(612.0, 792.0).text("Base", 72.0, 720.0, 12.0);
        writer.finish().unwrap()
    }

    #[test]
    fn test_contiguous_runs() {
        let rows = [(0u32, ()), (1, ()), (5, ()), (6, ()), (9, ())];
        let runs = contiguous_runs(&rows);
        assert_eq!(runs.iter().map(|r| r.len()).collect::<Vec<_>>(), vec![2, 2, 1]);
    }

    #[test]
    fn test_update_preserves_prefix_and_adds_revision() {
        for xref_stream in [false, true] {
            let original = base_pdf(xref_stream);
            let doc = PdfDocument::from_bytes(original.clone()).unwrap();
            let catalog_ref = doc.catalog_ref().unwrap();

            let mut update = IncrementalUpdate::new(&doc);
            let note = update.add(Object::String(b"appended".to_vec()));
            let mut catalog = doc.catalog().unwrap();
            catalog.insert("Note".to_string(), Object::Reference(note));
            update.replace(catalog_ref, Object::Dictionary(catalog));
            let updated = update.write().unwrap();

            assert!(updated.starts_with(&original));
            let reopened = PdfDocument::from_bytes(updated).unwrap();
            assert_eq!(reopened.xref().style(), doc.xref().style());
            let note_obj = reopened.resolve(reopened.catalog().unwrap().get("Note").unwrap()).unwrap();
            assert_eq!(note_obj, Object::String(b"appended".to_vec()));
            assert_eq!(reopened.page_count().unwrap(), 1);
            assert_eq!(reopened.revisions().len(), 2);
        }
    }

    #[test]
    fn test_allocate_starts_after_existing_objects() {
        let doc = PdfDocument::from_bytes(base_pdf(false)).unwrap();
        let size = doc.xref().size();
        let mut update = IncrementalUpdate::new(&doc);
        assert_eq!(update.allocate().id, size);
        assert_eq!(update.allocate().id, size + 1);
    }

    #[test]
    fn test_current_prefers_pending_object() {
        let doc = PdfDocument::from_bytes(base_pdf(false)).unwrap();
        let catalog_ref = doc.catalog_ref().unwrap();
        let mut update = IncrementalUpdate::new(&doc);
        update.replace(catalog_ref, Object::Integer(7));
        assert_eq!(update.current(catalog_ref).unwrap(), Object::Integer(7));
    }
}
