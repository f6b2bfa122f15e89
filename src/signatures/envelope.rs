//! Embedded signature evidence.
//!
//! Evidence blocks are JSON streams (`/Type /SignatureEvidence /Version 1`)
//! listed, oldest first, in the catalog array `/SignatureEvidence`. Embedding
//! appends one block through an incremental update; earlier blocks and all
//! earlier bytes stay exactly as they were.

use super::hasher::content_hash;
use super::types::{EvidenceBlock, EVIDENCE_VERSION};
use crate::decoders::deflate;
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::{Dict, Object};
use crate::writer::object_serializer::{name, text};
use crate::writer::IncrementalUpdate;
use chrono::{DateTime, Utc};

/// Catalog key holding the evidence array.
pub const EVIDENCE_KEY: &str = "SignatureEvidence";

/// `/Type` of an evidence stream.
pub const EVIDENCE_TYPE: &str = "SignatureEvidence";

fn evidence_items(doc: &PdfDocument) -> Result<Vec<Object>> {
    let catalog = doc.catalog()?;
    match catalog.get(EVIDENCE_KEY) {
        None => Ok(Vec::new()),
        Some(obj) => match doc.resolve(obj)? {
            Object::Array(items) => Ok(items),
            Object::Null => Ok(Vec::new()),
            other => Err(Error::InvalidObjectType {
                expected: "Array".to_string(),
                found: other.type_name().to_string(),
            }),
        },
    }
}

/// Number of embedded evidence blocks.
pub fn evidence_count(doc: &PdfDocument) -> Result<usize> {
    Ok(evidence_items(doc)?.len())
}

/// Decoded bytes of evidence block `index`.
pub fn evidence_bytes(doc: &PdfDocument, index: usize) -> Result<Vec<u8>> {
    let items = evidence_items(doc)?;
    let item = items.get(index).ok_or_else(|| {
        Error::InvalidPdf(format!("evidence block {} of {} does not exist", index, items.len()))
    })?;
    match doc.resolve(item)? {
        stream @ Object::Stream { .. } => stream.decode_stream_data(),
        other => Err(Error::InvalidObjectType {
            expected: "Stream".to_string(),
            found: other.type_name().to_string(),
        }),
    }
}

/// Every embedded evidence block, oldest first.
///
/// Blocks that cannot be read or parsed are returned as errors in place so
/// that positions stay aligned with signing order.
pub fn read_evidence(doc: &PdfDocument) -> Result<Vec<Result<EvidenceBlock>>> {
    let count = evidence_count(doc)?;
    Ok((0..count)
        .map(|index| evidence_bytes(doc, index).and_then(|bytes| EvidenceBlock::from_json(&bytes)))
        .collect())
}

/// PDF date string (`D:YYYYMMDDHHmmSSZ`).
pub fn pdf_date(time: DateTime<Utc>) -> String {
    time.format("D:%Y%m%d%H%M%SZ").to_string()
}

/// Writes evidence blocks into documents.
#[derive(Debug, Clone)]
pub struct SignatureEnvelopeWriter {
    producer: String,
    compress: bool,
}

impl Default for SignatureEnvelopeWriter {
    fn default() -> Self {
        Self {
            producer: concat!("pdf_signflow ", env!("CARGO_PKG_VERSION")).to_string(),
            compress: true,
        }
    }
}

impl SignatureEnvelopeWriter {
    /// Writer with the default producer string.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `/Producer` written into the information dictionary.
    pub fn with_producer(mut self, producer: impl Into<String>) -> Self {
        self.producer = producer.into();
        self
    }

    /// Store evidence JSON FlateDecode-compressed (default) or plain.
    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Append `block` to `doc` as a new revision.
    ///
    /// The result is re-opened and checked before it is returned: same page
    /// count, exactly one more evidence block, and a content hash over the
    /// earlier blocks equal to the block's `documentHash`.
    ///
    /// # Errors
    ///
    /// Any failure is reported as [`Error::EnvelopeWriteFailure`]; `doc` is
    /// never modified.
    pub fn embed(&self, doc: &PdfDocument, block: &EvidenceBlock) -> Result<Vec<u8>> {
        self.embed_at(doc, block, Utc::now())
    }

    /// [`embed`](Self::embed) with an explicit modification time.
    pub fn embed_at(&self, doc: &PdfDocument, block: &EvidenceBlock, now: DateTime<Utc>) -> Result<Vec<u8>> {
        let fail = |stage: &str, e: Error| Error::EnvelopeWriteFailure(format!("{}: {}", stage, e));

        let prior = evidence_count(doc).map_err(|e| fail("reading existing evidence", e))?;
        let page_count = doc.page_count().map_err(|e| fail("reading page tree", e))?;

        let bytes = self
            .write_revision(doc, block, prior, now)
            .map_err(|e| fail("writing evidence revision", e))?;

        let written = PdfDocument::from_bytes(bytes.clone()).map_err(|e| fail("re-opening output", e))?;
        let written_pages = written.page_count().map_err(|e| fail("re-reading page tree", e))?;
        if written_pages != page_count {
            return Err(Error::EnvelopeWriteFailure(format!(
                "page count changed from {} to {}",
                page_count, written_pages
            )));
        }
        let written_count = evidence_count(&written).map_err(|e| fail("re-reading evidence", e))?;
        if written_count != prior + 1 {
            return Err(Error::EnvelopeWriteFailure(format!(
                "expected {} evidence blocks, found {}",
                prior + 1,
                written_count
            )));
        }
        let rehash = content_hash(&written, prior).map_err(|e| fail("re-hashing output", e))?;
        if rehash != block.signature_info.document_hash {
            return Err(Error::EnvelopeWriteFailure(format!(
                "output hashes to {} but evidence records {}",
                rehash, block.signature_info.document_hash
            )));
        }

        log::info!(
            "embedded evidence block {} for signature {} ({} bytes)",
            prior + 1,
            block.signature_info.signature_id,
            bytes.len()
        );
        Ok(bytes)
    }

    fn write_revision(
        &self,
        doc: &PdfDocument,
        block: &EvidenceBlock,
        prior: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<u8>> {
        let json = block.to_json()?;
        let mut stream_dict = Dict::new();
        stream_dict.insert("Type".to_string(), name(EVIDENCE_TYPE));
        stream_dict.insert("Version".to_string(), Object::Integer(EVIDENCE_VERSION as i64));
        stream_dict.insert("SignatureId".to_string(), text(&block.signature_info.signature_id));
        stream_dict.insert("Sequence".to_string(), Object::Integer(prior as i64 + 1));
        let data = if self.compress {
            stream_dict.insert("Filter".to_string(), name("FlateDecode"));
            deflate(&json)?
        } else {
            json
        };

        let mut update = IncrementalUpdate::new(doc);
        let stream_ref = update.add(Object::Stream {
            dict: stream_dict,
            data: data.into(),
        });

        let catalog_ref = doc.catalog_ref()?;
        let mut catalog = doc.catalog()?;
        let mut items = evidence_items(doc)?;
        items.push(Object::Reference(stream_ref));
        catalog.insert(EVIDENCE_KEY.to_string(), Object::Array(items));
        update.replace(catalog_ref, Object::Dictionary(catalog));

        let mut info = doc.info()?.unwrap_or_default();
        info.insert("ModDate".to_string(), text(&pdf_date(now)));
        info.insert("Producer".to_string(), text(&self.producer));
        match doc.info_ref() {
            Some(info_ref) => update.replace(info_ref, Object::Dictionary(info)),
            None => {
                let info_ref = update.add(Object::Dictionary(info));
                update.set_trailer_entry("Info", Object::Reference(info_ref));
            },
        }

        update.write()
    }
}
