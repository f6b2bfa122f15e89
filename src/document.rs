//! PDF document model.
//!
//! A [`PdfDocument`] is an immutable view over the bytes of one revision of a
//! file: it resolves indirect objects (including those packed in object
//! streams), walks the page tree and enumerates the earlier revisions that an
//! incremental update left behind.

use crate::error::{Error, Result};
use crate::object::{Dict, Object, ObjectRef};
use crate::parser::{find_keyword, parse_indirect_at, parse_object};
use crate::xref::{self, CrossRefTable, XrefEntry};
use bytes::Bytes;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Maximum chain length when following references to references.
const MAX_RESOLVE_DEPTH: usize = 32;

/// Page attributes a page inherits from its ancestors in the page tree.
pub const INHERITABLE_PAGE_KEYS: [&str; 4] = ["Resources", "MediaBox", "CropBox", "Rotate"];

/// US Letter, used when a page carries no usable MediaBox.
const DEFAULT_MEDIA_BOX: [f64; 4] = [0.0, 0.0, 612.0, 792.0];

/// A leaf of the page tree.
#[derive(Debug, Clone)]
pub struct Page {
    /// Indirect reference of the page object
    pub reference: ObjectRef,
    /// Page dictionary with inherited attributes filled in
    pub dict: Dict,
}

/// A complete earlier state of the file.
#[derive(Debug)]
pub struct Revision {
    /// Byte length of the prefix that forms this revision
    pub end: usize,
    /// The revision opened as a document
    pub document: PdfDocument,
}

/// An opened PDF file (or prefix of one).
#[derive(Debug)]
pub struct PdfDocument {
    data: Bytes,
    version: (u8, u8),
    xref: CrossRefTable,
    object_streams: RefCell<HashMap<u32, Rc<HashMap<u32, Object>>>>,
}

impl PdfDocument {
    /// Open a document from its bytes.
    ///
    /// # Errors
    ///
    /// Fails on a missing `%PDF-` header, an unreadable cross-reference chain,
    /// a trailer without `/Root`, or an encrypted file.
    pub fn from_bytes(data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        let version = parse_header(&data)?;
        let xref = xref::load(&data)?;

        if !matches!(xref.trailer().get("Root"), Some(Object::Reference(_))) {
            return Err(Error::InvalidPdf("trailer has no /Root reference".to_string()));
        }
        if xref.trailer().contains_key("Encrypt") {
            return Err(Error::InvalidPdf("encrypted documents are not supported".to_string()));
        }

        Ok(Self {
            data,
            version,
            xref,
            object_streams: RefCell::new(HashMap::new()),
        })
    }

    /// Raw bytes of this document.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Shared handle to the raw bytes.
    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    /// Header version as `(major, minor)`.
    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    /// Merged cross-reference information.
    pub fn xref(&self) -> &CrossRefTable {
        &self.xref
    }

    /// Trailer dictionary of the newest section.
    pub fn trailer(&self) -> &Dict {
        self.xref.trailer()
    }

    /// Load an indirect object.
    pub fn get_object(&self, reference: ObjectRef) -> Result<Object> {
        match self.xref.get(reference.id) {
            Some(XrefEntry::InUse { offset, .. }) => {
                let offset = usize::try_from(offset)
                    .map_err(|_| Error::ObjectNotFound(reference.id, reference.gen))?;
                parse_indirect_at(&self.data, offset, reference)
            },
            Some(XrefEntry::Compressed { stream_id, .. }) => {
                let objects = self.object_stream(stream_id)?;
                objects
                    .get(&reference.id)
                    .cloned()
                    .ok_or(Error::ObjectNotFound(reference.id, reference.gen))
            },
            Some(XrefEntry::Free) | None => Err(Error::ObjectNotFound(reference.id, reference.gen)),
        }
    }

    /// Follow references until a direct object is reached.
    ///
    /// A reference to a missing object resolves to `Null`.
    pub fn resolve(&self, object: &Object) -> Result<Object> {
        let mut current = object.clone();
        for _ in 0..MAX_RESOLVE_DEPTH {
            let reference = match current {
                Object::Reference(r) => r,
                direct => return Ok(direct),
            };
            current = match self.get_object(reference) {
                Ok(obj) => obj,
                Err(Error::ObjectNotFound(..)) => {
                    log::debug!("reference {} points at no object, treating as null", reference);
                    return Ok(Object::Null);
                },
                Err(e) => return Err(e),
            };
        }
        match object {
            Object::Reference(r) => Err(Error::CircularReference(*r)),
            _ => Ok(current),
        }
    }

    /// Resolve and require a dictionary (streams yield their dictionary).
    pub fn resolve_dict(&self, object: &Object) -> Result<Dict> {
        match self.resolve(object)? {
            Object::Dictionary(d) => Ok(d),
            Object::Stream { dict, .. } => Ok(dict),
            other => Err(Error::InvalidObjectType {
                expected: "Dictionary".to_string(),
                found: other.type_name().to_string(),
            }),
        }
    }

    /// Reference of the document catalog.
    pub fn catalog_ref(&self) -> Result<ObjectRef> {
        self.trailer()
            .get("Root")
            .and_then(|o| o.as_reference())
            .ok_or_else(|| Error::InvalidPdf("trailer has no /Root reference".to_string()))
    }

    /// The document catalog.
    pub fn catalog(&self) -> Result<Dict> {
        self.resolve_dict(&Object::Reference(self.catalog_ref()?))
    }

    /// Reference of the document information dictionary, when indirect.
    pub fn info_ref(&self) -> Option<ObjectRef> {
        self.trailer().get("Info").and_then(|o| o.as_reference())
    }

    /// The document information dictionary, if any.
    pub fn info(&self) -> Result<Option<Dict>> {
        match self.trailer().get("Info") {
            None => Ok(None),
            Some(obj) => match self.resolve(obj)? {
                Object::Dictionary(d) => Ok(Some(d)),
                _ => Ok(None),
            },
        }
    }

    /// All pages in page-tree order.
    pub fn pages(&self) -> Result<Vec<Page>> {
        let root = self
            .catalog()?
            .get("Pages")
            .and_then(|o| o.as_reference())
            .ok_or_else(|| Error::InvalidPdf("catalog has no /Pages reference".to_string()))?;

        let mut pages = Vec::new();
        let mut visited = HashSet::new();
        self.walk_pages(root, &Dict::new(), &mut visited, &mut pages)?;
        Ok(pages)
    }

    fn walk_pages(
        &self,
        node_ref: ObjectRef,
        inherited: &Dict,
        visited: &mut HashSet<ObjectRef>,
        out: &mut Vec<Page>,
    ) -> Result<()> {
        if !visited.insert(node_ref) {
            return Err(Error::CircularReference(node_ref));
        }

        let mut node = self.resolve_dict(&Object::Reference(node_ref))?;
        let is_tree_node = node.get("Type").and_then(|o| o.as_name()) == Some("Pages")
            || (node.contains_key("Kids") && node.get("Type").and_then(|o| o.as_name()) != Some("Page"));

        if is_tree_node {
            let mut passed_down = inherited.clone();
            for key in INHERITABLE_PAGE_KEYS {
                if let Some(value) = node.get(key) {
                    passed_down.insert(key.to_string(), value.clone());
                }
            }
            let kids = match node.get("Kids") {
                Some(kids) => self.resolve(kids)?,
                None => Object::Array(Vec::new()),
            };
            for kid in kids.as_array().map(|a| a.as_slice()).unwrap_or(&[]) {
                match kid.as_reference() {
                    Some(kid_ref) => self.walk_pages(kid_ref, &passed_down, visited, out)?,
                    None => log::warn!("ignoring direct object in /Kids of {}", node_ref),
                }
            }
        } else {
            for (key, value) in inherited {
                node.entry(key.clone()).or_insert_with(|| value.clone());
            }
            out.push(Page {
                reference: node_ref,
                dict: node,
            });
        }
        Ok(())
    }

    /// Number of pages.
    pub fn page_count(&self) -> Result<usize> {
        Ok(self.pages()?.len())
    }

    /// Page MediaBox as `[llx, lly, urx, ury]`, normalised so that `ll < ur`.
    pub fn media_box(&self, page: &Page) -> [f64; 4] {
        let rect = page
            .dict
            .get("MediaBox")
            .and_then(|o| self.resolve(o).ok())
            .and_then(|o| {
                let nums: Vec<f64> = o.as_array()?.iter().filter_map(|n| n.as_number()).collect();
                (nums.len() == 4).then(|| [nums[0], nums[1], nums[2], nums[3]])
            });
        match rect {
            Some([x0, y0, x1, y1]) if x0 != x1 && y0 != y1 => [x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)],
            _ => DEFAULT_MEDIA_BOX,
        }
    }

    /// Decoded content of a page, streams concatenated with a newline between them.
    pub fn page_content(&self, page: &Page) -> Result<Vec<u8>> {
        let contents = match page.dict.get("Contents") {
            Some(obj) => self.resolve(obj)?,
            None => return Ok(Vec::new()),
        };
        let parts = match contents {
            Object::Array(items) => items,
            single => vec![single],
        };

        let mut out = Vec::new();
        for part in parts {
            let stream = self.resolve(&part)?;
            if let Object::Stream { .. } = stream {
                if !out.is_empty() {
                    out.push(b'\n');
                }
                out.extend_from_slice(&stream.decode_stream_data()?);
            }
        }
        Ok(out)
    }

    /// Earlier complete states of this file, oldest first.
    ///
    /// Every prefix that ends in `%%EOF` (plus its end-of-line) and opens as a
    /// document is a revision. Prefixes that do not open are skipped.
    pub fn revisions(&self) -> Vec<Revision> {
        let mut revisions = Vec::new();
        let mut search_from = 0;

        while let Some(pos) = find_keyword(&self.data[search_from..], b"%%EOF") {
            let mut end = search_from + pos + b"%%EOF".len();
            if self.data[end..].starts_with(b"\r\n") {
                end += 2;
            } else if self.data[end..].starts_with(b"\n") || self.data[end..].starts_with(b"\r") {
                end += 1;
            }
            search_from = end;

            match PdfDocument::from_bytes(self.data.slice(..end)) {
                Ok(document) => revisions.push(Revision { end, document }),
                Err(e) => log::debug!("prefix ending at {} is not a complete revision: {}", end, e),
            }
        }
        revisions
    }

    fn object_stream(&self, stream_id: u32) -> Result<Rc<HashMap<u32, Object>>> {
        if let Some(cached) = self.object_streams.borrow().get(&stream_id) {
            return Ok(Rc::clone(cached));
        }

        let stream = self.get_object(ObjectRef::new(stream_id, 0))?;
        let objects = Rc::new(parse_object_stream(&stream)?);
        self.object_streams.borrow_mut().insert(stream_id, Rc::clone(&objects));
        Ok(objects)
    }
}

/// Unpack the objects stored in a `/Type /ObjStm` stream.
fn parse_object_stream(stream: &Object) -> Result<HashMap<u32, Object>> {
    let dict = stream.as_dict().ok_or_else(|| Error::InvalidObjectType {
        expected: "Stream".to_string(),
        found: stream.type_name().to_string(),
    })?;
    let count = dict.get("N").and_then(|o| o.as_integer()).unwrap_or(0);
    let first = dict.get("First").and_then(|o| o.as_integer()).unwrap_or(0);
    let (count, first) = match (usize::try_from(count), usize::try_from(first)) {
        (Ok(count), Ok(first)) => (count, first),
        _ => return Err(Error::Decode(format!("object stream: invalid /N {} or /First {}", count, first))),
    };
    let body = stream.decode_stream_data()?;

    let header = body.get(..first).unwrap_or(&body);
    // Each pair takes at least four header bytes, which bounds a lying /N.
    let wanted = count.saturating_mul(2);
    let mut numbers = Vec::with_capacity(wanted.min(header.len() / 2));
    let mut cursor = header;
    while numbers.len() < wanted {
        match parse_object(cursor) {
            Ok((rest, Object::Integer(n))) if n >= 0 => {
                numbers.push(n as u64);
                cursor = rest;
            },
            _ => break,
        }
    }

    let mut objects = HashMap::with_capacity(numbers.len() / 2);
    for pair in numbers.chunks_exact(2) {
        let Ok(id) = u32::try_from(pair[0]) else {
            log::warn!("object stream entry with out-of-range number {}", pair[0]);
            continue;
        };
        let start = usize::try_from(pair[1]).ok().and_then(|offset| first.checked_add(offset));
        match start.and_then(|start| body.get(start..)).map(parse_object) {
            Some(Ok((_, object))) => {
                objects.insert(id, object);
            },
            _ => log::warn!("object {} in object stream is unreadable", id),
        }
    }
    Ok(objects)
}

fn parse_header(data: &[u8]) -> Result<(u8, u8)> {
    let window = &data[..data.len().min(1024)];
    let pos = find_keyword(window, b"%PDF-").ok_or_else(|| {
        let found = String::from_utf8_lossy(&data[..data.len().min(8)]).into_owned();
        Error::InvalidHeader(found)
    })?;

    let rest = &window[pos + 5..];
    let digit = |i: usize| rest.get(i).filter(|c| c.is_ascii_digit()).map(|c| c - b'0');
    match (digit(0), rest.get(1), digit(2)) {
        (Some(major), Some(b'.'), Some(minor)) => Ok((major, minor)),
        _ => Ok((1, 4)),
    }
}
