//! PDF document writer.
//!
//! Assembles small but complete documents (header, body, cross-reference
//! section, trailer) with Helvetica text. Used to produce fresh documents and
//! test fixtures; signing itself only ever appends incremental sections.

use super::content_stream::ContentStreamBuilder;
use super::incremental::XrefSection;
use super::object_serializer::{dict, name, text, ObjectSerializer};
use crate::decoders::deflate;
use crate::error::Result;
use crate::object::{Dict, Object, ObjectRef};

/// Configuration for PDF generation.
#[derive(Debug, Clone)]
pub struct PdfWriterConfig {
    /// PDF version written in the header (e.g. "1.7")
    pub version: String,
    /// Document title
    pub title: Option<String>,
    /// Document author
    pub author: Option<String>,
    /// Producer application
    pub producer: Option<String>,
    /// Compress content streams with FlateDecode
    pub compress: bool,
    /// Write a cross-reference stream instead of a classic table
    pub xref_stream: bool,
}

impl Default for PdfWriterConfig {
    fn default() -> Self {
        Self {
            version: "1.7".to_string(),
            title: None,
            author: None,
            producer: Some(concat!("pdf_signflow ", env!("CARGO_PKG_VERSION")).to_string()),
            compress: false,
            xref_stream: false,
        }
    }
}

impl PdfWriterConfig {
    /// Set document title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set document author.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Enable or disable stream compression.
    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Choose between a cross-reference stream and a classic table.
    pub fn with_xref_stream(mut self, xref_stream: bool) -> Self {
        self.xref_stream = xref_stream;
        self
    }
}

struct PageData {
    width: f64,
    height: f64,
    content: ContentStreamBuilder,
}

/// A page being built.
pub struct PageBuilder<'a> {
    page: &'a mut PageData,
}

impl PageBuilder<'_> {
    /// Draw Helvetica text with its baseline origin at `(x, y)`.
    pub fn text(&mut self, s: &str, x: f64, y: f64, size: f64) -> &mut Self {
        self.page.content.set_font("F1", size).text(s, x, y);
        self
    }

    /// Stroke a rectangle outline.
    pub fn rect(&mut self, x: f64, y: f64, width: f64, height: f64) -> &mut Self {
        self.page.content.rect(x, y, width, height).stroke();
        self
    }

    /// Page size as `(width, height)`.
    pub fn size(&self) -> (f64, f64) {
        (self.page.width, self.page.height)
    }
}

/// PDF document writer.
pub struct PdfWriter {
    config: PdfWriterConfig,
    pages: Vec<PageData>,
}

impl PdfWriter {
    /// Create a writer.
    pub fn new(config: PdfWriterConfig) -> Self {
        Self {
            config,
            pages: Vec::new(),
        }
    }

    /// Add a page with the given dimensions in points.
    pub fn add_page(&mut self, width: f64, height: f64) -> PageBuilder<'_> {
        self.pages.push(PageData {
            width,
            height,
            content: ContentStreamBuilder::new(),
        });
        let last = self.pages.len() - 1;
        PageBuilder {
            page: &mut self.pages[last],
        }
    }

    /// Add a US Letter page.
    pub fn add_letter_page(&mut self) -> PageBuilder<'_> {
        self.add_page(612.0, 792.0)
    }

    /// Number of pages added so far.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Write the document.
    ///
    /// Object layout: 1 catalog, 2 page tree (carrying the shared font
    /// resources), 3 font, 4 info, then a page and its content per page.
    pub fn finish(self) -> Result<Vec<u8>> {
        let catalog = ObjectRef::new(1, 0);
        let pages_root = ObjectRef::new(2, 0);
        let font = ObjectRef::new(3, 0);
        let info = ObjectRef::new(4, 0);

        let mut objects: Vec<(ObjectRef, Object)> = Vec::new();
        let mut kids = Vec::new();
        let mut next_id = 5;

        for page in &self.pages {
            let page_ref = ObjectRef::new(next_id, 0);
            let content_ref = ObjectRef::new(next_id + 1, 0);
            next_id += 2;

            let raw = page.content.build();
            let mut content_dict = Dict::new();
            let data = if self.config.compress {
                content_dict.insert("Filter".to_string(), name("FlateDecode"));
                deflate(&raw)?
            } else {
                raw
            };
            objects.push((
                page_ref,
                Object::Dictionary(dict([
                    ("Type", name("Page")),
                    ("Parent", Object::Reference(pages_root)),
                    (
                        "MediaBox",
                        Object::Array(vec![
                            Object::Integer(0),
                            Object::Integer(0),
                            Object::Real(page.width),
                            Object::Real(page.height),
                        ]),
                    ),
                    ("Contents", Object::Reference(content_ref)),
                ])),
            ));
            objects.push((
                content_ref,
                Object::Stream {
                    dict: content_dict,
                    data: data.into(),
                },
            ));
            kids.push(Object::Reference(page_ref));
        }

        let font_resources = dict([("F1", Object::Reference(font))]);
        let mut head = vec![
            (catalog, Object::Dictionary(dict([("Type", name("Catalog")), ("Pages", Object::Reference(pages_root))]))),
            (
                pages_root,
                Object::Dictionary(dict([
                    ("Type", name("Pages")),
                    ("Count", Object::Integer(kids.len() as i64)),
                    ("Kids", Object::Array(kids)),
                    ("Resources", Object::Dictionary(dict([("Font", Object::Dictionary(font_resources))]))),
                ])),
            ),
            (
                font,
                Object::Dictionary(dict([
                    ("Type", name("Font")),
                    ("Subtype", name("Type1")),
                    ("BaseFont", name("Helvetica")),
                    ("Encoding", name("WinAnsiEncoding")),
                ])),
            ),
        ];

        let mut info_dict = Dict::new();
        let fields = [
            ("Title", &self.config.title),
            ("Author", &self.config.author),
            ("Producer", &self.config.producer),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                info_dict.insert(key.to_string(), text(value));
            }
        }
        head.push((info, Object::Dictionary(info_dict)));
        head.extend(objects);

        let serializer = ObjectSerializer::pretty();
        let mut out = format!("%PDF-{}\n", self.config.version).into_bytes();
        out.extend_from_slice(b"%\xE2\xE3\xCF\xD3\n");

        let mut section = XrefSection {
            free_head: true,
            ..Default::default()
        };
        for (reference, object) in &head {
            section.offsets.insert(reference.id, out.len() as u64);
            out.extend_from_slice(&serializer.serialize_indirect(*reference, object));
        }

        section.trailer.insert("Root".to_string(), Object::Reference(catalog));
        section.trailer.insert("Info".to_string(), Object::Reference(info));
        if self.config.xref_stream {
            let stream_ref = ObjectRef::new(next_id, 0);
            section.trailer.insert("Size".to_string(), Object::Integer(next_id as i64 + 1));
            section.write_stream(&mut out, stream_ref)?;
        } else {
            section.trailer.insert("Size".to_string(), Object::Integer(next_id as i64));
            section.write_table(&mut out);
        }
        Ok(out)
    }
}
