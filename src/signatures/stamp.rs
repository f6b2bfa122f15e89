//! Visual signature stamps.
//!
//! A stamp is an opaque, bordered box drawn as page content: signer name,
//! organization, signing time, signature id and (with the `qr` feature) a QR
//! code linking to the verification page. The stamp is cosmetic; the
//! evidence block written afterwards is what verification relies on.
//!
//! The target page gets a new revision whose `/Contents` becomes
//! `[q-stream, original..., Q+stamp-stream]`, so graphics state set by the
//! original content cannot leak into the stamp.

use super::types::SignatureInfo;
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::{Dict, Object};
use crate::writer::object_serializer::{dict, name};
use crate::writer::{ContentStreamBuilder, IncrementalUpdate};
use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// Stamp width when a QR code is drawn.
pub const STAMP_WIDTH_QR: f64 = 260.0;
/// Stamp width without a QR code.
pub const STAMP_WIDTH_PLAIN: f64 = 200.0;
/// Stamp height.
pub const STAMP_HEIGHT: f64 = 84.0;
/// Minimum distance between the stamp and the page edge.
pub const PAGE_MARGIN: f64 = 18.0;

const STACK_GAP: f64 = 6.0;
const PADDING: f64 = 8.0;
const FONT_SIZE: f64 = 8.0;
const LINE_HEIGHT: f64 = 14.0;
/// Average Helvetica advance as a fraction of the font size.
const AVG_CHAR_WIDTH: f64 = 0.52;

const FONT_REGULAR: &str = "SgnHelv";
const FONT_BOLD: &str = "SgnHelvB";

/// What the stamp shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StampOptions {
    /// Draw a QR code with the verification URL
    pub include_qr: bool,
    /// Show the organization line
    pub include_org_name: bool,
}

impl Default for StampOptions {
    fn default() -> Self {
        Self {
            include_qr: true,
            include_org_name: true,
        }
    }
}

/// Where the stamp goes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StampPlacement {
    /// Zero-based page index; the last page when `None`
    pub page_index: Option<usize>,
    /// Lower-left corner in page space; bottom-right of the page when `None`
    pub origin: Option<(f64, f64)>,
    /// Number of stamps already placed; default placement stacks upwards
    pub slot: usize,
}

impl StampPlacement {
    /// Default placement for the `slot`-th stamp on the last page.
    pub fn stacked(slot: usize) -> Self {
        Self {
            slot,
            ..Default::default()
        }
    }
}

/// Draws stamps onto documents.
#[derive(Debug, Clone)]
pub struct VisualStampRenderer {
    frontend_base_url: String,
    options: StampOptions,
}

impl VisualStampRenderer {
    /// Renderer producing verification links under `frontend_base_url`.
    pub fn new(frontend_base_url: impl Into<String>, options: StampOptions) -> Self {
        Self {
            frontend_base_url: frontend_base_url.into(),
            options,
        }
    }

    /// Effective options.
    pub fn options(&self) -> StampOptions {
        self.options
    }

    /// `{frontend}/verify/{hash}/{signature id}`.
    pub fn verification_url(&self, hash: &str, signature_id: &str) -> String {
        format!(
            "{}/verify/{}/{}",
            self.frontend_base_url.trim_end_matches('/'),
            hash,
            signature_id
        )
    }

    fn draws_qr(&self) -> bool {
        if self.options.include_qr && !cfg!(feature = "qr") {
            log::warn!("QR code requested but the `qr` feature is disabled; stamping without it");
        }
        self.options.include_qr && cfg!(feature = "qr")
    }

    /// Box size for the current options.
    pub fn stamp_size(&self) -> (f64, f64) {
        let width = if self.options.include_qr && cfg!(feature = "qr") {
            STAMP_WIDTH_QR
        } else {
            STAMP_WIDTH_PLAIN
        };
        (width, STAMP_HEIGHT)
    }

    /// Lower-left corner of the stamp on a page with `media_box`, clamped so
    /// the whole box stays inside the margins.
    pub fn position(&self, media_box: [f64; 4], placement: &StampPlacement) -> (f64, f64) {
        let (width, height) = self.stamp_size();
        let [x0, y0, x1, y1] = media_box;
        let (x, y) = placement.origin.unwrap_or((
            x1 - PAGE_MARGIN - width,
            y0 + PAGE_MARGIN + placement.slot as f64 * (height + STACK_GAP),
        ));
        let x = x.min(x1 - PAGE_MARGIN - width).max(x0 + PAGE_MARGIN);
        let y = y.min(y1 - PAGE_MARGIN - height).max(y0 + PAGE_MARGIN);
        (x, y)
    }

    /// Stamp `info` onto `doc`, returning the bytes of the new revision.
    ///
    /// `link_hash` is the hash placed in the verification URL.
    pub fn stamp(
        &self,
        doc: &PdfDocument,
        info: &SignatureInfo,
        link_hash: &str,
        placement: &StampPlacement,
    ) -> Result<Vec<u8>> {
        let pages = doc.pages()?;
        let index = placement.page_index.unwrap_or(pages.len().saturating_sub(1));
        let page = pages.get(index).ok_or_else(|| {
            Error::InvalidPdf(format!("cannot stamp page {}: document has {} pages", index, pages.len()))
        })?;

        let media_box = doc.media_box(page);
        let origin = self.position(media_box, placement);
        let url = self.verification_url(link_hash, &info.signature_id);
        let content = self.draw(info, &url, origin)?;

        let mut update = IncrementalUpdate::new(doc);

        let mut resources = match page.dict.get("Resources") {
            Some(obj) => doc.resolve_dict(obj)?,
            None => Dict::new(),
        };
        let mut fonts = match resources.get("Font") {
            Some(obj) => doc.resolve_dict(obj)?,
            None => Dict::new(),
        };
        for (resource, base_font) in [(FONT_REGULAR, "Helvetica"), (FONT_BOLD, "Helvetica-Bold")] {
            if !fonts.contains_key(resource) {
                let font = update.add(Object::Dictionary(dict([
                    ("Type", name("Font")),
                    ("Subtype", name("Type1")),
                    ("BaseFont", name(base_font)),
                    ("Encoding", name("WinAnsiEncoding")),
                ])));
                fonts.insert(resource.to_string(), Object::Reference(font));
            }
        }
        resources.insert("Font".to_string(), Object::Dictionary(fonts));

        let existing = match page.dict.get("Contents") {
            Some(obj) => match doc.resolve(obj)? {
                Object::Array(items) => items,
                Object::Null => Vec::new(),
                _ => vec![obj.clone()],
            },
            None => Vec::new(),
        };
        let open = update.add(Object::Stream {
            dict: Dict::new(),
            data: bytes::Bytes::from_static(b"q\n"),
        });
        let mut stamp_data = b"Q\n".to_vec();
        stamp_data.extend_from_slice(&content);
        let stamp = update.add(Object::Stream {
            dict: Dict::new(),
            data: stamp_data.into(),
        });
        let mut contents = Vec::with_capacity(existing.len() + 2);
        contents.push(Object::Reference(open));
        contents.extend(existing);
        contents.push(Object::Reference(stamp));

        let mut page_obj = doc.resolve_dict(&Object::Reference(page.reference))?;
        page_obj.insert("Resources".to_string(), Object::Dictionary(resources));
        page_obj.insert("Contents".to_string(), Object::Array(contents));
        update.replace(page.reference, Object::Dictionary(page_obj));

        log::debug!(
            "stamping signature {} on page {} at ({:.1}, {:.1})",
            info.signature_id,
            index,
            origin.0,
            origin.1
        );
        update.write()
    }

    /// Content stream for one stamp with its lower-left corner at `origin`.
    fn draw(&self, info: &SignatureInfo, url: &str, origin: (f64, f64)) -> Result<Vec<u8>> {
        let with_qr = self.draws_qr();
        let (width, height) = self.stamp_size();
        let (x, y) = origin;

        let mut b = ContentStreamBuilder::new();
        b.save_state()
            .fill_gray(1.0)
            .stroke_rgb(0.12, 0.23, 0.54)
            .line_width(1.2)
            .rect(x, y, width, height)
            .fill_stroke();

        let text_width = if with_qr {
            width - 2.0 * PADDING - (height - 2.0 * PADDING) - PADDING
        } else {
            width - 2.0 * PADDING
        };
        let max_chars = (text_width / (FONT_SIZE * AVG_CHAR_WIDTH)).floor() as usize;

        let mut lines = vec![(FONT_BOLD, format!("Digitally signed by {}", info.signer_name))];
        if self.options.include_org_name && !info.organization.is_empty() {
            lines.push((FONT_REGULAR, info.organization.clone()));
        }
        lines.push((FONT_REGULAR, format!("Date: {}", display_time(&info.timestamp))));
        lines.push((FONT_REGULAR, format!("ID: {}", info.signature_id)));

        b.fill_rgb(0.1, 0.1, 0.1);
        let mut baseline = y + height - PADDING - FONT_SIZE;
        for (font, line) in &lines {
            b.set_font(font, FONT_SIZE)
                .text(&fit(line, max_chars), x + PADDING, baseline);
            baseline -= LINE_HEIGHT;
        }
        b.end_text();

        if with_qr {
            let side = height - 2.0 * PADDING;
            draw_qr(&mut b, url, x + width - PADDING - side, y + PADDING, side)?;
        }

        b.restore_state();
        Ok(b.build())
    }
}

/// Shorten `text` to at most `max_chars` characters, ending in "...".
fn fit(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

fn display_time(timestamp: &str) -> String {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|_| timestamp.to_string())
}

/// Draw `data` as a QR code in the square `(x, y, side)`; dark modules become
/// filled rectangles, merged along rows.
#[cfg(feature = "qr")]
fn draw_qr(b: &mut ContentStreamBuilder, data: &str, x: f64, y: f64, side: f64) -> Result<()> {
    use qrcode::{EcLevel, QrCode};

    let code = QrCode::with_error_correction_level(data, EcLevel::M)
        .map_err(|e| Error::InvalidPdf(format!("QR code encoding error: {}", e)))?;
    let qr_width = code.width();
    // One module of quiet zone on each side.
    let module = side / (qr_width + 2) as f64;

    b.fill_gray(0.0);
    for (row_index, row) in code.to_colors().chunks(qr_width).enumerate() {
        let top = y + side - module * (row_index + 1) as f64;
        let mut col = 0;
        while col < row.len() {
            if row[col] != qrcode::Color::Dark {
                col += 1;
                continue;
            }
            let start = col;
            while col < row.len() && row[col] == qrcode::Color::Dark {
                col += 1;
            }
            b.rect(
                x + module * (start + 1) as f64,
                top - module,
                module * (col - start) as f64,
                module,
            );
        }
    }
    b.fill();
    Ok(())
}

#[cfg(not(feature = "qr"))]
fn draw_qr(_b: &mut ContentStreamBuilder, data: &str, _x: f64, _y: f64, _side: f64) -> Result<()> {
    log::warn!("built without the `qr` feature; stamp omits the QR code for {}", data);
    Ok(())
}
