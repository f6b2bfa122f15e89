//! PDF content stream builder.
//!
//! Covers the graphics and text operators needed for vector overlays drawn
//! with the standard 14 fonts: state save/restore, colours, rectangles and
//! single-line text.

use crate::writer::object_serializer::{write_name, write_real, write_string};

/// Operations that can be added to a content stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentStreamOp {
    /// Save graphics state (q)
    SaveState,
    /// Restore graphics state (Q)
    RestoreState,
    /// Concatenate matrix (cm)
    Transform([f64; 6]),
    /// Begin text object (BT)
    BeginText,
    /// End text object (ET)
    EndText,
    /// Set font resource and size (Tf)
    SetFont(String, f64),
    /// Set text matrix (Tm)
    SetTextMatrix([f64; 6]),
    /// Show already-encoded text (Tj)
    ShowText(Vec<u8>),
    /// Set fill colour, gray (g)
    SetFillGray(f64),
    /// Set fill colour, RGB (rg)
    SetFillRgb(f64, f64, f64),
    /// Set stroke colour, RGB (RG)
    SetStrokeRgb(f64, f64, f64),
    /// Set line width (w)
    SetLineWidth(f64),
    /// Append rectangle (re)
    Rectangle(f64, f64, f64, f64),
    /// Fill path, non-zero winding (f)
    Fill,
    /// Stroke path (S)
    Stroke,
    /// Fill then stroke (B)
    FillStroke,
}

/// Builder for content stream bytes.
#[derive(Debug, Clone, Default)]
pub struct ContentStreamBuilder {
    operations: Vec<ContentStreamOp>,
    in_text_object: bool,
}

impl ContentStreamBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an operation.
    pub fn op(&mut self, op: ContentStreamOp) -> &mut Self {
        self.operations.push(op);
        self
    }

    /// Operations added so far.
    pub fn operations(&self) -> &[ContentStreamOp] {
        &self.operations
    }

    /// `q`
    pub fn save_state(&mut self) -> &mut Self {
        self.op(ContentStreamOp::SaveState)
    }

    /// `Q`
    pub fn restore_state(&mut self) -> &mut Self {
        self.end_text();
        self.op(ContentStreamOp::RestoreState)
    }

    /// Translate the coordinate system.
    pub fn translate(&mut self, tx: f64, ty: f64) -> &mut Self {
        self.op(ContentStreamOp::Transform([1.0, 0.0, 0.0, 1.0, tx, ty]))
    }

    /// Begin a text object unless one is open.
    pub fn begin_text(&mut self) -> &mut Self {
        if !self.in_text_object {
            self.in_text_object = true;
            self.op(ContentStreamOp::BeginText);
        }
        self
    }

    /// End the open text object, if any.
    pub fn end_text(&mut self) -> &mut Self {
        if self.in_text_object {
            self.in_text_object = false;
            self.op(ContentStreamOp::EndText);
        }
        self
    }

    /// Select a font resource.
    pub fn set_font(&mut self, resource: &str, size: f64) -> &mut Self {
        self.begin_text();
        self.op(ContentStreamOp::SetFont(resource.to_string(), size))
    }

    /// Show `text` (WinAnsi-encoded) with its baseline origin at `(x, y)`.
    pub fn text(&mut self, text: &str, x: f64, y: f64) -> &mut Self {
        self.begin_text();
        self.op(ContentStreamOp::SetTextMatrix([1.0, 0.0, 0.0, 1.0, x, y]));
        self.op(ContentStreamOp::ShowText(encode_win_ansi(text)))
    }

    /// Set the fill colour to a gray level.
    pub fn fill_gray(&mut self, level: f64) -> &mut Self {
        self.op(ContentStreamOp::SetFillGray(level))
    }

    /// Set the fill colour.
    pub fn fill_rgb(&mut self, r: f64, g: f64, b: f64) -> &mut Self {
        self.op(ContentStreamOp::SetFillRgb(r, g, b))
    }

    /// Set the stroke colour.
    pub fn stroke_rgb(&mut self, r: f64, g: f64, b: f64) -> &mut Self {
        self.op(ContentStreamOp::SetStrokeRgb(r, g, b))
    }

    /// Set the line width.
    pub fn line_width(&mut self, width: f64) -> &mut Self {
        self.op(ContentStreamOp::SetLineWidth(width))
    }

    /// Append a rectangle to the current path.
    pub fn rect(&mut self, x: f64, y: f64, width: f64, height: f64) -> &mut Self {
        self.end_text();
        self.op(ContentStreamOp::Rectangle(x, y, width, height))
    }

    /// `f`
    pub fn fill(&mut self) -> &mut Self {
        self.op(ContentStreamOp::Fill)
    }

    /// `S`
    pub fn stroke(&mut self) -> &mut Self {
        self.op(ContentStreamOp::Stroke)
    }

    /// `B`
    pub fn fill_stroke(&mut self) -> &mut Self {
        self.op(ContentStreamOp::FillStroke)
    }

    /// Serialize the operations, one per line. An open text object is closed.
    pub fn build(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for op in &self.operations {
            write_op(&mut buf, op);
            buf.push(b'\n');
        }
        if self.in_text_object {
            buf.extend_from_slice(b"ET\n");
        }
        buf
    }
}

fn write_numbers(buf: &mut Vec<u8>, values: &[f64]) {
    for value in values {
        write_real(buf, *value);
        buf.push(b' ');
    }
}

fn write_op(buf: &mut Vec<u8>, op: &ContentStreamOp) {
    let operator: &[u8] = match op {
        ContentStreamOp::SaveState => b"q",
        ContentStreamOp::RestoreState => b"Q",
        ContentStreamOp::Transform(m) => {
            write_numbers(buf, m);
            b"cm"
        },
        ContentStreamOp::BeginText => b"BT",
        ContentStreamOp::EndText => b"ET",
        ContentStreamOp::SetFont(name, size) => {
            write_name(buf, name);
            buf.push(b' ');
            write_numbers(buf, &[*size]);
            b"Tf"
        },
        ContentStreamOp::SetTextMatrix(m) => {
            write_numbers(buf, m);
            b"Tm"
        },
        ContentStreamOp::ShowText(bytes) => {
            write_string(buf, bytes);
            b" Tj"
        },
        ContentStreamOp::SetFillGray(level) => {
            write_numbers(buf, &[*level]);
            b"g"
        },
        ContentStreamOp::SetFillRgb(r, g, b) => {
            write_numbers(buf, &[*r, *g, *b]);
            b"rg"
        },
        ContentStreamOp::SetStrokeRgb(r, g, b) => {
            write_numbers(buf, &[*r, *g, *b]);
            b"RG"
        },
        ContentStreamOp::SetLineWidth(width) => {
            write_numbers(buf, &[*width]);
            b"w"
        },
        ContentStreamOp::Rectangle(x, y, w, h) => {
            write_numbers(buf, &[*x, *y, *w, *h]);
            b"re"
        },
        ContentStreamOp::Fill => b"f",
        ContentStreamOp::Stroke => b"S",
        ContentStreamOp::FillStroke => b"B",
    };
    buf.extend_from_slice(operator);
}

/// Encode text for a simple font with `/WinAnsiEncoding`.
///
/// Characters outside the encoding become `?`.
pub fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            ' '..='~' => c as u8,
            '\u{A0}'..='\u{FF}' => c as u32 as u8,
            '€' => 0x80,
            '‚' => 0x82,
            '…' => 0x85,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '•' => 0x95,
            '–' => 0x96,
            '—' => 0x97,
            '™' => 0x99,
            _ => b'?',
        })
        .collect()
}
