//! PDF writing.
//!
//! ## Architecture
//!
//! ```text
//! [ContentStreamBuilder]  operators -> content stream bytes
//!     ↓
//! [ObjectSerializer]      objects -> bytes (sorted keys, deterministic)
//!     ↓
//! [PdfWriter]             complete new documents
//! [IncrementalUpdate]     new revisions appended to existing documents
//! ```
//!
//! ```ignore
//! use pdf_signflow::writer::{PdfWriter, PdfWriterConfig};
//!
//! let mut writer = PdfWriter::new(PdfWriterConfig::default());
//! writer.add_letter_page().text("Hello, World!", 72.0, 720.0, 12.0);
//! let bytes = writer.finish()?;
//! ```

mod content_stream;
mod incremental;
pub mod object_serializer;
mod pdf_writer;

pub use content_stream::{encode_win_ansi, ContentStreamBuilder, ContentStreamOp};
pub use incremental::IncrementalUpdate;
pub use object_serializer::ObjectSerializer;
pub use pdf_writer::{PageBuilder, PdfWriter, PdfWriterConfig};
