// Allow some clippy lints that are too pedantic for this project
#![allow(clippy::too_many_arguments)]
#![allow(clippy::enum_variant_names)]
#![allow(clippy::should_implement_trait)]
// Allow unused for tests
#![cfg_attr(test, allow(dead_code))]

//! # PDF Signflow
//!
//! Multi-party sequential signing for PDF documents: ordered role workflows,
//! visual stamps, embedded signature evidence and verification.
//!
//! ## Core Features
//!
//! - **Ordered signing**: documents carry a list of signing steps per role
//!   (`org_admin`, `collaborator`, `employee`); nobody signs before the
//!   steps ahead of them
//! - **Per-event certificates**: every signature gets a fresh Ed25519 key and
//!   a self-signed X.509 certificate; the key signs once and is dropped
//! - **Visual stamps**: a bordered box with signer, organization, time,
//!   signature id and a QR code linking to the verification page
//! - **Embedded evidence**: a JSON evidence block per signature, appended as
//!   an incremental update, so earlier signatures stay byte-for-byte intact
//! - **Verification**: each signature is re-hashed against its own revisions;
//!   a change after signing is reported against exactly the signatures it
//!   affects
//!
//! ## Architecture
//!
//! ```text
//! [lexer/parser/xref/document]  reading PDFs, including every revision
//! [writer]                      new documents and incremental updates
//! [signatures]                  hashing, certificates, stamp, evidence, verifying
//! [workflow]                    model, ordering engine, store, service
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use pdf_signflow::signatures::{PdfSigner, SignatureVerifier};
//! use pdf_signflow::SigningConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let signer = PdfSigner::from_config(&SigningConfig::default());
//! let signed = signer.sign(&std::fs::read("contract.pdf")?, &identity)?;
//! std::fs::write("contract-signed.pdf", &signed.bytes)?;
//!
//! for result in SignatureVerifier::new().verify(&signed.bytes)? {
//!     println!("{} valid={}", result.signature_id, result.is_valid);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## License
//!
//! Licensed under either of:
//!
//! * Apache License, Version 2.0 ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
//! * MIT license ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)
//!
//! at your option.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Error handling
pub mod error;

// Core PDF parsing
pub mod document;
pub mod lexer;
pub mod object;
pub mod parser;
pub mod xref;

// Stream decoders
pub mod decoders;

// PDF writing
pub mod writer;

// Signature evidence
pub mod signatures;

// Signing workflow
pub mod workflow;

// Configuration
pub mod config;

// Re-exports
pub use config::SigningConfig;
pub use document::PdfDocument;
pub use error::{Error, Result};
pub use signatures::{PdfSigner, SignatureVerifier, VerificationResult};
pub use workflow::{Document, Role, SignatureConfig, SignatureStep, SignerIdentity, SigningService};

// Version info
/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
