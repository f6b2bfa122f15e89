//! Signature evidence: hashing, certificates, stamps, embedding, verification.
//!
//! This is the cryptographic core of the engine. A signature here is a
//! self-issued, basic-level electronic signature: the file carries a visual
//! stamp plus a JSON evidence block binding the signer's identity, a fresh
//! self-signed certificate and the content hash of the stamped revision. It is
//! not a PAdES/CAdES signature; no timestamp authority, chain validation or
//! revocation checking is involved.
//!
//! ## Architecture
//!
//! ```text
//! [DocumentHasher]          canonical SHA-256 over pages + earlier evidence
//! [KeyCertificateProvider]  fresh Ed25519 key + self-signed X.509 per event
//! [VisualStampRenderer]     box, text and QR code on the target page
//! [SignatureEnvelopeWriter] evidence block appended as a new revision
//! [PdfSigner]               the pipeline above, in order
//! [SignatureVerifier]       per-signature re-hash against its own revisions
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use pdf_signflow::signatures::{PdfSigner, SignatureVerifier};
//! use pdf_signflow::SigningConfig;
//!
//! let signer = PdfSigner::from_config(&SigningConfig::default());
//! let signed = signer.sign(&pdf_bytes, &identity)?;
//!
//! for result in SignatureVerifier::new().verify(&signed.bytes)? {
//!     println!("{}: valid={}", result.signature_id, result.is_valid);
//! }
//! ```

mod certificate;
pub(crate) mod envelope;
mod hasher;
mod signer;
mod stamp;
mod types;
mod verifier;

pub use certificate::{
    certificate_public_key, parse_certificate_info, verify_with_certificate, IssuedCertificate,
    KeyCertificateProvider, DEFAULT_VALIDITY_YEARS,
};
pub use envelope::{
    evidence_bytes, evidence_count, pdf_date, read_evidence, SignatureEnvelopeWriter, EVIDENCE_KEY,
};
pub use hasher::{content_hash, DocumentHasher, HASH_DOMAIN};
pub use signer::{PdfSigner, SignedRevision};
pub use stamp::{StampOptions, StampPlacement, VisualStampRenderer};
pub use types::{
    CertificateInfo, CertificateValidity, EvidenceBlock, EvidencePayload, RevocationInfo,
    SignatureInfo, SignatureMetadata, SignerInfo, TimestampEntry, VerificationResult,
    EVIDENCE_VERSION, SIGNATURE_ALGORITHM,
};
pub use verifier::{SignatureVerifier, MODIFIED_AFTER_SIGNING};
