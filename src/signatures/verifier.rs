//! Evidence verification.
//!
//! Verification is a pure function of the supplied bytes. For evidence block
//! *i* two states of the file are re-hashed (over the first *i* blocks):
//!
//! - the **signed revision**, the first revision that contains block *i*;
//! - the **checked revision**, the last revision before the next signing
//!   event started (its stamp section), or the whole file for the newest
//!   block.
//!
//! Both must reproduce the stored `documentHash`. Content changes made by a
//! later signing event (its stamp and evidence) are therefore not held
//! against earlier signatures, while any other change is.

use super::certificate::verify_with_certificate;
use super::envelope::{evidence_count, read_evidence};
use super::hasher::content_hash;
use super::types::{EvidenceBlock, SignerInfo, VerificationResult, EVIDENCE_VERSION};
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::DateTime;

/// Error reported when a recomputed hash disagrees with the evidence.
pub const MODIFIED_AFTER_SIGNING: &str = "document was modified after signing";

/// Incremental sections written by one signing event (stamp, evidence).
const SECTIONS_PER_SIGNING: usize = 2;

/// Verifies embedded evidence.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureVerifier;

impl SignatureVerifier {
    /// Create a verifier.
    pub fn new() -> Self {
        Self
    }

    /// Verify the evidence embedded in `data`.
    ///
    /// Returns one result per evidence block, in signing order, and an empty
    /// list when the file carries no evidence.
    pub fn verify(&self, data: &[u8]) -> Result<Vec<VerificationResult>> {
        let doc = PdfDocument::from_bytes(data.to_vec())?;
        self.verify_document(&doc)
    }

    /// [`verify`](Self::verify) on an opened document.
    pub fn verify_document(&self, doc: &PdfDocument) -> Result<Vec<VerificationResult>> {
        let blocks = read_evidence(doc)?;
        if blocks.is_empty() {
            log::debug!("no embedded evidence");
            return Ok(Vec::new());
        }

        let revisions = doc.revisions();
        let mut states: Vec<&PdfDocument> = revisions.iter().map(|r| &r.document).collect();
        if revisions.last().map(|r| r.end) != Some(doc.data().len()) {
            states.push(doc);
        }
        let counts: Vec<usize> = states
            .iter()
            .enumerate()
            .map(|(state, s)| {
                evidence_count(s).unwrap_or_else(|e| {
                    log::warn!("revision {}: evidence list unreadable, treating as empty: {}", state, e);
                    0
                })
            })
            .collect();

        let results: Vec<VerificationResult> = blocks
            .into_iter()
            .enumerate()
            .map(|(index, block)| match block {
                Ok(block) => self.check_block(index, &block, &states, &counts),
                Err(e) => unreadable(index, e),
            })
            .collect();

        let valid = results.iter().filter(|r| r.is_valid).count();
        log::info!("verified {} signatures: {} valid", results.len(), valid);
        Ok(results)
    }

    fn check_block(
        &self,
        index: usize,
        block: &EvidenceBlock,
        states: &[&PdfDocument],
        counts: &[usize],
    ) -> VerificationResult {
        let info = &block.signature_info;
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut tampered = false;

        let last = states.len() - 1;
        let signed = counts.iter().position(|&c| c > index).unwrap_or(last);
        let checked = match counts.iter().position(|&c| c > index + 1) {
            Some(next) => next.saturating_sub(SECTIONS_PER_SIGNING).max(signed),
            None => last,
        };

        let hash_at = |state: usize| content_hash(states[state], index);
        let current_hash = match (hash_at(signed), hash_at(checked)) {
            (Ok(at_signing), Ok(current)) => {
                if at_signing != info.document_hash || current != info.document_hash {
                    let actual = if current != info.document_hash {
                        current.clone()
                    } else {
                        at_signing
                    };
                    let mismatch = Error::HashMismatch {
                        expected: info.document_hash.clone(),
                        actual,
                    };
                    tampered = mismatch.is_tamper_evidence();
                    errors.push(MODIFIED_AFTER_SIGNING.to_string());
                    errors.push(mismatch.to_string());
                }
                current
            },
            (Err(e), _) | (_, Err(e)) => {
                errors.push(format!("content hash could not be recomputed: {}", e));
                String::new()
            },
        };

        if DateTime::parse_from_rfc3339(&info.timestamp).is_err() {
            errors.push(format!("invalid signature timestamp '{}'", info.timestamp));
        }

        if block.metadata.version != EVIDENCE_VERSION {
            warnings.push(format!("unknown evidence version {}", block.metadata.version));
        }

        let evidence_signature_valid = match check_evidence_signature(block) {
            Ok(()) => true,
            Err(e) => {
                warnings.push(format!("evidence signature not verified: {}", e));
                false
            },
        };

        let result = VerificationResult {
            signature_id: info.signature_id.clone(),
            signer_info: SignerInfo::from(info),
            is_valid: errors.is_empty(),
            document_hash: info.document_hash.clone(),
            current_hash,
            tampered,
            timestamp: info.timestamp.clone(),
            evidence_signature_valid,
            errors,
            warnings,
        };
        if result.is_valid {
            log::debug!("signature {} valid (revision {}..={})", result.signature_id, signed, checked);
        } else {
            log::warn!("signature {} invalid: {}", result.signature_id, result.errors.join("; "));
        }
        result
    }
}

fn check_evidence_signature(block: &EvidenceBlock) -> Result<()> {
    let certificate = BASE64
        .decode(&block.certificate)
        .map_err(|e| Error::Certificate(format!("certificate is not base64: {}", e)))?;
    let signature = BASE64
        .decode(&block.evidence_signature)
        .map_err(|e| Error::Certificate(format!("signature is not base64: {}", e)))?;
    verify_with_certificate(&certificate, &block.payload().to_bytes()?, &signature)
}

fn unreadable(index: usize, error: Error) -> VerificationResult {
    log::warn!("evidence block {} is unreadable: {}", index, error);
    VerificationResult {
        signature_id: String::new(),
        signer_info: SignerInfo {
            name: String::new(),
            email: String::new(),
            organization: String::new(),
        },
        is_valid: false,
        document_hash: String::new(),
        current_hash: String::new(),
        tampered: false,
        timestamp: String::new(),
        evidence_signature_valid: false,
        errors: vec![format!("evidence block {} could not be read: {}", index, error)],
        warnings: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{PdfWriter, PdfWriterConfig};

    #[test]
    fn test_unsigned_document_yields_empty_list() {
        let mut writer = PdfWriter::new(PdfWriterConfig::default());
        writer.add_letter_page().text("plain", 72.0, 720.0, 12.0);
        let bytes = writer.finish().unwrap();
        assert!(SignatureVerifier::new().verify(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_not_a_pdf() {
        assert!(SignatureVerifier::new().verify(b"hello").is_err());
    }
}
