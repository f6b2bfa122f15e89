//! The signing pipeline.
//!
//! Signing one revision runs, in order:
//!
//! 1. hash the presented revision (over the evidence already embedded);
//! 2. issue a fresh key pair and certificate;
//! 3. stamp the page (one incremental section);
//! 4. hash the stamped revision: this is the `documentHash` stored everywhere;
//! 5. build and sign the evidence block, then embed it (second section).
//!
//! The input bytes are never modified; the caller receives a new file.

use super::certificate::KeyCertificateProvider;
use super::envelope::{evidence_count, SignatureEnvelopeWriter};
use super::hasher::content_hash;
use super::stamp::{StampPlacement, VisualStampRenderer};
use super::types::{EvidenceBlock, SignatureInfo, SignatureMetadata, SIGNATURE_TYPE};
use crate::config::SigningConfig;
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::workflow::model::SignerIdentity;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, SecondsFormat, Utc};

/// Result of signing one revision.
#[derive(Debug, Clone)]
pub struct SignedRevision {
    /// Bytes of the new file (input + stamp section + evidence section)
    pub bytes: Vec<u8>,
    /// Signature summary; `document_hash` is the stamped-revision hash
    pub info: SignatureInfo,
    /// Embedded metadata
    pub metadata: SignatureMetadata,
    /// Hash of the revision as presented, before stamping
    pub presented_hash: String,
}

/// Signs document revisions.
#[derive(Debug, Clone)]
pub struct PdfSigner {
    certificates: KeyCertificateProvider,
    stamper: VisualStampRenderer,
    envelope: SignatureEnvelopeWriter,
}

impl PdfSigner {
    /// Create a signer from its parts.
    pub fn new(
        certificates: KeyCertificateProvider,
        stamper: VisualStampRenderer,
        envelope: SignatureEnvelopeWriter,
    ) -> Self {
        Self {
            certificates,
            stamper,
            envelope,
        }
    }

    /// Signer configured from a [`SigningConfig`].
    pub fn from_config(config: &SigningConfig) -> Self {
        Self::new(
            KeyCertificateProvider::new(config.certificate_validity_years),
            VisualStampRenderer::new(config.frontend_base_url.clone(), config.stamp),
            SignatureEnvelopeWriter::new(),
        )
    }

    /// The stamp renderer in use.
    pub fn stamper(&self) -> &VisualStampRenderer {
        &self.stamper
    }

    /// Sign `data` as `signer` now, with a fresh signature id and the default
    /// stamp placement.
    pub fn sign(&self, data: &[u8], signer: &SignerIdentity) -> Result<SignedRevision> {
        self.sign_with(data, signer, &uuid::Uuid::new_v4().to_string(), Utc::now(), None)
    }

    /// Sign with explicit id, time and placement.
    ///
    /// Without a placement the stamp goes on the last page, stacked above the
    /// stamps of earlier signatures.
    pub fn sign_with(
        &self,
        data: &[u8],
        signer: &SignerIdentity,
        signature_id: &str,
        now: DateTime<Utc>,
        placement: Option<StampPlacement>,
    ) -> Result<SignedRevision> {
        let doc = PdfDocument::from_bytes(data.to_vec())?;
        let prior = evidence_count(&doc)?;
        let presented_hash = content_hash(&doc, prior)?;

        let issued = self.certificates.issue_at(signer, now)?;
        let timestamp = now.to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut info = SignatureInfo {
            signature_id: signature_id.to_string(),
            signer_name: signer.display_name.clone(),
            signer_email: signer.email.clone(),
            organization: signer.organization_name.clone(),
            document_hash: String::new(),
            timestamp: timestamp.clone(),
            signature_type: SIGNATURE_TYPE.to_string(),
        };

        let placement = placement.unwrap_or_else(|| StampPlacement::stacked(prior));
        let stamped = self
            .stamper
            .stamp(&doc, &info, &presented_hash, &placement)
            .map_err(|e| Error::EnvelopeWriteFailure(format!("stamping: {}", e)))?;
        let stamped = PdfDocument::from_bytes(stamped)
            .map_err(|e| Error::EnvelopeWriteFailure(format!("re-opening stamped revision: {}", e)))?;
        info.document_hash = content_hash(&stamped, prior)?;

        let metadata = SignatureMetadata::new(issued.info().clone(), timestamp);
        let certificate = BASE64.encode(issued.certificate_der());
        let mut block = EvidenceBlock {
            signature_info: info,
            metadata,
            presented_hash,
            certificate,
            evidence_signature: String::new(),
        };
        let payload = block.payload().to_bytes()?;
        let (signature, _) = issued.sign_once(&payload);
        block.evidence_signature = BASE64.encode(signature.to_bytes());

        let bytes = self.envelope.embed_at(&stamped, &block, now)?;
        log::info!(
            "signed as {} ({}): signature {} hash {}",
            signer.display_name,
            signer.role,
            block.signature_info.signature_id,
            block.signature_info.document_hash
        );

        Ok(SignedRevision {
            bytes,
            info: block.signature_info,
            metadata: block.metadata,
            presented_hash: block.presented_hash,
        })
    }
}
