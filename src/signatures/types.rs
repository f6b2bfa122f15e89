//! Signature evidence types.
//!
//! Everything here is serialized into the evidence blocks embedded in signed
//! revisions, so field names and layouts are part of the stored format. Each
//! block is self-describing (`version`, `signatureAlgorithm`).

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Evidence format version written by this crate.
pub const EVIDENCE_VERSION: u32 = 1;

/// Value of `signatureType`.
pub const SIGNATURE_TYPE: &str = "electronic";

/// Value of `signatureFormat`.
pub const SIGNATURE_FORMAT: &str = "pdf-embedded-evidence";

/// Value of `signatureLevel`.
pub const SIGNATURE_LEVEL: &str = "basic";

/// Value of `signatureAlgorithm`: Ed25519 over the evidence payload, SHA-256
/// content hash.
pub const SIGNATURE_ALGORITHM: &str = "Ed25519/SHA-256";

/// Summary of one signature, shared by the database record and the evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureInfo {
    /// Unique signature identifier
    pub signature_id: String,
    /// Signer display name
    pub signer_name: String,
    /// Signer email
    pub signer_email: String,
    /// Signer organization name
    pub organization: String,
    /// Content hash of the stamped revision (lowercase hex SHA-256)
    pub document_hash: String,
    /// Signing time, RFC 3339
    pub timestamp: String,
    /// Always [`SIGNATURE_TYPE`] for signatures made here
    pub signature_type: String,
}

/// Certificate validity window, RFC 3339.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateValidity {
    /// Start of validity
    pub not_before: String,
    /// End of validity
    pub not_after: String,
}

/// Facts extracted from the signer certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateInfo {
    /// Subject distinguished name
    pub subject: String,
    /// Issuer distinguished name (equal to the subject, self-signed)
    pub issuer: String,
    /// Validity window
    pub validity: CertificateValidity,
    /// Serial number, colon-separated hex
    pub serial_number: String,
}

/// A time attached to the signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampEntry {
    /// What the time marks (`signing`)
    #[serde(rename = "type")]
    pub kind: String,
    /// RFC 3339 time
    pub time: String,
    /// Where the time came from (`local-clock`; no timestamp authority)
    pub source: String,
}

impl TimestampEntry {
    /// Signing time taken from the local clock.
    pub fn signing(time: impl Into<String>) -> Self {
        Self {
            kind: "signing".to_string(),
            time: time.into(),
            source: "local-clock".to_string(),
        }
    }
}

/// Revocation state. Revocation is never checked; the status says so.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationInfo {
    /// `not_checked`
    pub status: String,
}

impl Default for RevocationInfo {
    fn default() -> Self {
        Self {
            status: "not_checked".to_string(),
        }
    }
}

/// Metadata embedded with every signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureMetadata {
    /// Evidence format version
    pub version: u32,
    /// Signature type
    pub signature_type: String,
    /// Evidence format
    pub signature_format: String,
    /// Assurance level
    pub signature_level: String,
    /// Evidence signature and hash algorithms
    pub signature_algorithm: String,
    /// Signer certificate summary
    pub certificate_info: CertificateInfo,
    /// Timestamps
    pub timestamps: Vec<TimestampEntry>,
    /// Revocation state
    pub revocation_info: RevocationInfo,
}

impl SignatureMetadata {
    /// Metadata for a signature made now with the given certificate.
    pub fn new(certificate_info: CertificateInfo, signing_time: impl Into<String>) -> Self {
        Self {
            version: EVIDENCE_VERSION,
            signature_type: SIGNATURE_TYPE.to_string(),
            signature_format: SIGNATURE_FORMAT.to_string(),
            signature_level: SIGNATURE_LEVEL.to_string(),
            signature_algorithm: SIGNATURE_ALGORITHM.to_string(),
            certificate_info,
            timestamps: vec![TimestampEntry::signing(signing_time)],
            revocation_info: RevocationInfo::default(),
        }
    }
}

/// The part of an evidence block covered by the evidence signature.
///
/// Serialized with `serde_json`; struct field order keeps the bytes stable.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidencePayload<'a> {
    /// Signature summary
    pub signature_info: &'a SignatureInfo,
    /// Signature metadata
    pub metadata: &'a SignatureMetadata,
    /// Content hash of the revision presented to the signer, before stamping
    pub presented_hash: &'a str,
    /// Base64 DER certificate
    pub certificate: &'a str,
}

impl EvidencePayload<'_> {
    /// Bytes that are signed and verified.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// One embedded evidence block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceBlock {
    /// Signature summary
    pub signature_info: SignatureInfo,
    /// Signature metadata
    pub metadata: SignatureMetadata,
    /// Content hash before stamping
    pub presented_hash: String,
    /// Base64 DER self-signed certificate
    pub certificate: String,
    /// Base64 Ed25519 signature over [`EvidenceBlock::payload`]
    pub evidence_signature: String,
}

impl EvidenceBlock {
    /// The signed part of this block.
    pub fn payload(&self) -> EvidencePayload<'_> {
        EvidencePayload {
            signature_info: &self.signature_info,
            metadata: &self.metadata,
            presented_hash: &self.presented_hash,
            certificate: &self.certificate,
        }
    }

    /// Parse a block from its JSON bytes.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// JSON bytes as embedded in the document.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

/// Who signed, as reported by verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerInfo {
    /// Display name
    pub name: String,
    /// Email
    pub email: String,
    /// Organization name
    pub organization: String,
}

impl From<&SignatureInfo> for SignerInfo {
    fn from(info: &SignatureInfo) -> Self {
        Self {
            name: info.signer_name.clone(),
            email: info.signer_email.clone(),
            organization: info.organization.clone(),
        }
    }
}

/// Outcome of verifying one evidence block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    /// Signature identifier
    pub signature_id: String,
    /// Signer
    pub signer_info: SignerInfo,
    /// Hash matches and the timestamp is a valid time
    pub is_valid: bool,
    /// Hash stored in the evidence
    pub document_hash: String,
    /// Hash recomputed from the supplied bytes
    pub current_hash: String,
    /// The content no longer hashes to the stored value. Tamper evidence,
    /// as opposed to unreadable evidence or a bad timestamp.
    #[serde(default)]
    pub tampered: bool,
    /// Stored signing time
    pub timestamp: String,
    /// Whether the Ed25519 evidence signature checks out against the
    /// embedded certificate. Informational; does not affect `is_valid`.
    pub evidence_signature_valid: bool,
    /// Reasons `is_valid` is false
    pub errors: Vec<String>,
    /// Lower-severity findings
    pub warnings: Vec<String>,
}
