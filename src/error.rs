//! Error types for the signing engine.
//!
//! This module defines all error types that can occur while parsing PDFs,
//! producing signed revisions, verifying evidence and running the signing
//! workflow.

use crate::workflow::model::Role;

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur during PDF processing and signing.
#[derive(Debug, thiserror::Error)]
#[allow(clippy::enum_variant_names)] // "Invalid" prefix is intentional for clarity
pub enum Error {
    /// Invalid PDF header (expected '%PDF-')
    #[error("Invalid PDF header: expected '%PDF-', found '{0}'")]
    InvalidHeader(String),

    /// Parse error at specific byte offset
    #[error("Failed to parse object at byte {offset}: {reason}")]
    ParseError {
        /// Byte offset where error occurred
        offset: usize,
        /// Reason for parse failure
        reason: String,
    },

    /// Invalid cross-reference table
    #[error("Invalid cross-reference table: {0}")]
    InvalidXref(String),

    /// Referenced object not found in cross-reference table
    #[error("Object not found: {0} {1} R")]
    ObjectNotFound(u32, u16),

    /// Object has wrong type
    #[error("Invalid object type: expected {expected}, found {found}")]
    InvalidObjectType {
        /// Expected object type
        expected: String,
        /// Actual object type found
        found: String,
    },

    /// Invalid PDF structure (generic)
    #[error("Invalid PDF: {0}")]
    InvalidPdf(String),

    /// Stream decoding error
    #[error("Stream decoding error: {0}")]
    Decode(String),

    /// Unsupported stream filter
    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// Circular reference detected in object graph
    #[error("Circular reference detected: object {0}")]
    CircularReference(crate::object::ObjectRef),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A role earlier in the signing sequence has not signed yet.
    #[error("Out-of-order signing: {role} must wait for {waiting_on} to sign first")]
    OutOfOrderSigning {
        /// Role of the signer that attempted to sign
        role: Role,
        /// Lowest-order role that still has to sign
        waiting_on: Role,
    },

    /// The signer's copy, or the signer's step, already carries a signature.
    #[error("Already signed: {0}")]
    AlreadySigned(String),

    /// The signer has no copy of the document.
    #[error("No signer copy for '{signer}' on document {document_id}")]
    MissingSignerCopy {
        /// Document identifier
        document_id: String,
        /// Signer (employee) identifier
        signer: String,
    },

    /// The signer's role has no configured signing step.
    #[error("Role {role} has no signing step on document {document_id}")]
    MissingRoleConfig {
        /// Document identifier
        document_id: String,
        /// Role without a configured step
        role: Role,
    },

    /// The signature configuration is malformed.
    #[error("Invalid signature configuration: {0}")]
    InvalidSignatureConfig(String),

    /// A recomputed content hash disagrees with stored evidence.
    #[error("Hash mismatch: evidence records {expected}, document hashes to {actual}")]
    HashMismatch {
        /// Hash stored in the evidence block
        expected: String,
        /// Hash recomputed from the document
        actual: String,
    },

    /// Embedding evidence did not yield a valid document.
    #[error("Failed to write signature envelope: {0}")]
    EnvelopeWriteFailure(String),

    /// Unknown document.
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// Title or original filename already used within the organization.
    #[error("Duplicate document in organization {organization_id}: {reason}")]
    DuplicateDocument {
        /// Organization identifier
        organization_id: String,
        /// Which uniqueness rule was violated
        reason: String,
    },

    /// The document changed under a concurrent writer too many times.
    #[error("Document {0} was modified concurrently; giving up after retries")]
    ConcurrentModification(String),

    /// Unknown signature identifier.
    #[error("Signature not found: {0}")]
    SignatureNotFound(String),

    /// Storage collaborator failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Identity collaborator failure
    #[error("Unknown signer identity: {0}")]
    UnknownIdentity(String),

    /// Certificate or key generation failure
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Notification collaborator failure
    #[error("Notification error: {0}")]
    Notification(String),
}

impl Error {
    /// Whether the caller may succeed by trying again later.
    ///
    /// Only ordering failures qualify; the engine never retries them itself.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::OutOfOrderSigning { .. } | Error::ConcurrentModification(_))
    }

    /// Whether this error is tamper evidence rather than a generic failure.
    pub fn is_tamper_evidence(&self) -> bool {
        matches!(self, Error::HashMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_header_error() {
        let err = Error::InvalidHeader("NotAPDF".to_string());
        let msg = format!("{}", err);
        assert!(msg.contains("Invalid PDF header"));
        assert!(msg.contains("NotAPDF"));
    }

    #[test]
    fn test_parse_error() {
        let err = Error::ParseError {
            offset: 1234,
            reason: "invalid token".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("1234"));
        assert!(msg.contains("invalid token"));
    }

    #[test]
    fn test_object_not_found_error() {
        let err = Error::ObjectNotFound(10, 0);
        assert!(format!("{}", err).contains("10 0 R"));
    }

    #[test]
    fn test_out_of_order_message_names_roles() {
        let err = Error::OutOfOrderSigning {
            role: Role::Employee,
            waiting_on: Role::OrgAdmin,
        };
        let msg = err.to_string();
        assert!(msg.contains("employee"));
        assert!(msg.contains("org_admin"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_terminal_errors_are_not_retryable() {
        assert!(!Error::AlreadySigned("copy".into()).is_retryable());
        assert!(!Error::MissingRoleConfig {
            document_id: "d".into(),
            role: Role::Collaborator
        }
        .is_retryable());
    }

    #[test]
    fn test_hash_mismatch_is_tamper_evidence() {
        let err = Error::HashMismatch {
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert!(err.is_tamper_evidence());
        assert!(!Error::EnvelopeWriteFailure("x".into()).is_tamper_evidence());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
