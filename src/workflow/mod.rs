//! Multi-party signing workflow.
//!
//! A document is uploaded with an ordered list of signing steps, one per role,
//! and one copy per signer. Signers sign in step order; each signature is a
//! new revision of the file carrying the evidence of all earlier ones.
//!
//! ```text
//! [model]          Document aggregate, roles, steps, copies, progress
//! [sequence]       pure ordering rules and state transitions
//! [store]          persistence with compare-and-swap on Document::revision
//! [collaborators]  file storage and identity lookup
//! [notify]         concurrent fan-out of signing requests
//! [service]        the operations, end to end
//! ```

pub mod collaborators;
pub mod model;
pub mod notify;
pub mod sequence;
pub mod service;
pub mod store;

pub use collaborators::{FsStorage, IdentityProvider, MemoryDirectory, MemoryStorage, Storage};
pub use model::{
    CopyStatus, Document, DocumentStatus, Role, SignatureConfig, SignatureProgress, SignatureRecord,
    SignatureStep, SignedBy, SignerCopy, SignerIdentity,
};
pub use notify::{DispatchReport, MemoryNotifier, NotificationDispatcher, Notifier, SignRequest};
pub use sequence::CompletedSignature;
pub use service::{
    original_locator, SendToSignOutcome, SignOutcome, SigningDetails, SigningService, UploadRequest,
    VerificationReport, DATABASE_ONLY_WARNING,
};
pub use store::{DocumentStore, MemoryDocumentStore};
