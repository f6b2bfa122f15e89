//! The signing workflow service.
//!
//! [`SigningService`] strings the pieces together: the sequence engine gates
//! every attempt, [`PdfSigner`] produces the signed revision, the store
//! commits it with a compare-and-swap and the dispatcher tells the next role.
//! It is transport-free; a web layer maps its operations onto routes such as
//! `POST /documents/:id/sign/:signerId`.
//!
//! Physical layout in [`Storage`]:
//!
//! ```text
//! documents/{document}/original.pdf
//! documents/{document}/copies/{signer}.pdf               fresh copy
//! documents/{document}/copies/{signer}/{signature}.pdf   signed revision
//! ```
//!
//! A signer signs the newest signed revision of the document (or their own
//! fresh copy when nobody has signed yet), so each signed revision carries
//! the evidence of every earlier signature.

use super::collaborators::{IdentityProvider, Storage};
use super::model::{
    CopyStatus, Document, DocumentStatus, Role, SignatureConfig, SignatureProgress, SignatureRecord, SignerCopy,
};
use super::notify::{DispatchReport, NotificationDispatcher, Notifier, SignRequest};
use super::sequence::{self, CompletedSignature};
use super::store::DocumentStore;
use crate::config::SigningConfig;
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::signatures::{PdfSigner, SignatureInfo, SignatureVerifier, VerificationResult};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Warning attached to [`VerificationReport::DatabaseOnlyEvidence`].
pub const DATABASE_ONLY_WARNING: &str =
    "no embedded evidence found in the stored file; signature is attested by the database record only";

/// A new document to put through signing.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Owning organization
    pub organization_id: String,
    /// Title, unique within the organization
    pub title: String,
    /// Original filename, unique within the organization
    pub original_filename: String,
    /// PDF bytes
    pub bytes: Vec<u8>,
    /// Signing steps
    pub signature_config: SignatureConfig,
    /// Employee ids that get a copy
    pub signers: Vec<String>,
}

/// Signing context behind an emailed link.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningDetails {
    /// Document identifier
    pub document_id: String,
    /// Document title
    pub title: String,
    /// Organization of the document
    pub organization_id: String,
    /// Signer the link was issued to
    pub signer_id: String,
    /// Signer's name
    pub signer_name: String,
    /// Role the signer signs as
    pub role: Role,
    /// Status of the signer's copy
    pub copy_status: CopyStatus,
    /// Whether the signer may sign now
    pub can_sign: bool,
    /// Why not, when `can_sign` is false
    pub reason: Option<String>,
    /// Overall status
    pub status: DocumentStatus,
    /// Progress so far
    pub progress: SignatureProgress,
}

/// Outcome of a successful sign.
#[derive(Debug, Clone)]
pub struct SignOutcome {
    /// Document as committed
    pub document: Document,
    /// Signature summary
    pub signature: SignatureInfo,
    /// Locator of the signed revision
    pub locator: String,
    /// Hash of the revision the signer was shown
    pub presented_hash: String,
    /// Notifications sent to the roles this signature unlocked
    pub notifications: DispatchReport,
}

/// Outcome of "send to sign".
#[derive(Debug, Clone, PartialEq)]
pub enum SendToSignOutcome {
    /// The acting admin holds the first step and signs directly; no link is
    /// sent.
    SignInteractively {
        /// Role to sign as
        role: Role,
    },
    /// Links were sent to the unlocked roles' holders.
    Notified(DispatchReport),
    /// Every step is signed.
    Completed,
}

/// Result of verifying stored evidence.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationReport {
    /// Per-signature results computed from the embedded evidence.
    Embedded(Vec<VerificationResult>),
    /// The stored file has no embedded evidence for the signature(s); only
    /// the database records vouch for them. Lower assurance: never valid.
    DatabaseOnlyEvidence {
        /// Records the database holds
        records: Vec<SignatureRecord>,
        /// Why this is weaker than embedded verification
        warning: String,
    },
}

impl VerificationReport {
    /// Whether every signature verified from embedded evidence.
    pub fn is_valid(&self) -> bool {
        match self {
            VerificationReport::Embedded(results) => {
                !results.is_empty() && results.iter().all(|r| r.is_valid)
            },
            VerificationReport::DatabaseOnlyEvidence { .. } => false,
        }
    }
}

/// Locator of a document's uploaded file.
pub fn original_locator(document_id: &str) -> String {
    format!("documents/{}/original.pdf", document_id)
}

fn copy_locator(document_id: &str, signer_id: &str) -> String {
    format!("documents/{}/copies/{}.pdf", document_id, signer_id)
}

fn signed_locator(document_id: &str, signer_id: &str, signature_id: &str) -> String {
    format!("documents/{}/copies/{}/{}.pdf", document_id, signer_id, signature_id)
}

/// The signing workflow.
pub struct SigningService {
    config: SigningConfig,
    signer: PdfSigner,
    verifier: SignatureVerifier,
    store: Arc<dyn DocumentStore>,
    storage: Arc<dyn Storage>,
    identities: Arc<dyn IdentityProvider>,
    dispatcher: NotificationDispatcher,
}

impl std::fmt::Debug for SigningService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SigningService {
    /// Create a service over its collaborators.
    pub fn new(
        config: SigningConfig,
        store: Arc<dyn DocumentStore>,
        storage: Arc<dyn Storage>,
        identities: Arc<dyn IdentityProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            signer: PdfSigner::from_config(&config),
            verifier: SignatureVerifier::new(),
            dispatcher: NotificationDispatcher::new(notifier),
            config,
            store,
            storage,
            identities,
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &SigningConfig {
        &self.config
    }

    /// Load a document.
    pub fn document(&self, document_id: &str) -> Result<Document> {
        self.store
            .get(document_id)?
            .ok_or_else(|| Error::DocumentNotFound(document_id.to_string()))
    }

    /// Documents of an organization.
    pub fn documents(&self, organization_id: &str) -> Result<Vec<Document>> {
        self.store.list_by_org(organization_id)
    }

    /// Create a document with one copy per signer.
    ///
    /// The bytes must parse as a PDF. Every signer must belong to the
    /// organization and be listed once.
    pub fn upload(&self, request: UploadRequest) -> Result<Document> {
        PdfDocument::from_bytes(request.bytes.clone())?;

        let mut seen = HashSet::new();
        let mut identities = Vec::with_capacity(request.signers.len());
        for signer_id in &request.signers {
            if !seen.insert(signer_id.as_str()) {
                return Err(Error::InvalidSignatureConfig(format!("signer {} listed twice", signer_id)));
            }
            let identity = self.identities.resolve(signer_id)?;
            if identity.organization_id != request.organization_id {
                return Err(Error::UnknownIdentity(format!(
                    "{} is not a member of organization {}",
                    signer_id, request.organization_id
                )));
            }
            identities.push(identity);
        }

        let mut doc = Document::new(
            request.organization_id,
            request.title,
            request.original_filename,
            request.signature_config,
        );
        let mut written = Vec::new();
        let result = (|| -> Result<()> {
            written.push(self.storage.write(&original_locator(&doc.id), &request.bytes)?);
            for identity in &identities {
                let locator = self
                    .storage
                    .write(&copy_locator(&doc.id, &identity.employee_id), &request.bytes)?;
                written.push(locator.clone());
                doc.copies
                    .push(SignerCopy::new(identity.employee_id.clone(), identity.role, locator));
            }
            self.store.insert(doc.clone())
        })();
        if let Err(e) = result {
            self.discard(&written);
            return Err(e);
        }

        log::info!(
            "uploaded document {} '{}' with {} copies and {} steps",
            doc.id,
            doc.title,
            doc.copies.len(),
            doc.signature_config.len()
        );
        Ok(doc)
    }

    /// Public signing context for `signer_id`'s link.
    pub fn signing_details(&self, document_id: &str, signer_id: &str) -> Result<SigningDetails> {
        let doc = self.document(document_id)?;
        let copy = doc.copy_for(signer_id).ok_or_else(|| Error::MissingSignerCopy {
            document_id: doc.id.clone(),
            signer: signer_id.to_string(),
        })?;
        let identity = self.identities.resolve(signer_id)?;
        let verdict = sequence::check(&doc, &identity);
        Ok(SigningDetails {
            document_id: doc.id.clone(),
            title: doc.title.clone(),
            organization_id: doc.organization_id.clone(),
            signer_id: signer_id.to_string(),
            signer_name: identity.display_name,
            role: copy.role,
            copy_status: copy.status,
            can_sign: verdict.is_ok(),
            reason: verdict.err().map(|e| e.to_string()),
            status: doc.status,
            progress: doc.signature_progress.clone(),
        })
    }

    /// Whether `signer_id` may sign now.
    pub fn can_sign(&self, document_id: &str, signer_id: &str) -> Result<bool> {
        let doc = self.document(document_id)?;
        let identity = self.identities.resolve(signer_id)?;
        Ok(sequence::can_sign(&doc, &identity))
    }

    /// Sign `signer_id`'s copy.
    ///
    /// The ordering checks run again against the freshest document before
    /// the commit, which is a compare-and-swap on [`Document::revision`]. A
    /// losing racer gets [`Error::AlreadySigned`] or
    /// [`Error::OutOfOrderSigning`]; its staged revision is deleted. When the
    /// document keeps changing for unrelated reasons the attempt is retried
    /// up to `max_sign_attempts` times, then fails with
    /// [`Error::ConcurrentModification`].
    pub fn sign(&self, document_id: &str, signer_id: &str) -> Result<SignOutcome> {
        let identity = self.identities.resolve(signer_id)?;
        let attempts = self.config.max_sign_attempts.max(1);

        for attempt in 1..=attempts {
            let doc = self.document(document_id)?;
            sequence::check(&doc, &identity)?;

            let source = signing_source(&doc, signer_id)?;
            let bytes = self.storage.read(&source)?;
            let signed = self.signer.sign(&bytes, &identity)?;
            let locator = self.storage.write(
                &signed_locator(&doc.id, signer_id, &signed.info.signature_id),
                &signed.bytes,
            )?;

            let completed = CompletedSignature {
                info: signed.info.clone(),
                metadata: signed.metadata.clone(),
                locator: locator.clone(),
                signed_at: chrono::Utc::now(),
            };
            let next = match sequence::record_signature(&doc, &identity, completed) {
                Ok(next) => next,
                Err(e) => {
                    self.discard(&[locator]);
                    return Err(e);
                },
            };

            let committed = match self.store.compare_and_swap(doc.revision, &next) {
                Ok(committed) => committed,
                Err(e) => {
                    self.discard(&[locator]);
                    return Err(e);
                },
            };
            if committed {
                let notifications = self.notify_unlocked(&doc, &next);
                let document = match self.mark_notified(&next.id, &notifications.delivered) {
                    Ok(marked) => marked,
                    Err(e) => {
                        log::warn!("document {}: could not mark copies as sent: {}", next.id, e);
                        next
                    },
                };
                return Ok(SignOutcome {
                    document,
                    signature: signed.info,
                    locator,
                    presented_hash: signed.presented_hash,
                    notifications,
                });
            }

            self.discard(&[locator]);
            let fresh = self.document(document_id)?;
            sequence::check(&fresh, &identity)?;
            log::debug!(
                "document {} changed during sign by {} (attempt {}/{})",
                document_id,
                signer_id,
                attempt,
                attempts
            );
        }

        log::warn!("giving up signing {} as {} after {} attempts", document_id, signer_id, attempts);
        Err(Error::ConcurrentModification(document_id.to_string()))
    }

    /// Ask the roles whose turn it is to sign.
    ///
    /// If the first step belongs to the org admin and `actor_id` is that
    /// admin, no link is sent: the admin signs interactively. Otherwise every
    /// unsigned copy of the unlocked roles is sent a link and moves to
    /// `pending_signature`.
    pub fn send_to_sign(&self, document_id: &str, actor_id: &str) -> Result<SendToSignOutcome> {
        let doc = self.document(document_id)?;
        if doc.signature_config.is_empty() {
            return Err(Error::InvalidSignatureConfig(format!(
                "document {} has no signing steps",
                doc.id
            )));
        }
        let Some(next_role) = sequence::next_role_to_notify(&doc) else {
            return Ok(SendToSignOutcome::Completed);
        };

        let actor = self.identities.resolve(actor_id)?;
        let first_is_admin = doc.signature_config.first().map(|s| s.role) == Some(Role::OrgAdmin);
        if first_is_admin
            && next_role == Role::OrgAdmin
            && actor.role == Role::OrgAdmin
            && actor.organization_id == doc.organization_id
            && doc.copy_for(actor_id).is_some()
        {
            log::info!("document {}: admin {} signs first interactively", doc.id, actor_id);
            return Ok(SendToSignOutcome::SignInteractively { role: Role::OrgAdmin });
        }

        let requests = self.requests_for(&doc, &sequence::notifiable_roles(&doc))?;
        let report = self.dispatcher.dispatch(&requests);
        if let Err(e) = self.mark_notified(&doc.id, &report.delivered) {
            log::warn!("document {}: could not mark copies as sent: {}", doc.id, e);
        }
        Ok(SendToSignOutcome::Notified(report))
    }

    /// Mark `signer_id`'s copy as declined.
    pub fn decline(&self, document_id: &str, signer_id: &str) -> Result<Document> {
        self.update(document_id, |doc| sequence::record_decline(doc, signer_id))
    }

    /// Verify one signature.
    ///
    /// Reads the revision the signature was committed with and checks its
    /// embedded evidence. When the file carries no evidence for it, the
    /// database record is returned as [`VerificationReport::DatabaseOnlyEvidence`].
    pub fn verify_signature(&self, document_id: &str, signature_id: &str) -> Result<VerificationReport> {
        let doc = self.document(document_id)?;
        let record = doc
            .signature_progress
            .find_signature(signature_id)
            .cloned()
            .ok_or_else(|| Error::SignatureNotFound(signature_id.to_string()))?;
        let copy = doc
            .copies
            .iter()
            .find(|c| c.signature_id.as_deref() == Some(signature_id))
            .ok_or_else(|| Error::SignatureNotFound(signature_id.to_string()))?;

        let bytes = self.storage.read(&copy.locator)?;
        let result = self
            .verifier
            .verify(&bytes)?
            .into_iter()
            .find(|r| r.signature_id == signature_id);
        Ok(match result {
            Some(result) => VerificationReport::Embedded(vec![result]),
            None => database_only(vec![record]),
        })
    }

    /// Verify every signature in the newest signed revision.
    pub fn verify_document(&self, document_id: &str) -> Result<VerificationReport> {
        let doc = self.document(document_id)?;
        if doc.signature_progress.signatures.is_empty() {
            return Ok(VerificationReport::Embedded(Vec::new()));
        }
        let source = signing_source(&doc, "")?;
        let results = self.verifier.verify(&self.storage.read(&source)?)?;
        if results.is_empty() {
            return Ok(database_only(doc.signature_progress.signatures.clone()));
        }
        Ok(VerificationReport::Embedded(results))
    }

    /// Delete a document and every physical revision of its copies.
    ///
    /// Files go first; if one cannot be deleted the document stays so the
    /// deletion can be retried.
    pub fn delete_document(&self, document_id: &str) -> Result<()> {
        let doc = self.document(document_id)?;
        let mut locators = vec![original_locator(&doc.id)];
        for copy in &doc.copies {
            locators.extend(copy.revisions.iter().cloned());
        }
        for locator in &locators {
            self.storage.delete(locator)?;
        }
        self.store.remove(&doc.id)?;
        log::info!("deleted document {} and {} files", doc.id, locators.len());
        Ok(())
    }

    fn requests_for(&self, doc: &Document, roles: &[Role]) -> Result<Vec<SignRequest>> {
        let mut requests = Vec::new();
        for &role in roles {
            for copy in doc.copies_for_role(role).filter(|c| !c.is_signed()) {
                let recipient = match self.identities.resolve(&copy.signer_id) {
                    Ok(identity) => identity,
                    Err(e) => {
                        log::warn!("document {}: skipping {}: {}", doc.id, copy.signer_id, e);
                        continue;
                    },
                };
                requests.push(SignRequest {
                    role,
                    organization_id: doc.organization_id.clone(),
                    document_id: doc.id.clone(),
                    recipient: copy.signer_id.clone(),
                    email: recipient.email,
                    sign_link: self.config.sign_link(&doc.id, &copy.signer_id),
                });
            }
        }
        Ok(requests)
    }

    /// Notify the roles `after` unlocks that `before` did not.
    fn notify_unlocked(&self, before: &Document, after: &Document) -> DispatchReport {
        let already = sequence::notifiable_roles(before);
        let unlocked: Vec<Role> = sequence::notifiable_roles(after)
            .into_iter()
            .filter(|role| !already.contains(role))
            .collect();
        if unlocked.is_empty() {
            return DispatchReport::default();
        }
        match self.requests_for(after, &unlocked) {
            Ok(requests) => self.dispatcher.dispatch(&requests),
            Err(e) => {
                log::warn!("document {}: no notifications sent: {}", after.id, e);
                DispatchReport::default()
            },
        }
    }

    fn mark_notified(&self, document_id: &str, recipients: &[String]) -> Result<Document> {
        self.update(document_id, |doc| Ok(sequence::mark_pending_signature(doc, recipients)))
    }

    /// Apply `change` under compare-and-swap, retrying on conflicts.
    fn update<F>(&self, document_id: &str, change: F) -> Result<Document>
    where
        F: Fn(&Document) -> Result<Document>,
    {
        for _ in 0..self.config.max_sign_attempts.max(1) {
            let doc = self.document(document_id)?;
            let next = change(&doc)?;
            if next.revision == doc.revision {
                return Ok(next);
            }
            if self.store.compare_and_swap(doc.revision, &next)? {
                return Ok(next);
            }
        }
        Err(Error::ConcurrentModification(document_id.to_string()))
    }

    fn discard(&self, locators: &[String]) {
        for locator in locators {
            if let Err(e) = self.storage.delete(locator) {
                log::warn!("could not delete staged file {}: {}", locator, e);
            }
        }
    }
}

/// Locator to sign from: the newest signed revision, else the signer's copy.
fn signing_source(doc: &Document, signer_id: &str) -> Result<String> {
    if let Some(last) = doc.signature_progress.signatures.last() {
        let id = &last.signature_info.signature_id;
        return doc
            .copies
            .iter()
            .find(|c| c.signature_id.as_deref() == Some(id.as_str()))
            .map(|c| c.locator.clone())
            .ok_or_else(|| Error::SignatureNotFound(id.clone()));
    }
    doc.copy_for(signer_id)
        .map(|c| c.locator.clone())
        .ok_or_else(|| Error::MissingSignerCopy {
            document_id: doc.id.clone(),
            signer: signer_id.to_string(),
        })
}

fn database_only(records: Vec<SignatureRecord>) -> VerificationReport {
    log::warn!("falling back to database-only evidence for {} signature(s)", records.len());
    VerificationReport::DatabaseOnlyEvidence {
        records,
        warning: DATABASE_ONLY_WARNING.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::collaborators::{MemoryDirectory, MemoryStorage};
    use crate::workflow::model::{SignatureStep, SignerIdentity};
    use crate::workflow::notify::MemoryNotifier;
    use crate::workflow::store::MemoryDocumentStore;
    use crate::writer::{PdfWriter, PdfWriterConfig};

    fn identity(id: &str, role: Role) -> SignerIdentity {
        SignerIdentity {
            employee_id: id.into(),
            role,
            organization_id: "org".into(),
            organization_name: "Acme".into(),
            display_name: format!("User {}", id),
            email: format!("{}@acme.test", id),
        }
    }

    fn pdf() -> Vec<u8> {
        let mut writer = PdfWriter::new(PdfWriterConfig::default());
        writer.add_letter_page().text("Agreement", 72.0, 720.0, 12.0);
        writer.finish().unwrap()
    }

    struct Fixture {
        service: SigningService,
        storage: MemoryStorage,
        notifier: MemoryNotifier,
    }

    fn fixture() -> Fixture {
        let directory = MemoryDirectory::new()
            .with_identity(identity("admin", Role::OrgAdmin))
            .with_identity(identity("emp", Role::Employee));
        let storage = MemoryStorage::new();
        let notifier = MemoryNotifier::new();
        let service = SigningService::new(
            SigningConfig::default().with_qr(false),
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(storage.clone()),
            Arc::new(directory),
            Arc::new(notifier.clone()),
        );
        Fixture {
            service,
            storage,
            notifier,
        }
    }

    fn upload(service: &SigningService) -> Document {
        service
            .upload(UploadRequest {
                organization_id: "org".into(),
                title: "Agreement".into(),
                original_filename: "agreement.pdf".into(),
                bytes: pdf(),
                signature_config: SignatureConfig::new(vec![
                    SignatureStep::new(Role::OrgAdmin, 1),
                    SignatureStep::new(Role::Employee, 2),
                ])
                .unwrap(),
                signers: vec!["admin".into(), "emp".into()],
            })
            .unwrap()
    }

    #[test]
    fn test_upload_writes_copies() {
        let f = fixture();
        let doc = upload(&f.service);
        assert_eq!(doc.copies.len(), 2);
        assert!(f.storage.contains(&original_locator(&doc.id)));
        assert!(f.storage.contains(&copy_locator(&doc.id, "emp")));
    }

    #[test]
    fn test_upload_rejects_non_pdf_and_unknown_signer() {
        let f = fixture();
        let mut request = UploadRequest {
            organization_id: "org".into(),
            title: "T".into(),
            original_filename: "t.pdf".into(),
            bytes: b"not a pdf".to_vec(),
            signature_config: SignatureConfig::default(),
            signers: vec![],
        };
        assert!(f.service.upload(request.clone()).is_err());

        request.bytes = pdf();
        request.signers = vec!["ghost".into()];
        assert!(matches!(f.service.upload(request), Err(Error::UnknownIdentity(_))));
        assert!(f.storage.is_empty());
    }

    #[test]
    fn test_sign_then_verify() {
        let f = fixture();
        let doc = upload(&f.service);

        let outcome = f.service.sign(&doc.id, "admin").unwrap();
        assert_eq!(outcome.document.signature_progress.current_step, 1);
        assert_eq!(outcome.notifications.delivered, vec!["emp".to_string()]);
        assert_eq!(
            outcome.document.copy_for("emp").unwrap().status,
            CopyStatus::PendingSignature
        );

        let outcome = f.service.sign(&doc.id, "emp").unwrap();
        assert_eq!(outcome.document.status, DocumentStatus::Completed);

        let report = f.service.verify_document(&doc.id).unwrap();
        match &report {
            VerificationReport::Embedded(results) => assert_eq!(results.len(), 2),
            other => panic!("unexpected report {:?}", other),
        }
        assert!(report.is_valid());
        assert!(f
            .service
            .verify_signature(&doc.id, &outcome.signature.signature_id)
            .unwrap()
            .is_valid());
    }

    #[test]
    fn test_admin_first_signs_interactively() {
        let f = fixture();
        let doc = upload(&f.service);
        assert_eq!(
            f.service.send_to_sign(&doc.id, "admin").unwrap(),
            SendToSignOutcome::SignInteractively { role: Role::OrgAdmin }
        );
        assert!(f.notifier.sent().is_empty());
    }

    #[test]
    fn test_details_explain_refusal() {
        let f = fixture();
        let doc = upload(&f.service);
        let details = f.service.signing_details(&doc.id, "emp").unwrap();
        assert!(!details.can_sign);
        assert!(details.reason.unwrap().contains("org_admin"));
        assert!(f.service.signing_details(&doc.id, "admin").unwrap().can_sign);
    }
}
