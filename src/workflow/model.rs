//! Workflow data model.
//!
//! A [`Document`] is the aggregate root: it owns its [`SignatureConfig`], its
//! [`SignatureProgress`] and one [`SignerCopy`] per signer. Every mutation goes
//! through [`crate::workflow::sequence`] and is persisted with a
//! compare-and-swap on [`Document::revision`].

use crate::error::{Error, Result};
use crate::signatures::{SignatureInfo, SignatureMetadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Closed set of roles that can hold a signing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Organization administrator
    OrgAdmin,
    /// External collaborator
    Collaborator,
    /// Employee of the organization
    Employee,
}

impl Role {
    /// All roles, in declaration order.
    pub const ALL: [Role; 3] = [Role::OrgAdmin, Role::Collaborator, Role::Employee];

    /// Wire name (`org_admin`, `collaborator`, `employee`).
    pub fn as_str(self) -> &'static str {
        match self {
            Role::OrgAdmin => "org_admin",
            Role::Collaborator => "collaborator",
            Role::Employee => "employee",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| Error::InvalidSignatureConfig(format!("unknown role '{}'", s)))
    }
}

fn default_required() -> bool {
    true
}

/// One entry of a signature configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureStep {
    /// Role that signs at this step
    pub role: Role,
    /// Precedence; lower signs first
    pub order: u32,
    /// Whether the organization marked this step as mandatory. Recorded
    /// with the configuration; every step gates later steps and counts
    /// towards completion either way.
    #[serde(default = "default_required")]
    pub required: bool,
}

impl SignatureStep {
    /// A required step.
    pub fn new(role: Role, order: u32) -> Self {
        Self {
            role,
            order,
            required: true,
        }
    }
}

/// Validated, order-sorted list of signing steps.
///
/// Orders are unique positive integers and each role appears at most once.
/// An empty configuration is valid but never signable.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<SignatureStep>", into = "Vec<SignatureStep>")]
pub struct SignatureConfig {
    steps: Vec<SignatureStep>,
}

impl SignatureConfig {
    /// Validate and sort `steps`.
    pub fn new(mut steps: Vec<SignatureStep>) -> Result<Self> {
        let mut orders = HashSet::new();
        let mut roles = HashSet::new();
        for step in &steps {
            if step.order == 0 {
                return Err(Error::InvalidSignatureConfig(format!(
                    "order of {} must be a positive integer",
                    step.role
                )));
            }
            if !orders.insert(step.order) {
                return Err(Error::InvalidSignatureConfig(format!("order {} is used twice", step.order)));
            }
            if !roles.insert(step.role) {
                return Err(Error::InvalidSignatureConfig(format!(
                    "role {} appears more than once",
                    step.role
                )));
            }
        }
        steps.sort_by_key(|step| step.order);
        Ok(Self { steps })
    }

    /// Steps sorted by order.
    pub fn steps(&self) -> &[SignatureStep] {
        &self.steps
    }

    /// Step configured for `role`.
    pub fn step_for(&self, role: Role) -> Option<&SignatureStep> {
        self.steps.iter().find(|step| step.role == role)
    }

    /// Lowest-order step.
    pub fn first(&self) -> Option<&SignatureStep> {
        self.steps.first()
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether no step is configured.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl TryFrom<Vec<SignatureStep>> for SignatureConfig {
    type Error = Error;

    fn try_from(steps: Vec<SignatureStep>) -> Result<Self> {
        SignatureConfig::new(steps)
    }
}

impl From<SignatureConfig> for Vec<SignatureStep> {
    fn from(config: SignatureConfig) -> Self {
        config.steps
    }
}

/// Who a signer is, as supplied by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerIdentity {
    /// Employee (or admin) identifier
    pub employee_id: String,
    /// Role held within the organization
    pub role: Role,
    /// Organization identifier
    pub organization_id: String,
    /// Organization display name
    pub organization_name: String,
    /// Name shown on the stamp and certificate
    pub display_name: String,
    /// Contact address for signing links
    pub email: String,
}

/// Status of one signer's copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyStatus {
    /// Created, signer not yet asked
    Pending,
    /// Signer has been sent a signing link
    PendingSignature,
    /// Signed; terminal
    Signed,
    /// Signer declined
    Rejected,
}

/// The physical revision line owned by one signer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerCopy {
    /// Employee identifier of the owner
    pub signer_id: String,
    /// Role the owner signs as
    pub role: Role,
    /// Locator of the current revision
    pub locator: String,
    /// Every locator this copy has pointed at, oldest first
    pub revisions: Vec<String>,
    /// Copy status
    pub status: CopyStatus,
    /// When the copy was signed
    pub signed_at: Option<DateTime<Utc>>,
    /// Content hash of the stamped revision
    pub document_hash: Option<String>,
    /// Identifier of the signature on this copy
    pub signature_id: Option<String>,
    /// Evidence metadata embedded in the signed revision
    pub metadata: Option<SignatureMetadata>,
}

impl SignerCopy {
    /// A fresh copy at `locator`.
    pub fn new(signer_id: impl Into<String>, role: Role, locator: impl Into<String>) -> Self {
        let locator = locator.into();
        Self {
            signer_id: signer_id.into(),
            role,
            revisions: vec![locator.clone()],
            locator,
            status: CopyStatus::Pending,
            signed_at: None,
            document_hash: None,
            signature_id: None,
            metadata: None,
        }
    }

    /// Whether this copy already carries a signature.
    pub fn is_signed(&self) -> bool {
        self.status == CopyStatus::Signed
    }
}

/// Signer details recorded with a signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct SignedBy {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub organization: String,
}

impl From<&SignerIdentity> for SignedBy {
    fn from(identity: &SignerIdentity) -> Self {
        Self {
            id: identity.employee_id.clone(),
            name: identity.display_name.clone(),
            email: identity.email.clone(),
            role: identity.role,
            organization: identity.organization_name.clone(),
        }
    }
}

/// One completed signature in a document's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureRecord {
    /// Signature summary shared with the embedded evidence
    pub signature_info: SignatureInfo,
    /// Who signed
    pub signed_by: SignedBy,
    /// When the record was committed
    pub signed_at: DateTime<Utc>,
}

/// Append-only signing progress.
///
/// `current_step == signatures.len()` after every transition.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureProgress {
    /// Completed steps
    pub current_step: u32,
    /// Configured steps
    pub total_steps: u32,
    /// Completed signatures in signing order
    pub signatures: Vec<SignatureRecord>,
}

impl SignatureProgress {
    /// Zero progress over `total_steps` steps.
    pub fn new(total_steps: u32) -> Self {
        Self {
            current_step: 0,
            total_steps,
            signatures: Vec::new(),
        }
    }

    /// Record for `role`, if that role has signed.
    pub fn record_for(&self, role: Role) -> Option<&SignatureRecord> {
        self.signatures.iter().find(|record| record.signed_by.role == role)
    }

    /// Record with the given signature id.
    pub fn find_signature(&self, signature_id: &str) -> Option<&SignatureRecord> {
        self.signatures
            .iter()
            .find(|record| record.signature_info.signature_id == signature_id)
    }
}

/// Overall document status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Nobody has signed yet
    Pending,
    /// Some but not all steps are signed
    InProgress,
    /// Every step is signed
    Completed,
}

/// The document aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Document identifier
    pub id: String,
    /// Owning organization
    pub organization_id: String,
    /// Unique within the organization
    pub title: String,
    /// Unique within the organization
    pub original_filename: String,
    /// Ordered signing steps
    pub signature_config: SignatureConfig,
    /// Append-only progress
    pub signature_progress: SignatureProgress,
    /// Overall status
    pub status: DocumentStatus,
    /// One copy per signer
    pub copies: Vec<SignerCopy>,
    /// Bumped on every persisted change; the compare-and-swap key
    pub revision: u64,
    /// Upload time
    pub created_at: DateTime<Utc>,
    /// Last persisted change
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// New document with zero progress.
    pub fn new(
        organization_id: impl Into<String>,
        title: impl Into<String>,
        original_filename: impl Into<String>,
        signature_config: SignatureConfig,
    ) -> Self {
        let now = Utc::now();
        let total_steps = signature_config.len() as u32;
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            organization_id: organization_id.into(),
            title: title.into(),
            original_filename: original_filename.into(),
            signature_config,
            signature_progress: SignatureProgress::new(total_steps),
            status: DocumentStatus::Pending,
            copies: Vec::new(),
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy owned by `signer_id`.
    pub fn copy_for(&self, signer_id: &str) -> Option<&SignerCopy> {
        self.copies.iter().find(|copy| copy.signer_id == signer_id)
    }

    pub(crate) fn copy_for_mut(&mut self, signer_id: &str) -> Option<&mut SignerCopy> {
        self.copies.iter_mut().find(|copy| copy.signer_id == signer_id)
    }

    /// Whether any holder of `role` has signed.
    pub fn has_signed(&self, role: Role) -> bool {
        self.signature_progress.record_for(role).is_some()
    }

    /// Copies held by `role`.
    pub fn copies_for_role(&self, role: Role) -> impl Iterator<Item = &SignerCopy> {
        self.copies.iter().filter(move |copy| copy.role == role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_str() {
        for role in Role::ALL {
            assert_eq!(role.to_string().parse::<Role>().unwrap(), role);
        }
        assert!("admin".parse::<Role>().is_err());
        assert_eq!(serde_json::to_string(&Role::OrgAdmin).unwrap(), "\"org_admin\"");
    }

    #[test]
    fn test_config_sorted_by_order() {
        let config = SignatureConfig::new(vec![
            SignatureStep::new(Role::Employee, 3),
            SignatureStep::new(Role::OrgAdmin, 1),
            SignatureStep::new(Role::Collaborator, 2),
        ])
        .unwrap();
        let roles: Vec<Role> = config.steps().iter().map(|s| s.role).collect();
        assert_eq!(roles, vec![Role::OrgAdmin, Role::Collaborator, Role::Employee]);
        assert_eq!(config.first().unwrap().role, Role::OrgAdmin);
    }

    #[test]
    fn test_config_rejects_duplicate_role() {
        let err = SignatureConfig::new(vec![
            SignatureStep::new(Role::Employee, 1),
            SignatureStep::new(Role::Employee, 2),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::InvalidSignatureConfig(_)));
    }

    #[test]
    fn test_config_rejects_duplicate_or_zero_order() {
        assert!(SignatureConfig::new(vec![
            SignatureStep::new(Role::Employee, 1),
            SignatureStep::new(Role::OrgAdmin, 1),
        ])
        .is_err());
        assert!(SignatureConfig::new(vec![SignatureStep::new(Role::Employee, 0)]).is_err());
        assert!(SignatureConfig::new(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn test_config_deserialize_validates() {
        let ok: SignatureConfig =
            serde_json::from_str(r#"[{"role":"employee","order":2},{"role":"org_admin","order":1}]"#).unwrap();
        assert_eq!(ok.len(), 2);
        assert!(ok.steps().iter().all(|s| s.required));

        let bad = serde_json::from_str::<SignatureConfig>(
            r#"[{"role":"employee","order":1},{"role":"employee","order":2}]"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_new_document_has_zero_progress() {
        let config = SignatureConfig::new(vec![SignatureStep::new(Role::OrgAdmin, 1)]).unwrap();
        let doc = Document::new("org", "NDA", "nda.pdf", config);
        assert_eq!(doc.signature_progress.current_step, 0);
        assert_eq!(doc.signature_progress.total_steps, 1);
        assert_eq!(doc.status, DocumentStatus::Pending);
        assert!(!doc.has_signed(Role::OrgAdmin));
    }
}
