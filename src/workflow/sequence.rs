//! Signing sequence state machine.
//!
//! Pure functions over a [`Document`] value: nothing here touches storage, so
//! the same checks run before the expensive signing work and again against the
//! freshest aggregate right before the compare-and-swap that commits it.
//!
//! Ordering is by role: a step is unlocked once every step with a lower order
//! has a signature from any holder of its role. The `required` flag of a step
//! does not relax this.

use super::model::{CopyStatus, Document, DocumentStatus, Role, SignatureRecord, SignedBy, SignerIdentity};
use crate::error::{Error, Result};
use crate::signatures::{SignatureInfo, SignatureMetadata};
use chrono::{DateTime, Utc};

/// A signature produced for a signer's copy, ready to be recorded.
#[derive(Debug, Clone)]
pub struct CompletedSignature {
    /// Signature summary (post-stamp hash)
    pub info: SignatureInfo,
    /// Embedded metadata
    pub metadata: SignatureMetadata,
    /// Locator of the signed revision
    pub locator: String,
    /// Signing time
    pub signed_at: DateTime<Utc>,
}

/// Lowest-order step before `role`'s step that has no signature.
pub fn blocking_role(doc: &Document, role: Role) -> Option<Role> {
    let step = doc.signature_config.step_for(role)?;
    doc.signature_config
        .steps()
        .iter()
        .take_while(|s| s.order < step.order)
        .find(|s| !doc.has_signed(s.role))
        .map(|s| s.role)
}

/// Check whether `signer` may sign `doc` now.
///
/// # Errors
///
/// - [`Error::MissingSignerCopy`] if the signer has no copy
/// - [`Error::AlreadySigned`] if the copy, or the signer's step, is signed
/// - [`Error::MissingRoleConfig`] if the role has no step (always the case
///   for an empty configuration)
/// - [`Error::OutOfOrderSigning`] if an earlier step is unsigned
pub fn check(doc: &Document, signer: &SignerIdentity) -> Result<()> {
    let copy = doc.copy_for(&signer.employee_id).ok_or_else(|| Error::MissingSignerCopy {
        document_id: doc.id.clone(),
        signer: signer.employee_id.clone(),
    })?;
    if copy.is_signed() {
        return Err(Error::AlreadySigned(format!(
            "copy of {} on document {} is already signed",
            signer.employee_id, doc.id
        )));
    }
    if doc.signature_config.step_for(signer.role).is_none() {
        return Err(Error::MissingRoleConfig {
            document_id: doc.id.clone(),
            role: signer.role,
        });
    }
    if doc.has_signed(signer.role) {
        return Err(Error::AlreadySigned(format!(
            "the {} step of document {} is already signed",
            signer.role, doc.id
        )));
    }
    if let Some(waiting_on) = blocking_role(doc, signer.role) {
        return Err(Error::OutOfOrderSigning {
            role: signer.role,
            waiting_on,
        });
    }
    Ok(())
}

/// Whether `signer` may sign `doc` now.
pub fn can_sign(doc: &Document, signer: &SignerIdentity) -> bool {
    check(doc, signer).is_ok()
}

/// Record a completed signature, returning the next aggregate value.
///
/// Re-runs [`check`] against `doc`; on success the record is appended,
/// `current_step` advances, the signer's copy moves to `signed` and
/// `revision` is bumped.
pub fn record_signature(
    doc: &Document,
    signer: &SignerIdentity,
    signature: CompletedSignature,
) -> Result<Document> {
    check(doc, signer)?;

    let mut next = doc.clone();
    let copy = next
        .copy_for_mut(&signer.employee_id)
        .ok_or_else(|| Error::MissingSignerCopy {
            document_id: doc.id.clone(),
            signer: signer.employee_id.clone(),
        })?;
    copy.status = CopyStatus::Signed;
    copy.signed_at = Some(signature.signed_at);
    copy.document_hash = Some(signature.info.document_hash.clone());
    copy.signature_id = Some(signature.info.signature_id.clone());
    copy.metadata = Some(signature.metadata);
    copy.revisions.push(signature.locator.clone());
    copy.locator = signature.locator;

    let progress = &mut next.signature_progress;
    progress.signatures.push(SignatureRecord {
        signature_info: signature.info,
        signed_by: SignedBy::from(signer),
        signed_at: signature.signed_at,
    });
    progress.current_step = progress.signatures.len() as u32;
    next.status = if progress.current_step >= progress.total_steps {
        DocumentStatus::Completed
    } else {
        DocumentStatus::InProgress
    };
    next.revision += 1;
    next.updated_at = Utc::now();

    log::debug!(
        "document {}: {} signed, step {}/{}",
        next.id,
        signer.role,
        next.signature_progress.current_step,
        next.signature_progress.total_steps
    );
    Ok(next)
}

/// Lowest-order role that has not signed yet; `None` once fully signed or
/// when nothing is configured.
pub fn next_role_to_notify(doc: &Document) -> Option<Role> {
    doc.signature_config
        .steps()
        .iter()
        .find(|s| !doc.has_signed(s.role))
        .map(|s| s.role)
}

/// Unsigned roles whose steps are unlocked now, in order.
///
/// Holds at most one role, the one [`next_role_to_notify`] returns.
pub fn notifiable_roles(doc: &Document) -> Vec<Role> {
    doc.signature_config
        .steps()
        .iter()
        .filter(|s| !doc.has_signed(s.role) && blocking_role(doc, s.role).is_none())
        .map(|s| s.role)
        .collect()
}

/// Mark `signer_id`'s copy as declined.
///
/// A declined copy may still sign later.
pub fn record_decline(doc: &Document, signer_id: &str) -> Result<Document> {
    let mut next = doc.clone();
    let copy = next.copy_for_mut(signer_id).ok_or_else(|| Error::MissingSignerCopy {
        document_id: doc.id.clone(),
        signer: signer_id.to_string(),
    })?;
    if copy.is_signed() {
        return Err(Error::AlreadySigned(format!(
            "copy of {} on document {} is already signed",
            signer_id, doc.id
        )));
    }
    copy.status = CopyStatus::Rejected;
    next.revision += 1;
    next.updated_at = Utc::now();
    Ok(next)
}

/// Mark the given signers' unsigned copies as awaiting their signature.
pub fn mark_pending_signature(doc: &Document, signer_ids: &[String]) -> Document {
    let mut next = doc.clone();
    let mut changed = false;
    for copy in next.copies.iter_mut() {
        if signer_ids.contains(&copy.signer_id) && copy.status == CopyStatus::Pending {
            copy.status = CopyStatus::PendingSignature;
            changed = true;
        }
    }
    if changed {
        next.revision += 1;
        next.updated_at = Utc::now();
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::{CertificateInfo, CertificateValidity};
    use crate::workflow::model::{SignatureConfig, SignatureStep, SignerCopy};

    fn identity(id: &str, role: Role) -> SignerIdentity {
        SignerIdentity {
            employee_id: id.into(),
            role,
            organization_id: "org".into(),
            organization_name: "Org".into(),
            display_name: id.into(),
            email: format!("{}@org.test", id),
        }
    }

    fn completed(id: &str) -> CompletedSignature {
        let now = Utc::now();
        CompletedSignature {
            info: SignatureInfo {
                signature_id: format!("sig-{}", id),
                signer_name: id.into(),
                signer_email: String::new(),
                organization: "Org".into(),
                document_hash: "00".repeat(32),
                timestamp: now.to_rfc3339(),
                signature_type: "electronic".into(),
            },
            metadata: SignatureMetadata::new(
                CertificateInfo {
                    subject: String::new(),
                    issuer: String::new(),
                    validity: CertificateValidity {
                        not_before: String::new(),
                        not_after: String::new(),
                    },
                    serial_number: String::new(),
                },
                now.to_rfc3339(),
            ),
            locator: format!("signed/{}", id),
            signed_at: now,
        }
    }

    fn three_role_doc() -> Document {
        let config = SignatureConfig::new(vec![
            SignatureStep::new(Role::OrgAdmin, 1),
            SignatureStep::new(Role::Collaborator, 2),
            SignatureStep::new(Role::Employee, 3),
        ])
        .unwrap();
        let mut doc = Document::new("org", "D", "d.pdf", config);
        doc.copies = vec![
            SignerCopy::new("admin", Role::OrgAdmin, "c/admin"),
            SignerCopy::new("collab", Role::Collaborator, "c/collab"),
            SignerCopy::new("emp", Role::Employee, "c/emp"),
            SignerCopy::new("emp2", Role::Employee, "c/emp2"),
        ];
        doc
    }

    #[test]
    fn test_three_role_scenario() {
        let doc = three_role_doc();
        let admin = identity("admin", Role::OrgAdmin);
        let collab = identity("collab", Role::Collaborator);
        let emp = identity("emp", Role::Employee);

        let err = record_signature(&doc, &emp, completed("emp")).unwrap_err();
        assert!(matches!(
            err,
            Error::OutOfOrderSigning {
                role: Role::Employee,
                waiting_on: Role::OrgAdmin
            }
        ));
        assert_eq!(next_role_to_notify(&doc), Some(Role::OrgAdmin));

        let doc = record_signature(&doc, &admin, completed("admin")).unwrap();
        assert_eq!(doc.signature_progress.current_step, 1);
        assert_eq!(doc.status, DocumentStatus::InProgress);
        assert_eq!(next_role_to_notify(&doc), Some(Role::Collaborator));

        let doc = record_signature(&doc, &collab, completed("collab")).unwrap();
        assert_eq!(doc.signature_progress.current_step, 2);
        assert_eq!(next_role_to_notify(&doc), Some(Role::Employee));

        let doc = record_signature(&doc, &emp, completed("emp")).unwrap();
        assert_eq!(doc.signature_progress.current_step, 3);
        assert_eq!(doc.signature_progress.total_steps, 3);
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert_eq!(next_role_to_notify(&doc), None);
        assert_eq!(doc.revision, 3);
    }

    #[test]
    fn test_double_sign_rejected() {
        let doc = three_role_doc();
        let admin = identity("admin", Role::OrgAdmin);
        let doc = record_signature(&doc, &admin, completed("admin")).unwrap();
        assert!(matches!(
            record_signature(&doc, &admin, completed("admin")),
            Err(Error::AlreadySigned(_))
        ));
    }

    #[test]
    fn test_second_holder_of_signed_role_rejected() {
        let mut doc = three_role_doc();
        for signer in [
            identity("admin", Role::OrgAdmin),
            identity("collab", Role::Collaborator),
            identity("emp", Role::Employee),
        ] {
            doc = record_signature(&doc, &signer, completed(&signer.employee_id)).unwrap();
        }
        let err = check(&doc, &identity("emp2", Role::Employee)).unwrap_err();
        assert!(matches!(err, Error::AlreadySigned(_)));
    }

    #[test]
    fn test_missing_copy_and_role() {
        let doc = three_role_doc();
        assert!(matches!(
            check(&doc, &identity("stranger", Role::Employee)),
            Err(Error::MissingSignerCopy { .. })
        ));

        let config = SignatureConfig::new(vec![SignatureStep::new(Role::OrgAdmin, 1)]).unwrap();
        let mut doc = Document::new("org", "D", "d.pdf", config);
        doc.copies.push(SignerCopy::new("emp", Role::Employee, "c/emp"));
        assert!(matches!(
            check(&doc, &identity("emp", Role::Employee)),
            Err(Error::MissingRoleConfig { .. })
        ));
    }

    #[test]
    fn test_empty_config_never_signable() {
        let mut doc = Document::new("org", "D", "d.pdf", SignatureConfig::default());
        doc.copies.push(SignerCopy::new("admin", Role::OrgAdmin, "c/admin"));
        for role in Role::ALL {
            assert!(!can_sign(&doc, &identity("admin", role)));
        }
        assert_eq!(next_role_to_notify(&doc), None);
        assert!(notifiable_roles(&doc).is_empty());
    }

    #[test]
    fn test_non_required_step_still_gates() {
        let config = SignatureConfig::new(vec![
            SignatureStep {
                role: Role::Collaborator,
                order: 1,
                required: false,
            },
            SignatureStep::new(Role::Employee, 2),
        ])
        .unwrap();
        let mut doc = Document::new("org", "D", "d.pdf", config);
        doc.copies = vec![
            SignerCopy::new("collab", Role::Collaborator, "c/collab"),
            SignerCopy::new("emp", Role::Employee, "c/emp"),
        ];
        let emp = identity("emp", Role::Employee);

        assert!(!can_sign(&doc, &emp));
        assert_eq!(blocking_role(&doc, Role::Employee), Some(Role::Collaborator));
        assert_eq!(notifiable_roles(&doc), vec![Role::Collaborator]);
        assert!(matches!(
            record_signature(&doc, &emp, completed("emp")),
            Err(Error::OutOfOrderSigning {
                role: Role::Employee,
                waiting_on: Role::Collaborator
            })
        ));

        let doc = record_signature(&doc, &identity("collab", Role::Collaborator), completed("collab")).unwrap();
        assert!(can_sign(&doc, &emp));
        assert_eq!(notifiable_roles(&doc), vec![Role::Employee]);
        let doc = record_signature(&doc, &emp, completed("emp")).unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);
    }

    #[test]
    fn test_declined_copy_can_still_sign() {
        let doc = three_role_doc();
        let doc = record_decline(&doc, "admin").unwrap();
        assert_eq!(doc.copy_for("admin").unwrap().status, CopyStatus::Rejected);
        let doc = record_signature(&doc, &identity("admin", Role::OrgAdmin), completed("admin")).unwrap();
        let copy = doc.copy_for("admin").unwrap();
        assert_eq!(copy.status, CopyStatus::Signed);
        assert_eq!(copy.locator, "signed/admin");
        assert_eq!(copy.revisions, vec!["c/admin".to_string(), "signed/admin".to_string()]);
        assert!(matches!(record_decline(&doc, "admin"), Err(Error::AlreadySigned(_))));
    }

    #[test]
    fn test_mark_pending_signature() {
        let doc = three_role_doc();
        let next = mark_pending_signature(&doc, &["emp".to_string(), "emp2".to_string()]);
        assert_eq!(next.copy_for("emp").unwrap().status, CopyStatus::PendingSignature);
        assert_eq!(next.copy_for("admin").unwrap().status, CopyStatus::Pending);
        assert_eq!(next.revision, doc.revision + 1);
        let again = mark_pending_signature(&next, &["emp".to_string()]);
        assert_eq!(again.revision, next.revision);
    }
}
