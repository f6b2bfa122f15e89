//! Property tests for the signing sequence engine.

use chrono::Utc;
use pdf_signflow::error::Error;
use pdf_signflow::signatures::{CertificateInfo, CertificateValidity, SignatureInfo, SignatureMetadata};
use pdf_signflow::workflow::sequence::{self, CompletedSignature};
use pdf_signflow::workflow::{
    Document, DocumentStatus, Role, SignatureConfig, SignatureStep, SignerCopy, SignerIdentity,
};
use proptest::prelude::*;

const SIGNERS: [(&str, Role); 4] = [
    ("admin", Role::OrgAdmin),
    ("collab", Role::Collaborator),
    ("emp1", Role::Employee),
    ("emp2", Role::Employee),
];

fn identity(index: usize) -> SignerIdentity {
    let (id, role) = SIGNERS[index];
    SignerIdentity {
        employee_id: id.into(),
        role,
        organization_id: "org".into(),
        organization_name: "Org".into(),
        display_name: id.into(),
        email: format!("{}@org.test", id),
    }
}

fn completed(signer: &SignerIdentity, n: usize) -> CompletedSignature {
    let now = Utc::now();
    CompletedSignature {
        info: SignatureInfo {
            signature_id: format!("sig-{}", n),
            signer_name: signer.display_name.clone(),
            signer_email: signer.email.clone(),
            organization: signer.organization_name.clone(),
            document_hash: format!("{:064x}", n),
            timestamp: now.to_rfc3339(),
            signature_type: "electronic".into(),
        },
        metadata: SignatureMetadata::new(
            CertificateInfo {
                subject: format!("CN={}", signer.display_name),
                issuer: format!("CN={}", signer.display_name),
                validity: CertificateValidity {
                    not_before: now.to_rfc3339(),
                    not_after: now.to_rfc3339(),
                },
                serial_number: format!("{:02x}", n),
            },
            now.to_rfc3339(),
        ),
        locator: format!("signed/{}/{}", signer.employee_id, n),
        signed_at: now,
    }
}

/// Which roles are configured, with a permutation of orders and required
/// flags.
fn config_strategy() -> impl Strategy<Value = SignatureConfig> {
    (
        prop::collection::vec(any::<bool>(), 3),
        Just(vec![1u32, 2, 3]).prop_shuffle(),
        prop::collection::vec(any::<bool>(), 3),
    )
        .prop_map(|(included, orders, required)| {
            let steps = Role::ALL
                .iter()
                .enumerate()
                .filter(|(i, _)| included[*i])
                .map(|(i, &role)| SignatureStep {
                    role,
                    order: orders[i] * 10,
                    required: required[i],
                })
                .collect();
            SignatureConfig::new(steps).unwrap()
        })
}

fn new_document(config: SignatureConfig) -> Document {
    let mut doc = Document::new("org", "Doc", "doc.pdf", config);
    doc.copies = SIGNERS
        .iter()
        .map(|(id, role)| SignerCopy::new(*id, *role, format!("copies/{}", id)))
        .collect();
    doc
}

proptest! {
    #[test]
    fn sequence_invariants_hold(
        config in config_strategy(),
        attempts in prop::collection::vec(0usize..SIGNERS.len(), 0..16),
    ) {
        let mut doc = new_document(config);

        for (n, index) in attempts.into_iter().enumerate() {
            let signer = identity(index);
            let allowed = sequence::can_sign(&doc, &signer);
            match sequence::record_signature(&doc, &signer, completed(&signer, n)) {
                Ok(next) => {
                    prop_assert!(allowed);
                    prop_assert_eq!(next.revision, doc.revision + 1);
                    doc = next;
                },
                Err(e) => {
                    prop_assert!(!allowed);
                    let terminal_or_ordering = matches!(
                        e,
                        Error::OutOfOrderSigning { .. }
                            | Error::AlreadySigned(_)
                            | Error::MissingRoleConfig { .. }
                    );
                    prop_assert!(terminal_or_ordering, "unexpected error {}", e);
                },
            }

            let progress = &doc.signature_progress;
            prop_assert_eq!(progress.current_step as usize, progress.signatures.len());
            prop_assert_eq!(progress.total_steps as usize, doc.signature_config.len());
        }

        // Ordering: every step before a signed step was signed earlier in the
        // record list.
        let records = &doc.signature_progress.signatures;
        for (position, record) in records.iter().enumerate() {
            let step = doc.signature_config.step_for(record.signed_by.role).unwrap();
            for earlier in doc.signature_config.steps().iter().filter(|s| s.order < step.order) {
                let earlier_position = records.iter().position(|r| r.signed_by.role == earlier.role);
                prop_assert!(matches!(earlier_position, Some(p) if p < position));
            }
        }

        // One record per role, one signature per copy.
        for role in Role::ALL {
            prop_assert!(records.iter().filter(|r| r.signed_by.role == role).count() <= 1);
        }
        prop_assert_eq!(doc.copies.iter().filter(|c| c.is_signed()).count(), records.len());

        match doc.status {
            DocumentStatus::Pending => prop_assert!(records.is_empty()),
            DocumentStatus::InProgress => {
                prop_assert!(!records.is_empty());
                prop_assert!(records.len() < doc.signature_config.len());
            },
            DocumentStatus::Completed => prop_assert_eq!(records.len(), doc.signature_config.len()),
        }
    }

    #[test]
    fn second_signature_on_a_copy_is_rejected(config in config_strategy(), index in 0usize..SIGNERS.len()) {
        let doc = new_document(config);
        let signer = identity(index);
        if let Ok(signed) = sequence::record_signature(&doc, &signer, completed(&signer, 0)) {
            let again = sequence::record_signature(&signed, &signer, completed(&signer, 1));
            prop_assert!(matches!(again, Err(Error::AlreadySigned(_))));
        }
    }

    #[test]
    fn next_role_is_lowest_unsigned(config in config_strategy()) {
        let mut doc = new_document(config);
        let mut n = 0;
        while let Some(role) = sequence::next_role_to_notify(&doc) {
            let expected = doc
                .signature_config
                .steps()
                .iter()
                .find(|s| !doc.has_signed(s.role))
                .map(|s| s.role);
            prop_assert_eq!(Some(role), expected);
            let index = SIGNERS.iter().position(|(_, r)| *r == role).unwrap();
            let signer = identity(index);
            doc = sequence::record_signature(&doc, &signer, completed(&signer, n)).unwrap();
            n += 1;
        }
        prop_assert_eq!(doc.signature_progress.signatures.len(), doc.signature_config.len());
    }
}

#[test]
fn empty_config_is_never_signable() {
    let doc = new_document(SignatureConfig::default());
    for index in 0..SIGNERS.len() {
        assert!(!sequence::can_sign(&doc, &identity(index)));
    }
    assert_eq!(sequence::next_role_to_notify(&doc), None);
}
