//! Signing-request notifications.
//!
//! Delivery is fire-and-forget from the workflow's point of view: a failed
//! notification is logged and reported, never propagated into the signing
//! state that triggered it.

use super::model::Role;
use crate::error::{Error, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;

/// One "please sign" message for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    /// Role the recipient signs as
    pub role: Role,
    /// Organization of the document
    pub organization_id: String,
    /// Document to sign
    pub document_id: String,
    /// Employee identifier of the recipient
    pub recipient: String,
    /// Recipient's address
    pub email: String,
    /// Link to the signing page
    pub sign_link: String,
}

/// Delivers signing requests (email, chat, ...).
pub trait Notifier: Send + Sync {
    /// Deliver one request.
    fn notify(&self, request: &SignRequest) -> Result<()>;
}

/// Outcome of a fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Recipients that were notified
    pub delivered: Vec<String>,
    /// Recipients whose delivery failed, with the reason
    pub failed: Vec<(String, String)>,
}

impl DispatchReport {
    /// Whether every delivery succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Number of requests dispatched.
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }
}

/// Sends requests concurrently, one thread per recipient.
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher").finish_non_exhaustive()
    }
}

impl NotificationDispatcher {
    /// Dispatch through `notifier`.
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Deliver every request; failures are collected, not returned.
    pub fn dispatch(&self, requests: &[SignRequest]) -> DispatchReport {
        let outcomes: Vec<(String, Result<()>)> = thread::scope(|scope| {
            let handles: Vec<_> = requests
                .iter()
                .map(|request| {
                    let notifier = &self.notifier;
                    let recipient = request.recipient.clone();
                    (recipient, scope.spawn(move || notifier.notify(request)))
                })
                .collect();
            handles
                .into_iter()
                .map(|(recipient, handle)| {
                    let outcome = handle
                        .join()
                        .unwrap_or_else(|_| Err(Error::Notification("notifier panicked".to_string())));
                    (recipient, outcome)
                })
                .collect()
        });

        let mut report = DispatchReport::default();
        for (recipient, outcome) in outcomes {
            match outcome {
                Ok(()) => report.delivered.push(recipient),
                Err(e) => {
                    log::warn!("Failed to notify {}: {}", recipient, e);
                    report.failed.push((recipient, e.to_string()));
                },
            }
        }
        log::info!(
            "Dispatched {} signing request(s), {} failed",
            report.attempted(),
            report.failed.len()
        );
        report
    }
}

/// Notifier that keeps every delivered request in memory.
///
/// Recipients registered with [`MemoryNotifier::failing_for`] get an error
/// instead.
#[derive(Debug, Default, Clone)]
pub struct MemoryNotifier {
    sent: Arc<Mutex<Vec<SignRequest>>>,
    failing: HashSet<String>,
}

impl MemoryNotifier {
    /// Create an empty notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail deliveries to `recipient`.
    pub fn failing_for(mut self, recipient: impl Into<String>) -> Self {
        self.failing.insert(recipient.into());
        self
    }

    /// Requests delivered so far.
    pub fn sent(&self) -> Vec<SignRequest> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, request: &SignRequest) -> Result<()> {
        if self.failing.contains(&request.recipient) {
            return Err(Error::Notification(format!(
                "mailbox of {} rejected the message",
                request.recipient
            )));
        }
        self.sent
            .lock()
            .map_err(|_| Error::Notification("outbox mutex poisoned".to_string()))?
            .push(request.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(recipient: &str) -> SignRequest {
        SignRequest {
            role: Role::Employee,
            organization_id: "org".into(),
            document_id: "doc".into(),
            recipient: recipient.into(),
            email: format!("{}@org.test", recipient),
            sign_link: format!("http://localhost:3000/documents/doc/sign/{}", recipient),
        }
    }

    #[test]
    fn test_dispatch_all_delivered() {
        let notifier = MemoryNotifier::new();
        let dispatcher = NotificationDispatcher::new(Arc::new(notifier.clone()));
        let report = dispatcher.dispatch(&[request("e1"), request("e2")]);
        assert!(report.is_complete());
        assert_eq!(report.delivered, vec!["e1".to_string(), "e2".to_string()]);
        assert_eq!(notifier.sent().len(), 2);
    }

    #[test]
    fn test_partial_failure_is_reported() {
        let notifier = MemoryNotifier::new().failing_for("e2");
        let dispatcher = NotificationDispatcher::new(Arc::new(notifier.clone()));
        let report = dispatcher.dispatch(&[request("e1"), request("e2"), request("e3")]);
        assert_eq!(report.attempted(), 3);
        assert_eq!(report.delivered, vec!["e1".to_string(), "e3".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "e2");
        assert_eq!(notifier.sent().len(), 2);
    }

    #[test]
    fn test_dispatch_nothing() {
        let dispatcher = NotificationDispatcher::new(Arc::new(MemoryNotifier::new()));
        assert_eq!(dispatcher.dispatch(&[]), DispatchReport::default());
    }
}
