//! Document persistence.
//!
//! The engine only needs point reads and an atomic conditional write keyed on
//! [`Document::revision`]; [`MemoryDocumentStore`] is the in-process
//! implementation used by tests and single-node hosts.

use super::model::Document;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Persistence for [`Document`] aggregates.
pub trait DocumentStore: Send + Sync {
    /// Store a new document.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateDocument`] when the title or the original filename is
    /// already used in the organization.
    fn insert(&self, doc: Document) -> Result<()>;

    /// Load a document.
    fn get(&self, document_id: &str) -> Result<Option<Document>>;

    /// Replace the stored document with `doc` if its revision is still
    /// `expected_revision`. Returns `false` when another writer got there
    /// first.
    ///
    /// # Errors
    ///
    /// [`Error::DocumentNotFound`] when the document no longer exists.
    fn compare_and_swap(&self, expected_revision: u64, doc: &Document) -> Result<bool>;

    /// Delete a document, returning it.
    fn remove(&self, document_id: &str) -> Result<Option<Document>>;

    /// Documents of an organization, oldest first.
    fn list_by_org(&self, organization_id: &str) -> Result<Vec<Document>>;
}

/// In-memory document store.
#[derive(Debug, Default, Clone)]
pub struct MemoryDocumentStore {
    docs: Arc<Mutex<BTreeMap<String, Document>>>,
}

impl MemoryDocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, Document>>> {
        self.docs
            .lock()
            .map_err(|_| Error::Storage("document store mutex poisoned".to_string()))
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn insert(&self, doc: Document) -> Result<()> {
        let mut docs = self.lock()?;
        for existing in docs.values().filter(|d| d.organization_id == doc.organization_id) {
            if existing.title == doc.title {
                return Err(Error::DuplicateDocument {
                    organization_id: doc.organization_id.clone(),
                    reason: format!("title '{}' already exists", doc.title),
                });
            }
            if existing.original_filename == doc.original_filename {
                return Err(Error::DuplicateDocument {
                    organization_id: doc.organization_id.clone(),
                    reason: format!("file '{}' already uploaded", doc.original_filename),
                });
            }
        }
        if docs.contains_key(&doc.id) {
            return Err(Error::DuplicateDocument {
                organization_id: doc.organization_id.clone(),
                reason: format!("id {} already exists", doc.id),
            });
        }
        docs.insert(doc.id.clone(), doc);
        Ok(())
    }

    fn get(&self, document_id: &str) -> Result<Option<Document>> {
        Ok(self.lock()?.get(document_id).cloned())
    }

    fn compare_and_swap(&self, expected_revision: u64, doc: &Document) -> Result<bool> {
        let mut docs = self.lock()?;
        let slot = docs
            .get_mut(&doc.id)
            .ok_or_else(|| Error::DocumentNotFound(doc.id.clone()))?;
        if slot.revision != expected_revision {
            return Ok(false);
        }
        *slot = doc.clone();
        Ok(true)
    }

    fn remove(&self, document_id: &str) -> Result<Option<Document>> {
        Ok(self.lock()?.remove(document_id))
    }

    fn list_by_org(&self, organization_id: &str) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self
            .lock()?
            .values()
            .filter(|d| d.organization_id == organization_id)
            .cloned()
            .collect();
        docs.sort_by_key(|d| d.created_at);
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::SignatureConfig;

    fn doc(org: &str, title: &str, file: &str) -> Document {
        Document::new(org, title, file, SignatureConfig::default())
    }

    #[test]
    fn test_insert_rejects_duplicates_within_org() {
        let store = MemoryDocumentStore::new();
        store.insert(doc("org", "NDA", "nda.pdf")).unwrap();

        let err = store.insert(doc("org", "NDA", "other.pdf")).unwrap_err();
        assert!(matches!(err, Error::DuplicateDocument { .. }));
        let err = store.insert(doc("org", "Other", "nda.pdf")).unwrap_err();
        assert!(matches!(err, Error::DuplicateDocument { .. }));

        store.insert(doc("other-org", "NDA", "nda.pdf")).unwrap();
        assert_eq!(store.list_by_org("org").unwrap().len(), 1);
    }

    #[test]
    fn test_compare_and_swap() {
        let store = MemoryDocumentStore::new();
        let original = doc("org", "NDA", "nda.pdf");
        store.insert(original.clone()).unwrap();

        let mut next = original.clone();
        next.revision = 1;
        next.title = "NDA v2".into();
        assert!(store.compare_and_swap(0, &next).unwrap());

        let mut stale = original.clone();
        stale.revision = 1;
        assert!(!store.compare_and_swap(0, &stale).unwrap());
        assert_eq!(store.get(&original.id).unwrap().unwrap().title, "NDA v2");
    }

    #[test]
    fn test_cas_on_removed_document() {
        let store = MemoryDocumentStore::new();
        let d = doc("org", "NDA", "nda.pdf");
        store.insert(d.clone()).unwrap();
        assert!(store.remove(&d.id).unwrap().is_some());
        assert!(matches!(store.compare_and_swap(0, &d), Err(Error::DocumentNotFound(_))));
        assert!(store.get(&d.id).unwrap().is_none());
    }
}
