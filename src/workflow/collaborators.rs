//! External collaborators: file storage and signer identity.
//!
//! Both are traits so hosts can plug in object storage or a directory
//! service; the in-memory and filesystem implementations cover tests and
//! single-node deployments.

use super::model::SignerIdentity;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Byte storage addressed by opaque locators.
pub trait Storage: Send + Sync {
    /// Read the bytes at `locator`.
    fn read(&self, locator: &str) -> Result<Vec<u8>>;

    /// Write `bytes` to `locator`, replacing anything there, and return the
    /// locator the bytes can be read back from.
    fn write(&self, locator: &str, bytes: &[u8]) -> Result<String>;

    /// Delete `locator`. Deleting a missing locator is not an error.
    fn delete(&self, locator: &str) -> Result<()>;
}

/// Storage kept in a map.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    /// Create empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `locator` holds data.
    pub fn contains(&self, locator: &str) -> bool {
        self.lock().map(|files| files.contains_key(locator)).unwrap_or(false)
    }

    /// Number of stored files.
    pub fn len(&self) -> usize {
        self.lock().map(|files| files.len()).unwrap_or(0)
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.files
            .lock()
            .map_err(|_| Error::Storage("storage mutex poisoned".to_string()))
    }
}

impl Storage for MemoryStorage {
    fn read(&self, locator: &str) -> Result<Vec<u8>> {
        self.lock()?
            .get(locator)
            .cloned()
            .ok_or_else(|| Error::Storage(format!("no file at '{}'", locator)))
    }

    fn write(&self, locator: &str, bytes: &[u8]) -> Result<String> {
        self.lock()?.insert(locator.to_string(), bytes.to_vec());
        Ok(locator.to_string())
    }

    fn delete(&self, locator: &str) -> Result<()> {
        self.lock()?.remove(locator);
        Ok(())
    }
}

/// Storage under a root directory; locators are relative paths.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Store files under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, locator: &str) -> Result<PathBuf> {
        let relative = Path::new(locator);
        let clean = !locator.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(Error::Storage(format!("invalid locator '{}'", locator)));
        }
        Ok(self.root.join(relative))
    }
}

impl Storage for FsStorage {
    fn read(&self, locator: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.path(locator)?)?)
    }

    fn write(&self, locator: &str, bytes: &[u8]) -> Result<String> {
        let path = self.path(locator)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        Ok(locator.to_string())
    }

    fn delete(&self, locator: &str) -> Result<()> {
        match fs::remove_file(self.path(locator)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Resolves employee identifiers to signer identities.
pub trait IdentityProvider: Send + Sync {
    /// Identity of `employee_id`.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownIdentity`] when the employee is not known.
    fn resolve(&self, employee_id: &str) -> Result<SignerIdentity>;
}

/// Fixed in-memory directory of identities.
#[derive(Debug, Default, Clone)]
pub struct MemoryDirectory {
    identities: HashMap<String, SignerIdentity>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) an identity.
    pub fn with_identity(mut self, identity: SignerIdentity) -> Self {
        self.identities.insert(identity.employee_id.clone(), identity);
        self
    }
}

impl IdentityProvider for MemoryDirectory {
    fn resolve(&self, employee_id: &str) -> Result<SignerIdentity> {
        self.identities
            .get(employee_id)
            .cloned()
            .ok_or_else(|| Error::UnknownIdentity(employee_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::Role;

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();
        storage.write("a/b.pdf", b"data").unwrap();
        assert_eq!(storage.read("a/b.pdf").unwrap(), b"data");
        storage.delete("a/b.pdf").unwrap();
        storage.delete("a/b.pdf").unwrap();
        assert!(storage.is_empty());
        assert!(matches!(storage.read("a/b.pdf"), Err(Error::Storage(_))));
    }

    #[test]
    fn test_fs_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        storage.write("docs/d1/original.pdf", b"%PDF-1.7").unwrap();
        assert_eq!(storage.read("docs/d1/original.pdf").unwrap(), b"%PDF-1.7");
        assert!(dir.path().join("docs/d1/original.pdf").exists());
        storage.delete("docs/d1/original.pdf").unwrap();
        storage.delete("docs/d1/original.pdf").unwrap();
        assert!(storage.read("docs/d1/original.pdf").is_err());
    }

    #[test]
    fn test_fs_storage_rejects_escaping_locators() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        assert!(storage.write("../evil.pdf", b"x").is_err());
        assert!(storage.write("/etc/evil.pdf", b"x").is_err());
        assert!(storage.read("").is_err());
    }

    #[test]
    fn test_directory() {
        let directory = MemoryDirectory::new().with_identity(SignerIdentity {
            employee_id: "e1".into(),
            role: Role::Employee,
            organization_id: "org".into(),
            organization_name: "Org".into(),
            display_name: "Eve".into(),
            email: "eve@org.test".into(),
        });
        assert_eq!(directory.resolve("e1").unwrap().display_name, "Eve");
        assert!(matches!(directory.resolve("e2"), Err(Error::UnknownIdentity(_))));
    }
}
