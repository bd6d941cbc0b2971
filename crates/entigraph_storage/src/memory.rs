//! In-memory blob store for testing.

use crate::error::StorageResult;
use crate::store::{validate_key, BlobStore};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory blob store.
///
/// Suitable for unit tests and caches that need not survive the process.
///
/// # Example
///
/// ```rust
/// use entigraph_storage::{BlobStore, InMemoryBlobStore};
///
/// let store = InMemoryBlobStore::new();
/// store.write_bytes("a", b"1").unwrap();
/// assert_eq!(store.keys().unwrap(), vec!["a".to_string()]);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    /// Removes every blob.
    pub fn clear(&self) {
        self.blobs.write().clear();
    }
}

impl BlobStore for InMemoryBlobStore {
    fn write_bytes(&self, key: &str, bytes: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        self.blobs.write().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn read_bytes(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        Ok(self.blobs.read().get(key).cloned())
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        Ok(self.blobs.write().remove(key).is_some())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.blobs.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;

    #[test]
    fn memory_new_is_empty() {
        let store = InMemoryBlobStore::new();
        assert!(store.is_empty());
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn memory_write_then_read() {
        let store = InMemoryBlobStore::new();
        store.write_bytes("k", b"hello").unwrap();
        assert_eq!(store.read_bytes("k").unwrap(), Some(b"hello".to_vec()));
        assert_eq!(store.read_bytes("other").unwrap(), None);
    }

    #[test]
    fn memory_write_replaces() {
        let store = InMemoryBlobStore::new();
        store.write_bytes("k", b"one").unwrap();
        store.write_bytes("k", b"two").unwrap();
        assert_eq!(store.read_bytes("k").unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn memory_remove() {
        let store = InMemoryBlobStore::new();
        store.write_bytes("k", b"x").unwrap();
        assert!(store.remove("k").unwrap());
        assert!(!store.remove("k").unwrap());
        assert_eq!(store.read_bytes("k").unwrap(), None);
    }

    #[test]
    fn memory_keys_sorted() {
        let store = InMemoryBlobStore::new();
        store.write_bytes("b", b"").unwrap();
        store.write_bytes("a", b"").unwrap();
        assert_eq!(store.keys().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn memory_rejects_invalid_key() {
        let store = InMemoryBlobStore::new();
        let result = store.write_bytes("a/b", b"x");
        assert!(matches!(result, Err(StorageError::InvalidKey { .. })));
    }

    #[test]
    fn memory_clear() {
        let store = InMemoryBlobStore::new();
        store.write_bytes("k", b"x").unwrap();
        store.clear();
        assert!(store.is_empty());
    }
}
