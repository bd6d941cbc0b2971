//! Blob store trait definition.

use crate::error::{StorageError, StorageResult};

/// Longest key a store accepts.
pub const MAX_KEY_LEN: usize = 200;

/// A key-addressed byte store.
///
/// # Invariants
///
/// - `read_bytes` returns exactly the bytes of the last successful
///   `write_bytes` for that key
/// - A failed `write_bytes` leaves the previous blob readable
/// - Stores must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryBlobStore`] - For testing
/// - [`super::FileBlobStore`] - For persistent storage
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` under `key`, replacing any previous blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn write_bytes(&self, key: &str, bytes: &[u8]) -> StorageResult<()>;

    /// Reads the blob stored under `key`, or `None` if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn read_bytes(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Removes the blob under `key`. Returns true if one existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn remove(&self, key: &str) -> StorageResult<bool>;

    /// Lists stored keys in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be enumerated.
    fn keys(&self) -> StorageResult<Vec<String>>;
}

/// Checks that `key` can address a blob in every store.
///
/// Keys are non-empty, at most [`MAX_KEY_LEN`] bytes, made of ASCII
/// letters, digits, `_`, `-` and `.`, and do not start with a dot.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] describing the first violation.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::invalid_key(key, "empty"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(StorageError::invalid_key(key, "too long"));
    }
    if key.starts_with('.') {
        return Err(StorageError::invalid_key(key, "leading dot"));
    }
    if !key
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
    {
        return Err(StorageError::invalid_key(key, "unsupported character"));
    }
    Ok(())
}
