//! Directory-backed blob store.

use crate::error::{StorageError, StorageResult};
use crate::store::{validate_key, BlobStore};
use parking_lot::RwLock;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const BLOB_EXTENSION: &str = "blob";

/// A blob store keeping one file per key inside a directory.
///
/// # Durability
///
/// Writes go to a temporary file that is synced and then renamed over the
/// target, so a crash mid-write leaves the previous blob intact.
///
/// # Thread Safety
///
/// Writers are serialized by an internal lock; readers run concurrently.
///
/// # Example
///
/// ```no_run
/// use entigraph_storage::{BlobStore, FileBlobStore};
/// use std::path::Path;
///
/// let store = FileBlobStore::open(Path::new("cache")).unwrap();
/// store.write_bytes("current_user", b"...").unwrap();
/// ```
#[derive(Debug)]
pub struct FileBlobStore {
    dir: PathBuf,
    lock: RwLock<()>,
}

impl FileBlobStore {
    /// Opens a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, or if `dir`
    /// exists but is not a directory.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;
        if !dir.is_dir() {
            return Err(StorageError::Corrupted(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            lock: RwLock::new(()),
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{BLOB_EXTENSION}"))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!(".{key}.tmp"))
    }
}

impl BlobStore for FileBlobStore {
    fn write_bytes(&self, key: &str, bytes: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        let _guard = self.lock.write();

        let temp = self.temp_path(key);
        let result = (|| -> io::Result<()> {
            let mut file = File::create(&temp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&temp, self.blob_path(key))
        })();

        if let Err(e) = result {
            warn!(key, error = %e, "blob write failed");
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        debug!(key, len = bytes.len(), "blob written");
        Ok(())
    }

    fn read_bytes(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        let _guard = self.lock.read();
        match fs::read(self.blob_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        let _guard = self.lock.write();
        match fs::remove_file(self.blob_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let _guard = self.lock.read();
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(BLOB_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_key(stem).is_ok() {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_write_then_read() {
        let dir = tempdir().unwrap();
        let store = FileBlobStore::open(dir.path()).unwrap();

        store.write_bytes("k", b"persistent").unwrap();
        assert_eq!(store.read_bytes("k").unwrap(), Some(b"persistent".to_vec()));
        assert_eq!(store.read_bytes("missing").unwrap(), None);
    }

    #[test]
    fn file_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = FileBlobStore::open(dir.path()).unwrap();
            store.write_bytes("k", b"data").unwrap();
        }
        let store = FileBlobStore::open(dir.path()).unwrap();
        assert_eq!(store.read_bytes("k").unwrap(), Some(b"data".to_vec()));
    }

    #[test]
    fn file_creates_nested_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = FileBlobStore::open(&nested).unwrap();
        store.write_bytes("k", b"x").unwrap();
        assert!(nested.join("k.blob").exists());
    }

    #[test]
    fn file_replace_and_remove() {
        let dir = tempdir().unwrap();
        let store = FileBlobStore::open(dir.path()).unwrap();

        store.write_bytes("k", b"one").unwrap();
        store.write_bytes("k", b"two").unwrap();
        assert_eq!(store.read_bytes("k").unwrap(), Some(b"two".to_vec()));

        assert!(store.remove("k").unwrap());
        assert!(!store.remove("k").unwrap());
    }

    #[test]
    fn file_keys_skip_foreign_files() {
        let dir = tempdir().unwrap();
        let store = FileBlobStore::open(dir.path()).unwrap();
        store.write_bytes("b", b"").unwrap();
        store.write_bytes("a", b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::write(dir.path().join(".a.tmp"), b"x").unwrap();

        assert_eq!(store.keys().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn file_rejects_traversal() {
        let dir = tempdir().unwrap();
        let store = FileBlobStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.write_bytes("../x", b""),
            Err(StorageError::InvalidKey { .. })
        ));
    }

    #[test]
    fn file_open_on_regular_file_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain");
        fs::write(&path, b"x").unwrap();
        assert!(FileBlobStore::open(&path).is_err());
    }
}
