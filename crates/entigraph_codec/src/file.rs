//! Remote file references.

use crate::error::{CodecError, CodecResult};

/// Largest file payload the backend accepts.
pub const MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// A reference to a file stored by the backend.
///
/// A dirty reference names a file that has not been uploaded yet and
/// therefore has no URL; it cannot be encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    name: String,
    url: Option<String>,
    dirty: bool,
}

impl FileRef {
    /// A file the backend already stores.
    pub fn uploaded(name: impl Into<String>, url: Option<String>) -> Self {
        Self {
            name: name.into(),
            url,
            dirty: false,
        }
    }

    /// A local file that still has to be uploaded.
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: None,
            dirty: true,
        }
    }

    /// Checks a payload against [`MAX_FILE_SIZE`].
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::FileTooLarge`] for oversized payloads.
    pub fn check_size(size: usize) -> CodecResult<()> {
        if size > MAX_FILE_SIZE {
            return Err(CodecError::FileTooLarge {
                size,
                limit: MAX_FILE_SIZE,
            });
        }
        Ok(())
    }

    /// Records the server-assigned name and URL after an upload.
    pub fn mark_uploaded(&mut self, name: impl Into<String>, url: impl Into<String>) {
        self.name = name.into();
        self.url = Some(url.into());
        self.dirty = false;
    }

    /// File name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remote URL, if known.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// True until the file has been uploaded.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}
