//! Error types for Entigraph core.

use entigraph_task::TaskError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Value codec error.
    #[error("codec error: {0}")]
    Codec(#[from] entigraph_codec::CodecError),

    /// Blob store error.
    #[error("storage error: {0}")]
    Storage(#[from] entigraph_storage::StorageError),

    /// Persisted state written by a newer format.
    #[error("unsupported persisted format version {found} (this build reads up to {supported})")]
    UnsupportedVersion {
        /// Version found in the blob.
        found: u32,
        /// Newest version this build understands.
        supported: u32,
    },

    /// An entity with unsaved changes cannot be persisted.
    #[error("{class_name} entity has unsaved changes")]
    DirtyEntity {
        /// Class of the entity.
        class_name: String,
    },

    /// Attempt to set a server-managed field.
    #[error("'{key}' is managed by the server and cannot be set")]
    ReservedKey {
        /// The reserved key.
        key: String,
    },

    /// Field key is not usable.
    #[error("invalid field key '{key}'")]
    InvalidKey {
        /// The rejected key.
        key: String,
    },

    /// A save response names a different entity than the one saved.
    #[error("save response for {expected} carries objectId {found}")]
    ServerIdMismatch {
        /// Identifier the entity already has.
        expected: String,
        /// Identifier in the response.
        found: String,
    },

    /// The operation needs a saved entity.
    #[error("{class_name} entity has no objectId")]
    MissingObjectId {
        /// Class of the entity.
        class_name: String,
    },

    /// A persisted blob could not be read.
    #[error("corrupt blob: {message}")]
    CorruptBlob {
        /// Description of the problem.
        message: String,
    },

    /// A persisted blob names a kind this build does not know.
    #[error("unknown blob kind '{kind}'")]
    UnknownBlobKind {
        /// The kind tag found.
        kind: String,
    },

    /// A persisted blob holds a different kind than requested.
    #[error("expected a {expected} blob, found {found}")]
    UnexpectedBlobKind {
        /// Requested kind.
        expected: &'static str,
        /// Kind found in the blob.
        found: &'static str,
    },
}

impl CoreError {
    /// Creates a corrupt blob error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptBlob {
            message: message.into(),
        }
    }

    /// Creates a missing objectId error.
    pub fn missing_object_id(class_name: impl Into<String>) -> Self {
        Self::MissingObjectId {
            class_name: class_name.into(),
        }
    }
}

impl From<CoreError> for TaskError {
    fn from(error: CoreError) -> Self {
        TaskError::new(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entigraph_codec::CodecError;

    #[test]
    fn codec_errors_convert() {
        let err: CoreError = CodecError::unsaved_reference("Game").into();
        assert!(matches!(err, CoreError::Codec(CodecError::UnsavedReference { .. })));
    }

    #[test]
    fn task_error_keeps_core_error() {
        let task_err: TaskError = CoreError::missing_object_id("Game").into();
        assert!(matches!(
            task_err.downcast_ref::<CoreError>(),
            Some(CoreError::MissingObjectId { .. })
        ));
    }

    #[test]
    fn version_message() {
        let err = CoreError::UnsupportedVersion {
            found: 9,
            supported: 2,
        };
        assert!(err.to_string().contains('9'));
    }
}
