//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding, decoding or composing values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// The value cannot be represented on the wire.
    #[error("unsupported type: {type_name}")]
    UnsupportedType {
        /// Name of the offending runtime type.
        type_name: String,
    },

    /// A strict pointer encode met an entity without a server identifier.
    #[error("unable to encode an association with an unsaved {class_name} object")]
    UnsavedReference {
        /// Class of the unsaved entity.
        class_name: String,
    },

    /// A file reference has not been uploaded yet.
    #[error("file '{name}' must be uploaded before it can be referenced")]
    UnsavedFile {
        /// File name.
        name: String,
    },

    /// Illegal operation composition or application.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of the misuse.
        message: String,
    },

    /// A local identifier that no resolver entry can map.
    #[error("dangling local identifier: {local_id}")]
    DanglingLocalId {
        /// The unmapped local identifier.
        local_id: String,
    },

    /// Malformed wire structure.
    #[error("invalid wire structure: {message}")]
    InvalidStructure {
        /// Description of the structural error.
        message: String,
    },

    /// Unknown `__op` discriminator.
    #[error("unknown operation: {op}")]
    UnknownOperation {
        /// The discriminator that was found.
        op: String,
    },

    /// Date string could not be parsed.
    #[error("invalid date: {value}")]
    InvalidDate {
        /// The rejected date string.
        value: String,
    },

    /// Base64 payload could not be decoded.
    #[error("invalid base64 payload: {message}")]
    InvalidBase64 {
        /// Decoder message.
        message: String,
    },

    /// Latitude or longitude out of range.
    #[error("invalid geo-point ({latitude}, {longitude})")]
    InvalidGeoPoint {
        /// Rejected latitude.
        latitude: f64,
        /// Rejected longitude.
        longitude: f64,
    },

    /// File payload exceeds the backend limit.
    #[error("file of {size} bytes exceeds the {limit} byte limit")]
    FileTooLarge {
        /// Payload size.
        size: usize,
        /// Maximum accepted size.
        limit: usize,
    },

    /// Wire payload nests deeper than the decoder accepts.
    #[error("wire payload nests deeper than {limit} levels")]
    DepthExceeded {
        /// Maximum nesting depth.
        limit: usize,
    },
}

impl CodecError {
    /// Create an unsupported type error.
    pub fn unsupported_type(type_name: impl Into<String>) -> Self {
        Self::UnsupportedType {
            type_name: type_name.into(),
        }
    }

    /// Create an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Create an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }

    /// Create an unsaved reference error.
    pub fn unsaved_reference(class_name: impl Into<String>) -> Self {
        Self::UnsavedReference {
            class_name: class_name.into(),
        }
    }

    /// Create a dangling local identifier error.
    pub fn dangling_local_id(local_id: impl Into<String>) -> Self {
        Self::DanglingLocalId {
            local_id: local_id.into(),
        }
    }

    /// Returns true if the caller can recover, e.g. by saving the
    /// referenced entity first or switching pointer strategy.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CodecError::UnsavedReference { .. } | CodecError::UnsavedFile { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_errors() {
        assert!(CodecError::unsaved_reference("Game").is_recoverable());
        assert!(!CodecError::invalid_operation("bad").is_recoverable());
        assert!(!CodecError::unsupported_type("NaN").is_recoverable());
        assert!(!CodecError::dangling_local_id("local_ab").is_recoverable());
    }

    #[test]
    fn error_display() {
        let err = CodecError::unsaved_reference("Game");
        assert_eq!(
            err.to_string(),
            "unable to encode an association with an unsaved Game object"
        );

        let err = CodecError::DepthExceeded { limit: 64 };
        assert!(err.to_string().contains("64"));
    }
}
