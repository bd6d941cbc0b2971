//! Subcommand implementations.

pub mod decode;
pub mod inspect;
pub mod show;

use std::str::FromStr;
use thiserror::Error;

/// Errors reported by the subcommands.
#[derive(Error, Debug)]
pub enum CliError {
    /// Reading input failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Input is not JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Decoding or blob handling failed.
    #[error(transparent)]
    Core(#[from] entigraph_core::CoreError),

    /// The cache directory could not be read.
    #[error(transparent)]
    Storage(#[from] entigraph_storage::StorageError),

    /// Unknown `--format` value.
    #[error("unknown output format '{0}' (expected text or json)")]
    UnknownFormat(String),

    /// No blob under the requested key.
    #[error("no blob stored under '{0}'")]
    MissingBlob(String),
}

/// Result type for subcommands.
pub type CliResult<T> = Result<T, CliError>;

/// Output format of listing commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable lines.
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl FromStr for OutputFormat {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(CliError::UnknownFormat(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_format_parsing() {
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!(matches!(
            "yaml".parse::<OutputFormat>(),
            Err(CliError::UnknownFormat(_))
        ));
    }
}
