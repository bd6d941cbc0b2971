//! `inspect`: list the blobs in a cache directory.

use super::{CliResult, OutputFormat};
use entigraph_core::Envelope;
use entigraph_storage::{BlobStore, FileBlobStore};
use serde::Serialize;
use std::path::Path;
use tracing::warn;

/// Summary of one stored blob.
#[derive(Debug, Serialize)]
pub struct BlobSummary {
    /// Storage key.
    pub key: String,
    /// Size on disk in bytes.
    pub bytes: usize,
    /// Format version, if the blob parses.
    pub version: Option<u32>,
    /// Blob kind, if the blob parses.
    pub kind: Option<String>,
    /// Class of an entity blob.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    /// objectId of an entity blob.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    /// Why the blob could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Prints a summary of every blob under `path`.
pub fn run(path: &Path, format: OutputFormat) -> CliResult<()> {
    let store = FileBlobStore::open(path)?;
    let summaries = summarize(&store)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summaries)?),
        OutputFormat::Text => {
            println!("{} blobs in {}", summaries.len(), path.display());
            for s in &summaries {
                match (&s.kind, &s.error) {
                    (Some(kind), _) => println!(
                        "  {:<32} {:>8} bytes  v{}  {kind}{}",
                        s.key,
                        s.bytes,
                        s.version.unwrap_or_default(),
                        entity_label(s)
                    ),
                    (None, error) => println!(
                        "  {:<32} {:>8} bytes  unreadable: {}",
                        s.key,
                        s.bytes,
                        error.as_deref().unwrap_or("unknown")
                    ),
                }
            }
        }
    }
    Ok(())
}

fn entity_label(summary: &BlobSummary) -> String {
    match (&summary.class_name, &summary.object_id) {
        (Some(class), Some(id)) => format!("  {class}/{id}"),
        (Some(class), None) => format!("  {class}"),
        _ => String::new(),
    }
}

/// Reads every blob in `store`.
pub fn summarize(store: &dyn BlobStore) -> CliResult<Vec<BlobSummary>> {
    let mut keys = store.keys()?;
    keys.sort();
    let mut summaries = Vec::with_capacity(keys.len());
    for key in keys {
        let Some(bytes) = store.read_bytes(&key)? else {
            continue;
        };
        let mut summary = BlobSummary {
            key,
            bytes: bytes.len(),
            version: None,
            kind: None,
            class_name: None,
            object_id: None,
            error: None,
        };
        match Envelope::from_bytes(&bytes) {
            Ok(envelope) => {
                summary.version = Some(envelope.version);
                summary.kind = Some(envelope.kind.as_str().to_string());
                if let Ok((class_name, object)) = envelope.entity_object() {
                    summary.class_name = Some(class_name);
                    summary.object_id = object
                        .get(entigraph_codec::keys::OBJECT_ID)
                        .and_then(|v| v.as_str())
                        .map(str::to_string);
                }
            }
            Err(e) => {
                warn!(key = %summary.key, error = %e, "unreadable blob");
                summary.error = Some(e.to_string());
            }
        }
        summaries.push(summary);
    }
    Ok(summaries)
}
