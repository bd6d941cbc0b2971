//! `show` and `remove`: work on a single cached blob.

use super::{CliError, CliResult};
use entigraph_core::{BlobKind, Envelope};
use entigraph_storage::{BlobStore, FileBlobStore};
use serde_json::json;
use std::path::Path;
use tracing::info;

/// Prints the blob under `key` as JSON.
pub fn run(path: &Path, key: &str) -> CliResult<()> {
    let store = FileBlobStore::open(path)?;
    println!("{}", render(&store, key)?);
    Ok(())
}

/// Renders the blob under `key`.
pub fn render(store: &dyn BlobStore, key: &str) -> CliResult<String> {
    let bytes = store
        .read_bytes(key)?
        .ok_or_else(|| CliError::MissingBlob(key.to_string()))?;
    let envelope = Envelope::from_bytes(&bytes)?;
    let payload = match envelope.kind {
        BlobKind::Entity => {
            let (class_name, object) = envelope.entity_object()?;
            json!({"className": class_name, "object": object})
        }
        BlobKind::Json => envelope.payload.clone(),
    };
    let document = json!({
        "key": key,
        "version": envelope.version,
        "kind": envelope.kind.as_str(),
        "payload": payload,
    });
    Ok(serde_json::to_string_pretty(&document)?)
}

/// Deletes the blob under `key`.
pub fn remove(path: &Path, key: &str) -> CliResult<()> {
    let store = FileBlobStore::open(path)?;
    if !store.remove(key)? {
        return Err(CliError::MissingBlob(key.to_string()));
    }
    info!(key, "removed blob");
    Ok(())
}
