//! # Entigraph Storage
//!
//! Key-addressed blob stores for Entigraph.
//!
//! Stores are **opaque byte stores**: they never interpret what they hold.
//! Entity snapshots written through them are versioned by the core crate.
//!
//! ## Design Principles
//!
//! - A blob is written and read as a whole, by key
//! - A write either fully replaces the previous blob or leaves it intact
//! - Stores must be `Send + Sync` for concurrent access
//!
//! ## Available Stores
//!
//! - [`InMemoryBlobStore`] - For testing and ephemeral caches
//! - [`FileBlobStore`] - One file per key inside a directory
//!
//! ## Example
//!
//! ```rust
//! use entigraph_storage::{BlobStore, InMemoryBlobStore};
//!
//! let store = InMemoryBlobStore::new();
//! store.write_bytes("current_user", b"hello").unwrap();
//! assert_eq!(store.read_bytes("current_user").unwrap().as_deref(), Some(&b"hello"[..]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::FileBlobStore;
pub use memory::InMemoryBlobStore;
pub use store::{validate_key, BlobStore, MAX_KEY_LEN};
