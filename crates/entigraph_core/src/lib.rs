//! # Entigraph Core
//!
//! Client-side entity graph for Entigraph.
//!
//! This crate provides:
//! - [`Entity`] nodes tracking persisted fields, in-flight saves and
//!   pending [`OperationSet`]s
//! - An [`IdentityResolver`] mapping local identifiers to server ones
//! - A [`ClassRegistry`] of per-class entity factories
//! - A [`Session`] arena that interns saved nodes and drives save cycles
//! - A versioned blob format for persisting clean entities and values
//!
//! ## Save cycle
//!
//! ```
//! use entigraph_core::{PointerMode, Session};
//! use serde_json::json;
//!
//! let session = Session::new();
//! let game = session.create("Game");
//! game.write().set("score", 140i64).unwrap();
//!
//! let (flush, body) = session.begin_save(&game, PointerMode::Strict).unwrap();
//! assert_eq!(body, json!({"score": 140}));
//!
//! session
//!     .complete_save(&game, &flush, &json!({"objectId": "g1", "createdAt": "2015-07-14T15:55:52.133Z"}))
//!     .unwrap();
//! assert_eq!(game.read().object_id(), Some("g1"));
//! assert!(!game.read().is_dirty());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entity;
mod error;
mod id;
mod operations;
pub mod persist;
mod registry;
mod resolver;
mod session;

pub use entity::{Entity, Flush, ServerPayload, SharedEntity};
pub use error::{CoreError, CoreResult};
pub use id::EntityId;
pub use operations::OperationSet;
pub use persist::{BlobKind, Envelope, FORMAT_VERSION};
pub use registry::{ClassRegistry, DefaultFactory, EntityFactory, BUILTIN_CLASSES};
pub use resolver::IdentityResolver;
pub use session::{PointerMode, Session};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
