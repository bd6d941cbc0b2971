//! # Entigraph Testkit
//!
//! Test utilities for Entigraph.
//!
//! This crate provides:
//! - [`FakeServer`], an in-process backend usable as a transport or
//!   behind the loopback HTTP client
//! - Client and blob store fixtures
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use entigraph_testkit::prelude::*;
//!
//! #[test]
//! fn saves_reach_the_backend() {
//!     let server = Arc::new(FakeServer::new());
//!     let client = test_client(&server);
//!     // ... save entities, then inspect server.object(..)
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use std::sync::Arc;
}

pub use fixtures::*;
pub use generators::*;
