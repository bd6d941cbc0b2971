//! # Entigraph REST
//!
//! Backend command layer for Entigraph.
//!
//! This crate provides:
//! - A [`CommandTransport`] trait with an HTTP implementation over a
//!   pluggable [`HttpClient`] and a [`MockTransport`] for tests
//! - Backend error codes and retry classification
//! - Batch request building and result parsing
//! - An [`ObjectClient`] that saves, fetches and deletes entities,
//!   returning tasks
//!
//! ## Example
//!
//! ```
//! use entigraph_core::Session;
//! use entigraph_rest::{ClientConfig, MockTransport, ObjectClient};
//! use entigraph_task::immediate;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let transport = Arc::new(MockTransport::new());
//! transport.push_json(201, &json!({"objectId": "g1"}));
//!
//! let config = ClientConfig::new("https://api.example.com/1", "app", "key");
//! let client = ObjectClient::new(Arc::new(Session::new()), transport, config)
//!     .with_executor(immediate());
//!
//! let game = client.session().create("Game");
//! game.write().set("score", 1i64).unwrap();
//! client.save(game.clone()).wait_for_completion().unwrap();
//! assert_eq!(game.read().object_id(), Some("g1"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod batch;
mod client;
mod config;
mod error;
mod http;
mod transport;

pub use batch::{BatchFailure, BatchItem, BatchOp, BatchReport};
pub use client::ObjectClient;
pub use config::{ClientConfig, RetryConfig, DEFAULT_BATCH_LIMIT};
pub use error::{codes, RestError, RestResult};
pub use http::{
    HttpClient, HttpRequest, HttpTransport, LoopbackClient, LoopbackServer, CONTENT_TYPE_JSON,
    HEADER_APPLICATION_ID, HEADER_CLIENT_KEY, HEADER_CONTENT_TYPE, HEADER_SESSION_TOKEN,
};
pub use transport::{CommandTransport, Method, MockTransport, RestRequest, RestResponse};
