//! Command transport abstraction.

use crate::error::{RestError, RestResult};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// HTTP method of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Read.
    Get,
    /// Create.
    Post,
    /// Update.
    Put,
    /// Delete.
    Delete,
}

impl Method {
    /// Method name as sent on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command for the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the API endpoint, e.g. `classes/Game`.
    pub path: String,
    /// JSON body.
    pub body: Option<JsonValue>,
}

impl RestRequest {
    /// A GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
        }
    }

    /// A POST request.
    pub fn post(path: impl Into<String>, body: JsonValue) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: Some(body),
        }
    }

    /// A PUT request.
    pub fn put(path: impl Into<String>, body: JsonValue) -> Self {
        Self {
            method: Method::Put,
            path: path.into(),
            body: Some(body),
        }
    }

    /// A DELETE request.
    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: Method::Delete,
            path: path.into(),
            body: None,
        }
    }
}

/// Raw backend response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl RestResponse {
    /// Creates a response.
    pub fn new(status_code: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status_code,
            body: body.into(),
        }
    }

    /// A response carrying a JSON body.
    pub fn json(status_code: u16, body: &JsonValue) -> Self {
        Self::new(status_code, body.to_string())
    }

    /// True for 2xx status codes.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Parses the body as JSON. An empty body reads as an empty object.
    ///
    /// # Errors
    ///
    /// Returns [`RestError::Protocol`] for unparseable bodies.
    pub fn body_json(&self) -> RestResult<JsonValue> {
        if self.body.is_empty() {
            return Ok(JsonValue::Object(serde_json::Map::new()));
        }
        serde_json::from_slice(&self.body)
            .map_err(|e| RestError::Protocol(format!("response is not JSON: {e}")))
    }

    /// The JSON body of a successful response.
    ///
    /// # Errors
    ///
    /// Non-2xx responses become [`RestError::Server`] built from the
    /// backend error body.
    pub fn into_json(self) -> RestResult<JsonValue> {
        let body = self.body_json();
        if self.is_success() {
            return body;
        }
        match body {
            Ok(body) if body.get("code").is_some() || body.get("error").is_some() => {
                Err(RestError::from_error_body(&body))
            }
            _ => Err(RestError::Server {
                code: if self.status_code >= 500 {
                    crate::error::codes::INTERNAL_SERVER_ERROR
                } else {
                    crate::error::codes::OPERATION_FORBIDDEN
                },
                message: format!("HTTP status {}", self.status_code),
            }),
        }
    }
}

/// Performs backend commands.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process fakes, mocks for testing).
pub trait CommandTransport: Send + Sync {
    /// Performs `request` and returns the raw response.
    ///
    /// # Errors
    ///
    /// Fails when the backend cannot be reached; error statuses are
    /// returned as responses.
    fn perform(&self, request: &RestRequest) -> RestResult<RestResponse>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool {
        true
    }
}

/// A mock transport for testing: replays queued responses and records
/// requests.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    responses: Mutex<VecDeque<RestResult<RestResponse>>>,
    requests: Mutex<Vec<RestRequest>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queues a response.
    pub fn push_response(&self, response: RestResponse) {
        self.responses.lock().push_back(Ok(response));
    }

    /// Queues a JSON response.
    pub fn push_json(&self, status_code: u16, body: &JsonValue) {
        self.push_response(RestResponse::json(status_code, body));
    }

    /// Queues a transport failure.
    pub fn push_error(&self, error: RestError) {
        self.responses.lock().push_back(Err(error));
    }

    /// Requests performed so far.
    pub fn requests(&self) -> Vec<RestRequest> {
        self.requests.lock().clone()
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandTransport for MockTransport {
    fn perform(&self, request: &RestRequest) -> RestResult<RestResponse> {
        if !self.is_connected() {
            return Err(RestError::NotConnected);
        }
        self.requests.lock().push(request.clone());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(RestError::Protocol("no mock response queued".into())))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
