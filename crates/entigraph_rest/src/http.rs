//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via a trait to allow different
//! implementations (reqwest, hyper, ureq, etc.).

use crate::config::ClientConfig;
use crate::error::{RestError, RestResult};
use crate::transport::{CommandTransport, Method, RestRequest, RestResponse};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

/// Application id header.
pub const HEADER_APPLICATION_ID: &str = "X-Parse-Application-Id";
/// Client key header.
pub const HEADER_CLIENT_KEY: &str = "X-Parse-Client-Key";
/// Session token header.
pub const HEADER_SESSION_TOKEN: &str = "X-Parse-Session-Token";
/// Content type header.
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
/// Content type of request bodies.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// One outgoing HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// Header name and value pairs.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Option<Vec<u8>>,
    /// Timeout for the whole exchange.
    pub timeout: Duration,
}

impl HttpRequest {
    /// Value of header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual network I/O.
pub trait HttpClient: Send + Sync {
    /// Sends `request` and returns the status code and response body.
    ///
    /// # Errors
    ///
    /// Returns a message when no response was received.
    fn send(&self, request: HttpRequest) -> Result<(u16, Vec<u8>), String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// HTTP-based command transport.
pub struct HttpTransport<C: HttpClient> {
    config: ClientConfig,
    client: C,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(config: ClientConfig, client: C) -> Self {
        Self {
            config,
            client,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Stops sending requests until [`HttpTransport::reconnect`].
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Resumes sending requests.
    pub fn reconnect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    fn headers(&self, with_body: bool) -> Vec<(String, String)> {
        let mut headers = vec![
            (HEADER_APPLICATION_ID.to_string(), self.config.application_id.clone()),
            (HEADER_CLIENT_KEY.to_string(), self.config.client_key.clone()),
        ];
        if let Some(token) = &self.config.session_token {
            headers.push((HEADER_SESSION_TOKEN.to_string(), token.clone()));
        }
        if with_body {
            headers.push((HEADER_CONTENT_TYPE.to_string(), CONTENT_TYPE_JSON.to_string()));
        }
        headers
    }
}

impl<C: HttpClient> CommandTransport for HttpTransport<C> {
    fn perform(&self, request: &RestRequest) -> RestResult<RestResponse> {
        if !self.is_connected() {
            return Err(RestError::NotConnected);
        }

        let body = request.body.as_ref().map(|b| b.to_string().into_bytes());
        let http_request = HttpRequest {
            method: request.method,
            url: self.config.url_for(&request.path),
            headers: self.headers(body.is_some()),
            body,
            timeout: self.config.timeout,
        };
        debug!(method = %request.method, url = %http_request.url, "sending request");

        let (status_code, body) = self.client.send(http_request).map_err(|e| {
            *self.last_error.write() = Some(e.clone());
            RestError::transport_retryable(e)
        })?;

        *self.last_error.write() = None;
        Ok(RestResponse { status_code, body })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }
}

/// Servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a request for `path` (relative to the API endpoint).
    fn handle(&self, method: Method, path: &str, headers: &[(String, String)], body: Option<&[u8]>) -> (u16, Vec<u8>);
}

impl<S: LoopbackServer + ?Sized> LoopbackServer for std::sync::Arc<S> {
    fn handle(&self, method: Method, path: &str, headers: &[(String, String)], body: Option<&[u8]>) -> (u16, Vec<u8>) {
        (**self).handle(method, path, headers, body)
    }
}

/// An HTTP client that routes requests directly to an in-process server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    base_url: String,
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a loopback client answering for URLs under `base_url`.
    pub fn new(base_url: impl Into<String>, server: S) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            server,
        }
    }

    /// The wrapped server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn send(&self, request: HttpRequest) -> Result<(u16, Vec<u8>), String> {
        let path = request
            .url
            .strip_prefix(&self.base_url)
            .ok_or_else(|| format!("{} is outside {}", request.url, self.base_url))?
            .trim_start_matches('/');
        Ok(self
            .server
            .handle(request.method, path, &request.headers, request.body.as_deref()))
    }
}
