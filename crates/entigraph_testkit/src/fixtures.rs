//! Test fixtures: an in-process backend and storage helpers.
//!
//! [`FakeServer`] answers the object endpoints the client uses. It stores
//! documents as JSON, applies field operations the way the backend does
//! and rejects pointers that name no saved object, so tests see the same
//! failures a real deployment would report.

use chrono::{DateTime, Duration, TimeZone, Utc};
use entigraph_codec::format_date;
use entigraph_core::Session;
use entigraph_rest::{
    codes, ClientConfig, CommandTransport, LoopbackServer, Method, ObjectClient, RestError,
    RestRequest, RestResponse, RestResult, RetryConfig, DEFAULT_BATCH_LIMIT,
    HEADER_APPLICATION_ID,
};
use entigraph_storage::FileBlobStore;
use parking_lot::Mutex;
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tempfile::TempDir;

/// Endpoint the fixtures configure clients with.
pub const TEST_ENDPOINT: &str = "https://api.example.test/1";
/// Application id the fixtures configure clients with.
pub const TEST_APPLICATION_ID: &str = "test-app";

type ErrorBody = (u16, i64, String);

#[derive(Default)]
struct FakeState {
    objects: BTreeMap<(String, String), JsonMap<String, JsonValue>>,
    relations: BTreeMap<(String, String, String), BTreeSet<String>>,
    next_id: u64,
    ticks: i64,
    failures: VecDeque<RestResult<ErrorBody>>,
    requests: Vec<RestRequest>,
}

/// An in-memory backend.
pub struct FakeServer {
    state: Mutex<FakeState>,
    batch_prefix: String,
    batch_limit: usize,
    epoch: DateTime<Utc>,
}

impl FakeServer {
    /// Creates a server whose batch paths start with `/1/`.
    pub fn new() -> Self {
        Self::with_batch_prefix("/1/")
    }

    /// Creates a server whose batch paths start with `prefix`.
    pub fn with_batch_prefix(prefix: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            batch_prefix: prefix.into(),
            batch_limit: DEFAULT_BATCH_LIMIT,
            epoch: Utc
                .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_default(),
        }
    }

    /// Makes the next request fail with a backend error.
    pub fn fail_next(&self, status: u16, code: i64, message: impl Into<String>) {
        self.state
            .lock()
            .failures
            .push_back(Ok((status, code, message.into())));
    }

    /// Makes the next request fail before reaching the backend.
    pub fn drop_next(&self, error: RestError) {
        self.state.lock().failures.push_back(Err(error));
    }

    /// Requests received so far, top level only.
    pub fn requests(&self) -> Vec<RestRequest> {
        self.state.lock().requests.clone()
    }

    /// Number of stored documents.
    pub fn object_count(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// Stored document, as the backend would return it.
    pub fn object(&self, class_name: &str, object_id: &str) -> Option<JsonValue> {
        let state = self.state.lock();
        state
            .objects
            .get(&(class_name.to_string(), object_id.to_string()))
            .map(|map| JsonValue::Object(map.clone()))
    }

    /// Stores a document directly and returns its objectId.
    pub fn insert(&self, class_name: &str, fields: JsonValue) -> String {
        let mut state = self.state.lock();
        let object_id = Self::allocate_id(&mut state);
        let now = self.tick(&mut state);
        let mut map = fields.as_object().cloned().unwrap_or_default();
        map.insert("objectId".into(), json!(object_id));
        map.insert("createdAt".into(), json!(now));
        map.insert("updatedAt".into(), json!(now));
        state
            .objects
            .insert((class_name.to_string(), object_id.clone()), map);
        object_id
    }

    /// Members of a relation field.
    pub fn relation_members(&self, class_name: &str, object_id: &str, key: &str) -> Vec<String> {
        self.state
            .lock()
            .relations
            .get(&(class_name.to_string(), object_id.to_string(), key.to_string()))
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn allocate_id(state: &mut FakeState) -> String {
        state.next_id += 1;
        format!("obj{:07}", state.next_id)
    }

    fn tick(&self, state: &mut FakeState) -> String {
        state.ticks += 1;
        format_date(&(self.epoch + Duration::milliseconds(state.ticks)))
    }

    fn respond(&self, request: &RestRequest) -> RestResult<(u16, JsonValue)> {
        let mut state = self.state.lock();
        state.requests.push(request.clone());
        if let Some(failure) = state.failures.pop_front() {
            let (status, code, message) = failure?;
            return Ok((status, json!({"code": code, "error": message})));
        }
        Ok(self.dispatch(&mut state, request.method, &request.path, request.body.as_ref()))
    }

    fn dispatch(
        &self,
        state: &mut FakeState,
        method: Method,
        path: &str,
        body: Option<&JsonValue>,
    ) -> (u16, JsonValue) {
        let result = if path.trim_matches('/') == "batch" && method == Method::Post {
            self.batch(state, body)
        } else {
            self.object_request(state, method, path, body)
        };
        match result {
            Ok(response) => response,
            Err((status, code, message)) => (status, json!({"code": code, "error": message})),
        }
    }

    fn batch(&self, state: &mut FakeState, body: Option<&JsonValue>) -> Result<(u16, JsonValue), ErrorBody> {
        let requests = body
            .and_then(|b| b.get("requests"))
            .and_then(JsonValue::as_array)
            .ok_or_else(|| (400, codes::INVALID_JSON, "batch body has no requests".to_string()))?;
        if requests.len() > self.batch_limit {
            return Err((
                400,
                codes::TOO_MANY_COMMANDS_IN_BATCH_REQUEST,
                format!("batch carries {} commands", requests.len()),
            ));
        }

        let mut results = Vec::with_capacity(requests.len());
        for command in requests {
            let method = match command.get("method").and_then(JsonValue::as_str) {
                Some("GET") => Method::Get,
                Some("POST") => Method::Post,
                Some("PUT") => Method::Put,
                Some("DELETE") => Method::Delete,
                _ => return Err((400, codes::INVALID_JSON, "batch command has no method".into())),
            };
            let path = command
                .get("path")
                .and_then(JsonValue::as_str)
                .and_then(|p| p.strip_prefix(self.batch_prefix.as_str()))
                .ok_or_else(|| (400, codes::INVALID_JSON, "batch path outside the API".to_string()))?;
            match self.object_request(state, method, path, command.get("body")) {
                Ok((_, success)) => results.push(json!({ "success": success })),
                Err((_, code, message)) => {
                    results.push(json!({ "error": {"code": code, "error": message} }))
                }
            }
        }
        Ok((200, JsonValue::Array(results)))
    }

    fn object_request(
        &self,
        state: &mut FakeState,
        method: Method,
        path: &str,
        body: Option<&JsonValue>,
    ) -> Result<(u16, JsonValue), ErrorBody> {
        let (class_name, object_id) = route(path)
            .ok_or_else(|| (404, codes::INVALID_JSON, format!("no route for {path}")))?;
        if let Some(body) = body {
            check_pointers(body)?;
        }

        match (method, object_id) {
            (Method::Post, None) => {
                let fields = body_fields(body)?;
                let object_id = Self::allocate_id(state);
                let now = self.tick(state);
                let mut document = JsonMap::new();
                document.insert("objectId".into(), json!(object_id));
                document.insert("createdAt".into(), json!(now));
                document.insert("updatedAt".into(), json!(now));
                let key = (class_name.clone(), object_id.clone());
                apply_fields(state, &key, &mut document, fields)?;
                state.objects.insert(key, document);
                Ok((201, json!({"objectId": object_id, "createdAt": now})))
            }
            (Method::Put, Some(object_id)) => {
                let fields = body_fields(body)?;
                let key = (class_name, object_id);
                let mut document = state.objects.remove(&key).ok_or_else(not_found)?;
                let now = self.tick(state);
                document.insert("updatedAt".into(), json!(now));
                let applied = apply_fields(state, &key, &mut document, fields);
                state.objects.insert(key, document);
                applied?;
                Ok((200, json!({"updatedAt": now})))
            }
            (Method::Get, Some(object_id)) => state
                .objects
                .get(&(class_name, object_id))
                .map(|document| (200, JsonValue::Object(document.clone())))
                .ok_or_else(not_found),
            (Method::Delete, Some(object_id)) => {
                let key = (class_name, object_id);
                state.objects.remove(&key).ok_or_else(not_found)?;
                state
                    .relations
                    .retain(|(class, id, _), _| !(class == &key.0 && id == &key.1));
                Ok((200, json!({})))
            }
            (method, _) => Err((
                400,
                codes::OPERATION_FORBIDDEN,
                format!("{method} is not allowed on {path}"),
            )),
        }
    }
}

impl Default for FakeServer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FakeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeServer")
            .field("objects", &self.object_count())
            .finish()
    }
}

impl CommandTransport for FakeServer {
    fn perform(&self, request: &RestRequest) -> RestResult<RestResponse> {
        let (status, body) = self.respond(request)?;
        Ok(RestResponse::json(status, &body))
    }
}

impl LoopbackServer for FakeServer {
    fn handle(&self, method: Method, path: &str, headers: &[(String, String)], body: Option<&[u8]>) -> (u16, Vec<u8>) {
        let authorized = headers
            .iter()
            .any(|(k, v)| k.eq_ignore_ascii_case(HEADER_APPLICATION_ID) && v == TEST_APPLICATION_ID);
        if !authorized {
            let error = json!({"code": codes::OPERATION_FORBIDDEN, "error": "unauthorized"});
            return (401, error.to_string().into_bytes());
        }
        let body = match body.map(serde_json::from_slice::<JsonValue>).transpose() {
            Ok(body) => body,
            Err(e) => {
                let error = json!({"code": codes::INVALID_JSON, "error": e.to_string()});
                return (400, error.to_string().into_bytes());
            }
        };
        let request = RestRequest {
            method,
            path: path.to_string(),
            body,
        };
        match self.respond(&request) {
            Ok((status, body)) => (status, body.to_string().into_bytes()),
            Err(e) => (
                500,
                json!({"code": codes::INTERNAL_SERVER_ERROR, "error": e.to_string()})
                    .to_string()
                    .into_bytes(),
            ),
        }
    }
}

fn not_found() -> ErrorBody {
    (404, codes::OBJECT_NOT_FOUND, "object not found".into())
}

fn route(path: &str) -> Option<(String, Option<String>)> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match segments.as_slice() {
        ["classes", class_name] => Some((class_name.to_string(), None)),
        ["classes", class_name, object_id] => {
            Some((class_name.to_string(), Some(object_id.to_string())))
        }
        [endpoint] => builtin_class(endpoint).map(|class_name| (class_name, None)),
        [endpoint, object_id] => {
            builtin_class(endpoint).map(|class_name| (class_name, Some(object_id.to_string())))
        }
        _ => None,
    }
}

fn builtin_class(endpoint: &str) -> Option<String> {
    let class_name = match endpoint {
        "users" => "_User",
        "roles" => "_Role",
        "installations" => "_Installation",
        "sessions" => "_Session",
        _ => return None,
    };
    Some(class_name.to_string())
}

fn body_fields(body: Option<&JsonValue>) -> Result<&JsonMap<String, JsonValue>, ErrorBody> {
    body.and_then(JsonValue::as_object)
        .ok_or_else(|| (400, codes::INVALID_JSON, "body must be a JSON object".into()))
}

fn check_pointers(value: &JsonValue) -> Result<(), ErrorBody> {
    match value {
        JsonValue::Object(map) => {
            if map.get("__type").and_then(JsonValue::as_str) == Some("Pointer")
                && map.get("objectId").and_then(JsonValue::as_str).is_none()
            {
                return Err((400, codes::INVALID_POINTER, "pointer has no objectId".into()));
            }
            map.values().try_for_each(check_pointers)
        }
        JsonValue::Array(items) => items.iter().try_for_each(check_pointers),
        _ => Ok(()),
    }
}

fn apply_fields(
    state: &mut FakeState,
    key: &(String, String),
    document: &mut JsonMap<String, JsonValue>,
    fields: &JsonMap<String, JsonValue>,
) -> Result<(), ErrorBody> {
    for (field, value) in fields {
        if matches!(field.as_str(), "objectId" | "createdAt" | "updatedAt") {
            continue;
        }
        apply_field(state, key, document, field, value)?;
    }
    Ok(())
}

fn apply_field(
    state: &mut FakeState,
    key: &(String, String),
    document: &mut JsonMap<String, JsonValue>,
    field: &str,
    value: &JsonValue,
) -> Result<(), ErrorBody> {
    let op = match value.get("__op").and_then(JsonValue::as_str) {
        Some(op) => op,
        None => {
            document.insert(field.to_string(), value.clone());
            return Ok(());
        }
    };
    let objects = value
        .get("objects")
        .and_then(JsonValue::as_array)
        .cloned()
        .unwrap_or_default();

    match op {
        "Delete" => {
            document.remove(field);
        }
        "Increment" => {
            let amount = value.get("amount").cloned().unwrap_or(json!(0));
            let current = document.get(field).filter(|v| !v.is_null()).cloned();
            let sum = match current {
                None => amount,
                Some(current) => match (current.as_i64(), amount.as_i64()) {
                    (Some(a), Some(b)) => json!(a.wrapping_add(b)),
                    _ => match (current.as_f64(), amount.as_f64()) {
                        (Some(a), Some(b)) => json!(a + b),
                        _ => {
                            return Err((
                                400,
                                codes::INVALID_JSON,
                                format!("cannot increment non-number field {field}"),
                            ))
                        }
                    },
                },
            };
            document.insert(field.to_string(), sum);
        }
        "Add" | "AddUnique" | "Remove" => {
            let mut list = match document.get(field) {
                None | Some(JsonValue::Null) => Vec::new(),
                Some(JsonValue::Array(items)) => items.clone(),
                Some(_) => {
                    return Err((
                        400,
                        codes::INVALID_JSON,
                        format!("field {field} is not a list"),
                    ))
                }
            };
            match op {
                "Add" => list.extend(objects),
                "AddUnique" => {
                    for item in objects {
                        if !list.contains(&item) {
                            list.push(item);
                        }
                    }
                }
                _ => list.retain(|item| !objects.contains(item)),
            }
            document.insert(field.to_string(), JsonValue::Array(list));
        }
        "AddRelation" | "RemoveRelation" => {
            let target_class = objects
                .first()
                .and_then(|o| o.get("className"))
                .cloned()
                .unwrap_or(JsonValue::Null);
            let members = state
                .relations
                .entry((key.0.clone(), key.1.clone(), field.to_string()))
                .or_default();
            for object in &objects {
                if let Some(id) = object.get("objectId").and_then(JsonValue::as_str) {
                    if op == "AddRelation" {
                        members.insert(id.to_string());
                    } else {
                        members.remove(id);
                    }
                }
            }
            if !document.contains_key(field) && !target_class.is_null() {
                document.insert(
                    field.to_string(),
                    json!({"__type": "Relation", "className": target_class}),
                );
            }
        }
        "Batch" => {
            let ops = value
                .get("ops")
                .and_then(JsonValue::as_array)
                .cloned()
                .unwrap_or_default();
            for op in &ops {
                apply_field(state, key, document, field, op)?;
            }
        }
        other => {
            return Err((
                400,
                codes::INVALID_JSON,
                format!("unknown operation {other}"),
            ))
        }
    }
    Ok(())
}

/// Configuration pointing at [`TEST_ENDPOINT`] with fast retries.
pub fn test_config() -> ClientConfig {
    ClientConfig::new(TEST_ENDPOINT, TEST_APPLICATION_ID, "test-key").with_retry(
        RetryConfig::new(3)
            .with_initial_delay(std::time::Duration::from_millis(1))
            .with_jitter(false),
    )
}

/// A client talking straight to `server` through a fresh session.
pub fn test_client(server: &Arc<FakeServer>) -> ObjectClient {
    let transport: Arc<dyn CommandTransport> = server.clone();
    ObjectClient::new(Arc::new(Session::new()), transport, test_config())
}

/// A file blob store in a temporary directory that lives as long as the
/// fixture.
pub struct TempBlobStore {
    /// The store.
    pub store: FileBlobStore,
    _temp_dir: TempDir,
}

impl TempBlobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileBlobStore::open(temp_dir.path()).expect("Failed to open blob store");
        Self {
            store,
            _temp_dir: temp_dir,
        }
    }
}

impl Default for TempBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TempBlobStore {
    type Target = FileBlobStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs `f` with a temporary file blob store.
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&FileBlobStore) -> R,
{
    let store = TempBlobStore::new();
    f(&store)
}
