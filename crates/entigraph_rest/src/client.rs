//! Object client: saves, fetches and deletes entities over a transport.
//!
//! Every operation returns a [`Task`] that runs on the client's executor.
//! Requests are retried according to [`RetryConfig`](crate::RetryConfig)
//! while the failure is retryable.

use crate::batch::{self, BatchCommand, BatchFailure, BatchItem, BatchOp, BatchReport};
use crate::config::ClientConfig;
use crate::error::{codes, RestError, RestResult};
use crate::transport::{CommandTransport, RestRequest};
use entigraph_codec::LocalId;
use entigraph_core::{CoreError, EntityId, Flush, PointerMode, Session, SharedEntity};
use entigraph_task::{background, Executor, Task, TaskError};
use serde_json::Value as JsonValue;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Client for the backend's object endpoints.
#[derive(Clone)]
pub struct ObjectClient {
    session: Arc<Session>,
    transport: Arc<dyn CommandTransport>,
    config: Arc<ClientConfig>,
    executor: Arc<dyn Executor>,
}

impl ObjectClient {
    /// Creates a client whose tasks run on the shared background pool.
    pub fn new(session: Arc<Session>, transport: Arc<dyn CommandTransport>, config: ClientConfig) -> Self {
        Self {
            session,
            transport,
            config: Arc::new(config),
            executor: background(),
        }
    }

    /// Runs tasks on `executor` instead.
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    /// The session entities are interned in.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// The configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn spawn<T, F>(&self, f: F) -> Task<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(&ObjectClient) -> RestResult<T> + Send + 'static,
    {
        let client = self.clone();
        Task::call_on(self.executor.clone(), move || f(&client).map_err(TaskError::from))
    }

    /// Saves `node`: creates it if it has no objectId, updates it
    /// otherwise. Saving a clean saved node does nothing.
    ///
    /// Fields referencing unsaved nodes fail the save; use
    /// [`ObjectClient::save_all`] to save such graphs.
    pub fn save(&self, node: SharedEntity) -> Task<()> {
        self.spawn(move |client| client.save_now(&node))
    }

    /// Saves `nodes` and every unsaved node they reference, in dependency
    /// order.
    pub fn save_all(&self, nodes: Vec<SharedEntity>) -> Task<()> {
        self.spawn(move |client| client.save_all_now(nodes))
    }

    /// Fetches one object and merges it into the session.
    pub fn fetch(&self, class_name: &str, object_id: &str) -> Task<SharedEntity> {
        let class_name = class_name.to_string();
        let object_id = object_id.to_string();
        self.spawn(move |client| client.fetch_now(&class_name, &object_id))
    }

    /// Reloads `node` from the backend.
    pub fn refresh(&self, node: SharedEntity) -> Task<SharedEntity> {
        self.spawn(move |client| {
            let (class_name, object_id) = {
                let entity = node.read();
                let object_id = entity
                    .object_id()
                    .map(str::to_string)
                    .ok_or_else(|| CoreError::missing_object_id(entity.class_name()))?;
                (entity.class_name().to_string(), object_id)
            };
            client.fetch_now(&class_name, &object_id)
        })
    }

    /// Deletes `node` from the backend and evicts it from the session.
    pub fn delete(&self, node: SharedEntity) -> Task<()> {
        self.spawn(move |client| client.delete_now(&node))
    }

    /// Runs `items` as batch requests of at most
    /// [`ClientConfig::batch_limit`] commands.
    ///
    /// Per-command failures are reported, not raised; the task fails only
    /// when a whole request does.
    pub fn batch(&self, items: Vec<BatchItem>) -> Task<BatchReport> {
        self.spawn(move |client| client.batch_now(&items, None))
    }

    /// Performs `request`, retrying retryable failures.
    ///
    /// # Errors
    ///
    /// Returns the last error once attempts run out or on the first
    /// non-retryable one.
    pub fn perform(&self, request: &RestRequest) -> RestResult<JsonValue> {
        let retry = &self.config.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let delay = retry.delay_for_attempt(attempt);
                debug!(attempt, ?delay, "retrying request");
                std::thread::sleep(delay);
            }

            match self
                .transport
                .perform(request)
                .and_then(|response| response.into_json())
            {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                    warn!(method = %request.method, path = %request.path, error = %e, "request failed, will retry");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| RestError::transport_fatal("no attempts made")))
    }

    fn save_now(&self, node: &SharedEntity) -> RestResult<()> {
        let (is_new, path) = {
            let entity = node.read();
            if entity.object_id().is_some() && !entity.is_dirty() {
                return Ok(());
            }
            match entity.object_endpoint() {
                Some(path) => (false, path),
                None => (true, entity.endpoint()),
            }
        };

        let (flush, body) = self.session.begin_save(node, PointerMode::Strict)?;
        let request = if is_new {
            RestRequest::post(path, body)
        } else {
            RestRequest::put(path, body)
        };
        let response = match self.perform(&request) {
            Ok(response) => response,
            Err(e) => {
                self.session.abort_save(node, &flush);
                return Err(e);
            }
        };
        self.finish_save(node, &flush, &response)
    }

    fn finish_save(&self, node: &SharedEntity, flush: &Flush, response: &JsonValue) -> RestResult<()> {
        self.session.complete_save(node, flush, response).map_err(|e| {
            self.session.abort_save(node, flush);
            RestError::from(e)
        })
    }

    fn save_all_now(&self, nodes: Vec<SharedEntity>) -> RestResult<()> {
        let mut remaining = self.collect_unsaved(nodes);
        let mut round = 0usize;

        while !remaining.is_empty() {
            round += 1;
            let unsaved: BTreeSet<LocalId> = remaining
                .iter()
                .filter_map(|node| {
                    let entity = node.read();
                    match entity.object_id() {
                        Some(_) => None,
                        None => entity.local_id().cloned(),
                    }
                })
                .collect();

            let (ready, blocked): (Vec<SharedEntity>, Vec<SharedEntity>) = remaining
                .into_iter()
                .partition(|node| node.read().local_references().is_disjoint(&unsaved));

            if ready.is_empty() {
                // Everything left is on a cycle. Save the fields that don't
                // point at the cycle now and the rest next round.
                debug!(round, nodes = blocked.len(), "breaking reference cycle");
                let items = self.items_for(&blocked);
                self.batch_now(&items, Some(&unsaved))?.into_result()?;
                remaining = blocked
                    .into_iter()
                    .filter(|node| node.read().is_dirty())
                    .collect();
            } else {
                debug!(round, ready = ready.len(), blocked = blocked.len(), "saving round");
                let items = self.items_for(&ready);
                self.batch_now(&items, None)?.into_result()?;
                remaining = blocked;
            }
        }
        Ok(())
    }

    fn items_for(&self, nodes: &[SharedEntity]) -> Vec<BatchItem> {
        nodes
            .iter()
            .map(|node| {
                let op = if node.read().object_id().is_some() {
                    BatchOp::Update
                } else {
                    BatchOp::Create
                };
                BatchItem::new(node.clone(), op)
            })
            .collect()
    }

    /// Dirty nodes among `nodes` plus the unsaved nodes they reach.
    fn collect_unsaved(&self, nodes: Vec<SharedEntity>) -> Vec<SharedEntity> {
        let mut seen: HashSet<EntityId> = HashSet::new();
        let mut queue: VecDeque<SharedEntity> = nodes.into();
        let mut collected = Vec::new();

        while let Some(node) = queue.pop_front() {
            if !seen.insert(node.id()) {
                continue;
            }
            let (wanted, references) = {
                let entity = node.read();
                (
                    entity.is_dirty() || entity.object_id().is_none(),
                    entity.local_references(),
                )
            };
            for local_id in &references {
                if let Some(target) = self.session.resolver().resolve(local_id) {
                    queue.push_back(target);
                }
            }
            if wanted {
                collected.push(node);
            }
        }
        collected
    }

    fn batch_now(&self, items: &[BatchItem], deferred: Option<&BTreeSet<LocalId>>) -> RestResult<BatchReport> {
        let limit = self.config.batch_limit.max(1);
        let mut report = BatchReport::default();
        for (chunk_index, chunk) in items.chunks(limit).enumerate() {
            let chunk_report = self.run_chunk(chunk, deferred)?;
            report.merge(chunk_report, chunk_index * limit);
        }
        info!(
            commands = items.len(),
            succeeded = report.succeeded,
            failed = report.failures.len(),
            "batch finished"
        );
        Ok(report)
    }

    fn run_chunk(&self, items: &[BatchItem], deferred: Option<&BTreeSet<LocalId>>) -> RestResult<BatchReport> {
        let prefix = self.config.batch_path_prefix();
        let mut commands = Vec::with_capacity(items.len());
        let mut flushes: Vec<Option<Flush>> = Vec::with_capacity(items.len());

        for item in items {
            match self.prepare(item, deferred) {
                Ok((flush, body)) => {
                    let path = format!("{prefix}{}", item.op.path(&item.node.read()));
                    commands.push(BatchCommand {
                        method: item.op.method(),
                        path,
                        body,
                    });
                    flushes.push(flush);
                }
                Err(e) => {
                    self.abort_all(items, &flushes);
                    return Err(e);
                }
            }
        }

        let request = RestRequest::post("batch", batch::request_body(&commands));
        let results = match self
            .perform(&request)
            .and_then(|response| batch::parse_results(&response, items.len()))
        {
            Ok(results) => results,
            Err(e) => {
                self.abort_all(items, &flushes);
                return Err(e);
            }
        };

        let mut report = BatchReport::default();
        for (index, ((item, flush), result)) in items.iter().zip(&flushes).zip(results).enumerate() {
            let outcome = match result {
                Ok(response) => self.apply_result(item, flush.as_ref(), &response),
                Err((code, message)) => {
                    if let Some(flush) = flush {
                        self.session.abort_save(&item.node, flush);
                    }
                    Err(RestError::Server { code, message })
                }
            };
            match outcome {
                Ok(()) => report.succeeded += 1,
                Err(e) => report.failures.push(BatchFailure {
                    index,
                    code: e.code().unwrap_or(codes::INVALID_JSON),
                    message: e.to_string(),
                }),
            }
        }
        Ok(report)
    }

    fn prepare(
        &self,
        item: &BatchItem,
        deferred: Option<&BTreeSet<LocalId>>,
    ) -> RestResult<(Option<Flush>, Option<JsonValue>)> {
        item.op.check(&item.node.read())?;
        if item.op == BatchOp::Delete {
            return Ok((None, None));
        }
        let (flush, body) = match deferred {
            Some(deferred) => self
                .session
                .begin_save_deferring(&item.node, PointerMode::Strict, deferred)?,
            None => self.session.begin_save(&item.node, PointerMode::Strict)?,
        };
        Ok((Some(flush), Some(body)))
    }

    fn apply_result(&self, item: &BatchItem, flush: Option<&Flush>, response: &JsonValue) -> RestResult<()> {
        match flush {
            Some(flush) => self.finish_save(&item.node, flush, response),
            None => {
                self.session.evict(item.node.id());
                Ok(())
            }
        }
    }

    fn abort_all(&self, items: &[BatchItem], flushes: &[Option<Flush>]) {
        for (item, flush) in items.iter().zip(flushes) {
            if let Some(flush) = flush {
                self.session.abort_save(&item.node, flush);
            }
        }
    }

    fn fetch_now(&self, class_name: &str, object_id: &str) -> RestResult<SharedEntity> {
        let path = self.session.stub(class_name, object_id).read().object_endpoint();
        let path = path.ok_or_else(|| CoreError::missing_object_id(class_name))?;
        let mut body = self.perform(&RestRequest::get(path))?;
        match body.as_object_mut() {
            Some(map) => {
                map.entry("objectId")
                    .or_insert_with(|| JsonValue::String(object_id.to_string()));
            }
            None => return Err(RestError::Protocol("fetched object is not a JSON object".into())),
        }
        Ok(self.session.hydrate(class_name, &body)?)
    }

    fn delete_now(&self, node: &SharedEntity) -> RestResult<()> {
        let path = {
            let entity = node.read();
            entity
                .object_endpoint()
                .ok_or_else(|| CoreError::missing_object_id(entity.class_name()))?
        };
        self.perform(&RestRequest::delete(path))?;
        self.session.evict(node.id());
        Ok(())
    }
}

impl std::fmt::Debug for ObjectClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectClient")
            .field("api_endpoint", &self.config.api_endpoint)
            .field("nodes", &self.session.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::transport::{Method, MockTransport, RestResponse};
    use entigraph_task::immediate;
    use serde_json::json;
    use std::time::Duration;

    fn client(transport: Arc<MockTransport>) -> ObjectClient {
        let config = ClientConfig::new("https://api.example.com/1", "app", "key").with_retry(
            RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(false),
        );
        ObjectClient::new(Arc::new(Session::new()), transport, config).with_executor(immediate())
    }

    #[test]
    fn save_creates_then_updates() {
        let transport = Arc::new(MockTransport::new());
        let client = client(transport.clone());
        let node = client.session().create("Game");
        node.write().set("score", 1i64).unwrap();

        transport.push_json(201, &json!({"objectId": "g1", "createdAt": "2024-01-01T00:00:00.000Z"}));
        client.save(node.clone()).wait_for_completion().unwrap();
        assert_eq!(node.read().object_id(), Some("g1"));

        node.write().increment("score", 2i64).unwrap();
        transport.push_json(200, &json!({"updatedAt": "2024-01-01T00:00:01.000Z"}));
        client.save(node.clone()).wait_for_completion().unwrap();

        let requests = transport.requests();
        assert_eq!(requests[0].method, Method::Post);
        assert_eq!(requests[0].path, "classes/Game");
        assert_eq!(requests[0].body, Some(json!({"score": 1})));
        assert_eq!(requests[1].method, Method::Put);
        assert_eq!(requests[1].path, "classes/Game/g1");
        assert_eq!(
            requests[1].body,
            Some(json!({"score": {"__op": "Increment", "amount": 2}}))
        );
        assert_eq!(node.read().get_i64("score"), Some(3));
    }

    #[test]
    fn clean_saved_node_is_not_sent() {
        let transport = Arc::new(MockTransport::new());
        let client = client(transport.clone());
        let node = client.session().stub("Game", "g1");
        client.save(node).wait_for_completion().unwrap();
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn retryable_failures_are_retried() {
        let transport = Arc::new(MockTransport::new());
        let client = client(transport.clone());
        transport.push_error(RestError::transport_retryable("reset"));
        transport.push_response(RestResponse::json(500, &json!({"code": 1, "error": "oops"})));
        transport.push_json(200, &json!({"objectId": "g1"}));

        let body = client.perform(&RestRequest::get("classes/Game/g1")).unwrap();
        assert_eq!(body, json!({"objectId": "g1"}));
        assert_eq!(transport.requests().len(), 3);
    }

    #[test]
    fn permanent_failure_restores_pending_changes() {
        let transport = Arc::new(MockTransport::new());
        let client = client(transport.clone());
        let node = client.session().create("Game");
        node.write().set("score", 1i64).unwrap();
        transport.push_response(RestResponse::json(400, &json!({"code": 119, "error": "nope"})));

        let err = client.save(node.clone()).wait_for_completion().unwrap_err();
        assert_eq!(err.downcast_ref::<RestError>().and_then(RestError::code), Some(119));
        assert_eq!(transport.requests().len(), 1);
        let entity = node.read();
        assert!(entity.is_dirty_field("score"));
        assert!(!entity.has_save_in_flight());
        assert_eq!(entity.get_i64("score"), Some(1));
    }

    #[test]
    fn delete_requires_object_id() {
        let transport = Arc::new(MockTransport::new());
        let client = client(transport.clone());
        let node = client.session().create("Game");
        let err = client.delete(node).wait_for_completion().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RestError>(),
            Some(RestError::Core(CoreError::MissingObjectId { .. }))
        ));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn fetch_hydrates_session() {
        let transport = Arc::new(MockTransport::new());
        let client = client(transport.clone());
        transport.push_json(200, &json!({"objectId": "g1", "score": 9}));

        let node = client.fetch("Game", "g1").wait_for_completion().unwrap();
        assert_eq!(node.read().get_i64("score"), Some(9));
        assert!(client.session().find("Game", "g1").unwrap().ptr_eq(&node));
        assert_eq!(transport.requests()[0].path, "classes/Game/g1");
    }

    #[test]
    fn batch_reports_per_command_failures() {
        let transport = Arc::new(MockTransport::new());
        let client = client(transport.clone());
        let first = client.session().create("Game");
        first.write().set("score", 1i64).unwrap();
        let second = client.session().stub("Game", "g2");
        second.write().set("score", 2i64).unwrap();

        transport.push_json(
            200,
            &json!([
                {"success": {"objectId": "g1"}},
                {"error": {"code": 101, "error": "object not found"}}
            ]),
        );
        let report = client
            .batch(vec![
                BatchItem::new(first.clone(), BatchOp::Create),
                BatchItem::new(second.clone(), BatchOp::Update),
            ])
            .wait_for_completion()
            .unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failures[0].index, 1);
        assert_eq!(report.failures[0].code, 101);
        assert_eq!(first.read().object_id(), Some("g1"));
        assert!(second.read().is_dirty_field("score"));

        let request = &transport.requests()[0];
        assert_eq!(request.path, "batch");
        assert_eq!(
            request.body.as_ref().unwrap()["requests"][1]["path"],
            json!("/1/classes/Game/g2")
        );
    }
}
