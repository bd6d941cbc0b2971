//! Session arena tying nodes, identities and the codec together.

use crate::entity::{Flush, ServerPayload, SharedEntity};
use crate::error::{CoreError, CoreResult};
use crate::id::EntityId;
use crate::persist::{self, Envelope};
use crate::registry::ClassRegistry;
use crate::resolver::IdentityResolver;
use entigraph_codec::{
    decode, decode_operation, encode, CodecError, CodecResult, DecodeContext, EmbeddedObject,
    LenientPointers, LocalId, LocalIdLookup, LocalIdState, ObjectRef, Operation, Pointer, PointerStrategy,
    StrictPointers, Value,
};
use entigraph_storage::BlobStore;
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// How references to unsaved entities are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerMode {
    /// Every reference needs a server identifier.
    Strict,
    /// Unsaved references become `localId` placeholders.
    Lenient,
}

#[derive(Default)]
struct Arena {
    nodes: HashMap<EntityId, SharedEntity>,
    index: HashMap<(String, String), EntityId>,
}

/// Owns every node loaded or created by one client.
///
/// Saved nodes are unique per `(className, objectId)`: decoding a pointer
/// or an embedded object reuses the node already in the arena.
pub struct Session {
    registry: Arc<ClassRegistry>,
    resolver: Arc<IdentityResolver>,
    arena: RwLock<Arena>,
}

impl Session {
    /// A session with the default class registry.
    pub fn new() -> Self {
        Self::with_registry(Arc::new(ClassRegistry::new()))
    }

    /// A session building nodes through `registry`.
    pub fn with_registry(registry: Arc<ClassRegistry>) -> Self {
        Self {
            registry,
            resolver: Arc::new(IdentityResolver::new()),
            arena: RwLock::new(Arena::default()),
        }
    }

    /// Class registry.
    pub fn registry(&self) -> &Arc<ClassRegistry> {
        &self.registry
    }

    /// Identity resolver.
    pub fn resolver(&self) -> &Arc<IdentityResolver> {
        &self.resolver
    }

    /// Creates a new unsaved node of `class_name`.
    pub fn create(&self, class_name: &str) -> SharedEntity {
        let local_id = self.resolver.allocate_local_id();
        let node = SharedEntity::new(self.registry.create(class_name, local_id.clone()));
        self.resolver.register_pending(local_id, node.clone());
        self.arena.write().nodes.insert(node.id(), node.clone());
        node
    }

    /// The node for a saved entity, creating a stub if needed.
    pub fn stub(&self, class_name: &str, object_id: &str) -> SharedEntity {
        let key = (class_name.to_string(), object_id.to_string());
        let mut arena = self.arena.write();
        if let Some(node) = arena.index.get(&key).and_then(|id| arena.nodes.get(id)) {
            return node.clone();
        }
        let node = SharedEntity::new(self.registry.stub(class_name, object_id));
        arena.index.insert(key, node.id());
        arena.nodes.insert(node.id(), node.clone());
        node
    }

    /// The node with handle `id`.
    pub fn get(&self, id: EntityId) -> Option<SharedEntity> {
        self.arena.read().nodes.get(&id).cloned()
    }

    /// The saved node `(class_name, object_id)`, if loaded.
    pub fn find(&self, class_name: &str, object_id: &str) -> Option<SharedEntity> {
        let arena = self.arena.read();
        arena
            .index
            .get(&(class_name.to_string(), object_id.to_string()))
            .and_then(|id| arena.nodes.get(id))
            .cloned()
    }

    /// The node `pointer` refers to, if present.
    pub fn entity_for(&self, pointer: &Pointer) -> Option<SharedEntity> {
        match &pointer.target {
            ObjectRef::Server(object_id) => self.find(&pointer.class_name, object_id),
            ObjectRef::Local(local_id) => self.resolver.resolve(local_id).or_else(|| {
                self.resolver
                    .object_id_for(local_id)
                    .and_then(|object_id| self.find(&pointer.class_name, &object_id))
            }),
        }
    }

    /// Every node in the arena.
    pub fn nodes(&self) -> Vec<SharedEntity> {
        self.arena.read().nodes.values().cloned().collect()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.arena.read().nodes.len()
    }

    /// True if the arena holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops a node from the arena. Other handles keep it alive.
    pub fn evict(&self, id: EntityId) -> bool {
        let mut arena = self.arena.write();
        let removed = arena.nodes.remove(&id).is_some();
        if removed {
            arena.index.retain(|_, node_id| *node_id != id);
        }
        removed
    }

    fn context(&self) -> ArenaContext<'_> {
        ArenaContext { session: self }
    }

    /// Decodes wire JSON, interning referenced entities.
    ///
    /// # Errors
    ///
    /// Fails on malformed input and on local ids this session never issued.
    pub fn decode(&self, json: &JsonValue) -> CoreResult<Value> {
        Ok(decode(json, &self.context())?)
    }

    /// Decodes a field operation.
    ///
    /// # Errors
    ///
    /// See [`Session::decode`].
    pub fn decode_operation(&self, json: &JsonValue) -> CoreResult<Operation> {
        Ok(decode_operation(json, &self.context())?)
    }

    /// Encodes a value.
    ///
    /// # Errors
    ///
    /// Fails for values the wire cannot carry and for references `mode`
    /// does not allow.
    pub fn encode(&self, value: &Value, mode: PointerMode) -> CoreResult<JsonValue> {
        Ok(encode(value, &*self.strategy(mode))?)
    }

    fn strategy(&self, mode: PointerMode) -> Box<dyn PointerStrategy + '_> {
        let lookup: &dyn LocalIdLookup = self.resolver.as_ref();
        match mode {
            PointerMode::Strict => Box::new(StrictPointers::new(lookup)),
            PointerMode::Lenient => Box::new(LenientPointers::new(lookup)),
        }
    }

    /// Interns a server object of `class_name` and merges its fields.
    ///
    /// # Errors
    ///
    /// Fails if the JSON is not an object, has no `objectId` or carries
    /// undecodable fields.
    pub fn hydrate(&self, class_name: &str, json: &JsonValue) -> CoreResult<SharedEntity> {
        let map = json
            .as_object()
            .ok_or_else(|| CodecError::invalid_structure("server object must be a JSON object"))?;
        let payload = ServerPayload::decode(map, &self.context())?;
        let object_id = payload
            .object_id
            .clone()
            .ok_or_else(|| CoreError::missing_object_id(class_name))?;
        let node = self.stub(class_name, &object_id);
        node.write().apply_server_data(payload)?;
        Ok(node)
    }

    /// Flushes `node` and encodes the snapshot as a save request body.
    ///
    /// On an encoding failure the snapshot is returned to the node.
    ///
    /// # Errors
    ///
    /// See [`Session::encode`].
    pub fn begin_save(&self, node: &SharedEntity, mode: PointerMode) -> CoreResult<(Flush, JsonValue)> {
        self.begin_save_with(node, mode, None)
    }

    /// Like [`Session::begin_save`], but fields referencing any of
    /// `deferred` stay pending for a later save.
    ///
    /// Used to break reference cycles between unsaved nodes saved
    /// together.
    ///
    /// # Errors
    ///
    /// See [`Session::encode`].
    pub fn begin_save_deferring(
        &self,
        node: &SharedEntity,
        mode: PointerMode,
        deferred: &BTreeSet<LocalId>,
    ) -> CoreResult<(Flush, JsonValue)> {
        self.begin_save_with(node, mode, Some(deferred))
    }

    fn begin_save_with(
        &self,
        node: &SharedEntity,
        mode: PointerMode,
        deferred: Option<&BTreeSet<LocalId>>,
    ) -> CoreResult<(Flush, JsonValue)> {
        let strategy = self.strategy(mode);
        let mut entity = node.write();
        let flush = match deferred {
            Some(deferred) => entity.flush_deferring(deferred),
            None => entity.flush(),
        };
        match flush.encode(&*strategy) {
            Ok(body) => Ok((flush, body)),
            Err(e) => {
                entity.abort_flush(&flush);
                Err(e)
            }
        }
    }

    /// Returns a failed save's snapshot to `node`.
    pub fn abort_save(&self, node: &SharedEntity, flush: &Flush) {
        node.write().abort_flush(flush);
    }

    /// Applies a save response to `node`.
    ///
    /// On a first save the node is indexed under its new identifier and
    /// references to its local id are rewritten across the arena.
    ///
    /// # Errors
    ///
    /// Fails if the response is malformed or names another document; the
    /// snapshot stays in flight so the caller can abort it.
    pub fn complete_save(&self, node: &SharedEntity, flush: &Flush, response: &JsonValue) -> CoreResult<()> {
        let map = response
            .as_object()
            .ok_or_else(|| CodecError::invalid_structure("save response must be a JSON object"))?;
        let payload = ServerPayload::decode(map, &self.context())?;
        let (class_name, current_id) = {
            let entity = node.read();
            (entity.class_name().to_string(), entity.object_id().map(str::to_string))
        };
        let object_id = payload
            .object_id
            .clone()
            .or(current_id)
            .ok_or_else(|| CoreError::missing_object_id(&class_name))?;

        let retired = node.write().mark_saved(flush, &object_id, payload)?;
        self.arena
            .write()
            .index
            .insert((class_name, object_id.clone()), node.id());

        if let Some(local_id) = retired {
            let mut rewritten = self.resolver.promote(&local_id, &object_id);
            for other in self.nodes() {
                rewritten += other.write().rewrite_local_id(&local_id, &object_id);
            }
            debug!(%local_id, %object_id, rewritten, "first save completed");
        }
        Ok(())
    }

    /// Serializes a clean saved node.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DirtyEntity`] for nodes with unsaved changes.
    pub fn externalize(&self, node: &SharedEntity) -> CoreResult<Vec<u8>> {
        persist::externalize_entity(&node.read(), self.resolver.as_ref())
    }

    /// Reads a node blob into the arena.
    ///
    /// # Errors
    ///
    /// Fails on unreadable blobs or undecodable payloads.
    pub fn internalize(&self, bytes: &[u8]) -> CoreResult<SharedEntity> {
        let (class_name, object) = Envelope::from_bytes(bytes)?.entity_object()?;
        self.hydrate(&class_name, &JsonValue::Object(object))
    }

    /// Writes a clean saved node to `store` under `key`.
    ///
    /// # Errors
    ///
    /// Fails for dirty nodes, invalid keys or I/O errors.
    pub fn save_to_store(&self, store: &dyn BlobStore, key: &str, node: &SharedEntity) -> CoreResult<()> {
        let bytes = self.externalize(node)?;
        store.write_bytes(key, &bytes)?;
        Ok(())
    }

    /// Loads a node from `store`; `None` if `key` is absent.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors or unreadable blobs.
    pub fn load_from_store(&self, store: &dyn BlobStore, key: &str) -> CoreResult<Option<SharedEntity>> {
        match store.read_bytes(key)? {
            Some(bytes) => self.internalize(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Writes a standalone value to `store`.
    ///
    /// # Errors
    ///
    /// Fails for unencodable values, invalid keys or I/O errors.
    pub fn save_json_to_store(&self, store: &dyn BlobStore, key: &str, value: &Value) -> CoreResult<()> {
        let bytes = persist::externalize_json(value, self.resolver.as_ref())?;
        store.write_bytes(key, &bytes)?;
        Ok(())
    }

    /// Loads a standalone value from `store`; `None` if `key` is absent.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors or unreadable blobs.
    pub fn load_json_from_store(&self, store: &dyn BlobStore, key: &str) -> CoreResult<Option<Value>> {
        match store.read_bytes(key)? {
            Some(bytes) => persist::internalize_json(&bytes, &self.context()).map(Some),
            None => Ok(None),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

struct ArenaContext<'a> {
    session: &'a Session,
}

impl DecodeContext for ArenaContext<'_> {
    fn pointer(&self, class_name: &str, target: ObjectRef) -> CodecResult<Pointer> {
        match target {
            ObjectRef::Server(object_id) => {
                self.session.stub(class_name, &object_id);
                Ok(Pointer::saved(class_name, object_id))
            }
            ObjectRef::Local(local_id) => match self.session.resolver.local_id_state(&local_id) {
                LocalIdState::Pending => Ok(Pointer::local(class_name, local_id)),
                LocalIdState::Promoted(object_id) => Ok(Pointer::saved(class_name, object_id)),
                LocalIdState::Unknown => Err(CodecError::dangling_local_id(local_id.as_str())),
            },
        }
    }

    fn embedded_object(&self, object: EmbeddedObject) -> CodecResult<Pointer> {
        let node = self.session.stub(&object.class_name, &object.object_id);
        let payload = ServerPayload {
            object_id: Some(object.object_id.clone()),
            created_at: object.created_at,
            updated_at: object.updated_at,
            fields: object.fields,
        };
        node.write().apply_server_data(payload).map_err(|e| match e {
            CoreError::Codec(e) => e,
            other => CodecError::invalid_structure(other.to_string()),
        })?;
        Ok(Pointer::saved(object.class_name, object.object_id))
    }
}
