//! Entity graph nodes.
//!
//! An [`Entity`] mirrors one remote document. It keeps three layers:
//! the persisted fields last confirmed by the server, snapshots of
//! operations currently being saved, and operations recorded since the
//! last flush. Getters see all three layers applied in that order.

use crate::error::{CoreError, CoreResult};
use crate::id::EntityId;
use crate::operations::OperationSet;
use crate::resolver::IdentityResolver;
use chrono::{DateTime, Utc};
use entigraph_codec::{
    encode_operation, format_date, keys, timestamp, CodecError, DecodeContext, FileRef, GeoPoint,
    LocalId, Number, ObjectRef, Operation, Pointer, PointerStrategy, Relation, Value, WireDecoder,
    WireEncoder,
};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Identity {
    Local(LocalId),
    Saved { object_id: String },
}

/// Operations snapshotted for one save request.
#[derive(Debug, Clone, PartialEq)]
pub struct Flush {
    id: u64,
    operations: BTreeMap<String, Operation>,
}

impl Flush {
    /// The snapshotted operations, keyed by field.
    pub fn operations(&self) -> &BTreeMap<String, Operation> {
        &self.operations
    }

    /// True if the snapshot carries no operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Encodes the snapshot as a save request body.
    ///
    /// # Errors
    ///
    /// Fails if an operation cannot be encoded under `strategy`.
    pub fn encode(&self, strategy: &dyn PointerStrategy) -> CoreResult<JsonValue> {
        encode_operations(self.operations.iter(), strategy)
    }
}

fn encode_operations<'a>(
    ops: impl Iterator<Item = (&'a String, &'a Operation)>,
    strategy: &dyn PointerStrategy,
) -> CoreResult<JsonValue> {
    let mut body = JsonMap::new();
    for (key, op) in ops {
        body.insert(key.clone(), encode_operation(op, strategy)?);
    }
    Ok(JsonValue::Object(body))
}

/// Server-side state returned by a save or fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerPayload {
    /// Identifier, if the response carries one.
    pub object_id: Option<String>,
    /// Creation timestamp.
    pub created_at: Option<DateTime<Utc>>,
    /// Update timestamp.
    pub updated_at: Option<DateTime<Utc>>,
    /// Field values computed or echoed by the server.
    pub fields: BTreeMap<String, Value>,
}

impl ServerPayload {
    /// An empty payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the creation timestamp.
    #[must_use]
    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Sets the update timestamp.
    #[must_use]
    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    /// Adds a field value.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Decodes a response body.
    ///
    /// # Errors
    ///
    /// Fails on malformed timestamps or field values.
    pub fn decode(map: &JsonMap<String, JsonValue>, ctx: &dyn DecodeContext) -> CoreResult<Self> {
        Ok(Self {
            object_id: map
                .get(keys::OBJECT_ID)
                .and_then(JsonValue::as_str)
                .map(str::to_string),
            created_at: timestamp(map, keys::CREATED_AT)?,
            updated_at: timestamp(map, keys::UPDATED_AT)?,
            fields: WireDecoder::new(ctx).decode_fields(map)?,
        })
    }

    fn stamp(&self) -> Option<DateTime<Utc>> {
        self.updated_at.or(self.created_at)
    }
}

/// An in-memory mutable record mirroring a remote document.
#[derive(Debug, Clone)]
pub struct Entity {
    id: EntityId,
    class_name: String,
    identity: Identity,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    data: BTreeMap<String, Value>,
    data_available: bool,
    pending: OperationSet,
    in_flight: Vec<Flush>,
    field_stamps: HashMap<String, DateTime<Utc>>,
    flush_counter: u64,
}

impl Entity {
    fn with_identity(class_name: impl Into<String>, identity: Identity, data_available: bool) -> Self {
        Self {
            id: EntityId::new(),
            class_name: class_name.into(),
            identity,
            created_at: None,
            updated_at: None,
            data: BTreeMap::new(),
            data_available,
            pending: OperationSet::new(),
            in_flight: Vec::new(),
            field_stamps: HashMap::new(),
            flush_counter: 0,
        }
    }

    /// A new unsaved entity known by `local_id`.
    pub fn new(class_name: impl Into<String>, local_id: LocalId) -> Self {
        Self::with_identity(class_name, Identity::Local(local_id), true)
    }

    /// A stub for a saved entity: identifier only, no field data.
    pub fn stub(class_name: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self::with_identity(
            class_name,
            Identity::Saved {
                object_id: object_id.into(),
            },
            false,
        )
    }

    /// Arena handle.
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Class name.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Server identifier, once saved.
    pub fn object_id(&self) -> Option<&str> {
        match &self.identity {
            Identity::Local(_) => None,
            Identity::Saved { object_id, .. } => Some(object_id),
        }
    }

    /// Local identifier, until the first successful save.
    pub fn local_id(&self) -> Option<&LocalId> {
        match &self.identity {
            Identity::Local(local_id) => Some(local_id),
            Identity::Saved { .. } => None,
        }
    }

    /// Server creation timestamp.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// Server update timestamp.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// A pointer to this entity, by server identifier once it has one.
    pub fn pointer(&self) -> Pointer {
        match &self.identity {
            Identity::Local(local_id) => Pointer::local(&self.class_name, local_id.clone()),
            Identity::Saved { object_id, .. } => Pointer::saved(&self.class_name, object_id.clone()),
        }
    }

    /// REST path of this entity's class.
    pub fn endpoint(&self) -> String {
        match self.class_name.as_str() {
            "_User" => "users".to_string(),
            "_Role" => "roles".to_string(),
            "_Session" => "sessions".to_string(),
            "_Installation" => "installations".to_string(),
            other => format!("classes/{other}"),
        }
    }

    /// REST path of this entity, once saved.
    pub fn object_endpoint(&self) -> Option<String> {
        self.object_id()
            .map(|object_id| format!("{}/{object_id}", self.endpoint()))
    }

    /// True if both refer to the same remote document.
    ///
    /// An unsaved entity only matches another unsaved entity with the same
    /// local identifier; use [`IdentityResolver::same_document`] to also
    /// match a promoted local identifier against a server identifier.
    ///
    /// [`IdentityResolver::same_document`]: crate::IdentityResolver::same_document
    pub fn has_same_id(&self, other: &Entity) -> bool {
        if self.id == other.id {
            return true;
        }
        if self.class_name != other.class_name {
            return false;
        }
        match (self.object_id(), other.object_id()) {
            (Some(a), Some(b)) => a == b,
            _ => matches!((self.local_id(), other.local_id()), (Some(a), Some(b)) if a == b),
        }
    }

    /// True once field data has been loaded from the server, and always
    /// for entities created locally.
    pub fn is_data_available(&self) -> bool {
        self.data_available
    }

    /// True if the entity is unsaved or has pending operations.
    pub fn is_dirty(&self) -> bool {
        matches!(self.identity, Identity::Local(_)) || !self.pending.is_empty()
    }

    /// True if `key` has a pending operation.
    pub fn is_dirty_field(&self, key: &str) -> bool {
        self.pending.contains(key)
    }

    /// True while a flushed snapshot awaits its save response.
    pub fn has_save_in_flight(&self) -> bool {
        !self.in_flight.is_empty()
    }

    /// Pending operations recorded since the last flush.
    pub fn operations(&self) -> &OperationSet {
        &self.pending
    }

    /// Persisted fields as last confirmed by the server.
    pub fn persisted(&self) -> &BTreeMap<String, Value> {
        &self.data
    }

    /// Effective value of `key`: the persisted value with in-flight and
    /// pending operations applied.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut value = self.data.get(key).cloned();
        let ops = self
            .in_flight
            .iter()
            .filter_map(|flush| flush.operations.get(key))
            .chain(self.pending.get(key));
        for op in ops {
            match op.apply(value.as_ref()) {
                Ok(next) => value = next,
                Err(e) => warn!(class_name = %self.class_name, key, error = %e, "pending operation no longer applies"),
            }
        }
        value
    }

    /// True if `key` has a non-null effective value.
    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| !v.is_null())
    }

    /// Keys with an effective value, in order.
    pub fn keys(&self) -> Vec<String> {
        let mut candidates: BTreeSet<&String> = self.data.keys().collect();
        candidates.extend(self.pending.iter().map(|(k, _)| k));
        for flush in &self.in_flight {
            candidates.extend(flush.operations.keys());
        }
        candidates
            .into_iter()
            .filter(|k| self.get(k).is_some())
            .cloned()
            .collect()
    }

    fn typed<R>(&self, key: &str, expected: &str, extract: impl FnOnce(&Value) -> Option<R>) -> Option<R> {
        let value = self.get(key)?;
        if value.is_null() {
            return None;
        }
        let out = extract(&value);
        if out.is_none() {
            debug!(
                class_name = %self.class_name,
                key,
                expected,
                found = value.type_name(),
                "field has a different type"
            );
        }
        out
    }

    /// Integer value of `key`; floats are truncated.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.typed(key, "number", Value::as_i64)
    }

    /// Float value of `key`; integers are widened.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.typed(key, "number", Value::as_f64)
    }

    /// Number value of `key`.
    pub fn get_number(&self, key: &str) -> Option<Number> {
        self.typed(key, "number", Value::as_number)
    }

    /// String value of `key`.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.typed(key, "string", |v| v.as_str().map(str::to_string))
    }

    /// Boolean value of `key`.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.typed(key, "boolean", Value::as_bool)
    }

    /// Date value of `key`.
    pub fn get_date(&self, key: &str) -> Option<DateTime<Utc>> {
        self.typed(key, "date", Value::as_date)
    }

    /// Byte value of `key`.
    pub fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.typed(key, "bytes", |v| v.as_bytes().map(<[u8]>::to_vec))
    }

    /// Array value of `key`.
    pub fn get_list(&self, key: &str) -> Option<Vec<Value>> {
        self.typed(key, "array", |v| v.as_array().map(<[Value]>::to_vec))
    }

    /// Map value of `key`.
    pub fn get_map(&self, key: &str) -> Option<BTreeMap<String, Value>> {
        self.typed(key, "map", |v| v.as_map().cloned())
    }

    /// Geo-point value of `key`.
    pub fn get_geo_point(&self, key: &str) -> Option<GeoPoint> {
        self.typed(key, "geo-point", Value::as_geo_point)
    }

    /// File value of `key`.
    pub fn get_file(&self, key: &str) -> Option<FileRef> {
        self.typed(key, "file", |v| v.as_file().cloned())
    }

    /// Pointer value of `key`.
    pub fn get_pointer(&self, key: &str) -> Option<Pointer> {
        self.typed(key, "pointer", |v| v.as_pointer().cloned())
    }

    /// Relation value of `key`.
    pub fn get_relation(&self, key: &str) -> Option<Relation> {
        self.typed(key, "relation", |v| v.as_relation().cloned())
    }

    /// Records `op` on `key`.
    ///
    /// # Errors
    ///
    /// Fails for invalid or reserved keys, for operations that do not fit
    /// the field's current value, and for illegal compositions with the
    /// pending operation. The entity is unchanged on failure.
    pub fn perform(&mut self, key: &str, op: Operation) -> CoreResult<()> {
        validate_key(key)?;
        if let Operation::Set(value) = &op {
            reject_nested_operations(value)?;
        }
        let current = self.get(key);
        op.apply(current.as_ref())?;
        self.pending.apply(key, op)?;
        Ok(())
    }

    /// Sets `key` to `value`. An operation value is performed instead.
    ///
    /// # Errors
    ///
    /// See [`Entity::perform`].
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> CoreResult<()> {
        match value.into() {
            Value::Operation(op) => self.perform(key, *op),
            value => self.perform(key, Operation::Set(value)),
        }
    }

    /// Removes `key`.
    ///
    /// Saved entities record a `Delete`; an entity that was never saved
    /// just forgets the field.
    ///
    /// # Errors
    ///
    /// See [`Entity::perform`].
    pub fn remove(&mut self, key: &str) -> CoreResult<()> {
        if self.object_id().is_some() || !self.in_flight.is_empty() {
            return self.perform(key, Operation::Delete);
        }
        validate_key(key)?;
        self.pending.remove(key);
        self.data.remove(key);
        Ok(())
    }

    /// Adds `amount` to a numeric field.
    ///
    /// # Errors
    ///
    /// See [`Entity::perform`].
    pub fn increment(&mut self, key: &str, amount: impl Into<Number>) -> CoreResult<()> {
        self.perform(key, Operation::Increment(amount.into()))
    }

    /// Appends `item` to an array field.
    ///
    /// # Errors
    ///
    /// See [`Entity::perform`].
    pub fn add(&mut self, key: &str, item: impl Into<Value>) -> CoreResult<()> {
        self.perform(key, Operation::AddToList(vec![item.into()]))
    }

    /// Appends `items` to an array field.
    ///
    /// # Errors
    ///
    /// See [`Entity::perform`].
    pub fn add_all(&mut self, key: &str, items: Vec<Value>) -> CoreResult<()> {
        self.perform(key, Operation::AddToList(items))
    }

    /// Appends the `items` not already present.
    ///
    /// # Errors
    ///
    /// See [`Entity::perform`].
    pub fn add_unique(&mut self, key: &str, items: Vec<Value>) -> CoreResult<()> {
        self.perform(key, Operation::AddUnique(items))
    }

    /// Removes every occurrence of `items` from an array field.
    ///
    /// # Errors
    ///
    /// See [`Entity::perform`].
    pub fn remove_all(&mut self, key: &str, items: Vec<Value>) -> CoreResult<()> {
        self.perform(key, Operation::RemoveFromList(items))
    }

    /// Adds members to a relation field.
    ///
    /// # Errors
    ///
    /// See [`Entity::perform`].
    pub fn add_relation(&mut self, key: &str, members: Vec<Pointer>) -> CoreResult<()> {
        self.perform(key, Operation::add_relation(members)?)
    }

    /// Removes members from a relation field.
    ///
    /// # Errors
    ///
    /// See [`Entity::perform`].
    pub fn remove_relation(&mut self, key: &str, members: Vec<Pointer>) -> CoreResult<()> {
        self.perform(key, Operation::remove_relation(members)?)
    }

    /// Drops every pending operation.
    pub fn revert(&mut self) {
        self.pending.clear();
    }

    /// Drops the pending operation on `key`.
    pub fn revert_field(&mut self, key: &str) {
        self.pending.remove(key);
    }

    /// Encodes the pending operations as a save request body without
    /// flushing them.
    ///
    /// # Errors
    ///
    /// Fails if an operation cannot be encoded under `strategy`.
    pub fn save_payload(&self, strategy: &dyn PointerStrategy) -> CoreResult<JsonValue> {
        encode_operations(self.pending.iter(), strategy)
    }

    /// Snapshots and clears the pending operations for a save request.
    ///
    /// Each call yields a disjoint snapshot; operations recorded while
    /// the save is in flight go into the next one.
    pub fn flush(&mut self) -> Flush {
        self.flush_counter += 1;
        let flush = Flush {
            id: self.flush_counter,
            operations: self.pending.flushed(),
        };
        self.in_flight.push(flush.clone());
        flush
    }

    /// Like [`Entity::flush`], but operations referencing any of `deferred`
    /// stay pending for a later save.
    pub fn flush_deferring(&mut self, deferred: &BTreeSet<LocalId>) -> Flush {
        self.flush_counter += 1;
        let flush = Flush {
            id: self.flush_counter,
            operations: self.pending.flushed_except(|op| {
                let mut refs = BTreeSet::new();
                collect_operation(op, &mut refs);
                !refs.is_disjoint(deferred)
            }),
        };
        self.in_flight.push(flush.clone());
        flush
    }

    /// Local identifiers referenced by pending operations.
    pub fn local_references(&self) -> BTreeSet<LocalId> {
        let mut refs = BTreeSet::new();
        for (_, op) in self.pending.iter() {
            collect_operation(op, &mut refs);
        }
        refs
    }

    /// Returns a failed snapshot's operations to the pending set, beneath
    /// anything recorded since.
    pub fn abort_flush(&mut self, flush: &Flush) {
        if !self.take_in_flight(flush) {
            warn!(class_name = %self.class_name, "aborting a flush that is not in flight");
            return;
        }
        for (key, op) in &flush.operations {
            self.pending.restore_beneath(key, op.clone());
        }
    }

    fn take_in_flight(&mut self, flush: &Flush) -> bool {
        match self.in_flight.iter().position(|f| f.id == flush.id) {
            Some(pos) => {
                self.in_flight.remove(pos);
                true
            }
            None => false,
        }
    }

    fn is_stale(&self, key: &str, at: Option<DateTime<Utc>>) -> bool {
        matches!((at, self.field_stamps.get(key)), (Some(at), Some(seen)) if at < *seen)
    }

    /// Completes a save cycle for `flush`.
    ///
    /// The flushed operations are applied to the persisted fields, then
    /// server-returned fields are merged on top. When saves overlap, a
    /// response older than one already merged does not overwrite fields
    /// that response set. A flushed operation that no longer fits the
    /// current value, such as an older increment landing on a field a
    /// newer response made a string, is skipped. Returns the retired local
    /// identifier if this was the entity's first save.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ServerIdMismatch`] if `server_id` or the
    /// payload names a different document than this entity.
    pub fn mark_saved(
        &mut self,
        flush: &Flush,
        server_id: &str,
        payload: ServerPayload,
    ) -> CoreResult<Option<LocalId>> {
        let retired = match &self.identity {
            Identity::Local(local_id) => Some(local_id.clone()),
            Identity::Saved { object_id, .. } if object_id != server_id => {
                return Err(CoreError::ServerIdMismatch {
                    expected: object_id.clone(),
                    found: server_id.to_string(),
                })
            }
            Identity::Saved { .. } => None,
        };
        if let Some(found) = payload.object_id.as_deref().filter(|id| *id != server_id) {
            return Err(CoreError::ServerIdMismatch {
                expected: server_id.to_string(),
                found: found.to_string(),
            });
        }
        if !self.take_in_flight(flush) {
            warn!(class_name = %self.class_name, server_id, "completing a flush that is not in flight");
        }

        let stamp = payload.stamp();
        let mut touched = Vec::new();
        for (key, op) in &flush.operations {
            if payload.fields.contains_key(key) {
                continue;
            }
            if self.is_stale(key, stamp) && matches!(op, Operation::Set(_) | Operation::Delete) {
                debug!(key, "newer response already merged, dropping stale write");
                continue;
            }
            match op.apply(self.data.get(key)) {
                Ok(Some(value)) => {
                    self.data.insert(key.clone(), value);
                }
                Ok(None) => {
                    self.data.remove(key);
                }
                Err(error) => {
                    warn!(key, %error, "flushed operation no longer applies, keeping current value");
                    continue;
                }
            }
            touched.push(key.clone());
        }
        touched.extend(self.merge_fields(payload.fields, stamp));
        if let Some(stamp) = stamp {
            for key in touched {
                self.field_stamps.insert(key, stamp);
            }
        }
        self.merge_timestamps(payload.created_at, payload.updated_at);

        if retired.is_some() {
            self.identity = Identity::Saved {
                object_id: server_id.to_string(),
            };
        }
        self.data_available = true;
        Ok(retired)
    }

    /// Merges server state from a fetch or an embedded object.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ServerIdMismatch`] if the payload names a
    /// different document.
    pub fn apply_server_data(&mut self, payload: ServerPayload) -> CoreResult<()> {
        if let Some(server_id) = &payload.object_id {
            match &self.identity {
                Identity::Saved { object_id, .. } if object_id != server_id => {
                    return Err(CoreError::ServerIdMismatch {
                        expected: object_id.clone(),
                        found: server_id.clone(),
                    })
                }
                Identity::Saved { .. } => {}
                Identity::Local(_) => {
                    self.identity = Identity::Saved {
                        object_id: server_id.clone(),
                    };
                }
            }
        }
        let stamp = payload.stamp();
        let touched = self.merge_fields(payload.fields, stamp);
        if let Some(stamp) = stamp {
            for key in touched {
                self.field_stamps.insert(key, stamp);
            }
        }
        self.merge_timestamps(payload.created_at, payload.updated_at);
        self.data_available = true;
        Ok(())
    }

    fn merge_fields(&mut self, fields: BTreeMap<String, Value>, stamp: Option<DateTime<Utc>>) -> Vec<String> {
        let mut touched = Vec::new();
        for (key, value) in fields {
            if keys::is_reserved(&key) || self.is_stale(&key, stamp) {
                continue;
            }
            self.data.insert(key.clone(), value);
            touched.push(key);
        }
        touched
    }

    fn merge_timestamps(&mut self, created_at: Option<DateTime<Utc>>, updated_at: Option<DateTime<Utc>>) {
        if self.created_at.is_none() {
            self.created_at = created_at;
        }
        if let Some(at) = updated_at.or(created_at) {
            if self.updated_at.map_or(true, |current| at >= current) {
                self.updated_at = Some(at);
            }
        }
    }

    /// Rewrites references to `local_id` into references to `object_id`
    /// across persisted fields and pending or in-flight operations.
    /// Returns how many references changed.
    pub fn rewrite_local_id(&mut self, local_id: &LocalId, object_id: &str) -> usize {
        let mut count = 0;
        for value in self.data.values_mut() {
            count += rewrite_value(value, local_id, object_id);
        }
        for (_, op) in self.pending.iter_mut() {
            count += rewrite_operation(op, local_id, object_id);
        }
        for flush in &mut self.in_flight {
            for op in flush.operations.values_mut() {
                count += rewrite_operation(op, local_id, object_id);
            }
        }
        count
    }

    /// Encodes the persisted state in the `Object` wire shape.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingObjectId`] for unsaved entities, or a
    /// codec error if a field cannot be encoded under `strategy`.
    pub fn to_wire(&self, strategy: &dyn PointerStrategy) -> CoreResult<JsonValue> {
        let object_id = self
            .object_id()
            .ok_or_else(|| CoreError::missing_object_id(&self.class_name))?;
        let mut map = JsonMap::new();
        map.insert(keys::TYPE.into(), JsonValue::from("Object"));
        map.insert(keys::CLASS_NAME.into(), JsonValue::from(self.class_name.as_str()));
        map.insert(keys::OBJECT_ID.into(), JsonValue::from(object_id));
        if let Some(at) = &self.created_at {
            map.insert(keys::CREATED_AT.into(), JsonValue::from(format_date(at)));
        }
        if let Some(at) = &self.updated_at {
            map.insert(keys::UPDATED_AT.into(), JsonValue::from(format_date(at)));
        }
        let encoder = WireEncoder::new(strategy);
        for (key, value) in &self.data {
            map.insert(key.clone(), encoder.encode(value)?);
        }
        Ok(JsonValue::Object(map))
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identity {
            Identity::Local(local_id) => write!(f, "{}[{local_id}]", self.class_name),
            Identity::Saved { object_id, .. } => write!(f, "{}[{object_id}]", self.class_name),
        }
    }
}

fn validate_key(key: &str) -> CoreResult<()> {
    if key.is_empty() || key == keys::TYPE || key == keys::OP || key == keys::CLASS_NAME {
        return Err(CoreError::InvalidKey {
            key: key.to_string(),
        });
    }
    if keys::is_reserved(key) {
        return Err(CoreError::ReservedKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

fn reject_nested_operations(value: &Value) -> CoreResult<()> {
    match value {
        Value::Operation(op) => Err(CodecError::unsupported_type(format!(
            "{} operation nested inside a value",
            op.wire_name()
        ))
        .into()),
        Value::Array(items) => items.iter().try_for_each(reject_nested_operations),
        Value::Map(map) => map.values().try_for_each(reject_nested_operations),
        _ => Ok(()),
    }
}

fn rewrite_pointer(pointer: &mut Pointer, local_id: &LocalId, object_id: &str) -> usize {
    if pointer.local_id() == Some(local_id) {
        pointer.target = ObjectRef::Server(object_id.to_string());
        1
    } else {
        0
    }
}

fn rewrite_pointers(pointers: &mut [Pointer], local_id: &LocalId, object_id: &str) -> usize {
    pointers
        .iter_mut()
        .map(|p| rewrite_pointer(p, local_id, object_id))
        .sum()
}

fn rewrite_value(value: &mut Value, local_id: &LocalId, object_id: &str) -> usize {
    match value {
        Value::Pointer(pointer) => rewrite_pointer(pointer, local_id, object_id),
        Value::Relation(relation) => rewrite_pointers(&mut relation.objects, local_id, object_id),
        Value::Array(items) => items
            .iter_mut()
            .map(|v| rewrite_value(v, local_id, object_id))
            .sum(),
        Value::Map(map) => map
            .values_mut()
            .map(|v| rewrite_value(v, local_id, object_id))
            .sum(),
        Value::Operation(op) => rewrite_operation(op, local_id, object_id),
        _ => 0,
    }
}

fn rewrite_operation(op: &mut Operation, local_id: &LocalId, object_id: &str) -> usize {
    match op {
        Operation::Set(value) => rewrite_value(value, local_id, object_id),
        Operation::AddToList(items) | Operation::AddUnique(items) | Operation::RemoveFromList(items) => items
            .iter_mut()
            .map(|v| rewrite_value(v, local_id, object_id))
            .sum(),
        Operation::AddRelation(members) | Operation::RemoveRelation(members) => {
            rewrite_pointers(members, local_id, object_id)
        }
        Operation::RelationBatch { added, removed } => {
            rewrite_pointers(added, local_id, object_id) + rewrite_pointers(removed, local_id, object_id)
        }
        Operation::Delete | Operation::Increment(_) => 0,
    }
}

fn collect_pointers<'a>(pointers: impl IntoIterator<Item = &'a Pointer>, out: &mut BTreeSet<LocalId>) {
    out.extend(pointers.into_iter().filter_map(|p| p.local_id().cloned()));
}

fn collect_value(value: &Value, out: &mut BTreeSet<LocalId>) {
    match value {
        Value::Pointer(pointer) => collect_pointers([pointer], out),
        Value::Relation(relation) => collect_pointers(&relation.objects, out),
        Value::Array(items) => items.iter().for_each(|v| collect_value(v, out)),
        Value::Map(map) => map.values().for_each(|v| collect_value(v, out)),
        Value::Operation(op) => collect_operation(op, out),
        _ => {}
    }
}

fn collect_operation(op: &Operation, out: &mut BTreeSet<LocalId>) {
    match op {
        Operation::Set(value) => collect_value(value, out),
        Operation::AddToList(items) | Operation::AddUnique(items) | Operation::RemoveFromList(items) => {
            items.iter().for_each(|v| collect_value(v, out))
        }
        Operation::AddRelation(members) | Operation::RemoveRelation(members) => collect_pointers(members, out),
        Operation::RelationBatch { added, removed } => {
            collect_pointers(added.iter().chain(removed), out)
        }
        Operation::Delete | Operation::Increment(_) => {}
    }
}

/// A node shared between a session arena, the identity resolver and
/// callers.
#[derive(Clone)]
pub struct SharedEntity {
    id: EntityId,
    inner: Arc<RwLock<Entity>>,
}

impl SharedEntity {
    /// Wraps `entity`.
    pub fn new(entity: Entity) -> Self {
        Self {
            id: entity.id(),
            inner: Arc::new(RwLock::new(entity)),
        }
    }

    /// Arena handle.
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Locks the entity for reading.
    pub fn read(&self) -> RwLockReadGuard<'_, Entity> {
        self.inner.read()
    }

    /// Locks the entity for writing.
    ///
    /// Do not hold the guard across calls into the identity resolver or
    /// a session; both may lock other nodes.
    pub fn write(&self) -> RwLockWriteGuard<'_, Entity> {
        self.inner.write()
    }

    /// True if both handles share one node.
    pub fn ptr_eq(&self, other: &SharedEntity) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Pointer to the node.
    pub fn pointer(&self) -> Pointer {
        self.read().pointer()
    }

    /// Completes a save cycle and, on a first save, promotes the local
    /// identifier through `resolver`.
    ///
    /// # Errors
    ///
    /// See [`Entity::mark_saved`].
    pub fn mark_saved(
        &self,
        flush: &Flush,
        server_id: &str,
        payload: ServerPayload,
        resolver: &IdentityResolver,
    ) -> CoreResult<()> {
        let retired = self.write().mark_saved(flush, server_id, payload)?;
        if let Some(local_id) = retired {
            resolver.promote(&local_id, server_id);
        }
        Ok(())
    }
}

impl fmt::Debug for SharedEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedEntity").field(&self.id).finish()
    }
}
