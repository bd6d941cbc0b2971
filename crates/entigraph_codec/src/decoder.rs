//! Wire JSON decoder.
//!
//! Typed shapes are recognized by their `__type` discriminator and pending
//! operations by `__op`. A bare `type`/`op` key is accepted as a legacy
//! alias when it names a known discriminator and the rest of the shape
//! parses; otherwise the object is kept as a plain map.

use crate::date::parse_date;
use crate::error::{CodecError, CodecResult};
use crate::file::FileRef;
use crate::geo::GeoPoint;
use crate::keys;
use crate::operation::Operation;
use crate::reference::{LocalId, ObjectRef, Pointer, Relation};
use crate::value::{Number, Value};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::BTreeMap;
use tracing::debug;

/// Maximum nesting depth accepted by the decoder.
pub const MAX_DEPTH: usize = 64;

/// A fully embedded object found in a wire payload.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedObject {
    /// Class name.
    pub class_name: String,
    /// Server identifier.
    pub object_id: String,
    /// Server creation timestamp.
    pub created_at: Option<DateTime<Utc>>,
    /// Server update timestamp.
    pub updated_at: Option<DateTime<Utc>>,
    /// Persisted fields, already decoded.
    pub fields: BTreeMap<String, Value>,
}

/// Hooks the decoder calls for entity-shaped wire values.
///
/// A session implements this to build stubs and hydrate nodes in its
/// arena; [`PlainContext`] keeps references as they appear on the wire.
pub trait DecodeContext {
    /// Resolves a `Pointer` shape.
    ///
    /// # Errors
    ///
    /// Implementations fail when the reference cannot be mapped, e.g. a
    /// local identifier nobody issued.
    fn pointer(&self, class_name: &str, target: ObjectRef) -> CodecResult<Pointer>;

    /// Absorbs an `Object` shape and returns the pointer that stands in
    /// for it.
    ///
    /// # Errors
    ///
    /// Implementations fail when the object cannot be hydrated.
    fn embedded_object(&self, object: EmbeddedObject) -> CodecResult<Pointer>;
}

/// Decode context without an entity arena.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainContext;

impl DecodeContext for PlainContext {
    fn pointer(&self, class_name: &str, target: ObjectRef) -> CodecResult<Pointer> {
        Ok(Pointer::new(class_name, target))
    }

    fn embedded_object(&self, object: EmbeddedObject) -> CodecResult<Pointer> {
        debug!(
            class_name = %object.class_name,
            object_id = %object.object_id,
            fields = object.fields.len(),
            "no entity arena, embedded object kept as pointer"
        );
        Ok(Pointer::saved(object.class_name, object.object_id))
    }
}

/// Decode wire JSON into a value.
///
/// # Errors
///
/// Returns an error for malformed typed shapes, unknown `__op` names and
/// payloads nested deeper than [`MAX_DEPTH`].
pub fn decode(json: &JsonValue, ctx: &dyn DecodeContext) -> CodecResult<Value> {
    WireDecoder::new(ctx).decode(json)
}

/// Decode the wire form of a field update into an operation.
///
/// Plain values become [`Operation::Set`].
///
/// # Errors
///
/// See [`decode`].
pub fn decode_operation(json: &JsonValue, ctx: &dyn DecodeContext) -> CodecResult<Operation> {
    match decode(json, ctx)? {
        Value::Operation(op) => Ok(*op),
        value => Ok(Operation::Set(value)),
    }
}

/// True if a wire object with these keys would not decode back as a
/// plain map.
pub(crate) fn shadows_typed_shape(map: &JsonMap<String, JsonValue>) -> bool {
    WireDecoder::new(&PlainContext).is_discriminated(map)
}

/// Decoder from wire JSON to [`Value`].
pub struct WireDecoder<'a> {
    ctx: &'a dyn DecodeContext,
}

impl<'a> WireDecoder<'a> {
    /// Create a decoder resolving entity shapes through `ctx`.
    pub fn new(ctx: &'a dyn DecodeContext) -> Self {
        Self { ctx }
    }

    /// Decode a value.
    pub fn decode(&self, json: &JsonValue) -> CodecResult<Value> {
        self.decode_at(json, 0)
    }

    /// Decode the persisted fields of an object payload, skipping the
    /// discriminator, class name, identifier and timestamps.
    pub fn decode_fields(&self, map: &JsonMap<String, JsonValue>) -> CodecResult<BTreeMap<String, Value>> {
        self.decode_fields_at(map, 0)
    }

    fn decode_at(&self, json: &JsonValue, depth: usize) -> CodecResult<Value> {
        if depth > MAX_DEPTH {
            return Err(CodecError::DepthExceeded { limit: MAX_DEPTH });
        }
        match json {
            JsonValue::Null => Ok(Value::Null),
            JsonValue::Bool(b) => Ok(Value::Bool(*b)),
            JsonValue::Number(n) => Ok(Value::Number(decode_number(n))),
            JsonValue::String(s) => Ok(Value::String(s.clone())),
            JsonValue::Array(items) => items
                .iter()
                .map(|item| self.decode_at(item, depth + 1))
                .collect::<CodecResult<Vec<_>>>()
                .map(Value::Array),
            JsonValue::Object(map) => self.decode_object(map, depth),
        }
    }

    fn decode_object(&self, map: &JsonMap<String, JsonValue>, depth: usize) -> CodecResult<Value> {
        if let Some(type_name) = map.get(keys::TYPE).and_then(JsonValue::as_str) {
            if keys::KNOWN_TYPES.contains(&type_name) {
                return self.decode_typed(type_name, map, depth);
            }
            debug!(type_name, "unknown type discriminator, decoding as map");
            return self.decode_map(map, depth);
        }
        if let Some(op) = map.get(keys::OP).and_then(JsonValue::as_str) {
            return self
                .decode_op(op, map, depth)
                .map(|op| Value::Operation(Box::new(op)));
        }

        if let Some(type_name) = map.get(keys::LEGACY_TYPE).and_then(JsonValue::as_str) {
            if keys::KNOWN_TYPES.contains(&type_name) {
                match self.decode_typed(type_name, map, depth) {
                    Err(CodecError::InvalidStructure { .. }) => {}
                    other => return other,
                }
            }
        } else if let Some(op) = map.get(keys::LEGACY_OP).and_then(JsonValue::as_str) {
            if keys::KNOWN_OPS.contains(&op) {
                match self.decode_op(op, map, depth) {
                    Err(CodecError::InvalidStructure { .. }) => {}
                    other => return other.map(|op| Value::Operation(Box::new(op))),
                }
            }
        }

        self.decode_map(map, depth)
    }

    /// True if `map` would decode as something other than a plain map.
    fn is_discriminated(&self, map: &JsonMap<String, JsonValue>) -> bool {
        if let Some(type_name) = map.get(keys::TYPE).and_then(JsonValue::as_str) {
            return keys::KNOWN_TYPES.contains(&type_name);
        }
        if map.get(keys::OP).is_some_and(JsonValue::is_string) {
            return true;
        }
        if let Some(type_name) = map.get(keys::LEGACY_TYPE).and_then(JsonValue::as_str) {
            keys::KNOWN_TYPES.contains(&type_name)
                && !matches!(
                    self.decode_typed(type_name, map, 0),
                    Err(CodecError::InvalidStructure { .. })
                )
        } else if let Some(op) = map.get(keys::LEGACY_OP).and_then(JsonValue::as_str) {
            keys::KNOWN_OPS.contains(&op)
                && !matches!(self.decode_op(op, map, 0), Err(CodecError::InvalidStructure { .. }))
        } else {
            false
        }
    }

    fn decode_map(&self, map: &JsonMap<String, JsonValue>, depth: usize) -> CodecResult<Value> {
        let mut out = BTreeMap::new();
        for (key, item) in map {
            out.insert(key.clone(), self.decode_at(item, depth + 1)?);
        }
        Ok(Value::Map(out))
    }

    fn decode_typed(
        &self,
        type_name: &str,
        map: &JsonMap<String, JsonValue>,
        depth: usize,
    ) -> CodecResult<Value> {
        match type_name {
            "Date" => parse_date(required_str(map, "iso", type_name)?).map(Value::Date),
            "Bytes" => base64::engine::general_purpose::STANDARD
                .decode(required_str(map, "base64", type_name)?)
                .map(Value::Bytes)
                .map_err(|e| CodecError::InvalidBase64 {
                    message: e.to_string(),
                }),
            "GeoPoint" => {
                let latitude = required_f64(map, "latitude", type_name)?;
                let longitude = required_f64(map, "longitude", type_name)?;
                GeoPoint::new(latitude, longitude).map(Value::GeoPoint)
            }
            "File" => {
                let name = required_str(map, "name", type_name)?;
                let url = map.get("url").and_then(JsonValue::as_str).map(str::to_string);
                Ok(Value::File(FileRef::uploaded(name, url)))
            }
            "Pointer" => self.decode_pointer(map).map(Value::Pointer),
            "Object" => self.decode_embedded(map, depth).map(Value::Pointer),
            "Relation" => {
                let target_class = map
                    .get(keys::CLASS_NAME)
                    .and_then(JsonValue::as_str)
                    .map(str::to_string);
                let objects = match map.get("objects") {
                    Some(objects) => self.decode_pointer_list(objects)?,
                    None => Vec::new(),
                };
                Ok(Value::Relation(Relation {
                    target_class,
                    objects,
                }))
            }
            other => Err(CodecError::invalid_structure(format!(
                "unknown type discriminator {other}"
            ))),
        }
    }

    fn decode_pointer(&self, map: &JsonMap<String, JsonValue>) -> CodecResult<Pointer> {
        let class_name = required_str(map, keys::CLASS_NAME, "Pointer")?;
        let target = if let Some(id) = map.get(keys::OBJECT_ID).and_then(JsonValue::as_str) {
            ObjectRef::Server(id.to_string())
        } else if let Some(raw) = map.get(keys::LOCAL_ID).and_then(JsonValue::as_str) {
            let local_id = LocalId::parse(raw).ok_or_else(|| {
                CodecError::invalid_structure(format!("malformed local identifier {raw}"))
            })?;
            ObjectRef::Local(local_id)
        } else {
            return Err(CodecError::invalid_structure(
                "Pointer needs either objectId or localId",
            ));
        };
        self.ctx.pointer(class_name, target)
    }

    fn decode_embedded(&self, map: &JsonMap<String, JsonValue>, depth: usize) -> CodecResult<Pointer> {
        let class_name = required_str(map, keys::CLASS_NAME, "Object")?.to_string();
        let object_id = required_str(map, keys::OBJECT_ID, "Object")?.to_string();
        let object = EmbeddedObject {
            class_name,
            object_id,
            created_at: timestamp(map, keys::CREATED_AT)?,
            updated_at: timestamp(map, keys::UPDATED_AT)?,
            fields: self.decode_fields_at(map, depth + 1)?,
        };
        self.ctx.embedded_object(object)
    }

    fn decode_fields_at(
        &self,
        map: &JsonMap<String, JsonValue>,
        depth: usize,
    ) -> CodecResult<BTreeMap<String, Value>> {
        let mut fields = BTreeMap::new();
        for (key, item) in map {
            if is_envelope_key(key) {
                continue;
            }
            fields.insert(key.clone(), self.decode_at(item, depth + 1)?);
        }
        Ok(fields)
    }

    fn decode_pointer_list(&self, json: &JsonValue) -> CodecResult<Vec<Pointer>> {
        let items = json
            .as_array()
            .ok_or_else(|| CodecError::invalid_structure("objects must be an array"))?;
        items
            .iter()
            .map(|item| match item {
                JsonValue::Object(map) => self.decode_pointer(map),
                _ => Err(CodecError::invalid_structure("relation members must be pointers")),
            })
            .collect()
    }

    fn decode_op(
        &self,
        op: &str,
        map: &JsonMap<String, JsonValue>,
        depth: usize,
    ) -> CodecResult<Operation> {
        match op {
            "Delete" => Ok(Operation::Delete),
            "Increment" => {
                match map.get("amount") {
                    Some(JsonValue::Number(amount)) => {
                        Ok(Operation::Increment(decode_number(amount)))
                    }
                    _ => Err(CodecError::invalid_structure("Increment needs an amount")),
                }
            }
            "Add" | "AddUnique" | "Remove" => {
                let items = map
                    .get("objects")
                    .and_then(JsonValue::as_array)
                    .ok_or_else(|| {
                        CodecError::invalid_structure(format!("{op} needs an objects array"))
                    })?
                    .iter()
                    .map(|item| self.decode_at(item, depth + 1))
                    .collect::<CodecResult<Vec<_>>>()?;
                Ok(match op {
                    "Add" => Operation::AddToList(items),
                    "AddUnique" => Operation::AddUnique(items),
                    _ => Operation::RemoveFromList(items),
                })
            }
            "AddRelation" | "RemoveRelation" => {
                let objects = map.get("objects").ok_or_else(|| {
                    CodecError::invalid_structure(format!("{op} needs an objects array"))
                })?;
                let pointers = self.decode_pointer_list(objects)?;
                if op == "AddRelation" {
                    Operation::add_relation(pointers)
                } else {
                    Operation::remove_relation(pointers)
                }
            }
            "Batch" => {
                let ops = map
                    .get("ops")
                    .and_then(JsonValue::as_array)
                    .ok_or_else(|| CodecError::invalid_structure("Batch needs an ops array"))?;
                let mut added = Vec::new();
                let mut removed = Vec::new();
                for nested in ops {
                    match self.decode_at(nested, depth + 1)? {
                        Value::Operation(op) => match *op {
                            Operation::AddRelation(p) => added.extend(p),
                            Operation::RemoveRelation(p) => removed.extend(p),
                            other => {
                                return Err(CodecError::invalid_structure(format!(
                                    "Batch may only carry relation operations, found {}",
                                    other.wire_name()
                                )))
                            }
                        },
                        _ => return Err(CodecError::invalid_structure("Batch entries must be operations")),
                    }
                }
                match (added.is_empty(), removed.is_empty()) {
                    (true, true) => Err(CodecError::invalid_structure("empty relation batch")),
                    (false, true) => Ok(Operation::AddRelation(added)),
                    (true, false) => Ok(Operation::RemoveRelation(removed)),
                    (false, false) => Ok(Operation::RelationBatch { added, removed }),
                }
            }
            other => Err(CodecError::UnknownOperation {
                op: other.to_string(),
            }),
        }
    }
}

fn is_envelope_key(key: &str) -> bool {
    matches!(
        key,
        keys::TYPE | keys::CLASS_NAME | keys::OBJECT_ID | keys::CREATED_AT | keys::UPDATED_AT
    )
}

fn decode_number(n: &serde_json::Number) -> Number {
    match n.as_i64() {
        Some(i) => Number::Int(i),
        None => Number::Float(n.as_f64().unwrap_or(f64::NAN)),
    }
}

fn required_str<'m>(
    map: &'m JsonMap<String, JsonValue>,
    key: &str,
    shape: &str,
) -> CodecResult<&'m str> {
    map.get(key)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| CodecError::invalid_structure(format!("{shape} needs a string {key}")))
}

fn required_f64(map: &JsonMap<String, JsonValue>, key: &str, shape: &str) -> CodecResult<f64> {
    map.get(key)
        .and_then(JsonValue::as_f64)
        .ok_or_else(|| CodecError::invalid_structure(format!("{shape} needs a numeric {key}")))
}

/// Reads a server timestamp, which arrives either as a bare ISO string or
/// as a `Date` shape.
pub fn timestamp(map: &JsonMap<String, JsonValue>, key: &str) -> CodecResult<Option<DateTime<Utc>>> {
    match map.get(key) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(s)) => parse_date(s).map(Some),
        Some(JsonValue::Object(shape)) => {
            parse_date(required_str(shape, "iso", "Date")?).map(Some)
        }
        Some(_) => Err(CodecError::invalid_structure(format!(
            "{key} must be a date"
        ))),
    }
}
