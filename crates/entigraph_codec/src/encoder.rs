//! Wire JSON encoder.

use crate::date::format_date;
use crate::decoder::shadows_typed_shape;
use crate::error::{CodecError, CodecResult};
use crate::keys;
use crate::operation::Operation;
use crate::reference::{LocalId, ObjectRef, Pointer};
use crate::value::{Number, Value};
use base64::Engine as _;
use serde_json::{json, Map as JsonMap, Value as JsonValue};

/// What a resolver knows about a local identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalIdState {
    /// The entity is registered and still awaiting its first save.
    Pending,
    /// The entity has been saved under this server identifier.
    Promoted(String),
    /// Nothing is known about the identifier.
    Unknown,
}

/// Lookup of local identifiers, implemented by the identity resolver.
pub trait LocalIdLookup {
    /// Returns the state of `local_id`.
    fn local_id_state(&self, local_id: &LocalId) -> LocalIdState;
}

/// A lookup that treats every local identifier as pending.
///
/// Suitable when no resolver is at hand, e.g. encoding standalone values.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnresolvedLocalIds;

impl LocalIdLookup for UnresolvedLocalIds {
    fn local_id_state(&self, _local_id: &LocalId) -> LocalIdState {
        LocalIdState::Pending
    }
}

/// Decides how references to other entities are written.
pub trait PointerStrategy {
    /// Encodes a reference to a related entity.
    ///
    /// # Errors
    ///
    /// Implementations fail when the reference cannot be written under
    /// their rules.
    fn encode_related_object(&self, pointer: &Pointer) -> CodecResult<JsonValue>;
}

/// Requires a server identifier for every referenced entity.
///
/// Used for single-object saves; referencing an unsaved entity fails with
/// [`CodecError::UnsavedReference`].
pub struct StrictPointers<'a> {
    lookup: &'a dyn LocalIdLookup,
}

impl<'a> StrictPointers<'a> {
    /// Creates a strict strategy resolving promoted local ids via `lookup`.
    pub fn new(lookup: &'a dyn LocalIdLookup) -> Self {
        Self { lookup }
    }
}

impl PointerStrategy for StrictPointers<'_> {
    fn encode_related_object(&self, pointer: &Pointer) -> CodecResult<JsonValue> {
        match &pointer.target {
            ObjectRef::Server(id) => Ok(pointer_json(&pointer.class_name, keys::OBJECT_ID, id)),
            ObjectRef::Local(local_id) => match self.lookup.local_id_state(local_id) {
                LocalIdState::Promoted(id) => {
                    Ok(pointer_json(&pointer.class_name, keys::OBJECT_ID, &id))
                }
                LocalIdState::Pending | LocalIdState::Unknown => {
                    Err(CodecError::unsaved_reference(&pointer.class_name))
                }
            },
        }
    }
}

/// Falls back to a `localId` placeholder for unsaved entities.
///
/// Used when caching values that reference entities not saved yet.
pub struct LenientPointers<'a> {
    lookup: &'a dyn LocalIdLookup,
}

impl<'a> LenientPointers<'a> {
    /// Creates a lenient strategy backed by `lookup`.
    pub fn new(lookup: &'a dyn LocalIdLookup) -> Self {
        Self { lookup }
    }
}

impl PointerStrategy for LenientPointers<'_> {
    fn encode_related_object(&self, pointer: &Pointer) -> CodecResult<JsonValue> {
        match &pointer.target {
            ObjectRef::Server(id) => Ok(pointer_json(&pointer.class_name, keys::OBJECT_ID, id)),
            ObjectRef::Local(local_id) => match self.lookup.local_id_state(local_id) {
                LocalIdState::Promoted(id) => {
                    Ok(pointer_json(&pointer.class_name, keys::OBJECT_ID, &id))
                }
                LocalIdState::Pending => Ok(pointer_json(
                    &pointer.class_name,
                    keys::LOCAL_ID,
                    local_id.as_str(),
                )),
                LocalIdState::Unknown => Err(CodecError::dangling_local_id(local_id.as_str())),
            },
        }
    }
}

fn pointer_json(class_name: &str, id_key: &str, id: &str) -> JsonValue {
    let mut map = JsonMap::new();
    map.insert(keys::TYPE.into(), JsonValue::from("Pointer"));
    map.insert(keys::CLASS_NAME.into(), JsonValue::from(class_name));
    map.insert(id_key.into(), JsonValue::from(id));
    JsonValue::Object(map)
}

/// Encode a value to wire JSON.
///
/// A top-level [`Value::Operation`] encodes to its `__op` shape; operations
/// nested inside arrays or maps are rejected.
///
/// # Errors
///
/// Returns [`CodecError::UnsupportedType`] for values the wire cannot carry
/// (non-finite numbers, nested operations), [`CodecError::UnsavedFile`] for
/// dirty files, and whatever `strategy` reports for entity references.
pub fn encode(value: &Value, strategy: &dyn PointerStrategy) -> CodecResult<JsonValue> {
    WireEncoder::new(strategy).encode(value)
}

/// Encode a field operation to wire JSON.
///
/// # Errors
///
/// See [`encode`].
pub fn encode_operation(op: &Operation, strategy: &dyn PointerStrategy) -> CodecResult<JsonValue> {
    WireEncoder::new(strategy).encode_operation(op)
}

/// Encoder from [`Value`] to wire JSON.
pub struct WireEncoder<'a> {
    strategy: &'a dyn PointerStrategy,
}

impl<'a> WireEncoder<'a> {
    /// Create an encoder writing references through `strategy`.
    pub fn new(strategy: &'a dyn PointerStrategy) -> Self {
        Self { strategy }
    }

    /// Encode a value.
    pub fn encode(&self, value: &Value) -> CodecResult<JsonValue> {
        match value {
            Value::Operation(op) => self.encode_operation(op),
            other => self.encode_nested(other),
        }
    }

    fn encode_nested(&self, value: &Value) -> CodecResult<JsonValue> {
        match value {
            Value::Null => Ok(JsonValue::Null),
            Value::Bool(b) => Ok(JsonValue::Bool(*b)),
            Value::Number(n) => encode_number(*n),
            Value::String(s) => Ok(JsonValue::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(|item| self.encode_nested(item))
                .collect::<CodecResult<Vec<_>>>()
                .map(JsonValue::Array),
            Value::Map(map) => {
                let mut out = JsonMap::new();
                for (key, item) in map {
                    out.insert(key.clone(), self.encode_nested(item)?);
                }
                if shadows_typed_shape(&out) {
                    return Err(CodecError::unsupported_type("map with discriminator keys"));
                }
                Ok(JsonValue::Object(out))
            }
            Value::Date(date) => Ok(json!({ "__type": "Date", "iso": format_date(date) })),
            Value::Bytes(bytes) => Ok(json!({
                "__type": "Bytes",
                "base64": base64::engine::general_purpose::STANDARD.encode(bytes),
            })),
            Value::GeoPoint(point) => Ok(json!({
                "__type": "GeoPoint",
                "latitude": point.latitude(),
                "longitude": point.longitude(),
            })),
            Value::File(file) => {
                if file.is_dirty() {
                    return Err(CodecError::UnsavedFile {
                        name: file.name().to_string(),
                    });
                }
                let mut out = JsonMap::new();
                out.insert(keys::TYPE.into(), JsonValue::from("File"));
                out.insert("name".into(), JsonValue::from(file.name()));
                if let Some(url) = file.url() {
                    out.insert("url".into(), JsonValue::from(url));
                }
                Ok(JsonValue::Object(out))
            }
            Value::Pointer(pointer) => self.strategy.encode_related_object(pointer),
            Value::Relation(relation) => {
                let mut out = JsonMap::new();
                out.insert(keys::TYPE.into(), JsonValue::from("Relation"));
                if let Some(class_name) = &relation.target_class {
                    out.insert(keys::CLASS_NAME.into(), JsonValue::from(class_name.as_str()));
                }
                if !relation.objects.is_empty() {
                    out.insert("objects".into(), self.encode_pointers(&relation.objects)?);
                }
                Ok(JsonValue::Object(out))
            }
            Value::Operation(op) => Err(CodecError::unsupported_type(format!(
                "{} operation nested inside a value",
                op.wire_name()
            ))),
        }
    }

    /// Encode a field operation.
    pub fn encode_operation(&self, op: &Operation) -> CodecResult<JsonValue> {
        let encoded = match op {
            Operation::Set(value) => return self.encode_nested(value),
            Operation::Delete => json!({ "__op": "Delete" }),
            Operation::Increment(amount) => {
                json!({ "__op": "Increment", "amount": encode_number(*amount)? })
            }
            Operation::AddToList(items)
            | Operation::AddUnique(items)
            | Operation::RemoveFromList(items) => {
                let objects = items
                    .iter()
                    .map(|item| self.encode_nested(item))
                    .collect::<CodecResult<Vec<_>>>()?;
                json!({ "__op": op.wire_name(), "objects": objects })
            }
            Operation::AddRelation(objects) | Operation::RemoveRelation(objects) => {
                json!({ "__op": op.wire_name(), "objects": self.encode_pointers(objects)? })
            }
            Operation::RelationBatch { added, removed } => json!({
                "__op": "Batch",
                "ops": [
                    { "__op": "AddRelation", "objects": self.encode_pointers(added)? },
                    { "__op": "RemoveRelation", "objects": self.encode_pointers(removed)? },
                ],
            }),
        };
        Ok(encoded)
    }

    fn encode_pointers(&self, pointers: &[Pointer]) -> CodecResult<JsonValue> {
        pointers
            .iter()
            .map(|p| self.strategy.encode_related_object(p))
            .collect::<CodecResult<Vec<_>>>()
            .map(JsonValue::Array)
    }
}

fn encode_number(n: Number) -> CodecResult<JsonValue> {
    match n {
        Number::Int(i) => Ok(JsonValue::from(i)),
        Number::Float(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .ok_or_else(|| CodecError::unsupported_type(format!("non-finite number {f}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileRef;
    use crate::geo::GeoPoint;
    use crate::reference::Relation;

    fn strict() -> StrictPointers<'static> {
        StrictPointers::new(&UnresolvedLocalIds)
    }

    #[test]
    fn encode_primitives() {
        let s = strict();
        assert_eq!(encode(&Value::Null, &s).unwrap(), json!(null));
        assert_eq!(encode(&Value::from(true), &s).unwrap(), json!(true));
        assert_eq!(encode(&Value::from(140i64), &s).unwrap(), json!(140));
        assert_eq!(encode(&Value::from(2.5), &s).unwrap(), json!(2.5));
        assert_eq!(encode(&Value::from("hi"), &s).unwrap(), json!("hi"));
    }

    #[test]
    fn encode_geo_point() {
        let value = Value::GeoPoint(GeoPoint::new(52.5, 13.4).unwrap());
        assert_eq!(
            encode(&value, &strict()).unwrap(),
            json!({"__type": "GeoPoint", "latitude": 52.5, "longitude": 13.4})
        );
    }

    #[test]
    fn encode_bytes_and_date() {
        let bytes = Value::from(b"hello".to_vec());
        assert_eq!(
            encode(&bytes, &strict()).unwrap(),
            json!({"__type": "Bytes", "base64": "aGVsbG8="})
        );

        let date = Value::Date(crate::date::parse_date("2015-07-14T15:55:52.133Z").unwrap());
        assert_eq!(
            encode(&date, &strict()).unwrap(),
            json!({"__type": "Date", "iso": "2015-07-14T15:55:52.133Z"})
        );
    }

    #[test]
    fn encode_file() {
        let file = Value::File(FileRef::uploaded("a.png", Some("https://x/a.png".into())));
        assert_eq!(
            encode(&file, &strict()).unwrap(),
            json!({"__type": "File", "name": "a.png", "url": "https://x/a.png"})
        );

        let dirty = Value::File(FileRef::pending("b.png"));
        assert!(matches!(
            encode(&dirty, &strict()),
            Err(CodecError::UnsavedFile { .. })
        ));
    }

    fn rejected(value: Value) -> bool {
        matches!(encode(&value, &strict()), Err(CodecError::UnsupportedType { .. }))
    }

    #[test]
    fn map_with_op_key_is_rejected() {
        assert!(rejected(Value::map([("__op", Value::from("Delete"))])));
        assert!(rejected(Value::map([("__op", Value::from("Explode"))])));
    }

    #[test]
    fn map_with_known_type_key_is_rejected() {
        assert!(rejected(Value::map([
            ("__type", Value::from("GeoPoint")),
            ("latitude", Value::from(1.0)),
            ("longitude", Value::from(2.0)),
        ])));
        let unknown = Value::map([("__type", Value::from("Polygon"))]);
        let json = encode(&unknown, &strict()).unwrap();
        assert_eq!(crate::decoder::decode(&json, &crate::PlainContext).unwrap(), unknown);
    }

    #[test]
    fn map_with_legacy_discriminator_is_rejected_only_when_it_parses() {
        assert!(rejected(Value::map([
            ("type", Value::from("Date")),
            ("iso", Value::from("2020-01-01T00:00:00.000Z")),
        ])));
        assert!(rejected(Value::map([
            ("op", Value::from("Increment")),
            ("amount", Value::from(2i64)),
        ])));

        let loose = Value::map([("type", Value::from("File")), ("size", Value::from(3i64))]);
        let json = encode(&loose, &strict()).unwrap();
        assert_eq!(crate::decoder::decode(&json, &crate::PlainContext).unwrap(), loose);

        let nested = Value::map([("inner", Value::map([("__op", Value::from("Delete"))]))]);
        assert!(rejected(nested));
    }

    #[test]
    fn encode_non_finite_number_fails() {
        let err = encode(&Value::from(f64::INFINITY), &strict()).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedType { .. }));
    }

    #[test]
    fn strict_rejects_unsaved_pointer() {
        let pointer = Value::Pointer(Pointer::local("Game", LocalId::from_token(1)));
        assert!(matches!(
            encode(&pointer, &strict()),
            Err(CodecError::UnsavedReference { .. })
        ));
    }

    #[test]
    fn lenient_writes_local_id() {
        let local = LocalId::from_token(0xabc);
        let pointer = Value::Pointer(Pointer::local("Game", local.clone()));
        let encoded = encode(&pointer, &LenientPointers::new(&UnresolvedLocalIds)).unwrap();
        assert_eq!(
            encoded,
            json!({"__type": "Pointer", "className": "Game", "localId": local.as_str()})
        );
    }

    #[test]
    fn promoted_local_ids_encode_as_object_ids() {
        struct Promoted;
        impl LocalIdLookup for Promoted {
            fn local_id_state(&self, _: &LocalId) -> LocalIdState {
                LocalIdState::Promoted("srv1".into())
            }
        }

        let pointer = Value::Pointer(Pointer::local("Game", LocalId::from_token(1)));
        let expected = json!({"__type": "Pointer", "className": "Game", "objectId": "srv1"});
        assert_eq!(encode(&pointer, &StrictPointers::new(&Promoted)).unwrap(), expected);
        assert_eq!(encode(&pointer, &LenientPointers::new(&Promoted)).unwrap(), expected);
    }

    #[test]
    fn lenient_rejects_unknown_local_id() {
        struct Forgetful;
        impl LocalIdLookup for Forgetful {
            fn local_id_state(&self, _: &LocalId) -> LocalIdState {
                LocalIdState::Unknown
            }
        }

        let pointer = Value::Pointer(Pointer::local("Game", LocalId::from_token(1)));
        assert!(matches!(
            encode(&pointer, &LenientPointers::new(&Forgetful)),
            Err(CodecError::DanglingLocalId { .. })
        ));
    }

    #[test]
    fn encode_relation() {
        let mut relation = Relation::new("Player");
        relation.objects.push(Pointer::saved("Player", "p1"));
        assert_eq!(
            encode(&Value::Relation(relation), &strict()).unwrap(),
            json!({
                "__type": "Relation",
                "className": "Player",
                "objects": [{"__type": "Pointer", "className": "Player", "objectId": "p1"}],
            })
        );
    }

    #[test]
    fn encode_operations() {
        let s = strict();
        assert_eq!(
            encode_operation(&Operation::Increment(Number::Int(8)), &s).unwrap(),
            json!({"__op": "Increment", "amount": 8})
        );
        assert_eq!(
            encode_operation(&Operation::Delete, &s).unwrap(),
            json!({"__op": "Delete"})
        );
        assert_eq!(
            encode_operation(&Operation::AddUnique(vec![Value::from("a")]), &s).unwrap(),
            json!({"__op": "AddUnique", "objects": ["a"]})
        );
        assert_eq!(
            encode_operation(&Operation::Set(Value::from(140i64)), &s).unwrap(),
            json!(140)
        );
    }

    #[test]
    fn encode_relation_batch() {
        let op = Operation::RelationBatch {
            added: vec![Pointer::saved("Player", "a")],
            removed: vec![Pointer::saved("Player", "b")],
        };
        let encoded = encode_operation(&op, &strict()).unwrap();
        assert_eq!(encoded["__op"], "Batch");
        assert_eq!(encoded["ops"][0]["__op"], "AddRelation");
        assert_eq!(encoded["ops"][1]["objects"][0]["objectId"], "b");
    }

    #[test]
    fn nested_operation_is_unsupported() {
        let value = Value::Array(vec![Value::from(Operation::Delete)]);
        assert!(matches!(
            encode(&value, &strict()),
            Err(CodecError::UnsupportedType { .. })
        ));
    }
}
