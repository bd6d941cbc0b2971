//! Versioned blob format for persisted entities and values.
//!
//! Blobs are CBOR envelopes `{version, kind, payload}` where the payload
//! holds wire JSON. Version 1 blobs stored entities as
//! `{className, objectId, data}`; they are still readable.

use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use entigraph_codec::{
    decode, encode, keys, DecodeContext, LenientPointers, LocalIdLookup, Value,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::debug;

/// Version written by this build.
pub const FORMAT_VERSION: u32 = 2;

/// Oldest version this build reads.
pub const OLDEST_READABLE_VERSION: u32 = 1;

/// What a blob holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    /// A saved entity.
    Entity,
    /// A standalone value.
    Json,
}

impl BlobKind {
    /// Tag stored in the envelope.
    pub fn as_str(self) -> &'static str {
        match self {
            BlobKind::Entity => "Entity",
            BlobKind::Json => "Json",
        }
    }

    fn parse(tag: &str) -> CoreResult<Self> {
        match tag {
            "Entity" => Ok(BlobKind::Entity),
            "Json" => Ok(BlobKind::Json),
            other => Err(CoreError::UnknownBlobKind {
                kind: other.to_string(),
            }),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RawEnvelope {
    version: u32,
    kind: String,
    payload: JsonValue,
}

/// A decoded blob.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Format version the blob was written with.
    pub version: u32,
    /// Content kind.
    pub kind: BlobKind,
    /// Wire JSON payload.
    pub payload: JsonValue,
}

impl Envelope {
    /// An envelope at the current version.
    pub fn new(kind: BlobKind, payload: JsonValue) -> Self {
        Self {
            version: FORMAT_VERSION,
            kind,
            payload,
        }
    }

    /// Serializes to CBOR.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptBlob`] if serialization fails.
    pub fn to_bytes(&self) -> CoreResult<Vec<u8>> {
        let raw = RawEnvelope {
            version: self.version,
            kind: self.kind.as_str().to_string(),
            payload: self.payload.clone(),
        };
        let mut bytes = Vec::new();
        ciborium::into_writer(&raw, &mut bytes).map_err(|e| CoreError::corrupt(e.to_string()))?;
        Ok(bytes)
    }

    /// Parses a CBOR blob.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnsupportedVersion`] for versions outside the
    /// readable range, [`CoreError::UnknownBlobKind`] for unknown kind
    /// tags and [`CoreError::CorruptBlob`] for anything unparseable.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        let raw: RawEnvelope =
            ciborium::from_reader(bytes).map_err(|e| CoreError::corrupt(e.to_string()))?;
        if !(OLDEST_READABLE_VERSION..=FORMAT_VERSION).contains(&raw.version) {
            return Err(CoreError::UnsupportedVersion {
                found: raw.version,
                supported: FORMAT_VERSION,
            });
        }
        Ok(Self {
            version: raw.version,
            kind: BlobKind::parse(&raw.kind)?,
            payload: raw.payload,
        })
    }

    fn expect_kind(&self, expected: BlobKind) -> CoreResult<()> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(CoreError::UnexpectedBlobKind {
                expected: expected.as_str(),
                found: self.kind.as_str(),
            })
        }
    }

    /// The entity payload in the `Object` wire shape, with its class name.
    ///
    /// # Errors
    ///
    /// Fails if the blob is not an entity or the payload is malformed.
    pub fn entity_object(&self) -> CoreResult<(String, JsonMap<String, JsonValue>)> {
        self.expect_kind(BlobKind::Entity)?;
        let map = self
            .payload
            .as_object()
            .ok_or_else(|| CoreError::corrupt("entity payload is not an object"))?;
        let class_name = map
            .get(keys::CLASS_NAME)
            .and_then(JsonValue::as_str)
            .ok_or_else(|| CoreError::corrupt("entity payload has no className"))?
            .to_string();
        if self.version >= 2 {
            return Ok((class_name, map.clone()));
        }

        debug!(version = self.version, "upgrading legacy entity blob");
        let mut object = map
            .get("data")
            .and_then(JsonValue::as_object)
            .cloned()
            .unwrap_or_default();
        for key in [keys::OBJECT_ID, keys::CREATED_AT, keys::UPDATED_AT] {
            if let Some(value) = map.get(key) {
                object.insert(key.to_string(), value.clone());
            }
        }
        object.insert(keys::CLASS_NAME.to_string(), JsonValue::from(class_name.as_str()));
        Ok((class_name, object))
    }
}

/// Serializes a saved, clean entity.
///
/// # Errors
///
/// Returns [`CoreError::DirtyEntity`] if the entity has unsaved changes.
pub fn externalize_entity(entity: &Entity, lookup: &dyn LocalIdLookup) -> CoreResult<Vec<u8>> {
    if entity.is_dirty() {
        return Err(CoreError::DirtyEntity {
            class_name: entity.class_name().to_string(),
        });
    }
    let payload = entity.to_wire(&LenientPointers::new(lookup))?;
    Envelope::new(BlobKind::Entity, payload).to_bytes()
}

/// Serializes a standalone value.
///
/// # Errors
///
/// Fails if the value cannot be encoded.
pub fn externalize_json(value: &Value, lookup: &dyn LocalIdLookup) -> CoreResult<Vec<u8>> {
    let payload = encode(value, &LenientPointers::new(lookup))?;
    Envelope::new(BlobKind::Json, payload).to_bytes()
}

/// Reads a standalone value blob.
///
/// # Errors
///
/// Fails on unreadable blobs, entity blobs and undecodable payloads.
pub fn internalize_json(bytes: &[u8], ctx: &dyn DecodeContext) -> CoreResult<Value> {
    let envelope = Envelope::from_bytes(bytes)?;
    envelope.expect_kind(BlobKind::Json)?;
    Ok(decode(&envelope.payload, ctx)?)
}
