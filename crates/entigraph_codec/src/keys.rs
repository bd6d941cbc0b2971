//! Reserved wire keys and discriminators.

/// Discriminator key for typed values.
pub const TYPE: &str = "__type";
/// Discriminator key for field operations.
pub const OP: &str = "__op";
/// Legacy discriminator key for typed values.
pub const LEGACY_TYPE: &str = "type";
/// Legacy discriminator key for field operations.
pub const LEGACY_OP: &str = "op";

/// Server identifier of an object.
pub const OBJECT_ID: &str = "objectId";
/// Client placeholder identifier of an unsaved object.
pub const LOCAL_ID: &str = "localId";
/// Server creation timestamp.
pub const CREATED_AT: &str = "createdAt";
/// Server update timestamp.
pub const UPDATED_AT: &str = "updatedAt";
/// Class name inside pointer, object and relation shapes.
pub const CLASS_NAME: &str = "className";

/// Keys that field setters may not write.
pub const RESERVED: [&str; 3] = [OBJECT_ID, CREATED_AT, UPDATED_AT];

/// Type discriminators understood by the decoder.
pub const KNOWN_TYPES: [&str; 7] = [
    "Date", "Bytes", "GeoPoint", "File", "Pointer", "Object", "Relation",
];

/// Operation discriminators understood by the decoder.
pub const KNOWN_OPS: [&str; 8] = [
    "Delete",
    "Increment",
    "Add",
    "AddUnique",
    "Remove",
    "AddRelation",
    "RemoveRelation",
    "Batch",
];

/// Returns true if `key` is managed by the server.
pub fn is_reserved(key: &str) -> bool {
    RESERVED.contains(&key)
}
