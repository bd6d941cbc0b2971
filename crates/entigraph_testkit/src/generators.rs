//! Property-based test generators using proptest.
//!
//! Every value produced here survives an encode/decode cycle: dates carry
//! millisecond precision, floats are finite, map keys never collide with
//! the wire discriminators and no value references another entity.

use chrono::{DateTime, Utc};
use entigraph_codec::{FileRef, GeoPoint, Number, Operation, Value};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for valid class names.
pub fn class_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-zA-Z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for field names users may write.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-zA-Z0-9]{0,11}")
        .expect("Invalid regex")
        .prop_filter("Field name must not be a wire key", |s| {
            !matches!(
                s.as_str(),
                "type" | "op" | "objectId" | "createdAt" | "updatedAt" | "className" | "localId"
            )
        })
}

/// Strategy for dates with millisecond precision between 1970 and 2100.
pub fn date_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_102_444_800_000).prop_map(|ms| {
        DateTime::from_timestamp_millis(ms).expect("Timestamp is in range")
    })
}

fn number_strategy() -> impl Strategy<Value = Number> {
    prop_oneof![
        any::<i64>().prop_map(Number::Int),
        (-1.0e9f64..1.0e9).prop_map(Number::Float),
    ]
}

fn leaf_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        number_strategy().prop_map(Value::Number),
        ".{0,16}".prop_map(Value::String),
        date_strategy().prop_map(Value::Date),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
        (-90.0f64..=90.0, -180.0f64..=180.0).prop_map(|(lat, lon)| {
            Value::GeoPoint(GeoPoint::new(lat, lon).expect("Coordinates are in range"))
        }),
        ("[a-z]{1,8}\\.png", "[a-z]{1,8}").prop_map(|(name, host)| {
            Value::File(FileRef::uploaded(
                name.clone(),
                Some(format!("https://{host}.example.com/{name}")),
            ))
        }),
    ]
}

/// Strategy for values that encode and decode without an entity graph.
pub fn wire_value_strategy() -> impl Strategy<Value = Value> {
    leaf_strategy().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map(field_name_strategy(), inner, 0..4)
                .prop_map(Value::Map),
        ]
    })
}

/// Strategy for list values of scalars.
pub fn list_value_strategy() -> impl Strategy<Value = Value> {
    prop::collection::vec(scalar_strategy(), 0..6).prop_map(Value::Array)
}

fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        (0i64..8).prop_map(Value::from),
        "[a-c]".prop_map(Value::String),
        any::<bool>().prop_map(Value::Bool),
    ]
}

/// Strategy for chains of increments small enough never to overflow.
pub fn increment_chain_strategy() -> impl Strategy<Value = Vec<Operation>> {
    prop::collection::vec(
        (-1000i64..1000).prop_map(|n| Operation::Increment(Number::Int(n))),
        1..8,
    )
}

/// Strategy for chains of add-unique operations over a small domain, so
/// items repeat across steps.
pub fn add_unique_chain_strategy() -> impl Strategy<Value = Vec<Operation>> {
    prop::collection::vec(
        prop::collection::vec(scalar_strategy(), 0..4).prop_map(Operation::AddUnique),
        1..6,
    )
}

/// Strategy for a map of field names to wire values.
pub fn fields_strategy() -> impl Strategy<Value = BTreeMap<String, Value>> {
    prop::collection::btree_map(field_name_strategy(), wire_value_strategy(), 0..6)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn dates_have_millisecond_precision() {
        let mut runner = TestRunner::default();
        for _ in 0..50 {
            let date = date_strategy().new_tree(&mut runner).unwrap().current();
            assert_eq!(date.timestamp_subsec_nanos() % 1_000_000, 0);
        }
    }

    #[test]
    fn field_names_avoid_wire_keys() {
        let mut runner = TestRunner::default();
        for _ in 0..100 {
            let name = field_name_strategy().new_tree(&mut runner).unwrap().current();
            assert!(!name.starts_with("__"));
            assert_ne!(name, "type");
        }
    }
}
