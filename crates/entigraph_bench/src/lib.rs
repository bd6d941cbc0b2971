//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use entigraph_codec::{GeoPoint, Value};
use rand::Rng;
use std::collections::BTreeMap;

/// Generate random bytes of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// A flat record like a typical document: scalars, a date and a location.
pub fn flat_record() -> Value {
    Value::map([
        ("name", Value::from("Alice")),
        ("email", Value::from("alice@example.com")),
        ("age", Value::from(30i64)),
        ("rating", Value::from(4.5f64)),
        ("verified", Value::from(true)),
        ("joined", Value::date(chrono_epoch())),
        (
            "home",
            GeoPoint::new(52.52, 13.405).map(Value::from).unwrap_or(Value::Null),
        ),
    ])
}

/// A map nested `depth` levels deep with `width` children per level.
pub fn nested_value(depth: usize, width: usize) -> Value {
    if depth == 0 {
        Value::from("leaf")
    } else {
        let children: BTreeMap<String, Value> = (0..width)
            .map(|i| (format!("key_{i}"), nested_value(depth - 1, width)))
            .collect();
        Value::Map(children)
    }
}

/// A list of `len` random integers.
pub fn int_list(len: usize) -> Value {
    let mut rng = rand::thread_rng();
    Value::Array((0..len).map(|_| Value::from(rng.gen_range(0..1000i64))).collect())
}

fn chrono_epoch() -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp_millis(1_436_889_352_133).unwrap_or_default()
}
