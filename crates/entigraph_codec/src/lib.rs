//! # Entigraph Codec
//!
//! Value model and wire JSON codec for Entigraph.
//!
//! This crate provides:
//! - The dynamic [`Value`] type, including dates, bytes, geo-points, files,
//!   pointers and relations
//! - Pending field [`Operation`]s with their composition and application rules
//! - Encoding to the `__type`/`__op` wire shapes with pluggable pointer rules
//! - Decoding with hooks for entity-shaped payloads
//!
//! ## Usage
//!
//! ```
//! use entigraph_codec::{decode, encode, Operation, PlainContext, UnresolvedLocalIds,
//!     LenientPointers, Value};
//! use serde_json::json;
//!
//! let lookup = UnresolvedLocalIds;
//! let json = encode(&Value::from(Operation::Increment(5i64.into())), &LenientPointers::new(&lookup)).unwrap();
//! assert_eq!(json, json!({"__op": "Increment", "amount": 5}));
//!
//! let back = decode(&json, &PlainContext).unwrap();
//! assert_eq!(back.as_operation(), Some(&Operation::Increment(5i64.into())));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod date;
mod decoder;
mod encoder;
mod error;
mod file;
mod geo;
pub mod keys;
mod operation;
mod reference;
mod value;

pub use date::{format_date, parse_date, truncate_to_millis};
pub use decoder::{
    decode, decode_operation, timestamp, DecodeContext, EmbeddedObject, PlainContext, WireDecoder,
    MAX_DEPTH,
};
pub use encoder::{
    encode, encode_operation, LenientPointers, LocalIdLookup, LocalIdState, PointerStrategy,
    StrictPointers, UnresolvedLocalIds, WireEncoder,
};
pub use error::{CodecError, CodecResult};
pub use file::{FileRef, MAX_FILE_SIZE};
pub use geo::GeoPoint;
pub use operation::Operation;
pub use reference::{LocalId, ObjectRef, Pointer, Relation};
pub use value::{Number, Value};
