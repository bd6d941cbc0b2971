//! `decode`: parse wire JSON and describe the decoded value.

use super::{CliResult, OutputFormat};
use entigraph_codec::{
    encode_operation, format_date, keys, LenientPointers, Number, ObjectRef, Operation, Value,
};
use entigraph_core::{PointerMode, Session};
use serde_json::Value as JsonValue;
use std::fmt::Write as _;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Decodes the JSON in `input` (stdin if `None`) and prints it.
pub fn run(input: Option<&Path>, format: OutputFormat) -> CliResult<()> {
    let text = match input {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            text
        }
    };
    print!("{}", render(&text, format)?);
    Ok(())
}

/// Decodes `text` and renders it in `format`.
pub fn render(text: &str, format: OutputFormat) -> CliResult<String> {
    let json: JsonValue = serde_json::from_str(text)?;
    let session = Session::new();
    let value = if json.get(keys::OP).is_some() {
        Value::Operation(Box::new(session.decode_operation(&json)?))
    } else {
        session.decode(&json)?
    };
    debug!(kind = value.type_name(), referenced = session.len(), "decoded");

    match format {
        OutputFormat::Json => {
            let canonical = match &value {
                Value::Operation(op) => {
                    let strategy = LenientPointers::new(session.resolver().as_ref());
                    encode_operation(op, &strategy).map_err(entigraph_core::CoreError::from)?
                }
                other => session.encode(other, PointerMode::Lenient)?,
            };
            Ok(format!("{}\n", serde_json::to_string_pretty(&canonical)?))
        }
        OutputFormat::Text => {
            let mut out = String::new();
            describe(&value, 0, &mut out);
            Ok(out)
        }
    }
}

fn describe(value: &Value, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    match value {
        Value::Array(items) => {
            let _ = writeln!(out, "{indent}array ({} items)", items.len());
            for item in items {
                describe(item, depth + 1, out);
            }
        }
        Value::Map(map) => {
            let _ = writeln!(out, "{indent}map ({} fields)", map.len());
            for (key, item) in map {
                let _ = writeln!(out, "{indent}  {key}:");
                describe(item, depth + 2, out);
            }
        }
        Value::Operation(op) => describe_operation(op, depth, out),
        leaf => {
            let _ = writeln!(out, "{indent}{}", summarize(leaf));
        }
    }
}

fn describe_operation(op: &Operation, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    match op {
        Operation::Set(value) => {
            let _ = writeln!(out, "{indent}Set");
            describe(value, depth + 1, out);
        }
        Operation::Increment(amount) => {
            let _ = writeln!(out, "{indent}Increment by {}", number(*amount));
        }
        Operation::AddToList(items) | Operation::AddUnique(items) | Operation::RemoveFromList(items) => {
            let _ = writeln!(out, "{indent}{} ({} items)", op.wire_name(), items.len());
            for item in items {
                describe(item, depth + 1, out);
            }
        }
        Operation::AddRelation(members) | Operation::RemoveRelation(members) => {
            let _ = writeln!(out, "{indent}{} ({} members)", op.wire_name(), members.len());
        }
        Operation::RelationBatch { added, removed } => {
            let _ = writeln!(
                out,
                "{indent}Batch (+{} -{} members)",
                added.len(),
                removed.len()
            );
        }
        Operation::Delete => {
            let _ = writeln!(out, "{indent}Delete");
        }
    }
}

fn number(n: Number) -> String {
    match n {
        Number::Int(i) => i.to_string(),
        Number::Float(f) => f.to_string(),
    }
}

fn summarize(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("boolean {b}"),
        Value::Number(n) => format!("number {}", number(*n)),
        Value::String(s) => format!("string {s:?}"),
        Value::Date(date) => format!("date {}", format_date(date)),
        Value::Bytes(bytes) => format!("bytes ({} bytes)", bytes.len()),
        Value::GeoPoint(point) => {
            format!("geo-point ({}, {})", point.latitude(), point.longitude())
        }
        Value::File(file) => match file.url() {
            Some(url) => format!("file {} at {url}", file.name()),
            None => format!("file {} (not uploaded)", file.name()),
        },
        Value::Pointer(pointer) => match &pointer.target {
            ObjectRef::Server(id) => format!("pointer {}/{id}", pointer.class_name),
            ObjectRef::Local(local) => format!("pointer {} (unsaved, {local})", pointer.class_name),
        },
        Value::Relation(relation) => format!(
            "relation to {} ({} members)",
            relation.target_class.as_deref().unwrap_or("?"),
            relation.objects.len()
        ),
        other => other.type_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_nested_values() {
        let text = r#"{
            "when": {"__type": "Date", "iso": "2015-07-14T15:55:52.133Z"},
            "owner": {"__type": "Pointer", "className": "_User", "objectId": "u1"},
            "tags": ["a", 1]
        }"#;
        let out = render(text, OutputFormat::Text).unwrap();
        assert!(out.starts_with("map (3 fields)"));
        assert!(out.contains("date 2015-07-14T15:55:52.133Z"));
        assert!(out.contains("pointer _User/u1"));
        assert!(out.contains("array (2 items)"));
    }

    #[test]
    fn json_output_is_canonical() {
        let text = r#"{"__op": "Increment", "amount": 3}"#;
        let out = render(text, OutputFormat::Json).unwrap();
        let json: JsonValue = serde_json::from_str(&out).unwrap();
        assert_eq!(json["__op"], "Increment");
        assert_eq!(json["amount"], 3);

        let out = render(text, OutputFormat::Text).unwrap();
        assert_eq!(out, "Increment by 3\n");
    }

    #[test]
    fn invalid_json_is_reported() {
        assert!(render("{not json", OutputFormat::Text).is_err());
    }
}
