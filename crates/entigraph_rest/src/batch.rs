//! Batch request format.
//!
//! A batch is `POST batch` with `{"requests": [{method, path, body}]}`.
//! The response is an array with one `{"success": ..}` or
//! `{"error": {"code", "error"}}` entry per request, in order.

use crate::error::{codes, RestError, RestResult};
use crate::transport::Method;
use entigraph_core::{Entity, SharedEntity};
use serde_json::{json, Value as JsonValue};

/// What a batch command does to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOp {
    /// Create a new document.
    Create,
    /// Update an existing document.
    Update,
    /// Delete an existing document.
    Delete,
}

impl BatchOp {
    /// HTTP method of the command.
    pub fn method(self) -> Method {
        match self {
            BatchOp::Create => Method::Post,
            BatchOp::Update => Method::Put,
            BatchOp::Delete => Method::Delete,
        }
    }

    /// Checks that `entity` is in a state this command applies to.
    ///
    /// # Errors
    ///
    /// Returns [`RestError::Forbidden`] when creating an entity that
    /// already has an objectId, or updating or deleting one without.
    pub fn check(self, entity: &Entity) -> RestResult<()> {
        match (self, entity.object_id()) {
            (BatchOp::Create, Some(_)) => Err(RestError::Forbidden(format!(
                "cannot create {entity}: it already has an objectId"
            ))),
            (BatchOp::Update | BatchOp::Delete, None) => Err(RestError::Forbidden(format!(
                "cannot update or delete {entity}: it has no objectId"
            ))),
            _ => Ok(()),
        }
    }

    /// Path of the command relative to the API endpoint.
    pub fn path(self, entity: &Entity) -> String {
        match (self, entity.object_endpoint()) {
            (BatchOp::Create, _) | (_, None) => entity.endpoint(),
            (_, Some(path)) => path,
        }
    }
}

/// One entity and the command to run on it.
#[derive(Debug, Clone)]
pub struct BatchItem {
    /// The entity.
    pub node: SharedEntity,
    /// The command.
    pub op: BatchOp,
}

impl BatchItem {
    /// Creates an item.
    pub fn new(node: SharedEntity, op: BatchOp) -> Self {
        Self { node, op }
    }
}

/// A failed command within a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    /// Position of the item in the submitted list.
    pub index: usize,
    /// Backend error code.
    pub code: i64,
    /// Backend error message.
    pub message: String,
}

impl From<BatchFailure> for RestError {
    fn from(failure: BatchFailure) -> Self {
        RestError::Server {
            code: failure.code,
            message: failure.message,
        }
    }
}

/// Outcome of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Number of commands that succeeded.
    pub succeeded: usize,
    /// Commands that failed, by position.
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    /// True if every command succeeded.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turns the first failure into an error.
    ///
    /// # Errors
    ///
    /// Returns the first failed command as [`RestError::Server`].
    pub fn into_result(self) -> RestResult<()> {
        match self.failures.into_iter().next() {
            Some(failure) => Err(failure.into()),
            None => Ok(()),
        }
    }

    pub(crate) fn merge(&mut self, other: BatchReport, offset: usize) {
        self.succeeded += other.succeeded;
        self.failures
            .extend(other.failures.into_iter().map(|mut f| {
                f.index += offset;
                f
            }));
    }
}

/// A command inside a batch body.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchCommand {
    /// HTTP method.
    pub method: Method,
    /// Absolute path including the endpoint's path prefix.
    pub path: String,
    /// Body, if any.
    pub body: Option<JsonValue>,
}

/// Builds the batch request body.
pub fn request_body(commands: &[BatchCommand]) -> JsonValue {
    let requests: Vec<JsonValue> = commands
        .iter()
        .map(|c| {
            let mut request = json!({"method": c.method.as_str(), "path": c.path});
            if let Some(body) = &c.body {
                request["body"] = body.clone();
            }
            request
        })
        .collect();
    json!({ "requests": requests })
}

/// Splits a batch response into per-command results.
///
/// # Errors
///
/// Returns [`RestError::BatchMismatch`] if the result count differs from
/// `expected`, and [`RestError::Protocol`] for entries that are neither a
/// success nor an error.
pub fn parse_results(response: &JsonValue, expected: usize) -> RestResult<Vec<Result<JsonValue, (i64, String)>>> {
    let entries = response
        .as_array()
        .ok_or_else(|| RestError::Protocol("batch response is not an array".into()))?;
    if entries.len() != expected {
        return Err(RestError::BatchMismatch {
            expected,
            actual: entries.len(),
        });
    }
    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            if let Some(success) = entry.get("success") {
                Ok(Ok(success.clone()))
            } else if let Some(error) = entry.get("error") {
                Ok(Err((
                    error
                        .get("code")
                        .and_then(JsonValue::as_i64)
                        .unwrap_or(codes::INTERNAL_SERVER_ERROR),
                    error
                        .get("error")
                        .and_then(JsonValue::as_str)
                        .unwrap_or("error undefined by backend")
                        .to_string(),
                )))
            } else {
                Err(RestError::Protocol(format!(
                    "batch result {index} has neither success nor error"
                )))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use entigraph_codec::LocalId;

    #[test]
    fn op_checks() {
        let unsaved = Entity::new("Game", LocalId::from_token(1));
        let saved = Entity::stub("Game", "g1");
        assert!(BatchOp::Create.check(&unsaved).is_ok());
        assert!(matches!(BatchOp::Create.check(&saved), Err(RestError::Forbidden(_))));
        assert!(matches!(BatchOp::Update.check(&unsaved), Err(RestError::Forbidden(_))));
        assert!(BatchOp::Delete.check(&saved).is_ok());

        assert_eq!(BatchOp::Create.path(&unsaved), "classes/Game");
        assert_eq!(BatchOp::Update.path(&saved), "classes/Game/g1");
    }

    #[test]
    fn body_shape() {
        let body = request_body(&[
            BatchCommand {
                method: Method::Post,
                path: "/1/classes/Game".into(),
                body: Some(json!({"score": 1})),
            },
            BatchCommand {
                method: Method::Delete,
                path: "/1/classes/Game/g1".into(),
                body: None,
            },
        ]);
        assert_eq!(
            body,
            json!({"requests": [
                {"method": "POST", "path": "/1/classes/Game", "body": {"score": 1}},
                {"method": "DELETE", "path": "/1/classes/Game/g1"}
            ]})
        );
    }

    #[test]
    fn results() {
        let response = json!([
            {"success": {"objectId": "a"}},
            {"error": {"code": 101, "error": "object not found"}}
        ]);
        let results = parse_results(&response, 2).unwrap();
        assert_eq!(results[0], Ok(json!({"objectId": "a"})));
        assert_eq!(results[1], Err((101, "object not found".to_string())));

        assert!(matches!(
            parse_results(&response, 3),
            Err(RestError::BatchMismatch { expected: 3, actual: 2 })
        ));
        assert!(matches!(
            parse_results(&json!([{}]), 1),
            Err(RestError::Protocol(_))
        ));
    }

    #[test]
    fn report_merge_offsets_indices() {
        let mut report = BatchReport::default();
        report.merge(
            BatchReport {
                succeeded: 1,
                failures: vec![BatchFailure {
                    index: 0,
                    code: 1,
                    message: "x".into(),
                }],
            },
            50,
        );
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failures[0].index, 50);
        assert!(!report.is_success());
    }
}
