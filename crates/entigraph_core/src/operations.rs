//! Per-entity map of pending field operations.

use entigraph_codec::{CodecResult, Operation};
use std::collections::BTreeMap;
use tracing::warn;

/// Pending operations keyed by field name.
///
/// A new operation on a field composes with whatever is already pending
/// there; when the two cancel out the field drops out of the set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationSet {
    ops: BTreeMap<String, Operation>,
}

impl OperationSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `op` on `field`, composing it with any pending operation.
    ///
    /// # Errors
    ///
    /// Returns [`entigraph_codec::CodecError::InvalidOperation`] when `op`
    /// cannot follow the pending operation. The set is left unchanged.
    pub fn apply(&mut self, field: &str, op: Operation) -> CodecResult<()> {
        let composed = match self.ops.get(field) {
            Some(earlier) => Operation::compose(earlier, &op)?,
            None => Some(op),
        };
        match composed {
            Some(op) => {
                self.ops.insert(field.to_string(), op);
            }
            None => {
                self.ops.remove(field);
            }
        }
        Ok(())
    }

    /// Puts `op` back underneath whatever is pending on `field`.
    ///
    /// Used when a flushed snapshot failed to save: the failed operation
    /// happened first, so any newer pending operation composes on top.
    pub fn restore_beneath(&mut self, field: &str, op: Operation) {
        let merged = match self.ops.remove(field) {
            None => Some(op),
            Some(newer) => match Operation::compose(&op, &newer) {
                Ok(merged) => merged,
                Err(e) => {
                    warn!(field, error = %e, "cannot restore failed operation beneath newer one, keeping newer");
                    Some(newer)
                }
            },
        };
        if let Some(op) = merged {
            self.ops.insert(field.to_string(), op);
        }
    }

    /// Returns the pending operation for `field`.
    pub fn get(&self, field: &str) -> Option<&Operation> {
        self.ops.get(field)
    }

    /// True if `field` has a pending operation.
    pub fn contains(&self, field: &str) -> bool {
        self.ops.contains_key(field)
    }

    /// Drops the pending operation for `field`.
    pub fn remove(&mut self, field: &str) -> Option<Operation> {
        self.ops.remove(field)
    }

    /// Returns the pending operations and clears the set.
    ///
    /// Operations recorded afterwards land in the now empty set and are
    /// never part of the returned snapshot.
    pub fn flushed(&mut self) -> BTreeMap<String, Operation> {
        std::mem::take(&mut self.ops)
    }

    /// Like [`OperationSet::flushed`], but operations matching `hold` stay
    /// pending.
    pub fn flushed_except(&mut self, hold: impl Fn(&Operation) -> bool) -> BTreeMap<String, Operation> {
        let (held, flushed): (BTreeMap<_, _>, BTreeMap<_, _>) = std::mem::take(&mut self.ops)
            .into_iter()
            .partition(|(_, op)| hold(op));
        self.ops = held;
        flushed
    }

    /// Drops every pending operation.
    pub fn clear(&mut self) {
        self.ops.clear();
    }

    /// Number of fields with pending operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Iterates over pending operations in field order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Operation)> {
        self.ops.iter()
    }

    /// Iterates mutably over pending operations.
    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Operation)> {
        self.ops.iter_mut()
    }
}
