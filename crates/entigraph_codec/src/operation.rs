//! Pending field operations and their composition.
//!
//! When a second operation targets a field that already holds a pending
//! one, the two are composed into a single operation (or cancel out):
//!
//! | earlier \ later | Set/Delete | Increment | list op (same kind) | relation op |
//! |---|---|---|---|---|
//! | any | later wins | | | |
//! | Increment | | sum | | |
//! | Set(number) | | Set(sum) | | |
//! | same list op | | | merged items | |
//! | Set(array) | | | Set(applied) | |
//! | relation op | | | | set union/difference |
//!
//! Every other pairing fails with [`CodecError::InvalidOperation`].

use crate::error::{CodecError, CodecResult};
use crate::reference::{Pointer, Relation};
use crate::value::{Number, Value};

/// A pending mutation of one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Replace the field value.
    Set(Value),
    /// Remove the field.
    Delete,
    /// Add to a numeric field.
    Increment(Number),
    /// Append items to an array field.
    AddToList(Vec<Value>),
    /// Append items not already present.
    AddUnique(Vec<Value>),
    /// Remove every occurrence of the items.
    RemoveFromList(Vec<Value>),
    /// Add members to a relation.
    AddRelation(Vec<Pointer>),
    /// Remove members from a relation.
    RemoveRelation(Vec<Pointer>),
    /// Add and remove relation members in one request.
    RelationBatch {
        /// Members to add.
        added: Vec<Pointer>,
        /// Members to remove.
        removed: Vec<Pointer>,
    },
}

impl Operation {
    /// Builds an `AddRelation` operation.
    ///
    /// # Errors
    ///
    /// Fails if the pointers name different classes.
    pub fn add_relation(objects: Vec<Pointer>) -> CodecResult<Self> {
        relation_class(&objects)?;
        Ok(Operation::AddRelation(dedup_pointers(objects)))
    }

    /// Builds a `RemoveRelation` operation.
    ///
    /// # Errors
    ///
    /// Fails if the pointers name different classes.
    pub fn remove_relation(objects: Vec<Pointer>) -> CodecResult<Self> {
        relation_class(&objects)?;
        Ok(Operation::RemoveRelation(dedup_pointers(objects)))
    }

    /// The wire name of this operation (`Set` has none on the wire).
    pub fn wire_name(&self) -> &'static str {
        match self {
            Operation::Set(_) => "Set",
            Operation::Delete => "Delete",
            Operation::Increment(_) => "Increment",
            Operation::AddToList(_) => "Add",
            Operation::AddUnique(_) => "AddUnique",
            Operation::RemoveFromList(_) => "Remove",
            Operation::AddRelation(_) => "AddRelation",
            Operation::RemoveRelation(_) => "RemoveRelation",
            Operation::RelationBatch { .. } => "Batch",
        }
    }

    /// True for the relation operations.
    pub fn is_relation(&self) -> bool {
        matches!(
            self,
            Operation::AddRelation(_)
                | Operation::RemoveRelation(_)
                | Operation::RelationBatch { .. }
        )
    }

    /// Target class of a relation operation.
    pub fn relation_target(&self) -> Option<&str> {
        let (added, removed) = self.relation_sets()?;
        added.first().or(removed.first()).map(|p| p.class_name.as_str())
    }

    fn relation_sets(&self) -> Option<(&[Pointer], &[Pointer])> {
        let none: &[Pointer] = &[];
        match self {
            Operation::AddRelation(added) => Some((added.as_slice(), none)),
            Operation::RemoveRelation(removed) => Some((none, removed.as_slice())),
            Operation::RelationBatch { added, removed } => {
                Some((added.as_slice(), removed.as_slice()))
            }
            _ => None,
        }
    }

    /// Composes `later` onto `earlier`.
    ///
    /// Returns `None` when the two cancel out, which only happens for
    /// relation operations whose additions and removals annihilate.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidOperation`] for illegal pairings.
    pub fn compose(earlier: &Operation, later: &Operation) -> CodecResult<Option<Operation>> {
        let composed = match (earlier, later) {
            (_, Operation::Set(_) | Operation::Delete) => later.clone(),

            (Operation::Increment(a), Operation::Increment(b)) => Operation::Increment(*a + *b),
            (Operation::Set(Value::Number(a)), Operation::Increment(b)) => {
                Operation::Set(Value::Number(*a + *b))
            }

            (Operation::AddToList(a), Operation::AddToList(b)) => {
                Operation::AddToList(a.iter().chain(b).cloned().collect())
            }
            (Operation::AddUnique(a), Operation::AddUnique(b)) => {
                Operation::AddUnique(union(a, b))
            }
            (Operation::RemoveFromList(a), Operation::RemoveFromList(b)) => {
                Operation::RemoveFromList(union(a, b))
            }
            (
                Operation::Set(Value::Array(base)),
                Operation::AddToList(_) | Operation::AddUnique(_) | Operation::RemoveFromList(_),
            ) => Operation::Set(Value::Array(apply_list(later, base))),

            (earlier_op, later_op) if earlier_op.is_relation() && later_op.is_relation() => {
                return compose_relations(earlier_op, later_op);
            }

            _ => {
                return Err(CodecError::invalid_operation(format!(
                    "{} cannot follow a pending {}",
                    later.wire_name(),
                    earlier.wire_name()
                )))
            }
        };
        Ok(Some(composed))
    }

    /// Estimates the field value after this operation is applied to
    /// `base`, the field's current value.
    ///
    /// Returns `None` when the field ends up absent.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidOperation`] when the operation does
    /// not fit the current value, e.g. incrementing a string.
    pub fn apply(&self, base: Option<&Value>) -> CodecResult<Option<Value>> {
        let base = base.filter(|v| !v.is_null());
        let mismatch = |found: &Value| {
            CodecError::invalid_operation(format!(
                "cannot apply {} to a {} field",
                self.wire_name(),
                found.type_name()
            ))
        };

        let applied = match self {
            Operation::Set(value) => Some(value.clone()),
            Operation::Delete => None,
            Operation::Increment(amount) => match base {
                None => Some(Value::Number(*amount)),
                Some(Value::Number(current)) => Some(Value::Number(*current + *amount)),
                Some(other) => return Err(mismatch(other)),
            },
            Operation::AddToList(_) | Operation::AddUnique(_) | Operation::RemoveFromList(_) => {
                match base {
                    None => Some(Value::Array(apply_list(self, &[]))),
                    Some(Value::Array(list)) => Some(Value::Array(apply_list(self, list))),
                    Some(other) => return Err(mismatch(other)),
                }
            }
            Operation::AddRelation(_)
            | Operation::RemoveRelation(_)
            | Operation::RelationBatch { .. } => {
                let mut relation = match base {
                    None => Relation::default(),
                    Some(Value::Relation(relation)) => relation.clone(),
                    Some(other) => return Err(mismatch(other)),
                };
                apply_relation(self, &mut relation)?;
                Some(Value::Relation(relation))
            }
        };
        Ok(applied)
    }
}

fn union(a: &[Value], b: &[Value]) -> Vec<Value> {
    let mut merged: Vec<Value> = Vec::with_capacity(a.len() + b.len());
    for item in a.iter().chain(b) {
        if !merged.contains(item) {
            merged.push(item.clone());
        }
    }
    merged
}

fn apply_list(op: &Operation, base: &[Value]) -> Vec<Value> {
    match op {
        Operation::AddToList(items) => base.iter().chain(items).cloned().collect(),
        Operation::AddUnique(items) => union(base, items),
        Operation::RemoveFromList(items) => base
            .iter()
            .filter(|v| !items.contains(v))
            .cloned()
            .collect(),
        _ => base.to_vec(),
    }
}

fn dedup_pointers(objects: Vec<Pointer>) -> Vec<Pointer> {
    let mut unique: Vec<Pointer> = Vec::with_capacity(objects.len());
    for p in objects {
        if !unique.contains(&p) {
            unique.push(p);
        }
    }
    unique
}

fn relation_class(objects: &[Pointer]) -> CodecResult<Option<&str>> {
    let mut class: Option<&str> = None;
    for p in objects {
        match class {
            None => class = Some(p.class_name.as_str()),
            Some(c) if c != p.class_name => {
                return Err(CodecError::invalid_operation(format!(
                    "relation members must share a class, found {c} and {}",
                    p.class_name
                )))
            }
            Some(_) => {}
        }
    }
    Ok(class)
}

fn check_same_target(a: Option<&str>, b: Option<&str>) -> CodecResult<()> {
    match (a, b) {
        (Some(a), Some(b)) if a != b => Err(CodecError::invalid_operation(format!(
            "relation targets {a}, cannot mix in {b}"
        ))),
        _ => Ok(()),
    }
}

/// Builds the relation operation for the given net sets.
fn relation_from_sets(added: Vec<Pointer>, removed: Vec<Pointer>) -> Option<Operation> {
    match (added.is_empty(), removed.is_empty()) {
        (true, true) => None,
        (false, true) => Some(Operation::AddRelation(added)),
        (true, false) => Some(Operation::RemoveRelation(removed)),
        (false, false) => Some(Operation::RelationBatch { added, removed }),
    }
}

fn compose_relations(earlier: &Operation, later: &Operation) -> CodecResult<Option<Operation>> {
    check_same_target(earlier.relation_target(), later.relation_target())?;

    let none: &[Pointer] = &[];
    let (prev_added, prev_removed) = earlier.relation_sets().unwrap_or((none, none));
    let (new_added, new_removed) = later.relation_sets().unwrap_or((none, none));
    let mut added = prev_added.to_vec();
    let mut removed = prev_removed.to_vec();

    // An identifier moving in the opposite direction cancels its pending entry.
    for p in new_added {
        if let Some(pos) = removed.iter().position(|r| r == p) {
            removed.remove(pos);
        } else if !added.contains(p) {
            added.push(p.clone());
        }
    }
    for p in new_removed {
        if let Some(pos) = added.iter().position(|a| a == p) {
            added.remove(pos);
        } else if !removed.contains(p) {
            removed.push(p.clone());
        }
    }

    Ok(relation_from_sets(added, removed))
}

fn apply_relation(op: &Operation, relation: &mut Relation) -> CodecResult<()> {
    let target = op.relation_target();
    check_same_target(relation.target_class.as_deref(), target)?;
    if relation.target_class.is_none() {
        relation.target_class = target.map(str::to_string);
    }

    let none: &[Pointer] = &[];
    let (added, removed) = op.relation_sets().unwrap_or((none, none));
    for p in added {
        if !relation.objects.contains(p) {
            relation.objects.push(p.clone());
        }
    }
    relation.objects.retain(|p| !removed.contains(p));
    Ok(())
}
