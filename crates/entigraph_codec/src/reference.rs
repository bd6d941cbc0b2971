//! Identifier-based references between entities.
//!
//! Values never embed another entity. They point at it by class name and
//! identifier, where the identifier is either the server's `objectId` or a
//! client-side [`LocalId`] for an entity that has not been saved yet.

use std::fmt;

/// Client-side placeholder identifier for an unsaved entity.
///
/// Always `local_` followed by lowercase hexadecimal digits.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalId(String);

impl LocalId {
    /// Prefix shared by every local identifier.
    pub const PREFIX: &'static str = "local_";

    /// Builds a local identifier from a random token.
    #[must_use]
    pub fn from_token(token: u128) -> Self {
        Self(format!("{}{token:032x}", Self::PREFIX))
    }

    /// Parses a local identifier, returning `None` if the shape is wrong.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let digits = value.strip_prefix(Self::PREFIX)?;
        if digits.is_empty()
            || !digits
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return None;
        }
        Some(Self(value.to_string()))
    }

    /// Returns the identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalId({})", self.0)
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The identifier half of a pointer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectRef {
    /// Server-assigned `objectId`.
    Server(String),
    /// Placeholder for an entity awaiting its first save.
    Local(LocalId),
}

impl ObjectRef {
    /// Returns the server identifier, if this is one.
    pub fn object_id(&self) -> Option<&str> {
        match self {
            ObjectRef::Server(id) => Some(id),
            ObjectRef::Local(_) => None,
        }
    }

    /// Returns the local identifier, if this is one.
    pub fn local_id(&self) -> Option<&LocalId> {
        match self {
            ObjectRef::Server(_) => None,
            ObjectRef::Local(id) => Some(id),
        }
    }
}

/// A reference to another entity by class name and identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pointer {
    /// Class of the referenced entity.
    pub class_name: String,
    /// Identifier of the referenced entity.
    pub target: ObjectRef,
}

impl Pointer {
    /// Creates a pointer.
    pub fn new(class_name: impl Into<String>, target: ObjectRef) -> Self {
        Self {
            class_name: class_name.into(),
            target,
        }
    }

    /// Pointer to a saved entity.
    pub fn saved(class_name: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self::new(class_name, ObjectRef::Server(object_id.into()))
    }

    /// Pointer to an unsaved entity.
    pub fn local(class_name: impl Into<String>, local_id: LocalId) -> Self {
        Self::new(class_name, ObjectRef::Local(local_id))
    }

    /// Server identifier of the target, if it has one.
    pub fn object_id(&self) -> Option<&str> {
        self.target.object_id()
    }

    /// Local identifier of the target, if it is unsaved.
    pub fn local_id(&self) -> Option<&LocalId> {
        self.target.local_id()
    }

    /// True when the target carries a server identifier.
    pub fn is_saved(&self) -> bool {
        matches!(self.target, ObjectRef::Server(_))
    }
}

/// A one-to-many relation field.
///
/// `objects` lists the members this client knows about: those announced by
/// the server payload plus any added locally and not yet saved.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Relation {
    /// Class of the related entities, once known.
    pub target_class: Option<String>,
    /// Known members.
    pub objects: Vec<Pointer>,
}

impl Relation {
    /// Creates an empty relation to `target_class`.
    pub fn new(target_class: impl Into<String>) -> Self {
        Self {
            target_class: Some(target_class.into()),
            objects: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_id_shape() {
        let id = LocalId::from_token(0xdead_beef);
        assert!(id.as_str().starts_with("local_"));
        assert_eq!(id.as_str().len(), "local_".len() + 32);
        assert_eq!(LocalId::parse(id.as_str()), Some(id));
    }

    #[test]
    fn local_id_parse_rejects() {
        assert!(LocalId::parse("local_").is_none());
        assert!(LocalId::parse("local_XYZ").is_none());
        assert!(LocalId::parse("local_ABC").is_none());
        assert!(LocalId::parse("abc123").is_none());
        assert!(LocalId::parse("local_0af9").is_some());
    }

    #[test]
    fn pointer_accessors() {
        let saved = Pointer::saved("Game", "abc123");
        assert!(saved.is_saved());
        assert_eq!(saved.object_id(), Some("abc123"));
        assert_eq!(saved.local_id(), None);

        let local = Pointer::local("Game", LocalId::from_token(7));
        assert!(!local.is_saved());
        assert_eq!(local.object_id(), None);
        assert!(local.local_id().is_some());
    }
}
