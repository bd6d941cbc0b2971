//! Class registry.

use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use entigraph_codec::LocalId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Builds entities of one class.
///
/// Implementations can seed defaults on new entities; both methods fall
/// back to bare entities.
pub trait EntityFactory: Send + Sync {
    /// Builds a new unsaved entity.
    fn create(&self, class_name: &str, local_id: LocalId) -> Entity {
        Entity::new(class_name, local_id)
    }

    /// Builds a stub for a saved entity.
    fn stub(&self, class_name: &str, object_id: &str) -> Entity {
        Entity::stub(class_name, object_id)
    }
}

/// Factory producing bare entities.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFactory;

impl EntityFactory for DefaultFactory {}

/// Classes the backend defines itself.
pub const BUILTIN_CLASSES: [&str; 4] = ["_User", "_Role", "_Installation", "_Session"];

/// Maps class names to entity factories.
///
/// Unregistered classes use [`DefaultFactory`].
pub struct ClassRegistry {
    factories: RwLock<HashMap<String, Arc<dyn EntityFactory>>>,
    fallback: Arc<dyn EntityFactory>,
}

impl ClassRegistry {
    /// A registry with the built-in classes registered.
    pub fn new() -> Self {
        let fallback: Arc<dyn EntityFactory> = Arc::new(DefaultFactory);
        let factories = BUILTIN_CLASSES
            .iter()
            .map(|name| (name.to_string(), Arc::clone(&fallback)))
            .collect();
        Self {
            factories: RwLock::new(factories),
            fallback,
        }
    }

    /// Registers `factory` for `class_name`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidKey`] for empty names or names with
    /// characters other than ASCII letters, digits and underscores.
    pub fn register(&self, class_name: &str, factory: impl EntityFactory + 'static) -> CoreResult<()> {
        validate_class_name(class_name)?;
        let replaced = self
            .factories
            .write()
            .insert(class_name.to_string(), Arc::new(factory))
            .is_some();
        debug!(class_name, replaced, "registered entity class");
        Ok(())
    }

    /// True if `class_name` has a registered factory.
    pub fn is_registered(&self, class_name: &str) -> bool {
        self.factories.read().contains_key(class_name)
    }

    /// Factory for `class_name`.
    pub fn class_for(&self, class_name: &str) -> Arc<dyn EntityFactory> {
        self.factories
            .read()
            .get(class_name)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    /// Class name of `entity`.
    pub fn class_name_for(&self, entity: &Entity) -> String {
        entity.class_name().to_string()
    }

    /// Registered class names, sorted.
    pub fn registered_classes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Builds a new unsaved entity of `class_name`.
    pub fn create(&self, class_name: &str, local_id: LocalId) -> Entity {
        self.class_for(class_name).create(class_name, local_id)
    }

    /// Builds a stub of `class_name`.
    pub fn stub(&self, class_name: &str, object_id: &str) -> Entity {
        self.class_for(class_name).stub(class_name, object_id)
    }
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_class_name(class_name: &str) -> CoreResult<()> {
    let valid = !class_name.is_empty()
        && class_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidKey {
            key: class_name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scoreboard;

    impl EntityFactory for Scoreboard {
        fn create(&self, class_name: &str, local_id: LocalId) -> Entity {
            let mut entity = Entity::new(class_name, local_id);
            entity.set("score", 0i64).unwrap();
            entity
        }
    }

    #[test]
    fn builtins_registered() {
        let registry = ClassRegistry::new();
        for name in BUILTIN_CLASSES {
            assert!(registry.is_registered(name));
        }
        assert!(!registry.is_registered("Game"));
    }

    #[test]
    fn custom_factory_seeds_defaults() {
        let registry = ClassRegistry::new();
        registry.register("Scoreboard", Scoreboard).unwrap();

        let board = registry.create("Scoreboard", LocalId::from_token(1));
        assert_eq!(board.get_i64("score"), Some(0));
        assert_eq!(registry.class_name_for(&board), "Scoreboard");

        let stub = registry.stub("Scoreboard", "s1");
        assert!(!stub.is_data_available());
        assert_eq!(stub.object_id(), Some("s1"));
    }

    #[test]
    fn unregistered_class_uses_fallback() {
        let registry = ClassRegistry::new();
        let game = registry.create("Game", LocalId::from_token(2));
        assert_eq!(game.class_name(), "Game");
        assert!(game.keys().is_empty());
    }

    #[test]
    fn invalid_class_names() {
        let registry = ClassRegistry::new();
        assert!(registry.register("", DefaultFactory).is_err());
        assert!(registry.register("bad name", DefaultFactory).is_err());
    }
}
