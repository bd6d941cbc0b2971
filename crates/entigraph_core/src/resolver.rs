//! Local identifier bookkeeping.

use crate::entity::{Entity, SharedEntity};
use entigraph_codec::{LocalId, LocalIdLookup, LocalIdState};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Default)]
struct ResolverState {
    issued: HashSet<LocalId>,
    pending: HashMap<LocalId, SharedEntity>,
    promoted: HashMap<LocalId, String>,
}

/// Maps local identifiers of unsaved entities to their nodes, and later
/// to the server identifiers they were saved under.
///
/// A single lock guards the maps. Promotion collects the affected nodes
/// under that lock and rewrites them after releasing it, so callers must
/// not hold an entity write guard while promoting.
#[derive(Default)]
pub struct IdentityResolver {
    state: Mutex<ResolverState>,
}

impl IdentityResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a fresh local identifier, unique within this resolver.
    pub fn allocate_local_id(&self) -> LocalId {
        let mut state = self.state.lock();
        loop {
            let local_id = LocalId::from_token(rand::random::<u128>());
            if state.issued.insert(local_id.clone()) {
                return local_id;
            }
        }
    }

    /// Registers `node` as the unsaved entity known by `local_id`.
    pub fn register_pending(&self, local_id: LocalId, node: SharedEntity) {
        let mut state = self.state.lock();
        state.issued.insert(local_id.clone());
        state.pending.insert(local_id, node);
    }

    /// The unsaved node known by `local_id`, if still pending.
    pub fn resolve(&self, local_id: &LocalId) -> Option<SharedEntity> {
        self.state.lock().pending.get(local_id).cloned()
    }

    /// Server identifier `local_id` was promoted to, if any.
    pub fn object_id_for(&self, local_id: &LocalId) -> Option<String> {
        self.state.lock().promoted.get(local_id).cloned()
    }

    /// True if `a` and `b` refer to the same remote document, matching
    /// an unsaved entity's local identifier against the server identifier
    /// it was promoted to.
    pub fn same_document(&self, a: &Entity, b: &Entity) -> bool {
        if a.has_same_id(b) {
            return true;
        }
        if a.class_name() != b.class_name() {
            return false;
        }
        let state = self.state.lock();
        let server_id = |entity: &Entity| match entity.object_id() {
            Some(object_id) => Some(object_id.to_string()),
            None => entity
                .local_id()
                .and_then(|local_id| state.promoted.get(local_id).cloned()),
        };
        matches!((server_id(a), server_id(b)), (Some(x), Some(y)) if x == y)
    }

    /// True while `local_id` names a registered, unsaved node.
    pub fn is_pending(&self, local_id: &LocalId) -> bool {
        self.state.lock().pending.contains_key(local_id)
    }

    /// Number of registered unsaved nodes.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Records that `local_id` was saved as `object_id` and rewrites
    /// references to it in every still-pending node, including the saved
    /// node itself. Returns how many references changed.
    pub fn promote(&self, local_id: &LocalId, object_id: &str) -> usize {
        let nodes: Vec<SharedEntity> = {
            let mut state = self.state.lock();
            let own = state.pending.remove(local_id);
            state
                .promoted
                .insert(local_id.clone(), object_id.to_string());
            state.pending.values().cloned().chain(own).collect()
        };
        let rewritten = nodes
            .iter()
            .map(|node| node.write().rewrite_local_id(local_id, object_id))
            .sum();
        debug!(%local_id, object_id, rewritten, "promoted local id");
        rewritten
    }
}

impl LocalIdLookup for IdentityResolver {
    fn local_id_state(&self, local_id: &LocalId) -> LocalIdState {
        let state = self.state.lock();
        if let Some(object_id) = state.promoted.get(local_id) {
            LocalIdState::Promoted(object_id.clone())
        } else if state.pending.contains_key(local_id) || state.issued.contains(local_id) {
            LocalIdState::Pending
        } else {
            LocalIdState::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use entigraph_codec::Pointer;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn allocated_ids_are_unique() {
        let resolver = IdentityResolver::new();
        let ids: HashSet<LocalId> = (0..1000).map(|_| resolver.allocate_local_id()).collect();
        assert_eq!(ids.len(), 1000);
        assert!(ids.iter().all(|id| id.as_str().starts_with(LocalId::PREFIX)));
    }

    #[test]
    fn states() {
        let resolver = IdentityResolver::new();
        let issued = resolver.allocate_local_id();
        assert_eq!(resolver.local_id_state(&issued), LocalIdState::Pending);
        assert_eq!(
            resolver.local_id_state(&LocalId::from_token(7)),
            LocalIdState::Unknown
        );

        let node = SharedEntity::new(Entity::new("Game", issued.clone()));
        resolver.register_pending(issued.clone(), node.clone());
        assert!(resolver.resolve(&issued).is_some_and(|n| n.ptr_eq(&node)));

        resolver.promote(&issued, "g1");
        assert_eq!(
            resolver.local_id_state(&issued),
            LocalIdState::Promoted("g1".into())
        );
        assert!(resolver.resolve(&issued).is_none());
        assert_eq!(resolver.object_id_for(&issued).as_deref(), Some("g1"));
    }

    #[test]
    fn promoted_local_id_matches_server_copy() {
        let resolver = IdentityResolver::new();
        let local_id = resolver.allocate_local_id();
        let unsaved = Entity::new("Game", local_id.clone());
        let fetched = Entity::stub("Game", "g1");
        assert!(!resolver.same_document(&unsaved, &fetched));

        resolver.promote(&local_id, "g1");
        assert!(resolver.same_document(&unsaved, &fetched));
        assert!(!resolver.same_document(&unsaved, &Entity::stub("Other", "g1")));
        assert!(!unsaved.has_same_id(&fetched));
    }

    #[test]
    fn promote_rewrites_pending_references() {
        let resolver = IdentityResolver::new();
        let a_id = resolver.allocate_local_id();
        let b_id = resolver.allocate_local_id();
        let a = SharedEntity::new(Entity::new("A", a_id.clone()));
        let b = SharedEntity::new(Entity::new("B", b_id.clone()));
        resolver.register_pending(a_id.clone(), a.clone());
        resolver.register_pending(b_id.clone(), b.clone());

        b.write().set("parent", Pointer::local("A", a_id.clone())).unwrap();
        a.write().set("self", Pointer::local("A", a_id.clone())).unwrap();

        assert_eq!(resolver.promote(&a_id, "a1"), 2);
        assert_eq!(b.read().get_pointer("parent"), Some(Pointer::saved("A", "a1")));
        assert_eq!(a.read().get_pointer("self"), Some(Pointer::saved("A", "a1")));
    }

    #[test]
    fn concurrent_promotions() {
        let resolver = Arc::new(IdentityResolver::new());
        let ids: Vec<LocalId> = (0..16).map(|_| resolver.allocate_local_id()).collect();
        let holder_id = resolver.allocate_local_id();
        let holder = SharedEntity::new(Entity::new("Holder", holder_id.clone()));
        resolver.register_pending(holder_id, holder.clone());
        for (i, id) in ids.iter().enumerate() {
            let node = SharedEntity::new(Entity::new("Item", id.clone()));
            resolver.register_pending(id.clone(), node);
            holder
                .write()
                .set(&format!("item{i}"), Pointer::local("Item", id.clone()))
                .unwrap();
        }

        let handles: Vec<_> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let resolver = Arc::clone(&resolver);
                let id = id.clone();
                thread::spawn(move || resolver.promote(&id, &format!("item-{i}")))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let holder = holder.read();
        for i in 0..16 {
            assert_eq!(
                holder.get_pointer(&format!("item{i}")),
                Some(Pointer::saved("Item", format!("item-{i}")))
            );
        }
    }
}
