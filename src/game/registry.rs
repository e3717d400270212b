//! Entity registry: stable ids, body reverse map, deferred mutation queues
//!
//! Registration is a single atomic operation: the id map, the body→id
//! reverse map, and the physics world change together or not at all.
//! Structural changes requested mid-tick go through the create/delete
//! queues and become visible only at `flush_queues`, so the live set is
//! never mutated while it is being iterated.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::physics::{BodyHandle, PhysicsError, PhysicsWorld};

use super::entity::{Entity, EntityDraft};

/// Registry-level failures
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("entity id {0:?} is already registered")]
    DuplicateId(String),

    #[error(transparent)]
    Physics(#[from] PhysicsError),
}

/// Owns the id→entity mapping for one session
pub struct EntityRegistry {
    /// BTreeMap so simulation iteration order is reproducible
    entities: BTreeMap<String, Entity>,
    body_to_id: HashMap<BodyHandle, String>,
    create_queue: Vec<EntityDraft>,
    delete_queue: Vec<String>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self {
            entities: BTreeMap::new(),
            body_to_id: HashMap::new(),
            create_queue: Vec::new(),
            delete_queue: Vec::new(),
        }
    }

    /// Register an entity: validates the id, adds the body to the world,
    /// then inserts both maps. A rejected draft leaves everything untouched.
    pub fn register(
        &mut self,
        draft: EntityDraft,
        world: &mut PhysicsWorld,
    ) -> Result<(), RegistryError> {
        if self.entities.contains_key(&draft.id) {
            return Err(RegistryError::DuplicateId(draft.id));
        }
        let body = world.add_body(&draft.body)?;
        self.body_to_id.insert(body, draft.id.clone());
        self.entities.insert(
            draft.id.clone(),
            Entity {
                id: draft.id,
                model_refs: draft.model_refs,
                kind: draft.kind,
                body,
            },
        );
        Ok(())
    }

    /// Inverse of `register`. Idempotent: unregistering an unknown id, or
    /// the same id twice, is a no-op.
    pub fn unregister(&mut self, id: &str, world: &mut PhysicsWorld) {
        if let Some(entity) = self.entities.remove(id) {
            self.body_to_id.remove(&entity.body);
            world.remove_body(entity.body);
        }
    }

    /// Queue an entity creation for the next flush
    pub fn enqueue_create(&mut self, draft: EntityDraft) {
        self.create_queue.push(draft);
    }

    /// Queue an entity deletion for the next flush
    pub fn enqueue_delete(&mut self, id: impl Into<String>) {
        self.delete_queue.push(id.into());
    }

    /// Apply all queued creates, then all queued deletes, in submission
    /// order within each queue. Called once per tick, after action
    /// resolution, before serialization.
    ///
    /// A create that fails shape validation is a recoverable resource
    /// fault: that spawn is dropped with a warning; the rest still apply.
    pub fn flush_queues(&mut self, world: &mut PhysicsWorld) {
        let creates = std::mem::take(&mut self.create_queue);
        for draft in creates {
            let id = draft.id.clone();
            match self.register(draft, world) {
                Ok(()) => debug!(entity_id = %id, "entity spawned"),
                Err(e) => warn!(entity_id = %id, error = %e, "queued spawn dropped"),
            }
        }
        let deletes = std::mem::take(&mut self.delete_queue);
        for id in deletes {
            self.unregister(&id, world);
        }
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Entity> {
        self.entities.get_mut(id)
    }

    /// Reverse lookup from physics body to entity id
    pub fn id_for_body(&self, body: BodyHandle) -> Option<&str> {
        self.body_to_id.get(&body).map(String::as_str)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Iterate the live set in a stable order
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Ids of the live set in a stable order
    pub fn ids(&self) -> Vec<String> {
        self.entities.keys().cloned().collect()
    }

    pub fn pending_creates(&self) -> usize {
        self.create_queue.len()
    }

    pub fn pending_deletes(&self) -> usize {
        self.delete_queue.len()
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::EntityDraft;

    fn rock(id: &str) -> EntityDraft {
        EntityDraft::rock(id.to_string(), [0.0, 1.0, 0.0], [0.5, 0.5, 0.5])
    }

    #[test]
    fn register_rejects_duplicate_ids() {
        let mut world = PhysicsWorld::new();
        let mut registry = EntityRegistry::new();

        registry.register(rock("rock-0"), &mut world).unwrap();
        let err = registry.register(rock("rock-0"), &mut world).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateId(_)));

        // The failed registration must not have leaked a body
        assert_eq!(registry.len(), 1);
        assert_eq!(world.body_count(), 1);
    }

    #[test]
    fn unregister_is_idempotent() {
        let mut world = PhysicsWorld::new();
        let mut registry = EntityRegistry::new();
        registry.register(rock("rock-0"), &mut world).unwrap();

        registry.unregister("rock-0", &mut world);
        assert_eq!(registry.len(), 0);
        assert_eq!(world.body_count(), 0);

        // Second call: same observable effect as one call
        registry.unregister("rock-0", &mut world);
        assert_eq!(registry.len(), 0);
        assert_eq!(world.body_count(), 0);
    }

    #[test]
    fn registry_and_world_stay_consistent() {
        let mut world = PhysicsWorld::new();
        let mut registry = EntityRegistry::new();

        registry.register(rock("a"), &mut world).unwrap();
        registry.register(rock("b"), &mut world).unwrap();
        assert_eq!(registry.len(), world.body_count());

        let body = registry.get("a").unwrap().body;
        assert_eq!(registry.id_for_body(body), Some("a"));

        registry.unregister("a", &mut world);
        assert_eq!(registry.len(), world.body_count());
        assert_eq!(registry.id_for_body(body), None);
        assert!(!world.contains(body));
    }

    #[test]
    fn queued_changes_invisible_until_flush() {
        let mut world = PhysicsWorld::new();
        let mut registry = EntityRegistry::new();
        registry.register(rock("rock-0"), &mut world).unwrap();

        registry.enqueue_create(rock("rock-1"));
        registry.enqueue_delete("rock-0");

        // Live set frozen: still exactly the pre-queue state
        assert!(registry.contains("rock-0"));
        assert!(!registry.contains("rock-1"));
        assert_eq!(world.body_count(), 1);

        registry.flush_queues(&mut world);

        assert!(!registry.contains("rock-0"));
        assert!(registry.contains("rock-1"));
        assert_eq!(world.body_count(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn failed_queued_spawn_does_not_block_the_rest() {
        let mut world = PhysicsWorld::new();
        let mut registry = EntityRegistry::new();

        let mut bad = rock("bad");
        bad.body.colliders[0].shape = crate::physics::ShapeDesc::Sphere { radius: f32::NAN };
        registry.enqueue_create(bad);
        registry.enqueue_create(rock("good"));

        registry.flush_queues(&mut world);

        assert!(!registry.contains("bad"));
        assert!(registry.contains("good"));
        assert_eq!(world.body_count(), 1);
    }

    #[test]
    fn creates_apply_before_deletes() {
        let mut world = PhysicsWorld::new();
        let mut registry = EntityRegistry::new();

        // Create and delete of the same id in one tick: the delete wins
        registry.enqueue_create(rock("ephemeral"));
        registry.enqueue_delete("ephemeral");
        registry.flush_queues(&mut world);

        assert!(!registry.contains("ephemeral"));
        assert_eq!(world.body_count(), 0);
    }
}
