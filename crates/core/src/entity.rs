//! Entity groups keyed by group id, with explicit per-group factories.
//!
//! The registry owns entity lifetime. Snapshots create entities implicitly the
//! first time an id is referenced; removal is left to the simulation.
//! BTreeMap keeps iteration order deterministic.

use crate::io::{ByteReader, ReadError};
use std::any::Any;
use std::collections::BTreeMap;
use tracing::debug;

/// Group identifier as carried on the wire.
pub type GroupId = u8;

/// Entity identifier, unique within its group.
pub type EntityId = i32;

/// Entity state that can be merged from a snapshot payload.
pub trait SyncEntity {
    /// Current id.
    fn id(&self) -> EntityId;

    /// Assign the id the server knows this entity by.
    fn reset_id(&mut self, id: EntityId);

    /// Merge state from `reader`.
    ///
    /// `timestamp` is the batch's logical ordering token; it is handed through
    /// untouched for the entity's own interpolation or staleness checks.
    fn read_state(&mut self, reader: &mut ByteReader<'_>, timestamp: i64) -> Result<(), ReadError>;

    /// Downcast support for callers that know the concrete type.
    fn as_any(&self) -> &dyn Any;
}

/// Constructor for a fresh instance of a group's entity type.
pub type EntityFactory = fn() -> Box<dyn SyncEntity>;

/// All live entities of one kind.
pub struct EntityGroup {
    id: GroupId,
    name: &'static str,
    factory: EntityFactory,
    entities: BTreeMap<EntityId, Box<dyn SyncEntity>>,
}

impl EntityGroup {
    /// Create an empty group.
    pub fn new(id: GroupId, name: &'static str, factory: EntityFactory) -> Self {
        Self {
            id,
            name,
            factory,
            entities: BTreeMap::new(),
        }
    }

    /// Group id.
    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Human-readable group name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Look up an entity by id.
    pub fn get_by_id(&self, id: EntityId) -> Option<&dyn SyncEntity> {
        self.entities.get(&id).map(|e| e.as_ref())
    }

    /// Look up an entity by id for mutation.
    pub fn get_by_id_mut(&mut self, id: EntityId) -> Option<&mut Box<dyn SyncEntity>> {
        self.entities.get_mut(&id)
    }

    /// Build a new, unregistered instance of this group's entity type.
    pub fn create_instance(&self) -> Box<dyn SyncEntity> {
        (self.factory)()
    }

    /// Register an entity under its current id, replacing any previous one.
    pub fn add(&mut self, entity: Box<dyn SyncEntity>) {
        self.entities.insert(entity.id(), entity);
    }

    /// Fetch the entity with `id`, creating and registering it first if unknown.
    pub fn get_or_create(&mut self, id: EntityId) -> &mut Box<dyn SyncEntity> {
        let factory = self.factory;
        let group = self.name;
        self.entities.entry(id).or_insert_with(|| {
            debug!(group, id, "creating entity first seen in snapshot");
            let mut entity = factory();
            entity.reset_id(id);
            entity
        })
    }

    /// Remove an entity.
    pub fn remove(&mut self, id: EntityId) -> Option<Box<dyn SyncEntity>> {
        self.entities.remove(&id)
    }

    /// Whether an entity with `id` is registered.
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Iterate entities in id order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn SyncEntity> {
        self.entities.values().map(|e| e.as_ref())
    }

    /// Number of entities in the group.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the group is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Drop every entity in the group.
    pub fn clear(&mut self) {
        self.entities.clear();
    }
}

/// Entity groups indexed by group id.
#[derive(Default)]
pub struct EntityRegistry {
    groups: BTreeMap<GroupId, EntityGroup>,
}

impl EntityRegistry {
    /// Create a registry with no groups.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a group and its factory. Replaces an existing group with the same id.
    pub fn register_group(&mut self, id: GroupId, name: &'static str, factory: EntityFactory) {
        self.groups.insert(id, EntityGroup::new(id, name, factory));
    }

    /// Look up a group.
    pub fn group(&self, id: GroupId) -> Option<&EntityGroup> {
        self.groups.get(&id)
    }

    /// Look up a group for mutation.
    pub fn group_mut(&mut self, id: GroupId) -> Option<&mut EntityGroup> {
        self.groups.get_mut(&id)
    }

    /// Iterate groups in id order.
    pub fn groups(&self) -> impl Iterator<Item = &EntityGroup> {
        self.groups.values()
    }

    /// Total entities across all groups.
    pub fn entity_count(&self) -> usize {
        self.groups.values().map(EntityGroup::len).sum()
    }

    /// Remove every entity while keeping the group table.
    pub fn clear_entities(&mut self) {
        for group in self.groups.values_mut() {
            group.clear();
        }
    }
}
