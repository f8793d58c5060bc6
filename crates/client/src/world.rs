//! Client-side simulation state fed by snapshots.

use crate::entities;
use skylane_core::{CoreStorage, EntityRegistry, SimTick};

/// Entities, core storage and the local tick counter.
pub struct ClientWorld {
    /// Entity groups.
    pub registry: EntityRegistry,
    /// Items held by core tiles.
    pub cores: CoreStorage,
    tick: SimTick,
}

impl ClientWorld {
    /// World over an already populated group table.
    pub fn new(registry: EntityRegistry) -> Self {
        Self {
            registry,
            cores: CoreStorage::new(),
            tick: SimTick::ZERO,
        }
    }

    /// World with the built-in unit and player groups.
    pub fn with_default_groups() -> Self {
        let mut registry = EntityRegistry::new();
        entities::register_defaults(&mut registry);
        Self::new(registry)
    }

    /// Ticks simulated since the last reset.
    pub fn tick(&self) -> SimTick {
        self.tick
    }

    /// Count one simulated tick.
    pub fn step(&mut self) {
        self.tick = self.tick.advance(1);
    }

    /// Drop all entities and items, keeping the group table.
    pub fn reset(&mut self) {
        self.registry.clear_entities();
        self.cores.clear();
        self.tick = SimTick::ZERO;
    }
}

impl Default for ClientWorld {
    fn default() -> Self {
        Self::with_default_groups()
    }
}
