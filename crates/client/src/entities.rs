//! Built-in entity types.
//!
//! Real games register their own groups; these cover the demo tooling and
//! tests.

use skylane_core::{
    ByteReader, ByteWriter, EntityId, EntityRegistry, GroupId, ReadError, SyncEntity,
};
use std::any::Any;

/// Group id of [`Unit`].
pub const UNIT_GROUP: GroupId = 0;

/// Group id of [`PlayerEntity`].
pub const PLAYER_GROUP: GroupId = 1;

/// Register the built-in groups.
pub fn register_defaults(registry: &mut EntityRegistry) {
    registry.register_group(UNIT_GROUP, "unit", new_unit);
    registry.register_group(PLAYER_GROUP, "player", new_player);
}

fn new_unit() -> Box<dyn SyncEntity> {
    Box::new(Unit::default())
}

fn new_player() -> Box<dyn SyncEntity> {
    Box::new(PlayerEntity::default())
}

/// Mobile unit: position, facing and health.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Unit {
    /// Entity id.
    pub id: EntityId,
    /// World x.
    pub x: f32,
    /// World y.
    pub y: f32,
    /// Facing in degrees.
    pub rotation: f32,
    /// Remaining health.
    pub health: f32,
    /// Timestamp of the last applied batch.
    pub last_updated: i64,
}

impl Unit {
    /// Serialize the synced fields.
    pub fn write_state(&self, w: &mut ByteWriter) {
        w.f32(self.x).f32(self.y).f32(self.rotation).f32(self.health);
    }
}

impl SyncEntity for Unit {
    fn id(&self) -> EntityId {
        self.id
    }

    fn reset_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn read_state(&mut self, r: &mut ByteReader<'_>, timestamp: i64) -> Result<(), ReadError> {
        let x = r.f32()?;
        let y = r.f32()?;
        let rotation = r.f32()?;
        let health = r.f32()?;
        // Payload is always consumed; older batches leave state untouched.
        if timestamp < self.last_updated {
            return Ok(());
        }
        self.x = x;
        self.y = y;
        self.rotation = rotation;
        self.health = health;
        self.last_updated = timestamp;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Connected player.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerEntity {
    /// Entity id.
    pub id: EntityId,
    /// Display name.
    pub name: String,
    /// Cursor x.
    pub x: f32,
    /// Cursor y.
    pub y: f32,
}

impl PlayerEntity {
    /// Serialize the synced fields.
    pub fn write_state(&self, w: &mut ByteWriter) {
        w.str(&self.name).f32(self.x).f32(self.y);
    }
}

impl SyncEntity for PlayerEntity {
    fn id(&self) -> EntityId {
        self.id
    }

    fn reset_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn read_state(&mut self, r: &mut ByteReader<'_>, _timestamp: i64) -> Result<(), ReadError> {
        self.name = r.str()?;
        self.x = r.f32()?;
        self.y = r.f32()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_unit_batch_is_consumed_but_ignored() {
        let mut unit = Unit::default();
        let mut w = ByteWriter::new();
        Unit {
            x: 1.0,
            y: 2.0,
            rotation: 90.0,
            health: 50.0,
            ..Unit::default()
        }
        .write_state(&mut w);
        Unit {
            x: 9.0,
            ..Unit::default()
        }
        .write_state(&mut w);

        let mut r = ByteReader::new(w.as_slice());
        unit.read_state(&mut r, 10).unwrap();
        unit.read_state(&mut r, 5).unwrap();

        assert_eq!(r.remaining(), 0);
        assert_eq!(unit.x, 1.0);
        assert_eq!(unit.health, 50.0);
        assert_eq!(unit.last_updated, 10);
    }

    #[test]
    fn defaults_register_both_groups() {
        let mut registry = EntityRegistry::new();
        register_defaults(&mut registry);
        assert_eq!(registry.group(UNIT_GROUP).unwrap().name(), "unit");
        assert_eq!(registry.group(PLAYER_GROUP).unwrap().name(), "player");
    }
}
