#![warn(missing_docs)]
//! Core primitives shared across the workspace.
//!
//! Holds the big-endian binary codec every wire and file format is built on,
//! the entity registry snapshots are decoded into, and the per-tile item
//! storage carried by the core-items snapshot section.

pub mod entity;
pub mod io;
pub mod items;

use serde::{Deserialize, Serialize};

// Re-export commonly used types
pub use entity::{EntityFactory, EntityGroup, EntityId, EntityRegistry, GroupId, SyncEntity};
pub use io::{ByteReader, ByteWriter, ReadError};
pub use items::{CoreStorage, ItemModule, TilePos};

/// Simulation ticks per second the client is paced at.
pub const TICKS_PER_SECOND: f32 = 60.0;

/// Fixed tick counter (60 TPS => ~16.6 ms per tick).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SimTick(pub u64);

impl SimTick {
    /// First tick in any timeline.
    pub const ZERO: Self = Self(0);

    /// Advance by `delta` ticks.
    pub fn advance(self, delta: u64) -> Self {
        Self(self.0 + delta)
    }
}

/// Convert a duration expressed in seconds into (fractional) ticks.
pub fn seconds_to_ticks(seconds: f32) -> f32 {
    seconds * TICKS_PER_SECOND
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_advance() {
        assert_eq!(SimTick::ZERO.advance(3), SimTick(3));
    }

    #[test]
    fn eighteen_seconds_in_ticks() {
        assert_eq!(seconds_to_ticks(18.0), 60.0 * 18.0);
    }
}
