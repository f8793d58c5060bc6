//! Client side of the snapshot protocol.
//!
//! Snapshot `0` carries a full world encoding. Every other id is a delta
//! against the last buffer this client decoded, so deltas chain. A snapshot
//! whose id equals the last accepted id is dropped without side effects.
//!
//! Full buffer layout:
//!
//! ```text
//! i8  core_count
//!     core_count × { i32 tile_pos, ItemModule }
//! i8  group_count
//!     group_count × { u8 group_id, i16 entity_count, i64 timestamp,
//!                     entity_count × { i32 entity_id, entity payload } }
//! ```

use crate::delta::{DeltaDecoder, DeltaEncoder, DeltaError};
use crate::packet::Packet;
use skylane_core::{
    ByteReader, ByteWriter, CoreStorage, EntityId, EntityRegistry, GroupId, ItemModule,
    ReadError, TilePos,
};
use thiserror::Error;
use tracing::{debug, warn};

/// Reasons a snapshot could not be (fully) applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    /// Delta received before any full snapshot.
    #[error("delta snapshot {0} arrived without a full base")]
    MissingBase(i32),

    /// Delta stream rejected by the decoder.
    #[error("delta decode failed: {0}")]
    Delta(#[from] DeltaError),

    /// Decoded buffer ended early or held a bad field.
    #[error("snapshot parse failed: {0}")]
    Read(#[from] ReadError),

    /// Batch referenced a group with no registered factory.
    #[error("unknown entity group {0}")]
    UnknownGroup(GroupId),
}

/// What a snapshot parse touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    /// Core tiles whose items were replaced.
    pub cores: usize,
    /// Group batches processed.
    pub groups: usize,
    /// Entities whose state was read.
    pub entities: usize,
    /// Entities first seen in this snapshot.
    pub created: usize,
}

/// Result of [`SnapshotState::on_snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// Id matched the last accepted id; nothing changed.
    Duplicate,
    /// Snapshot decoded and parsed completely.
    Applied(SnapshotStats),
    /// Snapshot could not be decoded; snapshot state is unchanged.
    Rejected(SnapshotError),
    /// Snapshot was accepted but parsing stopped early. Everything before the
    /// failure point has been applied.
    Partial {
        /// Work done before the failure.
        stats: SnapshotStats,
        /// Why parsing stopped.
        error: SnapshotError,
    },
}

/// Rolling snapshot state kept for one connection.
#[derive(Debug, Default)]
pub struct SnapshotState {
    last_snapshot_id: Option<i32>,
    last_full: Vec<u8>,
    has_base: bool,
    decoder: DeltaDecoder,
    next_ack_seq: i32,
}

impl SnapshotState {
    /// Fresh state: no snapshot accepted yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the last accepted snapshot.
    pub fn last_snapshot_id(&self) -> Option<i32> {
        self.last_snapshot_id
    }

    /// Last fully decoded buffer (empty before the first snapshot).
    pub fn last_full(&self) -> &[u8] {
        &self.last_full
    }

    /// Forget everything, as on a new connection.
    pub fn reset(&mut self) {
        self.last_snapshot_id = None;
        self.last_full.clear();
        self.has_base = false;
        self.next_ack_seq = 0;
    }

    /// Apply one snapshot to `registry` and `cores`.
    pub fn on_snapshot(
        &mut self,
        buffer: &[u8],
        snapshot_id: i32,
        registry: &mut EntityRegistry,
        cores: &mut CoreStorage,
    ) -> SnapshotOutcome {
        if self.last_snapshot_id == Some(snapshot_id) {
            debug!(snapshot_id, "duplicate snapshot ignored");
            return SnapshotOutcome::Duplicate;
        }

        if snapshot_id == 0 {
            self.last_full.clear();
            self.last_full.extend_from_slice(buffer);
        } else {
            if !self.has_base {
                return SnapshotOutcome::Rejected(SnapshotError::MissingBase(snapshot_id));
            }
            match self.decoder.decode(&self.last_full, buffer) {
                // The decoder reuses its output buffer, so keep our own copy.
                Ok(decoded) => {
                    let decoded = decoded.to_vec();
                    self.last_full = decoded;
                }
                Err(err) => return SnapshotOutcome::Rejected(err.into()),
            }
        }
        self.has_base = true;
        self.last_snapshot_id = Some(snapshot_id);

        let mut stats = SnapshotStats::default();
        match parse_snapshot(&self.last_full, registry, cores, &mut stats) {
            Ok(()) => {
                debug!(
                    snapshot_id,
                    bytes = self.last_full.len(),
                    entities = stats.entities,
                    created = stats.created,
                    "snapshot applied"
                );
                SnapshotOutcome::Applied(stats)
            }
            Err(error) => {
                warn!(snapshot_id, %error, ?stats, "snapshot partially applied");
                SnapshotOutcome::Partial { stats, error }
            }
        }
    }

    /// Build the periodic acknowledgement packet.
    pub fn ack(&mut self) -> Packet {
        let packet = Packet::ClientSnapshot {
            last_snapshot: self.last_snapshot_id.unwrap_or(-1),
            snap_id: self.next_ack_seq,
        };
        self.next_ack_seq = self.next_ack_seq.wrapping_add(1);
        packet
    }
}

fn parse_snapshot(
    full: &[u8],
    registry: &mut EntityRegistry,
    cores: &mut CoreStorage,
    stats: &mut SnapshotStats,
) -> Result<(), SnapshotError> {
    let mut r = ByteReader::new(full);

    let core_count = r.i8()?;
    for _ in 0..core_count.max(0) {
        let pos = r.i32()?;
        cores.items_mut(pos).read(&mut r)?;
        stats.cores += 1;
    }

    let group_count = r.i8()?;
    for _ in 0..group_count.max(0) {
        let group_id = r.u8()?;
        let amount = r.i16()?;
        let timestamp = r.i64()?;
        let group = registry
            .group_mut(group_id)
            .ok_or(SnapshotError::UnknownGroup(group_id))?;

        for _ in 0..amount.max(0) {
            let id = r.i32()?;
            if !group.contains(id) {
                stats.created += 1;
            }
            group.get_or_create(id).read_state(&mut r, timestamp)?;
            stats.entities += 1;
        }
        stats.groups += 1;
    }

    Ok(())
}

/// One group's batch inside a full snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupBatch {
    /// Group the entities belong to.
    pub group: GroupId,
    /// Timestamp shared by every entity in the batch.
    pub timestamp: i64,
    /// `(entity id, state payload)` pairs.
    pub entities: Vec<(EntityId, Vec<u8>)>,
}

impl GroupBatch {
    /// Empty batch.
    pub fn new(group: GroupId, timestamp: i64) -> Self {
        Self {
            group,
            timestamp,
            entities: Vec::new(),
        }
    }

    /// Append an entity's serialized state.
    pub fn push(&mut self, id: EntityId, state: Vec<u8>) -> &mut Self {
        self.entities.push((id, state));
        self
    }
}

/// Builds full snapshot buffers (server side and tooling).
#[derive(Debug, Default, Clone)]
pub struct SnapshotWriter {
    cores: Vec<(TilePos, ItemModule)>,
    groups: Vec<GroupBatch>,
}

impl SnapshotWriter {
    /// Empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a core tile's items.
    pub fn core(&mut self, pos: TilePos, items: ItemModule) -> &mut Self {
        self.cores.push((pos, items));
        self
    }

    /// Add a group batch.
    pub fn batch(&mut self, batch: GroupBatch) -> &mut Self {
        self.groups.push(batch);
        self
    }

    /// Serialize. Sections are capped at their count field's range.
    pub fn finish(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();

        let cores = capped(self.cores.len(), i8::MAX as usize, "cores");
        w.i8(cores as i8);
        for (pos, items) in &self.cores[..cores] {
            w.i32(*pos);
            items.write(&mut w);
        }

        let groups = capped(self.groups.len(), i8::MAX as usize, "groups");
        w.i8(groups as i8);
        for batch in &self.groups[..groups] {
            let amount = capped(batch.entities.len(), i16::MAX as usize, "entities");
            w.u8(batch.group).i16(amount as i16).i64(batch.timestamp);
            for (id, state) in &batch.entities[..amount] {
                w.i32(*id).bytes(state);
            }
        }

        w.into_vec()
    }
}

fn capped(len: usize, max: usize, section: &str) -> usize {
    if len > max {
        warn!(section, len, max, "snapshot section truncated");
        max
    } else {
        len
    }
}

/// Assigns snapshot ids and delta-encodes successive full buffers.
#[derive(Debug, Default)]
pub struct SnapshotEncoder {
    base: Option<Vec<u8>>,
    next_id: i32,
    encoder: DeltaEncoder,
}

impl SnapshotEncoder {
    /// Encoder whose first snapshot will be full.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode the next full state. Returns `(snapshot_id, wire bytes)`.
    pub fn next(&mut self, full: &[u8]) -> (i32, Vec<u8>) {
        let (id, data) = match &self.base {
            None => (0, full.to_vec()),
            Some(base) => {
                let id = self.next_id.max(1);
                (id, self.encoder.encode(base, full))
            }
        };
        self.base = Some(full.to_vec());
        self.next_id = id.wrapping_add(1).max(1);
        (id, data)
    }

    /// Force the next snapshot to be full (id 0).
    pub fn reset(&mut self) {
        self.base = None;
        self.next_id = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skylane_core::SyncEntity;
    use std::any::Any;

    #[derive(Default)]
    struct Counter {
        id: EntityId,
        value: i32,
        reads: u32,
        last_timestamp: i64,
    }

    impl SyncEntity for Counter {
        fn id(&self) -> EntityId {
            self.id
        }

        fn reset_id(&mut self, id: EntityId) {
            self.id = id;
        }

        fn read_state(
            &mut self,
            reader: &mut ByteReader<'_>,
            timestamp: i64,
        ) -> Result<(), ReadError> {
            self.value = reader.i32()?;
            self.reads += 1;
            self.last_timestamp = timestamp;
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn counter() -> Box<dyn SyncEntity> {
        Box::new(Counter::default())
    }

    fn registry() -> EntityRegistry {
        let mut registry = EntityRegistry::new();
        registry.register_group(1, "counter", counter);
        registry
    }

    fn counter_at(registry: &EntityRegistry, id: EntityId) -> &Counter {
        registry
            .group(1)
            .unwrap()
            .get_by_id(id)
            .unwrap()
            .as_any()
            .downcast_ref::<Counter>()
            .unwrap()
    }

    fn full_snapshot(values: &[(EntityId, i32)], timestamp: i64) -> Vec<u8> {
        let mut batch = GroupBatch::new(1, timestamp);
        for (id, value) in values {
            batch.push(*id, value.to_be_bytes().to_vec());
        }
        let mut items = ItemModule::new();
        items.set(3, 100);
        SnapshotWriter::new().core(77, items).batch(batch).finish()
    }

    #[test]
    fn test_full_snapshot_creates_entities() {
        let mut state = SnapshotState::new();
        let mut registry = registry();
        let mut cores = CoreStorage::new();

        let buf = full_snapshot(&[(10, 1), (11, 2)], 500);
        let outcome = state.on_snapshot(&buf, 0, &mut registry, &mut cores);

        assert_eq!(
            outcome,
            SnapshotOutcome::Applied(SnapshotStats {
                cores: 1,
                groups: 1,
                entities: 2,
                created: 2,
            })
        );
        assert_eq!(counter_at(&registry, 11).value, 2);
        assert_eq!(counter_at(&registry, 11).last_timestamp, 500);
        assert_eq!(cores.items(77).unwrap().get(3), 100);
        assert_eq!(state.last_snapshot_id(), Some(0));
        assert_eq!(state.last_full(), buf.as_slice());
    }

    #[test]
    fn test_duplicate_is_noop() {
        let mut state = SnapshotState::new();
        let mut registry = registry();
        let mut cores = CoreStorage::new();

        let buf = full_snapshot(&[(10, 1)], 0);
        state.on_snapshot(&buf, 0, &mut registry, &mut cores);

        // Different bytes, same id: must not be read at all
        let other = full_snapshot(&[(10, 99), (12, 5)], 0);
        let outcome = state.on_snapshot(&other, 0, &mut registry, &mut cores);

        assert_eq!(outcome, SnapshotOutcome::Duplicate);
        assert_eq!(registry.entity_count(), 1);
        assert_eq!(counter_at(&registry, 10).value, 1);
        assert_eq!(counter_at(&registry, 10).reads, 1);
        assert_eq!(state.last_full(), buf.as_slice());
    }

    #[test]
    fn test_chained_deltas_match_encoder() {
        let mut encoder = SnapshotEncoder::new();
        let mut state = SnapshotState::new();
        let mut registry = registry();
        let mut cores = CoreStorage::new();

        let states = [
            full_snapshot(&[(1, 0)], 0),
            full_snapshot(&[(1, 5), (2, 7)], 1),
            full_snapshot(&[(1, 6), (2, 7)], 2),
            full_snapshot(&[(1, 6), (2, 8), (3, 1)], 3),
        ];

        for (i, full) in states.iter().enumerate() {
            let (id, wire) = encoder.next(full);
            assert_eq!(id, i as i32);
            let outcome = state.on_snapshot(&wire, id, &mut registry, &mut cores);
            assert!(matches!(outcome, SnapshotOutcome::Applied(_)), "{outcome:?}");
            assert_eq!(state.last_full(), full.as_slice());
        }

        assert_eq!(registry.entity_count(), 3);
        assert_eq!(counter_at(&registry, 2).value, 8);
        assert_eq!(counter_at(&registry, 3).last_timestamp, 3);
    }

    #[test]
    fn test_reappearing_entity_not_duplicated() {
        let mut encoder = SnapshotEncoder::new();
        let mut state = SnapshotState::new();
        let mut registry = registry();
        let mut cores = CoreStorage::new();

        let (id0, wire0) = encoder.next(&full_snapshot(&[(4, 1)], 0));
        let (id1, wire1) = encoder.next(&full_snapshot(&[(4, 2)], 1));
        state.on_snapshot(&wire0, id0, &mut registry, &mut cores);
        let outcome = state.on_snapshot(&wire1, id1, &mut registry, &mut cores);

        let SnapshotOutcome::Applied(stats) = outcome else {
            panic!("expected applied, got {outcome:?}");
        };
        assert_eq!(stats.created, 0);
        assert_eq!(registry.group(1).unwrap().len(), 1);
        assert_eq!(counter_at(&registry, 4).reads, 2);
        assert_eq!(counter_at(&registry, 4).value, 2);
    }

    #[test]
    fn test_delta_without_base_rejected() {
        let mut state = SnapshotState::new();
        let mut registry = registry();
        let mut cores = CoreStorage::new();

        let outcome = state.on_snapshot(&[0, 0], 3, &mut registry, &mut cores);
        assert_eq!(outcome, SnapshotOutcome::Rejected(SnapshotError::MissingBase(3)));
        assert_eq!(state.last_snapshot_id(), None);
    }

    #[test]
    fn test_bad_delta_keeps_previous_state() {
        let mut state = SnapshotState::new();
        let mut registry = registry();
        let mut cores = CoreStorage::new();

        let buf = full_snapshot(&[(1, 1)], 0);
        state.on_snapshot(&buf, 0, &mut registry, &mut cores);

        let outcome = state.on_snapshot(&[0x05, 0x7f], 1, &mut registry, &mut cores);
        assert!(matches!(
            outcome,
            SnapshotOutcome::Rejected(SnapshotError::Delta(_))
        ));
        assert_eq!(state.last_snapshot_id(), Some(0));
        assert_eq!(state.last_full(), buf.as_slice());
    }

    #[test]
    fn test_truncated_snapshot_is_partial() {
        let mut state = SnapshotState::new();
        let mut registry = registry();
        let mut cores = CoreStorage::new();

        let mut buf = full_snapshot(&[(1, 1), (2, 2)], 0);
        buf.truncate(buf.len() - 2);
        let outcome = state.on_snapshot(&buf, 0, &mut registry, &mut cores);

        let SnapshotOutcome::Partial { stats, error } = outcome else {
            panic!("expected partial, got {outcome:?}");
        };
        assert!(matches!(error, SnapshotError::Read(_)));
        assert_eq!(stats.entities, 1);
        // Entity 2 was created before its payload ran out
        assert_eq!(registry.entity_count(), 2);
        assert_eq!(counter_at(&registry, 1).value, 1);
        assert_eq!(state.last_snapshot_id(), Some(0));
    }

    #[test]
    fn test_unknown_group_is_partial() {
        let mut state = SnapshotState::new();
        let mut registry = registry();
        let mut cores = CoreStorage::new();

        let mut batch = GroupBatch::new(9, 0);
        batch.push(1, vec![0, 0, 0, 1]);
        let buf = SnapshotWriter::new().batch(batch).finish();

        let outcome = state.on_snapshot(&buf, 0, &mut registry, &mut cores);
        assert!(matches!(
            outcome,
            SnapshotOutcome::Partial {
                error: SnapshotError::UnknownGroup(9),
                ..
            }
        ));
    }

    #[test]
    fn test_ack_carries_last_id() {
        let mut state = SnapshotState::new();
        assert_eq!(
            state.ack(),
            Packet::ClientSnapshot {
                last_snapshot: -1,
                snap_id: 0
            }
        );

        let mut registry = registry();
        let mut cores = CoreStorage::new();
        state.on_snapshot(&full_snapshot(&[], 0), 0, &mut registry, &mut cores);
        assert_eq!(
            state.ack(),
            Packet::ClientSnapshot {
                last_snapshot: 0,
                snap_id: 1
            }
        );

        state.reset();
        assert_eq!(
            state.ack(),
            Packet::ClientSnapshot {
                last_snapshot: -1,
                snap_id: 0
            }
        );
    }

    #[test]
    fn test_encoder_reset_sends_full() {
        let mut encoder = SnapshotEncoder::new();
        assert_eq!(encoder.next(b"abc").0, 0);
        assert_eq!(encoder.next(b"abd").0, 1);
        encoder.reset();
        let (id, data) = encoder.next(b"xyz");
        assert_eq!(id, 0);
        assert_eq!(data, b"xyz");
    }
}
