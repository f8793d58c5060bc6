//! Synthetic recorded session.
//!
//! A scripted "server" feeds a loopback client a world, a stream of chained
//! snapshots and a closing kick. The client records it like any live session.

use anyhow::{bail, Result};
use skylane_client::entities::{PlayerEntity, Unit, PLAYER_GROUP, UNIT_GROUP};
use skylane_client::{Client, ClientConfig, ClientWorld, HeadlessHost, LoopbackNet};
use skylane_core::{ByteWriter, ItemModule};
use skylane_net::{GroupBatch, KickReason, Packet, RemoteCall, SnapshotEncoder, SnapshotWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

const DEMO_ADDRESS: &str = "demo.local:6567";
const DEMO_NAME: &str = "demo";
const STEP: Duration = Duration::from_millis(10);

/// Record a demo session into `dir` and return the replay path.
pub fn record(dir: &Path, snapshots: u32, units: i32) -> Result<PathBuf> {
    let config = ClientConfig {
        player_name: DEMO_NAME.into(),
        record_replays: true,
        anonymize_replays: false,
        replay_dir: dir.to_path_buf(),
        ..ClientConfig::default()
    };
    let net = LoopbackNet::new();
    let server = net.handle();
    let mut client = Client::new(
        config,
        Box::new(net),
        Box::new(HeadlessHost::new(Some("demo-uuid".into()))),
        ClientWorld::with_default_groups(),
    )?;

    client.connect(DEMO_ADDRESS)?;
    client.update(1.0);
    let Some(path) = client.recorder().path().map(Path::to_path_buf) else {
        bail!("Client did not start recording");
    };

    server.push(Packet::WorldStream {
        data: vec![0; 256],
    });
    client.update(1.0);

    let mut encoder = SnapshotEncoder::new();
    for step in 0..snapshots {
        let (snapshot_id, data) = encoder.next(&world_state(step, units));
        server.push(RemoteCall::Snapshot { snapshot_id, data }.into_packet());
        client.update(1.0);
        std::thread::sleep(STEP);
    }

    server.push(RemoteCall::Kick(KickReason::GameOver).into_packet());
    client.update(1.0);
    client.update(1.0);
    if client.recorder().is_recording() {
        bail!("Recording still open after kick");
    }

    info!(
        path = ?path,
        snapshots,
        entities = client.world().registry.entity_count(),
        "demo recorded"
    );
    Ok(path)
}

/// Full world state at `step`: units circling the origin, one player cursor
/// and a core filling up.
fn world_state(step: u32, units: i32) -> Vec<u8> {
    let t = step as f32 * 0.05;
    let timestamp = i64::from(step);

    let mut unit_batch = GroupBatch::new(UNIT_GROUP, timestamp);
    for id in 0..units {
        let phase = t + id as f32;
        let unit = Unit {
            id,
            x: phase.cos() * 40.0,
            y: phase.sin() * 40.0,
            rotation: (phase.to_degrees() + 90.0) % 360.0,
            health: 100.0 - (step % 100) as f32,
            last_updated: timestamp,
        };
        let mut w = ByteWriter::new();
        unit.write_state(&mut w);
        unit_batch.push(id, w.into_vec());
    }

    let player = PlayerEntity {
        id: 1,
        name: DEMO_NAME.into(),
        x: t.sin() * 10.0,
        y: 0.0,
    };
    let mut w = ByteWriter::new();
    player.write_state(&mut w);
    let mut player_batch = GroupBatch::new(PLAYER_GROUP, timestamp);
    player_batch.push(player.id, w.into_vec());

    let mut items = ItemModule::new();
    items.set(0, step as i32);
    items.set(1, (step / 2) as i32);

    SnapshotWriter::new()
        .core(0, items)
        .batch(unit_batch)
        .batch(player_batch)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use skylane_net::ReplaySummary;
    use tempfile::tempdir;

    #[test]
    fn demo_replay_scans_clean() {
        let dir = tempdir().unwrap();
        let path = record(dir.path(), 10, 3).unwrap();
        let summary = ReplaySummary::scan(&path).unwrap();

        assert_eq!(summary.header.origin, DEMO_ADDRESS);
        assert_eq!(summary.header.name, DEMO_NAME);
        assert!(summary.truncated.is_none());
        // 10 snapshots, the kick and the disconnect it triggers
        assert_eq!(summary.frames, 12);
        assert_eq!(summary.counts.get("Invoke"), Some(&11));
        assert_eq!(summary.counts.get("Disconnect"), Some(&1));
    }

    #[test]
    fn later_states_differ() {
        assert_ne!(world_state(0, 2), world_state(1, 2));
        assert_eq!(world_state(3, 2), world_state(3, 2));
    }
}
