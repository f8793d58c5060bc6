#![warn(missing_docs)]
//! Snapshot sync and replay for the skylane client.
//!
//! The packet table and frame codec are shared by live traffic and replay
//! files. [`SnapshotState`] turns snapshot packets into entity updates;
//! [`ReplayRecorder`] and [`ReplayPlayer`] capture and re-inject packets.

mod codec;
mod delta;
mod packet;
mod player;
mod replay;
mod snapshot;

pub use codec::{
    compute_schema_hash, decode_frame, encode_frame, encode_payload, FRAME_HEADER_LEN,
    MAX_PAYLOAD_LEN,
};
pub use delta::{DeltaDecoder, DeltaEncoder, DeltaError, MAX_TARGET_LEN};
pub use packet::{
    ConnectPacket, KickReason, Packet, PacketError, PacketKind, Reliability, RemoteCall,
    PROTOCOL_VERSION,
};
pub use player::{FinishReason, PlaybackClock, PlaybackEvent, ReplayPlayer};
pub use replay::{
    RecorderSettings, ReplayError, ReplayFrame, ReplayHeader, ReplayReader, ReplayRecorder,
    ReplaySummary, ReplayWriter, ANONYMOUS, REPLAY_EXTENSION, REPLAY_VERSION,
};
pub use snapshot::{
    GroupBatch, SnapshotEncoder, SnapshotError, SnapshotOutcome, SnapshotState, SnapshotStats,
    SnapshotWriter,
};
