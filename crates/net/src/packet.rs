//! Packet kinds and their wire payloads.
//!
//! The id table is shared by live traffic and replay files; changing an id
//! breaks every existing recording.

use serde::{Deserialize, Serialize};
use skylane_core::{ByteReader, ByteWriter, ReadError};
use std::fmt;
use thiserror::Error;

/// Protocol version sent in the connect handshake.
pub const PROTOCOL_VERSION: i32 = 3;

/// Errors raised while decoding a packet payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    /// Id not present in the packet table.
    #[error("unknown packet id {0}")]
    UnknownId(u8),

    /// Remote-call method not present in the method table.
    #[error("unknown remote method {0}")]
    UnknownRemoteMethod(u8),

    /// Kick reason outside the known set.
    #[error("unknown kick reason {0}")]
    UnknownKickReason(u8),

    /// Payload ended early or held an invalid field.
    #[error("malformed payload: {0}")]
    Read(#[from] ReadError),
}

/// Delivery guarantee requested when sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reliability {
    /// Ordered, retransmitted (TCP-like).
    Reliable,
    /// Best effort (UDP-like).
    Unreliable,
}

/// Packet kind identifier for the packet table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum PacketKind {
    /// Transport connected (generated locally, never sent).
    Connect = 0,
    /// Transport disconnected (generated locally, never sent).
    Disconnect = 1,
    /// Bulk world data streamed after connecting.
    WorldStream = 2,
    /// Client handshake.
    ConnectPacket = 3,
    /// Periodic client acknowledgement of the last snapshot.
    ClientSnapshot = 4,
    /// Remote procedure call.
    Invoke = 5,
}

impl PacketKind {
    /// Every kind in id order.
    pub const ALL: [PacketKind; 6] = [
        PacketKind::Connect,
        PacketKind::Disconnect,
        PacketKind::WorldStream,
        PacketKind::ConnectPacket,
        PacketKind::ClientSnapshot,
        PacketKind::Invoke,
    ];

    /// Wire id.
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Stable name, used in logs and replay statistics.
    pub fn name(self) -> &'static str {
        match self {
            PacketKind::Connect => "Connect",
            PacketKind::Disconnect => "Disconnect",
            PacketKind::WorldStream => "WorldStream",
            PacketKind::ConnectPacket => "ConnectPacket",
            PacketKind::ClientSnapshot => "ClientSnapshot",
            PacketKind::Invoke => "Invoke",
        }
    }
}

impl TryFrom<u8> for PacketKind {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, PacketError> {
        PacketKind::ALL
            .get(value as usize)
            .copied()
            .ok_or(PacketError::UnknownId(value))
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why the server kicked the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum KickReason {
    /// Kicked by an admin.
    Kick = 0,
    /// Client build is older than the server.
    ClientOutdated = 1,
    /// Server build is older than the client.
    ServerOutdated = 2,
    /// Client is banned.
    Banned = 3,
    /// Match ended.
    GameOver = 4,
    /// Reconnected too soon after a kick.
    RecentKick = 5,
    /// Display name taken.
    NameInUse = 6,
    /// Unique id already connected.
    IdInUse = 7,
    /// Display name empty.
    NameEmpty = 8,
    /// Modified client rejected.
    CustomClient = 9,
    /// Server shut down.
    ServerClose = 10,
    /// Server restarting.
    ServerRestarting = 11,
}

impl KickReason {
    const ALL: [KickReason; 12] = [
        KickReason::Kick,
        KickReason::ClientOutdated,
        KickReason::ServerOutdated,
        KickReason::Banned,
        KickReason::GameOver,
        KickReason::RecentKick,
        KickReason::NameInUse,
        KickReason::IdInUse,
        KickReason::NameEmpty,
        KickReason::CustomClient,
        KickReason::ServerClose,
        KickReason::ServerRestarting,
    ];

    /// Quiet reasons disconnect without telling the user.
    pub fn is_quiet(self) -> bool {
        matches!(self, KickReason::GameOver | KickReason::ServerRestarting)
    }

    /// Message key the host localizes.
    pub fn key(self) -> &'static str {
        match self {
            KickReason::Kick => "server.kicked.kick",
            KickReason::ClientOutdated => "server.kicked.client_outdated",
            KickReason::ServerOutdated => "server.kicked.server_outdated",
            KickReason::Banned => "server.kicked.banned",
            KickReason::GameOver => "server.kicked.game_over",
            KickReason::RecentKick => "server.kicked.recent_kick",
            KickReason::NameInUse => "server.kicked.name_in_use",
            KickReason::IdInUse => "server.kicked.id_in_use",
            KickReason::NameEmpty => "server.kicked.name_empty",
            KickReason::CustomClient => "server.kicked.custom_client",
            KickReason::ServerClose => "server.kicked.server_close",
            KickReason::ServerRestarting => "server.kicked.server_restarting",
        }
    }
}

impl TryFrom<u8> for KickReason {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, PacketError> {
        KickReason::ALL
            .get(value as usize)
            .copied()
            .ok_or(PacketError::UnknownKickReason(value))
    }
}

/// Client handshake payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPacket {
    /// Protocol version.
    pub version: i32,
    /// Hash of the packet table, see [`crate::compute_schema_hash`].
    pub schema_hash: u64,
    /// Display name.
    pub name: String,
    /// Whether the client runs on a mobile platform.
    pub mobile: bool,
    /// Player color as RGBA8888.
    pub color: i32,
    /// Locally obtained unique id.
    pub uuid: String,
}

/// A packet as handed to the receive entry point or to `Net::send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Transport connected to `address`.
    Connect {
        /// Remote address as text.
        address: String,
    },
    /// Transport disconnected.
    Disconnect,
    /// Serialized world sent once after connecting.
    WorldStream {
        /// Raw world bytes, handed to the host loader.
        data: Vec<u8>,
    },
    /// Handshake.
    ConnectPacket(ConnectPacket),
    /// Snapshot acknowledgement.
    ClientSnapshot {
        /// Last applied snapshot id, `-1` when none.
        last_snapshot: i32,
        /// Locally incremented sequence number.
        snap_id: i32,
    },
    /// Remote call; see [`RemoteCall`] for the known methods.
    Invoke {
        /// Method id.
        method: u8,
        /// Method arguments.
        payload: Vec<u8>,
    },
}

impl Packet {
    /// Kind of this packet.
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Connect { .. } => PacketKind::Connect,
            Packet::Disconnect => PacketKind::Disconnect,
            Packet::WorldStream { .. } => PacketKind::WorldStream,
            Packet::ConnectPacket(_) => PacketKind::ConnectPacket,
            Packet::ClientSnapshot { .. } => PacketKind::ClientSnapshot,
            Packet::Invoke { .. } => PacketKind::Invoke,
        }
    }

    /// Wire id of this packet's kind.
    pub fn id(&self) -> u8 {
        self.kind().id()
    }

    /// Delivery guarantee used when the caller has no preference.
    pub fn default_reliability(&self) -> Reliability {
        match self {
            Packet::ClientSnapshot { .. } => Reliability::Unreliable,
            Packet::Invoke { method, .. } if *method == RemoteCall::SNAPSHOT => {
                Reliability::Unreliable
            }
            _ => Reliability::Reliable,
        }
    }

    /// Serialize the payload (without id or length).
    pub fn write_payload(&self, w: &mut ByteWriter) {
        match self {
            Packet::Connect { address } => {
                w.str(address);
            }
            Packet::Disconnect => {}
            Packet::WorldStream { data } => {
                w.bytes(data);
            }
            Packet::ConnectPacket(c) => {
                w.i32(c.version)
                    .i64(c.schema_hash as i64)
                    .str(&c.name)
                    .bool(c.mobile)
                    .i32(c.color)
                    .str(&c.uuid);
            }
            Packet::ClientSnapshot {
                last_snapshot,
                snap_id,
            } => {
                w.i32(*last_snapshot).i32(*snap_id);
            }
            Packet::Invoke { method, payload } => {
                w.u8(*method).bytes(payload);
            }
        }
    }

    /// Build a packet of kind `id` from its payload bytes.
    pub fn read(id: u8, payload: &[u8]) -> Result<Packet, PacketError> {
        let kind = PacketKind::try_from(id)?;
        let mut r = ByteReader::new(payload);
        let packet = match kind {
            PacketKind::Connect => Packet::Connect { address: r.str()? },
            PacketKind::Disconnect => Packet::Disconnect,
            PacketKind::WorldStream => Packet::WorldStream {
                data: r.rest().to_vec(),
            },
            PacketKind::ConnectPacket => Packet::ConnectPacket(ConnectPacket {
                version: r.i32()?,
                schema_hash: r.i64()? as u64,
                name: r.str()?,
                mobile: r.bool()?,
                color: r.i32()?,
                uuid: r.str()?,
            }),
            PacketKind::ClientSnapshot => Packet::ClientSnapshot {
                last_snapshot: r.i32()?,
                snap_id: r.i32()?,
            },
            PacketKind::Invoke => Packet::Invoke {
                method: r.u8()?,
                payload: r.rest().to_vec(),
            },
        };
        Ok(packet)
    }
}

/// Remote calls carried inside [`Packet::Invoke`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    /// Server kicked this client.
    Kick(KickReason),
    /// World snapshot, full when `snapshot_id == 0`, delta otherwise.
    Snapshot {
        /// Snapshot id.
        snapshot_id: i32,
        /// Encoded snapshot bytes.
        data: Vec<u8>,
    },
    /// Client finished loading the world.
    ConnectConfirm,
}

impl RemoteCall {
    /// Method id of [`RemoteCall::Kick`].
    pub const KICK: u8 = 0;
    /// Method id of [`RemoteCall::Snapshot`].
    pub const SNAPSHOT: u8 = 1;
    /// Method id of [`RemoteCall::ConnectConfirm`].
    pub const CONNECT_CONFIRM: u8 = 2;

    /// Decode a call from an invoke packet's method and payload.
    pub fn parse(method: u8, payload: &[u8]) -> Result<RemoteCall, PacketError> {
        let mut r = ByteReader::new(payload);
        match method {
            Self::KICK => Ok(RemoteCall::Kick(KickReason::try_from(r.u8()?)?)),
            Self::SNAPSHOT => {
                let snapshot_id = r.i32()?;
                let len = r.i32()?.max(0) as usize;
                let data = r.bytes(len)?.to_vec();
                Ok(RemoteCall::Snapshot { snapshot_id, data })
            }
            Self::CONNECT_CONFIRM => Ok(RemoteCall::ConnectConfirm),
            other => Err(PacketError::UnknownRemoteMethod(other)),
        }
    }

    /// Wrap the call in an invoke packet.
    pub fn into_packet(self) -> Packet {
        let mut w = ByteWriter::new();
        let method = match &self {
            RemoteCall::Kick(reason) => {
                w.u8(*reason as u8);
                Self::KICK
            }
            RemoteCall::Snapshot { snapshot_id, data } => {
                w.i32(*snapshot_id).i32(data.len() as i32).bytes(data);
                Self::SNAPSHOT
            }
            RemoteCall::ConnectConfirm => Self::CONNECT_CONFIRM,
        };
        Packet::Invoke {
            method,
            payload: w.into_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reencode(packet: &Packet) -> Packet {
        let mut w = ByteWriter::new();
        packet.write_payload(&mut w);
        Packet::read(packet.id(), w.as_slice()).expect("decode")
    }

    #[test]
    fn ids_are_stable() {
        assert_eq!(PacketKind::Connect.id(), 0);
        assert_eq!(PacketKind::WorldStream.id(), 2);
        assert_eq!(PacketKind::Invoke.id(), 5);
        for kind in PacketKind::ALL {
            assert_eq!(PacketKind::try_from(kind.id()).unwrap(), kind);
        }
        assert_eq!(PacketKind::try_from(6), Err(PacketError::UnknownId(6)));
    }

    #[test]
    fn handshake_payload() {
        let packet = Packet::ConnectPacket(ConnectPacket {
            version: PROTOCOL_VERSION,
            schema_hash: u64::MAX - 3,
            name: "Bob".into(),
            mobile: true,
            color: -1,
            uuid: "AAECAwQFBgc=".into(),
        });
        assert_eq!(reencode(&packet), packet);
    }

    #[test]
    fn invoke_keeps_opaque_payload() {
        let packet = Packet::read(5, &[9, 9, 9]).unwrap();
        assert_eq!(
            packet,
            Packet::Invoke {
                method: 9,
                payload: vec![9, 9]
            }
        );
        assert_eq!(
            RemoteCall::parse(9, &[9, 9]),
            Err(PacketError::UnknownRemoteMethod(9))
        );
    }

    #[test]
    fn snapshot_call_through_invoke() {
        let call = RemoteCall::Snapshot {
            snapshot_id: 12,
            data: vec![1, 2, 3, 4],
        };
        let packet = call.clone().into_packet();
        assert_eq!(packet.default_reliability(), Reliability::Unreliable);

        match reencode(&packet) {
            Packet::Invoke { method, payload } => {
                assert_eq!(RemoteCall::parse(method, &payload).unwrap(), call);
            }
            other => panic!("expected invoke, got {other:?}"),
        }
    }

    #[test]
    fn kick_reasons() {
        let packet = RemoteCall::Kick(KickReason::GameOver).into_packet();
        let Packet::Invoke { method, payload } = packet else {
            panic!("expected invoke");
        };
        let call = RemoteCall::parse(method, &payload).unwrap();
        assert_eq!(call, RemoteCall::Kick(KickReason::GameOver));
        assert!(KickReason::GameOver.is_quiet());
        assert!(!KickReason::Banned.is_quiet());
        assert_eq!(
            RemoteCall::parse(RemoteCall::KICK, &[200]),
            Err(PacketError::UnknownKickReason(200))
        );
    }

    #[test]
    fn truncated_payload_is_an_error() {
        assert!(matches!(
            Packet::read(PacketKind::ClientSnapshot.id(), &[0, 0, 0]),
            Err(PacketError::Read(_))
        ));
    }
}
