//! Packet framing and schema hashing.
//!
//! Frame format: `[packet_id: u8][length: u16 BE][payload: bytes]`. Replay
//! frames use the same id/length/payload triple behind a timestamp.

use crate::packet::{Packet, PacketKind, PROTOCOL_VERSION};
use anyhow::{anyhow, Context, Result};
use blake3::Hash;
use skylane_core::ByteWriter;

/// Largest payload a frame length field can describe.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Bytes in a frame header.
pub const FRAME_HEADER_LEN: usize = 3;

/// Compute schema hash from the packet table.
///
/// Client and server refuse each other when this differs.
pub fn compute_schema_hash() -> u64 {
    let mut hasher = blake3::Hasher::new();

    hasher.update(&PROTOCOL_VERSION.to_le_bytes());

    // Packet table in id order
    for kind in PacketKind::ALL {
        hasher.update(&[kind.id()]);
        hasher.update(kind.name().as_bytes());
    }

    let hash: Hash = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(prefix)
}

/// Serialize `packet`'s payload into `scratch` (cleared first) and return it.
pub fn encode_payload<'a>(packet: &Packet, scratch: &'a mut ByteWriter) -> &'a [u8] {
    scratch.clear();
    packet.write_payload(scratch);
    scratch.as_slice()
}

/// Header for a frame carrying `len` payload bytes, or `None` past the limit.
pub(crate) fn frame_header(packet_id: u8, len: usize) -> Option<[u8; FRAME_HEADER_LEN]> {
    let len = u16::try_from(len).ok()?.to_be_bytes();
    Some([packet_id, len[0], len[1]])
}

/// Packet id and payload length from a frame header.
pub(crate) fn parse_frame_header(head: [u8; FRAME_HEADER_LEN]) -> (u8, usize) {
    (head[0], u16::from_be_bytes([head[1], head[2]]) as usize)
}

/// Encode a packet as one frame.
pub fn encode_frame(packet: &Packet) -> Result<Vec<u8>> {
    let mut scratch = ByteWriter::new();
    let payload = encode_payload(packet, &mut scratch);
    let header = frame_header(packet.id(), payload.len()).ok_or_else(|| {
        anyhow!(
            "{} payload of {} bytes exceeds frame limit {}",
            packet.kind(),
            payload.len(),
            MAX_PAYLOAD_LEN
        )
    })?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Decode one frame from the start of `data`.
///
/// Returns the packet and the number of bytes consumed.
pub fn decode_frame(data: &[u8]) -> Result<(Packet, usize)> {
    if data.len() < FRAME_HEADER_LEN {
        return Err(anyhow!(
            "Frame too short: {} bytes (minimum {})",
            data.len(),
            FRAME_HEADER_LEN
        ));
    }

    let (id, length) = parse_frame_header([data[0], data[1], data[2]]);
    let end = FRAME_HEADER_LEN + length;
    if data.len() < end {
        return Err(anyhow!(
            "Incomplete frame: expected {} bytes, got {}",
            end,
            data.len()
        ));
    }

    let packet = Packet::read(id, &data[FRAME_HEADER_LEN..end])
        .with_context(|| format!("Failed to decode packet id {id}"))?;
    Ok((packet, end))
}
