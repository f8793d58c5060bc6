//! Transport seam and an in-memory transport.

use anyhow::Result;
use parking_lot::Mutex;
use skylane_net::{decode_frame, encode_frame, Packet, Reliability};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

/// What the client needs from a network transport.
///
/// Inbound packets, including the transport's own `Connect`/`Disconnect`
/// notifications, are pulled through [`Net::receive`] and handed to
/// `Client::handle_received`.
pub trait Net {
    /// Open a client connection to `address`.
    fn connect(&mut self, address: &str) -> Result<()>;

    /// Send a packet to the server.
    fn send(&mut self, packet: &Packet, reliability: Reliability);

    /// Close the client connection, if any.
    fn disconnect(&mut self);

    /// Whether a client connection is open.
    fn is_client(&self) -> bool;

    /// Request a round-trip-time measurement.
    fn update_ping(&mut self);

    /// Tell the transport whether the world has finished loading.
    fn set_client_loaded(&mut self, loaded: bool);

    /// Drop connection state without emitting a disconnect.
    fn reset(&mut self);

    /// Next packet received from the server.
    fn receive(&mut self) -> Option<Packet> {
        None
    }
}

#[derive(Debug, Default)]
struct LoopbackState {
    client: bool,
    loaded: bool,
    pings: u32,
    // Outbound traffic as encoded wire frames.
    sent: Vec<(Vec<u8>, Reliability)>,
    inbox: VecDeque<Packet>,
}

/// In-memory transport.
///
/// Sent packets are framed with the wire codec and kept for inspection; a
/// packet that cannot be framed is dropped with a warning. "Server" packets
/// are queued through a [`LoopbackHandle`].
#[derive(Debug, Clone, Default)]
pub struct LoopbackNet {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackNet {
    /// Disconnected transport with an empty inbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle sharing this transport's state.
    pub fn handle(&self) -> LoopbackHandle {
        LoopbackHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Net for LoopbackNet {
    fn connect(&mut self, address: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.client = true;
        state.inbox.push_back(Packet::Connect {
            address: address.to_string(),
        });
        Ok(())
    }

    fn send(&mut self, packet: &Packet, reliability: Reliability) {
        match encode_frame(packet) {
            Ok(frame) => {
                debug!(kind = %packet.kind(), ?reliability, len = frame.len(), "loopback send");
                self.state.lock().sent.push((frame, reliability));
            }
            Err(err) => warn!(kind = %packet.kind(), "dropping unsendable packet: {err:#}"),
        }
    }

    fn disconnect(&mut self) {
        let mut state = self.state.lock();
        if state.client {
            state.client = false;
            state.loaded = false;
            state.inbox.push_back(Packet::Disconnect);
        }
    }

    fn is_client(&self) -> bool {
        self.state.lock().client
    }

    fn update_ping(&mut self) {
        self.state.lock().pings += 1;
    }

    fn set_client_loaded(&mut self, loaded: bool) {
        self.state.lock().loaded = loaded;
    }

    fn reset(&mut self) {
        let mut state = self.state.lock();
        state.client = false;
        state.loaded = false;
        state.inbox.clear();
    }

    fn receive(&mut self) -> Option<Packet> {
        self.state.lock().inbox.pop_front()
    }
}

/// Test and tooling side of a [`LoopbackNet`].
#[derive(Debug, Clone)]
pub struct LoopbackHandle {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackHandle {
    /// Queue a packet as if the server sent it.
    pub fn push(&self, packet: Packet) {
        self.state.lock().inbox.push_back(packet);
    }

    /// Everything sent so far, decoded from the wire frames.
    pub fn sent(&self) -> Vec<(Packet, Reliability)> {
        decode_sent(&self.state.lock().sent)
    }

    /// Take and clear the sent log.
    pub fn take_sent(&self) -> Vec<(Packet, Reliability)> {
        decode_sent(&std::mem::take(&mut self.state.lock().sent))
    }

    /// Encoded bytes sent so far.
    pub fn sent_bytes(&self) -> usize {
        self.state.lock().sent.iter().map(|(frame, _)| frame.len()).sum()
    }

    /// Ping requests made.
    pub fn pings(&self) -> u32 {
        self.state.lock().pings
    }

    /// Whether a client connection is open.
    pub fn is_client(&self) -> bool {
        self.state.lock().client
    }

    /// Whether the client reported the world loaded.
    pub fn is_loaded(&self) -> bool {
        self.state.lock().loaded
    }

    /// Simulate the server dropping the connection.
    pub fn drop_connection(&self) {
        let mut state = self.state.lock();
        state.client = false;
        state.inbox.push_back(Packet::Disconnect);
    }
}

fn decode_sent(frames: &[(Vec<u8>, Reliability)]) -> Vec<(Packet, Reliability)> {
    frames
        .iter()
        .filter_map(|(frame, reliability)| match decode_frame(frame) {
            Ok((packet, _)) => Some((packet, *reliability)),
            Err(err) => {
                warn!("undecodable loopback frame: {err:#}");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_queues_connect_packet() {
        let mut net = LoopbackNet::new();
        net.connect("127.0.0.1:6567").unwrap();
        assert!(net.is_client());
        assert_eq!(
            net.receive(),
            Some(Packet::Connect {
                address: "127.0.0.1:6567".into()
            })
        );
        assert_eq!(net.receive(), None);
    }

    #[test]
    fn disconnect_emits_once() {
        let mut net = LoopbackNet::new();
        net.connect("x").unwrap();
        net.receive();
        net.disconnect();
        net.disconnect();
        assert_eq!(net.receive(), Some(Packet::Disconnect));
        assert_eq!(net.receive(), None);
    }

    #[test]
    fn sends_go_through_the_frame_codec() {
        let mut net = LoopbackNet::new();
        let handle = net.handle();
        let ack = Packet::ClientSnapshot {
            last_snapshot: 3,
            snap_id: 7,
        };
        net.send(&ack, Reliability::Unreliable);
        // id + u16 length + two i32 fields
        assert_eq!(handle.sent_bytes(), 3 + 8);

        // Too large for a frame's u16 length
        net.send(
            &Packet::Invoke {
                method: 1,
                payload: vec![0; 70_000],
            },
            Reliability::Reliable,
        );
        assert_eq!(handle.take_sent(), vec![(ack, Reliability::Unreliable)]);
        assert!(handle.sent().is_empty());
    }

    #[test]
    fn reset_is_silent() {
        let mut net = LoopbackNet::new();
        let handle = net.handle();
        net.connect("x").unwrap();
        net.reset();
        assert!(!handle.is_client());
        assert_eq!(net.receive(), None);
    }
}
