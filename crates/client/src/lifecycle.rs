//! Connection lifecycle: connect, world load, play, disconnect.
//!
//! ```text
//! Disconnected --Connect--> Connecting --WorldStream--> Playing
//!       ^                       |                          |
//!       +----timeout / kick / Disconnect packet -----------+
//! ```
//!
//! Live and replayed traffic both arrive through [`NetClient::handle`].
//! While replaying nothing is sent, and the data timeout and periodic
//! acknowledgements are skipped.

use crate::config::ClientConfig;
use crate::host::{ClientHost, Notice};
use crate::net::Net;
use crate::tasks::{Interval, Task, TaskQueue};
use crate::world::ClientWorld;
use skylane_net::{
    compute_schema_hash, ConnectPacket, KickReason, Packet, Reliability, RemoteCall,
    SnapshotOutcome, SnapshotState, PROTOCOL_VERSION,
};
use tracing::{debug, error, info, warn};

/// Ticks between a disconnect and hiding the loading overlay.
pub const HIDE_LOADING_DELAY_TICKS: f32 = 3.0;

/// Ticks between finishing the connect and the presence refresh.
pub const PRESENCE_DELAY_TICKS: f32 = 40.0;

/// Where the client is in its connection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConnectionState {
    /// No session.
    Disconnected,
    /// Handshake sent, waiting for world data.
    Connecting {
        /// Ticks spent waiting so far.
        elapsed_ticks: f32,
    },
    /// World loaded; snapshots flowing.
    Playing,
}

/// Collaborators a lifecycle step works on.
pub struct SessionContext<'a> {
    /// Transport.
    pub net: &'a mut dyn Net,
    /// Host application.
    pub host: &'a mut dyn ClientHost,
    /// Simulation state snapshots are applied to.
    pub world: &'a mut ClientWorld,
    /// Traffic comes from a replay rather than a server.
    pub replaying: bool,
}

impl SessionContext<'_> {
    fn send(&mut self, packet: Packet, reliability: Reliability) {
        if self.replaying {
            debug!(kind = %packet.kind(), "replaying, outbound packet dropped");
            return;
        }
        self.net.send(&packet, reliability);
    }
}

#[derive(Debug, Clone)]
struct Identity {
    name: String,
    color: i32,
    mobile: bool,
}

/// Client connection state machine.
pub struct NetClient {
    state: ConnectionState,
    quiet: bool,
    snapshots: SnapshotState,
    last_outcome: Option<SnapshotOutcome>,
    sync: Interval,
    ping: Interval,
    tasks: TaskQueue,
    identity: Identity,
    data_timeout_ticks: f32,
}

impl NetClient {
    /// Disconnected client using `config` for identity and pacing.
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            quiet: false,
            snapshots: SnapshotState::new(),
            last_outcome: None,
            sync: Interval::new(config.sync_interval_ticks),
            ping: Interval::new(config.ping_interval_ticks),
            tasks: TaskQueue::new(),
            identity: Identity {
                name: config.player_name.clone(),
                color: config.player_color,
                mobile: config.mobile,
            },
            data_timeout_ticks: config.data_timeout_ticks,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the next disconnect will be silent.
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Snapshot bookkeeping.
    pub fn snapshots(&self) -> &SnapshotState {
        &self.snapshots
    }

    /// Outcome of the most recent snapshot.
    pub fn last_snapshot_outcome(&self) -> Option<&SnapshotOutcome> {
        self.last_outcome.as_ref()
    }

    /// Display name sent in the handshake.
    pub fn player_name(&self) -> &str {
        &self.identity.name
    }

    /// Clear per-session state ahead of a new connection.
    pub fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.quiet = false;
        self.snapshots.reset();
        self.last_outcome = None;
        self.sync.reset();
        self.ping.reset();
    }

    /// Drop to Disconnected without any notice or network call.
    pub fn force_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.tasks.clear();
    }

    /// Disconnect without the usual notice.
    pub fn disconnect_quietly(&mut self, ctx: &mut SessionContext<'_>) {
        self.quiet = true;
        self.state = ConnectionState::Disconnected;
        ctx.net.disconnect();
    }

    /// Dispatch one received packet.
    pub fn handle(&mut self, packet: Packet, ctx: &mut SessionContext<'_>) {
        match packet {
            Packet::Connect { address } => self.on_connect(&address, ctx),
            Packet::Disconnect => self.on_disconnect(ctx),
            Packet::WorldStream { data } => self.on_world_data(&data, ctx),
            Packet::Invoke { method, payload } => self.on_invoke(method, &payload, ctx),
            other @ (Packet::ConnectPacket(_) | Packet::ClientSnapshot { .. }) => {
                debug!(kind = %other.kind(), "ignoring server-bound packet");
            }
        }
    }

    fn on_connect(&mut self, address: &str, ctx: &mut SessionContext<'_>) {
        info!(address, "connected, requesting world data");
        self.reset();
        ctx.world.reset();
        ctx.host.clear_chat();
        ctx.host.show_loading();

        if ctx.replaying {
            // World streams are never recorded.
            self.finish_connecting(ctx);
            return;
        }

        let Some(uuid) = ctx.host.unique_id() else {
            warn!("no unique id available, aborting connect");
            ctx.host.show_notice(Notice::InvalidId);
            ctx.host.hide_loading();
            self.disconnect_quietly(ctx);
            return;
        };

        let handshake = ConnectPacket {
            version: PROTOCOL_VERSION,
            schema_hash: compute_schema_hash(),
            name: self.identity.name.clone(),
            mobile: self.identity.mobile,
            color: self.identity.color,
            uuid,
        };
        ctx.send(Packet::ConnectPacket(handshake), Reliability::Reliable);
        self.state = ConnectionState::Connecting { elapsed_ticks: 0.0 };
    }

    fn on_disconnect(&mut self, ctx: &mut SessionContext<'_>) {
        self.state = ConnectionState::Disconnected;
        ctx.net.set_client_loaded(false);
        if self.quiet {
            debug!("quiet disconnect");
            return;
        }

        info!("disconnected");
        self.tasks
            .schedule(Task::HideLoading, HIDE_LOADING_DELAY_TICKS);
        ctx.world.reset();
        ctx.host.update_presence();
        ctx.host.show_notice(Notice::Disconnected);
    }

    fn on_world_data(&mut self, data: &[u8], ctx: &mut SessionContext<'_>) {
        if !matches!(self.state, ConnectionState::Connecting { .. }) {
            warn!(state = ?self.state, "world data outside of connect, ignored");
            return;
        }
        if let Err(err) = ctx.host.load_world(data) {
            error!("Failed to load world: {err:#}");
            ctx.host.show_notice(Notice::WorldLoadFailed(format!("{err:#}")));
            ctx.host.hide_loading();
            self.disconnect_quietly(ctx);
            return;
        }
        self.finish_connecting(ctx);
    }

    fn finish_connecting(&mut self, ctx: &mut SessionContext<'_>) {
        info!("world loaded, playing");
        self.state = ConnectionState::Playing;
        ctx.net.set_client_loaded(true);
        ctx.send(RemoteCall::ConnectConfirm.into_packet(), Reliability::Reliable);
        self.tasks
            .schedule(Task::UpdatePresence, PRESENCE_DELAY_TICKS);
        ctx.host.hide_loading();
    }

    fn on_invoke(&mut self, method: u8, payload: &[u8], ctx: &mut SessionContext<'_>) {
        match RemoteCall::parse(method, payload) {
            Ok(RemoteCall::Kick(reason)) => self.on_kick(reason, ctx),
            Ok(RemoteCall::Snapshot { snapshot_id, data }) => {
                self.on_snapshot(&data, snapshot_id, ctx)
            }
            Ok(RemoteCall::ConnectConfirm) => debug!("ignoring server-bound connect confirm"),
            Err(err) => warn!(method, %err, "ignoring remote call"),
        }
    }

    fn on_kick(&mut self, reason: KickReason, ctx: &mut SessionContext<'_>) {
        info!(reason = reason.key(), "kicked by server");
        self.disconnect_quietly(ctx);
        ctx.world.reset();
        // The following Disconnect is quiet and schedules no hide.
        ctx.host.hide_loading();
        if reason.is_quiet() {
            return;
        }
        ctx.host.show_notice(Notice::Kicked(reason));
    }

    fn on_snapshot(&mut self, data: &[u8], snapshot_id: i32, ctx: &mut SessionContext<'_>) {
        let world = &mut *ctx.world;
        let outcome =
            self.snapshots
                .on_snapshot(data, snapshot_id, &mut world.registry, &mut world.cores);
        if let SnapshotOutcome::Rejected(err) = &outcome {
            warn!(snapshot_id, %err, "snapshot rejected");
        }
        self.last_outcome = Some(outcome);
    }

    /// Per-tick work: delayed tasks, acknowledgements, pings and the data timeout.
    pub fn update(&mut self, delta_ticks: f32, ctx: &mut SessionContext<'_>) {
        for task in self.tasks.advance(delta_ticks) {
            match task {
                Task::HideLoading => ctx.host.hide_loading(),
                Task::UpdatePresence => ctx.host.update_presence(),
            }
        }

        if ctx.replaying || !ctx.net.is_client() {
            return;
        }

        match self.state {
            ConnectionState::Playing => {
                if self.sync.tick(delta_ticks) {
                    let ack = self.snapshots.ack();
                    ctx.send(ack, Reliability::Unreliable);
                }
                if self.ping.tick(delta_ticks) {
                    ctx.net.update_ping();
                }
            }
            ConnectionState::Disconnected => {
                warn!("closing stale client connection");
                ctx.net.disconnect();
            }
            ConnectionState::Connecting { elapsed_ticks } => {
                let elapsed_ticks = elapsed_ticks + delta_ticks;
                self.state = ConnectionState::Connecting { elapsed_ticks };
                if elapsed_ticks > self.data_timeout_ticks {
                    error!(elapsed_ticks, "timed out waiting for world data");
                    ctx.host.show_notice(Notice::DataTimeout);
                    ctx.host.hide_loading();
                    self.disconnect_quietly(ctx);
                }
            }
        }
    }
}
