#![warn(missing_docs)]
//! Client façade tying transport, lifecycle, recorder and player together.
//!
//! Every packet, live or replayed, goes through [`Client::handle_received`]:
//! the recorder sees it first, then the lifecycle dispatches it.

pub mod config;
pub mod entities;
pub mod host;
pub mod lifecycle;
pub mod net;
pub mod tasks;
pub mod world;

pub use config::ClientConfig;
pub use host::{ClientHost, HeadlessHost, HostEvent, HostLog, Notice};
pub use lifecycle::{ConnectionState, NetClient, SessionContext};
pub use net::{LoopbackHandle, LoopbackNet, Net};
pub use world::ClientWorld;

use anyhow::{Context, Result};
use skylane_net::{
    FinishReason, Packet, PlaybackEvent, ReplayError, ReplayHeader, ReplayPlayer, ReplayRecorder,
};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info};

/// Callback invoked for every packet before it is dispatched.
pub type PacketObserver = Box<dyn FnMut(&Packet)>;

/// Networked game client.
pub struct Client {
    config: ClientConfig,
    net: Box<dyn Net>,
    host: Box<dyn ClientHost>,
    world: ClientWorld,
    lifecycle: NetClient,
    recorder: ReplayRecorder,
    player: ReplayPlayer,
    replaying: bool,
    observer: Option<PacketObserver>,
}

impl Client {
    /// Build a disconnected client.
    pub fn new(
        config: ClientConfig,
        net: Box<dyn Net>,
        host: Box<dyn ClientHost>,
        world: ClientWorld,
    ) -> Result<Self> {
        let player = ReplayPlayer::new().context("Failed to start replay worker")?;
        player.set_speed(config.playback_speed);
        Ok(Self {
            lifecycle: NetClient::new(&config),
            recorder: ReplayRecorder::new(config.recorder_settings()),
            config,
            net,
            host,
            world,
            player,
            replaying: false,
            observer: None,
        })
    }

    /// Observe every packet handed to [`Client::handle_received`].
    pub fn set_packet_observer(&mut self, observer: PacketObserver) {
        self.observer = Some(observer);
    }

    /// Active configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Simulation state.
    pub fn world(&self) -> &ClientWorld {
        &self.world
    }

    /// Connection state machine.
    pub fn lifecycle(&self) -> &NetClient {
        &self.lifecycle
    }

    /// Connection state.
    pub fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    /// Session recorder.
    pub fn recorder(&self) -> &ReplayRecorder {
        &self.recorder
    }

    /// Replay player.
    pub fn player(&self) -> &ReplayPlayer {
        &self.player
    }

    /// Whether traffic currently comes from a replay.
    pub fn is_replaying(&self) -> bool {
        self.replaying
    }

    fn session(&mut self) -> (&mut NetClient, SessionContext<'_>) {
        (
            &mut self.lifecycle,
            SessionContext {
                net: self.net.as_mut(),
                host: self.host.as_mut(),
                world: &mut self.world,
                replaying: self.replaying,
            },
        )
    }

    /// Open a connection to `address`. The session starts when the
    /// transport reports the connect.
    pub fn connect(&mut self, address: &str) -> Result<()> {
        info!(address, "connecting");
        self.world.reset();
        self.net.reset();
        self.host.show_loading();
        self.net
            .connect(address)
            .with_context(|| format!("Failed to connect to {address}"))
    }

    /// Single entry point for received packets, live or replayed.
    pub fn handle_received(&mut self, packet: Packet) {
        debug!(kind = %packet.kind(), replaying = self.replaying, "received packet");
        if let Some(observer) = self.observer.as_mut() {
            observer(&packet);
        }

        if let Err(err) = self.recorder.record(&packet) {
            self.recording_failed(err);
        }

        let connect_address = match &packet {
            Packet::Connect { address } => Some(address.clone()),
            _ => None,
        };
        let disconnect = matches!(packet, Packet::Disconnect);

        let (lifecycle, mut ctx) = self.session();
        lifecycle.handle(packet, &mut ctx);

        if let Some(address) = connect_address {
            if matches!(self.state(), ConnectionState::Connecting { .. }) {
                self.start_recording(&address);
            }
        }
        if disconnect {
            self.recorder.stop();
        }
    }

    fn start_recording(&mut self, address: &str) {
        let name = self.lifecycle.player_name().to_string();
        if let Err(err) = self.recorder.start(address, &name, self.replaying) {
            self.recording_failed(err);
        }
    }

    fn recording_failed(&mut self, err: ReplayError) {
        error!("Replay recording failed: {err}");
        self.recorder.stop();
        self.host.show_notice(Notice::RecordingFailed(err.to_string()));
        self.net.disconnect();
    }

    /// Advance one frame: drain the transport and the replay player, then
    /// run lifecycle timers.
    pub fn update(&mut self, delta_ticks: f32) {
        while let Some(packet) = self.net.receive() {
            self.handle_received(packet);
        }

        for event in self.player.drain() {
            match event {
                PlaybackEvent::Packet { packet, .. } => {
                    if self.replaying {
                        self.handle_received(packet);
                    }
                }
                PlaybackEvent::Finished { reason, .. } => self.playback_finished(reason),
            }
        }

        let (lifecycle, mut ctx) = self.session();
        lifecycle.update(delta_ticks, &mut ctx);
        self.world.step();
    }

    /// Start playing a replay file.
    ///
    /// Resets the simulation and transport, then injects a connect packet
    /// for the recorded origin before any recorded frame.
    pub fn start_playback(&mut self, path: impl AsRef<Path>) -> Result<ReplayHeader> {
        let path = path.as_ref();
        self.recorder.stop();

        let header = match self.player.start(path) {
            Ok(header) => header,
            Err(err) => {
                self.host
                    .show_notice(Notice::ReplayOpenFailed(err.to_string()));
                return Err(err)
                    .with_context(|| format!("Failed to open replay {}", path.display()));
            }
        };

        self.replaying = true;
        self.world.reset();
        self.net.reset();
        self.lifecycle.reset();
        info!(origin = %header.origin, name = %header.name, "playing replay");

        self.handle_received(Packet::Connect {
            address: header.origin.clone(),
        });
        Ok(header)
    }

    /// Stop playback and return to Disconnected. Safe to call when idle.
    pub fn stop_playback(&mut self) {
        if !self.replaying {
            self.player.stop();
            return;
        }
        self.player.stop();
        self.replaying = false;
        self.lifecycle.force_disconnected();
        self.world.reset();
        self.net.reset();
        info!("replay playback stopped");
    }

    fn playback_finished(&mut self, reason: FinishReason) {
        if !self.replaying {
            return;
        }
        match &reason {
            FinishReason::EndOfReplay => info!("replay finished"),
            FinishReason::Failed(err) => error!("Replay playback failed: {err}"),
        }
        self.replaying = false;
        self.net.disconnect();
        self.lifecycle.force_disconnected();
        self.world.reset();
    }

    /// Set the playback speed multiplier (0 pauses).
    pub fn set_playback_speed(&mut self, speed: f32) {
        self.player.set_speed(speed);
    }

    /// Current playback speed multiplier.
    pub fn playback_speed(&self) -> f32 {
        self.player.speed()
    }

    /// Skip ahead in the current replay.
    pub fn fast_forward(&mut self, by: Duration) {
        self.player.fast_forward(by);
    }

    /// Leave any session: stops playback and recording and closes the
    /// connection without a notice.
    pub fn return_to_menu(&mut self) {
        self.stop_playback();
        self.recorder.stop();
        if self.state() != ConnectionState::Disconnected || self.net.is_client() {
            let (lifecycle, mut ctx) = self.session();
            lifecycle.disconnect_quietly(&mut ctx);
        }
        self.world.reset();
        self.host.hide_loading();
    }
}
