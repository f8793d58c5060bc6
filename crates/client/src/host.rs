//! Host application seam: identity, world loading and user-facing notices.

use anyhow::{bail, Result};
use parking_lot::Mutex;
use skylane_net::KickReason;
use std::sync::Arc;
use tracing::{info, warn};

/// User-facing message. Text and localization belong to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// No unique id could be obtained; the connect attempt was aborted.
    InvalidId,
    /// The connection closed.
    Disconnected,
    /// World data did not arrive in time.
    DataTimeout,
    /// The server kicked this client.
    Kicked(KickReason),
    /// The received world could not be loaded.
    WorldLoadFailed(String),
    /// Writing the session replay failed.
    RecordingFailed(String),
    /// A replay file could not be opened.
    ReplayOpenFailed(String),
}

/// Everything the networking core asks of the surrounding application.
pub trait ClientHost {
    /// Locally persisted unique id, `None` if unavailable.
    fn unique_id(&mut self) -> Option<String>;

    /// Build the world from streamed world data.
    fn load_world(&mut self, data: &[u8]) -> Result<()>;

    /// Show a message to the user.
    fn show_notice(&mut self, notice: Notice);

    /// Show the loading overlay.
    fn show_loading(&mut self);

    /// Hide the loading overlay.
    fn hide_loading(&mut self);

    /// Clear chat history.
    fn clear_chat(&mut self);

    /// Refresh rich-presence status.
    fn update_presence(&mut self);
}

/// Something a [`HeadlessHost`] was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A notice was shown.
    Notice(Notice),
    /// World data of this many bytes was loaded.
    WorldLoaded(usize),
    /// Loading overlay shown (`true`) or hidden.
    Loading(bool),
    /// Chat cleared.
    ChatCleared,
    /// Presence refreshed.
    Presence,
}

/// Shared log of host events.
pub type HostLog = Arc<Mutex<Vec<HostEvent>>>;

/// Host without UI. Notices go to the log; every call is kept in a
/// [`HostLog`] for inspection.
#[derive(Debug, Clone)]
pub struct HeadlessHost {
    uuid: Option<String>,
    log: HostLog,
}

impl HeadlessHost {
    /// Host reporting `uuid` as its unique id.
    pub fn new(uuid: Option<String>) -> Self {
        Self {
            uuid,
            log: HostLog::default(),
        }
    }

    /// Shared event log.
    pub fn log(&self) -> HostLog {
        Arc::clone(&self.log)
    }

    fn push(&self, event: HostEvent) {
        self.log.lock().push(event);
    }
}

impl ClientHost for HeadlessHost {
    fn unique_id(&mut self) -> Option<String> {
        self.uuid.clone()
    }

    fn load_world(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            bail!("world stream is empty");
        }
        self.push(HostEvent::WorldLoaded(data.len()));
        Ok(())
    }

    fn show_notice(&mut self, notice: Notice) {
        match &notice {
            Notice::Kicked(reason) => warn!(reason = reason.key(), "kicked"),
            other => info!(notice = ?other, "notice"),
        }
        self.push(HostEvent::Notice(notice));
    }

    fn show_loading(&mut self) {
        self.push(HostEvent::Loading(true));
    }

    fn hide_loading(&mut self) {
        self.push(HostEvent::Loading(false));
    }

    fn clear_chat(&mut self) {
        self.push(HostEvent::ChatCleared);
    }

    fn update_presence(&mut self) {
        self.push(HostEvent::Presence);
    }
}
