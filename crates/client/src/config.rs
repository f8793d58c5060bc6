//! Client settings persisted as TOML.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use skylane_core::seconds_to_ticks;
use skylane_net::RecorderSettings;
use std::{fs, path::Path, path::PathBuf};
use tracing::warn;

const DEFAULT_CLIENT_PATH: &str = "config/client.toml";

/// Player identity, replay switches and network pacing.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Display name sent in the handshake.
    pub player_name: String,
    /// Player color as RGBA8888.
    pub player_color: i32,
    /// Report a mobile platform to the server.
    pub mobile: bool,
    /// Record every online session to a replay file.
    pub record_replays: bool,
    /// Write "anonymous" instead of server address and name in replays.
    pub anonymize_replays: bool,
    /// Directory replays are written to.
    pub replay_dir: PathBuf,
    /// Playback speed applied when a replay starts.
    pub playback_speed: f32,
    /// Ticks between snapshot acknowledgements.
    pub sync_interval_ticks: f32,
    /// Ticks between ping requests.
    pub ping_interval_ticks: f32,
    /// Ticks to wait for world data before giving up.
    pub data_timeout_ticks: f32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            player_name: "player".to_string(),
            player_color: 0xffd3_7fffu32 as i32,
            mobile: false,
            record_replays: false,
            anonymize_replays: false,
            replay_dir: PathBuf::from("replays"),
            playback_speed: 1.0,
            sync_interval_ticks: 2.0,
            ping_interval_ticks: 60.0,
            data_timeout_ticks: seconds_to_ticks(18.0),
        }
    }
}

impl ClientConfig {
    /// Load client configuration from the default path.
    pub fn load() -> Self {
        Self::load_from_path(Path::new(DEFAULT_CLIENT_PATH))
    }

    /// Load configuration from an explicit path, falling back to defaults on errors.
    pub fn load_from_path(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<ClientConfig>(&contents) {
                Ok(cfg) => cfg.sanitized(),
                Err(err) => {
                    warn!("Failed to parse {}: {err}. Using defaults", path.display());
                    ClientConfig::default()
                }
            },
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to read {}: {err}. Using defaults", path.display());
                } else {
                    warn!(
                        "Client config not found at {}. Using defaults",
                        path.display()
                    );
                }
                ClientConfig::default()
            }
        }
    }

    /// Save client configuration to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to_path(Path::new(DEFAULT_CLIENT_PATH))
    }

    /// Save client configuration to an explicit path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let toml = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        Ok(())
    }

    /// Recorder switches derived from this configuration.
    pub fn recorder_settings(&self) -> RecorderSettings {
        RecorderSettings {
            enabled: self.record_replays,
            anonymize: self.anonymize_replays,
            dir: self.replay_dir.clone(),
        }
    }

    // Non-positive intervals would fire every tick or never time out.
    fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        for (value, fallback, name) in [
            (&mut self.sync_interval_ticks, defaults.sync_interval_ticks, "sync_interval_ticks"),
            (&mut self.ping_interval_ticks, defaults.ping_interval_ticks, "ping_interval_ticks"),
            (&mut self.data_timeout_ticks, defaults.data_timeout_ticks, "data_timeout_ticks"),
        ] {
            if !(value.is_finite() && *value > 0.0) {
                warn!("Invalid {name} = {value}. Using {fallback}");
                *value = fallback;
            }
        }
        self
    }
}
