//! Player configuration
//!
//! Stored as YAML in the user's config directory.
//! Default location: ~/.config/fretbot/config.yaml

use fretbot_core::Timing;
use fretbot_link::SerialSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "config.yaml";

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub serial: SerialConfig,
    pub timing: TimingConfig,
    pub paths: PathsConfig,
}

impl PlayerConfig {
    /// Replace values that cannot drive a session with their defaults
    pub fn validated(mut self) -> Self {
        if let Err(e) = self.timing.timing().validate() {
            log::warn!(
                "timing.bpm: {}, using {}",
                e,
                fretbot_core::timing::DEFAULT_BPM
            );
            self.timing.bpm = fretbot_core::timing::DEFAULT_BPM;
        }
        self
    }
}

/// Serial link to the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    /// How long one line read may block
    pub read_timeout_ms: u64,
    /// Pause after opening the port while the board reboots
    pub settle_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 115_200,
            read_timeout_ms: 1_000,
            settle_ms: 1_000,
        }
    }
}

impl SerialConfig {
    pub fn settings(&self) -> SerialSettings {
        SerialSettings {
            port: self.port.clone(),
            baud_rate: self.baud_rate,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            settle: Duration::from_millis(self.settle_ms),
        }
    }
}

/// Tempo, streaming and stop timing, all in milliseconds unless noted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Tempo for songs that do not set their own
    pub bpm: f64,
    /// Lead time between the controller's current time and the session origin
    pub sync_delay_ms: u32,
    /// Added after the last scheduled move before END fires
    pub end_slack_ms: u32,
    /// Lookahead: events up to this far past controller time may be sent
    pub window_ms: u32,
    /// Sleep between streaming passes
    pub check_interval_ms: u64,
    /// Pause after each COMMAND packet before draining replies
    pub packet_pause_ms: u64,
    pub post_sync_pause_ms: u64,
    pub strum_lead_in_ms: u32,
    pub strum_stagger_ms: u32,
    /// Gap between STOP and RESET
    pub stop_settle_ms: u64,
    /// Wait after RESET before looking for its acknowledgement
    pub reset_ack_wait_ms: u64,
    /// Consecutive silent reads tolerated while waiting for `TIME:`
    pub time_reply_attempts: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            bpm: fretbot_core::timing::DEFAULT_BPM,
            sync_delay_ms: 1_000,
            end_slack_ms: 1_500,
            window_ms: 10_000,
            check_interval_ms: 1_000,
            packet_pause_ms: 15,
            post_sync_pause_ms: 100,
            strum_lead_in_ms: fretbot_core::timing::DEFAULT_STRUM_LEAD_IN_MS,
            strum_stagger_ms: fretbot_core::timing::DEFAULT_STRUM_STAGGER_MS,
            stop_settle_ms: 20,
            reset_ack_wait_ms: 50,
            time_reply_attempts: fretbot_link::DEFAULT_TIME_REPLY_ATTEMPTS,
        }
    }
}

impl TimingConfig {
    /// Base timing shared by the estimate and the streaming loop
    pub fn timing(&self) -> Timing {
        Timing {
            bpm: self.bpm,
            strum_lead_in_ms: self.strum_lead_in_ms,
            strum_stagger_ms: self.strum_stagger_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory of `<name>.json` song files
    pub songs_dir: PathBuf,
    pub calibration: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            songs_dir: PathBuf::from("./songs"),
            calibration: PathBuf::from("./calibration.json"),
        }
    }
}

/// Get the default config file path
///
/// Returns: ~/.config/fretbot/config.yaml
pub fn default_config_path() -> PathBuf {
    fretbot_core::config::default_config_path(CONFIG_FILENAME)
}
