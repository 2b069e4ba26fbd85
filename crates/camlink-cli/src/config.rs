//! TOML config file for tunables that are otherwise compile-time constants
//! with recommended defaults, layered under CLI-flag overrides per
//! subcommand.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct CliConfig {
    /// STUN servers tried in order.
    #[serde(default = "default_stun_servers")]
    pub stun_servers: Vec<String>,
    /// MAX_INFLIGHT_FRAMES: receiver-only.
    #[serde(default = "default_max_inflight_frames")]
    pub max_inflight_frames: usize,
    /// FRAME_TIMEOUT_MS: receiver-only.
    #[serde(default = "default_frame_timeout_ms")]
    pub frame_timeout_ms: u64,
    /// KEEPALIVE_INTERVAL_MS.
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
    /// PUNCH_WINDOW_MS.
    #[serde(default = "default_punch_window_ms")]
    pub punch_window_ms: u64,
    /// SESSION_IDLE_TIMEOUT_MS.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Pacing for the file-backed `EncoderSource` test fixture — real
    /// encoders pace themselves; this stands in for one when streaming
    /// from a canned AU sequence.
    #[serde(default = "default_fps")]
    pub fps: f64,
    /// Whether the file-backed encoder source repeats its AU sequence
    /// once exhausted, for long-running manual soak tests.
    #[serde(default = "default_loop_playback")]
    pub loop_playback: bool,
}

fn default_stun_servers() -> Vec<String> {
    vec![
        "stun.l.google.com:19302".to_string(),
        "stun1.l.google.com:19302".to_string(),
    ]
}

fn default_max_inflight_frames() -> usize {
    camlink_receiver::assembler::DEFAULT_MAX_INFLIGHT_FRAMES
}

fn default_frame_timeout_ms() -> u64 {
    camlink_receiver::assembler::DEFAULT_FRAME_TIMEOUT_MS
}

fn default_keepalive_interval_ms() -> u64 {
    camlink_core::session::DEFAULT_KEEPALIVE_INTERVAL_MS
}

fn default_punch_window_ms() -> u64 {
    camlink_core::session::DEFAULT_PUNCH_WINDOW_MS
}

fn default_idle_timeout_ms() -> u64 {
    camlink_core::session::DEFAULT_SESSION_IDLE_TIMEOUT_MS
}

fn default_fps() -> f64 {
    30.0
}

fn default_loop_playback() -> bool {
    true
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            stun_servers: default_stun_servers(),
            max_inflight_frames: default_max_inflight_frames(),
            frame_timeout_ms: default_frame_timeout_ms(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            punch_window_ms: default_punch_window_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            fps: default_fps(),
            loop_playback: default_loop_playback(),
        }
    }
}

impl CliConfig {
    pub fn load(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("failed to read config file {path:?}: {e}"))?;
                Ok(toml::from_str(&content)?)
            }
            None => Ok(Self::default()),
        }
    }
}
