use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Delivery coordinator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// A connection unused for this long is torn down and reconnected
    /// before the next send.
    #[serde(default = "d_idle_timeout_sec")]
    pub idle_timeout_sec: u64,
    /// Period of the background idle sweep. `0` disables the sweep; idle
    /// connections are then only detected by the next send.
    #[serde(default = "d_idle_sweep_interval_sec")]
    pub idle_sweep_interval_sec: u64,
    /// Expiry stamped into each frame, relative to the send time.
    #[serde(default = "d_expiry_sec")]
    pub expiry_sec: u64,
    /// Most of this app's notifications replayed after one gateway error.
    /// `0` replays the whole lost range.
    #[serde(default = "d_max_replay_window")]
    pub max_replay_window: u32,
    /// How long a locally closed connection keeps reading for a late
    /// error frame.
    #[serde(default = "d_reader_grace_ms")]
    pub reader_grace_ms: u64,
    /// Gateway status codes whose error frames do not trigger a replay.
    #[serde(default)]
    pub suppress_replay_statuses: Vec<u8>,
    /// Seconds without a new submission before shutdown closes connections.
    #[serde(default = "d_shutdown_countdown_sec")]
    pub shutdown_countdown_sec: u64,
    /// Capacity of the coordinator intake and of each app lane.
    #[serde(default = "d_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            idle_timeout_sec: d_idle_timeout_sec(),
            idle_sweep_interval_sec: d_idle_sweep_interval_sec(),
            expiry_sec: d_expiry_sec(),
            max_replay_window: d_max_replay_window(),
            reader_grace_ms: d_reader_grace_ms(),
            suppress_replay_statuses: Vec::new(),
            shutdown_countdown_sec: d_shutdown_countdown_sec(),
            queue_capacity: d_queue_capacity(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Back-off between reconnect attempts. The first attempt after a lost
/// connection is immediate; `initial_delay_ms` applies from the second.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "d_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "d_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "d_backoff_factor")]
    pub backoff_factor: f64,
    /// `0` retries forever.
    #[serde(default)]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: d_initial_delay_ms(),
            max_delay_ms: d_max_delay_ms(),
            backoff_factor: d_backoff_factor(),
            max_attempts: 0,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_idle_timeout_sec() -> u64 {
    300
}

fn d_idle_sweep_interval_sec() -> u64 {
    60
}

fn d_expiry_sec() -> u64 {
    86_400
}

fn d_max_replay_window() -> u32 {
    0
}

fn d_reader_grace_ms() -> u64 {
    500
}

fn d_shutdown_countdown_sec() -> u64 {
    4
}

fn d_queue_capacity() -> usize {
    1000
}

fn d_initial_delay_ms() -> u64 {
    1000
}

fn d_max_delay_ms() -> u64 {
    30_000
}

fn d_backoff_factor() -> f64 {
    2.0
}
