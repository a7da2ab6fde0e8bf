use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Feedback service polling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_interval_sec")]
    pub interval_sec: u64,
    /// A feedback connection silent for this long is considered finished.
    #[serde(default = "d_read_timeout_sec")]
    pub read_timeout_sec: u64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_sec: d_interval_sec(),
            read_timeout_sec: d_read_timeout_sec(),
        }
    }
}

fn d_true() -> bool {
    true
}

fn d_interval_sec() -> u64 {
    86_400
}

fn d_read_timeout_sec() -> u64 {
    30
}
