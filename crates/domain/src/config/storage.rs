use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database holding the durable log, the identity counter and
    /// the bad-token set.
    #[serde(default = "d_path")]
    pub path: PathBuf,
    /// Connection generations of durable-log entries kept per app.
    /// Older generations are evicted when a new one is published.
    /// `0` keeps everything.
    #[serde(default = "d_retain_generations")]
    pub retain_generations: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: d_path(),
            retain_generations: d_retain_generations(),
        }
    }
}

fn d_path() -> PathBuf {
    PathBuf::from("data/pushkeeper.db")
}

fn d_retain_generations() -> u32 {
    4
}
