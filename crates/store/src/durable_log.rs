use std::sync::Arc;

use pk_domain::{AppKey, Notification};

use crate::keys::{log_key, log_key_generation, log_key_seq};
use crate::{KvStore, Result};

/// Write-ahead record of every notification handed to a gateway socket,
/// addressable by (app, connection generation, sequence).
#[derive(Clone)]
pub struct DurableLog {
    kv: Arc<dyn KvStore>,
}

impl DurableLog {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn store(
        &self,
        app: &AppKey,
        generation: u32,
        seq: u32,
        notification: &Notification,
    ) -> Result<()> {
        let value = serde_json::to_vec(notification)?;
        self.kv.put(&log_key(app, generation, seq), &value)
    }

    pub fn fetch(&self, app: &AppKey, generation: u32, seq: u32) -> Result<Option<Notification>> {
        let Some(value) = self.kv.get(&log_key(app, generation, seq))? else {
            return Ok(None);
        };
        Ok(decode_entry(app, generation, seq, &value))
    }

    /// Logged entries with sequence in `from..=to`, in sequence order.
    /// Sequences never written for `app` (other apps share the counter)
    /// and unreadable entries are skipped.
    pub fn fetch_range(
        &self,
        app: &AppKey,
        generation: u32,
        from: u32,
        to: u32,
    ) -> Result<Vec<(u32, Notification)>> {
        if from > to {
            return Ok(Vec::new());
        }
        let rows = self
            .kv
            .scan(&log_key(app, generation, from), &log_key(app, generation, to))?;
        Ok(rows
            .into_iter()
            .filter_map(|(key, value)| {
                let seq = log_key_seq(&key)?;
                decode_entry(app, generation, seq, &value).map(|n| (seq, n))
            })
            .collect())
    }

    /// Highest generation with a logged entry for `app`, `0` when none.
    pub fn last_generation(&self, app: &AppKey) -> Result<u32> {
        let last = self
            .kv
            .last(&log_key(app, 0, 0), &log_key(app, u32::MAX, u32::MAX))?;
        Ok(last
            .and_then(|(key, _)| log_key_generation(&key))
            .unwrap_or(0))
    }

    /// Drop every entry of `app` from generations older than `generation`.
    pub fn evict_before(&self, app: &AppKey, generation: u32) -> Result<usize> {
        if generation == 0 {
            return Ok(0);
        }
        let removed = self
            .kv
            .delete_range(&log_key(app, 0, 0), &log_key(app, generation - 1, u32::MAX))?;
        if removed > 0 {
            tracing::debug!(app = %app, before_generation = generation, removed, "evicted durable log entries");
        }
        Ok(removed)
    }
}

fn decode_entry(app: &AppKey, generation: u32, seq: u32, value: &[u8]) -> Option<Notification> {
    match serde_json::from_slice(value) {
        Ok(notification) => Some(notification),
        Err(e) => {
            tracing::warn!(app = %app, generation, seq, error = %e, "unreadable durable log entry");
            None
        }
    }
}
