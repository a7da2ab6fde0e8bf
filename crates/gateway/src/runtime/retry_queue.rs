//! Per-app redelivery queues.
//!
//! Each app has two FIFOs: `error` holds notifications the gateway provably
//! lost and that must be resent in sequence order, `fallback` holds
//! notifications that arrived while no socket was usable. `next` always
//! empties the error queue first.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use pk_domain::{AppKey, Notification};
use serde::Serialize;

#[derive(Default)]
struct AppQueues {
    error: VecDeque<Notification>,
    fallback: VecDeque<Notification>,
}

impl AppQueues {
    fn is_empty(&self) -> bool {
        self.error.is_empty() && self.fallback.is_empty()
    }
}

/// Queue depths of one app.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub error: usize,
    pub fallback: usize,
}

impl QueueDepth {
    pub fn total(&self) -> usize {
        self.error + self.fallback
    }
}

#[derive(Default)]
pub struct RetryQueue {
    queues: Mutex<HashMap<AppKey, AppQueues>>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the error queue, preserving the given order. Returns the
    /// number of notifications queued.
    pub fn push_error<I>(&self, app: &AppKey, notifications: I) -> usize
    where
        I: IntoIterator<Item = Notification>,
    {
        let mut queues = self.queues.lock();
        let entry = queues.entry(app.clone()).or_default();
        let before = entry.error.len();
        entry.error.extend(notifications);
        entry.error.len() - before
    }

    pub fn push_fallback(&self, app: &AppKey, notification: Notification) {
        self.queues
            .lock()
            .entry(app.clone())
            .or_default()
            .fallback
            .push_back(notification);
    }

    /// Pop the next notification to redeliver: error queue first.
    pub fn next(&self, app: &AppKey) -> Option<Notification> {
        let mut queues = self.queues.lock();
        let entry = queues.get_mut(app)?;
        let next = entry.error.pop_front().or_else(|| entry.fallback.pop_front());
        if entry.is_empty() {
            queues.remove(app);
        }
        next
    }

    pub fn has_pending(&self, app: &AppKey) -> bool {
        self.queues.lock().get(app).is_some_and(|q| !q.is_empty())
    }

    pub fn pending(&self, app: &AppKey) -> QueueDepth {
        self.queues
            .lock()
            .get(app)
            .map(|q| QueueDepth {
                error: q.error.len(),
                fallback: q.fallback.len(),
            })
            .unwrap_or_default()
    }
}
