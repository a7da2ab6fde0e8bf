//! Which gateway error frames trigger a replay of the lost range.

use std::collections::BTreeSet;

use pk_domain::config::DeliveryConfig;
use pk_domain::AppKey;
use pk_protocol::Status;

pub trait ReplayPolicy: Send + Sync {
    /// Whether the notifications after the last good sequence should be
    /// resent after the gateway closed `app`'s connection with `status`.
    fn should_replay(&self, app: &AppKey, status: Status) -> bool;
}

/// Replays after every status except an explicit suppression list.
#[derive(Debug, Clone, Default)]
pub struct StatusReplayPolicy {
    suppressed: BTreeSet<u8>,
}

impl StatusReplayPolicy {
    pub fn replay_all() -> Self {
        Self::default()
    }

    pub fn suppressing(codes: impl IntoIterator<Item = u8>) -> Self {
        Self {
            suppressed: codes.into_iter().collect(),
        }
    }

    pub fn suppressed(&self) -> impl Iterator<Item = Status> + '_ {
        self.suppressed.iter().copied().map(Status::from)
    }
}

impl From<&DeliveryConfig> for StatusReplayPolicy {
    fn from(cfg: &DeliveryConfig) -> Self {
        Self::suppressing(cfg.suppress_replay_statuses.iter().copied())
    }
}

impl ReplayPolicy for StatusReplayPolicy {
    fn should_replay(&self, _app: &AppKey, status: Status) -> bool {
        !self.suppressed.contains(&status.code())
    }
}
