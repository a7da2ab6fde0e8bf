use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::AppKey;
use crate::error::{Error, Result};
use crate::payload::Payload;

/// One push message bound for one device of one app.
///
/// Immutable once built; queues and the durable log hold clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub app: AppKey,
    /// Hex-encoded device token, normalized to lowercase without spaces.
    pub token: String,
    pub payload: Payload,
    pub submitted_at: DateTime<Utc>,
}

impl Notification {
    /// Admission check: the token must be present and the payload non-empty.
    ///
    /// Token length is not checked here; the codec rejects malformed tokens
    /// when the frame is prepared.
    pub fn new(app: AppKey, token: &str, payload: Payload) -> Result<Self> {
        let token = normalize_token(token);
        if token.is_empty() {
            return Err(Error::MissingToken);
        }
        if payload.is_empty() {
            return Err(Error::InvalidPayload("payload is empty".into()));
        }
        Ok(Self {
            app,
            token,
            payload,
            submitted_at: Utc::now(),
        })
    }

    pub fn sandbox(&self) -> bool {
        self.app.is_sandbox()
    }
}

/// Strip the `<`, `>` and whitespace device tokens are often pasted with.
pub fn normalize_token(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '<' | '>'))
        .flat_map(char::to_lowercase)
        .collect()
}
