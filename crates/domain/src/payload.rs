use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Upper bound on the rendered JSON payload accepted by the gateway.
pub const MAX_PAYLOAD_BYTES: usize = 256;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The `alert` member of `aps`: either a bare string or a structured object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Alert {
    Text(String),
    Structured(AlertObject),
}

impl Alert {
    pub fn body(&self) -> &str {
        match self {
            Alert::Text(text) => text,
            Alert::Structured(obj) => &obj.body,
        }
    }

    fn body_mut(&mut self) -> &mut String {
        match self {
            Alert::Text(text) => text,
            Alert::Structured(obj) => &mut obj.body,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Alert::Text(text) => text.is_empty(),
            Alert::Structured(obj) => obj.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertObject {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,
    #[serde(
        rename = "action-loc-key",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub action_loc_key: Option<String>,
    #[serde(rename = "loc-key", default, skip_serializing_if = "Option::is_none")]
    pub loc_key: Option<String>,
    #[serde(rename = "loc-args", default, skip_serializing_if = "Vec::is_empty")]
    pub loc_args: Vec<String>,
    #[serde(
        rename = "launch-image",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub launch_image: Option<String>,
}

impl AlertObject {
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
            && self.action_loc_key.as_deref().map_or(true, str::is_empty)
            && self.loc_key.as_deref().map_or(true, str::is_empty)
            && self.loc_args.is_empty()
            && self.launch_image.as_deref().map_or(true, str::is_empty)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<Alert>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
}

impl Aps {
    pub fn is_empty(&self) -> bool {
        self.alert.as_ref().map_or(true, Alert::is_empty)
            && self.badge.is_none()
            && self.sound.as_deref().map_or(true, str::is_empty)
    }
}

/// A notification payload: the `aps` dictionary plus custom top-level keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default)]
    pub aps: Aps,
    #[serde(flatten)]
    pub custom: Map<String, Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("payload has no alert, badge, sound or custom data")]
    Empty,
    #[error("payload is {size} bytes after truncation, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("custom key \"aps\" is reserved")]
    ReservedKey,
    #[error("payload JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Construction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Payload {
    /// A payload with a plain text alert.
    pub fn alert(text: impl Into<String>) -> Self {
        Self {
            aps: Aps {
                alert: Some(Alert::Text(text.into())),
                ..Aps::default()
            },
            custom: Map::new(),
        }
    }

    pub fn with_badge(mut self, badge: u32) -> Self {
        self.aps.badge = Some(badge);
        self
    }

    pub fn with_sound(mut self, sound: impl Into<String>) -> Self {
        self.aps.sound = Some(sound.into());
        self
    }

    pub fn with_custom(
        mut self,
        key: impl Into<String>,
        value: Value,
    ) -> Result<Self, PayloadError> {
        let key = key.into();
        if key == "aps" {
            return Err(PayloadError::ReservedKey);
        }
        self.custom.insert(key, value);
        Ok(self)
    }

    /// Build a payload from a gateway-shaped JSON object
    /// (`{"aps": {...}, "key": value, ...}`).
    pub fn from_value(value: Value) -> Result<Self, PayloadError> {
        let payload: Payload = serde_json::from_value(value)?;
        if payload.is_empty() {
            return Err(PayloadError::Empty);
        }
        Ok(payload)
    }

    pub fn is_empty(&self) -> bool {
        self.aps.is_empty() && self.custom.is_empty()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Rendering
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Compact JSON rendering without any size enforcement.
    pub fn to_json(&self) -> Result<Vec<u8>, PayloadError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Render the payload within `limit` bytes.
    ///
    /// An oversized payload has its alert body shortened on a character
    /// boundary; every other field is rendered unchanged. When the body is
    /// exhausted and the payload still does not fit, this fails with
    /// [`PayloadError::TooLarge`].
    pub fn encode(&self, limit: usize) -> Result<Vec<u8>, PayloadError> {
        if self.is_empty() {
            return Err(PayloadError::Empty);
        }
        if self.custom.contains_key("aps") {
            return Err(PayloadError::ReservedKey);
        }

        let rendered = self.to_json()?;
        if rendered.len() <= limit {
            return Ok(rendered);
        }

        let mut shrunk = self.clone();
        let mut size = rendered.len();
        loop {
            let body = match shrunk.aps.alert.as_mut() {
                Some(alert) if !alert.body().is_empty() => alert.body_mut(),
                _ => return Err(PayloadError::TooLarge { size, limit }),
            };
            let keep = body.len().saturating_sub(size - limit);
            truncate_on_char_boundary(body, keep);

            let rendered = shrunk.to_json()?;
            if rendered.len() <= limit {
                return Ok(rendered);
            }
            size = rendered.len();
        }
    }
}

/// Shorten `s` to at most `max` bytes without splitting a code point.
pub fn truncate_on_char_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
