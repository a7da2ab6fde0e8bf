use serde::Serialize;

/// Structured trace events emitted across all pushkeeper crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    NotificationSent {
        app: String,
        generation: u32,
        seq: u32,
        frame_bytes: usize,
    },
    NotificationDropped {
        app: String,
        reason: String,
    },
    NotificationDeferred {
        app: String,
        queue: &'static str,
        reason: &'static str,
    },
    ReplayScheduled {
        app: String,
        generation: u32,
        from_seq: u32,
        to_seq: u32,
        recovered: usize,
    },
    GatewayError {
        app: String,
        generation: u32,
        status: u8,
        description: String,
        last_good_seq: u32,
    },
    ConnectionPublished {
        app: String,
        generation: u32,
    },
    ConnectionLost {
        app: String,
        generation: u32,
        high_water: u32,
        reason: String,
    },
    BadTokenMarked {
        app: String,
        token: String,
        source: &'static str,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "pk_event");
    }
}
