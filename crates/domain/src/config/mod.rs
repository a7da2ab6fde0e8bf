mod delivery;
mod feedback;
mod gateway;
mod observability;
mod server;
mod storage;

pub use delivery::*;
pub use feedback::*;
pub use gateway::*;
pub use observability::*;
pub use server::*;
pub use storage::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub feedback: FeedbackConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError::error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }

        for (field, endpoint) in self.gateway.endpoints() {
            if split_endpoint(endpoint).is_none() {
                errors.push(ConfigError::error(
                    field,
                    format!("\"{endpoint}\" is not a host:port pair"),
                ));
            }
        }
        if self.gateway.apps_dir.as_os_str().is_empty() {
            errors.push(ConfigError::error("gateway.apps_dir", "must not be empty"));
        }
        if self.gateway.connect_timeout_ms == 0 {
            errors.push(ConfigError::error(
                "gateway.connect_timeout_ms",
                "must be greater than 0",
            ));
        }
        if self.gateway.handshake_timeout_ms == 0 {
            errors.push(ConfigError::error(
                "gateway.handshake_timeout_ms",
                "must be greater than 0",
            ));
        }

        let delivery = &self.delivery;
        if delivery.idle_timeout_sec == 0 {
            errors.push(ConfigError::error(
                "delivery.idle_timeout_sec",
                "must be greater than 0",
            ));
        }
        if delivery.queue_capacity == 0 {
            errors.push(ConfigError::error(
                "delivery.queue_capacity",
                "must be greater than 0",
            ));
        }
        if delivery.suppress_replay_statuses.contains(&0) {
            errors.push(ConfigError::warning(
                "delivery.suppress_replay_statuses",
                "status 0 means no error and never arrives in an error frame",
            ));
        }
        if delivery.reconnect.backoff_factor < 1.0 {
            errors.push(ConfigError::error(
                "delivery.reconnect.backoff_factor",
                "must be at least 1.0",
            ));
        }
        if delivery.reconnect.initial_delay_ms > delivery.reconnect.max_delay_ms {
            errors.push(ConfigError::warning(
                "delivery.reconnect.initial_delay_ms",
                "exceeds max_delay_ms; every retry waits max_delay_ms",
            ));
        }

        if self.storage.path.as_os_str().is_empty() {
            errors.push(ConfigError::error("storage.path", "must not be empty"));
        }
        if self.feedback.enabled && self.feedback.interval_sec == 0 {
            errors.push(ConfigError::error(
                "feedback.interval_sec",
                "must be greater than 0 when feedback is enabled",
            ));
        }

        if !(0.0..=1.0).contains(&self.observability.sample_rate) {
            errors.push(ConfigError::error(
                "observability.sample_rate",
                "must be between 0.0 and 1.0",
            ));
        }

        errors
    }

    /// True when `validate` reports at least one error-severity issue.
    pub fn has_errors(&self) -> bool {
        self.validate()
            .iter()
            .any(|e| e.severity == ConfigSeverity::Error)
    }
}
