use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Push gateway endpoints and credentials
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "d_push_production")]
    pub push_production: String,
    #[serde(default = "d_push_sandbox")]
    pub push_sandbox: String,
    #[serde(default = "d_feedback_production")]
    pub feedback_production: String,
    #[serde(default = "d_feedback_sandbox")]
    pub feedback_sandbox: String,
    /// PEM bundle of the CAs trusted to sign the gateway's server certificate.
    #[serde(default = "d_ca_bundle")]
    pub ca_bundle: PathBuf,
    /// Root of the per-app credential tree:
    /// `<apps_dir>/<bundle>/{production,develop}/{cer.pem,key.pem}`.
    #[serde(default = "d_apps_dir")]
    pub apps_dir: PathBuf,
    #[serde(default = "d_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "d_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            push_production: d_push_production(),
            push_sandbox: d_push_sandbox(),
            feedback_production: d_feedback_production(),
            feedback_sandbox: d_feedback_sandbox(),
            ca_bundle: d_ca_bundle(),
            apps_dir: d_apps_dir(),
            connect_timeout_ms: d_timeout_ms(),
            handshake_timeout_ms: d_timeout_ms(),
        }
    }
}

impl GatewayConfig {
    pub fn push_endpoint(&self, sandbox: bool) -> &str {
        if sandbox {
            &self.push_sandbox
        } else {
            &self.push_production
        }
    }

    pub fn feedback_endpoint(&self, sandbox: bool) -> &str {
        if sandbox {
            &self.feedback_sandbox
        } else {
            &self.feedback_production
        }
    }

    /// All four endpoints with their config field names.
    pub fn endpoints(&self) -> [(&'static str, &str); 4] {
        [
            ("gateway.push_production", &self.push_production),
            ("gateway.push_sandbox", &self.push_sandbox),
            ("gateway.feedback_production", &self.feedback_production),
            ("gateway.feedback_sandbox", &self.feedback_sandbox),
        ]
    }
}

/// Split `host:port`, returning `None` when either half is missing.
pub fn split_endpoint(endpoint: &str) -> Option<(&str, u16)> {
    let (host, port) = endpoint.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    port.parse().ok().map(|port| (host, port))
}

// ── serde default helpers ───────────────────────────────────────────

fn d_push_production() -> String {
    "gateway.push.apple.com:2195".into()
}

fn d_push_sandbox() -> String {
    "gateway.sandbox.push.apple.com:2195".into()
}

fn d_feedback_production() -> String {
    "feedback.push.apple.com:2196".into()
}

fn d_feedback_sandbox() -> String {
    "feedback.sandbox.push.apple.com:2196".into()
}

fn d_ca_bundle() -> PathBuf {
    PathBuf::from("certs/gateway-ca.pem")
}

fn d_apps_dir() -> PathBuf {
    PathBuf::from("apps")
}

fn d_timeout_ms() -> u64 {
    10_000
}
