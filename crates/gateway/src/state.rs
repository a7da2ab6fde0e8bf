use std::sync::Arc;

use pk_domain::config::Config;
use pk_store::{BadTokenStore, IdentityAllocator};

use crate::connections::{ConnectionRegistry, CredentialSource};
use crate::runtime::Coordinator;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    /// Producer interface into the delivery runtime.
    pub coordinator: Coordinator,
    pub registry: Arc<ConnectionRegistry>,

    // ── Stores ────────────────────────────────────────────────────────
    pub bad_tokens: Arc<BadTokenStore>,
    pub identity: Arc<IdentityAllocator>,

    // ── Apps ──────────────────────────────────────────────────────────
    /// Installed credential bundles; an app without one is unknown.
    pub credentials: Arc<dyn CredentialSource>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// SHA-256 hash of the API bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,
}
