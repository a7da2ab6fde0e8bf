//! AppState construction and background-task spawning extracted from
//! `main.rs`, shared by `serve` and the one-shot CLI commands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use pk_domain::config::{Config, ConfigSeverity};
use pk_store::{BadTokenStore, DurableLog, IdentityAllocator, KvStore, SqliteKv};

use crate::api::auth::token_hash;
use crate::connections::{
    ConnectionRegistry, CredentialSource, FsCredentials, GatewayConnector, TlsGatewayConnector,
};
use crate::runtime::{
    CoordinatorDeps, Coordinator, DeliverySettings, FeedbackJob, StatusReplayPolicy,
};
use crate::state::AppState;

/// A booted runtime: handler state plus the tasks that outlive requests.
pub struct Runtime {
    pub state: AppState,
    pub connector: Arc<dyn GatewayConnector>,
    /// Finishes once the coordinator has drained and closed every
    /// connection.
    pub coordinator_task: JoinHandle<()>,
}

/// Validate config, open the stores, and start the delivery coordinator.
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<Runtime> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if config.has_errors() {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Stores ───────────────────────────────────────────────────────
    let kv: Arc<dyn KvStore> = Arc::new(
        SqliteKv::open(&config.storage.path)
            .with_context(|| format!("opening store {}", config.storage.path.display()))?,
    );
    let identity =
        Arc::new(IdentityAllocator::load(kv.clone()).context("loading identity counter")?);
    let bad_tokens = Arc::new(BadTokenStore::load(kv.clone()).context("loading bad tokens")?);
    let log = DurableLog::new(kv);
    tracing::info!(
        path = %config.storage.path.display(),
        last_identity = identity.last(),
        bad_tokens = bad_tokens.len(),
        "store ready"
    );

    // ── Credentials + gateway connector ──────────────────────────────
    let credentials: Arc<dyn CredentialSource> =
        Arc::new(FsCredentials::new(config.gateway.apps_dir.clone()));
    let connector: Arc<dyn GatewayConnector> = Arc::new(
        TlsGatewayConnector::new(config.gateway.clone(), credentials.clone())
            .context("initializing TLS connector")?,
    );
    tracing::info!(
        apps_dir = %config.gateway.apps_dir.display(),
        installed = credentials.installed().len(),
        "gateway connector ready"
    );

    // ── Delivery coordinator ─────────────────────────────────────────
    let registry = Arc::new(ConnectionRegistry::new());
    let policy = StatusReplayPolicy::from(&config.delivery);
    if policy.suppressed().next().is_some() {
        tracing::info!(
            statuses = ?policy.suppressed().collect::<Vec<_>>(),
            "replay suppressed for configured gateway statuses"
        );
    }
    let settings = DeliverySettings::new(&config.delivery, &config.storage);
    let (coordinator, coordinator_task) = Coordinator::start(
        CoordinatorDeps {
            registry: registry.clone(),
            log,
            identity: identity.clone(),
            bad_tokens: bad_tokens.clone(),
            connector: connector.clone(),
            policy: Arc::new(policy),
        },
        settings,
    );

    // ── API token ────────────────────────────────────────────────────
    let env_var = &config.server.api_token_env;
    let api_token_hash = std::env::var(env_var).ok().and_then(|t| token_hash(&t));
    if api_token_hash.is_some() {
        tracing::info!(env = %env_var, "bearer-token auth enabled");
    } else {
        tracing::warn!("bearer-token auth DISABLED, set {env_var} to protect the API");
    }

    let state = AppState {
        config,
        coordinator,
        registry,
        bad_tokens,
        identity,
        credentials,
        api_token_hash,
    };
    Ok(Runtime {
        state,
        connector,
        coordinator_task,
    })
}

/// Dial every installed app and start the feedback loop. Background loops
/// stop when `stop` is cancelled.
pub async fn spawn_background_tasks(runtime: &Runtime, stop: CancellationToken) {
    let state = &runtime.state;

    // ── Warm connections ─────────────────────────────────────────────
    for app in state.credentials.installed() {
        if let Err(e) = state.coordinator.connect(app.clone()).await {
            tracing::warn!(app = %app, error = %e, "cannot schedule initial connect");
        }
    }

    // ── Feedback ─────────────────────────────────────────────────────
    let feedback = &state.config.feedback;
    if feedback.enabled {
        let job = FeedbackJob::new(
            runtime.connector.clone(),
            state.credentials.clone(),
            state.bad_tokens.clone(),
            Duration::from_secs(feedback.read_timeout_sec),
        );
        job.spawn(Duration::from_secs(feedback.interval_sec), stop);
        tracing::info!(interval_sec = feedback.interval_sec, "feedback loop started");
    } else {
        tracing::info!("feedback loop disabled");
    }
}
