//! DeliveryCoordinator: the single authority over send decisions.
//!
//! Producers, connect tasks and session readers all talk to the coordinator
//! through one `mpsc` intake. The run loop routes each event to the lane of
//! its app; a lane handles its commands strictly in order and is the only
//! code that mutates that app's registry entry and retry queues. Apps run
//! concurrently, an app never races itself.
//!
//! Lanes never await the intake themselves; only spawned tasks (readers,
//! connect loops, the idle ticker) send to it, so the loop cannot deadlock
//! on a full lane.

use std::collections::HashMap;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pk_domain::config::{DeliveryConfig, StorageConfig};
use pk_domain::{AppKey, Notification};
use pk_store::{BadTokenStore, DurableLog, IdentityAllocator};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::lane::{Lane, LaneCommand};
use super::replay::ReplayPolicy;
use super::retry_queue::{QueueDepth, RetryQueue};
use crate::connections::{
    ConnectionLost, ConnectionRegistry, GatewayConnector, GatewayStream, ReconnectBackoff,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Settings and collaborators
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Runtime knobs, resolved once from `[delivery]` and `[storage]`.
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub idle_timeout: Duration,
    /// `None` disables the background sweep.
    pub idle_sweep_interval: Option<Duration>,
    pub expiry: Duration,
    /// Replayed entries per gateway error, counted per app; `0` is no cap.
    pub max_replay_window: u32,
    pub reader_grace: Duration,
    pub shutdown_countdown: Duration,
    pub queue_capacity: usize,
    /// Generations kept in the durable log per app; `0` keeps all.
    pub retain_generations: u32,
    pub backoff: ReconnectBackoff,
}

impl DeliverySettings {
    pub fn new(delivery: &DeliveryConfig, storage: &StorageConfig) -> Self {
        Self {
            idle_timeout: Duration::from_secs(delivery.idle_timeout_sec),
            idle_sweep_interval: (delivery.idle_sweep_interval_sec > 0)
                .then(|| Duration::from_secs(delivery.idle_sweep_interval_sec)),
            expiry: Duration::from_secs(delivery.expiry_sec),
            max_replay_window: delivery.max_replay_window,
            reader_grace: Duration::from_millis(delivery.reader_grace_ms),
            shutdown_countdown: Duration::from_secs(delivery.shutdown_countdown_sec),
            queue_capacity: delivery.queue_capacity.max(1),
            retain_generations: storage.retain_generations,
            backoff: ReconnectBackoff::from(&delivery.reconnect),
        }
    }

    /// Unix time stamped into a frame sent now.
    pub fn expiry_at(&self) -> u32 {
        let ahead = i64::try_from(self.expiry.as_secs()).unwrap_or(i64::MAX);
        let at = Utc::now().timestamp().saturating_add(ahead);
        u32::try_from(at.max(0)).unwrap_or(u32::MAX)
    }
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self::new(&DeliveryConfig::default(), &StorageConfig::default())
    }
}

/// Services the coordinator drives.
pub struct CoordinatorDeps {
    pub registry: Arc<ConnectionRegistry>,
    pub log: DurableLog,
    pub identity: Arc<IdentityAllocator>,
    pub bad_tokens: Arc<BadTokenStore>,
    pub connector: Arc<dyn GatewayConnector>,
    pub policy: Arc<dyn ReplayPolicy>,
}

/// Everything a lane or a spawned connect task needs.
pub(super) struct Shared {
    pub registry: Arc<ConnectionRegistry>,
    pub log: DurableLog,
    pub identity: Arc<IdentityAllocator>,
    pub bad_tokens: Arc<BadTokenStore>,
    pub connector: Arc<dyn GatewayConnector>,
    pub policy: Arc<dyn ReplayPolicy>,
    pub retry: Arc<RetryQueue>,
    pub settings: DeliverySettings,
    pub intake: mpsc::Sender<Event>,
    /// Cancelled once the coordinator stops for good: connect loops quit.
    pub stop: CancellationToken,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Intake
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) enum Event {
    Submit(Notification),
    Connect(AppKey),
    Connected { app: AppKey, stream: GatewayStream },
    ConnectAbandoned { app: AppKey },
    ConnectionLost(ConnectionLost),
    IdleSweep,
}

impl From<ConnectionLost> for Event {
    fn from(lost: ConnectionLost) -> Self {
        Event::ConnectionLost(lost)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("delivery coordinator has stopped")]
    Stopped,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cloneable handle to a running coordinator.
#[derive(Clone)]
pub struct Coordinator {
    intake: mpsc::Sender<Event>,
    draining: CancellationToken,
    retry: Arc<RetryQueue>,
}

impl Coordinator {
    /// Spawn the run loop. The returned task finishes after
    /// [`begin_shutdown`](Self::begin_shutdown) and the countdown.
    pub fn start(deps: CoordinatorDeps, settings: DeliverySettings) -> (Self, JoinHandle<()>) {
        let (intake, rx) = mpsc::channel(settings.queue_capacity);
        let draining = CancellationToken::new();
        let stop = CancellationToken::new();
        let retry = Arc::new(RetryQueue::new());

        if let Some(every) = settings.idle_sweep_interval {
            spawn_idle_sweep(intake.clone(), every, stop.clone());
        }

        let countdown = settings.shutdown_countdown;
        let shared = Arc::new(Shared {
            registry: deps.registry,
            log: deps.log,
            identity: deps.identity,
            bad_tokens: deps.bad_tokens,
            connector: deps.connector,
            policy: deps.policy,
            retry: retry.clone(),
            settings,
            intake: intake.clone(),
            stop,
        });
        let router = Router {
            shared,
            lanes: HashMap::new(),
        };
        let task = tokio::spawn(run(rx, router, draining.clone(), countdown));

        (
            Self {
                intake,
                draining,
                retry,
            },
            task,
        )
    }

    /// Hand a notification to its app's lane. Accepted even while shutting
    /// down: every submission restarts the shutdown countdown.
    pub async fn submit(&self, notification: Notification) -> Result<(), SubmitError> {
        self.intake
            .send(Event::Submit(notification))
            .await
            .map_err(|_| SubmitError::Stopped)
    }

    /// Open `app`'s connection ahead of its first notification.
    pub async fn connect(&self, app: AppKey) -> Result<(), SubmitError> {
        self.intake
            .send(Event::Connect(app))
            .await
            .map_err(|_| SubmitError::Stopped)
    }

    pub fn begin_shutdown(&self) {
        self.draining.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.draining.is_cancelled()
    }

    pub fn pending(&self, app: &AppKey) -> QueueDepth {
        self.retry.pending(app)
    }
}

fn spawn_idle_sweep(intake: mpsc::Sender<Event>, every: Duration, stop: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if intake.send(Event::IdleSweep).await.is_err() {
                        return;
                    }
                }
                _ = stop.cancelled() => return,
            }
        }
    });
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run(
    mut intake: mpsc::Receiver<Event>,
    mut router: Router,
    draining: CancellationToken,
    countdown: Duration,
) {
    tracing::info!("delivery coordinator started");
    let mut deadline: Option<Instant> = None;
    loop {
        let armed = deadline;
        let expired = async move {
            match armed {
                Some(at) => sleep_until(at).await,
                None => pending::<()>().await,
            }
        };
        tokio::select! {
            event = intake.recv() => {
                let Some(event) = event else { break };
                if deadline.is_some() && matches!(event, Event::Submit(_)) {
                    deadline = Some(Instant::now() + countdown);
                }
                router.route(event).await;
            }
            _ = draining.cancelled(), if deadline.is_none() => {
                tracing::info!(
                    countdown_secs = countdown.as_secs(),
                    "shutdown requested, waiting for submissions to stop"
                );
                deadline = Some(Instant::now() + countdown);
            }
            _ = expired => {
                tracing::info!("shutdown countdown elapsed");
                break;
            }
        }
    }
    router.stop().await;
}

struct LaneHandle {
    tx: mpsc::Sender<LaneCommand>,
    task: JoinHandle<()>,
}

struct Router {
    shared: Arc<Shared>,
    lanes: HashMap<AppKey, LaneHandle>,
}

impl Router {
    async fn route(&mut self, event: Event) {
        match event {
            Event::Submit(notification) => {
                let app = notification.app.clone();
                self.dispatch(app, LaneCommand::Notify(notification)).await;
            }
            Event::Connect(app) => self.dispatch(app, LaneCommand::Connect).await,
            Event::Connected { app, stream } => {
                self.dispatch(app, LaneCommand::Connected(stream)).await
            }
            Event::ConnectAbandoned { app } => {
                self.dispatch(app, LaneCommand::ConnectAbandoned).await
            }
            Event::ConnectionLost(lost) => {
                let app = lost.session.app().clone();
                self.dispatch(app, LaneCommand::Lost(lost)).await;
            }
            Event::IdleSweep => {
                for (app, lane) in &self.lanes {
                    if lane.tx.send(LaneCommand::IdleCheck).await.is_err() {
                        tracing::warn!(app = %app, "lane gone during idle sweep");
                    }
                }
            }
        }
    }

    async fn dispatch(&mut self, app: AppKey, command: LaneCommand) {
        let lane = self
            .lanes
            .entry(app.clone())
            .or_insert_with(|| spawn_lane(&app, &self.shared));
        let Err(mpsc::error::SendError(command)) = lane.tx.send(command).await else {
            return;
        };

        tracing::error!(app = %app, "lane task exited unexpectedly, restarting it");
        let lane = spawn_lane(&app, &self.shared);
        if lane.tx.send(command).await.is_err() {
            tracing::error!(app = %app, "restarted lane refused its first command");
        }
        self.lanes.insert(app, lane);
    }

    async fn stop(mut self) {
        self.shared.stop.cancel();
        for (app, lane) in self.lanes.drain() {
            drop(lane.tx);
            if let Err(e) = lane.task.await {
                tracing::error!(app = %app, error = %e, "lane task failed");
            }
        }
        let sessions = self.shared.registry.close_all();
        let closed = sessions.len();
        for session in sessions {
            session.shutdown().await;
        }
        tracing::info!(closed, "delivery coordinator stopped");
    }
}

fn spawn_lane(app: &AppKey, shared: &Arc<Shared>) -> LaneHandle {
    let (tx, rx) = mpsc::channel(shared.settings.queue_capacity);
    let lane = Lane::new(app.clone(), Arc::clone(shared));
    LaneHandle {
        tx,
        task: tokio::spawn(lane.run(rx)),
    }
}
