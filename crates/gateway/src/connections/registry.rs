//! Per-app registry of gateway connections.
//!
//! Each app has at most one entry, never removed, whose link state moves
//! `Connecting → Live → Stale → Connecting → Live …` (or `Down` after an
//! abandoned connect or shutdown). Every transition happens under the
//! entry's own mutex and only from the expected state, so a late or
//! duplicate caller is a no-op instead of a second connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use pk_domain::AppKey;
use serde::Serialize;
use tokio::io::ReadHalf;

use super::session::Session;
use super::GatewayStream;

#[derive(Clone)]
pub enum LinkState {
    Connecting,
    Live(Arc<Session>),
    /// The session of `generation` was invalidated; its reader has not
    /// reported back yet.
    Stale { generation: u32 },
    Down,
}

impl LinkState {
    pub fn name(&self) -> &'static str {
        match self {
            LinkState::Connecting => "connecting",
            LinkState::Live(_) => "live",
            LinkState::Stale { .. } => "stale",
            LinkState::Down => "down",
        }
    }
}

struct ConnectionEntry {
    state: LinkState,
    /// Generation of the most recently published session.
    generation: u32,
    connects: u32,
    changed_at: DateTime<Utc>,
}

impl ConnectionEntry {
    fn set(&mut self, state: LinkState) {
        self.state = state;
        self.changed_at = Utc::now();
    }
}

/// Snapshot of one entry for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub app: AppKey,
    pub state: &'static str,
    pub generation: u32,
    pub connects: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_water: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frames_sent: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    pub changed_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<AppKey, Arc<Mutex<ConnectionEntry>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, app: &AppKey) -> Option<Arc<Mutex<ConnectionEntry>>> {
        self.entries.read().get(app).cloned()
    }

    pub fn state(&self, app: &AppKey) -> Option<LinkState> {
        self.entry(app).map(|e| e.lock().state.clone())
    }

    pub fn live_session(&self, app: &AppKey) -> Option<Arc<Session>> {
        match self.state(app)? {
            LinkState::Live(session) => Some(session),
            _ => None,
        }
    }

    pub fn get(&self, app: &AppKey) -> Option<ConnectionInfo> {
        self.entry(app).map(|e| info(app, &e.lock()))
    }

    pub fn list(&self) -> Vec<ConnectionInfo> {
        let entries: Vec<(AppKey, Arc<Mutex<ConnectionEntry>>)> = self
            .entries
            .read()
            .iter()
            .map(|(app, e)| (app.clone(), e.clone()))
            .collect();
        let mut out: Vec<ConnectionInfo> = entries
            .iter()
            .map(|(app, e)| info(app, &e.lock()))
            .collect();
        out.sort_by(|a, b| a.app.cmp(&b.app));
        out
    }

    /// Claim the first connect of an app, or a new one after `Down`.
    ///
    /// A new entry starts numbering after `generation_floor`, so sessions
    /// never reuse a generation already present in the durable log.
    pub fn begin_connect(&self, app: &AppKey, generation_floor: u32) -> bool {
        let entry = self
            .entries
            .write()
            .entry(app.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(ConnectionEntry {
                    state: LinkState::Down,
                    generation: generation_floor,
                    connects: 0,
                    changed_at: Utc::now(),
                }))
            })
            .clone();
        let mut entry = entry.lock();
        if matches!(entry.state, LinkState::Down) {
            entry.set(LinkState::Connecting);
            true
        } else {
            false
        }
    }

    /// Claim the reconnect that follows the loss of `generation`.
    /// Only the first caller for a given generation gets `true`.
    pub fn begin_reconnect(&self, app: &AppKey, generation: u32) -> bool {
        let Some(entry) = self.entry(app) else {
            return false;
        };
        let mut entry = entry.lock();
        let current = match &entry.state {
            LinkState::Stale { generation } => *generation,
            LinkState::Live(session) => session.generation(),
            LinkState::Connecting | LinkState::Down => return false,
        };
        if current != generation {
            return false;
        }
        entry.set(LinkState::Connecting);
        true
    }

    /// Single handoff point for a freshly dialed stream: wraps it in a
    /// session of the next generation and makes it live. Refused unless a
    /// connect was claimed.
    pub fn publish(
        &self,
        app: &AppKey,
        stream: GatewayStream,
    ) -> Option<(Arc<Session>, ReadHalf<GatewayStream>)> {
        let entry = self.entry(app)?;
        let mut entry = entry.lock();
        if !matches!(entry.state, LinkState::Connecting) {
            return None;
        }
        let (read, write) = tokio::io::split(stream);
        entry.generation += 1;
        entry.connects += 1;
        let session = Arc::new(Session::new(app.clone(), entry.generation, write));
        entry.set(LinkState::Live(session.clone()));
        Some((session, read))
    }

    /// Detach the live session of `generation`, returning it so the caller
    /// can close it. No-op (returns `None`) for any other state or
    /// generation.
    pub fn invalidate(&self, app: &AppKey, generation: u32) -> Option<Arc<Session>> {
        let entry = self.entry(app)?;
        let mut entry = entry.lock();
        match &entry.state {
            LinkState::Live(session) if session.generation() == generation => {
                let session = session.clone();
                entry.set(LinkState::Stale { generation });
                Some(session)
            }
            _ => None,
        }
    }

    /// A claimed connect gave up.
    pub fn connect_abandoned(&self, app: &AppKey) {
        if let Some(entry) = self.entry(app) {
            let mut entry = entry.lock();
            if matches!(entry.state, LinkState::Connecting) {
                entry.set(LinkState::Down);
            }
        }
    }

    pub fn is_idle(&self, app: &AppKey, threshold: Duration) -> bool {
        self.live_session(app)
            .map_or(false, |session| session.is_idle(threshold))
    }

    /// Every entry goes `Down`; returns the sessions that were live.
    pub fn close_all(&self) -> Vec<Arc<Session>> {
        let entries: Vec<Arc<Mutex<ConnectionEntry>>> =
            self.entries.read().values().cloned().collect();
        let mut live = Vec::new();
        for entry in entries {
            let mut entry = entry.lock();
            if let LinkState::Live(session) = &entry.state {
                live.push(session.clone());
            }
            entry.set(LinkState::Down);
        }
        live
    }
}

fn info(app: &AppKey, entry: &ConnectionEntry) -> ConnectionInfo {
    let session = match &entry.state {
        LinkState::Live(session) => Some(session),
        _ => None,
    };
    ConnectionInfo {
        app: app.clone(),
        state: entry.state.name(),
        generation: entry.generation,
        connects: entry.connects,
        high_water: session.map(|s| s.high_water()),
        frames_sent: session.map(|s| s.frames_sent()),
        idle_secs: session.map(|s| s.idle_for().as_secs()),
        connected_at: session.map(|s| s.opened_at()),
        changed_at: entry.changed_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> AppKey {
        AppKey::production("com.example.app").unwrap()
    }

    fn stream() -> GatewayStream {
        let (client, _server) = tokio::io::duplex(64);
        Box::new(client)
    }

    fn live(registry: &ConnectionRegistry) -> Arc<Session> {
        assert!(registry.begin_connect(&app(), 0));
        registry.publish(&app(), stream()).unwrap().0
    }

    #[tokio::test]
    async fn first_connect_publishes_generation_one() {
        let registry = ConnectionRegistry::new();
        assert!(registry.state(&app()).is_none());

        let session = live(&registry);
        assert_eq!(session.generation(), 1);
        assert!(registry.live_session(&app()).is_some());
        assert!(!registry.begin_connect(&app(), 0));
    }

    #[tokio::test]
    async fn generation_floor_applies_to_new_entries() {
        let registry = ConnectionRegistry::new();
        assert!(registry.begin_connect(&app(), 41));
        let (session, _read) = registry.publish(&app(), stream()).unwrap();
        assert_eq!(session.generation(), 42);
    }

    #[tokio::test]
    async fn publish_requires_a_claimed_connect() {
        let registry = ConnectionRegistry::new();
        assert!(registry.publish(&app(), stream()).is_none());
        live(&registry);
        assert!(registry.publish(&app(), stream()).is_none());
    }

    #[tokio::test]
    async fn invalidate_is_idempotent_and_generation_scoped() {
        let registry = ConnectionRegistry::new();
        let session = live(&registry);

        assert!(registry.invalidate(&app(), 2).is_none());
        assert!(registry.invalidate(&app(), 1).is_some());
        assert!(registry.invalidate(&app(), 1).is_none());
        assert!(registry.live_session(&app()).is_none());
        assert!(matches!(
            registry.state(&app()),
            Some(LinkState::Stale { generation: 1 })
        ));
        drop(session);
    }

    #[tokio::test]
    async fn exactly_one_reconnect_per_lost_generation() {
        let registry = ConnectionRegistry::new();
        live(&registry);
        registry.invalidate(&app(), 1);

        assert!(registry.begin_reconnect(&app(), 1));
        assert!(!registry.begin_reconnect(&app(), 1));
        assert!(!registry.begin_connect(&app(), 0));

        let (next, _read) = registry.publish(&app(), stream()).unwrap();
        assert_eq!(next.generation(), 2);
        assert!(!registry.begin_reconnect(&app(), 1));
        assert_eq!(registry.get(&app()).unwrap().connects, 2);
    }

    #[tokio::test]
    async fn abandoned_connect_goes_down_and_can_retry() {
        let registry = ConnectionRegistry::new();
        assert!(registry.begin_connect(&app(), 0));
        registry.connect_abandoned(&app());
        assert!(matches!(registry.state(&app()), Some(LinkState::Down)));
        assert!(registry.begin_connect(&app(), 0));
    }

    #[tokio::test]
    async fn close_all_returns_live_sessions() {
        let registry = ConnectionRegistry::new();
        live(&registry);
        let other = AppKey::sandbox("com.example.app").unwrap();
        assert!(registry.begin_connect(&other, 0));

        let closed = registry.close_all();
        assert_eq!(closed.len(), 1);
        assert!(registry
            .list()
            .iter()
            .all(|info| info.state == "down"));
        assert!(registry.publish(&other, stream()).is_none());
    }

    #[tokio::test]
    async fn list_is_sorted_and_reports_live_fields() {
        let registry = ConnectionRegistry::new();
        let dev = AppKey::sandbox("com.example.app").unwrap();
        assert!(registry.begin_connect(&dev, 0));
        live(&registry);

        let list = registry.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].app, app());
        assert_eq!(list[0].state, "live");
        assert_eq!(list[0].high_water, Some(0));
        assert_eq!(list[1].state, "connecting");
        assert!(list[1].high_water.is_none());
    }
}
