//! Per-app lane: serializes every send decision of one app.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use pk_domain::trace::TraceEvent;
use pk_domain::{AppKey, Notification};
use tokio::sync::mpsc;

use super::coordinator::{Event, Shared};
use crate::connections::{
    spawn_reader, ConnectionLost, GatewayStream, LinkState, LostReason, Service, Session,
};

pub(super) enum LaneCommand {
    Notify(Notification),
    Connect,
    Connected(GatewayStream),
    ConnectAbandoned,
    Lost(ConnectionLost),
    IdleCheck,
}

impl LaneCommand {
    fn name(&self) -> &'static str {
        match self {
            LaneCommand::Notify(_) => "notify",
            LaneCommand::Connect => "connect",
            LaneCommand::Connected(_) => "connected",
            LaneCommand::ConnectAbandoned => "connect_abandoned",
            LaneCommand::Lost(_) => "connection_lost",
            LaneCommand::IdleCheck => "idle_check",
        }
    }
}

pub(super) struct Lane {
    app: AppKey,
    shared: Arc<Shared>,
}

impl Lane {
    pub(super) fn new(app: AppKey, shared: Arc<Shared>) -> Self {
        Self { app, shared }
    }

    /// Process commands until the coordinator drops the sender. A panic in
    /// one command is logged and the lane moves on to the next.
    pub(super) async fn run(self, mut rx: mpsc::Receiver<LaneCommand>) {
        while let Some(command) = rx.recv().await {
            let name = command.name();
            if let Err(panic) = AssertUnwindSafe(self.handle(command)).catch_unwind().await {
                tracing::error!(
                    app = %self.app,
                    command = name,
                    panic = panic_message(panic.as_ref()),
                    "lane command panicked"
                );
            }
        }
        tracing::debug!(app = %self.app, "lane stopped");
    }

    async fn handle(&self, command: LaneCommand) {
        match command {
            LaneCommand::Notify(notification) => self.notify(notification).await,
            LaneCommand::Connect => self.ensure_connecting(),
            LaneCommand::Connected(stream) => self.on_connected(stream).await,
            LaneCommand::ConnectAbandoned => self.on_connect_abandoned(),
            LaneCommand::Lost(lost) => self.handle_error(lost),
            LaneCommand::IdleCheck => self.idle_check(),
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Notify
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn notify(&self, notification: Notification) {
        let s = &self.shared;
        if s.bad_tokens.is_bad(&self.app, &notification.token) {
            self.dropped(&notification, "bad token");
            return;
        }

        let Some(session) = s.registry.live_session(&self.app) else {
            self.defer(notification, "no live connection");
            self.ensure_connecting();
            return;
        };

        // Never write into a half-closed gateway session.
        if session.is_idle(s.settings.idle_timeout) {
            self.retire(&session, "idle");
            self.defer(notification, "idle connection");
            return;
        }

        if s.retry.has_pending(&self.app) {
            self.defer(notification, "redelivery pending");
            self.drain().await;
            return;
        }

        self.send(&session, notification).await;
    }

    /// Encode, allocate, log, write. Returns `false` once the session is
    /// unusable (the notification is then back on the fallback queue).
    async fn send(&self, session: &Arc<Session>, notification: Notification) -> bool {
        let s = &self.shared;

        let frame = match pk_protocol::prepare(&notification) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(
                    app = %self.app,
                    token = %notification.token,
                    error = %e,
                    "notification cannot be encoded, dropping"
                );
                self.dropped(&notification, &e.to_string());
                return true;
            }
        };

        let seq = match s.identity.next() {
            Ok(seq) => seq,
            Err(e) => {
                tracing::error!(app = %self.app, error = %e, "identity allocation failed, dropping");
                self.dropped(&notification, "identity unavailable");
                return true;
            }
        };

        let generation = session.generation();
        if let Err(e) = s.log.store(&self.app, generation, seq, &notification) {
            tracing::error!(
                app = %self.app,
                generation,
                seq,
                error = %e,
                "durable log write failed, dropping"
            );
            self.dropped(&notification, "durable log unavailable");
            return true;
        }

        let bytes = frame.encode(seq, s.settings.expiry_at());
        match session.write_frame(seq, &bytes).await {
            Ok(()) => {
                TraceEvent::NotificationSent {
                    app: self.app.to_string(),
                    generation,
                    seq,
                    frame_bytes: bytes.len(),
                }
                .emit();
                true
            }
            Err(e) => {
                tracing::warn!(app = %self.app, generation, seq, error = %e, "gateway write failed");
                self.defer(notification, "write failed");
                self.retire(session, "write failed");
                false
            }
        }
    }

    /// Redeliver queued notifications, error queue first, while a live
    /// session exists.
    async fn drain(&self) {
        let s = &self.shared;
        let mut attempted = 0usize;
        while let Some(session) = s.registry.live_session(&self.app) {
            let Some(notification) = s.retry.next(&self.app) else {
                break;
            };
            if s.bad_tokens.is_bad(&self.app, &notification.token) {
                self.dropped(&notification, "bad token");
                continue;
            }
            attempted += 1;
            if !self.send(&session, notification).await {
                break;
            }
        }
        if attempted > 0 {
            let left = s.retry.pending(&self.app);
            tracing::debug!(
                app = %self.app,
                attempted,
                error_queue = left.error,
                fallback_queue = left.fallback,
                "retry queue drained"
            );
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Connection lifecycle
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn ensure_connecting(&self) {
        let s = &self.shared;
        if s.stop.is_cancelled() {
            return;
        }
        if !matches!(s.registry.state(&self.app), None | Some(LinkState::Down)) {
            return;
        }
        let floor = match s.log.last_generation(&self.app) {
            Ok(generation) => generation,
            Err(e) => {
                tracing::warn!(
                    app = %self.app,
                    error = %e,
                    "cannot read last logged generation, numbering from zero"
                );
                0
            }
        };
        if s.registry.begin_connect(&self.app, floor) {
            self.spawn_connect();
        }
    }

    async fn on_connected(&self, stream: GatewayStream) {
        let s = &self.shared;
        let Some((session, read)) = s.registry.publish(&self.app, stream) else {
            tracing::warn!(app = %self.app, "unexpected gateway connection discarded");
            return;
        };
        let generation = session.generation();
        spawn_reader(session.clone(), read, s.settings.reader_grace, s.intake.clone());

        TraceEvent::ConnectionPublished {
            app: self.app.to_string(),
            generation,
        }
        .emit();
        let pending = s.retry.pending(&self.app);
        tracing::info!(
            app = %self.app,
            generation,
            error_queue = pending.error,
            fallback_queue = pending.fallback,
            "gateway connection live"
        );

        self.evict_old_generations(generation);
        self.drain().await;
    }

    fn handle_error(&self, lost: ConnectionLost) {
        let s = &self.shared;
        let ConnectionLost { session, reason } = lost;
        let generation = session.generation();

        if let Some(current) = s.registry.invalidate(&self.app, generation) {
            current.close();
        }
        session.close();

        TraceEvent::ConnectionLost {
            app: self.app.to_string(),
            generation,
            high_water: session.high_water(),
            reason: reason.to_string(),
        }
        .emit();

        if let LostReason::ErrorFrame(frame) = &reason {
            TraceEvent::GatewayError {
                app: self.app.to_string(),
                generation,
                status: frame.status.code(),
                description: frame.status.description().to_owned(),
                last_good_seq: frame.last_good_seq,
            }
            .emit();
            if s.policy.should_replay(&self.app, frame.status) {
                self.schedule_replay(&session, frame.last_good_seq);
            } else {
                tracing::info!(
                    app = %self.app,
                    generation,
                    status = %frame.status,
                    "replay suppressed for gateway status"
                );
            }
        }

        if s.stop.is_cancelled() {
            return;
        }
        if s.registry.begin_reconnect(&self.app, generation) {
            self.spawn_connect();
        }
    }

    /// Queue everything the gateway dropped after `last_good` on the error
    /// queue, in sequence order.
    fn schedule_replay(&self, session: &Session, last_good: u32) {
        let s = &self.shared;
        let generation = session.generation();
        let high = session.high_water();
        let first = session.first_seq();
        if first == 0 || last_good >= high {
            return;
        }

        // Sequences below `first` belong to other generations.
        let from = last_good.saturating_add(1).max(first);
        let mut entries = match s.log.fetch_range(&self.app, generation, from, high) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(
                    app = %self.app,
                    generation,
                    from,
                    to = high,
                    error = %e,
                    "cannot read lost range from durable log"
                );
                return;
            }
        };

        let window = s.settings.max_replay_window as usize;
        if window > 0 && entries.len() > window {
            let skipped = entries.len() - window;
            let dropped: Vec<_> = entries.drain(..skipped).collect();
            tracing::warn!(
                app = %self.app,
                generation,
                skipped,
                first_skipped = dropped[0].0,
                last_skipped = dropped[skipped - 1].0,
                "lost range exceeds replay window, oldest notifications skipped"
            );
            for (_, notification) in &dropped {
                self.dropped(notification, "outside replay window");
            }
        }

        let recovered = s
            .retry
            .push_error(&self.app, entries.into_iter().map(|(_, n)| n));
        TraceEvent::ReplayScheduled {
            app: self.app.to_string(),
            generation,
            from_seq: from,
            to_seq: high,
            recovered,
        }
        .emit();
    }

    fn on_connect_abandoned(&self) {
        let s = &self.shared;
        s.registry.connect_abandoned(&self.app);
        let pending = s.retry.pending(&self.app);
        tracing::error!(
            app = %self.app,
            error_queue = pending.error,
            fallback_queue = pending.fallback,
            "gave up connecting, queued notifications wait for the next submission"
        );
    }

    fn idle_check(&self) {
        let s = &self.shared;
        if let Some(session) = s.registry.live_session(&self.app) {
            if session.is_idle(s.settings.idle_timeout) {
                self.retire(&session, "idle sweep");
            }
        }
    }

    /// Invalidate and close a session. Its reader reports the loss, which
    /// is what schedules the reconnect.
    fn retire(&self, session: &Session, why: &'static str) {
        tracing::debug!(
            app = %self.app,
            generation = session.generation(),
            why,
            "retiring gateway session"
        );
        if let Some(current) = self.shared.registry.invalidate(&self.app, session.generation()) {
            current.close();
        }
        session.close();
    }

    fn evict_old_generations(&self, generation: u32) {
        let s = &self.shared;
        let retain = s.settings.retain_generations;
        if retain == 0 {
            return;
        }
        let Some(before) = generation.saturating_add(1).checked_sub(retain) else {
            return;
        };
        if before == 0 {
            return;
        }
        match s.log.evict_before(&self.app, before) {
            Ok(0) => {}
            Ok(evicted) => {
                tracing::debug!(app = %self.app, before, evicted, "evicted old log generations")
            }
            Err(e) => tracing::warn!(app = %self.app, error = %e, "log eviction failed"),
        }
    }

    /// Dial the push service until it answers, backing off between
    /// failures. The result re-enters through the intake.
    fn spawn_connect(&self) {
        let shared = Arc::clone(&self.shared);
        let app = self.app.clone();
        tokio::spawn(async move {
            let backoff = shared.settings.backoff.clone();
            let mut attempt = 0u32;
            loop {
                let delay = backoff.delay_for_attempt(attempt);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shared.stop.cancelled() => return,
                }
                let result = tokio::select! {
                    result = shared.connector.connect(&app, Service::Push) => result,
                    _ = shared.stop.cancelled() => return,
                };
                match result {
                    Ok(stream) => {
                        tracing::debug!(app = %app, attempt, "gateway dialed");
                        if shared.intake.send(Event::Connected { app, stream }).await.is_err() {
                            tracing::debug!("coordinator gone, dropping new connection");
                        }
                        return;
                    }
                    Err(e) => {
                        attempt += 1;
                        tracing::warn!(app = %app, attempt, error = %e, "gateway connect failed");
                        if backoff.should_give_up(attempt) {
                            let _ = shared.intake.send(Event::ConnectAbandoned { app }).await;
                            return;
                        }
                    }
                }
            }
        });
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Queue bookkeeping
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn defer(&self, notification: Notification, reason: &'static str) {
        self.shared.retry.push_fallback(&self.app, notification);
        TraceEvent::NotificationDeferred {
            app: self.app.to_string(),
            queue: "fallback",
            reason,
        }
        .emit();
    }

    fn dropped(&self, notification: &Notification, reason: &str) {
        tracing::debug!(app = %self.app, token = %notification.token, reason, "notification dropped");
        TraceEvent::NotificationDropped {
            app: self.app.to_string(),
            reason: reason.to_owned(),
        }
        .emit();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
