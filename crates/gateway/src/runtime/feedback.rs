//! Feedback job: asks the gateway's feedback service which device tokens
//! are gone for good and records them in the bad-token store.

use std::sync::Arc;
use std::time::Duration;

use pk_domain::trace::TraceEvent;
use pk_domain::AppKey;
use pk_protocol::{decode_feedback_tuple, DecodeError, FeedbackTuple};
use pk_store::BadTokenStore;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::connections::{ConnectError, CredentialSource, GatewayConnector, Service};

#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    #[error("connect: {0}")]
    Connect(#[from] ConnectError),
    #[error("read: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedbackReport {
    pub tuples: usize,
    pub newly_marked: usize,
}

pub struct FeedbackJob {
    connector: Arc<dyn GatewayConnector>,
    credentials: Arc<dyn CredentialSource>,
    bad_tokens: Arc<BadTokenStore>,
    read_timeout: Duration,
}

impl FeedbackJob {
    pub fn new(
        connector: Arc<dyn GatewayConnector>,
        credentials: Arc<dyn CredentialSource>,
        bad_tokens: Arc<BadTokenStore>,
        read_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            credentials,
            bad_tokens,
            read_timeout,
        }
    }

    /// Read every tuple the feedback service has for `app` until it closes
    /// the connection or goes quiet for the read timeout.
    pub async fn collect(&self, app: &AppKey) -> Result<FeedbackReport, FeedbackError> {
        let mut stream = self.connector.connect(app, Service::Feedback).await?;
        let mut report = FeedbackReport::default();
        let mut pending: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 2048];

        loop {
            let n = match timeout(self.read_timeout, stream.read(&mut chunk)).await {
                Ok(read) => read?,
                Err(_) => {
                    tracing::debug!(app = %app, "feedback service went quiet");
                    break;
                }
            };
            if n == 0 {
                break;
            }
            pending.extend_from_slice(&chunk[..n]);

            let mut consumed = 0;
            loop {
                match decode_feedback_tuple(&pending[consumed..]) {
                    Ok((tuple, used)) => {
                        consumed += used;
                        self.record(app, &tuple, &mut report);
                    }
                    Err(DecodeError::Incomplete { .. }) => break,
                    Err(e) => return Err(e.into()),
                }
            }
            pending.drain(..consumed);
        }

        if !pending.is_empty() {
            tracing::warn!(app = %app, trailing = pending.len(), "feedback stream ended mid-tuple");
        }
        Ok(report)
    }

    fn record(&self, app: &AppKey, tuple: &FeedbackTuple, report: &mut FeedbackReport) {
        report.tuples += 1;
        match self.bad_tokens.mark_bad(app, &tuple.token) {
            Ok(true) => {
                report.newly_marked += 1;
                TraceEvent::BadTokenMarked {
                    app: app.to_string(),
                    token: tuple.token.clone(),
                    source: "feedback",
                }
                .emit();
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(app = %app, token = %tuple.token, error = %e, "cannot record bad token"),
        }
    }

    /// One pass over every installed app. Returns the number of tokens newly
    /// marked bad.
    pub async fn run_cycle(&self) -> usize {
        let mut marked = 0;
        for app in self.credentials.installed() {
            match self.collect(&app).await {
                Ok(report) => {
                    tracing::info!(
                        app = %app,
                        tuples = report.tuples,
                        newly_marked = report.newly_marked,
                        "feedback collected"
                    );
                    marked += report.newly_marked;
                }
                Err(e) => tracing::warn!(app = %app, error = %e, "feedback collection failed"),
            }
        }
        marked
    }

    /// Run a cycle now and then every `every` until `stop` fires.
    pub fn spawn(self, every: Duration, stop: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let marked = self.run_cycle().await;
                        tracing::debug!(marked, "feedback cycle finished");
                    }
                    _ = stop.cancelled() => break,
                }
            }
        })
    }
}
