use std::io;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pk_domain::AppKey;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::GatewayStream;

/// One generation of an app's gateway connection.
///
/// Writers share the write half behind an async mutex; the background
/// reader owns the read half. Closing cancels the reader and refuses further
/// writes, it does not wait for either.
pub struct Session {
    app: AppKey,
    generation: u32,
    writer: tokio::sync::Mutex<WriteHalf<GatewayStream>>,
    first_seq: AtomicU32,
    high_water: AtomicU32,
    frames_sent: AtomicU64,
    last_activity: Mutex<Instant>,
    opened_at: DateTime<Utc>,
    close: CancellationToken,
}

impl Session {
    pub(crate) fn new(app: AppKey, generation: u32, writer: WriteHalf<GatewayStream>) -> Self {
        Self {
            app,
            generation,
            writer: tokio::sync::Mutex::new(writer),
            first_seq: AtomicU32::new(0),
            high_water: AtomicU32::new(0),
            frames_sent: AtomicU64::new(0),
            last_activity: Mutex::new(Instant::now()),
            opened_at: Utc::now(),
            close: CancellationToken::new(),
        }
    }

    pub fn app(&self) -> &AppKey {
        &self.app
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Highest sequence handed to the socket, `0` before the first write.
    pub fn high_water(&self) -> u32 {
        self.high_water.load(Ordering::SeqCst)
    }

    /// Sequence of the first frame written, `0` before the first write.
    pub fn first_seq(&self) -> u32 {
        self.first_seq.load(Ordering::SeqCst)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub fn is_idle(&self, threshold: Duration) -> bool {
        self.idle_for() > threshold
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_cancelled()
    }

    pub(crate) fn close_token(&self) -> &CancellationToken {
        &self.close
    }

    /// Stop the reader and refuse further writes. Idempotent.
    pub fn close(&self) {
        self.close.cancel();
    }

    /// Write one encoded frame. Marks `seq` as handed to the socket only
    /// after the write and flush succeed.
    pub async fn write_frame(&self, seq: u32, frame: &[u8]) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "session closed"));
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(frame).await?;
        writer.flush().await?;
        drop(writer);

        let _ = self
            .first_seq
            .compare_exchange(0, seq, Ordering::SeqCst, Ordering::SeqCst);
        self.high_water.fetch_max(seq, Ordering::SeqCst);
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        *self.last_activity.lock() = Instant::now();
        Ok(())
    }

    /// Close and shut the write half down so the peer sees EOF.
    pub async fn shutdown(&self) {
        self.close();
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::debug!(app = %self.app, generation = self.generation, error = %e, "socket shutdown failed");
        }
    }
}
