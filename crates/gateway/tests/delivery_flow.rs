//! End-to-end delivery flows against an in-process fake gateway.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use pk_domain::{AppKey, Notification, Payload};
use pk_gateway::connections::{
    ConnectError, ConnectionRegistry, GatewayConnector, GatewayStream, Service,
};
use pk_gateway::runtime::{Coordinator, CoordinatorDeps, DeliverySettings, StatusReplayPolicy};
use pk_protocol::{decode_push_frame, PushFrame};
use pk_store::{
    BadTokenStore, DurableLog, IdentityAllocator, KvStore, MemoryKv, StoreError,
    LATEST_IDENTITY_KEY,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fake gateway
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Hands the server end of every accepted connection to the test. Dials
/// block on `gate` until the test lets them through. The first `broken`
/// dials get a stream whose writes fail.
struct FakeGateway {
    connects: AtomicUsize,
    broken: AtomicUsize,
    gate: Semaphore,
    servers: mpsc::UnboundedSender<(AppKey, DuplexStream)>,
}

impl FakeGateway {
    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn open(&self, permits: usize) {
        self.gate.add_permits(permits);
    }
}

#[async_trait]
impl GatewayConnector for FakeGateway {
    async fn connect(&self, app: &AppKey, service: Service) -> Result<GatewayStream, ConnectError> {
        assert_eq!(service, Service::Push);
        self.gate
            .acquire()
            .await
            .map_err(|_| ConnectError::Handshake("gate closed".into()))?
            .forget();
        self.connects.fetch_add(1, Ordering::SeqCst);
        let broken = self
            .broken
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if broken {
            return Ok(Box::new(BrokenPipe));
        }
        let (client, server) = tokio::io::duplex(64 * 1024);
        self.servers
            .send((app.clone(), server))
            .map_err(|_| ConnectError::Handshake("test finished".into()))?;
        Ok(Box::new(client))
    }
}

/// Peer that never sends and refuses every write.
struct BrokenPipe;

impl AsyncRead for BrokenPipe {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

impl AsyncWrite for BrokenPipe {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

const OPEN: usize = Semaphore::MAX_PERMITS;

/// In-memory store whose next writes can be made to fail or panic.
#[derive(Default)]
struct FlakyKv {
    inner: MemoryKv,
    identity_failures: AtomicUsize,
    log_failures: AtomicUsize,
    log_panics: AtomicUsize,
}

fn take(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl KvStore for FlakyKv {
    fn put(&self, key: &[u8], value: &[u8]) -> pk_store::Result<()> {
        if key == LATEST_IDENTITY_KEY && take(&self.identity_failures) {
            return Err(StoreError::Unavailable("identity disk gone".into()));
        }
        if key.starts_with(b"log\0") {
            if take(&self.log_failures) {
                return Err(StoreError::Unavailable("log disk gone".into()));
            }
            if take(&self.log_panics) {
                panic!("log backend crashed");
            }
        }
        self.inner.put(key, value)
    }
    fn get(&self, key: &[u8]) -> pk_store::Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }
    fn scan(&self, from: &[u8], to: &[u8]) -> pk_store::Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.inner.scan(from, to)
    }
    fn last(&self, from: &[u8], to: &[u8]) -> pk_store::Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.inner.last(from, to)
    }
    fn delete_range(&self, from: &[u8], to: &[u8]) -> pk_store::Result<usize> {
        self.inner.delete_range(from, to)
    }
}

struct Harness {
    app: AppKey,
    coordinator: Coordinator,
    task: JoinHandle<()>,
    gateway: Arc<FakeGateway>,
    servers: mpsc::UnboundedReceiver<(AppKey, DuplexStream)>,
    registry: Arc<ConnectionRegistry>,
    identity: Arc<IdentityAllocator>,
    bad_tokens: Arc<BadTokenStore>,
    log: DurableLog,
}

impl Harness {
    async fn next_connection(&mut self) -> (AppKey, DuplexStream) {
        timeout(Duration::from_secs(5), self.servers.recv())
            .await
            .expect("gateway dialed in time")
            .expect("connector alive")
    }

    async fn next_server(&mut self) -> DuplexStream {
        let (app, server) = self.next_connection().await;
        assert_eq!(app, self.app);
        server
    }

    fn generation(&self) -> u32 {
        self.registry.get(&self.app).expect("entry exists").generation
    }

    async fn shutdown(self) {
        self.coordinator.begin_shutdown();
        timeout(Duration::from_secs(5), self.task)
            .await
            .expect("coordinator stopped in time")
            .expect("coordinator task");
    }
}

fn settings() -> DeliverySettings {
    DeliverySettings {
        idle_sweep_interval: None,
        reader_grace: Duration::from_millis(20),
        shutdown_countdown: Duration::from_millis(50),
        ..DeliverySettings::default()
    }
}

fn start(
    kv: Arc<dyn KvStore>,
    settings: DeliverySettings,
    policy: StatusReplayPolicy,
    gate: usize,
) -> Harness {
    let app = AppKey::production("com.example.app").unwrap();
    let (tx, servers) = mpsc::unbounded_channel();
    let gateway = Arc::new(FakeGateway {
        connects: AtomicUsize::new(0),
        broken: AtomicUsize::new(0),
        gate: Semaphore::new(gate),
        servers: tx,
    });
    let registry = Arc::new(ConnectionRegistry::new());
    let identity = Arc::new(IdentityAllocator::load(kv.clone()).unwrap());
    let bad_tokens = Arc::new(BadTokenStore::load(kv.clone()).unwrap());
    let log = DurableLog::new(kv);

    let (coordinator, task) = Coordinator::start(
        CoordinatorDeps {
            registry: registry.clone(),
            log: log.clone(),
            identity: identity.clone(),
            bad_tokens: bad_tokens.clone(),
            connector: gateway.clone(),
            policy: Arc::new(policy),
        },
        settings,
    );

    Harness {
        app,
        coordinator,
        task,
        gateway,
        servers,
        registry,
        identity,
        bad_tokens,
        log,
    }
}

fn token(i: u8) -> String {
    format!("{i:02x}").repeat(32)
}

fn note(app: &AppKey, i: u8) -> Notification {
    Notification::new(app.clone(), &token(i), Payload::alert(format!("T{i}"))).unwrap()
}

async fn read_frame(server: &mut DuplexStream) -> PushFrame {
    let mut head = [0u8; 11];
    timeout(Duration::from_secs(5), server.read_exact(&mut head))
        .await
        .expect("frame arrived in time")
        .unwrap();
    let token_len = usize::from(u16::from_be_bytes([head[9], head[10]]));
    let mut rest = vec![0u8; token_len + 2];
    server.read_exact(&mut rest).await.unwrap();
    let payload_len = usize::from(u16::from_be_bytes([rest[token_len], rest[token_len + 1]]));
    let mut payload = vec![0u8; payload_len];
    server.read_exact(&mut payload).await.unwrap();

    let mut frame = head.to_vec();
    frame.extend(rest);
    frame.extend(payload);
    let (decoded, used) = decode_push_frame(&frame).unwrap();
    assert_eq!(used, frame.len());
    decoded
}

async fn read_frames(server: &mut DuplexStream, n: usize) -> Vec<PushFrame> {
    let mut frames = Vec::with_capacity(n);
    for _ in 0..n {
        frames.push(read_frame(server).await);
    }
    frames
}

async fn assert_quiet(server: &mut DuplexStream) {
    let mut byte = [0u8; 1];
    assert!(
        timeout(Duration::from_millis(100), server.read(&mut byte))
            .await
            .is_err(),
        "unexpected bytes from the coordinator"
    );
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

fn tokens(frames: &[PushFrame]) -> Vec<String> {
    frames.iter().map(PushFrame::token_hex).collect()
}

fn seqs(frames: &[PushFrame]) -> Vec<u32> {
    frames.iter().map(|f| f.seq).collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn error_frame_replays_lost_range_in_order() {
    let kv = Arc::new(MemoryKv::new());
    kv.put(LATEST_IDENTITY_KEY, &100u32.to_be_bytes()).unwrap();
    let mut h = start(kv, settings(), StatusReplayPolicy::replay_all(), OPEN);

    for i in 1..=5 {
        h.coordinator.submit(note(&h.app, i)).await.unwrap();
    }
    let mut first = h.next_server().await;
    let sent = read_frames(&mut first, 5).await;
    assert_eq!(seqs(&sent), [101, 102, 103, 104, 105]);
    assert_eq!(tokens(&sent), (1..=5).map(token).collect::<Vec<_>>());
    assert_eq!(h.generation(), 1);

    // Invalid token after 102: everything after it is lost.
    first.write_all(&[8, 8, 0, 0, 0, 102]).await.unwrap();
    drop(first);

    let mut second = h.next_server().await;
    let replayed = read_frames(&mut second, 3).await;
    assert_eq!(tokens(&replayed), [token(3), token(4), token(5)]);
    assert_eq!(seqs(&replayed), [106, 107, 108]);
    assert_eq!(
        replayed[0].payload,
        Payload::alert("T3").to_json().unwrap()
    );
    assert_quiet(&mut second).await;

    assert_eq!(h.generation(), 2);
    assert_eq!(h.gateway.connects(), 2);
    assert_eq!(h.log.fetch(&h.app, 2, 106).unwrap().unwrap().token, token(3));
    h.shutdown().await;
}

#[tokio::test]
async fn fallback_waits_for_the_error_queue() {
    let mut h = start(
        Arc::new(MemoryKv::new()),
        settings(),
        StatusReplayPolicy::replay_all(),
        1,
    );

    for i in 1..=3 {
        h.coordinator.submit(note(&h.app, i)).await.unwrap();
    }
    let mut first = h.next_server().await;
    assert_eq!(seqs(&read_frames(&mut first, 3).await), [1, 2, 3]);

    first.write_all(&[8, 7, 0, 0, 0, 1]).await.unwrap();
    drop(first);

    // The reconnect is parked on the gate; T2 and T3 wait on the error queue.
    eventually(|| h.coordinator.pending(&h.app).error == 2).await;
    h.coordinator.submit(note(&h.app, 4)).await.unwrap();
    eventually(|| h.coordinator.pending(&h.app).fallback == 1).await;

    h.gateway.open(1);
    let mut second = h.next_server().await;
    let frames = read_frames(&mut second, 3).await;
    assert_eq!(tokens(&frames), [token(2), token(3), token(4)]);
    assert_eq!(seqs(&frames), [4, 5, 6]);
    assert_eq!(h.coordinator.pending(&h.app).total(), 0);
    h.shutdown().await;
}

#[tokio::test]
async fn idle_connection_is_replaced_exactly_once() {
    let settings = DeliverySettings {
        idle_timeout: Duration::from_millis(150),
        ..settings()
    };
    let mut h = start(
        Arc::new(MemoryKv::new()),
        settings,
        StatusReplayPolicy::replay_all(),
        OPEN,
    );

    h.coordinator.submit(note(&h.app, 1)).await.unwrap();
    let mut first = h.next_server().await;
    assert_eq!(read_frame(&mut first).await.seq, 1);

    tokio::time::sleep(Duration::from_millis(250)).await;
    h.coordinator.submit(note(&h.app, 2)).await.unwrap();
    h.coordinator.submit(note(&h.app, 3)).await.unwrap();

    let mut second = h.next_server().await;
    let frames = read_frames(&mut second, 2).await;
    assert_eq!(tokens(&frames), [token(2), token(3)]);
    let mut byte = [0u8; 1];
    assert_eq!(first.read(&mut byte).await.unwrap(), 0, "idle session closed");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.servers.try_recv().is_err(), "a second reconnect was made");
    assert_eq!(h.gateway.connects(), 2);
    assert_eq!(h.generation(), 2);
    h.shutdown().await;
}

#[tokio::test]
async fn oversized_token_consumes_no_identity() {
    let mut h = start(
        Arc::new(MemoryKv::new()),
        settings(),
        StatusReplayPolicy::replay_all(),
        OPEN,
    );

    let long = Notification::new(h.app.clone(), &"ab".repeat(33), Payload::alert("long")).unwrap();
    h.coordinator.submit(long).await.unwrap();
    h.coordinator.submit(note(&h.app, 1)).await.unwrap();

    let mut first = h.next_server().await;
    let frame = read_frame(&mut first).await;
    assert_eq!(frame.seq, 1);
    assert_eq!(frame.token_hex(), token(1));
    assert_quiet(&mut first).await;

    assert_eq!(h.identity.last(), 1);
    assert_eq!(h.log.fetch(&h.app, 1, 1).unwrap().unwrap().token, token(1));
    assert_eq!(h.log.fetch_range(&h.app, 1, 0, 2).unwrap().len(), 1);
    h.shutdown().await;
}

#[tokio::test]
async fn bad_tokens_are_dropped_before_sending() {
    let mut h = start(
        Arc::new(MemoryKv::new()),
        settings(),
        StatusReplayPolicy::replay_all(),
        OPEN,
    );
    h.bad_tokens.mark_bad(&h.app, &token(9)).unwrap();

    h.coordinator.submit(note(&h.app, 9)).await.unwrap();
    h.coordinator.submit(note(&h.app, 1)).await.unwrap();
    h.coordinator.submit(note(&h.app, 9)).await.unwrap();

    let mut first = h.next_server().await;
    assert_eq!(read_frame(&mut first).await.token_hex(), token(1));
    assert_quiet(&mut first).await;
    assert_eq!(h.identity.last(), 1);
    h.shutdown().await;
}

#[tokio::test]
async fn suppressed_status_skips_replay_and_old_generations_are_evicted() {
    let settings = DeliverySettings {
        retain_generations: 1,
        ..settings()
    };
    let mut h = start(
        Arc::new(MemoryKv::new()),
        settings,
        StatusReplayPolicy::suppressing([10]),
        OPEN,
    );

    for i in 1..=3 {
        h.coordinator.submit(note(&h.app, i)).await.unwrap();
    }
    let mut first = h.next_server().await;
    read_frames(&mut first, 3).await;
    first.write_all(&[8, 10, 0, 0, 0, 1]).await.unwrap();
    drop(first);

    let mut second = h.next_server().await;
    h.coordinator.submit(note(&h.app, 4)).await.unwrap();
    let frame = read_frame(&mut second).await;
    assert_eq!(frame.token_hex(), token(4));
    assert_eq!(frame.seq, 4);
    assert_quiet(&mut second).await;

    assert!(h.log.fetch(&h.app, 1, 2).unwrap().is_none());
    assert!(h.log.fetch(&h.app, 2, 4).unwrap().is_some());
    h.shutdown().await;
}

#[tokio::test]
async fn generations_continue_after_the_logged_ones() {
    let kv = Arc::new(MemoryKv::new());
    let app = AppKey::production("com.example.app").unwrap();
    DurableLog::new(kv.clone()).store(&app, 3, 1, &note(&app, 1)).unwrap();
    kv.put(LATEST_IDENTITY_KEY, &1u32.to_be_bytes()).unwrap();

    let mut h = start(kv, settings(), StatusReplayPolicy::replay_all(), OPEN);
    h.coordinator.submit(note(&h.app, 2)).await.unwrap();
    let mut first = h.next_server().await;
    assert_eq!(read_frame(&mut first).await.seq, 2);

    assert_eq!(h.generation(), 4);
    assert!(h.log.fetch(&h.app, 4, 2).unwrap().is_some());
    assert!(h.log.fetch(&h.app, 3, 1).unwrap().is_some());
    h.shutdown().await;
}

#[tokio::test]
async fn shutdown_drains_then_closes_connections() {
    let mut h = start(
        Arc::new(MemoryKv::new()),
        settings(),
        StatusReplayPolicy::replay_all(),
        OPEN,
    );
    h.coordinator.submit(note(&h.app, 1)).await.unwrap();
    let mut first = h.next_server().await;
    read_frame(&mut first).await;

    h.coordinator.begin_shutdown();
    assert!(h.coordinator.is_shutting_down());
    // Still accepted during the countdown.
    h.coordinator.submit(note(&h.app, 2)).await.unwrap();
    assert_eq!(read_frame(&mut first).await.token_hex(), token(2));

    let coordinator = h.coordinator.clone();
    let registry = h.registry.clone();
    let app = h.app.clone();
    timeout(Duration::from_secs(5), h.task)
        .await
        .expect("coordinator stopped in time")
        .unwrap();

    let mut byte = [0u8; 1];
    let n = timeout(Duration::from_secs(1), first.read(&mut byte))
        .await
        .expect("socket closed")
        .unwrap();
    assert_eq!(n, 0);
    assert_eq!(registry.get(&app).unwrap().state, "down");
    assert!(coordinator.submit(note(&app, 3)).await.is_err());
}

#[tokio::test]
async fn replay_covers_lost_range_across_other_apps_traffic() {
    let settings = DeliverySettings {
        max_replay_window: 2,
        ..settings()
    };
    let mut h = start(
        Arc::new(MemoryKv::new()),
        settings,
        StatusReplayPolicy::replay_all(),
        OPEN,
    );
    let other = AppKey::production("com.example.other").unwrap();

    h.coordinator.submit(note(&h.app, 1)).await.unwrap();
    h.coordinator.submit(note(&h.app, 2)).await.unwrap();
    let mut first = h.next_server().await;
    assert_eq!(seqs(&read_frames(&mut first, 2).await), [1, 2]);

    // The other app consumes seq 3..=12 from the shared counter.
    for i in 10..20 {
        h.coordinator.submit(note(&other, i)).await.unwrap();
    }
    let (app, mut other_server) = h.next_connection().await;
    assert_eq!(app, other);
    assert_eq!(read_frames(&mut other_server, 10).await.last().unwrap().seq, 12);

    h.coordinator.submit(note(&h.app, 3)).await.unwrap();
    assert_eq!(read_frame(&mut first).await.seq, 13);

    first.write_all(&[8, 8, 0, 0, 0, 1]).await.unwrap();
    drop(first);

    let mut second = h.next_server().await;
    let replayed = read_frames(&mut second, 2).await;
    assert_eq!(tokens(&replayed), [token(2), token(3)]);
    assert_eq!(seqs(&replayed), [14, 15]);
    assert_quiet(&mut second).await;
    assert_quiet(&mut other_server).await;
    h.shutdown().await;
}

#[tokio::test]
async fn replay_window_keeps_the_newest_entries_of_the_app() {
    let settings = DeliverySettings {
        max_replay_window: 1,
        ..settings()
    };
    let mut h = start(
        Arc::new(MemoryKv::new()),
        settings,
        StatusReplayPolicy::replay_all(),
        OPEN,
    );

    for i in 1..=3 {
        h.coordinator.submit(note(&h.app, i)).await.unwrap();
    }
    let mut first = h.next_server().await;
    read_frames(&mut first, 3).await;
    first.write_all(&[8, 8, 0, 0, 0, 1]).await.unwrap();
    drop(first);

    let mut second = h.next_server().await;
    assert_eq!(read_frame(&mut second).await.token_hex(), token(3));
    assert_quiet(&mut second).await;
    h.shutdown().await;
}

#[tokio::test]
async fn failed_write_requeues_and_reconnects_once() {
    let mut h = start(
        Arc::new(MemoryKv::new()),
        settings(),
        StatusReplayPolicy::replay_all(),
        OPEN,
    );
    h.gateway.broken.store(1, Ordering::SeqCst);

    h.coordinator.submit(note(&h.app, 1)).await.unwrap();

    // Seq 1 went into the refused write; the retry takes the next one.
    let mut second = h.next_server().await;
    let frame = read_frame(&mut second).await;
    assert_eq!(frame.token_hex(), token(1));
    assert_eq!(frame.seq, 2);
    assert_quiet(&mut second).await;

    assert!(h.servers.try_recv().is_err());
    assert_eq!(h.gateway.connects(), 2);
    assert_eq!(h.generation(), 2);
    assert_eq!(h.coordinator.pending(&h.app).total(), 0);
    h.shutdown().await;
}

#[tokio::test]
async fn identity_failure_drops_without_writing() {
    let kv = Arc::new(FlakyKv::default());
    let mut h = start(kv.clone(), settings(), StatusReplayPolicy::replay_all(), OPEN);

    h.coordinator.submit(note(&h.app, 1)).await.unwrap();
    let mut first = h.next_server().await;
    assert_eq!(read_frame(&mut first).await.seq, 1);

    kv.identity_failures.store(1, Ordering::SeqCst);
    h.coordinator.submit(note(&h.app, 2)).await.unwrap();
    h.coordinator.submit(note(&h.app, 3)).await.unwrap();

    let frame = read_frame(&mut first).await;
    assert_eq!(frame.token_hex(), token(3));
    assert_eq!(frame.seq, 2);
    assert_quiet(&mut first).await;
    assert_eq!(h.identity.last(), 2);
    assert_eq!(h.log.fetch_range(&h.app, 1, 0, u32::MAX).unwrap().len(), 2);
    h.shutdown().await;
}

#[tokio::test]
async fn log_failure_drops_without_writing() {
    let kv = Arc::new(FlakyKv::default());
    let mut h = start(kv.clone(), settings(), StatusReplayPolicy::replay_all(), OPEN);

    h.coordinator.submit(note(&h.app, 1)).await.unwrap();
    let mut first = h.next_server().await;
    read_frame(&mut first).await;

    kv.log_failures.store(1, Ordering::SeqCst);
    h.coordinator.submit(note(&h.app, 2)).await.unwrap();
    h.coordinator.submit(note(&h.app, 3)).await.unwrap();

    let frame = read_frame(&mut first).await;
    assert_eq!(frame.token_hex(), token(3));
    assert_eq!(frame.seq, 3);
    assert_quiet(&mut first).await;
    assert!(h.log.fetch(&h.app, 1, 2).unwrap().is_none());
    assert!(h.log.fetch(&h.app, 1, 3).unwrap().is_some());
    h.shutdown().await;
}

#[tokio::test]
async fn lane_keeps_running_after_a_panicking_send() {
    let kv = Arc::new(FlakyKv::default());
    let mut h = start(kv.clone(), settings(), StatusReplayPolicy::replay_all(), OPEN);

    h.coordinator.submit(note(&h.app, 1)).await.unwrap();
    let mut first = h.next_server().await;
    read_frame(&mut first).await;

    kv.log_panics.store(1, Ordering::SeqCst);
    h.coordinator.submit(note(&h.app, 2)).await.unwrap();
    h.coordinator.submit(note(&h.app, 3)).await.unwrap();

    let frame = read_frame(&mut first).await;
    assert_eq!(frame.token_hex(), token(3));
    assert_eq!(frame.seq, 3);
    assert_quiet(&mut first).await;
    assert_eq!(h.gateway.connects(), 1);
    h.shutdown().await;
}
