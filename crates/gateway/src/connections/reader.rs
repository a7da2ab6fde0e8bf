//! Background reader: one task per session, blocked on the socket until
//! the gateway reports an error or the connection ends.
//!
//! The gateway never answers a successful push, so the only inbound bytes
//! ever expected are a single 6-byte error frame right before it closes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use pk_protocol::{decode_error_frame, DecodeError, ErrorFrame, ERROR_FRAME_LEN};
use tokio::io::{AsyncReadExt, ReadHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};

use super::session::Session;
use super::GatewayStream;

/// Why a session's reader stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LostReason {
    /// The gateway rejected a frame.
    ErrorFrame(ErrorFrame),
    /// Bytes arrived that are not a complete error frame.
    Decode(DecodeError),
    /// The gateway closed without saying anything.
    Closed,
    Io(String),
    /// Closed on our side and nothing arrived during the grace period.
    LocalClose,
}

impl fmt::Display for LostReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LostReason::ErrorFrame(frame) => {
                write!(f, "error frame: {} after seq {}", frame.status, frame.last_good_seq)
            }
            LostReason::Decode(e) => write!(f, "undecodable response: {e}"),
            LostReason::Closed => f.write_str("closed by gateway"),
            LostReason::Io(e) => write!(f, "read failed: {e}"),
            LostReason::LocalClose => f.write_str("closed locally"),
        }
    }
}

pub struct ConnectionLost {
    pub session: Arc<Session>,
    pub reason: LostReason,
}

/// Spawn the reader of `session`; it reports exactly once on `events`.
pub fn spawn_reader<E>(
    session: Arc<Session>,
    read: ReadHalf<GatewayStream>,
    grace: Duration,
    events: mpsc::Sender<E>,
) -> JoinHandle<()>
where
    E: From<ConnectionLost> + Send + 'static,
{
    tokio::spawn(async move {
        let reason = read_until_lost(&session, read, grace).await;
        tracing::debug!(
            app = %session.app(),
            generation = session.generation(),
            reason = %reason,
            "gateway reader finished"
        );
        if events
            .send(E::from(ConnectionLost { session, reason }))
            .await
            .is_err()
        {
            tracing::debug!("coordinator gone, dropping connection-lost report");
        }
    })
}

pub async fn read_until_lost(
    session: &Session,
    mut read: ReadHalf<GatewayStream>,
    grace: Duration,
) -> LostReason {
    let mut buf = [0u8; ERROR_FRAME_LEN];
    let mut filled = 0;

    loop {
        tokio::select! {
            res = read.read(&mut buf[filled..]) => {
                match step(&buf, &mut filled, res) {
                    Some(reason) => return reason,
                    None => continue,
                }
            }
            _ = session.close_token().cancelled() => break,
        }
    }

    // Closed locally: an error frame may already be on its way.
    let deadline = Instant::now() + grace;
    loop {
        match timeout_at(deadline, read.read(&mut buf[filled..])).await {
            Ok(res) => {
                if let Some(reason) = step(&buf, &mut filled, res) {
                    return reason;
                }
            }
            Err(_) if filled == 0 => return LostReason::LocalClose,
            Err(_) => return incomplete(filled),
        }
    }
}

fn step(
    buf: &[u8; ERROR_FRAME_LEN],
    filled: &mut usize,
    res: std::io::Result<usize>,
) -> Option<LostReason> {
    match res {
        Ok(0) if *filled == 0 => Some(LostReason::Closed),
        Ok(0) => Some(incomplete(*filled)),
        Ok(n) => {
            *filled += n;
            if *filled < ERROR_FRAME_LEN {
                return None;
            }
            Some(match decode_error_frame(buf) {
                Ok(frame) => LostReason::ErrorFrame(frame),
                Err(e) => LostReason::Decode(e),
            })
        }
        Err(e) => Some(LostReason::Io(e.to_string())),
    }
}

fn incomplete(filled: usize) -> LostReason {
    LostReason::Decode(DecodeError::Incomplete {
        needed: ERROR_FRAME_LEN,
        available: filled,
    })
}
