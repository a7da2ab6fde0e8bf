//! Binary wire protocol of the push gateway.
//!
//! Three record types travel over the gateway sockets, all big-endian:
//!
//! - push frame (client → gateway): `1 | seq u32 | expiry u32 | len u16 | token | len u16 | payload`
//! - error frame (gateway → client, then close): `8 | status u8 | last good seq u32`
//! - feedback tuple (feedback service → client): `time u32 | len u16 | token`

mod error_frame;
mod feedback;
mod push;
mod status;

pub use error_frame::{decode_error_frame, ErrorFrame, COMMAND_ERROR, ERROR_FRAME_LEN};
pub use feedback::{decode_feedback_tuple, FeedbackTuple, FEEDBACK_TUPLE_LEN};
pub use push::{
    decode_push_frame, decode_token, encode, prepare, PreparedFrame, PushFrame, COMMAND_PUSH,
    TOKEN_LEN,
};
pub use status::Status;

use pk_domain::PayloadError;

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("invalid device token: {0}")]
    InvalidToken(String),
    #[error("payload is empty")]
    EmptyPayload,
    #[error("payload too large: {size} bytes after truncation, limit {limit}")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("payload: {0}")]
    Payload(PayloadError),
}

impl From<PayloadError> for EncodeError {
    fn from(err: PayloadError) -> Self {
        match err {
            PayloadError::Empty => EncodeError::EmptyPayload,
            PayloadError::TooLarge { size, limit } => EncodeError::PayloadTooLarge { size, limit },
            other => EncodeError::Payload(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("incomplete frame: need {needed} bytes, have {available}")]
    Incomplete { needed: usize, available: usize },
    #[error("unexpected command byte {0}")]
    UnexpectedCommand(u8),
    #[error("unexpected token length {0}")]
    TokenLength(usize),
}

fn need(bytes: &[u8], needed: usize) -> Result<(), DecodeError> {
    if bytes.len() < needed {
        return Err(DecodeError::Incomplete {
            needed,
            available: bytes.len(),
        });
    }
    Ok(())
}

fn be_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

fn be_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}
