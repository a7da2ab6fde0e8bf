use crate::{be_u16, be_u32, need, DecodeError, TOKEN_LEN};

/// timestamp + token length + token
pub const FEEDBACK_TUPLE_LEN: usize = 4 + 2 + TOKEN_LEN;

/// A device token the feedback service reports as no longer valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackTuple {
    /// Unix seconds at which the gateway decided the app was uninstalled.
    pub timestamp: u32,
    /// Lowercase hex.
    pub token: String,
}

/// Parse one feedback tuple from the front of `bytes`, returning it with the
/// number of bytes consumed.
pub fn decode_feedback_tuple(bytes: &[u8]) -> Result<(FeedbackTuple, usize), DecodeError> {
    need(bytes, 6)?;
    let timestamp = be_u32(bytes, 0);
    let token_len = usize::from(be_u16(bytes, 4));
    if token_len == 0 {
        return Err(DecodeError::TokenLength(0));
    }
    need(bytes, 6 + token_len)?;
    let tuple = FeedbackTuple {
        timestamp,
        token: hex::encode(&bytes[6..6 + token_len]),
    };
    Ok((tuple, 6 + token_len))
}
