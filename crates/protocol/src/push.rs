use pk_domain::{Notification, Payload, MAX_PAYLOAD_BYTES};

use crate::{be_u16, be_u32, need, DecodeError, EncodeError};

pub const COMMAND_PUSH: u8 = 1;
pub const TOKEN_LEN: usize = 32;

/// command + seq + expiry + token length
const HEADER_LEN: usize = 1 + 4 + 4 + 2;

/// A notification whose token and payload passed validation.
///
/// Everything that can fail happens in [`prepare`]; turning the prepared
/// frame into bytes only needs the sequence and expiry, so the caller can
/// validate before it spends an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedFrame {
    token: [u8; TOKEN_LEN],
    payload: Vec<u8>,
}

impl PreparedFrame {
    pub fn token(&self) -> &[u8; TOKEN_LEN] {
        &self.token
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn frame_len(&self) -> usize {
        HEADER_LEN + TOKEN_LEN + 2 + self.payload.len()
    }

    pub fn encode(&self, seq: u32, expiry: u32) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.frame_len());
        frame.push(COMMAND_PUSH);
        frame.extend_from_slice(&seq.to_be_bytes());
        frame.extend_from_slice(&expiry.to_be_bytes());
        frame.extend_from_slice(&(TOKEN_LEN as u16).to_be_bytes());
        frame.extend_from_slice(&self.token);
        // The payload is capped at MAX_PAYLOAD_BYTES, well inside u16.
        frame.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        frame.extend_from_slice(&self.payload);
        frame
    }
}

/// Validate the token and render the payload of `notification`.
pub fn prepare(notification: &Notification) -> Result<PreparedFrame, EncodeError> {
    prepare_parts(&notification.token, &notification.payload)
}

fn prepare_parts(token: &str, payload: &Payload) -> Result<PreparedFrame, EncodeError> {
    let token = decode_token(token)?;
    let payload = payload.encode(MAX_PAYLOAD_BYTES)?;
    Ok(PreparedFrame { token, payload })
}

/// Encode a complete push frame in one step.
pub fn encode(
    seq: u32,
    expiry: u32,
    token: &str,
    payload: &Payload,
) -> Result<Vec<u8>, EncodeError> {
    Ok(prepare_parts(token, payload)?.encode(seq, expiry))
}

/// Parse a hex device token into its 32 raw bytes.
pub fn decode_token(token: &str) -> Result<[u8; TOKEN_LEN], EncodeError> {
    let bytes = hex::decode(token)
        .map_err(|e| EncodeError::InvalidToken(format!("not hex: {e}")))?;
    <[u8; TOKEN_LEN]>::try_from(bytes.as_slice()).map_err(|_| {
        EncodeError::InvalidToken(format!(
            "expected {TOKEN_LEN} bytes, got {}",
            bytes.len()
        ))
    })
}

/// A push frame parsed back from bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushFrame {
    pub seq: u32,
    pub expiry: u32,
    pub token: Vec<u8>,
    pub payload: Vec<u8>,
}

impl PushFrame {
    pub fn token_hex(&self) -> String {
        hex::encode(&self.token)
    }
}

/// Parse one push frame from the front of `bytes`, returning it with the
/// number of bytes consumed.
pub fn decode_push_frame(bytes: &[u8]) -> Result<(PushFrame, usize), DecodeError> {
    need(bytes, HEADER_LEN)?;
    if bytes[0] != COMMAND_PUSH {
        return Err(DecodeError::UnexpectedCommand(bytes[0]));
    }
    let seq = be_u32(bytes, 1);
    let expiry = be_u32(bytes, 5);
    let token_len = usize::from(be_u16(bytes, 9));

    let payload_len_at = HEADER_LEN + token_len;
    need(bytes, payload_len_at + 2)?;
    let payload_len = usize::from(be_u16(bytes, payload_len_at));
    let end = payload_len_at + 2 + payload_len;
    need(bytes, end)?;

    let frame = PushFrame {
        seq,
        expiry,
        token: bytes[HEADER_LEN..payload_len_at].to_vec(),
        payload: bytes[payload_len_at + 2..end].to_vec(),
    };
    Ok((frame, end))
}
