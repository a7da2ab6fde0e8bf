use crate::{be_u32, need, DecodeError, Status};

pub const COMMAND_ERROR: u8 = 8;
pub const ERROR_FRAME_LEN: usize = 6;

/// The gateway's report that it rejected a frame and is closing the
/// connection. Every frame after `last_good_seq` on that connection is lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorFrame {
    pub status: Status,
    pub last_good_seq: u32,
}

impl ErrorFrame {
    pub fn to_bytes(&self) -> [u8; ERROR_FRAME_LEN] {
        let seq = self.last_good_seq.to_be_bytes();
        [
            COMMAND_ERROR,
            self.status.code(),
            seq[0],
            seq[1],
            seq[2],
            seq[3],
        ]
    }
}

/// Parse the 6-byte error frame at the front of `bytes`.
pub fn decode_error_frame(bytes: &[u8]) -> Result<ErrorFrame, DecodeError> {
    need(bytes, ERROR_FRAME_LEN)?;
    if bytes[0] != COMMAND_ERROR {
        return Err(DecodeError::UnexpectedCommand(bytes[0]));
    }
    Ok(ErrorFrame {
        status: Status::from(bytes[1]),
        last_good_seq: be_u32(bytes, 2),
    })
}
