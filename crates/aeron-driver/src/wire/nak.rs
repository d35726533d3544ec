// SPDX-License-Identifier: Apache-2.0 OR MIT

//! NAK frame codec: a receiver's selective negative acknowledgement for a
//! missing `(termId, termOffset, length)` range.
//!
//! ```text
//!  0                   1                   2                   3
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Frame Length                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Version      |    Flags      |         Type (0x02)           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          Session ID                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          Stream ID                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Term ID                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          Term Offset                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                            Length                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use super::header::{HeaderView, HeaderViewMut};
use super::{FrameType, WireError};

/// Fixed byte length of a NAK frame.
pub const NAK_FRAME_LENGTH: usize = 28;

const SESSION_ID: usize = 8;
const STREAM_ID: usize = 12;
const TERM_ID: usize = 16;
const TERM_OFFSET: usize = 20;
const LENGTH: usize = 24;

/// Read-only view over a NAK frame.
#[derive(Debug, Clone, Copy)]
pub struct NakView<'a> {
    buf: &'a [u8],
}

impl<'a> NakView<'a> {
    pub fn new(buf: &'a [u8]) -> Result<Self, WireError> {
        let header = HeaderView::new(buf)?;
        header.validate(NAK_FRAME_LENGTH)?;
        if header.frame_type()? != FrameType::Nak {
            return Err(WireError::BadFrame);
        }
        if buf.len() < NAK_FRAME_LENGTH {
            return Err(WireError::ShortBuffer);
        }
        Ok(Self { buf })
    }

    #[must_use]
    pub fn session_id(&self) -> i32 {
        i32::from_le_bytes(self.buf[SESSION_ID..SESSION_ID + 4].try_into().unwrap())
    }

    #[must_use]
    pub fn stream_id(&self) -> i32 {
        i32::from_le_bytes(self.buf[STREAM_ID..STREAM_ID + 4].try_into().unwrap())
    }

    #[must_use]
    pub fn term_id(&self) -> i32 {
        i32::from_le_bytes(self.buf[TERM_ID..TERM_ID + 4].try_into().unwrap())
    }

    #[must_use]
    pub fn term_offset(&self) -> i32 {
        i32::from_le_bytes(self.buf[TERM_OFFSET..TERM_OFFSET + 4].try_into().unwrap())
    }

    #[must_use]
    pub fn length(&self) -> i32 {
        i32::from_le_bytes(self.buf[LENGTH..LENGTH + 4].try_into().unwrap())
    }
}

/// Encode a NAK frame into `buf`, which must be at least
/// [`NAK_FRAME_LENGTH`] bytes.
pub fn encode(
    buf: &mut [u8],
    session_id: i32,
    stream_id: i32,
    term_id: i32,
    term_offset: i32,
    length: i32,
) -> Result<(), WireError> {
    if buf.len() < NAK_FRAME_LENGTH {
        return Err(WireError::ShortBuffer);
    }
    HeaderViewMut::new(buf)
        .unwrap()
        .put(NAK_FRAME_LENGTH as i32, 0, FrameType::Nak);
    buf[SESSION_ID..SESSION_ID + 4].copy_from_slice(&session_id.to_le_bytes());
    buf[STREAM_ID..STREAM_ID + 4].copy_from_slice(&stream_id.to_le_bytes());
    buf[TERM_ID..TERM_ID + 4].copy_from_slice(&term_id.to_le_bytes());
    buf[TERM_OFFSET..TERM_OFFSET + 4].copy_from_slice(&term_offset.to_le_bytes());
    buf[LENGTH..LENGTH + 4].copy_from_slice(&length.to_le_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let mut buf = [0u8; NAK_FRAME_LENGTH];
        encode(&mut buf, 7, 10, 3, 64, 48).unwrap();

        let view = NakView::new(&buf).unwrap();
        assert_eq!(view.session_id(), 7);
        assert_eq!(view.stream_id(), 10);
        assert_eq!(view.term_id(), 3);
        assert_eq!(view.term_offset(), 64);
        assert_eq!(view.length(), 48);
    }

    #[test]
    fn rejects_short_buffer() {
        let mut buf = [0u8; 4];
        assert_eq!(
            encode(&mut buf, 0, 0, 0, 0, 0).unwrap_err(),
            WireError::ShortBuffer
        );
    }
}
