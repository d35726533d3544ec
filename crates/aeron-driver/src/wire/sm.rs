// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Status Message (SM) frame codec: a receiver's window advertisement to
//! a publisher, carrying the consumption position and the receiver's
//! available window.
//!
//! ```text
//! |                          Session ID                          |
//! |                          Stream ID                           |
//! |                     Consumption Term ID                      |
//! |                    Consumption Term Offset                   |
//! |                       Receiver Window                        |
//! |                Receiver ID (optional, 8 bytes)                |
//! ```

use super::header::{HeaderView, HeaderViewMut};
use super::{FrameType, WireError};

/// Fixed byte length of an SM frame without the optional receiver-id field.
pub const SM_FRAME_LENGTH: usize = 28;
/// Fixed byte length of an SM frame with the optional receiver-id field.
pub const SM_FRAME_LENGTH_WITH_RECEIVER_ID: usize = 36;

const SESSION_ID: usize = 8;
const STREAM_ID: usize = 12;
const CONSUMPTION_TERM_ID: usize = 16;
const CONSUMPTION_TERM_OFFSET: usize = 20;
const RECEIVER_WINDOW: usize = 24;
const RECEIVER_ID: usize = 28;

/// Read-only view over an SM frame.
#[derive(Debug, Clone, Copy)]
pub struct StatusMessageView<'a> {
    buf: &'a [u8],
}

impl<'a> StatusMessageView<'a> {
    pub fn new(buf: &'a [u8]) -> Result<Self, WireError> {
        let header = HeaderView::new(buf)?;
        header.validate(SM_FRAME_LENGTH)?;
        if header.frame_type()? != FrameType::StatusMessage {
            return Err(WireError::BadFrame);
        }
        if buf.len() < SM_FRAME_LENGTH {
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
    pub fn consumption_term_id(&self) -> i32 {
        i32::from_le_bytes(
            self.buf[CONSUMPTION_TERM_ID..CONSUMPTION_TERM_ID + 4]
                .try_into()
                .unwrap(),
        )
    }

    #[must_use]
    pub fn consumption_term_offset(&self) -> i32 {
        i32::from_le_bytes(
            self.buf[CONSUMPTION_TERM_OFFSET..CONSUMPTION_TERM_OFFSET + 4]
                .try_into()
                .unwrap(),
        )
    }

    #[must_use]
    pub fn receiver_window(&self) -> i32 {
        i32::from_le_bytes(
            self.buf[RECEIVER_WINDOW..RECEIVER_WINDOW + 4]
                .try_into()
                .unwrap(),
        )
    }

    /// The optional receiver-id field, present only when `frame_length`
    /// covers it.
    #[must_use]
    pub fn receiver_id(&self) -> Option<i64> {
        let frame_length = self.header().frame_length() as usize;
        if frame_length < SM_FRAME_LENGTH_WITH_RECEIVER_ID || self.buf.len() < RECEIVER_ID + 8 {
            return None;
        }
        Some(i64::from_le_bytes(
            self.buf[RECEIVER_ID..RECEIVER_ID + 8].try_into().unwrap(),
        ))
    }

    #[must_use]
    pub fn header(&self) -> HeaderView<'a> {
        HeaderView::new(self.buf).expect("validated in new")
    }
}

/// Encode an SM frame into `buf` without the optional receiver-id field.
/// `buf` must be at least [`SM_FRAME_LENGTH`] bytes.
pub fn encode(
    buf: &mut [u8],
    session_id: i32,
    stream_id: i32,
    consumption_term_id: i32,
    consumption_term_offset: i32,
    receiver_window: i32,
) -> Result<(), WireError> {
    if buf.len() < SM_FRAME_LENGTH {
        return Err(WireError::ShortBuffer);
    }
    HeaderViewMut::new(buf)
        .unwrap()
        .put(SM_FRAME_LENGTH as i32, 0, FrameType::StatusMessage);
    buf[SESSION_ID..SESSION_ID + 4].copy_from_slice(&session_id.to_le_bytes());
    buf[STREAM_ID..STREAM_ID + 4].copy_from_slice(&stream_id.to_le_bytes());
    buf[CONSUMPTION_TERM_ID..CONSUMPTION_TERM_ID + 4]
        .copy_from_slice(&consumption_term_id.to_le_bytes());
    buf[CONSUMPTION_TERM_OFFSET..CONSUMPTION_TERM_OFFSET + 4]
        .copy_from_slice(&consumption_term_offset.to_le_bytes());
    buf[RECEIVER_WINDOW..RECEIVER_WINDOW + 4].copy_from_slice(&receiver_window.to_le_bytes());
    Ok(())
}

/// Encode an SM frame with the optional receiver-id field set. `buf` must
/// be at least [`SM_FRAME_LENGTH_WITH_RECEIVER_ID`] bytes.
pub fn encode_with_receiver_id(
    buf: &mut [u8],
    session_id: i32,
    stream_id: i32,
    consumption_term_id: i32,
    consumption_term_offset: i32,
    receiver_window: i32,
    receiver_id: i64,
) -> Result<(), WireError> {
    if buf.len() < SM_FRAME_LENGTH_WITH_RECEIVER_ID {
        return Err(WireError::ShortBuffer);
    }
    encode(
        buf,
        session_id,
        stream_id,
        consumption_term_id,
        consumption_term_offset,
        receiver_window,
    )?;
    HeaderViewMut::new(buf)
        .unwrap()
        .put_frame_length(SM_FRAME_LENGTH_WITH_RECEIVER_ID as i32);
    buf[RECEIVER_ID..RECEIVER_ID + 8].copy_from_slice(&receiver_id.to_le_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_without_receiver_id() {
        let mut buf = [0u8; SM_FRAME_LENGTH];
        encode(&mut buf, 7, 10, 3, 64, 131_072).unwrap();

        let view = StatusMessageView::new(&buf).unwrap();
        assert_eq!(view.consumption_term_id(), 3);
        assert_eq!(view.consumption_term_offset(), 64);
        assert_eq!(view.receiver_window(), 131_072);
        assert_eq!(view.receiver_id(), None);
    }

    #[test]
    fn round_trips_with_receiver_id() {
        let mut buf = [0u8; SM_FRAME_LENGTH_WITH_RECEIVER_ID];
        encode_with_receiver_id(&mut buf, 7, 10, 3, 64, 131_072, 42).unwrap();

        let view = StatusMessageView::new(&buf).unwrap();
        assert_eq!(view.receiver_id(), Some(42));
    }
}
