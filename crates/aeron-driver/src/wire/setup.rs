// SPDX-License-Identifier: Apache-2.0 OR MIT

//! SETUP frame codec: sent by the Sender until the publication sees its
//! first SM, and used by the Receiver to bootstrap a new image with the
//! publication's current position and term geometry.
//!
//! ```text
//! |                          Term Offset                         |
//! |                          Session ID                          |
//! |                          Stream ID                           |
//! |                       Initial Term ID                        |
//! |                        Active Term ID                        |
//! |                         Term Length                           |
//! |                             MTU                               |
//! |                             TTL                               |
//! ```

use super::header::{HeaderView, HeaderViewMut};
use super::{FrameType, WireError};

/// Fixed byte length of a SETUP frame.
pub const SETUP_FRAME_LENGTH: usize = 40;

const TERM_OFFSET: usize = 8;
const SESSION_ID: usize = 12;
const STREAM_ID: usize = 16;
const INITIAL_TERM_ID: usize = 20;
const ACTIVE_TERM_ID: usize = 24;
const TERM_LENGTH: usize = 28;
const MTU: usize = 32;
const TTL: usize = 36;

/// Read-only view over a SETUP frame.
#[derive(Debug, Clone, Copy)]
pub struct SetupView<'a> {
    buf: &'a [u8],
}

impl<'a> SetupView<'a> {
    pub fn new(buf: &'a [u8]) -> Result<Self, WireError> {
        let header = HeaderView::new(buf)?;
        header.validate(SETUP_FRAME_LENGTH)?;
        if header.frame_type()? != FrameType::Setup {
            return Err(WireError::BadFrame);
        }
        if buf.len() < SETUP_FRAME_LENGTH {
            return Err(WireError::ShortBuffer);
        }
        Ok(Self { buf })
    }

    #[must_use]
    pub fn term_offset(&self) -> i32 {
        i32::from_le_bytes(self.buf[TERM_OFFSET..TERM_OFFSET + 4].try_into().unwrap())
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
    pub fn initial_term_id(&self) -> i32 {
        i32::from_le_bytes(
            self.buf[INITIAL_TERM_ID..INITIAL_TERM_ID + 4]
                .try_into()
                .unwrap(),
        )
    }

    #[must_use]
    pub fn active_term_id(&self) -> i32 {
        i32::from_le_bytes(
            self.buf[ACTIVE_TERM_ID..ACTIVE_TERM_ID + 4]
                .try_into()
                .unwrap(),
        )
    }

    #[must_use]
    pub fn term_length(&self) -> i32 {
        i32::from_le_bytes(self.buf[TERM_LENGTH..TERM_LENGTH + 4].try_into().unwrap())
    }

    #[must_use]
    pub fn mtu(&self) -> i32 {
        i32::from_le_bytes(self.buf[MTU..MTU + 4].try_into().unwrap())
    }

    #[must_use]
    pub fn ttl(&self) -> i32 {
        i32::from_le_bytes(self.buf[TTL..TTL + 4].try_into().unwrap())
    }
}

/// Parameters for encoding a SETUP frame.
#[derive(Debug, Clone, Copy)]
pub struct SetupFields {
    pub term_offset: i32,
    pub session_id: i32,
    pub stream_id: i32,
    pub initial_term_id: i32,
    pub active_term_id: i32,
    pub term_length: i32,
    pub mtu: i32,
    pub ttl: i32,
}

/// Encode a SETUP frame into `buf`, which must be at least
/// [`SETUP_FRAME_LENGTH`] bytes.
pub fn encode(buf: &mut [u8], fields: &SetupFields) -> Result<(), WireError> {
    if buf.len() < SETUP_FRAME_LENGTH {
        return Err(WireError::ShortBuffer);
    }
    HeaderViewMut::new(buf)
        .unwrap()
        .put(SETUP_FRAME_LENGTH as i32, 0, FrameType::Setup);
    buf[TERM_OFFSET..TERM_OFFSET + 4].copy_from_slice(&fields.term_offset.to_le_bytes());
    buf[SESSION_ID..SESSION_ID + 4].copy_from_slice(&fields.session_id.to_le_bytes());
    buf[STREAM_ID..STREAM_ID + 4].copy_from_slice(&fields.stream_id.to_le_bytes());
    buf[INITIAL_TERM_ID..INITIAL_TERM_ID + 4]
        .copy_from_slice(&fields.initial_term_id.to_le_bytes());
    buf[ACTIVE_TERM_ID..ACTIVE_TERM_ID + 4].copy_from_slice(&fields.active_term_id.to_le_bytes());
    buf[TERM_LENGTH..TERM_LENGTH + 4].copy_from_slice(&fields.term_length.to_le_bytes());
    buf[MTU..MTU + 4].copy_from_slice(&fields.mtu.to_le_bytes());
    buf[TTL..TTL + 4].copy_from_slice(&fields.ttl.to_le_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let mut buf = [0u8; SETUP_FRAME_LENGTH];
        let fields = SetupFields {
            term_offset: 0,
            session_id: 7,
            stream_id: 10,
            initial_term_id: 100,
            active_term_id: 100,
            term_length: 65_536,
            mtu: 1408,
            ttl: 0,
        };
        encode(&mut buf, &fields).unwrap();

        let view = SetupView::new(&buf).unwrap();
        assert_eq!(view.session_id(), 7);
        assert_eq!(view.stream_id(), 10);
        assert_eq!(view.initial_term_id(), 100);
        assert_eq!(view.active_term_id(), 100);
        assert_eq!(view.term_length(), 65_536);
        assert_eq!(view.mtu(), 1408);
    }
}
