// SPDX-License-Identifier: Apache-2.0 OR MIT

//! DATA/PAD frame codec.
//!
//! ```text
//!  0                   1                   2                   3
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Frame Length                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Version      |    Flags      |      Type (0x01 or 0x00)      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          Term Offset                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          Session ID                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          Stream ID                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Term ID                             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Reserved Value                        |
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                            Payload                           ...
//! ```
//!
//! A DATA frame with zero-length payload is a heartbeat. `frame_type`
//! (PAD vs DATA) only ever matters to the log-buffer rotation logic; the
//! wire layout of the two is identical.

use super::header::{HeaderView, HeaderViewMut, HEADER_LENGTH};
use super::{FrameType, WireError};

/// Fixed header length of a DATA/PAD frame, payload excluded.
pub const DATA_HEADER_LENGTH: usize = 32;

const TERM_OFFSET: usize = 8;
const SESSION_ID: usize = 12;
const STREAM_ID: usize = 16;
const TERM_ID: usize = 20;
const RESERVED_VALUE: usize = 24;

/// Read-only view over a DATA or PAD frame.
#[derive(Debug, Clone, Copy)]
pub struct DataView<'a> {
    buf: &'a [u8],
}

impl<'a> DataView<'a> {
    /// Wrap and validate `buf` as a DATA/PAD frame.
    pub fn new(buf: &'a [u8]) -> Result<Self, WireError> {
        let header = HeaderView::new(buf)?;
        header.validate(DATA_HEADER_LENGTH)?;
        match header.frame_type()? {
            FrameType::Data | FrameType::Pad => {}
            _ => return Err(WireError::BadFrame),
        }
        if buf.len() < DATA_HEADER_LENGTH {
            return Err(WireError::ShortBuffer);
        }
        Ok(Self { buf })
    }

    #[must_use]
    pub fn header(&self) -> HeaderView<'a> {
        HeaderView::new(self.buf).expect("validated in new")
    }

    #[must_use]
    pub fn frame_length(&self) -> i32 {
        self.header().frame_length()
    }

    #[must_use]
    pub fn flags(&self) -> u8 {
        self.header().flags()
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
    pub fn term_id(&self) -> i32 {
        i32::from_le_bytes(self.buf[TERM_ID..TERM_ID + 4].try_into().unwrap())
    }

    #[must_use]
    pub fn reserved_value(&self) -> i64 {
        i64::from_le_bytes(
            self.buf[RESERVED_VALUE..RESERVED_VALUE + 8]
                .try_into()
                .unwrap(),
        )
    }

    /// Offset of the payload relative to the start of the frame.
    #[must_use]
    pub const fn data_offset(&self) -> usize {
        DATA_HEADER_LENGTH
    }

    /// The message payload, excluding alignment padding.
    #[must_use]
    pub fn payload(&self) -> &'a [u8] {
        let len = self.frame_length().max(DATA_HEADER_LENGTH as i32) as usize;
        &self.buf[DATA_HEADER_LENGTH..len]
    }

    /// A zero-length DATA frame is a heartbeat.
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.frame_length() as usize == DATA_HEADER_LENGTH
    }

    #[must_use]
    pub fn is_begin(&self) -> bool {
        self.flags() & super::BEGIN_FLAG != 0
    }

    #[must_use]
    pub fn is_end(&self) -> bool {
        self.flags() & super::END_FLAG != 0
    }
}

/// Mutable view for encoding a DATA/PAD frame header in place.
#[derive(Debug)]
pub struct DataViewMut<'a> {
    buf: &'a mut [u8],
}

#[allow(clippy::too_many_arguments)]
impl<'a> DataViewMut<'a> {
    /// Wrap `buf` for writing. Does not itself write anything; call
    /// [`Self::put_header`] to do so.
    pub fn new(buf: &'a mut [u8]) -> Result<Self, WireError> {
        if buf.len() < DATA_HEADER_LENGTH {
            return Err(WireError::ShortBuffer);
        }
        Ok(Self { buf })
    }

    /// Write every field except `frame_length`, which the caller commits
    /// last via [`Self::commit`].
    pub fn put_header(
        &mut self,
        flags: u8,
        frame_type: FrameType,
        term_offset: i32,
        session_id: i32,
        stream_id: i32,
        term_id: i32,
        reserved_value: i64,
    ) {
        HeaderViewMut::new(&mut self.buf[..HEADER_LENGTH])
            .unwrap()
            .put(0, flags, frame_type);
        self.buf[TERM_OFFSET..TERM_OFFSET + 4].copy_from_slice(&term_offset.to_le_bytes());
        self.buf[SESSION_ID..SESSION_ID + 4].copy_from_slice(&session_id.to_le_bytes());
        self.buf[STREAM_ID..STREAM_ID + 4].copy_from_slice(&stream_id.to_le_bytes());
        self.buf[TERM_ID..TERM_ID + 4].copy_from_slice(&term_id.to_le_bytes());
        self.buf[RESERVED_VALUE..RESERVED_VALUE + 8]
            .copy_from_slice(&reserved_value.to_le_bytes());
    }

    /// Commit the frame by writing `frame_length` last, with release
    /// ordering performed by the caller (an `AtomicI32` store over the
    /// same bytes via the log buffer, not by this view).
    pub fn commit(&mut self, frame_length: i32) {
        HeaderViewMut::new(&mut self.buf[..HEADER_LENGTH])
            .unwrap()
            .put_frame_length(frame_length);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_and_decodes_a_data_frame() {
        let mut buf = [0u8; DATA_HEADER_LENGTH + 13];
        let mut view = DataViewMut::new(&mut buf).unwrap();
        view.put_header(super::super::UNFRAGMENTED, FrameType::Data, 0, 7, 10, 3, 0);
        buf[DATA_HEADER_LENGTH..].copy_from_slice(b"Hello World! ");
        DataViewMut::new(&mut buf)
            .unwrap()
            .commit((DATA_HEADER_LENGTH + 13) as i32);

        let view = DataView::new(&buf).unwrap();
        assert_eq!(view.session_id(), 7);
        assert_eq!(view.stream_id(), 10);
        assert_eq!(view.term_id(), 3);
        assert!(view.is_begin());
        assert!(view.is_end());
        assert!(!view.is_heartbeat());
        assert_eq!(view.payload(), b"Hello World! ");
    }

    #[test]
    fn zero_length_payload_is_a_heartbeat() {
        let mut buf = [0u8; DATA_HEADER_LENGTH];
        let mut view = DataViewMut::new(&mut buf).unwrap();
        view.put_header(super::super::UNFRAGMENTED, FrameType::Data, 0, 1, 1, 1, 0);
        view.commit(DATA_HEADER_LENGTH as i32);

        assert!(DataView::new(&buf).unwrap().is_heartbeat());
    }

    #[test]
    fn rejects_wrong_frame_type() {
        let mut buf = [0u8; DATA_HEADER_LENGTH];
        let mut header = HeaderViewMut::new(&mut buf).unwrap();
        header.put(DATA_HEADER_LENGTH as i32, 0, FrameType::Nak);
        assert_eq!(DataView::new(&buf).unwrap_err(), WireError::BadFrame);
    }
}
