// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The 8-byte common header shared by every frame type.

use super::{FrameType, WireError, PROTOCOL_VERSION};

/// Byte length of the common header.
pub const HEADER_LENGTH: usize = 8;

/// Read-only view over the common header of an inbound frame.
#[derive(Debug, Clone, Copy)]
pub struct HeaderView<'a> {
    buf: &'a [u8],
}

impl<'a> HeaderView<'a> {
    /// Wrap `buf`, failing if it is shorter than [`HEADER_LENGTH`].
    pub fn new(buf: &'a [u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_LENGTH {
            return Err(WireError::ShortBuffer);
        }
        Ok(Self { buf })
    }

    #[must_use]
    pub fn frame_length(&self) -> i32 {
        i32::from_le_bytes(self.buf[0..4].try_into().unwrap())
    }

    #[must_use]
    pub fn version(&self) -> u8 {
        self.buf[4]
    }

    #[must_use]
    pub fn flags(&self) -> u8 {
        self.buf[5]
    }

    #[must_use]
    pub fn type_id(&self) -> u16 {
        u16::from_le_bytes(self.buf[6..8].try_into().unwrap())
    }

    /// Decode [`Self::type_id`] into a [`FrameType`], failing on an
    /// unrecognized value.
    pub fn frame_type(&self) -> Result<FrameType, WireError> {
        FrameType::from_wire(self.type_id()).ok_or(WireError::BadFrame)
    }

    /// Basic sanity check every decoder runs before reading type-specific
    /// fields: the claimed `frame_length` must be non-negative, must be at
    /// least as long as the fixed header it names, and must not exceed the
    /// bytes actually available in the buffer.
    pub fn validate(&self, fixed_header_len: usize) -> Result<(), WireError> {
        let frame_length = self.frame_length();
        if frame_length < 0 || (frame_length as usize) < fixed_header_len {
            return Err(WireError::BadFrame);
        }
        if (frame_length as usize) > self.buf.len() {
            return Err(WireError::BadFrame);
        }
        Ok(())
    }
}

/// Mutable view over the common header of an outbound frame.
#[derive(Debug)]
pub struct HeaderViewMut<'a> {
    buf: &'a mut [u8],
}

impl<'a> HeaderViewMut<'a> {
    /// Wrap `buf`, failing if it is shorter than [`HEADER_LENGTH`].
    pub fn new(buf: &'a mut [u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_LENGTH {
            return Err(WireError::ShortBuffer);
        }
        Ok(Self { buf })
    }

    /// Write the common header. `frame_length` is the logical length
    /// (payload included, alignment padding excluded) and must be written
    /// last by the caller with release ordering to commit the frame; here
    /// it is stored as an ordinary unsynchronized write, and callers on the
    /// append path write it only after every other field is in place.
    pub fn put(&mut self, frame_length: i32, flags: u8, frame_type: FrameType) {
        self.buf[0..4].copy_from_slice(&frame_length.to_le_bytes());
        self.buf[4] = PROTOCOL_VERSION;
        self.buf[5] = flags;
        self.buf[6..8].copy_from_slice(&(frame_type as u16).to_le_bytes());
    }

    /// Overwrite just the frame-length field - the commit write.
    pub fn put_frame_length(&mut self, frame_length: i32) {
        self.buf[0..4].copy_from_slice(&frame_length.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_fields() {
        let mut buf = [0u8; HEADER_LENGTH];
        HeaderViewMut::new(&mut buf)
            .unwrap()
            .put(128, super::super::UNFRAGMENTED, FrameType::Data);

        let view = HeaderView::new(&buf).unwrap();
        assert_eq!(view.frame_length(), 128);
        assert_eq!(view.version(), PROTOCOL_VERSION);
        assert_eq!(view.flags(), super::super::UNFRAGMENTED);
        assert_eq!(view.frame_type().unwrap(), FrameType::Data);
    }

    #[test]
    fn rejects_short_buffer() {
        let buf = [0u8; 4];
        assert_eq!(HeaderView::new(&buf).unwrap_err(), WireError::ShortBuffer);
    }

    #[test]
    fn validate_rejects_length_shorter_than_fixed_header() {
        let mut buf = [0u8; HEADER_LENGTH];
        HeaderViewMut::new(&mut buf)
            .unwrap()
            .put(4, 0, FrameType::Data);
        let view = HeaderView::new(&buf).unwrap();
        assert_eq!(view.validate(32).unwrap_err(), WireError::BadFrame);
    }
}
