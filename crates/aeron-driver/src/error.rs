// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Driver-wide error and result types.
//!
//! Mirrors the kinds named in the command-protocol error responses plus the
//! transient, non-fatal codes returned from the log buffer's reservation
//! path. The transient codes are not [`std::error::Error`] failures - they
//! are ordinary return values on the hot path - but living in the same enum
//! keeps every caller's `match` exhaustive.

use std::fmt;
use std::io;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors and transient return codes produced by the driver.
#[derive(Debug)]
pub enum Error {
    // ------------------------------------------------------------------
    // Client-facing errors (reported via ErrorResponse with a correlation-id)
    // ------------------------------------------------------------------
    /// The channel URI failed to parse or violated an invariant (e.g. an
    /// even-last-octet multicast address).
    InvalidChannel(String),
    /// `REMOVE_PUBLICATION`/`REMOVE_SUBSCRIPTION` named a stream or session
    /// that does not exist on an otherwise-known channel.
    PublicationStreamUnknown,
    /// `ADD_PUBLICATION` named a `(session, stream, channel)` triple that
    /// already has a live publication.
    PublicationStreamAlreadyExists,

    // ------------------------------------------------------------------
    // Ingress errors (counted and dropped, never fatal)
    // ------------------------------------------------------------------
    /// A frame failed to decode: short buffer, bad length, or unknown type.
    MalformedFrame(&'static str),

    // ------------------------------------------------------------------
    // Transient, non-blocking return codes from the append path
    // ------------------------------------------------------------------
    /// The reservation would advance past the sender position limit.
    BackPressured,
    /// The active term just rotated; the caller should retry the append.
    AdminAction,
    /// The log buffer (or the publication/image it backs) is closed.
    Closed,
    /// The reservation would exceed the maximum representable position.
    MaxPositionExceeded,
    /// No status message has been received yet; the publication is not
    /// connected to any receiver.
    NotConnected,

    // ------------------------------------------------------------------
    // Everything else
    // ------------------------------------------------------------------
    /// I/O fault (socket, mmap, file) with the underlying cause.
    Io(io::Error),
    /// Catch-all for faults that do not fit a more specific variant above.
    Generic(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidChannel(reason) => write!(f, "invalid channel: {reason}"),
            Self::PublicationStreamUnknown => write!(f, "publication stream unknown"),
            Self::PublicationStreamAlreadyExists => {
                write!(f, "publication stream already exists")
            }
            Self::MalformedFrame(reason) => write!(f, "malformed frame: {reason}"),
            Self::BackPressured => write!(f, "back pressured"),
            Self::AdminAction => write!(f, "admin action (term rotated)"),
            Self::Closed => write!(f, "closed"),
            Self::MaxPositionExceeded => write!(f, "max position exceeded"),
            Self::NotConnected => write!(f, "not connected"),
            Self::Io(err) => write!(f, "io error: {err}"),
            Self::Generic(reason) => write!(f, "error: {reason}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// The error code carried on an `ErrorResponse` command-protocol message.
///
/// Only the three client-reported kinds and `GENERIC_ERROR` ever cross the
/// CnC boundary; the transient append-path codes never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    InvalidChannel = 1,
    PublicationStreamUnknown = 2,
    PublicationStreamAlreadyExists = 3,
    GenericError = 4,
}

impl Error {
    /// Map to the command-protocol error code, if this error is one clients
    /// are told about directly.
    #[must_use]
    pub fn to_error_code(&self) -> ErrorCode {
        match self {
            Self::InvalidChannel(_) => ErrorCode::InvalidChannel,
            Self::PublicationStreamUnknown => ErrorCode::PublicationStreamUnknown,
            Self::PublicationStreamAlreadyExists => ErrorCode::PublicationStreamAlreadyExists,
            _ => ErrorCode::GenericError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_codes_display_without_panicking() {
        for err in [
            Error::BackPressured,
            Error::AdminAction,
            Error::Closed,
            Error::MaxPositionExceeded,
            Error::NotConnected,
        ] {
            let _ = err.to_string();
        }
    }

    #[test]
    fn client_errors_map_to_expected_codes() {
        assert_eq!(
            Error::InvalidChannel("x".into()).to_error_code(),
            ErrorCode::InvalidChannel
        );
        assert_eq!(
            Error::PublicationStreamUnknown.to_error_code(),
            ErrorCode::PublicationStreamUnknown
        );
        assert_eq!(
            Error::PublicationStreamAlreadyExists.to_error_code(),
            ErrorCode::PublicationStreamAlreadyExists
        );
        assert_eq!(Error::Closed.to_error_code(), ErrorCode::GenericError);
    }
}
