//! Crate-wide error type.
//!
//! Mirrors the error taxonomy of the design: every recoverable protocol
//! condition (timeout, bad CRC, protocol violation, cancellation, ...) has
//! its own variant so a driver can match on `Error` instead of inspecting a
//! wrapped I/O error.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the codecs and state machines in this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// No byte arrived before the per-flavor deadline elapsed.
    #[error("timed out waiting for data")]
    Timeout,

    /// End of the underlying stream was reached while a frame was expected.
    #[error("unexpected end of transmission")]
    UnexpectedEof,

    /// A block/packet/header failed its checksum or CRC check.
    #[error("frame check (checksum/CRC) mismatch")]
    FrameCheck,

    /// A Zmodem data subpacket failed its CRC check.
    #[error("subpacket CRC mismatch at offset {offset}")]
    SubpacketCheck {
        /// Last known-good offset the sender should resume from.
        offset: u32,
    },

    /// A byte or field was received that violates protocol shape (bad type
    /// byte, malformed field, out-of-order packet, ...).
    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    /// A value could not be encoded or decoded (e.g. non-hex-digit while
    /// hex-decoding, or a field that overflowed its wire width).
    #[error("encoding error: {0}")]
    Encoding(&'static str),

    /// The remote end cancelled the transfer (5x Ctrl-X, CAN byte, ZABORT,
    /// Kermit E-packet, ...).
    #[error("cancelled by remote: {0}")]
    CancelledByRemote(&'static str),

    /// The local caller cancelled the transfer via `Session::cancel`.
    #[error("cancelled locally")]
    CancelledByLocal,

    /// The consecutive-error counter reached its cap (10).
    #[error("too many consecutive errors ({0})")]
    TooManyErrors(u32),

    /// The destination file already exists and overwrite was not requested.
    #[error("file already exists: {0}")]
    FileExists(String),

    /// The pending read was interrupted by a foreign-task cancel request.
    #[error("read cancelled")]
    ReadCancelled,

    /// I/O failure from the underlying byte stream or local file handle.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error should increment the session's consecutive-error
    /// counter (as opposed to being an immediate abort condition).
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Timeout | Error::FrameCheck | Error::SubpacketCheck { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_kinds() {
        assert!(Error::Timeout.is_recoverable());
        assert!(Error::FrameCheck.is_recoverable());
        assert!(Error::SubpacketCheck { offset: 4 }.is_recoverable());
        assert!(!Error::CancelledByLocal.is_recoverable());
        assert!(!Error::Protocol("bad type").is_recoverable());
    }

    #[test]
    fn display_messages() {
        assert_eq!(Error::Timeout.to_string(), "timed out waiting for data");
        assert_eq!(
            Error::SubpacketCheck { offset: 12 }.to_string(),
            "subpacket CRC mismatch at offset 12"
        );
        assert_eq!(
            Error::TooManyErrors(10).to_string(),
            "too many consecutive errors (10)"
        );
    }

    #[test]
    fn io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "nope");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
