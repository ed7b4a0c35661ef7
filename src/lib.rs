//! Framing codecs and protocol state machines for four serial file
//! transfer protocols: Xmodem (5 variants), Ymodem (2 variants), Kermit,
//! and Zmodem.
//!
//! This crate is deliberately transport-agnostic: every protocol driver
//! operates over the [`io::ByteStream`] and [`io::LocalFile`] traits
//! rather than a concrete serial port or filesystem, so it can be driven
//! from a real UART, a modem emulator, or an in-memory test double alike.
//! A [`session::Session`] tracks cross-thread cancellation, skip, and
//! error-count state shared by every protocol driver; a [`progress::ProgressSink`]
//! is the seam for reporting progress to a UI.
//!
//! Each protocol lives in its own module with a `Sender` and `Receiver`
//! (or, for Xmodem/Ymodem/Kermit batch transfers, a batch-oriented
//! `Sender`/`Receiver` pair) driving that protocol's wire format:
//!
//! - [`xmodem`]: Vanilla/Relaxed/Crc/1K/1K-G block transfer.
//! - [`ymodem`]: Xmodem-1K framing plus a batch metadata block.
//! - [`kermit`]: packet framing with negotiable block checks and quoting.
//! - [`zmodem`]: header/subpacket framing with CRC-16 or CRC-32 checks.

pub mod checksum;
pub mod config;
pub mod error;
pub mod io;
pub mod kermit;
pub mod progress;
pub mod session;
pub mod xmodem;
pub mod ymodem;
pub mod zmodem;

pub use config::Config;
pub use error::{Error, Result};
pub use progress::{NullSink, ProgressSink};
pub use session::{Protocol, Role, Session, SessionHandle, SessionState};
