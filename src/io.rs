//! Framed I/O helpers (component C2): a blocking byte reader with timeout
//! and Ctrl-X cancel counter, hex nibble encode/decode, and the Zmodem
//! byte-escape table.

use crate::error::{Error, Result};
use std::time::Duration;

/// Outcome of a single timed read against a [`ByteStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A byte was read.
    Byte(u8),
    /// No byte arrived before the deadline.
    Timeout,
    /// The underlying stream reached end-of-file.
    Eof,
    /// The read was interrupted by a foreign-task cancel request.
    Cancelled,
}

/// Abstract bidirectional byte stream consumed by every protocol driver.
/// Implementations are expected to apply `timeout` to `read_byte`/`read`.
pub trait ByteStream {
    /// Reads a single byte, waiting up to `timeout` for it to arrive.
    fn read_byte(&mut self, timeout: Duration) -> Result<ReadOutcome>;

    /// Reads up to `buf.len()` bytes, waiting up to `timeout` for the first
    /// byte. Returns the number of bytes actually placed in `buf`.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<ReadOutcome>;

    /// Writes a single byte.
    fn write_byte(&mut self, value: u8) -> Result<()> {
        self.write_all(&[value])
    }

    /// Writes the entire slice.
    fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    /// Flushes any buffered output.
    fn flush(&mut self) -> Result<()>;

    /// Number of bytes immediately readable without blocking.
    fn available(&self) -> usize {
        0
    }

    /// Requests that any currently pending (or next) read be interrupted
    /// and return `ReadOutcome::Cancelled`. Safe to call from a foreign
    /// task/thread.
    fn cancel_pending_read(&self);
}

/// Local file handle abstraction (open for read/write, length, mtime,
/// delete, name, seek).
pub trait LocalFile {
    /// The file's logical name (basename), as it should be transmitted.
    fn name(&self) -> &str;

    /// Reads up to `buf.len()` bytes, returning the number read (0 at EOF).
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Appends `buf` to the file.
    fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    /// Seeks the read/write cursor to an absolute byte offset.
    fn seek(&mut self, offset: u64) -> Result<()>;

    /// Total length in bytes, if known.
    fn len(&self) -> Option<u64>;

    /// Whether the file is known to be empty (or of unknown length).
    fn is_empty(&self) -> bool {
        matches!(self.len(), Some(0))
    }

    /// Modification time in unix milliseconds, if known.
    fn mtime_millis(&self) -> Option<i64>;

    /// Sets the modification time in unix milliseconds.
    fn set_mtime_millis(&mut self, millis: i64) -> Result<()>;

    /// Truncates the file to `len` bytes.
    fn truncate(&mut self, len: u64) -> Result<()>;

    /// Deletes the file. Takes `Box<Self>` rather than `self` so the
    /// method stays callable through `Box<dyn LocalFile>`.
    fn delete(self: Box<Self>) -> Result<()>;
}

/// Consecutive-0x18 (Ctrl-X) counter keyed to a single session's inbound
/// stream, not a process-wide map (see design notes: the reference
/// implementation keyed this by stream object identity globally; this
/// design makes it a field owned by the session instead).
#[derive(Debug, Default, Clone, Copy)]
pub struct CtrlXCounter {
    count: u32,
}

/// Five consecutive Ctrl-X (0x18) bytes is the Zmodem "Session Abort"
/// sequence.
pub const SESSION_ABORT_THRESHOLD: u32 = 5;

/// The Ctrl-X byte itself.
pub const CAN: u8 = 0x18;

impl CtrlXCounter {
    /// Creates a fresh, zeroed counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one byte through the counter. Returns `true` once the
    /// 5-consecutive-CAN threshold is reached (and resets the counter).
    pub fn feed(&mut self, byte: u8) -> bool {
        if byte == CAN {
            self.count += 1;
            if self.count >= SESSION_ABORT_THRESHOLD {
                self.count = 0;
                return true;
            }
        } else {
            self.count = 0;
        }
        false
    }

    /// Current consecutive-CAN count.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Reads one byte through `stream`, feeding it through `counter` and
/// raising [`Error::CancelledByRemote`] if the Session Abort sequence is
/// detected.
pub fn read_byte_watched(
    stream: &mut dyn ByteStream,
    counter: &mut CtrlXCounter,
    timeout: Duration,
) -> Result<u8> {
    loop {
        match stream.read_byte(timeout)? {
            ReadOutcome::Byte(b) => {
                if counter.feed(b) {
                    return Err(Error::CancelledByRemote("5x Ctrl-X session abort"));
                }
                return Ok(b);
            }
            ReadOutcome::Timeout => return Err(Error::Timeout),
            ReadOutcome::Eof => return Err(Error::UnexpectedEof),
            ReadOutcome::Cancelled => return Err(Error::ReadCancelled),
        }
    }
}

/// Drains every byte currently readable without blocking, to resynchronise
/// with the sender before issuing a NAK/resend (Xmodem/Ymodem "purge").
pub fn purge(stream: &mut dyn ByteStream) {
    while stream.available() > 0 {
        if stream.read_byte(Duration::from_millis(1)).is_err() {
            break;
        }
    }
}

/// Encodes `bytes` as lowercase ASCII hex (two digits per byte).
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Reads exactly `n_chars` ASCII hex digits from `stream` and decodes them
/// into `n_chars / 2` bytes.
pub fn from_hex(
    stream: &mut dyn ByteStream,
    counter: &mut CtrlXCounter,
    timeout: Duration,
    n_chars: usize,
) -> Result<Vec<u8>> {
    let mut chars = Vec::with_capacity(n_chars);
    for _ in 0..n_chars {
        chars.push(read_byte_watched(stream, counter, timeout)?);
    }
    let text = std::str::from_utf8(&chars).map_err(|_| Error::Encoding("non-ASCII hex digit"))?;
    hex::decode(text).map_err(|_| Error::Encoding("non-hex digit"))
}

bitflags::bitflags! {
    /// Which byte classes get escaped when building the Zmodem encode-byte
    /// table (see [`EscapeTable`]).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct EscapePolicy: u8 {
        /// Escape every control byte below 0x20, not only CAN/XON/XOFF.
        const CONTROL_CHARS = 0b01;
        /// Escape printable bytes with bit 7 set.
        const EIGHT_BIT_CHARS = 0b10;
    }
}

/// Zmodem's 256-entry byte -> byte substitution table for binary framing,
/// rebuilt whenever [`EscapePolicy`] changes. A table entry equal to its
/// index means "send literally"; any other value means "send `CAN` (0x18)
/// then this value".
#[derive(Debug, Clone, Copy)]
pub struct EscapeTable {
    policy: EscapePolicy,
    map: [u8; 256],
}

const XON: u8 = 0x11;
const XOFF: u8 = 0x13;

impl EscapeTable {
    /// Builds a table for the given policy.
    #[must_use]
    pub fn new(policy: EscapePolicy) -> Self {
        let mut map = [0u8; 256];
        for (value, slot) in map.iter_mut().enumerate() {
            *slot = Self::escape_byte(value as u8, policy);
        }
        Self { policy, map }
    }

    fn escape_byte(value: u8, policy: EscapePolicy) -> u8 {
        let bare = value & 0x7F;
        if value == 0x7F {
            return b'l';
        }
        if value == 0xFF {
            return b'm';
        }
        let is_can_xon_xoff = bare == CAN || bare == XON || bare == XOFF;
        if is_can_xon_xoff {
            return value ^ 0x40;
        }
        if bare < 0x20 {
            let escape = if value < 0x80 {
                policy.contains(EscapePolicy::CONTROL_CHARS)
            } else {
                policy.contains(EscapePolicy::EIGHT_BIT_CHARS)
            };
            if escape {
                return value ^ 0x40;
            }
        } else if value >= 0x80 && policy.contains(EscapePolicy::EIGHT_BIT_CHARS) {
            return value ^ 0x40;
        }
        value
    }

    /// Rebuilds the table in place for a new policy. The policy and the
    /// table change atomically (this method replaces both fields together
    /// rather than mutating the map byte-by-byte).
    pub fn set_policy(&mut self, policy: EscapePolicy) {
        *self = Self::new(policy);
    }

    /// Current policy.
    #[must_use]
    pub fn policy(&self) -> EscapePolicy {
        self.policy
    }

    /// Whether `value` needs the `CAN` escape prefix.
    #[must_use]
    pub fn needs_escape(&self, value: u8) -> bool {
        self.map[value as usize] != value
    }

    /// The escaped representative to send after the `CAN` prefix (or the
    /// literal byte itself if no escape is needed).
    #[must_use]
    pub fn encode(&self, value: u8) -> u8 {
        self.map[value as usize]
    }
}

impl Default for EscapeTable {
    fn default() -> Self {
        Self::new(EscapePolicy::empty())
    }
}
