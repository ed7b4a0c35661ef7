//! Ymodem codec and state machine (component C4, `spec.md` §4.4).
//!
//! Ymodem reuses the Xmodem-1K block framing (SOH/STX, 1-byte seq, CRC-16)
//! and adds a block-0 metadata block in front of each file's body, plus a
//! terminating all-zero block 0 at the end of the batch.

pub mod codec;
pub mod state;

use crate::xmodem::Flavor;
use std::time::Duration;

/// Whether per-block ACKs are required ("Ymodem") or a single NAK anywhere
/// aborts the whole transfer ("Ymodem/G").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YmodemVariant {
    Standard,
    Streaming,
}

impl YmodemVariant {
    #[must_use]
    pub fn block_flavor(self) -> Flavor {
        match self {
            YmodemVariant::Standard => Flavor::X1K,
            YmodemVariant::Streaming => Flavor::X1KG,
        }
    }

    #[must_use]
    pub fn timeout(self) -> Duration {
        Duration::from_secs(10)
    }
}
