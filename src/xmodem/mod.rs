//! Xmodem codec and state machine (component C3, `spec.md` §4.3).
//!
//! Five flavors share one block format: `[SOH|STX] seq (255-seq)
//! data[128|1024] checksum-or-crc`. Vanilla and Relaxed use an 8-bit
//! checksum; CRC, 1K and 1K/G use a big-endian CRC-16.

pub mod codec;
pub mod state;

use std::time::Duration;

/// Control bytes used by Xmodem framing.
pub(crate) mod control {
    pub const SOH: u8 = 0x01;
    pub const STX: u8 = 0x02;
    pub const EOT: u8 = 0x04;
    pub const ACK: u8 = 0x06;
    pub const NAK: u8 = 0x15;
    pub const CAN: u8 = 0x18;
    pub const CRC_NCG: u8 = b'C';
    pub const G_NCG: u8 = b'G';
    /// CP/M end-of-file padding byte for short final blocks.
    pub const CPM_EOF: u8 = 0x1A;
}

/// Checksum kind negotiated for a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    Checksum8,
    Crc16,
}

/// One of the five named Xmodem variants (`spec.md` §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Vanilla,
    Relaxed,
    Crc,
    X1K,
    X1KG,
}

impl Flavor {
    /// Block size used by the first block of this flavor (1K and 1K/G grow
    /// to 1024-byte blocks for subsequent blocks; vanilla/relaxed/CRC stay
    /// at 128).
    #[must_use]
    pub fn block_size(self) -> usize {
        match self {
            Flavor::Vanilla | Flavor::Relaxed | Flavor::Crc => 128,
            Flavor::X1K | Flavor::X1KG => 1024,
        }
    }

    #[must_use]
    pub fn check_kind(self) -> CheckKind {
        match self {
            Flavor::Vanilla | Flavor::Relaxed => CheckKind::Checksum8,
            Flavor::Crc | Flavor::X1K | Flavor::X1KG => CheckKind::Crc16,
        }
    }

    /// Per-byte read timeout: 100s for Relaxed, 10s for everything else
    /// (`spec.md` §4.2).
    #[must_use]
    pub fn timeout(self) -> Duration {
        match self {
            Flavor::Relaxed => Duration::from_secs(100),
            _ => Duration::from_secs(10),
        }
    }

    /// The initial "new/next control-G" byte the receiver sends to start
    /// the transfer.
    #[must_use]
    pub fn ncg_byte(self) -> u8 {
        match self {
            Flavor::Vanilla | Flavor::Relaxed => control::NAK,
            Flavor::Crc | Flavor::X1K => control::CRC_NCG,
            Flavor::X1KG => control::G_NCG,
        }
    }

    /// Whether per-block ACKs are expected (false only for 1K/G streaming).
    #[must_use]
    pub fn acks_each_block(self) -> bool {
        !matches!(self, Flavor::X1KG)
    }

    /// The flavor to downgrade to after the 1K/G streaming handshake
    /// fails (`spec.md` §4.3 "Flavor downgrade"): 1K/G always downgrades
    /// to plain CRC/1K.
    #[must_use]
    pub fn downgraded(self) -> Option<Flavor> {
        match self {
            Flavor::X1KG => Some(Flavor::X1K),
            _ => None,
        }
    }
}
