//! Zmodem codec and state machine (component C6, `spec.md` §4.6).
//!
//! Frame layout: `ZPAD [ZPAD] ZDLE <encoding> <frame> <4 flag/position bytes>
//! <CRC>`, binary or hex encoded, optionally followed by one or more ZDLE
//! escaped data subpackets terminated by ZCRCE/G/Q/W.

pub mod header;
pub mod state;
pub mod subpacket;

use bitflags::bitflags;

/// Frame-leading pad byte.
pub const ZPAD: u8 = b'*';
/// Escape/control-prefix byte. Also doubles as the first byte of a
/// 5-times-repeated cancel sequence (`spec.md` §4.1 "Cancellation").
pub const ZDLE: u8 = 0x18;
/// XON sent after a hex header to resume flow on some terminal drivers.
pub const XON: u8 = 0x11;

bitflags! {
    /// `ZRINIT` capability/option flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Zrinit: u8 {
        /// Can send and receive in full duplex.
        const CANFDX = 0x01;
        /// Can receive data in parallel with disk I/O.
        const CANOVIO = 0x02;
        /// Can send a break signal.
        const CANBRK = 0x04;
        /// Can decrypt.
        const CANCRY = 0x08;
        /// Can uncompress.
        const CANLZW = 0x10;
        /// Can use a 32-bit frame check.
        const CANFC32 = 0x20;
        /// Expects control characters to be escaped.
        const ESCCTL = 0x40;
        /// Expects the 8th bit to be escaped.
        const ESC8 = 0x80;
    }
}

/// The capability set this crate advertises in `ZRINIT`: full duplex and
/// 32-bit CRC, nothing more exotic (no LZW, no crypto).
pub const SUPPORTED_CAPABILITIES: Zrinit = Zrinit::CANFDX.union(Zrinit::CANFC32);
