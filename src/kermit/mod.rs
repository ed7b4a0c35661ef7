//! Kermit codec and state machine (component C5, `spec.md` §4.5).
//!
//! Packet framing: `MARK LEN SEQ TYPE [LENX1 LENX2] DATA CHECK EOL`. This
//! module covers the S/Y/F/A/D/Z/B/N/E packet types, the three checksum
//! kinds, control/8-bit prefix quoting, and sliding-window hooks (clamped
//! to a window size of 1, see `DESIGN.md`).

pub mod packet;
pub mod params;
pub mod state;

/// Default packet-start mark.
pub const DEFAULT_MARK: u8 = 0x01;
/// Default packet terminator.
pub const DEFAULT_EOL: u8 = 0x0D;
/// Default control-quote prefix.
pub const DEFAULT_QCTL: u8 = b'#';

/// Converts a 0..94 "raw" 6-bit value to its printable Kermit character.
#[must_use]
pub const fn tochar(value: u8) -> u8 {
    value.wrapping_add(32)
}

/// Inverse of [`tochar`].
#[must_use]
pub const fn unchar(value: u8) -> u8 {
    value.wrapping_sub(32)
}

/// Kermit's control-prefix transform: XOR with 0x40.
#[must_use]
pub const fn ctl(value: u8) -> u8 {
    value ^ 0x40
}

/// Kermit packet type tags (a single ASCII letter on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    SendInit,
    Ack,
    Nak,
    FileHeader,
    Attributes,
    Data,
    Eof,
    Break,
    Error,
}

impl PacketType {
    #[must_use]
    pub fn to_byte(self) -> u8 {
        match self {
            PacketType::SendInit => b'S',
            PacketType::Ack => b'Y',
            PacketType::Nak => b'N',
            PacketType::FileHeader => b'F',
            PacketType::Attributes => b'A',
            PacketType::Data => b'D',
            PacketType::Eof => b'Z',
            PacketType::Break => b'B',
            PacketType::Error => b'E',
        }
    }

    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            b'S' => PacketType::SendInit,
            b'Y' => PacketType::Ack,
            b'N' => PacketType::Nak,
            b'F' => PacketType::FileHeader,
            b'A' => PacketType::Attributes,
            b'D' => PacketType::Data,
            b'Z' => PacketType::Eof,
            b'B' => PacketType::Break,
            b'E' => PacketType::Error,
            _ => return None,
        })
    }
}

/// Packet check (block check) kind negotiated during S/Y.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckType {
    /// 1 character, 6-bit sum.
    One,
    /// 2 characters, 12-bit sum.
    Two,
    /// 3 characters, CRC-CCITT.
    Three,
}

impl CheckType {
    #[must_use]
    pub fn wire_len(self) -> usize {
        match self {
            CheckType::One => 1,
            CheckType::Two => 2,
            CheckType::Three => 3,
        }
    }

    #[must_use]
    pub fn to_char(self) -> u8 {
        match self {
            CheckType::One => b'1',
            CheckType::Two => b'2',
            CheckType::Three => b'3',
        }
    }

    #[must_use]
    pub fn from_char(byte: u8) -> Self {
        match byte {
            b'2' => CheckType::Two,
            b'3' => CheckType::Three,
            _ => CheckType::One,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tochar_unchar_roundtrip() {
        for v in 0..94u8 {
            assert_eq!(unchar(tochar(v)), v);
        }
    }

    #[test]
    fn ctl_is_involution() {
        for v in 0..=255u8 {
            assert_eq!(ctl(ctl(v)), v);
        }
    }

    #[test]
    fn packet_type_roundtrip() {
        for t in [
            PacketType::SendInit,
            PacketType::Ack,
            PacketType::Nak,
            PacketType::FileHeader,
            PacketType::Attributes,
            PacketType::Data,
            PacketType::Eof,
            PacketType::Break,
            PacketType::Error,
        ] {
            assert_eq!(PacketType::from_byte(t.to_byte()), Some(t));
        }
    }
}
