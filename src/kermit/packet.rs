//! Packet framing: `MARK LEN SEQ TYPE [LENX1 LENX2] DATA CHECK EOL`, control
//! and 8-bit-prefix quoting, and the three block check algorithms
//! (`spec.md` §4.5 "Packet format").

use super::params::Params;
use super::{ctl, tochar, unchar, CheckType, PacketType};
use crate::checksum::crc16;
use crate::error::{Error, Result};

/// A decoded Kermit packet. `data` holds the logical (unquoted) payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq: u8,
    pub ptype: PacketType,
    pub data: Vec<u8>,
}

impl Packet {
    #[must_use]
    pub fn new(seq: u8, ptype: PacketType, data: Vec<u8>) -> Self {
        Self { seq, ptype, data }
    }

    /// Encodes this packet to wire bytes using `params` for quoting and
    /// checksum selection.
    #[must_use]
    pub fn encode(&self, params: &Params) -> Vec<u8> {
        let quoted = quote(&self.data, params);
        let long_packet = quoted.len() + params.check.wire_len() > 91;

        let mut header = Vec::new();
        header.push(tochar(self.seq & 0x3F));
        header.push(self.ptype.to_byte());
        if long_packet {
            let total = quoted.len();
            header.push(tochar(((total >> 6) & 0x3F) as u8));
            header.push(tochar((total & 0x3F) as u8));
        }

        let body_len = header.len() + quoted.len() + params.check.wire_len();
        let len_field = if long_packet {
            0u8
        } else {
            (body_len).min(94) as u8
        };

        let mut checked = Vec::with_capacity(body_len + quoted.len());
        checked.push(tochar(len_field));
        checked.extend_from_slice(&header);
        checked.extend_from_slice(&quoted);

        let check = compute_check(params.check, &checked[1..]);

        let mut out = Vec::with_capacity(checked.len() + check.len() + 2);
        out.push(crate::kermit::DEFAULT_MARK);
        out.extend_from_slice(&checked);
        out.extend_from_slice(&check);
        out.push(params.eol);
        out
    }

    /// Decodes one complete packet (MARK through EOL inclusive, or with
    /// the EOL already stripped) using `params`'s quoting and checksum
    /// conventions.
    pub fn decode(wire: &[u8], params: &Params) -> Result<Self> {
        let wire = strip_eol(wire, params.eol);
        let mut iter = wire.iter().copied();
        let mark = iter.next().ok_or(Error::Protocol("empty kermit packet"))?;
        if mark != crate::kermit::DEFAULT_MARK {
            return Err(Error::Protocol("kermit packet missing MARK byte"));
        }
        let rest: Vec<u8> = iter.collect();
        if rest.len() < 3 {
            return Err(Error::Protocol("kermit packet too short"));
        }
        let len_field = unchar(rest[0]);
        let seq = unchar(rest[1]) & 0x3F;
        let ptype = PacketType::from_byte(rest[2])
            .ok_or(Error::Protocol("kermit packet has unknown TYPE"))?;

        let header_len = if len_field == 0 { 4 } else { 2 };
        if rest.len() < 1 + header_len {
            return Err(Error::Protocol("kermit long-packet header truncated"));
        }
        let after_header = &rest[1 + header_len..];
        let check_len = params.check.wire_len();
        if after_header.len() < check_len {
            return Err(Error::Protocol("kermit packet shorter than its check field"));
        }
        let split = after_header.len() - check_len;
        let (quoted_data, check_bytes) = after_header.split_at(split);

        let checked_region = &rest[1..rest.len() - check_len];
        let expected = compute_check(params.check, checked_region);
        if expected != check_bytes {
            return Err(Error::FrameCheck);
        }

        let data = unquote(quoted_data, params)?;
        Ok(Packet { seq, ptype, data })
    }
}

fn strip_eol(wire: &[u8], eol: u8) -> &[u8] {
    if wire.last() == Some(&eol) {
        &wire[..wire.len() - 1]
    } else {
        wire
    }
}

/// Quotes control characters, the quote prefixes themselves, and (when
/// `params.qbin` is set) 8-bit characters.
#[must_use]
pub fn quote(data: &[u8], params: &Params) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &byte in data {
        if needs_quote(byte, params) {
            out.push(params.qctl);
            out.push(ctl(byte & 0x7F));
            if byte & 0x80 != 0 && params.qbin != 0 {
                out.insert(out.len() - 2, params.qbin);
            }
        } else if byte & 0x80 != 0 && params.qbin != 0 {
            out.push(params.qbin);
            out.push(byte & 0x7F);
        } else {
            out.push(byte);
        }
    }
    out
}

fn needs_quote(byte: u8, params: &Params) -> bool {
    let low = byte & 0x7F;
    low < 0x20 || low == 0x7F || low == params.qctl || (params.qbin != 0 && low == params.qbin)
}

/// Reverses [`quote`].
pub fn unquote(data: &[u8], params: &Params) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    let mut iter = data.iter().copied().peekable();
    while let Some(byte) = iter.next() {
        if params.qbin != 0 && byte == params.qbin {
            let next = iter.next().ok_or(Error::Encoding("dangling QBIN prefix"))?;
            if next == params.qctl {
                let quoted = iter.next().ok_or(Error::Encoding("dangling QCTL after QBIN"))?;
                out.push(ctl(quoted) | 0x80);
            } else {
                out.push(next | 0x80);
            }
        } else if byte == params.qctl {
            let next = iter.next().ok_or(Error::Encoding("dangling QCTL prefix"))?;
            out.push(ctl(next));
        } else {
            out.push(byte);
        }
    }
    Ok(out)
}

fn compute_check(kind: CheckType, region: &[u8]) -> Vec<u8> {
    match kind {
        CheckType::One => vec![check1(region)],
        CheckType::Two => check2(region).to_vec(),
        CheckType::Three => check3(region).to_vec(),
    }
}

/// Type-1 block check: 6-bit folded sum of `region`.
#[must_use]
pub fn check1(region: &[u8]) -> u8 {
    let sum: u32 = region.iter().map(|&b| b as u32).sum();
    tochar(((sum + ((sum & 0xC0) >> 6)) & 0x3F) as u8)
}

/// Type-2 block check: two characters carrying a 12-bit sum.
#[must_use]
pub fn check2(region: &[u8]) -> [u8; 2] {
    let sum: u32 = region.iter().map(|&b| b as u32).sum::<u32>() & 0x0FFF;
    [tochar((sum & 0x3F) as u8), tochar(((sum >> 6) & 0x3F) as u8)]
}

/// Type-3 block check: three characters carrying a 16-bit CRC (CRC-CCITT
/// polynomial, reusing the CRC-16 primitive from [`crate::checksum`]; see
/// `DESIGN.md` for why this crate does not replicate C-Kermit's exact bit
/// ordering).
#[must_use]
pub fn check3(region: &[u8]) -> [u8; 3] {
    let crc = crc16(0, region);
    [
        tochar(((crc >> 12) & 0x0F) as u8),
        tochar(((crc >> 6) & 0x3F) as u8),
        tochar((crc & 0x3F) as u8),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_unquote_roundtrip_controls() {
        let params = Params::default();
        let data = b"A\x01B\x0DC#D".to_vec();
        let quoted = quote(&data, &params);
        assert!(quoted.iter().all(|&b| b & 0x80 == 0));
        let restored = unquote(&quoted, &params).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn quote_unquote_roundtrip_eight_bit() {
        let params = Params::default();
        let data = vec![0x41, 0xC1, 0x0D, 0xFF];
        let quoted = quote(&data, &params);
        let restored = unquote(&quoted, &params).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn check1_is_self_consistent_and_printable() {
        let region = b"2Y";
        let check = check1(region);
        assert!((0x20..0x60).contains(&check));
    }

    #[test]
    fn packet_encode_decode_roundtrip_short() {
        let params = Params::default();
        let packet = Packet::new(5, PacketType::Data, b"hello world".to_vec());
        let wire = packet.encode(&params);
        assert_eq!(wire[0], crate::kermit::DEFAULT_MARK);
        assert_eq!(*wire.last().unwrap(), params.eol);
        let decoded = Packet::decode(&wire, &params).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn packet_encode_decode_roundtrip_with_control_bytes() {
        let params = Params::default();
        let packet = Packet::new(1, PacketType::FileHeader, b"na\x01me.txt".to_vec());
        let wire = packet.encode(&params);
        let decoded = Packet::decode(&wire, &params).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn packet_decode_rejects_corrupted_check() {
        let params = Params::default();
        let packet = Packet::new(2, PacketType::Ack, Vec::new());
        let mut wire = packet.encode(&params);
        let check_index = wire.len() - 2;
        wire[check_index] ^= 0x01;
        assert!(matches!(Packet::decode(&wire, &params), Err(Error::FrameCheck)));
    }

    #[test]
    fn packet_decode_rejects_unknown_type() {
        let params = Params::default();
        let mut packet = Packet::new(0, PacketType::Ack, Vec::new());
        packet.ptype = PacketType::Ack;
        let mut wire = packet.encode(&params);
        let type_index = wire.iter().position(|&b| b == b'Y').unwrap();
        wire[type_index] = b'?';
        // Recompute nothing: corrupting TYPE alone also breaks the check,
        // which is the more common real-world symptom; assert we reject.
        assert!(Packet::decode(&wire, &params).is_err());
    }

    #[test]
    fn packet_encode_decode_roundtrip_long_packet() {
        let params = Params::default();
        let payload = vec![b'x'; 200];
        let packet = Packet::new(3, PacketType::Data, payload.clone());
        let wire = packet.encode(&params);
        let decoded = Packet::decode(&wire, &params).unwrap();
        assert_eq!(decoded.data, payload);
    }

    #[test]
    fn seq_wraps_into_six_bits() {
        let params = Params::default();
        let packet = Packet::new(200, PacketType::Data, vec![1, 2, 3]);
        let wire = packet.encode(&params);
        let decoded = Packet::decode(&wire, &params).unwrap();
        assert_eq!(decoded.seq, 200 & 0x3F);
    }
}
