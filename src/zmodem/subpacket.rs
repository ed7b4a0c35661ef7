//! Data subpackets: ZDLE-escaped payload, a one-byte terminator, and a CRC
//! covering payload+terminator (`spec.md` §4.6 "Data subpackets").

use super::header::{read_byte_unescaped, write_escaped};
use super::header::Encoding;
use super::ZDLE;
use crate::error::{Error, Result};
use crate::io::ByteStream;
use crc::{Crc, CRC_16_XMODEM, CRC_32_ISO_HDLC};
use std::convert::TryFrom;
use strum::IntoEnumIterator;
use strum_macros::EnumIter;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Largest subpacket payload this crate will buffer before forcing a
/// terminator (matches the historical Zmodem maximum).
pub const MAX_SUBPACKET_LEN: usize = 1024;

/// Subpacket terminator, carried ZDLE-escaped right after the payload.
#[repr(u8)]
#[derive(Debug, Clone, Copy, EnumIter, PartialEq, Eq)]
pub enum Terminator {
    /// End of frame, no ACK requested.
    Crce = 0x68,
    /// More subpackets follow, no ACK requested (streaming).
    Crcg = 0x69,
    /// More subpackets follow, ACK requested.
    Crcq = 0x6a,
    /// End of frame, ACK requested ("wait").
    Crcw = 0x6b,
}

impl Terminator {
    #[must_use]
    pub fn ends_frame(self) -> bool {
        matches!(self, Terminator::Crce | Terminator::Crcw)
    }

    #[must_use]
    pub fn wants_ack(self) -> bool {
        matches!(self, Terminator::Crcq | Terminator::Crcw)
    }
}

impl TryFrom<u8> for Terminator {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Terminator::iter()
            .find(|t| value == *t as u8)
            .ok_or(Error::Encoding("unknown zmodem subpacket terminator"))
    }
}

/// Writes `data` as one ZDLE-escaped subpacket terminated by `term`, with
/// a CRC computed over the payload followed by the terminator byte.
pub fn write_subpacket(
    stream: &mut dyn ByteStream,
    encoding: Encoding,
    term: Terminator,
    data: &[u8],
) -> Result<()> {
    write_escaped(stream, data)?;
    stream.write_byte(ZDLE)?;
    stream.write_byte(term as u8)?;
    match encoding {
        Encoding::ZBin32 => {
            let mut digest = CRC32.digest();
            digest.update(data);
            digest.update(&[term as u8]);
            write_escaped(stream, &digest.finalize().to_le_bytes())
        }
        _ => {
            let mut digest = CRC16.digest();
            digest.update(data);
            digest.update(&[term as u8]);
            write_escaped(stream, &digest.finalize().to_be_bytes())
        }
    }
}

/// Reads one ZDLE-escaped subpacket, verifying its CRC. Payloads beyond
/// [`MAX_SUBPACKET_LEN`] bytes are rejected as a protocol violation rather
/// than silently truncated.
pub fn read_subpacket(stream: &mut dyn ByteStream, encoding: Encoding) -> Result<(Vec<u8>, Terminator)> {
    let mut data = Vec::new();
    let term = loop {
        let byte = read_raw_or_terminator(stream)?;
        match byte {
            RawOrTerm::Raw(b) => {
                data.push(b);
                if data.len() > MAX_SUBPACKET_LEN {
                    return Err(Error::Protocol("zmodem subpacket exceeded maximum length"));
                }
            }
            RawOrTerm::Term(t) => break t,
        }
    };

    let crc_len = if encoding == Encoding::ZBin32 { 4 } else { 2 };
    let mut crc_bytes = [0u8; 4];
    for slot in crc_bytes.iter_mut().take(crc_len) {
        *slot = read_byte_unescaped(stream)?;
    }

    let expected = if encoding == Encoding::ZBin32 {
        let mut digest = CRC32.digest();
        digest.update(&data);
        digest.update(&[term as u8]);
        digest.finalize().to_le_bytes().to_vec()
    } else {
        let mut digest = CRC16.digest();
        digest.update(&data);
        digest.update(&[term as u8]);
        digest.finalize().to_be_bytes().to_vec()
    };
    if expected != crc_bytes[..crc_len] {
        return Err(Error::SubpacketCheck { offset: data.len() as u32 });
    }

    Ok((data, term))
}

enum RawOrTerm {
    Raw(u8),
    Term(Terminator),
}

fn read_raw_or_terminator(stream: &mut dyn ByteStream) -> Result<RawOrTerm> {
    use crate::io::ReadOutcome;
    let b = match stream.read_byte(std::time::Duration::from_secs(10))? {
        ReadOutcome::Byte(b) => b,
        ReadOutcome::Timeout => return Err(Error::Timeout),
        ReadOutcome::Eof => return Err(Error::UnexpectedEof),
        ReadOutcome::Cancelled => return Err(Error::ReadCancelled),
    };
    if b == ZDLE {
        let next = match stream.read_byte(std::time::Duration::from_secs(10))? {
            ReadOutcome::Byte(b) => b,
            ReadOutcome::Timeout => return Err(Error::Timeout),
            ReadOutcome::Eof => return Err(Error::UnexpectedEof),
            ReadOutcome::Cancelled => return Err(Error::ReadCancelled),
        };
        if let Ok(term) = Terminator::try_from(next) {
            return Ok(RawOrTerm::Term(term));
        }
        return Ok(RawOrTerm::Raw(super::header::unescape_one(next)));
    }
    Ok(RawOrTerm::Raw(b))
}
