//! Header framing: hex, binary-16, and binary-32 encodings, and the ZDLE
//! escape tables (`spec.md` §4.6 "Header format").

use super::{XON, ZDLE, ZPAD};
use crate::error::{Error, Result};
use crate::io::{ByteStream, ReadOutcome};
use crc::{Crc, CRC_16_XMODEM, CRC_32_ISO_HDLC};
use std::convert::TryFrom;
use std::time::Duration;
use strum::IntoEnumIterator;
use strum_macros::EnumIter;

const HEADER_TIMEOUT: Duration = Duration::from_secs(10);

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Escape table indexed by raw byte value: identity unless the byte needs
/// ZDLE-escaping on the wire.
const ZDLE_TABLE: [u8; 0x100] = [
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x4d, 0x0e, 0x0f,
    0x50, 0x51, 0x12, 0x53, 0x14, 0x15, 0x16, 0x17, 0x58, 0x19, 0x1a, 0x1b, 0x1c, 0x1d, 0x1e, 0x1f,
    0x20, 0x21, 0x22, 0x23, 0x24, 0x25, 0x26, 0x27, 0x28, 0x29, 0x2a, 0x2b, 0x2c, 0x2d, 0x2e, 0x2f,
    0x30, 0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3a, 0x3b, 0x3c, 0x3d, 0x3e, 0x3f,
    0x40, 0x41, 0x42, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48, 0x49, 0x4a, 0x4b, 0x4c, 0x4d, 0x4e, 0x4f,
    0x50, 0x51, 0x52, 0x53, 0x54, 0x55, 0x56, 0x57, 0x58, 0x59, 0x5a, 0x5b, 0x5c, 0x5d, 0x5e, 0x5f,
    0x60, 0x61, 0x62, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68, 0x69, 0x6a, 0x6b, 0x6c, 0x6d, 0x6e, 0x6f,
    0x70, 0x71, 0x72, 0x73, 0x74, 0x75, 0x76, 0x77, 0x78, 0x79, 0x7a, 0x7b, 0x7c, 0x7d, 0x7e, 0x6c,
    0x80, 0x81, 0x82, 0x83, 0x84, 0x85, 0x86, 0x87, 0x88, 0x89, 0x8a, 0x8b, 0x8c, 0xcd, 0x8e, 0x8f,
    0xd0, 0xd1, 0x92, 0xd3, 0x94, 0x95, 0x96, 0x97, 0x98, 0x99, 0x9a, 0x9b, 0x9c, 0x9d, 0x9e, 0x9f,
    0xa0, 0xa1, 0xa2, 0xa3, 0xa4, 0xa5, 0xa6, 0xa7, 0xa8, 0xa9, 0xaa, 0xab, 0xac, 0xad, 0xae, 0xaf,
    0xb0, 0xb1, 0xb2, 0xb3, 0xb4, 0xb5, 0xb6, 0xb7, 0xb8, 0xb9, 0xba, 0xbb, 0xbc, 0xbd, 0xbe, 0xbf,
    0xc0, 0xc1, 0xc2, 0xc3, 0xc4, 0xc5, 0xc6, 0xc7, 0xc8, 0xc9, 0xca, 0xcb, 0xcc, 0xcd, 0xce, 0xcf,
    0xd0, 0xd1, 0xd2, 0xd3, 0xd4, 0xd5, 0xd6, 0xd7, 0xd8, 0xd9, 0xda, 0xdb, 0xdc, 0xdd, 0xde, 0xdf,
    0xe0, 0xe1, 0xe2, 0xe3, 0xe4, 0xe5, 0xe6, 0xe7, 0xe8, 0xe9, 0xea, 0xeb, 0xec, 0xed, 0xee, 0xef,
    0xf0, 0xf1, 0xf2, 0xf3, 0xf4, 0xf5, 0xf6, 0xf7, 0xf8, 0xf9, 0xfa, 0xfb, 0xfc, 0xfd, 0xfe, 0x6d,
];

/// Inverse of [`ZDLE_TABLE`]: maps an escaped byte back to its original.
const UNZDLE_TABLE: [u8; 0x100] = [
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
    0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x1b, 0x1c, 0x1d, 0x1e, 0x1f,
    0x20, 0x21, 0x22, 0x23, 0x24, 0x25, 0x26, 0x27, 0x28, 0x29, 0x2a, 0x2b, 0x2c, 0x2d, 0x2e, 0x2f,
    0x30, 0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3a, 0x3b, 0x3c, 0x3d, 0x3e, 0x3f,
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
    0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x1b, 0x1c, 0x1d, 0x1e, 0x1f,
    0x60, 0x61, 0x62, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68, 0x69, 0x6a, 0x6b, 0x7f, 0xff, 0x6e, 0x6f,
    0x70, 0x71, 0x72, 0x73, 0x74, 0x75, 0x76, 0x77, 0x78, 0x79, 0x7a, 0x7b, 0x7c, 0x7d, 0x7e, 0x7f,
    0x80, 0x81, 0x82, 0x83, 0x84, 0x85, 0x86, 0x87, 0x88, 0x89, 0x8a, 0x8b, 0x8c, 0x8d, 0x8e, 0x8f,
    0x90, 0x91, 0x92, 0x93, 0x94, 0x95, 0x96, 0x97, 0x98, 0x99, 0x9a, 0x9b, 0x9c, 0x9d, 0x9e, 0x9f,
    0xa0, 0xa1, 0xa2, 0xa3, 0xa4, 0xa5, 0xa6, 0xa7, 0xa8, 0xa9, 0xaa, 0xab, 0xac, 0xad, 0xae, 0xaf,
    0xb0, 0xb1, 0xb2, 0xb3, 0xb4, 0xb5, 0xb6, 0xb7, 0xb8, 0xb9, 0xba, 0xbb, 0xbc, 0xbd, 0xbe, 0xbf,
    0x80, 0x81, 0x82, 0x83, 0x84, 0x85, 0x86, 0x87, 0x88, 0x89, 0x8a, 0x8b, 0x8c, 0x8d, 0x8e, 0x8f,
    0x90, 0x91, 0x92, 0x93, 0x94, 0x95, 0x96, 0x97, 0x98, 0x99, 0x9a, 0x9b, 0x9c, 0x9d, 0x9e, 0x9f,
    0xe0, 0xe1, 0xe2, 0xe3, 0xe4, 0xe5, 0xe6, 0xe7, 0xe8, 0xe9, 0xea, 0xeb, 0xec, 0xed, 0xee, 0xef,
    0xf0, 0xf1, 0xf2, 0xf3, 0xf4, 0xf5, 0xf6, 0xf7, 0xf8, 0xf9, 0xfa, 0xfb, 0xfc, 0xfd, 0xfe, 0xff,
];

/// Frame header wire encoding.
#[repr(u8)]
#[derive(Debug, Clone, Copy, EnumIter, PartialEq, Eq)]
pub enum Encoding {
    ZBin = 0x41,
    ZHex = 0x42,
    ZBin32 = 0x43,
}

impl TryFrom<u8> for Encoding {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Encoding::iter()
            .find(|e| value == *e as u8)
            .ok_or(Error::Encoding("unknown zmodem header encoding byte"))
    }
}

/// Frame type tags carried in a header's first data byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, EnumIter, PartialEq, Eq)]
pub enum Frame {
    ZRqinit = 0,
    ZRinit = 1,
    ZSinit = 2,
    ZAck = 3,
    ZFile = 4,
    ZSkip = 5,
    ZNak = 6,
    ZAbort = 7,
    ZFin = 8,
    ZRpos = 9,
    ZData = 10,
    ZEof = 11,
    ZFerr = 12,
    ZCrc = 13,
    ZChallenge = 14,
    ZCompl = 15,
    ZCan = 16,
    ZFreecnt = 17,
    ZCommand = 18,
    ZStderr = 19,
}

impl TryFrom<u8> for Frame {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Frame::iter()
            .find(|f| value == *f as u8)
            .ok_or(Error::Encoding("unknown zmodem frame type byte"))
    }
}

/// Whether `frame`'s 4 flag bytes carry a little-endian `u32` position.
/// Only `ZRPOS`/`ZEOF`/`ZCRC`/`ZCOMPL`/`ZFREECNT`/`ZSINIT`/`ZDATA` are
/// little-endian; every other frame (including `ZACK`) is big-endian.
#[must_use]
pub const fn position_is_little_endian(frame: Frame) -> bool {
    matches!(
        frame,
        Frame::ZRpos | Frame::ZEof | Frame::ZCrc | Frame::ZCompl | Frame::ZFreecnt | Frame::ZSinit | Frame::ZData
    )
}

/// A complete Zmodem header: encoding, frame type, and 4 flag/position
/// bytes. The byte order of those 4 bytes when interpreted as a position
/// depends on the frame type — see [`position_is_little_endian`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub encoding: Encoding,
    pub frame: Frame,
    pub flags: [u8; 4],
}

impl Header {
    #[must_use]
    pub const fn new(encoding: Encoding, frame: Frame, flags: [u8; 4]) -> Self {
        Self { encoding, frame, flags }
    }

    #[must_use]
    pub const fn with_position(encoding: Encoding, frame: Frame, position: u32) -> Self {
        let flags = if position_is_little_endian(frame) {
            position.to_le_bytes()
        } else {
            position.to_be_bytes()
        };
        Self::new(encoding, frame, flags)
    }

    #[must_use]
    pub const fn position(&self) -> u32 {
        if position_is_little_endian(self.frame) {
            u32::from_le_bytes(self.flags)
        } else {
            u32::from_be_bytes(self.flags)
        }
    }

    /// Writes the escaped, checksummed header to `stream`.
    pub fn write(&self, stream: &mut dyn ByteStream) -> Result<()> {
        let mut body = Vec::with_capacity(5);
        body.push(self.frame as u8);
        body.extend_from_slice(&self.flags);

        let crc = make_crc(&body, self.encoding);

        stream.write_byte(ZPAD)?;
        if self.encoding == Encoding::ZHex {
            stream.write_byte(ZPAD)?;
        }
        stream.write_byte(ZDLE)?;
        stream.write_byte(self.encoding as u8)?;

        let mut payload = body;
        payload.extend_from_slice(&crc);

        if self.encoding == Encoding::ZHex {
            let hex = crate::io::to_hex(&payload);
            stream.write_all(hex.as_bytes())?;
            stream.write_byte(b'\r')?;
            stream.write_byte(b'\n')?;
            if self.frame != Frame::ZAck && self.frame != Frame::ZFin {
                stream.write_byte(XON)?;
            }
        } else {
            write_escaped(stream, &payload)?;
        }
        Ok(())
    }

    /// Reads and decodes a header, assuming the leading `ZPAD [ZPAD] ZDLE`
    /// sequence has already been consumed by [`skip_to_zdle`].
    pub fn read(stream: &mut dyn ByteStream) -> Result<Self> {
        let encoding_byte = read_byte(stream)?;
        let encoding = Encoding::try_from(encoding_byte)?;

        let payload = if encoding == Encoding::ZHex {
            let hex_chars = read_exact(stream, 14)?;
            let text = std::str::from_utf8(&hex_chars).map_err(|_| Error::Encoding("non-ASCII zmodem hex header"))?;
            hex::decode(text).map_err(|_| Error::Encoding("malformed zmodem hex header"))?
        } else {
            let crc_len = if encoding == Encoding::ZBin32 { 4 } else { 2 };
            read_escaped(stream, 5 + crc_len)?
        };

        let crc_len = if encoding == Encoding::ZBin32 { 4 } else { 2 };
        if payload.len() != 5 + crc_len {
            return Err(Error::Protocol("zmodem header has the wrong length"));
        }
        let (body, crc) = payload.split_at(5);
        if crc != make_crc(body, encoding) {
            return Err(Error::FrameCheck);
        }

        if encoding == Encoding::ZHex {
            // Hex headers are followed by CRLF (and sometimes XON); drain them.
            let _ = read_byte(stream);
            let _ = read_byte(stream);
        }

        let frame = Frame::try_from(body[0])?;
        let mut flags = [0u8; 4];
        flags.copy_from_slice(&body[1..5]);
        Ok(Header { encoding, frame, flags })
    }
}

fn make_crc(body: &[u8], encoding: Encoding) -> Vec<u8> {
    if encoding == Encoding::ZBin32 {
        CRC32.checksum(body).to_le_bytes().to_vec()
    } else {
        CRC16.checksum(body).to_be_bytes().to_vec()
    }
}

/// Scans for the `ZPAD [ZPAD] ZDLE` sequence that starts every frame.
/// Returns `Ok(())` once positioned right after `ZDLE`.
pub fn skip_to_zdle(stream: &mut dyn ByteStream) -> Result<()> {
    if read_byte(stream)? != ZPAD {
        return Err(Error::Protocol("expected zmodem ZPAD"));
    }
    let mut b = read_byte(stream)?;
    if b == ZPAD {
        b = read_byte(stream)?;
    }
    if b != ZDLE {
        return Err(Error::Protocol("expected zmodem ZDLE after ZPAD"));
    }
    Ok(())
}

/// Like [`skip_to_zdle`], but feeds every byte skipped while hunting for
/// `ZPAD` into `counter`, so a run of 5 raw cancel bytes sent outside any
/// frame (`spec.md` §4.1 "Cancellation") is caught even though `ZDLE` and
/// `CAN` share the same byte value.
pub fn skip_to_zdle_watched(
    stream: &mut dyn ByteStream,
    counter: &mut crate::io::CtrlXCounter,
) -> Result<()> {
    loop {
        let b = read_byte(stream)?;
        if counter.feed(b) {
            return Err(Error::CancelledByRemote("5 consecutive cancel bytes"));
        }
        if b == ZPAD {
            break;
        }
    }
    let mut b = read_byte(stream)?;
    if counter.feed(b) {
        return Err(Error::CancelledByRemote("5 consecutive cancel bytes"));
    }
    if b == ZPAD {
        b = read_byte(stream)?;
        if counter.feed(b) {
            return Err(Error::CancelledByRemote("5 consecutive cancel bytes"));
        }
    }
    if b != ZDLE {
        return Err(Error::Protocol("expected zmodem ZDLE after ZPAD"));
    }
    Ok(())
}

fn read_byte(stream: &mut dyn ByteStream) -> Result<u8> {
    match stream.read_byte(HEADER_TIMEOUT)? {
        ReadOutcome::Byte(b) => Ok(b),
        ReadOutcome::Timeout => Err(Error::Timeout),
        ReadOutcome::Eof => Err(Error::UnexpectedEof),
        ReadOutcome::Cancelled => Err(Error::ReadCancelled),
    }
}

fn read_exact(stream: &mut dyn ByteStream, n: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(read_byte(stream)?);
    }
    Ok(out)
}

/// Reads `n` logical (unescaped) bytes, following ZDLE escapes as needed.
fn read_escaped(stream: &mut dyn ByteStream, n: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        out.push(read_byte_unescaped(stream)?);
    }
    Ok(out)
}

/// Looks up the unescaped value for a byte that followed a ZDLE prefix.
pub(crate) fn unescape_one(value: u8) -> u8 {
    UNZDLE_TABLE[value as usize]
}

/// Reads one logical byte, unescaping it if it was ZDLE-prefixed.
pub(crate) fn read_byte_unescaped(stream: &mut dyn ByteStream) -> Result<u8> {
    let b = read_byte(stream)?;
    if b == ZDLE {
        let next = read_byte(stream)?;
        Ok(UNZDLE_TABLE[next as usize])
    } else {
        Ok(b)
    }
}

/// Writes `buf`, ZDLE-escaping any byte that needs it.
pub(crate) fn write_escaped(stream: &mut dyn ByteStream, buf: &[u8]) -> Result<()> {
    for &value in buf {
        write_byte_escaped(stream, value)?;
    }
    Ok(())
}

fn write_byte_escaped(stream: &mut dyn ByteStream, value: u8) -> Result<()> {
    let escaped = ZDLE_TABLE[value as usize];
    if escaped != value {
        stream.write_byte(ZDLE)?;
    }
    stream.write_byte(escaped)
}
