//! Block-level framing: encode/decode `[SOH|STX] seq (255-seq) data
//! checksum-or-crc`.

use super::control::{CPM_EOF, EOT, SOH, STX};
use super::{CheckKind, Flavor};
use crate::checksum::{checksum8, crc16};
use crate::error::{Error, Result};

/// A decoded data block, or the end-of-transmission marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Block { seq: u8, data: Vec<u8> },
    Eot,
}

/// Encodes `data` (already padded to the flavor's block size) as a
/// complete wire block for sequence number `seq`.
#[must_use]
pub fn encode_block(flavor: Flavor, seq: u8, data: &[u8]) -> Vec<u8> {
    debug_assert_eq!(data.len(), data.len().max(flavor.block_size()).min(flavor.block_size()));
    let header_byte = if data.len() == 1024 { STX } else { SOH };
    let mut out = Vec::with_capacity(data.len() + 5);
    out.push(header_byte);
    out.push(seq);
    out.push(0xFFu8.wrapping_sub(seq));
    out.extend_from_slice(data);
    match flavor.check_kind() {
        CheckKind::Checksum8 => out.push(checksum8(data)),
        CheckKind::Crc16 => out.extend_from_slice(&crc16(0, data).to_be_bytes()),
    }
    out
}

/// Pads `data` up to `block_size` with [`CPM_EOF`] (0x1A), the historical
/// CP/M end-of-text marker Xmodem uses for a short final block.
#[must_use]
pub fn pad_block(mut data: Vec<u8>, block_size: usize) -> Vec<u8> {
    data.resize(block_size, CPM_EOF);
    data
}

/// Decodes a single frame given the leading header byte already read from
/// the stream (`SOH`, `STX`, `EOT`, or `CAN`/garbage, which the caller
/// handles before calling this). `read_exact` supplies the remaining
/// bytes.
pub fn decode_body(
    header_byte: u8,
    check_kind: CheckKind,
    mut read_exact: impl FnMut(&mut [u8]) -> Result<()>,
) -> Result<Frame> {
    if header_byte == EOT {
        return Ok(Frame::Eot);
    }
    let block_size = match header_byte {
        SOH => 128,
        STX => 1024,
        _ => return Err(Error::Protocol("expected SOH, STX or EOT")),
    };

    let mut seq_bytes = [0u8; 2];
    read_exact(&mut seq_bytes)?;
    let seq = seq_bytes[0];
    if seq_bytes[1] != 0xFFu8.wrapping_sub(seq) {
        return Err(Error::Protocol("sequence complement mismatch"));
    }

    let mut data = vec![0u8; block_size];
    read_exact(&mut data)?;

    match check_kind {
        CheckKind::Checksum8 => {
            let mut sum = [0u8; 1];
            read_exact(&mut sum)?;
            if checksum8(&data) != sum[0] {
                return Err(Error::FrameCheck);
            }
        }
        CheckKind::Crc16 => {
            let mut crc_bytes = [0u8; 2];
            read_exact(&mut crc_bytes)?;
            if crc16(0, &data) != u16::from_be_bytes(crc_bytes) {
                return Err(Error::FrameCheck);
            }
        }
    }

    Ok(Frame::Block { seq, data })
}

/// Trims trailing `CPM_EOF` (0x1A) bytes from a fully received buffer. An
/// irreducible ambiguity for files that legitimately end in 0x1A
/// (`spec.md` §4.3/§9); applied unconditionally as specified.
pub fn trim_cpm_eof(buf: &mut Vec<u8>) {
    while buf.last() == Some(&CPM_EOF) {
        buf.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip_checksum() {
        let data = pad_block(b"abcdef\n".to_vec(), 128);
        let wire = encode_block(Flavor::Vanilla, 1, &data);
        assert_eq!(wire[0], SOH);
        let mut cursor = wire[1..].to_vec();
        let frame = decode_body(wire[0], CheckKind::Checksum8, |out| {
            let n = out.len();
            out.copy_from_slice(&cursor[..n]);
            cursor.drain(..n);
            Ok(())
        })
        .unwrap();
        assert_eq!(frame, Frame::Block { seq: 1, data });
    }

    #[test]
    fn encode_decode_roundtrip_crc16() {
        let data = pad_block(vec![0xAA; 1024], 1024);
        let wire = encode_block(Flavor::X1K, 7, &data);
        assert_eq!(wire[0], STX);
        let mut cursor = wire[1..].to_vec();
        let frame = decode_body(wire[0], CheckKind::Crc16, |out| {
            let n = out.len();
            out.copy_from_slice(&cursor[..n]);
            cursor.drain(..n);
            Ok(())
        })
        .unwrap();
        assert_eq!(frame, Frame::Block { seq: 7, data });
    }

    #[test]
    fn bad_crc_is_rejected() {
        let data = pad_block(b"hello".to_vec(), 128);
        let mut wire = encode_block(Flavor::Crc, 1, &data);
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;
        let mut cursor = wire[1..].to_vec();
        let err = decode_body(wire[0], CheckKind::Crc16, |out| {
            let n = out.len();
            out.copy_from_slice(&cursor[..n]);
            cursor.drain(..n);
            Ok(())
        })
        .unwrap_err();
        assert!(matches!(err, Error::FrameCheck));
    }

    #[test]
    fn eot_decodes_without_reading_body() {
        let frame = decode_body(EOT, CheckKind::Checksum8, |_| {
            panic!("should not read a body for EOT")
        })
        .unwrap();
        assert_eq!(frame, Frame::Eot);
    }

    #[test]
    fn trims_trailing_cpm_eof() {
        let mut buf = b"abcdef\n".to_vec();
        buf.resize(128, CPM_EOF);
        trim_cpm_eof(&mut buf);
        assert_eq!(buf, b"abcdef\n");
    }

    #[test]
    fn sequence_mismatch_is_rejected() {
        let data = pad_block(b"hi".to_vec(), 128);
        let mut wire = encode_block(Flavor::Vanilla, 1, &data);
        wire[2] = 0; // corrupt the complement byte
        let mut cursor = wire[1..].to_vec();
        let err = decode_body(wire[0], CheckKind::Checksum8, |out| {
            let n = out.len();
            out.copy_from_slice(&cursor[..n]);
            cursor.drain(..n);
            Ok(())
        })
        .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
