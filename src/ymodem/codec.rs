//! Block-0 metadata framing: filename, size, mtime, mode.

use crate::error::{Error, Result};

/// Decoded contents of a Ymodem block-0 metadata block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub name: String,
    pub size: u64,
    pub mtime_octal_seconds: Option<u64>,
    pub mode_octal: Option<u32>,
}

/// Encodes `meta` as a NUL-padded 128-byte block-0 payload:
/// `name\0size[ mtime[ mode]]\0...padding...`.
#[must_use]
pub fn encode_metadata(meta: &FileMeta, block_size: usize) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(meta.name.as_bytes());
    payload.push(0);
    let mut fields = meta.size.to_string();
    if let Some(mtime) = meta.mtime_octal_seconds {
        fields.push(' ');
        fields.push_str(&format!("{mtime:o}"));
        if let Some(mode) = meta.mode_octal {
            fields.push(' ');
            fields.push_str(&format!("{mode:o}"));
        }
    }
    payload.extend_from_slice(fields.as_bytes());
    payload.push(0);
    payload.resize(block_size, 0);
    payload
}

/// Encodes the all-zero "end of batch" block-0.
#[must_use]
pub fn encode_end_of_batch(block_size: usize) -> Vec<u8> {
    vec![0u8; block_size]
}

/// Decodes a block-0 payload. Returns `Ok(None)` for the all-zero
/// end-of-batch marker.
pub fn decode_metadata(payload: &[u8]) -> Result<Option<FileMeta>> {
    if payload.iter().all(|&b| b == 0) {
        return Ok(None);
    }
    let nul = payload
        .iter()
        .position(|&b| b == 0)
        .ok_or(Error::Protocol("block-0 filename not NUL-terminated"))?;
    let name = std::str::from_utf8(&payload[..nul])
        .map_err(|_| Error::Encoding("non-UTF8 filename"))?
        .to_string();

    let rest = &payload[nul + 1..];
    let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
    let fields_text = std::str::from_utf8(&rest[..end])
        .map_err(|_| Error::Encoding("non-UTF8 metadata fields"))?;
    let mut fields = fields_text.split_ascii_whitespace();

    let size = fields
        .next()
        .ok_or(Error::Protocol("block-0 missing file size"))?
        .parse::<u64>()
        .map_err(|_| Error::Encoding("non-decimal file size"))?;
    let mtime_octal_seconds = fields
        .next()
        .and_then(|f| u64::from_str_radix(f, 8).ok());
    let mode_octal = fields.next().and_then(|f| u32::from_str_radix(f, 8).ok());

    Ok(Some(FileMeta {
        name,
        size,
        mtime_octal_seconds,
        mode_octal,
    }))
}
