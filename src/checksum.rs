//! Pure checksum/CRC primitives (component C1).
//!
//! These must be bit-exact with the reference C implementations used by
//! `rzsz` and C-Kermit: the wire CRC fields are compared for equality, not
//! just used as a local integrity check.

/// 8-bit sum of all bytes in `buf`, wrapping mod 256. Used by vanilla and
/// "relaxed" Xmodem.
#[must_use]
pub fn checksum8(buf: &[u8]) -> u8 {
    buf.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// XMODEM CRC-16: polynomial 0x1021, MSB-first, no reflection. `seed` is
/// typically 0. Used by CRC/1K/1K-G Xmodem, Ymodem, and Kermit's 2-byte
/// check type.
#[must_use]
pub fn crc16(seed: u16, buf: &[u8]) -> u16 {
    let mut crc = seed;
    for &byte in buf {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Reflected CRC-32 (IEEE 802.3 / "Plumb") with the preset-to-all-ones,
/// invert-on-finalize convention used by Zmodem's `ZBIN32` encoding.
///
/// `crc32(0, &[])` returns the preset value `0xFFFF_FFFF` unmodified: with no
/// bytes to fold in there is nothing to finalize. Any non-empty `buf`
/// finalizes (inverts) the running register before returning, matching the
/// classic `zmodem.c` `UPDC32`-based convention this crate must interoperate
/// with bit-for-bit.
#[must_use]
pub fn crc32(seed: u32, buf: &[u8]) -> u32 {
    let preset = if seed == 0 { 0xFFFF_FFFF } else { seed };
    if buf.is_empty() {
        return preset;
    }
    let mut crc = preset;
    for &byte in buf {
        crc = CRC32_TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize] ^ (crc >> 8);
    }
    crc ^ 0xFFFF_FFFF
}

/// Standard reflected CRC-32 table for polynomial `0xEDB88320`.
const CRC32_TABLE: [u32; 256] = build_crc32_table();

const fn build_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum8_wraps() {
        assert_eq!(checksum8(&[0xFF, 0x01]), 0x00);
        assert_eq!(checksum8(b"abcdef\n"), {
            b"abcdef\n".iter().fold(0u8, |a, &b| a.wrapping_add(b))
        });
    }

    #[test]
    fn crc16_xmodem_known_vector() {
        // Well-known XMODEM CRC-16 of "123456789" is 0x31C3.
        assert_eq!(crc16(0, b"123456789"), 0x31C3);
    }

    #[test]
    fn crc16_residue_invariant() {
        // Appending the big-endian CRC of `buf` to `buf` and recomputing
        // the CRC must produce a zero residue (no final XOR).
        let buf = b"The quick brown fox";
        let crc = crc16(0, buf);
        let mut extended = buf.to_vec();
        extended.extend_from_slice(&crc.to_be_bytes());
        assert_eq!(crc16(0, &extended), 0);
    }

    #[test]
    fn crc32_empty_is_preset() {
        assert_eq!(crc32(0, &[]), 0xFFFF_FFFF);
    }

    #[test]
    fn crc32_residue_invariant() {
        // Appending a buffer's own CRC-32 (little-endian) to itself and
        // recomputing the CRC yields the algorithm's fixed residue value,
        // independent of the buffer contents.
        let buf = b"The quick brown fox jumps over the lazy dog";
        let crc = crc32(0, buf);
        let mut extended = buf.to_vec();
        extended.extend_from_slice(&crc.to_le_bytes());
        assert_eq!(crc32(0, &extended), 0x2144_DF1C);
    }

    #[test]
    fn crc32_known_vector() {
        // Standard CRC-32/ISO-HDLC check value for "123456789" is
        // 0xCBF43926.
        assert_eq!(crc32(0, b"123456789"), 0xCBF4_3926);
    }
}
