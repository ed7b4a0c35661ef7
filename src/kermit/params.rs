//! S/Y negotiation parameter block and the "active params" derivation rule
//! (`spec.md` §4.5 "Negotiation").

use super::{tochar, unchar, CheckType};

/// One side's advertised (or negotiated) Kermit parameters, as carried in
/// the data field of an S or Y packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Params {
    /// Maximum packet length the sender is willing to accept, 10..94.
    pub maxl: u8,
    /// Timeout in seconds to use when waiting for a reply.
    pub timeout_secs: u8,
    /// Number of padding characters to send before each packet.
    pub npad: u8,
    /// Padding character.
    pub padc: u8,
    /// End-of-line character appended to each packet.
    pub eol: u8,
    /// Control-quote prefix character.
    pub qctl: u8,
    /// 8-bit-quote prefix character, or `0` if 8-bit quoting is declined.
    pub qbin: u8,
    /// Block check type.
    pub check: CheckType,
    /// Repeat-count prefix character, or `0` if run-length encoding is
    /// declined.
    pub rept: u8,
    /// Capability bitmask (we only ever advertise/accept "long packets").
    pub capas: u8,
    /// Sliding window size, 1..31. This crate only ever operates at 1;
    /// see `DESIGN.md`.
    pub windo: u8,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            maxl: 94,
            timeout_secs: 10,
            npad: 0,
            padc: 0,
            eol: 0x0D,
            qctl: b'#',
            qbin: b'&',
            check: CheckType::One,
            rept: b'~',
            capas: CAPAS_LONG_PACKETS,
            windo: 1,
        }
    }
}

/// Capability bit: sender/receiver supports long packets (LENX1/LENX2).
pub const CAPAS_LONG_PACKETS: u8 = 0x02;

impl Params {
    /// Encodes this parameter set as the data field of an S or Y packet
    /// (the fixed 9-field layout plus the long-packet extension fields).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(14);
        out.push(tochar(self.maxl));
        out.push(tochar(self.timeout_secs));
        out.push(tochar(self.npad));
        out.push(ctl_encode_padc(self.padc));
        out.push(tochar(self.eol));
        out.push(self.qctl);
        out.push(if self.qbin == 0 { b' ' } else { self.qbin });
        out.push(self.check.to_char());
        out.push(if self.rept == 0 { b' ' } else { self.rept });
        out.push(tochar(self.capas));
        out.push(tochar(self.windo));
        let maxlx = 94u16.max(1024).min(9999);
        out.push(tochar(((maxlx >> 6) & 0x3F) as u8));
        out.push(tochar((maxlx & 0x3F) as u8));
        out
    }

    /// Decodes a parameter block received in an S or Y packet. Missing
    /// trailing fields fall back to conservative defaults, matching real
    /// Kermit's tolerance for short parameter blocks from old partners.
    #[must_use]
    pub fn decode(data: &[u8]) -> Self {
        let mut fields = data.iter().copied();
        let maxl = fields.next().map(unchar).unwrap_or(80).max(10);
        let timeout_secs = fields.next().map(unchar).unwrap_or(10);
        let npad = fields.next().map(unchar).unwrap_or(0);
        let padc = fields.next().map(ctl_decode_padc).unwrap_or(0);
        let eol = fields.next().map(unchar).unwrap_or(0x0D);
        let qctl = fields.next().unwrap_or(b'#');
        let qbin = match fields.next() {
            Some(b' ') | None => 0,
            Some(b) => b,
        };
        let check = fields.next().map(CheckType::from_char).unwrap_or(CheckType::One);
        let rept = match fields.next() {
            Some(b' ') | None => 0,
            Some(b) => b,
        };
        let capas = fields.next().map(unchar).unwrap_or(0);
        let windo = fields.next().map(unchar).unwrap_or(1).max(1);
        Self {
            maxl,
            timeout_secs,
            npad,
            padc,
            eol,
            qctl,
            qbin,
            check,
            rept,
            capas,
            windo,
        }
    }

    /// Derives the parameters actually used for the rest of the session
    /// from `self` (what we offered) and `remote` (what they sent back or
    /// offered). NPAD/PADC/EOL are padding/line-termination the remote must
    /// send when talking to us, so they stay at our own value; the rest
    /// (check type, qbin, repeat count, capabilities) is the common ground
    /// both sides can do, and the window size is clamped to 1 (see
    /// `DESIGN.md` Open Question resolution for windowing).
    #[must_use]
    pub fn active(&self, remote: &Params) -> Params {
        Params {
            maxl: self.maxl.min(remote.maxl),
            timeout_secs: self.timeout_secs.max(remote.timeout_secs),
            npad: self.npad,
            padc: self.padc,
            eol: self.eol,
            qctl: remote.qctl,
            qbin: if self.qbin != 0 && remote.qbin != 0 {
                remote.qbin
            } else {
                0
            },
            check: weakest_common_check(self.check, remote.check),
            rept: if self.rept != 0 && remote.rept != 0 {
                remote.rept
            } else {
                0
            },
            capas: self.capas & remote.capas,
            windo: 1,
        }
    }
}

/// A packet check of 3 beats 2 beats 1; both sides must support it, so the
/// active type is the weaker (lower) of the two offers.
fn weakest_common_check(a: CheckType, b: CheckType) -> CheckType {
    fn rank(c: CheckType) -> u8 {
        match c {
            CheckType::One => 1,
            CheckType::Two => 2,
            CheckType::Three => 3,
        }
    }
    if rank(a) <= rank(b) {
        a
    } else {
        b
    }
}

fn ctl_encode_padc(padc: u8) -> u8 {
    if padc == 0 {
        tochar(0)
    } else {
        super::ctl(padc)
    }
}

fn ctl_decode_padc(byte: u8) -> u8 {
    let candidate = super::ctl(byte);
    if candidate < 0x20 || candidate == 0x7F {
        candidate
    } else {
        unchar(byte)
    }
}
