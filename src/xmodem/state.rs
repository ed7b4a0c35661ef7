//! Receiver and sender state machines driving the block codec
//! (`spec.md` §4.3).

use super::codec::{decode_body, encode_block, pad_block, trim_cpm_eof, Frame};
use super::control::{ACK, CAN, EOT, NAK};
use super::Flavor;
use crate::error::{Error, Result};
use crate::io::{purge, ByteStream, LocalFile, ReadOutcome};
use crate::progress::ProgressSink;
use crate::session::{Session, SessionState};

fn read_header_byte(stream: &mut dyn ByteStream, flavor: Flavor) -> Result<Option<u8>> {
    match stream.read_byte(flavor.timeout())? {
        ReadOutcome::Byte(b) => Ok(Some(b)),
        ReadOutcome::Timeout => Ok(None),
        ReadOutcome::Eof => Err(Error::UnexpectedEof),
        ReadOutcome::Cancelled => Err(Error::ReadCancelled),
    }
}

fn read_exact_timed<'a>(
    stream: &'a mut dyn ByteStream,
    flavor: Flavor,
) -> impl FnMut(&mut [u8]) -> Result<()> + 'a {
    move |buf: &mut [u8]| {
        for slot in buf.iter_mut() {
            match stream.read_byte(flavor.timeout())? {
                ReadOutcome::Byte(b) => *slot = b,
                ReadOutcome::Timeout => return Err(Error::Timeout),
                ReadOutcome::Eof => return Err(Error::UnexpectedEof),
                ReadOutcome::Cancelled => return Err(Error::ReadCancelled),
            }
        }
        Ok(())
    }
}

/// Drives the receiver side of a single-file Xmodem transfer.
pub struct Receiver {
    flavor: Flavor,
    downgraded: bool,
}

impl Receiver {
    #[must_use]
    pub fn new(flavor: Flavor) -> Self {
        Self {
            flavor,
            downgraded: false,
        }
    }

    /// Receives one file into `file`, driving `session`'s state and error
    /// counter as bytes arrive.
    pub fn receive(
        &mut self,
        stream: &mut dyn ByteStream,
        file: &mut dyn LocalFile,
        session: &Session,
        sink: &mut dyn ProgressSink,
    ) -> Result<()> {
        session.set_state(SessionState::Transfer);
        stream.write_byte(self.flavor.ncg_byte())?;
        sink.on_status("waiting for first block");

        let mut expected_seq: u8 = 1;
        let mut total: u64 = 0;
        let mut buf = Vec::new();

        loop {
            if session.cancel_requested() {
                stream.write_byte(CAN)?;
                stream.write_byte(CAN)?;
                session.set_state(SessionState::Abort);
                return Err(Error::CancelledByLocal);
            }

            let header = match read_header_byte(stream, self.flavor)? {
                Some(b) => b,
                None => {
                    self.on_timeout(stream, expected_seq, session)?;
                    continue;
                }
            };

            if header == CAN {
                session.set_state(SessionState::Abort);
                session.log_info("transfer cancelled by sender");
                return Err(Error::CancelledByRemote("CAN byte"));
            }

            if header != 0x01 && header != 0x02 && header != EOT {
                purge(stream);
                stream.write_byte(NAK)?;
                if session.record_error() {
                    session.set_state(SessionState::Abort);
                    return Err(Error::TooManyErrors(10));
                }
                continue;
            }

            let check_kind = self.flavor.check_kind();
            let frame = match decode_body(header, check_kind, read_exact_timed(stream, self.flavor))
            {
                Ok(frame) => frame,
                Err(Error::FrameCheck) | Err(Error::Protocol(_)) => {
                    purge(stream);
                    stream.write_byte(NAK)?;
                    if self.maybe_downgrade(expected_seq) {
                        stream.write_byte(self.flavor.ncg_byte())?;
                    }
                    if session.record_error() {
                        session.set_state(SessionState::Abort);
                        return Err(Error::TooManyErrors(10));
                    }
                    continue;
                }
                Err(Error::Timeout) => {
                    self.on_timeout(stream, expected_seq, session)?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match frame {
                Frame::Eot => {
                    stream.write_byte(ACK)?;
                    trim_cpm_eof(&mut buf);
                    file.write_all(&buf)?;
                    session.set_state(SessionState::End);
                    sink.on_status("transfer complete");
                    return Ok(());
                }
                Frame::Block { seq, data } => {
                    if seq == expected_seq.wrapping_sub(1) {
                        // Duplicate of the previous block: ack, discard.
                        if self.flavor.acks_each_block() {
                            stream.write_byte(ACK)?;
                        }
                        session.clear_errors();
                        continue;
                    }
                    if seq != expected_seq {
                        purge(stream);
                        stream.write_byte(NAK)?;
                        if session.record_error() {
                            session.set_state(SessionState::Abort);
                            return Err(Error::TooManyErrors(10));
                        }
                        continue;
                    }

                    buf.extend_from_slice(&data);
                    total += data.len() as u64;
                    session.clear_errors();
                    if self.flavor.acks_each_block() {
                        stream.write_byte(ACK)?;
                    }
                    sink.on_file_progress(file.name(), total, None);
                    expected_seq = expected_seq.wrapping_add(1);
                }
            }
        }
    }

    fn on_timeout(&mut self, stream: &mut dyn ByteStream, expected_seq: u8, session: &Session) -> Result<()> {
        purge(stream);
        if self.maybe_downgrade(expected_seq) {
            stream.write_byte(self.flavor.ncg_byte())?;
        } else {
            stream.write_byte(NAK)?;
        }
        if session.record_error() {
            session.set_state(SessionState::Abort);
            return Err(Error::TooManyErrors(10));
        }
        Ok(())
    }

    /// 1K/G downgrades to plain 1K at most once, only when the very first
    /// block (seq 1) is missing/duplicated/times out (`spec.md` §4.3
    /// "Flavor downgrade"). Returns whether a downgrade just happened.
    fn maybe_downgrade(&mut self, expected_seq: u8) -> bool {
        if !self.downgraded && expected_seq == 1 {
            if let Some(downgraded) = self.flavor.downgraded() {
                self.flavor = downgraded;
                self.downgraded = true;
                return true;
            }
        }
        false
    }
}

/// Drives the sender side of a single-file Xmodem transfer.
pub struct Sender {
    flavor: Flavor,
}

impl Sender {
    #[must_use]
    pub fn new() -> Self {
        Self {
            flavor: Flavor::Vanilla,
        }
    }

    /// Waits for the receiver's NCG byte and negotiates the flavor from it.
    fn start(&mut self, stream: &mut dyn ByteStream, session: &Session) -> Result<()> {
        loop {
            match stream.read_byte(std::time::Duration::from_secs(60))? {
                ReadOutcome::Byte(NAK) => {
                    self.flavor = Flavor::Vanilla;
                    return Ok(());
                }
                ReadOutcome::Byte(b) if b == super::control::CRC_NCG => {
                    self.flavor = Flavor::Crc;
                    return Ok(());
                }
                ReadOutcome::Byte(b) if b == super::control::G_NCG => {
                    self.flavor = Flavor::X1KG;
                    return Ok(());
                }
                ReadOutcome::Byte(CAN) => {
                    session.set_state(SessionState::Abort);
                    return Err(Error::CancelledByRemote("CAN byte"));
                }
                ReadOutcome::Byte(_) => continue,
                ReadOutcome::Timeout => {
                    if session.record_error() {
                        session.set_state(SessionState::Abort);
                        return Err(Error::TooManyErrors(10));
                    }
                }
                ReadOutcome::Eof => return Err(Error::UnexpectedEof),
                ReadOutcome::Cancelled => return Err(Error::ReadCancelled),
            }
        }
    }

    /// Sends the full contents of `file` to `stream`, single-file only
    /// (`spec.md` §4.3 "Sender").
    pub fn send(
        &mut self,
        stream: &mut dyn ByteStream,
        file: &mut dyn LocalFile,
        session: &Session,
        sink: &mut dyn ProgressSink,
    ) -> Result<()> {
        session.set_state(SessionState::Transfer);
        self.start(stream, session)?;
        sink.on_status("negotiated, sending blocks");

        let block_size = self.flavor.block_size();
        let mut seq: u8 = 1;
        let mut sent: u64 = 0;
        loop {
            if session.cancel_requested() {
                stream.write_byte(CAN)?;
                stream.write_byte(CAN)?;
                session.set_state(SessionState::Abort);
                return Err(Error::CancelledByLocal);
            }

            let mut raw = vec![0u8; block_size];
            let n = file.read(&mut raw)?;
            if n == 0 {
                break;
            }
            raw.truncate(n);
            let data = pad_block(raw, block_size);
            self.send_block_with_retries(stream, session, seq, &data)?;
            sent += data.len() as u64;
            sink.on_file_progress(file.name(), sent, file.len());
            seq = seq.wrapping_add(1);
        }

        self.finish(stream, session)?;
        session.set_state(SessionState::End);
        sink.on_status("transfer complete");
        Ok(())
    }

    fn send_block_with_retries(
        &mut self,
        stream: &mut dyn ByteStream,
        session: &Session,
        seq: u8,
        data: &[u8],
    ) -> Result<()> {
        let wire = encode_block(self.flavor, seq, data);
        loop {
            stream.write_all(&wire)?;
            if !self.flavor.acks_each_block() {
                return Ok(());
            }
            match stream.read_byte(self.flavor.timeout())? {
                ReadOutcome::Byte(ACK) => {
                    session.clear_errors();
                    return Ok(());
                }
                ReadOutcome::Byte(CAN) => {
                    session.set_state(SessionState::Abort);
                    return Err(Error::CancelledByRemote("CAN byte"));
                }
                _ => {
                    if session.record_error() {
                        session.set_state(SessionState::Abort);
                        return Err(Error::TooManyErrors(10));
                    }
                }
            }
        }
    }

    fn finish(&mut self, stream: &mut dyn ByteStream, session: &Session) -> Result<()> {
        loop {
            stream.write_byte(EOT)?;
            match stream.read_byte(self.flavor.timeout())? {
                ReadOutcome::Byte(ACK) => return Ok(()),
                ReadOutcome::Byte(CAN) => {
                    session.set_state(SessionState::Abort);
                    return Err(Error::CancelledByRemote("CAN byte"));
                }
                _ => {
                    if session.record_error() {
                        session.set_state(SessionState::Abort);
                        return Err(Error::TooManyErrors(10));
                    }
                }
            }
        }
    }
}

impl Default for Sender {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downgrade_happens_only_once_on_first_block() {
        let mut receiver = Receiver::new(Flavor::X1KG);
        assert!(receiver.maybe_downgrade(1));
        assert_eq!(receiver.flavor, Flavor::X1K);
        // Subsequent failures at seq 1 (or any seq) no longer downgrade.
        receiver.downgraded = true;
        assert!(!receiver.maybe_downgrade(1));
    }

    #[test]
    fn non_g_flavors_never_downgrade() {
        let mut receiver = Receiver::new(Flavor::Crc);
        assert!(!receiver.maybe_downgrade(1));
    }
}
