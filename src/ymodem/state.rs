//! Batch sender/receiver state machine (`spec.md` §4.4 "Flow").

use super::codec::{decode_metadata, encode_end_of_batch, encode_metadata, FileMeta};
use super::YmodemVariant;
use crate::error::{Error, Result};
use crate::io::{purge, ByteStream, LocalFile, ReadOutcome};
use crate::progress::ProgressSink;
use crate::session::{Session, SessionState};
use crate::xmodem::codec::{decode_body, encode_block, Frame};
use crate::xmodem::control::{ACK, CAN, NAK};
use crate::xmodem::state::{Receiver as XmodemReceiver, Sender as XmodemSender};
use crate::xmodem::{CheckKind, Flavor};

/// Drives a Ymodem batch transfer as the sending side.
pub struct Sender {
    variant: YmodemVariant,
}

impl Sender {
    #[must_use]
    pub fn new(variant: YmodemVariant) -> Self {
        Self { variant }
    }

    /// Sends every file in `files` as one Ymodem batch, followed by the
    /// terminating empty block 0.
    pub fn send_batch(
        &mut self,
        stream: &mut dyn ByteStream,
        files: &mut [&mut dyn LocalFile],
        session: &Session,
        sink: &mut dyn ProgressSink,
    ) -> Result<()> {
        session.set_state(SessionState::Transfer);
        for file in files.iter_mut() {
            self.send_one_file(stream, *file, session, sink)?;
            session.set_state(SessionState::FileDone);
        }
        self.send_block0(stream, &encode_end_of_batch(128), session)?;
        session.set_state(SessionState::End);
        Ok(())
    }

    fn send_one_file(
        &mut self,
        stream: &mut dyn ByteStream,
        file: &mut dyn LocalFile,
        session: &Session,
        sink: &mut dyn ProgressSink,
    ) -> Result<()> {
        let meta = FileMeta {
            name: file.name().to_string(),
            size: file.len().unwrap_or(0),
            mtime_octal_seconds: file.mtime_millis().filter(|m| *m >= 0).map(|m| (m / 1000) as u64),
            mode_octal: None,
        };
        sink.on_status(&format!("sending block-0 for {}", meta.name));
        self.send_block0(stream, &encode_metadata(&meta, 128), session)?;

        let mut body_sender = XmodemSender::new();
        body_sender.send(stream, file, session, sink)
    }

    fn send_block0(&mut self, stream: &mut dyn ByteStream, payload: &[u8], session: &Session) -> Result<()> {
        let wire = encode_block(Flavor::X1K, 0, payload);
        loop {
            if session.cancel_requested() {
                stream.write_byte(CAN)?;
                stream.write_byte(CAN)?;
                session.set_state(SessionState::Abort);
                return Err(Error::CancelledByLocal);
            }
            stream.write_all(&wire)?;
            match stream.read_byte(self.variant.timeout())? {
                ReadOutcome::Byte(ACK) => break,
                ReadOutcome::Byte(CAN) => {
                    session.set_state(SessionState::Abort);
                    return Err(Error::CancelledByRemote("CAN byte"));
                }
                _ => {
                    if session.record_error() {
                        session.set_state(SessionState::Abort);
                        return Err(Error::TooManyErrors(10));
                    }
                    continue;
                }
            }
        }
        // Consume the NCG byte the receiver sends after ACKing block 0.
        loop {
            match stream.read_byte(self.variant.timeout())? {
                ReadOutcome::Byte(_) => return Ok(()),
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
}

/// Drives a Ymodem batch transfer as the receiving side.
pub struct Receiver {
    variant: YmodemVariant,
}

impl Receiver {
    #[must_use]
    pub fn new(variant: YmodemVariant) -> Self {
        Self { variant }
    }

    /// Receives the whole batch, calling `open_file(&meta)` to obtain a
    /// writable local file for each announced file. Returns once the
    /// end-of-batch block 0 is seen.
    pub fn receive_batch(
        &mut self,
        stream: &mut dyn ByteStream,
        session: &Session,
        sink: &mut dyn ProgressSink,
        mut open_file: impl FnMut(&FileMeta) -> Result<Box<dyn LocalFile>>,
    ) -> Result<()> {
        session.set_state(SessionState::Transfer);
        loop {
            let meta = match self.receive_block0(stream, session)? {
                Some(meta) => meta,
                None => {
                    session.set_state(SessionState::End);
                    sink.on_status("batch complete");
                    return Ok(());
                }
            };
            sink.on_status(&format!("receiving {}", meta.name));
            let mut file = open_file(&meta)?;
            let flavor = self.variant.block_flavor();
            let mut body_receiver = XmodemReceiver::new(flavor);
            body_receiver.receive(stream, file.as_mut(), session, sink)?;
            if meta.size > 0 {
                file.truncate(meta.size)?;
            }
            session.set_state(SessionState::FileDone);
        }
    }

    fn receive_block0(
        &mut self,
        stream: &mut dyn ByteStream,
        session: &Session,
    ) -> Result<Option<FileMeta>> {
        stream.write_byte(crate::xmodem::control::CRC_NCG)?;
        loop {
            if session.cancel_requested() {
                session.set_state(SessionState::Abort);
                return Err(Error::CancelledByLocal);
            }
            let header = match stream.read_byte(self.variant.timeout())? {
                ReadOutcome::Byte(b) => b,
                ReadOutcome::Timeout => {
                    if session.record_error() {
                        session.set_state(SessionState::Abort);
                        return Err(Error::TooManyErrors(10));
                    }
                    stream.write_byte(crate::xmodem::control::CRC_NCG)?;
                    continue;
                }
                ReadOutcome::Eof => return Err(Error::UnexpectedEof),
                ReadOutcome::Cancelled => return Err(Error::ReadCancelled),
            };
            if header == CAN {
                session.set_state(SessionState::Abort);
                return Err(Error::CancelledByRemote("CAN byte"));
            }

            let frame = decode_body(header, CheckKind::Crc16, |buf| {
                for slot in buf.iter_mut() {
                    match stream.read_byte(self.variant.timeout())? {
                        ReadOutcome::Byte(b) => *slot = b,
                        ReadOutcome::Timeout => return Err(Error::Timeout),
                        ReadOutcome::Eof => return Err(Error::UnexpectedEof),
                        ReadOutcome::Cancelled => return Err(Error::ReadCancelled),
                    }
                }
                Ok(())
            });

            match frame {
                Ok(Frame::Block { data, .. }) => {
                    stream.write_byte(ACK)?;
                    let meta = decode_metadata(&data)?;
                    if meta.is_some() {
                        // Send the NCG byte that kicks off the file body.
                        stream.write_byte(crate::xmodem::control::CRC_NCG)?;
                    }
                    return Ok(meta);
                }
                Ok(Frame::Eot) => return Err(Error::Protocol("unexpected EOT before block-0")),
                Err(Error::FrameCheck) | Err(Error::Protocol(_)) => {
                    purge(stream);
                    stream.write_byte(NAK)?;
                    if session.record_error() {
                        session.set_state(SessionState::Abort);
                        return Err(Error::TooManyErrors(10));
                    }
                }
                Err(Error::Timeout) => {
                    if session.record_error() {
                        session.set_state(SessionState::Abort);
                        return Err(Error::TooManyErrors(10));
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_pick_expected_block_flavor() {
        assert_eq!(YmodemVariant::Standard.block_flavor(), Flavor::X1K);
        assert_eq!(YmodemVariant::Streaming.block_flavor(), Flavor::X1KG);
    }
}
