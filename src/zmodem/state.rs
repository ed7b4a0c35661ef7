//! Top-level sender/receiver state machines driving the ZRQINIT/ZRINIT/
//! ZSINIT/ZFILE/ZDATA/ZEOF/ZFIN handshake (`spec.md` §4.6 "Flow").

use super::header::{skip_to_zdle, skip_to_zdle_watched, Encoding, Frame, Header};
use super::subpacket::{read_subpacket, write_subpacket, Terminator};
use super::{Zrinit, SUPPORTED_CAPABILITIES};
use crate::error::{Error, Result};
use crate::io::{purge, ByteStream, CtrlXCounter, LocalFile};
use crate::progress::ProgressSink;
use crate::session::{Session, SessionState};

const SUBPACKETS_PER_ACK: usize = 10;
const CHUNK_LEN: usize = 1024;

/// Metadata carried in a `ZFILE` frame's subpacket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub name: String,
    pub size: Option<u64>,
}

fn encode_zfile_payload(meta: &FileMeta) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(meta.name.as_bytes());
    payload.push(0);
    if let Some(size) = meta.size {
        payload.extend_from_slice(size.to_string().as_bytes());
    }
    payload.push(0);
    payload
}

fn decode_zfile_payload(payload: &[u8]) -> Result<FileMeta> {
    let text = std::str::from_utf8(payload).map_err(|_| Error::Encoding("non-UTF8 zmodem filename"))?;
    let mut fields = text.split('\0');
    let name = fields
        .next()
        .filter(|s| !s.is_empty())
        .ok_or(Error::Protocol("zmodem ZFILE missing filename"))?
        .to_string();
    let size = fields
        .next()
        .and_then(|f| f.split_ascii_whitespace().next())
        .and_then(|f| f.parse::<u64>().ok());
    Ok(FileMeta { name, size })
}

fn read_frame(stream: &mut dyn ByteStream) -> Result<Header> {
    skip_to_zdle(stream)?;
    Header::read(stream)
}

fn read_frame_watched(stream: &mut dyn ByteStream, counter: &mut CtrlXCounter) -> Result<Header> {
    skip_to_zdle_watched(stream, counter)?;
    Header::read(stream)
}

/// Sends the 5-consecutive-Ctrl-X session abort sequence, then marks the
/// session aborted locally.
fn send_cancel(stream: &mut dyn ByteStream, session: &Session) -> Result<()> {
    for _ in 0..5 {
        stream.write_byte(crate::io::CAN)?;
    }
    session.set_state(SessionState::Abort);
    Ok(())
}

/// Drives a Zmodem batch transfer as the sending side.
pub struct Sender {
    encoding: Encoding,
}

impl Sender {
    #[must_use]
    pub fn new() -> Self {
        Self { encoding: Encoding::ZBin32 }
    }

    pub fn send_batch(
        &mut self,
        stream: &mut dyn ByteStream,
        files: &mut [&mut dyn LocalFile],
        session: &Session,
        sink: &mut dyn ProgressSink,
    ) -> Result<()> {
        session.set_state(SessionState::Init);
        let remote_caps = self.negotiate(stream, session)?;
        self.encoding = if remote_caps.contains(Zrinit::CANFC32) {
            Encoding::ZBin32
        } else {
            Encoding::ZBin
        };
        sink.on_status("zmodem negotiation complete");

        session.set_state(SessionState::Transfer);
        for file in files.iter_mut() {
            self.send_one_file(stream, *file, session, sink)?;
            session.set_state(SessionState::FileDone);
        }

        self.finish(stream, session)?;
        session.set_state(SessionState::End);
        sink.on_status("zmodem batch complete");
        Ok(())
    }

    fn negotiate(&mut self, stream: &mut dyn ByteStream, session: &Session) -> Result<Zrinit> {
        loop {
            if session.cancel_requested() {
                send_cancel(stream, session)?;
                return Err(Error::CancelledByLocal);
            }
            Header::new(Encoding::ZHex, Frame::ZRqinit, [0; 4]).write(stream)?;
            match read_frame(stream) {
                Ok(header) if header.frame == Frame::ZRinit => {
                    return Ok(Zrinit::from_bits_truncate(header.flags[3]));
                }
                Ok(header) if header.frame == Frame::ZCan => {
                    session.set_state(SessionState::Abort);
                    return Err(Error::CancelledByRemote("ZCAN"));
                }
                _ => {
                    purge(stream);
                    if session.record_error() {
                        session.set_state(SessionState::Abort);
                        return Err(Error::TooManyErrors(10));
                    }
                }
            }
        }
    }

    fn send_one_file(
        &mut self,
        stream: &mut dyn ByteStream,
        file: &mut dyn LocalFile,
        session: &Session,
        sink: &mut dyn ProgressSink,
    ) -> Result<()> {
        let meta = FileMeta { name: file.name().to_string(), size: file.len() };
        let payload = encode_zfile_payload(&meta);

        let start_offset = loop {
            Header::new(self.encoding, Frame::ZFile, [0; 4]).write(stream)?;
            write_subpacket(stream, self.encoding, Terminator::Crcw, &payload)?;
            match read_frame(stream) {
                Ok(header) if header.frame == Frame::ZRpos => break header.position(),
                Ok(header) if header.frame == Frame::ZSkip => {
                    sink.on_status(&format!("remote skipped {}", meta.name));
                    return Ok(());
                }
                Ok(header) if header.frame == Frame::ZCan => {
                    session.set_state(SessionState::Abort);
                    return Err(Error::CancelledByRemote("ZCAN"));
                }
                _ => {
                    purge(stream);
                    if session.record_error() {
                        session.set_state(SessionState::Abort);
                        return Err(Error::TooManyErrors(10));
                    }
                }
            }
        };

        file.seek(start_offset as u64)?;
        let mut offset = start_offset;
        Header::with_position(self.encoding, Frame::ZData, offset).write(stream)?;

        let mut sent_since_ack = 0usize;
        loop {
            if session.cancel_requested() {
                send_cancel(stream, session)?;
                return Err(Error::CancelledByLocal);
            }
            let mut buf = vec![0u8; CHUNK_LEN];
            let n = file.read(&mut buf)?;
            buf.truncate(n);
            if n == 0 {
                let term = Terminator::Crcw;
                write_subpacket(stream, self.encoding, term, &[])?;
                self.wait_ack(stream, session, offset)?;
                break;
            }

            sent_since_ack += 1;
            let term = if sent_since_ack >= SUBPACKETS_PER_ACK {
                sent_since_ack = 0;
                Terminator::Crcw
            } else {
                Terminator::Crcg
            };
            write_subpacket(stream, self.encoding, term, &buf)?;
            offset += n as u32;
            sink.on_file_progress(file.name(), offset as u64, meta.size);

            if term.wants_ack() {
                self.wait_ack(stream, session, offset)?;
            }
        }

        loop {
            Header::with_position(self.encoding, Frame::ZEof, offset).write(stream)?;
            match read_frame(stream) {
                Ok(header) if header.frame == Frame::ZRinit => return Ok(()),
                Ok(header) if header.frame == Frame::ZRpos => {
                    file.seek(header.position() as u64)?;
                    offset = header.position();
                    Header::with_position(self.encoding, Frame::ZData, offset).write(stream)?;
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

    fn wait_ack(&self, stream: &mut dyn ByteStream, session: &Session, _offset: u32) -> Result<()> {
        match read_frame(stream) {
            Ok(header) if header.frame == Frame::ZAck || header.frame == Frame::ZRpos => Ok(()),
            Ok(header) if header.frame == Frame::ZCan => {
                session.set_state(SessionState::Abort);
                Err(Error::CancelledByRemote("ZCAN"))
            }
            _ => {
                if session.record_error() {
                    session.set_state(SessionState::Abort);
                    return Err(Error::TooManyErrors(10));
                }
                Ok(())
            }
        }
    }

    fn finish(&mut self, stream: &mut dyn ByteStream, session: &Session) -> Result<()> {
        loop {
            if session.cancel_requested() {
                send_cancel(stream, session)?;
                return Err(Error::CancelledByLocal);
            }
            Header::new(Encoding::ZHex, Frame::ZFin, [0; 4]).write(stream)?;
            match read_frame(stream) {
                Ok(header) if header.frame == Frame::ZFin => {
                    stream.write_byte(b'O')?;
                    stream.write_byte(b'O')?;
                    return Ok(());
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

/// Drives a Zmodem batch transfer as the receiving side.
pub struct Receiver {
    ctrl_x: CtrlXCounter,
}

impl Receiver {
    #[must_use]
    pub fn new() -> Self {
        Self { ctrl_x: CtrlXCounter::default() }
    }

    /// `open_file` is given the announced metadata and must return both a
    /// writable file and the byte offset already present locally (0 for a
    /// fresh file); this crate always resumes from the current file length,
    /// never from an out-of-band crash-recovery CRC (`DESIGN.md` Open
    /// Question resolution).
    pub fn receive_batch(
        &mut self,
        stream: &mut dyn ByteStream,
        session: &Session,
        sink: &mut dyn ProgressSink,
        mut open_file: impl FnMut(&FileMeta) -> Result<(Box<dyn LocalFile>, u64)>,
    ) -> Result<()> {
        session.set_state(SessionState::Init);
        self.announce(stream)?;

        session.set_state(SessionState::Transfer);
        loop {
            if session.cancel_requested() {
                send_cancel(stream, session)?;
                return Err(Error::CancelledByLocal);
            }
            let header = match read_frame_watched(stream, &mut self.ctrl_x) {
                Ok(h) => h,
                Err(Error::Timeout) => {
                    self.announce(stream)?;
                    continue;
                }
                Err(Error::FrameCheck) | Err(Error::Protocol(_)) => {
                    purge(stream);
                    Header::new(Encoding::ZHex, Frame::ZNak, [0; 4]).write(stream)?;
                    if session.record_error() {
                        session.set_state(SessionState::Abort);
                        return Err(Error::TooManyErrors(10));
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            match header.frame {
                Frame::ZFile => {
                    let (payload, _term) = read_subpacket(stream, header.encoding)?;
                    let meta = decode_zfile_payload(&payload)?;
                    sink.on_status(&format!("receiving {}", meta.name));
                    let (mut file, resume_at) = open_file(&meta)?;
                    Header::with_position(header.encoding, Frame::ZRpos, resume_at as u32).write(stream)?;
                    self.receive_file_body(stream, header.encoding, file.as_mut(), &meta, resume_at, session, sink)?;
                    session.set_state(SessionState::FileDone);
                }
                Frame::ZFin => {
                    Header::new(Encoding::ZHex, Frame::ZFin, [0; 4]).write(stream)?;
                    session.set_state(SessionState::End);
                    sink.on_status("zmodem batch complete");
                    return Ok(());
                }
                Frame::ZCan => {
                    session.set_state(SessionState::Abort);
                    return Err(Error::CancelledByRemote("ZCAN"));
                }
                _ => {
                    // Stray/duplicate header outside the expected flow: ignore and
                    // keep waiting, matching real Zmodem's tolerance for retransmits.
                }
            }
        }
    }

    fn receive_file_body(
        &mut self,
        stream: &mut dyn ByteStream,
        encoding: Encoding,
        file: &mut dyn LocalFile,
        meta: &FileMeta,
        resume_at: u64,
        session: &Session,
        sink: &mut dyn ProgressSink,
    ) -> Result<()> {
        let mut offset = resume_at as u32;
        loop {
            if session.cancel_requested() {
                send_cancel(stream, session)?;
                return Err(Error::CancelledByLocal);
            }
            let header = match read_frame_watched(stream, &mut self.ctrl_x) {
                Ok(h) => h,
                Err(Error::Timeout) | Err(Error::FrameCheck) | Err(Error::Protocol(_)) => {
                    purge(stream);
                    Header::with_position(encoding, Frame::ZRpos, offset).write(stream)?;
                    if session.record_error() {
                        session.set_state(SessionState::Abort);
                        return Err(Error::TooManyErrors(10));
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            match header.frame {
                Frame::ZData => {
                    if header.position() != offset {
                        Header::with_position(encoding, Frame::ZRpos, offset).write(stream)?;
                        continue;
                    }
                    self.drain_subpackets(stream, encoding, file, meta, &mut offset, session, sink)?;
                }
                Frame::ZEof => {
                    if header.position() == offset {
                        Header::new(Encoding::ZHex, Frame::ZRinit, [0, 0, 0, SUPPORTED_CAPABILITIES.bits()])
                            .write(stream)?;
                        return Ok(());
                    }
                    Header::with_position(encoding, Frame::ZRpos, offset).write(stream)?;
                }
                Frame::ZCan => {
                    session.set_state(SessionState::Abort);
                    return Err(Error::CancelledByRemote("ZCAN"));
                }
                _ => {}
            }
        }
    }

    fn drain_subpackets(
        &mut self,
        stream: &mut dyn ByteStream,
        encoding: Encoding,
        file: &mut dyn LocalFile,
        meta: &FileMeta,
        offset: &mut u32,
        session: &Session,
        sink: &mut dyn ProgressSink,
    ) -> Result<()> {
        loop {
            match read_subpacket(stream, encoding) {
                Ok((data, term)) => {
                    file.write_all(&data)?;
                    *offset += data.len() as u32;
                    sink.on_file_progress(&meta.name, *offset as u64, meta.size);
                    session.clear_errors();
                    if term.wants_ack() {
                        Header::with_position(encoding, Frame::ZAck, *offset).write(stream)?;
                    }
                    if term.ends_frame() {
                        return Ok(());
                    }
                }
                Err(Error::SubpacketCheck { .. }) => {
                    purge(stream);
                    Header::with_position(encoding, Frame::ZRpos, *offset).write(stream)?;
                    if session.record_error() {
                        session.set_state(SessionState::Abort);
                        return Err(Error::TooManyErrors(10));
                    }
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn announce(&self, stream: &mut dyn ByteStream) -> Result<()> {
        Header::new(
            Encoding::ZHex,
            Frame::ZRinit,
            [0, 0, 0, SUPPORTED_CAPABILITIES.bits()],
        )
        .write(stream)
    }
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new()
    }
}
