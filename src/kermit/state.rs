//! Kermit sender/receiver state machines: INIT, FILE_WAIT, DATA, COMPLETE
//! (`spec.md` §4.5 "Flow" and "Error taxonomy").

use super::packet::Packet;
use super::params::Params;
use super::PacketType;
use crate::error::{Error, Result};
use crate::io::{purge, ByteStream, LocalFile, ReadOutcome};
use crate::progress::ProgressSink;
use crate::session::{Session, SessionState};
use std::time::Duration;

const MAX_SCAN_FOR_MARK: usize = 4096;
const MAX_PACKET_WIRE_LEN: usize = 4096;

fn read_packet(stream: &mut dyn ByteStream, params: &Params, timeout: Duration) -> Result<Packet> {
    let mut scanned = 0usize;
    loop {
        match stream.read_byte(timeout)? {
            ReadOutcome::Byte(b) if b == crate::kermit::DEFAULT_MARK => break,
            ReadOutcome::Byte(_) => {
                scanned += 1;
                if scanned > MAX_SCAN_FOR_MARK {
                    return Err(Error::Protocol("no kermit MARK byte found"));
                }
            }
            ReadOutcome::Timeout => return Err(Error::Timeout),
            ReadOutcome::Eof => return Err(Error::UnexpectedEof),
            ReadOutcome::Cancelled => return Err(Error::ReadCancelled),
        }
    }

    let mut wire = vec![crate::kermit::DEFAULT_MARK];
    loop {
        match stream.read_byte(timeout)? {
            ReadOutcome::Byte(b) => {
                wire.push(b);
                if b == params.eol {
                    break;
                }
                if wire.len() > MAX_PACKET_WIRE_LEN {
                    return Err(Error::Protocol("kermit packet exceeded maximum wire length"));
                }
            }
            ReadOutcome::Timeout => return Err(Error::Timeout),
            ReadOutcome::Eof => return Err(Error::UnexpectedEof),
            ReadOutcome::Cancelled => return Err(Error::ReadCancelled),
        }
    }
    Packet::decode(&wire, params)
}

fn write_packet(stream: &mut dyn ByteStream, packet: &Packet, params: &Params) -> Result<()> {
    for _ in 0..params.npad {
        stream.write_byte(params.padc)?;
    }
    stream.write_all(&packet.encode(params))
}

fn timeout_of(params: &Params) -> Duration {
    Duration::from_secs(params.timeout_secs.max(1) as u64)
}

fn fail_on_too_many_errors(session: &Session) -> Result<()> {
    if session.record_error() {
        session.set_state(SessionState::Abort);
        return Err(Error::TooManyErrors(10));
    }
    Ok(())
}

/// Like [`fail_on_too_many_errors`], but also notifies the remote with an
/// `E` packet before giving up, per the error taxonomy in `spec.md` §4.5.
fn fail_with_notice(
    stream: &mut dyn ByteStream,
    params: &Params,
    seq: u8,
    session: &Session,
) -> Result<()> {
    if session.record_error() {
        session.set_state(SessionState::Abort);
        let _ = send_error(stream, params, seq, "too many retries");
        return Err(Error::TooManyErrors(10));
    }
    Ok(())
}

/// Sends one packet and waits for the matching ACK (`Y`) by sequence
/// number, resending on NAK or timeout and aborting on an `E` (error)
/// packet from the remote (`spec.md` §4.5 error taxonomy).
fn send_and_wait_ack(
    stream: &mut dyn ByteStream,
    params: &Params,
    session: &Session,
    packet: &Packet,
) -> Result<Packet> {
    loop {
        write_packet(stream, packet, params)?;
        match read_packet(stream, params, timeout_of(params)) {
            Ok(reply) if reply.ptype == PacketType::Ack && reply.seq == packet.seq => {
                session.clear_errors();
                return Ok(reply);
            }
            Ok(reply) if reply.ptype == PacketType::Error => {
                session.set_state(SessionState::Abort);
                return Err(Error::Protocol("remote sent a kermit error packet"));
            }
            Ok(_) => fail_with_notice(stream, params, packet.seq, session)?,
            Err(Error::Timeout) | Err(Error::FrameCheck) | Err(Error::Protocol(_)) => {
                purge(stream);
                fail_with_notice(stream, params, packet.seq, session)?;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Sends an `E` (error) packet and transitions the session to `Abort`.
fn send_error(stream: &mut dyn ByteStream, params: &Params, seq: u8, message: &str) -> Result<()> {
    let packet = Packet::new(seq, PacketType::Error, message.as_bytes().to_vec());
    write_packet(stream, &packet, params)
}

/// Drives a Kermit batch transfer as the sending side.
pub struct Sender {
    local: Params,
}

impl Sender {
    #[must_use]
    pub fn new() -> Self {
        Self { local: Params::default() }
    }

    pub fn send_batch(
        &mut self,
        stream: &mut dyn ByteStream,
        files: &mut [&mut dyn LocalFile],
        session: &Session,
        sink: &mut dyn ProgressSink,
    ) -> Result<()> {
        session.set_state(SessionState::Init);
        let init = Packet::new(0, PacketType::SendInit, self.local.encode());
        let reply = send_and_wait_ack(stream, &self.local, session, &init)?;
        let active = self.local.active(&Params::decode(&reply.data));
        sink.on_status("kermit negotiation complete");

        session.set_state(SessionState::Transfer);
        let mut seq: u8 = 1;
        for file in files.iter_mut() {
            self.send_one_file(stream, &active, *file, &mut seq, session, sink)?;
            session.set_state(SessionState::FileDone);
        }

        let brk = Packet::new(seq, PacketType::Break, Vec::new());
        send_and_wait_ack(stream, &active, session, &brk)?;
        session.set_state(SessionState::End);
        sink.on_status("kermit batch complete");
        Ok(())
    }

    fn send_one_file(
        &mut self,
        stream: &mut dyn ByteStream,
        active: &Params,
        file: &mut dyn LocalFile,
        seq: &mut u8,
        session: &Session,
        sink: &mut dyn ProgressSink,
    ) -> Result<()> {
        let header = Packet::new(*seq, PacketType::FileHeader, file.name().as_bytes().to_vec());
        send_and_wait_ack(stream, active, session, &header)?;
        *seq = seq.wrapping_add(1);

        if let Some(len) = file.len() {
            let attrs = Packet::new(*seq, PacketType::Attributes, format!("L1{len}").into_bytes());
            send_and_wait_ack(stream, active, session, &attrs)?;
            *seq = seq.wrapping_add(1);
        }

        let chunk_len = (active.maxl as usize).saturating_sub(10).max(16);
        let total = file.len();
        let mut sent: u64 = 0;
        loop {
            if session.cancel_requested() {
                send_error(stream, active, *seq, "cancelled locally")?;
                session.set_state(SessionState::Abort);
                return Err(Error::CancelledByLocal);
            }

            let mut buf = vec![0u8; chunk_len];
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            buf.truncate(n);
            let data = Packet::new(*seq, PacketType::Data, buf);
            send_and_wait_ack(stream, active, session, &data)?;
            sent += n as u64;
            sink.on_file_progress(file.name(), sent, total);
            *seq = seq.wrapping_add(1);
        }

        let eof = Packet::new(*seq, PacketType::Eof, Vec::new());
        send_and_wait_ack(stream, active, session, &eof)?;
        *seq = seq.wrapping_add(1);
        Ok(())
    }
}

impl Default for Sender {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives a Kermit batch transfer as the receiving side.
pub struct Receiver {
    local: Params,
}

impl Receiver {
    #[must_use]
    pub fn new() -> Self {
        Self { local: Params::default() }
    }

    pub fn receive_batch(
        &mut self,
        stream: &mut dyn ByteStream,
        session: &Session,
        sink: &mut dyn ProgressSink,
        mut open_file: impl FnMut(&str, Option<u64>) -> Result<Box<dyn LocalFile>>,
    ) -> Result<()> {
        session.set_state(SessionState::Init);
        let init = self.await_packet(stream, &self.local.clone(), session, PacketType::SendInit)?;
        let remote = Params::decode(&init.data);
        let active = self.local.active(&remote);
        let ack = Packet::new(init.seq, PacketType::Ack, self.local.encode());
        write_packet(stream, &ack, &active)?;
        sink.on_status("kermit negotiation complete");

        session.set_state(SessionState::Transfer);
        let mut expected_size: Option<u64> = None;
        loop {
            let packet = self.await_packet(stream, &active, session, PacketType::FileHeader)?;
            if packet.ptype == PacketType::Break {
                self.ack(stream, &active, packet.seq)?;
                session.set_state(SessionState::End);
                sink.on_status("kermit batch complete");
                return Ok(());
            }
            let name = String::from_utf8_lossy(&packet.data).into_owned();
            self.ack(stream, &active, packet.seq)?;

            let file = loop {
                let next = read_packet(stream, &active, timeout_of(&active));
                match next {
                    Ok(p) if p.ptype == PacketType::Attributes => {
                        expected_size = parse_length_attribute(&p.data);
                        self.ack(stream, &active, p.seq)?;
                    }
                    Ok(p) if p.ptype == PacketType::Data => {
                        let opened = open_file(&name, expected_size)?;
                        break (p, opened);
                    }
                    Ok(p) if p.ptype == PacketType::Error => {
                        session.set_state(SessionState::Abort);
                        return Err(Error::Protocol("remote sent a kermit error packet"));
                    }
                    Ok(_) => fail_on_too_many_errors(session)?,
                    Err(Error::Timeout) | Err(Error::FrameCheck) | Err(Error::Protocol(_)) => {
                        purge(stream);
                        fail_on_too_many_errors(session)?;
                    }
                    Err(e) => return Err(e),
                }
                continue;
            };
            let (first_data, mut handle) = file;
            sink.on_status(&format!("receiving {name}"));
            self.receive_file_body(stream, &active, handle.as_mut(), &name, first_data, expected_size, session, sink)?;
            expected_size = None;
            session.set_state(SessionState::FileDone);
        }
    }

    fn receive_file_body(
        &mut self,
        stream: &mut dyn ByteStream,
        active: &Params,
        file: &mut dyn LocalFile,
        name: &str,
        first_data: Packet,
        total: Option<u64>,
        session: &Session,
        sink: &mut dyn ProgressSink,
    ) -> Result<()> {
        let mut expected_seq = first_data.seq;
        let mut last_acked_seq: Option<u8> = None;
        let mut received: u64 = 0;
        let mut packet = first_data;
        loop {
            if session.cancel_requested() {
                send_error(stream, active, packet.seq, "cancelled locally")?;
                session.set_state(SessionState::Abort);
                return Err(Error::CancelledByLocal);
            }

            if Some(packet.seq) == last_acked_seq {
                self.ack(stream, active, packet.seq)?;
            } else if packet.seq == expected_seq {
                if packet.ptype == PacketType::Eof {
                    self.ack(stream, active, packet.seq)?;
                    session.clear_errors();
                    sink.on_file_progress(name, received, total);
                    return Ok(());
                }
                file.write_all(&packet.data)?;
                received += packet.data.len() as u64;
                sink.on_file_progress(name, received, total);
                self.ack(stream, active, packet.seq)?;
                last_acked_seq = Some(packet.seq);
                expected_seq = expected_seq.wrapping_add(1) & 0x3F;
                session.clear_errors();
            } else {
                fail_on_too_many_errors(session)?;
            }

            packet = match read_packet(stream, active, timeout_of(active)) {
                Ok(p) => p,
                Err(Error::Timeout) | Err(Error::FrameCheck) | Err(Error::Protocol(_)) => {
                    purge(stream);
                    fail_on_too_many_errors(session)?;
                    continue;
                }
                Err(e) => return Err(e),
            };
        }
    }

    fn await_packet(
        &self,
        stream: &mut dyn ByteStream,
        params: &Params,
        session: &Session,
        expected: PacketType,
    ) -> Result<Packet> {
        loop {
            match read_packet(stream, params, timeout_of(params)) {
                Ok(p) if p.ptype == expected || p.ptype == PacketType::Break => return Ok(p),
                Ok(_) => fail_on_too_many_errors(session)?,
                Err(Error::Timeout) | Err(Error::FrameCheck) | Err(Error::Protocol(_)) => {
                    purge(stream);
                    fail_on_too_many_errors(session)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn ack(&self, stream: &mut dyn ByteStream, params: &Params, seq: u8) -> Result<()> {
        let reply = Packet::new(seq, PacketType::Ack, Vec::new());
        write_packet(stream, &reply, params)
    }
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_length_attribute(data: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(data).ok()?;
    let field = text.strip_prefix("L1")?;
    field.trim().parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kermit::params::Params;

    #[test]
    fn parse_length_attribute_reads_l1_field() {
        assert_eq!(parse_length_attribute(b"L11024"), Some(1024));
        assert_eq!(parse_length_attribute(b"garbage"), None);
    }

    #[test]
    fn default_sender_and_receiver_construct() {
        let _s = Sender::default();
        let _r = Receiver::default();
        let _ = Params::default();
    }
}
