//! Shared in-memory `ByteStream`/`LocalFile` test doubles for the
//! loopback integration tests.

#![allow(dead_code)]

use modemcore::error::{Error, Result};
use modemcore::io::{ByteStream, ReadOutcome};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// One end of an in-process duplex byte pipe.
pub struct ChannelStream {
    tx: Sender<u8>,
    rx: Receiver<u8>,
}

impl ChannelStream {
    /// Builds a connected pair: writes to `.0` arrive as reads on `.1`
    /// and vice versa.
    pub fn pair() -> (ChannelStream, ChannelStream) {
        let (tx_a, rx_a) = mpsc::channel();
        let (tx_b, rx_b) = mpsc::channel();
        (
            ChannelStream { tx: tx_a, rx: rx_b },
            ChannelStream { tx: tx_b, rx: rx_a },
        )
    }
}

impl ByteStream for ChannelStream {
    fn read_byte(&mut self, timeout: Duration) -> Result<ReadOutcome> {
        match self.rx.recv_timeout(timeout) {
            Ok(byte) => Ok(ReadOutcome::Byte(byte)),
            Err(RecvTimeoutError::Timeout) => Ok(ReadOutcome::Timeout),
            Err(RecvTimeoutError::Disconnected) => Ok(ReadOutcome::Eof),
        }
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<ReadOutcome> {
        match self.read_byte(timeout)? {
            ReadOutcome::Byte(b) => {
                buf[0] = b;
                Ok(ReadOutcome::Byte(b))
            }
            other => Ok(other),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        for &byte in buf {
            self.tx
                .send(byte)
                .map_err(|_| Error::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer dropped")))?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn cancel_pending_read(&self) {}
}

/// An in-memory file: a growable byte buffer with a read/write cursor,
/// standing in for a real filesystem entry in tests.
pub struct MemFile {
    name: String,
    data: Vec<u8>,
    cursor: usize,
    mtime_millis: Option<i64>,
}

impl MemFile {
    pub fn new(name: &str, data: Vec<u8>) -> Self {
        Self { name: name.to_string(), data, cursor: 0, mtime_millis: Some(0) }
    }

    pub fn empty(name: &str) -> Self {
        Self::new(name, Vec::new())
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl modemcore::io::LocalFile for MemFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = &self.data[self.cursor.min(self.data.len())..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.cursor += n;
        Ok(n)
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        if self.cursor < self.data.len() {
            self.data.truncate(self.cursor);
        }
        self.data.extend_from_slice(buf);
        self.cursor = self.data.len();
        Ok(())
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.cursor = offset as usize;
        Ok(())
    }

    fn len(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn mtime_millis(&self) -> Option<i64> {
        self.mtime_millis
    }

    fn set_mtime_millis(&mut self, millis: i64) -> Result<()> {
        self.mtime_millis = Some(millis);
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> Result<()> {
        self.data.truncate(len as usize);
        Ok(())
    }

    fn delete(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
