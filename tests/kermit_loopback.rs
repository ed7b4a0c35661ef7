//! End-to-end Kermit batch transfers over an in-process duplex pipe.

mod support;

use modemcore::kermit::state::{Receiver, Sender};
use modemcore::session::{Protocol, Role, Session};
use modemcore::NullSink;
use support::{ChannelStream, MemFile};

/// A `LocalFile` that records every write into a shared `Vec<u8>` so the
/// test can compare the bytes the driver actually wrote.
struct CapturingFile {
    name: String,
    data: Vec<u8>,
    cursor: usize,
    sink: std::sync::Arc<std::sync::Mutex<Vec<(String, Vec<u8>)>>>,
}

impl CapturingFile {
    fn new(name: String, sink: std::sync::Arc<std::sync::Mutex<Vec<(String, Vec<u8>)>>>) -> Self {
        Self { name, data: Vec::new(), cursor: 0, sink }
    }
}

impl Drop for CapturingFile {
    fn drop(&mut self) {
        self.sink.lock().unwrap().push((self.name.clone(), self.data.clone()));
    }
}

impl modemcore::io::LocalFile for CapturingFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, _buf: &mut [u8]) -> modemcore::Result<usize> {
        Ok(0)
    }

    fn write_all(&mut self, buf: &[u8]) -> modemcore::Result<()> {
        if self.cursor < self.data.len() {
            self.data.truncate(self.cursor);
        }
        self.data.extend_from_slice(buf);
        self.cursor = self.data.len();
        Ok(())
    }

    fn seek(&mut self, offset: u64) -> modemcore::Result<()> {
        self.cursor = offset as usize;
        Ok(())
    }

    fn len(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn mtime_millis(&self) -> Option<i64> {
        Some(0)
    }

    fn set_mtime_millis(&mut self, _millis: i64) -> modemcore::Result<()> {
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> modemcore::Result<()> {
        self.data.truncate(len as usize);
        Ok(())
    }

    fn delete(self: Box<Self>) -> modemcore::Result<()> {
        Ok(())
    }
}

fn run_batch_capturing(files: Vec<(&'static str, Vec<u8>)>) -> Vec<(String, Vec<u8>)> {
    use std::sync::{Arc, Mutex};

    let (mut tx_stream, mut rx_stream) = ChannelStream::pair();
    let files_for_sender = files.clone();

    let sender_thread = std::thread::spawn(move || {
        let session = Session::new(Protocol::Kermit, Role::Send);
        let mut owned: Vec<MemFile> = files_for_sender
            .into_iter()
            .map(|(name, data)| MemFile::new(name, data))
            .collect();
        let mut refs: Vec<&mut dyn modemcore::io::LocalFile> =
            owned.iter_mut().map(|f| f as &mut dyn modemcore::io::LocalFile).collect();
        let mut sender = Sender::new();
        sender
            .send_batch(&mut tx_stream, &mut refs, &session, &mut NullSink)
            .expect("sender side failed");
    });

    let captured: Arc<Mutex<Vec<(String, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
    let captured_for_closure = Arc::clone(&captured);

    let session = Session::new(Protocol::Kermit, Role::Receive);
    let mut receiver = Receiver::new();
    receiver
        .receive_batch(&mut rx_stream, &session, &mut NullSink, move |name, _size| {
            Ok(Box::new(CapturingFile::new(name.to_string(), Arc::clone(&captured_for_closure)))
                as Box<dyn modemcore::io::LocalFile>)
        })
        .expect("receiver side failed");

    sender_thread.join().expect("sender thread panicked");
    let guard = captured.lock().unwrap();
    guard.clone()
}

#[test]
fn batch_roundtrip_two_files() {
    let files = vec![
        ("one.txt", b"kermit says hello".to_vec()),
        ("two.bin", (0..500u32).map(|i| (i % 256) as u8).collect()),
    ];
    let received = run_batch_capturing(files.clone());
    assert_eq!(received.len(), 2);
    for ((expected_name, expected_data), (got_name, got_data)) in files.iter().zip(received.iter()) {
        assert_eq!(got_name, expected_name);
        assert_eq!(got_data, expected_data);
    }
}

#[test]
fn large_file_exercises_long_packets() {
    let files = vec![("long.bin", (0..3000u32).map(|i| (i * 3 % 256) as u8).collect())];
    let received = run_batch_capturing(files.clone());
    assert_eq!(received[0].1, files[0].1);
}

#[test]
fn empty_batch_ends_immediately() {
    let received = run_batch_capturing(Vec::new());
    assert!(received.is_empty());
}

