//! Shared session model (component: data model in `spec.md` §3).
//!
//! A [`Session`] is created by the sender or receiver driver, owns its file
//! records, and ends once its state reaches [`SessionState::End`] or
//! [`SessionState::Abort`]. Foreign-task entry points (`cancel`, `skip`)
//! take the session-wide lock described in `spec.md` §5/§9 before touching
//! `state`, `cancel_flag`, `skip_flag` or the error counter; the driver
//! reads those same fields through the lock (or the `Handle` wrapper around
//! it) rather than storing unsynchronized copies.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Protocol family a session is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Xmodem,
    Ymodem,
    Kermit,
    Zmodem,
}

/// Which side of the transfer this session drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Send,
    Receive,
}

/// Overall session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Transfer,
    FileDone,
    End,
    Abort,
}

/// Tri-state cancel/skip flag: `Running` (0), `CancelKeepPartial` (1),
/// `CancelDeletePartial` (2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancelState {
    #[default]
    Running,
    KeepPartial,
    DeletePartial,
}

/// Kermit access-mode intent for an incoming file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    #[default]
    New,
    Supersede,
    Warn,
    Append,
}

/// Per-file bookkeeping. The local file handle itself is owned by the
/// driver, not stored here, so the record stays `Send`-friendly and cheap
/// to snapshot for a progress sink.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub local_name: String,
    pub remote_name: String,
    pub total_bytes: i64,
    pub bytes_transferred: u64,
    pub total_blocks: u32,
    pub blocks_transferred: u32,
    pub block_size: u32,
    pub mtime_millis: i64,
    pub start: Option<SystemTime>,
    pub end: Option<SystemTime>,
    pub permissions: Option<u32>,
    pub access_mode: AccessMode,
}

impl FileRecord {
    #[must_use]
    pub fn new(remote_name: impl Into<String>, total_bytes: i64) -> Self {
        Self {
            local_name: String::new(),
            remote_name: remote_name.into(),
            total_bytes,
            bytes_transferred: 0,
            total_blocks: 0,
            blocks_transferred: 0,
            block_size: 0,
            mtime_millis: -1,
            start: None,
            end: None,
            permissions: None,
            access_mode: AccessMode::New,
        }
    }

    /// Records that `n` more bytes have been transferred for this file.
    /// Panics in debug builds if this would exceed `total_bytes` for a
    /// known-size, non-append transfer (the invariant from `spec.md` §3).
    pub fn add_bytes(&mut self, n: u64) {
        self.bytes_transferred += n;
        debug_assert!(
            self.total_bytes < 0
                || self.access_mode == AccessMode::Append
                || self.bytes_transferred <= self.total_bytes as u64,
            "bytes transferred exceeded the advertised file size"
        );
    }
}

/// Current time as unix milliseconds, for stamping [`FileRecord::mtime_millis`].
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as i64
}

/// Aggregate counters across the whole session.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    pub bytes_transferred: u64,
    pub bytes_total: u64,
    pub blocks_transferred: u64,
    pub blocks_total: u64,
}

struct Inner {
    state: SessionState,
    cancel: CancelState,
    skip: CancelState,
    error_count: u32,
    status: String,
    log: Vec<String>,
}

/// A running transfer: protocol id, role, file records, counters, and the
/// mutable tuple `(state, cancel_flag, skip_flag, error_count)` behind a
/// single lock so a foreign task can `cancel()`/`skip()` safely.
pub struct Session {
    pub protocol: Protocol,
    pub role: Role,
    pub files: Vec<FileRecord>,
    pub current_file: usize,
    pub counters: Counters,
    pub seq: u32,
    inner: Arc<Mutex<Inner>>,
}

/// Maximum consecutive protocol errors before a session aborts (`spec.md`
/// §3/§5/§7).
pub const MAX_CONSECUTIVE_ERRORS: u32 = 10;

impl Session {
    #[must_use]
    pub fn new(protocol: Protocol, role: Role) -> Self {
        Self {
            protocol,
            role,
            files: Vec::new(),
            current_file: 0,
            counters: Counters::default(),
            seq: 0,
            inner: Arc::new(Mutex::new(Inner {
                state: SessionState::Init,
                cancel: CancelState::Running,
                skip: CancelState::Running,
                error_count: 0,
                status: String::new(),
                log: Vec::new(),
            })),
        }
    }

    /// A cloneable handle foreign tasks can use to call [`Session::cancel`]
    /// without owning the driver-side `Session`.
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn set_state(&self, state: SessionState) {
        tracing::debug!(protocol = ?self.protocol, ?state, "session state transition");
        self.lock().state = state;
    }

    #[must_use]
    pub fn cancel_state(&self) -> CancelState {
        self.lock().cancel
    }

    /// Whether a foreign task has requested cancellation via
    /// [`SessionHandle::cancel`] since the last check. Protocol drivers
    /// poll this at their main per-block/per-packet checkpoint.
    #[must_use]
    pub fn cancel_requested(&self) -> bool {
        !matches!(self.cancel_state(), CancelState::Running)
    }

    #[must_use]
    pub fn skip_state(&self) -> CancelState {
        self.lock().skip
    }

    pub fn clear_skip(&self) {
        self.lock().skip = CancelState::Running;
    }

    /// Marks the session for cancellation; the driver observes this at its
    /// next checkpoint and emits the protocol-specific abort frame. Safe to
    /// call from a foreign task.
    pub fn cancel(&self, keep_partial: bool) {
        tracing::info!(keep_partial, "local cancel requested");
        let mut inner = self.lock();
        inner.cancel = if keep_partial {
            CancelState::KeepPartial
        } else {
            CancelState::DeletePartial
        };
    }

    /// Requests that the current file be skipped, tri-state like `cancel`.
    pub fn skip(&self, keep_partial: bool) {
        let mut inner = self.lock();
        inner.skip = if keep_partial {
            CancelState::KeepPartial
        } else {
            CancelState::DeletePartial
        };
    }

    /// Increments the consecutive-error counter and returns
    /// `Err(MAX_CONSECUTIVE_ERRORS)`'s worth of `true` once the cap is hit.
    #[must_use]
    pub fn record_error(&self) -> bool {
        let mut inner = self.lock();
        inner.error_count += 1;
        tracing::warn!(protocol = ?self.protocol, count = inner.error_count, "consecutive protocol error");
        inner.error_count >= MAX_CONSECUTIVE_ERRORS
    }

    /// Resets the consecutive-error counter (called on any successfully
    /// validated frame).
    pub fn clear_errors(&self) {
        self.lock().error_count = 0;
    }

    #[must_use]
    pub fn error_count(&self) -> u32 {
        self.lock().error_count
    }

    pub fn set_status(&self, status: impl Into<String>) {
        self.lock().status = status.into();
    }

    #[must_use]
    pub fn status(&self) -> String {
        self.lock().status.clone()
    }

    pub fn log_info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(protocol = ?self.protocol, "{message}");
        self.lock().log.push(message);
    }

    #[must_use]
    pub fn log(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    #[must_use]
    pub fn current_file_mut(&mut self) -> Option<&mut FileRecord> {
        self.files.get_mut(self.current_file)
    }
}

/// Cloneable, `Send + Sync` handle to a [`Session`]'s shared lock, for use
/// by a foreign task (UI thread, signal handler, ...) that needs to cancel
/// or skip a running transfer without owning the driver.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<Mutex<Inner>>,
}

impl SessionHandle {
    pub fn cancel(&self, keep_partial: bool) {
        tracing::info!(keep_partial, "cancel requested via session handle");
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.cancel = if keep_partial {
            CancelState::KeepPartial
        } else {
            CancelState::DeletePartial
        };
    }

    pub fn skip(&self, keep_partial: bool) {
        tracing::info!(keep_partial, "skip requested via session handle");
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.skip = if keep_partial {
            CancelState::KeepPartial
        } else {
            CancelState::DeletePartial
        };
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner).state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_from_handle_is_visible_to_session() {
        let session = Session::new(Protocol::Zmodem, Role::Receive);
        let handle = session.handle();
        assert_eq!(session.cancel_state(), CancelState::Running);
        handle.cancel(true);
        assert_eq!(session.cancel_state(), CancelState::KeepPartial);
    }

    #[test]
    fn error_counter_caps_at_ten() {
        let session = Session::new(Protocol::Xmodem, Role::Send);
        for i in 1..MAX_CONSECUTIVE_ERRORS {
            assert!(!session.record_error(), "tripped early at {i}");
        }
        assert!(session.record_error());
        assert_eq!(session.error_count(), MAX_CONSECUTIVE_ERRORS);
    }

    #[test]
    fn clear_errors_resets_counter() {
        let session = Session::new(Protocol::Xmodem, Role::Send);
        session.record_error();
        session.record_error();
        session.clear_errors();
        assert_eq!(session.error_count(), 0);
    }

    #[test]
    fn file_record_tracks_progress() {
        let mut record = FileRecord::new("a.txt", 13);
        record.add_bytes(13);
        assert_eq!(record.bytes_transferred, 13);
    }

    #[test]
    fn abort_state_is_terminal_like_end() {
        let session = Session::new(Protocol::Kermit, Role::Receive);
        session.set_state(SessionState::Abort);
        assert_eq!(session.state(), SessionState::Abort);
    }
}
