//! UI/progress sink seam. `spec.md` §1 treats the UI as an external
//! collaborator reachable through a narrow interface; this trait is that
//! interface, with a no-op default implementation for headless use and
//! tests.

/// Narrow callback surface a driver uses to report status, without
/// depending on any particular UI toolkit.
pub trait ProgressSink {
    /// A short human-readable status string changed (e.g. "receiving
    /// block 42").
    fn on_status(&mut self, _status: &str) {}

    /// An informational message worth surfacing to the user.
    fn on_info(&mut self, _message: &str) {}

    /// An error message worth surfacing to the user (does not imply the
    /// session aborted).
    fn on_error(&mut self, _message: &str) {}

    /// Per-file progress: `(bytes_transferred, total_bytes)`. `total_bytes`
    /// is `None` when the size is unknown.
    fn on_file_progress(&mut self, _file_name: &str, _bytes_transferred: u64, _total_bytes: Option<u64>) {}

    /// Per-session progress across all files transferred so far.
    fn on_session_progress(&mut self, _files_done: usize, _files_total: usize) {}
}

/// A [`ProgressSink`] that discards everything. The default for drivers
/// constructed without an explicit sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {}
