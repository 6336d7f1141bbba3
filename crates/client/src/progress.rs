//! Upload progress reporting.

/// Session status carried on every progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    /// Session constructed, initialization not yet acknowledged.
    Starting,
    /// At least one chunk acknowledged, more to send.
    Uploading,
    /// All bytes durably received by the server.
    Completed,
    /// Terminal failure; see `error`.
    Failed,
}

/// Snapshot of an upload's progress.
///
/// Events are emitted in causal order: exactly one `Starting`, zero or more
/// `Uploading` with non-decreasing `bytes_sent`, then one terminal
/// `Completed` or `Failed`.
#[derive(Debug, Clone)]
pub struct UploadProgress {
    pub status: UploadStatus,
    /// Bytes the server has acknowledged so far.
    pub bytes_sent: u64,
    /// Set on `Failed`.
    pub error: Option<String>,
}

impl UploadProgress {
    pub(crate) fn starting() -> Self {
        Self {
            status: UploadStatus::Starting,
            bytes_sent: 0,
            error: None,
        }
    }
}

/// Callback invoked with each progress event.
pub type ProgressCallback = Box<dyn Fn(UploadProgress) + Send + Sync>;

/// Callback handed the raw 2xx response body before `Completed` is emitted.
pub(crate) type ResponseCallback =
    Box<dyn Fn(&[u8]) -> Result<(), crate::error::UploadError> + Send + Sync>;
