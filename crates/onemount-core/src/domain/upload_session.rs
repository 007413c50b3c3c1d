//! Upload session domain entity
//!
//! Tracks a single item's journey from dirty local content to an uploaded,
//! cloud-acknowledged version. Small files upload in one request; large
//! files use Graph's chunked resumable upload protocol and persist a
//! checkpoint after every chunk so an interrupted upload can resume (or be
//! abandoned cleanly) after a daemon restart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::ItemId;

/// Default chunk size for large-file uploads (10 MiB), matching the Graph
/// API's recommended resumable-upload chunk size.
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Relative priority of an upload within the manager's queue.
///
/// `Foreground` uploads (explicit user save / flush while the file is open)
/// always drain ahead of `Background` uploads (deferred writes, batched
/// offline-change replay).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadPriority {
    /// Queued behind all foreground work.
    Background,
    /// Drains before any background work.
    Foreground,
}

/// Current lifecycle state of an upload session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    /// Queued, not yet started.
    Pending,
    /// A session is open and chunks are being transferred.
    InProgress,
    /// The cloud acknowledged the full upload.
    Completed,
    /// The remote version changed concurrently (ETag mismatch); the caller
    /// must route this to conflict resolution rather than retry the upload.
    Conflicted,
    /// Failed after exhausting retries.
    Failed(String),
}

impl UploadState {
    /// Returns true if this session is no longer actionable by the upload
    /// manager (it has either succeeded, conflicted, or exhausted retries).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadState::Completed | UploadState::Conflicted | UploadState::Failed(_)
        )
    }
}

/// An in-flight or completed upload of one item's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSession {
    /// The item being uploaded.
    item_id: ItemId,
    /// Total size of the content being uploaded.
    total_size: u64,
    /// Bytes acknowledged by the cloud so far (the resume checkpoint).
    bytes_uploaded: u64,
    /// Chunk size in use for this session.
    chunk_size: u64,
    /// The resumable-upload URL returned by the cloud, once a session is
    /// opened. `None` for small, single-request uploads.
    upload_url: Option<String>,
    /// Scheduling priority.
    priority: UploadPriority,
    /// Number of attempts made so far (across retries, not chunks).
    attempts: u32,
    /// ETag the upload is conditioned on, to detect concurrent remote edits.
    if_match_etag: Option<String>,
    state: UploadState,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UploadSession {
    /// Starts a new pending upload session for `total_size` bytes of content.
    #[must_use]
    pub fn new(item_id: ItemId, total_size: u64, priority: UploadPriority) -> Self {
        let now = Utc::now();
        Self {
            item_id,
            total_size,
            bytes_uploaded: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            upload_url: None,
            priority,
            attempts: 0,
            if_match_etag: None,
            state: UploadState::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the ETag the upload must match, to detect concurrent edits.
    #[must_use]
    pub fn with_if_match(mut self, etag: impl Into<String>) -> Self {
        self.if_match_etag = Some(etag.into());
        self
    }

    // --- Getters ---

    /// Returns the item being uploaded.
    #[must_use]
    pub fn item_id(&self) -> &ItemId {
        &self.item_id
    }

    /// Returns the total content size.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Returns the number of bytes acknowledged by the cloud.
    #[must_use]
    pub fn bytes_uploaded(&self) -> u64 {
        self.bytes_uploaded
    }

    /// Returns the chunk size in use.
    #[must_use]
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Returns the resumable-upload URL, if a chunked session is open.
    #[must_use]
    pub fn upload_url(&self) -> Option<&str> {
        self.upload_url.as_deref()
    }

    /// Returns this session's priority.
    #[must_use]
    pub fn priority(&self) -> UploadPriority {
        self.priority
    }

    /// Returns the number of attempts made so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the conditional ETag, if any.
    #[must_use]
    pub fn if_match_etag(&self) -> Option<&str> {
        self.if_match_etag.as_deref()
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> &UploadState {
        &self.state
    }

    /// Returns the remaining bytes to upload.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.total_size.saturating_sub(self.bytes_uploaded)
    }

    /// Returns upload progress as a percentage, 0-100.
    #[must_use]
    pub fn progress_percent(&self) -> u8 {
        if self.total_size == 0 {
            return 100;
        }
        ((self.bytes_uploaded * 100) / self.total_size).min(100) as u8
    }

    /// Returns true if this session uses Graph's chunked protocol rather
    /// than a single-request small-file upload.
    #[must_use]
    pub fn is_chunked(&self) -> bool {
        self.total_size > self.chunk_size
    }

    // --- Mutators ---

    /// Opens a chunked session, recording the resumable-upload URL.
    pub fn open_session(&mut self, upload_url: impl Into<String>) {
        self.upload_url = Some(upload_url.into());
        self.state = UploadState::InProgress;
        self.touch();
    }

    /// Records a chunk checkpoint after the cloud acknowledges it.
    ///
    /// `bytes_uploaded` must be monotonically non-decreasing; callers should
    /// pass the cumulative total acknowledged by the cloud, not the size of
    /// the most recent chunk alone.
    pub fn checkpoint(&mut self, bytes_uploaded: u64) {
        self.bytes_uploaded = self.bytes_uploaded.max(bytes_uploaded);
        self.state = UploadState::InProgress;
        self.touch();
    }

    /// Records a failed attempt, incrementing the attempt counter.
    pub fn record_attempt_failure(&mut self, reason: impl Into<String>) {
        self.attempts += 1;
        self.state = UploadState::Failed(reason.into());
        self.touch();
    }

    /// Marks the session as successfully completed.
    pub fn complete(&mut self) {
        self.bytes_uploaded = self.total_size;
        self.state = UploadState::Completed;
        self.touch();
    }

    /// Marks the session as conflicted (remote changed concurrently).
    pub fn mark_conflicted(&mut self) {
        self.state = UploadState::Conflicted;
        self.touch();
    }

    /// Resets a failed session back to pending so it can be retried.
    pub fn reset_for_retry(&mut self) {
        if matches!(self.state, UploadState::Failed(_)) {
            self.state = UploadState::Pending;
            self.touch();
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_pending() {
        let session = UploadSession::new(ItemId::new_local(), 1024, UploadPriority::Foreground);
        assert_eq!(*session.state(), UploadState::Pending);
        assert_eq!(session.remaining(), 1024);
        assert!(!session.is_chunked());
    }

    #[test]
    fn test_large_file_is_chunked() {
        let session = UploadSession::new(
            ItemId::new_local(),
            DEFAULT_CHUNK_SIZE * 3,
            UploadPriority::Background,
        );
        assert!(session.is_chunked());
    }

    #[test]
    fn test_checkpoint_progress() {
        let mut session =
            UploadSession::new(ItemId::new_local(), DEFAULT_CHUNK_SIZE * 2, UploadPriority::Background);
        session.open_session("https://upload.example/session/1");
        session.checkpoint(DEFAULT_CHUNK_SIZE);
        assert_eq!(session.bytes_uploaded(), DEFAULT_CHUNK_SIZE);
        assert_eq!(session.remaining(), DEFAULT_CHUNK_SIZE);
        assert_eq!(*session.state(), UploadState::InProgress);
    }

    #[test]
    fn test_checkpoint_is_monotonic() {
        let mut session =
            UploadSession::new(ItemId::new_local(), DEFAULT_CHUNK_SIZE * 2, UploadPriority::Background);
        session.checkpoint(DEFAULT_CHUNK_SIZE);
        session.checkpoint(DEFAULT_CHUNK_SIZE / 2);
        assert_eq!(session.bytes_uploaded(), DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_complete_sets_full_size() {
        let mut session = UploadSession::new(ItemId::new_local(), 2048, UploadPriority::Foreground);
        session.complete();
        assert_eq!(session.bytes_uploaded(), 2048);
        assert!(session.state().is_terminal());
    }

    #[test]
    fn test_failure_then_retry_reset() {
        let mut session = UploadSession::new(ItemId::new_local(), 2048, UploadPriority::Foreground);
        session.record_attempt_failure("network timeout");
        assert_eq!(session.attempts(), 1);
        assert!(session.state().is_terminal());
        session.reset_for_retry();
        assert_eq!(*session.state(), UploadState::Pending);
    }

    #[test]
    fn test_conflicted_is_terminal() {
        let mut session = UploadSession::new(ItemId::new_local(), 2048, UploadPriority::Foreground);
        session.mark_conflicted();
        assert!(session.state().is_terminal());
    }

    #[test]
    fn test_serde_roundtrip() {
        let session = UploadSession::new(ItemId::new_local(), 2048, UploadPriority::Foreground)
            .with_if_match("etag-1");
        let json = serde_json::to_string(&session).unwrap();
        let parsed: UploadSession = serde_json::from_str(&json).unwrap();
        assert_eq!(session, parsed);
    }
}
