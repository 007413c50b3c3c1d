//! Download request domain entity
//!
//! Represents one item's journey from "metadata known, content absent or
//! stale" to fully hydrated on disk. The download manager schedules these by
//! priority (an open `read`/`getattr` call always outranks a background
//! prefetch) and tracks progress so the status tracker can report a
//! percentage to the user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{FileHash, RemoteId};

/// Relative priority of a download within the hydration queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadPriority {
    /// Speculative prefetch of a directory's likely-next-opened children.
    Prefetch,
    /// Requested by a background process (e.g. dehydration policy re-read).
    Background,
    /// A blocking FUSE `read`/`open` is waiting on this content right now.
    Foreground,
}

/// Current lifecycle state of a download request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    /// Queued, not yet started.
    Pending,
    /// Actively streaming content into the content store.
    InProgress,
    /// Content fully written and checksum-verified.
    Completed,
    /// Failed after exhausting retries.
    Failed(String),
    /// Cancelled before completion (e.g. the file was deleted mid-download).
    Cancelled,
}

impl DownloadState {
    /// Returns true if this request will not be retried or progressed
    /// further by the download manager.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadState::Completed | DownloadState::Failed(_) | DownloadState::Cancelled
        )
    }
}

/// A request to hydrate one item's content from the cloud.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRequest {
    remote_id: RemoteId,
    expected_size: u64,
    expected_hash: Option<FileHash>,
    priority: DownloadPriority,
    bytes_received: u64,
    attempts: u32,
    state: DownloadState,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DownloadRequest {
    /// Creates a new pending download request.
    #[must_use]
    pub fn new(
        remote_id: RemoteId,
        expected_size: u64,
        expected_hash: Option<FileHash>,
        priority: DownloadPriority,
    ) -> Self {
        let now = Utc::now();
        Self {
            remote_id,
            expected_size,
            expected_hash,
            priority,
            bytes_received: 0,
            attempts: 0,
            state: DownloadState::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    // --- Getters ---

    /// Returns the remote id of the item being downloaded.
    #[must_use]
    pub fn remote_id(&self) -> &RemoteId {
        &self.remote_id
    }

    /// Returns the expected total size.
    #[must_use]
    pub fn expected_size(&self) -> u64 {
        self.expected_size
    }

    /// Returns the expected content hash, if known, for post-download
    /// verification.
    #[must_use]
    pub fn expected_hash(&self) -> Option<&FileHash> {
        self.expected_hash.as_ref()
    }

    /// Returns this request's priority.
    #[must_use]
    pub fn priority(&self) -> DownloadPriority {
        self.priority
    }

    /// Returns bytes received so far.
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Returns the number of attempts made so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> &DownloadState {
        &self.state
    }

    /// Returns progress as an integer percentage (0-100).
    ///
    /// Returns 0 if the expected size is unknown (zero).
    #[must_use]
    pub fn progress_percent(&self) -> u8 {
        if self.expected_size == 0 {
            return 0;
        }
        let pct = (self.bytes_received as f64 / self.expected_size as f64) * 100.0;
        pct.clamp(0.0, 100.0) as u8
    }

    // --- Mutators ---

    /// Raises this request's priority if the new priority outranks the
    /// current one (a prefetch that becomes a blocking read is promoted,
    /// never demoted).
    pub fn raise_priority(&mut self, priority: DownloadPriority) {
        if priority > self.priority {
            self.priority = priority;
        }
    }

    /// Marks the request as actively transferring and records progress.
    pub fn advance(&mut self, bytes_received: u64) {
        self.state = DownloadState::InProgress;
        self.bytes_received = self.bytes_received.max(bytes_received);
        self.touch();
    }

    /// Marks the download as successfully completed and verified.
    pub fn complete(&mut self) {
        self.bytes_received = self.expected_size;
        self.state = DownloadState::Completed;
        self.touch();
    }

    /// Records a failed attempt.
    pub fn record_attempt_failure(&mut self, reason: impl Into<String>) {
        self.attempts += 1;
        self.state = DownloadState::Failed(reason.into());
        self.touch();
    }

    /// Cancels the request (e.g. the item was deleted mid-download).
    pub fn cancel(&mut self) {
        self.state = DownloadState::Cancelled;
        self.touch();
    }

    /// Resets a failed request back to pending so it can be retried.
    pub fn reset_for_retry(&mut self) {
        if matches!(self.state, DownloadState::Failed(_)) {
            self.state = DownloadState::Pending;
            self.bytes_received = 0;
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

    fn remote_id() -> RemoteId {
        RemoteId::new("ABC123!0".to_string()).unwrap()
    }

    #[test]
    fn test_new_is_pending_at_zero_progress() {
        let req = DownloadRequest::new(remote_id(), 1000, None, DownloadPriority::Background);
        assert_eq!(*req.state(), DownloadState::Pending);
        assert_eq!(req.progress_percent(), 0);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(DownloadPriority::Foreground > DownloadPriority::Background);
        assert!(DownloadPriority::Background > DownloadPriority::Prefetch);
    }

    #[test]
    fn test_raise_priority_never_demotes() {
        let mut req = DownloadRequest::new(remote_id(), 1000, None, DownloadPriority::Foreground);
        req.raise_priority(DownloadPriority::Background);
        assert_eq!(req.priority(), DownloadPriority::Foreground);

        let mut req2 = DownloadRequest::new(remote_id(), 1000, None, DownloadPriority::Prefetch);
        req2.raise_priority(DownloadPriority::Foreground);
        assert_eq!(req2.priority(), DownloadPriority::Foreground);
    }

    #[test]
    fn test_advance_updates_progress() {
        let mut req = DownloadRequest::new(remote_id(), 1000, None, DownloadPriority::Background);
        req.advance(500);
        assert_eq!(req.progress_percent(), 50);
        assert_eq!(*req.state(), DownloadState::InProgress);
    }

    #[test]
    fn test_complete_reaches_100_percent() {
        let mut req = DownloadRequest::new(remote_id(), 1000, None, DownloadPriority::Background);
        req.advance(500);
        req.complete();
        assert_eq!(req.progress_percent(), 100);
        assert!(req.state().is_terminal());
    }

    #[test]
    fn test_failure_then_retry_resets_progress() {
        let mut req = DownloadRequest::new(remote_id(), 1000, None, DownloadPriority::Background);
        req.advance(400);
        req.record_attempt_failure("connection reset");
        assert_eq!(req.attempts(), 1);
        req.reset_for_retry();
        assert_eq!(*req.state(), DownloadState::Pending);
        assert_eq!(req.bytes_received(), 0);
    }

    #[test]
    fn test_cancel_is_terminal() {
        let mut req = DownloadRequest::new(remote_id(), 1000, None, DownloadPriority::Background);
        req.cancel();
        assert!(req.state().is_terminal());
    }

    #[test]
    fn test_serde_roundtrip() {
        let req = DownloadRequest::new(remote_id(), 1000, None, DownloadPriority::Foreground);
        let json = serde_json::to_string(&req).unwrap();
        let parsed: DownloadRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(req, parsed);
    }
}
