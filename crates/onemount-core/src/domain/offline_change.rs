//! Offline change journal entity
//!
//! While the cloud is unreachable, local filesystem operations are still
//! accepted and journaled here so they can be replayed, in order, once
//! connectivity returns. Each entry captures exactly the information needed
//! to reproduce the operation against the cloud provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{ItemId, RemotePath};

/// The kind of local operation that was journaled while offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OfflineChangeKind {
    /// A new file or directory was created.
    Create {
        /// True if the created item is a directory.
        is_directory: bool,
    },
    /// An existing file's content was modified.
    Modify,
    /// An item was renamed or moved, possibly both.
    Rename {
        /// The path the item is moving to.
        new_path: RemotePath,
    },
    /// An item was deleted.
    Delete,
}

/// Replay outcome once connectivity returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayOutcome {
    /// Not yet replayed.
    Pending,
    /// Replayed successfully against the cloud.
    Applied,
    /// Replay failed and was routed to conflict resolution instead.
    Conflicted,
    /// Replay failed for a reason unrelated to conflicts (will be retried).
    Failed(String),
}

/// One journaled local change made while the cloud was unreachable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineChange {
    item_id: ItemId,
    path: RemotePath,
    kind: OfflineChangeKind,
    recorded_at: DateTime<Utc>,
    outcome: ReplayOutcome,
}

impl OfflineChange {
    /// Journals a new offline change at the current time.
    #[must_use]
    pub fn new(item_id: ItemId, path: RemotePath, kind: OfflineChangeKind) -> Self {
        Self {
            item_id,
            path,
            kind,
            recorded_at: Utc::now(),
            outcome: ReplayOutcome::Pending,
        }
    }

    /// Returns the item this change applies to.
    #[must_use]
    pub fn item_id(&self) -> &ItemId {
        &self.item_id
    }

    /// Returns the remote path the item had at the time of journaling.
    #[must_use]
    pub fn path(&self) -> &RemotePath {
        &self.path
    }

    /// Returns the kind of change that was journaled.
    #[must_use]
    pub fn kind(&self) -> &OfflineChangeKind {
        &self.kind
    }

    /// Returns when the change was journaled.
    ///
    /// Replay must process entries in ascending order of this timestamp so a
    /// create-then-delete pair (for example) is not applied out of order.
    #[must_use]
    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    /// Returns the current replay outcome.
    #[must_use]
    pub fn outcome(&self) -> &ReplayOutcome {
        &self.outcome
    }

    /// Returns true if this entry still needs to be replayed.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self.outcome, ReplayOutcome::Pending)
    }

    /// Marks this change as successfully applied.
    pub fn mark_applied(&mut self) {
        self.outcome = ReplayOutcome::Applied;
    }

    /// Marks this change as having produced a conflict during replay.
    pub fn mark_conflicted(&mut self) {
        self.outcome = ReplayOutcome::Conflicted;
    }

    /// Marks this change as failed, to be retried on the next reconnect.
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.outcome = ReplayOutcome::Failed(reason.into());
    }

    /// Resets a failed entry back to pending so it is retried.
    pub fn reset_for_retry(&mut self) {
        if matches!(self.outcome, ReplayOutcome::Failed(_)) {
            self.outcome = ReplayOutcome::Pending;
        }
    }
}
