//! State repository port (driven/secondary port)
//!
//! This module defines the interface for persisting and querying the
//! metadata store: the `metadata`, `delta`, `offline_changes`, `uploads`,
//! and `version` buckets described in the data model, plus accounts, audit
//! entries, and conflicts.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific
//!   (SQLite, filesystem, etc.) and don't need domain-level classification.
//! - The `InodeFilter` struct provides a composable query mechanism without
//!   exposing storage implementation details.
//! - All write operations take references to domain entities, allowing the
//!   caller to retain ownership.
//! - Inode persistence is keyed by [`NodeId`] (the kernel-visible node
//!   number); the in-memory id<->inode lookup used on the hot FUSE path
//!   lives in `onemount-fuse::InodeTable`, not here. This trait is the
//!   durable backing store that table is loaded from and flushed to.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::domain::{
    newtypes::{AccountId, ItemId, NodeId, RemoteId},
    Account, AuditEntry, Conflict, DeltaCursor, Inode, OfflineChange, UploadSession,
};

// ============================================================================
// InodeFilter struct
// ============================================================================

/// Filter criteria for querying inodes in the metadata bucket.
///
/// All fields are optional; when `None`, no filtering is applied for that
/// field. Multiple filters are combined with AND logic.
#[derive(Debug, Clone, Default)]
pub struct InodeFilter {
    /// Filter by account ID
    pub account_id: Option<AccountId>,
    /// Filter by directory-ness (`Some(true)` = directories only)
    pub is_directory: Option<bool>,
    /// Filter by dirty flag (`Some(true)` = items with unsynced local edits)
    pub dirty: Option<bool>,
    /// Filter to children of a specific parent node
    pub parent: Option<NodeId>,
    /// Filter by modification time (items modified after this timestamp)
    pub modified_since: Option<DateTime<Utc>>,
}

impl InodeFilter {
    /// Creates a new empty filter (matches all inodes)
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the account ID filter
    pub fn with_account_id(mut self, account_id: AccountId) -> Self {
        self.account_id = Some(account_id);
        self
    }

    /// Sets the directory filter
    pub fn with_is_directory(mut self, is_directory: bool) -> Self {
        self.is_directory = Some(is_directory);
        self
    }

    /// Sets the dirty filter
    pub fn with_dirty(mut self, dirty: bool) -> Self {
        self.dirty = Some(dirty);
        self
    }

    /// Sets the parent filter
    pub fn with_parent(mut self, parent: NodeId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Sets the modified-since filter
    pub fn with_modified_since(mut self, since: DateTime<Utc>) -> Self {
        self.modified_since = Some(since);
        self
    }

    /// Returns true if no filters are set
    pub fn is_empty(&self) -> bool {
        self.account_id.is_none()
            && self.is_directory.is_none()
            && self.dirty.is_none()
            && self.parent.is_none()
            && self.modified_since.is_none()
    }
}

// ============================================================================
// IStateRepository trait
// ============================================================================

/// Port trait for persistent state storage
///
/// This is the primary interface for all persistence operations in
/// OneMount. Each named bucket from the data model maps to a method group
/// below; implementations are free to back every bucket with tables in a
/// single database, which is what the shipped adapter does.
///
/// ## Implementation Notes
///
/// - Implementations should ensure atomicity for individual operations.
/// - For batch operations, implementations may use transactions internally.
/// - Audit and conflict operations are included here to avoid proliferating
///   small repository traits; implementations may delegate to sub-repositories.
#[async_trait::async_trait]
pub trait IStateRepository: Send + Sync {
    // --- `metadata` bucket: the inode tree ---

    /// Saves an inode (insert or update), keyed by its node number.
    async fn save_inode(&self, inode: &Inode) -> anyhow::Result<()>;

    /// Retrieves an inode by its kernel-visible node number.
    async fn get_inode(&self, ino: NodeId) -> anyhow::Result<Option<Inode>>;

    /// Retrieves an inode by its stable or placeholder item id.
    async fn get_inode_by_item_id(&self, id: &ItemId) -> anyhow::Result<Option<Inode>>;

    /// Retrieves an inode by its remote id, if it has one.
    async fn get_inode_by_remote_id(&self, remote_id: &RemoteId) -> anyhow::Result<Option<Inode>>;

    /// Looks up a child of `parent` by name (case-insensitive), the
    /// durable counterpart to `Inode::find_child`.
    async fn get_child_inode(&self, parent: NodeId, name: &str) -> anyhow::Result<Option<Inode>>;

    /// Queries inodes matching the given filter criteria.
    async fn query_inodes(&self, filter: &InodeFilter) -> anyhow::Result<Vec<Inode>>;

    /// Deletes an inode and, for a directory, everything still indexed
    /// under it (a recursive delete of the subtree rooted at `ino`).
    async fn delete_inode_recursive(&self, ino: NodeId) -> anyhow::Result<()>;

    /// Atomically allocates the next available kernel node number.
    ///
    /// Node 1 is reserved for the mount root; the first call after a fresh
    /// database returns 2.
    async fn allocate_inode(&self) -> anyhow::Result<NodeId>;

    /// Flushes every in-memory-dirty inode known to the caller to durable
    /// storage in one batch, used at shutdown and on a periodic timer.
    async fn serialize_all(&self, inodes: &[Inode]) -> anyhow::Result<()>;

    /// Returns inodes that are candidates for dehydration: hydrated content
    /// not accessed in at least `max_age_days`, least-recently-accessed
    /// first, capped at `limit`.
    async fn get_items_for_dehydration(
        &self,
        max_age_days: u32,
        limit: u32,
    ) -> anyhow::Result<Vec<Inode>>;

    /// Updates the last-accessed timestamp used for dehydration scheduling.
    async fn update_last_accessed(&self, ino: NodeId, accessed: DateTime<Utc>) -> anyhow::Result<()>;

    // --- `delta` bucket ---

    /// Loads the persisted delta cursor, if a sync has completed before.
    async fn get_delta_cursor(&self, account_id: &AccountId) -> anyhow::Result<Option<DeltaCursor>>;

    /// Persists the delta cursor after a successful (or mid-page) delta
    /// query.
    async fn save_delta_cursor(
        &self,
        account_id: &AccountId,
        cursor: &DeltaCursor,
    ) -> anyhow::Result<()>;

    // --- `offline_changes` bucket ---

    /// Journals a local change made while the cloud was unreachable.
    async fn save_offline_change(&self, change: &OfflineChange) -> anyhow::Result<()>;

    /// Returns journaled changes still awaiting replay, in the order they
    /// were recorded (oldest first), so replay preserves operation order.
    async fn get_pending_offline_changes(&self) -> anyhow::Result<Vec<OfflineChange>>;

    /// Removes a journaled change once it has been successfully replayed.
    async fn delete_offline_change(&self, item_id: &ItemId, recorded_at: DateTime<Utc>) -> anyhow::Result<()>;

    // --- `uploads` bucket ---

    /// Saves an upload session's checkpoint (insert or update).
    async fn save_upload_session(&self, session: &UploadSession) -> anyhow::Result<()>;

    /// Retrieves the in-flight or most recent upload session for an item.
    async fn get_upload_session(&self, item_id: &ItemId) -> anyhow::Result<Option<UploadSession>>;

    /// Returns every upload session that was not terminal when the daemon
    /// last ran, for crash-recovery resumption on startup.
    async fn get_resumable_upload_sessions(&self) -> anyhow::Result<Vec<UploadSession>>;

    /// Deletes an upload session once it reaches a terminal state and has
    /// been fully reconciled.
    async fn delete_upload_session(&self, item_id: &ItemId) -> anyhow::Result<()>;

    // --- `version` bucket ---

    /// Returns the schema version currently stored in the database, or
    /// `None` for a freshly created, unmigrated database.
    async fn get_schema_version(&self) -> anyhow::Result<Option<u32>>;

    /// Records the schema version after applying migrations.
    async fn set_schema_version(&self, version: u32) -> anyhow::Result<()>;

    // --- Account operations ---

    /// Saves an account (insert or update)
    async fn save_account(&self, account: &Account) -> anyhow::Result<()>;

    /// Retrieves an account by its ID
    async fn get_account(&self, id: &AccountId) -> anyhow::Result<Option<Account>>;

    /// Retrieves the default (primary) account
    ///
    /// Returns `None` if no accounts are configured.
    async fn get_default_account(&self) -> anyhow::Result<Option<Account>>;

    // --- Audit operations ---

    /// Saves an audit entry
    async fn save_audit(&self, entry: &AuditEntry) -> anyhow::Result<()>;

    /// Retrieves all audit entries for a specific item
    ///
    /// Returns entries ordered by timestamp (oldest first).
    async fn get_audit_trail(&self, item_id: &ItemId) -> anyhow::Result<Vec<AuditEntry>>;

    /// Retrieves audit entries since a given timestamp, up to a limit
    ///
    /// Returns entries ordered by timestamp (newest first).
    async fn get_audit_since(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> anyhow::Result<Vec<AuditEntry>>;

    // --- Conflict operations ---

    /// Saves a conflict record (insert or update)
    async fn save_conflict(&self, conflict: &Conflict) -> anyhow::Result<()>;

    /// Retrieves all unresolved conflicts
    ///
    /// Returns conflicts ordered by detection time (newest first).
    async fn get_unresolved_conflicts(&self) -> anyhow::Result<Vec<Conflict>>;

    /// Counts inodes grouped by a coarse status bucket for a given account,
    /// for the `onemount status` summary view.
    ///
    /// Returns a map from status name (e.g. "synced", "modified",
    /// "conflicted") to item count.
    async fn count_items_by_status(&self, account_id: &AccountId) -> anyhow::Result<HashMap<String, u64>>;
}
