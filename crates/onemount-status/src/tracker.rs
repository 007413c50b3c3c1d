//! `StatusTracker` - derives and tracks per-item `FileStatus`
//!
//! Derivation order matches `onemount_core::domain::status::FileStatus::derive`:
//! error beats conflict beats in-flight transfer beats dirty beats absent
//! beats synced. The facts that feed it come from two places:
//!
//! - Derived automatically every call: dirty (`Inode::is_dirty`), conflicted
//!   (`IStateRepository::get_unresolved_conflicts`), upload progress
//!   (`IStateRepository::get_upload_session`), content presence
//!   (`ILocalFileSystem::get_state` against the item's cache slot).
//! - Held as a transient override until explicitly cleared: download
//!   progress, the out-of-sync flag, and the last error message. Nothing
//!   persists a `DownloadRequest`'s progress anywhere queryable, so download
//!   progress only exists in the tracker once something calls
//!   `mark_downloading`.

use std::sync::Arc;

use dashmap::DashMap;

use onemount_core::domain::newtypes::{ItemId, SyncPath};
use onemount_core::domain::status::{FileStatus, StatusInputs};
use onemount_core::ports::local_filesystem::ILocalFileSystem;
use onemount_core::ports::state_repository::IStateRepository;

use crate::error::StatusError;

/// Transient, unpersisted facts held per item between explicit setter calls.
#[derive(Debug, Clone, Default)]
struct Overrides {
    download_percent: Option<u8>,
    out_of_sync: bool,
    error_message: Option<String>,
    conflict_hint: bool,
}

/// Tracks and derives the externally-visible status of every known item.
pub struct StatusTracker {
    state_repository: Arc<dyn IStateRepository + Send + Sync>,
    local_filesystem: Arc<dyn ILocalFileSystem + Send + Sync>,
    overrides: DashMap<ItemId, Overrides>,
}

impl StatusTracker {
    pub fn new(
        state_repository: Arc<dyn IStateRepository + Send + Sync>,
        local_filesystem: Arc<dyn ILocalFileSystem + Send + Sync>,
    ) -> Self {
        Self {
            state_repository,
            local_filesystem,
            overrides: DashMap::new(),
        }
    }

    /// Derives the current status of one item.
    pub async fn status_for(&self, item_id: &ItemId) -> Result<FileStatus, StatusError> {
        let inode = self
            .state_repository
            .get_inode_by_item_id(item_id)
            .await?
            .ok_or_else(|| StatusError::NotFound(item_id.as_str().to_string()))?;

        let overrides = self
            .overrides
            .get(item_id)
            .map(|o| o.clone())
            .unwrap_or_default();

        let upload_percent = self
            .state_repository
            .get_upload_session(item_id)
            .await?
            .filter(|session| !session.state().is_terminal())
            .map(|session| session.progress_percent());

        let conflicted = overrides.conflict_hint
            || self
                .state_repository
                .get_unresolved_conflicts()
                .await?
                .iter()
                .any(|c| c.item_id() == item_id);

        let content_absent = !self
            .local_filesystem
            .get_state(&cache_path_for(item_id))
            .await?
            .exists;

        let inputs = StatusInputs {
            dirty: inode.is_dirty() || overrides.out_of_sync,
            conflicted,
            download_percent: overrides.download_percent,
            upload_percent,
            error_message: overrides.error_message,
            content_absent,
        };

        Ok(FileStatus::derive(&inputs))
    }

    /// Reports download progress, or clears it when `percent` is `None`
    /// (the download finished or was cancelled).
    pub fn mark_downloading(&self, item_id: &ItemId, percent: Option<u8>) {
        self.overrides.entry(item_id.clone()).or_default().download_percent = percent;
    }

    /// Flags (or clears) an item as needing attention independent of a
    /// local edit, e.g. a quota or remote-side change the sync engine
    /// noticed but hasn't reconciled yet. Surfaces as `Modified`, the
    /// closest existing status to "needs another sync pass" - there is no
    /// separate out-of-sync variant in `FileStatus`.
    pub fn mark_out_of_sync(&self, item_id: &ItemId, out_of_sync: bool) {
        self.overrides.entry(item_id.clone()).or_default().out_of_sync = out_of_sync;
    }

    /// Records (or clears, with `None`) the last error message for an item.
    pub fn mark_error(&self, item_id: &ItemId, message: Option<String>) {
        self.overrides.entry(item_id.clone()).or_default().error_message = message;
    }

    /// Sets a fast conflict hint ahead of the conflict record being
    /// queryable through `get_unresolved_conflicts` (or clears it once
    /// resolved). Automatic derivation already covers the steady state;
    /// this exists so a caller that just detected a conflict doesn't have
    /// to wait for its own write to land before the status reflects it.
    pub fn mark_conflict(&self, item_id: &ItemId, conflicted: bool) {
        self.overrides.entry(item_id.clone()).or_default().conflict_hint = conflicted;
    }

    /// Drops all transient overrides for an item, e.g. after it's deleted.
    pub fn forget(&self, item_id: &ItemId) {
        self.overrides.remove(item_id);
    }
}

/// Synthetic local path under which `ILocalFileSystem` tracks an item's
/// cached content, keyed by item id. Matches
/// `onemount-sync::engine::cache_path_for` / `onemount-conflict::resolver::cache_path_for`.
fn cache_path_for(item_id: &ItemId) -> SyncPath {
    SyncPath::new(std::path::PathBuf::from(format!("/{}", item_id.as_str())))
        .expect("item id strings never contain path traversal")
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    use async_trait::async_trait;
    use chrono::Utc;

    use onemount_core::domain::newtypes::{AccountId, NodeId, RemoteId};
    use onemount_core::domain::{
        Account, AuditEntry, Conflict, DeltaCursor, FileHash, Inode, OfflineChange, UploadSession,
    };
    use onemount_core::ports::local_filesystem::FileSystemState;
    use onemount_core::ports::InodeFilter;

    struct FakeStateRepo {
        inode: Inode,
        conflicts: Vec<Conflict>,
        upload_session: Option<UploadSession>,
    }

    #[async_trait]
    impl IStateRepository for FakeStateRepo {
        async fn save_inode(&self, _inode: &Inode) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn get_inode(&self, _ino: NodeId) -> anyhow::Result<Option<Inode>> {
            unimplemented!()
        }
        async fn get_inode_by_item_id(&self, id: &ItemId) -> anyhow::Result<Option<Inode>> {
            if id == self.inode.id() {
                Ok(Some(self.inode.clone()))
            } else {
                Ok(None)
            }
        }
        async fn get_inode_by_remote_id(&self, _id: &RemoteId) -> anyhow::Result<Option<Inode>> {
            unimplemented!()
        }
        async fn get_child_inode(&self, _parent: NodeId, _name: &str) -> anyhow::Result<Option<Inode>> {
            unimplemented!()
        }
        async fn query_inodes(&self, _filter: InodeFilter) -> anyhow::Result<Vec<Inode>> {
            unimplemented!()
        }
        async fn delete_inode_recursive(&self, _ino: NodeId) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn allocate_inode(&self) -> anyhow::Result<NodeId> {
            unimplemented!()
        }
        async fn serialize_all(&self) -> anyhow::Result<Vec<u8>> {
            unimplemented!()
        }
        async fn get_items_for_dehydration(&self, _older_than_days: u32) -> anyhow::Result<Vec<Inode>> {
            unimplemented!()
        }
        async fn update_last_accessed(&self, _ino: NodeId) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn get_delta_cursor(&self, _account_id: &AccountId) -> anyhow::Result<Option<DeltaCursor>> {
            unimplemented!()
        }
        async fn save_delta_cursor(&self, _cursor: &DeltaCursor) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn save_offline_change(&self, _change: &OfflineChange) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn get_pending_offline_changes(&self) -> anyhow::Result<Vec<OfflineChange>> {
            unimplemented!()
        }
        async fn delete_offline_change(&self, _id: &str) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn save_upload_session(&self, _session: &UploadSession) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn get_upload_session(&self, item_id: &ItemId) -> anyhow::Result<Option<UploadSession>> {
            if item_id == self.inode.id() {
                Ok(self.upload_session.clone())
            } else {
                Ok(None)
            }
        }
        async fn get_resumable_upload_sessions(&self) -> anyhow::Result<Vec<UploadSession>> {
            unimplemented!()
        }
        async fn delete_upload_session(&self, _item_id: &ItemId) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn get_schema_version(&self) -> anyhow::Result<u32> {
            unimplemented!()
        }
        async fn set_schema_version(&self, _version: u32) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn save_account(&self, _account: &Account) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn get_account(&self, _id: &AccountId) -> anyhow::Result<Option<Account>> {
            unimplemented!()
        }
        async fn get_default_account(&self) -> anyhow::Result<Option<Account>> {
            unimplemented!()
        }
        async fn save_audit(&self, _entry: &AuditEntry) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn get_audit_trail(&self, _item_id: &ItemId, _limit: u32) -> anyhow::Result<Vec<AuditEntry>> {
            unimplemented!()
        }
        async fn get_audit_since(&self, _since: chrono::DateTime<Utc>) -> anyhow::Result<Vec<AuditEntry>> {
            unimplemented!()
        }
        async fn save_conflict(&self, _conflict: &Conflict) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn get_unresolved_conflicts(&self) -> anyhow::Result<Vec<Conflict>> {
            Ok(self.conflicts.clone())
        }
        async fn count_items_by_status(&self, _account_id: &AccountId) -> anyhow::Result<HashMap<String, u64>> {
            unimplemented!()
        }
    }

    struct FakeLocalFs {
        exists: bool,
    }

    #[async_trait]
    impl ILocalFileSystem for FakeLocalFs {
        async fn read_file(&self, _path: &SyncPath) -> anyhow::Result<Vec<u8>> {
            unimplemented!()
        }
        async fn write_file(&self, _path: &SyncPath, _data: &[u8]) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn delete_file(&self, _path: &SyncPath) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn get_state(&self, _path: &SyncPath) -> anyhow::Result<FileSystemState> {
            Ok(if self.exists {
                FileSystemState {
                    exists: true,
                    is_file: true,
                    size: 1024,
                    modified: Some(Utc::now()),
                    is_locked: false,
                }
            } else {
                FileSystemState::not_found()
            })
        }
        async fn compute_hash(&self, _path: &SyncPath) -> anyhow::Result<FileHash> {
            unimplemented!()
        }
        async fn create_directory(&self, _path: &SyncPath) -> anyhow::Result<()> {
            unimplemented!()
        }
    }

    fn test_inode(dirty: bool) -> Inode {
        let mut inode = Inode::from_remote(
            ItemId::new_local(),
            NodeId::new(2),
            NodeId::ROOT,
            "report.docx",
            false,
            2048,
            Utc::now(),
            Some("\"etag\"".to_string()),
            Some(FileHash::new("ABC123".to_string()).unwrap()),
        );
        if dirty {
            inode.mark_dirty();
        }
        inode
    }

    fn tracker(inode: Inode, conflicts: Vec<Conflict>, upload_session: Option<UploadSession>, content_present: bool) -> StatusTracker {
        let state_repository = Arc::new(FakeStateRepo {
            inode,
            conflicts,
            upload_session,
        });
        let local_filesystem = Arc::new(FakeLocalFs { exists: content_present });
        StatusTracker::new(state_repository, local_filesystem)
    }

    #[tokio::test]
    async fn defaults_to_synced_when_hydrated_and_clean() {
        let inode = test_inode(false);
        let id = inode.id().clone();
        let t = tracker(inode, vec![], None, true);
        assert_eq!(t.status_for(&id).await.unwrap(), FileStatus::Synced);
    }

    #[tokio::test]
    async fn absent_content_is_cloud() {
        let inode = test_inode(false);
        let id = inode.id().clone();
        let t = tracker(inode, vec![], None, false);
        assert_eq!(t.status_for(&id).await.unwrap(), FileStatus::Cloud);
    }

    #[tokio::test]
    async fn dirty_inode_is_modified() {
        let inode = test_inode(true);
        let id = inode.id().clone();
        let t = tracker(inode, vec![], None, true);
        assert_eq!(t.status_for(&id).await.unwrap(), FileStatus::Modified);
    }

    #[tokio::test]
    async fn unresolved_conflict_wins_over_dirty() {
        let inode = test_inode(true);
        let id = inode.id().clone();
        let local = onemount_core::domain::conflict::VersionInfo::new(
            FileHash::new("AAA".to_string()).unwrap(),
            10,
            Utc::now(),
        );
        let remote = onemount_core::domain::conflict::VersionInfo::new(
            FileHash::new("BBB".to_string()).unwrap(),
            12,
            Utc::now(),
        );
        let conflict = Conflict::new(id.clone(), local, remote);
        let t = tracker(inode, vec![conflict], None, true);
        assert_eq!(t.status_for(&id).await.unwrap(), FileStatus::Conflicted);
    }

    #[tokio::test]
    async fn mark_downloading_overrides_until_cleared() {
        let inode = test_inode(false);
        let id = inode.id().clone();
        let t = tracker(inode, vec![], None, true);

        t.mark_downloading(&id, Some(42));
        assert_eq!(
            t.status_for(&id).await.unwrap(),
            FileStatus::Downloading { percent: 42 }
        );

        t.mark_downloading(&id, None);
        assert_eq!(t.status_for(&id).await.unwrap(), FileStatus::Synced);
    }

    #[tokio::test]
    async fn mark_error_beats_everything_until_cleared() {
        let inode = test_inode(true);
        let id = inode.id().clone();
        let t = tracker(inode, vec![], None, true);

        t.mark_error(&id, Some("disk full".to_string()));
        assert_eq!(
            t.status_for(&id).await.unwrap(),
            FileStatus::Error {
                message: "disk full".to_string()
            }
        );

        t.mark_error(&id, None);
        assert_eq!(t.status_for(&id).await.unwrap(), FileStatus::Modified);
    }

    #[tokio::test]
    async fn mark_out_of_sync_surfaces_as_modified() {
        let inode = test_inode(false);
        let id = inode.id().clone();
        let t = tracker(inode, vec![], None, true);

        t.mark_out_of_sync(&id, true);
        assert_eq!(t.status_for(&id).await.unwrap(), FileStatus::Modified);

        t.mark_out_of_sync(&id, false);
        assert_eq!(t.status_for(&id).await.unwrap(), FileStatus::Synced);
    }

    #[tokio::test]
    async fn forget_drops_overrides() {
        let inode = test_inode(false);
        let id = inode.id().clone();
        let t = tracker(inode, vec![], None, true);

        t.mark_error(&id, Some("timeout".to_string()));
        t.forget(&id);
        assert_eq!(t.status_for(&id).await.unwrap(), FileStatus::Synced);
    }

    #[tokio::test]
    async fn unknown_item_is_not_found() {
        let inode = test_inode(false);
        let t = tracker(inode, vec![], None, true);
        let other = ItemId::new_local();
        assert!(matches!(
            t.status_for(&other).await,
            Err(StatusError::NotFound(_))
        ));
    }
}
