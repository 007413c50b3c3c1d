//! AuditLogger - high-level audit logging service
//!
//! Wraps `IStateRepository::save_audit()` with convenience methods for
//! each type of auditable operation. All methods are non-fatal: errors
//! in audit persistence are logged via `tracing::warn!` but never propagated.

use std::sync::Arc;

use chrono::Utc;
use onemount_core::{
    domain::{
        audit::{AuditAction, AuditEntry, AuditResult},
        newtypes::{ItemId, SessionId},
    },
    ports::state_repository::IStateRepository,
};
use serde_json::json;

/// High-level audit logger that wraps the state repository's audit persistence.
///
/// All methods silently swallow errors (logging a warning) to ensure
/// audit failures never break sync operations.
pub struct AuditLogger {
    state_repo: Arc<dyn IStateRepository + Send + Sync>,
}

impl AuditLogger {
    /// Creates a new `AuditLogger` backed by the given state repository.
    pub fn new(state_repo: Arc<dyn IStateRepository + Send + Sync>) -> Self {
        Self { state_repo }
    }

    /// Persist an audit entry, swallowing errors with a tracing warning.
    async fn save(&self, entry: &AuditEntry) {
        if let Err(e) = self.state_repo.save_audit(entry).await {
            tracing::warn!(error = %e, "Failed to save audit entry");
        }
    }

    // ========================================================================
    // Sync lifecycle
    // ========================================================================

    /// Log the start of a sync cycle.
    pub async fn log_sync_start(&self, session_id: SessionId) {
        let entry = AuditEntry::new(AuditAction::SyncStart, AuditResult::success())
            .with_session_id(session_id);
        self.save(&entry).await;
    }

    /// Log the successful completion of a sync cycle.
    pub async fn log_sync_complete(
        &self,
        session_id: SessionId,
        duration_ms: u64,
        downloaded: u32,
        uploaded: u32,
        deleted: u32,
        errors: usize,
    ) {
        let entry = AuditEntry::new(AuditAction::SyncComplete, AuditResult::success())
            .with_session_id(session_id)
            .with_duration_ms(duration_ms)
            .with_details(json!({
                "files_downloaded": downloaded,
                "files_uploaded": uploaded,
                "files_deleted": deleted,
                "errors": errors,
            }));
        self.save(&entry).await;
    }

    // ========================================================================
    // File operations
    // ========================================================================

    /// Log a file download from the cloud.
    pub async fn log_file_download(
        &self,
        item_id: ItemId,
        path: &str,
        size_bytes: u64,
        duration_ms: u64,
    ) {
        let entry = AuditEntry::new(AuditAction::FileDownload, AuditResult::success())
            .with_item_id(item_id)
            .with_duration_ms(duration_ms)
            .with_details(json!({
                "path": path,
                "size_bytes": size_bytes,
            }));
        self.save(&entry).await;
    }

    /// Log a file upload to the cloud.
    pub async fn log_file_upload(
        &self,
        item_id: ItemId,
        path: &str,
        size_bytes: u64,
        duration_ms: u64,
    ) {
        let entry = AuditEntry::new(AuditAction::FileUpload, AuditResult::success())
            .with_item_id(item_id)
            .with_duration_ms(duration_ms)
            .with_details(json!({
                "path": path,
                "size_bytes": size_bytes,
            }));
        self.save(&entry).await;
    }

    /// Log a file deletion (local or remote).
    pub async fn log_file_delete(&self, item_id: ItemId, path: &str) {
        let entry = AuditEntry::new(AuditAction::FileDelete, AuditResult::success())
            .with_item_id(item_id)
            .with_details(json!({
                "path": path,
            }));
        self.save(&entry).await;
    }

    // ========================================================================
    // Conflicts and errors
    // ========================================================================

    /// Log detection of a sync conflict.
    pub async fn log_conflict_detected(&self, item_id: ItemId, path: &str, reason: &str) {
        let entry = AuditEntry::new(AuditAction::ConflictDetected, AuditResult::success())
            .with_item_id(item_id)
            .with_details(json!({
                "path": path,
                "reason": reason,
            }));
        self.save(&entry).await;
    }

    /// Log resolution of a sync conflict.
    pub async fn log_conflict_resolved(&self, item_id: ItemId, path: &str, resolution: &str) {
        let entry = AuditEntry::new(AuditAction::ConflictResolved, AuditResult::success())
            .with_item_id(item_id)
            .with_details(json!({
                "path": path,
                "resolution": resolution,
            }));
        self.save(&entry).await;
    }

    /// Log a non-fatal error during sync.
    pub async fn log_error(&self, message: &str, context: Option<&str>) {
        let result = AuditResult::failed("SYNC_ERROR", message);
        let mut entry = AuditEntry::new(AuditAction::Error, result);
        if let Some(ctx) = context {
            entry = entry.with_details(json!({
                "context": ctx,
                "timestamp": Utc::now().to_rfc3339(),
            }));
        }
        self.save(&entry).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onemount_cache::{DatabasePool, SqliteStateRepository};
    use onemount_core::domain::newtypes::ItemId;

    async fn test_repo() -> Arc<SqliteStateRepository> {
        let pool = DatabasePool::in_memory()
            .await
            .expect("failed to create in-memory database");
        Arc::new(SqliteStateRepository::new(pool.pool().clone()))
    }

    async fn audit_trail_since(repo: &SqliteStateRepository) -> Vec<AuditEntry> {
        repo.get_audit_since(Utc::now() - chrono::Duration::hours(1), 100)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_log_sync_start() {
        let repo = test_repo().await;
        let logger = AuditLogger::new(repo.clone());
        let sid = SessionId::new();

        logger.log_sync_start(sid).await;

        let entries = audit_trail_since(&repo).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(*entries[0].action(), AuditAction::SyncStart);
        assert_eq!(entries[0].session_id(), Some(&sid));
    }

    #[tokio::test]
    async fn test_log_sync_complete() {
        let repo = test_repo().await;
        let logger = AuditLogger::new(repo.clone());
        let sid = SessionId::new();

        logger.log_sync_complete(sid, 1500, 3, 2, 1, 0).await;

        let entries = audit_trail_since(&repo).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(*entries[0].action(), AuditAction::SyncComplete);
        assert_eq!(entries[0].duration_ms(), Some(1500));
        assert_eq!(entries[0].details()["files_downloaded"], 3);
    }

    #[tokio::test]
    async fn test_log_file_download() {
        let repo = test_repo().await;
        let logger = AuditLogger::new(repo.clone());
        let item_id = ItemId::new_local();

        logger
            .log_file_download(item_id.clone(), "/docs/file.txt", 4096, 200)
            .await;

        let entries = audit_trail_since(&repo).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(*entries[0].action(), AuditAction::FileDownload);
        assert_eq!(entries[0].item_id(), Some(&item_id));
        assert_eq!(entries[0].details()["path"], "/docs/file.txt");
    }

    #[tokio::test]
    async fn test_log_file_upload() {
        let repo = test_repo().await;
        let logger = AuditLogger::new(repo.clone());
        let item_id = ItemId::new_local();

        logger
            .log_file_upload(item_id, "/photos/img.jpg", 2048000, 500)
            .await;

        let entries = audit_trail_since(&repo).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(*entries[0].action(), AuditAction::FileUpload);
    }

    #[tokio::test]
    async fn test_log_file_delete() {
        let repo = test_repo().await;
        let logger = AuditLogger::new(repo.clone());
        let item_id = ItemId::new_local();

        logger.log_file_delete(item_id, "/old/file.bak").await;

        let entries = audit_trail_since(&repo).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(*entries[0].action(), AuditAction::FileDelete);
    }

    #[tokio::test]
    async fn test_log_conflict_detected() {
        let repo = test_repo().await;
        let logger = AuditLogger::new(repo.clone());
        let item_id = ItemId::new_local();

        logger
            .log_conflict_detected(item_id, "/doc.txt", "both_modified")
            .await;

        let entries = audit_trail_since(&repo).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(*entries[0].action(), AuditAction::ConflictDetected);
        assert_eq!(entries[0].details()["reason"], "both_modified");
    }

    #[tokio::test]
    async fn test_log_conflict_resolved() {
        let repo = test_repo().await;
        let logger = AuditLogger::new(repo.clone());
        let item_id = ItemId::new_local();

        logger
            .log_conflict_resolved(item_id, "/doc.txt", "keep_local")
            .await;

        let entries = audit_trail_since(&repo).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(*entries[0].action(), AuditAction::ConflictResolved);
    }

    #[tokio::test]
    async fn test_log_error() {
        let repo = test_repo().await;
        let logger = AuditLogger::new(repo.clone());

        logger
            .log_error("Connection timed out", Some("upload"))
            .await;

        let entries = audit_trail_since(&repo).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(*entries[0].action(), AuditAction::Error);
        assert!(entries[0].result().is_failed());
    }

    #[tokio::test]
    async fn test_audit_failure_is_non_fatal() {
        // A repository whose save_audit always fails.
        use async_trait::async_trait;
        use chrono::{DateTime, Utc};
        use onemount_core::domain::newtypes::{AccountId, NodeId, RemoteId};
        use onemount_core::domain::{Account, Conflict, DeltaCursor, Inode, OfflineChange, UploadSession};
        use onemount_core::ports::state_repository::InodeFilter;
        use std::collections::HashMap;

        struct FailingRepo;

        #[async_trait]
        impl IStateRepository for FailingRepo {
            async fn save_inode(&self, _: &Inode) -> anyhow::Result<()> {
                unimplemented!()
            }
            async fn get_inode(&self, _: NodeId) -> anyhow::Result<Option<Inode>> {
                unimplemented!()
            }
            async fn get_inode_by_item_id(&self, _: &ItemId) -> anyhow::Result<Option<Inode>> {
                unimplemented!()
            }
            async fn get_inode_by_remote_id(&self, _: &RemoteId) -> anyhow::Result<Option<Inode>> {
                unimplemented!()
            }
            async fn get_child_inode(&self, _: NodeId, _: &str) -> anyhow::Result<Option<Inode>> {
                unimplemented!()
            }
            async fn query_inodes(&self, _: &InodeFilter) -> anyhow::Result<Vec<Inode>> {
                unimplemented!()
            }
            async fn delete_inode_recursive(&self, _: NodeId) -> anyhow::Result<()> {
                unimplemented!()
            }
            async fn allocate_inode(&self) -> anyhow::Result<NodeId> {
                unimplemented!()
            }
            async fn serialize_all(&self, _: &[Inode]) -> anyhow::Result<()> {
                unimplemented!()
            }
            async fn get_items_for_dehydration(&self, _: u32, _: u32) -> anyhow::Result<Vec<Inode>> {
                unimplemented!()
            }
            async fn update_last_accessed(&self, _: NodeId, _: DateTime<Utc>) -> anyhow::Result<()> {
                unimplemented!()
            }
            async fn get_delta_cursor(&self, _: &AccountId) -> anyhow::Result<Option<DeltaCursor>> {
                unimplemented!()
            }
            async fn save_delta_cursor(&self, _: &AccountId, _: &DeltaCursor) -> anyhow::Result<()> {
                unimplemented!()
            }
            async fn save_offline_change(&self, _: &OfflineChange) -> anyhow::Result<()> {
                unimplemented!()
            }
            async fn get_pending_offline_changes(&self) -> anyhow::Result<Vec<OfflineChange>> {
                unimplemented!()
            }
            async fn delete_offline_change(&self, _: &ItemId, _: DateTime<Utc>) -> anyhow::Result<()> {
                unimplemented!()
            }
            async fn save_upload_session(&self, _: &UploadSession) -> anyhow::Result<()> {
                unimplemented!()
            }
            async fn get_upload_session(&self, _: &ItemId) -> anyhow::Result<Option<UploadSession>> {
                unimplemented!()
            }
            async fn get_resumable_upload_sessions(&self) -> anyhow::Result<Vec<UploadSession>> {
                unimplemented!()
            }
            async fn delete_upload_session(&self, _: &ItemId) -> anyhow::Result<()> {
                unimplemented!()
            }
            async fn get_schema_version(&self) -> anyhow::Result<Option<u32>> {
                unimplemented!()
            }
            async fn set_schema_version(&self, _: u32) -> anyhow::Result<()> {
                unimplemented!()
            }
            async fn save_account(&self, _: &Account) -> anyhow::Result<()> {
                unimplemented!()
            }
            async fn get_account(&self, _: &AccountId) -> anyhow::Result<Option<Account>> {
                unimplemented!()
            }
            async fn get_default_account(&self) -> anyhow::Result<Option<Account>> {
                unimplemented!()
            }
            async fn save_audit(&self, _: &AuditEntry) -> anyhow::Result<()> {
                anyhow::bail!("database write error")
            }
            async fn get_audit_trail(&self, _: &ItemId) -> anyhow::Result<Vec<AuditEntry>> {
                unimplemented!()
            }
            async fn get_audit_since(
                &self,
                _: DateTime<Utc>,
                _: u32,
            ) -> anyhow::Result<Vec<AuditEntry>> {
                unimplemented!()
            }
            async fn save_conflict(&self, _: &Conflict) -> anyhow::Result<()> {
                unimplemented!()
            }
            async fn get_unresolved_conflicts(&self) -> anyhow::Result<Vec<Conflict>> {
                unimplemented!()
            }
            async fn count_items_by_status(
                &self,
                _: &AccountId,
            ) -> anyhow::Result<HashMap<String, u64>> {
                unimplemented!()
            }
        }

        let logger = AuditLogger::new(Arc::new(FailingRepo));

        // None of these should panic or surface an error to the caller.
        logger.log_sync_start(SessionId::new()).await;
        logger
            .log_file_download(ItemId::new_local(), "/test", 0, 0)
            .await;
        logger.log_error("test error", None).await;
    }
}
