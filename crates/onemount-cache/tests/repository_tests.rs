//! Integration tests for SqliteStateRepository
//!
//! These tests verify the IStateRepository methods using an in-memory
//! SQLite database. Each test function creates a fresh database to
//! ensure test isolation.

use std::path::PathBuf;

use chrono::{Duration, Utc};
use uuid::Uuid;

use onemount_cache::{DatabasePool, SqliteStateRepository};
use onemount_core::domain::{
    newtypes::{AccountId, DeltaToken, Email, FileHash, ItemId, NodeId, RemotePath, SyncPath},
    Account, AccountState, AuditAction, AuditEntry, AuditResult, Conflict, DeltaCursor, Inode,
    OfflineChange, OfflineChangeKind, Resolution, ResolutionSource, UploadPriority, UploadSession,
    VersionInfo,
};
use onemount_core::ports::{IStateRepository, InodeFilter};

/// Valid quickXorHash Base64 strings (20 bytes = 28 chars with padding)
const VALID_HASH_1: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAA=";
const VALID_HASH_2: &str = "BBBBBBBBBBBBBBBBBBBBBBBBBBB=";

/// Create a fresh in-memory repository for each test
async fn setup() -> SqliteStateRepository {
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    SqliteStateRepository::new(pool.pool().clone())
}

/// Create a test account and save it to the repository
async fn create_test_account(repo: &SqliteStateRepository) -> Account {
    let email = Email::new("test@example.com".to_string()).unwrap();
    let sync_root = SyncPath::new(PathBuf::from("/home/user/OneDrive")).unwrap();
    let account = Account::new(email, "Test User", "drive123", sync_root);
    repo.save_account(&account).await.unwrap();
    account
}

// ============================================================================
// Account tests
// ============================================================================

#[tokio::test]
async fn test_save_and_get_account() {
    let repo = setup().await;
    let account = create_test_account(&repo).await;

    let retrieved = repo.get_account(account.id()).await.unwrap();
    assert!(retrieved.is_some());

    let retrieved = retrieved.unwrap();
    assert_eq!(retrieved.email().as_str(), "test@example.com");
    assert_eq!(retrieved.display_name(), "Test User");
    assert_eq!(retrieved.onedrive_id(), "drive123");
    assert!(matches!(retrieved.state(), AccountState::Active));
}

#[tokio::test]
async fn test_get_account_not_found() {
    let repo = setup().await;
    let fake_id = AccountId::new();

    let result = repo.get_account(&fake_id).await.unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_get_default_account() {
    let repo = setup().await;

    let result = repo.get_default_account().await.unwrap();
    assert!(result.is_none());

    let account = create_test_account(&repo).await;

    let default = repo.get_default_account().await.unwrap();
    assert!(default.is_some());
    assert_eq!(default.unwrap().id(), account.id());
}

#[tokio::test]
async fn test_update_account() {
    let repo = setup().await;
    let mut account = create_test_account(&repo).await;

    account.update_quota(5_000_000, 15_000_000_000);
    account.mark_token_expired();

    let token = DeltaToken::new("delta-token-123".to_string()).unwrap();
    account.update_delta_token(token);
    account.record_sync(Utc::now());

    repo.save_account(&account).await.unwrap();

    let retrieved = repo.get_account(account.id()).await.unwrap().unwrap();
    assert_eq!(retrieved.quota_used(), 5_000_000);
    assert_eq!(retrieved.quota_total(), 15_000_000_000);
    assert!(matches!(retrieved.state(), AccountState::TokenExpired));
    assert_eq!(retrieved.delta_token().unwrap().as_str(), "delta-token-123");
    assert!(retrieved.last_sync().is_some());
}

// ============================================================================
// Inode tests
// ============================================================================

#[tokio::test]
async fn test_save_and_get_inode() {
    let repo = setup().await;
    let _account = create_test_account(&repo).await;

    let inode = Inode::new_local_file(NodeId::new(2), NodeId::ROOT, "test.txt");
    repo.save_inode(&inode).await.unwrap();

    let retrieved = repo.get_inode(NodeId::new(2)).await.unwrap();
    assert!(retrieved.is_some());

    let retrieved = retrieved.unwrap();
    assert_eq!(retrieved.name(), "test.txt");
    assert_eq!(retrieved.parent(), Some(NodeId::ROOT));
    assert!(retrieved.is_regular_file());
}

#[tokio::test]
async fn test_get_inode_not_found() {
    let repo = setup().await;

    let result = repo.get_inode(NodeId::new(999)).await.unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_get_inode_by_item_id() {
    let repo = setup().await;
    let _account = create_test_account(&repo).await;

    let inode = Inode::new_local_file(NodeId::new(2), NodeId::ROOT, "test.txt");
    let item_id = inode.id().clone();
    repo.save_inode(&inode).await.unwrap();

    let retrieved = repo.get_inode_by_item_id(&item_id).await.unwrap();
    assert!(retrieved.is_some());
    assert_eq!(retrieved.unwrap().ino(), NodeId::new(2));
}

#[tokio::test]
async fn test_get_inode_by_remote_id() {
    let repo = setup().await;
    let _account = create_test_account(&repo).await;

    let remote_id = onemount_core::domain::newtypes::RemoteId::new("ABC123DEF".to_string()).unwrap();
    let hash = FileHash::new(VALID_HASH_1.to_string()).unwrap();
    let inode = Inode::from_remote(
        ItemId::from_remote(remote_id.clone()),
        NodeId::new(2),
        NodeId::ROOT,
        "remote.txt",
        false,
        2048,
        Utc::now(),
        Some("etag1".to_string()),
        Some(hash),
    );

    repo.save_inode(&inode).await.unwrap();

    let retrieved = repo.get_inode_by_remote_id(&remote_id).await.unwrap();
    assert!(retrieved.is_some());
    assert_eq!(retrieved.unwrap().ino(), NodeId::new(2));
}

#[tokio::test]
async fn test_get_child_inode() {
    let repo = setup().await;
    let _account = create_test_account(&repo).await;

    let inode = Inode::new_local_file(NodeId::new(2), NodeId::ROOT, "Document.txt");
    repo.save_inode(&inode).await.unwrap();

    let retrieved = repo
        .get_child_inode(NodeId::ROOT, "document.txt")
        .await
        .unwrap();
    assert!(retrieved.is_some(), "lookup should be case-insensitive");
    assert_eq!(retrieved.unwrap().name(), "Document.txt");
}

#[tokio::test]
async fn test_delete_inode_recursive() {
    let repo = setup().await;
    let _account = create_test_account(&repo).await;

    let dir = Inode::new_local_dir(NodeId::new(2), NodeId::ROOT, "folder");
    repo.save_inode(&dir).await.unwrap();

    let child = Inode::new_local_file(NodeId::new(3), NodeId::new(2), "inside.txt");
    repo.save_inode(&child).await.unwrap();

    repo.delete_inode_recursive(NodeId::new(2)).await.unwrap();

    assert!(repo.get_inode(NodeId::new(2)).await.unwrap().is_none());
    assert!(repo.get_inode(NodeId::new(3)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_allocate_inode_is_monotonic() {
    let repo = setup().await;

    let first = repo.allocate_inode().await.unwrap();
    let second = repo.allocate_inode().await.unwrap();

    assert_eq!(first, NodeId::new(2));
    assert_eq!(second, NodeId::new(3));
}

#[tokio::test]
async fn test_query_inodes_by_parent() {
    let repo = setup().await;
    let _account = create_test_account(&repo).await;

    let file1 = Inode::new_local_file(NodeId::new(2), NodeId::ROOT, "a.txt");
    let file2 = Inode::new_local_file(NodeId::new(3), NodeId::ROOT, "b.txt");
    repo.save_inode(&file1).await.unwrap();
    repo.save_inode(&file2).await.unwrap();

    let filter = InodeFilter::new().with_parent(NodeId::ROOT);
    let results = repo.query_inodes(&filter).await.unwrap();
    assert_eq!(results.len(), 2);
}

#[tokio::test]
async fn test_query_inodes_by_dirty() {
    let repo = setup().await;
    let _account = create_test_account(&repo).await;

    let mut file1 = Inode::new_local_file(NodeId::new(2), NodeId::ROOT, "a.txt");
    file1.mark_dirty();
    let file2 = Inode::new_local_file(NodeId::new(3), NodeId::ROOT, "b.txt");

    repo.save_inode(&file1).await.unwrap();
    repo.save_inode(&file2).await.unwrap();

    let filter = InodeFilter::new().with_dirty(true);
    let results = repo.query_inodes(&filter).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].name(), "a.txt");
}

#[tokio::test]
async fn test_query_inodes_by_is_directory() {
    let repo = setup().await;
    let _account = create_test_account(&repo).await;

    let dir = Inode::new_local_dir(NodeId::new(2), NodeId::ROOT, "folder");
    let file = Inode::new_local_file(NodeId::new(3), NodeId::ROOT, "file.txt");
    repo.save_inode(&dir).await.unwrap();
    repo.save_inode(&file).await.unwrap();

    let filter = InodeFilter::new().with_is_directory(true);
    let results = repo.query_inodes(&filter).await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_directory());
}

#[tokio::test]
async fn test_update_last_accessed_and_dehydration_candidates() {
    let repo = setup().await;
    let _account = create_test_account(&repo).await;

    let file = Inode::new_local_file(NodeId::new(2), NodeId::ROOT, "stale.txt");
    repo.save_inode(&file).await.unwrap();

    let old_time = Utc::now() - Duration::days(90);
    repo.update_last_accessed(NodeId::new(2), old_time)
        .await
        .unwrap();

    let candidates = repo.get_items_for_dehydration(30, 10).await.unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].ino(), NodeId::new(2));
}

#[tokio::test]
async fn test_serialize_all() {
    let repo = setup().await;
    let _account = create_test_account(&repo).await;

    let inodes = vec![
        Inode::new_local_file(NodeId::new(2), NodeId::ROOT, "a.txt"),
        Inode::new_local_file(NodeId::new(3), NodeId::ROOT, "b.txt"),
    ];

    repo.serialize_all(&inodes).await.unwrap();

    assert!(repo.get_inode(NodeId::new(2)).await.unwrap().is_some());
    assert!(repo.get_inode(NodeId::new(3)).await.unwrap().is_some());
}

// ============================================================================
// Delta cursor tests
// ============================================================================

#[tokio::test]
async fn test_save_and_get_delta_cursor() {
    let repo = setup().await;
    let account = create_test_account(&repo).await;

    assert!(repo.get_delta_cursor(account.id()).await.unwrap().is_none());

    let token = DeltaToken::new("delta-abc".to_string()).unwrap();
    let cursor = DeltaCursor::from_token(token);
    repo.save_delta_cursor(account.id(), &cursor).await.unwrap();

    let retrieved = repo.get_delta_cursor(account.id()).await.unwrap().unwrap();
    assert_eq!(retrieved.token().unwrap().as_str(), "delta-abc");
    assert!(!retrieved.is_paging());
}

// ============================================================================
// Offline change tests
// ============================================================================

#[tokio::test]
async fn test_save_and_get_pending_offline_changes() {
    let repo = setup().await;
    let _account = create_test_account(&repo).await;

    let item_id = ItemId::new_local();
    let path = RemotePath::new("/notes.txt".to_string()).unwrap();
    let change = OfflineChange::new(item_id, path, OfflineChangeKind::Modify);

    repo.save_offline_change(&change).await.unwrap();

    let pending = repo.get_pending_offline_changes().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].is_pending());
}

#[tokio::test]
async fn test_delete_offline_change() {
    let repo = setup().await;
    let _account = create_test_account(&repo).await;

    let item_id = ItemId::new_local();
    let path = RemotePath::new("/notes.txt".to_string()).unwrap();
    let change = OfflineChange::new(item_id.clone(), path, OfflineChangeKind::Delete);
    let recorded_at = change.recorded_at();

    repo.save_offline_change(&change).await.unwrap();
    repo.delete_offline_change(&item_id, recorded_at)
        .await
        .unwrap();

    let pending = repo.get_pending_offline_changes().await.unwrap();
    assert!(pending.is_empty());
}

// ============================================================================
// Upload session tests
// ============================================================================

#[tokio::test]
async fn test_save_and_get_upload_session() {
    let repo = setup().await;
    let _account = create_test_account(&repo).await;

    let item_id = ItemId::new_local();
    let mut session = UploadSession::new(item_id.clone(), 4096, UploadPriority::Foreground);
    session.open_session("https://upload.example/session1");
    session.checkpoint(2048);

    repo.save_upload_session(&session).await.unwrap();

    let retrieved = repo.get_upload_session(&item_id).await.unwrap().unwrap();
    assert_eq!(retrieved.total_size(), 4096);
    assert_eq!(retrieved.bytes_uploaded(), 2048);
    assert_eq!(retrieved.upload_url(), Some("https://upload.example/session1"));
}

#[tokio::test]
async fn test_get_resumable_upload_sessions() {
    let repo = setup().await;
    let _account = create_test_account(&repo).await;

    let in_progress_id = ItemId::new_local();
    let mut in_progress = UploadSession::new(in_progress_id, 1024, UploadPriority::Background);
    in_progress.open_session("https://upload.example/in-progress");

    let completed_id = ItemId::new_local();
    let mut completed = UploadSession::new(completed_id, 1024, UploadPriority::Background);
    completed.open_session("https://upload.example/completed");
    completed.checkpoint(1024);
    completed.complete();

    repo.save_upload_session(&in_progress).await.unwrap();
    repo.save_upload_session(&completed).await.unwrap();

    let resumable = repo.get_resumable_upload_sessions().await.unwrap();
    assert_eq!(resumable.len(), 1);
}

#[tokio::test]
async fn test_delete_upload_session() {
    let repo = setup().await;
    let _account = create_test_account(&repo).await;

    let item_id = ItemId::new_local();
    let session = UploadSession::new(item_id.clone(), 1024, UploadPriority::Background);
    repo.save_upload_session(&session).await.unwrap();

    repo.delete_upload_session(&item_id).await.unwrap();
    assert!(repo.get_upload_session(&item_id).await.unwrap().is_none());
}

// ============================================================================
// Schema version tests
// ============================================================================

#[tokio::test]
async fn test_schema_version_roundtrip() {
    let repo = setup().await;

    repo.set_schema_version(3).await.unwrap();
    assert_eq!(repo.get_schema_version().await.unwrap(), Some(3));
}

// ============================================================================
// Audit tests
// ============================================================================

#[tokio::test]
async fn test_save_and_get_audit_trail() {
    let repo = setup().await;
    let _account = create_test_account(&repo).await;

    let item_id = ItemId::new_local();

    let entry1 = AuditEntry::new(AuditAction::FileDownload, AuditResult::success())
        .with_item_id(item_id.clone())
        .with_duration_ms(150);

    let entry2 = AuditEntry::new(
        AuditAction::Error,
        AuditResult::failed("NET_ERROR", "Connection timed out"),
    )
    .with_item_id(item_id.clone())
    .with_details(serde_json::json!({"retry_count": 3}));

    repo.save_audit(&entry1).await.unwrap();
    repo.save_audit(&entry2).await.unwrap();

    let trail = repo.get_audit_trail(&item_id).await.unwrap();
    assert_eq!(trail.len(), 2);

    assert_eq!(*trail[0].action(), AuditAction::FileDownload);
    assert_eq!(*trail[1].action(), AuditAction::Error);
    assert!(trail[0].result().is_success());
    assert!(trail[1].result().is_failed());
}

#[tokio::test]
async fn test_get_audit_since() {
    let repo = setup().await;

    let entry1 =
        AuditEntry::new(AuditAction::SyncStart, AuditResult::success()).with_duration_ms(100);
    let entry2 =
        AuditEntry::new(AuditAction::SyncComplete, AuditResult::success()).with_duration_ms(200);

    repo.save_audit(&entry1).await.unwrap();
    repo.save_audit(&entry2).await.unwrap();

    let since = Utc::now() - Duration::hours(1);
    let entries = repo.get_audit_since(since, 10).await.unwrap();
    assert_eq!(entries.len(), 2);
}

#[tokio::test]
async fn test_get_audit_since_with_limit() {
    let repo = setup().await;

    for i in 0..5 {
        let entry = AuditEntry::new(AuditAction::FileUpload, AuditResult::success())
            .with_details(serde_json::json!({"index": i}));
        repo.save_audit(&entry).await.unwrap();
    }

    let since = Utc::now() - Duration::hours(1);
    let entries = repo.get_audit_since(since, 3).await.unwrap();
    assert_eq!(entries.len(), 3);
}

#[tokio::test]
async fn test_audit_trail_for_nonexistent_item() {
    let repo = setup().await;
    let fake_id = ItemId::new_local();

    let trail = repo.get_audit_trail(&fake_id).await.unwrap();
    assert!(trail.is_empty());
}

// ============================================================================
// Conflict tests
// ============================================================================

#[tokio::test]
async fn test_save_and_get_unresolved_conflicts() {
    let repo = setup().await;
    let _account = create_test_account(&repo).await;

    let item_id = ItemId::new_local();

    let local_version = VersionInfo::new(
        FileHash::new(VALID_HASH_1.to_string()).unwrap(),
        1024,
        Utc::now(),
    );
    let remote_version = VersionInfo::new(
        FileHash::new(VALID_HASH_2.to_string()).unwrap(),
        1048,
        Utc::now(),
    );

    let conflict = Conflict::new(item_id.clone(), local_version, remote_version);
    repo.save_conflict(&conflict).await.unwrap();

    let unresolved = repo.get_unresolved_conflicts().await.unwrap();
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].item_id(), &item_id);
    assert!(!unresolved[0].is_resolved());
}

#[tokio::test]
async fn test_resolved_conflict_not_in_unresolved() {
    let repo = setup().await;
    let _account = create_test_account(&repo).await;

    let item_id = ItemId::new_local();

    let local_version = VersionInfo::new(
        FileHash::new(VALID_HASH_1.to_string()).unwrap(),
        1024,
        Utc::now(),
    );
    let remote_version = VersionInfo::new(
        FileHash::new(VALID_HASH_2.to_string()).unwrap(),
        1048,
        Utc::now(),
    );

    let conflict = Conflict::new(item_id, local_version, remote_version)
        .resolve(Resolution::KeepLocal, ResolutionSource::User);

    repo.save_conflict(&conflict).await.unwrap();

    let unresolved = repo.get_unresolved_conflicts().await.unwrap();
    assert_eq!(unresolved.len(), 0);
}

#[tokio::test]
async fn test_multiple_conflicts_ordering() {
    let repo = setup().await;
    let _account = create_test_account(&repo).await;

    let local_version1 = VersionInfo::new(
        FileHash::new(VALID_HASH_1.to_string()).unwrap(),
        1024,
        Utc::now(),
    );
    let remote_version1 = VersionInfo::new(
        FileHash::new(VALID_HASH_2.to_string()).unwrap(),
        1048,
        Utc::now(),
    );

    let local_version2 = VersionInfo::new(
        FileHash::new(VALID_HASH_1.to_string()).unwrap(),
        2048,
        Utc::now(),
    );
    let remote_version2 = VersionInfo::new(
        FileHash::new(VALID_HASH_2.to_string()).unwrap(),
        2096,
        Utc::now(),
    );

    let conflict1 = Conflict::new(ItemId::new_local(), local_version1, remote_version1);
    let conflict2 = Conflict::new(ItemId::new_local(), local_version2, remote_version2);

    repo.save_conflict(&conflict1).await.unwrap();
    repo.save_conflict(&conflict2).await.unwrap();

    let unresolved = repo.get_unresolved_conflicts().await.unwrap();
    assert_eq!(unresolved.len(), 2);
}

// ============================================================================
// Status count tests
// ============================================================================

#[tokio::test]
async fn test_count_items_by_status() {
    let repo = setup().await;
    let account = create_test_account(&repo).await;

    let synced = Inode::new_local_file(NodeId::new(2), NodeId::ROOT, "synced.txt");

    let mut modified = Inode::new_local_file(NodeId::new(3), NodeId::ROOT, "modified.txt");
    modified.mark_dirty();

    repo.save_inode(&synced).await.unwrap();
    repo.save_inode(&modified).await.unwrap();

    let local_version = VersionInfo::new(
        FileHash::new(VALID_HASH_1.to_string()).unwrap(),
        1024,
        Utc::now(),
    );
    let remote_version = VersionInfo::new(
        FileHash::new(VALID_HASH_2.to_string()).unwrap(),
        1048,
        Utc::now(),
    );
    let conflict = Conflict::new(synced.id().clone(), local_version, remote_version);
    repo.save_conflict(&conflict).await.unwrap();

    let counts = repo.count_items_by_status(account.id()).await.unwrap();
    assert_eq!(counts.get("conflicted"), Some(&1));
    assert_eq!(counts.get("modified"), Some(&1));
}

// ============================================================================
// Database pool tests
// ============================================================================

#[tokio::test]
async fn test_in_memory_pool_creation() {
    let pool = DatabasePool::in_memory().await;
    assert!(pool.is_ok());
}

#[tokio::test]
async fn test_file_based_pool_creation() {
    let temp_dir = std::env::temp_dir().join(format!("onemount_test_{}", Uuid::new_v4()));
    let db_path = temp_dir.join("test.db");

    let pool = DatabasePool::new(&db_path).await;
    assert!(pool.is_ok());

    let _ = std::fs::remove_dir_all(&temp_dir);
}

// ============================================================================
// Edge case tests
// ============================================================================

#[tokio::test]
async fn test_delete_nonexistent_inode() {
    let repo = setup().await;

    let result = repo.delete_inode_recursive(NodeId::new(999)).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_empty_query_results() {
    let repo = setup().await;

    let filter = InodeFilter::new().with_dirty(true);
    let results = repo.query_inodes(&filter).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_account_with_error_state() {
    let repo = setup().await;
    let mut account = {
        let email = Email::new("error@example.com".to_string()).unwrap();
        let sync_root = SyncPath::new(PathBuf::from("/home/user/OneDrive")).unwrap();
        Account::new(email, "Error User", "drive456", sync_root)
    };

    account.mark_error("API rate limited");
    repo.save_account(&account).await.unwrap();

    let retrieved = repo.get_account(account.id()).await.unwrap().unwrap();
    match retrieved.state() {
        AccountState::Error(msg) => assert_eq!(msg, "API rate limited"),
        other => panic!("Expected Error state, got: {:?}", other),
    }
}
