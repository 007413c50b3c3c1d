//! SQLite implementation of IStateRepository
//!
//! This module provides the concrete SQLite-based implementation of the
//! state repository port defined in onemount-core. It handles all domain
//! type serialization/deserialization and SQL query construction.
//!
//! ## Type Mapping
//!
//! | Domain Type              | SQL Type    | Strategy                          |
//! |---------------------------|-------------|-----------------------------------|
//! | AccountId, ConflictId     | TEXT        | UUID string via `.to_string()` / `FromStr` |
//! | ItemId                   | 2x TEXT     | `item_id_kind` ("remote"/"local") + `item_id_value` |
//! | NodeId                   | INTEGER     | `.as_u64()` / `NodeId::new()`     |
//! | SyncPath                 | TEXT        | Path string via `.to_string()` / `SyncPath::new()` |
//! | RemotePath, RemoteId      | TEXT        | String via `.as_str()` / `::new()`|
//! | FileHash, DeltaToken      | TEXT        | String via `.as_str()` / `::new()`|
//! | Email                    | TEXT        | String via `.as_str()` / `Email::new()` |
//! | DateTime<Utc>             | TEXT        | ISO 8601 via `to_rfc3339()` / `DateTime::parse_from_rfc3339()` |
//! | Inode, UploadSession, Conflict, AuditEntry | (multiple) | Reconstructed via `serde_json` since their fields are private |
//! | OfflineChangeKind         | TEXT        | serde_json serialization          |
//! | VersionInfo               | TEXT        | serde_json serialization          |

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use onemount_core::domain::{
    newtypes::{AccountId, Email, ItemId, NodeId, RemoteId, SyncPath},
    Account, AccountState, AuditAction, AuditEntry, AuditResult, Conflict, FileStatus, Inode,
    OfflineChange, OfflineChangeKind, ReplayOutcome, Resolution, ResolutionSource, StatusInputs,
    UploadPriority, UploadSession, UploadState, VersionInfo,
};
use onemount_core::ports::{IStateRepository, InodeFilter};

use crate::CacheError;

/// SQLite-based implementation of the state repository port
///
/// Provides persistent storage for all domain entities using SQLite.
/// All operations are performed through a connection pool for concurrency.
pub struct SqliteStateRepository {
    pool: SqlitePool,
}

impl SqliteStateRepository {
    /// Creates a new repository instance with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// ItemId <-> (kind, value) column mapping
// ============================================================================

/// Splits an `ItemId` into the `(kind, value)` pair stored in two columns.
fn item_id_columns(id: &ItemId) -> (&'static str, String) {
    match id {
        ItemId::Remote(remote) => ("remote", remote.as_str().to_string()),
        ItemId::Local(placeholder) => ("local", placeholder.clone()),
    }
}

/// Builds the `serde_json::Value` an `ItemId` round-trips through, matching
/// its `#[serde(tag = "kind", content = "value")]` representation.
fn item_id_to_json(kind: &str, value: &str) -> serde_json::Value {
    serde_json::json!({ "kind": kind, "value": value })
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

/// Serialize an `AccountState` to a string for storage
fn account_state_to_string(state: &AccountState) -> String {
    match state {
        AccountState::Active => "active".to_string(),
        AccountState::TokenExpired => "token_expired".to_string(),
        AccountState::Suspended => "suspended".to_string(),
        AccountState::Error(msg) => format!("error:{msg}"),
    }
}

/// Deserialize an `AccountState` from its stored string representation
fn account_state_from_string(s: &str) -> Result<AccountState, CacheError> {
    match s {
        "active" => Ok(AccountState::Active),
        "token_expired" => Ok(AccountState::TokenExpired),
        "suspended" => Ok(AccountState::Suspended),
        s if s.starts_with("error:") => Ok(AccountState::Error(s[6..].to_string())),
        other => Err(CacheError::SerializationError(format!(
            "Unknown account state: {other}"
        ))),
    }
}

/// Serialize an `UploadPriority` to a string for storage
fn upload_priority_to_string(priority: UploadPriority) -> &'static str {
    match priority {
        UploadPriority::Background => "background",
        UploadPriority::Foreground => "foreground",
    }
}

/// Deserialize an `UploadPriority` from its stored string representation
fn upload_priority_from_string(s: &str) -> Result<UploadPriority, CacheError> {
    match s {
        "background" => Ok(UploadPriority::Background),
        "foreground" => Ok(UploadPriority::Foreground),
        other => Err(CacheError::SerializationError(format!(
            "Unknown upload priority: {other}"
        ))),
    }
}

/// Serialize an `UploadState` to a string for storage
fn upload_state_to_string(state: &UploadState) -> String {
    match state {
        UploadState::Pending => "pending".to_string(),
        UploadState::InProgress => "in_progress".to_string(),
        UploadState::Completed => "completed".to_string(),
        UploadState::Conflicted => "conflicted".to_string(),
        UploadState::Failed(reason) => format!("failed:{reason}"),
    }
}

/// Deserialize an `UploadState` from its stored string representation
fn upload_state_from_string(s: &str) -> Result<UploadState, CacheError> {
    match s {
        "pending" => Ok(UploadState::Pending),
        "in_progress" => Ok(UploadState::InProgress),
        "completed" => Ok(UploadState::Completed),
        "conflicted" => Ok(UploadState::Conflicted),
        s if s.starts_with("failed:") => Ok(UploadState::Failed(s[7..].to_string())),
        other => Err(CacheError::SerializationError(format!(
            "Unknown upload state: {other}"
        ))),
    }
}

/// Serialize a `ReplayOutcome` to a string for storage
fn replay_outcome_to_string(outcome: &ReplayOutcome) -> String {
    match outcome {
        ReplayOutcome::Pending => "pending".to_string(),
        ReplayOutcome::Applied => "applied".to_string(),
        ReplayOutcome::Conflicted => "conflicted".to_string(),
        ReplayOutcome::Failed(reason) => format!("failed:{reason}"),
    }
}

/// Deserialize a `ReplayOutcome` from its stored string representation
fn replay_outcome_from_string(s: &str) -> Result<ReplayOutcome, CacheError> {
    match s {
        "pending" => Ok(ReplayOutcome::Pending),
        "applied" => Ok(ReplayOutcome::Applied),
        "conflicted" => Ok(ReplayOutcome::Conflicted),
        s if s.starts_with("failed:") => Ok(ReplayOutcome::Failed(s[7..].to_string())),
        other => Err(CacheError::SerializationError(format!(
            "Unknown replay outcome: {other}"
        ))),
    }
}

/// Parse a `DateTime<Utc>` from an ISO 8601 string
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
                .map(|ndt| ndt.and_utc())
        })
        .map_err(|e| CacheError::SerializationError(format!("Failed to parse datetime '{s}': {e}")))
}

/// Parse an optional `DateTime<Utc>` from an optional string
fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, CacheError> {
    match s {
        Some(ref val) if !val.is_empty() => parse_datetime(val).map(Some),
        _ => Ok(None),
    }
}

// ============================================================================
// Row mapping functions
// ============================================================================

/// Reconstructs an `Inode` from a database row.
///
/// Uses serde JSON deserialization since `Inode`'s fields are private and can
/// only be set through its constructors or mutators. The `children` index is
/// always reconstructed empty: it is a durable cache of the parent/name
/// relationship already expressed by the `parent` column, and callers rebuild
/// it on demand (via `query_inodes`/`get_child_inode`) rather than loading it
/// eagerly with every row.
fn inode_from_row(row: &SqliteRow) -> Result<Inode, CacheError> {
    let ino: i64 = row.get("ino");
    let item_id_kind: String = row.get("item_id_kind");
    let item_id_value: String = row.get("item_id_value");
    let parent: Option<i64> = row.get("parent");
    let name: String = row.get("name");
    let mode: i64 = row.get("mode");
    let size: i64 = row.get("size");
    let mtime_str: String = row.get("mtime");
    let etag: Option<String> = row.get("etag");
    let hash: Option<String> = row.get("hash");
    let dirty: bool = row.get("dirty");
    let children_loaded: bool = row.get("children_loaded");
    let deletion_pending: bool = row.get("deletion_pending");

    let mtime = parse_datetime(&mtime_str)?;

    let inode_json = serde_json::json!({
        "id": item_id_to_json(&item_id_kind, &item_id_value),
        "ino": ino as u64,
        "parent": parent.map(|p| p as u64),
        "name": name,
        "mode": mode as u32,
        "size": size as u64,
        "mtime": mtime.to_rfc3339(),
        "etag": etag,
        "hash": hash,
        "dirty": dirty,
        "children_loaded": children_loaded,
        "deletion_pending": deletion_pending,
        "children": serde_json::Value::Object(serde_json::Map::new()),
    });

    serde_json::from_value(inode_json)
        .map_err(|e| CacheError::SerializationError(format!("Failed to reconstruct Inode from row: {e}")))
}

/// Reconstructs an `Account` from a database row
fn account_from_row(row: &SqliteRow) -> Result<Account, CacheError> {
    let id_str: String = row.get("id");
    let email_str: String = row.get("email");
    let display_name: String = row.get("display_name");
    let onedrive_id: String = row.get("onedrive_id");
    let sync_root_str: String = row.get("sync_root");
    let quota_used: i64 = row.get("quota_used");
    let quota_total: i64 = row.get("quota_total");
    let delta_token_str: Option<String> = row.get("delta_token");
    let last_sync_str: Option<String> = row.get("last_sync");
    let state_str: String = row.get("state");
    let created_at_str: String = row.get("created_at");

    let id = AccountId::from_str(&id_str)
        .map_err(|e| CacheError::SerializationError(format!("Invalid AccountId '{id_str}': {e}")))?;
    let email = Email::new(email_str.clone())
        .map_err(|e| CacheError::SerializationError(format!("Invalid Email '{email_str}': {e}")))?;
    let sync_root = SyncPath::new(PathBuf::from(&sync_root_str)).map_err(|e| {
        CacheError::SerializationError(format!("Invalid SyncPath '{sync_root_str}': {e}"))
    })?;

    let created_at = parse_datetime(&created_at_str)?;
    let state = account_state_from_string(&state_str)?;
    let last_sync = parse_optional_datetime(last_sync_str)?;

    let mut account = Account::with_id(id, email, display_name, onedrive_id, sync_root, created_at);
    account.update_quota(quota_used as u64, quota_total as u64);
    account.set_state(state);

    if let Some(ts) = last_sync {
        account.record_sync(ts);
    }

    if let Some(token_str) = delta_token_str {
        if !token_str.is_empty() {
            if let Ok(token) = onemount_core::domain::newtypes::DeltaToken::new(token_str) {
                account.update_delta_token(token);
            }
        }
    }

    Ok(account)
}

/// Reconstructs an `AuditEntry` from a database row
fn audit_entry_from_row(row: &SqliteRow) -> Result<AuditEntry, CacheError> {
    let id: i64 = row.get("id");
    let timestamp_str: String = row.get("timestamp");
    let session_id_str: Option<String> = row.get("session_id");
    let item_id_kind: Option<String> = row.get("item_id_kind");
    let item_id_value: Option<String> = row.get("item_id_value");
    let action_str: String = row.get("action");
    let result_str: String = row.get("result");
    let details_str: String = row.get("details");
    let duration_ms: Option<i64> = row.get("duration_ms");

    let timestamp = parse_datetime(&timestamp_str)?;

    let action: AuditAction = serde_json::from_str(&format!("\"{action_str}\""))
        .map_err(|e| CacheError::SerializationError(format!("Invalid AuditAction '{action_str}': {e}")))?;
    let result: AuditResult = serde_json::from_str(&result_str)
        .map_err(|e| CacheError::SerializationError(format!("Invalid AuditResult '{result_str}': {e}")))?;
    let details: serde_json::Value = serde_json::from_str(&details_str).unwrap_or_default();

    let session_id_val = match session_id_str {
        Some(ref s) if !s.is_empty() => serde_json::Value::String(s.clone()),
        _ => serde_json::Value::Null,
    };

    let item_id_val = match (item_id_kind, item_id_value) {
        (Some(kind), Some(value)) => item_id_to_json(&kind, &value),
        _ => serde_json::Value::Null,
    };

    let duration_val = match duration_ms {
        Some(d) => serde_json::Value::Number(serde_json::Number::from(d as u64)),
        None => serde_json::Value::Null,
    };

    let entry_json = serde_json::json!({
        "id": id,
        "timestamp": timestamp.to_rfc3339(),
        "session_id": session_id_val,
        "item_id": item_id_val,
        "action": action,
        "result": result,
        "details": details,
        "duration_ms": duration_val,
    });

    serde_json::from_value(entry_json)
        .map_err(|e| CacheError::SerializationError(format!("Failed to reconstruct AuditEntry from row: {e}")))
}

/// Reconstructs a `Conflict` from a database row
fn conflict_from_row(row: &SqliteRow) -> Result<Conflict, CacheError> {
    let id_str: String = row.get("id");
    let item_id_kind: String = row.get("item_id_kind");
    let item_id_value: String = row.get("item_id_value");
    let detected_at_str: String = row.get("detected_at");
    let local_version_str: String = row.get("local_version");
    let remote_version_str: String = row.get("remote_version");
    let resolution_str: Option<String> = row.get("resolution");
    let resolved_at_str: Option<String> = row.get("resolved_at");
    let resolved_by_str: Option<String> = row.get("resolved_by");

    let detected_at = parse_datetime(&detected_at_str)?;

    let local_version: VersionInfo = serde_json::from_str(&local_version_str)
        .map_err(|e| CacheError::SerializationError(format!("Invalid VersionInfo JSON: {e}")))?;
    let remote_version: VersionInfo = serde_json::from_str(&remote_version_str)
        .map_err(|e| CacheError::SerializationError(format!("Invalid VersionInfo JSON: {e}")))?;

    let resolution_val = match &resolution_str {
        Some(s) if !s.is_empty() => {
            let r: Resolution = serde_json::from_str(&format!("\"{s}\""))
                .map_err(|e| CacheError::SerializationError(format!("Invalid Resolution '{s}': {e}")))?;
            Some(serde_json::to_value(&r).unwrap())
        }
        _ => None,
    };

    let resolved_at = parse_optional_datetime(resolved_at_str)?;

    let resolved_by_val = match &resolved_by_str {
        Some(s) if !s.is_empty() => {
            let rb: ResolutionSource = serde_json::from_str(&format!("\"{s}\""))
                .map_err(|e| CacheError::SerializationError(format!("Invalid ResolutionSource '{s}': {e}")))?;
            Some(serde_json::to_value(&rb).unwrap())
        }
        _ => None,
    };

    let conflict_json = serde_json::json!({
        "id": id_str,
        "item_id": item_id_to_json(&item_id_kind, &item_id_value),
        "detected_at": detected_at.to_rfc3339(),
        "local_version": local_version,
        "remote_version": remote_version,
        "resolution": resolution_val,
        "resolved_at": resolved_at.map(|dt| dt.to_rfc3339()),
        "resolved_by": resolved_by_val,
    });

    serde_json::from_value(conflict_json)
        .map_err(|e| CacheError::SerializationError(format!("Failed to reconstruct Conflict from row: {e}")))
}

/// Reconstructs an `UploadSession` from a database row
fn upload_session_from_row(row: &SqliteRow) -> Result<UploadSession, CacheError> {
    let item_id_kind: String = row.get("item_id_kind");
    let item_id_value: String = row.get("item_id_value");
    let total_size: i64 = row.get("total_size");
    let bytes_uploaded: i64 = row.get("bytes_uploaded");
    let chunk_size: i64 = row.get("chunk_size");
    let upload_url: Option<String> = row.get("upload_url");
    let priority_str: String = row.get("priority");
    let attempts: i64 = row.get("attempts");
    let if_match_etag: Option<String> = row.get("if_match_etag");
    let state_str: String = row.get("state");
    let created_at_str: String = row.get("created_at");
    let updated_at_str: String = row.get("updated_at");

    let priority = upload_priority_from_string(&priority_str)?;
    let state = upload_state_from_string(&state_str)?;
    let created_at = parse_datetime(&created_at_str)?;
    let updated_at = parse_datetime(&updated_at_str)?;

    let session_json = serde_json::json!({
        "item_id": item_id_to_json(&item_id_kind, &item_id_value),
        "total_size": total_size as u64,
        "bytes_uploaded": bytes_uploaded as u64,
        "chunk_size": chunk_size as u64,
        "upload_url": upload_url,
        "priority": priority,
        "attempts": attempts as u32,
        "if_match_etag": if_match_etag,
        "state": state,
        "created_at": created_at.to_rfc3339(),
        "updated_at": updated_at.to_rfc3339(),
    });

    serde_json::from_value(session_json).map_err(|e| {
        CacheError::SerializationError(format!("Failed to reconstruct UploadSession from row: {e}"))
    })
}

/// Reconstructs an `OfflineChange` from a database row
fn offline_change_from_row(row: &SqliteRow) -> Result<OfflineChange, CacheError> {
    let item_id_kind: String = row.get("item_id_kind");
    let item_id_value: String = row.get("item_id_value");
    let path_str: String = row.get("path");
    let kind_str: String = row.get("kind");
    let recorded_at_str: String = row.get("recorded_at");
    let outcome_str: String = row.get("outcome");

    let kind: OfflineChangeKind = serde_json::from_str(&kind_str)
        .map_err(|e| CacheError::SerializationError(format!("Invalid OfflineChangeKind JSON: {e}")))?;
    let recorded_at = parse_datetime(&recorded_at_str)?;
    let outcome = replay_outcome_from_string(&outcome_str)?;

    let change_json = serde_json::json!({
        "item_id": item_id_to_json(&item_id_kind, &item_id_value),
        "path": path_str,
        "kind": kind,
        "recorded_at": recorded_at.to_rfc3339(),
        "outcome": outcome,
    });

    serde_json::from_value(change_json).map_err(|e| {
        CacheError::SerializationError(format!("Failed to reconstruct OfflineChange from row: {e}"))
    })
}

/// Bucket name for a derived `FileStatus`, ignoring any payload (percent,
/// message) so rows with the same kind of status tally together.
fn status_bucket_name(status: &FileStatus) -> &'static str {
    match status {
        FileStatus::Cloud => "cloud",
        FileStatus::Synced => "synced",
        FileStatus::Modified => "modified",
        FileStatus::Downloading { .. } => "downloading",
        FileStatus::Uploading { .. } => "uploading",
        FileStatus::Conflicted => "conflicted",
        FileStatus::Error { .. } => "error",
    }
}

// ============================================================================
// IStateRepository implementation
// ============================================================================

#[async_trait::async_trait]
impl IStateRepository for SqliteStateRepository {
    // --- `metadata` bucket ---

    async fn save_inode(&self, inode: &Inode) -> anyhow::Result<()> {
        let (item_id_kind, item_id_value) = item_id_columns(inode.id());
        let ino = inode.ino().as_u64() as i64;
        let parent = inode.parent().map(|p| p.as_u64() as i64);
        let mode = inode.mode() as i64;
        let size = inode.size() as i64;
        let mtime = inode.mtime().to_rfc3339();
        let etag = inode.etag();
        let hash = inode.hash().map(|h| h.as_str());

        // Inode carries no account_id of its own; preserve the existing
        // row's account on update, or fall back to the default account for
        // a brand-new row.
        let existing_account_id: Option<String> =
            sqlx::query_scalar("SELECT account_id FROM inodes WHERE ino = ?")
                .bind(ino)
                .fetch_optional(&self.pool)
                .await?;

        let account_id = match existing_account_id {
            Some(aid) => aid,
            None => {
                let default_aid: Option<String> =
                    sqlx::query_scalar("SELECT id FROM accounts ORDER BY created_at ASC LIMIT 1")
                        .fetch_optional(&self.pool)
                        .await?;
                default_aid.ok_or_else(|| anyhow::anyhow!("No account found to associate with inode"))?
            }
        };

        sqlx::query(
            "INSERT OR REPLACE INTO inodes \
             (ino, item_id_kind, item_id_value, account_id, parent, name, mode, size, mtime, \
              etag, hash, dirty, children_loaded, deletion_pending, last_accessed) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, \
              COALESCE((SELECT last_accessed FROM inodes WHERE ino = ?), NULL))",
        )
        .bind(ino)
        .bind(item_id_kind)
        .bind(&item_id_value)
        .bind(&account_id)
        .bind(parent)
        .bind(inode.name())
        .bind(mode)
        .bind(size)
        .bind(&mtime)
        .bind(etag)
        .bind(hash)
        .bind(inode.is_dirty())
        .bind(inode.children_loaded())
        .bind(inode.deletion_pending())
        .bind(ino)
        .execute(&self.pool)
        .await?;

        tracing::trace!(ino = %ino, item_id = %item_id_value, "Saved inode");
        Ok(())
    }

    async fn get_inode(&self, ino: NodeId) -> anyhow::Result<Option<Inode>> {
        let row = sqlx::query("SELECT * FROM inodes WHERE ino = ?")
            .bind(ino.as_u64() as i64)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(inode_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_inode_by_item_id(&self, id: &ItemId) -> anyhow::Result<Option<Inode>> {
        let (kind, value) = item_id_columns(id);

        let row = sqlx::query("SELECT * FROM inodes WHERE item_id_kind = ? AND item_id_value = ?")
            .bind(kind)
            .bind(&value)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(inode_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_inode_by_remote_id(&self, remote_id: &RemoteId) -> anyhow::Result<Option<Inode>> {
        let row = sqlx::query("SELECT * FROM inodes WHERE item_id_kind = 'remote' AND item_id_value = ?")
            .bind(remote_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(inode_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_child_inode(&self, parent: NodeId, name: &str) -> anyhow::Result<Option<Inode>> {
        let row = sqlx::query("SELECT * FROM inodes WHERE parent = ? AND LOWER(name) = LOWER(?)")
            .bind(parent.as_u64() as i64)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(inode_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn query_inodes(&self, filter: &InodeFilter) -> anyhow::Result<Vec<Inode>> {
        let mut sql = String::from("SELECT * FROM inodes WHERE 1=1");
        let mut string_binds: Vec<String> = Vec::new();
        let mut int_binds: Vec<i64> = Vec::new();

        if let Some(ref account_id) = filter.account_id {
            sql.push_str(" AND account_id = ?");
            string_binds.push(account_id.to_string());
        }

        match filter.is_directory {
            Some(true) => sql.push_str(" AND (mode & 61440) = 16384"),
            Some(false) => sql.push_str(" AND (mode & 61440) != 16384"),
            None => {}
        }

        if let Some(dirty) = filter.dirty {
            sql.push_str(" AND dirty = ?");
            int_binds.push(i64::from(dirty));
        }

        if let Some(parent) = filter.parent {
            sql.push_str(" AND parent = ?");
            int_binds.push(parent.as_u64() as i64);
        }

        if let Some(ref modified_since) = filter.modified_since {
            sql.push_str(" AND mtime > ?");
            string_binds.push(modified_since.to_rfc3339());
        }

        let mut query = sqlx::query(&sql);
        for bind in &string_binds {
            query = query.bind(bind);
        }
        for bind in &int_binds {
            query = query.bind(bind);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(inode_from_row).map(|r| r.map_err(Into::into)).collect()
    }

    async fn delete_inode_recursive(&self, ino: NodeId) -> anyhow::Result<()> {
        sqlx::query(
            "WITH RECURSIVE descendants(ino) AS ( \
               SELECT ino FROM inodes WHERE ino = ? \
               UNION ALL \
               SELECT i.ino FROM inodes i JOIN descendants d ON i.parent = d.ino \
             ) \
             DELETE FROM inodes WHERE ino IN (SELECT ino FROM descendants)",
        )
        .bind(ino.as_u64() as i64)
        .execute(&self.pool)
        .await?;

        tracing::trace!(ino = %ino, "Deleted inode subtree");
        Ok(())
    }

    async fn allocate_inode(&self) -> anyhow::Result<NodeId> {
        let mut tx = self.pool.begin().await?;

        let next: i64 = sqlx::query_scalar("SELECT next_ino FROM inode_sequence WHERE id = 1")
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query("UPDATE inode_sequence SET next_ino = next_ino + 1 WHERE id = 1")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(NodeId::new(next as u64))
    }

    async fn serialize_all(&self, inodes: &[Inode]) -> anyhow::Result<()> {
        for inode in inodes {
            self.save_inode(inode).await?;
        }
        tracing::trace!(count = inodes.len(), "Flushed dirty inodes to storage");
        Ok(())
    }

    async fn get_items_for_dehydration(&self, max_age_days: u32, limit: u32) -> anyhow::Result<Vec<Inode>> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(max_age_days));

        let rows = sqlx::query(
            "SELECT * FROM inodes \
             WHERE (mode & 61440) != 16384 \
               AND (last_accessed IS NULL OR last_accessed < ?) \
             ORDER BY last_accessed ASC \
             LIMIT ?",
        )
        .bind(cutoff.to_rfc3339())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(inode_from_row).map(|r| r.map_err(Into::into)).collect()
    }

    async fn update_last_accessed(&self, ino: NodeId, accessed: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query("UPDATE inodes SET last_accessed = ? WHERE ino = ?")
            .bind(accessed.to_rfc3339())
            .bind(ino.as_u64() as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- `delta` bucket ---

    async fn get_delta_cursor(
        &self,
        account_id: &AccountId,
    ) -> anyhow::Result<Option<onemount_core::domain::DeltaCursor>> {
        let row = sqlx::query("SELECT token, paging, updated_at FROM delta_cursors WHERE account_id = ?")
            .bind(account_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else { return Ok(None) };

        let token_str: Option<String> = row.get("token");
        let paging: bool = row.get("paging");
        let updated_at: String = row.get("updated_at");

        let cursor_json = serde_json::json!({
            "token": token_str,
            "paging": paging,
            "updated_at": parse_datetime(&updated_at)?.to_rfc3339(),
        });

        let cursor = serde_json::from_value(cursor_json).map_err(|e| {
            CacheError::SerializationError(format!("Failed to reconstruct DeltaCursor from row: {e}"))
        })?;

        Ok(Some(cursor))
    }

    async fn save_delta_cursor(
        &self,
        account_id: &AccountId,
        cursor: &onemount_core::domain::DeltaCursor,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO delta_cursors (account_id, token, paging, updated_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(account_id.to_string())
        .bind(cursor.token().map(|t| t.as_str()))
        .bind(cursor.is_paging())
        .bind(cursor.updated_at().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // --- `offline_changes` bucket ---

    async fn save_offline_change(&self, change: &OfflineChange) -> anyhow::Result<()> {
        let (item_id_kind, item_id_value) = item_id_columns(change.item_id());
        let kind = serde_json::to_string(change.kind())
            .map_err(|e| anyhow::anyhow!("Failed to serialize offline change kind: {e}"))?;
        let outcome = replay_outcome_to_string(change.outcome());

        sqlx::query(
            "INSERT OR REPLACE INTO offline_changes \
             (item_id_kind, item_id_value, recorded_at, path, kind, outcome) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(item_id_kind)
        .bind(&item_id_value)
        .bind(change.recorded_at().to_rfc3339())
        .bind(change.path().as_str())
        .bind(&kind)
        .bind(&outcome)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_pending_offline_changes(&self) -> anyhow::Result<Vec<OfflineChange>> {
        let rows = sqlx::query("SELECT * FROM offline_changes WHERE outcome = 'pending' ORDER BY recorded_at ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(offline_change_from_row)
            .map(|r| r.map_err(Into::into))
            .collect()
    }

    async fn delete_offline_change(&self, item_id: &ItemId, recorded_at: DateTime<Utc>) -> anyhow::Result<()> {
        let (kind, value) = item_id_columns(item_id);

        sqlx::query(
            "DELETE FROM offline_changes \
             WHERE item_id_kind = ? AND item_id_value = ? AND recorded_at = ?",
        )
        .bind(kind)
        .bind(value)
        .bind(recorded_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // --- `uploads` bucket ---

    async fn save_upload_session(&self, session: &UploadSession) -> anyhow::Result<()> {
        let (item_id_kind, item_id_value) = item_id_columns(session.item_id());

        sqlx::query(
            "INSERT OR REPLACE INTO upload_sessions \
             (item_id_kind, item_id_value, total_size, bytes_uploaded, chunk_size, upload_url, \
              priority, attempts, if_match_etag, state, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, \
              COALESCE((SELECT created_at FROM upload_sessions WHERE item_id_kind = ? AND item_id_value = ?), ?), \
              ?)",
        )
        .bind(item_id_kind)
        .bind(&item_id_value)
        .bind(session.total_size() as i64)
        .bind(session.bytes_uploaded() as i64)
        .bind(session.chunk_size() as i64)
        .bind(session.upload_url())
        .bind(upload_priority_to_string(session.priority()))
        .bind(session.attempts() as i64)
        .bind(session.if_match_etag())
        .bind(upload_state_to_string(session.state()))
        .bind(item_id_kind)
        .bind(&item_id_value)
        .bind(Utc::now().to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_upload_session(&self, item_id: &ItemId) -> anyhow::Result<Option<UploadSession>> {
        let (kind, value) = item_id_columns(item_id);

        let row = sqlx::query(
            "SELECT * FROM upload_sessions WHERE item_id_kind = ? AND item_id_value = ?",
        )
        .bind(kind)
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(upload_session_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_resumable_upload_sessions(&self) -> anyhow::Result<Vec<UploadSession>> {
        let rows = sqlx::query(
            "SELECT * FROM upload_sessions WHERE state IN ('pending', 'in_progress')",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(upload_session_from_row)
            .map(|r| r.map_err(Into::into))
            .collect()
    }

    async fn delete_upload_session(&self, item_id: &ItemId) -> anyhow::Result<()> {
        let (kind, value) = item_id_columns(item_id);

        sqlx::query("DELETE FROM upload_sessions WHERE item_id_kind = ? AND item_id_value = ?")
            .bind(kind)
            .bind(value)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // --- `version` bucket ---

    async fn get_schema_version(&self) -> anyhow::Result<Option<u32>> {
        let version: Option<i64> = sqlx::query_scalar("SELECT version FROM schema_version WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        Ok(version.map(|v| v as u32))
    }

    async fn set_schema_version(&self, version: u32) -> anyhow::Result<()> {
        sqlx::query("INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?)")
            .bind(i64::from(version))
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // --- Account operations ---

    async fn save_account(&self, account: &Account) -> anyhow::Result<()> {
        let id = account.id().to_string();
        let email = account.email().as_str().to_string();
        let display_name = account.display_name().to_string();
        let onedrive_id = account.onedrive_id().to_string();
        let sync_root = account.sync_root().to_string();
        let quota_used = account.quota_used() as i64;
        let quota_total = account.quota_total() as i64;
        let delta_token = account.delta_token().map(|t| t.as_str().to_string());
        let last_sync = account.last_sync().map(|dt| dt.to_rfc3339());
        let state = account_state_to_string(account.state());
        let created_at = account.created_at().to_rfc3339();

        sqlx::query(
            "INSERT OR REPLACE INTO accounts \
             (id, email, display_name, onedrive_id, sync_root, \
              quota_used, quota_total, delta_token, last_sync, state, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&email)
        .bind(&display_name)
        .bind(&onedrive_id)
        .bind(&sync_root)
        .bind(quota_used)
        .bind(quota_total)
        .bind(&delta_token)
        .bind(&last_sync)
        .bind(&state)
        .bind(&created_at)
        .execute(&self.pool)
        .await?;

        tracing::trace!(account_id = %id, "Saved account");
        Ok(())
    }

    async fn get_account(&self, id: &AccountId) -> anyhow::Result<Option<Account>> {
        let row = sqlx::query("SELECT * FROM accounts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(account_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_default_account(&self) -> anyhow::Result<Option<Account>> {
        let row = sqlx::query("SELECT * FROM accounts ORDER BY created_at ASC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(account_from_row(r)?)),
            None => Ok(None),
        }
    }

    // --- Audit operations ---

    async fn save_audit(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        let timestamp = entry.timestamp().to_rfc3339();
        let session_id = entry.session_id().map(|s| s.to_string());
        let (item_id_kind, item_id_value) = match entry.item_id() {
            Some(id) => {
                let (k, v) = item_id_columns(id);
                (Some(k.to_string()), Some(v))
            }
            None => (None, None),
        };
        let action = entry.action().to_string();
        let result = serde_json::to_string(entry.result())
            .map_err(|e| anyhow::anyhow!("Failed to serialize audit result: {e}"))?;
        let details = serde_json::to_string(entry.details())
            .map_err(|e| anyhow::anyhow!("Failed to serialize audit details: {e}"))?;
        let duration_ms = entry.duration_ms().map(|d| d as i64);

        sqlx::query(
            "INSERT INTO audit_log \
             (timestamp, session_id, item_id_kind, item_id_value, action, result, details, duration_ms) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&timestamp)
        .bind(&session_id)
        .bind(&item_id_kind)
        .bind(&item_id_value)
        .bind(&action)
        .bind(&result)
        .bind(&details)
        .bind(duration_ms)
        .execute(&self.pool)
        .await?;

        tracing::trace!(action = %action, "Saved audit entry");
        Ok(())
    }

    async fn get_audit_trail(&self, item_id: &ItemId) -> anyhow::Result<Vec<AuditEntry>> {
        let (kind, value) = item_id_columns(item_id);

        let rows = sqlx::query(
            "SELECT * FROM audit_log WHERE item_id_kind = ? AND item_id_value = ? ORDER BY timestamp ASC",
        )
        .bind(kind)
        .bind(value)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(audit_entry_from_row).map(|r| r.map_err(Into::into)).collect()
    }

    async fn get_audit_since(&self, since: DateTime<Utc>, limit: u32) -> anyhow::Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM audit_log WHERE timestamp > ? ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(since.to_rfc3339())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(audit_entry_from_row).map(|r| r.map_err(Into::into)).collect()
    }

    // --- Conflict operations ---

    async fn save_conflict(&self, conflict: &Conflict) -> anyhow::Result<()> {
        let id = conflict.id().to_string();
        let (item_id_kind, item_id_value) = item_id_columns(conflict.item_id());
        let detected_at = conflict.detected_at().to_rfc3339();
        let local_version = serde_json::to_string(conflict.local_version())
            .map_err(|e| anyhow::anyhow!("Failed to serialize local_version: {e}"))?;
        let remote_version = serde_json::to_string(conflict.remote_version())
            .map_err(|e| anyhow::anyhow!("Failed to serialize remote_version: {e}"))?;

        let resolution = conflict.resolution().map(|r| {
            serde_json::to_string(r).unwrap_or_default().trim_matches('"').to_string()
        });
        let resolved_at = conflict.resolved_at().map(|dt| dt.to_rfc3339());
        let resolved_by = conflict.resolved_by().map(|rb| {
            serde_json::to_string(rb).unwrap_or_default().trim_matches('"').to_string()
        });

        sqlx::query(
            "INSERT OR REPLACE INTO conflicts \
             (id, item_id_kind, item_id_value, detected_at, local_version, remote_version, \
              resolution, resolved_at, resolved_by) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(item_id_kind)
        .bind(&item_id_value)
        .bind(&detected_at)
        .bind(&local_version)
        .bind(&remote_version)
        .bind(&resolution)
        .bind(&resolved_at)
        .bind(&resolved_by)
        .execute(&self.pool)
        .await?;

        tracing::trace!(conflict_id = %id, "Saved conflict");
        Ok(())
    }

    async fn get_unresolved_conflicts(&self) -> anyhow::Result<Vec<Conflict>> {
        let rows = sqlx::query("SELECT * FROM conflicts WHERE resolution IS NULL ORDER BY detected_at DESC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(conflict_from_row).map(|r| r.map_err(Into::into)).collect()
    }

    async fn count_items_by_status(&self, account_id: &AccountId) -> anyhow::Result<HashMap<String, u64>> {
        // Content presence on disk is tracked by the content store adapter,
        // not here, so this count cannot distinguish `Cloud` from `Synced`
        // for items with no other activity; both land in "synced".
        let rows = sqlx::query(
            "SELECT i.dirty AS dirty, \
                    (c.id IS NOT NULL) AS conflicted, \
                    u.state AS upload_state \
             FROM inodes i \
             LEFT JOIN conflicts c \
               ON c.item_id_kind = i.item_id_kind AND c.item_id_value = i.item_id_value \
              AND c.resolution IS NULL \
             LEFT JOIN upload_sessions u \
               ON u.item_id_kind = i.item_id_kind AND u.item_id_value = i.item_id_value \
             WHERE i.account_id = ?",
        )
        .bind(account_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut counts: HashMap<String, u64> = HashMap::new();
        for row in &rows {
            let dirty: bool = row.get("dirty");
            let conflicted: bool = row.get("conflicted");
            let upload_state: Option<String> = row.get("upload_state");

            let (upload_percent, error_message) = match upload_state.as_deref() {
                Some("in_progress") => (Some(0), None),
                Some(s) if s.starts_with("failed:") => (None, Some(s[7..].to_string())),
                _ => (None, None),
            };

            let inputs = StatusInputs {
                dirty,
                conflicted,
                download_percent: None,
                upload_percent,
                error_message,
                content_absent: false,
            };

            let status = FileStatus::derive(&inputs);
            *counts.entry(status_bucket_name(&status).to_string()).or_insert(0) += 1;
        }

        Ok(counts)
    }
}
