//! Conflict detection logic
//!
//! Determines whether a remote change conflicts with local modifications
//! by comparing content hashes.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use onemount_core::domain::{
    conflict::{Conflict, Resolution, VersionInfo},
    newtypes::FileHash,
    Inode,
};

use crate::policy::PolicyEngine;

/// Result of conflict detection check
#[derive(Debug, Clone)]
pub enum DetectionResult {
    /// No conflict: safe to apply the remote change
    NoConflict,
    /// Conflict detected: both versions changed
    Conflicted(Box<Conflict>),
}

/// Detects conflicts between local and remote file versions
pub struct ConflictDetector;

impl ConflictDetector {
    /// Checks if a remote update conflicts with the local state
    ///
    /// A conflict exists when:
    /// 1. The inode is dirty (local changes pending upload), AND
    /// 2. The remote content hash differs from the inode's stored hash
    ///    (remote also changed)
    ///
    /// Returns `DetectionResult::Conflicted` with a new `Conflict` entity
    /// if both sides changed, or `DetectionResult::NoConflict` otherwise.
    pub fn check_remote_update(
        existing: &Inode,
        remote_hash: Option<&str>,
        remote_size: Option<u64>,
        remote_modified: Option<DateTime<Utc>>,
        remote_etag: Option<&str>,
    ) -> DetectionResult {
        // Only check for conflicts if the inode has local modifications
        if !existing.is_dirty() {
            return DetectionResult::NoConflict;
        }

        // Without a hash on both sides there's nothing to compare
        let (Some(local_hash), Some(remote_hash_str)) = (existing.hash(), remote_hash) else {
            return DetectionResult::NoConflict;
        };

        if local_hash.as_str() == remote_hash_str {
            debug!(item_id = %existing.id(), "Remote hash matches stored hash, no conflict");
            return DetectionResult::NoConflict;
        }

        let Ok(remote_file_hash) = FileHash::new(remote_hash_str.to_string()) else {
            return DetectionResult::NoConflict;
        };

        info!(
            item_id = %existing.id(),
            local_hash = %local_hash.as_str(),
            remote_hash = %remote_hash_str,
            "Conflict detected: both local and remote versions changed"
        );

        let local_version = build_local_version(existing, local_hash.clone());
        let remote_version = build_remote_version(
            remote_file_hash,
            remote_size.unwrap_or(0),
            remote_modified.unwrap_or_else(Utc::now),
            remote_etag,
        );

        let conflict = Conflict::new(existing.id().clone(), local_version, remote_version);
        DetectionResult::Conflicted(Box::new(conflict))
    }

    /// Checks if a local update conflicts with a known remote change
    ///
    /// This is the reverse direction: before uploading a local change,
    /// verify the remote hasn't also changed (e.g., via a concurrent delta).
    pub fn check_local_update(existing: &Inode, current_remote_hash: Option<&str>) -> bool {
        match (existing.hash(), current_remote_hash) {
            (Some(stored), Some(remote)) => {
                if stored.as_str() != remote {
                    info!(
                        item_id = %existing.id(),
                        "Remote changed since last sync, potential conflict on local upload"
                    );
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// Determines whether a conflict should be auto-resolved via policy
    ///
    /// Returns `Some(Resolution)` if the policy engine has a non-Manual
    /// resolution for this file path.
    pub fn should_auto_resolve(policy: &PolicyEngine, relative_path: &str) -> Option<Resolution> {
        let resolution = policy.evaluate(relative_path);
        if matches!(resolution, Resolution::Manual) {
            None
        } else {
            Some(resolution)
        }
    }
}

fn build_local_version(item: &Inode, hash: FileHash) -> VersionInfo {
    let version = VersionInfo::new(hash, item.size(), item.mtime());
    match item.etag() {
        Some(etag) => version.with_etag(etag),
        None => version,
    }
}

fn build_remote_version(
    hash: FileHash,
    size: u64,
    modified: DateTime<Utc>,
    etag: Option<&str>,
) -> VersionInfo {
    let version = VersionInfo::new(hash, size, modified);
    match etag {
        Some(etag) => version.with_etag(etag),
        None => version,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onemount_core::domain::newtypes::{ItemId, NodeId};

    const HASH_A: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAA=";
    const HASH_B: &str = "BBBBBBBBBBBBBBBBBBBBBBBBBBB=";

    fn create_test_item(dirty: bool, content_hash: Option<&str>) -> Inode {
        let hash = content_hash.map(|h| FileHash::new(h.to_string()).expect("valid test hash"));
        let mut item = Inode::from_remote(
            ItemId::new_local(),
            NodeId::new(2),
            NodeId::ROOT,
            "test.txt",
            false,
            1024,
            Utc::now(),
            Some("\"etag1\"".to_string()),
            hash,
        );
        if dirty {
            item.mark_dirty();
        }
        item
    }

    #[test]
    fn test_no_conflict_when_not_modified() {
        let item = create_test_item(false, Some(HASH_A));

        let result =
            ConflictDetector::check_remote_update(&item, Some(HASH_B), Some(1024), None, None);

        assert!(matches!(result, DetectionResult::NoConflict));
    }

    #[test]
    fn test_no_conflict_when_remote_hash_matches() {
        let item = create_test_item(true, Some(HASH_A));

        let result =
            ConflictDetector::check_remote_update(&item, Some(HASH_A), Some(1024), None, None);

        assert!(matches!(result, DetectionResult::NoConflict));
    }

    #[test]
    fn test_conflict_when_both_changed() {
        let item = create_test_item(true, Some(HASH_A));

        let result =
            ConflictDetector::check_remote_update(&item, Some(HASH_B), Some(2048), None, None);

        match result {
            DetectionResult::Conflicted(conflict) => {
                assert_eq!(conflict.item_id(), item.id());
                assert!(!conflict.is_resolved());
                assert_eq!(conflict.local_version().hash().as_str(), HASH_A);
                assert_eq!(conflict.remote_version().hash().as_str(), HASH_B);
            }
            DetectionResult::NoConflict => panic!("Expected conflict"),
        }
    }

    #[test]
    fn test_no_conflict_when_no_remote_hash() {
        let item = create_test_item(true, Some(HASH_A));

        let result = ConflictDetector::check_remote_update(&item, None, Some(1024), None, None);

        assert!(matches!(result, DetectionResult::NoConflict));
    }

    #[test]
    fn test_no_conflict_when_no_local_hash() {
        let item = create_test_item(true, None);

        let result = ConflictDetector::check_remote_update(&item, Some(HASH_B), None, None, None);

        assert!(matches!(result, DetectionResult::NoConflict));
    }

    #[test]
    fn test_check_local_update_no_conflict() {
        let item = create_test_item(false, Some(HASH_A));

        assert!(!ConflictDetector::check_local_update(&item, Some(HASH_A)));
    }

    #[test]
    fn test_check_local_update_conflict() {
        let item = create_test_item(false, Some(HASH_A));

        assert!(ConflictDetector::check_local_update(&item, Some(HASH_B)));
    }

    #[test]
    fn test_should_auto_resolve_manual() {
        let policy = PolicyEngine::new("manual", &[]);

        assert!(ConflictDetector::should_auto_resolve(&policy, "test.txt").is_none());
    }

    #[test]
    fn test_should_auto_resolve_with_policy() {
        use crate::policy::ConflictRule;

        let rules = vec![ConflictRule {
            pattern: "**/*.docx".to_string(),
            strategy: "keep_both".to_string(),
        }];
        let policy = PolicyEngine::new("manual", &rules);

        let result = ConflictDetector::should_auto_resolve(&policy, "report.docx");
        assert_eq!(result, Some(Resolution::KeepBoth));

        let result = ConflictDetector::should_auto_resolve(&policy, "report.txt");
        assert!(result.is_none());
    }
}
