//! File status domain entity
//!
//! `FileStatus` is the small, derived-not-stored summary surfaced to users
//! through the `user.onemount.status` xattr and the D-Bus `FileStatusChanged`
//! signal. It is recomputed on demand from an item's transient state (is it
//! mid-download, mid-upload, dirty, conflicted, erroring) rather than
//! persisted itself — persisting a derived value would let it drift from the
//! state it summarizes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The externally-visible synchronization status of one item.
///
/// Variants are listed in ascending derivation priority: when more than one
/// condition applies simultaneously (e.g. a conflicted item that is also
/// mid-download), [`FileStatus::derive`] returns the highest-priority one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FileStatus {
    /// Known to the cloud, content not present on disk.
    Cloud,
    /// Fully hydrated and matching the last known remote version.
    Synced,
    /// Local content has changed and has not yet been uploaded.
    Modified,
    /// Content is being downloaded.
    Downloading {
        /// Percentage complete, 0-100.
        percent: u8,
    },
    /// Local content is being uploaded.
    Uploading {
        /// Percentage complete, 0-100.
        percent: u8,
    },
    /// Local and remote versions diverged and await resolution.
    Conflicted,
    /// The last operation on this item failed.
    Error {
        /// Human-readable error message.
        message: String,
    },
}

/// Inputs used to derive an item's externally-visible status.
///
/// All fields describe independently-observable, transient facts about an
/// item; `derive` combines them into the single status that matters most to
/// a user at this instant.
#[derive(Debug, Clone, Default)]
pub struct StatusInputs {
    /// True if local content differs from the last synced version.
    pub dirty: bool,
    /// True if the item has an unresolved conflict.
    pub conflicted: bool,
    /// `Some(percent)` while content is being downloaded.
    pub download_percent: Option<u8>,
    /// `Some(percent)` while content is being uploaded.
    pub upload_percent: Option<u8>,
    /// `Some(message)` if the last operation on this item failed.
    pub error_message: Option<String>,
    /// True if the item's content has never been hydrated to disk.
    pub content_absent: bool,
}

impl FileStatus {
    /// Derives the externally-visible status from its transient inputs,
    /// applying fixed priority: error, then conflict, then in-flight
    /// transfer, then dirty/absent/synced.
    #[must_use]
    pub fn derive(inputs: &StatusInputs) -> Self {
        if let Some(message) = &inputs.error_message {
            return FileStatus::Error {
                message: message.clone(),
            };
        }
        if inputs.conflicted {
            return FileStatus::Conflicted;
        }
        if let Some(percent) = inputs.upload_percent {
            return FileStatus::Uploading { percent };
        }
        if let Some(percent) = inputs.download_percent {
            return FileStatus::Downloading { percent };
        }
        if inputs.dirty {
            return FileStatus::Modified;
        }
        if inputs.content_absent {
            return FileStatus::Cloud;
        }
        FileStatus::Synced
    }

    /// Returns the compact string written to the `user.onemount.status`
    /// extended attribute and broadcast in `FileStatusChanged`.
    #[must_use]
    pub fn as_xattr_value(&self) -> String {
        match self {
            FileStatus::Cloud => "cloud".to_string(),
            FileStatus::Synced => "synced".to_string(),
            FileStatus::Modified => "modified".to_string(),
            FileStatus::Downloading { percent } => format!("downloading:{percent}"),
            FileStatus::Uploading { percent } => format!("uploading:{percent}"),
            FileStatus::Conflicted => "conflicted".to_string(),
            FileStatus::Error { message } => format!("error:{message}"),
        }
    }

    /// Returns true if this status represents an active transfer.
    #[must_use]
    pub fn is_transferring(&self) -> bool {
        matches!(
            self,
            FileStatus::Downloading { .. } | FileStatus::Uploading { .. }
        )
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_xattr_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_defaults_to_synced() {
        let inputs = StatusInputs::default();
        assert_eq!(FileStatus::derive(&inputs), FileStatus::Synced);
    }

    #[test]
    fn test_derive_content_absent_is_cloud() {
        let inputs = StatusInputs {
            content_absent: true,
            ..Default::default()
        };
        assert_eq!(FileStatus::derive(&inputs), FileStatus::Cloud);
    }

    #[test]
    fn test_derive_dirty_is_modified() {
        let inputs = StatusInputs {
            dirty: true,
            ..Default::default()
        };
        assert_eq!(FileStatus::derive(&inputs), FileStatus::Modified);
    }

    #[test]
    fn test_derive_error_beats_everything() {
        let inputs = StatusInputs {
            dirty: true,
            conflicted: true,
            download_percent: Some(50),
            upload_percent: Some(10),
            error_message: Some("disk full".to_string()),
            content_absent: true,
        };
        assert_eq!(
            FileStatus::derive(&inputs),
            FileStatus::Error {
                message: "disk full".to_string()
            }
        );
    }

    #[test]
    fn test_derive_conflict_beats_transfer_and_dirty() {
        let inputs = StatusInputs {
            dirty: true,
            conflicted: true,
            download_percent: Some(50),
            ..Default::default()
        };
        assert_eq!(FileStatus::derive(&inputs), FileStatus::Conflicted);
    }

    #[test]
    fn test_derive_upload_beats_download_and_dirty() {
        let inputs = StatusInputs {
            dirty: true,
            upload_percent: Some(30),
            download_percent: Some(80),
            ..Default::default()
        };
        assert_eq!(
            FileStatus::derive(&inputs),
            FileStatus::Uploading { percent: 30 }
        );
    }

    #[test]
    fn test_xattr_value_format() {
        assert_eq!(FileStatus::Cloud.as_xattr_value(), "cloud");
        assert_eq!(
            FileStatus::Downloading { percent: 42 }.as_xattr_value(),
            "downloading:42"
        );
        assert_eq!(
            FileStatus::Error {
                message: "timeout".to_string()
            }
            .as_xattr_value(),
            "error:timeout"
        );
    }

    #[test]
    fn test_is_transferring() {
        assert!(FileStatus::Downloading { percent: 1 }.is_transferring());
        assert!(FileStatus::Uploading { percent: 1 }.is_transferring());
        assert!(!FileStatus::Synced.is_transferring());
    }

    #[test]
    fn test_serde_roundtrip() {
        let status = FileStatus::Downloading { percent: 77 };
        let json = serde_json::to_string(&status).unwrap();
        let parsed: FileStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(status, parsed);
    }
}
