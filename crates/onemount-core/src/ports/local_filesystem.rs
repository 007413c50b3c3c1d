//! Local filesystem port (driven/secondary port)
//!
//! This module defines the interface for interacting with the local
//! filesystem: reading/writing content-store files and computing hashes.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because filesystem errors are adapter-specific.
//! - Local writes are observed directly as FUSE `write` calls (see
//!   `onemount-fuse`), not through a separate filesystem watcher, so this
//!   port has no watch/observer surface.

use chrono::{DateTime, Utc};

use crate::domain::newtypes::{FileHash, SyncPath};

// ============================================================================
// T055: FileSystemState struct
// ============================================================================

/// Snapshot of a file's state on the local filesystem
///
/// Captures essential metadata about a file or directory at a point in time,
/// used for determining what has changed and whether a file is safe to modify.
#[derive(Debug, Clone)]
pub struct FileSystemState {
    /// Whether the file/directory exists on disk
    pub exists: bool,
    /// Whether this is a regular file (false for directories and other types)
    pub is_file: bool,
    /// Size in bytes (0 for directories or non-existent files)
    pub size: u64,
    /// Last modification time (None if not available or file doesn't exist)
    pub modified: Option<DateTime<Utc>>,
    /// Whether the file is currently locked by another process
    pub is_locked: bool,
}

impl FileSystemState {
    /// Returns a state representing a non-existent path
    pub fn not_found() -> Self {
        Self {
            exists: false,
            is_file: false,
            size: 0,
            modified: None,
            is_locked: false,
        }
    }

    /// Returns true if the file exists and is a regular file
    pub fn is_regular_file(&self) -> bool {
        self.exists && self.is_file
    }

    /// Returns true if the file exists and is a directory
    pub fn is_directory(&self) -> bool {
        self.exists && !self.is_file
    }
}

// ============================================================================
// ILocalFileSystem trait
// ============================================================================

/// Port trait for local filesystem operations
///
/// This is the interface for all local filesystem interactions, including
/// file I/O, directory management, hash computation, and change watching.
///
/// ## Implementation Notes
///
/// - All paths are `SyncPath` instances, which are guaranteed to be absolute.
/// - `compute_hash` should produce a quickXorHash compatible with OneDrive
///   for efficient comparison of local and remote file contents.
/// - `watch` returns a `WatchHandle` that, when dropped, stops watching.
/// - Implementations should handle concurrent access gracefully.
#[async_trait::async_trait]
pub trait ILocalFileSystem: Send + Sync {
    /// Reads the entire contents of a file
    ///
    /// # Arguments
    /// * `path` - Absolute path to the file
    ///
    /// # Returns
    /// The file contents as a byte vector
    ///
    /// # Errors
    /// Returns an error if the file doesn't exist or cannot be read
    async fn read_file(&self, path: &SyncPath) -> anyhow::Result<Vec<u8>>;

    /// Writes data to a file, creating it if necessary
    ///
    /// If the file already exists, its contents are replaced.
    /// Parent directories are NOT automatically created.
    ///
    /// # Arguments
    /// * `path` - Absolute path to the file
    /// * `data` - The data to write
    async fn write_file(&self, path: &SyncPath, data: &[u8]) -> anyhow::Result<()>;

    /// Deletes a file from the filesystem
    ///
    /// # Arguments
    /// * `path` - Absolute path to the file to delete
    ///
    /// # Errors
    /// Returns an error if the file doesn't exist or cannot be deleted
    async fn delete_file(&self, path: &SyncPath) -> anyhow::Result<()>;

    /// Gets the current state of a file or directory
    ///
    /// Returns `FileSystemState::not_found()` if the path doesn't exist
    /// (does not return an error for missing paths).
    ///
    /// # Arguments
    /// * `path` - Absolute path to check
    async fn get_state(&self, path: &SyncPath) -> anyhow::Result<FileSystemState>;

    /// Computes the quickXorHash of a file
    ///
    /// The hash is compatible with OneDrive's quickXorHash algorithm
    /// for comparing local and remote file integrity.
    ///
    /// # Arguments
    /// * `path` - Absolute path to the file
    ///
    /// # Errors
    /// Returns an error if the file doesn't exist or cannot be read
    async fn compute_hash(&self, path: &SyncPath) -> anyhow::Result<FileHash>;

    /// Creates a directory and all parent directories as needed
    ///
    /// This is equivalent to `mkdir -p` behavior.
    ///
    /// # Arguments
    /// * `path` - Absolute path to the directory to create
    async fn create_directory(&self, path: &SyncPath) -> anyhow::Result<()>;
}
