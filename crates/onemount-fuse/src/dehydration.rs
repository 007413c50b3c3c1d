//! Space reclamation through file dehydration.
//!
//! Provides `DehydrationManager` for converting fully-hydrated files back
//! to dehydrated placeholders to free local disk space.
//!
//! ## Dehydration Policy
//!
//! Files are candidates for dehydration when:
//! - Content is cached on disk (content-absent items have nothing to remove)
//! - `last_accessed` is older than `max_age_days`
//! - No open file handles
//!
//! Dehydration is triggered when cache disk usage exceeds the threshold.
//! Dehydrating an item never touches its metadata row: presence of content
//! on disk is derived from the content cache, not stored in the database.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │  DehydrationManager │
//! │                     │
//! │  policy: Policy     │
//! │  cache: ContentCache│
//! │  inode_table: Arc   │
//! │  db_pool            │
//! └─────────────────────┘
//!           │
//!           │ run_sweep() every N minutes
//!           ▼
//! ┌─────────────────────┐
//! │  1. Check usage     │ ─── if < threshold, skip
//! │  2. Query DB        │ ─── get_items_for_dehydration()
//! │  3. For each item:  │
//! │     - Check handles │ ─── skip if open
//! │     - Remove cache  │ ─── cache.remove()
//! └─────────────────────┘
//! ```

use std::sync::Arc;

use onemount_cache::pool::DatabasePool;
use onemount_core::config::FuseConfig;
use tokio::{sync::RwLock, task::JoinHandle, time};
use tracing::{debug, error, info, warn};

use crate::{cache::ContentCache, error::FuseError, inode::InodeTable};

// ============================================================================
// T079: DehydrationPolicy struct
// ============================================================================

/// Policy configuration for automatic dehydration.
///
/// Determines when and how dehydration sweeps occur.
#[derive(Debug, Clone)]
pub struct DehydrationPolicy {
    /// Maximum cache size in bytes.
    pub cache_max_bytes: u64,
    /// Percentage of cache_max_bytes that triggers dehydration (0-100).
    pub threshold_percent: u8,
    /// Maximum age in days before a cached file becomes eligible for dehydration.
    pub max_age_days: u32,
    /// Interval in minutes between dehydration background tasks.
    pub interval_minutes: u32,
}

impl DehydrationPolicy {
    /// Create a policy from FUSE configuration.
    ///
    /// Converts `cache_max_size_gb` to bytes and copies other fields.
    pub fn from_config(config: &FuseConfig) -> Self {
        Self {
            cache_max_bytes: (config.cache_max_size_gb as u64) * 1024 * 1024 * 1024,
            threshold_percent: config.dehydration_threshold_percent,
            max_age_days: config.dehydration_max_age_days,
            interval_minutes: config.dehydration_interval_minutes,
        }
    }

    /// Calculate the threshold in bytes that triggers dehydration.
    pub fn threshold_bytes(&self) -> u64 {
        (self.cache_max_bytes * self.threshold_percent as u64) / 100
    }
}

impl Default for DehydrationPolicy {
    fn default() -> Self {
        Self {
            cache_max_bytes: 10 * 1024 * 1024 * 1024, // 10 GB
            threshold_percent: 80,
            max_age_days: 30,
            interval_minutes: 60,
        }
    }
}

// ============================================================================
// T080: DehydrationManager struct
// ============================================================================

/// Report of a dehydration operation.
#[derive(Debug, Clone, Default)]
pub struct DehydrationReport {
    /// Number of files successfully dehydrated.
    pub dehydrated_count: usize,
    /// Total bytes freed by dehydration.
    pub bytes_freed: u64,
    /// Number of files skipped (open handles, wrong state, etc.).
    pub skipped_count: usize,
    /// Number of errors encountered.
    pub error_count: usize,
    /// Error messages for failed items.
    pub errors: Vec<String>,
}

impl DehydrationReport {
    /// Merge another report into this one.
    pub fn merge(&mut self, other: DehydrationReport) {
        self.dehydrated_count += other.dehydrated_count;
        self.bytes_freed += other.bytes_freed;
        self.skipped_count += other.skipped_count;
        self.error_count += other.error_count;
        self.errors.extend(other.errors);
    }
}

/// Manages automatic dehydration of cached files to reclaim disk space.
///
/// Periodically sweeps the cache and removes content for files that:
/// - Have content cached on disk
/// - Haven't been accessed recently
/// - Don't have open file handles
pub struct DehydrationManager {
    /// Policy for dehydration decisions.
    policy: DehydrationPolicy,
    /// Content cache for storing/removing file data.
    cache: Arc<ContentCache>,
    /// Inode table for checking open handles.
    inode_table: Arc<InodeTable>,
    /// Database pool for querying candidates.
    db_pool: DatabasePool,
    /// Flag to signal shutdown.
    shutdown: Arc<RwLock<bool>>,
}

impl DehydrationManager {
    /// Create a new DehydrationManager.
    ///
    /// # Arguments
    ///
    /// * `policy` - Dehydration policy configuration
    /// * `cache` - Content cache instance
    /// * `inode_table` - Inode table for checking handles
    /// * `db_pool` - Database pool for queries
    pub fn new(
        policy: DehydrationPolicy,
        cache: Arc<ContentCache>,
        inode_table: Arc<InodeTable>,
        db_pool: DatabasePool,
    ) -> Self {
        Self {
            policy,
            cache,
            inode_table,
            db_pool,
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Get the policy used by this manager.
    pub fn policy(&self) -> &DehydrationPolicy {
        &self.policy
    }

    /// Notify the dehydration manager that a file's last handle was closed.
    ///
    /// If the cache is above the dehydration threshold, this will attempt
    /// to dehydrate the file immediately (if eligible). Otherwise, the file
    /// will be picked up by the next periodic sweep.
    ///
    /// # Arguments
    ///
    /// * `ino` - The inode number of the file that was released
    pub async fn notify_file_closed(&self, ino: u64) {
        // Check if cache is over threshold
        let current_usage = match self.cache.disk_usage() {
            Ok(u) => u,
            Err(_) => return,
        };
        let threshold = self.policy.threshold_bytes();

        if current_usage > threshold {
            debug!(
                ino = ino,
                usage_mb = current_usage / (1024 * 1024),
                threshold_mb = threshold / (1024 * 1024),
                "Cache over threshold, attempting immediate dehydration of released file"
            );
            if let Err(e) = self.dehydrate_path(ino).await {
                debug!(
                    ino = ino,
                    error = %e,
                    "Immediate dehydration skipped for released file"
                );
            }
        }
    }
}

// ============================================================================
// T081: DehydrationManager::run_sweep()
// ============================================================================

impl DehydrationManager {
    /// Run a dehydration sweep to reclaim disk space.
    ///
    /// Checks cache usage against the threshold. If above, queries the database
    /// for dehydration candidates and processes them until usage drops below
    /// the threshold or no more candidates are available.
    ///
    /// # Returns
    ///
    /// A report of the dehydration operation.
    pub async fn run_sweep(&self) -> Result<DehydrationReport, FuseError> {
        let mut report = DehydrationReport::default();

        // Check current cache usage
        let current_usage = self.cache.disk_usage()?;
        let threshold = self.policy.threshold_bytes();

        info!(
            current_usage_mb = current_usage / (1024 * 1024),
            threshold_mb = threshold / (1024 * 1024),
            "Starting dehydration sweep"
        );

        // If below threshold, no need to dehydrate
        if current_usage < threshold {
            debug!("Cache usage below threshold, skipping sweep");
            return Ok(report);
        }

        // Calculate how much space we need to free
        let target_usage = threshold * 80 / 100; // Target 80% of threshold
        let bytes_to_free = current_usage.saturating_sub(target_usage);

        debug!(
            bytes_to_free_mb = bytes_to_free / (1024 * 1024),
            "Need to free space"
        );

        // Get repository for queries
        let repo = onemount_cache::SqliteStateRepository::new(self.db_pool.pool().clone());

        // Process candidates in batches until we've freed enough space
        let mut total_freed = 0u64;
        let batch_size = 100u32;

        loop {
            // Check for shutdown
            if *self.shutdown.read().await {
                debug!("Shutdown requested, stopping sweep");
                break;
            }

            // Query for dehydration candidates
            use onemount_core::ports::IStateRepository;
            let candidates = repo
                .get_items_for_dehydration(self.policy.max_age_days, batch_size)
                .await
                .map_err(|e| FuseError::DatabaseError(e.to_string()))?;

            if candidates.is_empty() {
                debug!("No more dehydration candidates");
                break;
            }

            debug!(count = candidates.len(), "Processing dehydration candidates");

            // Process each candidate
            for item in candidates {
                // Check for shutdown
                if *self.shutdown.read().await {
                    break;
                }

                let ino = item.ino();

                // Check for open handles in inode table
                if let Some(entry) = self.inode_table.get(ino.as_u64()) {
                    if entry.open_handles() > 0 {
                        debug!(
                            %ino,
                            handles = entry.open_handles(),
                            "Skipping file with open handles"
                        );
                        report.skipped_count += 1;
                        continue;
                    }
                }

                let Some(remote_id) = item.id().as_remote() else {
                    // Local-only items have nothing to re-fetch from.
                    report.skipped_count += 1;
                    continue;
                };

                // Skip if content isn't actually cached (defensive check)
                if !self.cache.exists(remote_id) {
                    report.skipped_count += 1;
                    continue;
                }

                // Get file size before removal
                let cache_path = self.cache.cache_path(remote_id);
                let file_size = std::fs::metadata(&cache_path).map(|m| m.len()).unwrap_or(0);

                // Remove cached content
                match self.cache.remove(remote_id) {
                    Ok(()) => {
                        debug!(name = %item.name(), freed_bytes = file_size, "Dehydrated file");

                        report.dehydrated_count += 1;
                        report.bytes_freed += file_size;
                        total_freed += file_size;
                    }
                    Err(e) => {
                        warn!(name = %item.name(), error = %e, "Failed to remove cached content");
                        report.error_count += 1;
                        report
                            .errors
                            .push(format!("Cache removal failed for {}: {}", item.name(), e));
                    }
                }

                // Check if we've freed enough space
                if total_freed >= bytes_to_free {
                    debug!(
                        freed_mb = total_freed / (1024 * 1024),
                        target_mb = bytes_to_free / (1024 * 1024),
                        "Freed target amount of space"
                    );
                    break;
                }
            }

            // If we've freed enough, stop
            if total_freed >= bytes_to_free {
                break;
            }
        }

        info!(
            dehydrated = report.dehydrated_count,
            freed_mb = report.bytes_freed / (1024 * 1024),
            skipped = report.skipped_count,
            errors = report.error_count,
            "Dehydration sweep complete"
        );

        Ok(report)
    }
}

// ============================================================================
// T082: DehydrationManager::start_periodic()
// ============================================================================

impl DehydrationManager {
    /// Start periodic dehydration sweeps.
    ///
    /// Spawns a tokio task that runs `run_sweep()` at the configured interval.
    ///
    /// # Returns
    ///
    /// A `JoinHandle` for the background task. Drop or abort to stop sweeps.
    pub fn start_periodic(self: Arc<Self>) -> JoinHandle<()> {
        let interval_minutes = self.policy.interval_minutes;

        tokio::spawn(async move {
            let mut interval = time::interval(time::Duration::from_secs(
                interval_minutes as u64 * 60,
            ));

            // Skip the first immediate tick
            interval.tick().await;

            loop {
                interval.tick().await;

                // Check for shutdown
                if *self.shutdown.read().await {
                    info!("Periodic dehydration task shutting down");
                    break;
                }

                debug!("Running periodic dehydration sweep");

                match self.run_sweep().await {
                    Ok(report) => {
                        if report.dehydrated_count > 0 {
                            info!(
                                dehydrated = report.dehydrated_count,
                                freed_mb = report.bytes_freed / (1024 * 1024),
                                "Periodic sweep freed space"
                            );
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Periodic dehydration sweep failed");
                    }
                }
            }
        })
    }

    /// Signal the manager to stop periodic sweeps.
    pub async fn shutdown(&self) {
        *self.shutdown.write().await = true;
    }
}

// ============================================================================
// T083: Manual dehydration methods
// ============================================================================

impl DehydrationManager {
    /// Manually dehydrate a specific file.
    ///
    /// Checks that the file is eligible (Hydrated state, no open handles)
    /// and dehydrates it.
    ///
    /// # Arguments
    ///
    /// * `ino` - FUSE inode number of the file to dehydrate
    ///
    /// # Returns
    ///
    /// Number of bytes freed, or an error if dehydration is not allowed.
    pub async fn dehydrate_path(&self, ino: u64) -> Result<u64, FuseError> {
        // Look up the inode entry
        let entry = self.inode_table.get(ino).ok_or_else(|| {
            FuseError::NotFound(format!("Inode {} not found", ino))
        })?;

        // Check if file is open
        if entry.open_handles() > 0 {
            return Err(FuseError::PermissionDenied(format!(
                "Cannot dehydrate file with {} open handles",
                entry.open_handles()
            )));
        }

        // Get file info (clone to release the borrow)
        let remote_id = entry
            .remote_id()
            .cloned()
            .ok_or_else(|| FuseError::InvalidArgument("File has no remote ID".to_string()))?;

        // Drop the entry ref before async operations
        drop(entry);

        if !self.cache.exists(&remote_id) {
            return Err(FuseError::InvalidArgument(
                "File content is not cached locally".to_string(),
            ));
        }

        // Get file size
        let cache_path = self.cache.cache_path(&remote_id);
        let file_size = std::fs::metadata(&cache_path).map(|m| m.len()).unwrap_or(0);

        // Remove cached content
        self.cache.remove(&remote_id)?;

        info!(ino, freed_bytes = file_size, "Manually dehydrated file");

        Ok(file_size)
    }

    /// Manually dehydrate multiple files.
    ///
    /// Processes each file and returns a comprehensive report.
    ///
    /// # Arguments
    ///
    /// * `inos` - List of FUSE inode numbers to dehydrate
    ///
    /// # Returns
    ///
    /// A report of the dehydration operation.
    pub async fn dehydrate_paths(&self, inos: Vec<u64>) -> Result<DehydrationReport, FuseError> {
        let mut report = DehydrationReport::default();

        for ino in inos {
            match self.dehydrate_path(ino).await {
                Ok(freed_bytes) => {
                    report.dehydrated_count += 1;
                    report.bytes_freed += freed_bytes;
                }
                Err(FuseError::NotFound(msg)) => {
                    report.skipped_count += 1;
                    report.errors.push(format!("Not found: {}", msg));
                }
                Err(FuseError::PermissionDenied(msg)) => {
                    report.skipped_count += 1;
                    report.errors.push(format!("Permission denied: {}", msg));
                }
                Err(FuseError::InvalidArgument(msg)) => {
                    report.skipped_count += 1;
                    report.errors.push(format!("Invalid state: {}", msg));
                }
                Err(e) => {
                    report.error_count += 1;
                    report.errors.push(format!("Error dehydrating {}: {}", ino, e));
                }
            }
        }

        Ok(report)
    }
}

impl std::fmt::Debug for DehydrationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DehydrationManager")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// T087: Unit tests
// ============================================================================
