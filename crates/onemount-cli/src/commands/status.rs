//! Status command - Display synchronization status
//!
//! Provides the `onemount status` CLI command which:
//! 1. Shows global sync status (item counts by derived `FileStatus` bucket)
//! 2. Shows per-file status when a path is given
//! 3. Lists dirty (not-yet-uploaded) items
//! 4. Shows FUSE filesystem status (mount state, cache usage)

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::Args;
use onemount_core::config::Config;
use onemount_core::domain::{Account, Inode};
use onemount_core::domain::newtypes::NodeId;
use onemount_core::ports::state_repository::IStateRepository;
use tracing::info;

use crate::output::{get_formatter, OutputFormat};

/// Status command with optional path argument
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Optional path to check status of a specific file
    pub path: Option<String>,
}

impl StatusCommand {
    pub async fn execute(&self, format: OutputFormat) -> Result<()> {
        use onemount_cache::{pool::DatabasePool, SqliteStateRepository};

        let formatter = get_formatter(matches!(format, OutputFormat::Json));

        let db_path = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("onemount")
            .join("onemount.db");

        if !db_path.exists() {
            formatter
                .error("No database found. Run 'onemount auth login' and 'onemount sync' first.");
            return Ok(());
        }

        let pool = DatabasePool::new(Path::new(&db_path))
            .await
            .context("Failed to open database")?;
        let state_repo: Arc<dyn IStateRepository + Send + Sync> =
            Arc::new(SqliteStateRepository::new(pool.pool().clone()));

        let account = state_repo
            .get_default_account()
            .await
            .context("Failed to query default account")?;

        let account = match account {
            Some(a) => a,
            None => {
                formatter.error("No account configured. Run 'onemount auth login' first.");
                return Ok(());
            }
        };

        if let Some(ref path_str) = self.path {
            self.show_file_status(state_repo.clone(), &account, path_str, &format, &*formatter)
                .await
        } else {
            self.show_global_status(&*state_repo, &account, &format, &*formatter)
                .await
        }
    }

    /// Display global synchronization status
    async fn show_global_status(
        &self,
        state_repo: &dyn IStateRepository,
        account: &Account,
        format: &OutputFormat,
        formatter: &dyn crate::output::OutputFormatter,
    ) -> Result<()> {
        use onemount_core::ports::state_repository::InodeFilter;

        info!(email = %account.email(), "Showing status for account");

        let counts = state_repo
            .count_items_by_status(account.id())
            .await
            .context("Failed to count items by status")?;

        let total: u64 = counts.values().sum();
        let fuse_status = get_fuse_status(&counts);

        if matches!(format, OutputFormat::Json) {
            let last_sync_str = account
                .last_sync()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string());

            let json = serde_json::json!({
                "account": account.email().as_str(),
                "last_sync": last_sync_str,
                "total_items": total,
                "items_by_status": counts,
                "fuse": fuse_status.to_json(),
            });
            formatter.print_json(&json);
            return Ok(());
        }

        formatter.success(&format!("OneMount Status - {}", account.email()));
        formatter.info("");

        match account.last_sync() {
            Some(time) => {
                formatter.info(&format!(
                    "Last sync: {}",
                    time.format("%Y-%m-%d %H:%M:%S UTC")
                ));
            }
            None => formatter.info("Last sync: Never"),
        }

        formatter.info(&format!("Total items: {}", total));
        formatter.info("");

        let bucket_order = [
            "cloud",
            "synced",
            "modified",
            "downloading",
            "uploading",
            "conflicted",
            "error",
        ];
        formatter.info("Status        Count");
        formatter.info("------------- -----");
        for bucket in &bucket_order {
            let count = counts.get(*bucket).copied().unwrap_or(0);
            if count > 0 {
                formatter.info(&format!("{:<13} {}", bucket, count));
            }
        }

        // Dirty items haven't uploaded yet and are the ones most useful to
        // list individually; everything else (conflicts, transfers, errors)
        // is a derived-per-item fact with no bulk query, only an aggregate
        // count.
        let dirty_items = state_repo
            .query_inodes(&InodeFilter::new().with_account_id(account.id().clone()).with_dirty(true))
            .await
            .context("Failed to query dirty items")?;

        if !dirty_items.is_empty() {
            formatter.info("");
            formatter.info("Pending items (not yet uploaded):");
            for inode in &dirty_items {
                let path = full_path(state_repo, account, inode).await.unwrap_or_else(|_| {
                    PathBuf::from(inode.name())
                });
                formatter.info(&format!("  [Modified]  {}", truncate_path(path.display().to_string(), 60)));
            }
        }

        formatter.info("");
        formatter.info("FUSE:");
        fuse_status.display_human(formatter);

        Ok(())
    }

    /// Display status for a specific file
    async fn show_file_status(
        &self,
        state_repo: Arc<dyn IStateRepository + Send + Sync>,
        account: &Account,
        path_str: &str,
        format: &OutputFormat,
        formatter: &dyn crate::output::OutputFormatter,
    ) -> Result<()> {
        use onemount_core::domain::newtypes::SyncPath;
        use onemount_status::StatusTracker;
        use onemount_sync::filesystem::LocalFileSystemAdapter;

        let abs_path = if PathBuf::from(path_str).is_absolute() {
            PathBuf::from(path_str)
        } else {
            std::env::current_dir()
                .context("Failed to get current directory")?
                .join(path_str)
        };

        let sync_path = SyncPath::new(abs_path.clone()).context("Invalid path")?;
        let relative = sync_path.relative_to(account.sync_root())?;

        let mut current = NodeId::ROOT;
        let mut inode: Option<Inode> = None;
        for component in relative.components() {
            let name = component.as_os_str().to_string_lossy().into_owned();
            match state_repo.get_child_inode(current, &name).await? {
                Some(child) => {
                    current = child.ino();
                    inode = Some(child);
                }
                None => {
                    inode = None;
                    break;
                }
            }
        }

        let Some(inode) = inode else {
            if matches!(format, OutputFormat::Json) {
                let json = serde_json::json!({
                    "path": abs_path.display().to_string(),
                    "state": "not_tracked",
                    "message": "File is not tracked by OneMount",
                });
                formatter.print_json(&json);
                return Ok(());
            }

            formatter.info(&format!(
                "File '{}' is not tracked by OneMount.",
                abs_path.display()
            ));
            formatter.info("It may be outside the sync folder or excluded by sync rules.");
            return Ok(());
        };

        let local_filesystem: Arc<dyn onemount_core::ports::local_filesystem::ILocalFileSystem + Send + Sync> =
            Arc::new(LocalFileSystemAdapter::new());
        let tracker = StatusTracker::new(state_repo.clone(), local_filesystem);
        let status = tracker
            .status_for(inode.id())
            .await
            .context("Failed to derive file status")?;

        let remote_id = inode.id().as_remote().map(|r| r.to_string());
        let content_hash = inode.hash().map(|h| h.to_string());

        if matches!(format, OutputFormat::Json) {
            let json = serde_json::json!({
                "path": abs_path.display().to_string(),
                "name": inode.name(),
                "remote_id": remote_id,
                "state": status.to_string(),
                "size_bytes": inode.size(),
                "content_hash": content_hash,
                "dirty": inode.is_dirty(),
                "mtime": inode.mtime().to_rfc3339(),
            });
            formatter.print_json(&json);
            return Ok(());
        }

        formatter.success(&format!("File status: {}", abs_path.display()));
        formatter.info("");
        formatter.info(&format!("Status:       {}", status));
        formatter.info(&format!(
            "Remote ID:    {}",
            remote_id.unwrap_or_else(|| "(not assigned)".to_string())
        ));
        formatter.info(&format!("Size:         {} bytes", inode.size()));
        formatter.info(&format!(
            "Content hash: {}",
            content_hash.unwrap_or_else(|| "(none)".to_string())
        ));
        formatter.info(&format!(
            "Modified:     {}",
            inode.mtime().format("%Y-%m-%d %H:%M:%S UTC")
        ));
        formatter.info(&format!("Dirty:        {}", inode.is_dirty()));

        Ok(())
    }
}

/// Walks an inode's parent chain back to the sync root to build its full
/// local path, since inodes are addressed by parent+name rather than a
/// stored path string.
async fn full_path(
    state_repo: &dyn IStateRepository,
    account: &Account,
    inode: &Inode,
) -> Result<PathBuf> {
    let mut components = vec![inode.name().to_string()];
    let mut parent = inode.parent();

    while let Some(parent_ino) = parent {
        if parent_ino == NodeId::ROOT {
            break;
        }
        let parent_inode = state_repo
            .get_inode(parent_ino)
            .await?
            .context("dangling parent reference")?;
        components.push(parent_inode.name().to_string());
        parent = parent_inode.parent();
    }

    components.reverse();
    let mut path = account.sync_root().as_path().clone();
    for component in components {
        path.push(component);
    }
    Ok(path)
}

/// Truncate a path string to a maximum length, showing the end of the path
fn truncate_path(path: String, max_len: usize) -> String {
    if path.len() <= max_len {
        path
    } else {
        format!("...{}", &path[path.len() - (max_len - 3)..])
    }
}

// ============================================================================
// FUSE status section
// ============================================================================

/// FUSE filesystem status information.
struct FuseStatus {
    mounted: bool,
    mount_point: String,
    cache_used_bytes: u64,
    cache_max_bytes: u64,
    files_synced: u64,
    files_cloud: u64,
    files_transferring: u64,
}

impl FuseStatus {
    fn display_human(&self, formatter: &dyn crate::output::OutputFormatter) {
        let mount_status = if self.mounted { "mounted" } else { "not mounted" };
        formatter.info(&format!("  Mount: {} ({})", self.mount_point, mount_status));

        let cache_percent = if self.cache_max_bytes > 0 {
            (self.cache_used_bytes as f64 / self.cache_max_bytes as f64 * 100.0) as u8
        } else {
            0
        };
        formatter.info(&format!(
            "  Cache: {} / {} ({}%)",
            format_bytes(self.cache_used_bytes),
            format_bytes(self.cache_max_bytes),
            cache_percent
        ));

        formatter.info(&format!(
            "  Files: {} hydrated, {} cloud-only",
            self.files_synced, self.files_cloud
        ));

        if self.files_transferring > 0 {
            formatter.info(&format!(
                "  Transferring: {} file(s) in progress",
                self.files_transferring
            ));
        }
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "mounted": self.mounted,
            "mount_point": self.mount_point,
            "cache_used_bytes": self.cache_used_bytes,
            "cache_max_bytes": self.cache_max_bytes,
            "files_synced": self.files_synced,
            "files_cloud": self.files_cloud,
            "files_transferring": self.files_transferring,
        })
    }
}

/// Get FUSE status from configuration and status bucket counts.
fn get_fuse_status(counts: &std::collections::HashMap<String, u64>) -> FuseStatus {
    let config = Config::load_or_default(&Config::default_path());
    let fuse_config = &config.fuse;

    let mounted = is_fuse_mounted(&fuse_config.mount_point);

    let cache_dir = expand_tilde(&fuse_config.cache_dir);
    let cache_used_bytes = calculate_directory_size(&cache_dir);
    let cache_max_bytes = u64::from(fuse_config.cache_max_size_gb) * 1024 * 1024 * 1024;

    let files_synced = counts.get("synced").copied().unwrap_or(0);
    let files_cloud = counts.get("cloud").copied().unwrap_or(0);
    let files_transferring = counts.get("downloading").copied().unwrap_or(0)
        + counts.get("uploading").copied().unwrap_or(0);

    FuseStatus {
        mounted,
        mount_point: fuse_config.mount_point.clone(),
        cache_used_bytes,
        cache_max_bytes,
        files_synced,
        files_cloud,
        files_transferring,
    }
}

/// Check if a path is a FUSE mount point by reading /proc/mounts.
fn is_fuse_mounted(mount_point: &str) -> bool {
    let expanded = expand_tilde(mount_point);

    if let Ok(content) = fs::read_to_string("/proc/mounts") {
        for line in content.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 3 {
                let mount_path = parts[1];
                let fs_type = parts[2];
                if mount_path == expanded && fs_type.starts_with("fuse") {
                    return true;
                }
            }
        }
    }

    false
}

/// Calculate the total size of files in a directory recursively.
fn calculate_directory_size(path: &str) -> u64 {
    let dir_path = Path::new(path);
    if !dir_path.exists() {
        return 0;
    }

    fn recurse(dir: &Path) -> u64 {
        let mut size = 0;
        if let Ok(entries) = fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_file() {
                    if let Ok(metadata) = fs::metadata(&path) {
                        size += metadata.len();
                    }
                } else if path.is_dir() {
                    size += recurse(&path);
                }
            }
        }
        size
    }

    recurse(dir_path)
}

/// Expand ~ to home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped).display().to_string();
        }
    }
    path.to_string()
}

/// Format bytes as a human-readable string (e.g., "2.1 GB").
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
