//! Conflict resolution executor
//!
//! Applies resolution strategies by performing the actual file operations:
//! - `KeepLocal`: upload local version to cloud, overwriting remote
//! - `KeepRemote`: download remote version, overwriting the cached local copy
//! - `KeepBoth`: branch the local copy off as a new item, pull remote into
//!   the original

use std::sync::Arc;

use tracing::{debug, info, warn};

use onemount_core::domain::conflict::{Conflict, Resolution, ResolutionSource};
use onemount_core::domain::newtypes::{FileHash, ItemId, NodeId, RemotePath, SyncPath};
use onemount_core::domain::Inode;
use onemount_core::ports::cloud_provider::ICloudProvider;
use onemount_core::ports::local_filesystem::ILocalFileSystem;
use onemount_core::ports::state_repository::IStateRepository;

use crate::{error::ConflictError, namer::ConflictNamer};

/// Result of a batch resolution operation
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub resolved: u32,
    pub failed: u32,
    pub errors: Vec<String>,
}

/// Applies conflict resolutions with real file and inode operations
pub struct ConflictResolver {
    cloud_provider: Arc<dyn ICloudProvider + Send + Sync>,
    local_filesystem: Arc<dyn ILocalFileSystem + Send + Sync>,
    state_repository: Arc<dyn IStateRepository + Send + Sync>,
}

impl ConflictResolver {
    pub fn new(
        cloud_provider: Arc<dyn ICloudProvider + Send + Sync>,
        local_filesystem: Arc<dyn ILocalFileSystem + Send + Sync>,
        state_repository: Arc<dyn IStateRepository + Send + Sync>,
    ) -> Self {
        Self {
            cloud_provider,
            local_filesystem,
            state_repository,
        }
    }

    /// Apply a resolution to a conflict
    ///
    /// Performs the actual content operations and persists both the
    /// resolved conflict record and whatever inode state changed as a
    /// result.
    pub async fn apply_resolution(
        &self,
        conflict: Conflict,
        resolution: Resolution,
        source: ResolutionSource,
        item: &Inode,
    ) -> Result<Conflict, ConflictError> {
        info!(
            conflict_id = %conflict.id(),
            resolution = %resolution,
            item_id = %item.id(),
            "Applying conflict resolution"
        );

        if conflict.is_resolved() {
            return Err(ConflictError::AlreadyResolved(conflict.id().to_string()));
        }

        match &resolution {
            Resolution::KeepLocal => {
                let remote_etag = conflict.remote_version().etag();
                self.apply_keep_local(item, remote_etag).await?;
            }
            Resolution::KeepRemote => {
                self.apply_keep_remote(item, &conflict).await?;
            }
            Resolution::KeepBoth => {
                self.apply_keep_both(item, &conflict).await?;
            }
            Resolution::Manual => {
                debug!("Manual resolution - no file operations");
            }
        }

        let resolved = conflict.resolve(resolution, source);

        self.state_repository
            .save_conflict(&resolved)
            .await
            .map_err(|e| ConflictError::ResolutionFailed(format!("save conflict: {e}")))?;

        info!(conflict_id = %resolved.id(), "Conflict resolved successfully");

        Ok(resolved)
    }

    /// Keep local version: upload it to the cloud, overwriting remote
    async fn apply_keep_local(
        &self,
        item: &Inode,
        remote_etag: Option<&str>,
    ) -> Result<(), ConflictError> {
        debug!(item_id = %item.id(), "Applying keep-local: uploading local version");

        let data = self
            .local_filesystem
            .read_file(&cache_path_for(item.id()))
            .await
            .map_err(|e| ConflictError::ResolutionFailed(format!("read local content: {e}")))?;

        let (parent_path, file_name) = self.resolve_remote_location(item).await?;

        let uploaded = self
            .cloud_provider
            .upload_file(&parent_path, &file_name, &data, remote_etag)
            .await
            .map_err(|e| ConflictError::ResolutionFailed(format!("upload: {e}")))?;

        let mut updated = item.clone();
        updated.mark_synced(uploaded.etag, parse_hash(uploaded.hash));
        self.state_repository
            .save_inode(&updated)
            .await
            .map_err(|e| ConflictError::ResolutionFailed(format!("save inode: {e}")))?;

        Ok(())
    }

    /// Keep remote version: download and overwrite the cached local content
    async fn apply_keep_remote(
        &self,
        item: &Inode,
        conflict: &Conflict,
    ) -> Result<(), ConflictError> {
        debug!(item_id = %item.id(), "Applying keep-remote: downloading remote version");

        let remote_id = item
            .id()
            .as_remote()
            .ok_or_else(|| ConflictError::ResolutionFailed("item has no remote id".to_string()))?
            .clone();

        let data = self
            .cloud_provider
            .download_file(&remote_id)
            .await
            .map_err(|e| ConflictError::ResolutionFailed(format!("download: {e}")))?;

        self.local_filesystem
            .write_file(&cache_path_for(item.id()), &data)
            .await
            .map_err(|e| ConflictError::ResolutionFailed(format!("write local content: {e}")))?;

        let mut updated = item.clone();
        let remote = conflict.remote_version();
        updated.apply_remote_metadata(
            remote.size_bytes(),
            remote.modified_at(),
            remote.etag().map(String::from),
            Some(remote.hash().clone()),
        );
        self.state_repository
            .save_inode(&updated)
            .await
            .map_err(|e| ConflictError::ResolutionFailed(format!("save inode: {e}")))?;

        Ok(())
    }

    /// Keep both: branch the local copy into a new conflict-named item
    /// under the same parent, then pull the remote content into the
    /// original. The branch is left dirty so the upload manager picks it
    /// up and uploads it as a new cloud item on the next sync pass.
    async fn apply_keep_both(
        &self,
        item: &Inode,
        conflict: &Conflict,
    ) -> Result<(), ConflictError> {
        debug!(item_id = %item.id(), "Applying keep-both: branching local, pulling remote into original");

        let local_data = self
            .local_filesystem
            .read_file(&cache_path_for(item.id()))
            .await
            .map_err(|e| ConflictError::ResolutionFailed(format!("read local content: {e}")))?;

        let conflict_name = ConflictNamer::generate(item.name());
        let parent = item.parent().unwrap_or(NodeId::ROOT);

        let new_ino = self
            .state_repository
            .allocate_inode()
            .await
            .map_err(|e| ConflictError::ResolutionFailed(format!("allocate inode: {e}")))?;

        let mut branch = Inode::new_local_file(new_ino, parent, conflict_name.clone());
        branch.set_size(local_data.len() as u64);
        self.state_repository
            .save_inode(&branch)
            .await
            .map_err(|e| ConflictError::ResolutionFailed(format!("save branched inode: {e}")))?;

        self.local_filesystem
            .write_file(&cache_path_for(branch.id()), &local_data)
            .await
            .map_err(|e| ConflictError::ResolutionFailed(format!("write branched content: {e}")))?;

        let remote_id = item
            .id()
            .as_remote()
            .ok_or_else(|| ConflictError::ResolutionFailed("item has no remote id".to_string()))?
            .clone();

        let remote_data = self
            .cloud_provider
            .download_file(&remote_id)
            .await
            .map_err(|e| ConflictError::ResolutionFailed(format!("download remote: {e}")))?;

        self.local_filesystem
            .write_file(&cache_path_for(item.id()), &remote_data)
            .await
            .map_err(|e| {
                ConflictError::ResolutionFailed(format!("write remote to original: {e}"))
            })?;

        let mut updated = item.clone();
        let remote = conflict.remote_version();
        updated.apply_remote_metadata(
            remote.size_bytes(),
            remote.modified_at(),
            remote.etag().map(String::from),
            Some(remote.hash().clone()),
        );
        self.state_repository
            .save_inode(&updated)
            .await
            .map_err(|e| ConflictError::ResolutionFailed(format!("save inode: {e}")))?;

        info!(
            original_item_id = %item.id(),
            branch_item_id = %branch.id(),
            conflict_copy = %conflict_name,
            "Keep-both: local branched, remote pulled into original"
        );

        Ok(())
    }

    /// Resolve multiple conflicts with the same strategy
    pub async fn resolve_batch(
        &self,
        conflicts: Vec<(Conflict, Inode)>,
        resolution: Resolution,
        source: ResolutionSource,
    ) -> BatchResult {
        let mut result = BatchResult {
            resolved: 0,
            failed: 0,
            errors: Vec::new(),
        };

        for (conflict, item) in conflicts {
            match self
                .apply_resolution(conflict, resolution.clone(), source.clone(), &item)
                .await
            {
                Ok(_) => result.resolved += 1,
                Err(e) => {
                    warn!(error = %e, "Batch resolution failed for item");
                    result.failed += 1;
                    result.errors.push(e.to_string());
                }
            }
        }

        result
    }

    /// Resolves an inode's parent chain into a remote `(parent_path,
    /// file_name)` pair, the same way the sync engine's upload manager
    /// resolves upload destinations.
    async fn resolve_remote_location(
        &self,
        item: &Inode,
    ) -> Result<(RemotePath, String), ConflictError> {
        let Some(parent_ino) = item.parent() else {
            return Ok((RemotePath::root(), item.name().to_string()));
        };

        let mut segments = Vec::new();
        let mut current = Some(parent_ino);
        while let Some(ino) = current {
            if ino == NodeId::ROOT {
                break;
            }
            let node = self
                .state_repository
                .get_inode(ino)
                .await
                .map_err(|e| ConflictError::ResolutionFailed(format!("resolve ancestor: {e}")))?
                .ok_or_else(|| {
                    ConflictError::ResolutionFailed(format!("dangling parent inode {}", ino.as_u64()))
                })?;
            segments.push(node.name().to_string());
            current = node.parent();
        }
        segments.reverse();

        let mut path = RemotePath::root();
        for segment in segments {
            path = path
                .join(&segment)
                .map_err(|e| ConflictError::ResolutionFailed(format!("build remote path: {e}")))?;
        }

        Ok((path, item.name().to_string()))
    }
}

/// Synthetic local path under which `ILocalFileSystem` caches an item's
/// content, keyed by item id rather than a mount-relative path. Matches
/// `onemount-sync::engine::cache_path_for`.
fn cache_path_for(item_id: &ItemId) -> SyncPath {
    SyncPath::new(std::path::PathBuf::from(format!("/{}", item_id.as_str())))
        .expect("item id strings never contain path traversal")
}

fn parse_hash(hash: Option<String>) -> Option<FileHash> {
    hash.and_then(|h| FileHash::new(h).ok())
}
