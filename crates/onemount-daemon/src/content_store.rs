//! Bridges the synthetic, per-item paths used by `onemount-sync`,
//! `onemount-conflict` and `onemount-status` to the same on-disk locations
//! `onemount-fuse`'s [`ContentCache`] uses for hydrated content.
//!
//! `SyncEngine`/`ConflictResolver`/`StatusTracker` all address content
//! through an `ILocalFileSystem` at a synthetic `SyncPath` of the form
//! `/<item-id>` (see each crate's private `cache_path_for` helper) rather
//! than a real mount path. Without this adapter that synthetic path would
//! be read and written literally against the machine's filesystem root.
//! Instead, `ContentCacheFileSystem` recovers the item id from that path
//! and maps it through [`ContentCache::cache_path`] exactly as the FUSE
//! side does, so both views of the same item resolve to the same file.

use std::sync::Arc;

use chrono::DateTime;
use onemount_core::domain::hash::quick_xor_hash;
use onemount_core::domain::newtypes::{FileHash, RemoteId, SyncPath};
use onemount_core::ports::local_filesystem::{FileSystemState, ILocalFileSystem};
use onemount_fuse::cache::ContentCache;
use tracing::debug;

/// Implements [`ILocalFileSystem`] against a shared [`ContentCache`].
///
/// Every `RemoteId` accepted here is only ever used as a hashing key into
/// the cache's directory layout; it need not be a real cloud id (locally
/// minted `local-<uuid>` item ids pass the same validation and hash to
/// their own stable slot).
pub struct ContentCacheFileSystem {
    cache: Arc<ContentCache>,
}

impl ContentCacheFileSystem {
    pub fn new(cache: Arc<ContentCache>) -> Self {
        Self { cache }
    }

    fn remote_id_for(path: &SyncPath) -> anyhow::Result<RemoteId> {
        let full = path.as_path().to_string_lossy();
        let component = full.strip_prefix('/').unwrap_or(&full);
        RemoteId::new(component.to_string()).map_err(|e| anyhow::anyhow!(e))
    }
}

#[async_trait::async_trait]
impl ILocalFileSystem for ContentCacheFileSystem {
    async fn read_file(&self, path: &SyncPath) -> anyhow::Result<Vec<u8>> {
        let remote_id = Self::remote_id_for(path)?;
        let cache = self.cache.clone();
        tokio::task::spawn_blocking(move || {
            std::fs::read(cache.cache_path(&remote_id)).map_err(anyhow::Error::from)
        })
        .await?
    }

    async fn write_file(&self, path: &SyncPath, data: &[u8]) -> anyhow::Result<()> {
        let remote_id = Self::remote_id_for(path)?;
        let cache = self.cache.clone();
        let data = data.to_vec();
        debug!(item = %remote_id, bytes = data.len(), "writing content-store slot");
        tokio::task::spawn_blocking(move || cache.store(&remote_id, &data).map(|_| ()))
            .await?
            .map_err(anyhow::Error::from)
    }

    async fn delete_file(&self, path: &SyncPath) -> anyhow::Result<()> {
        let remote_id = Self::remote_id_for(path)?;
        let cache = self.cache.clone();
        tokio::task::spawn_blocking(move || cache.remove(&remote_id))
            .await?
            .map_err(anyhow::Error::from)
    }

    async fn get_state(&self, path: &SyncPath) -> anyhow::Result<FileSystemState> {
        let remote_id = Self::remote_id_for(path)?;
        let cache = self.cache.clone();
        tokio::task::spawn_blocking(move || {
            let cache_path = cache.cache_path(&remote_id);
            match std::fs::metadata(&cache_path) {
                Ok(metadata) => {
                    let modified = metadata.modified().ok().and_then(|st| {
                        st.duration_since(std::time::UNIX_EPOCH)
                            .ok()
                            .and_then(|d| DateTime::from_timestamp(d.as_secs() as i64, d.subsec_nanos()))
                    });
                    Ok(FileSystemState {
                        exists: true,
                        is_file: metadata.is_file(),
                        size: metadata.len(),
                        modified,
                        is_locked: false,
                    })
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileSystemState::not_found()),
                Err(e) => Err(anyhow::Error::from(e)),
            }
        })
        .await?
    }

    async fn compute_hash(&self, path: &SyncPath) -> anyhow::Result<FileHash> {
        let data = self.read_file(path).await?;
        Ok(quick_xor_hash(&data))
    }

    async fn create_directory(&self, _path: &SyncPath) -> anyhow::Result<()> {
        // The content cache is a flat, hash-addressed store; there is no
        // directory structure for callers to create ahead of a write.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onemount_core::domain::newtypes::ItemId;

    fn cache_path_for(item_id: &ItemId) -> SyncPath {
        SyncPath::new(std::path::PathBuf::from(format!("/{}", item_id.as_str())))
            .expect("item id strings never contain path traversal")
    }

    fn test_fs() -> (tempfile::TempDir, ContentCacheFileSystem) {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ContentCache::new(dir.path().to_path_buf()).unwrap());
        (dir, ContentCacheFileSystem::new(cache))
    }

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let (_dir, fs) = test_fs();
        let item_id = ItemId::from_remote(RemoteId::new("item-abc".to_string()).unwrap());
        let path = cache_path_for(&item_id);

        fs.write_file(&path, b"hello world").await.unwrap();
        let data = fs.read_file(&path).await.unwrap();
        assert_eq!(data, b"hello world");
    }

    #[tokio::test]
    async fn get_state_reports_not_found_before_write() {
        let (_dir, fs) = test_fs();
        let item_id = ItemId::new_local();
        let path = cache_path_for(&item_id);

        let state = fs.get_state(&path).await.unwrap();
        assert!(!state.exists);
    }

    #[tokio::test]
    async fn matches_fuse_content_cache_layout() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ContentCache::new(dir.path().to_path_buf()).unwrap());
        let fs = ContentCacheFileSystem::new(cache.clone());

        let remote_id = RemoteId::new("shared-item".to_string()).unwrap();
        let item_id = ItemId::from_remote(remote_id.clone());
        let path = cache_path_for(&item_id);

        fs.write_file(&path, b"shared content").await.unwrap();

        let fuse_path = cache.cache_path(&remote_id);
        assert_eq!(std::fs::read(fuse_path).unwrap(), b"shared content");
    }

    #[tokio::test]
    async fn delete_then_get_state_not_found() {
        let (_dir, fs) = test_fs();
        let item_id = ItemId::from_remote(RemoteId::new("to-delete".to_string()).unwrap());
        let path = cache_path_for(&item_id);

        fs.write_file(&path, b"data").await.unwrap();
        fs.delete_file(&path).await.unwrap();

        let state = fs.get_state(&path).await.unwrap();
        assert!(!state.exists);
    }
}
