//! FUSE filesystem implementation.
//!
//! Implements `fuser::Filesystem` trait for OneMount, handling all FUSE operations
//! including file I/O, directory operations, and metadata management.

use std::{
    ffi::{c_int, OsStr},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};

use chrono::{DateTime, Utc};
use fuser::{
    FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use onemount_cache::{pool::DatabasePool, repository::SqliteStateRepository};
use onemount_core::{
    config::FuseConfig,
    domain::{
        quick_xor_hash, status::StatusInputs, validate_child_name, DownloadPriority, Inode,
        ItemId, NodeId, RemoteId,
    },
    ports::{IStateRepository, InodeFilter, UploadNotifier},
};
use onemount_graph::provider::GraphCloudProvider;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::{
    cache::ContentCache,
    dehydration::{DehydrationManager, DehydrationPolicy},
    hydration::HydrationManager,
    inode::InodeTable,
    inode_entry::{InodeEntry, InodeNumber},
    write_serializer::{WriteSerializer, WriteSerializerHandle},
    xattr,
};

/// TTL for FUSE attribute caching (1 second).
///
/// This duration controls how long the kernel caches file attributes
/// before re-querying the filesystem. A short TTL ensures timely
/// reflection of remote changes while reducing syscall overhead.
const TTL: Duration = Duration::from_secs(1);

/// FUSE open flag indicating the kernel should keep cached data.
///
/// When set in the reply to open/opendir, this flag tells the kernel
/// that file data cached from a previous open is still valid and can
/// be reused. This improves performance by avoiding unnecessary reads.
const FOPEN_KEEP_CACHE: u32 = 1 << 1;

/// Maximum filename length in bytes (POSIX NAME_MAX).
const NAME_MAX: usize = 255;

/// Main FUSE filesystem implementation for OneMount.
///
/// `OneMountFs` implements the `fuser::Filesystem` trait and handles all FUSE
/// operations for the Files-on-Demand feature. It manages:
/// - Inode allocation and tracking via [`InodeTable`]
/// - Content caching via [`ContentCache`]
/// - Serialized database writes via [`WriteSerializerHandle`]
/// - On-demand hydration via [`HydrationManager`] and space reclaim via
///   [`DehydrationManager`]
/// - File handle allocation for open files
///
/// # Architecture
///
/// ```text
/// ┌─────────────────────────────────────────────────────────────┐
/// │                      OneMountFs                             │
/// │  ┌─────────────┐  ┌──────────────┐  ┌──────────────────┐   │
/// │  │ InodeTable  │  │ ContentCache │  │ WriteSerializer  │   │
/// │  │ (inode↔id)  │  │ (file data)  │  │ (DB writes)      │   │
/// │  └─────────────┘  └──────────────┘  └──────────────────┘   │
/// │         │                │                   │              │
/// │         └────────────────┼───────────────────┘              │
/// │                          │                                  │
/// │                    ┌─────▼─────┐                            │
/// │                    │ SQLite DB │                            │
/// │                    └───────────┘                            │
/// └─────────────────────────────────────────────────────────────┘
/// ```
///
/// # Example
///
/// ```ignore
/// use onemount_fuse::OneMountFs;
/// use onemount_core::config::FuseConfig;
/// use onemount_cache::pool::DatabasePool;
/// use std::sync::Arc;
///
/// let rt = tokio::runtime::Runtime::new().unwrap();
/// let pool = rt.block_on(DatabasePool::in_memory()).unwrap();
/// let cache = Arc::new(ContentCache::new("/tmp/cache".into()).unwrap());
/// let config = FuseConfig::default();
///
/// let fs = OneMountFs::new(rt.handle().clone(), pool, config, cache, provider, None);
/// // fs can now be passed to fuser::spawn_mount2() or fuser::mount2()
/// ```
pub struct OneMountFs {
    /// Handle to the tokio runtime for spawning async tasks from sync FUSE callbacks
    rt_handle: Handle,

    /// Bidirectional mapping between inodes and item IDs
    inode_table: Arc<InodeTable>,

    /// Handle for sending serialized write operations to the database
    write_handle: WriteSerializerHandle,

    /// Cache for hydrated file content
    cache: Arc<ContentCache>,

    /// FUSE filesystem configuration
    config: FuseConfig,

    /// Database connection pool
    db_pool: DatabasePool,

    /// Coordinates on-demand downloads of placeholder content
    hydration: Arc<HydrationManager>,

    /// Reclaims disk space by evicting cached content that is no longer needed locally
    dehydration: Arc<DehydrationManager>,

    /// Requests an immediate upload on flush/fsync, ahead of the periodic
    /// dirty scan. `None` in configurations that never need upload (e.g.
    /// read-only test fixtures).
    upload_notifier: Option<Arc<dyn UploadNotifier>>,

    /// Counter for allocating unique file handles
    next_fh: AtomicU64,
}

impl OneMountFs {
    /// Creates a new `OneMountFs` instance.
    ///
    /// This constructor:
    /// 1. Creates a [`WriteSerializer`] for serializing database writes
    /// 2. Spawns the WriteSerializer task on the provided runtime
    /// 3. Initializes an empty [`InodeTable`] for inode management
    /// 4. Wires up a [`HydrationManager`] and a periodically-swept [`DehydrationManager`]
    ///
    /// # Arguments
    ///
    /// * `rt_handle` - Handle to a tokio runtime for spawning async tasks
    /// * `db_pool` - Database connection pool for state persistence
    /// * `config` - FUSE filesystem configuration
    /// * `cache` - Shared content cache for hydrated files
    /// * `provider` - Cloud provider used to download placeholder content on demand
    /// * `upload_notifier` - Queue to request immediate uploads from flush/fsync;
    ///   `None` disables the fast path, leaving the periodic dirty scan as the
    ///   only uploader
    pub fn new(
        rt_handle: Handle,
        db_pool: DatabasePool,
        config: FuseConfig,
        cache: Arc<ContentCache>,
        provider: Arc<GraphCloudProvider>,
        upload_notifier: Option<Arc<dyn UploadNotifier>>,
    ) -> Self {
        // Create the WriteSerializer for serialized database writes
        let (serializer, write_handle) = WriteSerializer::new(db_pool.clone());

        // Spawn the WriteSerializer task on the tokio runtime
        rt_handle.spawn(async move {
            serializer.run().await;
        });

        // Initialize an empty inode table
        let inode_table = Arc::new(InodeTable::new());

        let hydration_concurrency = config.hydration_concurrency.max(1) as usize;
        let hydration = Arc::new(HydrationManager::new(
            hydration_concurrency,
            cache.clone(),
            write_handle.clone(),
            provider,
            db_pool.clone(),
            inode_table.clone(),
            rt_handle.clone(),
        ));

        let dehydration_policy = DehydrationPolicy::from_config(&config);
        let dehydration = Arc::new(DehydrationManager::new(
            dehydration_policy,
            cache.clone(),
            inode_table.clone(),
            db_pool.clone(),
        ));
        dehydration.clone().start_periodic();

        Self {
            rt_handle,
            inode_table,
            write_handle,
            cache,
            config,
            db_pool,
            hydration,
            dehydration,
            upload_notifier,
            next_fh: AtomicU64::new(1),
        }
    }

    /// Returns a reference to the tokio runtime handle.
    pub fn rt_handle(&self) -> &Handle {
        &self.rt_handle
    }

    /// Returns a reference to the inode table.
    pub fn inode_table(&self) -> &Arc<InodeTable> {
        &self.inode_table
    }

    /// Returns a reference to the write serializer handle.
    pub fn write_handle(&self) -> &WriteSerializerHandle {
        &self.write_handle
    }

    /// Returns a reference to the content cache.
    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    /// Returns a reference to the FUSE configuration.
    pub fn config(&self) -> &FuseConfig {
        &self.config
    }

    /// Returns a reference to the database pool.
    pub fn db_pool(&self) -> &DatabasePool {
        &self.db_pool
    }

    /// Returns a reference to the hydration manager.
    pub fn hydration(&self) -> &Arc<HydrationManager> {
        &self.hydration
    }

    /// Returns a reference to the dehydration manager.
    pub fn dehydration(&self) -> &Arc<DehydrationManager> {
        &self.dehydration
    }

    /// Allocates a new unique file handle.
    ///
    /// File handles are used to track open files and must be unique
    /// for the lifetime of the open file descriptor.
    pub fn alloc_fh(&self) -> u64 {
        self.next_fh.fetch_add(1, Ordering::Relaxed)
    }

    /// Reinserts `new_entry` into the inode table, carrying over the lookup
    /// and open-handle counts the previous entry for `ino` had accumulated.
    ///
    /// `InodeEntry` fields other than its status inputs are immutable once
    /// constructed, so any mutation (rename, truncate, permission change)
    /// goes through remove-then-insert. Without this the kernel's reference
    /// counts for the inode would silently reset to zero.
    fn reinsert_preserving_refcounts(&self, ino: u64, new_entry: InodeEntry) {
        let (lookup_count, open_handles) = self
            .inode_table
            .get(ino)
            .map(|old| (old.lookup_count(), old.open_handles()))
            .unwrap_or((0, 0));

        self.inode_table.insert(new_entry);

        if let Some(fresh) = self.inode_table.get(ino) {
            for _ in 0..lookup_count {
                fresh.increment_lookup();
            }
            for _ in 0..open_handles {
                fresh.increment_open_handles();
            }
        }
    }

    /// Recomputes the content hash for a dirty inode and queues it for
    /// upload ahead of the periodic dirty scan.
    ///
    /// Called from both `flush` and `fsync`; neither waits for the result,
    /// so this never blocks on network I/O. If the freshly computed hash
    /// matches the inode's last known remote hash, the edit reverted the
    /// file to its synced content and no upload is queued.
    fn flush_dirty_content(&self, ino: u64) {
        let Some(entry) = self.inode_table.get(ino) else {
            return;
        };
        if !entry.status_inputs().dirty {
            return;
        }

        let key = cache_key_for(entry.item_id());
        let content = match std::fs::read(self.cache.cache_path(&key)) {
            Ok(content) => content,
            Err(e) => {
                warn!("flush: failed to read cached content for inode {}: {}", ino, e);
                return;
            }
        };
        let computed_hash = quick_xor_hash(&content);

        let repository = SqliteStateRepository::new(self.db_pool.pool().clone());
        let mut inode = match self.rt_handle.block_on(repository.get_inode(NodeId::new(ino))) {
            Ok(Some(inode)) => inode,
            Ok(None) => {
                warn!("flush: inode {} has no database record", ino);
                return;
            }
            Err(e) => {
                warn!("flush: failed to load inode {} for flush: {}", ino, e);
                return;
            }
        };

        if inode.hash() == Some(&computed_hash) {
            debug!("flush: inode {} content matches last synced hash, skipping upload", ino);
            return;
        }

        inode.set_size(content.len() as u64);
        if let Err(e) = self.rt_handle.block_on(self.write_handle.save_inode(inode.clone())) {
            warn!("flush: failed to persist inode {} before upload: {}", ino, e);
            return;
        }

        if let Some(notifier) = &self.upload_notifier {
            notifier.enqueue_high(inode.id().clone());
        }
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Converts a `chrono::DateTime<Utc>` to `std::time::SystemTime`.
fn system_time_from_chrono(dt: DateTime<Utc>) -> SystemTime {
    let timestamp = dt.timestamp();
    let nanos = dt.timestamp_subsec_nanos();
    if timestamp >= 0 {
        SystemTime::UNIX_EPOCH + Duration::new(timestamp as u64, nanos)
    } else {
        SystemTime::UNIX_EPOCH - Duration::new((-timestamp) as u64, 0)
    }
}

/// Resolves the `ContentCache` key for an inode's content.
///
/// Uploaded files are keyed by their OneDrive `RemoteId`. Files that only
/// exist locally (not yet uploaded) have no `RemoteId` yet; for those we
/// reuse the `local-<uuid>` string minted by `ItemId::new_local()` as the
/// cache key, since it already satisfies `RemoteId`'s character rules. Once
/// the upload manager assigns a real remote id the cached bytes would need
/// to move to the new key - that migration belongs to the upload pipeline,
/// not to this filesystem layer.
fn cache_key_for(item_id: &ItemId) -> RemoteId {
    match item_id.as_remote() {
        Some(remote_id) => remote_id.clone(),
        None => RemoteId::new(item_id.as_str().to_string())
            .expect("ItemId::new_local() always produces a RemoteId-shaped string"),
    }
}

/// Converts a persisted `Inode` into the FUSE-facing `InodeEntry`.
///
/// `content_absent` should be `true` for regular files whose content has
/// not been hydrated into the cache yet; it seeds the entry's derived
/// [`onemount_core::domain::FileStatus`].
fn inode_to_entry(inode: &Inode, content_absent: bool) -> InodeEntry {
    let kind = if inode.is_directory() {
        FileType::Directory
    } else {
        FileType::RegularFile
    };

    let perm = (inode.mode() & 0o7777) as u16;
    let nlink = if inode.is_directory() { 2 } else { 1 };
    let mtime = system_time_from_chrono(inode.mtime());

    let parent_ino = InodeNumber::new(
        inode
            .parent()
            .map(NodeId::as_u64)
            .unwrap_or_else(|| NodeId::ROOT.as_u64()),
    );

    let status_inputs = StatusInputs {
        dirty: inode.is_dirty(),
        content_absent: content_absent && !inode.is_directory(),
        ..StatusInputs::default()
    };

    InodeEntry::new(
        InodeNumber::new(inode.ino().as_u64()),
        inode.id().clone(),
        parent_ino,
        inode.name().to_string(),
        kind,
        inode.size(),
        perm,
        mtime,
        mtime,
        mtime,
        nlink,
        status_inputs,
    )
}

// ============================================================================
// Filesystem trait implementation
// ============================================================================

impl Filesystem for OneMountFs {
    /// Initialize filesystem.
    ///
    /// Called before any other filesystem method. This method:
    /// 1. Negotiates kernel capabilities (sets FUSE_CAP_EXPORT_SUPPORT if available)
    /// 2. Loads all inodes from the state repository
    /// 3. Persists a fresh root inode if the database has none yet
    /// 4. Populates the InodeTable from the loaded inodes
    #[tracing::instrument(level = "info", skip(self, _req, config))]
    fn init(&mut self, _req: &Request<'_>, config: &mut KernelConfig) -> Result<(), c_int> {
        tracing::info!("Initializing OneMount FUSE filesystem");

        // Negotiate kernel capabilities
        // FUSE_EXPORT_SUPPORT (bit 4) allows the kernel to handle lookups of "." and ".."
        // This capability was introduced in FUSE protocol 7.10
        const FUSE_EXPORT_SUPPORT: u64 = 1 << 4;
        if let Err(unsupported) = config.add_capabilities(FUSE_EXPORT_SUPPORT) {
            tracing::debug!(
                unsupported_bits = unsupported,
                "FUSE_EXPORT_SUPPORT not available from kernel"
            );
        } else {
            tracing::debug!("FUSE_EXPORT_SUPPORT capability enabled");
        }

        let repository = SqliteStateRepository::new(self.db_pool.pool().clone());

        let mut inodes = match self
            .rt_handle
            .block_on(repository.query_inodes(&InodeFilter::new()))
        {
            Ok(inodes) => inodes,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load inodes from database");
                return Err(libc::EIO);
            }
        };

        tracing::debug!(count = inodes.len(), "Loaded inodes from database");

        // The root inode (NodeId::ROOT) always exists once the mount has been
        // initialized once; on a brand-new database we mint and persist it.
        if !inodes.iter().any(|inode| inode.ino() == NodeId::ROOT) {
            let root = Inode::root(ItemId::new_local());
            if let Err(e) = self
                .rt_handle
                .block_on(self.write_handle.save_inode(root.clone()))
            {
                tracing::error!(error = %e, "Failed to persist root inode");
                return Err(libc::EIO);
            }
            inodes.push(root);
        }

        for inode in &inodes {
            let content_absent = inode.is_regular_file()
                && inode
                    .id()
                    .as_remote()
                    .is_some_and(|remote_id| !self.cache.exists(remote_id));
            let entry = inode_to_entry(inode, content_absent);
            self.inode_table.insert(entry);
        }

        tracing::info!(
            items_loaded = self.inode_table.len(),
            "OneMount FUSE filesystem initialized"
        );

        Ok(())
    }

    /// Clean up filesystem.
    ///
    /// Called on filesystem exit. Stops the hydration manager's in-flight
    /// downloads and the dehydration manager's periodic sweep. The
    /// WriteSerializer task is signalled to exit when its handle is dropped
    /// along with `self`.
    #[tracing::instrument(level = "info", skip(self))]
    fn destroy(&mut self) {
        tracing::info!(
            items_in_table = self.inode_table.len(),
            "OneMount FUSE filesystem shutting down"
        );

        self.hydration.shutdown();
        self.rt_handle.block_on(self.dehydration.shutdown());
    }

    /// Look up a directory entry by name and get its attributes.
    ///
    /// # Performance
    ///
    /// Target: <1ms. Uses lock-free DashMap lookup.
    #[tracing::instrument(level = "debug", skip(self, _req, reply), fields(parent, name = ?name))]
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name_str = match name.to_str() {
            Some(s) => s,
            None => {
                debug!("lookup: invalid UTF-8 in name {:?}", name);
                reply.error(libc::ENOENT);
                return;
            }
        };

        if name_str.len() > NAME_MAX {
            debug!("lookup: name too long ({} > {})", name_str.len(), NAME_MAX);
            reply.error(libc::ENAMETOOLONG);
            return;
        }

        debug!("lookup(parent={}, name={})", parent, name_str);

        match self.inode_table.lookup(parent, name_str) {
            Some(entry) => {
                entry.increment_lookup();
                let attr = entry.to_file_attr();

                debug!(
                    "lookup: found inode {} for {}, lookup_count={}",
                    entry.ino().get(),
                    name_str,
                    entry.lookup_count()
                );

                reply.entry(&TTL, &attr, 0);
            }
            None => {
                debug!("lookup: {} not found in parent {}", name_str, parent);
                reply.error(libc::ENOENT);
            }
        }
    }

    /// Get file attributes.
    ///
    /// # Performance
    ///
    /// Target: <1ms. Uses lock-free DashMap lookup with O(1) access.
    #[tracing::instrument(level = "debug", skip(self, _req, reply), fields(ino))]
    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        debug!("getattr(ino={})", ino);

        match self.inode_table.get(ino) {
            Some(entry) => {
                let attr = entry.to_file_attr();
                debug!(
                    "getattr: inode {} size={} kind={:?}",
                    ino, attr.size, attr.kind
                );
                reply.attr(&TTL, &attr);
            }
            None => {
                debug!("getattr: inode {} not found", ino);
                reply.error(libc::ENOENT);
            }
        }
    }

    /// Reads directory entries.
    ///
    /// Returns entries for the directory identified by `ino`, starting from `offset`.
    /// This method is purely local - it reads from the in-memory inode table without
    /// making any network requests.
    ///
    /// # Performance
    ///
    /// Target: <10ms for 1000 entries.
    #[tracing::instrument(level = "debug", skip(self, _req, reply), fields(ino, offset))]
    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let current_entry = match self.inode_table.get(ino) {
            Some(entry) => entry,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        if current_entry.kind() != FileType::Directory {
            reply.error(libc::ENOTDIR);
            return;
        }

        let parent_ino = if ino == InodeNumber::ROOT.get() {
            InodeNumber::ROOT.get()
        } else {
            current_entry.parent_ino().get()
        };

        let children = self.inode_table.children(ino);

        let mut current_offset: i64 = 0;

        if offset <= current_offset {
            current_offset += 1;
            if reply.add(ino, current_offset, FileType::Directory, OsStr::new(".")) {
                reply.ok();
                return;
            }
        } else {
            current_offset += 1;
        }

        if offset <= current_offset {
            current_offset += 1;
            if reply.add(
                parent_ino,
                current_offset,
                FileType::Directory,
                OsStr::new(".."),
            ) {
                reply.ok();
                return;
            }
        } else {
            current_offset += 1;
        }

        for child in children {
            if offset <= current_offset {
                current_offset += 1;
                if reply.add(
                    child.ino().get(),
                    current_offset,
                    child.kind(),
                    OsStr::new(child.name()),
                ) {
                    reply.ok();
                    return;
                }
            } else {
                current_offset += 1;
            }
        }

        reply.ok();
    }

    /// Sets file attributes.
    ///
    /// Supports permission changes, timestamp updates, and truncation.
    /// Ownership (uid/gid) is ignored since OneDrive has no concept of Unix
    /// ownership.
    ///
    /// # Errors
    ///
    /// - `ENOENT` - The inode does not exist
    /// - `EISDIR` - A size change was requested on a directory
    #[allow(clippy::too_many_arguments)]
    #[tracing::instrument(level = "debug", skip(self, _req, reply), fields(ino, mode, size))]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!(
            "setattr(ino={}, mode={:?}, size={:?}, atime={:?}, mtime={:?})",
            ino, mode, size, atime, mtime
        );

        let entry = match self.inode_table.get(ino) {
            Some(entry) => entry,
            None => {
                warn!("setattr: inode {} not found", ino);
                reply.error(libc::ENOENT);
                return;
            }
        };

        if size.is_some() && entry.kind() == FileType::Directory {
            warn!("setattr: refusing to resize directory inode {}", ino);
            reply.error(libc::EISDIR);
            return;
        }

        let mut new_size = entry.size();
        let mut dirty = entry.status_inputs().dirty;

        if let Some(requested_size) = size {
            if requested_size != entry.size() {
                let key = cache_key_for(entry.item_id());
                if let Err(e) = self.cache.truncate(&key, requested_size) {
                    warn!("setattr: failed to truncate cache for inode {}: {}", ino, e);
                    reply.error(e.into());
                    return;
                }
                new_size = requested_size;
                dirty = true;
            }
        }

        let new_perm = mode.map(|m| (m & 0o7777) as u16).unwrap_or_else(|| entry.perm());

        let resolve_time = |requested: Option<TimeOrNow>, fallback: SystemTime| match requested {
            Some(TimeOrNow::Now) => SystemTime::now(),
            Some(TimeOrNow::SpecificTime(t)) => t,
            None => fallback,
        };
        let new_atime = resolve_time(atime, entry.atime());
        let new_mtime = resolve_time(mtime, entry.mtime());

        let mut status_inputs = entry.status_inputs();
        status_inputs.dirty = dirty;

        let updated = InodeEntry::new(
            entry.ino(),
            entry.item_id().clone(),
            entry.parent_ino(),
            entry.name().to_string(),
            entry.kind(),
            new_size,
            new_perm,
            new_mtime,
            SystemTime::now(),
            new_atime,
            entry.nlink(),
            status_inputs,
        );
        let attr = updated.to_file_attr();
        self.reinsert_preserving_refcounts(ino, updated);

        reply.attr(&TTL, &attr);
    }

    /// Returns filesystem statistics.
    #[tracing::instrument(level = "debug", skip(self, _req, reply))]
    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        debug!("statfs called");

        const BLOCK_SIZE: u32 = 4096;
        const NAME_MAX: u32 = 255;

        let total_bytes = (self.config.cache_max_size_gb as u64) * 1024 * 1024 * 1024;
        let total_blocks = total_bytes / (BLOCK_SIZE as u64);

        let used_bytes = match self.cache.disk_usage() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("statfs: failed to get disk usage: {}", e);
                0
            }
        };
        let used_blocks = used_bytes / (BLOCK_SIZE as u64);

        let free_blocks = total_blocks.saturating_sub(used_blocks);
        let file_count = self.inode_table.len() as u64;
        let free_files = u64::MAX / 2;

        debug!(
            "statfs: total_blocks={}, free_blocks={}, files={}",
            total_blocks, free_blocks, file_count
        );

        reply.statfs(
            total_blocks,
            free_blocks,
            free_blocks,
            file_count,
            free_files,
            BLOCK_SIZE,
            NAME_MAX,
            BLOCK_SIZE,
        );
    }

    /// Forgets about an inode.
    ///
    /// There is no reply for this method - it completes silently.
    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        debug!("forget(ino={}, nlookup={})", ino, nlookup);

        if let Some(entry) = self.inode_table.get(ino) {
            let new_count = entry.decrement_lookup_by(nlookup);
            debug!(
                "forget: inode {} lookup count decremented from {} to {}",
                ino,
                new_count + nlookup,
                new_count
            );

            if entry.is_expired() {
                debug!(
                    "forget: inode {} is now eligible for eviction (lookup=0, handles=0)",
                    ino
                );
            }
        } else {
            warn!("forget: inode {} not found in table", ino);
        }
    }

    /// Opens a directory for reading.
    ///
    /// # Errors
    ///
    /// - `ENOENT` - The inode does not exist
    /// - `ENOTDIR` - The inode exists but is not a directory
    #[tracing::instrument(level = "debug", skip(self, _req, reply), fields(ino))]
    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        debug!("opendir(ino={})", ino);

        let entry = match self.inode_table.get(ino) {
            Some(entry) => entry,
            None => {
                debug!("opendir: inode {} not found", ino);
                reply.error(libc::ENOENT);
                return;
            }
        };

        if entry.kind() != FileType::Directory {
            debug!("opendir: inode {} is not a directory", ino);
            reply.error(libc::ENOTDIR);
            return;
        }

        let fh = self.alloc_fh();
        debug!("opendir: opened directory ino={} with fh={}", ino, fh);
        reply.opened(fh, FOPEN_KEEP_CACHE);
    }

    /// Releases (closes) an open directory.
    #[tracing::instrument(level = "debug", skip(self, _req, reply), fields(ino, fh))]
    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        debug!("releasedir(ino={}, fh={})", ino, fh);
        reply.ok();
    }

    // ========================================================================
    // File operations (open, read, write, release, flush)
    // ========================================================================

    /// Opens a file for reading or writing.
    ///
    /// For content-absent regular files with a resolvable remote id, this
    /// blocks on hydration before returning, so `read()`/`write()` never
    /// have to deal with in-flight downloads themselves.
    ///
    /// # Errors
    ///
    /// - `ENOENT` - The inode does not exist
    /// - `EISDIR` - The inode exists but is a directory (use opendir instead)
    /// - `EIO` - Hydration of the placeholder failed
    #[tracing::instrument(level = "debug", skip(self, _req, reply), fields(ino, flags))]
    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!("open(ino={}, flags={:#x})", ino, flags);

        let entry = match self.inode_table.get(ino) {
            Some(entry) => entry,
            None => {
                debug!("open: inode {} not found", ino);
                reply.error(libc::ENOENT);
                return;
            }
        };

        if entry.kind() == FileType::Directory {
            debug!("open: inode {} is a directory, use opendir", ino);
            reply.error(libc::EISDIR);
            return;
        }

        if entry.status_inputs().content_absent {
            if let Some(remote_id) = entry.remote_id() {
                debug!("open: inode {} needs hydration before use", ino);
                let hydrate_result = self.rt_handle.block_on(async {
                    self.hydration
                        .hydrate(
                            ino,
                            remote_id.clone(),
                            entry.size(),
                            None,
                            DownloadPriority::Foreground,
                        )
                        .await?;
                    self.hydration.wait_for_completion(ino).await
                });

                if let Err(e) = hydrate_result {
                    warn!("open: hydration failed for inode {}: {}", ino, e);
                    reply.error(e.into());
                    return;
                }
            }
        }

        entry.increment_open_handles();
        debug!(
            "open: inode {} open_handles incremented to {}",
            ino,
            entry.open_handles()
        );

        let fh = self.alloc_fh();

        let item_id = entry.item_id().clone();
        let write_handle = self.write_handle.clone();
        let ino_node = NodeId::new(ino);
        self.rt_handle.spawn(async move {
            let now = chrono::Utc::now();
            if let Err(e) = write_handle.update_last_accessed(ino_node, now).await {
                warn!(item_id = %item_id, "Failed to update last_accessed: {}", e);
            }
        });

        let open_flags = if entry.status_inputs().content_absent {
            0
        } else {
            FOPEN_KEEP_CACHE
        };

        debug!("open: opened file ino={} with fh={}", ino, fh);
        reply.opened(fh, open_flags);
    }

    /// Reads data from an open file.
    ///
    /// Reads always come from the local cache; `open()` guarantees content
    /// has been hydrated before a handle is returned to the kernel.
    ///
    /// # Performance
    ///
    /// Target: <1ms for cached reads. Uses direct file I/O from the content cache.
    #[allow(clippy::too_many_arguments)]
    #[tracing::instrument(level = "debug", skip(self, _req, reply), fields(ino, offset, size))]
    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!(
            "read(ino={}, fh={}, offset={}, size={})",
            ino, fh, offset, size
        );

        let entry = match self.inode_table.get(ino) {
            Some(entry) => entry,
            None => {
                warn!("read: inode {} not found", ino);
                reply.error(libc::ENOENT);
                return;
            }
        };

        let key = cache_key_for(entry.item_id());
        match self.cache.read(&key, offset as u64, size) {
            Ok(data) => {
                debug!(
                    "read: successfully read {} bytes from inode {}",
                    data.len(),
                    ino
                );
                reply.data(&data);
            }
            Err(e) => {
                warn!("read: failed to read from cache for inode {}: {}", ino, e);
                reply.error(e.into());
            }
        }
    }

    /// Writes data to an open file.
    ///
    /// Writes go straight to the local cache (write-through). If the write
    /// extends the file, a fresh `InodeEntry` reflecting the new size is
    /// reinserted and the inode is marked dirty for the upload manager.
    ///
    /// # Performance
    ///
    /// Target: <5ms for cache writes.
    #[allow(clippy::too_many_arguments)]
    #[tracing::instrument(level = "debug", skip(self, _req, data, reply), fields(ino, offset, size = data.len()))]
    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!("write(ino={}, offset={}, size={})", ino, offset, data.len());

        let entry = match self.inode_table.get(ino) {
            Some(entry) => entry,
            None => {
                warn!("write: inode {} not found", ino);
                reply.error(libc::ENOENT);
                return;
            }
        };

        let key = cache_key_for(entry.item_id());
        match self.cache.write_at(&key, offset as u64, data) {
            Ok(bytes_written) => {
                debug!(
                    "write: successfully wrote {} bytes to inode {}",
                    bytes_written, ino
                );

                let new_end = offset as u64 + data.len() as u64;
                let grew = new_end > entry.size();
                if grew || !entry.status_inputs().dirty {
                    let mut status_inputs = entry.status_inputs();
                    status_inputs.dirty = true;
                    status_inputs.content_absent = false;

                    let new_entry = InodeEntry::new(
                        entry.ino(),
                        entry.item_id().clone(),
                        entry.parent_ino(),
                        entry.name().to_string(),
                        entry.kind(),
                        new_end.max(entry.size()),
                        entry.perm(),
                        SystemTime::now(),
                        entry.ctime(),
                        entry.atime(),
                        entry.nlink(),
                        status_inputs,
                    );
                    self.reinsert_preserving_refcounts(ino, new_entry);
                }

                if grew {
                    let repository = SqliteStateRepository::new(self.db_pool.pool().clone());
                    match self.rt_handle.block_on(repository.get_inode(NodeId::new(ino))) {
                        Ok(Some(mut inode)) => {
                            inode.set_size(new_end);
                            if let Err(e) = self
                                .rt_handle
                                .block_on(self.write_handle.save_inode(inode))
                            {
                                warn!("write: failed to persist size for inode {}: {}", ino, e);
                            }
                        }
                        Ok(None) => {
                            warn!("write: inode {} has no database record, size not persisted", ino);
                        }
                        Err(e) => {
                            warn!("write: failed to load inode {} for size persistence: {}", ino, e);
                        }
                    }
                }

                reply.written(bytes_written);
            }
            Err(e) => {
                warn!("write: failed to write to cache for inode {}: {}", ino, e);
                reply.error(e.into());
            }
        }
    }

    /// Releases (closes) an open file.
    ///
    /// When the last handle closes, notifies the dehydration manager so it
    /// can reclaim space immediately if the cache is over its threshold.
    #[allow(clippy::too_many_arguments)]
    #[tracing::instrument(level = "debug", skip(self, _req, reply), fields(ino, fh))]
    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!("release(ino={}, fh={})", ino, fh);

        if let Some(entry) = self.inode_table.get(ino) {
            let new_count = entry.decrement_open_handles();
            debug!(
                "release: inode {} open_handles decremented to {}",
                ino, new_count
            );

            if new_count == 0 {
                let dehydration = self.dehydration.clone();
                self.rt_handle.spawn(async move {
                    dehydration.notify_file_closed(ino).await;
                });
            }
        } else {
            warn!("release: inode {} not found (may have been evicted)", ino);
        }

        reply.ok();
    }

    /// Flushes cached data to permanent storage.
    ///
    /// Writes already went straight to the local cache (write-through), so
    /// there is nothing to copy here. Instead this recomputes the content
    /// hash for a dirty file and queues a high-priority upload, then returns
    /// immediately without waiting for the upload to finish.
    fn flush(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _lock_owner: u64,
        reply: ReplyEmpty,
    ) {
        debug!("flush(ino={}, fh={})", ino, fh);
        self.flush_dirty_content(ino);
        reply.ok();
    }

    /// Synchronizes file content, ahead of `close()`.
    ///
    /// Shares `flush`'s logic: a dirty file's content hash is recomputed and
    /// a high-priority upload is queued without blocking the caller.
    fn fsync(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _datasync: bool,
        reply: ReplyEmpty,
    ) {
        debug!("fsync(ino={}, fh={})", ino, fh);
        self.flush_dirty_content(ino);
        reply.ok();
    }

    // ========================================================================
    // Directory creation and removal
    // ========================================================================

    /// Creates a new directory.
    ///
    /// # Errors
    ///
    /// - `EINVAL` - The name contains invalid UTF-8
    /// - `ENOENT` - The parent inode does not exist
    /// - `ENOTDIR` - The parent inode is not a directory
    /// - `EEXIST` - An entry with the same name already exists in the parent
    /// - `EIO` - Failed to allocate or persist the new inode
    #[tracing::instrument(level = "info", skip(self, _req, reply), fields(parent, name = ?name, mode))]
    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        let name_str = match name.to_str() {
            Some(s) => s,
            None => {
                debug!("mkdir: invalid UTF-8 in name {:?}", name);
                reply.error(libc::EINVAL);
                return;
            }
        };

        if name_str.len() > NAME_MAX {
            debug!("mkdir: name too long ({} > {})", name_str.len(), NAME_MAX);
            reply.error(libc::ENAMETOOLONG);
            return;
        }

        debug!(
            "mkdir(parent={}, name={}, mode={:#o}, umask={:#o})",
            parent, name_str, mode, umask
        );

        let parent_entry = match self.inode_table.get(parent) {
            Some(entry) => entry,
            None => {
                debug!("mkdir: parent inode {} not found", parent);
                reply.error(libc::ENOENT);
                return;
            }
        };

        if parent_entry.kind() != FileType::Directory {
            debug!("mkdir: parent inode {} is not a directory", parent);
            reply.error(libc::ENOTDIR);
            return;
        }

        if self.inode_table.lookup(parent, name_str).is_some() {
            debug!(
                "mkdir: entry '{}' already exists in parent {}",
                name_str, parent
            );
            reply.error(libc::EEXIST);
            return;
        }

        if let Err(e) = validate_child_name(name_str) {
            debug!("mkdir: rejected name '{}': {}", name_str, e);
            reply.error(libc::EINVAL);
            return;
        }

        let new_ino = match self.rt_handle.block_on(self.write_handle.allocate_inode()) {
            Ok(ino) => ino,
            Err(e) => {
                warn!("mkdir: failed to allocate inode: {}", e);
                reply.error(libc::EIO);
                return;
            }
        };

        let inode = Inode::new_local_dir(new_ino, NodeId::new(parent), name_str.to_string());
        let mut inode = inode;
        inode.set_permission_bits((mode & !umask) | 0o111);

        if let Err(e) = self
            .rt_handle
            .block_on(self.write_handle.save_inode(inode.clone()))
        {
            warn!("mkdir: failed to persist new directory: {}", e);
            reply.error(libc::EIO);
            return;
        }

        let entry = inode_to_entry(&inode, false);
        let attr = entry.to_file_attr();
        entry.increment_lookup();
        self.inode_table.insert(entry);

        debug!(
            "mkdir: created directory '{}' with inode {}",
            name_str,
            new_ino.as_u64()
        );

        reply.entry(&TTL, &attr, 0);
    }

    /// Removes an empty directory.
    ///
    /// # Errors
    ///
    /// - `EINVAL` - The name contains invalid UTF-8
    /// - `ENOENT` - The directory does not exist
    /// - `ENOTDIR` - The entry exists but is not a directory
    /// - `ENOTEMPTY` - The directory is not empty
    #[tracing::instrument(level = "info", skip(self, _req, reply), fields(parent, name = ?name))]
    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name_str = match name.to_str() {
            Some(s) => s,
            None => {
                debug!("rmdir: invalid UTF-8 in name {:?}", name);
                reply.error(libc::EINVAL);
                return;
            }
        };

        if name_str.len() > NAME_MAX {
            debug!("rmdir: name too long ({} > {})", name_str.len(), NAME_MAX);
            reply.error(libc::ENAMETOOLONG);
            return;
        }

        debug!("rmdir(parent={}, name={})", parent, name_str);

        let child_entry = match self.inode_table.lookup(parent, name_str) {
            Some(entry) => entry,
            None => {
                debug!("rmdir: '{}' not found in parent {}", name_str, parent);
                reply.error(libc::ENOENT);
                return;
            }
        };

        if child_entry.kind() != FileType::Directory {
            debug!(
                "rmdir: '{}' (inode {}) is not a directory",
                name_str,
                child_entry.ino().get()
            );
            reply.error(libc::ENOTDIR);
            return;
        }

        let child_ino = child_entry.ino().get();

        let children = self.inode_table.children(child_ino);
        if !children.is_empty() {
            debug!(
                "rmdir: directory '{}' (inode {}) is not empty ({} children)",
                name_str,
                child_ino,
                children.len()
            );
            reply.error(libc::ENOTEMPTY);
            return;
        }

        if let Err(e) = self
            .rt_handle
            .block_on(self.write_handle.delete_inode_recursive(NodeId::new(child_ino)))
        {
            warn!("rmdir: failed to delete inode {} from database: {}", child_ino, e);
            reply.error(libc::EIO);
            return;
        }

        self.inode_table.remove(child_ino);

        debug!(
            "rmdir: removed directory '{}' (inode {})",
            name_str, child_ino
        );

        reply.ok();
    }

    // ========================================================================
    // Rename operation
    // ========================================================================

    /// Renames a file or directory.
    ///
    /// # Errors
    ///
    /// - `EINVAL` - Invalid UTF-8 in name or newname
    /// - `ENOENT` - Source entry not found
    /// - `EISDIR` - Destination is a directory but source is a file
    /// - `ENOTDIR` - Destination is a file but source is a directory
    /// - `EIO` - Failed to persist the rename
    #[tracing::instrument(level = "info", skip(self, _req, reply), fields(parent, name = ?name, newparent, newname = ?newname))]
    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let name_str = match name.to_str() {
            Some(s) => s,
            None => {
                debug!("rename: invalid UTF-8 in source name {:?}", name);
                reply.error(libc::EINVAL);
                return;
            }
        };

        let newname_str = match newname.to_str() {
            Some(s) => s,
            None => {
                debug!("rename: invalid UTF-8 in destination name {:?}", newname);
                reply.error(libc::EINVAL);
                return;
            }
        };

        if name_str.len() > NAME_MAX {
            debug!("rename: source name too long ({} > {})", name_str.len(), NAME_MAX);
            reply.error(libc::ENAMETOOLONG);
            return;
        }
        if newname_str.len() > NAME_MAX {
            debug!("rename: dest name too long ({} > {})", newname_str.len(), NAME_MAX);
            reply.error(libc::ENAMETOOLONG);
            return;
        }

        debug!(
            "rename(parent={}, name={}, newparent={}, newname={})",
            parent, name_str, newparent, newname_str
        );

        let source_entry = match self.inode_table.lookup(parent, name_str) {
            Some(entry) => entry,
            None => {
                debug!(
                    "rename: source {} not found in parent {}",
                    name_str, parent
                );
                reply.error(libc::ENOENT);
                return;
            }
        };

        let source_ino = source_entry.ino().get();
        let source_kind = source_entry.kind();

        if let Some(dest_entry) = self.inode_table.lookup(newparent, newname_str) {
            let dest_ino = dest_entry.ino().get();

            // A case-only rename within the same directory ("foo.txt" ->
            // "Foo.txt") resolves the case-insensitive destination lookup
            // back to the source itself. That's not a collision to replace,
            // just a rename; skip the replace-destination logic below.
            if dest_ino != source_ino {
                let dest_kind = dest_entry.kind();

                if dest_kind == FileType::Directory && source_kind != FileType::Directory {
                    debug!(
                        "rename: cannot replace directory {} with file {}",
                        newname_str, name_str
                    );
                    reply.error(libc::EISDIR);
                    return;
                }

                if dest_kind != FileType::Directory && source_kind == FileType::Directory {
                    debug!(
                        "rename: cannot replace file {} with directory {}",
                        newname_str, name_str
                    );
                    reply.error(libc::ENOTDIR);
                    return;
                }

                debug!(
                    "rename: removing destination entry {} (ino={})",
                    newname_str, dest_ino
                );
                if let Err(e) = self
                    .rt_handle
                    .block_on(self.write_handle.delete_inode_recursive(NodeId::new(dest_ino)))
                {
                    warn!("rename: failed to delete replaced destination {}: {}", dest_ino, e);
                    reply.error(libc::EIO);
                    return;
                }
                self.inode_table.remove(dest_ino);
            }
        }

        let repository = SqliteStateRepository::new(self.db_pool.pool().clone());
        let mut inode = match self
            .rt_handle
            .block_on(repository.get_inode(NodeId::new(source_ino)))
        {
            Ok(Some(inode)) => inode,
            Ok(None) => {
                warn!("rename: source inode {} has no database record", source_ino);
                reply.error(libc::ENOENT);
                return;
            }
            Err(e) => {
                warn!("rename: failed to load source inode {}: {}", source_ino, e);
                reply.error(libc::EIO);
                return;
            }
        };

        inode.reparent(NodeId::new(newparent));
        if let Err(e) = inode.rename(newname_str) {
            debug!("rename: invalid destination name '{}': {}", newname_str, e);
            reply.error(libc::EINVAL);
            return;
        }
        inode.mark_dirty();

        if let Err(e) = self
            .rt_handle
            .block_on(self.write_handle.save_inode(inode.clone()))
        {
            warn!("rename: failed to persist renamed inode {}: {}", source_ino, e);
            reply.error(libc::EIO);
            return;
        }

        let content_absent = source_entry.status_inputs().content_absent;
        let new_entry = inode_to_entry(&inode, content_absent);
        self.reinsert_preserving_refcounts(source_ino, new_entry);

        debug!(
            "rename: successfully renamed {} -> {} (ino={})",
            name_str, newname_str, source_ino
        );

        reply.ok();
    }

    // ========================================================================
    // File creation and deletion (create, unlink)
    // ========================================================================

    /// Creates a new regular file.
    ///
    /// Called by the kernel when a new file is created (e.g. via `open()`
    /// with O_CREAT, or the `creat()` syscall). The new inode has no remote
    /// id until the upload manager assigns one.
    ///
    /// # Errors
    ///
    /// - `EINVAL` - Invalid UTF-8 in filename
    /// - `ENOENT` - Parent directory not found
    /// - `ENOTDIR` - Parent is not a directory
    /// - `EEXIST` - File already exists
    /// - `EIO` - Database or internal error
    #[tracing::instrument(level = "info", skip(self, _req, reply), fields(parent, name = ?name, mode, flags))]
    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let name_str = match name.to_str() {
            Some(s) => s,
            None => {
                debug!("create: invalid UTF-8 in name {:?}", name);
                reply.error(libc::EINVAL);
                return;
            }
        };

        if name_str.len() > NAME_MAX {
            debug!("create: name too long ({} > {})", name_str.len(), NAME_MAX);
            reply.error(libc::ENAMETOOLONG);
            return;
        }

        debug!(
            "create(parent={}, name={}, mode={:#o}, umask={:#o}, flags={:#x})",
            parent, name_str, mode, umask, flags
        );

        let parent_entry = match self.inode_table.get(parent) {
            Some(entry) => entry,
            None => {
                debug!("create: parent inode {} not found", parent);
                reply.error(libc::ENOENT);
                return;
            }
        };

        if parent_entry.kind() != FileType::Directory {
            debug!("create: parent inode {} is not a directory", parent);
            reply.error(libc::ENOTDIR);
            return;
        }

        if self.inode_table.lookup(parent, name_str).is_some() {
            debug!("create: {} already exists in parent {}", name_str, parent);
            reply.error(libc::EEXIST);
            return;
        }

        if let Err(e) = validate_child_name(name_str) {
            debug!("create: rejected name '{}': {}", name_str, e);
            reply.error(libc::EINVAL);
            return;
        }

        let new_ino = match self.rt_handle.block_on(self.write_handle.allocate_inode()) {
            Ok(ino) => ino,
            Err(e) => {
                warn!("create: failed to allocate inode: {}", e);
                reply.error(libc::EIO);
                return;
            }
        };

        let mut inode = Inode::new_local_file(new_ino, NodeId::new(parent), name_str.to_string());
        inode.set_permission_bits(mode & !umask);
        inode.mark_dirty();

        if let Err(e) = self
            .rt_handle
            .block_on(self.write_handle.save_inode(inode.clone()))
        {
            warn!("create: failed to persist new file: {}", e);
            reply.error(libc::EIO);
            return;
        }

        let entry = inode_to_entry(&inode, false);
        let attr = entry.to_file_attr();
        self.inode_table.insert(entry);

        if let Some(entry) = self.inode_table.get(new_ino.as_u64()) {
            entry.increment_lookup();
            entry.increment_open_handles();
        }

        let fh = self.alloc_fh();

        debug!(
            "create: created file {} with inode {}, fh={}",
            name_str,
            new_ino.as_u64(),
            fh
        );

        reply.created(&TTL, &attr, 0, fh, flags as u32);
    }

    /// Removes a file (unlink).
    ///
    /// # Errors
    ///
    /// - `EINVAL` - Invalid UTF-8 in filename
    /// - `ENOENT` - File not found
    /// - `EISDIR` - Target is a directory (use rmdir instead)
    /// - `EIO` - Database or internal error
    #[tracing::instrument(level = "info", skip(self, _req, reply), fields(parent, name = ?name))]
    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name_str = match name.to_str() {
            Some(s) => s,
            None => {
                debug!("unlink: invalid UTF-8 in name {:?}", name);
                reply.error(libc::EINVAL);
                return;
            }
        };

        if name_str.len() > NAME_MAX {
            debug!("unlink: name too long ({} > {})", name_str.len(), NAME_MAX);
            reply.error(libc::ENAMETOOLONG);
            return;
        }

        debug!("unlink(parent={}, name={})", parent, name_str);

        let child_entry = match self.inode_table.lookup(parent, name_str) {
            Some(entry) => entry,
            None => {
                debug!("unlink: {} not found in parent {}", name_str, parent);
                reply.error(libc::ENOENT);
                return;
            }
        };

        if child_entry.kind() == FileType::Directory {
            debug!("unlink: {} is a directory, use rmdir", name_str);
            reply.error(libc::EISDIR);
            return;
        }

        let child_ino = child_entry.ino().get();
        let item_id = child_entry.item_id().clone();

        let open_handles = child_entry.open_handles();
        if open_handles > 0 {
            debug!(
                "unlink: {} has {} open handles, removing anyway",
                name_str, open_handles
            );
        }

        if let Err(e) = self
            .rt_handle
            .block_on(self.write_handle.delete_inode_recursive(NodeId::new(child_ino)))
        {
            warn!("unlink: failed to delete inode {} from database: {}", child_ino, e);
            reply.error(libc::EIO);
            return;
        }

        let key = cache_key_for(&item_id);
        if let Err(e) = self.cache.remove(&key) {
            warn!("unlink: failed to remove cached content: {}", e);
        }

        self.inode_table.remove(child_ino);

        debug!("unlink: removed file {} (inode {})", name_str, child_ino);

        reply.ok();
    }

    // ========================================================================
    // Extended Attributes (xattr) operations
    // ========================================================================

    /// Gets the value of an extended attribute.
    ///
    /// # Supported Attributes
    ///
    /// - `user.onemount.status` - Current derived file status
    /// - `user.onemount.error` - Last error message, if the status is an error
    #[tracing::instrument(level = "debug", skip(self, _req, reply), fields(ino, name = ?name, size))]
    fn getxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        size: u32,
        reply: ReplyXattr,
    ) {
        let name_str = match name.to_str() {
            Some(s) => s,
            None => {
                debug!("getxattr: invalid attribute name for inode {}", ino);
                reply.error(libc::ENODATA);
                return;
            }
        };

        debug!("getxattr: ino={}, name={}, size={}", ino, name_str, size);

        let entry = match self.inode_table.get(ino) {
            Some(e) => e,
            None => {
                debug!("getxattr: inode {} not found", ino);
                reply.error(libc::ENOENT);
                return;
            }
        };

        let value = match xattr::get_xattr(&entry.status(), name_str) {
            Some(v) => v,
            None => {
                debug!("getxattr: attribute {} not found for inode {}", name_str, ino);
                reply.error(libc::ENODATA);
                return;
            }
        };

        if size == 0 {
            reply.size(value.len() as u32);
            return;
        }

        if (size as usize) < value.len() {
            debug!(
                "getxattr: buffer too small ({} < {}) for inode {}",
                size,
                value.len(),
                ino
            );
            reply.error(libc::ERANGE);
            return;
        }

        reply.data(&value);
    }

    /// Lists extended attributes for an inode.
    #[tracing::instrument(level = "debug", skip(self, _req, reply), fields(ino, size))]
    fn listxattr(&mut self, _req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        debug!("listxattr: ino={}, size={}", ino, size);

        if self.inode_table.get(ino).is_none() {
            debug!("listxattr: inode {} not found", ino);
            reply.error(libc::ENOENT);
            return;
        }

        let attrs = xattr::list_xattrs();

        let mut data = Vec::new();
        for attr in attrs {
            data.extend_from_slice(attr.as_bytes());
            data.push(0);
        }

        if size == 0 {
            reply.size(data.len() as u32);
            return;
        }

        if (size as usize) < data.len() {
            debug!(
                "listxattr: buffer too small ({} < {}) for inode {}",
                size,
                data.len(),
                ino
            );
            reply.error(libc::ERANGE);
            return;
        }

        reply.data(&data);
    }

    /// Sets an extended attribute value.
    ///
    /// OneMount extended attributes are read-only, derived from sync state.
    /// This always returns EACCES for our namespace and ENOTSUP otherwise.
    #[tracing::instrument(level = "debug", skip(self, _req, _value, reply), fields(ino, name = ?name))]
    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        _value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        let name_str = name.to_str().unwrap_or("<invalid>");
        debug!("setxattr: ino={}, name={} (denied)", ino, name_str);

        if name_str.starts_with("user.onemount.") {
            reply.error(libc::EACCES);
        } else {
            reply.error(libc::ENOTSUP);
        }
    }

    /// Removes an extended attribute.
    ///
    /// OneMount extended attributes are read-only, derived from sync state.
    /// This always returns EACCES for our namespace and ENOTSUP otherwise.
    #[tracing::instrument(level = "debug", skip(self, _req, reply), fields(ino, name = ?name))]
    fn removexattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        let name_str = name.to_str().unwrap_or("<invalid>");
        debug!("removexattr: ino={}, name={} (denied)", ino, name_str);

        if name_str.starts_with("user.onemount.") {
            reply.error(libc::EACCES);
        } else {
            reply.error(libc::ENOTSUP);
        }
    }
}

// ============================================================================
// Test helper methods for OneMountFs
// ============================================================================

#[cfg(test)]
impl OneMountFs {
    /// Test helper: get entry by inode
    pub fn get_entry(&self, ino: u64) -> Option<Arc<InodeEntry>> {
        self.inode_table.get(ino)
    }

    /// Test helper: lookup entry by parent and name
    pub fn lookup_entry(&self, parent: u64, name: &str) -> Option<Arc<InodeEntry>> {
        self.inode_table.lookup(parent, name)
    }

    /// Test helper: get children of a directory (excludes the directory itself)
    ///
    /// Unlike `InodeTable::children()`, this filters out entries where
    /// the entry's inode equals its parent_ino (like the root directory).
    pub fn get_children(&self, parent: u64) -> Vec<Arc<InodeEntry>> {
        self.inode_table
            .children(parent)
            .into_iter()
            .filter(|e| e.ino().get() != e.parent_ino().get())
            .collect()
    }

    /// Test helper: insert an inode entry directly into the table
    pub fn insert_entry(&self, entry: InodeEntry) {
        self.inode_table.insert(entry);
    }
}

#[cfg(test)]
mod tests {
    use onemount_core::domain::status::StatusInputs;
    use onemount_graph::client::GraphClient;

    use super::*;

    /// Helper to create an in-memory test setup (db, cache, hydration provider).
    async fn create_test_setup() -> (
        Handle,
        DatabasePool,
        FuseConfig,
        Arc<ContentCache>,
        Arc<GraphCloudProvider>,
    ) {
        let pool = DatabasePool::in_memory().await.unwrap();
        let config = FuseConfig::default();

        let temp_dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ContentCache::new(temp_dir.path().to_path_buf()).unwrap());
        let provider = Arc::new(GraphCloudProvider::new(GraphClient::new("test-token")));

        (Handle::current(), pool, config, cache, provider)
    }

    /// Helper to create a test InodeEntry
    fn make_test_entry(ino: u64, parent_ino: u64, name: &str, is_dir: bool) -> InodeEntry {
        let status_inputs = StatusInputs::default();
        InodeEntry::new(
            InodeNumber::new(ino),
            ItemId::from_remote(RemoteId::new(format!("remote_{}", ino)).unwrap()),
            InodeNumber::new(parent_ino),
            name.to_string(),
            if is_dir {
                FileType::Directory
            } else {
                FileType::RegularFile
            },
            if is_dir { 0 } else { 1024 },
            if is_dir { 0o755 } else { 0o644 },
            SystemTime::now(),
            SystemTime::now(),
            SystemTime::now(),
            if is_dir { 2 } else { 1 },
            status_inputs,
        )
    }

    #[tokio::test]
    async fn test_new_creates_valid_instance() {
        let (rt_handle, db_pool, config, cache, provider) = create_test_setup().await;

        let fs = OneMountFs::new(rt_handle, db_pool, config, cache, provider, None);

        assert!(fs.inode_table().is_empty());
        assert_eq!(fs.alloc_fh(), 1);
    }

    #[tokio::test]
    async fn test_alloc_fh_increments() {
        let (rt_handle, db_pool, config, cache, provider) = create_test_setup().await;
        let fs = OneMountFs::new(rt_handle, db_pool, config, cache, provider, None);

        let first = fs.alloc_fh();
        let second = fs.alloc_fh();
        let third = fs.alloc_fh();

        assert_eq!(second, first + 1);
        assert_eq!(third, second + 1);
    }

    #[tokio::test]
    async fn test_insert_and_lookup_entry() {
        let (rt_handle, db_pool, config, cache, provider) = create_test_setup().await;
        let fs = OneMountFs::new(rt_handle, db_pool, config, cache, provider, None);

        let entry = make_test_entry(2, InodeNumber::ROOT.get(), "hello.txt", false);
        fs.insert_entry(entry);

        let found = fs.lookup_entry(InodeNumber::ROOT.get(), "hello.txt");
        assert!(found.is_some());
        assert_eq!(found.unwrap().ino().get(), 2);
    }

    #[tokio::test]
    async fn test_get_children_excludes_self_referential_root() {
        let (rt_handle, db_pool, config, cache, provider) = create_test_setup().await;
        let fs = OneMountFs::new(rt_handle, db_pool, config, cache, provider, None);

        // Root points to itself as its own parent.
        fs.insert_entry(make_test_entry(
            InodeNumber::ROOT.get(),
            InodeNumber::ROOT.get(),
            "",
            true,
        ));
        fs.insert_entry(make_test_entry(2, InodeNumber::ROOT.get(), "child", false));

        let children = fs.get_children(InodeNumber::ROOT.get());
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name(), "child");
    }

    #[tokio::test]
    async fn test_cache_key_for_remote_item_uses_remote_id() {
        let remote_id = RemoteId::new("abc123".to_string()).unwrap();
        let item_id = ItemId::from_remote(remote_id.clone());

        assert_eq!(cache_key_for(&item_id), remote_id);
    }

    #[tokio::test]
    async fn test_cache_key_for_local_item_reuses_local_uuid_string() {
        let item_id = ItemId::new_local();

        let key = cache_key_for(&item_id);
        assert_eq!(key.as_str(), item_id.as_str());
    }

    #[tokio::test]
    async fn test_inode_to_entry_maps_fields() {
        let inode = Inode::new_local_file(NodeId::new(5), NodeId::ROOT, "notes.txt".to_string());
        let entry = inode_to_entry(&inode, true);

        assert_eq!(entry.ino().get(), 5);
        assert_eq!(entry.name(), "notes.txt");
        assert_eq!(entry.kind(), FileType::RegularFile);
        assert_eq!(entry.nlink(), 1);
        assert!(entry.status_inputs().content_absent);
    }

    #[tokio::test]
    async fn test_inode_to_entry_directory_has_nlink_two() {
        let inode = Inode::new_local_dir(NodeId::new(7), NodeId::ROOT, "docs".to_string());
        let entry = inode_to_entry(&inode, false);

        assert_eq!(entry.kind(), FileType::Directory);
        assert_eq!(entry.nlink(), 2);
        // Directories are never reported content-absent.
        assert!(!entry.status_inputs().content_absent);
    }
}
