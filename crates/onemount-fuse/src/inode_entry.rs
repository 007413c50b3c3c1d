//! Inode entry representation for the FUSE filesystem.
//!
//! Contains file metadata and state for FUSE operations.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
    time::SystemTime,
};

use onemount_core::domain::{FileStatus, ItemId, RemoteId, StatusInputs};

/// A newtype wrapper for FUSE inode numbers.
///
/// Provides type safety to prevent accidental mixing of raw u64 values
/// with inode identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InodeNumber(u64);

impl InodeNumber {
    /// Root inode number (always 1 per FUSE convention)
    pub const ROOT: InodeNumber = InodeNumber(1);

    /// Create a new inode number
    pub fn new(val: u64) -> Self {
        InodeNumber(val)
    }

    /// Get the raw u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for InodeNumber {
    fn from(val: u64) -> Self {
        InodeNumber(val)
    }
}

impl From<InodeNumber> for u64 {
    fn from(ino: InodeNumber) -> Self {
        ino.0
    }
}

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// In-memory representation of a FUSE inode.
///
/// Contains all metadata needed for FUSE operations, including reference
/// counting for kernel lookups and open file handles. This struct is designed
/// for fast lookups in the inode table without requiring database queries.
///
/// ## Reference Counting
///
/// - `lookup_count`: Tracks FUSE kernel references via `lookup()`/`forget()`
/// - `open_handles`: Tracks open file handles via `open()`/`release()`
///
/// An entry is eligible for eviction from the in-memory table when both
/// counters reach zero (see `is_expired()`).
///
/// ## Atomic Operations
///
/// The reference counters use `AtomicU64` to allow lock-free increment/decrement
/// from concurrent FUSE operations.
///
/// ## Status
///
/// `status_inputs` carries the transient facts (dirty, conflicted, in-flight
/// transfer, error) that `FileStatus::derive` combines into the externally
/// visible status; it is not itself persisted.
#[derive(Debug)]
pub struct InodeEntry {
    /// FUSE inode number (unique within this filesystem instance)
    pub ino: InodeNumber,

    /// Reference to the backing item in the metadata store
    pub item_id: ItemId,

    /// Parent directory inode (ROOT for top-level items)
    pub parent_ino: InodeNumber,

    /// Entry name in parent directory
    pub name: String,

    /// File type (Regular file or Directory)
    pub kind: fuser::FileType,

    /// File size in bytes (real size from cloud, not local cache)
    pub size: u64,

    /// Unix permissions (e.g., 0o644 for files, 0o755 for directories)
    pub perm: u16,

    /// Last modification time
    pub mtime: SystemTime,

    /// Last metadata change time
    pub ctime: SystemTime,

    /// Last access time
    pub atime: SystemTime,

    /// Number of hard links (always 1 for OneDrive files)
    pub nlink: u32,

    /// Kernel reference count (incremented by lookup, decremented by forget)
    lookup_count: AtomicU64,

    /// Number of open file handles
    open_handles: AtomicU64,

    /// Transient facts driving this item's derived status.
    ///
    /// Wrapped in a `Mutex` because entries live behind a shared `Arc` in the
    /// inode table; the download/upload managers update progress in place
    /// rather than replacing the whole entry (which would lose the refcounts
    /// above).
    status_inputs: Mutex<StatusInputs>,
}

impl InodeEntry {
    /// Creates a new inode entry.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ino: InodeNumber,
        item_id: ItemId,
        parent_ino: InodeNumber,
        name: String,
        kind: fuser::FileType,
        size: u64,
        perm: u16,
        mtime: SystemTime,
        ctime: SystemTime,
        atime: SystemTime,
        nlink: u32,
        status_inputs: StatusInputs,
    ) -> Self {
        Self {
            ino,
            item_id,
            parent_ino,
            name,
            kind,
            size,
            perm,
            mtime,
            ctime,
            atime,
            nlink,
            lookup_count: AtomicU64::new(0),
            open_handles: AtomicU64::new(0),
            status_inputs: Mutex::new(status_inputs),
        }
    }

    /// Converts this inode entry to a FUSE FileAttr structure.
    ///
    /// This is used to respond to `getattr()` and `lookup()` calls.
    pub fn to_file_attr(&self) -> fuser::FileAttr {
        fuser::FileAttr {
            ino: self.ino.get(),
            size: self.size,
            blocks: self.size.div_ceil(512), // Round up to 512-byte blocks
            atime: self.atime,
            mtime: self.mtime,
            ctime: self.ctime,
            crtime: self.ctime, // Creation time = metadata change time
            kind: self.kind,
            perm: self.perm,
            nlink: self.nlink,
            uid: unsafe { libc::getuid() }, // Current user
            gid: unsafe { libc::getgid() }, // Current group
            rdev: 0,                        // Not a device file
            blksize: 4096,                  // Standard block size
            flags: 0,                       // No special flags
        }
    }

    /// Atomically increments the lookup count.
    ///
    /// Called when the kernel issues a `lookup()` operation.
    pub fn increment_lookup(&self) {
        self.lookup_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Atomically decrements the lookup count and returns the new value.
    ///
    /// Called when the kernel issues a `forget()` operation.
    pub fn decrement_lookup(&self) -> u64 {
        self.lookup_count.fetch_sub(1, Ordering::SeqCst) - 1
    }

    /// Atomically decrements the lookup count by a specified amount.
    ///
    /// Called when the kernel issues a `forget()` operation with nlookup > 1.
    pub fn decrement_lookup_by(&self, count: u64) -> u64 {
        self.lookup_count.fetch_sub(count, Ordering::SeqCst) - count
    }

    /// Atomically increments the open handles count.
    ///
    /// Called when a file is opened via `open()` or `opendir()`.
    pub fn increment_open_handles(&self) {
        self.open_handles.fetch_add(1, Ordering::SeqCst);
    }

    /// Atomically decrements the open handles count and returns the new value.
    ///
    /// Called when a file is closed via `release()` or `releasedir()`.
    pub fn decrement_open_handles(&self) -> u64 {
        self.open_handles.fetch_sub(1, Ordering::SeqCst) - 1
    }

    /// Returns true if this entry is eligible for eviction from memory.
    ///
    /// An entry can be evicted when it has no kernel references
    /// (lookup_count == 0) and no open file handles (open_handles == 0).
    pub fn is_expired(&self) -> bool {
        self.lookup_count.load(Ordering::SeqCst) == 0
            && self.open_handles.load(Ordering::SeqCst) == 0
    }

    /// Derives the externally-visible status from the current transient inputs.
    pub fn status(&self) -> FileStatus {
        FileStatus::derive(&self.status_inputs.lock().unwrap())
    }

    /// Returns a copy of the current transient status inputs.
    pub fn status_inputs(&self) -> StatusInputs {
        self.status_inputs.lock().unwrap().clone()
    }

    /// Applies an in-place update to the transient status inputs.
    ///
    /// Used by the download/upload managers to report progress and by FUSE
    /// write handlers to flag an item dirty, without replacing the entry.
    pub fn update_status_inputs(&self, f: impl FnOnce(&mut StatusInputs)) {
        f(&mut self.status_inputs.lock().unwrap());
    }

    // ========================================================================
    // Getters
    // ========================================================================

    /// Returns the inode number.
    pub fn ino(&self) -> InodeNumber {
        self.ino
    }

    /// Returns the backing item id.
    pub fn item_id(&self) -> &ItemId {
        &self.item_id
    }

    /// Returns the OneDrive remote ID, if this item has been synced remotely.
    pub fn remote_id(&self) -> Option<&RemoteId> {
        self.item_id.as_remote()
    }

    /// Returns the parent inode number.
    pub fn parent_ino(&self) -> InodeNumber {
        self.parent_ino
    }

    /// Returns the entry name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the file type.
    pub fn kind(&self) -> fuser::FileType {
        self.kind
    }

    /// Returns the file size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the Unix permissions.
    pub fn perm(&self) -> u16 {
        self.perm
    }

    /// Returns the last modification time.
    pub fn mtime(&self) -> SystemTime {
        self.mtime
    }

    /// Returns the last metadata change time.
    pub fn ctime(&self) -> SystemTime {
        self.ctime
    }

    /// Returns the last access time.
    pub fn atime(&self) -> SystemTime {
        self.atime
    }

    /// Returns the number of hard links.
    pub fn nlink(&self) -> u32 {
        self.nlink
    }

    /// Returns the current lookup count.
    pub fn lookup_count(&self) -> u64 {
        self.lookup_count.load(Ordering::SeqCst)
    }

    /// Returns the current open handles count.
    pub fn open_handles(&self) -> u64 {
        self.open_handles.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use onemount_core::domain::ItemId;

    use super::*;

    fn create_test_entry(status_inputs: StatusInputs) -> InodeEntry {
        InodeEntry::new(
            InodeNumber::new(2),
            ItemId::new_local(),
            InodeNumber::ROOT,
            "test.txt".to_string(),
            fuser::FileType::RegularFile,
            1024,
            0o644,
            SystemTime::now(),
            SystemTime::now(),
            SystemTime::now(),
            1,
            status_inputs,
        )
    }

    #[test]
    fn test_new_entry_starts_with_zero_refcounts() {
        let entry = create_test_entry(StatusInputs::default());
        assert_eq!(entry.lookup_count(), 0);
        assert_eq!(entry.open_handles(), 0);
        assert!(entry.is_expired());
    }

    #[test]
    fn test_lookup_refcounting() {
        let entry = create_test_entry(StatusInputs::default());
        entry.increment_lookup();
        entry.increment_lookup();
        assert_eq!(entry.lookup_count(), 2);
        assert!(!entry.is_expired());

        assert_eq!(entry.decrement_lookup(), 1);
        assert_eq!(entry.decrement_lookup(), 0);
        assert!(entry.is_expired());
    }

    #[test]
    fn test_decrement_lookup_by() {
        let entry = create_test_entry(StatusInputs::default());
        entry.increment_lookup();
        entry.increment_lookup();
        entry.increment_lookup();
        assert_eq!(entry.decrement_lookup_by(3), 0);
    }

    #[test]
    fn test_open_handle_refcounting() {
        let entry = create_test_entry(StatusInputs::default());
        entry.increment_open_handles();
        assert_eq!(entry.open_handles(), 1);
        assert!(!entry.is_expired());

        assert_eq!(entry.decrement_open_handles(), 0);
        assert!(entry.is_expired());
    }

    #[test]
    fn test_expired_requires_both_counters_zero() {
        let entry = create_test_entry(StatusInputs::default());
        entry.increment_lookup();
        entry.increment_open_handles();
        assert!(!entry.is_expired());

        entry.decrement_lookup();
        assert!(!entry.is_expired());

        entry.decrement_open_handles();
        assert!(entry.is_expired());
    }

    #[test]
    fn test_status_derivation_default_synced() {
        let entry = create_test_entry(StatusInputs::default());
        assert_eq!(entry.status(), FileStatus::Synced);
    }

    #[test]
    fn test_status_derivation_dirty_is_modified() {
        let entry = create_test_entry(StatusInputs {
            dirty: true,
            ..Default::default()
        });
        assert_eq!(entry.status(), FileStatus::Modified);
    }

    #[test]
    fn test_remote_id_absent_for_local_item() {
        let entry = create_test_entry(StatusInputs::default());
        assert!(entry.remote_id().is_none());
    }

    #[test]
    fn test_remote_id_present_for_remote_item() {
        let remote_id = RemoteId::new("ABC123XYZ".to_string()).unwrap();
        let entry = InodeEntry::new(
            InodeNumber::new(3),
            ItemId::from_remote(remote_id.clone()),
            InodeNumber::ROOT,
            "test2.txt".to_string(),
            fuser::FileType::RegularFile,
            2048,
            0o644,
            SystemTime::now(),
            SystemTime::now(),
            SystemTime::now(),
            1,
            StatusInputs::default(),
        );
        assert_eq!(entry.remote_id(), Some(&remote_id));
    }

    #[test]
    fn test_to_file_attr() {
        let entry = create_test_entry(StatusInputs::default());
        let attr = entry.to_file_attr();
        assert_eq!(attr.ino, 2);
        assert_eq!(attr.size, 1024);
        assert_eq!(attr.perm, 0o644);
        assert_eq!(attr.kind, fuser::FileType::RegularFile);
    }

    #[test]
    fn test_inode_number_conversions() {
        let n = InodeNumber::new(42);
        assert_eq!(n.get(), 42);
        assert_eq!(u64::from(n), 42);
        assert_eq!(InodeNumber::from(42u64), n);
        assert_eq!(format!("{}", n), "42");
        assert_eq!(InodeNumber::ROOT.get(), 1);
    }
}
