//! Inode domain entity
//!
//! An `Inode` is the unit the filesystem layer hands back to the kernel: it
//! carries everything FUSE needs to answer `lookup`/`getattr`/`readdir`
//! without consulting the cloud, plus the bookkeeping the rest of the system
//! needs to know whether content is present locally, whether it has been
//! modified since the last sync, and whether a deletion is waiting to be
//! pushed upstream.
//!
//! Every inode has an [`ItemId`]: either a stable id assigned by the cloud
//! provider, or a locally-minted placeholder for an item that exists only on
//! disk so far. Directories additionally carry a case-folded name index of
//! their children so `lookup` can resolve in O(1) without scanning.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    errors::DomainError,
    newtypes::{FileHash, ItemId, NodeId},
};

/// POSIX format bits (`S_IFMT`) occupying the high nibble of `st_mode`.
const S_IFMT: u32 = 0o170000;
/// Regular file format bit.
const S_IFREG: u32 = 0o100000;
/// Directory format bit.
const S_IFDIR: u32 = 0o040000;

/// Default permission bits for a newly created regular file (`rw-r--r--`).
pub const DEFAULT_FILE_MODE: u32 = S_IFREG | 0o644;
/// Default permission bits for a newly created directory (`rwxr-xr-x`).
pub const DEFAULT_DIR_MODE: u32 = S_IFDIR | 0o755;

/// Names OneDrive refuses to store, regardless of case.
///
/// Mirrors the restriction Microsoft Graph enforces server-side: Windows
/// reserved device names and the characters that cannot appear in a OneDrive
/// path component. Checked case-insensitively before a child is ever added to
/// a directory's index.
const RESTRICTED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM0", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
    "COM8", "COM9", "LPT0", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Characters that cannot appear anywhere in a OneDrive file or folder name.
const RESTRICTED_CHARS: &[char] = &['"', '*', ':', '<', '>', '?', '/', '\\', '|'];

/// Exact names (case-insensitive) OneDrive refuses to sync regardless of
/// where they sit in the tree, since they collide with SharePoint/Windows
/// bookkeeping files.
const RESTRICTED_EXACT_NAMES: &[&str] = &["desktop.ini"];

/// Substring that marks a SharePoint metadata folder; disallowed anywhere in
/// a name since such folders are never valid sync targets.
const RESTRICTED_SUBSTRING: &str = "_vti_";

/// Validates a child name against OneDrive's naming restrictions.
///
/// # Errors
/// Returns [`DomainError::RestrictedName`] if the name is empty, is `.`/`..`,
/// contains a restricted character, ends with a space or period, matches a
/// reserved device name (case-insensitively), is a reserved exact name like
/// `desktop.ini`, or contains the `_vti_` SharePoint metadata marker.
pub fn validate_child_name(name: &str) -> Result<(), DomainError> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(DomainError::RestrictedName(format!(
            "name cannot be empty, '.', or '..': {name:?}"
        )));
    }
    if name.ends_with(' ') || name.ends_with('.') {
        return Err(DomainError::RestrictedName(format!(
            "name cannot end with a space or period: {name:?}"
        )));
    }
    if name.chars().any(|c| RESTRICTED_CHARS.contains(&c) || c.is_control()) {
        return Err(DomainError::RestrictedName(format!(
            "name contains a restricted character: {name:?}"
        )));
    }
    if name.to_lowercase().contains(RESTRICTED_SUBSTRING) {
        return Err(DomainError::RestrictedName(format!(
            "name contains the reserved '_vti_' marker: {name:?}"
        )));
    }
    if RESTRICTED_EXACT_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
    {
        return Err(DomainError::RestrictedName(format!(
            "name is reserved: {name:?}"
        )));
    }
    let stem = name.split('.').next().unwrap_or(name);
    if RESTRICTED_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(stem))
    {
        return Err(DomainError::RestrictedName(format!(
            "name is a reserved device name: {name:?}"
        )));
    }
    Ok(())
}

/// A single node in the filesystem tree: the FUSE-facing representation of
/// either a file or a directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inode {
    /// Stable (remote) or placeholder (local) identity.
    id: ItemId,
    /// Kernel-visible node number. Stable for the lifetime of the mount.
    ino: NodeId,
    /// Node number of the containing directory. `NodeId::ROOT` has no parent.
    parent: Option<NodeId>,
    /// Case-preserved name as it should be displayed and round-tripped.
    name: String,
    /// POSIX mode bits, including the format bits (`S_IFREG`/`S_IFDIR`).
    mode: u32,
    /// Size in bytes. For directories this is always 0.
    size: u64,
    /// Last modification time, taken from whichever side is authoritative.
    mtime: DateTime<Utc>,
    /// Graph ETag of the last known remote version, if any.
    etag: Option<String>,
    /// quickXorHash of the last known remote content, if any.
    hash: Option<FileHash>,
    /// True if local content differs from the last known synced version.
    dirty: bool,
    /// True once this directory's children have been loaded from the cloud
    /// or cache at least once. Always true for files.
    children_loaded: bool,
    /// True if a delete of this item has been requested but not yet
    /// propagated (e.g. while offline, or while an upload is still in
    /// flight and must be cancelled first).
    deletion_pending: bool,
    /// Case-folded name -> child node number. Empty for files.
    children: HashMap<String, NodeId>,
}

impl Inode {
    /// Creates a new file inode with a locally-minted id, not yet uploaded.
    #[must_use]
    pub fn new_local_file(ino: NodeId, parent: NodeId, name: impl Into<String>) -> Self {
        Self {
            id: ItemId::new_local(),
            ino,
            parent: Some(parent),
            name: name.into(),
            mode: DEFAULT_FILE_MODE,
            size: 0,
            mtime: Utc::now(),
            etag: None,
            hash: None,
            dirty: true,
            children_loaded: true,
            deletion_pending: false,
            children: HashMap::new(),
        }
    }

    /// Creates a new directory inode with a locally-minted id.
    #[must_use]
    pub fn new_local_dir(ino: NodeId, parent: NodeId, name: impl Into<String>) -> Self {
        Self {
            id: ItemId::new_local(),
            ino,
            parent: Some(parent),
            name: name.into(),
            mode: DEFAULT_DIR_MODE,
            size: 0,
            mtime: Utc::now(),
            etag: None,
            hash: None,
            dirty: true,
            children_loaded: false,
            deletion_pending: false,
            children: HashMap::new(),
        }
    }

    /// Creates the fixed mount-root directory inode.
    #[must_use]
    pub fn root(id: ItemId) -> Self {
        Self {
            id,
            ino: NodeId::ROOT,
            parent: None,
            name: String::new(),
            mode: DEFAULT_DIR_MODE,
            size: 0,
            mtime: Utc::now(),
            etag: None,
            hash: None,
            dirty: false,
            children_loaded: false,
            deletion_pending: false,
            children: HashMap::new(),
        }
    }

    /// Reconstructs an inode from cloud (or cached) metadata.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn from_remote(
        id: ItemId,
        ino: NodeId,
        parent: NodeId,
        name: impl Into<String>,
        is_directory: bool,
        size: u64,
        mtime: DateTime<Utc>,
        etag: Option<String>,
        hash: Option<FileHash>,
    ) -> Self {
        Self {
            id,
            ino,
            parent: Some(parent),
            name: name.into(),
            mode: if is_directory {
                DEFAULT_DIR_MODE
            } else {
                DEFAULT_FILE_MODE
            },
            size: if is_directory { 0 } else { size },
            mtime,
            etag,
            hash,
            dirty: false,
            children_loaded: false,
            deletion_pending: false,
            children: HashMap::new(),
        }
    }

    // --- Getters ---

    /// Returns this inode's identity.
    #[must_use]
    pub fn id(&self) -> &ItemId {
        &self.id
    }

    /// Returns the kernel-visible node number.
    #[must_use]
    pub fn ino(&self) -> NodeId {
        self.ino
    }

    /// Returns the parent's node number, or `None` for the mount root.
    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Returns the case-preserved name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the raw POSIX mode bits.
    #[must_use]
    pub fn mode(&self) -> u32 {
        self.mode
    }

    /// Returns true if this inode represents a directory.
    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    /// Returns true if this inode represents a regular file.
    #[must_use]
    pub fn is_regular_file(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    /// Returns the size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the last-modified timestamp.
    #[must_use]
    pub fn mtime(&self) -> DateTime<Utc> {
        self.mtime
    }

    /// Returns the last known remote ETag, if any.
    #[must_use]
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    /// Returns the last known content hash, if any.
    #[must_use]
    pub fn hash(&self) -> Option<&FileHash> {
        self.hash.as_ref()
    }

    /// Returns true if local content has changed since the last sync.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns true once this directory's children are known to be loaded.
    #[must_use]
    pub fn children_loaded(&self) -> bool {
        self.children_loaded
    }

    /// Returns true if a delete of this item is queued but not yet applied.
    #[must_use]
    pub fn deletion_pending(&self) -> bool {
        self.deletion_pending
    }

    /// Returns the number of known children (always 0 for files).
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Returns true if this directory has no known children.
    ///
    /// Only meaningful once [`Inode::children_loaded`] is true.
    #[must_use]
    pub fn is_empty_dir(&self) -> bool {
        self.children.is_empty()
    }

    // --- Mutators ---

    /// Replaces the identity, e.g. once a local-only item's upload completes
    /// and the cloud has assigned it a permanent id.
    pub fn set_id(&mut self, id: ItemId) {
        self.id = id;
    }

    /// Renames this inode in place, validating the new name first.
    ///
    /// # Errors
    /// Returns [`DomainError::RestrictedName`] if `new_name` is not a valid
    /// OneDrive name.
    pub fn rename(&mut self, new_name: impl Into<String>) -> Result<(), DomainError> {
        let new_name = new_name.into();
        validate_child_name(&new_name)?;
        self.name = new_name;
        Ok(())
    }

    /// Moves this inode under a new parent.
    pub fn reparent(&mut self, new_parent: NodeId) {
        self.parent = Some(new_parent);
    }

    /// Updates the size and marks the inode dirty.
    pub fn set_size(&mut self, size: u64) {
        self.size = size;
        self.dirty = true;
        self.mtime = Utc::now();
    }

    /// Updates the mode bits, preserving the file-type bits.
    pub fn set_permission_bits(&mut self, perm_bits: u32) {
        self.mode = (self.mode & S_IFMT) | (perm_bits & !S_IFMT);
    }

    /// Marks local content as changed since the last sync.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
        self.mtime = Utc::now();
    }

    /// Clears the dirty flag after a successful upload, recording the
    /// ETag/hash the cloud assigned to the uploaded content.
    pub fn mark_synced(&mut self, etag: Option<String>, hash: Option<FileHash>) {
        self.dirty = false;
        self.etag = etag;
        self.hash = hash;
    }

    /// Overwrites metadata with the cloud's authoritative values, as seen in
    /// a delta response for an item this inode already tracks. Does not
    /// touch the dirty flag: a concurrent local edit is a conflict for the
    /// resolver to catch, not something this call should paper over.
    pub fn apply_remote_metadata(
        &mut self,
        size: u64,
        mtime: DateTime<Utc>,
        etag: Option<String>,
        hash: Option<FileHash>,
    ) {
        self.size = size;
        self.mtime = mtime;
        self.etag = etag;
        self.hash = hash;
    }

    /// Marks this directory's children as loaded from the cloud or cache.
    pub fn mark_children_loaded(&mut self) {
        self.children_loaded = true;
    }

    /// Forces a re-load of this directory's children on next `readdir`.
    pub fn invalidate_children(&mut self) {
        self.children_loaded = false;
    }

    /// Marks this item as pending deletion.
    pub fn mark_deletion_pending(&mut self) {
        self.deletion_pending = true;
    }

    /// Clears the pending-deletion flag, e.g. if a deletion is cancelled.
    pub fn clear_deletion_pending(&mut self) {
        self.deletion_pending = false;
    }

    // --- Children index (directories only) ---

    /// Adds a child to this directory's index.
    ///
    /// # Errors
    /// Returns [`DomainError::RestrictedName`] if `name` is not a valid
    /// OneDrive name, or [`DomainError::DuplicateChildName`] if a child with
    /// the same case-folded name already exists.
    pub fn add_child(&mut self, name: &str, child_ino: NodeId) -> Result<(), DomainError> {
        validate_child_name(name)?;
        let key = name.to_lowercase();
        if self.children.contains_key(&key) {
            return Err(DomainError::DuplicateChildName(name.to_string()));
        }
        self.children.insert(key, child_ino);
        Ok(())
    }

    /// Removes a child from this directory's index by name.
    ///
    /// # Errors
    /// Returns [`DomainError::ChildNotFound`] if no child with that
    /// case-folded name is indexed.
    pub fn remove_child(&mut self, name: &str) -> Result<NodeId, DomainError> {
        self.children
            .remove(&name.to_lowercase())
            .ok_or_else(|| DomainError::ChildNotFound(name.to_string()))
    }

    /// Looks up a child's node number by name, case-insensitively.
    #[must_use]
    pub fn find_child(&self, name: &str) -> Option<NodeId> {
        self.children.get(&name.to_lowercase()).copied()
    }

    /// Returns all known child node numbers, in no particular order.
    #[must_use]
    pub fn child_inos(&self) -> Vec<NodeId> {
        self.children.values().copied().collect()
    }

    /// Renames a child's entry in this directory's index in place, without
    /// touching the child inode itself.
    ///
    /// # Errors
    /// Returns [`DomainError::ChildNotFound`] if `old_name` is not indexed,
    /// [`DomainError::RestrictedName`] if `new_name` is invalid, or
    /// [`DomainError::DuplicateChildName`] if `new_name` collides with an
    /// existing entry other than `old_name` itself.
    pub fn rename_child(&mut self, old_name: &str, new_name: &str) -> Result<(), DomainError> {
        validate_child_name(new_name)?;
        let old_key = old_name.to_lowercase();
        let new_key = new_name.to_lowercase();
        if old_key != new_key && self.children.contains_key(&new_key) {
            return Err(DomainError::DuplicateChildName(new_name.to_string()));
        }
        let ino = self
            .children
            .remove(&old_key)
            .ok_or_else(|| DomainError::ChildNotFound(old_name.to_string()))?;
        self.children.insert(new_key, ino);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod name_validation_tests {
        use super::*;

        #[test]
        fn test_rejects_empty_and_dots() {
            assert!(validate_child_name("").is_err());
            assert!(validate_child_name(".").is_err());
            assert!(validate_child_name("..").is_err());
        }

        #[test]
        fn test_rejects_restricted_chars() {
            for bad in ["a:b", "a*b", "a?b", "a<b", "a>b", "a|b", "a\"b"] {
                assert!(validate_child_name(bad).is_err(), "expected {bad} to be rejected");
            }
        }

        #[test]
        fn test_rejects_trailing_space_or_period() {
            assert!(validate_child_name("name ").is_err());
            assert!(validate_child_name("name.").is_err());
        }

        #[test]
        fn test_rejects_reserved_device_names_case_insensitive() {
            assert!(validate_child_name("CON").is_err());
            assert!(validate_child_name("con").is_err());
            assert!(validate_child_name("Lpt3").is_err());
            assert!(validate_child_name("Lpt3.txt").is_err());
            assert!(validate_child_name("COM0").is_err());
            assert!(validate_child_name("lpt0.log").is_err());
        }

        #[test]
        fn test_rejects_sharepoint_metadata_names() {
            assert!(validate_child_name("desktop.ini").is_err());
            assert!(validate_child_name("Desktop.INI").is_err());
            assert!(validate_child_name("_vti_cnf").is_err());
            assert!(validate_child_name("folder_vti_script").is_err());
        }

        #[test]
        fn test_accepts_ordinary_names() {
            assert!(validate_child_name("report.docx").is_ok());
            assert!(validate_child_name("Photos 2024").is_ok());
        }
    }

    mod inode_tests {
        use super::*;

        #[test]
        fn test_new_local_file_is_dirty_and_regular() {
            let inode = Inode::new_local_file(NodeId::new(2), NodeId::ROOT, "notes.txt");
            assert!(inode.is_dirty());
            assert!(inode.is_regular_file());
            assert!(!inode.is_directory());
            assert!(inode.id().is_local());
            assert_eq!(inode.parent(), Some(NodeId::ROOT));
        }

        #[test]
        fn test_new_local_dir_children_not_loaded() {
            let inode = Inode::new_local_dir(NodeId::new(2), NodeId::ROOT, "Documents");
            assert!(inode.is_directory());
            assert!(!inode.children_loaded());
        }

        #[test]
        fn test_root_has_no_parent() {
            let root = Inode::root(ItemId::new_local());
            assert_eq!(root.ino(), NodeId::ROOT);
            assert!(root.parent().is_none());
            assert!(root.is_directory());
        }

        #[test]
        fn test_mark_synced_clears_dirty_and_sets_etag_hash() {
            let mut inode = Inode::new_local_file(NodeId::new(2), NodeId::ROOT, "a.txt");
            let hash = FileHash::new("A".repeat(27) + "=").unwrap();
            inode.mark_synced(Some("etag-1".to_string()), Some(hash.clone()));
            assert!(!inode.is_dirty());
            assert_eq!(inode.etag(), Some("etag-1"));
            assert_eq!(inode.hash(), Some(&hash));
        }

        #[test]
        fn test_set_size_marks_dirty_and_updates_mtime() {
            let mut inode = Inode::new_local_file(NodeId::new(2), NodeId::ROOT, "a.txt");
            inode.mark_synced(None, None);
            assert!(!inode.is_dirty());
            let before = inode.mtime();
            inode.set_size(128);
            assert!(inode.is_dirty());
            assert_eq!(inode.size(), 128);
            assert!(inode.mtime() >= before);
        }

        #[test]
        fn test_set_permission_bits_preserves_file_type() {
            let mut inode = Inode::new_local_file(NodeId::new(2), NodeId::ROOT, "a.txt");
            inode.set_permission_bits(0o600);
            assert!(inode.is_regular_file());
            assert_eq!(inode.mode() & 0o777, 0o600);
        }

        #[test]
        fn test_rename_validates_name() {
            let mut inode = Inode::new_local_file(NodeId::new(2), NodeId::ROOT, "a.txt");
            assert!(inode.rename("CON").is_err());
            assert!(inode.rename("b.txt").is_ok());
            assert_eq!(inode.name(), "b.txt");
        }

        #[test]
        fn test_deletion_pending_flag() {
            let mut inode = Inode::new_local_file(NodeId::new(2), NodeId::ROOT, "a.txt");
            assert!(!inode.deletion_pending());
            inode.mark_deletion_pending();
            assert!(inode.deletion_pending());
            inode.clear_deletion_pending();
            assert!(!inode.deletion_pending());
        }
    }

    mod children_index_tests {
        use super::*;

        fn new_dir() -> Inode {
            Inode::new_local_dir(NodeId::new(2), NodeId::ROOT, "Documents")
        }

        #[test]
        fn test_add_and_find_child() {
            let mut dir = new_dir();
            dir.add_child("Report.docx", NodeId::new(3)).unwrap();
            assert_eq!(dir.find_child("report.docx"), Some(NodeId::new(3)));
            assert_eq!(dir.find_child("REPORT.DOCX"), Some(NodeId::new(3)));
            assert_eq!(dir.child_count(), 1);
        }

        #[test]
        fn test_add_child_rejects_case_insensitive_collision() {
            let mut dir = new_dir();
            dir.add_child("Report.docx", NodeId::new(3)).unwrap();
            let err = dir.add_child("report.DOCX", NodeId::new(4)).unwrap_err();
            assert!(matches!(err, DomainError::DuplicateChildName(_)));
        }

        #[test]
        fn test_add_child_rejects_restricted_name() {
            let mut dir = new_dir();
            assert!(dir.add_child("a:b", NodeId::new(3)).is_err());
        }

        #[test]
        fn test_remove_child() {
            let mut dir = new_dir();
            dir.add_child("a.txt", NodeId::new(3)).unwrap();
            assert_eq!(dir.remove_child("A.TXT").unwrap(), NodeId::new(3));
            assert!(dir.is_empty_dir());
        }

        #[test]
        fn test_remove_missing_child_errors() {
            let mut dir = new_dir();
            assert!(matches!(
                dir.remove_child("missing.txt"),
                Err(DomainError::ChildNotFound(_))
            ));
        }

        #[test]
        fn test_rename_child_updates_index() {
            let mut dir = new_dir();
            dir.add_child("old.txt", NodeId::new(3)).unwrap();
            dir.rename_child("old.txt", "new.txt").unwrap();
            assert_eq!(dir.find_child("old.txt"), None);
            assert_eq!(dir.find_child("new.txt"), Some(NodeId::new(3)));
        }

        #[test]
        fn test_rename_child_to_same_name_case_change_ok() {
            let mut dir = new_dir();
            dir.add_child("old.txt", NodeId::new(3)).unwrap();
            dir.rename_child("old.txt", "Old.txt").unwrap();
            assert_eq!(dir.find_child("old.txt"), Some(NodeId::new(3)));
        }

        #[test]
        fn test_rename_child_rejects_collision_with_other_entry() {
            let mut dir = new_dir();
            dir.add_child("a.txt", NodeId::new(3)).unwrap();
            dir.add_child("b.txt", NodeId::new(4)).unwrap();
            let err = dir.rename_child("a.txt", "B.TXT").unwrap_err();
            assert!(matches!(err, DomainError::DuplicateChildName(_)));
        }

        #[test]
        fn test_child_inos_collects_all() {
            let mut dir = new_dir();
            dir.add_child("a.txt", NodeId::new(3)).unwrap();
            dir.add_child("b.txt", NodeId::new(4)).unwrap();
            let mut inos = dir.child_inos();
            inos.sort();
            assert_eq!(inos, vec![NodeId::new(3), NodeId::new(4)]);
        }
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut dir = Inode::new_local_dir(NodeId::new(2), NodeId::ROOT, "Documents");
        dir.add_child("a.txt", NodeId::new(3)).unwrap();
        let json = serde_json::to_string(&dir).unwrap();
        let parsed: Inode = serde_json::from_str(&json).unwrap();
        assert_eq!(dir, parsed);
    }
}
