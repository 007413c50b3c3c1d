//! Inode table for bidirectional inode ↔ item_id mapping.
//!
//! Provides lock-free concurrent access for FUSE operations.

use std::sync::Arc;

use dashmap::DashMap;
use onemount_core::domain::ItemId;

use crate::inode_entry::InodeEntry;

/// Bidirectional mapping between inodes and items.
///
/// Uses DashMap for lock-free concurrent access from multiple FUSE threads.
pub struct InodeTable {
    /// inode -> entry mapping
    by_inode: DashMap<u64, Arc<InodeEntry>>,
    /// item_id -> inode mapping (reverse lookup)
    by_item_id: DashMap<ItemId, u64>,
}

impl InodeTable {
    /// Create a new empty inode table.
    pub fn new() -> Self {
        Self {
            by_inode: DashMap::new(),
            by_item_id: DashMap::new(),
        }
    }

    /// Insert a new inode entry into the table.
    ///
    /// Creates bidirectional mapping between inode number and item_id.
    pub fn insert(&self, entry: InodeEntry) {
        let ino = entry.ino().get();
        let item_id = entry.item_id().clone();
        let entry = Arc::new(entry);
        self.by_inode.insert(ino, entry);
        self.by_item_id.insert(item_id, ino);
    }

    /// Retrieve an inode entry by its inode number.
    pub fn get(&self, ino: u64) -> Option<Arc<InodeEntry>> {
        self.by_inode.get(&ino).map(|r| Arc::clone(&r))
    }

    /// Retrieve an inode number by its item_id.
    pub fn get_by_item_id(&self, id: &ItemId) -> Option<u64> {
        self.by_item_id.get(id).map(|r| *r)
    }

    /// Remove an inode entry by its inode number.
    ///
    /// Removes both the inode->entry and item_id->inode mappings.
    pub fn remove(&self, ino: u64) -> Option<Arc<InodeEntry>> {
        if let Some((_, entry)) = self.by_inode.remove(&ino) {
            self.by_item_id.remove(entry.item_id());
            Some(entry)
        } else {
            None
        }
    }

    /// Retrieve all child entries of a parent inode.
    ///
    /// Returns a vector of all entries whose parent_ino matches the given value.
    pub fn children(&self, parent_ino: u64) -> Vec<Arc<InodeEntry>> {
        self.by_inode
            .iter()
            .filter(|r| r.value().parent_ino().get() == parent_ino)
            .map(|r| Arc::clone(r.value()))
            .collect()
    }

    /// Look up a child entry by parent inode and name.
    ///
    /// Performs a linear search through entries to find a matching child.
    /// OneDrive folders are case-preserving but not case-sensitive, so the
    /// name comparison folds ASCII case the same way the domain `Inode`
    /// children index does.
    pub fn lookup(&self, parent_ino: u64, name: &str) -> Option<Arc<InodeEntry>> {
        self.by_inode
            .iter()
            .find(|r| {
                r.value().parent_ino().get() == parent_ino && r.value().name().eq_ignore_ascii_case(name)
            })
            .map(|r| Arc::clone(r.value()))
    }

    /// Get the total number of entries in the table.
    pub fn len(&self) -> usize {
        self.by_inode.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.by_inode.is_empty()
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}
