//! Delta query use case
//!
//! Orchestrates incremental synchronization by querying the Microsoft Graph
//! delta API for changes since the last sync. Handles delta cursor
//! management, converting cloud-side delta items into domain [`Inode`]s.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;

use crate::{
    domain::{
        Account, AccountId, AuditAction, AuditEntry, AuditResult, DeltaCursor, FileHash, Inode,
        NodeId, RemoteId,
    },
    ports::{DeltaItem, ICloudProvider, IStateRepository},
};

/// Use case for querying incremental changes from the cloud provider
///
/// Coordinates delta queries between the cloud provider and state repository,
/// handling delta cursor lifecycle.
pub struct QueryDeltaUseCase {
    cloud_provider: Arc<dyn ICloudProvider + Send + Sync>,
    state_repository: Arc<dyn IStateRepository + Send + Sync>,
}

impl QueryDeltaUseCase {
    /// Creates a new QueryDeltaUseCase with the required dependencies
    ///
    /// # Arguments
    ///
    /// * `cloud_provider` - Cloud storage provider for delta API queries
    /// * `state_repository` - Persistent storage for sync state and delta cursors
    pub fn new(
        cloud_provider: Arc<dyn ICloudProvider + Send + Sync>,
        state_repository: Arc<dyn IStateRepository + Send + Sync>,
    ) -> Self {
        Self {
            cloud_provider,
            state_repository,
        }
    }

    /// Executes a delta query to get all changes since the last sync
    ///
    /// This method:
    /// 1. Loads the account's persisted delta cursor (absent triggers a full initial sync)
    /// 2. Queries the cloud provider's delta API via `get_delta`
    /// 3. Saves the new cursor for the next query
    /// 4. Returns the complete list of delta items
    ///
    /// # Errors
    ///
    /// Returns an error if the delta query or cursor persistence fails
    pub async fn execute(&self, account: &Account) -> Result<Vec<DeltaItem>> {
        let cursor = self
            .state_repository
            .get_delta_cursor(account.id())
            .await
            .context("Failed to load delta cursor")?
            .unwrap_or_else(DeltaCursor::initial);

        let response = self
            .cloud_provider
            .get_delta(cursor.token())
            .await
            .context("Failed to query delta API")?;

        let all_items = response.items;

        let mut new_cursor = cursor.clone();
        if let Some(ref delta_link) = response.delta_link {
            // `get_delta` aggregates every `nextLink` page internally and
            // only returns once it holds the final `deltaLink`, so seeing
            // one here means the sync has caught up.
            let new_token = crate::domain::DeltaToken::try_from(delta_link.clone())
                .context("Failed to parse delta link as DeltaToken")?;
            new_cursor.advance_settled(new_token);
            self.state_repository
                .save_delta_cursor(account.id(), &new_cursor)
                .await
                .context("Failed to persist updated delta cursor")?;
        }

        let audit_entry = AuditEntry::new(AuditAction::SyncStart, AuditResult::success()).with_details(json!({
            "account_id": account.id().to_string(),
            "items_received": all_items.len(),
            "had_delta_cursor": !cursor.needs_initial_sync(),
        }));

        self.state_repository
            .save_audit(&audit_entry)
            .await
            .context("Failed to record delta query audit entry")?;

        Ok(all_items)
    }

    /// Processes a single delta item into an [`Inode`]
    ///
    /// Based on the delta item type, this method:
    /// - **Created/Modified**: Creates a new inode or updates an existing one
    /// - **Deleted**: Marks the corresponding inode for deletion
    ///
    /// # Arguments
    ///
    /// * `item` - The delta item to process
    /// * `_account_id` - The account that owns the inode (reserved for multi-account support)
    ///
    /// # Returns
    ///
    /// The created or updated inode
    ///
    /// # Errors
    ///
    /// Returns an error if inode creation, parent resolution, or persistence fails
    pub async fn handle_delta_item(&self, item: &DeltaItem, _account_id: &AccountId) -> Result<Inode> {
        let remote_id =
            RemoteId::try_from(item.id.clone()).context("Failed to parse delta item ID as RemoteId")?;

        let existing = self
            .state_repository
            .get_inode_by_remote_id(&remote_id)
            .await
            .context("Failed to look up existing inode by remote ID")?;

        let inode = if item.is_deleted {
            match existing {
                Some(mut existing_inode) => {
                    existing_inode.mark_deletion_pending();
                    existing_inode
                }
                None => {
                    // Already deleted or never tracked locally; nothing to journal.
                    let parent = self.resolve_parent(item).await?;
                    let mut placeholder = self
                        .build_inode(item, &remote_id, parent)
                        .await
                        .context("Failed to create inode from deleted delta item")?;
                    placeholder.mark_deletion_pending();
                    placeholder
                }
            }
        } else {
            match existing {
                Some(mut existing_inode) => {
                    let modified = item.modified.unwrap_or_else(Utc::now);
                    let content_hash = self.parse_content_hash(item)?;
                    existing_inode.apply_remote_metadata(
                        item.size.unwrap_or(0),
                        modified,
                        item.hash.clone(),
                        content_hash,
                    );
                    existing_inode
                }
                None => {
                    let parent = self.resolve_parent(item).await?;
                    let inode = self
                        .build_inode(item, &remote_id, parent)
                        .await
                        .context("Failed to create inode from delta item")?;
                    if let Some(mut parent_inode) = self
                        .state_repository
                        .get_inode(parent)
                        .await
                        .context("Failed to load parent inode for child registration")?
                    {
                        // Already-existing child (e.g. a rename replayed
                        // through delta) is not an error here.
                        let _ = parent_inode.add_child(&item.name, inode.ino());
                        self.state_repository
                            .save_inode(&parent_inode)
                            .await
                            .context("Failed to persist parent inode's child index")?;
                    }
                    inode
                }
            }
        };

        self.state_repository
            .save_inode(&inode)
            .await
            .context("Failed to persist inode from delta")?;

        Ok(inode)
    }

    /// Resolves the parent node for a delta item, falling back to the mount
    /// root when the item has no parent (top-level items).
    async fn resolve_parent(&self, item: &DeltaItem) -> Result<NodeId> {
        match &item.parent_id {
            None => Ok(NodeId::ROOT),
            Some(parent_remote_id) => {
                let parent_remote_id = RemoteId::try_from(parent_remote_id.clone())
                    .context("Failed to parse delta item's parent ID as RemoteId")?;
                match self
                    .state_repository
                    .get_inode_by_remote_id(&parent_remote_id)
                    .await
                    .context("Failed to look up parent inode by remote ID")?
                {
                    Some(parent_inode) => Ok(parent_inode.ino()),
                    // Parent hasn't been seen yet in this delta page; the
                    // delta loop revisits orphans once their parent arrives.
                    None => Ok(NodeId::ROOT),
                }
            }
        }
    }

    /// Builds a fresh inode from delta item fields and an already-resolved parent.
    async fn build_inode(&self, item: &DeltaItem, remote_id: &RemoteId, parent: NodeId) -> Result<Inode> {
        let modified = item.modified.unwrap_or_else(Utc::now);
        let content_hash = self.parse_content_hash(item)?;
        let ino = self
            .state_repository
            .allocate_inode()
            .await
            .context("Failed to allocate inode number for delta item")?;

        Ok(Inode::from_remote(
            crate::domain::ItemId::from_remote(remote_id.clone()),
            ino,
            parent,
            item.name.clone(),
            item.is_directory,
            item.size.unwrap_or(0),
            modified,
            item.hash.clone(),
            content_hash,
        ))
    }

    /// Parses the optional hash string from a DeltaItem into an optional FileHash
    fn parse_content_hash(&self, item: &DeltaItem) -> Result<Option<FileHash>> {
        match item.hash {
            Some(ref h) => {
                let file_hash =
                    FileHash::try_from(h.clone()).context("Failed to parse content hash from delta item")?;
                Ok(Some(file_hash))
            }
            None => Ok(None),
        }
    }
}
