//! Failure explanation use case
//!
//! Provides human-readable explanations of why a file is in its current
//! sync state, including actionable suggestions and audit history. This
//! powers the `onemount explain <path>` CLI command.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::newtypes::{NodeId, SyncPath};
use crate::domain::{Account, AuditEntry, FileStatus, Inode, StatusInputs};
use crate::ports::{ILocalFileSystem, IStateRepository};

/// Human-readable explanation of a file's sync state
///
/// Contains a summary message, actionable suggestions, and the
/// relevant audit history for the item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanation {
    /// The file path being explained
    pub path: SyncPath,
    /// The item's current derived status
    pub status: FileStatus,
    /// Human-readable explanation of the current state
    pub message: String,
    /// Actionable suggestions for resolving issues
    pub suggestions: Vec<String>,
    /// Recent audit history entries for this item
    pub history: Vec<AuditEntry>,
}

impl Explanation {
    /// Creates a new Explanation from a derived status and audit history
    fn from_status(path: &SyncPath, status: FileStatus, history: Vec<AuditEntry>) -> Self {
        let (message, suggestions) = Self::generate_explanation(&status);

        Self {
            path: path.clone(),
            status,
            message,
            suggestions,
            history,
        }
    }

    /// Creates an Explanation for a path that has no tracked inode
    fn not_found(path: &SyncPath) -> Self {
        Self {
            path: path.clone(),
            status: FileStatus::Cloud,
            message: "This file is not being tracked by OneMount.".to_string(),
            suggestions: vec![
                "Ensure the file is within the configured sync root directory.".to_string(),
                "Check that the file is not excluded by sync rules or .onemountignore.".to_string(),
                "Run 'onemount status' to verify the sync root configuration.".to_string(),
            ],
            history: Vec::new(),
        }
    }

    /// Generates a human-readable message and suggestions for a derived status
    fn generate_explanation(status: &FileStatus) -> (String, Vec<String>) {
        match status {
            FileStatus::Cloud => (
                "This file exists only in the cloud. Its content has not been downloaded yet.".to_string(),
                vec![
                    "Open the file to trigger automatic download (hydration).".to_string(),
                    "Use 'onemount pin <path>' to force download.".to_string(),
                ],
            ),

            FileStatus::Downloading { .. } => (
                "This file is currently being downloaded from the cloud.".to_string(),
                vec![
                    "Wait for the download to complete.".to_string(),
                    "Check your network connection if the download seems stuck.".to_string(),
                ],
            ),

            FileStatus::Synced => (
                "This file is fully synced. Local and cloud copies match.".to_string(),
                vec![],
            ),

            FileStatus::Modified => (
                "This file has local changes that have not been uploaded yet.".to_string(),
                vec![
                    "Changes will be uploaded during the next sync cycle.".to_string(),
                    "Use 'onemount sync' to trigger an immediate sync.".to_string(),
                ],
            ),

            FileStatus::Uploading { .. } => (
                "This file's local changes are currently being uploaded to the cloud.".to_string(),
                vec!["Wait for the upload to complete.".to_string()],
            ),

            FileStatus::Conflicted => (
                "This file has conflicting changes in both local and cloud versions.".to_string(),
                vec![
                    "Use 'onemount resolve <path> --keep-local' to keep your version.".to_string(),
                    "Use 'onemount resolve <path> --keep-remote' to use the cloud version.".to_string(),
                    "Use 'onemount resolve <path> --keep-both' to keep both versions.".to_string(),
                ],
            ),

            FileStatus::Error { message } => {
                let text = format!("This file encountered an error during synchronization: {message}");
                let mut suggestions = vec!["Check 'onemount status' for more details.".to_string()];

                let lower = message.to_lowercase();
                if lower.contains("network") || lower.contains("connection") || lower.contains("timeout") {
                    suggestions.push("Check your network connection and try again.".to_string());
                } else if lower.contains("auth") || lower.contains("token") || lower.contains("401") {
                    suggestions.push("Re-authenticate with 'onemount login'.".to_string());
                } else if lower.contains("rate") || lower.contains("429") || lower.contains("throttl") {
                    suggestions.push(
                        "The cloud provider is rate-limiting requests. Wait a moment and retry.".to_string(),
                    );
                } else {
                    suggestions.push("Try 'onemount sync --force' to retry the operation.".to_string());
                }

                (text, suggestions)
            }
        }
    }
}

/// Use case for generating human-readable failure explanations
///
/// Provides the `onemount explain` functionality by combining an item's
/// derived status with its audit history to produce actionable explanations.
pub struct ExplainFailureUseCase {
    state_repository: Arc<dyn IStateRepository + Send + Sync>,
    local_filesystem: Arc<dyn ILocalFileSystem + Send + Sync>,
}

impl ExplainFailureUseCase {
    /// Creates a new ExplainFailureUseCase with the required dependencies
    ///
    /// # Arguments
    ///
    /// * `state_repository` - Persistent storage for querying inode state and audit log
    /// * `local_filesystem` - Used to check whether content is present on disk
    pub fn new(
        state_repository: Arc<dyn IStateRepository + Send + Sync>,
        local_filesystem: Arc<dyn ILocalFileSystem + Send + Sync>,
    ) -> Self {
        Self {
            state_repository,
            local_filesystem,
        }
    }

    /// Generates a human-readable explanation for a file path
    ///
    /// This method:
    /// 1. Walks the inode tree from the mount root to resolve `path`
    /// 2. Derives the item's current externally-visible status
    /// 3. Retrieves the audit history for the item
    /// 4. Generates a human-readable message with suggestions
    ///
    /// # Errors
    ///
    /// Returns an error if the repository query or path resolution fails
    pub async fn explain(&self, account: &Account, path: &SyncPath) -> Result<Explanation> {
        let Some(inode) = self
            .resolve_inode(account, path)
            .await
            .context("Failed to resolve inode for path")?
        else {
            return Ok(Explanation::not_found(path));
        };

        let history = self
            .state_repository
            .get_audit_trail(inode.id())
            .await
            .context("Failed to retrieve audit history for item")?;

        let status = self
            .derive_status(&inode, path)
            .await
            .context("Failed to derive status for item")?;

        Ok(Explanation::from_status(path, status, history))
    }

    /// Resolves a local path to its tracked inode by walking the tree from
    /// the mount root, since inodes are addressed by parent+name rather than
    /// by a stored path string.
    async fn resolve_inode(&self, account: &Account, path: &SyncPath) -> Result<Option<Inode>> {
        let relative = path.relative_to(account.sync_root())?;

        let mut current = NodeId::ROOT;
        let mut current_inode: Option<Inode> = None;
        for component in relative.components() {
            let name = component.as_os_str().to_string_lossy().into_owned();
            match self.state_repository.get_child_inode(current, &name).await? {
                Some(child) => {
                    current = child.ino();
                    current_inode = Some(child);
                }
                None => return Ok(None),
            }
        }

        Ok(current_inode)
    }

    /// Builds the [`StatusInputs`] for an inode and derives its [`FileStatus`].
    async fn derive_status(&self, inode: &Inode, path: &SyncPath) -> Result<FileStatus> {
        let conflicted = !self
            .state_repository
            .get_unresolved_conflicts()
            .await?
            .into_iter()
            .filter(|c| c.item_id() == inode.id())
            .collect::<Vec<_>>()
            .is_empty();

        let upload_session = self.state_repository.get_upload_session(inode.id()).await?;
        let upload_percent = upload_session
            .as_ref()
            .filter(|session| matches!(session.state(), crate::domain::UploadState::InProgress))
            .map(|session| session.progress_percent());
        let error_message = upload_session.as_ref().and_then(|session| match session.state() {
            crate::domain::UploadState::Failed(reason) => Some(reason.clone()),
            _ => None,
        });

        let content_absent = if inode.is_directory() {
            false
        } else {
            !self.local_filesystem.get_state(path).await?.exists
        };

        let inputs = StatusInputs {
            dirty: inode.is_dirty(),
            conflicted,
            download_percent: None,
            upload_percent,
            error_message,
            content_absent,
        };

        Ok(FileStatus::derive(&inputs))
    }
}
