//! Conflict use cases - orchestrate detection and resolution
//!
//! These use cases integrate the conflict detector, policy engine, and
//! resolver into coherent workflows used by the sync engine.

use std::sync::Arc;

use tracing::{debug, info};

use onemount_core::domain::conflict::{Conflict, Resolution, ResolutionSource};
use onemount_core::domain::newtypes::NodeId;
use onemount_core::domain::Inode;
use onemount_core::ports::state_repository::IStateRepository;

use crate::{
    detector::{ConflictDetector, DetectionResult},
    error::ConflictError,
    policy::PolicyEngine,
    resolver::ConflictResolver,
};

/// Orchestrates conflict detection + policy evaluation + auto-resolution
pub struct DetectConflictUseCase {
    policy_engine: PolicyEngine,
    state_repository: Arc<dyn IStateRepository + Send + Sync>,
    resolver: Option<Arc<ConflictResolver>>,
}

impl DetectConflictUseCase {
    pub fn new(
        policy_engine: PolicyEngine,
        state_repository: Arc<dyn IStateRepository + Send + Sync>,
        resolver: Option<Arc<ConflictResolver>>,
    ) -> Self {
        Self {
            policy_engine,
            state_repository,
            resolver,
        }
    }

    /// Check a remote update for conflicts and handle accordingly
    ///
    /// Returns `Some(Conflict)` if a conflict was detected and NOT auto-resolved,
    /// meaning it needs user intervention. Returns `None` if no conflict or
    /// if the conflict was auto-resolved by policy.
    pub async fn check_and_handle(
        &self,
        existing: &Inode,
        remote_hash: Option<&str>,
        remote_size: Option<u64>,
        remote_modified: Option<chrono::DateTime<chrono::Utc>>,
        remote_etag: Option<&str>,
    ) -> Result<Option<Conflict>, ConflictError> {
        let result = ConflictDetector::check_remote_update(
            existing,
            remote_hash,
            remote_size,
            remote_modified,
            remote_etag,
        );

        let conflict = match result {
            DetectionResult::NoConflict => return Ok(None),
            DetectionResult::Conflicted(c) => *c,
        };

        self.state_repository
            .save_conflict(&conflict)
            .await
            .map_err(|e| ConflictError::ResolutionFailed(format!("save conflict: {e}")))?;

        let relative_path = self.relative_path(existing).await?;

        if let Some(auto_resolution) =
            ConflictDetector::should_auto_resolve(&self.policy_engine, &relative_path)
        {
            info!(
                item_id = %existing.id(),
                resolution = %auto_resolution,
                "Auto-resolving conflict via policy"
            );

            if let Some(ref resolver) = self.resolver {
                match resolver
                    .apply_resolution(
                        conflict.clone(),
                        auto_resolution,
                        ResolutionSource::Policy,
                        existing,
                    )
                    .await
                {
                    Ok(_resolved) => {
                        debug!("Conflict auto-resolved by policy");
                        return Ok(None);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Auto-resolution failed, leaving as unresolved");
                    }
                }
            }
        }

        // Conflict needs manual resolution
        Ok(Some(conflict))
    }

    /// Builds the path used to evaluate conflict policy rules, by walking
    /// the inode's parent chain the same way `onemount-sync`'s upload
    /// manager resolves a remote destination.
    async fn relative_path(&self, item: &Inode) -> Result<String, ConflictError> {
        let mut segments = vec![item.name().to_string()];
        let mut current = item.parent();

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
        Ok(segments.join("/"))
    }
}

/// Orchestrates manual conflict resolution
pub struct ResolveConflictUseCase {
    resolver: Arc<ConflictResolver>,
}

impl ResolveConflictUseCase {
    pub fn new(resolver: Arc<ConflictResolver>) -> Self {
        Self { resolver }
    }

    /// Resolve a conflict by its ID
    pub async fn resolve(
        &self,
        conflict: Conflict,
        resolution: Resolution,
        item: &Inode,
    ) -> Result<Conflict, ConflictError> {
        self.resolver
            .apply_resolution(conflict, resolution, ResolutionSource::User, item)
            .await
    }
}
