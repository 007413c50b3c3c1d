//! Sync scheduler - drives periodic and on-demand synchronization cycles
//!
//! The [`SyncScheduler`] wraps a [`SyncEngine`](crate::engine::SyncEngine) and
//! runs its `sync()` method on a fixed interval, while also accepting
//! immediate "sync now" requests that bypass the wait (e.g. from a CLI
//! command delivered over the IPC bus).
//!
//! Local writes are captured directly by `onemount-fuse` marking inodes
//! dirty; there is no separate filesystem watcher to debounce here, so the
//! scheduler's only job is pacing: how often the delta loop and upload
//! manager get a turn.
//!
//! ## Flow
//!
//! ```text
//! tick() ──┐
//!          ├──→ SyncScheduler::run() ──→ SyncEngine::sync()
//! request_sync() ──┘
//! ```

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::engine::{SyncEngine, SyncResult};

/// Drives periodic and on-demand sync cycles against a [`SyncEngine`]
///
/// ## Priority / User-Initiated Sync
///
/// Calling [`request_sync()`](SyncScheduler::request_sync) sets the
/// `sync_requested` flag immediately, which wakes the run loop on its next
/// tick instead of waiting out the full interval.
pub struct SyncScheduler {
    /// The engine whose `sync()` is invoked each cycle
    engine: Arc<SyncEngine>,
    /// How often to run a sync cycle in steady state
    interval: Duration,
    /// Shared flag set by [`request_sync`](SyncScheduler::request_sync) to
    /// wake the loop early
    sync_requested: Arc<AtomicBool>,
    /// Shared flag cleared by [`stop`](SyncScheduler::stop) to end the loop
    running: Arc<AtomicBool>,
}

impl SyncScheduler {
    /// Creates a new `SyncScheduler`
    ///
    /// # Returns
    /// A tuple of `(SyncScheduler, Arc<AtomicBool>)`. The returned flag can
    /// be set by other tasks (e.g. an IPC handler) to request an immediate
    /// sync without holding a reference to the scheduler itself.
    pub fn new(engine: Arc<SyncEngine>, interval: Duration) -> (Self, Arc<AtomicBool>) {
        let sync_requested = Arc::new(AtomicBool::new(false));
        let flag = sync_requested.clone();

        info!(interval_secs = interval.as_secs(), "Creating sync scheduler");

        let scheduler = Self {
            engine,
            interval,
            sync_requested,
            running: Arc::new(AtomicBool::new(true)),
        };

        (scheduler, flag)
    }

    /// Requests an immediate sync, waking the run loop on its next tick.
    pub fn request_sync(&self) {
        info!("Immediate sync requested");
        self.sync_requested.store(true, Ordering::Release);
    }

    /// Returns whether a sync has been requested since the last cycle ran.
    pub fn is_sync_requested(&self) -> bool {
        self.sync_requested.load(Ordering::Acquire)
    }

    /// Clears the sync-requested flag.
    pub fn clear_sync_request(&self) {
        self.sync_requested.store(false, Ordering::Release);
    }

    /// Signals the run loop to stop after its current cycle.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Main loop: runs a sync cycle on every tick of `interval`, or
    /// immediately whenever [`request_sync`](Self::request_sync) fires.
    ///
    /// Runs until [`stop`](Self::stop) is called. Errors from individual
    /// sync cycles are logged and do not stop the loop.
    pub async fn run(&self) {
        info!("Sync scheduler starting");

        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while self.running.load(Ordering::Acquire) {
            tokio::select! {
                _ = timer.tick() => {
                    self.run_cycle().await;
                }
                _ = self.wait_for_request() => {
                    self.clear_sync_request();
                    self.run_cycle().await;
                }
            }
        }

        info!("Sync scheduler stopped");
    }

    /// Polls the sync-requested flag until it is set, yielding between checks.
    async fn wait_for_request(&self) {
        loop {
            if self.sync_requested.load(Ordering::Acquire) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn run_cycle(&self) -> Option<SyncResult> {
        match self.engine.sync().await {
            Ok(result) => {
                if !result.errors.is_empty() {
                    warn!(
                        errors = result.errors.len(),
                        "Sync cycle completed with errors"
                    );
                }
                Some(result)
            }
            Err(err) => {
                error!("Sync cycle failed: {err:#}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use onemount_core::config::Config;
    use onemount_core::domain::newtypes::{AccountId, DeltaToken, NodeId, RemoteId, RemotePath};
    use onemount_core::domain::{
        Account, AuditEntry, Conflict, DeltaCursor, Inode, ItemId, OfflineChange, UploadSession,
    };
    use onemount_core::ports::cloud_provider::{
        AuthFlow, DeltaResponse, DeviceCodeResponse, ICloudProvider, SubscriptionHandle,
        UploadChunkOutcome,
    };
    use onemount_core::ports::local_filesystem::{FileSystemState, ILocalFileSystem};
    use onemount_core::ports::state_repository::{IStateRepository, InodeFilter};
    use onemount_core::ports::Tokens;
    use onemount_core::ports::UserInfo;
    use std::sync::atomic::Ordering;

    struct UnusedCloudProvider;

    #[async_trait]
    impl ICloudProvider for UnusedCloudProvider {
        async fn authenticate(&self, _auth_flow: &AuthFlow) -> anyhow::Result<Tokens> {
            unimplemented!("scheduler tests never invoke sync()")
        }
        async fn begin_device_code(
            &self,
            _app_id: &str,
            _scopes: &[&str],
        ) -> anyhow::Result<DeviceCodeResponse> {
            unimplemented!()
        }
        async fn poll_device_code(&self, _device_code: &str) -> anyhow::Result<Option<Tokens>> {
            unimplemented!()
        }
        async fn refresh_tokens(&self, _refresh_token: &str) -> anyhow::Result<Tokens> {
            unimplemented!()
        }
        async fn get_delta(&self, _token: Option<&DeltaToken>) -> anyhow::Result<DeltaResponse> {
            unimplemented!()
        }
        async fn download_file(&self, _remote_id: &RemoteId) -> anyhow::Result<Vec<u8>> {
            unimplemented!()
        }
        async fn download_range(
            &self,
            _remote_id: &RemoteId,
            _range_start: u64,
            _range_end: u64,
        ) -> anyhow::Result<Vec<u8>> {
            unimplemented!()
        }
        async fn upload_file(
            &self,
            _parent_path: &RemotePath,
            _name: &str,
            _data: &[u8],
            _if_match_etag: Option<&str>,
        ) -> anyhow::Result<onemount_core::ports::cloud_provider::DeltaItem> {
            unimplemented!()
        }
        async fn upload_file_session(
            &self,
            _parent_path: &RemotePath,
            _name: &str,
            _data: &[u8],
            _progress: Option<Box<dyn Fn(u64, u64) + Send>>,
        ) -> anyhow::Result<onemount_core::ports::cloud_provider::DeltaItem> {
            unimplemented!()
        }
        async fn create_upload_session(
            &self,
            _parent_path: &RemotePath,
            _name: &str,
            _total_size: u64,
            _if_match_etag: Option<&str>,
        ) -> anyhow::Result<String> {
            unimplemented!()
        }
        async fn upload_chunk(
            &self,
            _upload_url: &str,
            _data: &[u8],
            _range_start: u64,
            _total_size: u64,
        ) -> anyhow::Result<UploadChunkOutcome> {
            unimplemented!()
        }
        async fn cancel_upload_session(&self, _upload_url: &str) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn get_metadata(
            &self,
            _remote_id: &RemoteId,
        ) -> anyhow::Result<onemount_core::ports::cloud_provider::DeltaItem> {
            unimplemented!()
        }
        async fn get_user_info(&self) -> anyhow::Result<UserInfo> {
            unimplemented!()
        }
        async fn delete_item(&self, _remote_id: &RemoteId) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn create_subscription(
            &self,
            _resource: &str,
            _notification_url: &str,
            _expires_at: chrono::DateTime<chrono::Utc>,
        ) -> anyhow::Result<SubscriptionHandle> {
            unimplemented!()
        }
        async fn renew_subscription(
            &self,
            _subscription_id: &str,
            _expires_at: chrono::DateTime<chrono::Utc>,
        ) -> anyhow::Result<SubscriptionHandle> {
            unimplemented!()
        }
        async fn delete_subscription(&self, _subscription_id: &str) -> anyhow::Result<()> {
            unimplemented!()
        }
    }

    struct UnusedStateRepository;

    #[async_trait]
    impl IStateRepository for UnusedStateRepository {
        async fn save_inode(&self, _inode: &Inode) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn get_inode(&self, _ino: NodeId) -> anyhow::Result<Option<Inode>> {
            unimplemented!()
        }
        async fn get_inode_by_item_id(&self, _id: &ItemId) -> anyhow::Result<Option<Inode>> {
            unimplemented!()
        }
        async fn get_inode_by_remote_id(
            &self,
            _remote_id: &RemoteId,
        ) -> anyhow::Result<Option<Inode>> {
            unimplemented!()
        }
        async fn get_child_inode(
            &self,
            _parent: NodeId,
            _name: &str,
        ) -> anyhow::Result<Option<Inode>> {
            unimplemented!()
        }
        async fn query_inodes(&self, _filter: &InodeFilter) -> anyhow::Result<Vec<Inode>> {
            unimplemented!()
        }
        async fn delete_inode_recursive(&self, _ino: NodeId) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn allocate_inode(&self) -> anyhow::Result<NodeId> {
            unimplemented!()
        }
        async fn serialize_all(&self, _inodes: &[Inode]) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn get_items_for_dehydration(
            &self,
            _max_age_days: u32,
            _limit: u32,
        ) -> anyhow::Result<Vec<Inode>> {
            unimplemented!()
        }
        async fn update_last_accessed(
            &self,
            _ino: NodeId,
            _timestamp: chrono::DateTime<chrono::Utc>,
        ) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn get_delta_cursor(
            &self,
            _account_id: &AccountId,
        ) -> anyhow::Result<Option<DeltaCursor>> {
            unimplemented!()
        }
        async fn save_delta_cursor(
            &self,
            _account_id: &AccountId,
            _cursor: &DeltaCursor,
        ) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn save_offline_change(&self, _change: &OfflineChange) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn get_pending_offline_changes(&self) -> anyhow::Result<Vec<OfflineChange>> {
            unimplemented!()
        }
        async fn delete_offline_change(
            &self,
            _item_id: &ItemId,
            _recorded_at: chrono::DateTime<chrono::Utc>,
        ) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn save_upload_session(&self, _session: &UploadSession) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn get_upload_session(
            &self,
            _item_id: &ItemId,
        ) -> anyhow::Result<Option<UploadSession>> {
            unimplemented!()
        }
        async fn get_resumable_upload_sessions(&self) -> anyhow::Result<Vec<UploadSession>> {
            unimplemented!()
        }
        async fn delete_upload_session(&self, _item_id: &ItemId) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn get_schema_version(&self) -> anyhow::Result<Option<u32>> {
            unimplemented!()
        }
        async fn set_schema_version(&self, _version: u32) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn save_account(&self, _account: &Account) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn get_account(&self, _account_id: &AccountId) -> anyhow::Result<Option<Account>> {
            unimplemented!()
        }
        async fn get_default_account(&self) -> anyhow::Result<Option<Account>> {
            unimplemented!()
        }
        async fn save_audit(&self, _entry: &AuditEntry) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn get_audit_trail(&self, _item_id: &ItemId) -> anyhow::Result<Vec<AuditEntry>> {
            unimplemented!()
        }
        async fn get_audit_since(
            &self,
            _since: chrono::DateTime<chrono::Utc>,
        ) -> anyhow::Result<Vec<AuditEntry>> {
            unimplemented!()
        }
        async fn save_conflict(&self, _conflict: &Conflict) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn get_unresolved_conflicts(&self) -> anyhow::Result<Vec<Conflict>> {
            unimplemented!()
        }
        async fn count_items_by_status(
            &self,
            _account_id: &AccountId,
        ) -> anyhow::Result<std::collections::HashMap<String, u64>> {
            unimplemented!()
        }
    }

    struct UnusedFileSystem;

    #[async_trait]
    impl ILocalFileSystem for UnusedFileSystem {
        async fn read_file(
            &self,
            _path: &onemount_core::domain::newtypes::SyncPath,
        ) -> anyhow::Result<Vec<u8>> {
            unimplemented!()
        }
        async fn write_file(
            &self,
            _path: &onemount_core::domain::newtypes::SyncPath,
            _data: &[u8],
        ) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn delete_file(
            &self,
            _path: &onemount_core::domain::newtypes::SyncPath,
        ) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn get_state(
            &self,
            _path: &onemount_core::domain::newtypes::SyncPath,
        ) -> anyhow::Result<FileSystemState> {
            unimplemented!()
        }
        async fn compute_hash(
            &self,
            _path: &onemount_core::domain::newtypes::SyncPath,
        ) -> anyhow::Result<onemount_core::domain::newtypes::FileHash> {
            unimplemented!()
        }
        async fn create_directory(
            &self,
            _path: &onemount_core::domain::newtypes::SyncPath,
        ) -> anyhow::Result<()> {
            unimplemented!()
        }
    }

    fn test_engine() -> Arc<SyncEngine> {
        Arc::new(SyncEngine::new(
            Arc::new(UnusedCloudProvider),
            Arc::new(UnusedStateRepository),
            Arc::new(UnusedFileSystem),
            &Config::default(),
        ))
    }

    #[test]
    fn test_request_sync_sets_flag() {
        let (scheduler, flag) = SyncScheduler::new(test_engine(), Duration::from_secs(300));

        assert!(!flag.load(Ordering::Acquire));
        scheduler.request_sync();
        assert!(flag.load(Ordering::Acquire));
        assert!(scheduler.is_sync_requested());
    }

    #[test]
    fn test_clear_sync_request() {
        let (scheduler, flag) = SyncScheduler::new(test_engine(), Duration::from_secs(300));

        scheduler.request_sync();
        assert!(flag.load(Ordering::Acquire));
        scheduler.clear_sync_request();
        assert!(!flag.load(Ordering::Acquire));
    }

    #[test]
    fn test_stop_clears_running_flag() {
        let (scheduler, _flag) = SyncScheduler::new(test_engine(), Duration::from_secs(300));

        assert!(scheduler.running.load(Ordering::Acquire));
        scheduler.stop();
        assert!(!scheduler.running.load(Ordering::Acquire));
    }
}
