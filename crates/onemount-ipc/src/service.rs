//! D-Bus service implementation for OneMount
//!
//! Provides the D-Bus interfaces that UI clients and CLI tools use to
//! communicate with the running OneMount daemon:
//!
//! - `org.onemount.FileStatus.FileStatus` - per-path status queries, the
//!   module every mount exposes (§4.M)
//! - `org.onemount.FileStatus.SyncController` - start, pause, and query sync
//! - `org.onemount.FileStatus.Account` - account information and auth status
//! - `org.onemount.FileStatus.Conflicts` - conflict listing and resolution
//!
//! Signals are emitted on state changes, sync progress, and file status
//! transitions.

use std::sync::Arc;

use onemount_core::domain::newtypes::NodeId;
use onemount_core::ports::state_repository::IStateRepository;
use onemount_status::StatusTracker;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// D-Bus object path every interface is served at.
pub const DBUS_PATH: &str = "/org/onemount/FileStatus";

/// Builds the well-known bus name for one mount instance.
///
/// Each mount claims its own name rather than a single shared one, since
/// more than one OneMount instance (different accounts, or a test mount
/// alongside a real one) can run on the same session bus at once.
#[must_use]
pub fn service_name(prefix: &str, pid: u32, timestamp: i64) -> String {
    format!("org.onemount.FileStatus.{prefix}_{pid}_{timestamp}")
}

// ============================================================================
// Daemon state shared with D-Bus interfaces
// ============================================================================

/// Possible daemon sync states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonSyncState {
    /// Daemon is idle, waiting for next poll interval
    Idle,
    /// Sync cycle is currently running
    Syncing,
    /// Sync is paused by user request
    Paused,
    /// Daemon is waiting for authentication
    WaitingForAuth,
    /// Daemon encountered an error
    Error(String),
}

impl std::fmt::Display for DaemonSyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonSyncState::Idle => write!(f, "idle"),
            DaemonSyncState::Syncing => write!(f, "syncing"),
            DaemonSyncState::Paused => write!(f, "paused"),
            DaemonSyncState::WaitingForAuth => write!(f, "waiting_for_auth"),
            DaemonSyncState::Error(msg) => write!(f, "error: {}", msg),
        }
    }
}

/// Shared state between the daemon and D-Bus interfaces
pub struct DaemonState {
    /// Current sync state
    pub sync_state: DaemonSyncState,
    /// Whether sync has been requested while paused
    pub sync_requested: bool,
    /// Account email (if authenticated)
    pub account_email: Option<String>,
    /// Account display name (if authenticated)
    pub account_display_name: Option<String>,
    /// Last sync result summary (JSON)
    pub last_sync_result: Option<String>,
}

impl Default for DaemonState {
    fn default() -> Self {
        Self {
            sync_state: DaemonSyncState::Idle,
            sync_requested: false,
            account_email: None,
            account_display_name: None,
            last_sync_result: None,
        }
    }
}

// ============================================================================
// FileStatus interface - the module this crate exists to implement
// ============================================================================

/// D-Bus interface exposing per-path sync status
///
/// Resolves a mount-relative path to an item by walking the inode tree one
/// path segment at a time (the same traversal FUSE `lookup` performs
/// against `IStateRepository`), then asks `StatusTracker` to derive its
/// status.
pub struct FileStatusInterface {
    state_repository: Arc<dyn IStateRepository + Send + Sync>,
    tracker: Arc<StatusTracker>,
}

impl FileStatusInterface {
    pub fn new(
        state_repository: Arc<dyn IStateRepository + Send + Sync>,
        tracker: Arc<StatusTracker>,
    ) -> Self {
        Self {
            state_repository,
            tracker,
        }
    }

    async fn resolve_path(&self, path: &str) -> anyhow::Result<Option<onemount_core::domain::Inode>> {
        let mut current = NodeId::ROOT;
        let mut inode = None;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            match self.state_repository.get_child_inode(current, segment).await? {
                Some(node) => {
                    current = node.ino();
                    inode = Some(node);
                }
                None => return Ok(None),
            }
        }
        Ok(inode)
    }
}

#[zbus::interface(name = "org.onemount.FileStatus.FileStatus")]
impl FileStatusInterface {
    /// Returns the status enum name for a mount-relative path, or
    /// `"Unknown"` if the path doesn't resolve to a known item.
    #[zbus(name = "GetFileStatus")]
    async fn get_file_status(&self, path: String) -> String {
        let inode = match self.resolve_path(&path).await {
            Ok(Some(inode)) => inode,
            Ok(None) => return "Unknown".to_string(),
            Err(e) => {
                warn!(error = %e, path = %path, "Failed to resolve path for GetFileStatus");
                return "Unknown".to_string();
            }
        };

        match self.tracker.status_for(inode.id()).await {
            Ok(status) => status.as_xattr_value(),
            Err(e) => {
                warn!(error = %e, path = %path, "Failed to derive status for GetFileStatus");
                "Unknown".to_string()
            }
        }
    }

    /// Emitted whenever an item's derived status changes.
    #[zbus(signal, name = "FileStatusChanged")]
    async fn file_status_changed(
        signal_ctxt: &zbus::SignalContext<'_>,
        path: &str,
        status: &str,
    ) -> zbus::Result<()>;
}

// ============================================================================
// SyncController interface
// ============================================================================

/// D-Bus interface for controlling synchronization
///
/// Provides methods to start/pause sync and query the current status.
/// Connected to the daemon's shared state via an `Arc<Mutex<DaemonState>>`.
pub struct SyncControllerInterface {
    state: Arc<Mutex<DaemonState>>,
}

impl SyncControllerInterface {
    /// Creates a new SyncControllerInterface with the given shared state
    pub fn new(state: Arc<Mutex<DaemonState>>) -> Self {
        Self { state }
    }
}

#[zbus::interface(name = "org.onemount.FileStatus.SyncController")]
impl SyncControllerInterface {
    /// Triggers an immediate sync cycle
    ///
    /// If the daemon is paused, the sync request is queued and will run
    /// when the daemon is resumed. If already syncing, this is a no-op.
    async fn start_sync(&self) {
        let mut state = self.state.lock().await;
        match state.sync_state {
            DaemonSyncState::Syncing => {
                debug!("StartSync called but sync is already running");
            }
            DaemonSyncState::Paused => {
                info!("StartSync called while paused, queueing sync request");
                state.sync_requested = true;
            }
            _ => {
                info!("StartSync called, requesting sync cycle");
                state.sync_requested = true;
            }
        }
    }

    /// Pauses synchronization
    ///
    /// The daemon will finish any in-progress sync cycle but will not
    /// start new ones until resumed via `StartSync`.
    async fn pause_sync(&self) {
        let mut state = self.state.lock().await;
        if state.sync_state != DaemonSyncState::Paused {
            info!("PauseSync called, pausing sync");
            state.sync_state = DaemonSyncState::Paused;
        } else {
            debug!("PauseSync called but already paused");
        }
    }

    /// Returns the current daemon status as a JSON string
    ///
    /// The returned JSON contains:
    /// - `state`: Current sync state (idle, syncing, paused, etc.)
    /// - `account_email`: Email of the authenticated account (if any)
    /// - `last_sync_result`: Summary of the last sync cycle (if any)
    async fn get_status(&self) -> String {
        let state = self.state.lock().await;
        let status = serde_json::json!({
            "state": state.sync_state.to_string(),
            "account_email": state.account_email,
            "account_display_name": state.account_display_name,
            "last_sync_result": state.last_sync_result,
        });
        status.to_string()
    }

    /// Emitted when the sync state changes
    #[zbus(signal)]
    async fn state_changed(signal_ctxt: &zbus::SignalContext<'_>, state: &str) -> zbus::Result<()>;

    /// Emitted to report sync progress
    #[zbus(signal)]
    async fn sync_progress(
        signal_ctxt: &zbus::SignalContext<'_>,
        current: u32,
        total: u32,
    ) -> zbus::Result<()>;

    /// Emitted when an error occurs
    #[zbus(signal)]
    async fn error_occurred(
        signal_ctxt: &zbus::SignalContext<'_>,
        message: &str,
    ) -> zbus::Result<()>;
}

// ============================================================================
// Account interface
// ============================================================================

/// D-Bus interface for account information
///
/// Provides read-only access to the authenticated account's details
/// and authentication status.
pub struct AccountInterface {
    state: Arc<Mutex<DaemonState>>,
}

impl AccountInterface {
    /// Creates a new AccountInterface with the given shared state
    pub fn new(state: Arc<Mutex<DaemonState>>) -> Self {
        Self { state }
    }
}

#[zbus::interface(name = "org.onemount.FileStatus.Account")]
impl AccountInterface {
    /// Returns account information as a JSON string
    ///
    /// The returned JSON contains:
    /// - `email`: Account email address
    /// - `display_name`: Account display name
    async fn get_info(&self) -> String {
        let state = self.state.lock().await;
        let info = serde_json::json!({
            "email": state.account_email,
            "display_name": state.account_display_name,
        });
        info.to_string()
    }

    /// Checks whether the daemon has valid authentication
    ///
    /// Returns `true` if the daemon has a configured account with tokens,
    /// `false` otherwise.
    async fn check_auth(&self) -> bool {
        let state = self.state.lock().await;
        state.account_email.is_some()
    }
}

// ============================================================================
// Conflicts interface
// ============================================================================

/// D-Bus interface for conflict management
///
/// Provides methods to list unresolved conflicts, resolve them using a
/// specified strategy, and query individual conflict details. Uses the
/// real `IStateRepository` for persistent conflict data.
pub struct ConflictsInterface {
    #[allow(dead_code)]
    state: Arc<Mutex<DaemonState>>,
    state_repository: Arc<dyn IStateRepository + Send + Sync>,
}

impl ConflictsInterface {
    /// Creates a new ConflictsInterface with state repository
    pub fn new(
        state: Arc<Mutex<DaemonState>>,
        state_repository: Arc<dyn IStateRepository + Send + Sync>,
    ) -> Self {
        Self {
            state,
            state_repository,
        }
    }

    /// Finds one unresolved conflict by id.
    ///
    /// `IStateRepository` only exposes `get_unresolved_conflicts` (a bulk
    /// query), not a by-id lookup, so this filters locally - acceptable
    /// for a D-Bus call, where the unresolved set is expected to stay
    /// small.
    async fn find_unresolved(&self, id: &str) -> anyhow::Result<Option<onemount_core::domain::Conflict>> {
        let conflicts = self.state_repository.get_unresolved_conflicts().await?;
        Ok(conflicts.into_iter().find(|c| c.id().to_string() == id))
    }
}

#[zbus::interface(name = "org.onemount.FileStatus.Conflicts")]
impl ConflictsInterface {
    /// Returns a JSON array of unresolved conflicts
    ///
    /// Each conflict contains its ID, item_id, detection timestamp, and
    /// version metadata for both local and remote sides.
    async fn list(&self) -> String {
        match self.state_repository.get_unresolved_conflicts().await {
            Ok(conflicts) => {
                let json: Vec<serde_json::Value> = conflicts
                    .iter()
                    .map(|c| {
                        serde_json::json!({
                            "id": c.id().to_string(),
                            "item_id": c.item_id().to_string(),
                            "detected_at": c.detected_at().to_rfc3339(),
                            "local_version": {
                                "hash": c.local_version().hash().to_string(),
                                "size_bytes": c.local_version().size_bytes(),
                                "modified_at": c.local_version().modified_at().to_rfc3339(),
                            },
                            "remote_version": {
                                "hash": c.remote_version().hash().to_string(),
                                "size_bytes": c.remote_version().size_bytes(),
                                "modified_at": c.remote_version().modified_at().to_rfc3339(),
                            },
                        })
                    })
                    .collect();
                serde_json::to_string(&json).unwrap_or_else(|_| "[]".to_string())
            }
            Err(e) => {
                warn!(error = %e, "Failed to query unresolved conflicts");
                "[]".to_string()
            }
        }
    }

    /// Returns detailed JSON for a specific unresolved conflict
    ///
    /// # Returns
    /// JSON string with conflict details, or empty object if not found
    async fn get_details(&self, id: String) -> String {
        match self.find_unresolved(&id).await {
            Ok(Some(conflict)) => serde_json::json!({
                "id": conflict.id().to_string(),
                "item_id": conflict.item_id().to_string(),
                "detected_at": conflict.detected_at().to_rfc3339(),
                "is_resolved": conflict.is_resolved(),
                "local_version": {
                    "hash": conflict.local_version().hash().to_string(),
                    "size_bytes": conflict.local_version().size_bytes(),
                    "modified_at": conflict.local_version().modified_at().to_rfc3339(),
                    "etag": conflict.local_version().etag(),
                },
                "remote_version": {
                    "hash": conflict.remote_version().hash().to_string(),
                    "size_bytes": conflict.remote_version().size_bytes(),
                    "modified_at": conflict.remote_version().modified_at().to_rfc3339(),
                    "etag": conflict.remote_version().etag(),
                },
            })
            .to_string(),
            Ok(None) => "{}".to_string(),
            Err(e) => {
                warn!(error = %e, conflict_id = %id, "Failed to get conflict details");
                "{}".to_string()
            }
        }
    }

    /// Attempts to resolve a conflict with the given strategy
    ///
    /// # Arguments
    /// * `id` - The conflict's unique identifier
    /// * `strategy` - Resolution strategy: "keep_local", "keep_remote", or "keep_both"
    ///
    /// # Returns
    /// `true` if the conflict was resolved, `false` on error or invalid input
    async fn resolve(&self, id: String, strategy: String) -> bool {
        use onemount_core::domain::conflict::{Resolution, ResolutionSource};

        let resolution = match strategy.as_str() {
            "keep_local" | "local" => Resolution::KeepLocal,
            "keep_remote" | "remote" => Resolution::KeepRemote,
            "keep_both" | "both" => Resolution::KeepBoth,
            _ => {
                warn!(strategy = %strategy, "Invalid conflict resolution strategy");
                return false;
            }
        };

        let conflict = match self.find_unresolved(&id).await {
            Ok(Some(c)) => c,
            Ok(None) => {
                warn!(id = %id, "Conflict not found");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "Failed to query conflict");
                return false;
            }
        };

        info!(
            conflict_id = %id,
            strategy = %strategy,
            "Resolving conflict via D-Bus"
        );

        let resolved = conflict.resolve(resolution, ResolutionSource::User);
        match self.state_repository.save_conflict(&resolved).await {
            Ok(()) => {
                info!(conflict_id = %id, "Conflict resolved successfully");
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to save resolved conflict");
                false
            }
        }
    }

    /// Resolve all unresolved conflicts with the same strategy
    ///
    /// # Returns
    /// Number of conflicts resolved
    async fn resolve_all(&self, strategy: String) -> u32 {
        use onemount_core::domain::conflict::{Resolution, ResolutionSource};

        let resolution = match strategy.as_str() {
            "keep_local" | "local" => Resolution::KeepLocal,
            "keep_remote" | "remote" => Resolution::KeepRemote,
            "keep_both" | "both" => Resolution::KeepBoth,
            _ => {
                warn!(strategy = %strategy, "Invalid strategy for resolve_all");
                return 0;
            }
        };

        let conflicts = match self.state_repository.get_unresolved_conflicts().await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Failed to query conflicts for batch resolve");
                return 0;
            }
        };

        let mut resolved_count = 0u32;
        for conflict in conflicts {
            let resolved = conflict.resolve(resolution.clone(), ResolutionSource::User);
            if self.state_repository.save_conflict(&resolved).await.is_ok() {
                resolved_count += 1;
            }
        }

        info!(count = resolved_count, strategy = %strategy, "Batch resolve completed");
        resolved_count
    }

    /// Emitted when a new conflict is detected
    #[zbus(signal)]
    async fn conflict_detected(
        signal_ctxt: &zbus::SignalContext<'_>,
        conflict_json: &str,
    ) -> zbus::Result<()>;

    /// Emitted when a conflict is resolved
    #[zbus(signal)]
    async fn conflict_resolved(
        signal_ctxt: &zbus::SignalContext<'_>,
        conflict_id: &str,
        strategy: &str,
    ) -> zbus::Result<()>;
}

// ============================================================================
// DbusService - high-level service orchestrator
// ============================================================================

/// High-level D-Bus service that manages all interfaces
///
/// Creates a `zbus::Connection` on the session bus, registers all
/// interface objects at the well-known path, and requests a well-known
/// name unique to this mount instance.
pub struct DbusService {
    state: Arc<Mutex<DaemonState>>,
    state_repository: Option<Arc<dyn IStateRepository + Send + Sync>>,
    status_tracker: Option<Arc<StatusTracker>>,
    bus_name: String,
}

impl DbusService {
    /// Creates a new DbusService with the given shared state, state
    /// repository, and a unique bus name (see [`service_name`]).
    pub fn new(
        state: Arc<Mutex<DaemonState>>,
        state_repository: Arc<dyn IStateRepository + Send + Sync>,
        status_tracker: Arc<StatusTracker>,
        bus_name: String,
    ) -> Self {
        Self {
            state,
            state_repository: Some(state_repository),
            status_tracker: Some(status_tracker),
            bus_name,
        }
    }

    /// Creates a new DbusService with default state (no repository - for testing)
    pub fn with_default_state() -> Self {
        Self {
            state: Arc::new(Mutex::new(DaemonState::default())),
            state_repository: None,
            status_tracker: None,
            bus_name: service_name("test", std::process::id(), 0),
        }
    }

    /// Returns a reference to the shared daemon state
    pub fn state(&self) -> &Arc<Mutex<DaemonState>> {
        &self.state
    }

    /// Starts the D-Bus service on the session bus
    ///
    /// Registers all interfaces and requests the bus name. Returns the
    /// connection, which must be kept alive for the service to remain
    /// active. Per §4.M, failing to become the primary name owner (another
    /// mount already running with a colliding name) is tolerated: the
    /// connection still serves its interfaces and emits signals locally,
    /// just without being independently discoverable by that name.
    ///
    /// # Errors
    /// Returns an error if the session bus is unreachable, interface
    /// registration fails, or no state repository/status tracker is
    /// configured.
    pub async fn start(&self) -> anyhow::Result<zbus::Connection> {
        info!(name = %self.bus_name, "Starting D-Bus service on session bus");

        let state_repo = self
            .state_repository
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("DbusService requires a state_repository to start"))?
            .clone();
        let tracker = self
            .status_tracker
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("DbusService requires a status_tracker to start"))?
            .clone();

        let file_status_iface = FileStatusInterface::new(Arc::clone(&state_repo), tracker);
        let sync_controller = SyncControllerInterface::new(Arc::clone(&self.state));
        let account_iface = AccountInterface::new(Arc::clone(&self.state));
        let conflicts_iface =
            ConflictsInterface::new(Arc::clone(&self.state), Arc::clone(&state_repo));

        let builder = zbus::connection::Builder::session()?
            .serve_at(DBUS_PATH, file_status_iface)?
            .serve_at(DBUS_PATH, sync_controller)?
            .serve_at(DBUS_PATH, account_iface)?
            .serve_at(DBUS_PATH, conflicts_iface)?;

        let connection = builder.build().await?;

        match connection.request_name(self.bus_name.as_str()).await {
            Ok(()) => info!(name = %self.bus_name, "Acquired D-Bus well-known name"),
            Err(e) => warn!(
                name = %self.bus_name,
                error = %e,
                "Could not acquire well-known name, continuing unnamed"
            ),
        }

        info!(
            name = %self.bus_name,
            path = DBUS_PATH,
            "D-Bus service started successfully"
        );

        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_sync_state_display() {
        assert_eq!(DaemonSyncState::Idle.to_string(), "idle");
        assert_eq!(DaemonSyncState::Syncing.to_string(), "syncing");
        assert_eq!(DaemonSyncState::Paused.to_string(), "paused");
        assert_eq!(
            DaemonSyncState::WaitingForAuth.to_string(),
            "waiting_for_auth"
        );
        assert_eq!(
            DaemonSyncState::Error("test".to_string()).to_string(),
            "error: test"
        );
    }

    #[test]
    fn test_daemon_state_default() {
        let state = DaemonState::default();
        assert_eq!(state.sync_state, DaemonSyncState::Idle);
        assert!(!state.sync_requested);
        assert!(state.account_email.is_none());
        assert!(state.account_display_name.is_none());
        assert!(state.last_sync_result.is_none());
    }

    #[test]
    fn test_dbus_path_constant() {
        assert_eq!(DBUS_PATH, "/org/onemount/FileStatus");
    }

    #[test]
    fn test_service_name_is_unique_per_mount() {
        let a = service_name("home", 1234, 1000);
        let b = service_name("home", 5678, 1000);
        assert_ne!(a, b);
        assert_eq!(a, "org.onemount.FileStatus.home_1234_1000");
    }

    #[tokio::test]
    async fn test_sync_controller_get_status() {
        let state = Arc::new(Mutex::new(DaemonState::default()));
        let controller = SyncControllerInterface::new(Arc::clone(&state));

        let status_json = controller.get_status().await;
        let status: serde_json::Value = serde_json::from_str(&status_json).unwrap();

        assert_eq!(status["state"], "idle");
        assert!(status["account_email"].is_null());
    }

    #[tokio::test]
    async fn test_sync_controller_start_sync() {
        let state = Arc::new(Mutex::new(DaemonState::default()));
        let controller = SyncControllerInterface::new(Arc::clone(&state));

        controller.start_sync().await;

        let locked = state.lock().await;
        assert!(locked.sync_requested);
    }

    #[tokio::test]
    async fn test_sync_controller_pause_sync() {
        let state = Arc::new(Mutex::new(DaemonState::default()));
        let controller = SyncControllerInterface::new(Arc::clone(&state));

        controller.pause_sync().await;

        let locked = state.lock().await;
        assert_eq!(locked.sync_state, DaemonSyncState::Paused);
    }

    #[tokio::test]
    async fn test_sync_controller_start_while_paused() {
        let state = Arc::new(Mutex::new(DaemonState {
            sync_state: DaemonSyncState::Paused,
            ..DaemonState::default()
        }));
        let controller = SyncControllerInterface::new(Arc::clone(&state));

        controller.start_sync().await;

        let locked = state.lock().await;
        assert!(locked.sync_requested);
        assert_eq!(locked.sync_state, DaemonSyncState::Paused);
    }

    #[tokio::test]
    async fn test_account_get_info_no_account() {
        let state = Arc::new(Mutex::new(DaemonState::default()));
        let account = AccountInterface::new(Arc::clone(&state));

        let info_json = account.get_info().await;
        let info: serde_json::Value = serde_json::from_str(&info_json).unwrap();

        assert!(info["email"].is_null());
        assert!(info["display_name"].is_null());
    }

    #[tokio::test]
    async fn test_account_get_info_with_account() {
        let state = Arc::new(Mutex::new(DaemonState {
            account_email: Some("user@example.com".to_string()),
            account_display_name: Some("Test User".to_string()),
            ..DaemonState::default()
        }));
        let account = AccountInterface::new(Arc::clone(&state));

        let info_json = account.get_info().await;
        let info: serde_json::Value = serde_json::from_str(&info_json).unwrap();

        assert_eq!(info["email"], "user@example.com");
        assert_eq!(info["display_name"], "Test User");
    }

    #[tokio::test]
    async fn test_account_check_auth_no_account() {
        let state = Arc::new(Mutex::new(DaemonState::default()));
        let account = AccountInterface::new(state);

        assert!(!account.check_auth().await);
    }

    #[tokio::test]
    async fn test_account_check_auth_with_account() {
        let state = Arc::new(Mutex::new(DaemonState {
            account_email: Some("user@example.com".to_string()),
            ..DaemonState::default()
        }));
        let account = AccountInterface::new(state);

        assert!(account.check_auth().await);
    }

    async fn make_test_repo() -> Arc<onemount_cache::SqliteStateRepository> {
        let pool = onemount_cache::pool::DatabasePool::in_memory()
            .await
            .expect("Failed to create in-memory database");
        Arc::new(onemount_cache::SqliteStateRepository::new(
            pool.pool().clone(),
        ))
    }

    fn make_test_local_fs() -> Arc<dyn onemount_core::ports::local_filesystem::ILocalFileSystem + Send + Sync> {
        Arc::new(onemount_fs_test_double::AlwaysAbsentFs)
    }

    mod onemount_fs_test_double {
        use async_trait::async_trait;
        use onemount_core::domain::newtypes::{FileHash, SyncPath};
        use onemount_core::ports::local_filesystem::{FileSystemState, ILocalFileSystem};

        pub struct AlwaysAbsentFs;

        #[async_trait]
        impl ILocalFileSystem for AlwaysAbsentFs {
            async fn read_file(&self, _path: &SyncPath) -> anyhow::Result<Vec<u8>> {
                unimplemented!()
            }
            async fn write_file(&self, _path: &SyncPath, _data: &[u8]) -> anyhow::Result<()> {
                unimplemented!()
            }
            async fn delete_file(&self, _path: &SyncPath) -> anyhow::Result<()> {
                unimplemented!()
            }
            async fn get_state(&self, _path: &SyncPath) -> anyhow::Result<FileSystemState> {
                Ok(FileSystemState::not_found())
            }
            async fn compute_hash(&self, _path: &SyncPath) -> anyhow::Result<FileHash> {
                unimplemented!()
            }
            async fn create_directory(&self, _path: &SyncPath) -> anyhow::Result<()> {
                unimplemented!()
            }
        }
    }

    #[tokio::test]
    async fn test_conflicts_list_empty() {
        let state = Arc::new(Mutex::new(DaemonState::default()));
        let repo = make_test_repo().await;
        let conflicts = ConflictsInterface::new(state, repo);

        let result = conflicts.list().await;
        assert_eq!(result, "[]");
    }

    #[tokio::test]
    async fn test_conflicts_resolve_invalid_strategy() {
        let state = Arc::new(Mutex::new(DaemonState::default()));
        let repo = make_test_repo().await;
        let conflicts = ConflictsInterface::new(state, repo);

        assert!(
            !conflicts
                .resolve("c1".to_string(), "invalid".to_string())
                .await
        );
        assert!(
            !conflicts
                .resolve("c2".to_string(), "delete_all".to_string())
                .await
        );
    }

    #[tokio::test]
    async fn test_conflicts_resolve_not_found() {
        let state = Arc::new(Mutex::new(DaemonState::default()));
        let repo = make_test_repo().await;
        let conflicts = ConflictsInterface::new(state, repo);

        let fake_id = onemount_core::domain::newtypes::ConflictId::new().to_string();
        assert!(
            !conflicts
                .resolve(fake_id, "keep_local".to_string())
                .await
        );
    }

    #[tokio::test]
    async fn test_conflicts_resolve_all_empty() {
        let state = Arc::new(Mutex::new(DaemonState::default()));
        let repo = make_test_repo().await;
        let conflicts = ConflictsInterface::new(state, repo);

        let count = conflicts.resolve_all("keep_local".to_string()).await;
        assert_eq!(count, 0);
    }

    #[test]
    fn test_dbus_service_with_default_state() {
        let service = DbusService::with_default_state();
        let _state = service.state();
    }

    #[tokio::test]
    async fn test_dbus_service_with_custom_state() {
        let state = Arc::new(Mutex::new(DaemonState {
            account_email: Some("user@test.com".to_string()),
            ..DaemonState::default()
        }));
        let repo = make_test_repo().await;
        let tracker = Arc::new(StatusTracker::new(repo.clone(), make_test_local_fs()));
        let service = DbusService::new(state, repo, tracker, service_name("test", 1, 2));
        let _state = service.state();
    }

    #[tokio::test]
    async fn test_sync_controller_status_with_last_result() {
        let state = Arc::new(Mutex::new(DaemonState {
            sync_state: DaemonSyncState::Idle,
            account_email: Some("user@test.com".to_string()),
            last_sync_result: Some(
                serde_json::json!({
                    "files_downloaded": 5,
                    "files_uploaded": 2,
                    "errors": [],
                })
                .to_string(),
            ),
            ..DaemonState::default()
        }));
        let controller = SyncControllerInterface::new(state);

        let status_json = controller.get_status().await;
        let status: serde_json::Value = serde_json::from_str(&status_json).unwrap();

        assert_eq!(status["state"], "idle");
        assert_eq!(status["account_email"], "user@test.com");
        assert!(status["last_sync_result"].is_string());
    }

    #[tokio::test]
    async fn test_file_status_unknown_path() {
        let repo = make_test_repo().await;
        let tracker = Arc::new(StatusTracker::new(repo.clone(), make_test_local_fs()));
        let iface = FileStatusInterface::new(repo, tracker);

        let status = iface.get_file_status("/no/such/file.txt".to_string()).await;
        assert_eq!(status, "Unknown");
    }
}
