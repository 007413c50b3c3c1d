//! OneMount IPC - D-Bus communication library
//!
//! Provides high-level async API for UI clients to communicate
//! with the OneMount daemon via D-Bus session bus.
//!
//! # Interfaces
//! - `org.onemount.FileStatus.FileStatus` - per-path status queries
//! - `org.onemount.FileStatus.SyncController` - Sync control
//! - `org.onemount.FileStatus.Account` - Account management
//! - `org.onemount.FileStatus.Conflicts` - Conflict resolution
//!
//! Each running mount claims its own well-known bus name (see
//! [`service_name`]) rather than a single shared one, so more than one
//! mount can be active on the same session bus at once.
//!
//! # Usage
//!
//! The [`DbusService`] type is the main entry point. It manages the
//! D-Bus connection lifecycle and registers all interface implementations.
//!
//! ```rust,no_run
//! use onemount_ipc::service::DbusService;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let service = DbusService::with_default_state();
//! let _connection = service.start().await?;
//! // Service is now active on the session bus
//! # Ok(())
//! # }
//! ```

pub mod service;

pub use service::{
    service_name, AccountInterface, ConflictsInterface, DaemonState, DaemonSyncState, DbusService,
    FileStatusInterface, SyncControllerInterface, DBUS_PATH,
};
