//! OneMount Sync - Delta synchronization engine
//!
//! Provides:
//! - Incremental delta sync with Microsoft Graph
//! - Adaptive rate limiting
//! - Conflict detection
//! - Bidirectional synchronization
//! - A dual-priority upload queue for flush/fsync-triggered uploads

pub mod engine;
pub mod filesystem;
pub mod scheduler;
pub mod upload;

pub use engine::{SyncEngine, SyncResult};
pub use filesystem::LocalFileSystemAdapter;
pub use upload::{UploadManager, UploadQueueHandle};
