//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the domain core
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`ICloudProvider`] - Cloud storage operations (OneDrive, future providers)
//! - [`IStateRepository`] - Persistent storage for sync state, accounts, audit
//! - [`ILocalFileSystem`] - Local content-store filesystem operations
//! - [`INotificationService`] - Desktop notifications and progress reporting
//! - [`UploadNotifier`] - Requests an immediate, high-priority upload

pub mod cloud_provider;
pub mod local_filesystem;
pub mod notification;
pub mod state_repository;
pub mod upload_notifier;

pub use cloud_provider::{
    AuthFlow, DeltaItem, DeltaResponse, ICloudProvider, SubscriptionHandle, Tokens, UploadChunkOutcome,
    UserInfo,
};
pub use local_filesystem::{FileSystemState, ILocalFileSystem};
pub use notification::{INotificationService, Notification, NotificationPriority};
pub use state_repository::{IStateRepository, InodeFilter};
pub use upload_notifier::UploadNotifier;
