//! Domain entities and business logic
//!
//! This module contains the core domain types for OneMount:
//! - Newtypes for type-safe identifiers and validated domain types
//! - Account management types
//! - Audit entries for tracking operations
//! - Conflict detection and resolution types
//! - The inode tree (files and directories)
//! - Upload/download session and offline-change journal entities
//! - The delta cursor and derived file status
//! - Domain-specific error types

pub mod account;
pub mod audit;
pub mod conflict;
pub mod delta_cursor;
pub mod download_request;
pub mod errors;
pub mod hash;
pub mod inode;
pub mod newtypes;
pub mod offline_change;
pub mod status;
pub mod upload_session;

// Re-export commonly used types
pub use account::{Account, AccountState};
pub use audit::{AuditAction, AuditEntry, AuditResult};
pub use conflict::{Conflict, Resolution, ResolutionSource, VersionInfo};
pub use delta_cursor::DeltaCursor;
pub use download_request::{DownloadPriority, DownloadRequest, DownloadState};
pub use errors::DomainError;
pub use hash::quick_xor_hash;
pub use inode::{validate_child_name, Inode};
pub use newtypes::*;
pub use offline_change::{OfflineChange, OfflineChangeKind, ReplayOutcome};
pub use status::{FileStatus, StatusInputs};
pub use upload_session::{UploadPriority, UploadSession, UploadState};
