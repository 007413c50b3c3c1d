//! OneMount Status - per-item status derivation
//!
//! Maintains the transient facts (`FileStatus`, see `onemount-core`) that
//! aren't persisted anywhere else: in-flight download progress, an
//! out-of-sync flag, the last error message, and a fast conflict hint ahead
//! of the conflict record landing in storage. Everything else (dirty,
//! unresolved conflicts, in-progress uploads, cache presence) is derived on
//! demand from the state repository / local filesystem ports, the same way
//! `onemount-cache`'s own `count_items_by_status` does it for the aggregate
//! case.
//!
//! This is the daemon-level facade behind `onemount-ipc`'s `GetFileStatus`
//! bus method and explicit status transitions reported by components that
//! don't otherwise touch a live FUSE inode (the sync engine, the conflict
//! resolver). `onemount-fuse::InodeEntry` keeps its own in-process
//! `StatusInputs` for the FUSE hot path; the two are reconciled by whichever
//! component observes a transition, not by a shared mutable table.

pub mod error;
pub mod tracker;

pub use error::StatusError;
pub use tracker::StatusTracker;
