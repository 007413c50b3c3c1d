//! OneMount FUSE - Files-on-Demand filesystem
//!
//! Implements a FUSE filesystem that provides:
//! - Placeholder files (sparse files with metadata)
//! - On-demand hydration when files are accessed
//! - Automatic dehydration for space management
//! - Extended attributes for file state

pub mod cache;
pub mod dehydration;
pub mod error;
pub mod filesystem;
pub mod hydration;
pub mod inode;
pub mod inode_entry;
pub mod write_serializer;
pub mod xattr;

pub use cache::ContentCache;
pub use dehydration::{DehydrationManager, DehydrationPolicy, DehydrationReport};
pub use error::FuseError;
pub use filesystem::OneMountFs;
pub use hydration::HydrationManager;
pub use inode::InodeTable;
pub use inode_entry::{InodeEntry, InodeNumber};
pub use write_serializer::{WriteSerializer, WriteSerializerHandle};
