//! Write operation serialization.
//!
//! Provides `WriteSerializer` to serialize concurrent writes to the same
//! database connection through SQLite, ensuring data consistency and proper
//! conflict detection. FUSE handlers never call the repository directly for
//! mutations; they go through this handle so writes are sequenced.

use chrono::{DateTime, Utc};
use onemount_cache::{pool::DatabasePool, repository::SqliteStateRepository};
use onemount_core::{
    domain::{Inode, NodeId},
    ports::IStateRepository,
};
use tokio::sync::{mpsc, oneshot};

use crate::error::FuseError;

/// Result type for write operations
pub type Result<T> = std::result::Result<T, FuseError>;

/// Write operations that can be serialized through the WriteSerializer
///
/// Each variant carries the data needed for the operation plus a oneshot
/// sender for returning the result to the caller.
#[derive(Debug)]
pub enum WriteOp {
    /// Persist an inode (new or updated).
    SaveInode {
        inode: Box<Inode>,
        reply: oneshot::Sender<Result<()>>,
    },

    /// Update the last-accessed timestamp used for dehydration scheduling.
    UpdateLastAccessed {
        ino: NodeId,
        accessed: DateTime<Utc>,
        reply: oneshot::Sender<Result<()>>,
    },

    /// Allocate the next available kernel node number.
    AllocateInode { reply: oneshot::Sender<Result<NodeId>> },

    /// Delete an inode and, for a directory, its subtree.
    DeleteInodeRecursive {
        ino: NodeId,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Handle for sending write operations to the WriteSerializer
///
/// This handle can be cloned and shared across multiple tasks.
/// All operations are processed sequentially by the WriteSerializer task.
#[derive(Clone)]
pub struct WriteSerializerHandle {
    tx: mpsc::Sender<WriteOp>,
}

impl WriteSerializerHandle {
    /// Persists an inode (new or updated), returning once the serializer has processed it.
    pub async fn save_inode(&self, inode: Inode) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let op = WriteOp::SaveInode {
            inode: Box::new(inode),
            reply: tx,
        };

        self.tx.send(op).await.map_err(|_| {
            FuseError::DatabaseError("WriteSerializer task has stopped".to_string())
        })?;

        rx.await
            .map_err(|_| FuseError::DatabaseError("WriteSerializer response lost".to_string()))?
    }

    /// Updates an inode's last-accessed timestamp.
    pub async fn update_last_accessed(&self, ino: NodeId, accessed: DateTime<Utc>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let op = WriteOp::UpdateLastAccessed {
            ino,
            accessed,
            reply: tx,
        };

        self.tx.send(op).await.map_err(|_| {
            FuseError::DatabaseError("WriteSerializer task has stopped".to_string())
        })?;

        rx.await
            .map_err(|_| FuseError::DatabaseError("WriteSerializer response lost".to_string()))?
    }

    /// Allocates a new kernel node number.
    pub async fn allocate_inode(&self) -> Result<NodeId> {
        let (tx, rx) = oneshot::channel();
        let op = WriteOp::AllocateInode { reply: tx };

        self.tx.send(op).await.map_err(|_| {
            FuseError::DatabaseError("WriteSerializer task has stopped".to_string())
        })?;

        rx.await
            .map_err(|_| FuseError::DatabaseError("WriteSerializer response lost".to_string()))?
    }

    /// Deletes an inode (and, for a directory, its subtree).
    pub async fn delete_inode_recursive(&self, ino: NodeId) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let op = WriteOp::DeleteInodeRecursive { ino, reply: tx };

        self.tx.send(op).await.map_err(|_| {
            FuseError::DatabaseError("WriteSerializer task has stopped".to_string())
        })?;

        rx.await
            .map_err(|_| FuseError::DatabaseError("WriteSerializer response lost".to_string()))?
    }
}

/// Serializes write operations to SQLite to prevent SQLITE_BUSY errors
///
/// The WriteSerializer runs as a tokio task that processes write operations
/// sequentially from an mpsc channel. This ensures that all database writes
/// are serialized, preventing concurrent write contention in SQLite.
///
/// # Architecture
///
/// ```text
/// ┌─────────────┐      WriteOp      ┌──────────────────┐
/// │ FUSE thread │ ─────────────────► │ WriteSerializer  │
/// │   (caller)  │                    │      task        │
/// └─────────────┘                    └──────────────────┘
///       │                                      │
///       │          Result via oneshot          │
///       │ ◄────────────────────────────────────┤
///       │                                      │
///       │                                      ▼
///       │                             ┌─────────────────┐
///       │                             │ SqliteStateRepo │
///       │                             └─────────────────┘
/// ```
pub struct WriteSerializer {
    rx: mpsc::Receiver<WriteOp>,
    repository: SqliteStateRepository,
}

impl WriteSerializer {
    /// Creates a new WriteSerializer with the given database pool
    ///
    /// Returns a tuple of:
    /// - The serializer itself (to be spawned as a task)
    /// - A handle for sending write operations
    ///
    /// The caller must spawn the serializer as a tokio task by calling `run()`.
    pub fn new(pool: DatabasePool) -> (Self, WriteSerializerHandle) {
        // Buffer size of 100 allows reasonable batching without excessive memory use
        let (tx, rx) = mpsc::channel(100);

        let repository = SqliteStateRepository::new(pool.pool().clone());

        let serializer = Self { rx, repository };
        let handle = WriteSerializerHandle { tx };

        (serializer, handle)
    }

    /// Runs the write serializer loop
    ///
    /// This method processes write operations from the channel sequentially,
    /// ensuring no concurrent writes to SQLite. It runs until the channel
    /// is closed (all senders are dropped).
    pub async fn run(mut self) {
        tracing::info!("WriteSerializer task started");

        while let Some(op) = self.rx.recv().await {
            self.process_operation(op).await;
        }

        tracing::info!("WriteSerializer task stopped (all senders dropped)");
    }

    /// Processes a single write operation
    ///
    /// Executes the operation using the repository and sends the result
    /// back to the caller via the oneshot channel.
    async fn process_operation(&self, op: WriteOp) {
        match op {
            WriteOp::SaveInode { inode, reply } => {
                tracing::trace!(ino = ?inode.ino(), "Processing SaveInode");

                let result = self
                    .repository
                    .save_inode(&inode)
                    .await
                    .map_err(|e| FuseError::DatabaseError(e.to_string()));

                let _ = reply.send(result);
            }

            WriteOp::UpdateLastAccessed {
                ino,
                accessed,
                reply,
            } => {
                tracing::trace!(?ino, ?accessed, "Processing UpdateLastAccessed");

                let result = self
                    .repository
                    .update_last_accessed(ino, accessed)
                    .await
                    .map_err(|e| FuseError::DatabaseError(e.to_string()));

                let _ = reply.send(result);
            }

            WriteOp::AllocateInode { reply } => {
                tracing::trace!("Processing AllocateInode");

                let result = self
                    .repository
                    .allocate_inode()
                    .await
                    .map_err(|e| FuseError::DatabaseError(e.to_string()));

                let _ = reply.send(result);
            }

            WriteOp::DeleteInodeRecursive { ino, reply } => {
                tracing::trace!(?ino, "Processing DeleteInodeRecursive");

                let result = self
                    .repository
                    .delete_inode_recursive(ino)
                    .await
                    .map_err(|e| FuseError::DatabaseError(e.to_string()));

                let _ = reply.send(result);
            }
        }
    }
}
