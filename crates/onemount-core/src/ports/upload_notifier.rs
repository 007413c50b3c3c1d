//! Upload notifier port (driven/secondary port)
//!
//! Lets the FUSE adapter request an immediate, high-priority upload without
//! depending on the sync engine crate directly. The concrete implementation
//! (a handle onto the sync engine's upload queue) is wired in by the
//! composition root.

use crate::domain::newtypes::ItemId;

/// Requests that an item be uploaded ahead of the periodic dirty scan.
///
/// Implementations should not block the caller: `enqueue_high` is called
/// from synchronous FUSE callback threads (`flush`/`fsync`) and must return
/// quickly, dropping the request rather than waiting if the queue is full.
pub trait UploadNotifier: Send + Sync {
    /// Enqueues `item_id` for a high-priority upload.
    fn enqueue_high(&self, item_id: ItemId);
}
