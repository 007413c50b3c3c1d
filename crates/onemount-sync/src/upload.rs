//! Dual-priority upload queue
//!
//! The periodic dirty scan in [`crate::engine::SyncEngine::sync`] is enough
//! to eventually push every local write to the cloud, but a flush/fsync on
//! an open file descriptor should not have to wait for the next scheduler
//! tick. [`UploadManager`] gives flush/fsync a way to ask for an item to be
//! uploaded immediately, ahead of anything the periodic scan is still
//! working through.
//!
//! ```text
//! flush()/fsync() ──enqueue_high──┐
//!                                  ├──► UploadManager::run() ──► SyncEngine::upload_item()
//! run_upload_manager (scan) ──────┘        (high always drains before low)
//! ```
//!
//! Two independent channels, not one channel carrying a priority field: a
//! `tokio::select!` with `biased;` over two receivers guarantees the high
//! queue is drained first without needing a custom priority queue.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use onemount_core::domain::newtypes::ItemId;
use onemount_core::domain::upload_session::UploadPriority;
use onemount_core::ports::UploadNotifier;

use crate::engine::SyncEngine;

/// Channel capacity for each priority lane.
const QUEUE_CAPACITY: usize = 256;

/// Maximum number of uploads the manager drives concurrently.
const MAX_CONCURRENT_UPLOADS: usize = 5;

/// Producer handle for the upload queue.
///
/// Cheap to clone; every `OneMountFs` instance holds one so flush/fsync
/// handlers can enqueue without talking to [`UploadManager`] directly.
#[derive(Clone)]
pub struct UploadQueueHandle {
    high: mpsc::Sender<ItemId>,
    low: mpsc::Sender<ItemId>,
}

impl UploadQueueHandle {
    /// Enqueues `item_id` on the high-priority lane (flush/fsync).
    ///
    /// Drops the request with a warning if the queue is full rather than
    /// blocking the calling FUSE thread; the periodic dirty scan will still
    /// pick the item up eventually.
    pub fn enqueue_high(&self, item_id: ItemId) {
        if self.high.try_send(item_id).is_err() {
            warn!("Upload queue: high-priority lane full or closed, dropping enqueue");
        }
    }

    /// Enqueues `item_id` on the low-priority lane (deferred/background work).
    pub fn enqueue_low(&self, item_id: ItemId) {
        if self.low.try_send(item_id).is_err() {
            warn!("Upload queue: low-priority lane full or closed, dropping enqueue");
        }
    }
}

impl UploadNotifier for UploadQueueHandle {
    fn enqueue_high(&self, item_id: ItemId) {
        UploadQueueHandle::enqueue_high(self, item_id);
    }
}

/// Drains the high- and low-priority upload queues against a [`SyncEngine`].
///
/// High-priority items always drain ahead of low-priority ones. Up to
/// [`MAX_CONCURRENT_UPLOADS`] uploads run at once via a semaphore, so one
/// slow large-file upload cannot stall a burst of small flushes behind it.
pub struct UploadManager {
    engine: Arc<SyncEngine>,
    high_rx: mpsc::Receiver<ItemId>,
    low_rx: mpsc::Receiver<ItemId>,
    semaphore: Arc<Semaphore>,
}

impl UploadManager {
    /// Creates a new `UploadManager`, returning it alongside the handle
    /// callers use to enqueue work.
    pub fn new(engine: Arc<SyncEngine>) -> (Self, UploadQueueHandle) {
        let (high_tx, high_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (low_tx, low_rx) = mpsc::channel(QUEUE_CAPACITY);

        let manager = Self {
            engine,
            high_rx,
            low_rx,
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_UPLOADS)),
        };
        let handle = UploadQueueHandle { high: high_tx, low: low_tx };

        (manager, handle)
    }

    /// Runs until both queue senders have been dropped.
    ///
    /// Each dequeued item is dispatched onto its own task bounded by the
    /// shared semaphore, so the select loop never blocks on a single
    /// upload's network round trip.
    pub async fn run(mut self) {
        debug!("Upload manager starting");

        // Once the high-priority sender is dropped, stop selecting on it:
        // a closed `recv()` resolves immediately, and with `biased` that
        // would spin the loop instead of waiting on the low-priority lane.
        let mut high_open = true;

        loop {
            let next = if high_open {
                tokio::select! {
                    biased;
                    item = self.high_rx.recv() => match item {
                        Some(id) => Some((id, UploadPriority::Foreground)),
                        None => {
                            high_open = false;
                            None
                        }
                    },
                    item = self.low_rx.recv() => item.map(|id| (id, UploadPriority::Background)),
                }
            } else {
                self.low_rx.recv().await.map(|id| (id, UploadPriority::Background))
            };

            let Some((item_id, priority)) = next else {
                if !high_open {
                    break;
                }
                continue;
            };

            let permit = self.semaphore.clone().acquire_owned().await;
            let Ok(permit) = permit else { break };
            let engine = self.engine.clone();

            tokio::spawn(async move {
                let _permit = permit;
                if let Err(err) = engine.upload_item(&item_id, priority).await {
                    warn!(%item_id, error = %err, "Queued upload failed");
                }
            });
        }

        debug!("Upload manager stopped (all queue handles dropped)");
    }
}
