//! On-demand file download manager.
//!
//! Provides `HydrationManager`, the Download Manager: a bounded worker pool
//! that pulls file content from OneDrive when a content-absent file is
//! accessed (read, mmap, or exec), with deduplication, chunked transfer for
//! large items, checksum verification, and exponential-backoff retry.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐     hydrate()      ┌─────────────────────┐
//! │  FUSE reader  │ ─────────────────► │  HydrationManager   │
//! │   (waiting)   │                    │                     │
//! └───────────────┘                    │  active: DashMap    │
//!        │                             │  semaphore: permits │ (pool of 5)
//!        │  watch::Receiver            │                     │
//!        │◄────────────────────────────│                     │
//!        │                             └─────────────────────┘
//!        │                                       │
//!        │                                       │ spawn download task
//!        │                                       ▼
//!        │                             ┌─────────────────────┐
//!        │                             │  Download Task       │
//!        │                             │  - GraphCloudProvider │
//!        │                             │  - ContentCache       │
//!        │                             │  - WriteSerializer    │
//!        │                             └─────────────────────┘
//!        │                                       │
//!        │  progress updates                     │
//!        │◄──────────────────────────────────────┘
//! ```
//!
//! Deduplication: enqueuing an inode that is already downloading returns the
//! existing request's progress receiver and raises its priority if the new
//! request outranks the one in flight; a second concurrent download is never
//! started for the same inode.
//!
//! A download's transient progress lives only in memory (the `DownloadRequest`
//! and its watch channel); only the final outcome is persisted, by updating
//! the inode's size/hash/etag through the write serializer.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use dashmap::DashMap;
use onemount_cache::{pool::DatabasePool, repository::SqliteStateRepository};
use onemount_core::domain::{
    quick_xor_hash, DownloadPriority, DownloadRequest, FileHash, NodeId, RemoteId,
};
use onemount_core::ports::{cloud_provider::ICloudProvider, IStateRepository};
use onemount_graph::provider::GraphCloudProvider;
use tokio::{
    runtime::Handle,
    sync::{watch, Mutex as AsyncMutex, Semaphore},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    cache::ContentCache, error::FuseError, inode::InodeTable, write_serializer::WriteSerializerHandle,
};

/// Default number of concurrent download workers.
pub const DEFAULT_WORKER_COUNT: usize = 5;

/// Threshold in bytes above which a download is split into chunks (100 MB).
const CHUNKED_DOWNLOAD_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Size of each chunk for large file downloads (10 MB).
const DOWNLOAD_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Maximum number of transport-level retry attempts per download.
const MAX_ATTEMPTS: u32 = 5;

/// Base delay for the exponential backoff schedule.
const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Backoff cap: no retry ever waits longer than this.
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Computes the backoff delay for a given attempt (0-indexed), with up to
/// ±10% jitter, per the retry schedule: 1s, 2s, 4s, 8s, 16s, capped at 60s.
fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE.as_secs_f64() * 2f64.powi(attempt as i32);
    let capped = exp.min(BACKOFF_CAP.as_secs_f64());
    let jitter_fraction = jitter_unit() * 0.2 - 0.1; // [-0.1, 0.1)
    let jittered = (capped * (1.0 + jitter_fraction)).max(0.0);
    Duration::from_secs_f64(jittered)
}

/// A pseudo-random unit value in `[0, 1)` derived from the system clock.
///
/// Avoids a dependency on a random-number crate for a value that only needs
/// to vary retry timing across concurrent downloaders, not resist prediction.
fn jitter_unit() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    f64::from(nanos % 1_000_000) / 1_000_000.0
}

/// How a failed attempt should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorClass {
    /// Transport error or 5xx: retry with backoff.
    Transient,
    /// 401: one immediate retry, assuming the auth layer refreshes the
    /// token in the background when it observes the same rejection.
    Unauthorized,
    /// Any other 4xx: retrying will not help.
    Permanent,
}

/// Classifies an error returned by the cloud provider by inspecting the
/// underlying HTTP status, if the error chain carries one.
fn classify_error(err: &anyhow::Error) -> ErrorClass {
    for cause in err.chain() {
        if let Some(reqwest_err) = cause.downcast_ref::<reqwest::Error>() {
            if let Some(status) = reqwest_err.status() {
                if status.as_u16() == 401 {
                    return ErrorClass::Unauthorized;
                }
                if status.is_server_error() {
                    return ErrorClass::Transient;
                }
                if status.is_client_error() {
                    return ErrorClass::Permanent;
                }
            }
        }
    }
    ErrorClass::Transient
}

/// A download tracked by the manager while it is queued or in flight.
struct ActiveDownload {
    request: Arc<AsyncMutex<DownloadRequest>>,
    progress_tx: watch::Sender<u8>,
    cancel_token: CancellationToken,
    _task_handle: JoinHandle<()>,
}

/// Manages concurrent on-demand downloads of file content from OneDrive.
///
/// A fixed-size worker pool (`DEFAULT_WORKER_COUNT` by default) services a
/// single queue of requests. Enqueuing an inode already in flight returns a
/// handle to the existing download rather than starting a second one.
pub struct HydrationManager {
    active: Arc<DashMap<u64, ActiveDownload>>,
    semaphore: Arc<Semaphore>,
    cache: Arc<ContentCache>,
    write_handle: WriteSerializerHandle,
    provider: Arc<GraphCloudProvider>,
    db_pool: DatabasePool,
    inode_table: Arc<InodeTable>,
    rt_handle: Handle,
    /// Cancelled when the filesystem is shutting down; every in-flight
    /// downloader observes this in addition to its own per-request token.
    shutdown: CancellationToken,
}

impl HydrationManager {
    /// Creates a new `HydrationManager` with a worker pool of `max_concurrent` slots.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        max_concurrent: usize,
        cache: Arc<ContentCache>,
        write_handle: WriteSerializerHandle,
        provider: Arc<GraphCloudProvider>,
        db_pool: DatabasePool,
        inode_table: Arc<InodeTable>,
        rt_handle: Handle,
    ) -> Self {
        Self {
            active: Arc::new(DashMap::new()),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            cache,
            write_handle,
            provider,
            db_pool,
            inode_table,
            rt_handle,
            shutdown: CancellationToken::new(),
        }
    }

    /// Signals every in-flight and future download to stop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Initiates a download for `ino`, or joins an already in-flight one.
    ///
    /// Returns a `watch::Receiver<u8>` reporting progress as a 0-100
    /// percentage. If a download for this inode is already active its
    /// priority is raised to at least `priority` (never lowered) and the
    /// caller is handed a receiver for that existing download.
    pub async fn hydrate(
        &self,
        ino: u64,
        remote_id: RemoteId,
        expected_size: u64,
        expected_hash: Option<FileHash>,
        priority: DownloadPriority,
    ) -> Result<watch::Receiver<u8>, FuseError> {
        if let Some(active) = self.active.get(&ino) {
            active.request.lock().await.raise_priority(priority);
            debug!(ino, "Download already in flight, joining existing request");
            return Ok(active.progress_tx.subscribe());
        }

        let request = Arc::new(AsyncMutex::new(DownloadRequest::new(
            remote_id.clone(),
            expected_size,
            expected_hash,
            priority,
        )));
        let (progress_tx, progress_rx) = watch::channel(0u8);
        let cancel_token = CancellationToken::new();

        let semaphore = Arc::clone(&self.semaphore);
        let cache = Arc::clone(&self.cache);
        let write_handle = self.write_handle.clone();
        let provider = Arc::clone(&self.provider);
        let db_pool = self.db_pool.clone();
        let inode_table = Arc::clone(&self.inode_table);
        let active_map = Arc::clone(&self.active);
        let request_clone = Arc::clone(&request);
        let progress_tx_clone = progress_tx.clone();
        let cancel_token_clone = cancel_token.clone();
        let shutdown = self.shutdown.clone();

        let task_handle = self.rt_handle.spawn(async move {
            let outcome = run_download(
                ino,
                &semaphore,
                &cache,
                &write_handle,
                &provider,
                &db_pool,
                &inode_table,
                &request_clone,
                &progress_tx_clone,
                &cancel_token_clone,
                &shutdown,
            )
            .await;

            if let Some(entry) = inode_table.get(ino) {
                match &outcome {
                    Ok(()) => entry.update_status_inputs(|s| {
                        s.download_percent = None;
                        s.error_message = None;
                    }),
                    Err(e) => entry.update_status_inputs(|s| {
                        s.download_percent = None;
                        s.error_message = Some(e.to_string());
                    }),
                }
            }

            match outcome {
                Ok(()) => info!(ino, "Download completed"),
                Err(e) => error!(ino, error = %e, "Download failed"),
            }

            active_map.remove(&ino);
        });

        self.active.insert(
            ino,
            ActiveDownload {
                request,
                progress_tx,
                cancel_token,
                _task_handle: task_handle,
            },
        );

        Ok(progress_rx)
    }

    /// Blocks until the download for `ino` completes (or fails).
    pub async fn wait_for_completion(&self, ino: u64) -> Result<(), FuseError> {
        let mut rx = {
            let active = self
                .active
                .get(&ino)
                .ok_or_else(|| FuseError::NotFound(format!("No active download for inode {ino}")))?;
            active.progress_tx.subscribe()
        };

        loop {
            if *rx.borrow() >= 100 {
                return Ok(());
            }
            rx.changed()
                .await
                .map_err(|_| FuseError::HydrationFailed("Download channel closed".to_string()))?;
        }
    }

    /// Cancels an in-progress download, if any, and removes its partial file.
    pub async fn cancel(&self, ino: u64) -> Result<(), FuseError> {
        let Some((_, active)) = self.active.remove(&ino) else {
            return Ok(());
        };
        info!(ino, "Cancelling download");
        active.cancel_token.cancel();

        let remote_id = active.request.lock().await.remote_id().clone();
        let partial = self.cache.partial_path(&remote_id);
        if partial.exists() {
            if let Err(e) = std::fs::remove_file(&partial) {
                warn!(ino, error = %e, "Failed to remove partial download file");
            }
        }
        Ok(())
    }
}

/// Runs one download end to end: retry loop, checksum verification, and the
/// final inode update. Acquires a worker-pool permit for the duration of the
/// transfer (held across retries, since a retry is still the same job).
#[allow(clippy::too_many_arguments)]
async fn run_download(
    ino: u64,
    semaphore: &Arc<Semaphore>,
    cache: &Arc<ContentCache>,
    write_handle: &WriteSerializerHandle,
    provider: &Arc<GraphCloudProvider>,
    db_pool: &DatabasePool,
    inode_table: &Arc<InodeTable>,
    request: &Arc<AsyncMutex<DownloadRequest>>,
    progress_tx: &watch::Sender<u8>,
    cancel_token: &CancellationToken,
    shutdown: &CancellationToken,
) -> Result<(), FuseError> {
    let _permit = semaphore
        .acquire()
        .await
        .map_err(|_| FuseError::HydrationFailed("Worker pool closed".to_string()))?;

    let (remote_id, expected_size, expected_hash) = {
        let req = request.lock().await;
        (
            req.remote_id().clone(),
            req.expected_size(),
            req.expected_hash().cloned(),
        )
    };

    let partial_path = cache.partial_path(&remote_id);
    let final_path = cache.cache_path(&remote_id);
    if let Some(parent) = partial_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut checksum_retried = false;
    let mut attempt: u32 = 0;

    let result = loop {
        if cancel_token.is_cancelled() || shutdown.is_cancelled() {
            break Err(FuseError::HydrationFailed("Cancelled".to_string()));
        }

        let transfer_result = if expected_size < CHUNKED_DOWNLOAD_THRESHOLD {
            download_full(provider, &remote_id, &partial_path).await
        } else {
            download_chunked(
                provider,
                &remote_id,
                &partial_path,
                expected_size,
                request,
                progress_tx,
                cancel_token,
                inode_table,
                ino,
            )
            .await
        };

        match transfer_result {
            Ok(()) => {
                if let Some(ref expected) = expected_hash {
                    let actual = hash_file(&partial_path)?;
                    if &actual != expected {
                        let _ = std::fs::remove_file(&partial_path);
                        if checksum_retried {
                            break Err(FuseError::HydrationFailed(
                                "Checksum mismatch after retry".to_string(),
                            ));
                        }
                        warn!(ino, "Checksum mismatch, re-queuing once");
                        checksum_retried = true;
                        continue;
                    }
                }
                break Ok(());
            }
            Err(e) => {
                attempt += 1;
                match classify_error(&e) {
                    ErrorClass::Permanent => {
                        break Err(FuseError::HydrationFailed(format!(
                            "Download failed permanently: {e}"
                        )));
                    }
                    ErrorClass::Unauthorized if attempt == 1 => {
                        debug!(ino, "Unauthorized, retrying once after token refresh");
                        continue;
                    }
                    _ if attempt >= MAX_ATTEMPTS => {
                        break Err(FuseError::HydrationFailed(format!(
                            "Download failed after {attempt} attempts: {e}"
                        )));
                    }
                    _ => {
                        let delay = backoff_delay(attempt - 1);
                        warn!(ino, attempt, ?delay, error = %e, "Download attempt failed, retrying");
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancel_token.cancelled() => {
                                break Err(FuseError::HydrationFailed("Cancelled".to_string()));
                            }
                            _ = shutdown.cancelled() => {
                                break Err(FuseError::HydrationFailed("Shutting down".to_string()));
                            }
                        }
                        continue;
                    }
                }
            }
        }
    };

    match result {
        Ok(()) => {
            std::fs::rename(&partial_path, &final_path).map_err(|e| {
                FuseError::HydrationFailed(format!("Failed to finalize downloaded file: {e}"))
            })?;

            let hash = expected_hash.clone().or_else(|| hash_file(&final_path).ok());
            request.lock().await.complete();
            let _ = progress_tx.send(100);

            persist_success(write_handle, db_pool, ino, expected_size, hash).await?;
            Ok(())
        }
        Err(e) => {
            let _ = std::fs::remove_file(&partial_path);
            request.lock().await.record_attempt_failure(e.to_string());
            Err(e)
        }
    }
}

/// Updates the inode's size and content hash once a download lands, marking
/// it content-present. Read-modify-write through the shared repository: the
/// write serializer only exposes `save_inode`, so the current row is read
/// first to avoid clobbering fields the download didn't touch.
async fn persist_success(
    write_handle: &WriteSerializerHandle,
    db_pool: &DatabasePool,
    ino: u64,
    size: u64,
    hash: Option<FileHash>,
) -> Result<(), FuseError> {
    let repo = SqliteStateRepository::new(db_pool.pool().clone());
    let node_id = NodeId::new(ino);
    let Some(mut inode) = repo
        .get_inode(node_id)
        .await
        .map_err(|e| FuseError::DatabaseError(e.to_string()))?
    else {
        // The item was removed while downloading; nothing left to update.
        return Ok(());
    };

    inode.set_size(size);
    let etag = inode.etag().map(str::to_string);
    inode.mark_synced(etag, hash);

    write_handle.save_inode(inode).await
}

/// Downloads a whole file in one request (files below the chunking threshold).
async fn download_full(
    provider: &Arc<GraphCloudProvider>,
    remote_id: &RemoteId,
    partial_path: &Path,
) -> anyhow::Result<()> {
    let bytes = provider.download_file(remote_id).await?;
    tokio::fs::write(partial_path, &bytes).await?;
    Ok(())
}

/// Downloads a large file in fixed-size chunks via HTTP range requests,
/// reporting progress after each chunk and honoring cancellation between
/// chunks so an in-flight transfer can be interrupted promptly.
#[allow(clippy::too_many_arguments)]
async fn download_chunked(
    provider: &Arc<GraphCloudProvider>,
    remote_id: &RemoteId,
    partial_path: &PathBuf,
    total_size: u64,
    request: &Arc<AsyncMutex<DownloadRequest>>,
    progress_tx: &watch::Sender<u8>,
    cancel_token: &CancellationToken,
    inode_table: &Arc<InodeTable>,
    ino: u64,
) -> anyhow::Result<()> {
    {
        let file = std::fs::File::create(partial_path)?;
        file.set_len(total_size)?;
    }

    let mut offset = 0u64;
    while offset < total_size {
        if cancel_token.is_cancelled() {
            anyhow::bail!("Cancelled");
        }

        let remaining = total_size - offset;
        let chunk_len = remaining.min(DOWNLOAD_CHUNK_SIZE);
        let range_end = offset + chunk_len - 1;

        let chunk = provider.download_range(remote_id, offset, range_end).await?;

        write_chunk_at(partial_path, offset, &chunk)?;
        offset += chunk.len() as u64;

        let mut req = request.lock().await;
        req.advance(offset);
        let percent = req.progress_percent();
        drop(req);
        let _ = progress_tx.send(percent);
        if let Some(entry) = inode_table.get(ino) {
            entry.update_status_inputs(|s| s.download_percent = Some(percent));
        }
    }

    Ok(())
}

fn write_chunk_at(path: &Path, offset: u64, data: &[u8]) -> std::io::Result<()> {
    use std::io::{Seek, SeekFrom, Write};
    let mut file = std::fs::OpenOptions::new().write(true).open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)
}

fn hash_file(path: &Path) -> Result<FileHash, FuseError> {
    let data = std::fs::read(path)?;
    Ok(quick_xor_hash(&data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule_matches_spec() {
        // 1s, 2s, 4s, 8s, 16s, each within +-10% jitter.
        let expected = [1.0, 2.0, 4.0, 8.0, 16.0];
        for (attempt, base) in expected.iter().enumerate() {
            let delay = backoff_delay(attempt as u32).as_secs_f64();
            assert!(
                delay >= base * 0.9 && delay <= base * 1.1,
                "attempt {attempt}: {delay} not within 10% of {base}"
            );
        }
    }

    #[test]
    fn test_backoff_caps_at_sixty_seconds() {
        let delay = backoff_delay(10).as_secs_f64();
        assert!(delay <= 60.0 * 1.1);
    }

    #[test]
    fn test_jitter_unit_in_range() {
        for _ in 0..50 {
            let u = jitter_unit();
            assert!((0.0..1.0).contains(&u));
        }
    }

    #[test]
    fn test_classify_error_defaults_to_transient_without_status() {
        let err = anyhow::anyhow!("connection reset");
        assert_eq!(classify_error(&err), ErrorClass::Transient);
    }
}
