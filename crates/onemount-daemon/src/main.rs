//! OneMount Daemon - Background synchronization service
//!
//! The composition root: wires the cache, cloud provider, sync engine,
//! FUSE filesystem, D-Bus service and status tracker together, then runs
//! until a termination signal arrives.
//!
//! 1. File synchronization with OneDrive (`onemount-sync`)
//! 2. D-Bus interface for UI clients (`onemount-ipc`)
//! 3. FUSE filesystem for Files-on-Demand (`onemount-fuse`)
//! 4. State persistence and recovery (`onemount-cache`)

mod content_store;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use onemount_cache::{DatabasePool, SqliteStateRepository};
use onemount_core::config::Config;
use onemount_core::ports::cloud_provider::ICloudProvider;
use onemount_core::ports::local_filesystem::ILocalFileSystem;
use onemount_core::ports::state_repository::IStateRepository;
use onemount_core::ports::UploadNotifier;
use onemount_fuse::{cache::ContentCache, filesystem::OneMountFs};
use onemount_graph::auth::{GraphAuthAdapter, KeyringTokenStorage};
use onemount_graph::subscription::{SubscriptionClient, SubscriptionConfig, SubscriptionEvent};
use onemount_graph::{client::GraphClient, provider::GraphCloudProvider};
use onemount_ipc::{service_name, DaemonState, DbusService};
use onemount_status::StatusTracker;
use onemount_sync::engine::SyncEngine;
use onemount_sync::scheduler::SyncScheduler;
use onemount_sync::upload::UploadManager;

use content_store::ContentCacheFileSystem;

/// WebSocket endpoint for the change-notification transport used by the
/// Subscription Client (`onemount-graph::subscription`). Framing and
/// heartbeat are negotiated at handshake time; only the URL is fixed here.
const NOTIFICATION_URL: &str = "wss://graph.microsoft.com/v1.0/subscriptions/socket";

/// How long the sync scheduler gets to finish an in-flight cycle during
/// graceful shutdown before the daemon stops waiting on it.
const SYNC_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Unmount retry budget once the FUSE session has been joined.
const UNMOUNT_MAX_RETRIES: u32 = 3;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config_path = Config::default_path();
    let config = Config::load_or_default(&config_path);
    info!(config_path = %config_path.display(), "loaded configuration");

    if let Err(e) = run(config).await {
        error!(error = %e, "daemon exited with an error");
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

async fn run(config: Config) -> Result<()> {
    let db_path = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("onemount")
        .join("onemount.db");
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let pool = DatabasePool::new(&db_path)
        .await
        .context("failed to open database")?;
    let state_repo: Arc<dyn IStateRepository + Send + Sync> =
        Arc::new(SqliteStateRepository::new(pool.pool().clone()));

    let account = state_repo
        .get_default_account()
        .await
        .context("failed to query default account")?
        .context("no account configured; run 'onemount auth login' first")?;
    info!(email = %account.email(), "found authenticated account");

    let app_id = config
        .auth
        .app_id
        .clone()
        .context("no app_id configured; run 'onemount auth login' first")?;

    let tokens = load_and_refresh_tokens(&app_id, account.email().as_str()).await?;

    let provider = Arc::new(GraphCloudProvider::new(GraphClient::new(
        tokens.access_token.clone(),
    )));

    let cache_dir = expand_tilde(&config.fuse.cache_dir);
    tokio::fs::create_dir_all(&cache_dir).await?;
    let cache = Arc::new(
        ContentCache::new(cache_dir.clone()).context("failed to initialize content cache")?,
    );

    let content_fs: Arc<dyn ILocalFileSystem + Send + Sync> =
        Arc::new(ContentCacheFileSystem::new(cache.clone()));

    let sync_engine = Arc::new(SyncEngine::new(
        provider.clone() as Arc<dyn ICloudProvider + Send + Sync>,
        state_repo.clone(),
        content_fs.clone(),
        &config,
    ));

    let (upload_manager, upload_queue_handle) = UploadManager::new(sync_engine.clone());
    let upload_task = tokio::spawn(upload_manager.run());
    let upload_notifier: Arc<dyn UploadNotifier + Send + Sync> = Arc::new(upload_queue_handle);

    let (scheduler, sync_requested) = SyncScheduler::new(
        sync_engine,
        Duration::from_secs(config.sync.poll_interval.max(1)),
    );
    let scheduler = Arc::new(scheduler);

    let status_tracker = Arc::new(StatusTracker::new(state_repo.clone(), content_fs.clone()));

    let mount_point = expand_tilde(&config.fuse.mount_point);
    tokio::fs::create_dir_all(&mount_point).await?;

    let rt_handle = tokio::runtime::Handle::current();
    let fs = OneMountFs::new(
        rt_handle.clone(),
        pool.clone(),
        config.fuse.clone(),
        cache.clone(),
        provider.clone(),
        Some(upload_notifier),
    );
    // Capture these before `fs` moves into the FUSE session so shutdown can
    // still reach them.
    let hydration = fs.hydration().clone();
    let dehydration = fs.dehydration().clone();

    let mount_options = vec![
        fuser::MountOption::FSName("onemount".to_string()),
        fuser::MountOption::AutoUnmount,
        fuser::MountOption::AllowOther,
    ];
    let session = fuser::spawn_mount2(fs, &mount_point, &mount_options)
        .context("failed to mount FUSE filesystem")?;
    info!(mount_point = %mount_point.display(), "mounted FUSE filesystem");

    let bus_name = service_name("onemount", std::process::id(), chrono::Utc::now().timestamp());
    let dbus_state = Arc::new(Mutex::new(DaemonState::default()));
    let dbus = DbusService::new(
        dbus_state,
        state_repo.clone(),
        status_tracker.clone(),
        bus_name,
    );
    let connection = dbus.start().await.context("failed to start D-Bus service")?;

    let scheduler_task = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };

    let subscription_cancel = CancellationToken::new();
    let subscription_client = SubscriptionClient::new(SubscriptionConfig {
        url: NOTIFICATION_URL.to_string(),
        access_token: tokens.access_token.clone(),
    });
    let mut subscription_events = subscription_client.subscribe();
    let subscription_task = subscription_client.spawn(subscription_cancel.clone());

    let notification_listener = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            while let Ok(event) = subscription_events.recv().await {
                if matches!(event, SubscriptionEvent::ChangeNotification) {
                    scheduler.request_sync();
                }
            }
        })
    };
    // Kept alive for callers that might want to check/trigger a sync without
    // holding the scheduler handle itself.
    let _ = sync_requested;

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping subsystems");

    // Ordered shutdown: delta loop, download manager, upload/cache cleanup,
    // subscription client, bus server, then unmount.
    scheduler.stop();
    if tokio::time::timeout(SYNC_GRACE_PERIOD, scheduler_task).await.is_err() {
        warn!("sync scheduler did not stop within the graceful timeout");
    }

    hydration.shutdown();
    dehydration.shutdown().await;

    subscription_cancel.cancel();
    notification_listener.abort();
    let _ = subscription_task.await;

    drop(connection);

    unmount_with_retry(&mount_point, session).await?;

    // Unmounting dropped `fs` and its upload notifier handle, so the upload
    // manager's queues are now closed and it should wind down promptly.
    if tokio::time::timeout(SYNC_GRACE_PERIOD, upload_task).await.is_err() {
        warn!("upload manager did not stop within the graceful timeout");
    }

    info!("clean shutdown complete");
    Ok(())
}

/// Loads stored tokens for `email`, refreshing them first if they are
/// expired (or will be within a minute), and persists any refreshed token
/// back to the keyring.
async fn load_and_refresh_tokens(
    app_id: &str,
    email: &str,
) -> Result<onemount_core::ports::cloud_provider::Tokens> {
    let tokens = KeyringTokenStorage::load(email)
        .context("failed to read tokens from keyring")?
        .context("no stored tokens for account; run 'onemount auth login' first")?;

    if !tokens.expires_within(chrono::Duration::minutes(1)) {
        return Ok(tokens);
    }

    let refresh_token = tokens.refresh_token.clone().context(
        "access token expired and no refresh token is available; run 'onemount auth login' again",
    )?;

    info!("access token expired, refreshing");
    let adapter = GraphAuthAdapter::with_app_id(app_id);
    let refreshed = adapter
        .refresh(&refresh_token)
        .await
        .context("failed to refresh access token")?;
    KeyringTokenStorage::store(email, &refreshed).context("failed to store refreshed tokens")?;
    Ok(refreshed)
}

/// Resolves `SIGINT`, `SIGTERM` and `SIGHUP` as equivalent shutdown triggers.
async fn wait_for_shutdown_signal() {
    let mut sigterm =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
    let mut sighup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to install SIGHUP handler");
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sighup.recv() => info!("received SIGHUP"),
    }
}

/// Joins the FUSE session, then retries an explicit `fusermount -u` with
/// exponential backoff if the mount point is still active afterwards.
async fn unmount_with_retry(mount_point: &Path, session: fuser::BackgroundSession) -> Result<()> {
    tokio::task::spawn_blocking(move || session.join()).await?;

    let mut delay = Duration::from_millis(500);
    for attempt in 1..=UNMOUNT_MAX_RETRIES {
        if !is_still_mounted(mount_point) {
            return Ok(());
        }
        warn!(attempt, "mount point still active after join, retrying unmount");
        let _ = std::process::Command::new("fusermount3")
            .arg("-u")
            .arg(mount_point)
            .output()
            .or_else(|_| {
                std::process::Command::new("fusermount")
                    .arg("-u")
                    .arg(mount_point)
                    .output()
            });
        tokio::time::sleep(delay).await;
        delay *= 2;
    }

    if is_still_mounted(mount_point) {
        anyhow::bail!(
            "failed to unmount {} after {} retries",
            mount_point.display(),
            UNMOUNT_MAX_RETRIES
        );
    }
    Ok(())
}

fn is_still_mounted(mount_point: &Path) -> bool {
    let Ok(mounts) = std::fs::read_to_string("/proc/mounts") else {
        return false;
    };
    let target = mount_point.to_string_lossy();
    mounts
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(target.as_ref()))
}

/// Expands a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
