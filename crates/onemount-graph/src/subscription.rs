//! Change-notification subscription transport
//!
//! Maintains a persistent Engine.IO-style framed WebSocket connection to the
//! change-notification endpoint, authenticated via a bearer token. After the
//! open handshake the client parses the server-advertised ping interval and
//! timeout, emits pings on that schedule, and awaits pongs. Missed pongs
//! degrade the connection's health; repeated misses mark it failed and the
//! caller should fall back to plain delta polling.
//!
//! Reconnection uses exponential backoff (1s doubling to a 60s cap, ±10%
//! jitter); the backoff and heartbeat-failure counters both reset on a
//! healthy session.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Consecutive missed pongs before health degrades to [`SubscriptionHealth::Degraded`]
const DEGRADED_THRESHOLD: u32 = 2;

/// Consecutive missed pongs before health drops to [`SubscriptionHealth::Failed`]
const FAILED_THRESHOLD: u32 = 4;

/// Initial reconnect backoff delay
const BACKOFF_INITIAL: Duration = Duration::from_secs(1);

/// Reconnect backoff cap
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Health snapshot of the subscription transport, readable in constant time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionHealth {
    /// Connected and receiving heartbeats on schedule.
    Healthy,
    /// One or more pongs missed; still connected.
    Degraded,
    /// Heartbeat abandoned; the caller should fall back to polling.
    Failed,
}

impl SubscriptionHealth {
    fn from_code(code: u8) -> Self {
        match code {
            0 => SubscriptionHealth::Healthy,
            1 => SubscriptionHealth::Degraded,
            _ => SubscriptionHealth::Failed,
        }
    }

    fn code(self) -> u8 {
        match self {
            SubscriptionHealth::Healthy => 0,
            SubscriptionHealth::Degraded => 1,
            SubscriptionHealth::Failed => 2,
        }
    }
}

/// Events broadcast by the subscription client's background task.
#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    /// A change notification arrived; callers should trigger an immediate delta run.
    ChangeNotification,
    /// The connection's health transitioned.
    HealthChanged(SubscriptionHealth),
}

/// Server's open handshake payload (Engine.IO packet type `0`).
#[derive(Debug, Deserialize)]
struct OpenHandshake {
    #[serde(rename = "pingInterval")]
    ping_interval_ms: u64,
    #[serde(rename = "pingTimeout")]
    ping_timeout_ms: u64,
}

/// Configuration for a subscription client connection.
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// WebSocket URL of the change-notification endpoint.
    pub url: String,
    /// Bearer token sent in the `Authorization` header of the handshake.
    pub access_token: String,
}

/// Persistent change-notification transport with heartbeat and reconnection.
///
/// Cloning shares the same health snapshot and event stream; only one
/// background connection task should be spawned per logical subscription.
pub struct SubscriptionClient {
    config: SubscriptionConfig,
    health: Arc<AtomicU8>,
    events: broadcast::Sender<SubscriptionEvent>,
}

impl SubscriptionClient {
    /// Creates a new client. Call [`Self::spawn`] to start the background task.
    pub fn new(config: SubscriptionConfig) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            config,
            health: Arc::new(AtomicU8::new(SubscriptionHealth::Failed.code())),
            events,
        }
    }

    /// Returns the current health snapshot in constant time.
    pub fn health(&self) -> SubscriptionHealth {
        SubscriptionHealth::from_code(self.health.load(Ordering::Relaxed))
    }

    /// Subscribes to connection events (notifications and health transitions).
    pub fn subscribe(&self) -> broadcast::Receiver<SubscriptionEvent> {
        self.events.subscribe()
    }

    /// Spawns the background task that maintains the connection, reconnecting
    /// with exponential backoff on any close or error.
    pub fn spawn(&self, cancel: tokio_util::sync::CancellationToken) -> tokio::task::JoinHandle<()> {
        let config = self.config.clone();
        let health = self.health.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let mut backoff = BACKOFF_INITIAL;

            loop {
                if cancel.is_cancelled() {
                    break;
                }

                match run_session(&config, &health, &events, &cancel).await {
                    Ok(()) => {
                        info!("Subscription session ended cleanly");
                        backoff = BACKOFF_INITIAL;
                    }
                    Err(e) => {
                        warn!(error = %e, "Subscription session failed");
                    }
                }

                set_health(&health, &events, SubscriptionHealth::Failed);

                if cancel.is_cancelled() {
                    break;
                }

                let jittered = jitter(backoff);
                debug!(delay_ms = jittered.as_millis(), "Reconnecting after backoff");

                tokio::select! {
                    _ = tokio::time::sleep(jittered) => {}
                    _ = cancel.cancelled() => break,
                }

                backoff = std::cmp::min(backoff * 2, BACKOFF_CAP);
            }

            debug!("Subscription client task exiting");
        })
    }
}

/// Applies ±10% jitter to a backoff duration using a cheap time-based seed
/// (no `rand` dependency is carried by this crate).
fn jitter(base: Duration) -> Duration {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let sign = if nanos % 2 == 0 { 1.0 } else { -1.0 };
    let magnitude = (nanos % 1000) as f64 / 1000.0 * 0.10;
    let factor = 1.0 + sign * magnitude;
    base.mul_f64(factor.max(0.0))
}

fn set_health(health: &Arc<AtomicU8>, events: &broadcast::Sender<SubscriptionEvent>, new: SubscriptionHealth) {
    let old = SubscriptionHealth::from_code(health.swap(new.code(), Ordering::Relaxed));
    if old != new {
        let _ = events.send(SubscriptionEvent::HealthChanged(new));
    }
}

/// Runs a single WebSocket session until it closes or errors.
async fn run_session(
    config: &SubscriptionConfig,
    health: &Arc<AtomicU8>,
    events: &broadcast::Sender<SubscriptionEvent>,
    cancel: &tokio_util::sync::CancellationToken,
) -> anyhow::Result<()> {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    let mut request = config.url.as_str().into_client_request()?;
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {}", config.access_token).parse()?,
    );

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request).await?;
    let (mut write, mut read) = ws_stream.split();

    info!("Subscription WebSocket connected");

    // Expect the Engine.IO open handshake as the first frame: '0' + JSON payload.
    let open_frame = read
        .next()
        .await
        .ok_or_else(|| anyhow::anyhow!("connection closed before handshake"))??;

    let handshake = parse_open_handshake(&open_frame)
        .ok_or_else(|| anyhow::anyhow!("malformed open handshake"))?;

    let ping_interval = Duration::from_millis(handshake.ping_interval_ms);
    let ping_timeout = Duration::from_millis(handshake.ping_timeout_ms);

    set_health(health, events, SubscriptionHealth::Healthy);

    let mut missed_pongs: u32 = 0;
    let mut awaiting_pong = false;
    let mut ping_tick = tokio::time::interval(ping_interval);
    ping_tick.tick().await; // first tick fires immediately; consume it

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }

            _ = ping_tick.tick() => {
                if awaiting_pong {
                    missed_pongs += 1;
                    warn!(missed_pongs, "Missed pong before next ping");

                    let new_health = if missed_pongs >= FAILED_THRESHOLD {
                        SubscriptionHealth::Failed
                    } else if missed_pongs >= DEGRADED_THRESHOLD {
                        SubscriptionHealth::Degraded
                    } else {
                        SubscriptionHealth::Healthy
                    };
                    set_health(health, events, new_health);

                    if new_health == SubscriptionHealth::Failed {
                        anyhow::bail!("heartbeat failed after {} missed pongs", missed_pongs);
                    }
                }

                write.send(Message::Text("2".to_string())).await?;
                awaiting_pong = true;

                let _ = ping_timeout;
            }

            frame = read.next() => {
                let Some(frame) = frame else {
                    anyhow::bail!("connection closed by server");
                };
                let frame = frame?;

                match frame {
                    Message::Text(text) if text == "3" => {
                        // Pong: heartbeat recovered.
                        awaiting_pong = false;
                        if missed_pongs > 0 {
                            missed_pongs = 0;
                            set_health(health, events, SubscriptionHealth::Healthy);
                        }
                    }
                    Message::Text(text) if text.starts_with('4') => {
                        debug!("Change notification received");
                        let _ = events.send(SubscriptionEvent::ChangeNotification);
                    }
                    Message::Close(_) => {
                        anyhow::bail!("server closed the connection");
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Parses the Engine.IO open handshake (`0{...json...}`) from the first frame.
fn parse_open_handshake(message: &Message) -> Option<OpenHandshake> {
    let text = match message {
        Message::Text(t) => t.as_str(),
        _ => return None,
    };

    let payload = text.strip_prefix('0')?;
    serde_json::from_str(payload).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_code_roundtrip() {
        for h in [
            SubscriptionHealth::Healthy,
            SubscriptionHealth::Degraded,
            SubscriptionHealth::Failed,
        ] {
            assert_eq!(SubscriptionHealth::from_code(h.code()), h);
        }
    }

    #[test]
    fn test_parse_open_handshake_valid() {
        let msg = Message::Text(
            r#"0{"sid":"abc123","pingInterval":25000,"pingTimeout":20000}"#.to_string(),
        );
        let handshake = parse_open_handshake(&msg).unwrap();
        assert_eq!(handshake.ping_interval_ms, 25000);
        assert_eq!(handshake.ping_timeout_ms, 20000);
    }

    #[test]
    fn test_parse_open_handshake_wrong_prefix() {
        let msg = Message::Text(r#"{"pingInterval":25000,"pingTimeout":20000}"#.to_string());
        assert!(parse_open_handshake(&msg).is_none());
    }

    #[test]
    fn test_parse_open_handshake_binary_rejected() {
        let msg = Message::Binary(vec![0, 1, 2]);
        assert!(parse_open_handshake(&msg).is_none());
    }

    #[test]
    fn test_jitter_within_bounds() {
        let base = Duration::from_secs(10);
        for _ in 0..20 {
            let j = jitter(base);
            assert!(j >= Duration::from_secs(9));
            assert!(j <= Duration::from_secs(11));
        }
    }

    #[test]
    fn test_new_client_starts_failed() {
        let client = SubscriptionClient::new(SubscriptionConfig {
            url: "wss://example.invalid/socket".to_string(),
            access_token: "token".to_string(),
        });
        assert_eq!(client.health(), SubscriptionHealth::Failed);
    }

    #[tokio::test]
    async fn test_set_health_broadcasts_on_change() {
        let client = SubscriptionClient::new(SubscriptionConfig {
            url: "wss://example.invalid/socket".to_string(),
            access_token: "token".to_string(),
        });
        let mut rx = client.subscribe();

        set_health(&client.health, &client.events, SubscriptionHealth::Healthy);
        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event,
            SubscriptionEvent::HealthChanged(SubscriptionHealth::Healthy)
        ));
        assert_eq!(client.health(), SubscriptionHealth::Healthy);
    }

    #[tokio::test]
    async fn test_set_health_no_broadcast_when_unchanged() {
        let client = SubscriptionClient::new(SubscriptionConfig {
            url: "wss://example.invalid/socket".to_string(),
            access_token: "token".to_string(),
        });
        let mut rx = client.subscribe();

        set_health(&client.health, &client.events, SubscriptionHealth::Failed);
        assert!(rx.try_recv().is_err());
    }
}
