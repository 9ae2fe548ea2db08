// ── Reconnection supervision ──
//
// Each session (hub, broker) is supervised independently: a state
// machine published through a `watch` channel, a consecutive-failure
// counter that drives capped exponential backoff, and a connect cycle
// that re-establishes everything a fresh session needs. The hub side
// lives here; the broker side shares the state type and backoff and is
// driven from its own event loop in `broker.rs`.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use lutra_leap::{LeapClient, LeapNotification};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::model::HubSignal;
use crate::registry::DeviceRegistry;

/// Observable per-session connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Ready,
    Degraded,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
        };
        f.write_str(name)
    }
}

// ── Backoff ──────────────────────────────────────────────────────────

/// Exponential backoff bounds for reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,
    /// Upper bound on the backoff delay. Default: 60s.
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`
///
/// Jitter is +-25%, seeded deterministically from the attempt number --
/// enough to spread reconnection storms without reaching for a RNG.
pub(crate) fn backoff_delay(attempt: u32, policy: &ReconnectPolicy) -> Duration {
    let base = policy.initial_delay.as_secs_f64() * 2.0_f64.powi(attempt.min(24) as i32);
    let capped = base.min(policy.max_delay.as_secs_f64());

    let jitter_factor = 1.0 + 0.25 * ((f64::from(attempt) * 7.3).sin());
    Duration::from_secs_f64((capped * jitter_factor).max(0.0))
}

// ── Hub supervision ──────────────────────────────────────────────────

/// Everything the hub supervisor loop needs.
pub(crate) struct HubContext {
    pub config: Arc<BridgeConfig>,
    pub registry: Arc<DeviceRegistry>,
    /// Current session handle for the command dispatcher; `None` while
    /// disconnected.
    pub hub_handle: Arc<ArcSwapOption<LeapClient>>,
    pub signal_tx: mpsc::Sender<HubSignal>,
    pub state: Arc<watch::Sender<SessionState>>,
    /// Fatal errors (auth) are reported here; the bridge exits.
    pub fatal_tx: mpsc::Sender<BridgeError>,
    pub cancel: CancellationToken,
}

/// Supervise the hub session: connect, load the registry, subscribe,
/// pump, and on loss reconnect with backoff. Only an auth failure ends
/// the loop with an error.
pub(crate) async fn hub_supervisor(ctx: HubContext) {
    let mut failures: u32 = 0;

    loop {
        if ctx.cancel.is_cancelled() {
            break;
        }
        let _ = ctx.state.send(SessionState::Connecting);

        match hub_session_cycle(&ctx, &mut failures).await {
            Ok(()) => break, // shutdown requested
            Err(e) if e.is_fatal() => {
                ctx.hub_handle.store(None);
                let _ = ctx.state.send(SessionState::Disconnected);
                error!(error = %e, "hub authentication failed; shutting down");
                let _ = ctx.fatal_tx.send(e).await;
                return;
            }
            Err(e) => {
                ctx.hub_handle.store(None);
                let _ = ctx.state.send(SessionState::Disconnected);

                let delay = backoff_delay(failures, &ctx.config.reconnect);
                failures = failures.saturating_add(1);
                warn!(
                    error = %e,
                    failures,
                    delay_ms = delay.as_millis() as u64,
                    "hub session lost; waiting before reconnect"
                );
                tokio::select! {
                    biased;
                    () = ctx.cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    ctx.hub_handle.store(None);
    let _ = ctx.state.send(SessionState::Disconnected);
    debug!("hub supervisor stopped");
}

/// One connected session, from TLS handshake to transport loss.
async fn hub_session_cycle(ctx: &HubContext, failures: &mut u32) -> Result<(), BridgeError> {
    let (client, mut notifications) = LeapClient::connect(&ctx.config.hub).await?;

    // Full enumeration before anything is published: the registry swaps
    // atomically and a failure leaves the old snapshot in place.
    let device_count = ctx.registry.load(&client).await?;
    let snapshot = ctx.registry.snapshot();
    info!(devices = device_count, "device registry loaded");

    for button in snapshot.button_ids() {
        client.subscribe_button_events(button).await?;
    }

    // The subscribe response doubles as the first full state sync.
    let initial = client.subscribe_zone_status().await?;

    ctx.hub_handle.store(Some(Arc::new(client.clone())));
    let _ = ctx.state.send(SessionState::Ready);
    *failures = 0;
    info!(zones = initial.len(), "hub session ready");

    for (zone, level) in initial {
        let signal = HubSignal::Zone {
            zone,
            level,
            observed_at: Utc::now(),
        };
        if ctx.signal_tx.send(signal).await.is_err() {
            client.close();
            return Ok(());
        }
    }
    // Republish everything we knew from before the reconnect so broker
    // subscribers converge even if they missed intermediate changes.
    if ctx.signal_tx.send(HubSignal::Resync).await.is_err() {
        client.close();
        return Ok(());
    }

    let mut ping_timer = tokio::time::interval_at(
        tokio::time::Instant::now() + ctx.config.ping_interval,
        ctx.config.ping_interval,
    );
    ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut missed_pings: u32 = 0;

    loop {
        tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => {
                client.close();
                return Ok(());
            }
            notification = notifications.recv() => match notification {
                Some(notification) => {
                    let signal = match notification {
                        LeapNotification::ZoneStatus { zone, level } => HubSignal::Zone {
                            zone,
                            level,
                            observed_at: Utc::now(),
                        },
                        LeapNotification::Button { button, action } => {
                            HubSignal::Button { button, action }
                        }
                    };
                    if ctx.signal_tx.send(signal).await.is_err() {
                        client.close();
                        return Ok(());
                    }
                }
                None => {
                    return Err(BridgeError::Transport {
                        message: "hub notification stream ended".into(),
                    });
                }
            },
            _ = ping_timer.tick() => {
                match client.ping().await {
                    Ok(()) => missed_pings = 0,
                    Err(e) => {
                        missed_pings += 1;
                        warn!(error = %e, missed_pings, "hub keepalive missed");
                        if missed_pings >= 2 {
                            let _ = ctx.state.send(SessionState::Degraded);
                            client.close();
                            return Err(BridgeError::Transport {
                                message: "two consecutive keepalives missed".into(),
                            });
                        }
                    }
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
