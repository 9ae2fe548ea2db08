//! The LEAP session: one TLS connection, two I/O tasks, and a client
//! handle that correlates requests with responses by client tag.
//!
//! Unsolicited notifications (zone status, button events) are delivered
//! through an `mpsc` receiver returned from [`LeapClient::connect`]; the
//! receiver closes when the transport drops, which is the signal the
//! reconnection supervisor waits on.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::LeapError;
use crate::protocol::{
    self, ButtonGroupDefinition, DeviceDefinition, LeapMessage, LeapNotification, ZoneStatusBody,
};
use crate::transport::{self, HubConfig};

const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;
const WRITE_CHANNEL_CAPACITY: usize = 32;

// ── LeapClient ───────────────────────────────────────────────────────

/// Handle to a live LEAP session. Cheaply cloneable; all clones share
/// the same connection. [`close`](Self::close) tears the session down.
#[derive(Clone)]
pub struct LeapClient {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    write_tx: mpsc::Sender<String>,
    pending: DashMap<u64, oneshot::Sender<LeapMessage>>,
    next_tag: AtomicU64,
    request_timeout: Duration,
    cancel: CancellationToken,
}

impl LeapClient {
    /// Establish the mutually authenticated TLS session and spawn the
    /// reader/writer tasks.
    ///
    /// Certificate-flavored TLS alerts during the handshake come back as
    /// [`LeapError::Auth`]; everything else is transport-level and worth
    /// a backoff retry.
    pub async fn connect(
        config: &HubConfig,
    ) -> Result<(Self, mpsc::Receiver<LeapNotification>), LeapError> {
        let connector = transport::tls_connector(config)?;

        let timeout_err = || LeapError::Timeout {
            timeout_secs: config.request_timeout.as_secs(),
        };

        let tcp = timeout(
            config.request_timeout,
            TcpStream::connect((config.host.as_str(), config.port)),
        )
        .await
        .map_err(|_| timeout_err())??;
        let _ = tcp.set_nodelay(true);

        let server_name = rustls_pki_types::ServerName::try_from(config.host.clone())
            .map_err(|e| LeapError::Tls(format!("invalid server name {:?}: {e}", config.host)))?;

        let stream = timeout(config.request_timeout, connector.connect(server_name, tcp))
            .await
            .map_err(|_| timeout_err())?
            .map_err(transport::classify_handshake_error)?;

        debug!(host = %config.host, port = config.port, "LEAP session established");
        Ok(Self::spawn(stream, config.request_timeout))
    }

    /// Wire up a session over an already-established byte stream.
    fn spawn(
        stream: impl AsyncRead + AsyncWrite + Unpin + Send + 'static,
        request_timeout: Duration,
    ) -> (Self, mpsc::Receiver<LeapNotification>) {
        let (read_half, write_half) = tokio::io::split(stream);
        let (write_tx, write_rx) = mpsc::channel(WRITE_CHANNEL_CAPACITY);
        let (notification_tx, notification_rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);

        let inner = Arc::new(SessionInner {
            write_tx,
            pending: DashMap::new(),
            next_tag: AtomicU64::new(1),
            request_timeout,
            cancel: CancellationToken::new(),
        });

        tokio::spawn(writer_task(write_half, write_rx, inner.cancel.clone()));
        tokio::spawn(reader_task(Arc::clone(&inner), read_half, notification_tx));

        (Self { inner }, notification_rx)
    }

    // ── Requests ─────────────────────────────────────────────────────

    async fn request(
        &self,
        communique: &str,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<LeapMessage, LeapError> {
        if self.inner.cancel.is_cancelled() {
            return Err(LeapError::ConnectionClosed);
        }

        let tag = self.inner.next_tag.fetch_add(1, Ordering::Relaxed);
        let (response_tx, response_rx) = oneshot::channel();
        self.inner.pending.insert(tag, response_tx);

        let line = protocol::encode_request(communique, url, tag, body);
        if self.inner.write_tx.send(line).await.is_err() {
            self.inner.pending.remove(&tag);
            return Err(LeapError::ConnectionClosed);
        }

        let response = match timeout(self.inner.request_timeout, response_rx).await {
            Ok(Ok(message)) => message,
            Ok(Err(_)) => return Err(LeapError::ConnectionClosed),
            Err(_) => {
                self.inner.pending.remove(&tag);
                return Err(LeapError::Timeout {
                    timeout_secs: self.inner.request_timeout.as_secs(),
                });
            }
        };

        if !response.status_is_success() {
            return Err(LeapError::Protocol {
                message: format!(
                    "{communique} {url} returned {}",
                    response.header.status_code.as_deref().unwrap_or("<none>")
                ),
            });
        }
        Ok(response)
    }

    /// Enumerate every device the bridge knows about.
    pub async fn devices(&self) -> Result<Vec<DeviceDefinition>, LeapError> {
        let response = self.request("ReadRequest", "/device", None).await?;
        response.decode_body("Devices")
    }

    /// Read one button group definition (Pico remotes expose their
    /// buttons through these).
    pub async fn button_group(&self, group: u32) -> Result<ButtonGroupDefinition, LeapError> {
        let response = self
            .request("ReadRequest", &format!("/buttongroup/{group}"), None)
            .await?;
        response.decode_body("ButtonGroup")
    }

    /// Subscribe to zone status updates.
    ///
    /// The response body is a full dump of every zone's current status,
    /// returned here as `(zone, level)` pairs; subsequent updates arrive
    /// on the notification stream. Idempotent.
    pub async fn subscribe_zone_status(&self) -> Result<Vec<(u32, u8)>, LeapError> {
        let response = self.request("SubscribeRequest", "/zone/status", None).await?;
        let statuses: Vec<ZoneStatusBody> = response.decode_body("ZoneStatuses")?;
        Ok(statuses
            .iter()
            .filter_map(|status| {
                Some((protocol::href_id(&status.zone.href)?, status.effective_level()?))
            })
            .collect())
    }

    /// Subscribe to press/release events for one button. Idempotent.
    pub async fn subscribe_button_events(&self, button: u32) -> Result<(), LeapError> {
        self.request(
            "SubscribeRequest",
            &format!("/button/{button}/status/event"),
            None,
        )
        .await
        .map(|_| ())
    }

    /// Drive a zone to a level (0-100). The returned future resolves when
    /// the bridge acknowledges the command, not when the device finishes
    /// moving -- the resulting state change arrives as a zone status.
    pub async fn go_to_level(&self, zone: u32, level: u8) -> Result<(), LeapError> {
        let body = json!({
            "Command": {
                "CommandType": "GoToLevel",
                "Parameter": [{"Type": "Level", "Value": level.min(100)}],
            }
        });
        self.request(
            "CreateRequest",
            &format!("/zone/{zone}/commandprocessor"),
            Some(body),
        )
        .await
        .map(|_| ())
    }

    /// Keepalive probe.
    pub async fn ping(&self) -> Result<(), LeapError> {
        self.request("ReadRequest", "/server/1/status/ping", None)
            .await
            .map(|_| ())
    }

    /// Tear the session down. The notification receiver closes shortly
    /// after; in-flight requests fail with `ConnectionClosed`.
    pub fn close(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

// ── I/O tasks ────────────────────────────────────────────────────────

async fn writer_task(
    mut write_half: impl AsyncWrite + Unpin,
    mut write_rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            line = write_rx.recv() => {
                let Some(mut line) = line else { break };
                line.push('\n');
                if let Err(e) = write_half.write_all(line.as_bytes()).await {
                    debug!(error = %e, "LEAP write failed");
                    cancel.cancel();
                    break;
                }
                if let Err(e) = write_half.flush().await {
                    debug!(error = %e, "LEAP flush failed");
                    cancel.cancel();
                    break;
                }
            }
        }
    }
    let _ = write_half.shutdown().await;
}

async fn reader_task(
    inner: Arc<SessionInner>,
    read_half: impl AsyncRead + Unpin,
    notification_tx: mpsc::Sender<LeapNotification>,
) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => handle_line(&inner, &notification_tx, &line).await,
                Ok(None) => {
                    debug!("LEAP stream ended");
                    break;
                }
                Err(e) => {
                    debug!(error = %e, "LEAP read failed");
                    break;
                }
            }
        }
    }

    // Wake every in-flight request with ConnectionClosed, stop the writer,
    // and drop the notification sender so the consumer sees the end.
    inner.cancel.cancel();
    inner.pending.clear();
}

async fn handle_line(
    inner: &SessionInner,
    notification_tx: &mpsc::Sender<LeapNotification>,
    line: &str,
) {
    let message: LeapMessage = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(e) => {
            debug!(error = %e, "undecodable LEAP message");
            return;
        }
    };

    // Tagged messages are responses to our own requests.
    if let Some(tag) = message
        .header
        .client_tag
        .as_deref()
        .and_then(|tag| tag.parse::<u64>().ok())
    {
        if let Some((_, response_tx)) = inner.pending.remove(&tag) {
            let _ = response_tx.send(message);
            return;
        }
        trace!(tag, "response for abandoned request");
        return;
    }

    match protocol::notification_from_message(&message) {
        Some(notification) => {
            // A send error just means the consumer went away first;
            // session teardown follows through the cancel token.
            let _ = notification_tx.send(notification).await;
        }
        None => trace!(
            body_type = message.header.message_body_type.as_deref().unwrap_or("<none>"),
            "ignoring notification"
        ),
    }
}

// ── Tests ────────────────────────────────────────────────────────────
