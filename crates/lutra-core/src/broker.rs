// ── Broker session ──
//
// Thin adapter around rumqttc. Owns the MQTT event loop, republishes the
// command subscription and availability on every ConnAck, forwards
// router/button publications best-effort, and parses inbound command
// publishes. Connection errors never propagate: they become supervisor
// state transitions plus a backoff sleep, and the hub side keeps running
// throughout.

use std::sync::Arc;

use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS, Transport};
use secrecy::ExposeSecret;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::model::DeviceCommand;
use crate::supervisor::{SessionState, backoff_delay};
use crate::topics::{self, PAYLOAD_OFFLINE, PAYLOAD_ONLINE};

const REQUEST_CHANNEL_CAPACITY: usize = 64;

// ── Publications ─────────────────────────────────────────────────────

/// One outbound MQTT message. Fire-and-forget: a failed or dropped
/// publish is superseded by the next state change or resync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub payload: String,
    pub retained: bool,
}

impl Publication {
    /// Retained state message: new subscribers always see the last value.
    pub fn retained(topic: String, payload: String) -> Self {
        Self {
            topic,
            payload,
            retained: true,
        }
    }

    /// Momentary event message (button events, availability changes).
    pub fn transient(topic: String, payload: String) -> Self {
        Self {
            topic,
            payload,
            retained: false,
        }
    }
}

// ── Options construction ─────────────────────────────────────────────

/// Build the MQTT options from config. File errors here are startup
/// failures, not reconnectable transport errors.
pub(crate) fn build_mqtt_options(config: &BridgeConfig) -> Result<MqttOptions, BridgeError> {
    let broker = &config.broker;
    let mut options = MqttOptions::new(
        broker.client_id.clone(),
        broker.host.clone(),
        broker.port,
    );
    options.set_keep_alive(broker.keep_alive);

    if let Some(username) = &broker.username {
        let password = broker
            .password
            .as_ref()
            .map(|password| password.expose_secret().to_owned())
            .unwrap_or_default();
        options.set_credentials(username.clone(), password);
    }

    options.set_last_will(LastWill::new(
        topics::availability_topic(&config.topic_prefix),
        PAYLOAD_OFFLINE.as_bytes().to_vec(),
        QoS::AtLeastOnce,
        true,
    ));

    if let Some(tls) = &broker.tls {
        let client_auth_paths = match (&tls.client_cert_file, &tls.client_key_file) {
            (Some(cert), Some(key)) => Some((cert, key)),
            (None, None) => None,
            _ => {
                return Err(BridgeError::Config {
                    message: "broker TLS client cert and key must be provided together".into(),
                });
            }
        };
        let read = |path: &std::path::Path| {
            std::fs::read(path).map_err(|e| BridgeError::Config {
                message: format!("failed to read {}: {e}", path.display()),
            })
        };
        let ca = read(&tls.ca_file)?;
        let client_auth = match client_auth_paths {
            Some((cert, key)) => Some((read(cert)?, read(key)?)),
            None => None,
        };
        options.set_transport(Transport::tls(ca, client_auth, None));
    }

    Ok(options)
}

// ── Session task ─────────────────────────────────────────────────────

pub(crate) struct BrokerContext {
    pub config: Arc<BridgeConfig>,
    pub command_tx: mpsc::Sender<DeviceCommand>,
    pub publish_rx: mpsc::Receiver<Publication>,
    pub state: Arc<watch::Sender<SessionState>>,
    pub cancel: CancellationToken,
}

pub(crate) async fn broker_session(ctx: BrokerContext, options: MqttOptions) {
    let BrokerContext {
        config,
        command_tx,
        mut publish_rx,
        state,
        cancel,
    } = ctx;

    let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

    let prefix = config.topic_prefix.clone();
    let command_filter = topics::command_filter(&prefix);
    let availability = topics::availability_topic(&prefix);

    // Publication forwarder: drains the router/button channel into the
    // client. Best-effort by design.
    let forwarder = {
        let client = client.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    publication = publish_rx.recv() => {
                        let Some(publication) = publication else { break };
                        let result = client
                            .publish(
                                publication.topic.clone(),
                                QoS::AtLeastOnce,
                                publication.retained,
                                publication.payload.into_bytes(),
                            )
                            .await;
                        if let Err(e) = result {
                            warn!(error = %e, topic = %publication.topic, "publish dropped");
                        }
                    }
                }
            }
        })
    };

    let _ = state.send(SessionState::Connecting);
    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                // Courtesy offline marker; the Last Will covers the case
                // where these never make it out.
                let _ = client
                    .publish(
                        availability.clone(),
                        QoS::AtLeastOnce,
                        true,
                        PAYLOAD_OFFLINE.as_bytes().to_vec(),
                    )
                    .await;
                let _ = client.disconnect().await;
                break;
            }
            event = event_loop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    failures = 0;
                    let _ = state.send(SessionState::Ready);
                    info!("broker session ready");
                    if let Err(e) = client
                        .subscribe(command_filter.clone(), QoS::AtLeastOnce)
                        .await
                    {
                        warn!(error = %e, "command subscription failed");
                    }
                    if let Err(e) = client
                        .publish(
                            availability.clone(),
                            QoS::AtLeastOnce,
                            true,
                            PAYLOAD_ONLINE.as_bytes().to_vec(),
                        )
                        .await
                    {
                        warn!(error = %e, "availability publish failed");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    match topics::parse_command(&prefix, &publish.topic, &publish.payload) {
                        Ok(command) => {
                            debug!(topic = %publish.topic, "command received");
                            if command_tx.send(command).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(diagnostic = %e, "dropping command"),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    let was_ready = *state.borrow() == SessionState::Ready;
                    let _ = state.send(if was_ready {
                        SessionState::Degraded
                    } else {
                        SessionState::Connecting
                    });

                    let delay = backoff_delay(failures, &config.reconnect);
                    failures = failures.saturating_add(1);
                    warn!(
                        error = %e,
                        failures,
                        delay_ms = delay.as_millis() as u64,
                        "broker connection error; backing off"
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => {}
                        () = tokio::time::sleep(delay) => {}
                    }
                    let _ = state.send(SessionState::Connecting);
                }
            }
        }
    }

    let _ = forwarder.await;
    let _ = state.send(SessionState::Disconnected);
    debug!("broker session stopped");
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::{BrokerConfig, BrokerTls};
    use pretty_assertions::assert_eq;

    #[test]
    fn options_carry_last_will_and_keep_alive() {
        let config = BridgeConfig {
            topic_prefix: "lutron".into(),
            ..BridgeConfig::default()
        };
        let options = build_mqtt_options(&config).unwrap();

        assert_eq!(options.keep_alive(), config.broker.keep_alive);
        let will = options.last_will().unwrap();
        assert_eq!(will.topic, "lutron/bridge/status");
        assert_eq!(will.message.as_ref(), PAYLOAD_OFFLINE.as_bytes());
        assert!(will.retain);
    }

    #[test]
    fn missing_tls_files_fail_at_startup() {
        let config = BridgeConfig {
            broker: BrokerConfig {
                tls: Some(BrokerTls {
                    ca_file: "/nonexistent/ca.pem".into(),
                    client_cert_file: None,
                    client_key_file: None,
                }),
                ..BrokerConfig::default()
            },
            ..BridgeConfig::default()
        };
        let err = build_mqtt_options(&config).unwrap_err();
        assert!(matches!(err, BridgeError::Config { .. }));
    }

    #[test]
    fn lone_client_cert_is_rejected() {
        let config = BridgeConfig {
            broker: BrokerConfig {
                tls: Some(BrokerTls {
                    ca_file: "/nonexistent/ca.pem".into(),
                    client_cert_file: Some("/nonexistent/client.pem".into()),
                    client_key_file: None,
                }),
                ..BrokerConfig::default()
            },
            ..BridgeConfig::default()
        };
        let err = build_mqtt_options(&config).unwrap_err();
        assert!(
            err.to_string().contains("provided together"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn publication_constructors_set_retained() {
        let retained = Publication::retained("t".into(), "ON".into());
        assert!(retained.retained);
        let transient = Publication::transient("t".into(), "x".into());
        assert!(!transient.retained);
    }
}
