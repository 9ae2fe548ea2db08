// ── Runtime configuration ──
//
// These types describe how to reach the hub and the broker. They carry
// credential data and tuning, but never touch disk -- the lutra-config
// crate builds a `BridgeConfig` and hands it in, and it is immutable for
// the process lifetime.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use lutra_leap::HubConfig;

use crate::supervisor::ReconnectPolicy;

/// Connection details for the MQTT broker.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
    /// Optional TLS; plain TCP when absent.
    pub tls: Option<BrokerTls>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "lutra".into(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            tls: None,
        }
    }
}

/// Broker TLS material, all PEM files.
#[derive(Debug, Clone)]
pub struct BrokerTls {
    pub ca_file: PathBuf,
    pub client_cert_file: Option<PathBuf>,
    pub client_key_file: Option<PathBuf>,
}

/// Full bridge configuration, one hub and one broker per instance.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub hub: HubConfig,
    pub broker: BrokerConfig,
    /// Root of the MQTT topic tree.
    pub topic_prefix: String,
    /// Bound on waiting for the hub to acknowledge a command.
    pub command_timeout: Duration,
    /// Hub keepalive ping interval.
    pub ping_interval: Duration,
    /// Backoff bounds shared by both reconnect loops.
    pub reconnect: ReconnectPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            hub: HubConfig::default(),
            broker: BrokerConfig::default(),
            topic_prefix: "lutron".into(),
            command_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(60),
            reconnect: ReconnectPolicy::default(),
        }
    }
}
