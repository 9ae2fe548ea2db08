//! Configuration for the lutra bridge daemon.
//!
//! TOML file plus `LUTRA_`-prefixed environment variables, merged over
//! serialized defaults, validated, and translated into the core's
//! runtime `BridgeConfig`. Loaded once at startup; immutable afterwards.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use lutra_core::{BridgeConfig, BrokerConfig, BrokerTls, ReconnectPolicy};
use lutra_leap::{HubConfig, TlsVerification};

pub const DEFAULT_CONFIG_FILE: &str = "lutra.toml";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level file/environment configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub hub: HubSettings,
    #[serde(default)]
    pub broker: BrokerSettings,
    #[serde(default)]
    pub bridge: BridgeSettings,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct HubSettings {
    /// Bridge hostname or IP. Required.
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_hub_port")]
    pub port: u16,

    /// Paired client key/cert and bridge CA, PEM files. Required.
    #[serde(default)]
    pub key_file: PathBuf,
    #[serde(default)]
    pub cert_file: PathBuf,
    #[serde(default)]
    pub ca_file: PathBuf,

    /// Server verification: "accept-invalid" (default -- bridge certs
    /// rarely match their hostname) or "ca-file".
    #[serde(default = "default_hub_tls")]
    pub tls: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_hub_port(),
            key_file: PathBuf::new(),
            cert_file: PathBuf::new(),
            ca_file: PathBuf::new(),
            tls: default_hub_tls(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_hub_port() -> u16 {
    8081
}
fn default_hub_tls() -> String {
    "accept-invalid".into()
}
fn default_request_timeout() -> u64 {
    10
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BrokerSettings {
    #[serde(default = "default_broker_host")]
    pub host: String,

    #[serde(default = "default_broker_port")]
    pub port: u16,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    pub username: Option<String>,

    /// Plaintext in the file; prefer the environment variable.
    pub password: Option<String>,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Optional broker TLS. CA required; client cert/key go together.
    pub ca_file: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            client_id: default_client_id(),
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive(),
            ca_file: None,
            cert_file: None,
            key_file: None,
        }
    }
}

fn default_broker_host() -> String {
    "localhost".into()
}
fn default_broker_port() -> u16 {
    1883
}
fn default_client_id() -> String {
    "lutra".into()
}
fn default_keep_alive() -> u64 {
    30
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BridgeSettings {
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    #[serde(default = "default_backoff_initial")]
    pub backoff_initial_secs: u64,

    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            topic_prefix: default_topic_prefix(),
            command_timeout_secs: default_command_timeout(),
            ping_interval_secs: default_ping_interval(),
            backoff_initial_secs: default_backoff_initial(),
            backoff_max_secs: default_backoff_max(),
        }
    }
}

fn default_topic_prefix() -> String {
    "lutron".into()
}
fn default_command_timeout() -> u64 {
    5
}
fn default_ping_interval() -> u64 {
    60
}
fn default_backoff_initial() -> u64 {
    1
}
fn default_backoff_max() -> u64 {
    60
}

// ── Loading ─────────────────────────────────────────────────────────

/// Load raw settings from the given file (or `lutra.toml` in the
/// working directory) and the environment.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

    let figment = Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("LUTRA_").split("_"));

    Ok(figment.extract()?)
}

/// Load, validate, and translate into the core's runtime config.
pub fn load(path: Option<&Path>) -> Result<BridgeConfig, ConfigError> {
    into_bridge_config(load_settings(path)?)
}

/// Validate settings and build the runtime `BridgeConfig`.
pub fn into_bridge_config(settings: Settings) -> Result<BridgeConfig, ConfigError> {
    let hub = &settings.hub;
    if hub.host.is_empty() {
        return Err(invalid("hub.host", "a bridge hostname is required"));
    }
    for (field, path) in [
        ("hub.key_file", &hub.key_file),
        ("hub.cert_file", &hub.cert_file),
        ("hub.ca_file", &hub.ca_file),
    ] {
        if path.as_os_str().is_empty() {
            return Err(invalid(field, "a PEM file path is required"));
        }
    }

    let verify = match hub.tls.as_str() {
        "accept-invalid" => TlsVerification::DangerAcceptInvalid,
        "ca-file" => TlsVerification::CaFile,
        other => {
            return Err(invalid(
                "hub.tls",
                format!("expected 'accept-invalid' or 'ca-file', got '{other}'"),
            ));
        }
    };

    let bridge = &settings.bridge;
    let prefix = bridge.topic_prefix.trim_matches('/');
    if prefix.is_empty() {
        return Err(invalid("bridge.topic_prefix", "must not be empty"));
    }
    if prefix.contains(['+', '#']) {
        return Err(invalid(
            "bridge.topic_prefix",
            "MQTT wildcards are not allowed",
        ));
    }

    let broker = &settings.broker;
    let tls = match (&broker.ca_file, &broker.cert_file, &broker.key_file) {
        (None, None, None) => None,
        (Some(ca), cert, key) => {
            if cert.is_some() != key.is_some() {
                return Err(invalid(
                    "broker.cert_file",
                    "client cert and key must be provided together",
                ));
            }
            Some(BrokerTls {
                ca_file: ca.clone(),
                client_cert_file: cert.clone(),
                client_key_file: key.clone(),
            })
        }
        (None, _, _) => {
            return Err(invalid(
                "broker.ca_file",
                "required when broker TLS material is configured",
            ));
        }
    };

    Ok(BridgeConfig {
        hub: HubConfig {
            host: hub.host.clone(),
            port: hub.port,
            key_file: hub.key_file.clone(),
            cert_file: hub.cert_file.clone(),
            ca_file: hub.ca_file.clone(),
            verify,
            request_timeout: Duration::from_secs(hub.request_timeout_secs.max(1)),
        },
        broker: BrokerConfig {
            host: broker.host.clone(),
            port: broker.port,
            client_id: broker.client_id.clone(),
            username: broker.username.clone(),
            password: broker
                .password
                .as_ref()
                .map(|password| SecretString::from(password.clone())),
            keep_alive: Duration::from_secs(broker.keep_alive_secs.max(5)),
            tls,
        },
        topic_prefix: prefix.to_owned(),
        command_timeout: Duration::from_secs(bridge.command_timeout_secs.max(1)),
        ping_interval: Duration::from_secs(bridge.ping_interval_secs.max(5)),
        reconnect: ReconnectPolicy {
            initial_delay: Duration::from_secs(bridge.backoff_initial_secs.max(1)),
            max_delay: Duration::from_secs(bridge.backoff_max_secs.max(1)),
        },
    })
}

// ── Tests ────────────────────────────────────────────────────────────
