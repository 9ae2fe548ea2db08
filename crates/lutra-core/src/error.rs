// ── Core error types ──
//
// Bridge-level errors. Transport failures from the LEAP session are
// converted at this boundary into variants the supervisor understands;
// nothing below rumqttc or lutra-leap leaks past this crate.

use thiserror::Error;

use lutra_leap::LeapError;

/// Unified error type for the bridge core.
#[derive(Debug, Error)]
pub enum BridgeError {
    // ── Fatal ───────────────────────────────────────────────────────
    /// The hub rejected our credentials. Reconnecting cannot help, so
    /// this tears the whole process down.
    #[error("hub authentication failed: {message}")]
    Auth { message: String },

    // ── Recoverable, drives reconnect backoff ───────────────────────
    #[error("hub transport error: {message}")]
    Transport { message: String },

    #[error("hub request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Device enumeration failed; the previous registry snapshot stays
    /// authoritative and the load is retried with the next reconnect.
    #[error("device registry load failed: {reason}")]
    RegistryLoad { reason: String },

    // ── Diagnostics: logged and dropped, never propagated ───────────
    #[error("malformed command on {topic}: {reason}")]
    MalformedCommand { topic: String, reason: String },

    #[error("command for unknown device {area}/{device}")]
    UnknownDevice { area: String, device: String },

    // ── Startup ─────────────────────────────────────────────────────
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl BridgeError {
    /// Fatal errors end the process; everything else is retried or
    /// logged and dropped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

// ── Conversion from the LEAP session layer ───────────────────────────

impl From<LeapError> for BridgeError {
    fn from(err: LeapError) -> Self {
        match err {
            LeapError::Auth { .. } | LeapError::Credentials { .. } => BridgeError::Auth {
                message: err.to_string(),
            },
            LeapError::Timeout { timeout_secs } => BridgeError::Timeout { timeout_secs },
            LeapError::Tls(_)
            | LeapError::Io(_)
            | LeapError::ConnectionClosed
            | LeapError::Protocol { .. } => BridgeError::Transport {
                message: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_is_the_only_fatal_variant() {
        assert!(
            BridgeError::Auth {
                message: "bad cert".into()
            }
            .is_fatal()
        );
        assert!(
            !BridgeError::Transport {
                message: "reset".into()
            }
            .is_fatal()
        );
        assert!(
            !BridgeError::RegistryLoad {
                reason: "closed".into()
            }
            .is_fatal()
        );
    }

    #[test]
    fn leap_auth_errors_stay_fatal_across_the_boundary() {
        let err: BridgeError = LeapError::Auth {
            message: "TLS alert".into(),
        }
        .into();
        assert!(err.is_fatal());

        let err: BridgeError = LeapError::ConnectionClosed.into();
        assert!(!err.is_fatal());
    }
}
