use thiserror::Error;

/// Top-level error type for the `lutra-leap` crate.
///
/// Covers every failure mode of a LEAP session: certificate material,
/// TLS handshake, transport I/O, request timeouts, and protocol decoding.
/// `lutra-core` maps these into supervisor state transitions.
#[derive(Debug, Error)]
pub enum LeapError {
    // ── Authentication ──────────────────────────────────────────────
    /// The bridge rejected our client certificate (or demanded one we
    /// could not present). Not retryable with the same credentials.
    #[error("bridge rejected authentication: {message}")]
    Auth { message: String },

    /// Client certificate or key material could not be loaded.
    #[error("unusable credential file {path}: {reason}")]
    Credentials { path: String, reason: String },

    // ── Transport ───────────────────────────────────────────────────
    /// TLS configuration or handshake error that is not an auth rejection.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Socket-level I/O error (connection refused, reset, DNS failure).
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The session ended while a request was in flight.
    #[error("connection closed")]
    ConnectionClosed,

    /// A request did not receive a response within the request timeout.
    #[error("request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Protocol ────────────────────────────────────────────────────
    /// The bridge sent something we could not decode, or a non-success
    /// status for a request we expected to succeed.
    #[error("protocol error: {message}")]
    Protocol { message: String },
}

impl LeapError {
    /// Returns `true` if this error means the credentials are bad and
    /// reconnecting with the same material cannot succeed.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. } | Self::Credentials { .. })
    }

    /// Returns `true` if this is a transient error worth a backoff retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Tls(_) | Self::Io(_) | Self::ConnectionClosed | Self::Timeout { .. }
        )
    }
}
