//! TLS transport construction for the LEAP session.
//!
//! The bridge requires mutual TLS: the pairing process leaves the client
//! with a certificate/key pair and the bridge's CA certificate on disk,
//! and every connection presents the client certificate. Server
//! verification is configurable because Caséta bridge certificates do not
//! carry a SAN matching the address the bridge answers on.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsConnector;

use crate::error::LeapError;

// ── HubConfig ────────────────────────────────────────────────────────

/// How to verify the bridge's server certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// Verify the presented chain against the paired CA file.
    CaFile,
    /// Skip server verification entirely (client auth still applies).
    /// Default, since bridge certificates rarely match their hostname.
    #[default]
    DangerAcceptInvalid,
}

/// Everything needed to establish a LEAP session.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Bridge hostname or IP address.
    pub host: String,
    /// LEAP port. Caséta bridges listen on 8081.
    pub port: u16,
    /// PEM-encoded client private key from pairing.
    pub key_file: PathBuf,
    /// PEM-encoded client certificate from pairing.
    pub cert_file: PathBuf,
    /// PEM-encoded bridge CA certificate from pairing.
    pub ca_file: PathBuf,
    /// Server certificate verification mode.
    pub verify: TlsVerification,
    /// Timeout applied to connection establishment and every request.
    pub request_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: "caseta.run".into(),
            port: 8081,
            key_file: PathBuf::new(),
            cert_file: PathBuf::new(),
            ca_file: PathBuf::new(),
            verify: TlsVerification::default(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

// ── PEM loading ──────────────────────────────────────────────────────

fn credentials_error(path: &Path, reason: impl std::fmt::Display) -> LeapError {
    LeapError::Credentials {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, LeapError> {
    let data = std::fs::read(path).map_err(|e| credentials_error(path, e))?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut data.as_slice())
        .collect::<Result<_, _>>()
        .map_err(|e| credentials_error(path, e))?;
    if certs.is_empty() {
        return Err(credentials_error(path, "no certificates found"));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, LeapError> {
    let data = std::fs::read(path).map_err(|e| credentials_error(path, e))?;
    rustls_pemfile::private_key(&mut data.as_slice())
        .map_err(|e| credentials_error(path, e))?
        .ok_or_else(|| credentials_error(path, "no private key found"))
}

// ── Connector construction ───────────────────────────────────────────

/// Build a `TlsConnector` presenting the paired client certificate.
pub(crate) fn tls_connector(config: &HubConfig) -> Result<TlsConnector, LeapError> {
    let certs = load_certs(&config.cert_file)?;
    let key = load_key(&config.key_file)?;

    let builder = ClientConfig::builder();
    let client = match config.verify {
        TlsVerification::CaFile => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(&config.ca_file)? {
                roots
                    .add(cert)
                    .map_err(|e| credentials_error(&config.ca_file, e))?;
            }
            builder
                .with_root_certificates(roots)
                .with_client_auth_cert(certs, key)
        }
        TlsVerification::DangerAcceptInvalid => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(danger::NoVerification::new()))
            .with_client_auth_cert(certs, key),
    }
    .map_err(|e| LeapError::Tls(e.to_string()))?;

    Ok(TlsConnector::from(Arc::new(client)))
}

/// Classify an I/O error from the TLS handshake.
///
/// The bridge signals a rejected (or missing) client certificate with a
/// TLS alert, which tokio-rustls surfaces as an `io::Error` wrapping a
/// `rustls::Error`. Certificate-flavored alerts are authentication
/// failures -- retrying with the same credentials cannot succeed.
pub(crate) fn classify_handshake_error(err: std::io::Error) -> LeapError {
    use rustls::AlertDescription;

    if let Some(inner) = err.get_ref() {
        if let Some(tls) = inner.downcast_ref::<rustls::Error>() {
            return match tls {
                rustls::Error::AlertReceived(alert) => match alert {
                    AlertDescription::BadCertificate
                    | AlertDescription::CertificateExpired
                    | AlertDescription::CertificateRevoked
                    | AlertDescription::CertificateUnknown
                    | AlertDescription::CertificateRequired
                    | AlertDescription::UnknownCA
                    | AlertDescription::AccessDenied => LeapError::Auth {
                        message: format!("TLS alert: {alert:?}"),
                    },
                    _ => LeapError::Tls(tls.to_string()),
                },
                other => LeapError::Tls(other.to_string()),
            };
        }
    }
    LeapError::Io(err)
}

// ── Verifier for DangerAcceptInvalid ─────────────────────────────────

mod danger {
    use rustls::DigitallySignedStruct;
    use rustls::client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    };
    use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
    use rustls_pki_types::{CertificateDer, ServerName, UnixTime};

    /// Accepts any server certificate. Signatures are still checked so a
    /// man-in-the-middle must at least hold the presented key.
    #[derive(Debug)]
    pub(super) struct NoVerification(CryptoProvider);

    impl NoVerification {
        pub(super) fn new() -> Self {
            Self(rustls::crypto::aws_lc_rs::default_provider())
        }
    }

    impl ServerCertVerifier for NoVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn tls_io_error(tls: rustls::Error) -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::InvalidData, tls)
    }

    #[test]
    fn certificate_alert_classifies_as_auth() {
        let err = tls_io_error(rustls::Error::AlertReceived(
            rustls::AlertDescription::CertificateRequired,
        ));
        assert!(classify_handshake_error(err).is_auth());
    }

    #[test]
    fn unknown_ca_alert_classifies_as_auth() {
        let err = tls_io_error(rustls::Error::AlertReceived(
            rustls::AlertDescription::UnknownCA,
        ));
        assert!(classify_handshake_error(err).is_auth());
    }

    #[test]
    fn non_certificate_alert_stays_transient() {
        let err = tls_io_error(rustls::Error::AlertReceived(
            rustls::AlertDescription::HandshakeFailure,
        ));
        let classified = classify_handshake_error(err);
        assert!(!classified.is_auth());
        assert!(classified.is_transient());
    }

    #[test]
    fn plain_io_error_passes_through() {
        let err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let classified = classify_handshake_error(err);
        assert!(matches!(classified, LeapError::Io(_)));
        assert!(classified.is_transient());
    }

    #[test]
    fn missing_credential_files_report_path() {
        let config = HubConfig {
            cert_file: PathBuf::from("/nonexistent/client.crt"),
            key_file: PathBuf::from("/nonexistent/client.key"),
            ca_file: PathBuf::from("/nonexistent/ca.crt"),
            ..HubConfig::default()
        };
        let err = tls_connector(&config).err().unwrap();
        assert!(err.is_auth());
        assert!(err.to_string().contains("/nonexistent/client.crt"));
    }
}
