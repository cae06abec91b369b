//! Gateway error types.
//!
//! [`ConnectionError`] and [`TransportFault`] never reach callers of the
//! delivery engine; they drive its recovery. [`GatewayError`] is what
//! constructing a provider can fail with.

use std::time::Duration;

use pushwire_settings::SettingsError;
use thiserror::Error;

/// Failure to establish a gateway session.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// TCP connect failed.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        /// `host:port` of the gateway.
        endpoint: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// TLS handshake failed.
    #[error("TLS handshake with {endpoint} failed: {source}")]
    TlsHandshake {
        /// `host:port` of the gateway.
        endpoint: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The client configuration could not be built.
    #[error("invalid TLS configuration: {0}")]
    TlsConfig(String),

    /// The certificate chain could not be parsed.
    #[error("invalid certificate: {0}")]
    Certificate(String),

    /// The private key could not be parsed or decrypted.
    #[error("invalid private key: {0}")]
    PrivateKey(String),

    /// Connect or handshake took too long.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// What was being attempted.
        operation: &'static str,
        /// The limit that was hit.
        timeout: Duration,
    },
}

/// A transport problem seen during one delivery attempt.
#[derive(Debug, Error)]
pub enum TransportFault {
    /// No session could be established.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Writing a packet failed.
    #[error("write failed: {0}")]
    Write(std::io::Error),

    /// Flushing written packets failed.
    #[error("flush failed: {0}")]
    Flush(std::io::Error),

    /// Reading the error probe failed.
    #[error("read failed: {0}")]
    Read(std::io::Error),
}

/// Errors from building providers.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Settings were missing or invalid.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// Credentials could not be turned into a TLS configuration.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
