//! Shared value types: endpoints, delivery policy, credentials.

use std::fmt;
use std::time::Duration;

use secrecy::{SecretSlice, SecretString};
use serde::Serialize;

/// Production gateway host.
pub const PRODUCTION_GATEWAY_HOST: &str = "gateway.push.apple.com";
/// Production feedback host.
pub const PRODUCTION_FEEDBACK_HOST: &str = "feedback.push.apple.com";
/// Sandbox gateway host.
pub const SANDBOX_GATEWAY_HOST: &str = "gateway.sandbox.push.apple.com";
/// Sandbox feedback host.
pub const SANDBOX_FEEDBACK_HOST: &str = "feedback.sandbox.push.apple.com";
/// Gateway port in both environments.
pub const GATEWAY_PORT: u16 = 2195;
/// Feedback port in both environments.
pub const FEEDBACK_PORT: u16 = 2196;

/// A TCP endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    /// Host name, also used for TLS server name verification.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Gateway and feedback service locations for one provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Endpoints {
    /// Where notifications are written.
    pub gateway: Endpoint,
    /// Where expired device tokens are polled from.
    pub feedback: Endpoint,
}

impl Endpoints {
    /// Production environment.
    pub fn production() -> Self {
        Self {
            gateway: Endpoint::new(PRODUCTION_GATEWAY_HOST, GATEWAY_PORT),
            feedback: Endpoint::new(PRODUCTION_FEEDBACK_HOST, FEEDBACK_PORT),
        }
    }

    /// Sandbox environment.
    pub fn sandbox() -> Self {
        Self {
            gateway: Endpoint::new(SANDBOX_GATEWAY_HOST, GATEWAY_PORT),
            feedback: Endpoint::new(SANDBOX_FEEDBACK_HOST, FEEDBACK_PORT),
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::production()
    }
}

/// Timing knobs of the delivery engine.
#[derive(Clone, Debug, PartialEq)]
pub struct DeliveryPolicy {
    /// How long to wait for an error frame after a multi-notification batch.
    pub delay_for_errors: Duration,
    /// Pause before resuming after skipping a rejected notification.
    pub error_skip_delay: Duration,
    /// One delay per retry of an unattributable failure.
    pub retry_backoff: Vec<Duration>,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            delay_for_errors: Duration::from_secs(1),
            error_skip_delay: Duration::from_millis(500),
            retry_backoff: vec![
                Duration::from_millis(250),
                Duration::from_millis(750),
                Duration::from_millis(2500),
            ],
        }
    }
}

impl DeliveryPolicy {
    /// Error probe for a batch of `batch_len` notifications.
    ///
    /// A lone notification gets no grace period: the read only sees a frame
    /// that has already arrived.
    pub fn probe_delay(&self, batch_len: usize) -> Duration {
        if batch_len > 1 {
            self.delay_for_errors
        } else {
            Duration::ZERO
        }
    }

    /// Delay before retry number `attempt + 1`, or `None` once retries are exhausted.
    pub fn backoff(&self, attempt: usize) -> Option<Duration> {
        self.retry_backoff.get(attempt).copied()
    }

    /// Maximum number of retries of one batch.
    pub fn max_retries(&self) -> usize {
        self.retry_backoff.len()
    }
}

/// Client certificate and key presented during the TLS handshake.
pub struct Credentials {
    /// PEM certificate chain.
    pub certificate_pem: Vec<u8>,
    /// PEM private key, possibly encrypted.
    pub private_key_pem: SecretSlice<u8>,
    /// Passphrase for an encrypted private key.
    pub passphrase: Option<SecretString>,
}

impl Credentials {
    /// Bundle PEM material.
    pub fn new(certificate_pem: Vec<u8>, private_key_pem: Vec<u8>) -> Self {
        Self {
            certificate_pem,
            private_key_pem: SecretSlice::from(private_key_pem),
            passphrase: None,
        }
    }

    /// Attach a passphrase for the private key.
    #[must_use]
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(SecretString::from(passphrase.into()));
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("certificate_pem", &format_args!("{} bytes", self.certificate_pem.len()))
            .field("private_key_pem", &"[REDACTED]")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn environment_presets() {
        let production = Endpoints::production();
        assert_eq!(production.gateway.to_string(), "gateway.push.apple.com:2195");
        assert_eq!(production.feedback.to_string(), "feedback.push.apple.com:2196");

        let sandbox = Endpoints::sandbox();
        assert_eq!(sandbox.gateway.to_string(), "gateway.sandbox.push.apple.com:2195");
        assert_eq!(sandbox.feedback.to_string(), "feedback.sandbox.push.apple.com:2196");

        assert_eq!(Endpoints::default(), production);
    }

    #[test]
    fn default_policy() {
        let policy = DeliveryPolicy::default();
        assert_eq!(policy.delay_for_errors, Duration::from_secs(1));
        assert_eq!(policy.error_skip_delay, Duration::from_millis(500));
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.backoff(0), Some(Duration::from_millis(250)));
        assert_eq!(policy.backoff(2), Some(Duration::from_millis(2500)));
        assert_eq!(policy.backoff(3), None);
    }

    #[test]
    fn single_notification_has_no_probe() {
        let policy = DeliveryPolicy::default();
        assert_eq!(policy.probe_delay(1), Duration::ZERO);
        assert_eq!(policy.probe_delay(2), Duration::from_secs(1));
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let credentials = Credentials::new(b"CERT".to_vec(), b"super-secret-key".to_vec())
            .with_passphrase("hunter2");
        let debug = format!("{credentials:?}");
        assert!(!debug.contains("super-secret-key"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("4 bytes"));
        assert_eq!(credentials.private_key_pem.expose_secret(), b"super-secret-key");
    }
}
