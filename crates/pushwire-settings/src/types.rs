//! Settings type definitions.
//!
//! Field names are snake_case, matching the keys of the providers file. Every
//! field is optional in JSON; missing fields take their default.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use pushwire_core::{DeliveryPolicy, Endpoint, Endpoints};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Named gateway environment presets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// The live gateway.
    #[default]
    Production,
    /// The development gateway.
    Sandbox,
}

impl Environment {
    /// Endpoints of this environment.
    pub fn endpoints(self) -> Endpoints {
        match self {
            Self::Production => Endpoints::production(),
            Self::Sandbox => Endpoints::sandbox(),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Production => f.write_str("production"),
            Self::Sandbox => f.write_str("sandbox"),
        }
    }
}

/// Configuration of one provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Preset for the four endpoint values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,
    /// Gateway host; overrides the preset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_host: Option<String>,
    /// Gateway port; overrides the preset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_port: Option<u16>,
    /// Feedback host; overrides the preset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_host: Option<String>,
    /// Feedback port; overrides the preset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_port: Option<u16>,
    /// One PEM file holding both certificate and key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_bundle_path: Option<PathBuf>,
    /// PEM certificate chain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_path: Option<PathBuf>,
    /// PEM private key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<PathBuf>,
    /// Passphrase of an encrypted private key.
    #[serde(skip_serializing)]
    pub private_key_pass: Option<SecretString>,
    /// `trace`, `debug`, `info`, `warn` or `error`.
    pub log_level: String,
    /// Seconds to wait for an error frame after a multi-notification batch.
    pub delay_for_errors: f64,
    /// Seconds to pause after skipping a rejected notification.
    pub error_skip_delay: f64,
    /// Seconds to wait before each retry of an unattributable failure.
    pub retry_backoff: Vec<f64>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            environment: None,
            gateway_host: None,
            gateway_port: None,
            feedback_host: None,
            feedback_port: None,
            cert_bundle_path: None,
            certificate_path: None,
            private_key_path: None,
            private_key_pass: None,
            log_level: "warn".to_string(),
            delay_for_errors: 1.0,
            error_skip_delay: 0.5,
            retry_backoff: vec![0.25, 0.75, 2.5],
        }
    }
}

/// Where to find the TLS client identity.
#[derive(Clone, Debug)]
pub struct CredentialPaths {
    /// PEM certificate chain.
    pub certificate: PathBuf,
    /// PEM private key.
    pub private_key: PathBuf,
    /// Passphrase of an encrypted private key.
    pub passphrase: Option<SecretString>,
}

impl ProviderSettings {
    /// Gateway and feedback endpoints.
    ///
    /// Explicit host/port keys win over the environment preset, which itself
    /// defaults to production.
    pub fn endpoints(&self, provider: &str) -> Result<Endpoints> {
        let preset = self.environment.unwrap_or_default().endpoints();
        let endpoints = Endpoints {
            gateway: Endpoint::new(
                self.gateway_host.clone().unwrap_or(preset.gateway.host),
                self.gateway_port.unwrap_or(preset.gateway.port),
            ),
            feedback: Endpoint::new(
                self.feedback_host.clone().unwrap_or(preset.feedback.host),
                self.feedback_port.unwrap_or(preset.feedback.port),
            ),
        };

        for (key, endpoint) in [("gateway", &endpoints.gateway), ("feedback", &endpoints.feedback)] {
            if endpoint.host.trim().is_empty() {
                return Err(invalid(provider, format!("{key}_host must not be empty")));
            }
            if endpoint.port == 0 {
                return Err(invalid(provider, format!("{key}_port must be non-zero")));
            }
        }
        Ok(endpoints)
    }

    /// Delivery timing.
    pub fn policy(&self, provider: &str) -> Result<DeliveryPolicy> {
        Ok(DeliveryPolicy {
            delay_for_errors: seconds(provider, "delay_for_errors", self.delay_for_errors)?,
            error_skip_delay: seconds(provider, "error_skip_delay", self.error_skip_delay)?,
            retry_backoff: self
                .retry_backoff
                .iter()
                .map(|&secs| seconds(provider, "retry_backoff", secs))
                .collect::<Result<_>>()?,
        })
    }

    /// Certificate and key locations, expanding `cert_bundle_path`.
    pub fn credential_paths(&self, provider: &str) -> Result<CredentialPaths> {
        let certificate = self
            .certificate_path
            .clone()
            .or_else(|| self.cert_bundle_path.clone())
            .ok_or_else(|| invalid(provider, "certificate_path or cert_bundle_path is required"))?;
        let private_key = self
            .private_key_path
            .clone()
            .or_else(|| self.cert_bundle_path.clone())
            .ok_or_else(|| invalid(provider, "private_key_path or cert_bundle_path is required"))?;

        Ok(CredentialPaths {
            certificate,
            private_key,
            passphrase: self.private_key_pass.clone(),
        })
    }

    /// Check everything except credential presence.
    pub fn validate(&self, provider: &str) -> Result<()> {
        let _ = self.endpoints(provider)?;
        let _ = self.policy(provider)?;
        Ok(())
    }
}

/// All configured providers, keyed by name.
#[derive(Clone, Debug, Default)]
pub struct PushwireSettings {
    /// Providers after defaults were merged in.
    pub providers: BTreeMap<String, ProviderSettings>,
}

impl PushwireSettings {
    /// Look up a provider.
    pub fn provider(&self, name: &str) -> Result<&ProviderSettings> {
        self.providers
            .get(name)
            .ok_or_else(|| SettingsError::UnknownProvider(name.to_string()))
    }
}

fn seconds(provider: &str, key: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| invalid(provider, format!("{key} must be a finite, non-negative number of seconds")))
}

fn invalid(provider: &str, reason: impl Into<String>) -> SettingsError {
    SettingsError::InvalidValue {
        provider: provider.to_string(),
        reason: reason.into(),
    }
}
