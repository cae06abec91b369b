//! Named providers sharing one identifier sequence.

use std::collections::BTreeMap;
use std::sync::Arc;

use pushwire_core::IdentifierSequence;
use pushwire_settings::PushwireSettings;
use tracing::info;

use crate::connection::Connector;
use crate::errors::GatewayError;
use crate::provider::Provider;
use crate::tls::TlsConnector;

/// Every configured provider, keyed by name.
///
/// Identifiers stay unique across providers because they all draw from the
/// registry's sequence.
#[derive(Debug)]
pub struct Providers<C: Connector = TlsConnector> {
    providers: BTreeMap<String, Provider<C>>,
    sequence: Arc<IdentifierSequence>,
}

impl Providers<TlsConnector> {
    /// Build a TLS provider for every entry in `settings`.
    pub fn from_settings(settings: &PushwireSettings) -> Result<Self, GatewayError> {
        let mut registry = Self::new();
        for (name, provider_settings) in &settings.providers {
            let provider = Provider::from_settings(name, provider_settings)?;
            info!(provider = %name, gateway = %provider.gateway_endpoint(), "provider configured");
            registry.insert(provider);
        }
        Ok(registry)
    }
}

impl<C: Connector> Providers<C> {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            providers: BTreeMap::new(),
            sequence: Arc::new(IdentifierSequence::new()),
        }
    }

    /// Add `provider` under its name, replacing any provider with that name.
    pub fn insert(&mut self, provider: Provider<C>) -> Option<Provider<C>> {
        let provider = provider.with_sequence(Arc::clone(&self.sequence));
        self.providers.insert(provider.name().to_owned(), provider)
    }

    /// Provider called `name`.
    pub fn get(&self, name: &str) -> Option<&Provider<C>> {
        self.providers.get(name)
    }

    /// Provider called `name`, mutably.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Provider<C>> {
        self.providers.get_mut(name)
    }

    /// Provider names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    /// Number of providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether no provider is registered.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// The shared identifier sequence.
    pub fn sequence(&self) -> &Arc<IdentifierSequence> {
        &self.sequence
    }

    /// Open a batch on every provider.
    pub fn begin_batch_all(&mut self) {
        for provider in self.providers.values_mut() {
            provider.begin_batch();
        }
    }

    /// Send every provider's open batch.
    pub async fn commit_batch_all(&mut self) {
        for provider in self.providers.values_mut() {
            provider.commit_batch().await;
        }
    }

    /// Flush and close every provider.
    pub async fn close_all(&mut self) {
        for provider in self.providers.values_mut() {
            provider.close().await;
        }
    }
}

impl<C: Connector> Default for Providers<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use assert_matches::assert_matches;
    use pushwire_core::{DeliveryPolicy, Endpoints, Payload};
    use pushwire_settings::{ProviderSettings, SettingsError};

    use super::*;
    use crate::testing::ScriptedConnector;

    const TOKEN: &str = "ce8be6272e43e85516033e24b4c289220eeda4879c477160b2545e95b68b5969";

    fn scripted(name: &str, connector: &ScriptedConnector) -> Provider<ScriptedConnector> {
        Provider::new(name, connector.clone(), Endpoints::sandbox(), DeliveryPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn providers_share_identifiers() {
        let ios = ScriptedConnector::new();
        let mac = ScriptedConnector::new();
        let mut registry = Providers::new();
        let _ = registry.insert(scripted("ios", &ios));
        let _ = registry.insert(scripted("mac", &mac));

        let payload = Arc::new(Payload::builder().badge(1).build().unwrap());
        for name in ["ios", "mac", "ios"] {
            registry
                .get_mut(name)
                .unwrap()
                .notify([TOKEN], Arc::clone(&payload))
                .await
                .unwrap();
        }

        assert_eq!(ios.written_identifiers(), vec![1, 3]);
        assert_eq!(mac.written_identifiers(), vec![2]);
        assert_eq!(registry.sequence().last_issued(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_all_holds_until_commit() {
        let ios = ScriptedConnector::new();
        let mut registry = Providers::new();
        let _ = registry.insert(scripted("ios", &ios));

        registry.begin_batch_all();
        let provider = registry.get_mut("ios").unwrap();
        provider.notify([TOKEN, TOKEN], Payload::builder().alert("a").build().unwrap()).await.unwrap();
        assert!(ios.events().is_empty());

        registry.commit_batch_all().await;
        assert_eq!(ios.writes_per_session(), vec![vec![1, 2]]);

        registry.close_all().await;
        assert!(!registry.get("ios").unwrap().connection().is_open());
    }

    #[test]
    fn insert_replaces_by_name() {
        let connector = ScriptedConnector::new();
        let mut registry = Providers::new();
        assert!(registry.insert(scripted("ios", &connector)).is_none());
        assert!(registry.insert(scripted("ios", &connector)).is_some());
        let _ = registry.insert(scripted("android-bridge", &connector));
        assert_eq!(registry.names().collect::<Vec<_>>(), ["android-bridge", "ios"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn empty_settings_build_empty_registry() {
        let registry = Providers::from_settings(&PushwireSettings::default()).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn missing_credentials_fail_the_build() {
        let settings = PushwireSettings {
            providers: BTreeMap::from([("ios".to_string(), ProviderSettings::default())]),
        };
        assert_matches!(
            Providers::from_settings(&settings),
            Err(GatewayError::Settings(SettingsError::InvalidValue { .. }))
        );
    }
}
