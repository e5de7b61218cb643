//! Provider
//!
//! All Clients of one vendor, keyed by model name. A Provider builds Clients
//! through its vendor's constructor, warms them up, and answers availability
//! from the last recorded health state.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;

use crate::client::LlmClient;
use crate::config::{ModelConfig, ProviderConfig};
use crate::error::{GatewayError, GatewayResult};
use crate::health::{HealthState, ModelHealth};
use crate::vendor::{ClientFactory, VendorTable};

/// Outcome of initializing one model
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelInit {
    /// Model name
    pub model: String,
    /// `Ok` if the warm-up probe succeeded
    pub result: Result<(), GatewayError>,
}

/// Per-model initialization outcomes, sorted by model name
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InitReport {
    /// Outcomes
    pub models: Vec<ModelInit>,
}

impl InitReport {
    /// Models that initialized
    pub fn succeeded(&self) -> Vec<&str> {
        self.models
            .iter()
            .filter(|m| m.result.is_ok())
            .map(|m| m.model.as_str())
            .collect()
    }

    /// Models that failed, with their errors
    pub fn failed(&self) -> Vec<(&str, &GatewayError)> {
        self.models
            .iter()
            .filter_map(|m| m.result.as_ref().err().map(|e| (m.model.as_str(), e)))
            .collect()
    }

    /// Whether every model initialized
    pub fn is_complete(&self) -> bool {
        self.models.iter().all(|m| m.result.is_ok())
    }
}

/// One close failure
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseFailure {
    /// Vendor of the Client
    pub vendor: String,
    /// Model of the Client
    pub model: String,
    /// What went wrong
    pub error: GatewayError,
}

/// Group of Clients for one vendor
pub struct Provider {
    vendor: String,
    factory: Option<ClientFactory>,
    clients: DashMap<String, Arc<dyn LlmClient>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("vendor", &self.vendor)
            .field("models", &self.model_names())
            .finish()
    }
}

impl Provider {
    /// Provider whose models are built by `factory`
    pub fn new(vendor: impl Into<String>, factory: ClientFactory) -> Self {
        Self {
            vendor: vendor.into(),
            factory: Some(factory),
            clients: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Provider that only accepts prebuilt Clients
    pub fn empty(vendor: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
            factory: None,
            clients: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Build a Provider and register every configured model
    pub fn from_config(
        vendor: &str,
        config: &ProviderConfig,
        table: &VendorTable,
    ) -> GatewayResult<Self> {
        let provider = Self::new(vendor, table.get(config.dialect(vendor))?);
        for (model, model_config) in &config.models {
            provider.register_model(model, model_config)?;
        }
        Ok(provider)
    }

    /// Vendor name
    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    /// Build and register a Client for `model`
    pub fn register_model(&self, model: &str, config: &ModelConfig) -> GatewayResult<()> {
        if self.clients.contains_key(model) {
            return Err(self.duplicate(model));
        }
        let factory = self.factory.as_ref().ok_or_else(|| {
            GatewayError::Configuration(format!(
                "provider '{}' has no client constructor",
                self.vendor
            ))
        })?;
        let client = factory(&self.vendor, model, config)?;
        self.register_client(model, client)
    }

    /// Register an already built Client under `model`
    pub fn register_client(&self, model: &str, client: Arc<dyn LlmClient>) -> GatewayResult<()> {
        // checked while the entry holds its shard lock, so close_all either
        // sees the new client or the registration sees the flag
        match self.clients.entry(model.to_string()) {
            _ if self.closed.load(Ordering::Acquire) => {
                Err(GatewayError::Closed(format!("provider {}", self.vendor)))
            }
            Entry::Occupied(_) => Err(self.duplicate(model)),
            Entry::Vacant(slot) => {
                slot.insert(client);
                tracing::info!(vendor = %self.vendor, model = %model, "Registered model");
                Ok(())
            }
        }
    }

    fn duplicate(&self, model: &str) -> GatewayError {
        GatewayError::Configuration(format!(
            "model '{model}' is already registered for vendor '{}'",
            self.vendor
        ))
    }

    fn snapshot(&self) -> Vec<(String, Arc<dyn LlmClient>)> {
        let mut clients: Vec<_> = self
            .clients
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        clients.sort_by(|a, b| a.0.cmp(&b.0));
        clients
    }

    /// Warm up every Client concurrently. Failing models are marked
    /// unavailable; the rest stay usable.
    pub async fn initialize_all(&self) -> InitReport {
        let clients = self.snapshot();
        let probes = clients.iter().map(|(model, client)| async move {
            let state = client.health_check().await;
            let result = if state == HealthState::Healthy {
                Ok(())
            } else {
                Err(GatewayError::transport(format!(
                    "{}/{model} failed its warm-up health probe",
                    self.vendor
                )))
            };
            ModelInit {
                model: model.clone(),
                result,
            }
        });
        let report = InitReport {
            models: join_all(probes).await,
        };

        for (model, err) in report.failed() {
            tracing::warn!(vendor = %self.vendor, model = %model, error = %err, "Model failed to initialize");
        }
        tracing::info!(
            vendor = %self.vendor,
            ready = report.succeeded().len(),
            total = report.models.len(),
            "Provider initialized"
        );
        report
    }

    /// Client for `model`, unless absent or marked unavailable
    pub fn get_client(&self, model: &str) -> GatewayResult<Arc<dyn LlmClient>> {
        let not_found = || GatewayError::ModelNotFound {
            vendor: self.vendor.clone(),
            model: model.to_string(),
        };
        if self.closed.load(Ordering::Acquire) {
            return Err(GatewayError::Closed(format!("provider {}", self.vendor)));
        }
        let client = self
            .clients
            .get(model)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(not_found)?;
        if client.health_state().is_available() {
            Ok(client)
        } else {
            Err(not_found())
        }
    }

    /// Last known availability; no probe. Unknown models are unavailable.
    pub fn is_available(&self, model: &str) -> bool {
        self.clients
            .get(model)
            .is_some_and(|entry| entry.value().health_state().is_available())
    }

    /// Registered model names, sorted
    pub fn model_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Models currently available, sorted
    pub fn available_models(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter(|(_, client)| client.health_state().is_available())
            .map(|(model, _)| model)
            .collect()
    }

    /// Probe every Client concurrently
    pub async fn health_check(&self) -> GatewayResult<ModelHealth> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GatewayError::Closed(format!("provider {}", self.vendor)));
        }
        let clients = self.snapshot();
        let states = join_all(clients.iter().map(|(_, client)| client.health_check())).await;
        Ok(clients
            .into_iter()
            .map(|(model, _)| model)
            .zip(states)
            .collect::<BTreeMap<_, _>>())
    }

    /// Close every Client, continuing past failures. Returns the number of
    /// Clients actually closed by this call and every failure.
    pub async fn close_all(&self) -> (usize, Vec<CloseFailure>) {
        self.closed.store(true, Ordering::Release);
        let mut closed = 0;
        let mut failures = Vec::new();
        for (model, client) in self.snapshot() {
            match client.close().await {
                Ok(true) => closed += 1,
                Ok(false) => {}
                Err(error) => {
                    tracing::warn!(vendor = %self.vendor, model = %model, error = %error, "Failed to close client");
                    failures.push(CloseFailure {
                        vendor: self.vendor.clone(),
                        model,
                        error,
                    });
                }
            }
        }
        (closed, failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockClient;
    use pretty_assertions::assert_eq;

    fn provider_with(models: &[(&str, &Arc<MockClient>)]) -> Provider {
        let provider = Provider::empty("openai");
        for (name, client) in models {
            let client: Arc<MockClient> = Arc::clone(client);
            provider.register_client(name, client).unwrap();
        }
        provider
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let provider = provider_with(&[("gpt-4", &MockClient::new("openai", "gpt-4").shared())]);
        let err = provider
            .register_client("gpt-4", MockClient::new("openai", "gpt-4").shared())
            .unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));

        let err = provider
            .register_model("gpt-4", &ModelConfig::new())
            .unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
    }

    #[test]
    fn test_from_config_uses_dialect_constructor() {
        let config = ProviderConfig::default()
            .with_model("deepseek-chat", ModelConfig::new())
            .with_model("deepseek-coder", ModelConfig::new());
        let provider = Provider::from_config("deepseek", &config, &VendorTable::builtin()).unwrap();
        assert_eq!(provider.model_names(), vec!["deepseek-chat", "deepseek-coder"]);
        assert_eq!(provider.get_client("deepseek-chat").unwrap().vendor(), "deepseek");

        let unknown = ProviderConfig {
            kind: Some("nope".into()),
            ..ProviderConfig::default()
        };
        assert!(Provider::from_config("x", &unknown, &VendorTable::builtin()).is_err());
    }

    #[tokio::test]
    async fn test_initialize_all_tolerates_partial_failure() {
        let good = MockClient::new("openai", "gpt-3.5-turbo").shared();
        let bad = MockClient::new("openai", "gpt-4")
            .with_probe(HealthState::Unhealthy)
            .shared();
        let provider = provider_with(&[("gpt-3.5-turbo", &good), ("gpt-4", &bad)]);

        let report = provider.initialize_all().await;
        assert_eq!(report.succeeded(), vec!["gpt-3.5-turbo"]);
        assert_eq!(report.failed().len(), 1);
        assert!(!report.is_complete());

        assert!(provider.is_available("gpt-3.5-turbo"));
        assert!(!provider.is_available("gpt-4"));
        assert!(matches!(
            provider.get_client("gpt-4"),
            Err(GatewayError::ModelNotFound { .. })
        ));
        assert_eq!(provider.available_models(), vec!["gpt-3.5-turbo"]);
    }

    #[test]
    fn test_unknown_model() {
        let provider = Provider::empty("openai");
        assert!(!provider.is_available("gpt-4"));
        assert!(matches!(
            provider.get_client("gpt-4"),
            Err(GatewayError::ModelNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_health_check_and_close() {
        let a = MockClient::new("openai", "a").shared();
        let b = MockClient::new("openai", "b")
            .with_probe(HealthState::Unhealthy)
            .with_close_error(GatewayError::transport("socket busy"))
            .shared();
        let provider = provider_with(&[("a", &a), ("b", &b)]);

        let health = provider.health_check().await.unwrap();
        assert_eq!(health["a"], HealthState::Healthy);
        assert_eq!(health["b"], HealthState::Unhealthy);

        let (closed, failures) = provider.close_all().await;
        assert_eq!(closed, 1);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].model, "b");
        assert_eq!(a.close_calls(), 1);

        let (closed_again, _) = provider.close_all().await;
        assert_eq!(closed_again, 0);
        assert!(provider.health_check().await.is_err());
        assert!(matches!(provider.get_client("a"), Err(GatewayError::Closed(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_registration_racing_close_is_never_left_open() {
        for _ in 0..50 {
            let provider = Arc::new(Provider::empty("openai"));
            let clients: Vec<Arc<MockClient>> = (0..8)
                .map(|i| MockClient::new("openai", &format!("m{i}")).shared())
                .collect();

            let registrations: Vec<_> = clients
                .iter()
                .enumerate()
                .map(|(i, client)| {
                    let provider = Arc::clone(&provider);
                    let client: Arc<MockClient> = Arc::clone(client);
                    tokio::spawn(async move { provider.register_client(&format!("m{i}"), client) })
                })
                .collect();
            provider.close_all().await;

            for (registration, client) in registrations.into_iter().zip(&clients) {
                match registration.await.unwrap() {
                    Ok(()) => assert_eq!(client.close_calls(), 1),
                    Err(e) => {
                        assert!(matches!(e, GatewayError::Closed(_)));
                        assert_eq!(client.close_calls(), 0);
                    }
                }
            }
        }
    }

    #[tokio::test]
    async fn test_register_after_close_rejected() {
        let provider = Provider::empty("openai");
        provider.close_all().await;
        let err = provider
            .register_client("gpt-4", MockClient::new("openai", "gpt-4").shared())
            .unwrap_err();
        assert!(matches!(err, GatewayError::Closed(_)));
    }
}
