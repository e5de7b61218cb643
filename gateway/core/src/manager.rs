//! Manager
//!
//! Registry of Providers keyed by vendor name. The owning application creates
//! one Manager, shares it as `Arc<Manager>`, and closes it at shutdown.
//!
//! Registration is write-once per key; lookups are read-mostly and return the
//! same `Arc` for a (vendor, model) key for the Manager's whole lifetime.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::client::LlmClient;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::health::{HealthReport, VendorHealth};
use crate::provider::{CloseFailure, InitReport, Provider};
use crate::vendor::VendorTable;

/// Result of [`Manager::close_all`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CloseReport {
    /// Clients closed by this call
    pub closed: usize,
    /// Every close failure, in vendor then model order
    pub failures: Vec<CloseFailure>,
}

impl CloseReport {
    /// Whether every close succeeded
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Registry of all Providers
#[derive(Debug, Default)]
pub struct Manager {
    providers: RwLock<BTreeMap<String, Arc<Provider>>>,
    closed: AtomicBool,
}

impl Manager {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// One Provider per enabled vendor, built through `table`
    pub fn from_config(config: &GatewayConfig, table: &VendorTable) -> GatewayResult<Self> {
        config.validate()?;
        let manager = Self::new();
        for (vendor, provider_config) in config.enabled() {
            let provider = Provider::from_config(vendor, provider_config, table)?;
            manager.register_provider(vendor, provider)?;
        }
        Ok(manager)
    }

    /// Register a Provider. Each vendor name can be registered once.
    pub fn register_provider(
        &self,
        vendor: &str,
        provider: Provider,
    ) -> GatewayResult<Arc<Provider>> {
        if provider.vendor() != vendor {
            return Err(GatewayError::Configuration(format!(
                "provider for '{}' registered under '{vendor}'",
                provider.vendor()
            )));
        }
        let mut providers = self.providers.write();
        if self.is_closed() {
            return Err(GatewayError::Closed("manager".to_string()));
        }
        if providers.contains_key(vendor) {
            return Err(GatewayError::Configuration(format!(
                "provider '{vendor}' is already registered"
            )));
        }
        let provider = Arc::new(provider);
        providers.insert(vendor.to_string(), Arc::clone(&provider));
        tracing::info!(vendor = %vendor, models = ?provider.model_names(), "Registered provider");
        Ok(provider)
    }

    /// Provider for a vendor
    pub fn provider(&self, vendor: &str) -> GatewayResult<Arc<Provider>> {
        self.providers
            .read()
            .get(vendor)
            .cloned()
            .ok_or_else(|| GatewayError::ProviderNotFound(vendor.to_string()))
    }

    /// Client for (vendor, model)
    pub fn get_client(&self, vendor: &str, model: &str) -> GatewayResult<Arc<dyn LlmClient>> {
        if self.is_closed() {
            return Err(GatewayError::Closed("manager".to_string()));
        }
        self.provider(vendor)?.get_client(model)
    }

    /// Client for the first vendor (by name) serving `model`
    pub fn get_client_by_model(&self, model: &str) -> GatewayResult<Arc<dyn LlmClient>> {
        let vendor = self.find_model(model).ok_or_else(|| GatewayError::ModelNotFound {
            vendor: "*".to_string(),
            model: model.to_string(),
        })?;
        self.get_client(&vendor, model)
    }

    /// First vendor (by name) with `model` available
    pub fn find_model(&self, model: &str) -> Option<String> {
        self.providers
            .read()
            .iter()
            .find(|(_, provider)| provider.is_available(model))
            .map(|(vendor, _)| vendor.clone())
    }

    /// Registered vendor names, sorted
    pub fn vendors(&self) -> Vec<String> {
        self.providers.read().keys().cloned().collect()
    }

    /// Available models of every vendor
    pub fn all_models(&self) -> BTreeMap<String, Vec<String>> {
        self.providers
            .read()
            .iter()
            .map(|(vendor, provider)| (vendor.clone(), provider.available_models()))
            .collect()
    }

    fn snapshot(&self) -> Vec<(String, Arc<Provider>)> {
        self.providers
            .read()
            .iter()
            .map(|(vendor, provider)| (vendor.clone(), Arc::clone(provider)))
            .collect()
    }

    /// Warm up every Provider
    pub async fn initialize_all(&self) -> BTreeMap<String, InitReport> {
        let mut reports = BTreeMap::new();
        for (vendor, provider) in self.snapshot() {
            reports.insert(vendor, provider.initialize_all().await);
        }
        reports
    }

    /// Probe every Provider concurrently. A failure (or panic) while
    /// checking one vendor is recorded in the report.
    pub async fn health_check(&self) -> HealthReport {
        let handles: Vec<_> = self
            .snapshot()
            .into_iter()
            .map(|(vendor, provider)| {
                let handle = tokio::spawn(async move { provider.health_check().await });
                (vendor, handle)
            })
            .collect();

        let mut report = HealthReport::new();
        for (vendor, handle) in handles {
            let health = match handle.await {
                Ok(Ok(models)) => VendorHealth::Checked(models),
                Ok(Err(e)) => VendorHealth::Failed(e.to_string()),
                Err(join_error) => VendorHealth::Failed(format!("health check aborted: {join_error}")),
            };
            if let VendorHealth::Failed(ref reason) = health {
                tracing::warn!(vendor = %vendor, reason = %reason, "Provider health check failed");
            }
            report.insert(vendor, health);
        }
        report
    }

    /// Close every Client of every Provider. Continues past failures and
    /// reports them all. A second call is a no-op.
    pub async fn close_all(&self) -> CloseReport {
        // flag flips under the write lock: a registration either lands in
        // the snapshot below or sees the flag
        let already_closed = {
            let _providers = self.providers.write();
            self.closed.swap(true, Ordering::AcqRel)
        };
        if already_closed {
            tracing::debug!("Manager already closed");
            return CloseReport::default();
        }

        let mut report = CloseReport::default();
        for (_, provider) in self.snapshot() {
            let (closed, failures) = provider.close_all().await;
            report.closed += closed;
            report.failures.extend(failures);
        }

        tracing::info!(
            closed = report.closed,
            failures = report.failures.len(),
            "Manager closed"
        );
        report
    }

    /// Whether [`close_all`](Self::close_all) has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
