//! TOML Configuration File Support
//!
//! Gateway configuration lives in a TOML file at
//! `~/.config/llm-gateway/gateway.toml` (XDG config dir) unless a path is
//! given explicitly.
//!
//! # Configuration Priority
//!
//! Values are loaded with the following priority (highest first):
//! 1. Environment variables
//! 2. TOML configuration file
//! 3. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! enabled_vendors = ["openai", "deepseek"]
//! default_candidates = ["openai/gpt-3.5-turbo", "deepseek/deepseek-chat"]
//!
//! [auth]
//! token = "change-me"
//!
//! [vendors.openai.models."gpt-3.5-turbo"]
//! api_key_env = "OPENAI_API_KEY"
//! timeout_secs = 30
//! max_retries = 3
//! max_concurrent_calls = 10
//!
//! [vendors.deepseek.models."deepseek-chat"]
//! api_key_env = "DEEPSEEK_API_KEY"
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::GatewayError;
use crate::types::Candidate;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for GatewayError {
    fn from(err: ConfigError) -> Self {
        GatewayError::Configuration(err.to_string())
    }
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where the effective configuration came from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// At least one value came from an environment variable
    Env,
    /// Values from the TOML configuration file
    File,
    /// Defaults only
    #[default]
    Default,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Model Configuration
// =============================================================================

/// Longest accepted per-attempt timeout (one day)
pub const MAX_TIMEOUT_SECS: f64 = 86_400.0;

/// Vendor-agnostic settings for one model. Immutable once a Client is built.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Literal credential
    pub api_key: Option<String>,
    /// Environment variable holding the credential
    pub api_key_env: Option<String>,
    /// Base endpoint; the dialect default is used when absent
    pub base_url: Option<String>,
    /// Vendor-side model id when it differs from the registered name
    pub upstream_model: Option<String>,
    /// Per-attempt timeout in seconds, also the permit wait bound
    pub timeout_secs: f64,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Concurrent in-flight calls allowed on the Client
    pub max_concurrent_calls: usize,
    /// First backoff delay in milliseconds
    pub backoff_base_ms: u64,
    /// Backoff ceiling in milliseconds
    pub max_backoff_ms: u64,
    /// Randomize backoff delays
    pub jitter: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: None,
            base_url: None,
            upstream_model: None,
            timeout_secs: 30.0,
            max_retries: 3,
            max_concurrent_calls: 10,
            backoff_base_ms: 1_000,
            max_backoff_ms: 30_000,
            jitter: true,
        }
    }
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_key_env", &self.api_key_env)
            .field("base_url", &self.base_url)
            .field("upstream_model", &self.upstream_model)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("max_concurrent_calls", &self.max_concurrent_calls)
            .field("backoff_base_ms", &self.backoff_base_ms)
            .field("max_backoff_ms", &self.max_backoff_ms)
            .field("jitter", &self.jitter)
            .finish()
    }
}

impl ModelConfig {
    /// Defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a literal credential
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the base endpoint
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the per-attempt timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs_f64();
        self
    }

    /// Set the retry count
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the concurrency cap
    #[must_use]
    pub fn with_max_concurrent_calls(mut self, calls: usize) -> Self {
        self.max_concurrent_calls = calls;
        self
    }

    /// Set backoff base and ceiling, in milliseconds
    #[must_use]
    pub fn with_backoff(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.backoff_base_ms = base_ms;
        self.max_backoff_ms = max_ms;
        self
    }

    /// Enable or disable jitter
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Per-attempt timeout, clamped to `0..=MAX_TIMEOUT_SECS`
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs.clamp(0.0, MAX_TIMEOUT_SECS))
            .unwrap_or(Duration::ZERO)
    }

    /// Resolve the credential: literal first, then the named variable
    pub fn credential(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.api_key_env
                .as_ref()
                .and_then(|var| std::env::var(var).ok())
                .filter(|v| !v.is_empty())
        })
    }

    /// Check values that would make a Client unusable
    pub fn validate(&self, vendor: &str, model: &str) -> Result<(), ConfigError> {
        if !self.timeout_secs.is_finite() || self.timeout_secs <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "{vendor}/{model}: timeout_secs must be positive"
            )));
        }
        if self.timeout_secs > MAX_TIMEOUT_SECS {
            return Err(ConfigError::ValidationError(format!(
                "{vendor}/{model}: timeout_secs exceeds {MAX_TIMEOUT_SECS}"
            )));
        }
        if self.max_concurrent_calls == 0 {
            return Err(ConfigError::ValidationError(format!(
                "{vendor}/{model}: max_concurrent_calls must be at least 1"
            )));
        }
        if self.max_backoff_ms < self.backoff_base_ms {
            return Err(ConfigError::ValidationError(format!(
                "{vendor}/{model}: max_backoff_ms is below backoff_base_ms"
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Provider / Gateway Configuration
// =============================================================================

/// Models of one vendor
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Dialect name; defaults to the vendor name
    pub kind: Option<String>,
    /// Model name -> settings
    pub models: BTreeMap<String, ModelConfig>,
}

impl ProviderConfig {
    /// Add a model
    #[must_use]
    pub fn with_model(mut self, name: impl Into<String>, config: ModelConfig) -> Self {
        self.models.insert(name.into(), config);
        self
    }

    /// Dialect used for this vendor
    pub fn dialect<'a>(&'a self, vendor: &'a str) -> &'a str {
        self.kind.as_deref().unwrap_or(vendor)
    }
}

/// Front-end authentication settings
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Token callers must present
    pub token: Option<String>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Complete gateway configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Vendors to build. Empty means every configured vendor.
    pub enabled_vendors: Vec<String>,
    /// Default failover order, as `vendor/model`
    pub default_candidates: Vec<String>,
    /// Front-end authentication
    pub auth: AuthConfig,
    /// Vendor name -> models
    pub vendors: BTreeMap<String, ProviderConfig>,
    /// Where the configuration came from
    #[serde(skip)]
    pub source: ConfigSource,
}

impl GatewayConfig {
    /// Add or replace a vendor
    #[must_use]
    pub fn with_vendor(mut self, name: impl Into<String>, provider: ProviderConfig) -> Self {
        self.vendors.insert(name.into(), provider);
        self
    }

    /// Whether a vendor is enabled
    pub fn is_enabled(&self, vendor: &str) -> bool {
        self.enabled_vendors.is_empty() || self.enabled_vendors.iter().any(|v| v == vendor)
    }

    /// Enabled vendors with their settings
    pub fn enabled(&self) -> impl Iterator<Item = (&String, &ProviderConfig)> {
        self.vendors
            .iter()
            .filter(move |(name, _)| self.is_enabled(name))
    }

    /// Parsed default candidate list
    pub fn candidates(&self) -> Result<Vec<Candidate>, ConfigError> {
        self.default_candidates
            .iter()
            .map(|raw| {
                raw.parse::<Candidate>()
                    .map_err(|e| ConfigError::ValidationError(e.to_string()))
            })
            .collect()
    }

    /// Cross-check vendors, models and candidates
    pub fn validate(&self) -> Result<(), ConfigError> {
        for vendor in &self.enabled_vendors {
            if !self.vendors.contains_key(vendor) {
                return Err(ConfigError::ValidationError(format!(
                    "enabled vendor '{vendor}' has no [vendors.{vendor}] section"
                )));
            }
        }

        for (vendor, provider) in self.enabled() {
            for (model, config) in &provider.models {
                config.validate(vendor, model)?;
            }
        }

        for candidate in self.candidates()? {
            if !self.is_enabled(&candidate.vendor) {
                return Err(ConfigError::ValidationError(format!(
                    "default candidate {candidate} names a vendor that is not enabled"
                )));
            }
            let Some(provider) = self.vendors.get(&candidate.vendor) else {
                return Err(ConfigError::ValidationError(format!(
                    "default candidate {candidate} names an unconfigured vendor"
                )));
            };
            if !provider.models.contains_key(&candidate.model) {
                return Err(ConfigError::ValidationError(format!(
                    "default candidate {candidate} names an unconfigured model"
                )));
            }
        }

        Ok(())
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Default config path: `$XDG_CONFIG_HOME/llm-gateway/gateway.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("llm-gateway").join("gateway.toml"))
}

/// Load configuration from the default path
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed, or if the
/// merged configuration is invalid.
pub fn load_config() -> Result<GatewayConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path, then apply environment overrides
///
/// A missing file is not an error; defaults are used instead.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if validation
/// fails.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<GatewayConfig, ConfigError> {
    let mut config = GatewayConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;
            config = toml::from_str(&toml_content)?;
            config.source = ConfigSource::File;
            tracing::info!(path = %config_path.display(), "Loaded configuration from file");
        } else {
            tracing::debug!(path = %config_path.display(), "No config file, using defaults");
        }
    }

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Apply `GATEWAY_*` overrides read through `lookup`
pub fn apply_env_overrides<F>(config: &mut GatewayConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(vendors) = lookup("GATEWAY_ENABLED_VENDORS") {
        config.enabled_vendors = split_list(&vendors);
        config.source = ConfigSource::Env;
    }
    if let Some(candidates) = lookup("GATEWAY_DEFAULT_CANDIDATES") {
        config.default_candidates = split_list(&candidates);
        config.source = ConfigSource::Env;
    }
    if let Some(token) = lookup("GATEWAY_TOKEN") {
        config.auth.token = Some(token);
        config.source = ConfigSource::Env;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const SAMPLE: &str = r#"
enabled_vendors = ["openai", "deepseek"]
default_candidates = ["openai/gpt-3.5-turbo", "deepseek/deepseek-chat"]

[auth]
token = "secret"

[vendors.openai.models."gpt-3.5-turbo"]
api_key = "sk-test"
timeout_secs = 12.5
max_retries = 1

[vendors.deepseek.models."deepseek-chat"]
api_key_env = "DEEPSEEK_API_KEY"
max_concurrent_calls = 2

[vendors.local]
kind = "ollama"
[vendors.local.models."llama3"]
base_url = "http://localhost:11434"
"#;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(SAMPLE);
        let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(config.source, ConfigSource::File);
        assert_eq!(config.enabled_vendors, vec!["openai", "deepseek"]);
        assert_eq!(config.auth.token.as_deref(), Some("secret"));

        let gpt = &config.vendors["openai"].models["gpt-3.5-turbo"];
        assert_eq!(gpt.timeout(), Duration::from_millis(12_500));
        assert_eq!(gpt.max_retries, 1);
        assert_eq!(gpt.max_concurrent_calls, 10);

        let ds = &config.vendors["deepseek"].models["deepseek-chat"];
        assert_eq!(ds.max_concurrent_calls, 2);
        assert_eq!(ds.max_retries, 3);

        assert_eq!(config.vendors["local"].dialect("local"), "ollama");
        assert_eq!(config.vendors["openai"].dialect("openai"), "openai");

        let enabled: Vec<&String> = config.enabled().map(|(name, _)| name).collect();
        assert_eq!(enabled, vec!["deepseek", "openai"]);

        assert_eq!(
            config.candidates().unwrap(),
            vec![
                Candidate::new("openai", "gpt-3.5-turbo"),
                Candidate::new("deepseek", "deepseek-chat"),
            ]
        );
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from_path(Some(dir.path().join("absent.toml"))).unwrap();
        assert!(config.vendors.is_empty());
        assert!(config.default_candidates.is_empty());
    }

    #[test]
    fn test_parse_error_is_reported() {
        let file = write_config("enabled_vendors = [");
        let err = load_config_from_path(Some(file.path().to_path_buf())).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_env_overrides_take_priority() {
        let mut config: GatewayConfig = toml::from_str(SAMPLE).unwrap();
        apply_env_overrides(&mut config, |key| match key {
            "GATEWAY_ENABLED_VENDORS" => Some("deepseek".to_string()),
            "GATEWAY_DEFAULT_CANDIDATES" => Some(" deepseek/deepseek-chat ,".to_string()),
            _ => None,
        });

        assert_eq!(config.source, ConfigSource::Env);
        assert_eq!(config.enabled_vendors, vec!["deepseek"]);
        assert_eq!(config.default_candidates, vec!["deepseek/deepseek-chat"]);
        assert_eq!(config.auth.token.as_deref(), Some("secret"));
        assert!(!config.is_enabled("openai"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        let base: GatewayConfig = toml::from_str(SAMPLE).unwrap();

        let mut disabled = base.clone();
        disabled.enabled_vendors = vec!["deepseek".into()];
        assert!(disabled.validate().is_err());

        let mut unknown_model = base.clone();
        unknown_model.default_candidates = vec!["openai/gpt-9".into()];
        assert!(unknown_model.validate().is_err());

        let mut zero_calls = base.clone();
        zero_calls
            .vendors
            .get_mut("openai")
            .unwrap()
            .models
            .get_mut("gpt-3.5-turbo")
            .unwrap()
            .max_concurrent_calls = 0;
        assert!(zero_calls.validate().is_err());

        let mut missing_section = base;
        missing_section.enabled_vendors.push("gemini".into());
        assert!(missing_section.validate().is_err());
    }

    #[test]
    fn test_huge_timeout_is_rejected_not_panicking() {
        let mut model = ModelConfig::new();
        model.timeout_secs = 1e20;
        assert!(model.validate("openai", "gpt-3.5-turbo").is_err());
        assert_eq!(model.timeout(), Duration::from_secs(86_400));

        model.timeout_secs = f64::NAN;
        assert!(model.validate("openai", "gpt-3.5-turbo").is_err());
        assert_eq!(model.timeout(), Duration::ZERO);

        model.timeout_secs = MAX_TIMEOUT_SECS;
        assert!(model.validate("openai", "gpt-3.5-turbo").is_ok());
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let config = ModelConfig::new().with_api_key("sk-very-secret");
        let text = format!("{config:?}");
        assert!(!text.contains("sk-very-secret"));
        assert!(text.contains("<redacted>"));
    }

    #[test]
    fn test_credential_prefers_literal() {
        let config = ModelConfig {
            api_key: Some("literal".into()),
            api_key_env: Some("GATEWAY_TEST_UNSET_VARIABLE".into()),
            ..ModelConfig::default()
        };
        assert_eq!(config.credential().as_deref(), Some("literal"));

        let env_only = ModelConfig {
            api_key_env: Some("GATEWAY_TEST_UNSET_VARIABLE".into()),
            ..ModelConfig::default()
        };
        assert_eq!(env_only.credential(), None);
    }
}
