//! Gateway Core - Multi-vendor LLM request routing
//!
//! Routes chat-completion requests to one of several LLM vendors through a
//! uniform interface, with per-model concurrency limits, timeouts, retries,
//! health probing and ordered failover between candidates. Streamed answers
//! are normalized into one event protocol and an SSE wire format.
//!
//! # Architecture
//!
//! ```text
//! caller
//!   │  ChatCompletionRequest + [Candidate]
//!   ▼
//! ┌────────────┐   ordered failover, stream commitment
//! │ Aggregator │
//! └─────┬──────┘
//!       │ get_client(vendor, model)
//! ┌─────▼──────┐   vendor name → Provider
//! │  Manager   │
//! └─────┬──────┘
//! ┌─────▼──────┐   model name → Client
//! │  Provider  │
//! └─────┬──────┘
//! ┌─────▼──────┐   permits, timeout, retry, health, wire dialect
//! │ HttpClient │ ──────────────► vendor HTTP API
//! └────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use gateway_core::{
//!     load_config, Aggregator, ChatCompletionRequest, Manager, Message, VendorTable,
//! };
//!
//! let config = load_config()?;
//! let manager = Arc::new(Manager::from_config(&config, &VendorTable::builtin())?);
//! manager.initialize_all().await;
//!
//! let aggregator = Aggregator::from_config(Arc::clone(&manager), &config)?;
//! let request = ChatCompletionRequest::any_model(vec![Message::user("Hello")]);
//! let response = aggregator.generate_default(&request).await?;
//! println!("{}: {:?}", response.model, response.content());
//!
//! manager.close_all().await;
//! ```
//!
//! # Module Overview
//!
//! - [`types`]: request, response and candidate types
//! - [`error`]: the [`GatewayError`] taxonomy and retry classes
//! - [`config`]: TOML configuration with environment overrides
//! - [`client`]: the [`LlmClient`] capability and the HTTP implementation
//! - [`vendor`]: per-vendor wire dialects and the vendor constructor table
//! - [`provider`]: Clients of one vendor
//! - [`manager`]: registry of Providers
//! - [`aggregator`]: candidate failover
//! - [`streaming`]: stream events and SSE encoding
//! - [`health`]: health states and reports
//! - [`auth`]: caller token check and result envelope

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod aggregator;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod manager;
pub mod provider;
pub mod streaming;
pub mod types;
pub mod vendor;

#[cfg(test)]
mod test_utils;

pub use aggregator::Aggregator;
pub use auth::{ApiResult, AuthRejection, TokenGuard};
pub use client::{ClientStats, HttpClient, LlmClient, RetryPolicy};
pub use config::{
    default_config_path, load_config, load_config_from_path, AuthConfig, ConfigError,
    ConfigSource, GatewayConfig, ModelConfig, ProviderConfig,
};
pub use error::{CandidateFailure, GatewayError, GatewayResult};
pub use health::{HealthReport, HealthState, VendorHealth};
pub use manager::{CloseReport, Manager};
pub use provider::{InitReport, Provider};
pub use streaming::{into_sse, EventStream, StreamEvent, StreamOrigin, DONE_SENTINEL};
pub use types::{
    Candidate, ChatCompletionRequest, ChatCompletionResponse, Choice, Message, Role, Usage,
};
pub use vendor::{ClientFactory, Dialect, VendorTable};
