//! Client Layer
//!
//! A Client is the transport-level handler for exactly one (vendor, model)
//! pair. It owns one HTTP connection pool and one concurrency limiter, and it
//! retries transient failures with exponential backoff.
//!
//! Every Client implements [`LlmClient`]. The built-in implementation is
//! [`HttpClient`], which delegates vendor wire formats to a
//! [`Dialect`](crate::vendor::Dialect).

mod http;
mod limiter;
mod retry;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::GatewayResult;
use crate::health::HealthState;
use crate::streaming::EventStream;
use crate::types::{ChatCompletionRequest, ChatCompletionResponse};

pub use http::HttpClient;
pub use limiter::{CallPermit, ClientStats, ConcurrencyLimiter, LimiterError};
pub use retry::RetryPolicy;

/// Capability interface of a Client
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Vendor this Client talks to
    fn vendor(&self) -> &str;

    /// Model this Client is bound to
    fn model(&self) -> &str;

    /// One complete response, or an error. Never partial content.
    async fn complete(&self, request: &ChatCompletionRequest)
        -> GatewayResult<ChatCompletionResponse>;

    /// Lazy stream of events: `start`, `content`*, then `finish` + `done` or
    /// `error`. Checks `cancel` between chunks.
    fn complete_stream(
        &self,
        request: ChatCompletionRequest,
        cancel: CancellationToken,
    ) -> EventStream;

    /// Probe the vendor endpoint and record the result
    async fn health_check(&self) -> HealthState;

    /// Last recorded health, without probing
    fn health_state(&self) -> HealthState;

    /// Call counters
    fn stats(&self) -> ClientStats;

    /// Release the connection pool. Returns `false` if already closed.
    async fn close(&self) -> GatewayResult<bool>;
}
