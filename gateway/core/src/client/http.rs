//! HTTP Client
//!
//! The built-in [`LlmClient`]: one `reqwest` pool, one [`ConcurrencyLimiter`]
//! and one [`RetryPolicy`] per (vendor, model), with vendor wire formats
//! supplied by a [`Dialect`].
//!
//! # Call lifecycle
//!
//! ```text
//! check request -> acquire permit -> attempt -> (retryable? backoff, attempt again)
//!                  (Capacity on timeout)         (permit held until the call ends)
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use super::limiter::StatsAtomic;
use super::{CallPermit, ClientStats, ConcurrencyLimiter, LimiterError, LlmClient, RetryPolicy};
use crate::config::ModelConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::health::{HealthCell, HealthState};
use crate::streaming::sse::payloads;
use crate::streaming::{EventStream, StreamOrigin, StreamSequencer};
use crate::types::{ChatCompletionRequest, ChatCompletionResponse};
use crate::vendor::{Dialect, Target};

/// Connect timeout ceiling; the per-attempt timeout still applies on top
const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for one (vendor, model) over HTTP
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<Inner>,
}

struct Inner {
    vendor: String,
    model: String,
    config: ModelConfig,
    target: Target,
    dialect: Arc<dyn Dialect>,
    http: RwLock<Option<reqwest::Client>>,
    limiter: ConcurrencyLimiter,
    retry: RetryPolicy,
    health: HealthCell,
    closed: AtomicBool,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("vendor", &self.inner.vendor)
            .field("model", &self.inner.model)
            .field("dialect", &self.inner.dialect.name())
            .field("target", &self.inner.target)
            .finish()
    }
}

impl HttpClient {
    /// Build a Client. Fails on an invalid config or if the HTTP pool cannot
    /// be created.
    pub fn new(
        vendor: impl Into<String>,
        model: impl Into<String>,
        config: ModelConfig,
        dialect: Arc<dyn Dialect>,
    ) -> GatewayResult<Self> {
        let vendor = vendor.into();
        let model = model.into();
        config.validate(&vendor, &model)?;

        let http = reqwest::Client::builder()
            .connect_timeout(config.timeout().min(MAX_CONNECT_TIMEOUT))
            .pool_max_idle_per_host(config.max_concurrent_calls)
            .build()
            .map_err(|e| {
                GatewayError::Configuration(format!(
                    "{vendor}/{model}: failed to build HTTP client: {e}"
                ))
            })?;

        let target = Target::resolve(dialect.as_ref(), &model, &config);
        if target.credential.is_none() && config.api_key_env.is_some() {
            tracing::warn!(
                vendor = %vendor,
                model = %model,
                "Credential variable is unset; requests will be sent without a key"
            );
        }

        tracing::debug!(
            vendor = %vendor,
            model = %model,
            base_url = %target.base_url,
            max_concurrent_calls = config.max_concurrent_calls,
            "Created HTTP client"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                limiter: ConcurrencyLimiter::new(config.max_concurrent_calls),
                retry: RetryPolicy::from_model_config(&config),
                vendor,
                model,
                target,
                dialect,
                config,
                http: RwLock::new(Some(http)),
                health: HealthCell::new(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Settings this Client was built from
    pub fn config(&self) -> &ModelConfig {
        &self.inner.config
    }

    /// Resolved endpoint
    pub fn target(&self) -> &Target {
        &self.inner.target
    }

    /// Whether [`LlmClient::close`] has run
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl Inner {
    fn stats(&self) -> &StatsAtomic {
        self.limiter.stats()
    }

    fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    fn timeout_error(&self) -> GatewayError {
        GatewayError::Timeout {
            vendor: self.vendor.clone(),
            model: self.model.clone(),
            timeout_ms: u64::try_from(self.timeout().as_millis()).unwrap_or(u64::MAX),
        }
    }

    fn closed_error(&self) -> GatewayError {
        GatewayError::Closed(format!("client {}/{}", self.vendor, self.model))
    }

    fn http(&self) -> GatewayResult<reqwest::Client> {
        self.http.read().clone().ok_or_else(|| self.closed_error())
    }

    fn check_request(&self, request: &ChatCompletionRequest) -> GatewayResult<()> {
        if request.model != self.model {
            return Err(GatewayError::InvalidRequest(format!(
                "request model '{}' does not match client model '{}/{}'",
                request.model, self.vendor, self.model
            )));
        }
        request.validate()
    }

    async fn acquire(&self) -> GatewayResult<CallPermit> {
        if self.closed.load(Ordering::Acquire) {
            return Err(self.closed_error());
        }
        match self.limiter.acquire(self.timeout()).await {
            Ok(permit) => Ok(permit),
            Err(LimiterError::Timeout) => {
                tracing::warn!(
                    vendor = %self.vendor,
                    model = %self.model,
                    capacity = self.limiter.capacity(),
                    "No concurrency permit within timeout"
                );
                Err(GatewayError::Capacity {
                    vendor: self.vendor.clone(),
                    model: self.model.clone(),
                    waited_ms: u64::try_from(self.timeout().as_millis()).unwrap_or(u64::MAX),
                })
            }
            Err(LimiterError::Closed) => Err(self.closed_error()),
        }
    }

    fn map_send_error(&self, err: &reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            self.timeout_error()
        } else {
            GatewayError::transport(format!("{}: {err}", self.vendor))
        }
    }

    async fn check_status(&self, response: reqwest::Response) -> GatewayResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(GatewayError::from_status(&self.vendor, status.as_u16(), body))
    }

    /// Run `op` up to `max_attempts` times while it fails retryably
    async fn with_retry<T, F, Fut>(&self, mut op: F) -> GatewayResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < self.retry.max_attempts() => {
                    let delay = self.retry.backoff_for_attempt(attempt);
                    tracing::warn!(
                        vendor = %self.vendor,
                        model = %self.model,
                        attempt = attempt + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Upstream call failed, retrying"
                    );
                    self.stats().record_retry();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt_complete(
        &self,
        request: &ChatCompletionRequest,
    ) -> GatewayResult<ChatCompletionResponse> {
        let http = self.http()?;
        let exchange = async {
            let response = self
                .dialect
                .chat_request(&http, &self.target, request, false)
                .send()
                .await
                .map_err(|e| self.map_send_error(&e))?;
            let response = self.check_status(response).await?;
            let body = response
                .bytes()
                .await
                .map_err(|e| self.map_send_error(&e))?;
            self.dialect.parse_response(&body, &self.model)
        };
        tokio::time::timeout(self.timeout(), exchange)
            .await
            .map_err(|_| self.timeout_error())?
    }

    async fn open_stream(&self, request: &ChatCompletionRequest) -> GatewayResult<reqwest::Response> {
        let http = self.http()?;
        let open = async {
            let response = self
                .dialect
                .chat_request(&http, &self.target, request, true)
                .send()
                .await
                .map_err(|e| self.map_send_error(&e))?;
            self.check_status(response).await
        };
        tokio::time::timeout(self.timeout(), open)
            .await
            .map_err(|_| self.timeout_error())?
    }

    fn record<T>(&self, result: &GatewayResult<T>) {
        match result {
            Ok(_) => self.stats().record_success(),
            Err(e) => {
                self.stats().record_failure();
                tracing::debug!(vendor = %self.vendor, model = %self.model, error = %e, "Call failed");
            }
        }
    }
}

/// Outcome of waiting for the next upstream payload
enum Next {
    Payload(String),
    End,
    Failed(GatewayError),
}

#[async_trait]
impl LlmClient for HttpClient {
    fn vendor(&self) -> &str {
        &self.inner.vendor
    }

    fn model(&self) -> &str {
        &self.inner.model
    }

    async fn complete(
        &self,
        request: &ChatCompletionRequest,
    ) -> GatewayResult<ChatCompletionResponse> {
        let inner = &self.inner;
        let result = async {
            inner.check_request(request)?;
            let _permit = inner.acquire().await?;
            inner.with_retry(|| inner.attempt_complete(request)).await
        }
        .await;
        inner.record(&result);
        result
    }

    fn complete_stream(
        &self,
        request: ChatCompletionRequest,
        cancel: CancellationToken,
    ) -> EventStream {
        let inner = Arc::clone(&self.inner);
        Box::pin(async_stream::stream! {
            let mut seq = StreamSequencer::new(
                inner.model.clone(),
                StreamOrigin::from_messages(&request.messages),
            );
            yield seq.start();

            let opened = async {
                inner.check_request(&request)?;
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => Err(GatewayError::Cancelled),
                    opened = async {
                        let permit = inner.acquire().await?;
                        let response = inner.with_retry(|| inner.open_stream(&request)).await?;
                        Ok::<_, GatewayError>((permit, response))
                    } => opened,
                }
            }
            .await;

            let (_permit, response) = match opened {
                Ok(opened) => opened,
                Err(e) => {
                    inner.record::<()>(&Err(e.clone()));
                    yield seq.error(&e);
                    return;
                }
            };

            let mut body = payloads(inner.dialect.framing(), response.bytes_stream());
            let mut finish_reason: Option<String> = None;
            let mut completed = false;

            loop {
                let next = tokio::select! {
                    biased;
                    () = cancel.cancelled() => Next::Failed(GatewayError::Cancelled),
                    item = tokio::time::timeout(inner.timeout(), body.next()) => match item {
                        Err(_) => Next::Failed(inner.timeout_error()),
                        Ok(None) => Next::End,
                        Ok(Some(Err(e))) => Next::Failed(e),
                        Ok(Some(Ok(payload))) => Next::Payload(payload),
                    },
                };

                let payload = match next {
                    Next::Payload(payload) => payload,
                    Next::End => break,
                    Next::Failed(e) => {
                        inner.record::<()>(&Err(e.clone()));
                        yield seq.error(&e);
                        return;
                    }
                };

                let delta = match inner.dialect.parse_chunk(&payload) {
                    Ok(delta) => delta,
                    Err(e) => {
                        inner.record::<()>(&Err(e.clone()));
                        yield seq.error(&e);
                        return;
                    }
                };

                if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                    yield seq.content(&text);
                }
                if let Some(reason) = delta.finish_reason {
                    finish_reason = Some(reason);
                    completed = true;
                }
                if delta.done {
                    completed = true;
                    break;
                }
            }

            if !completed {
                let e = GatewayError::transport(format!(
                    "{} closed the stream before completion",
                    inner.vendor
                ));
                inner.record::<()>(&Err(e.clone()));
                yield seq.error(&e);
                return;
            }

            inner.record::<()>(&Ok(()));
            yield seq.finish(finish_reason.as_deref().unwrap_or("stop"));
            yield seq.done();
        })
    }

    async fn health_check(&self) -> HealthState {
        let inner = &self.inner;
        let state = match inner.http() {
            Err(_) => HealthState::Unhealthy,
            Ok(http) => {
                let probe = inner
                    .dialect
                    .health_request(&http, &inner.target)
                    .timeout(inner.timeout())
                    .send()
                    .await;
                match probe {
                    Ok(response) if response.status().is_success() => HealthState::Healthy,
                    Ok(response) => {
                        tracing::warn!(
                            vendor = %inner.vendor,
                            model = %inner.model,
                            status = response.status().as_u16(),
                            "Health probe rejected"
                        );
                        HealthState::Unhealthy
                    }
                    Err(e) => {
                        tracing::warn!(
                            vendor = %inner.vendor,
                            model = %inner.model,
                            error = %e,
                            "Health probe failed"
                        );
                        HealthState::Unhealthy
                    }
                }
            }
        };
        inner.health.set(state);
        state
    }

    fn health_state(&self) -> HealthState {
        self.inner.health.get()
    }

    fn stats(&self) -> ClientStats {
        self.inner.limiter.snapshot()
    }

    async fn close(&self) -> GatewayResult<bool> {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        inner.limiter.close();
        inner.http.write().take();
        tracing::info!(vendor = %inner.vendor, model = %inner.model, "Closed client");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;
    use crate::vendor::OpenAiDialect;

    fn client(config: ModelConfig) -> HttpClient {
        HttpClient::new(
            "openai",
            "gpt-3.5-turbo",
            config.with_base_url("http://127.0.0.1:9/v1"),
            Arc::new(OpenAiDialect::openai()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_model_mismatch_is_rejected_before_any_call() {
        let client = client(ModelConfig::new());
        let request = ChatCompletionRequest::new("gpt-4", vec![Message::user("hi")]);
        let err = client.complete(&request).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
        assert!(!err.is_candidate_skippable());
        assert_eq!(client.stats().retries, 0);
        assert_eq!(client.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_construction() {
        let result = HttpClient::new(
            "openai",
            "gpt-3.5-turbo",
            ModelConfig::new().with_max_concurrent_calls(0),
            Arc::new(OpenAiDialect::openai()),
        );
        assert!(matches!(result, Err(GatewayError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_calls() {
        let client = client(ModelConfig::new());
        assert!(client.close().await.unwrap());
        assert!(!client.close().await.unwrap());
        assert!(client.is_closed());

        let request = ChatCompletionRequest::new("gpt-3.5-turbo", vec![Message::user("hi")]);
        let err = client.complete(&request).await.unwrap_err();
        assert!(matches!(err, GatewayError::Closed(_)));
        assert_eq!(client.health_check().await, HealthState::Unhealthy);
    }

    #[tokio::test]
    async fn test_stream_reports_mismatch_as_error_event() {
        let client = client(ModelConfig::new());
        let request = ChatCompletionRequest::new("other", vec![Message::user("hi")]);
        let events: Vec<_> = client
            .complete_stream(request, CancellationToken::new())
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), "start");
        assert!(matches!(
            events[1].cause(),
            Some(GatewayError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_connection_refused_is_retryable_and_retried() {
        let client = client(
            ModelConfig::new()
                .with_max_retries(2)
                .with_backoff(1, 5)
                .with_timeout(Duration::from_secs(2)),
        );
        let request = ChatCompletionRequest::new("gpt-3.5-turbo", vec![Message::user("hi")]);
        let err = client.complete(&request).await.unwrap_err();
        assert!(err.is_candidate_skippable(), "{err}");
        assert_eq!(client.stats().retries, 2);
        assert_eq!(client.stats().in_flight, 0);
    }
}
