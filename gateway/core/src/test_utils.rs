//! In-memory Client for unit tests
//!
//! [`MockClient`] plays back scripted outcomes in order; once the script runs
//! out every call succeeds with `"ok from <model>"`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::client::{ClientStats, LlmClient};
use crate::error::{GatewayError, GatewayResult};
use crate::health::{HealthCell, HealthState};
use crate::streaming::{EventStream, StreamOrigin, StreamSequencer};
use crate::types::{ChatCompletionRequest, ChatCompletionResponse, Choice, Message, Usage};

/// One scripted call outcome
#[derive(Clone, Debug)]
pub enum Script {
    /// Succeed with this text (streams emit it word by word)
    Respond(String),
    /// Fail before producing anything
    Fail(GatewayError),
    /// Stream these chunks, then fail
    FailAfter(Vec<String>, GatewayError),
    /// Stream these chunks, then never finish (until cancelled)
    Hang(Vec<String>),
}

/// Scripted [`LlmClient`]
pub struct MockClient {
    vendor: String,
    model: String,
    scripts: Mutex<VecDeque<Script>>,
    probe: HealthState,
    health: HealthCell,
    close_error: Option<GatewayError>,
    calls: AtomicUsize,
    close_calls: AtomicUsize,
}

impl MockClient {
    pub fn new(vendor: &str, model: &str) -> Self {
        Self {
            vendor: vendor.to_string(),
            model: model.to_string(),
            scripts: Mutex::new(VecDeque::new()),
            probe: HealthState::Healthy,
            health: HealthCell::new(),
            close_error: None,
            calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
        }
    }

    pub fn then(self, script: Script) -> Self {
        self.scripts.lock().push_back(script);
        self
    }

    pub fn with_probe(mut self, state: HealthState) -> Self {
        self.probe = state;
        self
    }

    pub fn with_close_error(mut self, error: GatewayError) -> Self {
        self.close_error = Some(error);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// complete + complete_stream invocations
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    fn next_script(&self) -> Script {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| Script::Respond(format!("ok from {}", self.model)))
    }

    fn response(&self, text: &str) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: format!("mock-{}", self.calls()),
            created: 0,
            model: self.model.clone(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(text),
                finish_reason: "stop".to_string(),
            }],
            usage: Usage::new(1, 1),
        }
    }
}

#[async_trait]
impl LlmClient for MockClient {
    fn vendor(&self) -> &str {
        &self.vendor
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        request: &ChatCompletionRequest,
    ) -> GatewayResult<ChatCompletionResponse> {
        if request.model != self.model {
            self.calls.fetch_add(1, Ordering::SeqCst);
            return Err(GatewayError::InvalidRequest(format!(
                "request model '{}' does not match '{}'",
                request.model, self.model
            )));
        }
        match self.next_script() {
            Script::Respond(text) => Ok(self.response(&text)),
            Script::Fail(e) | Script::FailAfter(_, e) => Err(e),
            Script::Hang(_) => std::future::pending().await,
        }
    }

    fn complete_stream(
        &self,
        request: ChatCompletionRequest,
        cancel: CancellationToken,
    ) -> EventStream {
        let script = if request.model == self.model {
            self.next_script()
        } else {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Script::Fail(GatewayError::InvalidRequest("model mismatch".into()))
        };
        let model = self.model.clone();

        Box::pin(async_stream::stream! {
            let mut seq = StreamSequencer::new(model, StreamOrigin::from_messages(&request.messages));
            yield seq.start();
            match script {
                Script::Respond(text) => {
                    for word in text.split_inclusive(' ') {
                        yield seq.content(word);
                    }
                    yield seq.finish("stop");
                    yield seq.done();
                }
                Script::Fail(e) => {
                    yield seq.error(&e);
                }
                Script::FailAfter(chunks, e) => {
                    for chunk in &chunks {
                        yield seq.content(chunk);
                    }
                    yield seq.error(&e);
                }
                Script::Hang(chunks) => {
                    for chunk in &chunks {
                        yield seq.content(chunk);
                    }
                    cancel.cancelled().await;
                    yield seq.error(&GatewayError::Cancelled);
                }
            }
        })
    }

    async fn health_check(&self) -> HealthState {
        self.health.set(self.probe);
        self.probe
    }

    fn health_state(&self) -> HealthState {
        self.health.get()
    }

    fn stats(&self) -> ClientStats {
        ClientStats::default()
    }

    async fn close(&self) -> GatewayResult<bool> {
        let n = self.close_calls.fetch_add(1, Ordering::SeqCst);
        match self.close_error {
            Some(ref e) if n == 0 => Err(e.clone()),
            _ => Ok(n == 0),
        }
    }
}
