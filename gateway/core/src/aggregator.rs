//! Aggregator
//!
//! Serves a request from an ordered list of candidates, failing over to the
//! next candidate when one is unavailable or fails retryably. Attempts are
//! strictly sequential: at most one upstream call is in flight per request.
//!
//! Streams fail over only until they commit. A candidate commits when its
//! first `content` or `finish` event arrives; its `start` is held back until
//! then so the caller sees exactly one `start`.

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::error::{CandidateFailure, GatewayError, GatewayResult};
use crate::health::HealthReport;
use crate::manager::Manager;
use crate::streaming::{EventStream, StreamEvent, StreamOrigin, StreamSequencer};
use crate::types::{Candidate, ChatCompletionRequest, ChatCompletionResponse};

/// Ordered-candidate failover over a shared [`Manager`]
#[derive(Debug, Clone)]
pub struct Aggregator {
    manager: Arc<Manager>,
    default_candidates: Vec<Candidate>,
}

/// Candidates to try for `request`, in order.
///
/// An empty request model accepts every candidate. A named model must belong
/// to at least one candidate; the whole list is then tried, each attempt
/// rebound to the candidate's model.
fn eligible(request: &ChatCompletionRequest, candidates: &[Candidate]) -> GatewayResult<Vec<Candidate>> {
    if candidates.is_empty() {
        return Err(GatewayError::InvalidRequest("no candidates given".to_string()));
    }
    if !request.model.is_empty() && !candidates.iter().any(|c| c.model == request.model) {
        return Err(GatewayError::InvalidRequest(format!(
            "model '{}' is not served by any candidate",
            request.model
        )));
    }
    Ok(candidates.to_vec())
}

fn log_failover(attempt: usize, candidate: &Candidate, error: &GatewayError) {
    tracing::warn!(
        vendor = %candidate.vendor,
        model = %candidate.model,
        attempt,
        error = %error,
        "Candidate failed, trying next"
    );
}

impl Aggregator {
    /// Aggregator without default candidates
    pub fn new(manager: Arc<Manager>) -> Self {
        Self {
            manager,
            default_candidates: Vec::new(),
        }
    }

    /// Set the list used by the `*_default` methods
    pub fn with_default_candidates(mut self, candidates: Vec<Candidate>) -> Self {
        self.default_candidates = candidates;
        self
    }

    /// Aggregator using the configured default candidates
    pub fn from_config(manager: Arc<Manager>, config: &GatewayConfig) -> GatewayResult<Self> {
        Ok(Self::new(manager).with_default_candidates(config.candidates()?))
    }

    /// Shared registry
    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    /// Configured default candidates
    pub fn default_candidates(&self) -> &[Candidate] {
        &self.default_candidates
    }

    fn defaults(&self) -> GatewayResult<Vec<Candidate>> {
        if self.default_candidates.is_empty() {
            return Err(GatewayError::Configuration(
                "no default candidates configured".to_string(),
            ));
        }
        Ok(self.default_candidates.clone())
    }

    /// Complete `request` with the first candidate that succeeds.
    ///
    /// Resolution failures and skippable call failures advance to the next
    /// candidate; any other failure is returned at once. When every
    /// candidate fails the error is [`GatewayError::Aggregate`] with the
    /// causes in attempt order.
    pub async fn generate(
        &self,
        request: &ChatCompletionRequest,
        candidates: &[Candidate],
    ) -> GatewayResult<ChatCompletionResponse> {
        let candidates = eligible(request, candidates)?;
        let mut failures = Vec::with_capacity(candidates.len());

        for (attempt, candidate) in candidates.into_iter().enumerate() {
            let outcome = match self.manager.get_client(&candidate.vendor, &candidate.model) {
                Ok(client) => client.complete(&request.for_model(&candidate.model)).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(response) => {
                    if attempt > 0 {
                        tracing::info!(
                            vendor = %candidate.vendor,
                            model = %candidate.model,
                            attempt,
                            "Served by fallback candidate"
                        );
                    }
                    return Ok(response);
                }
                Err(error) if error.is_candidate_skippable() => {
                    log_failover(attempt, &candidate, &error);
                    failures.push(CandidateFailure { candidate, error });
                }
                Err(error) => {
                    tracing::warn!(
                        vendor = %candidate.vendor,
                        model = %candidate.model,
                        attempt,
                        error = %error,
                        "Candidate failed, aborting failover"
                    );
                    return Err(error);
                }
            }
        }

        Err(GatewayError::Aggregate(failures))
    }

    /// [`generate`](Self::generate) over the default candidates
    pub async fn generate_default(
        &self,
        request: &ChatCompletionRequest,
    ) -> GatewayResult<ChatCompletionResponse> {
        let candidates = self.defaults()?;
        self.generate(request, &candidates).await
    }

    /// Stream `request` from the first candidate that commits.
    ///
    /// The returned stream always ends with exactly one `done` or `error`.
    pub fn generate_stream(
        &self,
        request: ChatCompletionRequest,
        candidates: Vec<Candidate>,
        cancel: CancellationToken,
    ) -> EventStream {
        let manager = Arc::clone(&self.manager);

        Box::pin(async_stream::stream! {
            let origin = StreamOrigin::from_messages(&request.messages);
            let mut seq = StreamSequencer::new(request.model.clone(), origin);

            let candidates = match eligible(&request, &candidates) {
                Ok(candidates) => candidates,
                Err(e) => {
                    yield seq.start();
                    yield seq.error(&e);
                    return;
                }
            };

            let mut failures = Vec::with_capacity(candidates.len());
            for (attempt, candidate) in candidates.into_iter().enumerate() {
                seq.set_model(candidate.model.clone());
                if cancel.is_cancelled() {
                    yield seq.start();
                    yield seq.error(&GatewayError::Cancelled);
                    return;
                }

                let client = match manager.get_client(&candidate.vendor, &candidate.model) {
                    Ok(client) => client,
                    Err(error) if error.is_candidate_skippable() => {
                        log_failover(attempt, &candidate, &error);
                        failures.push(CandidateFailure { candidate, error });
                        continue;
                    }
                    Err(error) => {
                        yield seq.start();
                        yield seq.error(&error);
                        return;
                    }
                };

                let mut upstream =
                    client.complete_stream(request.for_model(&candidate.model), cancel.clone());
                let mut held_start: Option<StreamEvent> = None;
                let mut committed = false;

                let failure = loop {
                    let Some(event) = upstream.next().await else {
                        break GatewayError::transport(format!(
                            "{candidate} stream ended without a terminal event"
                        ));
                    };

                    match event {
                        StreamEvent::Start { .. } => {
                            held_start = Some(event);
                        }
                        StreamEvent::Content { .. } | StreamEvent::Finish { .. } => {
                            if !committed {
                                committed = true;
                                let start = match held_start.take() {
                                    Some(start) => seq.relay(start),
                                    None => seq.start(),
                                };
                                yield start;
                            }
                            yield seq.relay(event);
                        }
                        StreamEvent::Done { .. } => {
                            if !committed {
                                let start = match held_start.take() {
                                    Some(start) => seq.relay(start),
                                    None => seq.start(),
                                };
                                yield start;
                            }
                            yield seq.relay(event);
                            return;
                        }
                        StreamEvent::Error { ref error, .. } => {
                            let cause = event
                                .cause()
                                .cloned()
                                .unwrap_or_else(|| GatewayError::transport(error.clone()));
                            if committed || !cause.is_candidate_skippable() {
                                if !committed {
                                    let start = match held_start.take() {
                                        Some(start) => seq.relay(start),
                                        None => seq.start(),
                                    };
                                    yield start;
                                }
                                yield seq.relay(event);
                                return;
                            }
                            break cause;
                        }
                    }
                };

                if committed {
                    // upstream vanished after content was forwarded
                    yield seq.error(&failure);
                    return;
                }
                log_failover(attempt, &candidate, &failure);
                failures.push(CandidateFailure { candidate, error: failure });
            }

            yield seq.start();
            yield seq.error(&GatewayError::Aggregate(failures));
        })
    }

    /// [`generate_stream`](Self::generate_stream) over the default candidates
    pub fn generate_stream_default(
        &self,
        request: ChatCompletionRequest,
        cancel: CancellationToken,
    ) -> EventStream {
        match self.defaults() {
            Ok(candidates) => self.generate_stream(request, candidates, cancel),
            Err(e) => {
                let mut seq = StreamSequencer::new(
                    request.model.clone(),
                    StreamOrigin::from_messages(&request.messages),
                );
                let events = vec![seq.start(), seq.error(&e)];
                Box::pin(futures::stream::iter(events))
            }
        }
    }

    /// Default candidates whose Client currently resolves
    pub fn available_candidates(&self) -> Vec<Candidate> {
        self.default_candidates
            .iter()
            .filter(|c| self.manager.get_client(&c.vendor, &c.model).is_ok())
            .cloned()
            .collect()
    }

    /// Health of every vendor
    pub async fn health_check(&self) -> HealthReport {
        self.manager.health_check().await
    }
}
