//! Request and Response Types
//!
//! Vendor-neutral shapes exchanged between callers and the gateway. Dialects
//! translate these to and from each vendor's wire format.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

// ============================================================================
// Messages
// ============================================================================

/// Author of a chat message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions that frame the conversation
    System,
    /// End-user input
    User,
    /// Model output
    Assistant,
}

impl Role {
    /// Wire name of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message of a conversation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who wrote it
    pub role: Role,
    /// Text content
    pub content: String,
}

impl Message {
    /// Create a message with an explicit role
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// System message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// User message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

// ============================================================================
// Request
// ============================================================================

/// Optional sampling parameters forwarded to the vendor
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Upper bound on generated tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Nucleus sampling mass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Stop sequences
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

/// A normalized chat-completion request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    /// Model the request is addressed to. Empty means "any candidate".
    #[serde(default)]
    pub model: String,
    /// Ordered conversation
    pub messages: Vec<Message>,
    /// Whether the caller wants a stream of events
    #[serde(default)]
    pub stream: bool,
    /// Optional sampling parameters
    #[serde(flatten)]
    pub params: SamplingParams,
}

impl ChatCompletionRequest {
    /// Create a request for a model
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: false,
            params: SamplingParams::default(),
        }
    }

    /// Request not bound to a model; the Aggregator picks one
    pub fn any_model(messages: Vec<Message>) -> Self {
        Self::new(String::new(), messages)
    }

    /// Set the stream flag
    #[must_use]
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Set the token limit
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.params.max_tokens = Some(max_tokens);
        self
    }

    /// Set the temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.params.temperature = Some(temperature);
        self
    }

    /// Set top-p
    #[must_use]
    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.params.top_p = Some(top_p);
        self
    }

    /// Set stop sequences
    #[must_use]
    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.params.stop = Some(stop);
        self
    }

    /// Copy of this request addressed to another model
    #[must_use]
    pub fn for_model(&self, model: &str) -> Self {
        let mut rebound = self.clone();
        rebound.model = model.to_string();
        rebound
    }

    /// Reject requests no vendor could serve
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.messages.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "request has no messages".to_string(),
            ));
        }
        if let Some(t) = self.params.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(GatewayError::InvalidRequest(format!(
                    "temperature {t} outside 0.0..=2.0"
                )));
            }
        }
        if let Some(p) = self.params.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(GatewayError::InvalidRequest(format!(
                    "top_p {p} outside 0.0..=1.0"
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Response
// ============================================================================

/// Token accounting reported by the vendor
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt
    #[serde(default)]
    pub prompt_tokens: u32,
    /// Tokens generated
    #[serde(default)]
    pub completion_tokens: u32,
    /// Sum of both
    #[serde(default)]
    pub total_tokens: u32,
}

impl Usage {
    /// Build usage, deriving the total
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// One generated alternative
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    /// Position among the choices
    pub index: u32,
    /// Generated message
    pub message: Message,
    /// Why generation stopped
    pub finish_reason: String,
}

/// A normalized chat-completion response
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    /// Response id (vendor-issued or generated)
    pub id: String,
    /// Creation time, seconds since the Unix epoch
    pub created: i64,
    /// Model that actually served the request
    pub model: String,
    /// Generated alternatives, in index order
    pub choices: Vec<Choice>,
    /// Token accounting
    #[serde(default)]
    pub usage: Usage,
}

impl ChatCompletionResponse {
    /// Text of the first choice, if any
    pub fn content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }

    /// Finish reason of the first choice, if any
    pub fn finish_reason(&self) -> Option<&str> {
        self.choices.first().map(|c| c.finish_reason.as_str())
    }
}

// ============================================================================
// Candidates
// ============================================================================

/// A (vendor, model) pair eligible to serve a request
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Candidate {
    /// Vendor name
    pub vendor: String,
    /// Model name within the vendor
    pub model: String,
}

impl Candidate {
    /// Create a candidate
    pub fn new(vendor: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.vendor, self.model)
    }
}

impl FromStr for Candidate {
    type Err = GatewayError;

    /// Parse `vendor/model`. The model part may itself contain `/`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((vendor, model)) if !vendor.trim().is_empty() && !model.trim().is_empty() => {
                Ok(Self::new(vendor.trim(), model.trim()))
            }
            _ => Err(GatewayError::Configuration(format!(
                "candidate '{s}' is not of the form vendor/model"
            ))),
        }
    }
}
