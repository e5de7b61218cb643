//! Stream Events
//!
//! The vendor-neutral event protocol of a streamed completion:
//!
//! ```text
//! start -> content(1) -> content(2) -> ... -> finish -> done
//!                                         \-> error
//! ```
//!
//! [`StreamSequencer`] is the only producer of events. It numbers content
//! chunks from 1, accumulates the total text and keeps timestamps
//! non-decreasing, so every stream built through it satisfies the protocol.

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::types::{Message, Role};

/// What the stream is answering: a lone user message or a full conversation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamOrigin {
    /// Conversation was a single user message
    UserMessage(String),
    /// Full message list
    Conversation(Vec<Message>),
}

impl StreamOrigin {
    /// Pick the compact form when the conversation is one user message
    pub fn from_messages(messages: &[Message]) -> Self {
        match messages {
            [only] if only.role == Role::User => Self::UserMessage(only.content.clone()),
            _ => Self::Conversation(messages.to_vec()),
        }
    }
}

/// One event of a streamed completion
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Stream opened
    Start {
        /// Model serving the stream
        model: String,
        /// What is being answered
        #[serde(flatten)]
        origin: StreamOrigin,
        /// Milliseconds since the Unix epoch
        timestamp: i64,
    },
    /// A piece of generated text
    Content {
        /// Text of this chunk
        content: String,
        /// 1-based, strictly increasing within the stream
        chunk_index: u32,
        /// Model serving the stream
        model: String,
        /// Milliseconds since the Unix epoch
        timestamp: i64,
    },
    /// Generation stopped normally
    Finish {
        /// Vendor finish reason
        finish_reason: String,
        /// Concatenation of all content chunks
        total_content: String,
        /// Number of content chunks
        total_chunks: u32,
        /// Model serving the stream
        model: String,
        /// Milliseconds since the Unix epoch
        timestamp: i64,
    },
    /// Terminal success event
    Done {
        /// Concatenation of all content chunks
        total_content: String,
        /// Number of content chunks
        total_chunks: u32,
        /// Model serving the stream
        model: String,
        /// What was answered
        #[serde(flatten)]
        origin: StreamOrigin,
        /// Milliseconds since the Unix epoch
        timestamp: i64,
    },
    /// Terminal failure event
    Error {
        /// Human-readable failure
        error: String,
        /// What was being answered
        #[serde(flatten)]
        origin: StreamOrigin,
        /// Model serving the stream
        model: String,
        /// Milliseconds since the Unix epoch
        timestamp: i64,
        /// Typed cause, kept in-process for failover decisions
        #[serde(skip)]
        cause: Option<GatewayError>,
    },
}

impl StreamEvent {
    /// Wire name of the event type
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Content { .. } => "content",
            Self::Finish { .. } => "finish",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    /// Model named by the event
    pub fn model(&self) -> &str {
        match self {
            Self::Start { model, .. }
            | Self::Content { model, .. }
            | Self::Finish { model, .. }
            | Self::Done { model, .. }
            | Self::Error { model, .. } => model,
        }
    }

    /// Event timestamp
    pub fn timestamp(&self) -> i64 {
        match self {
            Self::Start { timestamp, .. }
            | Self::Content { timestamp, .. }
            | Self::Finish { timestamp, .. }
            | Self::Done { timestamp, .. }
            | Self::Error { timestamp, .. } => *timestamp,
        }
    }

    fn timestamp_mut(&mut self) -> &mut i64 {
        match self {
            Self::Start { timestamp, .. }
            | Self::Content { timestamp, .. }
            | Self::Finish { timestamp, .. }
            | Self::Done { timestamp, .. }
            | Self::Error { timestamp, .. } => timestamp,
        }
    }

    /// `done` and `error` end a stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// Typed cause of an `error` event
    pub fn cause(&self) -> Option<&GatewayError> {
        match self {
            Self::Error { cause, .. } => cause.as_ref(),
            _ => None,
        }
    }
}

// ============================================================================
// Sequencer
// ============================================================================

/// Builds the events of one stream
#[derive(Debug)]
pub struct StreamSequencer {
    model: String,
    origin: StreamOrigin,
    chunks: u32,
    total_content: String,
    last_timestamp: i64,
}

impl StreamSequencer {
    /// Sequencer for a stream served by `model`
    pub fn new(model: impl Into<String>, origin: StreamOrigin) -> Self {
        Self {
            model: model.into(),
            origin,
            chunks: 0,
            total_content: String::new(),
            last_timestamp: i64::MIN,
        }
    }

    /// Switch the model named by subsequent events
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    /// Content chunks emitted so far
    pub fn chunks(&self) -> u32 {
        self.chunks
    }

    /// Text emitted so far
    pub fn total_content(&self) -> &str {
        &self.total_content
    }

    fn stamp(&mut self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        self.last_timestamp = now.max(self.last_timestamp);
        self.last_timestamp
    }

    /// `start` event
    pub fn start(&mut self) -> StreamEvent {
        StreamEvent::Start {
            model: self.model.clone(),
            origin: self.origin.clone(),
            timestamp: self.stamp(),
        }
    }

    /// Next `content` event
    pub fn content(&mut self, text: &str) -> StreamEvent {
        self.chunks += 1;
        self.total_content.push_str(text);
        StreamEvent::Content {
            content: text.to_string(),
            chunk_index: self.chunks,
            model: self.model.clone(),
            timestamp: self.stamp(),
        }
    }

    /// `finish` event
    pub fn finish(&mut self, finish_reason: &str) -> StreamEvent {
        StreamEvent::Finish {
            finish_reason: finish_reason.to_string(),
            total_content: self.total_content.clone(),
            total_chunks: self.chunks,
            model: self.model.clone(),
            timestamp: self.stamp(),
        }
    }

    /// Terminal `done` event
    pub fn done(&mut self) -> StreamEvent {
        StreamEvent::Done {
            total_content: self.total_content.clone(),
            total_chunks: self.chunks,
            model: self.model.clone(),
            origin: self.origin.clone(),
            timestamp: self.stamp(),
        }
    }

    /// Terminal `error` event
    pub fn error(&mut self, err: &GatewayError) -> StreamEvent {
        StreamEvent::Error {
            error: err.to_string(),
            origin: self.origin.clone(),
            model: self.model.clone(),
            timestamp: self.stamp(),
            cause: Some(err.clone()),
        }
    }

    /// Re-stamp an event produced elsewhere so timestamps stay ordered
    pub fn relay(&mut self, mut event: StreamEvent) -> StreamEvent {
        let ts = event.timestamp().max(self.last_timestamp);
        self.last_timestamp = ts;
        *event.timestamp_mut() = ts;
        event
    }
}
