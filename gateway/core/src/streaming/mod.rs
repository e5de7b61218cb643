//! Streaming
//!
//! Event protocol for streamed completions and the SSE framing on both sides
//! of the gateway.

mod events;
pub mod sse;

use std::pin::Pin;

use futures::Stream;

pub use events::{StreamEvent, StreamOrigin, StreamSequencer};
pub use sse::{encode_event, into_sse, DONE_SENTINEL};

/// Lazy, finite, non-restartable sequence of stream events
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;
