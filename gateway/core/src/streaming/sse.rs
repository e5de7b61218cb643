//! Server-Sent Events framing
//!
//! Two directions live here:
//!
//! - **Outbound**: encoding [`StreamEvent`]s as `data: <json>` lines followed
//!   by exactly one `data: [DONE]` sentinel.
//! - **Upstream**: splitting a vendor response body into payload strings,
//!   either SSE `data:` fields or newline-delimited JSON.

use std::pin::Pin;

use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};

use super::{EventStream, StreamEvent};
use crate::error::GatewayError;

/// End-of-stream sentinel written after the terminal event
pub const DONE_SENTINEL: &str = "data: [DONE]\n\n";

/// Payload marking the end of an OpenAI-style SSE body
pub const DONE_PAYLOAD: &str = "[DONE]";

/// Encode one event as an SSE frame
pub fn encode_event(event: &StreamEvent) -> String {
    match serde_json::to_string(event) {
        Ok(json) => format!("data: {json}\n\n"),
        // Only reachable with a non-string map key, which StreamEvent has none of
        Err(e) => format!(
            "data: {{\"type\":\"error\",\"error\":{}}}\n\n",
            serde_json::Value::String(e.to_string())
        ),
    }
}

/// SSE frames for an event stream, ending with a single sentinel.
///
/// Anything the upstream yields after its first terminal event is dropped.
pub fn into_sse(events: EventStream) -> impl Stream<Item = String> + Send {
    async_stream::stream! {
        let mut events = events;
        while let Some(event) = events.next().await {
            let terminal = event.is_terminal();
            yield encode_event(&event);
            if terminal {
                break;
            }
        }
        yield DONE_SENTINEL.to_string();
    }
}

// ============================================================================
// Upstream framing
// ============================================================================

/// How a vendor frames its streaming body
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Framing {
    /// `text/event-stream`; payloads are `data:` fields
    Sse,
    /// One JSON document per line
    Ndjson,
}

/// Raw payload strings of an upstream body
pub type PayloadStream = Pin<Box<dyn Stream<Item = Result<String, GatewayError>> + Send>>;

/// Split an upstream byte stream into payloads.
///
/// A transport error is yielded once and ends the stream.
pub fn payloads<S, B, E>(framing: Framing, body: S) -> PayloadStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    match framing {
        Framing::Sse => Box::pin(async_stream::stream! {
            let mut events = Box::pin(body.eventsource());
            while let Some(item) = events.next().await {
                match item {
                    Ok(event) => {
                        let data = event.data.trim();
                        if !data.is_empty() {
                            yield Ok(data.to_string());
                        }
                    }
                    Err(e) => {
                        yield Err(GatewayError::transport(e.to_string()));
                        return;
                    }
                }
            }
        }),
        Framing::Ndjson => Box::pin(async_stream::stream! {
            let mut body = Box::pin(body);
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => {
                        buffer.extend_from_slice(bytes.as_ref());
                        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                            let line: Vec<u8> = buffer.drain(..=pos).collect();
                            let line = String::from_utf8_lossy(&line).trim().to_string();
                            if !line.is_empty() {
                                yield Ok(line);
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(GatewayError::transport(e.to_string()));
                        return;
                    }
                }
            }
            let rest = String::from_utf8_lossy(&buffer).trim().to_string();
            if !rest.is_empty() {
                yield Ok(rest);
            }
        }),
    }
}
