//! Scripted upstream for tests and local runs.

use super::{ByteStream, UpstreamClient};
use crate::models::UpstreamRequest;
use crate::services::error::DecodeError;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Replays a fixed body for every request.
#[derive(Default)]
pub struct MockUpstream {
    chunks: Vec<Result<Vec<u8>, DecodeError>>,
    chunk_delay: Option<Duration>,
    hang: bool,
    open_error: Option<DecodeError>,
    requests: Mutex<Vec<UpstreamRequest>>,
    live_streams: Arc<AtomicUsize>,
}

impl MockUpstream {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks: chunks.into_iter().map(Ok).collect(),
            ..Default::default()
        }
    }

    /// A complete, well-formed stream whose deltas are `parts`.
    pub fn with_text(parts: &[&str]) -> Self {
        Self::new(text_stream(parts))
    }

    /// Sleep before yielding each chunk.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Never end the body after the scripted chunks.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Fail before any body is produced.
    pub fn failing_with(mut self, err: DecodeError) -> Self {
        self.open_error = Some(err);
        self
    }

    /// Fail the body read after the scripted chunks.
    pub fn with_body_error(mut self, err: DecodeError) -> Self {
        self.chunks.push(Err(err));
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn requests(&self) -> Vec<UpstreamRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Bodies handed out and not yet dropped.
    pub fn live_streams(&self) -> usize {
        self.live_streams.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamClient for MockUpstream {
    async fn open_stream(&self, request: &UpstreamRequest) -> Result<ByteStream, DecodeError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        if let Some(err) = &self.open_error {
            return Err(err.clone());
        }

        let delay = self.chunk_delay;
        let mut body: ByteStream = Box::pin(futures::stream::iter(self.chunks.clone()).then(
            move |chunk| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                chunk
            },
        ));

        if self.hang {
            body = Box::pin(body.chain(futures::stream::pending()));
        }

        let live = LiveStream::new(self.live_streams.clone());
        Ok(Box::pin(body.map(move |chunk| {
            let _live = &live;
            chunk
        })))
    }
}

struct LiveStream(Arc<AtomicUsize>);

impl LiveStream {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LiveStream {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One `event:`/`data:` block.
pub fn sse_event(name: &str, data: &Value) -> Vec<u8> {
    format!("event: {}\ndata: {}\n\n", name, data).into_bytes()
}

/// A full upstream response carrying `parts` as text deltas.
pub fn text_stream(parts: &[&str]) -> Vec<Vec<u8>> {
    let mut chunks = vec![
        sse_event(
            "message_start",
            &json!({"type": "message_start", "message": {"id": "msg_mock", "role": "assistant"}}),
        ),
        sse_event(
            "content_block_start",
            &json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        ),
        sse_event("ping", &json!({"type": "ping"})),
    ];

    for part in parts {
        chunks.push(sse_event(
            "content_block_delta",
            &json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": part}}),
        ));
    }

    chunks.push(sse_event(
        "content_block_stop",
        &json!({"type": "content_block_stop", "index": 0}),
    ));
    chunks.push(sse_event(
        "message_delta",
        &json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}}),
    ));
    chunks.push(sse_event("message_stop", &json!({"type": "message_stop"})));
    chunks
}
