//! Producer task for one relay.
//!
//! Opens the upstream stream and pushes every text increment into a
//! capacity-one channel, so the producer advances only as fast as the
//! relay forwards to the client. Exactly one of `errors` or `done` is
//! signalled unless the task is cancelled or its consumer went away.

use super::events::{EventStreamDecoder, LineBuffer, StreamEvent};
use super::UpstreamClient;
use crate::models::UpstreamRequest;
use crate::services::error::DecodeError;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Producer ends of the channels shared with the relay.
pub struct DecoderChannels {
    pub increments: mpsc::Sender<String>,
    pub errors: oneshot::Sender<DecodeError>,
    pub done: oneshot::Sender<()>,
    /// Cancelled by the relay on every exit path.
    pub cancel: CancellationToken,
}

enum DecodeEnd {
    /// `message_stop` seen.
    Stopped,
    /// The increment receiver was dropped.
    Abandoned,
}

pub async fn run_decoder(
    upstream: Arc<dyn UpstreamClient>,
    request: UpstreamRequest,
    channels: DecoderChannels,
) {
    let DecoderChannels {
        increments,
        errors,
        done,
        cancel,
    } = channels;

    // Cancellation drops the in-flight body read or increment send, which
    // also drops the upstream response.
    let result = tokio::select! {
        _ = cancel.cancelled() => {
            tracing::debug!("Decoder cancelled");
            return;
        }
        result = decode(upstream.as_ref(), &request, &increments) => result,
    };

    match result {
        Ok(DecodeEnd::Stopped) => {
            let _ = done.send(());
        }
        Ok(DecodeEnd::Abandoned) => {
            tracing::debug!("Increment receiver dropped, decoder stopping");
        }
        Err(e) => {
            tracing::debug!(error = %e, "Decoder failed");
            let _ = errors.send(e);
        }
    }
}

async fn decode(
    upstream: &dyn UpstreamClient,
    request: &UpstreamRequest,
    increments: &mpsc::Sender<String>,
) -> Result<DecodeEnd, DecodeError> {
    let mut body = upstream.open_stream(request).await?;
    let mut lines = LineBuffer::new();
    let mut decoder = EventStreamDecoder::new();

    while let Some(chunk) = body.next().await {
        for line in lines.push(&chunk?)? {
            if let Some(end) = handle_line(&mut decoder, &line, increments).await? {
                return Ok(end);
            }
        }
    }

    if let Some(line) = lines.finish()? {
        if let Some(end) = handle_line(&mut decoder, &line, increments).await? {
            return Ok(end);
        }
    }

    Err(DecodeError::Protocol(
        "upstream closed the stream before message_stop".to_string(),
    ))
}

async fn handle_line(
    decoder: &mut EventStreamDecoder,
    line: &str,
    increments: &mpsc::Sender<String>,
) -> Result<Option<DecodeEnd>, DecodeError> {
    let Some(event) = decoder.decode_line(line)? else {
        return Ok(None);
    };

    match event {
        StreamEvent::ContentBlockDelta(Some(text)) => {
            if increments.send(text).await.is_err() {
                return Ok(Some(DecodeEnd::Abandoned));
            }
        }
        StreamEvent::ContentBlockDelta(None) => {
            tracing::debug!("Skipping content_block_delta without text");
        }
        StreamEvent::MessageStop => return Ok(Some(DecodeEnd::Stopped)),
        StreamEvent::Unknown(name) => {
            tracing::warn!(event = %name, "Ignoring unknown upstream event");
        }
        other => {
            tracing::debug!(event = other.name(), "Upstream event");
        }
    }

    Ok(None)
}
