//! Upstream generative-text service.
//!
//! `UpstreamClient` opens the streaming HTTP response; `decoder` turns its
//! body into text increments for the relay. The client is a trait so the
//! relay can run against the real endpoint or a scripted mock.

pub mod anthropic;
pub mod decoder;
pub mod events;
pub mod mock;

pub use decoder::{run_decoder, DecoderChannels};
pub use events::{EventStreamDecoder, LineBuffer, StreamEvent};

use super::error::DecodeError;
use crate::models::UpstreamRequest;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Raw response body, chunked as it arrives from the network.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, DecodeError>> + Send>>;

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Issue the streaming request. Returns once response headers arrive.
    /// No retries.
    async fn open_stream(&self, request: &UpstreamRequest) -> Result<ByteStream, DecodeError>;
}
