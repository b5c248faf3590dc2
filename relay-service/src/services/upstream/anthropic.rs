//! Anthropic Messages API client.
//!
//! Opens a streaming `POST {url}` and hands the raw body back as a
//! `ByteStream`. Event decoding happens in the relay's decoder task.

use super::{ByteStream, UpstreamClient};
use crate::config::UpstreamConfig;
use crate::models::UpstreamRequest;
use crate::services::error::DecodeError;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct AnthropicClient {
    config: UpstreamConfig,
    client: Client,
}

impl AnthropicClient {
    /// No overall request timeout is set on the HTTP client; the relay
    /// deadline bounds the whole stream.
    pub fn new(config: UpstreamConfig) -> Result<Self, anyhow::Error> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl UpstreamClient for AnthropicClient {
    async fn open_stream(&self, request: &UpstreamRequest) -> Result<ByteStream, DecodeError> {
        tracing::debug!(
            model = %request.model,
            max_tokens = request.max_tokens,
            prompt_len = request.messages.iter().map(|m| m.content.len()).sum::<usize>(),
            "Starting streaming request to upstream"
        );

        let response = self
            .client
            .post(&self.config.url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.api_version)
            .header("accept", "text/event-stream")
            .json(request)
            .send()
            .await
            .map_err(|e| DecodeError::Transport(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(DecodeError::Transport(format!(
                "upstream returned {}: {}",
                status, error_text
            )));
        }

        let body = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| DecodeError::Transport(format!("failed to read body: {}", e)))
        });

        Ok(Box::pin(body))
    }
}
