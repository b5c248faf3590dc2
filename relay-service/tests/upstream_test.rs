//! `AnthropicClient` against a wiremock upstream.

mod common;

use common::*;
use relay_service::config::UpstreamConfig;
use relay_service::models::{RelayOutcome, RenderedPrompt, UpstreamRequest};
use relay_service::relay::{RelayCoordinator, RelayDependencies};
use relay_service::services::error::{DecodeError, RelayError};
use relay_service::services::upstream::anthropic::AnthropicClient;
use relay_service::services::upstream::mock::text_stream;
use relay_service::services::upstream::UpstreamClient;
use relay_service::services::{
    ConnectionRegistry, InMemoryQuotaStore, InMemorySessionStore, StaticIdentityResolver,
    TemplateRenderer,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> AnthropicClient {
    AnthropicClient::new(UpstreamConfig {
        url: format!("{}/v1/messages", server.uri()),
        api_key: "test-key".to_string(),
        model: "claude-test".to_string(),
        api_version: "2023-06-01".to_string(),
        max_tokens: 64,
    })
    .unwrap()
}

fn event_stream_body(parts: &[&str]) -> Vec<u8> {
    text_stream(parts).concat()
}

#[tokio::test]
async fn request_carries_auth_headers_and_streaming_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "model": "claude-test",
            "max_tokens": 64,
            "stream": true,
            "system": "Be brief.",
            "messages": [{"role": "user", "content": "Say hi"}]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(event_stream_body(&["hi"]), "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let request = UpstreamRequest::streaming(
        "claude-test",
        64,
        RenderedPrompt {
            system: "Be brief.".to_string(),
            content: "Say hi".to_string(),
        },
    );

    let result = client_for(&server).open_stream(&request).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn non_success_status_is_a_transport_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let request = UpstreamRequest::streaming(
        "claude-test",
        64,
        RenderedPrompt {
            system: String::new(),
            content: "x".to_string(),
        },
    );

    match client_for(&server).open_stream(&request).await {
        Err(DecodeError::Transport(message)) => {
            assert!(message.contains("429"), "message was: {}", message);
            assert!(message.contains("rate limited"));
        }
        Err(other) => panic!("unexpected error: {:?}", other),
        Ok(_) => panic!("expected a transport failure"),
    }
}

#[tokio::test]
async fn unreachable_upstream_is_a_transport_failure() {
    let client = AnthropicClient::new(UpstreamConfig {
        url: "http://127.0.0.1:1/v1/messages".to_string(),
        api_key: "test-key".to_string(),
        model: "claude-test".to_string(),
        api_version: "2023-06-01".to_string(),
        max_tokens: 64,
    })
    .unwrap();

    let request = UpstreamRequest::streaming(
        "claude-test",
        64,
        RenderedPrompt {
            system: String::new(),
            content: "x".to_string(),
        },
    );

    assert!(matches!(
        client.open_stream(&request).await,
        Err(DecodeError::Transport(_))
    ));
}

#[tokio::test]
async fn relay_streams_from_http_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(event_stream_body(&["Hello", " world"]), "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let registry = Arc::new(ConnectionRegistry::new(16));
    let sessions = Arc::new(InMemorySessionStore::new());
    let quota = Arc::new(InMemoryQuotaStore::new().with_quota(IDENTITY, 1));
    let deps = RelayDependencies {
        identity: Arc::new(StaticIdentityResolver::new().with_credential(CREDENTIAL, IDENTITY)),
        quota: quota.clone(),
        sessions: sessions.clone(),
        transport: registry.clone(),
        upstream: Arc::new(client_for(&server)),
        renderer: Arc::new(TemplateRenderer::new(&templates()).unwrap()),
    };
    let coordinator = RelayCoordinator::new(deps, settings(Duration::from_secs(5)));

    let mut frames = registry.register("c1");
    coordinator.on_connect("c1", Some(CREDENTIAL)).await.unwrap();
    let outcome = coordinator.on_message("c1", VALID_REQUEST).await;

    assert!(outcome.is_completed(), "unexpected outcome: {:?}", outcome);
    assert_eq!(drain(&mut frames).await, vec!["Hello", " world"]);
    assert_eq!(quota.get(IDENTITY), Some(0));
    assert!(sessions.is_empty());
}

#[tokio::test]
async fn upstream_error_status_fails_the_relay_without_charging() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let registry = Arc::new(ConnectionRegistry::new(16));
    let quota = Arc::new(InMemoryQuotaStore::new().with_quota(IDENTITY, 1));
    let deps = RelayDependencies {
        identity: Arc::new(StaticIdentityResolver::new().with_credential(CREDENTIAL, IDENTITY)),
        quota: quota.clone(),
        sessions: Arc::new(InMemorySessionStore::new()),
        transport: registry.clone(),
        upstream: Arc::new(client_for(&server)),
        renderer: Arc::new(TemplateRenderer::new(&templates()).unwrap()),
    };
    let coordinator = RelayCoordinator::new(deps, settings(Duration::from_secs(5)));

    let mut frames = registry.register("c1");
    coordinator.on_connect("c1", Some(CREDENTIAL)).await.unwrap();
    let outcome = coordinator.on_message("c1", VALID_REQUEST).await;

    assert!(matches!(
        outcome,
        RelayOutcome::UpstreamError(RelayError::UpstreamTransportFailure(_))
    ));
    let received = drain(&mut frames).await;
    assert_eq!(received.len(), 1);
    assert!(received[0].contains("500"));
    assert_eq!(quota.get(IDENTITY), Some(1));
}
