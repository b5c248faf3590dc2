//! Shared setup for relay-service integration tests.
//!
//! Every external interface is backed by an in-process double, so these
//! tests need no MongoDB, Redis or network access.

#![allow(dead_code)]

use async_trait::async_trait;
use relay_service::config::PromptTemplate;
use relay_service::relay::{CoordinatorSettings, RelayCoordinator, RelayDependencies};
use relay_service::services::error::TransportError;
use relay_service::services::upstream::mock::MockUpstream;
use relay_service::services::{
    ConnectionRegistry, InMemoryQuotaStore, InMemorySessionStore, PushTransport, QuotaStore,
    SessionStore, StaticIdentityResolver, TemplateRenderer,
};
use relay_service::startup::AppState;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const CREDENTIAL: &str = "key-1";
pub const IDENTITY: &str = "u1";
pub const VALID_REQUEST: &str = r#"{"type":"greeting","parameters":{"name":"Ada"}}"#;

pub fn templates() -> HashMap<String, PromptTemplate> {
    let mut templates = HashMap::new();
    templates.insert(
        "greeting".to_string(),
        PromptTemplate {
            system: "You are terse.".to_string(),
            content: "Say hello to {{ name }}.".to_string(),
        },
    );
    templates
}

pub fn settings(timeout: Duration) -> CoordinatorSettings {
    CoordinatorSettings {
        model: "claude-test".to_string(),
        max_tokens: 64,
        relay_timeout: timeout,
    }
}

/// Coordinator wired to in-memory doubles. `u1` (credential `key-1`)
/// starts with one unit of quota.
pub struct TestRelay {
    pub coordinator: Arc<RelayCoordinator>,
    pub registry: Arc<ConnectionRegistry>,
    pub sessions: Arc<InMemorySessionStore>,
    pub quota: Arc<InMemoryQuotaStore>,
    pub upstream: Arc<MockUpstream>,
}

impl TestRelay {
    pub fn new(upstream: MockUpstream) -> Self {
        Self::with_timeout(upstream, Duration::from_secs(5))
    }

    pub fn with_timeout(upstream: MockUpstream, timeout: Duration) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(16));
        let sessions = Arc::new(InMemorySessionStore::new());
        let quota = Arc::new(InMemoryQuotaStore::new().with_quota(IDENTITY, 1));
        let upstream = Arc::new(upstream);

        let deps = RelayDependencies {
            identity: Arc::new(StaticIdentityResolver::new().with_credential(CREDENTIAL, IDENTITY)),
            quota: quota.clone(),
            sessions: sessions.clone(),
            transport: registry.clone(),
            upstream: upstream.clone(),
            renderer: Arc::new(TemplateRenderer::new(&templates()).unwrap()),
        };

        Self {
            coordinator: Arc::new(RelayCoordinator::new(deps, settings(timeout))),
            registry,
            sessions,
            quota,
            upstream,
        }
    }

    /// Register a socket and authenticate it with the valid credential.
    pub async fn connect(&self, connection_id: &str) -> mpsc::Receiver<Vec<u8>> {
        let frames = self.registry.register(connection_id);
        self.coordinator
            .on_connect(connection_id, Some(CREDENTIAL))
            .await
            .expect("connect should succeed");
        frames
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            coordinator: self.coordinator.clone(),
            registry: self.registry.clone(),
            sessions: self.sessions.clone(),
            db: None,
        }
    }
}

/// Everything queued for a connection until its sender is dropped.
pub async fn drain(frames: &mut mpsc::Receiver<Vec<u8>>) -> Vec<String> {
    let mut received = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(2), frames.recv()).await {
            Ok(Some(frame)) => received.push(String::from_utf8(frame).unwrap()),
            Ok(None) => return received,
            Err(_) => panic!("connection was never closed; received so far: {:?}", received),
        }
    }
}

/// Poll until `check` holds or a second passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Session store whose deletes always fail.
pub struct UndeletableSessions {
    pub inner: InMemorySessionStore,
}

#[async_trait]
impl SessionStore for UndeletableSessions {
    async fn put(&self, connection_id: &str, identity: &str) -> Result<(), anyhow::Error> {
        self.inner.put(connection_id, identity).await
    }

    async fn get(&self, connection_id: &str) -> Result<Option<String>, anyhow::Error> {
        self.inner.get(connection_id).await
    }

    async fn delete(&self, _connection_id: &str) -> Result<(), anyhow::Error> {
        Err(anyhow::anyhow!("redis unavailable"))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

/// Transport that delivers frames but cannot be closed.
pub struct UnclosableTransport {
    pub inner: Arc<ConnectionRegistry>,
}

#[async_trait]
impl PushTransport for UnclosableTransport {
    async fn send(&self, connection_id: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.inner.send(connection_id, payload).await
    }

    async fn close(&self, connection_id: &str) -> Result<(), TransportError> {
        Err(TransportError::SendFailed(connection_id.to_string()))
    }
}

/// Quota store that reports quota but cannot charge it.
pub struct FrozenQuota {
    pub remaining: i64,
}

#[async_trait]
impl QuotaStore for FrozenQuota {
    async fn remaining(&self, _identity: &str) -> Result<i64, anyhow::Error> {
        Ok(self.remaining)
    }

    async fn decrement(&self, _identity: &str, _amount: i64) -> Result<(), anyhow::Error> {
        Err(anyhow::anyhow!("mongodb unavailable"))
    }
}
