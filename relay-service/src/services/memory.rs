//! Process-local store implementations.
//!
//! Used with `STORE_BACKEND=memory` for local development, and as test
//! doubles for the external stores.

use super::error::IdentityError;
use super::identity::IdentityResolver;
use super::quota::QuotaStore;
use super::session_store::SessionStore;
use async_trait::async_trait;
use dashmap::DashMap;

/// Fixed credential table.
#[derive(Default)]
pub struct StaticIdentityResolver {
    credentials: DashMap<String, String>,
}

impl StaticIdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(self, credential: &str, identity: &str) -> Self {
        self.insert(credential, identity);
        self
    }

    pub fn insert(&self, credential: &str, identity: &str) {
        self.credentials
            .insert(credential.to_string(), identity.to_string());
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentityResolver {
    async fn resolve_identity(&self, credential: &str) -> Result<String, IdentityError> {
        self.credentials
            .get(credential)
            .map(|entry| entry.value().clone())
            .ok_or(IdentityError::NotFound)
    }
}

#[derive(Default)]
pub struct InMemoryQuotaStore {
    remaining: DashMap<String, i64>,
}

impl InMemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(self, identity: &str, remaining: i64) -> Self {
        self.set(identity, remaining);
        self
    }

    pub fn set(&self, identity: &str, remaining: i64) {
        self.remaining.insert(identity.to_string(), remaining);
    }

    pub fn get(&self, identity: &str) -> Option<i64> {
        self.remaining.get(identity).map(|entry| *entry.value())
    }
}

#[async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn remaining(&self, identity: &str) -> Result<i64, anyhow::Error> {
        self.get(identity)
            .ok_or_else(|| anyhow::anyhow!("no quota record for identity {}", identity))
    }

    /// Check and decrement happen under the entry's shard lock.
    async fn decrement(&self, identity: &str, amount: i64) -> Result<(), anyhow::Error> {
        let Some(mut value) = self.remaining.get_mut(identity) else {
            return Err(anyhow::anyhow!("no quota record for identity {}", identity));
        };
        if *value < amount {
            return Err(anyhow::anyhow!(
                "quota for identity {} is below {}",
                identity,
                amount
            ));
        }
        *value -= amount;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, String>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.sessions.contains_key(connection_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn put(&self, connection_id: &str, identity: &str) -> Result<(), anyhow::Error> {
        self.sessions
            .insert(connection_id.to_string(), identity.to_string());
        Ok(())
    }

    async fn get(&self, connection_id: &str) -> Result<Option<String>, anyhow::Error> {
        Ok(self
            .sessions
            .get(connection_id)
            .map(|entry| entry.value().clone()))
    }

    async fn delete(&self, connection_id: &str) -> Result<(), anyhow::Error> {
        self.sessions.remove(connection_id);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}
