//! Connection → identity records.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn put(&self, connection_id: &str, identity: &str) -> Result<(), anyhow::Error>;

    async fn get(&self, connection_id: &str) -> Result<Option<String>, anyhow::Error>;

    /// Removing an absent record is not an error.
    async fn delete(&self, connection_id: &str) -> Result<(), anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

/// Redis-backed session records. Entries carry a TTL so a record orphaned
/// by a crashed process does not live forever.
#[derive(Clone)]
pub struct RedisSessionStore {
    manager: ConnectionManager,
    ttl_secs: u64,
}

impl RedisSessionStore {
    pub async fn new(url: &str, ttl_secs: u64) -> Result<Self, anyhow::Error> {
        tracing::info!(url = %url, "Connecting to Redis");
        let client = Client::open(url)?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self { manager, ttl_secs })
    }

    fn key(connection_id: &str) -> String {
        format!("ws_connection:{}", connection_id)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn put(&self, connection_id: &str, identity: &str) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(Self::key(connection_id))
            .arg(identity)
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to store connection: {}", e))
    }

    async fn get(&self, connection_id: &str) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(Self::key(connection_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read connection: {}", e))
    }

    async fn delete(&self, connection_id: &str) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let _removed: i64 = redis::cmd("DEL")
            .arg(Self::key(connection_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to remove connection: {}", e))?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(RedisSessionStore::key("abc"), "ws_connection:abc");
    }
}
