//! MongoDB access for the relay service.
//!
//! Holds the credential table used for identity resolution and the per-user
//! quota table.

use super::error::IdentityError;
use super::identity::IdentityResolver;
use super::quota::QuotaStore;
use async_trait::async_trait;
use mongodb::{
    bson::doc, options::IndexOptions, Client as MongoClient, Collection, Database, IndexModel,
};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;

/// A credential issued to a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRecord {
    pub key: String,
    pub user_hash: String,
}

/// Quota row for one identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_hash: String,
    pub remaining_requests: i64,
}

#[derive(Clone)]
pub struct RelayDb {
    client: MongoClient,
    db: Database,
}

impl RelayDb {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        tracing::info!("Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        tracing::info!("Creating MongoDB indexes for relay-service");

        let key_index = IndexModel::builder()
            .keys(doc! { "key": 1 })
            .options(
                IndexOptions::builder()
                    .name("auth_key_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        self.auth().create_index(key_index, None).await.map_err(|e| {
            tracing::error!("Failed to create auth key index: {}", e);
            AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
        })?;

        let user_index = IndexModel::builder()
            .keys(doc! { "user_hash": 1 })
            .options(
                IndexOptions::builder()
                    .name("user_hash_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        self.users().create_index(user_index, None).await.map_err(|e| {
            tracing::error!("Failed to create user_hash index: {}", e);
            AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
        })?;

        tracing::info!("Successfully created all MongoDB indexes");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })?;
        Ok(())
    }

    pub fn auth(&self) -> Collection<AuthRecord> {
        self.db.collection("auth")
    }

    pub fn users(&self) -> Collection<UserRecord> {
        self.db.collection("users")
    }
}

#[async_trait]
impl IdentityResolver for RelayDb {
    async fn resolve_identity(&self, credential: &str) -> Result<String, IdentityError> {
        let record = self
            .auth()
            .find_one(doc! { "key": credential }, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to read auth record: {}", e);
                IdentityError::Internal(anyhow::anyhow!(e.to_string()))
            })?;

        record.map(|r| r.user_hash).ok_or(IdentityError::NotFound)
    }
}

#[async_trait]
impl QuotaStore for RelayDb {
    async fn remaining(&self, identity: &str) -> Result<i64, anyhow::Error> {
        let record = self
            .users()
            .find_one(doc! { "user_hash": identity }, None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read quota: {}", e))?;

        record
            .map(|r| r.remaining_requests)
            .ok_or_else(|| anyhow::anyhow!("no quota record for identity {}", identity))
    }

    async fn decrement(&self, identity: &str, amount: i64) -> Result<(), anyhow::Error> {
        // The filter makes the check and the decrement one atomic operation.
        let result = self
            .users()
            .update_one(
                doc! { "user_hash": identity, "remaining_requests": { "$gte": amount } },
                doc! { "$inc": { "remaining_requests": -amount } },
                None,
            )
            .await
            .map_err(|e| anyhow::anyhow!("Failed to decrement quota: {}", e))?;

        if result.matched_count == 0 {
            return Err(anyhow::anyhow!(
                "quota for identity {} is missing or below {}",
                identity,
                amount
            ));
        }

        Ok(())
    }
}
