//! Per-identity relay quota.

use async_trait::async_trait;

/// Remaining relays per identity.
///
/// `decrement` must be atomic across concurrent callers: two relays for the
/// same identity must not both consume the last unit.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    async fn remaining(&self, identity: &str) -> Result<i64, anyhow::Error>;

    async fn decrement(&self, identity: &str, amount: i64) -> Result<(), anyhow::Error>;
}
