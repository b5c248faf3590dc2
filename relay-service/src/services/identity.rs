//! Credential → identity resolution.

use super::error::IdentityError;
use async_trait::async_trait;

/// Maps an opaque connection credential to the caller's stable identity.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve_identity(&self, credential: &str) -> Result<String, IdentityError>;
}
