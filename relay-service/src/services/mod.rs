pub mod database;
pub mod error;
pub mod identity;
pub mod memory;
pub mod metrics;
pub mod prompt;
pub mod quota;
pub mod session_store;
pub mod transport;
pub mod upstream;

pub use database::RelayDb;
pub use error::{DecodeError, IdentityError, RelayError, TransportError};
pub use identity::IdentityResolver;
pub use memory::{InMemoryQuotaStore, InMemorySessionStore, StaticIdentityResolver};
pub use prompt::{PromptRenderer, TemplateRenderer};
pub use quota::QuotaStore;
pub use session_store::{RedisSessionStore, SessionStore};
pub use transport::{ConnectionRegistry, PushTransport};
pub use upstream::UpstreamClient;
