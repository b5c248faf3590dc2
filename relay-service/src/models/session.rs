//! Connection session model.

use serde::{Deserialize, Serialize};

/// Binds a live client connection to the identity it authenticated as.
///
/// Exactly one exists per authenticated connection, from a successful
/// connect until the connection closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSession {
    /// Opaque id assigned by the transport when the socket was accepted.
    pub connection_id: String,

    /// Stable key of the caller behind the connection.
    pub identity: String,
}

impl ConnectionSession {
    pub fn new(connection_id: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            identity: identity.into(),
        }
    }
}
