use thiserror::Error;

/// Failures that end a relay. The `Display` text is what the client is told.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("authentication required: {0}")]
    AuthenticationFailure(String),

    #[error("no remaining quota")]
    QuotaExhausted,

    /// A request arrived while the connection was not `Authenticated`.
    #[error("connection not ready for a request: {0}")]
    NotReady(String),

    #[error("validation error: {0}")]
    ValidationFailure(String),

    #[error("upstream request failed: {0}")]
    UpstreamTransportFailure(String),

    #[error("upstream sent an invalid stream: {0}")]
    UpstreamProtocolFailure(String),

    #[error("failed to send to client: {0}")]
    ClientSendFailure(String),

    #[error("timeout")]
    Timeout,

    #[error("store error: {0}")]
    StoreFailure(String),
}

/// Failure reported by the upstream decoder.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Connection, HTTP status or body read failure.
    #[error("{0}")]
    Transport(String),

    /// Undecodable payload or a stream that ended without `message_stop`.
    #[error("{0}")]
    Protocol(String),
}

impl From<DecodeError> for RelayError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Transport(msg) => RelayError::UpstreamTransportFailure(msg),
            DecodeError::Protocol(msg) => RelayError::UpstreamProtocolFailure(msg),
        }
    }
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("no identity for credential")]
    NotFound,

    #[error("identity lookup failed: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<IdentityError> for RelayError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::NotFound => {
                RelayError::AuthenticationFailure("unknown credential".to_string())
            }
            IdentityError::Internal(e) => RelayError::StoreFailure(e.to_string()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection {0} is not open")]
    NotConnected(String),

    #[error("send to connection {0} failed")]
    SendFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_map_onto_upstream_failures() {
        assert_eq!(
            RelayError::from(DecodeError::Transport("refused".into())),
            RelayError::UpstreamTransportFailure("refused".into())
        );
        assert_eq!(
            RelayError::from(DecodeError::Protocol("bad json".into())),
            RelayError::UpstreamProtocolFailure("bad json".into())
        );
    }

    #[test]
    fn unknown_credential_is_an_authentication_failure() {
        let err = RelayError::from(IdentityError::NotFound);
        assert!(matches!(err, RelayError::AuthenticationFailure(_)));
    }

    #[test]
    fn client_facing_messages() {
        assert_eq!(RelayError::QuotaExhausted.to_string(), "no remaining quota");
        assert_eq!(RelayError::Timeout.to_string(), "timeout");
    }
}
