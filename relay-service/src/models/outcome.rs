//! Relay lifecycle states and outcomes.

use crate::services::error::RelayError;
use std::fmt;

/// Where a connection is in its lifecycle.
///
/// `Closed` is terminal and is entered exactly once per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Connected,
    Authenticated,
    QuotaChecked,
    Streaming,
    Completing,
    Failing,
    Closed,
}

impl RelayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayState::Connected => "connected",
            RelayState::Authenticated => "authenticated",
            RelayState::QuotaChecked => "quota_checked",
            RelayState::Streaming => "streaming",
            RelayState::Completing => "completing",
            RelayState::Failing => "failing",
            RelayState::Closed => "closed",
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of handling one inbound request frame.
#[derive(Debug)]
pub enum RelayOutcome {
    /// Upstream signalled `message_stop`; quota was charged.
    Completed,
    /// Refused before any upstream call: the connection was not ready,
    /// unknown session, no quota, or a store lookup failed.
    Refused(RelayError),
    /// The request frame was malformed or could not be rendered.
    ValidationError(RelayError),
    /// Upstream transport or protocol failure mid-relay.
    UpstreamError(RelayError),
    /// Forwarding an increment to the client failed.
    ClientSendError(RelayError),
    /// The relay deadline expired.
    Timeout,
}

impl RelayOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RelayOutcome::Completed)
    }

    pub fn error(&self) -> Option<&RelayError> {
        match self {
            RelayOutcome::Completed | RelayOutcome::Timeout => None,
            RelayOutcome::Refused(e)
            | RelayOutcome::ValidationError(e)
            | RelayOutcome::UpstreamError(e)
            | RelayOutcome::ClientSendError(e) => Some(e),
        }
    }

    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            RelayOutcome::Completed => "completed",
            RelayOutcome::Refused(_) => "refused",
            RelayOutcome::ValidationError(_) => "validation_error",
            RelayOutcome::UpstreamError(_) => "upstream_error",
            RelayOutcome::ClientSendError(_) => "client_send_error",
            RelayOutcome::Timeout => "timeout",
        }
    }
}
