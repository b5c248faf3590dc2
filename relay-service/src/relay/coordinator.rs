//! Relay Coordinator.
//!
//! Owns every connection from connect to close:
//!
//! ```text
//! Connected -> Authenticated -> QuotaChecked -> Streaming -> Completing -> Closed
//!                                                         \-> Failing  -> Closed
//! ```
//!
//! Each relay runs the upstream decoder as a separate producer task and
//! consumes its increments, failure and completion signals here. The
//! coordinator is the only caller of the push transport and the stores for
//! a connection.

use crate::config::{RelaySettings, UpstreamConfig};
use crate::models::{ConnectionSession, RelayOutcome, RelayState, UpstreamRequest};
use crate::services::error::{DecodeError, RelayError, TransportError};
use crate::services::metrics;
use crate::services::upstream::{run_decoder, DecoderChannels};
use crate::services::{
    IdentityResolver, PromptRenderer, PushTransport, QuotaStore, SessionStore, UpstreamClient,
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Upper bound on delivering the error text before closing.
const FINAL_MESSAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline used when the configured timeout does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// External collaborators, injected at construction.
#[derive(Clone)]
pub struct RelayDependencies {
    pub identity: Arc<dyn IdentityResolver>,
    pub quota: Arc<dyn QuotaStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub transport: Arc<dyn PushTransport>,
    pub upstream: Arc<dyn UpstreamClient>,
    pub renderer: Arc<dyn PromptRenderer>,
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub model: String,
    pub max_tokens: u32,
    /// Measured from receipt of the request frame.
    pub relay_timeout: Duration,
}

impl CoordinatorSettings {
    pub fn from_config(upstream: &UpstreamConfig, relay: &RelaySettings) -> Self {
        Self {
            model: upstream.model.clone(),
            max_tokens: upstream.max_tokens,
            relay_timeout: relay.timeout,
        }
    }
}

struct Lifecycle {
    state: RelayState,
    /// Cancelled when the client goes away.
    disconnected: CancellationToken,
}

pub struct RelayCoordinator {
    deps: RelayDependencies,
    settings: CoordinatorSettings,
    lifecycles: DashMap<String, Lifecycle>,
}

impl RelayCoordinator {
    pub fn new(deps: RelayDependencies, settings: CoordinatorSettings) -> Self {
        Self {
            deps,
            settings,
            lifecycles: DashMap::new(),
        }
    }

    /// Current state. Connections that were never opened, or have been
    /// torn down, report `Closed`.
    pub fn state(&self, connection_id: &str) -> RelayState {
        self.lifecycles
            .get(connection_id)
            .map(|l| l.state)
            .unwrap_or(RelayState::Closed)
    }

    pub fn active_connections(&self) -> usize {
        self.lifecycles.len()
    }

    /// Authenticate a newly accepted connection and record its session.
    ///
    /// On failure the client is told why and the connection is closed; no
    /// session is left behind.
    #[tracing::instrument(skip(self, credential))]
    pub async fn on_connect(
        &self,
        connection_id: &str,
        credential: Option<&str>,
    ) -> Result<ConnectionSession, RelayError> {
        self.lifecycles.insert(
            connection_id.to_string(),
            Lifecycle {
                state: RelayState::Connected,
                disconnected: CancellationToken::new(),
            },
        );
        metrics::set_active_connections(self.lifecycles.len() as i64);

        match self.authenticate(connection_id, credential).await {
            Ok(session) => {
                self.set_state(connection_id, RelayState::Authenticated);
                tracing::info!(identity = %session.identity, "Connection authenticated");
                Ok(session)
            }
            Err(err) => {
                tracing::warn!(error = %err, "Connection refused");
                self.set_state(connection_id, RelayState::Failing);
                self.close(connection_id, Some(err.to_string())).await;
                Err(err)
            }
        }
    }

    async fn authenticate(
        &self,
        connection_id: &str,
        credential: Option<&str>,
    ) -> Result<ConnectionSession, RelayError> {
        let credential = credential.filter(|c| !c.is_empty()).ok_or_else(|| {
            RelayError::AuthenticationFailure("no credential provided".to_string())
        })?;

        let identity = self.deps.identity.resolve_identity(credential).await?;

        self.deps
            .sessions
            .put(connection_id, &identity)
            .await
            .map_err(|e| RelayError::StoreFailure(e.to_string()))?;

        Ok(ConnectionSession::new(connection_id, identity))
    }

    /// Run one relay for `raw_request` and close the connection afterwards,
    /// whatever the outcome.
    ///
    /// Only a connection in `Authenticated` accepts a request. Any other
    /// request is refused and leaves the connection untouched.
    #[tracing::instrument(skip(self, raw_request), fields(identity = tracing::field::Empty))]
    pub async fn on_message(&self, connection_id: &str, raw_request: &str) -> RelayOutcome {
        let started = Instant::now();

        if let Err(err) = self.claim(connection_id) {
            tracing::warn!(error = %err, "Request refused");
            let outcome = RelayOutcome::Refused(err);
            metrics::record_relay(outcome.label(), started.elapsed().as_secs_f64());
            return outcome;
        }

        let outcome = self.relay(connection_id, raw_request, started).await;
        metrics::record_relay(outcome.label(), started.elapsed().as_secs_f64());

        match &outcome {
            RelayOutcome::Completed => {
                tracing::info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Relay completed"
                );
                self.close(connection_id, None).await;
            }
            failed => {
                tracing::error!(outcome = failed.label(), error = ?failed.error(), "Relay failed");
                self.set_state(connection_id, RelayState::Failing);
                self.close(connection_id, client_message(failed)).await;
            }
        }

        outcome
    }

    /// Move `Authenticated -> QuotaChecked` under the entry lock, so at
    /// most one relay starts per connection.
    fn claim(&self, connection_id: &str) -> Result<(), RelayError> {
        let Some(mut lifecycle) = self.lifecycles.get_mut(connection_id) else {
            return Err(RelayError::AuthenticationFailure(
                "connection is not open".to_string(),
            ));
        };
        if lifecycle.state != RelayState::Authenticated {
            return Err(RelayError::NotReady(lifecycle.state.to_string()));
        }

        tracing::debug!(from = %lifecycle.state, to = %RelayState::QuotaChecked, "State transition");
        lifecycle.state = RelayState::QuotaChecked;
        Ok(())
    }

    async fn relay(&self, connection_id: &str, raw_request: &str, started: Instant) -> RelayOutcome {
        let identity = match self.deps.sessions.get(connection_id).await {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                return RelayOutcome::Refused(RelayError::AuthenticationFailure(
                    "no session for connection".to_string(),
                ))
            }
            Err(e) => return RelayOutcome::Refused(RelayError::StoreFailure(e.to_string())),
        };
        tracing::Span::current().record("identity", identity.as_str());

        let remaining = match self.deps.quota.remaining(&identity).await {
            Ok(remaining) => remaining,
            Err(e) => return RelayOutcome::Refused(RelayError::StoreFailure(e.to_string())),
        };
        if remaining <= 0 {
            return RelayOutcome::Refused(RelayError::QuotaExhausted);
        }

        let prompt = match self.deps.renderer.render(raw_request) {
            Ok(prompt) => prompt,
            Err(e) => return RelayOutcome::ValidationError(e),
        };
        let request =
            UpstreamRequest::streaming(&self.settings.model, self.settings.max_tokens, prompt);

        self.set_state(connection_id, RelayState::Streaming);
        let deadline = started
            .checked_add(self.settings.relay_timeout)
            .unwrap_or_else(|| started + FAR_FUTURE);
        let outcome = self.stream(connection_id, request, deadline).await;

        if outcome.is_completed() {
            self.set_state(connection_id, RelayState::Completing);
            // Charged only on a terminal event.
            if let Err(e) = self.deps.quota.decrement(&identity, 1).await {
                tracing::warn!(error = %e, "Failed to decrement quota");
                metrics::record_cleanup_failure("quota_decrement");
            }
        }

        outcome
    }

    /// Forward increments until the producer signals completion or failure,
    /// the deadline passes, or the client goes away.
    async fn stream(
        &self,
        connection_id: &str,
        request: UpstreamRequest,
        deadline: Instant,
    ) -> RelayOutcome {
        let disconnected = self
            .lifecycles
            .get(connection_id)
            .map(|l| l.disconnected.clone())
            .unwrap_or_default();

        let (increments_tx, mut increments) = mpsc::channel(1);
        let (errors_tx, mut errors) = oneshot::channel();
        let (done_tx, mut done) = oneshot::channel();
        let cancel = disconnected.child_token();
        // Stops the producer on every return below.
        let _stop_producer = cancel.clone().drop_guard();

        tokio::spawn(
            run_decoder(
                self.deps.upstream.clone(),
                request,
                DecoderChannels {
                    increments: increments_tx,
                    errors: errors_tx,
                    done: done_tx,
                    cancel,
                },
            )
            .in_current_span(),
        );

        let deadline = tokio::time::sleep_until(deadline);
        tokio::pin!(deadline);

        let mut increments_open = true;
        let mut errors_open = true;
        let mut done_open = true;

        loop {
            if !increments_open && !errors_open && !done_open {
                return RelayOutcome::UpstreamError(RelayError::from(DecodeError::Protocol(
                    "upstream decoder stopped without a terminal signal".to_string(),
                )));
            }

            // Increments are polled before the terminal signals so every
            // buffered increment is forwarded first.
            tokio::select! {
                biased;
                _ = &mut deadline => return RelayOutcome::Timeout,
                _ = disconnected.cancelled() => {
                    return RelayOutcome::ClientSendError(RelayError::ClientSendFailure(
                        "client disconnected".to_string(),
                    ));
                }
                text = increments.recv(), if increments_open => match text {
                    Some(text) => {
                        let sent = tokio::select! {
                            biased;
                            _ = &mut deadline => return RelayOutcome::Timeout,
                            sent = self.deps.transport.send(connection_id, text.as_bytes()) => sent,
                        };
                        if let Err(e) = sent {
                            return RelayOutcome::ClientSendError(RelayError::ClientSendFailure(
                                e.to_string(),
                            ));
                        }
                        metrics::record_increment();
                    }
                    None => increments_open = false,
                },
                err = &mut errors, if errors_open => match err {
                    Ok(e) => return RelayOutcome::UpstreamError(e.into()),
                    Err(_) => errors_open = false,
                },
                stopped = &mut done, if done_open => match stopped {
                    Ok(()) => return RelayOutcome::Completed,
                    Err(_) => done_open = false,
                },
            }
        }
    }

    /// The client went away. Safe to call any number of times.
    #[tracing::instrument(skip(self))]
    pub async fn on_disconnect(&self, connection_id: &str) {
        if let Some((_, lifecycle)) = self.lifecycles.remove(connection_id) {
            lifecycle.disconnected.cancel();
            metrics::set_active_connections(self.lifecycles.len() as i64);
            tracing::info!(state = %lifecycle.state, "Client disconnected");
        }

        self.release(connection_id).await;
    }

    /// Enter `Closed`. Runs its cleanup at most once per connection.
    async fn close(&self, connection_id: &str, final_message: Option<String>) {
        let Some((_, lifecycle)) = self.lifecycles.remove(connection_id) else {
            tracing::debug!("Connection already closed");
            return;
        };
        metrics::set_active_connections(self.lifecycles.len() as i64);

        if let Some(message) = final_message {
            let send = self.deps.transport.send(connection_id, message.as_bytes());
            match tokio::time::timeout(FINAL_MESSAGE_TIMEOUT, send).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "Final message not delivered"),
                Err(_) => tracing::warn!("Timed out delivering final message"),
            }
        }

        self.release(connection_id).await;
        tracing::info!(from = %lifecycle.state, "Connection closed");
    }

    /// Tear down the transport and the session record. Each step is
    /// attempted regardless of the other.
    async fn release(&self, connection_id: &str) {
        match self.deps.transport.close(connection_id).await {
            Ok(()) | Err(TransportError::NotConnected(_)) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Failed to close transport");
                metrics::record_cleanup_failure("transport_close");
            }
        }

        if let Err(e) = self.deps.sessions.delete(connection_id).await {
            tracing::warn!(error = %e, "Failed to delete session");
            metrics::record_cleanup_failure("session_delete");
        }
    }

    fn set_state(&self, connection_id: &str, state: RelayState) {
        if let Some(mut lifecycle) = self.lifecycles.get_mut(connection_id) {
            tracing::debug!(from = %lifecycle.state, to = %state, "State transition");
            lifecycle.state = state;
        }
    }
}

/// Text sent to the client before closing. A client that could not be
/// written to is not written to again.
fn client_message(outcome: &RelayOutcome) -> Option<String> {
    match outcome {
        RelayOutcome::Completed | RelayOutcome::ClientSendError(_) => None,
        RelayOutcome::Timeout => Some(RelayError::Timeout.to_string()),
        RelayOutcome::Refused(e) | RelayOutcome::ValidationError(e) | RelayOutcome::UpstreamError(e) => {
            Some(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_tell_the_client_why() {
        assert_eq!(
            client_message(&RelayOutcome::Refused(RelayError::QuotaExhausted)).as_deref(),
            Some("no remaining quota")
        );
        assert_eq!(
            client_message(&RelayOutcome::Timeout).as_deref(),
            Some("timeout")
        );
    }

    #[test]
    fn completed_and_broken_clients_get_no_message() {
        assert!(client_message(&RelayOutcome::Completed).is_none());
        assert!(client_message(&RelayOutcome::ClientSendError(RelayError::ClientSendFailure(
            "gone".into()
        )))
        .is_none());
    }
}
