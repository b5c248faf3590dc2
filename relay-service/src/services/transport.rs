//! Push transport: frames out to live client connections.

use super::error::TransportError;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;

#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(&self, connection_id: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Tear the connection down. Fails with `NotConnected` if it is already gone.
    async fn close(&self, connection_id: &str) -> Result<(), TransportError>;
}

/// Routes frames to the socket writer task owned by each connection.
///
/// Every accepted socket registers here and receives the outbound half of a
/// bounded channel. Dropping the registry's sender (on `close`) ends the
/// writer, which then sends a close frame to the client.
pub struct ConnectionRegistry {
    connections: DashMap<String, mpsc::Sender<Vec<u8>>>,
    buffer: usize,
}

impl ConnectionRegistry {
    pub fn new(buffer: usize) -> Self {
        Self {
            connections: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    pub fn register(&self, connection_id: &str) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.connections.insert(connection_id.to_string(), tx);
        rx
    }

    pub fn is_open(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[async_trait]
impl PushTransport for ConnectionRegistry {
    async fn send(&self, connection_id: &str, payload: &[u8]) -> Result<(), TransportError> {
        // Clone the sender out so no map guard is held across the await.
        let sender = self
            .connections
            .get(connection_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::NotConnected(connection_id.to_string()))?;

        sender
            .send(payload.to_vec())
            .await
            .map_err(|_| TransportError::SendFailed(connection_id.to_string()))
    }

    async fn close(&self, connection_id: &str) -> Result<(), TransportError> {
        self.connections
            .remove(connection_id)
            .map(|_| ())
            .ok_or_else(|| TransportError::NotConnected(connection_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_reach_the_registered_receiver_in_order() {
        let registry = ConnectionRegistry::new(4);
        let mut rx = registry.register("c1");

        registry.send("c1", b"Hello").await.unwrap();
        registry.send("c1", b" world").await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), b"Hello".to_vec());
        assert_eq!(rx.recv().await.unwrap(), b" world".to_vec());
    }

    #[tokio::test]
    async fn close_ends_the_writer_side() {
        let registry = ConnectionRegistry::new(4);
        let mut rx = registry.register("c1");

        registry.close("c1").await.unwrap();
        assert!(rx.recv().await.is_none());
        assert!(!registry.is_open("c1"));
        assert_eq!(
            registry.close("c1").await,
            Err(TransportError::NotConnected("c1".to_string()))
        );
    }

    #[tokio::test]
    async fn send_fails_once_the_writer_is_gone() {
        let registry = ConnectionRegistry::new(4);
        let rx = registry.register("c1");
        drop(rx);

        assert_eq!(
            registry.send("c1", b"x").await,
            Err(TransportError::SendFailed("c1".to_string()))
        );
    }

    #[tokio::test]
    async fn send_to_unknown_connection_is_rejected() {
        let registry = ConnectionRegistry::new(4);
        assert!(matches!(
            registry.send("nope", b"x").await,
            Err(TransportError::NotConnected(_))
        ));
    }
}
