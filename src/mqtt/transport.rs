//! Transport capability consumed by the subscription controller.
//!
//! ```text
//! Transport::connect(region, endpoint) ──► TransportClient::subscribe(topics) ──► Subscription
//!                                                                                 ├─ handle (unsubscribe)
//!                                                                                 └─ events (next / error / complete)
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

/// Events emitted by a live subscription.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// A message payload, already decoded into loosely structured JSON
    Next(Value),
    /// The subscription terminated with an error; no further events follow
    Error(String),
    /// The subscription ended normally; no further events follow
    Complete,
}

/// Cancellable token for one live subscription.
pub trait SubscriptionHandle: Send {
    /// Releases the subscription. Calling it again has no effect.
    fn unsubscribe(&mut self);
}

/// A subscription handed over to the controller.
pub struct Subscription {
    pub handle: Box<dyn SubscriptionHandle>,
    pub events: mpsc::Receiver<StreamEvent>,
}

/// A connected client, ready to subscribe.
#[async_trait]
pub trait TransportClient: Send {
    async fn subscribe(&mut self, topics: Vec<String>) -> Result<Subscription, TransportError>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        region: &str,
        endpoint: &str,
    ) -> Result<Box<dyn TransportClient>, TransportError>;
}

/// One-shot credential setup performed before each connect attempt.
///
/// Fire-and-forget: implementations report problems through logging only.
pub trait IdentityBootstrap: Send + Sync {
    fn configure(&self, identity_pool_id: &str, region: &str);
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid endpoint {0:?}")]
    InvalidEndpoint(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Subscription failed: {0}")]
    Subscribe(String),

    #[error("Connection attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Client error: {0}")]
    Client(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_keeps_sub_second_precision() {
        assert_eq!(
            TransportError::Timeout(Duration::from_millis(500)).to_string(),
            "Connection attempt timed out after 500ms"
        );
        assert_eq!(
            TransportError::Timeout(Duration::from_secs(15)).to_string(),
            "Connection attempt timed out after 15s"
        );
    }
}
