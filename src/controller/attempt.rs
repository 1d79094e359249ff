//! Typestate pipeline of a single connection attempt.
//!
//! ```text
//! Bootstrapping ──bootstrap()──► Connecting ──connect()──► Subscribing ──subscribe()──► Subscription
//! ```
//!
//! Bootstrapping is synchronous and runs on the controller task, so the identity is
//! always configured for the attempt that is about to dial. Connecting and subscribing
//! run on a spawned task; their result is matched against the live attempt by the
//! controller, never applied directly.

use statum::{machine, state};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::subscription::{AttemptId, ConnectRequest};
use crate::mqtt::transport::{
    IdentityBootstrap, Subscription, Transport, TransportClient, TransportError,
};
use crate::persistence::ConnectionConfig;

#[state]
#[derive(Debug, Clone)]
pub enum AttemptState {
    Bootstrapping,
    Connecting,
    Subscribing,
}

#[machine]
pub struct ConnectionAttempt<S: AttemptState> {
    attempt: AttemptId,
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
    client: Option<Box<dyn TransportClient>>,
}

impl<S: AttemptState> ConnectionAttempt<S> {
    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }
}

impl ConnectionAttempt<Bootstrapping> {
    pub fn create(request: ConnectRequest, transport: Arc<dyn Transport>) -> Self {
        Self::new(request.attempt, request.config, transport, None)
    }

    /// Configures the guest identity for this attempt's pool.
    pub fn bootstrap(self, identity: &dyn IdentityBootstrap) -> ConnectionAttempt<Connecting> {
        debug!(
            "Attempt {}: bootstrapping identity pool {}",
            self.attempt, self.config.identity_pool_id
        );
        identity.configure(&self.config.identity_pool_id, &self.config.region);
        self.transition()
    }
}

impl ConnectionAttempt<Connecting> {
    pub async fn connect(mut self) -> Result<ConnectionAttempt<Subscribing>, TransportError> {
        info!(
            "Attempt {}: connecting to {} in {}",
            self.attempt, self.config.mqtt_endpoint, self.config.region
        );
        let client = self
            .transport
            .connect(&self.config.region, &self.config.mqtt_endpoint)
            .await?;
        self.client = Some(client);
        Ok(self.transition())
    }

    /// Connects and subscribes, giving up after `timeout` when one is set.
    pub async fn establish(self, timeout: Option<Duration>) -> Result<Subscription, TransportError> {
        let pipeline = self.run();
        match timeout {
            Some(limit) => tokio::time::timeout(limit, pipeline)
                .await
                .map_err(|_| TransportError::Timeout(limit))?,
            None => pipeline.await,
        }
    }

    async fn run(self) -> Result<Subscription, TransportError> {
        self.connect().await?.subscribe().await
    }
}

impl ConnectionAttempt<Subscribing> {
    pub async fn subscribe(mut self) -> Result<Subscription, TransportError> {
        let mut client = self
            .client
            .take()
            .ok_or_else(|| TransportError::Client("no connected client".to_string()))?;
        debug!("Attempt {}: subscribing to {}", self.attempt, self.config.topic);
        client.subscribe(vec![self.config.topic.clone()]).await
    }
}
