//! rumqttc-backed implementation of the transport capability.
//!
//! Connecting polls the event loop until the broker's `ConnAck`; subscribing polls until
//! every `SubAck` is in. From then on a pump task owns the event loop and forwards
//! publishes into the subscription's event channel until the handle cancels it.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish,
    QoS, SubscribeReasonCode, TlsConfiguration, Transport as MqttWire,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{BrokerAddress, MqttSettings};
use super::identity::GuestIdentity;
use super::transport::{
    StreamEvent, Subscription, SubscriptionHandle, Transport, TransportClient, TransportError,
};

// time allowed for unsubscribe + disconnect to reach the broker after cancellation
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

pub struct MqttTransport {
    settings: MqttSettings,
    identity: GuestIdentity,
}

impl MqttTransport {
    pub fn new(settings: MqttSettings, identity: GuestIdentity) -> Self {
        Self { settings, identity }
    }

    fn options(&self, address: &BrokerAddress) -> MqttOptions {
        let client_id = format!(
            "{}-{}",
            self.settings.client_id,
            Utc::now().timestamp_millis()
        );
        let mut options = MqttOptions::new(client_id, address.host.clone(), address.port);
        options
            .set_keep_alive(self.settings.keep_alive)
            .set_clean_session(true);

        if let Some(pool_id) = self.identity.identity_pool_id() {
            options.set_credentials(pool_id, "");
        }

        if self.settings.use_tls {
            let wire = match &self.settings.ca_cert {
                Some(ca) => MqttWire::tls_with_config(TlsConfiguration::Simple {
                    ca: ca.clone(),
                    alpn: None,
                    client_auth: None,
                }),
                None => MqttWire::tls_with_default_config(),
            };
            options.set_transport(wire);
        }

        options
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(
        &self,
        region: &str,
        endpoint: &str,
    ) -> Result<Box<dyn TransportClient>, TransportError> {
        let address = BrokerAddress::resolve(region, endpoint, self.settings.default_port)?;
        info!("Connecting to {}:{}", address.host, address.port);

        let (client, mut eventloop) =
            AsyncClient::new(self.options(&address), self.settings.channel_capacity);

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        info!("Connection established with {}", address.host);
                        break;
                    }
                    return Err(TransportError::Connect(format!(
                        "broker refused connection: {:?}",
                        ack.code
                    )));
                }
                Ok(event) => debug!("Handshake event: {:?}", event),
                Err(e) => return Err(TransportError::Connect(e.to_string())),
            }
        }

        Ok(Box::new(MqttSession {
            client,
            eventloop: Some(eventloop),
            channel_capacity: self.settings.channel_capacity,
        }))
    }
}

/// A connected client whose event loop has not yet been handed to a pump.
struct MqttSession {
    client: AsyncClient,
    eventloop: Option<EventLoop>,
    channel_capacity: usize,
}

#[async_trait]
impl TransportClient for MqttSession {
    async fn subscribe(&mut self, topics: Vec<String>) -> Result<Subscription, TransportError> {
        let mut eventloop = self
            .eventloop
            .take()
            .ok_or_else(|| TransportError::Subscribe("client already subscribed".to_string()))?;

        for topic in &topics {
            self.client
                .subscribe(topic.clone(), QoS::AtLeastOnce)
                .await
                .map_err(|e| TransportError::Client(e.to_string()))?;
        }

        // retained messages may arrive between acknowledgements
        let mut early = Vec::new();
        let mut pending = topics.len();
        while pending > 0 {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    if ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure))
                    {
                        return Err(TransportError::Subscribe(format!(
                            "broker rejected subscription to {}",
                            topics.join(", ")
                        )));
                    }
                    pending = pending.saturating_sub(1);
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => early.push(publish),
                Ok(_) => {}
                Err(e) => return Err(TransportError::Subscribe(e.to_string())),
            }
        }
        info!("Subscribed to {}", topics.join(", "));

        let (event_tx, event_rx) = mpsc::channel(self.channel_capacity);
        let cancel = CancellationToken::new();
        tokio::spawn(pump_events(eventloop, early, event_tx, cancel.clone()));

        Ok(Subscription {
            handle: Box::new(MqttSubscriptionHandle {
                client: self.client.clone(),
                topics,
                cancel,
                released: false,
            }),
            events: event_rx,
        })
    }
}

async fn pump_events(
    mut eventloop: EventLoop,
    early: Vec<Publish>,
    events: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
) {
    for publish in early {
        if events.send(StreamEvent::Next(decode_payload(&publish))).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Subscription cancelled, draining outgoing requests");
                let _ = tokio::time::timeout(DRAIN_TIMEOUT, drain_until_disconnect(&mut eventloop)).await;
                break;
            }

            polled = eventloop.poll() => match polled {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    debug!("Received message on topic '{}'", publish.topic);
                    if events.send(StreamEvent::Next(decode_payload(&publish))).await.is_err() {
                        debug!("Event receiver dropped, stopping pump");
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    info!("Broker closed the session");
                    let _ = events.send(StreamEvent::Complete).await;
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    error!("MQTT event loop error: {}", e);
                    let _ = events.send(StreamEvent::Error(e.to_string())).await;
                    break;
                }
            }
        }
    }
}

async fn drain_until_disconnect(eventloop: &mut EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

/// JSON payloads are decoded; anything else is passed on as a string value.
fn decode_payload(publish: &Publish) -> Value {
    serde_json::from_slice(&publish.payload)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&publish.payload).into_owned()))
}

struct MqttSubscriptionHandle {
    client: AsyncClient,
    topics: Vec<String>,
    cancel: CancellationToken,
    released: bool,
}

impl SubscriptionHandle for MqttSubscriptionHandle {
    fn unsubscribe(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        for topic in &self.topics {
            if let Err(e) = self.client.try_unsubscribe(topic.clone()) {
                warn!("Failed to queue unsubscribe for '{}': {}", topic, e);
            }
        }
        if let Err(e) = self.client.try_disconnect() {
            warn!("Failed to queue disconnect: {}", e);
        }
        self.cancel.cancel();
        info!("Unsubscribed from {}", self.topics.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publish_with(payload: &[u8]) -> Publish {
        Publish::new("DHT11", QoS::AtLeastOnce, payload.to_vec())
    }

    #[test]
    fn json_payloads_are_decoded() {
        let value = decode_payload(&publish_with(br#"{"temperature": 21.5}"#));
        assert_eq!(value["temperature"], 21.5);
    }

    #[test]
    fn non_json_payloads_become_strings() {
        let value = decode_payload(&publish_with(b"21.5C"));
        assert_eq!(value, Value::String("21.5C".to_string()));
    }

    #[tokio::test]
    async fn invalid_endpoint_fails_before_dialing() {
        let transport = MqttTransport::new(MqttSettings::default(), GuestIdentity::new());
        let result = transport.connect("eu-north-1", "wss://").await;
        assert!(matches!(result, Err(TransportError::InvalidEndpoint(_))));
    }

    #[tokio::test]
    async fn handle_unsubscribes_once_and_cancels_the_pump() {
        let (client, _eventloop) = AsyncClient::new(MqttOptions::new("test", "localhost", 1883), 10);
        let cancel = CancellationToken::new();
        let mut handle = MqttSubscriptionHandle {
            client,
            topics: vec!["DHT11".to_string()],
            cancel: cancel.clone(),
            released: false,
        };

        handle.unsubscribe();
        handle.unsubscribe();

        assert!(cancel.is_cancelled());
        assert!(handle.released);
    }
}
