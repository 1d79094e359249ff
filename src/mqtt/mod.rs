//! # MQTT Integration Module
//!
//! Streams sensor telemetry from an MQTT broker into the subscription controller.
//!
//! ## Why This Module Exists
//!
//! The controller only needs a narrow capability: connect to `(region, endpoint)`,
//! subscribe to a topic, receive `next` / `error` / `complete` events and cancel the
//! subscription. This module defines that capability and implements it on top of
//! `rumqttc`, so the controller can be driven by a scripted transport in tests.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── transport.rs     - Capability traits, stream events and transport errors
//! ├── config.rs        - Client settings and broker endpoint normalization
//! ├── identity.rs      - Guest identity bootstrap shared with the client
//! └── mqtt_handler.rs  - rumqttc connection, subscription pump and handle
//! ```
//!
//! ## Connection Lifecycle
//!
//! 1. The identity bootstrap records the pool id for the next connection
//! 2. `connect` dials the broker and waits for `ConnAck`
//! 3. `subscribe` waits for `SubAck`, then hands the event loop to a pump task
//! 4. The pump forwards publishes until the handle unsubscribes or the broker goes away

pub mod config;
pub mod identity;
pub mod mqtt_handler;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
