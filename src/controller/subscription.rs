use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

use super::history::ReadingHistory;
use super::reading::Reading;
use super::DashboardView;
use crate::mqtt::transport::{StreamEvent, SubscriptionHandle};
use crate::persistence::config_manager::ConfigSnapshot;
use crate::persistence::ConnectionConfig;

/// Why the controller holds no subscription.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum IdleReason {
    /// No complete connection configuration is available
    Unconfigured,
    /// The broker ended the subscription normally
    Completed,
    /// The controller has been shut down
    Shutdown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum ControllerState {
    Idle(IdleReason),
    Connecting,
    Active,
    /// The last attempt failed; waits for a new configuration version
    Error(String),
}

impl Default for ControllerState {
    fn default() -> Self {
        Self::Idle(IdleReason::Unconfigured)
    }
}

/// Generation number of one connection attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptId(u64);

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Work handed to the driver when a new configuration version must be connected.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectRequest {
    pub attempt: AttemptId,
    pub config: ConnectionConfig,
}

/// Lifecycle of the single live subscription.
///
/// Pure state: the controller never awaits anything. The driver feeds it configuration
/// snapshots, connect outcomes and stream events, each tagged with the attempt they
/// belong to. Events from any attempt other than the live one are dropped, so a
/// superseded connect can never leak into the current state.
pub struct SubscriptionController {
    state: ControllerState,
    history: ReadingHistory,
    handle: Option<Box<dyn SubscriptionHandle>>,
    config_error: Option<String>,
    last_seen_version: Option<u64>,
    next_attempt: u64,
    live_attempt: Option<AttemptId>,
    last_reading_id: i64,
    shut_down: bool,
}

impl Default for SubscriptionController {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionController {
    pub fn new() -> Self {
        Self {
            state: ControllerState::default(),
            history: ReadingHistory::new(),
            handle: None,
            config_error: None,
            last_seen_version: None,
            next_attempt: 0,
            live_attempt: None,
            last_reading_id: 0,
            shut_down: false,
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn history(&self) -> &ReadingHistory {
        &self.history
    }

    pub fn has_live_subscription(&self) -> bool {
        self.handle.is_some()
    }

    /// Whether events tagged with `attempt` may still change the controller.
    pub fn is_live(&self, attempt: AttemptId) -> bool {
        !self.shut_down && self.live_attempt == Some(attempt)
    }

    pub fn view(&self) -> DashboardView {
        DashboardView {
            status: self.state.clone(),
            config_error: self.config_error.clone(),
            history: self.history.clone(),
        }
    }

    /// Reacts to the configuration manager's state.
    ///
    /// Returns a request when a present configuration carries a version not seen
    /// before; the previous subscription is released first.
    pub fn on_config(&mut self, snapshot: &ConfigSnapshot) -> Option<ConnectRequest> {
        if self.shut_down {
            return None;
        }
        self.config_error = snapshot.error.clone();

        let Some(config) = &snapshot.config else {
            self.release();
            self.live_attempt = None;
            if self.state != ControllerState::Idle(IdleReason::Unconfigured) {
                info!("No connection configuration, going idle");
            }
            self.state = ControllerState::Idle(IdleReason::Unconfigured);
            return None;
        };

        if self.last_seen_version == Some(snapshot.version) {
            return None;
        }
        self.last_seen_version = Some(snapshot.version);

        self.release();
        self.next_attempt += 1;
        let attempt = AttemptId(self.next_attempt);
        self.live_attempt = Some(attempt);
        self.state = ControllerState::Connecting;
        info!(
            "Configuration version {} received, starting attempt {}",
            snapshot.version, attempt
        );

        Some(ConnectRequest {
            attempt,
            config: config.clone(),
        })
    }

    /// Takes ownership of an established subscription.
    ///
    /// A handle from a superseded attempt is unsubscribed right away and `false` is
    /// returned; the caller must then discard the attempt's event stream.
    pub fn on_connected(&mut self, attempt: AttemptId, mut handle: Box<dyn SubscriptionHandle>) -> bool {
        if !self.is_live(attempt) {
            debug!("Attempt {} connected after being superseded, releasing it", attempt);
            handle.unsubscribe();
            return false;
        }

        self.release();
        self.handle = Some(handle);
        self.state = ControllerState::Active;
        info!("Attempt {} is active", attempt);
        true
    }

    pub fn on_connect_failed(&mut self, attempt: AttemptId, reason: String) {
        if !self.is_live(attempt) {
            debug!("Ignoring failure of stale attempt {}: {}", attempt, reason);
            return;
        }

        warn!("Attempt {} failed: {}", attempt, reason);
        self.live_attempt = None;
        self.state = ControllerState::Error(reason);
    }

    pub fn on_stream_event(&mut self, attempt: AttemptId, event: StreamEvent, received_at: DateTime<Local>) {
        if !self.is_live(attempt) || self.handle.is_none() {
            debug!("Ignoring stream event of stale attempt {}", attempt);
            return;
        }

        match event {
            StreamEvent::Next(payload) => {
                let id = self.next_reading_id(received_at);
                let reading = Reading::from_payload(&payload, id, received_at);
                debug!(
                    "Reading {}: {:.1}°C {:.1}% {:.0} lux",
                    reading.id, reading.temperature, reading.humidity, reading.light
                );
                self.history = std::mem::take(&mut self.history).prepend_and_cap(reading);
            }
            StreamEvent::Error(reason) => {
                // the transport has already torn the subscription down
                self.handle = None;
                self.live_attempt = None;
                warn!("Subscription of attempt {} failed: {}", attempt, reason);
                self.state = ControllerState::Error(reason);
            }
            StreamEvent::Complete => {
                self.handle = None;
                self.live_attempt = None;
                info!("Subscription of attempt {} completed", attempt);
                self.state = ControllerState::Idle(IdleReason::Completed);
            }
        }
    }

    /// Releases any live subscription. Safe to call in every state and repeatedly.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.release();
        self.live_attempt = None;
        self.shut_down = true;
        self.state = ControllerState::Idle(IdleReason::Shutdown);
        info!("Subscription controller shut down");
    }

    fn release(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.unsubscribe();
        }
    }

    // receipt time in milliseconds, bumped when two readings share a millisecond
    fn next_reading_id(&mut self, received_at: DateTime<Local>) -> i64 {
        let id = received_at.timestamp_millis().max(self.last_reading_id + 1);
        self.last_reading_id = id;
        id
    }
}
