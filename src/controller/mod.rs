//! Controller subsystem for the live telemetry subscription
//!
//! Keeps exactly one subscription alive for the current connection configuration:
//!
//! 1. [`subscription`] - State machine reacting to config versions and stream events
//! 2. [`attempt`] - Typestate pipeline of one connect attempt
//! 3. [`controller_handle`] - Task that drives the state machine and publishes views
//! 4. [`reading`] / [`history`] - Payload normalization and the bounded reading buffer
//!
//! # Architecture
//!
//! ```text
//! ConfigManager ─[ConfigSnapshot]─► Controller task ──► ConnectionAttempt (spawned)
//!                                        ▲    │
//!                    StreamEvent ────────┘    └─[DashboardView]─► presentation
//! ```
//!
//! Every input is tagged with the attempt it belongs to; inputs of superseded
//! attempts are dropped without touching state.

pub mod attempt;
pub mod controller_handle;
pub mod history;
pub mod reading;
pub mod subscription;

use serde::Serialize;

use history::ReadingHistory;
use subscription::{ControllerState, IdleReason};

/// Everything the presentation layer renders.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DashboardView {
    pub status: ControllerState,
    /// Last load/save failure reported by the configuration manager
    pub config_error: Option<String>,
    pub history: ReadingHistory,
}

impl DashboardView {
    /// User facing status line.
    ///
    /// A missing configuration asks the user to configure; it is never shown as an
    /// error.
    pub fn banner(&self) -> String {
        match (&self.status, &self.config_error) {
            (ControllerState::Connecting, _) => "Connecting to broker...".to_string(),
            (ControllerState::Error(reason), _) => format!("Error: {}", reason),
            (ControllerState::Idle(IdleReason::Unconfigured), _) => {
                "Please configure connection settings".to_string()
            }
            (_, Some(error)) => format!("Error: {}", error),
            (ControllerState::Active, None) => "Live".to_string(),
            (ControllerState::Idle(IdleReason::Completed), None) => "Stream ended".to_string(),
            (ControllerState::Idle(IdleReason::Shutdown), None) => "Stopped".to_string(),
        }
    }

    pub fn is_connecting(&self) -> bool {
        self.status == ControllerState::Connecting
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(status: ControllerState, config_error: Option<&str>) -> DashboardView {
        DashboardView {
            status,
            config_error: config_error.map(str::to_string),
            history: ReadingHistory::new(),
        }
    }

    #[test]
    fn unconfigured_is_not_an_error() {
        let banner = view(
            ControllerState::Idle(IdleReason::Unconfigured),
            Some("Missing connection configuration (@aws_topic). Please check settings."),
        )
        .banner();
        assert_eq!(banner, "Please configure connection settings");
    }

    #[test]
    fn controller_error_wins_over_config_error() {
        let banner = view(
            ControllerState::Error("Connection failed: refused".to_string()),
            Some("Failed to save settings: disk full"),
        )
        .banner();
        assert_eq!(banner, "Error: Connection failed: refused");
    }

    #[test]
    fn save_failure_shows_while_streaming() {
        let active = view(ControllerState::Active, Some("Failed to save settings: disk full"));
        assert_eq!(active.banner(), "Error: Failed to save settings: disk full");
        assert_eq!(view(ControllerState::Active, None).banner(), "Live");
    }

    #[test]
    fn connecting_has_its_own_indicator() {
        let connecting = view(ControllerState::Connecting, None);
        assert!(connecting.is_connecting());
        assert_eq!(connecting.banner(), "Connecting to broker...");
    }
}
