//! Live sensor dashboard: keeps one MQTT telemetry subscription in sync with the stored
//! connection configuration and exposes the readings as a [`controller::DashboardView`].

pub mod config;
pub mod controller;
pub mod mqtt;
pub mod persistence;
pub mod ui;
