//! Sensor readings and payload normalization.
//!
//! Telemetry arrives as loosely structured JSON. Normalization never fails: numeric
//! fields that are missing or not numeric become `0.0`, and a missing or unparsable
//! time field falls back to the receipt time.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::Serialize;
use serde_json::Value;

// the simulated stations capitalize their keys
const TEMPERATURE_FIELDS: &[&str] = &["temperature", "Temperature"];
// older stations publish humidity under the atmospheric pressure name
const HUMIDITY_FIELDS: &[&str] = &["humidity", "Humidity", "pressure"];
const LIGHT_FIELDS: &[&str] = &["light", "Light"];
const TIME_FIELDS: &[&str] = &["time_stamp", "timestamp"];
const SOURCE_FIELDS: &[&str] = &["topic"];

const NAIVE_TIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// One normalized sensor sample.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Reading {
    /// Receipt time in epoch milliseconds, unique within one controller
    pub id: i64,
    /// Degrees Celsius
    pub temperature: f64,
    /// Relative humidity in percent
    pub humidity: f64,
    /// Lux
    pub light: f64,
    pub timestamp: DateTime<Local>,
    /// Station topic reported inside the payload, if any
    pub source: Option<String>,
}

impl Reading {
    /// Normalizes an incoming payload received at `received_at`.
    pub fn from_payload(payload: &Value, id: i64, received_at: DateTime<Local>) -> Self {
        let timestamp = first_field(payload, TIME_FIELDS)
            .and_then(parse_timestamp)
            .unwrap_or(received_at);

        Self {
            id,
            temperature: numeric_field(payload, TEMPERATURE_FIELDS),
            humidity: numeric_field(payload, HUMIDITY_FIELDS),
            light: numeric_field(payload, LIGHT_FIELDS),
            timestamp,
            source: first_field(payload, SOURCE_FIELDS)
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    /// Timestamp as shown on the dashboard.
    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

fn first_field<'a>(payload: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| payload.get(*name))
        .find(|value| !value.is_null())
}

fn numeric_field(payload: &Value, names: &[&str]) -> f64 {
    first_field(payload, names)
        .and_then(|value| match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Local>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(from_epoch_millis),
        Value::String(s) => parse_time_string(s.trim()),
        _ => None,
    }
}

fn from_epoch_millis(millis: i64) -> Option<DateTime<Local>> {
    // a zero epoch is what an unset clock publishes
    if millis == 0 {
        return None;
    }
    Local.timestamp_millis_opt(millis).single()
}

fn parse_time_string(s: &str) -> Option<DateTime<Local>> {
    if s.is_empty() {
        return None;
    }
    if let Ok(millis) = s.parse::<i64>() {
        return from_epoch_millis(millis);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Local));
    }
    NAIVE_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
}
