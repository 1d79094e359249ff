//! Text rendering of the dashboard.
//!
//! The latest reading gets a block of its own; older readings follow as one line each,
//! newest first.

use crate::controller::reading::Reading;
use crate::controller::DashboardView;

pub fn render(view: &DashboardView) -> Vec<String> {
    let mut lines = vec![view.banner()];

    let Some(latest) = view.history.latest() else {
        if !view.is_connecting() {
            lines.push("No readings yet".to_string());
        }
        return lines;
    };

    lines.push(format!("Latest reading ({})", latest.formatted_timestamp()));
    lines.push(format!("  Temperature  {:.1}°C", latest.temperature));
    lines.push(format!("  Humidity     {:.1} %", latest.humidity));
    lines.push(format!("  Light        {:.0} lux", latest.light));
    if let Some(source) = &latest.source {
        lines.push(format!("  Source       {}", source));
    }

    let previous: Vec<&Reading> = view.history.previous().collect();
    if !previous.is_empty() {
        lines.push(format!("Previous readings ({})", previous.len()));
        lines.extend(previous.into_iter().map(summary_line));
    }

    lines
}

fn summary_line(reading: &Reading) -> String {
    format!(
        "  {}  {:.1}°C  {:.1} %  {:.0} lux",
        reading.formatted_timestamp(),
        reading.temperature,
        reading.humidity,
        reading.light
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::history::ReadingHistory;
    use crate::controller::subscription::{ControllerState, IdleReason};
    use chrono::{Local, TimeZone};
    use serde_json::json;

    fn reading(id: i64, temperature: f64) -> Reading {
        let received = Local.timestamp_millis_opt(1_700_000_000_000 + id).unwrap();
        Reading::from_payload(
            &json!({ "temperature": temperature, "humidity": 40.24, "light": 300.4 }),
            id,
            received,
        )
    }

    #[test]
    fn empty_dashboard_shows_banner_only() {
        let view = DashboardView::default();
        assert_eq!(
            render(&view),
            vec!["Please configure connection settings", "No readings yet"]
        );

        let connecting = DashboardView {
            status: ControllerState::Connecting,
            ..DashboardView::default()
        };
        assert_eq!(render(&connecting), vec!["Connecting to broker..."]);
    }

    #[test]
    fn latest_and_previous_readings_are_listed() {
        let history = ReadingHistory::new()
            .prepend_and_cap(reading(1, 19.0))
            .prepend_and_cap(reading(2, 21.54));
        let view = DashboardView {
            status: ControllerState::Active,
            config_error: None,
            history,
        };

        let lines = render(&view);
        assert_eq!(lines[0], "Live");
        assert!(lines[1].starts_with("Latest reading ("));
        assert_eq!(lines[2], "  Temperature  21.5°C");
        assert_eq!(lines[3], "  Humidity     40.2 %");
        assert_eq!(lines[4], "  Light        300 lux");
        assert_eq!(lines[5], "Previous readings (1)");
        assert!(lines[6].ends_with("19.0°C  40.2 %  300 lux"));
        assert_eq!(lines.len(), 7);
    }

    #[test]
    fn history_survives_a_completed_stream() {
        let view = DashboardView {
            status: ControllerState::Idle(IdleReason::Completed),
            config_error: None,
            history: ReadingHistory::new().prepend_and_cap(reading(1, 19.0)),
        };
        let lines = render(&view);
        assert_eq!(lines[0], "Stream ended");
        assert_eq!(lines[2], "  Temperature  19.0°C");
    }
}
