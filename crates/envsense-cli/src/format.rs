//! Output formatting for terminal and JSON output.

use anyhow::{Context, Result};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use envsense_core::{AdapterState, PeripheralHandle, SensorReading, UserMessage};

fn timestamp(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.unix_timestamp().to_string())
}

/// One discovered peripheral, as a table row.
pub fn format_handle(handle: &PeripheralHandle) -> String {
    format!(
        "{:<24} {:<20} {}\n",
        handle.name.as_deref().unwrap_or("Unknown"),
        handle.address,
        timestamp(handle.discovered_at)
    )
}

/// Header matching [`format_handle`] rows.
pub fn scan_header() -> String {
    format!("{:<24} {:<20} {}\n", "NAME", "ADDRESS", "DISCOVERED")
}

/// One reading as a text line.
pub fn format_reading_text(reading: &SensorReading, at: OffsetDateTime) -> String {
    let label = match reading {
        SensorReading::Temperature { .. } => "Temperature",
        SensorReading::Pressure { .. } => "Pressure",
    };
    format!("{} {:<12} {}\n", timestamp(at), label, reading)
}

#[derive(Serialize)]
struct ReadingRecord<'a> {
    timestamp: String,
    #[serde(flatten)]
    reading: &'a SensorReading,
    value: f64,
    unit: &'static str,
}

/// One reading as a single-line JSON object.
pub fn format_reading_json(reading: &SensorReading, at: OffsetDateTime) -> Result<String> {
    let record = ReadingRecord {
        timestamp: timestamp(at),
        reading,
        value: reading.value(),
        unit: reading.unit(),
    };
    let mut line = serde_json::to_string(&record).context("Failed to serialize reading")?;
    line.push('\n');
    Ok(line)
}

/// Adapter state with its user message.
pub fn format_adapter_state(state: AdapterState) -> String {
    format!("{}: {}\n", state, state.user_message())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const AT: OffsetDateTime = datetime!(2026-03-01 12:30:00 UTC);

    #[test]
    fn test_format_reading_text() {
        let line = format_reading_text(&SensorReading::Temperature { centi_celsius: 1000 }, AT);
        assert_eq!(line, "2026-03-01T12:30:00Z Temperature  10.00 °C\n");

        let line = format_reading_text(&SensorReading::Pressure { deci_hpa: 10132 }, AT);
        assert!(line.ends_with("Pressure     1013.2 hPa\n"));
    }

    #[test]
    fn test_format_reading_json() {
        let line = format_reading_json(&SensorReading::Pressure { deci_hpa: 10132 }, AT).unwrap();
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["kind"], "pressure");
        assert_eq!(value["deci_hpa"], 10132);
        assert_eq!(value["value"], 1013.2);
        assert_eq!(value["unit"], "hPa");
        assert_eq!(value["timestamp"], "2026-03-01T12:30:00Z");
    }

    #[test]
    fn test_format_handle() {
        let handle = PeripheralHandle::new("aa:bb:cc:dd:ee:ff", Some("Sensor".to_string()))
            .with_discovered_at(AT);
        let row = format_handle(&handle);
        assert!(row.starts_with("Sensor"));
        assert!(row.contains("AA:BB:CC:DD:EE:FF"));
        assert!(row.trim_end().ends_with("2026-03-01T12:30:00Z"));

        let unnamed = PeripheralHandle::new("11:22:33:44:55:66", None);
        assert!(format_handle(&unnamed).starts_with("Unknown"));
    }

    #[test]
    fn test_format_adapter_state() {
        assert_eq!(
            format_adapter_state(AdapterState::PoweredOff),
            format!("{}: Bluetooth not enabled\n", AdapterState::PoweredOff)
        );
    }
}
