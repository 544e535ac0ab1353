//! Last command implementation.

use std::io::Write;

use anyhow::{Context, Result};

use envsense_core::{PreferenceStore, TEMPERATURE_PREFERENCE};

/// Print the last temperature persisted by a streaming session.
pub fn cmd_last<W: Write>(store: &dyn PreferenceStore, out: &mut W) -> Result<Option<f32>> {
    let value = store
        .get_f32(TEMPERATURE_PREFERENCE)
        .context("Failed to read preferences")?;
    match value {
        Some(celsius) => writeln!(out, "Last temperature: {:.2} °C", celsius)?,
        None => writeln!(out, "No temperature recorded yet.")?,
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use envsense_core::MemoryPreferences;

    #[test]
    fn test_last_without_value() {
        let store = MemoryPreferences::new();
        let mut out = Vec::new();
        assert_eq!(cmd_last(&store, &mut out).unwrap(), None);
        assert_eq!(String::from_utf8(out).unwrap(), "No temperature recorded yet.\n");
    }

    #[test]
    fn test_last_with_value() {
        let store = MemoryPreferences::new();
        store.put_f32(TEMPERATURE_PREFERENCE, 21.5).unwrap();
        let mut out = Vec::new();
        assert_eq!(cmd_last(&store, &mut out).unwrap(), Some(21.5));
        assert_eq!(String::from_utf8(out).unwrap(), "Last temperature: 21.50 °C\n");
    }
}
