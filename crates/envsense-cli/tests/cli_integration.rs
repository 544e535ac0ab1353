//! CLI Integration Tests
//!
//! These tests run the `envsense` binary with a throwaway config file, so they
//! never touch the user's real configuration. Tests that need a Bluetooth
//! adapter or a sensor are marked with #[ignore].
//!
//! Run hardware tests:
//! ```
//! ENVSENSE_DEVICE="AA:BB:CC:DD:EE:FF" cargo test --package envsense-cli --test cli_integration -- --ignored --nocapture
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

/// A config file in its own temporary directory, with preferences alongside.
struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let sandbox = Self { dir };
        let preferences = sandbox.preferences_path();
        fs::write(
            sandbox.config_path(),
            format!("preferences_path = {:?}\n", preferences.display().to_string()),
        )
        .unwrap();
        sandbox
    }

    fn config_path(&self) -> PathBuf {
        self.dir.path().join("config.toml")
    }

    fn preferences_path(&self) -> PathBuf {
        self.dir.path().join("preferences.json")
    }

    fn run(&self, args: &[&str]) -> Output {
        run_envsense(Some(&self.config_path()), args)
    }
}

fn run_envsense(config: Option<&Path>, args: &[&str]) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_envsense"));
    command.args(args).env_remove("ENVSENSE_DEVICE");
    match config {
        Some(path) => command.env("ENVSENSE_CONFIG", path),
        None => command.env_remove("ENVSENSE_CONFIG"),
    };
    command.output().expect("Failed to run envsense binary")
}

/// Get device from environment
fn get_device() -> Option<String> {
    env::var("ENVSENSE_DEVICE").ok().filter(|s| !s.is_empty())
}

// =============================================================================
// Help and Version Tests (no hardware required)
// =============================================================================

#[test]
fn test_help_command() {
    let output = run_envsense(None, &["--help"]);
    assert!(output.status.success(), "Help should succeed");

    let stdout = String::from_utf8_lossy(&output.stdout);
    for cmd in ["scan", "stream", "status", "last", "use"] {
        assert!(stdout.contains(cmd), "Help should list {} command", cmd);
    }
}

#[test]
fn test_version_command() {
    let output = run_envsense(None, &["--version"]);
    assert!(output.status.success(), "Version should succeed");
    assert!(String::from_utf8_lossy(&output.stdout).contains("envsense"));
}

#[test]
fn test_subcommand_help() {
    for cmd in ["scan", "stream", "status", "last", "use"] {
        let output = run_envsense(None, &[cmd, "--help"]);
        assert!(output.status.success(), "{} --help should succeed", cmd);
        assert!(!output.stdout.is_empty(), "{} --help should produce output", cmd);
    }
}

// =============================================================================
// Commands that need no adapter
// =============================================================================

#[test]
fn test_stream_without_device_fails() {
    let sandbox = Sandbox::new();
    let output = sandbox.run(&["stream"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No device specified"), "stderr: {}", stderr);
}

#[test]
fn test_last_without_reading() {
    let sandbox = Sandbox::new();
    let output = sandbox.run(&["last"]);

    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "No temperature recorded yet.\n"
    );
}

#[test]
fn test_last_reads_preference_file() {
    let sandbox = Sandbox::new();
    fs::write(sandbox.preferences_path(), r#"{"pref_temperature": 21.5}"#).unwrap();

    let output = sandbox.run(&["last"]);
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "Last temperature: 21.50 °C\n"
    );
}

#[test]
fn test_use_saves_default_device() {
    let sandbox = Sandbox::new();
    let output = sandbox.run(&["use", "AA:BB:CC:DD:EE:FF"]);
    assert!(output.status.success());

    let content = fs::read_to_string(sandbox.config_path()).unwrap();
    assert!(content.contains("device = \"AA:BB:CC:DD:EE:FF\""));
    // Other settings survive the rewrite
    assert!(content.contains("preferences_path"));
}

// =============================================================================
// Hardware Tests (require a Bluetooth adapter)
// =============================================================================

#[test]
#[ignore = "requires BLE hardware"]
fn test_status_hardware() {
    let sandbox = Sandbox::new();
    let output = sandbox.run(&["status"]);
    assert!(output.status.success());
    assert!(!output.stdout.is_empty());
}

#[test]
#[ignore = "requires BLE hardware"]
fn test_scan_hardware() {
    let sandbox = Sandbox::new();
    let output = sandbox.run(&["scan", "--timeout", "3"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ADDRESS") || stdout.contains("No sensors found."));
}

#[test]
#[ignore = "requires BLE hardware"]
fn test_stream_hardware() {
    let Some(device) = get_device() else {
        eprintln!("Skipping: ENVSENSE_DEVICE not set");
        return;
    };
    let sandbox = Sandbox::new();
    let output = sandbox.run(&["stream", "--device", &device, "--duration", "10", "--json"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert!(value["kind"] == "temperature" || value["kind"] == "pressure");
    }
}
