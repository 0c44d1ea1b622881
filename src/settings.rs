// CLASSIFICATION: COMMUNITY
// Filename: settings.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-07-21

//! Daemon configuration loaded from YAML with defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// All tunables of the daemon.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Unix socket path served by the IPC acceptor.
    pub socket_path: PathBuf,
    /// Directory searched for firmware-requested macro files.
    pub macro_dir: PathBuf,
    /// Idle poll interval of the transport pump, in milliseconds.
    pub spi_poll_delay_ms: u64,
    /// Consecutive damaged transfers tolerated before a resync.
    pub max_transfer_retries: u32,
    /// Number of object-model modules polled round-robin.
    pub object_model_modules: u8,
    /// Patch batching window and socket liveness poll, in milliseconds.
    pub socket_poll_interval_ms: u64,
    /// Host fact reconciliation interval, in milliseconds.
    pub host_update_interval_ms: u64,
    /// Messages older than this many seconds are cleaned from the model.
    pub max_message_age_s: f64,
    /// System clock drift tolerated before an `M905` is issued, in seconds.
    pub max_time_drift_s: f64,
    /// Firmware-update chunk size in bytes.
    pub iap_chunk_size: usize,
    /// Overall firmware-update timeout, in milliseconds.
    pub iap_timeout_ms: u64,
    /// Delay before the bootloader accepts data, in milliseconds.
    pub iap_boot_delay_ms: u64,
    /// Delay after the bootloader reboots the board, in milliseconds.
    pub iap_reboot_delay_ms: u64,
    /// Settle time after a finished firmware update, in milliseconds.
    pub firmware_finished_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/run/spindle.sock"),
            macro_dir: PathBuf::from("/opt/spindle/macros"),
            spi_poll_delay_ms: 25,
            max_transfer_retries: 3,
            object_model_modules: 4,
            socket_poll_interval_ms: 500,
            host_update_interval_ms: 4000,
            max_message_age_s: 60.0,
            max_time_drift_s: 5.0,
            iap_chunk_size: 1024,
            iap_timeout_ms: 30_000,
            iap_boot_delay_ms: 500,
            iap_reboot_delay_ms: 2_000,
            firmware_finished_delay_ms: 250,
        }
    }
}

impl Settings {
    /// Load settings from `path`, or from `SPINDLE_CONFIG`, or defaults.
    pub fn load(path: Option<&Path>) -> Self {
        let candidate = path
            .map(PathBuf::from)
            .or_else(|| std::env::var("SPINDLE_CONFIG").ok().map(PathBuf::from));
        let Some(candidate) = candidate else {
            return Self::default();
        };
        match fs::read_to_string(&candidate) {
            Ok(data) => match serde_yaml::from_str(&data) {
                Ok(settings) => settings,
                Err(err) => {
                    eprintln!("[init] invalid config {}: {err}", candidate.display());
                    Self::default()
                }
            },
            Err(err) => {
                eprintln!("[init] using default config: {err}");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_used_for_missing_file() {
        let settings = Settings::load(Some(Path::new("/nonexistent/spindle.yaml")));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn partial_yaml_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "spi_poll_delay_ms: 100\nmacro_dir: /tmp/macros").expect("write yaml");
        let settings = Settings::load(Some(file.path()));
        assert_eq!(settings.spi_poll_delay_ms, 100);
        assert_eq!(settings.macro_dir, PathBuf::from("/tmp/macros"));
        assert_eq!(settings.max_transfer_retries, 3);
    }
}
