// CLASSIFICATION: COMMUNITY
// Filename: cli.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-07-24

//! Command-line surface of the `spindled` daemon.

use std::path::PathBuf;

use clap::Parser;

/// CLI arguments for `spindled`.
#[derive(Debug, Parser)]
#[command(name = "spindled", about = "SPI control daemon for motion-control boards", version)]
pub struct Cli {
    /// Configuration file (YAML); `SPINDLE_CONFIG` is used when omitted.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the IPC socket path from the configuration.
    #[arg(long)]
    pub socket: Option<PathBuf>,

    /// Only reconcile host facts; do not bring up the IPC socket.
    #[arg(long)]
    pub update_only: bool,
}
