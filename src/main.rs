// CLASSIFICATION: COMMUNITY
// Filename: main.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-07-24

//! Entry point for the `spindled` control daemon.
//!
//! The SPI device itself is supplied by the platform integration layer,
//! which hands a [`spindle::spi::SpiDevice`] to the transport pump. This
//! binary brings up the IPC acceptor and the host updater and unwinds all
//! tasks on SIGINT.

use anyhow::Result;
use clap::Parser;
use log::{error, info};
use tokio::sync::watch;

use spindle::cli::Cli;
use spindle::context::Context;
use spindle::host::run_updater;
use spindle::ipc::run_ipc;
use spindle::settings::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref());
    if let Some(socket) = cli.socket {
        settings.socket_path = socket;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ctx = Context::new(settings, shutdown_rx);
    info!("spindled starting (socket {})", ctx.settings.socket_path.display());

    let mut tasks = Vec::new();
    if !cli.update_only {
        let ipc_ctx = ctx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = run_ipc(ipc_ctx).await {
                error!("IPC acceptor failed: {err}");
            }
        }));
    }
    let updater_ctx = ctx.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(err) = run_updater(updater_ctx).await {
            error!("host updater failed: {err}");
        }
    }));

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}
