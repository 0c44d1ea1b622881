// CLASSIFICATION: COMMUNITY
// Filename: server.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-07-23

//! IPC acceptor: init exchange, version gate, and mode dispatch.

use std::sync::Arc;

use anyhow::Result;
use log::{debug, info, warn};
use tokio::net::UnixListener;

use super::command::process_commands;
use super::connection::IpcConnection;
use super::subscribe::process_subscription;
use crate::context::Context;
use spindle_api::{
    ClientInitMessage, ConnectionMode, FilterPath, IpcErrorKind, IpcResponse, ServerInitMessage,
    SubscriptionMode, IPC_PROTOCOL_VERSION, MIN_PROTOCOL_VERSION,
};

/// Processor kinds dispatched after the init exchange.
enum Processor {
    /// Command-style request/response loop (shared by the thin modes).
    Command,
    /// Object-model streaming.
    Subscribe {
        mode: SubscriptionMode,
        filters: Vec<FilterPath>,
        client_version: u16,
    },
}

impl Processor {
    fn from_init(init: &ClientInitMessage) -> Result<Self, IpcErrorKind> {
        match init.mode {
            ConnectionMode::Subscribe => Ok(Self::Subscribe {
                mode: init.subscription_mode.unwrap_or(SubscriptionMode::Patch),
                filters: init.filters.clone(),
                client_version: init.version,
            }),
            ConnectionMode::Command
            | ConnectionMode::Intercept
            | ConnectionMode::CodeStream
            | ConnectionMode::PluginService => Ok(Self::Command),
        }
    }

    async fn process(self, connection: IpcConnection, ctx: Arc<Context>) -> Result<()> {
        match self {
            Self::Command => process_commands(connection, ctx).await,
            Self::Subscribe {
                mode,
                filters,
                client_version,
            } => process_subscription(connection, ctx, mode, filters, client_version).await,
        }
    }
}

/// Accept IPC connections until shutdown, one task per connection.
pub async fn run_ipc(ctx: Arc<Context>) -> Result<()> {
    let path = ctx.settings.socket_path.clone();
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(&path)?;
    info!("IPC listening on {}", path.display());

    let mut shutdown = ctx.shutdown.clone();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    let id = ctx.next_connection_id();
                    let connection = IpcConnection::new(stream, id);
                    if let Err(err) = serve_connection(connection, ctx).await {
                        debug!("connection {id} ended: {err}");
                    }
                });
            }
            _ = shutdown.changed() => break,
        }
    }
    info!("IPC acceptor stopped");
    Ok(())
}

async fn serve_connection(mut connection: IpcConnection, ctx: Arc<Context>) -> Result<()> {
    connection
        .send_line(&ServerInitMessage {
            id: connection.id,
            version: IPC_PROTOCOL_VERSION,
        })
        .await?;

    let init: ClientInitMessage = match connection.read_line().await {
        Ok(Some(init)) => init,
        Ok(None) => return Ok(()),
        Err(err) => {
            warn!("connection {}: bad init: {err}", connection.id);
            connection
                .send_line(&IpcResponse::error(
                    IpcErrorKind::InvalidInit,
                    err.to_string(),
                ))
                .await?;
            return Ok(());
        }
    };

    if init.version < MIN_PROTOCOL_VERSION || init.version > IPC_PROTOCOL_VERSION {
        connection
            .send_line(&IpcResponse::error(
                IpcErrorKind::IncompatibleVersion,
                format!(
                    "version {} outside [{MIN_PROTOCOL_VERSION}, {IPC_PROTOCOL_VERSION}]",
                    init.version
                ),
            ))
            .await?;
        return Ok(());
    }

    let processor = match Processor::from_init(&init) {
        Ok(processor) => processor,
        Err(kind) => {
            connection
                .send_line(&IpcResponse::error(kind, "mode rejected"))
                .await?;
            return Ok(());
        }
    };
    connection.send_line(&IpcResponse::ok(None)).await?;
    debug!(
        "connection {} entered {:?} mode (version {})",
        connection.id, init.mode, init.version
    );
    processor.process(connection, ctx).await
}
