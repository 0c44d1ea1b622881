// CLASSIFICATION: COMMUNITY
// Filename: command.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-07-23

//! Command-mode request loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::debug;
use serde_json::json;

use super::connection::IpcConnection;
use crate::code::{parse_line, CodeChannel, LineMeta};
use crate::context::Context;
use spindle_api::{ClientRequest, IpcErrorKind, IpcResponse};

/// Serve framed command envelopes until the peer closes.
pub async fn process_commands(mut connection: IpcConnection, ctx: Arc<Context>) -> Result<()> {
    loop {
        let Some(frame) = connection.read_framed_bytes().await? else {
            return Ok(());
        };
        let request: ClientRequest = match serde_json::from_slice(&frame) {
            Ok(request) => request,
            Err(err) if err.is_data() => {
                // Recognisable JSON carrying an unknown command keeps the
                // connection; anything else closes it.
                if serde_json::from_slice::<serde_json::Value>(&frame).is_ok() {
                    connection
                        .send_framed(&IpcResponse::error(
                            IpcErrorKind::UnsupportedCommand,
                            err.to_string(),
                        ))
                        .await?;
                    continue;
                }
                connection
                    .send_framed(&IpcResponse::error(
                        IpcErrorKind::InvalidInit,
                        err.to_string(),
                    ))
                    .await?;
                return Ok(());
            }
            Err(err) => {
                connection
                    .send_framed(&IpcResponse::error(
                        IpcErrorKind::InvalidInit,
                        err.to_string(),
                    ))
                    .await?;
                return Ok(());
            }
        };
        let response = handle_request(&mut connection, &ctx, request).await;
        connection.send_framed(&response).await?;
    }
}

async fn handle_request(
    connection: &mut IpcConnection,
    ctx: &Arc<Context>,
    request: ClientRequest,
) -> IpcResponse {
    match request {
        ClientRequest::GetObjectModel => IpcResponse::ok(Some(ctx.model.get().await)),
        ClientRequest::SimpleCode { code, channel } => {
            let channel = match resolve_channel(channel.as_deref()) {
                Ok(channel) => channel,
                Err(response) => return response,
            };
            let meta = LineMeta {
                channel: Some(channel),
                ..LineMeta::default()
            };
            let mut parsed = match parse_line(&code, meta) {
                Ok(parsed) => parsed,
                Err(err) => {
                    return IpcResponse::error(IpcErrorKind::Internal, err.to_string());
                }
            };
            parsed.connection_id = Some(connection.id);
            debug!("connection {} enqueues {parsed}", connection.id);
            match ctx.scheduler.enqueue(parsed).await {
                Ok(Ok(reply)) => IpcResponse::ok(Some(json!(reply))),
                Ok(Err(err)) => IpcResponse::error(IpcErrorKind::Internal, err.to_string()),
                Err(_) => IpcResponse::error(IpcErrorKind::Internal, "daemon shutting down"),
            }
        }
        ClientRequest::Flush { channel } => {
            let channel = match resolve_channel(channel.as_deref()) {
                Ok(channel) => channel,
                Err(response) => return response,
            };
            match ctx.scheduler.flush_channel(channel).await {
                Ok(settled) => IpcResponse::ok(Some(json!(settled))),
                Err(_) => IpcResponse::error(IpcErrorKind::Internal, "daemon shutting down"),
            }
        }
        ClientRequest::SyncObjectModel => {
            let mut updates = ctx.model.watch_updates();
            let window = Duration::from_millis(ctx.settings.socket_poll_interval_ms);
            let _ = tokio::time::timeout(window, updates.changed()).await;
            IpcResponse::ok(None)
        }
        ClientRequest::Acknowledge => IpcResponse::error(
            IpcErrorKind::UnsupportedCommand,
            "Acknowledge is only valid in Subscribe mode",
        ),
    }
}

fn resolve_channel(name: Option<&str>) -> Result<CodeChannel, IpcResponse> {
    match name {
        None => Ok(CodeChannel::Sbc),
        Some(name) => CodeChannel::from_name(name).ok_or_else(|| {
            IpcResponse::error(
                IpcErrorKind::UnsupportedCommand,
                format!("unknown channel {name:?}"),
            )
        }),
    }
}
