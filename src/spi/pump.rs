// CLASSIFICATION: COMMUNITY
// Filename: pump.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-07-22

//! The transport pump: the long-running task driving transfers, the
//! scheduler, and event dispatch.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{error, info};
use serde_json::json;

use super::{FirmwareEvent, LinkState, SpiConnection, SpiDevice};
use crate::code::CodeChannel;
use crate::context::Context;

/// Drive the SPI link until shutdown.
///
/// Each tick fills the outgoing buffer from the scheduler, appends the
/// standing state and object-model polls, performs one duplex exchange, and
/// dispatches the decoded firmware events. Between ticks the pump sleeps on
/// the data-ready edge, the scheduler wake, or the poll interval, whichever
/// fires first.
pub async fn run_transport<D: SpiDevice>(
    ctx: Arc<Context>,
    mut connection: SpiConnection<D>,
) -> Result<()> {
    let poll_delay = Duration::from_millis(ctx.settings.spi_poll_delay_ms);
    let data_ready = connection.data_ready();
    let mut shutdown = ctx.shutdown.clone();

    info!("transport pump starting");
    loop {
        if *shutdown.borrow() {
            break;
        }
        match connection.state() {
            LinkState::Disconnected | LinkState::Handshaking => {
                if let Err(err) = connection.handshake() {
                    error!("handshake error: {err}");
                }
            }
            LinkState::Failed => connection.resync(),
            LinkState::Ready => {
                ctx.scheduler.pump_outgoing(&mut connection);
                connection.write_get_state();
                connection.write_next_object_model();
                match connection.process_transfer() {
                    Ok(events) => {
                        for event in events {
                            dispatch(&ctx, &mut connection, event).await;
                        }
                    }
                    Err(err) => {
                        error!("transfer failed: {err}");
                        ctx.model
                            .set_property(&["state", "status"], json!("off"))
                            .await;
                    }
                }
            }
        }

        tokio::select! {
            _ = data_ready.notified() => {}
            _ = ctx.scheduler.wake().notified() => {}
            _ = tokio::time::sleep(poll_delay) => {}
            _ = shutdown.changed() => {}
        }
    }
    info!("transport pump stopped");
    Ok(())
}

async fn dispatch<D: SpiDevice>(
    ctx: &Arc<Context>,
    connection: &mut SpiConnection<D>,
    event: FirmwareEvent,
) {
    match event {
        // Resends are already served inside the connection.
        FirmwareEvent::ResendPacket(_) => {}
        FirmwareEvent::ReportState(state) => ctx.scheduler.update_busy(state.busy_channels),
        FirmwareEvent::ObjectModel(data) => ctx.model.merge_module(&data.json).await,
        FirmwareEvent::CodeReply(reply) => {
            ctx.scheduler.handle_code_reply(reply.flags, reply.text).await;
        }
        FirmwareEvent::ExecuteMacro(req) => {
            ctx.scheduler
                .handle_execute_macro(
                    CodeChannel::from_index(req.channel),
                    req.report_missing,
                    &req.path,
                )
                .await;
        }
        FirmwareEvent::AbortFile(abort) => {
            ctx.scheduler
                .handle_abort_file(CodeChannel::from_index(abort.channel))
                .await;
        }
        FirmwareEvent::StackEvent(event) => {
            ctx.scheduler
                .handle_stack_event(
                    CodeChannel::from_index(event.channel),
                    event.depth,
                    event.flags,
                    event.feedrate,
                )
                .await;
        }
        FirmwareEvent::PrintPaused(paused) => {
            ctx.scheduler
                .handle_print_paused(paused.file_position, &format!("{:?}", paused.reason))
                .await;
        }
        FirmwareEvent::HeightMap(map) => {
            ctx.model
                .set_property(
                    &["move", "compensation", "heightMap"],
                    json!({
                        "xDim": map.x_dim,
                        "yDim": map.y_dim,
                        "samples": map.samples,
                    }),
                )
                .await;
        }
        FirmwareEvent::Locked(locked) => {
            ctx.scheduler
                .handle_locked(CodeChannel::from_index(locked.channel));
        }
        FirmwareEvent::FirmwareChunkRequest(req) => {
            connection.send_firmware_chunk(req.offset, ctx.settings.iap_chunk_size);
        }
        FirmwareEvent::VariableResult(result) | FirmwareEvent::EvaluationResult(result) => {
            ctx.scheduler
                .handle_evaluation_result(result.success, result.value);
        }
    }
}
