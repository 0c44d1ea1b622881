// CLASSIFICATION: COMMUNITY
// Filename: connection.rs v0.5
// Author: Lukas Bower
// Date Modified: 2026-07-22

//! Protocol state machine multiplexing requests over the transfer engine.

use anyhow::{Context as _, Result};
use log::{info, warn};

use super::transfer::{DataTransfer, TransferOutcome};
use super::SpiDevice;
use crate::scheduler::CodeWriter;
use spindle_wire::{
    AbortFile, CodePacket, CodeReply, EvaluateExpression, ExecuteMacro, FirmwareChunk,
    FirmwareChunkRequest, FirmwareRequest, GetObjectModel, HeightMap, Locked, MacroCompleted,
    ObjectModelData, PrintPaused, ReportState, ResendRequest, SbcRequest, SetVariable, StackEvent,
    ValueResult, WireError,
};

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No contact with the firmware yet.
    Disconnected,
    /// Exchanging format and version frames.
    Handshaking,
    /// Steady-state request multiplexing.
    Ready,
    /// A fatal transport error occurred; awaiting resync.
    Failed,
}

/// Decoded firmware-originated request.
#[derive(Debug, Clone, PartialEq)]
pub enum FirmwareEvent {
    /// Resend one of our packets (or the whole frame).
    ResendPacket(ResendRequest),
    /// Busy-channels bitmask update.
    ReportState(ReportState),
    /// Object model fragment.
    ObjectModel(ObjectModelData),
    /// Code reply fragment.
    CodeReply(CodeReply),
    /// Macro execution request.
    ExecuteMacro(ExecuteMacro),
    /// File/macro abort request.
    AbortFile(AbortFile),
    /// Macro stack depth change.
    StackEvent(StackEvent),
    /// Print paused notification.
    PrintPaused(PrintPaused),
    /// Probed height map.
    HeightMap(HeightMap),
    /// Machine lock grant.
    Locked(Locked),
    /// Firmware-update chunk request.
    FirmwareChunkRequest(FirmwareChunkRequest),
    /// Variable operation reply.
    VariableResult(ValueResult),
    /// Expression evaluation reply.
    EvaluationResult(ValueResult),
}

struct IapUpload {
    image: Vec<u8>,
    finished: bool,
}

/// The protocol connection: a transfer engine plus link state.
pub struct SpiConnection<D: SpiDevice> {
    transfer: DataTransfer<D>,
    state: LinkState,
    module_cursor: u8,
    module_count: u8,
    iap: Option<IapUpload>,
}

impl<D: SpiDevice> SpiConnection<D> {
    /// Wrap a device; the connection starts out `Disconnected`.
    pub fn new(device: D, max_failures: u32, module_count: u8) -> Self {
        Self {
            transfer: DataTransfer::new(device, max_failures),
            state: LinkState::Disconnected,
            module_cursor: 0,
            module_count: module_count.max(1),
            iap: None,
        }
    }

    /// Current link state.
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// The peer's data-ready edge signal.
    pub fn data_ready(&self) -> std::sync::Arc<tokio::sync::Notify> {
        self.transfer.data_ready()
    }

    /// Run one handshake exchange carrying only format and version.
    ///
    /// Stays in `Handshaking` while the peer is silent; a version mismatch is
    /// fatal and parks the connection in `Failed`.
    pub fn handshake(&mut self) -> Result<()> {
        self.state = LinkState::Handshaking;
        match self.transfer.perform_full_transfer() {
            Ok(TransferOutcome::Data | TransferOutcome::Duplicate) => {
                info!(
                    "firmware connected (protocol version {})",
                    self.transfer.peer_version().unwrap_or_default()
                );
                self.state = LinkState::Ready;
                Ok(())
            }
            Ok(TransferOutcome::Idle | TransferOutcome::Damaged) => Ok(()),
            Err(err) => {
                self.state = LinkState::Failed;
                Err(err).context("handshake failed")
            }
        }
    }

    /// Reset to `Disconnected` so the next tick re-runs the handshake.
    pub fn resync(&mut self) {
        warn!("resynchronizing SPI link");
        self.state = LinkState::Disconnected;
    }

    /// Perform one steady-state exchange and decode the inbound packets.
    ///
    /// A fatal transport error parks the connection in `Failed`; protocol
    /// violations inside single packets are logged and skipped.
    pub fn process_transfer(&mut self) -> Result<Vec<FirmwareEvent>> {
        let outcome = match self.transfer.perform_full_transfer() {
            Ok(outcome) => outcome,
            Err(err) => {
                self.state = LinkState::Failed;
                return Err(err);
            }
        };
        if outcome != TransferOutcome::Data {
            return Ok(Vec::new());
        }

        let mut events = Vec::new();
        let mut malformed = false;
        for packet in self.transfer.read_packets() {
            let packet = match packet {
                Ok(packet) => packet,
                Err(err) => {
                    warn!("aborting frame read: {err}");
                    malformed = true;
                    break;
                }
            };
            match decode_event(packet.header.request, packet.payload) {
                Ok(event) => events.push(event),
                Err(err) => {
                    // One bad body does not invalidate its neighbours.
                    warn!(
                        "dropping malformed packet {} (request {}): {err}",
                        packet.header.id, packet.header.request
                    );
                    self.transfer.dump_malformed();
                }
            }
        }
        if malformed {
            self.transfer.dump_malformed();
            self.transfer.request_frame_resend();
            return Ok(Vec::new());
        }

        // Peer-requested resends must precede anything else we queue.
        for event in &events {
            if let FirmwareEvent::ResendPacket(resend) = event {
                if let Err(err) = self.transfer.resend_packet(resend.id) {
                    warn!("resend of packet {} failed: {err}", resend.id);
                }
            }
        }
        events.retain(|event| !matches!(event, FirmwareEvent::ResendPacket(_)));
        Ok(events)
    }

    /// Queue the standing state poll.
    pub fn write_get_state(&mut self) {
        let _ = self.transfer.write_packet(SbcRequest::GetState, &[]);
    }

    /// Queue the next object-model module request, round-robin.
    pub fn write_next_object_model(&mut self) {
        let body = GetObjectModel {
            module: self.module_cursor,
        }
        .encode();
        if self
            .transfer
            .write_packet(SbcRequest::GetObjectModel, &body)
            .is_ok()
        {
            self.module_cursor = (self.module_cursor + 1) % self.module_count;
        }
    }

    /// Begin a firmware upload; chunks flow on firmware demand.
    pub fn start_firmware_update(&mut self, image: Vec<u8>) -> Result<(), WireError> {
        self.transfer.write_packet(SbcRequest::StartIap, &[])?;
        self.iap = Some(IapUpload {
            image,
            finished: false,
        });
        Ok(())
    }

    /// Whether a firmware upload is in progress.
    #[must_use]
    pub fn iap_active(&self) -> bool {
        self.iap.is_some()
    }

    /// Serve one firmware-update chunk request.
    pub fn send_firmware_chunk(&mut self, offset: u32, chunk_size: usize) {
        let Some(upload) = &mut self.iap else {
            warn!("firmware chunk requested with no active upload");
            return;
        };
        let start = offset as usize;
        if start >= upload.image.len() {
            if !upload.finished {
                upload.finished = true;
                let _ = self.transfer.write_packet(SbcRequest::VerifyFirmware, &[]);
            }
            self.iap = None;
            return;
        }
        let end = (start + chunk_size).min(upload.image.len());
        let body = FirmwareChunk {
            offset,
            data: upload.image[start..end].to_vec(),
        }
        .encode();
        let _ = self.transfer.write_packet(SbcRequest::FirmwareChunk, &body);
    }

    /// Whether the outgoing buffer already has packets queued.
    #[must_use]
    pub fn has_outgoing(&self) -> bool {
        self.transfer.has_outgoing()
    }
}

impl<D: SpiDevice> CodeWriter for SpiConnection<D> {
    fn write_code(&mut self, channel: u8, flags: u32, text: &str) -> Result<u16, WireError> {
        let body = CodePacket {
            channel,
            flags,
            text: text.to_string(),
        }
        .encode();
        self.transfer.write_packet(SbcRequest::Code, &body)
    }

    fn write_macro_completed(&mut self, channel: u8, error: bool) -> Result<(), WireError> {
        let body = MacroCompleted { channel, error }.encode();
        self.transfer
            .write_packet(SbcRequest::MacroCompleted, &body)
            .map(|_| ())
    }

    fn write_lock_request(&mut self, channel: u8) -> Result<(), WireError> {
        self.transfer
            .write_packet(SbcRequest::LockMachine, &[channel, 0, 0, 0])
            .map(|_| ())
    }

    fn write_unlock_all(&mut self, channel: u8) -> Result<(), WireError> {
        self.transfer
            .write_packet(SbcRequest::UnlockAll, &[channel, 0, 0, 0])
            .map(|_| ())
    }

    fn write_evaluate_expression(
        &mut self,
        channel: u8,
        expression: &str,
    ) -> Result<(), WireError> {
        let body = EvaluateExpression {
            channel,
            expression: expression.to_string(),
        }
        .encode();
        self.transfer
            .write_packet(SbcRequest::EvaluateExpression, &body)
            .map(|_| ())
    }

    fn write_set_variable(
        &mut self,
        channel: u8,
        create: bool,
        name: &str,
        value: &str,
    ) -> Result<(), WireError> {
        let body = SetVariable {
            channel,
            create,
            name: name.to_string(),
            value: value.to_string(),
        }
        .encode();
        self.transfer
            .write_packet(SbcRequest::SetVariable, &body)
            .map(|_| ())
    }
}

fn decode_event(request: u16, body: &[u8]) -> Result<FirmwareEvent, WireError> {
    let request = FirmwareRequest::try_from(request)?;
    Ok(match request {
        FirmwareRequest::ResendPacket => FirmwareEvent::ResendPacket(ResendRequest::decode(body)?),
        FirmwareRequest::ReportState => FirmwareEvent::ReportState(ReportState::decode(body)?),
        FirmwareRequest::ObjectModel => FirmwareEvent::ObjectModel(ObjectModelData::decode(body)?),
        FirmwareRequest::CodeReply => FirmwareEvent::CodeReply(CodeReply::decode(body)?),
        FirmwareRequest::ExecuteMacro => FirmwareEvent::ExecuteMacro(ExecuteMacro::decode(body)?),
        FirmwareRequest::AbortFile => FirmwareEvent::AbortFile(AbortFile::decode(body)?),
        FirmwareRequest::StackEvent => FirmwareEvent::StackEvent(StackEvent::decode(body)?),
        FirmwareRequest::PrintPaused => FirmwareEvent::PrintPaused(PrintPaused::decode(body)?),
        FirmwareRequest::HeightMap => FirmwareEvent::HeightMap(HeightMap::decode(body)?),
        FirmwareRequest::Locked => FirmwareEvent::Locked(Locked::decode(body)?),
        FirmwareRequest::FirmwareChunk => {
            FirmwareEvent::FirmwareChunkRequest(FirmwareChunkRequest::decode(body)?)
        }
        FirmwareRequest::VariableResult => {
            FirmwareEvent::VariableResult(ValueResult::decode(body)?)
        }
        FirmwareRequest::EvaluationResult => {
            FirmwareEvent::EvaluationResult(ValueResult::decode(body)?)
        }
    })
}
