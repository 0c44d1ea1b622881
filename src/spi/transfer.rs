// CLASSIFICATION: COMMUNITY
// Filename: transfer.rs v0.5
// Author: Lukas Bower
// Date Modified: 2026-07-22

//! Fixed-buffer duplex transfer engine with CRC validation and bounded
//! resend recovery.

use std::collections::VecDeque;

use anyhow::{bail, Result};
use log::{debug, warn};

use super::SpiDevice;
use spindle_wire::{
    FormatCode, PacketIter, ResendRequest, SbcRequest, TransferBuilder, TransferHeader, WireError,
    BUFFER_SIZE, PROTOCOL_VERSION, RESEND_WHOLE_FRAME, TRANSFER_HEADER_LEN,
};

/// How many recently sent packets stay available for peer-requested resends.
const SENT_PACKET_MEMORY: usize = 64;

/// Outcome of one duplex exchange.
#[derive(Debug, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The peer had a valid frame; packets are ready to read.
    Data,
    /// The peer sent the invalid-format sentinel (nothing new).
    Idle,
    /// The peer repeated an already-processed sequence id.
    Duplicate,
    /// The inbound frame was damaged and a resend was requested.
    Damaged,
}

/// Duplex transfer engine over one [`SpiDevice`].
pub struct DataTransfer<D: SpiDevice> {
    device: D,
    builder: TransferBuilder,
    rx_buf: Vec<u8>,
    rx_payload_len: usize,
    tx_sequence: u16,
    last_rx_sequence: Option<u16>,
    peer_version: Option<u16>,
    failures: u32,
    max_failures: u32,
    sent_packets: VecDeque<(u16, u16, Vec<u8>)>,
}

impl<D: SpiDevice> DataTransfer<D> {
    /// Wrap an SPI device with the given resend budget.
    pub fn new(device: D, max_failures: u32) -> Self {
        Self {
            device,
            builder: TransferBuilder::new(),
            rx_buf: vec![0u8; BUFFER_SIZE],
            rx_payload_len: 0,
            tx_sequence: 1,
            last_rx_sequence: None,
            peer_version: None,
            failures: 0,
            max_failures,
            sent_packets: VecDeque::new(),
        }
    }

    /// The peer's data-ready edge signal.
    pub fn data_ready(&self) -> std::sync::Arc<tokio::sync::Notify> {
        self.device.data_ready()
    }

    /// Protocol version reported by the peer in its last valid header.
    #[must_use]
    pub fn peer_version(&self) -> Option<u16> {
        self.peer_version
    }

    /// Queue a packet for the next transfer, remembering it for resends.
    pub fn write_packet(&mut self, request: SbcRequest, payload: &[u8]) -> Result<u16, WireError> {
        let id = self.builder.write_packet(request as u16, payload)?;
        self.sent_packets
            .push_back((id, request as u16, payload.to_vec()));
        while self.sent_packets.len() > SENT_PACKET_MEMORY {
            self.sent_packets.pop_front();
        }
        Ok(id)
    }

    /// Re-queue a previously sent packet by id.
    pub fn resend_packet(&mut self, id: u16) -> Result<(), WireError> {
        let Some((_, request, payload)) = self
            .sent_packets
            .iter()
            .find(|(sent_id, _, _)| *sent_id == id)
            .cloned()
        else {
            warn!("peer requested resend of unknown packet {id}");
            return Ok(());
        };
        self.builder.write_packet(request, &payload).map(|_| ())
    }

    /// Whether anything is queued for the next exchange.
    #[must_use]
    pub fn has_outgoing(&self) -> bool {
        !self.builder.is_empty()
    }

    /// Perform one duplex exchange and classify the inbound frame.
    ///
    /// Damaged frames are answered with a whole-frame resend request on the
    /// following exchange; `max_failures` consecutive damages on the same
    /// frame escalate to a fatal error so the connection can resync.
    pub fn perform_full_transfer(&mut self) -> Result<TransferOutcome> {
        let mut tx = vec![0u8; BUFFER_SIZE];
        let header = TransferHeader::for_payload(
            FormatCode::Sbc,
            self.tx_sequence,
            self.builder.payload(),
        );
        tx[..TRANSFER_HEADER_LEN].copy_from_slice(&header.encode());
        tx[TRANSFER_HEADER_LEN..TRANSFER_HEADER_LEN + self.builder.payload().len()]
            .copy_from_slice(self.builder.payload());

        self.device.transfer(&tx, &mut self.rx_buf)?;
        self.rx_payload_len = 0;

        let rx_header = match TransferHeader::decode(&self.rx_buf) {
            Ok(header) => header,
            Err(err) => return self.frame_damaged(err),
        };
        if rx_header.format == FormatCode::Invalid {
            // Peer had nothing to say; our own frame still went out.
            self.finish_exchange();
            return Ok(TransferOutcome::Idle);
        }
        self.peer_version = Some(rx_header.protocol_version);
        if rx_header.protocol_version != PROTOCOL_VERSION {
            bail!(
                "protocol version mismatch: ours {PROTOCOL_VERSION} theirs {}",
                rx_header.protocol_version
            );
        }
        let payload =
            &self.rx_buf[TRANSFER_HEADER_LEN..TRANSFER_HEADER_LEN + rx_header.payload_len as usize];
        if let Err(err) = rx_header.validate_payload(payload) {
            return self.frame_damaged(err);
        }

        self.failures = 0;
        if self.last_rx_sequence == Some(rx_header.sequence) {
            debug!("duplicate transfer {} acknowledged", rx_header.sequence);
            self.finish_exchange();
            return Ok(TransferOutcome::Duplicate);
        }
        self.last_rx_sequence = Some(rx_header.sequence);
        self.rx_payload_len = rx_header.payload_len as usize;
        self.finish_exchange();
        Ok(TransferOutcome::Data)
    }

    /// Iterate the packets of the last valid inbound frame.
    #[must_use]
    pub fn read_packets(&self) -> PacketIter<'_> {
        PacketIter::new(&self.rx_buf[TRANSFER_HEADER_LEN..TRANSFER_HEADER_LEN + self.rx_payload_len])
    }

    /// Log a hex dump of the inbound frame for diagnostics.
    pub fn dump_malformed(&self) {
        let upto = (TRANSFER_HEADER_LEN + self.rx_payload_len.max(16)).min(self.rx_buf.len());
        let hex: String = self.rx_buf[..upto]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(" ");
        warn!("malformed frame: {hex}");
    }

    /// Ask the peer to resend its whole previous frame.
    pub fn request_frame_resend(&mut self) {
        let body = ResendRequest {
            id: RESEND_WHOLE_FRAME,
        }
        .encode();
        if self
            .builder
            .write_packet(SbcRequest::ResendPacket as u16, &body)
            .is_err()
        {
            warn!("no room to request a frame resend; retrying next tick");
        }
    }

    fn frame_damaged(&mut self, err: WireError) -> Result<TransferOutcome> {
        self.failures += 1;
        warn!(
            "damaged transfer ({err}), failure {}/{}",
            self.failures, self.max_failures
        );
        self.dump_malformed();
        if self.failures >= self.max_failures {
            bail!("transfer resend budget exhausted: {err}");
        }
        self.finish_exchange();
        self.request_frame_resend();
        Ok(TransferOutcome::Damaged)
    }

    fn finish_exchange(&mut self) {
        self.builder.clear();
        self.tx_sequence = self.tx_sequence.wrapping_add(1).max(1);
    }
}
