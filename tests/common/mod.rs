// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-07-25

//! Shared scripted-firmware helpers for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use tokio::sync::Notify;

use spindle::spi::SpiDevice;
use spindle_wire::{
    FormatCode, PacketIter, TransferBuilder, TransferHeader, BUFFER_SIZE, TRANSFER_HEADER_LEN,
};

/// SPI device driven by a closure acting as the firmware.
///
/// The closure receives every outbound frame and returns the full inbound
/// buffer for the same exchange.
pub struct ScriptedDevice {
    handler: Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>,
    notify: Arc<Notify>,
}

impl ScriptedDevice {
    pub fn new(handler: impl FnMut(&[u8]) -> Vec<u8> + Send + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            notify: Arc::new(Notify::new()),
        }
    }
}

impl SpiDevice for ScriptedDevice {
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> anyhow::Result<()> {
        let response = (self.handler)(tx);
        rx[..response.len()].copy_from_slice(&response);
        for byte in rx[response.len()..].iter_mut() {
            *byte = 0;
        }
        Ok(())
    }

    fn data_ready(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }
}

/// Build a full firmware frame carrying the given packets.
pub fn firmware_frame(sequence: u16, packets: &[(u16, Vec<u8>)]) -> Vec<u8> {
    let mut builder = TransferBuilder::new();
    for (request, payload) in packets {
        builder
            .write_packet(*request, payload)
            .expect("test frame fits");
    }
    frame_with_payload(FormatCode::Firmware, sequence, builder.payload())
}

/// Build a frame with the invalid-format sentinel (peer idle).
pub fn idle_frame(sequence: u16) -> Vec<u8> {
    frame_with_payload(FormatCode::Invalid, sequence, &[])
}

/// Build a firmware frame whose payload checksum is deliberately wrong.
pub fn corrupted_frame(sequence: u16, packets: &[(u16, Vec<u8>)]) -> Vec<u8> {
    let mut frame = firmware_frame(sequence, packets);
    // Flip one payload byte after sealing the checksums.
    frame[TRANSFER_HEADER_LEN] ^= 0xFF;
    frame
}

fn frame_with_payload(format: FormatCode, sequence: u16, payload: &[u8]) -> Vec<u8> {
    let header = TransferHeader::for_payload(format, sequence, payload);
    let mut frame = vec![0u8; BUFFER_SIZE];
    frame[..TRANSFER_HEADER_LEN].copy_from_slice(&header.encode());
    frame[TRANSFER_HEADER_LEN..TRANSFER_HEADER_LEN + payload.len()].copy_from_slice(payload);
    frame
}

/// Parse the packets of an outbound frame as `(request, body)` pairs.
pub fn outbound_packets(tx: &[u8]) -> Vec<(u16, Vec<u8>)> {
    let header = TransferHeader::decode(tx).expect("valid outbound header");
    let payload = &tx[TRANSFER_HEADER_LEN..TRANSFER_HEADER_LEN + header.payload_len as usize];
    header
        .validate_payload(payload)
        .expect("valid outbound payload");
    PacketIter::new(payload)
        .map(|packet| {
            let packet = packet.expect("valid outbound packet");
            (packet.header.request, packet.payload.to_vec())
        })
        .collect()
}
