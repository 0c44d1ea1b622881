// CLASSIFICATION: COMMUNITY
// Filename: transfer_recovery.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-07-25

//! CRC damage, resend recovery, and the bounded failure budget.

mod common;

use std::sync::{Arc, Mutex};

use common::{corrupted_frame, firmware_frame, outbound_packets, ScriptedDevice};
use spindle::spi::{FirmwareEvent, LinkState, SpiConnection};
use spindle_wire::{
    ReportState, ResendRequest, SbcRequest, RESEND_WHOLE_FRAME,
};

/// Records every resend request we emit towards the firmware.
fn resend_recorder() -> (Arc<Mutex<Vec<u16>>>, impl Fn(&[u8]) + Clone) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let record = move |tx: &[u8]| {
        for (request, body) in outbound_packets(tx) {
            if request == SbcRequest::ResendPacket as u16 {
                let resend = ResendRequest::decode(&body).expect("decode resend");
                sink.lock().unwrap().push(resend.id);
            }
        }
    };
    (seen, record)
}

#[test]
fn corrupted_frame_triggers_resend_then_recovers() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (resends, record) = resend_recorder();
    let state = ReportState { busy_channels: 0 };
    let packets = vec![(spindle_wire::FirmwareRequest::ReportState as u16, state.encode())];

    let mut exchange = 0u16;
    let packets_for_device = packets.clone();
    let device = ScriptedDevice::new(move |tx| {
        record(tx);
        exchange += 1;
        match exchange {
            1 => firmware_frame(1, &[]),
            // One damaged payload, then the same sequence id again, intact.
            2 => corrupted_frame(2, &packets_for_device),
            _ => firmware_frame(2, &packets_for_device),
        }
    });

    let mut connection = SpiConnection::new(device, 3, 1);
    connection.handshake().expect("handshake");
    assert_eq!(connection.state(), LinkState::Ready);

    let events = connection.process_transfer().expect("damaged exchange survives");
    assert!(events.is_empty(), "no events from a damaged frame");

    let events = connection.process_transfer().expect("recovery exchange");
    assert_eq!(
        resends.lock().unwrap().as_slice(),
        &[RESEND_WHOLE_FRAME],
        "exactly one whole-frame resend was requested"
    );
    assert!(matches!(events[0], FirmwareEvent::ReportState(_)));
}

#[test]
fn three_consecutive_failures_enter_failed_state() {
    let _ = env_logger::builder().is_test(true).try_init();
    let state = ReportState { busy_channels: 0 };
    let packets = vec![(spindle_wire::FirmwareRequest::ReportState as u16, state.encode())];
    let mut exchange = 0u16;
    let device = ScriptedDevice::new(move |tx| {
        let _ = tx;
        exchange += 1;
        if exchange == 1 {
            firmware_frame(1, &[])
        } else {
            corrupted_frame(2, &packets)
        }
    });

    let mut connection = SpiConnection::new(device, 3, 1);
    connection.handshake().expect("handshake");

    // Two damaged exchanges are tolerated, the third exhausts the budget.
    assert!(connection.process_transfer().expect("first damage").is_empty());
    assert!(connection.process_transfer().expect("second damage").is_empty());
    let err = connection.process_transfer().expect_err("budget exhausted");
    assert!(err.to_string().contains("resend budget"));
    assert_eq!(connection.state(), LinkState::Failed);

    // Resync re-runs the handshake from scratch.
    connection.resync();
    assert_eq!(connection.state(), LinkState::Disconnected);
}

#[test]
fn duplicate_sequence_ids_are_not_redispatched() {
    let state = ReportState { busy_channels: 0b10 };
    let packets = vec![(spindle_wire::FirmwareRequest::ReportState as u16, state.encode())];
    let mut exchange = 0u16;
    let packets_for_device = packets.clone();
    let device = ScriptedDevice::new(move |tx| {
        let _ = tx;
        exchange += 1;
        match exchange {
            1 => firmware_frame(1, &[]),
            // The same frame replayed twice.
            _ => firmware_frame(7, &packets_for_device),
        }
    });

    let mut connection = SpiConnection::new(device, 3, 1);
    connection.handshake().expect("handshake");

    let first = connection.process_transfer().expect("first delivery");
    assert_eq!(first.len(), 1);
    let replay = connection.process_transfer().expect("replayed delivery");
    assert!(replay.is_empty(), "duplicate transfer must not redispatch");
}
