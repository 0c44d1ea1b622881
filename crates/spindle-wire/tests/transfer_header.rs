// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Validate transfer header framing and checksum enforcement.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use spindle_wire::{crc16, FormatCode, TransferHeader, WireError, PROTOCOL_VERSION};

#[test]
fn header_roundtrip() {
    let payload = b"G28 ; home all".as_slice();
    let header = TransferHeader::for_payload(FormatCode::Sbc, 7, payload);
    let bytes = header.encode();
    let decoded = TransferHeader::decode(&bytes).expect("decode header");
    assert_eq!(decoded, header);
    assert_eq!(decoded.protocol_version, PROTOCOL_VERSION);
    decoded.validate_payload(payload).expect("payload crc ok");
}

#[test]
fn header_crc_corruption_detected() {
    let header = TransferHeader::for_payload(FormatCode::Firmware, 1, &[]);
    let mut bytes = header.encode();
    bytes[2] ^= 0xFF; // corrupt the sequence field
    let err = TransferHeader::decode(&bytes).expect_err("corrupt header");
    assert!(matches!(err, WireError::BadHeaderCrc { .. }));
}

#[test]
fn payload_crc_corruption_detected() {
    let mut payload = b"M115".to_vec();
    let header = TransferHeader::for_payload(FormatCode::Sbc, 2, &payload);
    payload[0] ^= 0xFF;
    let err = header.validate_payload(&payload).expect_err("corrupt payload");
    assert!(matches!(err, WireError::BadDataCrc { .. }));
}

#[test]
fn unknown_format_rejected() {
    let header = TransferHeader::for_payload(FormatCode::Sbc, 3, &[]);
    let mut bytes = header.encode();
    bytes[0] = 0x42;
    // Re-seal the header CRC so only the format byte is at fault.
    let crc = crc16(&bytes[..8]).to_le_bytes();
    bytes[8] = crc[0];
    bytes[9] = crc[1];
    let err = TransferHeader::decode(&bytes).expect_err("bad format");
    assert!(matches!(err, WireError::BadFormat(0x42)));
}

#[test]
fn truncated_header_rejected() {
    let header = TransferHeader::for_payload(FormatCode::Sbc, 4, &[]);
    let bytes = header.encode();
    let err = TransferHeader::decode(&bytes[..8]).expect_err("short buffer");
    assert_eq!(err, WireError::Truncated);
}
