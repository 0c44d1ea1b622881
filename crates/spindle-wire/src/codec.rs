// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Pack and peel packets inside fixed-size transfer payloads.
// Author: Lukas Bower

//! Packet packing and iteration inside a transfer payload.

use alloc::string::String;
use alloc::vec::Vec;

use crate::types::{
    PacketHeader, WireError, MAX_PAYLOAD_LEN, PACKET_HEADER_LEN,
};

fn aligned(len: usize) -> usize {
    (len + 3) & !3
}

/// Append a length-prefixed UTF-8 string to a payload under construction.
pub fn put_string(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(&(value.len() as u16).to_le_bytes());
    out.extend_from_slice(value.as_bytes());
}

/// Builder packing packets back-to-back into one outgoing transfer payload.
#[derive(Debug)]
pub struct TransferBuilder {
    buffer: Vec<u8>,
    next_id: u16,
}

impl TransferBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MAX_PAYLOAD_LEN),
            next_id: 1,
        }
    }

    /// Append a packet with the given request code and body.
    ///
    /// Fails softly with [`WireError::BufferFull`] when the aligned packet
    /// does not fit; the caller is expected to retry on the next transfer.
    pub fn write_packet(&mut self, request: u16, payload: &[u8]) -> Result<u16, WireError> {
        let needed = PACKET_HEADER_LEN + aligned(payload.len());
        if self.buffer.len() + needed > MAX_PAYLOAD_LEN {
            return Err(WireError::BufferFull);
        }
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        let header = PacketHeader {
            request,
            id,
            length: payload.len() as u16,
        };
        self.buffer.extend_from_slice(&header.encode());
        self.buffer.extend_from_slice(payload);
        for _ in payload.len()..aligned(payload.len()) {
            self.buffer.push(0);
        }
        Ok(id)
    }

    /// Bytes packed so far.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.buffer
    }

    /// Whether any packet has been packed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Reset the builder for the next transfer, keeping the id counter.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for TransferBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One packet peeled out of a transfer payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet<'a> {
    /// Parsed packet header.
    pub header: PacketHeader,
    /// Unpadded packet body.
    pub payload: &'a [u8],
}

/// Iterator peeling packets from a received transfer payload.
///
/// Any structurally invalid packet aborts the iteration with an error; the
/// caller then discards the whole frame and requests a resend.
#[derive(Debug, Clone)]
pub struct PacketIter<'a> {
    buffer: &'a [u8],
    offset: usize,
}

impl<'a> PacketIter<'a> {
    /// Iterate over the packets inside `payload`.
    #[must_use]
    pub fn new(payload: &'a [u8]) -> Self {
        Self {
            buffer: payload,
            offset: 0,
        }
    }
}

impl<'a> Iterator for PacketIter<'a> {
    type Item = Result<Packet<'a>, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.buffer.len() {
            return None;
        }
        if self.buffer.len() - self.offset < PACKET_HEADER_LEN {
            return Some(Err(WireError::Truncated));
        }
        let header = match PacketHeader::decode(&self.buffer[self.offset..]) {
            Ok(header) => header,
            Err(err) => return Some(Err(err)),
        };
        let body_start = self.offset + PACKET_HEADER_LEN;
        let declared = header.length as usize;
        let remaining = self.buffer.len() - body_start;
        if declared > remaining {
            return Some(Err(WireError::PacketOverrun {
                declared,
                remaining,
            }));
        }
        let payload = &self.buffer[body_start..body_start + declared];
        self.offset = body_start + aligned(declared).min(remaining);
        Some(Ok(Packet { header, payload }))
    }
}

/// Cursor-style reader over a packet body.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    buffer: &'a [u8],
    offset: usize,
}

impl<'a> PayloadReader<'a> {
    /// Wrap a packet body for field-by-field reads.
    #[must_use]
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        if self.buffer.len() - self.offset < len {
            return Err(WireError::Truncated);
        }
        let slice = &self.buffer[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    /// Read one byte.
    pub fn take_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    /// Read a little-endian `u16`.
    pub fn take_u16(&mut self) -> Result<u16, WireError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read a little-endian `u32`.
    pub fn take_u32(&mut self) -> Result<u32, WireError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a little-endian `f32`.
    pub fn take_f32(&mut self) -> Result<f32, WireError> {
        Ok(f32::from_bits(self.take_u32()?))
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn take_string(&mut self) -> Result<String, WireError> {
        let len = self.take_u16()? as usize;
        let bytes = self.take(len)?;
        core::str::from_utf8(bytes)
            .map(String::from)
            .map_err(|_| WireError::BadPayload("invalid utf8 in string field"))
    }

    /// Remaining unread bytes.
    #[must_use]
    pub fn rest(&self) -> &'a [u8] {
        &self.buffer[self.offset..]
    }
}
