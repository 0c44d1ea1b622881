// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Encode and decode typed request bodies exchanged over the SPI link.
// Author: Lukas Bower

//! Typed request bodies for both transfer directions.
//!
//! Integers are little-endian; strings are length-prefixed UTF-8. Whole
//! packets are padded to four bytes by the transfer builder, so bodies do not
//! pad internally.

use alloc::string::String;
use alloc::vec::Vec;

use crate::codec::{put_string, PayloadReader};
use crate::types::{ReplyFlags, WireError};

/// Why the firmware paused the active print.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// Paused by an operator request.
    User = 0,
    /// Paused by a code in the job file.
    Gcode = 1,
    /// Paused for a filament change.
    FilamentChange = 2,
    /// Paused by a trigger.
    Trigger = 3,
    /// Paused due to a heater fault.
    HeaterFault = 4,
    /// Paused due to a driver fault.
    DriverFault = 5,
    /// Paused due to a motor stall.
    Stall = 6,
    /// Paused due to low input voltage.
    LowVoltage = 7,
}

impl TryFrom<u8> for PauseReason {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use PauseReason::*;
        Ok(match value {
            0 => User,
            1 => Gcode,
            2 => FilamentChange,
            3 => Trigger,
            4 => HeaterFault,
            5 => DriverFault,
            6 => Stall,
            7 => LowVoltage,
            _ => return Err(WireError::BadPayload("unknown pause reason")),
        })
    }
}

/// `ResendPacket` body, valid in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResendRequest {
    /// Packet id to resend, or [`crate::RESEND_WHOLE_FRAME`].
    pub id: u16,
}

impl ResendRequest {
    /// Decode from a packet body.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut reader = PayloadReader::new(body);
        Ok(Self {
            id: reader.take_u16()?,
        })
    }

    /// Encode into a packet body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.id.to_le_bytes());
        out
    }
}

/// `ReportState` body: per-channel busy bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportState {
    /// Bit per wire channel index; set bits mean the firmware buffer is full.
    pub busy_channels: u16,
}

impl ReportState {
    /// Decode from a packet body.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut reader = PayloadReader::new(body);
        Ok(Self {
            busy_channels: reader.take_u16()?,
        })
    }

    /// Encode into a packet body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.busy_channels.to_le_bytes());
        out
    }
}

/// `ObjectModel` body: one module of the firmware object model as JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectModelData {
    /// Module index the fragment belongs to.
    pub module: u8,
    /// Raw UTF-8 JSON document.
    pub json: Vec<u8>,
}

impl ObjectModelData {
    /// Decode from a packet body.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut reader = PayloadReader::new(body);
        let module = reader.take_u8()?;
        Ok(Self {
            module,
            json: reader.rest().to_vec(),
        })
    }

    /// Encode into a packet body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.json.len());
        out.push(self.module);
        out.extend_from_slice(&self.json);
        out
    }
}

/// `CodeReply` body: routed reply text with severity and continuation flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeReply {
    /// Channel routing plus severity and push flags.
    pub flags: ReplyFlags,
    /// Reply text fragment.
    pub text: String,
}

impl CodeReply {
    /// Decode from a packet body.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut reader = PayloadReader::new(body);
        let flags = ReplyFlags::from_bits_retain(reader.take_u32()?);
        let text = reader.take_string()?;
        Ok(Self { flags, text })
    }

    /// Encode into a packet body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.flags.bits().to_le_bytes());
        put_string(&mut out, &self.text);
        out
    }
}

/// `ExecuteMacro` body: firmware request to run a macro file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteMacro {
    /// Wire index of the requesting channel.
    pub channel: u8,
    /// Whether a missing file should be reported as an error.
    pub report_missing: bool,
    /// Macro file name, relative to the macro directory.
    pub path: String,
}

impl ExecuteMacro {
    /// Decode from a packet body.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut reader = PayloadReader::new(body);
        let channel = reader.take_u8()?;
        let report_missing = reader.take_u8()? != 0;
        let path = reader.take_string()?;
        Ok(Self {
            channel,
            report_missing,
            path,
        })
    }

    /// Encode into a packet body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.channel);
        out.push(u8::from(self.report_missing));
        put_string(&mut out, &self.path);
        out
    }
}

/// `AbortFile` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbortFile {
    /// Wire index of the channel whose file stack is aborted.
    pub channel: u8,
}

impl AbortFile {
    /// Decode from a packet body.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut reader = PayloadReader::new(body);
        Ok(Self {
            channel: reader.take_u8()?,
        })
    }

    /// Encode into a packet body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.channel);
        out
    }
}

/// `StackEvent` body: macro stack depth change on a channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StackEvent {
    /// Wire index of the channel.
    pub channel: u8,
    /// Stack depth after the event.
    pub depth: u8,
    /// Firmware stack flags.
    pub flags: u16,
    /// Feedrate in effect at this stack level.
    pub feedrate: f32,
}

impl StackEvent {
    /// Decode from a packet body.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut reader = PayloadReader::new(body);
        Ok(Self {
            channel: reader.take_u8()?,
            depth: reader.take_u8()?,
            flags: reader.take_u16()?,
            feedrate: reader.take_f32()?,
        })
    }

    /// Encode into a packet body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.channel);
        out.push(self.depth);
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.feedrate.to_bits().to_le_bytes());
        out
    }
}

/// `PrintPaused` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrintPaused {
    /// Byte offset in the job file where the pause took effect.
    pub file_position: u32,
    /// Why the print paused.
    pub reason: PauseReason,
}

impl PrintPaused {
    /// Decode from a packet body.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut reader = PayloadReader::new(body);
        let file_position = reader.take_u32()?;
        let reason = PauseReason::try_from(reader.take_u8()?)?;
        Ok(Self {
            file_position,
            reason,
        })
    }

    /// Encode into a packet body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.file_position.to_le_bytes());
        out.push(self.reason as u8);
        out
    }
}

/// `HeightMap` body: probed grid samples.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightMap {
    /// Number of probe columns.
    pub x_dim: u16,
    /// Number of probe rows.
    pub y_dim: u16,
    /// Row-major grid samples, `x_dim * y_dim` entries.
    pub samples: Vec<f32>,
}

impl HeightMap {
    /// Decode from a packet body.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut reader = PayloadReader::new(body);
        let x_dim = reader.take_u16()?;
        let y_dim = reader.take_u16()?;
        let count = usize::from(x_dim) * usize::from(y_dim);
        let mut samples = Vec::with_capacity(count);
        for _ in 0..count {
            samples.push(reader.take_f32()?);
        }
        Ok(Self {
            x_dim,
            y_dim,
            samples,
        })
    }

    /// Encode into a packet body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.x_dim.to_le_bytes());
        out.extend_from_slice(&self.y_dim.to_le_bytes());
        for sample in &self.samples {
            out.extend_from_slice(&sample.to_bits().to_le_bytes());
        }
        out
    }
}

/// `Locked` body: resource lock grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Locked {
    /// Wire index of the channel now holding the lock.
    pub channel: u8,
}

impl Locked {
    /// Decode from a packet body.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut reader = PayloadReader::new(body);
        Ok(Self {
            channel: reader.take_u8()?,
        })
    }

    /// Encode into a packet body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.channel);
        out
    }
}

/// `FirmwareChunk` request body (firmware asks for the next segment).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareChunkRequest {
    /// Byte offset of the next expected segment.
    pub offset: u32,
}

impl FirmwareChunkRequest {
    /// Decode from a packet body.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut reader = PayloadReader::new(body);
        Ok(Self {
            offset: reader.take_u32()?,
        })
    }

    /// Encode into a packet body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.offset.to_le_bytes());
        out
    }
}

/// Shared shape of `VariableResult` and `EvaluationResult` bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueResult {
    /// Whether the firmware-side operation succeeded.
    pub success: bool,
    /// Result value, or the error text on failure.
    pub value: String,
}

impl ValueResult {
    /// Decode from a packet body.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut reader = PayloadReader::new(body);
        let success = reader.take_u8()? != 0;
        let value = reader.take_string()?;
        Ok(Self { success, value })
    }

    /// Encode into a packet body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(u8::from(self.success));
        put_string(&mut out, &self.value);
        out
    }
}

/// `Code` body: one code submitted for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodePacket {
    /// Wire index of the originating channel.
    pub channel: u8,
    /// Code flag bits as defined by the daemon.
    pub flags: u32,
    /// Canonical code text.
    pub text: String,
}

impl CodePacket {
    /// Decode from a packet body.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut reader = PayloadReader::new(body);
        let channel = reader.take_u8()?;
        let _reserved = reader.take_u8()?;
        let _pad = reader.take_u16()?;
        let flags = reader.take_u32()?;
        let text = reader.take_string()?;
        Ok(Self {
            channel,
            flags,
            text,
        })
    }

    /// Encode into a packet body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.channel);
        out.push(0);
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        put_string(&mut out, &self.text);
        out
    }
}

/// `MacroCompleted` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacroCompleted {
    /// Wire index of the channel whose macro finished.
    pub channel: u8,
    /// Whether the macro terminated with an error.
    pub error: bool,
}

impl MacroCompleted {
    /// Decode from a packet body.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut reader = PayloadReader::new(body);
        Ok(Self {
            channel: reader.take_u8()?,
            error: reader.take_u8()? != 0,
        })
    }

    /// Encode into a packet body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.channel);
        out.push(u8::from(self.error));
        out
    }
}

/// `GetObjectModel` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetObjectModel {
    /// Module index to fetch.
    pub module: u8,
}

impl GetObjectModel {
    /// Decode from a packet body.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut reader = PayloadReader::new(body);
        Ok(Self {
            module: reader.take_u8()?,
        })
    }

    /// Encode into a packet body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.module);
        out
    }
}

/// `SetVariable` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetVariable {
    /// Wire index of the channel whose scope receives the variable.
    pub channel: u8,
    /// Whether a new local variable should be created.
    pub create: bool,
    /// Variable name.
    pub name: String,
    /// Expression assigned to the variable.
    pub value: String,
}

impl SetVariable {
    /// Decode from a packet body.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut reader = PayloadReader::new(body);
        let channel = reader.take_u8()?;
        let create = reader.take_u8()? != 0;
        let name = reader.take_string()?;
        let value = reader.take_string()?;
        Ok(Self {
            channel,
            create,
            name,
            value,
        })
    }

    /// Encode into a packet body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.channel);
        out.push(u8::from(self.create));
        put_string(&mut out, &self.name);
        put_string(&mut out, &self.value);
        out
    }
}

/// `EvaluateExpression` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluateExpression {
    /// Wire index of the channel providing the evaluation context.
    pub channel: u8,
    /// Expression text.
    pub expression: String,
}

impl EvaluateExpression {
    /// Decode from a packet body.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut reader = PayloadReader::new(body);
        let channel = reader.take_u8()?;
        let expression = reader.take_string()?;
        Ok(Self {
            channel,
            expression,
        })
    }

    /// Encode into a packet body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.channel);
        put_string(&mut out, &self.expression);
        out
    }
}

/// `FirmwareChunk` upload body (SBC to firmware).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareChunk {
    /// Byte offset of this segment in the image.
    pub offset: u32,
    /// Segment bytes.
    pub data: Vec<u8>,
}

impl FirmwareChunk {
    /// Decode from a packet body.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut reader = PayloadReader::new(body);
        let offset = reader.take_u32()?;
        Ok(Self {
            offset,
            data: reader.rest().to_vec(),
        })
    }

    /// Encode into a packet body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.data.len());
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.data);
        out
    }
}
