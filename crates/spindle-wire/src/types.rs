// Author: Lukas Bower
// Purpose: Define SPI transfer wire types and constants shared across components.
#![allow(clippy::module_name_repetitions)]

//! Transfer and packet data model shared by the daemon and its tooling.

use crate::crc::crc16;

/// Size of one duplex transfer buffer in bytes.
pub const BUFFER_SIZE: usize = 8192;

/// Encoded size of a [`TransferHeader`].
pub const TRANSFER_HEADER_LEN: usize = 12;

/// Encoded size of a [`PacketHeader`].
pub const PACKET_HEADER_LEN: usize = 8;

/// Wire protocol version spoken by this build.
pub const PROTOCOL_VERSION: u16 = 5;

/// Maximum payload bytes that fit behind a transfer header.
pub const MAX_PAYLOAD_LEN: usize = BUFFER_SIZE - TRANSFER_HEADER_LEN;

/// Format byte identifying the origin of a transfer buffer.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatCode {
    /// Buffer written by the SBC side.
    Sbc = 0x5F,
    /// Buffer written by firmware running standalone.
    Firmware = 0x60,
    /// Sentinel used when the peer has nothing new to offer.
    Invalid = 0xC9,
}

impl TryFrom<u8> for FormatCode {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x5F => Self::Sbc,
            0x60 => Self::Firmware,
            0xC9 => Self::Invalid,
            other => return Err(WireError::BadFormat(other)),
        })
    }
}

/// Header prefixed to every duplex transfer buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferHeader {
    /// Origin of the buffer.
    pub format: FormatCode,
    /// Sequence identifier, incremented per transfer by each side.
    pub sequence: u16,
    /// Protocol version of the sender.
    pub protocol_version: u16,
    /// Number of payload bytes following the header.
    pub payload_len: u16,
    /// CRC-16 over the first eight header bytes.
    pub header_crc: u16,
    /// CRC-16 over the payload bytes.
    pub data_crc: u16,
}

impl TransferHeader {
    /// Build a header for `payload`, computing both checksums.
    #[must_use]
    pub fn for_payload(format: FormatCode, sequence: u16, payload: &[u8]) -> Self {
        let mut header = Self {
            format,
            sequence,
            protocol_version: PROTOCOL_VERSION,
            payload_len: payload.len() as u16,
            header_crc: 0,
            data_crc: crc16(payload),
        };
        let bytes = header.encode();
        header.header_crc = crc16(&bytes[..8]);
        header
    }

    /// Serialize the header into its 12-byte wire form.
    #[must_use]
    pub fn encode(&self) -> [u8; TRANSFER_HEADER_LEN] {
        let mut out = [0u8; TRANSFER_HEADER_LEN];
        out[0] = self.format as u8;
        out[1] = 0;
        out[2..4].copy_from_slice(&self.sequence.to_le_bytes());
        out[4..6].copy_from_slice(&self.protocol_version.to_le_bytes());
        out[6..8].copy_from_slice(&self.payload_len.to_le_bytes());
        out[8..10].copy_from_slice(&self.header_crc.to_le_bytes());
        out[10..12].copy_from_slice(&self.data_crc.to_le_bytes());
        out
    }

    /// Parse and checksum-validate a header from the front of `buf`.
    ///
    /// The version window is not enforced here; connection setup decides
    /// whether the peer version is acceptable.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < TRANSFER_HEADER_LEN {
            return Err(WireError::Truncated);
        }
        let format = FormatCode::try_from(buf[0])?;
        let sequence = u16::from_le_bytes([buf[2], buf[3]]);
        let protocol_version = u16::from_le_bytes([buf[4], buf[5]]);
        let payload_len = u16::from_le_bytes([buf[6], buf[7]]);
        let header_crc = u16::from_le_bytes([buf[8], buf[9]]);
        let data_crc = u16::from_le_bytes([buf[10], buf[11]]);
        let actual = crc16(&buf[..8]);
        if actual != header_crc {
            return Err(WireError::BadHeaderCrc {
                expected: header_crc,
                actual,
            });
        }
        if payload_len as usize > MAX_PAYLOAD_LEN {
            return Err(WireError::PacketOverrun {
                declared: payload_len as usize,
                remaining: MAX_PAYLOAD_LEN,
            });
        }
        Ok(Self {
            format,
            sequence,
            protocol_version,
            payload_len,
            header_crc,
            data_crc,
        })
    }

    /// Validate the payload checksum against this header.
    pub fn validate_payload(&self, payload: &[u8]) -> Result<(), WireError> {
        if payload.len() != self.payload_len as usize {
            return Err(WireError::Truncated);
        }
        let actual = crc16(payload);
        if actual != self.data_crc {
            return Err(WireError::BadDataCrc {
                expected: self.data_crc,
                actual,
            });
        }
        Ok(())
    }
}

/// Header prefixed to every packet inside a transfer payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Request code, interpreted per transfer direction.
    pub request: u16,
    /// Packet identifier, unique per sender until wrap.
    pub id: u16,
    /// Unpadded payload length in bytes.
    pub length: u16,
}

impl PacketHeader {
    /// Serialize the header into its 8-byte wire form.
    #[must_use]
    pub fn encode(&self) -> [u8; PACKET_HEADER_LEN] {
        let mut out = [0u8; PACKET_HEADER_LEN];
        out[0..2].copy_from_slice(&self.request.to_le_bytes());
        out[2..4].copy_from_slice(&self.id.to_le_bytes());
        out[4..6].copy_from_slice(&self.length.to_le_bytes());
        out
    }

    /// Parse a packet header from the front of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < PACKET_HEADER_LEN {
            return Err(WireError::Truncated);
        }
        Ok(Self {
            request: u16::from_le_bytes([buf[0], buf[1]]),
            id: u16::from_le_bytes([buf[2], buf[3]]),
            length: u16::from_le_bytes([buf[4], buf[5]]),
        })
    }
}

/// Possible errors produced while encoding or decoding transfers and packets.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    /// Input buffer was shorter than the declared structure.
    #[error("truncated frame")]
    Truncated,
    /// Transfer header checksum mismatch.
    #[error("header crc mismatch: expected {expected:#06x} actual {actual:#06x}")]
    BadHeaderCrc {
        /// Checksum declared by the sender.
        expected: u16,
        /// Checksum computed over the received bytes.
        actual: u16,
    },
    /// Transfer payload checksum mismatch.
    #[error("data crc mismatch: expected {expected:#06x} actual {actual:#06x}")]
    BadDataCrc {
        /// Checksum declared by the sender.
        expected: u16,
        /// Checksum computed over the received bytes.
        actual: u16,
    },
    /// Unknown transfer format byte.
    #[error("bad format byte {0:#04x}")]
    BadFormat(u8),
    /// Peer speaks an unsupported protocol version.
    #[error("protocol version mismatch: ours {ours} theirs {theirs}")]
    VersionMismatch {
        /// Version spoken by this build.
        ours: u16,
        /// Version reported by the peer.
        theirs: u16,
    },
    /// Request code not known for this transfer direction.
    #[error("unknown request code {0}")]
    UnknownRequest(u16),
    /// A packet declared more bytes than remain in the payload.
    #[error("packet overrun: declared {declared} with {remaining} remaining")]
    PacketOverrun {
        /// Length declared by the packet header.
        declared: usize,
        /// Bytes actually remaining in the payload.
        remaining: usize,
    },
    /// The outgoing transfer buffer cannot fit the packet.
    #[error("transfer buffer full")]
    BufferFull,
    /// A request payload failed structural validation.
    #[error("bad payload: {0}")]
    BadPayload(&'static str),
}

/// Requests the firmware may send to the SBC.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareRequest {
    /// Ask the SBC to resend a packet by id.
    ResendPacket = 0,
    /// Report the busy-channels bitmask.
    ReportState = 1,
    /// Deliver an object model fragment.
    ObjectModel = 2,
    /// Deliver a (possibly partial) code reply.
    CodeReply = 3,
    /// Request execution of a macro file.
    ExecuteMacro = 4,
    /// Abort the file or macro on a channel.
    AbortFile = 5,
    /// Report a macro stack push or pop.
    StackEvent = 6,
    /// Report that the print was paused.
    PrintPaused = 7,
    /// Deliver a height map.
    HeightMap = 8,
    /// Grant a previously requested resource lock.
    Locked = 9,
    /// Request the next firmware-update chunk.
    FirmwareChunk = 10,
    /// Reply to a variable get or set.
    VariableResult = 11,
    /// Reply to an expression evaluation.
    EvaluationResult = 12,
}

impl TryFrom<u16> for FirmwareRequest {
    type Error = WireError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        use FirmwareRequest::*;
        Ok(match value {
            0 => ResendPacket,
            1 => ReportState,
            2 => ObjectModel,
            3 => CodeReply,
            4 => ExecuteMacro,
            5 => AbortFile,
            6 => StackEvent,
            7 => PrintPaused,
            8 => HeightMap,
            9 => Locked,
            10 => FirmwareChunk,
            11 => VariableResult,
            12 => EvaluationResult,
            other => return Err(WireError::UnknownRequest(other)),
        })
    }
}

/// Requests the SBC may send to the firmware.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SbcRequest {
    /// Poll the firmware state.
    GetState = 0,
    /// Request an object model module.
    GetObjectModel = 1,
    /// Submit a code for execution.
    Code = 2,
    /// Report that a requested macro finished.
    MacroCompleted = 3,
    /// Set a firmware variable.
    SetVariable = 4,
    /// Evaluate an expression firmware-side.
    EvaluateExpression = 5,
    /// Request the global machine lock.
    LockMachine = 6,
    /// Release all locks held by the SBC.
    UnlockAll = 7,
    /// Enter the firmware-update bootloader.
    StartIap = 8,
    /// Upload one firmware-update segment.
    FirmwareChunk = 9,
    /// Ask the firmware to verify the uploaded image.
    VerifyFirmware = 10,
    /// Ask the firmware to resend a packet (`RESEND_WHOLE_FRAME` for all).
    ResendPacket = 11,
}

/// Resend id addressing the whole previous frame rather than one packet.
pub const RESEND_WHOLE_FRAME: u16 = 0xFFFF;

impl TryFrom<u16> for SbcRequest {
    type Error = WireError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        use SbcRequest::*;
        Ok(match value {
            0 => GetState,
            1 => GetObjectModel,
            2 => Code,
            3 => MacroCompleted,
            4 => SetVariable,
            5 => EvaluateExpression,
            6 => LockMachine,
            7 => UnlockAll,
            8 => StartIap,
            9 => FirmwareChunk,
            10 => VerifyFirmware,
            11 => ResendPacket,
            other => return Err(WireError::UnknownRequest(other)),
        })
    }
}

bitflags::bitflags! {
    /// Routing and severity flags carried by a code reply.
    ///
    /// The low sixteen bits address code channels by index; the high bits
    /// carry severity and continuation markers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ReplyFlags: u32 {
        /// Reply text continues in a following packet.
        const PUSH = 1 << 31;
        /// Reply is an error message.
        const ERROR = 1 << 30;
        /// Reply is a warning message.
        const WARNING = 1 << 29;
        /// Mask covering every addressable channel bit.
        const CHANNEL_MASK = 0xFFFF;
    }
}

impl ReplyFlags {
    /// Flag bit addressing the channel with wire index `index`.
    #[must_use]
    pub fn for_channel(index: u8) -> Self {
        Self::from_bits_retain(1 << u32::from(index & 0x0F))
    }

    /// Iterate the wire indices of every addressed channel.
    pub fn channels(self) -> impl Iterator<Item = u8> {
        let bits = self.bits() & Self::CHANNEL_MASK.bits();
        (0..16u8).filter(move |i| bits & (1 << u32::from(*i)) != 0)
    }
}
