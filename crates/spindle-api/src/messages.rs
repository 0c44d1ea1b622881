// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Define IPC init, command, and response envelopes for the daemon socket.
// Author: Lukas Bower

//! Init, command, and response envelopes spoken over the daemon socket.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::filter::FilterPath;

/// Protocol version spoken by this build of the API surface.
pub const IPC_PROTOCOL_VERSION: u16 = 12;

/// Oldest client protocol version still accepted.
pub const MIN_PROTOCOL_VERSION: u16 = 8;

/// Clients older than this receive the legacy job-layers shape in patches.
pub const JOB_LAYERS_VERSION: u16 = 11;

/// First message sent by the server on every new connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerInitMessage {
    /// Connection identifier assigned by the daemon.
    pub id: u64,
    /// Protocol version spoken by the daemon.
    pub version: u16,
}

/// Reply sent by the client to pick a protocol version and mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientInitMessage {
    /// Protocol version spoken by the client.
    pub version: u16,
    /// Connection mode requested by the client.
    pub mode: ConnectionMode,
    /// Subscription delivery mode; only meaningful with [`ConnectionMode::Subscribe`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_mode: Option<SubscriptionMode>,
    /// Optional filter paths restricting the subscribed subtrees.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterPath>,
}

/// Modes a connection may negotiate at init time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Issue commands and receive replies.
    Command,
    /// Observe and veto codes before execution.
    Intercept,
    /// Receive object-model documents or patches.
    Subscribe,
    /// Stream codes on a fixed channel.
    CodeStream,
    /// Plugin service channel.
    PluginService,
}

/// Delivery modes for [`ConnectionMode::Subscribe`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SubscriptionMode {
    /// Send the whole object model on every update.
    Full,
    /// Send structural diffs accumulated since the last acknowledgement.
    Patch,
}

/// Command envelopes accepted in Command-style modes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "Command")]
pub enum ClientRequest {
    /// Fetch the current object model document.
    GetObjectModel,
    /// Enqueue a code given as text and await its reply.
    SimpleCode {
        /// Code text, e.g. `"M115"`.
        #[serde(rename = "Code")]
        code: String,
        /// Target channel name; defaults to the SBC channel.
        #[serde(rename = "Channel", default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
    },
    /// Wait until all pending codes on a channel have completed.
    Flush {
        /// Target channel name; defaults to the SBC channel.
        #[serde(rename = "Channel", default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
    },
    /// Force a round of object-model acquisition from the firmware.
    SyncObjectModel,
    /// Acknowledge a subscription document (Subscribe mode only).
    Acknowledge,
}

/// Typed error kinds surfaced over IPC.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
pub enum IpcErrorKind {
    /// Client protocol version outside the accepted window.
    #[error("incompatible protocol version")]
    IncompatibleVersion,
    /// Command not available in the negotiated mode.
    #[error("command not supported in this mode")]
    UnsupportedCommand,
    /// Requested connection mode is not served by this daemon.
    #[error("unsupported connection mode")]
    UnsupportedMode,
    /// Init payload failed to parse or validate.
    #[error("invalid init message")]
    InvalidInit,
    /// The daemon failed internally while serving the request.
    #[error("internal error")]
    Internal,
}

/// Error body carried by failing responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IpcErrorBody {
    /// Machine-readable error kind.
    #[serde(rename = "Type")]
    pub kind: IpcErrorKind,
    /// Human-readable description.
    #[serde(rename = "Message")]
    pub message: String,
}

/// Response envelope for Command-style modes.
///
/// `Failure` comes first so untagged deserialization only falls back to
/// `Success` when no `Error` body is present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum IpcResponse {
    /// Failing response with a typed error body.
    Failure {
        /// Always `false`.
        #[serde(rename = "Success")]
        success: bool,
        /// Error details.
        #[serde(rename = "Error")]
        error: IpcErrorBody,
    },
    /// Successful response with an optional result document.
    Success {
        /// Always `true`.
        #[serde(rename = "Success")]
        success: bool,
        /// Result payload, omitted when the command yields nothing.
        #[serde(rename = "Result", default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },
}

impl IpcResponse {
    /// Build a success response carrying `result`.
    #[must_use]
    pub fn ok(result: Option<Value>) -> Self {
        Self::Success {
            success: true,
            result,
        }
    }

    /// Build a failure response of the given kind.
    #[must_use]
    pub fn error(kind: IpcErrorKind, message: impl Into<String>) -> Self {
        Self::Failure {
            success: false,
            error: IpcErrorBody {
                kind,
                message: message.into(),
            },
        }
    }
}
