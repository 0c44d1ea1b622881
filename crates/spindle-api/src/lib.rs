// Author: Lukas Bower
// Purpose: Provide the IPC message surface shared by the spindle daemon and clients.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! IPC wire types for the spindle control daemon.
//!
//! Connections open with a line-delimited JSON init exchange, then speak
//! length-prefixed JSON envelopes (Command-style modes) or raw object-model
//! documents acknowledged by the client (Subscribe mode).

mod filter;
mod messages;

pub use filter::{ChangeNode, FilterPath, FilterSegment};
pub use messages::*;
