// Author: Lukas Bower
// Purpose: Provide SPI transfer framing types and codec primitives for the spindle daemon.
#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![no_std]

//! SPI wire types and codec primitives shared between the spindle daemon and
//! its test harnesses. A *transfer* is one duplex exchange of two fixed-size
//! buffers; a *packet* is one request framed inside a transfer payload.

extern crate alloc;

#[cfg(test)]
extern crate std;

mod codec;
mod crc;
mod requests;
mod types;

pub use codec::{Packet, PacketIter, PayloadReader, TransferBuilder};
pub use crc::crc16;
pub use requests::*;
pub use types::*;
