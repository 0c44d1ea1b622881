// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-07-22

//! SPI transport and protocol state machine.

mod connection;
mod pump;
mod transfer;

pub use connection::{FirmwareEvent, LinkState, SpiConnection};
pub use pump::run_transport;
pub use transfer::DataTransfer;

use std::sync::Arc;

use tokio::sync::Notify;

/// Duplex SPI primitive provided by the platform.
///
/// `transfer` performs one blocking full-duplex exchange of equal-length
/// buffers; `data_ready` fires on the peer's "new data" edge. The production
/// driver lives outside this crate; tests script a mock.
pub trait SpiDevice: Send {
    /// Exchange `tx` and `rx` in one duplex operation.
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> anyhow::Result<()>;

    /// Edge signal raised by the peer when it has new data.
    fn data_ready(&self) -> Arc<Notify>;
}
