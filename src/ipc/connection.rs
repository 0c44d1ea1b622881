// CLASSIFICATION: COMMUNITY
// Filename: connection.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-07-23

//! Framed JSON I/O over one accepted socket connection.
//!
//! The init exchange and Subscribe mode speak line-delimited JSON; the
//! command modes speak `u32`-length-prefixed JSON envelopes.

use std::time::Duration;

use anyhow::{bail, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

/// Largest accepted framed message.
const MAX_FRAME: u32 = 8 * 1024 * 1024;

/// One accepted IPC connection.
pub struct IpcConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    /// Connection id assigned at accept time.
    pub id: u64,
}

impl IpcConnection {
    /// Wrap an accepted stream.
    #[must_use]
    pub fn new(stream: UnixStream, id: u64) -> Self {
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
            id,
        }
    }

    /// Send one value as a JSON line.
    pub async fn send_line<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let mut data = serde_json::to_vec(value)?;
        data.push(b'\n');
        self.writer.write_all(&data).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Read one JSON line; `None` on a clean peer close.
    pub async fn read_line<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        let mut line = String::new();
        let read = self.reader.read_line(&mut line).await?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(line.trim_end())?))
    }

    /// Send one value as a length-prefixed JSON frame.
    pub async fn send_framed<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let data = serde_json::to_vec(value)?;
        self.writer
            .write_all(&(data.len() as u32).to_le_bytes())
            .await?;
        self.writer.write_all(&data).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Read the raw bytes of one length-prefixed frame; `None` on close.
    pub async fn read_framed_bytes(&mut self) -> Result<Option<Vec<u8>>> {
        let mut len = [0u8; 4];
        match self.reader.read_exact(&mut len).await {
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err.into()),
        }
        let len = u32::from_le_bytes(len);
        if len > MAX_FRAME {
            bail!("frame of {len} bytes exceeds the limit");
        }
        let mut data = vec![0u8; len as usize];
        self.reader.read_exact(&mut data).await?;
        Ok(Some(data))
    }

    /// Best-effort liveness probe: `true` once the peer half-closed.
    pub async fn peer_gone(&mut self) -> bool {
        match tokio::time::timeout(Duration::from_millis(1), self.reader.fill_buf()).await {
            Ok(Ok(buf)) => buf.is_empty(),
            Ok(Err(_)) => true,
            Err(_) => false,
        }
    }
}
