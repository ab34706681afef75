//! Framed serial link to the LoRa mesh gateway.
//!
//! The gateway speaks a byte-stream protocol: every packet is framed as
//! `0x94 0xC3 <len_hi> <len_lo> <payload>`. On wake-up the gateway wants
//! a run of 0xC3 bytes to flush its line state before the first frame.
//!
//! A text alert payload is:
//!
//! ```text
//! byte 0: packet type (0x01 = text)
//! byte 1: channel index on the gateway
//! byte 2: flags (bit 0 = payload is PSK-encrypted)
//! 3..:    message bytes (plaintext or nonce||ciphertext)
//! ```
//!
//! The device node is opened like a file; on Linux a configured tty works
//! as long as the line discipline was set up (the installer does that).

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::time::{timeout, Duration};

use crate::outbound::OutboundMessage;
use crate::{AlertError, Result};

const START1: u8 = 0x94;
const START2: u8 = 0xC3;
const WAKE_BYTES: usize = 32;
const PKT_TEXT: u8 = 0x01;

/// Flag bit: payload is PSK-encrypted.
pub const FLAG_ENCRYPTED: u8 = 0x01;

/// Per-send I/O deadline.
const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Serial gateway transport.
pub struct SerialTransport {
    path: String,
    channel_index: u8,
    flags: u8,
    port: Option<File>,
}

impl SerialTransport {
    pub fn new(path: &str, channel_index: u8, encrypted: bool) -> Self {
        SerialTransport {
            path: path.to_string(),
            channel_index,
            flags: if encrypted { FLAG_ENCRYPTED } else { 0 },
            port: None,
        }
    }

    /// Open the device and send the wake sequence.
    pub async fn connect(&mut self) -> Result<()> {
        let mut port = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .await?;

        let wake = [START2; WAKE_BYTES];
        timeout(IO_TIMEOUT, async {
            port.write_all(&wake).await?;
            port.flush().await
        })
        .await
        .map_err(|_| AlertError::Delivery {
            name: self.path.clone(),
            reason: "wake timed out".into(),
        })??;

        self.port = Some(port);
        Ok(())
    }

    /// Send one framed text packet.
    pub async fn send(&mut self, msg: &OutboundMessage) -> Result<()> {
        let port = self.port.as_mut().ok_or_else(|| AlertError::Delivery {
            name: self.path.clone(),
            reason: "not connected".into(),
        })?;

        let frame = frame_packet(self.channel_index, self.flags, &msg.content)?;
        let res = timeout(IO_TIMEOUT, async {
            port.write_all(&frame).await?;
            port.flush().await
        })
        .await;

        match res {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.port = None;
                Err(e.into())
            }
            Err(_) => {
                self.port = None;
                Err(AlertError::Delivery {
                    name: self.path.clone(),
                    reason: "write timed out".into(),
                })
            }
        }
    }

    /// Health probe: re-send the wake sequence. A dead or unplugged
    /// device node errors out here.
    pub async fn probe(&mut self) -> bool {
        let Some(port) = self.port.as_mut() else {
            return false;
        };
        let wake = [START2; 4];
        matches!(
            timeout(IO_TIMEOUT, async {
                port.write_all(&wake).await?;
                port.flush().await
            })
            .await,
            Ok(Ok(()))
        )
    }
}

/// Build `0x94 0xC3 len(2, BE) payload` around a text packet.
fn frame_packet(channel_index: u8, flags: u8, content: &[u8]) -> Result<Vec<u8>> {
    let payload_len = content.len() + 3;
    if payload_len > u16::MAX as usize {
        return Err(AlertError::TooLong {
            got: content.len(),
            max: u16::MAX as usize - 3,
        });
    }

    let mut frame = Vec::with_capacity(4 + payload_len);
    frame.push(START1);
    frame.push(START2);
    frame.extend_from_slice(&(payload_len as u16).to_be_bytes());
    frame.push(PKT_TEXT);
    frame.push(channel_index);
    frame.push(flags);
    frame.extend_from_slice(content);
    Ok(frame)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
