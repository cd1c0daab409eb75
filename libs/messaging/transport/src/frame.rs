//! Relay wire framing
//!
//! Each frame is a big-endian `u32` length followed by a JSON-encoded
//! [`RelayFrame`]. Clients send `Subscribe`, `Unsubscribe` and `Publish`; the
//! relay answers with `Deliver` for every subscription a published envelope
//! matches.

use crate::{Envelope, MessagingError, Result};
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RelayFrame {
    Subscribe {
        subscription_id: u64,
        pattern: String,
    },
    Unsubscribe {
        subscription_id: u64,
    },
    Publish {
        envelope: Envelope,
    },
    Deliver {
        subscription_id: u64,
        envelope: Envelope,
    },
}

/// Write one length-prefixed frame and flush
pub async fn write_frame<W>(writer: &mut W, frame: &RelayFrame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(frame)?;

    let mut buffer = BytesMut::with_capacity(4 + body.len());
    buffer.extend_from_slice(&(body.len() as u32).to_be_bytes());
    buffer.extend_from_slice(&body);

    writer
        .write_all(&buffer)
        .await
        .map_err(|e| MessagingError::connection_with_source("Failed to write frame", e))?;
    writer
        .flush()
        .await
        .map_err(|e| MessagingError::connection_with_source("Failed to flush frame", e))?;

    Ok(())
}

/// Read one frame. `Ok(None)` means the peer closed the stream between frames.
pub async fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<Option<RelayFrame>>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => {
            return Err(MessagingError::connection_with_source(
                "Failed to read frame length",
                e,
            ))
        }
    }

    let frame_len = u32::from_be_bytes(len_bytes) as usize;
    if frame_len > max_size {
        return Err(MessagingError::protocol(format!(
            "Frame size {} exceeds maximum {}",
            frame_len, max_size
        )));
    }

    let mut body = BytesMut::zeroed(frame_len);
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| MessagingError::connection_with_source("Failed to read frame body", e))?;

    let frame = serde_json::from_slice(&body)
        .map_err(|e| MessagingError::protocol_with_source("Malformed relay frame", e))?;
    Ok(Some(frame))
}
