//! Frame-level transport abstraction for the duplex connection.
//!
//! A connection is split into a [`FrameRead`] half, owned exclusively by the
//! connection listener, and a [`FrameWrite`] half, shared by callers behind a
//! mutex. Frame boundaries are defined by the transport: one WebSocket
//! message is one frame.
//!
//! # Implementations
//!
//! - [`ws`] - tokio-tungstenite WebSocket (production)
//! - [`memory`] - in-process channel pair (tests, simulations)

pub mod memory;
pub mod ws;

use async_trait::async_trait;
use bytes::BytesMut;

use crate::error::Result;

/// What kind of frame was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    /// UTF-8 text frame; its payload was appended to the buffer.
    Text,
    /// Binary frame; payload discarded.
    Binary,
    /// Ping/pong or other control frame.
    Control,
    /// Close frame from the peer.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Read half of a connection.
#[async_trait]
pub trait FrameRead: Send {
    /// Read the next frame, appending a text payload to `buf`.
    ///
    /// Returns `None` once the stream has ended. An `Err` is a read failure
    /// on this frame only; callers may keep reading.
    async fn read_frame(&mut self, buf: &mut BytesMut) -> Option<Result<FrameKind>>;
}

/// Write half of a connection.
#[async_trait]
pub trait FrameWrite: Send {
    /// Send one text frame.
    async fn write_text(&mut self, text: String) -> Result<()>;

    /// Close the connection. Default: nothing to do.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
