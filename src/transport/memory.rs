//! In-process transport backed by unbounded channels.
//!
//! [`pair`] returns the client halves plus a [`MemoryPeer`] that plays the
//! daemon: it sees every frame the client writes and can inject responses,
//! notifications, garbage, read errors or a close.

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::sync::mpsc;

use super::{FrameKind, FrameRead, FrameWrite};
use crate::error::{Result, RpcError};

#[derive(Debug)]
enum Inbound {
    Text(String),
    Binary,
    Error(String),
    Close,
}

/// Client read half.
#[derive(Debug)]
pub struct MemoryReader {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

/// Client write half.
#[derive(Debug)]
pub struct MemoryWriter {
    tx: mpsc::UnboundedSender<String>,
}

/// The simulated remote end.
#[derive(Debug)]
pub struct MemoryPeer {
    inbound: mpsc::UnboundedSender<Inbound>,
    outbound: mpsc::UnboundedReceiver<String>,
}

/// Create a connected (reader, writer, peer) triple.
pub fn pair() -> (MemoryReader, MemoryWriter, MemoryPeer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    (
        MemoryReader { rx: inbound_rx },
        MemoryWriter { tx: outbound_tx },
        MemoryPeer {
            inbound: inbound_tx,
            outbound: outbound_rx,
        },
    )
}

#[async_trait]
impl FrameRead for MemoryReader {
    async fn read_frame(&mut self, buf: &mut BytesMut) -> Option<Result<FrameKind>> {
        match self.rx.recv().await? {
            Inbound::Text(text) => {
                buf.extend_from_slice(text.as_bytes());
                Some(Ok(FrameKind::Text))
            }
            Inbound::Binary => Some(Ok(FrameKind::Binary)),
            Inbound::Error(msg) => Some(Err(RpcError::Transport(msg))),
            Inbound::Close => Some(Ok(FrameKind::Close {
                code: 1000,
                reason: String::new(),
            })),
        }
    }
}

#[async_trait]
impl FrameWrite for MemoryWriter {
    async fn write_text(&mut self, text: String) -> Result<()> {
        self.tx
            .send(text)
            .map_err(|_closed| RpcError::Transport("peer hung up".to_string()))
    }
}

impl MemoryPeer {
    /// Deliver a text frame to the client.
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.inbound.send(Inbound::Text(text.into()));
    }

    /// Deliver a JSON value as a text frame.
    pub fn send_json(&self, value: &serde_json::Value) {
        self.send_text(value.to_string());
    }

    /// Deliver a binary frame.
    pub fn send_binary(&self) {
        let _ = self.inbound.send(Inbound::Binary);
    }

    /// Make the client's next read fail.
    pub fn inject_read_error(&self, msg: impl Into<String>) {
        let _ = self.inbound.send(Inbound::Error(msg.into()));
    }

    /// Send a close frame.
    pub fn close(&self) {
        let _ = self.inbound.send(Inbound::Close);
    }

    /// Next frame written by the client, `None` once the writer is gone.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Next frame written by the client, parsed as JSON.
    pub async fn recv_json(&mut self) -> Option<serde_json::Value> {
        let text = self.recv_text().await?;
        serde_json::from_str(&text).ok()
    }
}
