//! WebSocket transport.
//!
//! Thin wrapper around `tokio-tungstenite` providing type-isolated
//! reader/writer halves that implement [`FrameRead`] and [`FrameWrite`].
//!
//! # Architecture
//!
//! A single [`connect`] function handles URL→request building, header
//! insertion, and TLS negotiation. It returns a ([`WsWriter`], [`WsReader`])
//! pair: the reader goes to the connection listener, the writer behind the
//! client's write lock.

use async_trait::async_trait;
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;

use super::{FrameKind, FrameRead, FrameWrite};
use crate::error::{Result, RpcError};

/// Concrete WebSocket stream type (avoids repeating the generic everywhere).
type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Write half of a WebSocket connection.
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl std::fmt::Debug for WsWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsWriter").finish_non_exhaustive()
    }
}

#[async_trait]
impl FrameWrite for WsWriter {
    async fn write_text(&mut self, text: String) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Text(text))
            .await
            .map_err(|err| RpcError::Transport(format!("WebSocket send failed: {err}")))
    }

    async fn close(&mut self) -> Result<()> {
        self.sink
            .close()
            .await
            .map_err(|err| RpcError::Transport(format!("WebSocket close failed: {err}")))
    }
}

/// Read half of a WebSocket connection.
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl std::fmt::Debug for WsReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsReader").finish_non_exhaustive()
    }
}

#[async_trait]
impl FrameRead for WsReader {
    async fn read_frame(&mut self, buf: &mut BytesMut) -> Option<Result<FrameKind>> {
        let kind = match self.stream.next().await? {
            Ok(tungstenite::Message::Text(text)) => {
                buf.extend_from_slice(text.as_bytes());
                FrameKind::Text
            }
            Ok(tungstenite::Message::Binary(_)) => FrameKind::Binary,
            Ok(
                tungstenite::Message::Ping(_)
                | tungstenite::Message::Pong(_)
                | tungstenite::Message::Frame(_),
            ) => FrameKind::Control,
            Ok(tungstenite::Message::Close(close_frame)) => {
                let (code, reason) = close_frame
                    .map(|cf| (cf.code.into(), cf.reason.to_string()))
                    .unwrap_or((1005, String::new()));
                FrameKind::Close { code, reason }
            }
            Err(err) => {
                return Some(Err(RpcError::Transport(format!(
                    "WebSocket read error: {err}"
                ))))
            }
        };
        Some(Ok(kind))
    }
}

/// Connect to a WebSocket URL with optional headers.
///
/// Builds an HTTP request from `url`, inserts each `(name, value)` header,
/// then performs the WebSocket handshake.
///
/// # Errors
///
/// Returns [`RpcError::Transport`] if the URL is invalid, header values are
/// malformed, or the handshake fails.
pub async fn connect(url: &str, headers: &[(&str, &str)]) -> Result<(WsWriter, WsReader)> {
    use tungstenite::client::IntoClientRequest;

    let mut request = url
        .into_client_request()
        .map_err(|err| RpcError::Transport(format!("invalid WebSocket URL {url}: {err}")))?;

    for &(name, value) in headers {
        let header_name = tungstenite::http::HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| RpcError::Transport(format!("invalid header name {name}: {err}")))?;
        let header_value = tungstenite::http::HeaderValue::from_str(value)
            .map_err(|err| RpcError::Transport(format!("invalid header value for {name}: {err}")))?;
        request.headers_mut().insert(header_name, header_value);
    }

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|err| RpcError::Transport(format!("WebSocket connect to {url} failed: {err}")))?;

    let (sink, stream) = ws_stream.split();

    Ok((WsWriter { sink }, WsReader { stream }))
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else {
        url.replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1)
    }
}

/// True for `ws://` and `wss://` URLs.
#[must_use]
pub fn is_ws_url(url: &str) -> bool {
    url.starts_with("ws://") || url.starts_with("wss://")
}
