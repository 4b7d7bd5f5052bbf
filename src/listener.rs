//! Connection listener: the single reader of the duplex connection.
//!
//! # Loop
//!
//! ```text
//! acquire buffer ─▶ read one frame ─▶ classify ─▶ release buffer
//!                                        │
//!                     response ──────────┼──▶ correlator.deliver(id)
//!                     notification ──────┴──▶ dispatcher.dispatch (spawned)
//! ```
//!
//! Frames that do not parse are dropped and a failed read is retried, so a
//! misbehaving daemon cannot kill the connection. The loop ends only when the
//! stream ends or the peer sends a close frame; every call still pending at
//! that point fails with `Closed`.
//!
//! The listener never writes to the connection.

use std::sync::Weak;

use crate::buffer_pool::FrameBufferPool;
use crate::client::{ClientInner, DuplexClient};
use crate::correlator::ResponseCorrelator;
use crate::dispatcher::EventDispatcher;
use crate::protocol::{self, Message, RpcNotification, RpcResponse};
use crate::transport::{FrameKind, FrameRead};

pub(crate) struct ConnectionListener<R> {
    pub(crate) reader: R,
    pub(crate) pool: FrameBufferPool,
    pub(crate) correlator: ResponseCorrelator,
    pub(crate) dispatcher: EventDispatcher<DuplexClient>,
    /// Weak so the listener task does not keep the client alive.
    pub(crate) client: Weak<ClientInner>,
}

impl<R: FrameRead> ConnectionListener<R> {
    pub(crate) async fn run(mut self) {
        log::debug!("connection listener started");

        loop {
            let mut buf = self.pool.acquire();
            let frame = self.reader.read_frame(&mut buf).await;

            let message = match frame {
                Some(Ok(FrameKind::Text)) => {
                    let parsed = protocol::classify(&buf);
                    self.pool.release(buf);
                    parsed
                }
                Some(Ok(FrameKind::Close { code, reason })) => {
                    self.pool.release(buf);
                    log::info!("connection closed by peer ({code}): {reason}");
                    break;
                }
                Some(Ok(kind)) => {
                    self.pool.release(buf);
                    log::trace!("ignoring {kind:?} frame");
                    continue;
                }
                Some(Err(err)) => {
                    self.pool.release(buf);
                    // A failed read only loses this frame; keep reading.
                    log::warn!("read failed, continuing: {err}");
                    continue;
                }
                None => {
                    self.pool.release(buf);
                    log::info!("connection stream ended");
                    break;
                }
            };

            match message {
                Ok(Message::Response(response)) => self.route_response(response),
                Ok(Message::Notification(notification)) => self.route_notification(notification),
                Err(err) => log::debug!("discarding frame: {err}"),
            }
        }

        self.correlator.close();
        log::debug!("connection listener stopped");
    }

    fn route_response(&self, response: RpcResponse) {
        let Some(id) = response.id.clone() else {
            log::debug!("discarding response without id: {:?}", response.outcome);
            return;
        };
        if !self.correlator.deliver(&id, response) {
            log::debug!("no pending call for response {id}; dropped");
        }
    }

    fn route_notification(&self, notification: RpcNotification) {
        let Some(inner) = self.client.upgrade() else {
            log::debug!("client gone; dropping {}", notification.method);
            return;
        };
        let client = DuplexClient::from_inner(inner);
        let spawned = self.dispatcher.dispatch(&client, notification);
        log::trace!("dispatched notification to {spawned} callback(s)");
    }
}

#[cfg(test)]
mod tests {
    use crate::client::{ClientOptions, DuplexClient};
    use crate::error::{Result, RpcError};
    use crate::protocol::RpcNotification;
    use crate::transport::{memory, FrameKind, FrameRead};
    use async_trait::async_trait;
    use bytes::BytesMut;
    use serde_json::json;
    use std::sync::{mpsc, Arc, Mutex};
    use std::time::Duration;

    /// Records the address of every buffer the listener reads into.
    struct RecordingReader {
        inner: memory::MemoryReader,
        buffers: Arc<Mutex<Vec<usize>>>,
    }

    #[async_trait]
    impl FrameRead for RecordingReader {
        async fn read_frame(&mut self, buf: &mut BytesMut) -> Option<Result<FrameKind>> {
            self.buffers.lock().unwrap().push(buf.as_ptr() as usize);
            self.inner.read_frame(buf).await
        }
    }

    async fn answer_next(peer: &mut memory::MemoryPeer, result: serde_json::Value) {
        let req = peer.recv_json().await.unwrap();
        peer.send_json(&json!({"id": req["id"], "jsonrpc": "2.0", "result": result}));
    }

    #[tokio::test]
    async fn test_garbage_frames_do_not_stop_the_loop() {
        let (reader, writer, mut peer) = memory::pair();
        let client = DuplexClient::with_transport(reader, writer, ClientOptions::default());

        peer.send_text("not json at all");
        peer.send_text("{\"neither\":true}");
        peer.send_binary();

        let call = tokio::spawn({
            let client = client.clone();
            async move { client.call("aria2.getGlobalStat", vec![]).await }
        });
        answer_next(&mut peer, json!({"numActive": "0"})).await;
        assert_eq!(call.await.unwrap().unwrap(), json!({"numActive": "0"}));
    }

    #[tokio::test]
    async fn test_read_error_is_retried() {
        let (reader, writer, mut peer) = memory::pair();
        let client = DuplexClient::with_transport(reader, writer, ClientOptions::default());

        peer.inject_read_error("connection reset");

        let call = tokio::spawn({
            let client = client.clone();
            async move { client.call("aria2.getVersion", vec![]).await }
        });
        answer_next(&mut peer, json!({"version": "1.36.0"})).await;
        assert_eq!(call.await.unwrap().unwrap(), json!({"version": "1.36.0"}));
    }

    #[tokio::test]
    async fn test_unknown_response_id_is_dropped() {
        let (reader, writer, mut peer) = memory::pair();
        let client = DuplexClient::with_transport(reader, writer, ClientOptions::default());

        peer.send_json(&json!({"id": "999", "jsonrpc": "2.0", "result": "stray"}));

        let call = tokio::spawn({
            let client = client.clone();
            async move { client.call("aria2.getSessionInfo", vec![]).await }
        });
        answer_next(&mut peer, json!({"sessionId": "s"})).await;
        assert_eq!(call.await.unwrap().unwrap(), json!({"sessionId": "s"}));
    }

    #[tokio::test]
    async fn test_close_frame_fails_pending_calls() {
        let (reader, writer, mut peer) = memory::pair();
        let client = DuplexClient::with_transport(reader, writer, ClientOptions::default());

        let call = tokio::spawn({
            let client = client.clone();
            async move { client.call("aria2.tellActive", vec![]).await }
        });
        // Wait until the request is on the wire, then hang up.
        peer.recv_text().await.unwrap();
        peer.close();

        let result = tokio::time::timeout(Duration::from_secs(2), call)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(RpcError::Closed)));
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn test_buffer_returns_to_pool_before_callbacks_finish() {
        let (reader, writer, mut peer) = memory::pair();
        let buffers = Arc::new(Mutex::new(Vec::new()));
        let reader = RecordingReader {
            inner: reader,
            buffers: Arc::clone(&buffers),
        };
        let client = DuplexClient::with_transport(reader, writer, ClientOptions::default());

        let (started_tx, mut started_rx) = tokio::sync::mpsc::unbounded_channel();
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let gate_rx = Mutex::new(gate_rx);
        client.on_download_start(move |_client, _event: RpcNotification| {
            let _ = started_tx.send(());
            // Blocks until the test releases (or drops) the gate.
            let _ = gate_rx.lock().unwrap().recv();
        });

        peer.send_json(&json!({
            "jsonrpc": "2.0",
            "method": "aria2.onDownloadStart",
            "params": [{"gid": "abc"}]
        }));
        tokio::time::timeout(Duration::from_secs(2), started_rx.recv())
            .await
            .unwrap()
            .unwrap();

        // With the callback still blocked, the next frame is read into the
        // very buffer that carried the notification.
        let call = tokio::spawn({
            let client = client.clone();
            async move { client.call("aria2.tellActive", vec![]).await }
        });
        answer_next(&mut peer, json!([])).await;
        let result = tokio::time::timeout(Duration::from_secs(2), call)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.unwrap(), json!([]));

        let seen = buffers.lock().unwrap().clone();
        assert!(seen.len() >= 2, "reads recorded: {seen:?}");
        assert_eq!(seen[0], seen[1]);

        gate_tx.send(()).unwrap();
    }
}
