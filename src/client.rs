//! Duplex client: concurrent calls and event callbacks over one connection.
//!
//! # Architecture
//!
//! ```text
//! DuplexClient (Arc, cheap to clone)
//!     ├── RequestFactory      ids + token injection
//!     ├── writer              tokio Mutex<Box<dyn FrameWrite>>, one write at a time
//!     ├── ResponseCorrelator  id → oneshot, shared with the listener
//!     ├── EventDispatcher     event type → callbacks, shared with the listener
//!     └── listener task       sole reader; aborted when the last handle drops
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let client = DuplexClient::connect("ws://localhost:6800/jsonrpc", options).await?;
//! client.on_download_complete(|_client, event| {
//!     println!("done: {:?}", event.gid());
//! });
//! let version = client.call("aria2.getVersion", vec![]).await?;
//! ```
//!
//! Callbacks receive a client handle so they can issue follow-up calls.
//! A callback closure that captures its own client clone keeps the
//! connection alive for as long as it is registered.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use crate::api::RpcCaller;
use crate::buffer_pool::{FrameBufferPool, DEFAULT_MAX_IDLE, DEFAULT_MAX_POOLED_CAPACITY};
use crate::correlator::ResponseCorrelator;
use crate::dispatcher::{self, Callback, EventDispatcher};
use crate::error::{Result, RpcError};
use crate::listener::ConnectionListener;
use crate::protocol::{RpcNotification, RpcRequest, RpcResponse};
use crate::request::{IdGenerator, RequestFactory};
use crate::transport::{ws, FrameRead, FrameWrite};

/// Callback type accepted by [`DuplexClient::on_event`].
pub type EventCallback = Callback<DuplexClient>;

/// Tunables for a client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// aria2 `--rpc-secret`; sent as `token:<secret>`.
    pub secret: Option<String>,
    /// Default deadline for [`DuplexClient::call`]. `None` waits forever.
    pub call_timeout: Option<Duration>,
    /// Request id source.
    pub ids: IdGenerator,
    /// Frame buffers above this capacity are not pooled.
    pub max_pooled_buffer: usize,
    /// Maximum idle frame buffers.
    pub max_idle_buffers: usize,
    /// Cap on simultaneously running callbacks. `None` is unbounded.
    pub callback_concurrency: Option<usize>,
    /// Extra HTTP headers for the WebSocket handshake (e.g. proxy auth).
    pub headers: Vec<(String, String)>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            secret: None,
            call_timeout: None,
            ids: IdGenerator::counter(),
            max_pooled_buffer: DEFAULT_MAX_POOLED_CAPACITY,
            max_idle_buffers: DEFAULT_MAX_IDLE,
            callback_concurrency: None,
            headers: Vec::new(),
        }
    }
}

impl ClientOptions {
    /// Set the rpc secret.
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Set the default call deadline.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Add a handshake header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the id generator.
    pub fn ids(mut self, ids: IdGenerator) -> Self {
        self.ids = ids;
        self
    }
}

pub(crate) struct ClientInner {
    requests: RequestFactory,
    writer: tokio::sync::Mutex<Box<dyn FrameWrite>>,
    correlator: ResponseCorrelator,
    dispatcher: EventDispatcher<DuplexClient>,
    call_timeout: Option<Duration>,
    listener: tokio::task::JoinHandle<()>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.listener.abort();
        self.correlator.close();
    }
}

/// Handle to a duplex aria2 connection. Clones share the connection.
#[derive(Clone)]
pub struct DuplexClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for DuplexClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexClient")
            .field("pending_calls", &self.inner.correlator.pending_count())
            .field("call_timeout", &self.inner.call_timeout)
            .field("closed", &self.inner.correlator.is_closed())
            .finish_non_exhaustive()
    }
}

impl DuplexClient {
    /// Open a WebSocket connection to `url` and start listening.
    ///
    /// `http(s)://` URLs are rewritten to `ws(s)://`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Transport`](crate::RpcError::Transport) if the
    /// handshake fails.
    pub async fn connect(url: &str, options: ClientOptions) -> Result<Self> {
        let url = ws::http_to_ws_scheme(url);
        let (writer, reader) = {
            let headers: Vec<(&str, &str)> = options
                .headers
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str()))
                .collect();
            ws::connect(&url, &headers).await?
        };
        log::info!("connected to {url}");
        Ok(Self::with_transport(reader, writer, options))
    }

    /// Build a client over an already established connection.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime (the listener is spawned).
    pub fn with_transport<R, W>(reader: R, writer: W, options: ClientOptions) -> Self
    where
        R: FrameRead + 'static,
        W: FrameWrite + 'static,
    {
        let correlator = ResponseCorrelator::new();
        let dispatcher = match options.callback_concurrency {
            Some(limit) => EventDispatcher::with_concurrency_limit(limit),
            None => EventDispatcher::new(),
        };
        let pool = FrameBufferPool::new(options.max_pooled_buffer, options.max_idle_buffers);

        let inner = Arc::new_cyclic(|weak| {
            let listener = ConnectionListener {
                reader,
                pool,
                correlator: correlator.clone(),
                dispatcher: dispatcher.clone(),
                client: weak.clone(),
            };
            ClientInner {
                requests: RequestFactory::new(options.secret, options.ids),
                writer: tokio::sync::Mutex::new(Box::new(writer)),
                correlator,
                dispatcher,
                call_timeout: options.call_timeout,
                listener: tokio::spawn(listener.run()),
            }
        });
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<ClientInner>) -> Self {
        Self { inner }
    }

    /// Call `method` with the default deadline.
    ///
    /// # Errors
    ///
    /// `Timeout`, `Remote`, `Transport`, `Closed` or `DuplicateId`.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        self.call_with_timeout(method, params, self.inner.call_timeout)
            .await
    }

    /// Call `method`, waiting at most `timeout` (`None` waits forever).
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let request = self.inner.requests.build(method, params);
        self.send_request(&request, timeout).await?.into_result()
    }

    /// Send a prebuilt request and wait for its raw response.
    ///
    /// `timeout` bounds the whole exchange: waiting for the write lock, the
    /// write itself and the wait for the response. On any failure the
    /// pending entry is removed, so a late response for the same id is
    /// dropped by the listener.
    pub async fn send_request(
        &self,
        request: &RpcRequest,
        timeout: Option<Duration>,
    ) -> Result<RpcResponse> {
        let pending = self.inner.correlator.register(&request.id)?;
        let frame = serde_json::to_string(request)?;
        log::trace!("-> {} (id {})", request.method, request.id);

        // `pending` moves in; dropping the future on timeout cancels the entry.
        let exchange = async {
            self.inner.writer.lock().await.write_text(frame).await?;
            pending.wait(None).await
        };

        let Some(limit) = timeout else {
            return exchange.await;
        };
        tokio::time::timeout_at(Instant::now() + limit, exchange)
            .await
            .unwrap_or_else(|_elapsed| {
                log::debug!("request {} timed out after {limit:?}", request.id);
                Err(RpcError::Timeout {
                    id: request.id.clone(),
                    timeout: limit,
                })
            })
    }

    /// Build the request `call` would send, without sending it.
    pub fn build_request(&self, method: &str, params: Vec<Value>) -> RpcRequest {
        self.inner.requests.build(method, params)
    }

    /// Register `callback` for notifications whose method is `event_type`.
    pub fn on_event<F>(&self, event_type: &str, callback: F) -> EventCallback
    where
        F: Fn(DuplexClient, RpcNotification) + Send + Sync + 'static,
    {
        self.inner.dispatcher.register(event_type, Arc::new(callback))
    }

    /// `aria2.onDownloadStart`
    pub fn on_download_start<F>(&self, callback: F) -> EventCallback
    where
        F: Fn(DuplexClient, RpcNotification) + Send + Sync + 'static,
    {
        self.on_event(dispatcher::ON_DOWNLOAD_START, callback)
    }

    /// `aria2.onDownloadPause`
    pub fn on_download_pause<F>(&self, callback: F) -> EventCallback
    where
        F: Fn(DuplexClient, RpcNotification) + Send + Sync + 'static,
    {
        self.on_event(dispatcher::ON_DOWNLOAD_PAUSE, callback)
    }

    /// `aria2.onDownloadStop`
    pub fn on_download_stop<F>(&self, callback: F) -> EventCallback
    where
        F: Fn(DuplexClient, RpcNotification) + Send + Sync + 'static,
    {
        self.on_event(dispatcher::ON_DOWNLOAD_STOP, callback)
    }

    /// `aria2.onDownloadComplete`
    pub fn on_download_complete<F>(&self, callback: F) -> EventCallback
    where
        F: Fn(DuplexClient, RpcNotification) + Send + Sync + 'static,
    {
        self.on_event(dispatcher::ON_DOWNLOAD_COMPLETE, callback)
    }

    /// `aria2.onDownloadError`
    pub fn on_download_error<F>(&self, callback: F) -> EventCallback
    where
        F: Fn(DuplexClient, RpcNotification) + Send + Sync + 'static,
    {
        self.on_event(dispatcher::ON_DOWNLOAD_ERROR, callback)
    }

    /// `aria2.onBtDownloadComplete`
    pub fn on_bt_download_complete<F>(&self, callback: F) -> EventCallback
    where
        F: Fn(DuplexClient, RpcNotification) + Send + Sync + 'static,
    {
        self.on_event(dispatcher::ON_BT_DOWNLOAD_COMPLETE, callback)
    }

    /// Number of calls awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    /// True once the connection has ended.
    pub fn is_closed(&self) -> bool {
        self.inner.correlator.is_closed()
    }

    /// Close the connection. Outstanding calls fail with `Closed`.
    pub async fn close(&self) -> Result<()> {
        let result = self.inner.writer.lock().await.close().await;
        self.inner.correlator.close();
        result
    }
}

#[async_trait]
impl RpcCaller for DuplexClient {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        DuplexClient::call(self, method, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory;
    use serde_json::json;

    #[tokio::test]
    async fn test_build_request_applies_token_without_sending() {
        let (reader, writer, mut peer) = memory::pair();
        let client = DuplexClient::with_transport(
            reader,
            writer,
            ClientOptions::default().secret("secret"),
        );

        let req = client.build_request("aria2.addUri", vec![json!(["http://x"])]);
        assert_eq!(req.params, vec![json!("token:secret"), json!(["http://x"])]);

        drop(client);
        assert!(peer.recv_text().await.is_none());
    }

    #[tokio::test]
    async fn test_write_failure_is_transport_error_and_cancels_entry() {
        let (reader, writer, peer) = memory::pair();
        let client = DuplexClient::with_transport(reader, writer, ClientOptions::default());
        drop(peer);

        let err = client.call("aria2.getVersion", vec![]).await.unwrap_err();
        assert!(
            matches!(err, RpcError::Transport(_) | RpcError::Closed),
            "unexpected error: {err}"
        );
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_id_from_broken_generator() {
        let (reader, writer, mut peer) = memory::pair();
        let client = DuplexClient::with_transport(
            reader,
            writer,
            ClientOptions::default().ids(IdGenerator::from_fn(|| "same".to_string())),
        );

        let first = tokio::spawn({
            let client = client.clone();
            async move { client.call("aria2.getVersion", vec![]).await }
        });
        peer.recv_text().await.unwrap();

        let err = client.call("aria2.getVersion", vec![]).await.unwrap_err();
        assert!(matches!(err, RpcError::DuplicateId(ref id) if id == "same"));

        peer.send_json(&json!({"id": "same", "result": "ok"}));
        assert_eq!(first.await.unwrap().unwrap(), json!("ok"));
    }

    #[tokio::test]
    async fn test_close_marks_client_closed() {
        let (reader, writer, _peer) = memory::pair();
        let client = DuplexClient::with_transport(reader, writer, ClientOptions::default());
        client.close().await.unwrap();
        assert!(client.is_closed());
        assert!(matches!(
            client.call("aria2.getVersion", vec![]).await,
            Err(RpcError::Closed)
        ));
    }

    /// Writer whose writes never complete, like a socket stuck on backpressure.
    struct StalledWriter;

    #[async_trait]
    impl FrameWrite for StalledWriter {
        async fn write_text(&mut self, _text: String) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_deadline_covers_stalled_write_and_queued_callers() {
        let (reader, _writer, _peer) = memory::pair();
        let client = DuplexClient::with_transport(reader, StalledWriter, ClientOptions::default());

        let calls: Vec<_> = (0..2)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move {
                    client
                        .call_with_timeout(
                            "aria2.addUri",
                            vec![json!(["http://x"])],
                            Some(Duration::from_millis(50)),
                        )
                        .await
                })
            })
            .collect();

        for call in calls {
            let result = tokio::time::timeout(Duration::from_secs(2), call)
                .await
                .expect("deadline did not fire")
                .unwrap();
            assert!(
                matches!(result, Err(RpcError::Timeout { .. })),
                "unexpected result: {result:?}"
            );
        }
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_connect_sends_configured_headers() {
        use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/jsonrpc", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (tx, rx) = std::sync::mpsc::channel();
            let callback = move |req: &Request,
                                 resp: Response|
                  -> std::result::Result<Response, ErrorResponse> {
                let auth = req
                    .headers()
                    .get("authorization")
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string);
                let _ = tx.send(auth);
                Ok(resp)
            };
            let ws = tokio_tungstenite::accept_hdr_async(stream, callback)
                .await
                .unwrap();
            (rx.recv().unwrap(), ws)
        });

        let client = DuplexClient::connect(
            &url,
            ClientOptions::default().header("authorization", "Bearer t"),
        )
        .await
        .unwrap();

        let (auth, _ws) = server.await.unwrap();
        assert_eq!(auth.as_deref(), Some("Bearer t"));
        drop(client);
    }
}
