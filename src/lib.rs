//! aria2 JSON-RPC client.
//!
//! Talks to an aria2 daemon over a long-lived WebSocket (duplex: calls and
//! event notifications share one connection) or over one-shot HTTP POSTs.
//!
//! # Architecture
//!
//! ```text
//!                ┌──────────── DuplexClient ─────────────┐
//!   call() ──▶ RequestFactory ──▶ writer (one at a time) ──▶ aria2
//!     ▲                                                      │
//!     │      ResponseCorrelator ◀── ConnectionListener ◀─────┘
//!     └──────────  (id → oneshot)        │  (sole reader, pooled buffers)
//!                                        ▼
//!                                 EventDispatcher ──▶ callbacks
//! ```
//!
//! - **DuplexClient** - facade: concurrent calls plus event registration
//! - **ConnectionListener** - reads frames, routes responses and notifications
//! - **ResponseCorrelator** - matches responses to waiting callers by id
//! - **EventDispatcher** - runs registered callbacks off the read path
//! - **FrameBufferPool** - reuses frame buffers up to a size cap
//!
//! # Modules
//!
//! - [`api`] - [`RpcCaller`] seam and the typed [`Aria2`] method catalog
//! - [`http`] - one-shot HTTP client
//! - [`transport`] - WebSocket and in-memory frame transports
//! - [`config`] - configuration loading/saving

pub mod api;
pub mod buffer_pool;
pub mod client;
pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod http;
mod listener;
pub mod protocol;
pub mod request;
pub mod transport;

// Re-export commonly used types
pub use api::{Aria2, GlobalStat, MulticallEntry, Options, PositionHow, RpcCaller, SessionInfo, Version};
pub use buffer_pool::FrameBufferPool;
pub use client::{ClientOptions, DuplexClient, EventCallback};
pub use config::Config;
pub use correlator::{PendingResponse, ResponseCorrelator};
pub use dispatcher::EventDispatcher;
pub use error::{Result, RpcError};
pub use http::HttpClient;
pub use protocol::{Message, RemoteError, RpcNotification, RpcRequest, RpcResponse};
pub use request::{IdGenerator, RequestFactory};
