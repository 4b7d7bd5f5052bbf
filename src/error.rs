//! Error types for RPC calls.
//!
//! Every public operation returns [`RpcError`]. Failures inside the
//! connection listener (undecodable frames, responses for unknown ids) are
//! absorbed there and never surface as an `RpcError`.

use std::time::Duration;

use crate::protocol::RemoteError;

/// Errors that can occur while issuing a call.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The id is already registered for an outstanding call.
    ///
    /// Indicates a broken id generator.
    #[error("request id {0:?} is already pending")]
    DuplicateId(String),

    /// No response arrived before the deadline.
    #[error("no response to request {id:?} within {timeout:?}")]
    Timeout {
        /// Id of the abandoned request.
        id: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// The daemon answered with an error object.
    #[error("remote error: {0}")]
    Remote(RemoteError),

    /// A frame could not be parsed into any known message shape.
    #[error("failed to decode frame: {0}")]
    ProtocolDecode(String),

    /// Writing to (or reading from) the connection failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The connection is closed; no response will ever arrive.
    #[error("connection closed")]
    Closed,

    /// HTTP request failed (one-shot transport).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization of a request or result failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<RemoteError> for RpcError {
    fn from(err: RemoteError) -> Self {
        Self::Remote(err)
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RpcError>;
