//! One-shot HTTP transport.
//!
//! Each call is a single `POST` of the request to the JSON-RPC endpoint.
//! There is no notification channel over HTTP; use
//! [`DuplexClient`](crate::DuplexClient) for events.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::api::RpcCaller;
use crate::client::ClientOptions;
use crate::error::{Result, RpcError};
use crate::protocol;
use crate::request::RequestFactory;

/// Default per-request timeout when the options carry none.
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// aria2 client over plain HTTP POST.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    url: String,
    requests: RequestFactory,
}

impl HttpClient {
    /// Create a client for `url` (e.g. `http://localhost:6800/jsonrpc`).
    ///
    /// Uses `options.call_timeout` as the whole-request timeout, 30s if unset.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(url: impl Into<String>, options: ClientOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(options.call_timeout.unwrap_or(DEFAULT_HTTP_TIMEOUT))
            .build()?;
        Ok(Self::with_client(client, url, options))
    }

    /// Create a client with a pre-configured `reqwest::Client`.
    pub fn with_client(client: Client, url: impl Into<String>, options: ClientOptions) -> Self {
        Self {
            client,
            url: url.into(),
            requests: RequestFactory::new(options.secret, options.ids),
        }
    }

    /// Endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Call `method` and return its result.
    ///
    /// aria2 answers errors with a non-2xx status and a JSON-RPC error body,
    /// so the body is decoded regardless of status.
    ///
    /// # Errors
    ///
    /// `Http` for network failures, `Remote` for aria2 errors,
    /// `ProtocolDecode` or `Transport` for unusable replies.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let request = self.requests.build(method, params);
        log::trace!("POST {} {} (id {})", self.url, request.method, request.id);

        let response = self.client.post(&self.url).json(&request).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        match protocol::decode_response(&body) {
            Ok(decoded) => decoded.into_result(),
            Err(err) if status.is_success() => Err(err),
            Err(_undecodable) => Err(RpcError::Transport(format!(
                "HTTP {status} from {}",
                self.url
            ))),
        }
    }
}

#[async_trait]
impl RpcCaller for HttpClient {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        HttpClient::call(self, method, params).await
    }
}
