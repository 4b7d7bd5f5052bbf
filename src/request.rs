//! Request construction: id generation and secret-token injection.
//!
//! Both transports build requests through [`RequestFactory`], so the token
//! rules live in one place:
//!
//! - ordinary calls get `"token:<secret>"` prepended to their params
//! - `system.multicall` gets the token prepended to each inner call's
//!   `params` list instead, since aria2 authenticates every inner call

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::protocol::RpcRequest;

/// Method name of the batched call.
pub const MULTICALL_METHOD: &str = "system.multicall";

/// Source of request ids.
///
/// Ids must not repeat while a call with the same id is outstanding.
#[derive(Clone)]
pub struct IdGenerator {
    next: Arc<dyn Fn() -> String + Send + Sync>,
}

impl IdGenerator {
    /// Decimal counter starting at `"1"`.
    pub fn counter() -> Self {
        let counter = Arc::new(AtomicU64::new(0));
        Self::from_fn(move || (counter.fetch_add(1, Ordering::Relaxed) + 1).to_string())
    }

    /// Random UUID v4 ids.
    pub fn uuid() -> Self {
        Self::from_fn(|| uuid::Uuid::new_v4().to_string())
    }

    /// Custom id source.
    pub fn from_fn(f: impl Fn() -> String + Send + Sync + 'static) -> Self {
        Self { next: Arc::new(f) }
    }

    /// Produce the next id.
    pub fn next_id(&self) -> String {
        (self.next)()
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::counter()
    }
}

impl std::fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdGenerator").finish_non_exhaustive()
    }
}

/// Builds fully formed requests: fresh id plus token.
#[derive(Clone, Default)]
pub struct RequestFactory {
    token: Option<String>,
    ids: IdGenerator,
}

impl std::fmt::Debug for RequestFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret.
        f.debug_struct("RequestFactory")
            .field("has_token", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

impl RequestFactory {
    /// Create a factory. `secret` is the bare value of aria2's `--rpc-secret`.
    pub fn new(secret: Option<String>, ids: IdGenerator) -> Self {
        Self {
            token: secret.map(|s| format!("token:{s}")),
            ids,
        }
    }

    /// Build a request without sending it.
    pub fn build(&self, method: &str, mut params: Vec<Value>) -> RpcRequest {
        if let Some(token) = &self.token {
            inject_token(method, &mut params, token);
        }
        RpcRequest::new(self.ids.next_id(), method, params)
    }
}

fn inject_token(method: &str, params: &mut Vec<Value>, token: &str) {
    if method != MULTICALL_METHOD {
        params.insert(0, Value::String(token.to_string()));
        return;
    }

    let Some(Value::Array(calls)) = params.first_mut() else {
        return;
    };
    for call in calls.iter_mut().filter_map(Value::as_object_mut) {
        match call.get_mut("params") {
            Some(Value::Array(inner)) => inner.insert(0, Value::String(token.to_string())),
            _ => {
                call.insert(
                    "params".to_string(),
                    Value::Array(vec![Value::String(token.to_string())]),
                );
            }
        }
    }
}
