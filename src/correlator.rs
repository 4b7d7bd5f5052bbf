//! Pending-call table: matches inbound responses to waiting callers.
//!
//! Every outstanding call owns one entry keyed by its request id. An entry is
//! consumed exactly once, either by [`ResponseCorrelator::deliver`] (response
//! arrived) or by [`ResponseCorrelator::cancel`] (timeout, write failure or
//! abandoned wait). Whichever comes second finds nothing and is a no-op.
//!
//! # Usage
//!
//! ```ignore
//! let pending = correlator.register("7")?;   // before writing the request
//! writer.write_text(frame).await?;
//! let response = pending.wait(Some(timeout)).await?;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::{Result, RpcError};
use crate::protocol::RpcResponse;

#[derive(Debug, Default)]
struct Table {
    pending: HashMap<String, oneshot::Sender<RpcResponse>>,
    closed: bool,
}

/// Shared table of outstanding calls. Clones refer to the same table.
#[derive(Debug, Clone, Default)]
pub struct ResponseCorrelator {
    table: Arc<Mutex<Table>>,
}

impl ResponseCorrelator {
    /// Create an empty correlator.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a pending call for `id`.
    ///
    /// # Errors
    ///
    /// [`RpcError::DuplicateId`] if `id` is already outstanding,
    /// [`RpcError::Closed`] once the connection has gone away.
    pub fn register(&self, id: &str) -> Result<PendingResponse> {
        let mut table = self.lock();
        if table.closed {
            return Err(RpcError::Closed);
        }
        if table.pending.contains_key(id) {
            return Err(RpcError::DuplicateId(id.to_string()));
        }
        let (tx, rx) = oneshot::channel();
        table.pending.insert(id.to_string(), tx);
        drop(table);

        Ok(PendingResponse {
            id: id.to_string(),
            rx,
            correlator: self.clone(),
            settled: false,
        })
    }

    /// Hand `response` to the caller waiting on `id` and remove the entry.
    ///
    /// Returns `false` when no call is pending under `id` (late, duplicate or
    /// unknown response); that is not an error.
    pub fn deliver(&self, id: &str, response: RpcResponse) -> bool {
        let Some(tx) = self.lock().pending.remove(id) else {
            return false;
        };
        // The waiter may have given up between removal and send.
        tx.send(response).is_ok()
    }

    /// Remove the entry for `id` without delivering anything.
    ///
    /// Returns `true` if an entry was removed.
    pub fn cancel(&self, id: &str) -> bool {
        self.lock().pending.remove(id).is_some()
    }

    /// Drop every pending entry and refuse new registrations.
    ///
    /// Waiters observe [`RpcError::Closed`].
    pub fn close(&self) {
        let drained: Vec<_> = {
            let mut table = self.lock();
            table.closed = true;
            table.pending.drain().collect()
        };
        if !drained.is_empty() {
            log::debug!("failing {} pending call(s): connection closed", drained.len());
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of calls currently outstanding.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Whether a call is outstanding under `id`.
    pub fn is_pending(&self, id: &str) -> bool {
        self.lock().pending.contains_key(id)
    }
}

/// Caller side of a pending call.
///
/// Dropping it before a response arrived cancels the entry, so an abandoned
/// call never leaks a table slot.
#[derive(Debug)]
pub struct PendingResponse {
    id: String,
    rx: oneshot::Receiver<RpcResponse>,
    correlator: ResponseCorrelator,
    settled: bool,
}

impl PendingResponse {
    /// Id this handle waits on.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the response, optionally bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// [`RpcError::Timeout`] when the deadline elapses (the entry is
    /// cancelled first), [`RpcError::Closed`] when the connection went away.
    pub async fn wait(mut self, timeout: Option<Duration>) -> Result<RpcResponse> {
        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut self.rx).await {
                Ok(received) => received,
                Err(_elapsed) => {
                    self.settle_with_cancel();
                    return Err(RpcError::Timeout {
                        id: self.id.clone(),
                        timeout: limit,
                    });
                }
            },
            None => (&mut self.rx).await,
        };
        // Either delivered or drained by close(); the entry is gone both ways.
        self.settled = true;
        received.map_err(|_closed| RpcError::Closed)
    }

    /// Give up on the call now.
    pub fn cancel(mut self) {
        self.settle_with_cancel();
    }

    fn settle_with_cancel(&mut self) {
        if !self.settled {
            self.settled = true;
            self.correlator.cancel(&self.id);
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.settle_with_cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RemoteError;
    use serde_json::json;

    #[tokio::test]
    async fn test_deliver_wakes_matching_waiter() {
        let correlator = ResponseCorrelator::new();
        let pending = correlator.register("1").unwrap();
        assert!(correlator.is_pending("1"));

        let response = RpcResponse::success("1", json!({"version": "1.36.0"}));
        assert!(correlator.deliver("1", response.clone()));

        assert_eq!(pending.wait(None).await.unwrap(), response);
        assert_eq!(correlator.pending_count(), 0);
        // Second delivery is a no-op.
        assert!(!correlator.deliver("1", response));
    }

    #[tokio::test]
    async fn test_out_of_order_delivery_routes_by_id() {
        let correlator = ResponseCorrelator::new();
        let first = correlator.register("a").unwrap();
        let second = correlator.register("b").unwrap();

        correlator.deliver("b", RpcResponse::success("b", json!(2)));
        correlator.deliver("a", RpcResponse::success("a", json!(1)));

        assert_eq!(first.wait(None).await.unwrap().outcome, Ok(json!(1)));
        assert_eq!(second.wait(None).await.unwrap().outcome, Ok(json!(2)));
    }

    #[test]
    fn test_deliver_unknown_id_is_noop() {
        let correlator = ResponseCorrelator::new();
        assert!(!correlator.deliver("nope", RpcResponse::success("nope", json!(null))));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let correlator = ResponseCorrelator::new();
        let _pending = correlator.register("1").unwrap();
        assert!(matches!(
            correlator.register("1"),
            Err(RpcError::DuplicateId(id)) if id == "1"
        ));
    }

    #[tokio::test]
    async fn test_cancel_then_late_delivery_is_dropped() {
        let correlator = ResponseCorrelator::new();
        let pending = correlator.register("9").unwrap();
        assert!(correlator.cancel("9"));

        assert!(!correlator.deliver("9", RpcResponse::success("9", json!("late"))));
        assert!(!correlator.is_pending("9"));
        // Sender was dropped by cancel, so the waiter sees Closed rather than a value.
        assert!(matches!(pending.wait(None).await, Err(RpcError::Closed)));
    }

    #[tokio::test]
    async fn test_wait_timeout_cancels_entry() {
        let correlator = ResponseCorrelator::new();
        let pending = correlator.register("t").unwrap();

        let err = pending
            .wait(Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Timeout { ref id, .. } if id == "t"));
        assert!(!correlator.is_pending("t"));
        assert!(!correlator.deliver("t", RpcResponse::success("t", json!(1))));
    }

    #[test]
    fn test_dropping_handle_cancels_entry() {
        let correlator = ResponseCorrelator::new();
        let pending = correlator.register("x").unwrap();
        drop(pending);
        assert_eq!(correlator.pending_count(), 0);
        // The id is free again.
        assert!(correlator.register("x").is_ok());
    }

    #[tokio::test]
    async fn test_close_fails_waiters_and_rejects_new_calls() {
        let correlator = ResponseCorrelator::new();
        let pending = correlator.register("1").unwrap();
        correlator.close();

        assert!(matches!(pending.wait(None).await, Err(RpcError::Closed)));
        assert!(matches!(correlator.register("2"), Err(RpcError::Closed)));
        assert!(correlator.is_closed());
    }

    #[test]
    fn test_handle_cancel_removes_its_entry() {
        let correlator = ResponseCorrelator::new();
        let pending = correlator.register("c").unwrap();
        assert_eq!(pending.id(), "c");

        pending.cancel();
        assert!(!correlator.is_pending("c"));
        assert!(!correlator.deliver("c", RpcResponse::success("c", json!(1))));
    }

    #[tokio::test]
    async fn test_error_response_reaches_waiter() {
        let correlator = ResponseCorrelator::new();
        let pending = correlator.register("e").unwrap();

        let error = RemoteError {
            code: 1,
            message: "Unauthorized".to_string(),
            data: None,
        };
        assert!(correlator.deliver("e", RpcResponse::failure("e", error)));

        let response = pending.wait(None).await.unwrap();
        assert_eq!(response.id.as_deref(), Some("e"));
        match response.into_result() {
            Err(RpcError::Remote(err)) => {
                assert_eq!(err.code, 1);
                assert_eq!(err.message, "Unauthorized");
            }
            other => panic!("expected remote error, got {other:?}"),
        }
    }
}
