//! Event-callback registry and notification fan-out.
//!
//! Callbacks are registered per event type (the notification's `method`) and
//! kept in registration order. Dispatch snapshots the list, releases the lock
//! and spawns one unit of work per callback on the blocking pool, so a slow
//! callback holds up neither the read loop nor its siblings, and a callback
//! may register further callbacks without deadlocking.
//!
//! # Isolation
//!
//! A panicking callback is caught by its task and logged; the listener and the
//! other callbacks for the same notification are unaffected.
//!
//! # Concurrency bound
//!
//! Unbounded by default. [`EventDispatcher::with_concurrency_limit`] caps how
//! many callbacks run at once; excess invocations queue on a semaphore inside
//! their own task, never in the listener.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Semaphore;

use crate::protocol::RpcNotification;

/// `aria2.onDownloadStart`
pub const ON_DOWNLOAD_START: &str = "aria2.onDownloadStart";
/// `aria2.onDownloadPause`
pub const ON_DOWNLOAD_PAUSE: &str = "aria2.onDownloadPause";
/// `aria2.onDownloadStop`
pub const ON_DOWNLOAD_STOP: &str = "aria2.onDownloadStop";
/// `aria2.onDownloadComplete`
pub const ON_DOWNLOAD_COMPLETE: &str = "aria2.onDownloadComplete";
/// `aria2.onDownloadError`
pub const ON_DOWNLOAD_ERROR: &str = "aria2.onDownloadError";
/// `aria2.onBtDownloadComplete`
pub const ON_BT_DOWNLOAD_COMPLETE: &str = "aria2.onBtDownloadComplete";

/// Event callback. Receives a context handle (the client) and the notification.
pub type Callback<C> = Arc<dyn Fn(C, RpcNotification) + Send + Sync>;

/// Per-event-type callback registry. Clones share the registry.
pub struct EventDispatcher<C> {
    registry: Arc<RwLock<HashMap<String, Vec<Callback<C>>>>>,
    limiter: Option<Arc<Semaphore>>,
}

impl<C> Clone for EventDispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            limiter: self.limiter.clone(),
        }
    }
}

impl<C> Default for EventDispatcher<C> {
    fn default() -> Self {
        Self {
            registry: Arc::new(RwLock::new(HashMap::new())),
            limiter: None,
        }
    }
}

impl<C> std::fmt::Debug for EventDispatcher<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("EventDispatcher")
            .field("event_types", &registry.len())
            .field(
                "limit",
                &self.limiter.as_ref().map(|s| s.available_permits()),
            )
            .finish()
    }
}

impl<C: Clone + Send + 'static> EventDispatcher<C> {
    /// Create an unbounded dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dispatcher running at most `limit` callbacks at once.
    pub fn with_concurrency_limit(limit: usize) -> Self {
        Self {
            registry: Arc::new(RwLock::new(HashMap::new())),
            limiter: Some(Arc::new(Semaphore::new(limit.max(1)))),
        }
    }

    /// Append `callback` to the list for `event_type`.
    ///
    /// Returns the same callback so callers can keep a handle to it.
    pub fn register(&self, event_type: impl Into<String>, callback: Callback<C>) -> Callback<C> {
        let event_type = event_type.into();
        log::debug!("registering callback for {event_type}");
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event_type)
            .or_default()
            .push(Arc::clone(&callback));
        callback
    }

    /// Number of callbacks registered for `event_type`.
    pub fn callback_count(&self, event_type: &str) -> usize {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// Fan `notification` out to every callback registered for its method.
    ///
    /// Callbacks are spawned in registration order and not awaited. Returns
    /// how many were spawned; unknown event types spawn nothing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch(&self, ctx: &C, notification: RpcNotification) -> usize {
        let callbacks: Vec<Callback<C>> = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            match registry.get(&notification.method) {
                Some(list) => list.clone(),
                None => {
                    log::trace!("no callbacks for {}", notification.method);
                    return 0;
                }
            }
        };

        for callback in &callbacks {
            let callback = Arc::clone(callback);
            let ctx = ctx.clone();
            let notification = notification.clone();
            let limiter = self.limiter.clone();
            tokio::spawn(async move {
                let _permit = match limiter {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                let method = notification.method.clone();
                if let Err(err) =
                    tokio::task::spawn_blocking(move || callback(ctx, notification)).await
                {
                    log::warn!("callback for {method} failed: {err}");
                }
            });
        }
        callbacks.len()
    }
}
