//! Core traits at the seams of the connection manager.

use async_trait::async_trait;
use serde_json::Value;

use super::event::{CloseEvent, MessageEvent, OpenEvent};
use super::transport::{ConnectRequest, Connected};
use crate::Result;
use crate::error::Error;

/// Callbacks for connection lifecycle notifications.
///
/// Every method has a default body that only logs, so implementors override
/// what they care about. Callbacks run on the manager's driver task, one at a
/// time, and should return quickly.
///
/// # Example
///
/// ```ignore
/// struct Presence(Arc<AtomicBool>);
///
/// impl LifecycleHandler for Presence {
///     fn on_open(&self, _event: &OpenEvent) {
///         self.0.store(true, Ordering::SeqCst);
///     }
///
///     fn on_close(&self, _event: &CloseEvent) {
///         self.0.store(false, Ordering::SeqCst);
///     }
/// }
/// ```
pub trait LifecycleHandler: Send + Sync + 'static {
    /// A handshake completed and the connection is open.
    fn on_open(&self, event: &OpenEvent) {
        #[cfg(feature = "tracing")]
        tracing::info!(endpoint = %event.endpoint, protocol = ?event.protocol, "WebSocket connection opened");
        #[cfg(not(feature = "tracing"))]
        let _: &OpenEvent = event;
    }

    /// The connection closed, cleanly or not. A reconnect may follow.
    fn on_close(&self, event: &CloseEvent) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            code = event.code,
            reason = %event.reason,
            was_clean = event.was_clean,
            "WebSocket connection closed"
        );
        #[cfg(not(feature = "tracing"))]
        let _: &CloseEvent = event;
    }

    /// The transport reported an error. A close notification follows.
    fn on_error(&self, error: &Error) {
        #[cfg(feature = "tracing")]
        tracing::warn!(%error, "WebSocket error");
        #[cfg(not(feature = "tracing"))]
        let _: &Error = error;
    }
}

/// Lifecycle callbacks that only log.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingLifecycle;

impl LifecycleHandler for LoggingLifecycle {}

/// Handler for one named event.
///
/// Receives the value found under the payload key (`Value::Null` when the key
/// is missing) and the raw message it came from. Implemented for any matching
/// closure.
pub trait EventHandler: Send + Sync + 'static {
    fn handle(&self, payload: Value, event: &MessageEvent);
}

impl<F> EventHandler for F
where
    F: Fn(Value, &MessageEvent) + Send + Sync + 'static,
{
    fn handle(&self, payload: Value, event: &MessageEvent) {
        self(payload, event);
    }
}

/// Establishes transport connections.
///
/// The default is [`TungsteniteConnector`](super::transport::TungsteniteConnector).
/// Other implementations can be injected through
/// [`ConnectionManager::with_connector`](super::ConnectionManager::with_connector),
/// e.g. to run over an in-memory transport.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Perform the opening handshake.
    ///
    /// The returned future is dropped if the handshake is abandoned, either by
    /// the connect watchdog or by an explicit close.
    async fn connect(&self, request: &ConnectRequest) -> Result<Connected>;
}
