//! Self-healing WebSocket connection with event-name message routing.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: owns one transport handle at a time, reconnects with
//!   exponential backoff, and dispatches inbound messages by event name
//! - [`LifecycleHandler`]: replaceable open/close/error callbacks
//! - [`EventHandler`]: per-event message handler, usually a closure
//! - [`Connector`]: transport seam; [`TungsteniteConnector`] by default
//!
//! # Example
//!
//! ```ignore
//! let connection = ConnectionManager::new("wss://example.com/ws", Config::default())?;
//! connection.register_handler("chat.message", |payload: Value, _event: &MessageEvent| {
//!     println!("{payload}");
//! });
//! connection.open();
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod registry;
pub mod traits;
pub mod transport;

pub use connection::{ConnectionManager, ConnectionState};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use event::{CloseEvent, MessageEvent, OpenEvent};
pub use traits::*;
pub use transport::{CloseReason, ConnectRequest, Connected, Frame, TungsteniteConnector};
