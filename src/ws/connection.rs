#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use url::Url;

use super::config::Config;
use super::error::WsError;
use super::event::{CloseEvent, MessageEvent, OpenEvent};
use super::registry::HandlerRegistry;
use super::traits::{Connector, EventHandler, LifecycleHandler, LoggingLifecycle};
use super::transport::{self, CloseReason, ConnectRequest, Outbound, TransportEvent, TungsteniteConnector};
use crate::Result;
use crate::error::Error;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// `open` has never been called
    Unopened,
    /// Handshake in progress
    Connecting {
        /// Consecutive automatic reconnects since the last successful open or
        /// explicit `open`. Zero for the first try.
        attempt: u32,
    },
    /// Successfully connected
    Open {
        /// When the connection was established
        since: Instant,
    },
    /// A close was requested and the close handshake is running
    Closing,
    /// No live connection
    Closed {
        /// `true` after [`ConnectionManager::close`]; no reconnect will happen
        /// until [`ConnectionManager::open`] is called again
        intentional: bool,
    },
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// Check if the manager is at rest after an explicit close.
    #[must_use]
    pub const fn is_closed_intentionally(self) -> bool {
        matches!(self, Self::Closed { intentional: true })
    }
}

/// Keeps one logical WebSocket connection alive and routes its messages.
///
/// The manager owns at most one transport handle at a time. Transient failures
/// (refused or hung handshakes, dropped connections) are retried forever with
/// exponential backoff until [`close`](Self::close) is called. Inbound
/// messages are JSON objects carrying an event name and a payload under the
/// configured keys; each is routed to the handler registered for its name.
///
/// All state lives in a background driver task that processes commands,
/// transport notifications and timer expiries one at a time. Handles are
/// cheap to clone; the driver stops (closing the connection) when the last
/// clone is dropped.
///
/// No operation besides construction returns an error: sends while not open
/// are dropped, unroutable or undecodable messages are ignored, and every
/// failure is only observable through logging and the
/// [`LifecycleHandler`] callbacks.
///
/// # Example
///
/// ```no_run
/// use event_socket::ws::{ConnectionManager, MessageEvent};
/// use event_socket::ws::config::Config;
/// use serde::Deserialize;
///
/// #[derive(Debug, Deserialize)]
/// struct Chat {
///     text: String,
/// }
///
/// # async fn example() -> event_socket::Result<()> {
/// let connection = ConnectionManager::new("wss://chat.example.com/ws", Config::default())?;
/// connection.register_handler("chat.message", |chat: Chat, _event: &MessageEvent| {
///     println!("{}", chat.text);
/// });
/// connection.open();
/// connection.send("chat.message", &serde_json::json!({ "text": "hi" }));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    endpoint: Url,
    /// Commands for the driver task
    command_tx: mpsc::UnboundedSender<Command>,
    /// Watch channel receiver for state changes
    state_rx: watch::Receiver<ConnectionState>,
    handlers: Arc<HandlerRegistry>,
}

impl ConnectionManager {
    /// Create a manager for `endpoint` using the `tokio-tungstenite` transport.
    ///
    /// Must be called within a tokio runtime. Does not connect; call
    /// [`open`](Self::open).
    pub fn new(endpoint: &str, config: Config) -> Result<Self> {
        Self::with_connector(endpoint, config, TungsteniteConnector)
    }

    /// Create a manager that establishes connections through `connector`.
    pub fn with_connector<C: Connector>(endpoint: &str, config: Config, connector: C) -> Result<Self> {
        config.validate()?;
        let endpoint = parse_endpoint(endpoint)?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Unopened);
        let handlers = Arc::new(HandlerRegistry::new());

        let driver = Driver {
            backoff: config.reconnect.clone().into(),
            request: ConnectRequest::new(endpoint.clone(), config.subprotocols.clone()),
            config,
            connector: Arc::new(connector),
            handlers: Arc::clone(&handlers),
            lifecycle: Arc::new(LoggingLifecycle),
            state_tx,
            signal_tx,
            current: None,
            generation: 0,
            intentionally_closed: false,
            attempt: 0,
        };
        tokio::spawn(driver.run(command_rx, signal_rx));

        Ok(Self {
            endpoint,
            command_tx,
            state_rx,
            handlers,
        })
    }

    /// Open a connection, superseding any existing transport handle.
    ///
    /// Clears the intentional-close flag, so automatic reconnection resumes.
    pub fn open(&self) {
        self.command(Command::Open);
    }

    /// Close the connection and stop reconnecting until the next [`open`](Self::open).
    ///
    /// `reason` is only sent along with a `code`. Pending reconnect timers
    /// observe the close and do nothing. Harmless when already closed.
    pub fn close(&self, code: Option<u16>, reason: Option<&str>) {
        let reason = code.map(|code| CloseReason::new(code, reason.unwrap_or_default()));
        self.command(Command::Close(reason));
    }

    /// [`close`](Self::close) with a prepared close frame.
    pub fn close_with(&self, reason: CloseReason) {
        self.command(Command::Close(Some(reason)));
    }

    /// Send `payload` under the event name `event`.
    ///
    /// Dropped with a warning when the connection is not open or the payload
    /// cannot be serialized. No delivery confirmation is given.
    pub fn send<T: Serialize + ?Sized>(&self, event: &str, payload: &T) {
        if event.is_empty() {
            #[cfg(feature = "tracing")]
            tracing::warn!("dropping outbound message with an empty event name");
            return;
        }

        match serde_json::to_value(payload) {
            Ok(payload) => self.command(Command::Send {
                event: event.to_owned(),
                payload,
            }),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(event, error = %e, "dropping outbound message with unserializable payload");
                #[cfg(not(feature = "tracing"))]
                let _: &serde_json::Error = &e;
            }
        }
    }

    /// Route messages named `event` to `handler`, replacing any previous one.
    ///
    /// The payload is decoded into `T` before `handler` runs; use
    /// [`serde_json::Value`] to receive it untouched. Takes effect for the
    /// next message dispatched.
    pub fn register_handler<T, F>(&self, event: &str, handler: F)
    where
        T: DeserializeOwned + 'static,
        F: Fn(T, &MessageEvent) + Send + Sync + 'static,
    {
        self.handlers.register(event, handler);
    }

    /// Route messages named `event` to a prepared [`EventHandler`].
    pub fn register_event_handler<H: EventHandler>(&self, event: &str, handler: H) {
        self.handlers.insert(event, Arc::new(handler));
    }

    /// Remove the handler for `event`, returning whether one was registered.
    pub fn remove_handler(&self, event: &str) -> bool {
        self.handlers.remove(event)
    }

    /// Remove every handler.
    pub fn clear_handlers(&self) {
        self.handlers.clear();
    }

    #[must_use]
    pub fn has_handler(&self, event: &str) -> bool {
        self.handlers.contains(event)
    }

    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Replace the lifecycle callbacks. Applies to notifications processed
    /// after this call.
    pub fn set_lifecycle<L: LifecycleHandler>(&self, lifecycle: L) {
        self.command(Command::SetLifecycle(Arc::new(lifecycle)));
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn command(&self, command: Command) {
        if self.command_tx.send(command).is_err() {
            #[cfg(feature = "tracing")]
            tracing::warn!(endpoint = %self.endpoint, "connection driver is gone, command dropped");
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.endpoint.as_str())
            .field("state", &self.state())
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url> {
    let url = Url::parse(endpoint)?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        scheme => Err(Error::validation(format!(
            "endpoint scheme must be ws or wss, got {scheme:?}"
        ))),
    }
}

enum Command {
    Open,
    Close(Option<CloseReason>),
    Send { event: String, payload: Value },
    SetLifecycle(Arc<dyn LifecycleHandler>),
}

/// Internal inputs to the driver, each tagged with the transport generation
/// it concerns.
enum Signal {
    Transport {
        generation: u64,
        event: TransportEvent,
    },
    WatchdogElapsed {
        generation: u64,
    },
    ReconnectDue {
        generation: u64,
    },
}

/// Ready-state of the current transport handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Connecting,
    Open,
    Closing,
    Closed,
}

struct Handle {
    generation: u64,
    phase: Phase,
    /// Dropping this sender makes the transport task close its socket
    outbound: mpsc::UnboundedSender<Outbound>,
}

/// Owner of all mutable connection state.
struct Driver {
    config: Config,
    request: ConnectRequest,
    connector: Arc<dyn Connector>,
    handlers: Arc<HandlerRegistry>,
    lifecycle: Arc<dyn LifecycleHandler>,
    state_tx: watch::Sender<ConnectionState>,
    signal_tx: mpsc::UnboundedSender<Signal>,
    current: Option<Handle>,
    /// Bumped for every new transport handle
    generation: u64,
    intentionally_closed: bool,
    /// `current_interval` is the delay for the next scheduled reconnect
    backoff: ExponentialBackoff,
    attempt: u32,
}

impl Driver {
    async fn run(
        mut self,
        mut command_rx: mpsc::UnboundedReceiver<Command>,
        mut signal_rx: mpsc::UnboundedReceiver<Signal>,
    ) {
        loop {
            tokio::select! {
                // Commands first, so a close issued before a timer fires is seen by that timer
                biased;

                command = command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    // Every manager handle is gone
                    None => break,
                },
                Some(signal) = signal_rx.recv() => self.handle_signal(signal),
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = %self.request.url, "connection manager dropped, shutting down");
        self.intentionally_closed = true;
        if let Some(handle) = self.current.take()
            && matches!(handle.phase, Phase::Connecting | Phase::Open)
        {
            _ = handle.outbound.send(Outbound::Close(None));
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Open => {
                self.attempt = 0;
                self.open();
            }
            Command::Close(reason) => self.close(reason),
            Command::Send { event, payload } => self.send(event, payload),
            Command::SetLifecycle(lifecycle) => self.lifecycle = lifecycle,
        }
    }

    fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Transport { generation, event } => {
                if self.is_current(generation) {
                    self.handle_transport(event);
                } else {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(generation, current = self.generation, "ignoring event from superseded transport");
                }
            }
            Signal::WatchdogElapsed { generation } => self.watchdog_elapsed(generation),
            Signal::ReconnectDue { generation } => self.reconnect(generation),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.current
            .as_ref()
            .is_some_and(|handle| handle.generation == generation)
    }

    fn phase(&self) -> Option<Phase> {
        self.current.as_ref().map(|handle| handle.phase)
    }

    fn set_phase(&mut self, phase: Phase) {
        if let Some(handle) = self.current.as_mut() {
            handle.phase = phase;
        }
    }

    fn publish(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    /// Replace the transport handle with a fresh one and arm its watchdog.
    fn open(&mut self) {
        self.intentionally_closed = false;
        self.generation += 1;
        let generation = self.generation;

        // Dropping the previous handle's sender closes its socket
        if let Some(previous) = self.current.take() {
            #[cfg(feature = "tracing")]
            tracing::debug!(generation = previous.generation, "superseding transport handle");
            drop(previous);
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let signal_tx = self.signal_tx.clone();
        tokio::spawn(transport::drive(
            Arc::clone(&self.connector),
            self.request.clone(),
            self.config.connect_timeout,
            outbound_rx,
            move |event| {
                _ = signal_tx.send(Signal::Transport { generation, event });
            },
        ));
        self.current = Some(Handle {
            generation,
            phase: Phase::Connecting,
            outbound: outbound_tx,
        });

        self.schedule(self.config.connect_timeout, Signal::WatchdogElapsed { generation });
        self.publish(ConnectionState::Connecting {
            attempt: self.attempt,
        });
    }

    fn close(&mut self, reason: Option<CloseReason>) {
        self.intentionally_closed = true;

        match self.phase() {
            Some(Phase::Connecting | Phase::Open) => {
                if let Some(handle) = self.current.as_mut() {
                    _ = handle.outbound.send(Outbound::Close(reason));
                    handle.phase = Phase::Closing;
                }
                self.publish(ConnectionState::Closing);
            }
            // Its close notification settles the state
            Some(Phase::Closing) => {}
            Some(Phase::Closed) | None => self.publish(ConnectionState::Closed { intentional: true }),
        }
    }

    fn send(&self, event: String, payload: Value) {
        let Some(handle) = self.current.as_ref().filter(|handle| handle.phase == Phase::Open) else {
            #[cfg(feature = "tracing")]
            tracing::warn!(%event, %payload, "trying to send message but WebSocket is not open");
            return;
        };

        let mut message = Map::with_capacity(2);
        message.insert(self.config.event_field.clone(), Value::String(event));
        message.insert(self.config.data_field.clone(), payload);
        let text = Value::Object(message).to_string();

        #[cfg(feature = "tracing")]
        tracing::trace!(%text, "Sending WebSocket text message");
        _ = handle.outbound.send(Outbound::Text(text));
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened { protocol } => {
                self.set_phase(Phase::Open);
                self.backoff.reset();
                self.attempt = 0;
                self.publish(ConnectionState::Open {
                    since: Instant::now(),
                });
                self.lifecycle
                    .on_open(&OpenEvent::new(self.request.url.clone(), protocol));
            }
            TransportEvent::Errored(error) => self.lifecycle.on_error(&error),
            TransportEvent::Closed(close) => self.transport_closed(&close),
            TransportEvent::Message(message) => self.dispatch(&message),
        }
    }

    fn transport_closed(&mut self, close: &CloseEvent) {
        self.set_phase(Phase::Closed);
        self.publish(ConnectionState::Closed {
            intentional: self.intentionally_closed,
        });
        self.lifecycle.on_close(close);

        // The timer re-checks the close flag when it fires
        let delay = self.backoff.current_interval;
        #[cfg(feature = "tracing")]
        tracing::debug!(?delay, "scheduling reconnect");
        self.schedule(
            delay,
            Signal::ReconnectDue {
                generation: self.generation,
            },
        );
    }

    fn watchdog_elapsed(&mut self, generation: u64) {
        if !self.is_current(generation) || self.phase() != Some(Phase::Connecting) {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(generation, timeout = ?self.config.connect_timeout, "handshake timed out, closing transport");
        self.lifecycle.on_error(&WsError::Timeout.into());
        if let Some(handle) = self.current.as_mut() {
            _ = handle.outbound.send(Outbound::Close(None));
            handle.phase = Phase::Closing;
        }
        self.publish(ConnectionState::Closing);
    }

    fn reconnect(&mut self, generation: u64) {
        if self.intentionally_closed {
            #[cfg(feature = "tracing")]
            tracing::debug!(generation, "reconnect abandoned, connection closed intentionally");
            return;
        }
        if !self.is_current(generation) || self.phase() == Some(Phase::Open) {
            #[cfg(feature = "tracing")]
            tracing::debug!(generation, current = self.generation, "reconnect abandoned, superseded by a newer transport");
            return;
        }

        self.attempt = self.attempt.saturating_add(1);
        self.open();
        // The next failure waits longer
        _ = self.backoff.next_backoff();
    }

    fn dispatch(&self, message: &MessageEvent) {
        let mut decoded: Value = match serde_json::from_str(&message.data) {
            Ok(value) => value,
            Err(e) => {
                let error = WsError::MessageParse(e);
                #[cfg(feature = "tracing")]
                tracing::warn!(data = %message.data, %error, "dropping undecodable WebSocket message");
                #[cfg(not(feature = "tracing"))]
                let _: &WsError = &error;
                return;
            }
        };

        let Some(field) = decoded.get(self.config.event_field.as_str()) else {
            return;
        };
        let Some(name) = field.as_str().map(str::to_owned) else {
            let error = WsError::InvalidMessage(format!(
                "{:?} must be a string, got {field}",
                self.config.event_field
            ));
            #[cfg(feature = "tracing")]
            tracing::warn!(%error, "dropping WebSocket message");
            #[cfg(not(feature = "tracing"))]
            let _: &WsError = &error;
            return;
        };

        let Some(handler) = self.handlers.get(&name) else {
            #[cfg(feature = "tracing")]
            tracing::warn!(event = %name, active = ?self.handlers.events(), "no handler for WebSocket event");
            return;
        };

        let payload = decoded
            .get_mut(self.config.data_field.as_str())
            .map(Value::take)
            .unwrap_or_default();
        handler.handle(payload, message);
    }

    fn schedule(&self, delay: Duration, signal: Signal) {
        let signal_tx = self.signal_tx.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            _ = signal_tx.send(signal);
        });
    }
}
