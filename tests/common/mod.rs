#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Each test binary uses a different subset of these helpers"
)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use event_socket::Result;
use event_socket::error::{Error, Kind};
use event_socket::ws::{
    CloseEvent, CloseReason, ConnectRequest, Connected, ConnectionManager, ConnectionState,
    Connector, Frame, LifecycleHandler, OpenEvent, WsError,
};
use futures::channel::mpsc as frames;
use futures::{FutureExt as _, SinkExt as _, StreamExt as _, future};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};

/// How a scripted handshake ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accept,
    Refuse,
    /// Never completes; only the watchdog or a close ends it
    Hang,
}

struct Shared {
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    protocol: Option<String>,
    attempts: Mutex<Vec<(Instant, ConnectRequest)>>,
    accepted: mpsc::UnboundedSender<MockConnection>,
}

/// In-memory [`Connector`] whose handshakes follow a script.
pub struct ScriptedConnector {
    shared: Arc<Shared>,
}

/// Test-side view of a [`ScriptedConnector`].
pub struct MockServer {
    shared: Arc<Shared>,
    accepted: mpsc::UnboundedReceiver<MockConnection>,
}

/// Creates a connector that plays `script` in order, then `fallback` forever.
pub fn scripted(script: &[Outcome], fallback: Outcome) -> (ScriptedConnector, MockServer) {
    scripted_with_protocol(script, fallback, None)
}

pub fn scripted_with_protocol(
    script: &[Outcome],
    fallback: Outcome,
    protocol: Option<&str>,
) -> (ScriptedConnector, MockServer) {
    let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        script: Mutex::new(script.iter().copied().collect()),
        fallback,
        protocol: protocol.map(str::to_owned),
        attempts: Mutex::new(Vec::new()),
        accepted: accepted_tx,
    });

    (
        ScriptedConnector {
            shared: Arc::clone(&shared),
        },
        MockServer {
            shared,
            accepted: accepted_rx,
        },
    )
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, request: &ConnectRequest) -> Result<Connected> {
        self.shared
            .attempts
            .lock()
            .unwrap()
            .push((Instant::now(), request.clone()));
        let outcome = self
            .shared
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.shared.fallback);

        match outcome {
            Outcome::Refuse => Err(WsError::ConnectionClosed.into()),
            Outcome::Hang => future::pending().await,
            Outcome::Accept => {
                let (to_client, stream) = frames::unbounded::<Result<Frame>>();
                let (sink, from_client) = frames::unbounded::<Frame>();
                _ = self.shared.accepted.send(MockConnection {
                    to_client,
                    from_client,
                });

                let sink = sink.sink_map_err(|_closed| Error::from(WsError::ConnectionClosed));
                Ok(Connected::new(
                    Box::pin(sink),
                    Box::pin(stream),
                    self.shared.protocol.clone(),
                ))
            }
        }
    }
}

impl MockServer {
    /// Instants of every handshake attempt, relative to the first one.
    pub fn attempt_offsets(&self) -> Vec<Duration> {
        let attempts = self.shared.attempts.lock().unwrap();
        let Some((first, _)) = attempts.first() else {
            return Vec::new();
        };
        attempts.iter().map(|(at, _)| *at - *first).collect()
    }

    pub fn attempt_count(&self) -> usize {
        self.shared.attempts.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.shared
            .attempts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    /// Wait for the next accepted handshake.
    pub async fn accept(&mut self) -> MockConnection {
        timeout(Duration::from_secs(60), self.accepted.recv())
            .await
            .expect("no connection accepted in time")
            .unwrap()
    }
}

/// Server side of one accepted in-memory connection.
pub struct MockConnection {
    to_client: frames::UnboundedSender<Result<Frame>>,
    from_client: frames::UnboundedReceiver<Frame>,
}

impl MockConnection {
    pub fn send_text(&self, text: &str) {
        _ = self
            .to_client
            .unbounded_send(Ok(Frame::Text(text.to_owned())));
    }

    pub fn send_json(&self, value: &Value) {
        self.send_text(&value.to_string());
    }

    /// Send a close frame and end the stream, as a server closing cleanly would.
    pub fn close(self, reason: Option<CloseReason>) {
        _ = self.to_client.unbounded_send(Ok(Frame::Close(reason)));
    }

    /// End the stream without a close frame.
    pub fn drop_connection(self) {}

    /// Next frame written by the client.
    pub async fn recv(&mut self) -> Option<Frame> {
        timeout(Duration::from_secs(60), self.from_client.next())
            .await
            .ok()
            .flatten()
    }

    /// Next frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.from_client.next().now_or_never().flatten()
    }
}

/// Lifecycle notification captured by [`Recorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Open(Option<String>),
    Close { code: u16, was_clean: bool },
    Error(Kind),
}

/// [`LifecycleHandler`] that keeps every notification.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Recorded>>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().unwrap().clone()
    }

    pub fn opens(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, Recorded::Open(_)))
            .count()
    }
}

impl LifecycleHandler for Recorder {
    fn on_open(&self, event: &OpenEvent) {
        self.events
            .lock()
            .unwrap()
            .push(Recorded::Open(event.protocol.clone()));
    }

    fn on_close(&self, event: &CloseEvent) {
        self.events.lock().unwrap().push(Recorded::Close {
            code: event.code,
            was_clean: event.was_clean,
        });
    }

    fn on_error(&self, error: &Error) {
        self.events.lock().unwrap().push(Recorded::Error(error.kind()));
    }
}

/// Wait until the manager reports a state matching `predicate`.
pub async fn wait_for_state<F>(connection: &ConnectionManager, predicate: F) -> ConnectionState
where
    F: FnMut(&ConnectionState) -> bool,
{
    let mut state_rx = connection.state_receiver();
    let state = timeout(Duration::from_secs(60), state_rx.wait_for(predicate))
        .await
        .expect("state not reached in time")
        .unwrap();
    *state
}

/// Let spawned tasks run without advancing the clock.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

pub fn frame_json(frame: &Frame) -> Value {
    match frame {
        Frame::Text(text) => serde_json::from_str(text).unwrap(),
        other => panic!("expected a text frame, got {other:?}"),
    }
}
