//! Transport plumbing: frame types, the default connector, and the task that
//! owns one socket for the lifetime of a transport handle.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Sink, SinkExt as _, Stream, StreamExt as _, future};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

use super::event::{CloseEvent, MessageEvent};
use super::traits::Connector;
use crate::Result;
use crate::error::Error;

/// Outgoing half of a connected transport.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = Error> + Send>>;
/// Incoming half of a connected transport.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

/// A frame as seen by the connection manager.
///
/// Control frames other than close are handled inside the transport; binary
/// frames are not part of the message format and are not surfaced.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close(Option<CloseReason>),
}

/// Status code and reason carried by a close frame.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn new<S: Into<String>>(code: u16, reason: S) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// Parameters of one handshake.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub url: Url,
    /// Offered subprotocols, in preference order
    pub subprotocols: Vec<String>,
}

impl ConnectRequest {
    #[must_use]
    pub fn new(url: Url, subprotocols: Vec<String>) -> Self {
        Self { url, subprotocols }
    }
}

/// An open transport produced by a [`Connector`].
#[non_exhaustive]
pub struct Connected {
    pub sink: FrameSink,
    pub stream: FrameStream,
    /// Subprotocol the server selected, if any
    pub protocol: Option<String>,
}

impl Connected {
    #[must_use]
    pub fn new(sink: FrameSink, stream: FrameStream, protocol: Option<String>) -> Self {
        Self {
            sink,
            stream,
            protocol,
        }
    }
}

/// [`Connector`] backed by `tokio-tungstenite`. Supports `ws://` and `wss://`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, request: &ConnectRequest) -> Result<Connected> {
        let mut client_request = request.url.as_str().into_client_request()?;
        if !request.subprotocols.is_empty() {
            let offered = HeaderValue::from_str(&request.subprotocols.join(", "))?;
            client_request
                .headers_mut()
                .insert(SEC_WEBSOCKET_PROTOCOL, offered);
        }

        let (ws_stream, response) = connect_async(client_request).await?;
        let protocol = response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        let (write, read) = ws_stream.split();
        let sink = write
            .sink_map_err(Error::from)
            .with(|frame: Frame| future::ready(Ok::<_, Error>(Message::from(frame))));
        let stream = read.filter_map(|message| future::ready(frame_from_message(message)));

        Ok(Connected::new(Box::pin(sink), Box::pin(stream), protocol))
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Close(reason) => Message::Close(reason.map(|r| CloseFrame {
                code: CloseCode::from(r.code),
                reason: r.reason.into(),
            })),
        }
    }
}

fn frame_from_message(message: std::result::Result<Message, tungstenite::Error>) -> Option<Result<Frame>> {
    match message {
        Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
        Ok(Message::Close(frame)) => Some(Ok(Frame::Close(
            frame.map(|f| CloseReason::new(u16::from(f.code), f.reason.as_str())),
        ))),
        Ok(Message::Binary(bytes)) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(len = bytes.len(), "ignoring binary WebSocket frame");
            #[cfg(not(feature = "tracing"))]
            let _: &[u8] = &bytes;
            None
        }
        // Ping/pong replies are handled by tungstenite itself
        Ok(_) => None,
        Err(e) => Some(Err(e.into())),
    }
}

/// Requests from the driver to a transport task.
#[derive(Debug)]
pub(crate) enum Outbound {
    Text(String),
    Close(Option<CloseReason>),
}

/// Notifications from a transport task to the driver.
#[derive(Debug)]
pub(crate) enum TransportEvent {
    Opened { protocol: Option<String> },
    Errored(Error),
    Closed(CloseEvent),
    Message(MessageEvent),
}

/// Own one socket: handshake, read loop, writes, close handshake.
///
/// Every handle ends with exactly one `Closed` report, unless the driver drops
/// `outbound` first (the handle was superseded), in which case the socket is
/// closed silently.
pub(crate) async fn drive<R>(
    connector: Arc<dyn Connector>,
    request: ConnectRequest,
    close_timeout: Duration,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    report: R,
) where
    R: Fn(TransportEvent) + Send + 'static,
{
    let connected = tokio::select! {
        biased;

        command = outbound.recv() => {
            // Before the handshake finishes the driver only ever asks us to close
            if command.is_some() {
                report(TransportEvent::Closed(CloseEvent::abnormal()));
            }
            return;
        }
        result = connector.connect(&request) => result,
    };

    let Connected {
        mut sink,
        mut stream,
        protocol,
    } = match connected {
        Ok(connected) => connected,
        Err(e) => {
            report(TransportEvent::Errored(e));
            report(TransportEvent::Closed(CloseEvent::abnormal()));
            return;
        }
    };

    report(TransportEvent::Opened { protocol });

    let close = loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Frame::Text(text))) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(%text, "Received WebSocket text message");
                    report(TransportEvent::Message(MessageEvent::new(text)));
                }
                Some(Ok(Frame::Close(reason))) => {
                    // Keep polling so the transport can flush its close reply
                    _ = timeout(close_timeout, async { while stream.next().await.is_some() {} }).await;
                    break CloseEvent::from_frame(reason);
                }
                Some(Err(e)) => {
                    report(TransportEvent::Errored(e));
                    break CloseEvent::abnormal();
                }
                None => break CloseEvent::abnormal(),
            },
            command = outbound.recv() => match command {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = sink.send(Frame::Text(text)).await {
                        report(TransportEvent::Errored(e));
                        break CloseEvent::abnormal();
                    }
                }
                Some(Outbound::Close(reason)) => {
                    break close_handshake(&mut sink, &mut stream, reason, close_timeout).await;
                }
                None => {
                    _ = timeout(close_timeout, async {
                        _ = sink.send(Frame::Close(None)).await;
                        _ = sink.close().await;
                    })
                    .await;
                    return;
                }
            },
        }
    };

    report(TransportEvent::Closed(close));
}

async fn close_handshake(
    sink: &mut FrameSink,
    stream: &mut FrameStream,
    reason: Option<CloseReason>,
    limit: Duration,
) -> CloseEvent {
    let handshake = async {
        sink.send(Frame::Close(reason)).await.ok()?;
        while let Some(frame) = stream.next().await {
            if let Ok(Frame::Close(echo)) = frame {
                return Some(echo);
            }
        }
        None
    };

    match timeout(limit, handshake).await {
        Ok(Some(echo)) => CloseEvent::from_frame(echo),
        Ok(None) | Err(_) => CloseEvent::abnormal(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_frame_maps_to_text_message() {
        let message = Message::from(Frame::Text("hello".to_owned()));

        assert_eq!(message, Message::Text("hello".into()));
    }

    #[test]
    fn close_frame_round_trips_code_and_reason() {
        let message = Message::from(Frame::Close(Some(CloseReason::new(4000, "bye"))));

        let frame = frame_from_message(Ok(message)).unwrap().unwrap();
        assert_eq!(frame, Frame::Close(Some(CloseReason::new(4000, "bye"))));
    }

    #[test]
    fn binary_and_control_frames_are_skipped() {
        assert!(frame_from_message(Ok(Message::Binary(vec![1, 2, 3].into()))).is_none());
        assert!(frame_from_message(Ok(Message::Ping(Vec::new().into()))).is_none());
        assert!(frame_from_message(Ok(Message::Pong(Vec::new().into()))).is_none());
    }

    #[test]
    fn transport_errors_are_websocket_errors() {
        let frame = frame_from_message(Err(tungstenite::Error::ConnectionClosed)).unwrap();

        let err = frame.unwrap_err();
        assert_eq!(err.kind(), crate::error::Kind::WebSocket);
    }
}
