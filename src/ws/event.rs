//! Events handed to lifecycle callbacks and message handlers.

use std::time::Instant;

use url::Url;

use super::transport::CloseReason;

/// Close code for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code reported when the peer's close frame carried no status.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Close code reported when the connection ended without a close handshake.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Delivered to [`LifecycleHandler::on_open`](super::LifecycleHandler::on_open)
/// once a handshake completes.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenEvent {
    /// Address the connection was opened to
    pub endpoint: Url,
    /// Subprotocol selected by the server, if any
    pub protocol: Option<String>,
}

impl OpenEvent {
    #[must_use]
    pub fn new(endpoint: Url, protocol: Option<String>) -> Self {
        Self { endpoint, protocol }
    }
}

/// Delivered to [`LifecycleHandler::on_close`](super::LifecycleHandler::on_close)
/// for every closure, whatever the cause.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    /// Close status code
    pub code: u16,
    /// Close reason text, empty when none was given
    pub reason: String,
    /// Whether the closing handshake completed
    pub was_clean: bool,
}

impl CloseEvent {
    #[must_use]
    pub fn new(code: u16, reason: String, was_clean: bool) -> Self {
        Self {
            code,
            reason,
            was_clean,
        }
    }

    /// The connection dropped, failed, or was abandoned mid-handshake.
    #[must_use]
    pub fn abnormal() -> Self {
        Self::new(CLOSE_ABNORMAL, String::new(), false)
    }

    /// Build from a close frame received from the peer.
    #[must_use]
    pub fn from_frame(frame: Option<CloseReason>) -> Self {
        match frame {
            Some(CloseReason { code, reason }) => Self::new(code, reason, true),
            None => Self::new(CLOSE_NO_STATUS, String::new(), true),
        }
    }
}

/// The raw inbound message, passed to handlers alongside the decoded payload.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    /// Text exactly as received
    pub data: String,
    /// When the frame was read off the socket
    pub received_at: Instant,
}

impl MessageEvent {
    #[must_use]
    pub fn new(data: String) -> Self {
        Self {
            data,
            received_at: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_frame_without_status_reports_no_status() {
        let event = CloseEvent::from_frame(None);

        assert_eq!(event.code, CLOSE_NO_STATUS);
        assert!(event.was_clean);
    }

    #[test]
    fn close_frame_keeps_code_and_reason() {
        let event = CloseEvent::from_frame(Some(CloseReason::new(4001, "shutting down")));

        assert_eq!(event.code, 4001);
        assert_eq!(event.reason, "shutting down");
        assert!(event.was_clean);
    }

    #[test]
    fn abnormal_close_is_not_clean() {
        let event = CloseEvent::abnormal();

        assert_eq!(event.code, CLOSE_ABNORMAL);
        assert!(!event.was_clean);
    }
}
