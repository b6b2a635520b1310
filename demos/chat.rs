//! Minimal chat client built on the connection manager.
//!
//! Connects to a chat server, prints incoming messages and presence updates,
//! announces itself once the connection opens, and closes after a while. The
//! manager reconnects on its own if the server goes away in between.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info cargo run --example chat --features tracing -- ws://127.0.0.1:8080/chat
//! ```

use std::time::Duration;

use event_socket::error::Error;
use event_socket::ws::config::Config;
use event_socket::ws::{
    CloseEvent, ConnectionManager, LifecycleHandler, MessageEvent, OpenEvent,
};
use serde::Deserialize;
use serde_json::json;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct ChatMessage {
    from: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct Presence {
    user: String,
    online: bool,
}

struct Announcer;

impl LifecycleHandler for Announcer {
    fn on_open(&self, event: &OpenEvent) {
        info!(endpoint = %event.endpoint, protocol = ?event.protocol, "connected");
    }

    fn on_close(&self, event: &CloseEvent) {
        info!(code = event.code, reason = %event.reason, clean = event.was_clean, "disconnected");
    }

    fn on_error(&self, error: &Error) {
        warn!(error = %error, "connection error");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let endpoint = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:8080/chat".to_owned());

    let config = Config::builder()
        .subprotocols(vec!["chat.v1".to_owned()])
        .build();
    let connection = ConnectionManager::new(&endpoint, config)?;
    connection.set_lifecycle(Announcer);

    connection.register_handler("chat.message", |message: ChatMessage, _event: &MessageEvent| {
        info!(from = %message.from, text = %message.text, "chat");
    });
    connection.register_handler("presence", |presence: Presence, _event: &MessageEvent| {
        info!(user = %presence.user, online = presence.online, "presence");
    });

    connection.open();

    let mut state = connection.state_receiver();
    match timeout(Duration::from_secs(10), state.wait_for(|state| state.is_open())).await {
        Ok(Ok(_)) => connection.send("join", &json!({ "user": "demo" })),
        Ok(Err(e)) => anyhow::bail!("connection manager stopped: {e}"),
        Err(_) => warn!(endpoint = %endpoint, "not connected yet, continuing to retry"),
    }

    sleep(Duration::from_secs(30)).await;

    connection.send("leave", &json!({ "user": "demo" }));
    connection.close(Some(1000), Some("bye"));
    state
        .wait_for(|state| state.is_closed_intentionally())
        .await?;
    info!("closed");

    Ok(())
}
