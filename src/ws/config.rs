#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::collections::HashSet;
use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use bon::Builder;

use crate::Result;
use crate::error::Error;

const DEFAULT_CONNECT_TIMEOUT_DURATION: Duration = Duration::from_secs(2);
const DEFAULT_INITIAL_BACKOFF_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(4);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default key holding the event name in every message.
pub const DEFAULT_EVENT_FIELD: &str = "event";
/// Default key holding the event payload in every message.
pub const DEFAULT_DATA_FIELD: &str = "data";

/// Configuration for a [`ConnectionManager`](super::ConnectionManager).
///
/// Fixed at construction. Build one with [`Config::builder`] or start from
/// [`Config::default`] and adjust the public fields.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// How long a handshake may stay in the connecting phase before the
    /// handle is force-closed. Also bounds the wait for the peer's close frame.
    #[builder(default = DEFAULT_CONNECT_TIMEOUT_DURATION)]
    pub connect_timeout: Duration,
    /// Reconnection strategy configuration
    #[builder(default)]
    pub reconnect: ReconnectConfig,
    /// Message key carrying the event name
    #[builder(default = DEFAULT_EVENT_FIELD.to_owned(), into)]
    pub event_field: String,
    /// Message key carrying the event payload
    #[builder(default = DEFAULT_DATA_FIELD.to_owned(), into)]
    pub data_field: String,
    /// Subprotocols offered during the handshake, in preference order
    #[builder(default)]
    pub subprotocols: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_DURATION,
            reconnect: ReconnectConfig::default(),
            event_field: DEFAULT_EVENT_FIELD.to_owned(),
            data_field: DEFAULT_DATA_FIELD.to_owned(),
            subprotocols: Vec::new(),
        }
    }
}

impl Config {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(Error::validation("connect_timeout must be greater than zero"));
        }
        self.reconnect.validate()?;

        if self.event_field.is_empty() || self.data_field.is_empty() {
            return Err(Error::validation(
                "event_field and data_field must not be empty",
            ));
        }
        if self.event_field == self.data_field {
            return Err(Error::validation(format!(
                "event_field and data_field must differ, both are {:?}",
                self.event_field
            )));
        }

        let mut seen = HashSet::with_capacity(self.subprotocols.len());
        for protocol in &self.subprotocols {
            if protocol.trim().is_empty() {
                return Err(Error::validation("subprotocols must not contain empty entries"));
            }
            if !seen.insert(protocol.as_str()) {
                return Err(Error::validation(format!(
                    "subprotocol {protocol:?} is listed more than once"
                )));
            }
        }

        Ok(())
    }
}

/// Configuration for automatic reconnection behavior.
///
/// Retries never stop on their own: the delay grows from `initial_backoff` by
/// `backoff_multiplier` after every attempt, is capped at `max_backoff`, and
/// goes back to `initial_backoff` once a connection opens.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt, and after a successful open
    #[builder(default = DEFAULT_INITIAL_BACKOFF_DURATION)]
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    #[builder(default = DEFAULT_MAX_BACKOFF_DURATION)]
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff
    #[builder(default = DEFAULT_BACKOFF_MULTIPLIER)]
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff: DEFAULT_INITIAL_BACKOFF_DURATION,
            max_backoff: DEFAULT_MAX_BACKOFF_DURATION,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl ReconnectConfig {
    fn validate(&self) -> Result<()> {
        if self.initial_backoff.is_zero() {
            return Err(Error::validation("initial_backoff must be greater than zero"));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(Error::validation(format!(
                "initial_backoff ({:?}) exceeds max_backoff ({:?})",
                self.initial_backoff, self.max_backoff
            )));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(Error::validation(format!(
                "backoff_multiplier must be a finite value of at least 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }
}

impl From<ReconnectConfig> for ExponentialBackoff {
    fn from(config: ReconnectConfig) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.initial_backoff)
            .with_max_interval(config.max_backoff)
            .with_multiplier(config.backoff_multiplier)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build()
    }
}
