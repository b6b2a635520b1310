use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::event::MessageEvent;
use super::traits::EventHandler;
use crate::serde_helpers::deserialize_with_warnings;

/// Event-name to handler mapping shared by the manager handle and its driver.
///
/// Registration takes effect for the next message dispatched, including
/// messages already read but not yet routed. The last registration for a name
/// wins.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler whose payload is decoded into `T` first.
    ///
    /// Payloads that do not decode into `T` are logged and dropped.
    pub fn register<T, F>(&self, event: &str, handler: F)
    where
        T: DeserializeOwned + 'static,
        F: Fn(T, &MessageEvent) + Send + Sync + 'static,
    {
        let typed = TypedHandler {
            event: event.to_owned(),
            handler,
            _payload: PhantomData,
        };
        self.insert(event, Arc::new(typed));
    }

    /// Register a handler that receives the payload as raw JSON.
    pub fn insert(&self, event: &str, handler: Arc<dyn EventHandler>) {
        if self.handlers.insert(event.to_owned(), handler).is_some() {
            #[cfg(feature = "tracing")]
            tracing::debug!(event, "replaced existing event handler");
        }
    }

    pub fn remove(&self, event: &str) -> bool {
        self.handlers.remove(event).is_some()
    }

    pub fn clear(&self) {
        self.handlers.clear();
    }

    #[must_use]
    pub fn contains(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Names of every registered event, in no particular order.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.handlers.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Look up the handler for `event`.
    ///
    /// The map guard is released before returning so a handler may itself
    /// register or remove handlers.
    #[must_use]
    pub fn get(&self, event: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers
            .get(event)
            .map(|entry| Arc::clone(entry.value()))
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("events", &self.events())
            .finish()
    }
}

struct TypedHandler<T, F> {
    event: String,
    handler: F,
    _payload: PhantomData<fn() -> T>,
}

impl<T, F> EventHandler for TypedHandler<T, F>
where
    T: DeserializeOwned + 'static,
    F: Fn(T, &MessageEvent) + Send + Sync + 'static,
{
    fn handle(&self, payload: Value, event: &MessageEvent) {
        match deserialize_with_warnings::<T>(payload) {
            Ok(decoded) => (self.handler)(decoded, event),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(event = %self.event, error = %e, "dropping message with undecodable payload");
                #[cfg(not(feature = "tracing"))]
                let _: (&String, &crate::error::Error) = (&self.event, &e);
            }
        }
    }
}
