//! Per-variant handlers for envelopes that arrive without a waiter.
//!
//! Handlers run synchronously on the reader task. A slow handler stalls
//! every subsequent frame and every pending correlation; handlers that
//! need to do real work should hand it off (`tokio::spawn`) and return.

use std::sync::Arc;

use dashmap::DashMap;

use crate::envelope::{Envelope, EnvelopeKind};

pub type Handler = Arc<dyn Fn(Envelope) + Send + Sync + 'static>;

#[derive(Default)]
pub struct DispatchRegistry {
    handlers: DashMap<EnvelopeKind, Handler>,
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a variant. The last registration wins.
    pub fn register<F>(&self, kind: EnvelopeKind, handler: F)
    where
        F: Fn(Envelope) + Send + Sync + 'static,
    {
        self.handlers.insert(kind, Arc::new(handler));
    }

    /// Remove the handler for a variant. Returns whether one existed.
    pub fn unregister(&self, kind: EnvelopeKind) -> bool {
        self.handlers.remove(&kind).is_some()
    }

    /// Invoke the handler for the envelope's variant, if registered.
    ///
    /// Returns whether a handler ran. The handler arc is cloned out of
    /// the map before the call so a handler may re-register or
    /// unregister its own variant without deadlocking the shard.
    pub fn dispatch(&self, envelope: Envelope) -> bool {
        let handler = self
            .handlers
            .get(&envelope.kind())
            .map(|entry| entry.value().clone());
        match handler {
            Some(handler) => {
                handler(envelope);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
