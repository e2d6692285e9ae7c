//! Pending-wait bookkeeping for send-and-wait callers.
//!
//! Each outstanding `send_and_wait` parks a oneshot sender here under its
//! envelope's correlation id. The oneshot channel doubles as the delivery
//! slot: the reply travels inside it and is consumed exactly once by the
//! waiter it wakes. At most one waiter may ever be registered per id.

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::trace;

use crate::envelope::Envelope;
use crate::error::{BusError, BusResult};

#[derive(Default)]
pub struct PendingWaits {
    waits: DashMap<u64, oneshot::Sender<Envelope>>,
}

impl PendingWaits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter. Rejects a second waiter for the same id.
    pub fn insert(&self, id: u64, sender: oneshot::Sender<Envelope>) -> BusResult<()> {
        match self.waits.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(BusError::DuplicatePending(id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(sender);
                Ok(())
            }
        }
    }

    /// Deliver an inbound envelope to its waiter, if any.
    ///
    /// Returns the envelope back when no waiter is registered so the
    /// caller can fall through to the dispatch registry. A waiter that
    /// vanished between lookup and signal (its timeout fired) consumes
    /// nothing; the envelope is silently discarded, which is the
    /// documented behavior for replies to abandoned ids.
    pub fn complete(&self, envelope: Envelope) -> Option<Envelope> {
        match self.waits.remove(&envelope.id) {
            Some((id, sender)) => {
                if sender.send(envelope).is_err() {
                    trace!(id, "reply arrived after its waiter gave up");
                }
                None
            }
            None => Some(envelope),
        }
    }

    /// Remove a waiter's own entry after its timeout fired.
    pub fn abandon(&self, id: u64) -> bool {
        self.waits.remove(&id).is_some()
    }

    /// Drop every registered waiter. Their receivers resolve immediately
    /// with a closed-channel outcome, which callers surface as "no
    /// result".
    pub fn cancel_all(&self) {
        self.waits.clear();
    }

    pub fn len(&self) -> usize {
        self.waits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waits.is_empty()
    }
}
