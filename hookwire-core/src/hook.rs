//! Collaborator contract for OS input-hook callbacks.
//!
//! The bus neither installs nor owns any operating-system hook. This
//! module is the seam the hook side plugs into: turn a raw callback
//! invocation into an event envelope, wait briefly for the host's
//! decision, and map the decision back to the primitive the OS callback
//! must return. Low-level hook callbacks are synchronous and silently
//! disabled by the OS when they stall, so the wait is short and every
//! failure path degrades to [`InputDecision::PassThrough`].

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::runtime::Handle;
use tracing::debug;

use crate::bus::MessageBus;
use crate::envelope::{Envelope, EnvelopeKind, Payload};

/// What the OS callback should do with the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputDecision {
    /// Consume the event; it never reaches its destination window.
    Swallow,
    /// Let the event continue down the hook chain.
    PassThrough,
}

impl InputDecision {
    pub fn from_handled(handled: bool) -> Self {
        if handled {
            InputDecision::Swallow
        } else {
            InputDecision::PassThrough
        }
    }

    pub fn handled(self) -> bool {
        matches!(self, InputDecision::Swallow)
    }
}

/// Synchronous facade for hook callback threads.
///
/// Owns a runtime handle so a plain OS thread can drive the async bus.
/// Must not be called from inside the runtime itself; hook callbacks
/// never are.
pub struct HookForwarder<R, W> {
    bus: Arc<MessageBus<R, W>>,
    handle: Handle,
    timeout: Duration,
}

impl<R, W> HookForwarder<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(bus: Arc<MessageBus<R, W>>, handle: Handle, timeout: Duration) -> Self {
        Self {
            bus,
            handle,
            timeout,
        }
    }

    /// Forward a mouse hook event and block until the host decides.
    pub fn forward_mouse(
        &self,
        event: u32,
        x: i32,
        y: i32,
        wheel: i16,
        flags: u32,
        time: u32,
    ) -> InputDecision {
        let envelope = Envelope::new(Payload::MouseEvent {
            event,
            x,
            y,
            wheel,
            flags,
            time,
        });
        self.decide(envelope, EnvelopeKind::MouseResponse)
    }

    /// Forward a keyboard hook event and block until the host decides.
    pub fn forward_keyboard(
        &self,
        event: u32,
        virtual_key: u32,
        scan_code: u32,
        flags: u32,
        time: u32,
    ) -> InputDecision {
        let envelope = Envelope::new(Payload::KeyboardEvent {
            event,
            virtual_key,
            scan_code,
            flags,
            time,
        });
        self.decide(envelope, EnvelopeKind::KeyboardResponse)
    }

    fn decide(&self, envelope: Envelope, expected: EnvelopeKind) -> InputDecision {
        let reply = self
            .handle
            .block_on(self.bus.send_and_expect(envelope, expected, self.timeout));
        match reply {
            Ok(Some(Envelope {
                payload: Payload::MouseResponse { handled },
                ..
            }))
            | Ok(Some(Envelope {
                payload: Payload::KeyboardResponse { handled },
                ..
            })) => InputDecision::from_handled(handled),
            Ok(_) => InputDecision::PassThrough,
            Err(e) => {
                debug!(error = %e, "hook forward failed, passing event through");
                InputDecision::PassThrough
            }
        }
    }
}
