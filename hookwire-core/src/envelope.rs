//! Wire-visible message shapes.
//!
//! Every message crossing the pipe is an [`Envelope`]: a correlation id plus
//! one of a closed set of payload shapes. The payload enum is internally
//! tagged with `kind`, so the serialized form is a single flat object
//! (`{"id": .., "kind": "mouse_event", ..fields}`). Tags are stable wire
//! identifiers and must never be reused for a different shape; an
//! unrecognized tag on decode is fatal to the transport (see
//! [`crate::transport`]).

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Sentinel id of an envelope that has not been sent yet.
///
/// The bus assigns a real id at send time; a received envelope always
/// carries a non-zero id.
pub const UNASSIGNED_ID: u64 = 0;

/// A single discrete message unit exchanged over the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation identifier. `0` means "not yet assigned".
    #[serde(default)]
    pub id: u64,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Envelope {
    /// Create an envelope with an unassigned id.
    pub fn new(payload: Payload) -> Self {
        Self {
            id: UNASSIGNED_ID,
            payload,
        }
    }

    /// Create a reply carrying the same correlation id as `request`.
    pub fn reply_to(request: &Envelope, payload: Payload) -> Self {
        Self {
            id: request.id,
            payload,
        }
    }

    pub fn kind(&self) -> EnvelopeKind {
        self.payload.kind()
    }
}

/// The closed set of payload shapes.
///
/// New variants may be added; existing tags are frozen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    /// Liveness probe. The peer replies with another `Ping` under the
    /// request's id.
    Ping,
    /// Hook configuration, carried in-band per the process boundary
    /// contract (no command-line flags, no environment variables).
    Configure {
        mouse_hook: bool,
        keyboard_hook: bool,
        response_timeout_ms: u64,
    },
    /// A low-level mouse hook event captured by the helper.
    MouseEvent {
        event: u32,
        x: i32,
        y: i32,
        wheel: i16,
        flags: u32,
        time: u32,
    },
    /// Host decision for a forwarded mouse event.
    MouseResponse { handled: bool },
    /// A low-level keyboard hook event captured by the helper.
    KeyboardEvent {
        event: u32,
        virtual_key: u32,
        scan_code: u32,
        flags: u32,
        time: u32,
    },
    /// Host decision for a forwarded keyboard event.
    KeyboardResponse { handled: bool },
}

impl Payload {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Payload::Ping => EnvelopeKind::Ping,
            Payload::Configure { .. } => EnvelopeKind::Configure,
            Payload::MouseEvent { .. } => EnvelopeKind::MouseEvent,
            Payload::MouseResponse { .. } => EnvelopeKind::MouseResponse,
            Payload::KeyboardEvent { .. } => EnvelopeKind::KeyboardEvent,
            Payload::KeyboardResponse { .. } => EnvelopeKind::KeyboardResponse,
        }
    }
}

/// Field-less discriminant of [`Payload`], used as the dispatch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, PartialOrd, Ord)]
#[strum(serialize_all = "snake_case")]
pub enum EnvelopeKind {
    Ping,
    Configure,
    MouseEvent,
    MouseResponse,
    KeyboardEvent,
    KeyboardResponse,
}
