//! # hookwire: inter-process input-hook message bus
//!
//! Running raw OS input hooks inside a host process is risky: a slow or
//! crashing hook handler stalls the whole system input pipeline. hookwire
//! isolates the hook in a helper process and shuttles events across the
//! helper's stdio as length-prefixed frames, with request/response
//! correlation so a synchronous hook callback can ask the host "swallow
//! this input?" and get an answer within a bounded window.
//!
//! ## Components
//!
//! - [`envelope`]: the closed set of wire-visible message shapes.
//! - [`message_id`]: per-process-unique 64-bit correlation ids.
//! - [`transport`]: varint-length-prefixed framing over a byte stream.
//! - [`correlation`]: the pending-wait table matching replies to waiters.
//! - [`dispatch`]: per-variant handlers for unsolicited envelopes.
//! - [`bus`]: the start/stop service tying the above together.
//! - [`hook`]: the collaborator contract for OS hook callbacks.
//! - [`process`]: stdio wiring for the spawned helper child.
//!
//! ## Flow
//!
//! ```text
//! hook callback ──Envelope──▶ send_and_wait ──frame──▶ pipe ──▶ host
//!       ▲                                                        │
//!       └────────── decision ◀── reader task ◀──frame────────────┘
//! ```
//!
//! A hook callback builds an event envelope and calls `send_and_wait`
//! with a short timeout. The single reader task on the other side routes
//! each inbound envelope to its waiter by id, or to a registered
//! handler, or drops it. Timeouts and wrong-variant replies surface as
//! "no result", never as faults; the hook side degrades to passing input
//! through rather than crashing.

pub mod bus;
pub mod config;
pub mod correlation;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod hook;
pub mod message_id;
pub mod process;
pub mod transport;

pub use bus::MessageBus;
pub use config::BusConfig;
pub use envelope::{Envelope, EnvelopeKind, Payload, UNASSIGNED_ID};
pub use error::{BusError, BusResult, Error};
pub use hook::{HookForwarder, InputDecision};
pub use process::{stdio_bus, HelperBus, HelperProcess, StdioBus};
pub use transport::TransportError;
