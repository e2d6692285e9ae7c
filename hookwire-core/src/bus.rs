//! # Message Bus
//!
//! Coordinates the framed transport, the pending-wait table, and the
//! dispatch registry behind a start/stop lifecycle.
//!
//! One dedicated reader task decodes frames and routes each envelope:
//! a matching pending waiter is signalled first, otherwise the dispatch
//! registry gets a chance, otherwise the envelope is dropped. Any number
//! of caller tasks may send concurrently; the write half sits behind a
//! mutex so frames never interleave.
//!
//! ## Lifecycle
//!
//! `Stopped → Running → Stopped`. `start` while running and `stop` while
//! stopped are no-ops. On cooperative shutdown the reader loop hands its
//! frame decoder back, partial decode state included, so the bus can be
//! restarted on the same stream even when `stop` lands in the middle of
//! an inbound frame. A transport fault (stream closed, malformed frame)
//! terminates the loop for good: the stream is not trusted past the
//! first corrupt byte and recovery belongs to process supervision.
//!
//! `stop` cancels in-flight `send_and_wait` callers immediately; they
//! resolve with "no result" instead of waiting out their timeouts.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::BusConfig;
use crate::correlation::PendingWaits;
use crate::dispatch::DispatchRegistry;
use crate::envelope::{Envelope, EnvelopeKind, UNASSIGNED_ID};
use crate::error::{BusError, BusResult};
use crate::message_id::MessageIdGenerator;
use crate::transport::{self, FrameReader, TransportError};

enum ReaderState<R> {
    Stopped { reader: Option<FrameReader<R>> },
    Running {
        shutdown: watch::Sender<bool>,
        handle: JoinHandle<Option<FrameReader<R>>>,
    },
}

/// Duplex message bus over a framed byte stream.
pub struct MessageBus<R, W> {
    writer: Mutex<W>,
    state: Mutex<ReaderState<R>>,
    pending: Arc<PendingWaits>,
    handlers: Arc<DispatchRegistry>,
    ids: MessageIdGenerator,
    reader_exited: watch::Sender<bool>,
    config: BusConfig,
}

impl<R, W> MessageBus<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W, config: BusConfig) -> Self {
        let (reader_exited, _) = watch::channel(true);
        Self {
            writer: Mutex::new(writer),
            state: Mutex::new(ReaderState::Stopped {
                reader: Some(FrameReader::new(reader)),
            }),
            pending: Arc::new(PendingWaits::new()),
            handlers: Arc::new(DispatchRegistry::new()),
            ids: MessageIdGenerator::new(),
            reader_exited,
            config,
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Register a handler for unsolicited envelopes of `kind`.
    /// The last registration wins. Handlers run on the reader task and
    /// must not block; hand real work to `tokio::spawn`.
    pub fn register<F>(&self, kind: EnvelopeKind, handler: F)
    where
        F: Fn(Envelope) + Send + Sync + 'static,
    {
        self.handlers.register(kind, handler);
    }

    pub fn unregister(&self, kind: EnvelopeKind) -> bool {
        self.handlers.unregister(kind)
    }

    /// Number of callers currently blocked in `send_and_wait`.
    pub fn pending_waits(&self) -> usize {
        self.pending.len()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Spawn the reader task. No-op when already running.
    ///
    /// Fails with [`BusError::StreamLost`] if a previous reader died to a
    /// transport fault; the stream cannot be read past that point.
    pub async fn start(&self) -> BusResult<()> {
        let mut state = self.state.lock().await;
        let reader = match std::mem::replace(
            &mut *state,
            ReaderState::Stopped { reader: None },
        ) {
            ReaderState::Running { shutdown, handle } => {
                if !handle.is_finished() {
                    *state = ReaderState::Running { shutdown, handle };
                    return Ok(());
                }
                // The loop already exited on its own (EOF or fault).
                handle.await.ok().flatten()
            }
            ReaderState::Stopped { reader } => reader,
        };
        let reader = reader.ok_or(BusError::StreamLost)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.reader_exited.send_replace(false);
        let handle = tokio::spawn(reader_loop(
            reader,
            shutdown_rx,
            self.pending.clone(),
            self.handlers.clone(),
            self.reader_exited.clone(),
            self.config.clone(),
        ));
        *state = ReaderState::Running {
            shutdown: shutdown_tx,
            handle,
        };
        debug!("bus started");
        Ok(())
    }

    /// Signal the reader loop, join it, and cancel every in-flight
    /// waiter. No-op when already stopped.
    pub async fn stop(&self) -> BusResult<()> {
        let mut state = self.state.lock().await;
        let (shutdown, handle) = match std::mem::replace(
            &mut *state,
            ReaderState::Stopped { reader: None },
        ) {
            ReaderState::Running { shutdown, handle } => (shutdown, handle),
            stopped => {
                *state = stopped;
                return Ok(());
            }
        };
        let _ = shutdown.send(true);
        let reader = handle.await.ok().flatten();
        self.pending.cancel_all();
        *state = ReaderState::Stopped { reader };
        debug!("bus stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        match &*self.state.lock().await {
            ReaderState::Running { handle, .. } => !handle.is_finished(),
            ReaderState::Stopped { .. } => false,
        }
    }

    /// Resolves when the reader task has exited, whether by `stop`, end
    /// of stream, or a transport fault. The helper's main loop parks
    /// here until the host closes the pipe.
    pub async fn closed(&self) {
        let mut exited = self.reader_exited.subscribe();
        while !*exited.borrow_and_update() {
            if exited.changed().await.is_err() {
                return;
            }
        }
    }

    /// Fire-and-forget send. Assigns a correlation id if the envelope
    /// carries the unassigned sentinel, writes the frame, and returns
    /// the id actually sent. No reply is expected or tracked.
    pub async fn send(&self, mut envelope: Envelope) -> BusResult<u64> {
        if envelope.id == UNASSIGNED_ID {
            envelope.id = self.ids.next();
        }
        self.write(&envelope).await?;
        trace!(id = envelope.id, kind = %envelope.kind(), "sent");
        Ok(envelope.id)
    }

    /// Send and block the calling task until the correlated reply
    /// arrives or `timeout` elapses.
    ///
    /// `Ok(None)` covers both outcomes the caller cannot act on: no
    /// reply in time, and cancellation by `stop`. An `Err` is reserved
    /// for misuse (a second waiter on the same id) and write failures.
    pub async fn send_and_wait(
        &self,
        mut envelope: Envelope,
        timeout: Duration,
    ) -> BusResult<Option<Envelope>> {
        if envelope.id == UNASSIGNED_ID {
            envelope.id = self.ids.next();
        }
        let id = envelope.id;

        let (sender, receiver) = oneshot::channel();
        self.pending.insert(id, sender)?;
        if let Err(e) = self.write(&envelope).await {
            self.pending.abandon(id);
            return Err(e.into());
        }

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(reply)) => Ok(Some(reply)),
            // Sender dropped: the bus was stopped while we waited.
            Ok(Err(_)) => Ok(None),
            Err(_) => {
                self.pending.abandon(id);
                trace!(id, "send_and_wait timed out");
                Ok(None)
            }
        }
    }

    /// [`send_and_wait`](Self::send_and_wait), with the reply checked
    /// against an expected variant. A reply of any other variant is
    /// treated exactly like no answer at all.
    pub async fn send_and_expect(
        &self,
        envelope: Envelope,
        expected: EnvelopeKind,
        timeout: Duration,
    ) -> BusResult<Option<Envelope>> {
        let reply = self.send_and_wait(envelope, timeout).await?;
        Ok(reply.filter(|r| {
            if r.kind() == expected {
                true
            } else {
                debug!(got = %r.kind(), want = %expected, "reply variant mismatch treated as no result");
                false
            }
        }))
    }

    async fn write(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        transport::write_frame(&mut *writer, envelope, self.config.max_frame_len).await
    }
}

/// The single reader of the stream. Returns the frame decoder, partial
/// state and all, when asked to shut down cooperatively; returns `None`
/// when the stream itself died.
///
/// `FrameReader::read_frame` is cancel-safe, so the select may drop it
/// mid-frame without losing stream position.
async fn reader_loop<R>(
    mut reader: FrameReader<R>,
    mut shutdown: watch::Receiver<bool>,
    pending: Arc<PendingWaits>,
    handlers: Arc<DispatchRegistry>,
    exited: watch::Sender<bool>,
    config: BusConfig,
) -> Option<FrameReader<R>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => None,
            frame = reader.read_frame(config.max_frame_len) => Some(frame),
        };
        match frame {
            None => {
                debug!("reader loop shutting down");
                exited.send_replace(true);
                return Some(reader);
            }
            Some(Ok(envelope)) => deliver(&pending, &handlers, &config, envelope),
            Some(Err(TransportError::Closed)) => {
                debug!("peer closed the stream, reader exiting");
                exited.send_replace(true);
                return None;
            }
            Some(Err(e)) => {
                warn!(error = %e, "transport fault, reader exiting");
                exited.send_replace(true);
                return None;
            }
        }
    }
}

fn deliver(
    pending: &PendingWaits,
    handlers: &DispatchRegistry,
    config: &BusConfig,
    envelope: Envelope,
) {
    let id = envelope.id;
    let kind = envelope.kind();
    let Some(unclaimed) = pending.complete(envelope) else {
        trace!(id, "reply delivered to waiter");
        return;
    };
    if handlers.dispatch(unclaimed) {
        trace!(id, %kind, "dispatched to handler");
    } else if config.log_unrouted {
        debug!(id, %kind, "dropping unrouted envelope");
    } else {
        trace!(id, %kind, "dropping unrouted envelope");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Payload;
    use tokio::io::{duplex, split, DuplexStream, ReadHalf, WriteHalf};

    type TestBus = MessageBus<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    fn bus_pair() -> (TestBus, TestBus) {
        let (left, right) = duplex(16 * 1024);
        let (lr, lw) = split(left);
        let (rr, rw) = split(right);
        (
            MessageBus::new(lr, lw, BusConfig::default()),
            MessageBus::new(rr, rw, BusConfig::default()),
        )
    }

    #[tokio::test]
    async fn test_send_assigns_an_id() {
        let (host, helper) = bus_pair();
        helper.start().await.unwrap();

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        helper.register(EnvelopeKind::Ping, move |envelope| {
            sink.lock().unwrap().push(envelope.id);
        });

        let id = host.send(Envelope::new(Payload::Ping)).await.unwrap();
        assert_ne!(id, UNASSIGNED_ID);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.lock().unwrap().as_slice(), &[id]);
    }

    #[tokio::test]
    async fn test_start_twice_is_a_noop() {
        let (host, _helper) = bus_pair();
        host.start().await.unwrap();
        host.start().await.unwrap();
        assert!(host.is_running().await);
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_a_noop() {
        let (host, _helper) = bus_pair();
        host.stop().await.unwrap();
        assert!(!host.is_running().await);
        // And the parked reader is still usable afterwards.
        host.start().await.unwrap();
        assert!(host.is_running().await);
    }

    #[tokio::test]
    async fn test_preassigned_duplicate_id_is_rejected() {
        let (host, _helper) = bus_pair();
        host.start().await.unwrap();

        let first = Envelope {
            id: 42,
            payload: Payload::Ping,
        };
        let second = first.clone();

        let host = Arc::new(host);
        let waiting = {
            let host = host.clone();
            tokio::spawn(async move { host.send_and_wait(first, Duration::from_millis(300)).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        let result = host.send_and_wait(second, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(BusError::DuplicatePending(42))));

        assert!(waiting.await.unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fault_then_start_reports_stream_lost() {
        let (host, helper) = bus_pair();
        host.start().await.unwrap();

        // A frame the decoder cannot accept: zero-length payload.
        {
            let mut writer = helper.writer.lock().await;
            use tokio::io::AsyncWriteExt;
            writer.write_all(&[0u8]).await.unwrap();
            writer.flush().await.unwrap();
        }
        host.closed().await;
        host.stop().await.unwrap();
        assert!(matches!(host.start().await, Err(BusError::StreamLost)));
    }
}
