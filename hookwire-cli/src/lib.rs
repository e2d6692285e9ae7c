//! Helper-process loop and host-side self-test for the hookwire bus.
//!
//! The `helper` role runs in the spawned child and owns what would be
//! the OS input hooks. Hook installation itself is out of scope, so a
//! `Configure` envelope from the host triggers a burst of synthetic
//! events instead; each is forwarded with `send_and_wait` exactly the
//! way a real hook callback would be, and the host's decisions come
//! back over the same correlation machinery.
//!
//! The `selftest` role is the host side: it spawns the helper, answers
//! its forwarded events, and verifies the full round trip over real
//! process stdio.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hookwire_core::{
    stdio_bus, BusConfig, Envelope, EnvelopeKind, Error, HelperProcess, InputDecision, Payload,
    StdioBus,
};
use tracing::{info, warn};

/// Synthetic events forwarded per enabled hook type when `Configure`
/// arrives.
pub const SYNTHETIC_EVENTS_PER_HOOK: u64 = 5;

/// Run the helper side over this process's stdio until the host closes
/// the pipe.
pub async fn run_helper(config: BusConfig) -> Result<(), Error> {
    let bus = Arc::new(stdio_bus(config));

    let replier = Arc::downgrade(&bus);
    bus.register(EnvelopeKind::Ping, move |request| {
        let Some(bus) = replier.upgrade() else { return };
        tokio::spawn(async move {
            let _ = bus
                .send(Envelope::reply_to(&request, Payload::Ping))
                .await;
        });
    });

    let forwarder = Arc::downgrade(&bus);
    bus.register(EnvelopeKind::Configure, move |request| {
        let Payload::Configure {
            mouse_hook,
            keyboard_hook,
            response_timeout_ms,
        } = request.payload
        else {
            return;
        };
        let Some(bus) = forwarder.upgrade() else { return };
        info!(mouse_hook, keyboard_hook, "hook configuration received");
        tokio::spawn(async move {
            forward_synthetic_events(
                bus,
                mouse_hook,
                keyboard_hook,
                Duration::from_millis(response_timeout_ms),
            )
            .await;
        });
    });

    bus.start().await?;
    bus.closed().await;
    info!("host closed the stream, helper exiting");
    Ok(())
}

/// Stands in for the OS hook callbacks: forward a burst of events and
/// act on the host's decisions.
async fn forward_synthetic_events(
    bus: Arc<StdioBus>,
    mouse_hook: bool,
    keyboard_hook: bool,
    timeout: Duration,
) {
    if mouse_hook {
        for i in 0..SYNTHETIC_EVENTS_PER_HOOK {
            let envelope = Envelope::new(Payload::MouseEvent {
                event: 0x0200,
                x: (i as i32) * 17,
                y: (i as i32) * 11,
                wheel: 0,
                flags: 0,
                time: i as u32,
            });
            forward_one(&bus, envelope, EnvelopeKind::MouseResponse, timeout).await;
        }
    }
    if keyboard_hook {
        for i in 0..SYNTHETIC_EVENTS_PER_HOOK {
            // First key is escape; a host policy that swallows it shows
            // up in the decision log.
            let virtual_key = if i == 0 { 0x1B } else { 0x40 + i as u32 };
            let envelope = Envelope::new(Payload::KeyboardEvent {
                event: 0x0100,
                virtual_key,
                scan_code: i as u32,
                flags: 0,
                time: i as u32,
            });
            forward_one(&bus, envelope, EnvelopeKind::KeyboardResponse, timeout).await;
        }
    }
}

async fn forward_one(
    bus: &StdioBus,
    envelope: Envelope,
    expected: EnvelopeKind,
    timeout: Duration,
) {
    let kind = envelope.kind();
    match bus.send_and_expect(envelope, expected, timeout).await {
        Ok(Some(reply)) => {
            let handled = matches!(
                reply.payload,
                Payload::MouseResponse { handled: true }
                    | Payload::KeyboardResponse { handled: true }
            );
            info!(%kind, decision = ?InputDecision::from_handled(handled), "decision received");
        }
        Ok(None) => info!(%kind, "no decision in time, passing through"),
        Err(e) => warn!(%kind, error = %e, "forward failed"),
    }
}

/// Spawn a helper child and round-trip ping plus synthetic input events
/// through it over real process stdio.
pub async fn run_selftest(swallow_keys: Vec<u32>, timeout: Duration) -> Result<(), Error> {
    let exe = std::env::current_exe()
        .map_err(|e| Error::internal(format!("cannot locate own binary: {e}")))?;
    let (mut process, bus) = HelperProcess::spawn(&exe, ["helper"], BusConfig::default())?;
    let bus = Arc::new(bus);

    let answered = Arc::new(AtomicU64::new(0));

    // Mouse policy: never swallow.
    let counter = answered.clone();
    let replier = Arc::downgrade(&bus);
    bus.register(EnvelopeKind::MouseEvent, move |request| {
        let Some(bus) = replier.upgrade() else { return };
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let reply = Envelope::reply_to(&request, Payload::MouseResponse { handled: false });
            let _ = bus.send(reply).await;
        });
    });

    // Keyboard policy: swallow the configured virtual keys.
    let counter = answered.clone();
    let replier = Arc::downgrade(&bus);
    bus.register(EnvelopeKind::KeyboardEvent, move |request| {
        let Some(bus) = replier.upgrade() else { return };
        counter.fetch_add(1, Ordering::SeqCst);
        let handled = matches!(
            request.payload,
            Payload::KeyboardEvent { virtual_key, .. } if swallow_keys.contains(&virtual_key)
        );
        tokio::spawn(async move {
            let reply = Envelope::reply_to(&request, Payload::KeyboardResponse { handled });
            let _ = bus.send(reply).await;
        });
    });

    bus.start().await?;

    let started = Instant::now();
    let pong = bus
        .send_and_expect(Envelope::new(Payload::Ping), EnvelopeKind::Ping, timeout)
        .await?;
    if pong.is_none() {
        return Err(Error::internal("helper did not answer ping"));
    }
    println!("ping round trip: {:?}", started.elapsed());

    bus.send(Envelope::new(Payload::Configure {
        mouse_hook: true,
        keyboard_hook: true,
        response_timeout_ms: timeout.as_millis() as u64,
    }))
    .await?;

    let expected = 2 * SYNTHETIC_EVENTS_PER_HOOK;
    let deadline = Instant::now() + Duration::from_secs(10);
    while answered.load(Ordering::SeqCst) < expected && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let seen = answered.load(Ordering::SeqCst);
    println!("events answered: {seen}/{expected}");
    if seen < expected {
        return Err(Error::internal("helper burst did not complete"));
    }

    bus.stop().await?;
    // Dropping the bus closes the helper's stdin; that is its shutdown
    // signal.
    drop(bus);
    match tokio::time::timeout(Duration::from_secs(5), process.wait()).await {
        Ok(status) => {
            println!("helper exited: {}", status?);
        }
        Err(_) => {
            warn!("helper did not exit after stream close, killing it");
            process.kill().await?;
        }
    }
    Ok(())
}
