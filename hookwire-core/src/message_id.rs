//! Correlation identifier generation.
//!
//! Ids are 64-bit values packed as
//! `(elapsed_ms & 41 bits) << 23 | (process_part & 10 bits) << 13 | (sequence & 13 bits)`.
//! The sequence counter is ever-increasing and never reset, so two ids
//! from one generator can only repeat if a draw from one pass over the
//! 13-bit field lands in the same millisecond bucket as the matching
//! draw of the previous pass. The generator holds the first draw of each
//! pass until the clock has moved past the previous pass's last draw,
//! which closes that window. Uniqueness is only
//! required within the lifetime of the communicating pair of processes,
//! not across machines.

use std::sync::Mutex;
use std::time::Instant;

use crate::envelope::UNASSIGNED_ID;

const TIME_MASK: u64 = (1 << 41) - 1;
const PROCESS_MASK: u64 = (1 << 10) - 1;
const SEQUENCE_MASK: u64 = (1 << 13) - 1;

const TIME_SHIFT: u32 = 23;
const PROCESS_SHIFT: u32 = 13;

#[derive(Debug)]
struct GeneratorState {
    sequence: u64,
    last_draw_ms: u64,
}

/// Produces correlation ids unique within one process instance.
#[derive(Debug)]
pub struct MessageIdGenerator {
    epoch: Instant,
    process_part: u64,
    state: Mutex<GeneratorState>,
}

impl MessageIdGenerator {
    pub fn new() -> Self {
        Self::with_process_part(u64::from(std::process::id()))
    }

    pub(crate) fn with_process_part(process_part: u64) -> Self {
        Self {
            epoch: Instant::now(),
            process_part: process_part & PROCESS_MASK,
            state: Mutex::new(GeneratorState {
                sequence: 0,
                last_draw_ms: 0,
            }),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Draw the next id. Never returns [`UNASSIGNED_ID`].
    pub fn next(&self) -> u64 {
        let mut state = self.state.lock().expect("id generator lock poisoned");
        let sequence = state.sequence;
        state.sequence = state.sequence.wrapping_add(1);

        let mut elapsed_ms = self.elapsed_ms();
        if sequence != 0 && sequence & SEQUENCE_MASK == 0 {
            // First draw of a new pass over the 13-bit field. Ids repeat
            // only if this pass reuses a millisecond bucket the previous
            // pass touched, so wait out its last one.
            while elapsed_ms <= state.last_draw_ms {
                std::thread::yield_now();
                elapsed_ms = self.elapsed_ms();
            }
        }
        state.last_draw_ms = elapsed_ms;

        let id = ((elapsed_ms & TIME_MASK) << TIME_SHIFT)
            | (self.process_part << PROCESS_SHIFT)
            | (sequence & SEQUENCE_MASK);
        // id == 0 only in the first millisecond of a process whose pid
        // masks to zero; remap so the sentinel is never drawn.
        if id == UNASSIGNED_ID {
            1
        } else {
            id
        }
    }
}

impl Default for MessageIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
