// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-publication retransmit handler: one IDLE/DELAYED/LINGER state
//! machine per outstanding NAK, keyed on `(termId, termOffset)`.
//!
//! ```text
//!  IDLE --NAK arrives--> DELAYED --delay expires--> LINGER --linger expires--> IDLE
//!                           ^                           |
//!                           '-- further NAKs suppressed -'
//! ```
//!
//! While an entry is DELAYED or LINGER, further NAKs for the same range are
//! suppressed (RFC 5401 feedback suppression). The ring is bounded; once
//! full, additional distinct ranges are dropped and counted rather than
//! silently lost (SPEC_FULL §4.5, surfacing the open question in §9).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::delay::DelayGenerator;

const LINGER_TIMEOUT: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Key {
    term_id: i32,
    term_offset: i32,
}

#[derive(Debug)]
enum State {
    Delayed { deadline: Instant, length: i32 },
    Linger { deadline: Instant },
}

/// A retransmission due to be sent right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmitAction {
    pub term_id: i32,
    pub term_offset: i32,
    pub length: i32,
}

/// Tracks outstanding NAKs for one publication.
pub struct RetransmitHandler<D> {
    entries: HashMap<Key, State>,
    capacity: usize,
    delay_generator: D,
    retransmits_dropped: u64,
}

impl<D: DelayGenerator> RetransmitHandler<D> {
    #[must_use]
    pub fn new(capacity: usize, delay_generator: D) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            delay_generator,
            retransmits_dropped: 0,
        }
    }

    /// Counter for NAKs dropped because the handler was at capacity.
    #[must_use]
    pub fn retransmits_dropped(&self) -> u64 {
        self.retransmits_dropped
    }

    /// A NAK arrived for `(term_id, term_offset, length)`. If there is no
    /// live entry for this key, schedules a new one; if one is already
    /// DELAYED or LINGER, the NAK is suppressed.
    pub fn on_nak(&mut self, term_id: i32, term_offset: i32, length: i32, now: Instant) {
        let key = Key { term_id, term_offset };
        if self.entries.contains_key(&key) {
            return; // suppressed: already in flight
        }
        if self.entries.len() >= self.capacity {
            self.retransmits_dropped += 1;
            return;
        }

        let delay = self.delay_generator.next_delay();
        if delay.is_zero() {
            // Immediate resend: the caller is expected to act on the
            // returned action from on_tick on its very next call, so we
            // schedule it with a deadline of `now` rather than resending
            // inline here (keeps this method infallible and side-effect
            // free beyond bookkeeping).
            self.entries.insert(key, State::Delayed { deadline: now, length });
        } else {
            self.entries
                .insert(key, State::Delayed { deadline: now + delay, length });
        }
    }

    /// Cancel an entry because a retransmission for this range was
    /// observed on the wire from another source (multicast cross-talk).
    pub fn on_retransmit_received(&mut self, term_id: i32, term_offset: i32) {
        self.entries.remove(&Key { term_id, term_offset });
    }

    /// Advance every entry's state machine against `now`, returning the set
    /// of ranges due for retransmission right now (DELAYED -> LINGER
    /// transitions). Expired LINGER entries are dropped back to nothing
    /// (implicit IDLE).
    pub fn poll(&mut self, now: Instant) -> Vec<RetransmitAction> {
        let mut due = Vec::new();
        self.entries.retain(|key, state| match state {
            State::Delayed { deadline, length } => {
                if now >= *deadline {
                    due.push(RetransmitAction {
                        term_id: key.term_id,
                        term_offset: key.term_offset,
                        length: *length,
                    });
                    *state = State::Linger {
                        deadline: now + LINGER_TIMEOUT,
                    };
                    true
                } else {
                    true
                }
            }
            State::Linger { deadline } => now < *deadline,
        });
        due
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retransmit::delay::UnicastDelayGenerator;

    fn handler(delay_ms: u64) -> RetransmitHandler<UnicastDelayGenerator> {
        RetransmitHandler::new(
            16,
            UnicastDelayGenerator {
                delay: Duration::from_millis(delay_ms),
            },
        )
    }

    #[test]
    fn nak_schedules_a_delayed_retransmit() {
        let mut h = handler(5);
        let start = Instant::now();
        h.on_nak(3, 64, 48, start);

        assert!(h.poll(start).is_empty());
        let due = h.poll(start + Duration::from_millis(10));
        assert_eq!(due, vec![RetransmitAction { term_id: 3, term_offset: 64, length: 48 }]);
    }

    #[test]
    fn second_nak_during_delay_or_linger_is_suppressed() {
        let mut h = handler(5);
        let start = Instant::now();
        h.on_nak(3, 64, 48, start);
        h.on_nak(3, 64, 48, start + Duration::from_millis(1));

        let due = h.poll(start + Duration::from_millis(10));
        assert_eq!(due.len(), 1);

        // Still suppressed while lingering.
        h.on_nak(3, 64, 48, start + Duration::from_millis(12));
        let due = h.poll(start + Duration::from_millis(15));
        assert!(due.is_empty());
    }

    #[test]
    fn nak_after_linger_expires_triggers_a_second_retransmit() {
        let mut h = handler(5);
        let start = Instant::now();
        h.on_nak(3, 64, 48, start);
        assert_eq!(h.poll(start + Duration::from_millis(10)).len(), 1);

        // Linger (10ms) has expired by t=100ms; a fresh NAK schedules again.
        h.on_nak(3, 64, 48, start + Duration::from_millis(100));
        let due = h.poll(start + Duration::from_millis(106));
        assert_eq!(due.len(), 1);
    }

    #[test]
    fn capacity_is_enforced_and_drops_are_counted() {
        let mut h = RetransmitHandler::new(1, UnicastDelayGenerator::default());
        let start = Instant::now();
        h.on_nak(1, 0, 32, start);
        h.on_nak(2, 0, 32, start);
        assert_eq!(h.retransmits_dropped(), 1);
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn observed_retransmit_cancels_the_entry() {
        let mut h = handler(5);
        let start = Instant::now();
        h.on_nak(3, 64, 48, start);
        h.on_retransmit_received(3, 64);
        assert!(h.poll(start + Duration::from_millis(10)).is_empty());
        assert!(h.is_empty());
    }
}
