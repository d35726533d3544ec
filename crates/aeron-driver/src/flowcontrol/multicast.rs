// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Multicast flow control: the publication limit is the minimum window
//! reported across a live set of receivers. A receiver not heard from
//! within `receiver_timeout` is dropped, at which point the minimum is
//! recomputed over whoever remains.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::{sm_position, FlowControlStrategy, StatusMessage};

struct Receiver {
    position: i64,
    last_seen: Instant,
}

pub struct MulticastFlowControl {
    receivers: HashMap<i64, Receiver>,
    receiver_timeout: Duration,
    position_limit: i64,
}

impl MulticastFlowControl {
    #[must_use]
    pub fn new(initial_position_limit: i64, receiver_timeout: Duration) -> Self {
        Self {
            receivers: HashMap::new(),
            receiver_timeout,
            position_limit: initial_position_limit,
        }
    }

    fn recompute(&mut self) {
        self.position_limit = self
            .receivers
            .values()
            .map(|r| r.position)
            .min()
            .unwrap_or(self.position_limit);
    }
}

impl FlowControlStrategy for MulticastFlowControl {
    fn on_status_message(
        &mut self,
        sm: &StatusMessage,
        initial_term_id: i32,
        term_length: u32,
        now: Instant,
    ) -> i64 {
        let position = sm_position(sm, initial_term_id, term_length);
        self.receivers.insert(
            sm.receiver_id,
            Receiver { position, last_seen: now },
        );
        self.recompute();
        self.position_limit
    }

    fn on_idle(&mut self, now: Instant) -> i64 {
        let timeout = self.receiver_timeout;
        let before = self.receivers.len();
        self.receivers.retain(|_, r| now.duration_since(r.last_seen) < timeout);
        if self.receivers.len() != before {
            self.recompute();
        }
        self.position_limit
    }

    fn position_limit(&self) -> i64 {
        self.position_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sm(id: i64, term_id: i32, offset: i32, window: i32) -> StatusMessage {
        StatusMessage {
            receiver_id: id,
            consumption_term_id: term_id,
            consumption_term_offset: offset,
            receiver_window: window,
        }
    }

    #[test]
    fn limit_tracks_the_slowest_receiver() {
        let mut fc = MulticastFlowControl::new(0, Duration::from_secs(5));
        let now = Instant::now();
        fc.on_status_message(&sm(1, 0, 0, 4096), 0, 65_536, now);
        let limit = fc.on_status_message(&sm(2, 0, 0, 1024), 0, 65_536, now);
        assert_eq!(limit, 1024);

        // Receiver 1 catching up further does not raise the limit while
        // receiver 2 is still behind.
        let limit = fc.on_status_message(&sm(1, 0, 0, 8192), 0, 65_536, now);
        assert_eq!(limit, 1024);
    }

    #[test]
    fn a_dropped_receiver_stops_constraining_the_limit() {
        let mut fc = MulticastFlowControl::new(0, Duration::from_millis(10));
        let now = Instant::now();
        fc.on_status_message(&sm(1, 0, 0, 4096), 0, 65_536, now);
        fc.on_status_message(&sm(2, 0, 0, 1024), 0, 65_536, now);
        assert_eq!(fc.position_limit(), 1024);

        let later = now + Duration::from_millis(20);
        let limit = fc.on_idle(later);
        assert_eq!(limit, 4096);
    }

    #[test]
    fn new_receiver_widens_the_group_until_it_reports_in() {
        let mut fc = MulticastFlowControl::new(500, Duration::from_secs(5));
        let now = Instant::now();
        let limit = fc.on_status_message(&sm(1, 0, 0, 2048), 0, 65_536, now);
        assert_eq!(limit, 2048);
    }

    #[test]
    fn limit_is_relative_to_a_non_zero_initial_term_id() {
        let mut fc = MulticastFlowControl::new(0, Duration::from_secs(5));
        let now = Instant::now();
        let limit = fc.on_status_message(&sm(1, 1_000_000, 0, 2048), 1_000_000, 65_536, now);
        assert_eq!(limit, 2048);
    }
}
