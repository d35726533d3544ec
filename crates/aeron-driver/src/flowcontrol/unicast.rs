// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Unicast flow control: a single receiver, so the latest status message
//! always wins outright.

use std::time::Instant;

use super::{sm_position, FlowControlStrategy, StatusMessage};

#[derive(Debug)]
pub struct UnicastFlowControl {
    position_limit: i64,
}

impl UnicastFlowControl {
    #[must_use]
    pub fn new(initial_position_limit: i64) -> Self {
        Self { position_limit: initial_position_limit }
    }
}

impl FlowControlStrategy for UnicastFlowControl {
    fn on_status_message(
        &mut self,
        sm: &StatusMessage,
        initial_term_id: i32,
        term_length: u32,
        _now: Instant,
    ) -> i64 {
        self.position_limit = sm_position(sm, initial_term_id, term_length);
        self.position_limit
    }

    fn on_idle(&mut self, _now: Instant) -> i64 {
        self.position_limit
    }

    fn position_limit(&self) -> i64 {
        self.position_limit
    }
}
