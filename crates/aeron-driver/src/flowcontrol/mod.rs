// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Publication-limit flow control: unicast ("last SM wins") and multicast
//! ("min across a live receiver set") strategies behind one small trait.
//!
//! Chosen once at publication creation and held as a concrete value
//! thereafter - the hot path never re-dispatches through a registry.

pub mod multicast;
pub mod unicast;

pub use multicast::MulticastFlowControl;
pub use unicast::UnicastFlowControl;

use std::time::Instant;

/// A status message as seen by flow control, independent of its wire
/// encoding.
#[derive(Debug, Clone, Copy)]
pub struct StatusMessage {
    pub receiver_id: i64,
    pub consumption_term_id: i32,
    pub consumption_term_offset: i32,
    pub receiver_window: i32,
}

/// Governs how far a publication is allowed to advance, in absolute stream
/// position terms, based on receiver feedback.
pub trait FlowControlStrategy: Send {
    /// Update state in response to a status message, returning the new
    /// publication limit (absolute position relative to `initial_term_id`,
    /// the same basis [`crate::logbuffer::position`] uses for the sender
    /// position it is compared against).
    fn on_status_message(
        &mut self,
        sm: &StatusMessage,
        initial_term_id: i32,
        term_length: u32,
        now: Instant,
    ) -> i64;

    /// Called on every Sender tick regardless of whether an SM arrived, so a
    /// multicast strategy can drop receivers that have gone quiet.
    fn on_idle(&mut self, now: Instant) -> i64;

    /// The current publication limit without performing any update.
    fn position_limit(&self) -> i64;
}

/// An SM reports `consumption_term_id` as the *absolute* term id (the
/// Receiver echoes the SETUP/active term id it was handed, which the
/// Conductor stamped with a random `initial_term_id` per publication - see
/// `agents/conductor.rs`'s `fastrand::i32(..)`). `crate::logbuffer::position`
/// is the only valid way to turn that into a position, since every sender
/// position it gets compared against is computed the same way.
fn sm_position(sm: &StatusMessage, initial_term_id: i32, term_length: u32) -> i64 {
    crate::logbuffer::position(
        initial_term_id,
        term_length as i32,
        sm.consumption_term_id,
        sm.consumption_term_offset,
    ) + sm.receiver_window as i64
}
