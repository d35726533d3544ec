// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Network publication: the Conductor/Sender-side state for one
//! `(sessionId, streamId, channel)` triple - a raw log buffer, the send
//! endpoint it shares with every other publication on that channel, the
//! flow-control strategy tracking receiver feedback, and the retransmit
//! handler servicing NAKs against it.
//!
//! Flow control gets one indirection (`Box<dyn FlowControlStrategy>`) at
//! creation time, chosen from the channel's unicast/multicast-ness; the
//! retransmit delay generator is instead a closed enum ([`AnyDelayGenerator`])
//! since both variants are cheap `Copy` values with no reason to box.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::channel::SendChannelEndpoint;
use crate::flowcontrol::FlowControlStrategy;
use crate::logbuffer::LogBuffer;
use crate::retransmit::{AnyDelayGenerator, RetransmitHandler};

/// Whether a publisher has been heard from by at least one receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No SM has been seen yet; SETUP is resent periodically.
    Pending,
    /// At least one SM has been observed.
    Connected,
}

pub struct NetworkPublication {
    pub session_id: i32,
    pub stream_id: i32,
    pub initial_term_id: i32,
    pub mtu: u32,
    pub log: LogBuffer,
    pub endpoint: Arc<SendChannelEndpoint>,
    pub flow_control: Box<dyn FlowControlStrategy>,
    pub retransmit: RetransmitHandler<AnyDelayGenerator>,
    pub sender_position: AtomicI64,
    pub last_activity: parking_lot::Mutex<Instant>,
    pub last_setup_sent: parking_lot::Mutex<Option<Instant>>,
    pub connection_state: parking_lot::Mutex<ConnectionState>,
    pub closed: AtomicBool,
    /// `(term_offset, since)` while the sender has observed reserved-but-
    /// uncommitted bytes ahead of `sender_position` without making
    /// progress; cleared as soon as progress resumes. Drives the
    /// `PUBLICATION_UNBLOCK_TIMEOUT` recovery in the Sender.
    pub stalled_at: parking_lot::Mutex<Option<(i32, Instant)>>,
}

impl NetworkPublication {
    pub fn new(
        session_id: i32,
        stream_id: i32,
        initial_term_id: i32,
        mtu: u32,
        log: LogBuffer,
        endpoint: Arc<SendChannelEndpoint>,
        flow_control: Box<dyn FlowControlStrategy>,
        retransmit: RetransmitHandler<AnyDelayGenerator>,
        now: Instant,
    ) -> Self {
        Self {
            session_id,
            stream_id,
            initial_term_id,
            mtu,
            log,
            endpoint,
            flow_control,
            retransmit,
            sender_position: AtomicI64::new(0),
            last_activity: parking_lot::Mutex::new(now),
            last_setup_sent: parking_lot::Mutex::new(None),
            connection_state: parking_lot::Mutex::new(ConnectionState::Pending),
            closed: AtomicBool::new(false),
            stalled_at: parking_lot::Mutex::new(None),
        }
    }

    #[must_use]
    pub fn sender_position(&self) -> i64 {
        self.sender_position.load(Ordering::Acquire)
    }

    pub fn set_sender_position(&self, position: i64) {
        self.sender_position.store(position, Ordering::Release);
    }

    #[must_use]
    pub fn position_limit(&self) -> i64 {
        self.flow_control.position_limit()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.connection_state.lock() == ConnectionState::Connected
    }

    pub fn mark_connected(&self) {
        *self.connection_state.lock() = ConnectionState::Connected;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn touch(&self, now: Instant) {
        *self.last_activity.lock() = now;
    }

    #[must_use]
    pub fn idle_for(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(*self.last_activity.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::SendChannelEndpoint;
    use crate::flowcontrol::UnicastFlowControl;
    use crate::logbuffer::{create_log, term::PARTITION_COUNT};
    use crate::retransmit::UnicastDelayGenerator;
    use crate::uri::ChannelUri;
    use std::time::Duration;

    fn new_publication() -> NetworkPublication {
        let dir = tempfile::tempdir().unwrap();
        let log = create_log(&dir.path().join("1.logbuffer"), 65_536, 100, 1408).unwrap();
        let uri = ChannelUri::parse("udp://127.0.0.1:41100").unwrap();
        let endpoint = Arc::new(SendChannelEndpoint::new(&uri, &[], None).unwrap());
        NetworkPublication::new(
            7,
            10,
            100,
            1408,
            log,
            endpoint,
            Box::new(UnicastFlowControl::new(0)),
            RetransmitHandler::new(16, AnyDelayGenerator::Unicast(UnicastDelayGenerator::default())),
            Instant::now(),
        )
    }

    #[test]
    fn starts_pending_and_unconnected() {
        let pub_ = new_publication();
        assert!(!pub_.is_connected());
        pub_.mark_connected();
        assert!(pub_.is_connected());
    }

    #[test]
    fn idle_for_reflects_time_since_last_touch() {
        let pub_ = new_publication();
        let now = Instant::now();
        pub_.touch(now);
        assert_eq!(pub_.idle_for(now), Duration::ZERO);
        assert!(pub_.idle_for(now + Duration::from_millis(50)) >= Duration::from_millis(50));
    }

    #[test]
    fn close_is_observable_and_idempotent() {
        let pub_ = new_publication();
        assert!(!pub_.is_closed());
        pub_.close();
        pub_.close();
        assert!(pub_.is_closed());
    }

    #[test]
    fn log_buffer_has_the_expected_partition_layout() {
        let pub_ = new_publication();
        assert_eq!(pub_.log.term_length(), 65_536);
        let _ = PARTITION_COUNT;
    }
}
