// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Publication image: the Receiver/Conductor-side state of one inbound
//! stream from a single publisher, created on first SETUP and driven
//! through INIT -> ACTIVE -> INACTIVE -> LINGER -> removal.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use crate::logbuffer::LogBuffer;
use crate::retransmit::delay::DelayGenerator;

/// An image's lifecycle state (SPEC_FULL §4: "Publication image").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageState {
    /// Created from SETUP; no data has advanced the rebuild position yet.
    Init,
    /// At least one SM-worthy chunk of data has been rebuilt.
    Active,
    /// Liveness timeout elapsed, or an explicit GOINACTIVE was observed.
    Inactive,
    /// Draining subscriber references before removal from the dispatcher.
    Linger,
}

pub struct PublicationImage<D> {
    pub session_id: i32,
    pub stream_id: i32,
    pub initial_term_id: i32,
    pub source: SocketAddr,
    pub log: LogBuffer,
    pub delay_generator: D,

    highest_received_position: AtomicI64,
    rebuild_position: AtomicI64,
    state: parking_lot::Mutex<ImageState>,
    last_activity: parking_lot::Mutex<Instant>,
    last_sm_sent: parking_lot::Mutex<Option<Instant>>,
}

impl<D: DelayGenerator> PublicationImage<D> {
    pub fn new(
        session_id: i32,
        stream_id: i32,
        initial_term_id: i32,
        source: SocketAddr,
        log: LogBuffer,
        delay_generator: D,
        now: Instant,
    ) -> Self {
        Self {
            session_id,
            stream_id,
            initial_term_id,
            source,
            log,
            delay_generator,
            highest_received_position: AtomicI64::new(0),
            rebuild_position: AtomicI64::new(0),
            state: parking_lot::Mutex::new(ImageState::Init),
            last_activity: parking_lot::Mutex::new(now),
            last_sm_sent: parking_lot::Mutex::new(None),
        }
    }

    #[must_use]
    pub fn state(&self) -> ImageState {
        *self.state.lock()
    }

    #[must_use]
    pub fn highest_received_position(&self) -> i64 {
        self.highest_received_position.load(Ordering::Acquire)
    }

    pub fn note_received(&self, position: i64, now: Instant) {
        let mut current = self.highest_received_position.load(Ordering::Acquire);
        while position > current {
            match self.highest_received_position.compare_exchange_weak(
                current,
                position,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
        *self.last_activity.lock() = now;
    }

    #[must_use]
    pub fn rebuild_position(&self) -> i64 {
        self.rebuild_position.load(Ordering::Acquire)
    }

    /// Advance the rebuild position after newly contiguous bytes have been
    /// written by the rebuilder. Transitions INIT -> ACTIVE on the first
    /// advance.
    pub fn advance_rebuild_position(&self, new_position: i64) {
        self.rebuild_position.store(new_position, Ordering::Release);
        let mut state = self.state.lock();
        if *state == ImageState::Init {
            *state = ImageState::Active;
        }
    }

    #[must_use]
    pub fn is_live(&self, now: Instant, liveness_timeout: Duration) -> bool {
        now.saturating_duration_since(*self.last_activity.lock()) < liveness_timeout
    }

    pub fn mark_inactive(&self) {
        let mut state = self.state.lock();
        if *state != ImageState::Linger {
            *state = ImageState::Inactive;
        }
    }

    pub fn mark_lingering(&self) {
        *self.state.lock() = ImageState::Linger;
    }

    /// Whether an SM is due: the rate limit (`STATUS_MESSAGE_TIMEOUT`) has
    /// elapsed since the last one was sent, or none has been sent yet.
    #[must_use]
    pub fn sm_due(&self, now: Instant, sm_timeout: Duration) -> bool {
        match *self.last_sm_sent.lock() {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= sm_timeout,
        }
    }

    pub fn note_sm_sent(&self, now: Instant) {
        *self.last_sm_sent.lock() = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logbuffer::{create_log, term::PARTITION_COUNT};
    use crate::retransmit::UnicastDelayGenerator;

    fn new_image() -> PublicationImage<UnicastDelayGenerator> {
        let dir = tempfile::tempdir().unwrap();
        let log = create_log(&dir.path().join("1.logbuffer"), 65_536, 100, 1408).unwrap();
        PublicationImage::new(
            7,
            10,
            100,
            "127.0.0.1:41200".parse().unwrap(),
            log,
            UnicastDelayGenerator::default(),
            Instant::now(),
        )
    }

    #[test]
    fn starts_in_init_and_becomes_active_on_first_rebuild_advance() {
        let image = new_image();
        assert_eq!(image.state(), ImageState::Init);
        image.advance_rebuild_position(32);
        assert_eq!(image.state(), ImageState::Active);
        assert_eq!(image.rebuild_position(), 32);
    }

    #[test]
    fn highest_received_position_only_moves_forward() {
        let image = new_image();
        let now = Instant::now();
        image.note_received(100, now);
        image.note_received(50, now);
        assert_eq!(image.highest_received_position(), 100);
        image.note_received(200, now);
        assert_eq!(image.highest_received_position(), 200);
    }

    #[test]
    fn liveness_expires_after_the_configured_timeout() {
        let image = new_image();
        let now = Instant::now();
        image.note_received(32, now);
        assert!(image.is_live(now, Duration::from_millis(10)));
        assert!(!image.is_live(now + Duration::from_millis(20), Duration::from_millis(10)));
    }

    #[test]
    fn sm_is_due_until_sent_then_rate_limited() {
        let image = new_image();
        let now = Instant::now();
        assert!(image.sm_due(now, Duration::from_millis(100)));
        image.note_sm_sent(now);
        assert!(!image.sm_due(now + Duration::from_millis(50), Duration::from_millis(100)));
        assert!(image.sm_due(now + Duration::from_millis(150), Duration::from_millis(100)));
        let _ = PARTITION_COUNT;
    }
}
