// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Cross-agent command messages. Modelled as explicit SPSC queues
//! (`crossbeam::channel::bounded`, constructed once per ordered pair of
//! agents) rather than shared mutable state - per SPEC_FULL §9 "Coroutine-
//! style cross-agent coordination". A `NetworkPublication`/`PublicationImage`
//! is created once by the Conductor and its ownership then moves wholesale
//! to the Sender or Receiver that actually drives it; the Conductor keeps
//! only the bookkeeping (ids, registration table) needed to answer clients
//! and to route a later remove request to the right agent.

use std::net::SocketAddr;

use crate::image::PublicationImage;
use crate::publication::NetworkPublication;
use crate::retransmit::AnyDelayGenerator;

/// Conductor -> Sender.
pub enum SenderCommand {
    AddPublication(Box<NetworkPublication>),
    RemovePublication { session_id: i32, stream_id: i32 },
}

/// Conductor -> Receiver.
pub enum ReceiverCommand {
    AddSubscription { registration_id: i64, stream_id: i32, channel: String },
    RemoveSubscription { registration_id: i64 },
    /// A log buffer has been allocated for a new image; start rebuilding.
    /// `channel` identifies which receive endpoint the image's NAKs and SMs
    /// travel over.
    AddImage { channel: String, image: Box<PublicationImage<AnyDelayGenerator>> },
    RemoveImage { session_id: i32, stream_id: i32 },
}

/// Sender/Receiver -> Conductor.
pub enum ConductorCommand {
    /// A SETUP frame arrived for a stream with no existing image; ask the
    /// Conductor to allocate a log and create one.
    CreateImageRequest {
        session_id: i32,
        stream_id: i32,
        channel: String,
        initial_term_id: i32,
        active_term_id: i32,
        term_offset: i32,
        term_length: i32,
        mtu: i32,
        source: SocketAddr,
    },
    /// An image's liveness timed out; ask the Conductor to tear it down.
    CloseImage { session_id: i32, stream_id: i32, channel: String },
    /// A publication's reference count has lingered out after reaching
    /// zero; ask the Conductor to forget it.
    ClosePublication { session_id: i32, stream_id: i32, channel: String },
}

/// Bounded capacity used for every inter-agent command queue. Generous
/// enough that a burst of client activity never blocks the hot path; a
/// full queue would indicate the receiving agent has stalled, which is a
/// fault condition handled by liveness timeouts elsewhere, not by this
/// queue's depth.
pub const COMMAND_QUEUE_CAPACITY: usize = 1024;

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::bounded;

    #[test]
    fn conductor_command_travels_the_channel() {
        let (tx, rx) = bounded(COMMAND_QUEUE_CAPACITY);
        tx.send(ConductorCommand::CloseImage {
            session_id: 1,
            stream_id: 2,
            channel: "udp://localhost:4000".into(),
        })
        .unwrap();

        match rx.recv().unwrap() {
            ConductorCommand::CloseImage { session_id, stream_id, .. } => {
                assert_eq!(session_id, 1);
                assert_eq!(stream_id, 2);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn sender_and_receiver_commands_construct() {
        let _ = std::mem::discriminant(&SenderCommand::RemovePublication { session_id: 1, stream_id: 2 });
        let _ = std::mem::discriminant(&ReceiverCommand::RemoveSubscription { registration_id: 1 });
    }
}
