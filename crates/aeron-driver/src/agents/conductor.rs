// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Conductor: the single-threaded orchestrator that owns the CnC rings,
//! validates and actions client commands, allocates log buffers on disk,
//! and creates/destroys the publication and subscription tables the
//! Sender and Receiver actually drive.
//!
//! Everything here is bookkeeping: a publication's log buffer and send
//! endpoint move wholesale to the Sender once created ([`SenderCommand::AddPublication`]);
//! an image moves wholesale to the Receiver ([`ReceiverCommand::AddImage`]).
//! The Conductor keeps only the tables needed to answer clients and to
//! route a later remove request to the right place.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel::{Receiver as ChannelReceiver, Sender as ChannelSender};

use crate::channel::SendChannelEndpoint;
use crate::cnc::{ClientCommand, Cnc, DriverResponse};
use crate::config::Context;
use crate::error::{Error, ErrorCode, Result};
use crate::flowcontrol::{MulticastFlowControl, UnicastFlowControl};
use crate::logbuffer::create_log;
use crate::publication::NetworkPublication;
use crate::retransmit::{AnyDelayGenerator, MulticastDelayGenerator, RetransmitHandler, UnicastDelayGenerator};
use crate::runtime_knobs::RuntimeKnobs;
use crate::slab::{Slab, SlabIndex};
use crate::subscription::Subscription;
use crate::uri::ChannelUri;

use super::commands::{ConductorCommand, ReceiverCommand, SenderCommand, COMMAND_QUEUE_CAPACITY};

/// How long a multicast publication keeps a receiver in its active set
/// without a fresh status message. Independent of `IMAGE_LIVENESS_TIMEOUT`,
/// which governs the receiver's view of a publisher rather than the
/// publisher's view of its receivers.
const MULTICAST_RECEIVER_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Bookkeeping the Conductor keeps for a publication it has handed off to
/// the Sender. The Sender owns the actual [`NetworkPublication`]; this is
/// just enough to answer `REMOVE_PUBLICATION` and to track the client
/// reference count that gates linger/teardown.
struct PublicationEntry {
    channel: String,
    canonical_channel: String,
    session_id: i32,
    stream_id: i32,
    /// Number of live client handles (one per successful `ADD_PUBLICATION`
    /// that has not yet been matched by a `REMOVE_PUBLICATION`). Reaching
    /// zero starts the publication's linger countdown (actually enforced
    /// by the Sender, which owns `last_activity`); the Conductor merely
    /// stops answering lookups for it once its `ClosePublication` callback
    /// arrives.
    client_refs: i64,
    log_path: PathBuf,
}

pub struct Conductor {
    context: Arc<Context>,
    cnc: Cnc,
    sender_tx: ChannelSender<SenderCommand>,
    receiver_tx: ChannelSender<ReceiverCommand>,
    conductor_rx: ChannelReceiver<ConductorCommand>,

    next_registration_id: AtomicI64,
    publications: Slab<PublicationEntry>,
    by_pub_key: HashMap<(String, i32, i32), SlabIndex>,
    subscriptions: Slab<Subscription>,
    by_subscription_registration: HashMap<i64, SlabIndex>,
    /// Count of subscriptions live on a given canonical channel, used only
    /// to decide when the last one departing should ask the Receiver to
    /// drop that channel's endpoint.
    channel_subscription_counts: HashMap<String, usize>,

    last_client_keepalive: HashMap<i64, Instant>,

    runtime_knobs: Arc<RuntimeKnobs>,
}

impl Conductor {
    #[must_use]
    pub fn new(
        context: Arc<Context>,
        cnc: Cnc,
        sender_tx: ChannelSender<SenderCommand>,
        receiver_tx: ChannelSender<ReceiverCommand>,
        conductor_rx: ChannelReceiver<ConductorCommand>,
        runtime_knobs: Arc<RuntimeKnobs>,
    ) -> Self {
        Self {
            context,
            cnc,
            sender_tx,
            receiver_tx,
            conductor_rx,
            next_registration_id: AtomicI64::new(1),
            publications: Slab::new(),
            by_pub_key: HashMap::new(),
            subscriptions: Slab::new(),
            by_subscription_registration: HashMap::new(),
            channel_subscription_counts: HashMap::new(),
            last_client_keepalive: HashMap::new(),
            runtime_knobs,
        }
    }

    /// One iteration: drain the client-facing CnC ring, drain the
    /// cross-agent command queue, then fire due timers. Returns the work
    /// count driving the idle strategy.
    pub fn do_work(&mut self) -> usize {
        let now = Instant::now();
        let mut work = 0;

        work += self.drain_client_commands();
        work += self.drain_conductor_commands(now);
        work += self.check_client_liveness(now);

        self.cnc.heartbeat(now_epoch_millis());
        work
    }

    // ------------------------------------------------------------------
    // Client command ring
    // ------------------------------------------------------------------

    fn drain_client_commands(&mut self) -> usize {
        let ring = self.cnc.to_driver_ring();
        let mut commands = Vec::new();
        ring.drain(|payload| {
            if let Some(cmd) = ClientCommand::decode(payload) {
                commands.push(cmd);
            }
        });

        let mut work = 0;
        for cmd in commands {
            work += 1;
            let response = self.handle_client_command(cmd);
            if let Some(response) = response {
                let _ = self.cnc.to_clients_ring().write(&response.encode());
            }
        }
        work
    }

    fn handle_client_command(&mut self, cmd: ClientCommand) -> Option<DriverResponse> {
        match cmd {
            ClientCommand::AddPublication { correlation_id, session_id, stream_id, channel } => {
                Some(self.on_add_publication(correlation_id, session_id, stream_id, channel))
            }
            ClientCommand::RemovePublication { correlation_id, session_id, stream_id, channel } => {
                Some(self.on_remove_publication(correlation_id, session_id, stream_id, &channel))
            }
            ClientCommand::AddSubscription { correlation_id, stream_id, channel } => {
                Some(self.on_add_subscription(correlation_id, stream_id, channel))
            }
            ClientCommand::RemoveSubscription { correlation_id, registration_id } => {
                Some(self.on_remove_subscription(correlation_id, registration_id))
            }
            ClientCommand::ClientKeepalive { client_id } => {
                self.last_client_keepalive.insert(client_id, Instant::now());
                None
            }
        }
    }

    fn on_add_publication(
        &mut self,
        correlation_id: i64,
        session_id: i32,
        stream_id: i32,
        channel: String,
    ) -> DriverResponse {
        match self.add_publication(session_id, stream_id, &channel) {
            Ok(registration_id) => {
                DriverResponse::OnNewPublication { correlation_id, session_id, stream_id, registration_id }
            }
            Err(err) => error_response(correlation_id, &err),
        }
    }

    /// Allocate a log buffer and hand a fresh [`NetworkPublication`] to the
    /// Sender. `ADD_PUBLICATION` against an existing `(session, stream,
    /// channel)` triple is an error, not idempotent (SPEC_FULL §4.9).
    fn add_publication(&mut self, session_id: i32, stream_id: i32, channel: &str) -> Result<i64> {
        if stream_id == 0 {
            return Err(Error::InvalidChannel("stream-id 0 is reserved".into()));
        }
        let uri = ChannelUri::parse(channel).map_err(|_| Error::InvalidChannel(channel.to_string()))?;
        let canonical = uri.canonical_form();

        let key = (canonical.clone(), session_id, stream_id);
        if self.by_pub_key.contains_key(&key) {
            return Err(Error::PublicationStreamAlreadyExists);
        }

        let initial_term_id = fastrand::i32(..);
        let registration_id = self.next_registration_id.fetch_add(1, Ordering::Relaxed);

        let log_path = self.context.publications_dir().join(format!("{registration_id}.logbuffer"));
        std::fs::create_dir_all(self.context.publications_dir())?;
        let log = create_log(&log_path, self.context.term_length, initial_term_id, self.context.mtu)?;

        let endpoint = Arc::new(
            SendChannelEndpoint::new(&uri, &[], self.context.socket_sndbuf)
                .map_err(|_| Error::Generic(format!("failed to bind send endpoint for {channel}")))?,
        );

        let flow_control: Box<dyn crate::flowcontrol::FlowControlStrategy> = if uri.is_multicast() {
            Box::new(MulticastFlowControl::new(0, MULTICAST_RECEIVER_TIMEOUT))
        } else {
            Box::new(UnicastFlowControl::new(0))
        };
        let delay_generator = if uri.is_multicast() {
            AnyDelayGenerator::Multicast(MulticastDelayGenerator::default())
        } else {
            AnyDelayGenerator::Unicast(UnicastDelayGenerator::default())
        };

        let publication = NetworkPublication::new(
            session_id,
            stream_id,
            initial_term_id,
            self.context.mtu,
            log,
            endpoint,
            flow_control,
            RetransmitHandler::new(crate::config::MAX_RETRANSMITS_PER_PUBLICATION, delay_generator),
            Instant::now(),
        );

        let index = self.publications.insert(PublicationEntry {
            channel: channel.to_string(),
            canonical_channel: canonical,
            session_id,
            stream_id,
            client_refs: 1,
            log_path,
        });
        self.by_pub_key.insert(key, index);

        let _ = self.sender_tx.send(SenderCommand::AddPublication(Box::new(publication)));
        Ok(registration_id)
    }

    /// Removing a publication for a channel the Conductor has never heard
    /// of is `INVALID_CHANNEL`; for a known channel with an unknown
    /// session/stream it is `PUBLICATION_STREAM_UNKNOWN` (SPEC_FULL §4.9 /
    /// §9 picks a direction for the "possibly buggy" open question and
    /// keeps it consistent both ways).
    fn on_remove_publication(
        &mut self,
        correlation_id: i64,
        session_id: i32,
        stream_id: i32,
        channel: &str,
    ) -> DriverResponse {
        match self.remove_publication(session_id, stream_id, channel) {
            Ok(()) => DriverResponse::OperationSuccess { correlation_id },
            Err(err) => error_response(correlation_id, &err),
        }
    }

    fn remove_publication(&mut self, session_id: i32, stream_id: i32, channel: &str) -> Result<()> {
        let Ok(uri) = ChannelUri::parse(channel) else {
            return Err(Error::InvalidChannel(channel.to_string()));
        };
        let canonical = uri.canonical_form();

        let channel_known = self.publications.iter().any(|(_, p)| p.canonical_channel == canonical);
        if !channel_known {
            return Err(Error::InvalidChannel(channel.to_string()));
        }

        let key = (canonical, session_id, stream_id);
        let Some(&index) = self.by_pub_key.get(&key) else {
            return Err(Error::PublicationStreamUnknown);
        };

        let entry = self.publications.get_mut(index).expect("indexed by_pub_key entry must exist");
        entry.client_refs -= 1;
        if entry.client_refs > 0 {
            return Ok(());
        }

        let _ = self.sender_tx.send(SenderCommand::RemovePublication { session_id, stream_id });
        Ok(())
    }

    fn on_add_subscription(&mut self, correlation_id: i64, stream_id: i32, channel: String) -> DriverResponse {
        match self.add_subscription(stream_id, &channel) {
            Ok(_registration_id) => DriverResponse::OperationSuccess { correlation_id },
            Err(err) => error_response(correlation_id, &err),
        }
    }

    fn add_subscription(&mut self, stream_id: i32, channel: &str) -> Result<i64> {
        if stream_id == 0 {
            return Err(Error::InvalidChannel("stream-id 0 is reserved".into()));
        }
        let uri = ChannelUri::parse(channel).map_err(|_| Error::InvalidChannel(channel.to_string()))?;
        let canonical = uri.canonical_form();

        let registration_id = self.next_registration_id.fetch_add(1, Ordering::Relaxed);
        let index = self
            .subscriptions
            .insert(Subscription::new(registration_id, stream_id, channel.to_string()));
        self.by_subscription_registration.insert(registration_id, index);
        *self.channel_subscription_counts.entry(canonical).or_insert(0) += 1;

        let _ = self.receiver_tx.send(ReceiverCommand::AddSubscription {
            registration_id,
            stream_id,
            channel: channel.to_string(),
        });
        Ok(registration_id)
    }

    fn on_remove_subscription(&mut self, correlation_id: i64, registration_id: i64) -> DriverResponse {
        self.remove_subscription(registration_id);
        DriverResponse::OperationSuccess { correlation_id }
    }

    fn remove_subscription(&mut self, registration_id: i64) {
        if let Some(index) = self.by_subscription_registration.remove(&registration_id) {
            if let Some(sub) = self.subscriptions.remove(index) {
                if let Ok(uri) = ChannelUri::parse(&sub.channel) {
                    let canonical = uri.canonical_form();
                    if let Some(count) = self.channel_subscription_counts.get_mut(&canonical) {
                        *count -= 1;
                    }
                }
            }
        }
        let _ = self.receiver_tx.send(ReceiverCommand::RemoveSubscription { registration_id });
    }

    // ------------------------------------------------------------------
    // Conductor command queue (Sender/Receiver -> Conductor)
    // ------------------------------------------------------------------

    fn drain_conductor_commands(&mut self, now: Instant) -> usize {
        let mut work = 0;
        while let Ok(cmd) = self.conductor_rx.try_recv() {
            work += 1;
            match cmd {
                ConductorCommand::CreateImageRequest {
                    session_id,
                    stream_id,
                    channel,
                    initial_term_id,
                    active_term_id,
                    term_offset,
                    term_length,
                    mtu,
                    source,
                } => {
                    self.create_image(
                        session_id,
                        stream_id,
                        &channel,
                        initial_term_id,
                        active_term_id,
                        term_offset,
                        term_length,
                        mtu,
                        source,
                        now,
                    );
                }
                ConductorCommand::CloseImage { session_id, stream_id, channel } => {
                    if self.runtime_knobs.enabled(&channel, log::Level::Debug) {
                        log::debug!(
                            "image (session={session_id}, stream={stream_id}, channel={channel}) went inactive"
                        );
                    }
                }
                ConductorCommand::ClosePublication { session_id, stream_id, channel: _ } => {
                    self.forget_publication(session_id, stream_id);
                }
            }
        }
        work
    }

    /// Allocate a fresh image log buffer and hand the built
    /// [`PublicationImage`](crate::image::PublicationImage) to the
    /// Receiver. `initial_term_offset` seeds the image's rebuild/highest-
    /// received positions from the SETUP frame's advertised position
    /// rather than zero, so a late-joining subscriber does not NAK bytes
    /// the publisher has already moved past.
    #[allow(clippy::too_many_arguments)]
    fn create_image(
        &mut self,
        session_id: i32,
        stream_id: i32,
        channel: &str,
        initial_term_id: i32,
        active_term_id: i32,
        term_offset: i32,
        term_length: i32,
        mtu: i32,
        source: std::net::SocketAddr,
        now: Instant,
    ) {
        let Ok(uri) = ChannelUri::parse(channel) else { return };

        let registration_id = self.next_registration_id.fetch_add(1, Ordering::Relaxed);
        let log_path = self.context.images_dir().join(format!("{registration_id}.logbuffer"));
        let Ok(()) = std::fs::create_dir_all(self.context.images_dir()) else { return };
        let Ok(log) = create_log(&log_path, term_length as u32, initial_term_id, mtu as u32) else {
            if self.runtime_knobs.enabled(channel, log::Level::Warn) {
                log::warn!(
                    "failed to allocate image log for session={session_id} stream={stream_id} channel={channel}"
                );
            }
            return;
        };

        let meta = log.meta();
        meta.set_active_term_id(active_term_id);
        let initial_position = crate::logbuffer::position(initial_term_id, term_length, active_term_id, term_offset);

        let delay_generator = if uri.is_multicast() {
            AnyDelayGenerator::Multicast(MulticastDelayGenerator::default())
        } else {
            AnyDelayGenerator::Unicast(UnicastDelayGenerator::default())
        };

        let image = crate::image::PublicationImage::new(
            session_id,
            stream_id,
            initial_term_id,
            source,
            log,
            delay_generator,
            now,
        );
        image.note_received(initial_position, now);
        image.advance_rebuild_position(initial_position);

        let _ = self.receiver_tx.send(ReceiverCommand::AddImage { channel: channel.to_string(), image: Box::new(image) });
    }

    fn forget_publication(&mut self, session_id: i32, stream_id: i32) {
        let key = self
            .by_pub_key
            .iter()
            .find(|(_, &index)| {
                self.publications
                    .get(index)
                    .is_some_and(|p| p.session_id == session_id && p.stream_id == stream_id)
            })
            .map(|(key, _)| key.clone());

        let Some(key) = key else { return };
        if let Some(index) = self.by_pub_key.remove(&key) {
            if let Some(entry) = self.publications.remove(index) {
                let _ = std::fs::remove_file(&entry.log_path);
            }
        }
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    fn check_client_liveness(&mut self, now: Instant) -> usize {
        let timeout = self.context.client_liveness_timeout;
        let before = self.last_client_keepalive.len();
        self.last_client_keepalive
            .retain(|_, last| now.saturating_duration_since(*last) < timeout);
        before - self.last_client_keepalive.len()
    }
}

fn now_epoch_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn error_response(correlation_id: i64, err: &Error) -> DriverResponse {
    DriverResponse::ErrorResponse { correlation_id, error_code: err.to_error_code(), message: err.to_string() }
}
