// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Receiver agent: owns every receive-side socket and every live
//! [`PublicationImage`], rebuilds inbound DATA/PAD frames into the matching
//! image's log buffer, detects gaps and issues NAKs, sends rate-limited SMs,
//! and asks the Conductor to create an image when a SETUP names a stream
//! with no image yet.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel::{Receiver as ChannelReceiver, Sender as ChannelSender};

use crate::channel::ReceiveChannelEndpoint;
use crate::config::Context;
use crate::image::PublicationImage;
use crate::logbuffer::scan::scan_for_gap;
use crate::logbuffer::term::{term_id_and_offset, PARTITION_COUNT};
use crate::logbuffer::{position, rebuild::rebuild, scan_block};
use crate::retransmit::{AnyDelayGenerator, RetransmitHandler};
use crate::slab::{Slab, SlabIndex};
use crate::subscription::Subscription;
use crate::uri::ChannelUri;
use crate::wire::data::DataView;
use crate::wire::header::HeaderView;
use crate::wire::nak;
use crate::wire::setup::SetupView;
use crate::wire::sm;
use crate::wire::FrameType;

use super::commands::{ConductorCommand, ReceiverCommand, COMMAND_QUEUE_CAPACITY};

/// One live image plus the bookkeeping the Receiver alone needs to drive
/// it: which channel its NAKs/SMs travel over, and its own NAK-scheduling
/// state machine (a [`RetransmitHandler`] reused in the opposite role from
/// a publication's - here it schedules *outbound* NAKs against detected
/// gaps rather than servicing inbound ones).
struct ImageEntry {
    channel: String,
    image: PublicationImage<AnyDelayGenerator>,
    nak_scheduler: RetransmitHandler<AnyDelayGenerator>,
}

pub struct Receiver {
    context: Arc<Context>,
    rx: ChannelReceiver<ReceiverCommand>,
    conductor_tx: ChannelSender<ConductorCommand>,
    endpoints: HashMap<String, ReceiveChannelEndpoint>,
    subscriptions: HashMap<i64, Subscription>,
    images: Slab<ImageEntry>,
    by_session_stream: HashMap<(i32, i32), SlabIndex>,
    pending_setup: HashMap<(i32, i32), Instant>,
}

impl Receiver {
    #[must_use]
    pub fn new(
        context: Arc<Context>,
        rx: ChannelReceiver<ReceiverCommand>,
        conductor_tx: ChannelSender<ConductorCommand>,
    ) -> Self {
        Self {
            context,
            rx,
            conductor_tx,
            endpoints: HashMap::new(),
            subscriptions: HashMap::new(),
            images: Slab::new(),
            by_session_stream: HashMap::new(),
            pending_setup: HashMap::new(),
        }
    }

    pub fn do_work(&mut self) -> usize {
        let now = Instant::now();
        let mut work = self.drain_commands();

        let channels: Vec<String> = self.endpoints.keys().cloned().collect();
        for channel in channels {
            work += self.poll_endpoint(&channel, now);
        }

        work += self.send_due_naks(now);
        work += self.send_due_status_messages(now);
        work += self.expire_images(now);
        work
    }

    fn drain_commands(&mut self) -> usize {
        let mut n = 0;
        while let Ok(cmd) = self.rx.try_recv() {
            n += 1;
            match cmd {
                ReceiverCommand::AddSubscription { registration_id, stream_id, channel } => {
                    self.ensure_endpoint(&channel);
                    self.subscriptions
                        .insert(registration_id, Subscription::new(registration_id, stream_id, channel));
                }
                ReceiverCommand::RemoveSubscription { registration_id } => {
                    if let Some(sub) = self.subscriptions.remove(&registration_id) {
                        self.maybe_drop_endpoint(&sub.channel);
                    }
                }
                ReceiverCommand::AddImage { channel, image } => {
                    let key = (image.session_id, image.stream_id);
                    self.pending_setup.remove(&key);
                    let nak_scheduler =
                        RetransmitHandler::new(crate::config::MAX_RETRANSMITS_PER_PUBLICATION, image.delay_generator);
                    let index = self.images.insert(ImageEntry { channel: channel.clone(), image: *image, nak_scheduler });
                    self.by_session_stream.insert(key, index);
                    for sub in self.subscriptions.values_mut() {
                        if sub.channel == channel && sub.stream_id == key.1 {
                            sub.attach_image(index);
                        }
                    }
                }
                ReceiverCommand::RemoveImage { session_id, stream_id } => {
                    if let Some(index) = self.by_session_stream.remove(&(session_id, stream_id)) {
                        self.images.remove(index);
                        for sub in self.subscriptions.values_mut() {
                            sub.detach_image(index);
                        }
                    }
                }
            }
        }
        n
    }

    fn ensure_endpoint(&mut self, channel: &str) {
        if self.endpoints.contains_key(channel) {
            return;
        }
        let Ok(uri) = ChannelUri::parse(channel) else { return };
        if let Ok(endpoint) = ReceiveChannelEndpoint::new(&uri, &[], self.context.socket_rcvbuf) {
            self.endpoints.insert(channel.to_string(), endpoint);
        }
    }

    fn maybe_drop_endpoint(&mut self, channel: &str) {
        let still_referenced = self.subscriptions.values().any(|sub| sub.channel == channel)
            || self.images.iter().any(|(_, entry)| entry.channel == channel);
        if !still_referenced {
            self.endpoints.remove(channel);
        }
    }

    fn poll_endpoint(&mut self, channel: &str, now: Instant) -> usize {
        let mut frames: Vec<(Vec<u8>, SocketAddr)> = Vec::new();
        if let Some(endpoint) = self.endpoints.get_mut(channel) {
            let mut buf = [0u8; 2048];
            let _ = endpoint.poll_recv(&mut buf, |data, addr| frames.push((data.to_vec(), addr)));
        }

        let mut work = 0;
        for (frame, addr) in &frames {
            work += self.handle_frame(channel, frame, *addr, now);
        }
        work
    }

    fn handle_frame(&mut self, channel: &str, frame: &[u8], addr: SocketAddr, now: Instant) -> usize {
        let Ok(header) = HeaderView::new(frame) else { return 0 };
        match header.frame_type() {
            Ok(FrameType::Data | FrameType::Pad) => self.on_data(frame, now),
            Ok(FrameType::Setup) => self.on_setup(channel, frame, addr, now),
            _ => 0,
        }
    }

    fn on_data(&mut self, frame: &[u8], now: Instant) -> usize {
        let Ok(view) = DataView::new(frame) else { return 0 };
        let key = (view.session_id(), view.stream_id());
        let Some(&index) = self.by_session_stream.get(&key) else { return 0 };
        let Some(entry) = self.images.get_mut(index) else { return 0 };

        let term_id = view.term_id();
        let term_length = entry.image.log.term_length() as i32;
        rotate_if_crossed_boundary(&entry.image, term_id);

        let Some(partition_index) = partition_for_term(&entry.image, term_id) else { return 0 };
        let term_offset = view.term_offset() as usize;

        let Ok(wrote) = rebuild(&entry.image.log, partition_index, term_offset, frame) else { return 0 };
        let end_position = position(
            entry.image.initial_term_id,
            term_length,
            term_id,
            view.term_offset() + crate::wire::align(frame.len()) as i32,
        );
        entry.image.note_received(end_position, now);

        if wrote {
            advance_contiguous(&entry.image, partition_index, term_id, term_length);
        }

        if let Some(gap) = scan_for_gap(
            &entry.image.log,
            partition_index,
            term_id,
            term_id_and_offset(entry.image.initial_term_id, term_length, entry.image.rebuild_position()).1,
            term_id_and_offset(entry.image.initial_term_id, term_length, entry.image.highest_received_position()).1,
        ) {
            entry.nak_scheduler.on_nak(gap.term_id, gap.term_offset, gap.length, now);
        }

        1
    }

    fn on_setup(&mut self, channel: &str, frame: &[u8], addr: SocketAddr, now: Instant) -> usize {
        let Ok(view) = SetupView::new(frame) else { return 0 };
        let key = (view.session_id(), view.stream_id());
        if self.by_session_stream.contains_key(&key) {
            return 0;
        }

        let due = match self.pending_setup.get(&key) {
            Some(last) => now.saturating_duration_since(*last) >= self.context.publication_setup_timeout,
            None => true,
        };
        if !due {
            return 0;
        }
        self.pending_setup.insert(key, now);

        let _ = self.conductor_tx.send(ConductorCommand::CreateImageRequest {
            session_id: view.session_id(),
            stream_id: view.stream_id(),
            channel: channel.to_string(),
            initial_term_id: view.initial_term_id(),
            active_term_id: view.active_term_id(),
            term_offset: view.term_offset(),
            term_length: view.term_length(),
            mtu: view.mtu(),
            source: addr,
        });
        1
    }

    fn send_due_naks(&mut self, now: Instant) -> usize {
        let mut work = 0;
        for (_, entry) in self.images.iter_mut() {
            let due = entry.nak_scheduler.poll(now);
            if due.is_empty() {
                continue;
            }
            let Some(endpoint) = self.endpoints.get(&entry.channel) else { continue };
            for action in due {
                let mut buf = [0u8; nak::NAK_FRAME_LENGTH];
                if nak::encode(
                    &mut buf,
                    entry.image.session_id,
                    entry.image.stream_id,
                    action.term_id,
                    action.term_offset,
                    action.length,
                )
                .is_ok()
                {
                    let _ = endpoint.send_to(&buf, entry.image.source);
                    work += 1;
                }
            }
        }
        work
    }

    fn send_due_status_messages(&mut self, now: Instant) -> usize {
        let mut work = 0;
        for (_, entry) in self.images.iter_mut() {
            if !entry.image.sm_due(now, self.context.status_message_timeout) {
                continue;
            }
            let Some(endpoint) = self.endpoints.get(&entry.channel) else { continue };

            let term_length = entry.image.log.term_length() as i32;
            let (term_id, term_offset) =
                term_id_and_offset(entry.image.initial_term_id, term_length, entry.image.rebuild_position());
            let window = self.context.initial_window_length as i32;

            let mut buf = [0u8; sm::SM_FRAME_LENGTH];
            if sm::encode(&mut buf, entry.image.session_id, entry.image.stream_id, term_id, term_offset, window).is_ok() {
                let _ = endpoint.send_to(&buf, entry.image.source);
                entry.image.note_sm_sent(now);
                work += 1;
            }
        }
        work
    }

    fn expire_images(&mut self, now: Instant) -> usize {
        let mut to_remove = Vec::new();
        for (index, entry) in self.images.iter() {
            if !entry.image.is_live(now, self.context.image_liveness_timeout) {
                to_remove.push(index);
            }
        }

        let mut work = 0;
        for index in to_remove {
            if let Some(entry) = self.images.remove(index) {
                self.by_session_stream.remove(&(entry.image.session_id, entry.image.stream_id));
                for sub in self.subscriptions.values_mut() {
                    sub.detach_image(index);
                }
                self.maybe_drop_endpoint(&entry.channel);
                let _ = self.conductor_tx.send(ConductorCommand::CloseImage {
                    session_id: entry.image.session_id,
                    stream_id: entry.image.stream_id,
                    channel: entry.channel,
                });
                work += 1;
            }
        }
        work
    }
}

/// `term_id` is expected to be the image's active term, or the very next
/// one. The next-term case rotates the log buffer's metadata exactly once
/// (idempotent against repeat frames from the same new term), clearing the
/// partition that will become active two rotations from now.
fn rotate_if_crossed_boundary(image: &PublicationImage<AnyDelayGenerator>, term_id: i32) {
    let meta = image.log.meta();
    if term_id != meta.active_term_id().wrapping_add(1) {
        return;
    }
    let next_partition = (meta.active_partition() + 1) % PARTITION_COUNT;
    let following = (next_partition + 1) % PARTITION_COUNT;
    image.log.partition_mut(following).fill(0);
    meta.set_tail(next_partition, 0);
    meta.set_active_term_id(term_id);
    meta.set_active_partition(next_partition);
}

fn partition_for_term(image: &PublicationImage<AnyDelayGenerator>, term_id: i32) -> Option<usize> {
    let meta = image.log.meta();
    let active_term_id = meta.active_term_id();
    if term_id == active_term_id {
        Some(meta.active_partition())
    } else if term_id == active_term_id.wrapping_sub(1) {
        Some((meta.active_partition() + PARTITION_COUNT - 1) % PARTITION_COUNT)
    } else {
        None
    }
}

fn advance_contiguous(image: &PublicationImage<AnyDelayGenerator>, partition_index: usize, term_id: i32, term_length: i32) {
    let current = image.rebuild_position();
    let (current_term_id, current_offset) = term_id_and_offset(image.initial_term_id, term_length, current);
    if current_term_id != term_id {
        return;
    }
    let new_offset = scan_block(&image.log, partition_index, current_offset, term_length - current_offset);
    if new_offset > current_offset {
        let new_position = position(image.initial_term_id, term_length, term_id, new_offset);
        image.advance_rebuild_position(new_position);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logbuffer::create_log;
    use crate::retransmit::UnicastDelayGenerator;
    use crate::wire::data::{DataViewMut, DATA_HEADER_LENGTH};
    use crate::wire::setup::{self, SetupFields};
    use crate::wire::UNFRAGMENTED;
    use crossbeam::channel::bounded;
    use std::net::UdpSocket;

    fn receiver_with(channel: &str) -> (Receiver, ChannelSender<ReceiverCommand>) {
        let (tx, rx) = bounded(COMMAND_QUEUE_CAPACITY);
        let (conductor_tx, _conductor_rx) = bounded(COMMAND_QUEUE_CAPACITY);
        let mut receiver = Receiver::new(Arc::new(Context::default()), rx, conductor_tx);
        receiver.ensure_endpoint(channel);
        (receiver, tx)
    }

    fn data_frame(term_offset: i32, term_id: i32, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; DATA_HEADER_LENGTH + payload.len()];
        let mut view = DataViewMut::new(&mut buf).unwrap();
        view.put_header(UNFRAGMENTED, FrameType::Data, term_offset, 7, 10, term_id, 0);
        buf[DATA_HEADER_LENGTH..].copy_from_slice(payload);
        view.commit(buf.len() as i32);
        buf
    }

    #[test]
    fn unrecognized_setup_requests_image_creation_from_conductor() {
        let channel = "udp://127.0.0.1:41701".to_string();

        let (tx, rx) = bounded(COMMAND_QUEUE_CAPACITY);
        let (conductor_tx, conductor_rx) = bounded(COMMAND_QUEUE_CAPACITY);
        let mut receiver = Receiver::new(Arc::new(Context::default()), rx, conductor_tx);
        tx.send(ReceiverCommand::AddSubscription { registration_id: 1, stream_id: 10, channel: channel.clone() })
            .unwrap();
        receiver.do_work();

        let mut buf = [0u8; setup::SETUP_FRAME_LENGTH];
        setup::encode(
            &mut buf,
            &SetupFields {
                term_offset: 0,
                session_id: 7,
                stream_id: 10,
                initial_term_id: 100,
                active_term_id: 100,
                term_length: 65_536,
                mtu: 1408,
                ttl: 0,
            },
        )
        .unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.send_to(&buf, "127.0.0.1:41701").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        receiver.do_work();
        match conductor_rx.try_recv().unwrap() {
            ConductorCommand::CreateImageRequest { session_id, stream_id, .. } => {
                assert_eq!(session_id, 7);
                assert_eq!(stream_id, 10);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn rebuilds_inbound_data_into_the_image_log() {
        let (mut receiver, tx) = receiver_with("udp://127.0.0.1:41700");

        let dir = tempfile::tempdir().unwrap();
        let log = create_log(&dir.path().join("1.logbuffer"), 65_536, 100, 1408).unwrap();
        let image = PublicationImage::new(
            7,
            10,
            100,
            "127.0.0.1:41700".parse().unwrap(),
            log,
            AnyDelayGenerator::Unicast(UnicastDelayGenerator::default()),
            Instant::now(),
        );
        tx.send(ReceiverCommand::AddImage { channel: "udp://127.0.0.1:41700".into(), image: Box::new(image) })
            .unwrap();
        receiver.do_work();

        let frame = data_frame(0, 100, b"hello");
        receiver.handle_frame("udp://127.0.0.1:41700", &frame, "127.0.0.1:9".parse().unwrap(), Instant::now());

        let (_, entry) = receiver.images.iter().next().unwrap();
        assert!(entry.image.rebuild_position() > 0);
    }
}
