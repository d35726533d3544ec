// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Sender agent: owns every live [`NetworkPublication`], drains committed
//! term data onto the wire, resends SETUP until connected, emits
//! heartbeats on idle, and services the retransmit handler's NAK timers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel::{Receiver, Sender as ChannelSender};

use crate::config::Context;
use crate::error::Result;
use crate::flowcontrol::StatusMessage;
use crate::logbuffer::scan_block;
use crate::publication::NetworkPublication;
use crate::slab::{Slab, SlabIndex};
use crate::wire::data::DataViewMut;
use crate::wire::header::HeaderView;
use crate::wire::setup::{self, SetupFields};
use crate::wire::{nak::NakView, sm::StatusMessageView, FrameType};

use super::commands::{ConductorCommand, SenderCommand, COMMAND_QUEUE_CAPACITY};

/// Drives every publication registered against this driver instance.
pub struct Sender {
    context: Arc<Context>,
    rx: Receiver<SenderCommand>,
    conductor_tx: ChannelSender<ConductorCommand>,
    publications: Slab<NetworkPublication>,
    by_session_stream: HashMap<(i32, i32), SlabIndex>,
}

impl Sender {
    #[must_use]
    pub fn new(
        context: Arc<Context>,
        rx: Receiver<SenderCommand>,
        conductor_tx: ChannelSender<ConductorCommand>,
    ) -> Self {
        Self {
            context,
            rx,
            conductor_tx,
            publications: Slab::new(),
            by_session_stream: HashMap::new(),
        }
    }

    /// One iteration: drain commands, then service every publication.
    /// Returns the work count driving the idle strategy.
    pub fn do_work(&mut self) -> usize {
        let now = Instant::now();
        let mut work = self.drain_commands();

        for (_, pub_) in self.publications.iter_mut() {
            if let Ok(n) = Self::service_publication(&self.context, pub_, now) {
                work += n;
            }
        }

        let mut to_remove = Vec::new();
        for (index, pub_) in self.publications.iter() {
            if pub_.is_closed() && pub_.idle_for(now) >= self.context.publication_linger_timeout {
                to_remove.push(index);
            }
        }
        for index in to_remove {
            if let Some(pub_) = self.publications.remove(index) {
                self.by_session_stream.remove(&(pub_.session_id, pub_.stream_id));
                let _ = self.conductor_tx.send(ConductorCommand::ClosePublication {
                    session_id: pub_.session_id,
                    stream_id: pub_.stream_id,
                    channel: String::new(),
                });
                work += 1;
            }
        }

        work
    }

    fn drain_commands(&mut self) -> usize {
        let mut n = 0;
        while let Ok(cmd) = self.rx.try_recv() {
            n += 1;
            match cmd {
                SenderCommand::AddPublication(pub_) => {
                    let key = (pub_.session_id, pub_.stream_id);
                    let index = self.publications.insert(*pub_);
                    self.by_session_stream.insert(key, index);
                }
                SenderCommand::RemovePublication { session_id, stream_id } => {
                    if let Some(index) = self.by_session_stream.get(&(session_id, stream_id)) {
                        if let Some(pub_) = self.publications.get(*index) {
                            pub_.close();
                        }
                    }
                }
            }
        }
        n
    }

    fn service_publication(context: &Context, pub_: &mut NetworkPublication, now: Instant) -> Result<usize> {
        let mut work = Self::poll_control_frames(pub_, now)?;
        pub_.flow_control.on_idle(now);

        if pub_.is_closed() {
            return Ok(work);
        }

        if !pub_.is_connected() {
            let due = match *pub_.last_setup_sent.lock() {
                None => true,
                Some(last) => now.saturating_duration_since(last) >= context.publication_setup_timeout,
            };
            if due {
                Self::send_setup(pub_)?;
                *pub_.last_setup_sent.lock() = Some(now);
                work += 1;
            }
        }

        work += Self::send_available_data(context, pub_, now)?;
        work += Self::service_retransmits(pub_, now)?;

        Ok(work)
    }

    fn poll_control_frames(pub_: &mut NetworkPublication, now: Instant) -> Result<usize> {
        let session_id = pub_.session_id;
        let stream_id = pub_.stream_id;
        let term_length = pub_.log.term_length() as u32;

        let mut incoming_sms = Vec::new();
        let mut incoming_naks = Vec::new();
        let mut buf = [0u8; 2048];
        pub_.endpoint.poll_recv(&mut buf, |frame, _addr| {
            let Ok(header) = HeaderView::new(frame) else { return };
            match header.frame_type() {
                Ok(FrameType::StatusMessage) => {
                    if let Ok(view) = StatusMessageView::new(frame) {
                        if view.session_id() == session_id && view.stream_id() == stream_id {
                            incoming_sms.push(StatusMessage {
                                receiver_id: view.receiver_id().unwrap_or(0),
                                consumption_term_id: view.consumption_term_id(),
                                consumption_term_offset: view.consumption_term_offset(),
                                receiver_window: view.receiver_window(),
                            });
                        }
                    }
                }
                Ok(FrameType::Nak) => {
                    if let Ok(view) = NakView::new(frame) {
                        if view.session_id() == session_id && view.stream_id() == stream_id {
                            incoming_naks.push((view.term_id(), view.term_offset(), view.length()));
                        }
                    }
                }
                _ => {}
            }
        })?;

        let work = incoming_sms.len() + incoming_naks.len();
        for sm in incoming_sms {
            pub_.flow_control.on_status_message(&sm, pub_.initial_term_id, term_length, now);
            pub_.mark_connected();
            pub_.touch(now);
        }
        for (term_id, term_offset, length) in incoming_naks {
            pub_.retransmit.on_nak(term_id, term_offset, length, now);
        }
        Ok(work)
    }

    fn send_setup(pub_: &NetworkPublication) -> Result<()> {
        let meta = pub_.log.meta();
        let (_, term_offset) = crate::logbuffer::term_id_and_offset(
            pub_.initial_term_id,
            pub_.log.term_length() as i32,
            pub_.sender_position(),
        );
        let fields = SetupFields {
            term_offset,
            session_id: pub_.session_id,
            stream_id: pub_.stream_id,
            initial_term_id: pub_.initial_term_id,
            active_term_id: meta.active_term_id(),
            term_length: pub_.log.term_length() as i32,
            mtu: pub_.mtu as i32,
            ttl: 0,
        };
        let mut buf = [0u8; setup::SETUP_FRAME_LENGTH];
        setup::encode(&mut buf, &fields).map_err(|_| crate::error::Error::Generic("setup encode".into()))?;
        pub_.endpoint.send(&buf)?;
        Ok(())
    }

    fn send_available_data(context: &Context, pub_: &NetworkPublication, now: Instant) -> Result<usize> {
        let meta = pub_.log.meta();
        let active_partition = meta.active_partition();
        let term_length = pub_.log.term_length() as i32;
        let (term_id, term_offset) =
            crate::logbuffer::term_id_and_offset(pub_.initial_term_id, term_length, pub_.sender_position());

        if term_id != meta.active_term_id() {
            // Fell behind a rotation; nothing more this tick, the next
            // tick will observe the new active term.
            return Ok(0);
        }

        let high_water_mark = meta.tail(active_partition).min(i64::from(term_length)) as i32;
        if high_water_mark <= term_offset {
            return Self::maybe_heartbeat(context, pub_, now, term_id, term_offset);
        }

        let position_limit = pub_.position_limit();
        let remaining_by_flow_control = position_limit.saturating_sub(pub_.sender_position());
        if remaining_by_flow_control <= 0 {
            return Ok(0);
        }

        let limit = (high_water_mark - term_offset).min(pub_.mtu as i32).min(remaining_by_flow_control as i32);
        if limit <= 0 {
            return Ok(0);
        }

        let new_offset = scan_block(&pub_.log, active_partition, term_offset, limit);
        if new_offset == term_offset {
            return Self::handle_stall(context, pub_, now, active_partition, term_id, term_offset, high_water_mark);
        }
        *pub_.stalled_at.lock() = None;

        let bytes = &pub_.log.partition(active_partition)[term_offset as usize..new_offset as usize];
        pub_.endpoint.send(bytes)?;

        let advanced = crate::logbuffer::position(pub_.initial_term_id, term_length, term_id, new_offset);
        pub_.set_sender_position(advanced);
        pub_.touch(now);
        Ok(1)
    }

    /// `scan_block` made no progress even though the partition's raw tail
    /// (`high_water_mark`) is ahead of `term_offset`: a producer reserved
    /// that range and stalled before committing it (crashed, descheduled
    /// mid-write). After `publication_unblock_timeout` at the same
    /// offset, reclaim the whole reserved-but-uncommitted range as a
    /// padding frame so the sender (and any future producer rotation) can
    /// get past it.
    fn handle_stall(
        context: &Context,
        pub_: &NetworkPublication,
        now: Instant,
        active_partition: usize,
        term_id: i32,
        term_offset: i32,
        high_water_mark: i32,
    ) -> Result<usize> {
        let mut stalled = pub_.stalled_at.lock();
        let since = match *stalled {
            Some((offset, since)) if offset == term_offset => since,
            _ => {
                *stalled = Some((term_offset, now));
                return Ok(0);
            }
        };

        if now.saturating_duration_since(since) < context.publication_unblock_timeout {
            return Ok(0);
        }

        let appender = crate::logbuffer::Appender::new(&pub_.log, pub_.initial_term_id, pub_.session_id, pub_.stream_id);
        appender.force_unblock(active_partition, term_offset, high_water_mark - term_offset, term_id);
        *stalled = None;
        drop(stalled);

        let term_length = pub_.log.term_length() as i32;
        let advanced = crate::logbuffer::position(pub_.initial_term_id, term_length, term_id, high_water_mark);
        pub_.set_sender_position(advanced);
        pub_.touch(now);
        Ok(1)
    }

    fn maybe_heartbeat(
        context: &Context,
        pub_: &NetworkPublication,
        now: Instant,
        term_id: i32,
        term_offset: i32,
    ) -> Result<usize> {
        if pub_.idle_for(now) < context.publication_heartbeat_timeout {
            return Ok(0);
        }
        let mut buf = [0u8; crate::wire::data::DATA_HEADER_LENGTH];
        let mut view =
            DataViewMut::new(&mut buf).map_err(|_| crate::error::Error::Generic("heartbeat encode".into()))?;
        view.put_header(
            crate::wire::UNFRAGMENTED,
            FrameType::Data,
            term_offset,
            pub_.session_id,
            pub_.stream_id,
            term_id,
            0,
        );
        view.commit(crate::wire::data::DATA_HEADER_LENGTH as i32);
        pub_.endpoint.send(&buf)?;
        pub_.touch(now);
        Ok(1)
    }

    fn service_retransmits(pub_: &mut NetworkPublication, now: Instant) -> Result<usize> {
        let due = pub_.retransmit.poll(now);
        if due.is_empty() {
            return Ok(0);
        }

        let active_partition = pub_.log.meta().active_partition();
        for action in &due {
            let offset = action.term_offset as usize;
            let end = (offset + action.length as usize).min(pub_.log.term_length());
            if end <= offset {
                continue;
            }
            let bytes = &pub_.log.partition(active_partition)[offset..end];
            if HeaderView::new(bytes).map(|h| h.frame_length()).unwrap_or(0) > 0 {
                pub_.endpoint.send(bytes)?;
            }
        }
        Ok(due.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::SendChannelEndpoint;
    use crate::flowcontrol::UnicastFlowControl;
    use crate::logbuffer::create_log;
    use crate::retransmit::{AnyDelayGenerator, RetransmitHandler, UnicastDelayGenerator};
    use crate::uri::ChannelUri;
    use crossbeam::channel::bounded;
    use std::net::UdpSocket;
    use std::sync::atomic::Ordering;

    fn new_publication(remote_port: u16) -> NetworkPublication {
        let dir = tempfile::tempdir().unwrap();
        let log = create_log(&dir.path().join("1.logbuffer"), 65_536, 100, 1408).unwrap();
        let uri = ChannelUri::parse(&format!("udp://127.0.0.1:{remote_port}")).unwrap();
        let endpoint = Arc::new(SendChannelEndpoint::new(&uri, &[], None).unwrap());
        NetworkPublication::new(
            7,
            10,
            100,
            1408,
            log,
            endpoint,
            Box::new(UnicastFlowControl::new(i64::MAX)),
            RetransmitHandler::new(16, AnyDelayGenerator::Unicast(UnicastDelayGenerator::default())),
            Instant::now(),
        )
    }

    #[test]
    fn sends_setup_for_an_unconnected_publication() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_nonblocking(true).unwrap();
        let receiver_port = receiver.local_addr().unwrap().port();

        let (tx, rx) = bounded(COMMAND_QUEUE_CAPACITY);
        let (conductor_tx, _conductor_rx) = bounded(COMMAND_QUEUE_CAPACITY);
        let mut sender = Sender::new(Arc::new(Context::default()), rx, conductor_tx);

        tx.send(SenderCommand::AddPublication(Box::new(new_publication(receiver_port))))
            .unwrap();
        sender.do_work();

        std::thread::sleep(std::time::Duration::from_millis(20));
        let mut buf = [0u8; 64];
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(n, setup::SETUP_FRAME_LENGTH);
    }

    #[test]
    fn unblock_reclaims_the_stalled_range_as_padding() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_nonblocking(true).unwrap();
        let mut pub_ = new_publication(receiver.local_addr().unwrap().port());
        pub_.log.meta().tail_atomic(0).fetch_add(64, Ordering::AcqRel);
        pub_.mark_connected();

        let mut context = Context::default();
        context.publication_unblock_timeout = std::time::Duration::from_millis(5);

        let t0 = Instant::now();
        Sender::service_publication(&context, &mut pub_, t0).unwrap();
        assert_eq!(pub_.sender_position(), 0, "no progress yet, clock just started");

        let t1 = t0 + std::time::Duration::from_millis(20);
        Sender::service_publication(&context, &mut pub_, t1).unwrap();

        assert_eq!(pub_.sender_position(), 64);
        let header = HeaderView::new(pub_.log.partition(0)).unwrap();
        assert_eq!(header.frame_length(), 64);
        assert_eq!(header.frame_type().unwrap(), FrameType::Pad);
    }

    #[test]
    fn remove_publication_marks_it_closed_for_eventual_linger_removal() {
        let (tx, rx) = bounded(COMMAND_QUEUE_CAPACITY);
        let (conductor_tx, _conductor_rx) = bounded(COMMAND_QUEUE_CAPACITY);
        let mut sender = Sender::new(Arc::new(Context::default()), rx, conductor_tx);
        tx.send(SenderCommand::AddPublication(Box::new(new_publication(41555)))).unwrap();
        sender.do_work();

        tx.send(SenderCommand::RemovePublication { session_id: 7, stream_id: 10 }).unwrap();
        sender.do_work();

        let (_, pub_) = sender.publications.iter().next().unwrap();
        assert!(pub_.is_closed());
    }
}
