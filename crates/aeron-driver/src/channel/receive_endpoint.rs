// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Receive channel endpoint: the socket a Receiver agent polls for inbound
//! DATA/PAD, SM, NAK, and SETUP frames.
//!
//! Classification (§4.4) happens one layer up in `agents::receiver`, which
//! knows how to route each [`FrameType`] to an image, a publication, or the
//! Conductor; this type only owns the socket and the registration-once
//! `mio::Poll`.

use std::io;
use std::net::{SocketAddr, SocketAddrV4, UdpSocket as StdUdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};

use mio::net::UdpSocket as MioUdpSocket;
use mio::{Events, Interest, Poll, Token};
use socket2::{Domain, Protocol, Socket, Type};

use crate::channel::multicast_select::{select_interface, Interface};
use crate::error::{Error, Result};
use crate::uri::ChannelUri;

/// Token this endpoint registers itself under; a Receiver agent owns one
/// `Poll` per endpoint so the token value itself is unused beyond identity.
const TOKEN: Token = Token(0);

pub struct ReceiveChannelEndpoint {
    socket: MioUdpSocket,
    poll: Poll,
    events: Events,
    refcount: AtomicUsize,
}

impl ReceiveChannelEndpoint {
    /// Bind and register a non-blocking datagram socket for `uri`. For a
    /// multicast channel, joins the group on the interface selected by
    /// longest-prefix match.
    pub fn new(uri: &ChannelUri, interfaces: &[Interface], rcvbuf: Option<u32>) -> Result<Self> {
        let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket2.set_reuse_address(true)?;
        socket2.set_nonblocking(true)?;
        if let Some(rcvbuf) = rcvbuf {
            socket2.set_recv_buffer_size(rcvbuf as usize)?;
        }

        // A subscription's channel URI conventionally names the same
        // endpoint a publisher sends to; absent an explicit `local@`
        // override, bind to that port so the two sides agree without
        // needing a second spelling.
        let bind_port = uri.group.map_or_else(
            || uri.local.map_or_else(|| uri.remote.port(), |addr| addr.port()),
            SocketAddrV4::port,
        );
        let bind_addr = SocketAddrV4::new(std::net::Ipv4Addr::UNSPECIFIED, bind_port);
        socket2.bind(&SocketAddr::V4(bind_addr).into())?;

        let std_socket: StdUdpSocket = socket2.into();

        if let Some(group) = uri.group {
            let hint = uri
                .subnet_prefix
                .map(|prefix| (uri.local.map_or(std::net::Ipv4Addr::UNSPECIFIED, |l| *l.ip()), prefix));
            let iface_index = select_interface(interfaces, hint);
            let iface_addr = iface_index
                .map(|index| interfaces[index].address)
                .unwrap_or(std::net::Ipv4Addr::UNSPECIFIED);
            std_socket.join_multicast_v4(group.ip(), &iface_addr)?;
        }

        let mut socket = MioUdpSocket::from_std(std_socket);
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut socket, TOKEN, Interest::READABLE)?;

        Ok(Self {
            socket,
            poll,
            events: Events::with_capacity(64),
            refcount: AtomicUsize::new(0),
        })
    }

    /// Poll for readiness (non-blocking: `timeout` of zero) and drain
    /// available datagrams into `on_frame`, which receives the frame bytes
    /// and the sender's address.
    pub fn poll_recv(
        &mut self,
        buf: &mut [u8],
        mut on_frame: impl FnMut(&[u8], SocketAddr),
    ) -> Result<usize> {
        self.poll
            .poll(&mut self.events, Some(std::time::Duration::ZERO))?;
        if self.events.is_empty() {
            return Ok(0);
        }

        let mut count = 0;
        loop {
            match self.socket.recv_from(buf) {
                Ok((len, addr)) => {
                    on_frame(&buf[..len], addr);
                    count += 1;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(Error::Io(err)),
            }
        }
        Ok(count)
    }

    /// Send a control frame (NAK or SM) back to the publisher address a
    /// DATA/SETUP frame was received from.
    pub fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<usize> {
        match self.socket.send_to(buf, addr) {
            Ok(sent) => Ok(sent),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(err) => Err(Error::Io(err)),
        }
    }

    pub fn incref(&self) -> usize {
        self.refcount.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns the refcount after decrementing; `0` means the endpoint
    /// should be torn down (the last subscription on this channel departed).
    pub fn decref(&self) -> usize {
        self.refcount.fetch_sub(1, Ordering::AcqRel) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;

    #[test]
    fn receives_a_unicast_datagram() {
        let uri = ChannelUri::parse("udp://127.0.0.1:41000").unwrap();
        let mut endpoint = ReceiveChannelEndpoint::new(&uri, &[], None).unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"hello", "127.0.0.1:41000").unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));

        let mut buf = [0u8; 64];
        let mut received = Vec::new();
        endpoint
            .poll_recv(&mut buf, |data, _addr| received.push(data.to_vec()))
            .unwrap();

        assert_eq!(received, vec![b"hello".to_vec()]);
    }

    #[test]
    fn refcount_tracks_add_and_remove() {
        let uri = ChannelUri::parse("udp://127.0.0.1:41001").unwrap();
        let endpoint = ReceiveChannelEndpoint::new(&uri, &[], None).unwrap();
        assert_eq!(endpoint.incref(), 1);
        assert_eq!(endpoint.decref(), 0);
    }
}
