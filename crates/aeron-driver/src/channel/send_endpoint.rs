// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Send channel endpoint: the socket a Sender agent writes DATA, SETUP, and
//! heartbeat frames to.

use std::net::{SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};

use socket2::{Domain, Protocol, Socket, Type};

use crate::channel::multicast_select::{select_interface, Interface};
use crate::error::{Error, Result};
use crate::uri::ChannelUri;

/// One send-side UDP socket per distinct channel URI, shared by every
/// publication registered against that channel.
pub struct SendChannelEndpoint {
    socket: UdpSocket,
    remote: SocketAddr,
    refcount: AtomicUsize,
}

impl SendChannelEndpoint {
    /// Bind a non-blocking datagram socket for `uri`. For a multicast
    /// channel, joins the group on the interface selected by longest-prefix
    /// match against `uri.subnet_prefix`, falling back to any
    /// multicast-capable or loopback interface.
    pub fn new(uri: &ChannelUri, interfaces: &[Interface], sndbuf: Option<u32>) -> Result<Self> {
        let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket2.set_reuse_address(true)?;
        socket2.set_nonblocking(true)?;
        if let Some(sndbuf) = sndbuf {
            socket2.set_send_buffer_size(sndbuf as usize)?;
        }

        let bind_addr: SocketAddrV4 = uri
            .local
            .unwrap_or_else(|| SocketAddrV4::new(std::net::Ipv4Addr::UNSPECIFIED, 0));
        socket2.bind(&SocketAddr::V4(bind_addr).into())?;

        if let Some(group) = uri.group {
            let hint = uri.subnet_prefix.map(|prefix| (bind_addr.ip().to_owned(), prefix));
            let iface_index = select_interface(interfaces, hint);
            let iface_addr = iface_index
                .map(|index| interfaces[index].address)
                .unwrap_or(std::net::Ipv4Addr::UNSPECIFIED);
            socket2.set_multicast_if_v4(&iface_addr)?;
        }

        Ok(Self {
            socket: socket2.into(),
            remote: SocketAddr::V4(uri.group.unwrap_or(uri.remote)),
            refcount: AtomicUsize::new(0),
        })
    }

    /// Non-blocking send to the channel's remote (or multicast group)
    /// endpoint. Returns `0` on `WouldBlock` so the caller retries next
    /// tick rather than treating it as a fault.
    pub fn send(&self, buf: &[u8]) -> Result<usize> {
        match self.socket.send_to(buf, self.remote) {
            Ok(sent) => Ok(sent),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(err) => Err(Error::Io(err)),
        }
    }

    /// Non-blocking send to an explicit address, used for unicast
    /// retransmissions addressed back to the requesting receiver.
    pub fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<usize> {
        match self.socket.send_to(buf, addr) {
            Ok(sent) => Ok(sent),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(err) => Err(Error::Io(err)),
        }
    }

    /// Drain inbound datagrams - SM and NAK frames a receiver addresses
    /// back to this socket - without blocking.
    pub fn poll_recv(&self, buf: &mut [u8], mut on_frame: impl FnMut(&[u8], SocketAddr)) -> Result<usize> {
        let mut count = 0;
        loop {
            match self.socket.recv_from(buf) {
                Ok((len, addr)) => {
                    on_frame(&buf[..len], addr);
                    count += 1;
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(Error::Io(err)),
            }
        }
        Ok(count)
    }

    pub fn incref(&self) -> usize {
        self.refcount.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns the refcount after decrementing; `0` means the endpoint
    /// should be torn down.
    pub fn decref(&self) -> usize {
        self.refcount.fetch_sub(1, Ordering::AcqRel) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sends_a_unicast_datagram_to_loopback() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let receiver_addr = receiver.local_addr().unwrap();
        let uri_text = format!("udp://127.0.0.1:{}", receiver_addr.port());
        let uri = ChannelUri::parse(&uri_text).unwrap();

        let endpoint = SendChannelEndpoint::new(&uri, &[], None).unwrap();
        let sent = endpoint.send(b"hello").unwrap();
        assert_eq!(sent, 5);

        let mut buf = [0u8; 16];
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn refcount_tracks_add_and_remove() {
        let uri = ChannelUri::parse("udp://127.0.0.1:40999").unwrap();
        let endpoint = SendChannelEndpoint::new(&uri, &[], None).unwrap();
        assert_eq!(endpoint.incref(), 1);
        assert_eq!(endpoint.incref(), 2);
        assert_eq!(endpoint.decref(), 1);
        assert_eq!(endpoint.decref(), 0);
    }
}
