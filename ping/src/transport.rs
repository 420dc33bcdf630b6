//! Raw-socket transport with budgeted, readiness-polled receives.

use std::{
    io,
    mem::MaybeUninit,
    net::{Ipv4Addr, SocketAddrV4},
    os::fd::AsRawFd,
    time::{Duration, Instant},
};

use anyhow::Result;
use common::ICMPSocket;
use polling::{Event, Events, Poller};

use crate::{
    checksum, clock,
    packet::{EchoReply, IP_HEADER_LEN},
    session::{ProbeOutcome, ProbeTransport},
};

const SOCKET_KEY: usize = 0;
/// Plenty for an IP header plus any echo reply we would match on.
const RECV_BUF_LEN: usize = 1500;

/// One wake-up of the budgeted readiness poll.
pub(crate) enum Polled {
    /// The budget elapsed without the socket becoming readable.
    TimedOut,
    /// One datagram, the monotonic receive timestamp, and how long this
    /// call waited before the datagram was ready.
    Datagram {
        bytes: Vec<u8>,
        recv_ts: u64,
        waited: Duration,
    },
}

/// Seam between the matching loop and the socket, so the loop can be driven
/// by a scripted source in tests.
pub(crate) trait PollRecv {
    fn poll_recv(&mut self, budget: Duration) -> Result<Polled>;
}

/// Owns the raw ICMP socket for the lifetime of a session.
///
/// The poller registration is removed in `Drop` and the socket closes with
/// the transport, so release is deterministic on every exit path.
pub struct IcmpTransport {
    socket: ICMPSocket,
    poller: Poller,
    events: Events,
}

impl IcmpTransport {
    /// Fails right away when the raw socket cannot be opened (typically a
    /// missing CAP_NET_RAW); callers are expected to propagate that.
    pub fn new(bind_interface: Option<&str>) -> Result<Self> {
        let socket = ICMPSocket::new(bind_interface)?;
        let poller = Poller::new()?;
        // Safety: the fd is deregistered in Drop, before the socket closes.
        unsafe {
            poller.add(socket.as_raw_fd(), Event::readable(SOCKET_KEY))?;
        }

        Ok(Self {
            socket,
            poller,
            events: Events::new(),
        })
    }
}

impl Drop for IcmpTransport {
    fn drop(&mut self) {
        let _ = self.poller.delete(&self.socket);
    }
}

impl PollRecv for IcmpTransport {
    fn poll_recv(&mut self, budget: Duration) -> Result<Polled> {
        let armed = Instant::now();
        let mut remaining = budget;
        loop {
            self.events.clear();
            let woke = Instant::now();
            let n = self.poller.wait(&mut self.events, Some(remaining))?;
            remaining = remaining.saturating_sub(woke.elapsed());
            if n == 0 {
                return Ok(Polled::TimedOut);
            }
            // poller registrations are oneshot; re-arm before reading
            self.poller.modify(&self.socket, Event::readable(SOCKET_KEY))?;

            let mut buf = [MaybeUninit::<u8>::uninit(); RECV_BUF_LEN];
            match self.socket.get_ref().recv(&mut buf) {
                Ok(len) => {
                    let recv_ts = clock::monotonic_ns()?;
                    // Safety: the kernel initialized the first `len` bytes.
                    let bytes = unsafe {
                        std::slice::from_raw_parts(
                            buf.as_ptr().cast::<u8>(),
                            len,
                        )
                    };
                    return Ok(Polled::Datagram {
                        bytes: bytes.to_vec(),
                        recv_ts,
                        waited: armed.elapsed(),
                    });
                }
                // spurious readiness; keep waiting on what is left
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if remaining.is_zero() {
                        return Ok(Polled::TimedOut);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Budgeted receive: polls for candidate datagrams and returns the first
/// echo reply carrying `identifier`, or `Timeout` once the budget runs out.
///
/// The budget only ever shrinks across discarded datagrams; it is never
/// reset mid-call. Discarding a foreign datagram never consumes the
/// session's sequence state, it just costs the time spent waiting for it.
pub(crate) fn receive_matching<S: PollRecv>(
    source: &mut S,
    identifier: u16,
    budget: Duration,
) -> Result<ProbeOutcome> {
    let mut remaining = budget;
    loop {
        if remaining.is_zero() {
            return Ok(ProbeOutcome::Timeout);
        }
        match source.poll_recv(remaining)? {
            Polled::TimedOut => return Ok(ProbeOutcome::Timeout),
            Polled::Datagram {
                bytes,
                recv_ts,
                waited,
            } => {
                remaining = remaining.saturating_sub(waited);

                let reply = match EchoReply::decode(&bytes) {
                    Ok(reply) => reply,
                    Err(_) => continue,
                };
                // Echo requests looped back by the kernel and other
                // sessions' replies both land on this socket; only an echo
                // reply with our identifier counts.
                if !reply.is_echo_reply()
                    || reply.code != 0
                    || reply.identifier != identifier
                {
                    continue;
                }
                if !checksum::verify(&bytes[IP_HEADER_LEN..]) {
                    continue;
                }
                if let Some(sent_ts) = reply.timestamp {
                    let rtt = recv_ts.saturating_sub(sent_ts) as f64 / 1e9;
                    return Ok(ProbeOutcome::Success { rtt });
                }
            }
        }
    }
}

impl ProbeTransport for IcmpTransport {
    fn send(&mut self, packet: &[u8], dst_addr: Ipv4Addr) -> Result<()> {
        // ICMP has no ports; zero is a placeholder the kernel ignores
        let addr = socket2::SockAddr::from(SocketAddrV4::new(dst_addr, 0));
        self.socket.get_ref().send_to(packet, &addr)?;
        Ok(())
    }

    fn receive(
        &mut self,
        identifier: u16,
        budget: Duration,
    ) -> Result<ProbeOutcome> {
        receive_matching(self, identifier, budget)
    }
}
