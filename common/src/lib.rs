use std::{
    fmt,
    net::IpAddr,
    os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd},
};

use anyhow::{anyhow, Result};
use socket2::{Domain, Protocol, Socket, Type};

/// Strongly typed raw IPv4 ICMP socket.
///
/// The kernel hands us full IP datagrams on this socket; whoever reads from
/// it has to skip the IP header themselves.
pub struct ICMPSocket(Socket);

impl ICMPSocket {
    /// Opens the raw socket non-blocking, optionally bound to a device.
    ///
    /// Raw sockets need CAP_NET_RAW (or root). A refused open is returned
    /// to the caller untouched so it can be surfaced as a fatal error.
    pub fn new(bind_interface: Option<&str>) -> Result<ICMPSocket> {
        let socket =
            Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;
        socket.set_nonblocking(true)?;
        let socket = match bind_interface {
            Some(bi) => bind_to_device(socket, bi)?,
            None => socket,
        };

        Ok(ICMPSocket(socket))
    }

    pub fn get_mut(&mut self) -> &mut Socket {
        &mut self.0
    }

    pub fn get_ref(&self) -> &Socket {
        &self.0
    }
}

impl AsRawFd for ICMPSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

impl AsFd for ICMPSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

/// SO_BINDTODEVICE with the libc errno mapped into a readable message.
/// Socket2 bind_device does not have nice error types, so we have to handle
/// the raw OS errors ourselves.
pub fn bind_to_device(
    socket: Socket,
    bind_interface: &str,
) -> Result<Socket, std::io::Error> {
    if let Err(err) = socket.bind_device(Some(bind_interface.as_bytes())) {
        let error_msg = if matches!(err.raw_os_error(), Some(libc::ENODEV)) {
            format!("no such device (`{bind_interface}`): {err}")
        } else {
            format!("error binding to device `{bind_interface}`: {err}")
        };
        return Err(std::io::Error::new(std::io::ErrorKind::Other, error_msg));
    }

    Ok(socket)
}

/// Source address of a named interface, for callers that bind the raw
/// socket to a device and want to report where probes originate.
/// IPv4 only, like the rest of the engine.
pub fn interface_to_ipaddr(interface: &str) -> Result<IpAddr> {
    let interfaces = pnet_datalink::interfaces();
    let iface = interfaces
        .into_iter()
        .find(|candidate| candidate.name == interface)
        .ok_or_else(|| anyhow!("interface `{interface}` not found"))?;

    let ipaddr = iface
        .ips
        .into_iter()
        .find(|ip| ip.is_ipv4())
        .ok_or_else(|| anyhow!("interface `{interface}` has no IPv4 address"))?;

    Ok(ipaddr.ip())
}

/// Incremental min/max/mean/variance accumulator for RTT samples.
///
/// Welford's update, so a long run costs O(1) memory no matter how many
/// samples go in.
#[derive(Debug, Clone)]
pub struct Statistics {
    samples: usize,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            samples: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn update(&mut self, value: f64) {
        self.samples += 1;
        let delta = value - self.mean;
        self.mean += delta / self.samples as f64;
        self.m2 += delta * (value - self.mean);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// Population variance of the samples seen so far.
    pub fn variance(&self) -> f64 {
        if self.samples == 0 {
            return f64::NAN;
        }
        self.m2 / self.samples as f64
    }

    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "min: {:.3} max: {:.3} mean: {:.3} stddev: {:.3} samples: {}",
            self.min(),
            self.max(),
            self.mean(),
            self.stddev(),
            self.samples()
        )
    }
}
