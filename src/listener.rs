//! The shared ICMP receive socket.
//!
//! Routers answer to the probe's source address, not to any port we listen
//! on, so one raw socket opened before the sweep sees every reply. It is
//! owned by whoever drives the sweep and closed when dropped.

use std::{
    io,
    mem::MaybeUninit,
    net::{Ipv4Addr, SocketAddr},
    time::{Duration, Instant},
};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, info};

use crate::error::TraceError;

/// Large enough for any ICMP message an Ethernet path hands back
const MAX_DATAGRAM: usize = 1500;

/// One inbound datagram, IP header included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub bytes: Vec<u8>,
    pub sender: Ipv4Addr,
    pub received_at: Instant,
}

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// Nothing arrived before the deadline
    #[error("timed out waiting for ICMP message")]
    Timeout,

    /// The deadline could not be installed; only this read is lost
    #[error("could not set read deadline: {0}")]
    Deadline(#[source] io::Error),

    /// The socket itself is broken
    #[error("could not read ICMP message: {0}")]
    Fatal(#[source] io::Error),
}

pub trait ResponseListener: Send {
    /// Block until a datagram arrives or `deadline` passes. At most one read
    /// is ever outstanding, which `&mut self` enforces.
    fn read_with_deadline(&mut self, deadline: Instant) -> Result<Datagram, ListenerError>;

    fn read_with_timeout(&mut self, wait: Duration) -> Result<Datagram, ListenerError> {
        self.read_with_deadline(Instant::now() + wait)
    }
}

/// Raw `IPPROTO_ICMP` socket bound to 0.0.0.0.
#[derive(Debug)]
pub struct IcmpListener {
    socket: Socket,
}

impl IcmpListener {
    /// Needs root or CAP_NET_RAW. A permission failure is reported as
    /// [`TraceError::Privilege`] so the caller can say so plainly.
    pub fn open() -> Result<Self, TraceError> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
            .map_err(|e| match e.kind() {
                io::ErrorKind::PermissionDenied => TraceError::Privilege(e),
                _ => TraceError::ListenerSetup(e),
            })?;

        let any = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
        socket
            .bind(&SockAddr::from(any))
            .map_err(TraceError::ListenerSetup)?;

        info!("Opened raw ICMP receive socket");
        Ok(Self { socket })
    }
}

impl ResponseListener for IcmpListener {
    fn read_with_deadline(&mut self, deadline: Instant) -> Result<Datagram, ListenerError> {
        let mut buffer = [MaybeUninit::<u8>::uninit(); MAX_DATAGRAM];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ListenerError::Timeout);
            }
            self.socket
                .set_read_timeout(Some(remaining))
                .map_err(ListenerError::Deadline)?;

            match self.socket.recv_from(&mut buffer) {
                Ok((len, addr)) => {
                    let received_at = Instant::now();
                    // recv_from initialized the first `len` bytes
                    let bytes = buffer[..len]
                        .iter()
                        .map(|b| unsafe { b.assume_init() })
                        .collect();
                    let sender = addr
                        .as_socket_ipv4()
                        .map(|a| *a.ip())
                        .unwrap_or(Ipv4Addr::UNSPECIFIED);
                    return Ok(Datagram {
                        bytes,
                        sender,
                        received_at,
                    });
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    return Err(ListenerError::Timeout);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    debug!("ICMP read interrupted, retrying");
                    continue;
                }
                Err(e) => return Err(ListenerError::Fatal(e)),
            }
        }
    }
}
