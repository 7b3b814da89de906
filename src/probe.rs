//! Probe transmission.
//!
//! Every probe gets its own UDP socket with the IP TTL set before the single
//! write. The socket is closed when `transmit` returns, on every path.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    time::Instant,
};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::debug;

use crate::{config::ProbeTarget, error::TraceError};

/// One probe about to be sent. Lives only as long as that probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeAttempt {
    pub ttl: u8,
    /// Position within the ttl, 0..nqueries
    pub index: usize,
    pub destination: Ipv4Addr,
    pub port: u16,
    pub payload_size: usize,
}

impl ProbeAttempt {
    pub fn new(target: &ProbeTarget, ttl: u8, index: usize) -> Self {
        Self {
            ttl,
            index,
            destination: target.destination,
            port: target.port_for(ttl),
            payload_size: target.packet_size,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.destination, self.port))
    }
}

pub trait ProbeTransmitter: Send + Sync {
    /// Send exactly one datagram for `attempt` and return the instant it was
    /// handed to the kernel. Failures are never retried.
    fn transmit(&self, attempt: &ProbeAttempt) -> Result<Instant, TraceError>;
}

/// Sends zero-filled UDP datagrams to `base port + ttl`.
#[derive(Debug, Default, Clone, Copy)]
pub struct UdpTransmitter;

impl UdpTransmitter {
    pub fn new() -> Self {
        Self
    }
}

impl ProbeTransmitter for UdpTransmitter {
    fn transmit(&self, attempt: &ProbeAttempt) -> Result<Instant, TraceError> {
        let send_err = |source: io::Error| TraceError::Send {
            ttl: attempt.ttl,
            source,
        };

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(send_err)?;
        socket.set_ttl(u32::from(attempt.ttl)).map_err(send_err)?;
        socket
            .connect(&SockAddr::from(attempt.socket_addr()))
            .map_err(send_err)?;

        let payload = vec![0u8; attempt.payload_size];
        let sent_at = Instant::now();
        socket.send(&payload).map_err(send_err)?;

        debug!(
            "Sent probe: ttl={}, probe={}, dst={}",
            attempt.ttl,
            attempt.index,
            attempt.socket_addr()
        );
        Ok(sent_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TraceConfig;
    use std::net::UdpSocket;
    use std::time::Duration;

    #[test]
    fn test_attempt_ports_follow_ttl() {
        let target = TraceConfig::default().target(Ipv4Addr::new(192, 0, 2, 1));
        let attempt = ProbeAttempt::new(&target, 7, 2);
        assert_eq!(attempt.ttl, 7);
        assert_eq!(attempt.index, 2);
        assert_eq!(attempt.port, 33441);
        assert_eq!(attempt.payload_size, 40);
        assert_eq!(attempt.socket_addr().to_string(), "192.0.2.1:33441");
    }

    #[test]
    fn test_udp_transmitter_sends_payload() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let attempt = ProbeAttempt {
            ttl: 1,
            index: 0,
            destination: Ipv4Addr::LOCALHOST,
            port,
            payload_size: 24,
        };
        let sent_at = UdpTransmitter::new().transmit(&attempt).unwrap();
        assert!(sent_at <= Instant::now());

        let mut buf = [0xffu8; 64];
        let (len, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(len, 24);
        assert!(buf[..len].iter().all(|b| *b == 0));
    }
}
