//! Scripted fake network shared by the engine tests.
//!
//! The transmitter looks up what should happen to each probe and queues the
//! matching datagram for the listener. Reply timestamps are `sent_at + rtt`
//! with a fixed rtt per (ttl, probe), so repeated runs produce identical
//! reports.

use std::{
    io,
    net::Ipv4Addr,
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use pnet::packet::{
    icmp::{self, IcmpCode, IcmpType, IcmpTypes, MutableIcmpPacket},
    ip::IpNextHeaderProtocols,
    ipv4::MutableIpv4Packet,
    udp::MutableUdpPacket,
};

use crate::{
    error::TraceError,
    listener::{Datagram, ListenerError, ResponseListener},
    probe::{ProbeAttempt, ProbeTransmitter},
};

pub const LOCAL: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 100);
pub const PROBE_SRC_PORT: u16 = 54321;

/// What the network does with one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scripted {
    TimeExceeded(Ipv4Addr),
    Unreachable(Ipv4Addr),
    EchoReply(Ipv4Addr),
    Other(Ipv4Addr),
    Garbage(Ipv4Addr),
    Silence,
    SendFails,
    DeadlineFails,
    Broken,
}

enum Event {
    Datagram(Datagram),
    Silence,
    DeadlineFails,
    Broken,
}

type Script = Box<dyn Fn(u8, usize) -> Scripted + Send + Sync>;

struct Network {
    script: Script,
    sent: Mutex<Vec<(u8, usize)>>,
    events: Mutex<Sender<Event>>,
}

#[derive(Clone)]
pub struct FakeTransmitter {
    network: Arc<Network>,
}

pub struct FakeListener {
    events: Receiver<Event>,
}

pub fn fake_network<F>(script: F) -> (FakeTransmitter, FakeListener)
where
    F: Fn(u8, usize) -> Scripted + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::channel();
    let network = Arc::new(Network {
        script: Box::new(script),
        sent: Mutex::new(Vec::new()),
        events: Mutex::new(tx),
    });
    (FakeTransmitter { network }, FakeListener { events: rx })
}

/// Fixed round trip for a probe, distinct per ttl and probe index.
pub fn scripted_rtt(ttl: u8, index: usize) -> Duration {
    Duration::from_micros(u64::from(ttl) * 1000 + index as u64 * 100)
}

impl FakeTransmitter {
    /// Every (ttl, probe index) that reached `transmit`, in call order.
    pub fn sent(&self) -> Vec<(u8, usize)> {
        self.network.sent.lock().unwrap().clone()
    }

    pub fn max_ttl_sent(&self) -> Option<u8> {
        self.sent().iter().map(|(ttl, _)| *ttl).max()
    }
}

impl ProbeTransmitter for FakeTransmitter {
    fn transmit(&self, attempt: &ProbeAttempt) -> Result<Instant, TraceError> {
        self.network
            .sent
            .lock()
            .unwrap()
            .push((attempt.ttl, attempt.index));

        let scripted = (self.network.script)(attempt.ttl, attempt.index);
        if scripted == Scripted::SendFails {
            return Err(TraceError::Send {
                ttl: attempt.ttl,
                source: io::Error::new(io::ErrorKind::Other, "scripted send failure"),
            });
        }

        let sent_at = Instant::now();
        let received_at = sent_at + scripted_rtt(attempt.ttl, attempt.index);
        let reply = |bytes: Vec<u8>, sender: Ipv4Addr| {
            Event::Datagram(Datagram {
                bytes,
                sender,
                received_at,
            })
        };
        let event = match scripted {
            Scripted::TimeExceeded(from) => reply(
                icmp_error(from, IcmpTypes::TimeExceeded, attempt.destination, attempt.port),
                from,
            ),
            Scripted::Unreachable(from) => reply(
                icmp_error(from, IcmpTypes::DestinationUnreachable, attempt.destination, attempt.port),
                from,
            ),
            Scripted::EchoReply(from) => reply(echo_reply(from), from),
            Scripted::Other(from) => reply(icmp_other(from, IcmpTypes::SourceQuench), from),
            Scripted::Garbage(from) => reply(vec![0xde, 0xad, 0xbe, 0xef], from),
            Scripted::Silence => Event::Silence,
            Scripted::DeadlineFails => Event::DeadlineFails,
            Scripted::Broken => Event::Broken,
            Scripted::SendFails => unreachable!(),
        };
        // The listener may already be gone once a sweep has failed
        let _ = self.network.events.lock().unwrap().send(event);
        Ok(sent_at)
    }
}

impl FakeListener {
    fn deliver(event: Event) -> Result<Datagram, ListenerError> {
        match event {
            Event::Datagram(datagram) => Ok(datagram),
            Event::Silence => Err(ListenerError::Timeout),
            Event::DeadlineFails => Err(ListenerError::Deadline(io::Error::new(
                io::ErrorKind::InvalidInput,
                "scripted deadline failure",
            ))),
            Event::Broken => Err(ListenerError::Fatal(io::Error::new(
                io::ErrorKind::Other,
                "scripted socket failure",
            ))),
        }
    }
}

impl ResponseListener for FakeListener {
    fn read_with_deadline(&mut self, deadline: Instant) -> Result<Datagram, ListenerError> {
        match self.events.try_recv() {
            Ok(event) => return Self::deliver(event),
            Err(TryRecvError::Disconnected) => return Err(ListenerError::Timeout),
            Err(TryRecvError::Empty) => {}
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.events.recv_timeout(remaining) {
            Ok(event) => Self::deliver(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                Err(ListenerError::Timeout)
            }
        }
    }
}

fn wrap_ipv4(source: Ipv4Addr, message: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; 20 + message.len()];
    {
        let mut ip = MutableIpv4Packet::new(&mut buf[..20]).unwrap();
        ip.set_version(4);
        ip.set_header_length(5);
        ip.set_total_length((20 + message.len()) as u16);
        ip.set_ttl(64);
        ip.set_next_level_protocol(IpNextHeaderProtocols::Icmp);
        ip.set_source(source);
        ip.set_destination(LOCAL);
    }
    buf[20..].copy_from_slice(message);
    buf
}

fn finish_icmp(buf: &mut [u8], icmp_type: IcmpType) {
    let mut packet = MutableIcmpPacket::new(buf).unwrap();
    packet.set_icmp_type(icmp_type);
    packet.set_icmp_code(IcmpCode::new(0));
    let checksum = icmp::checksum(&packet.to_immutable());
    packet.set_checksum(checksum);
}

/// ICMP error from `source` quoting a UDP probe to `probe_dst:dst_port`.
pub fn icmp_error(source: Ipv4Addr, icmp_type: IcmpType, probe_dst: Ipv4Addr, dst_port: u16) -> Vec<u8> {
    let mut message = vec![0u8; 8 + 20 + 8];
    {
        let mut quoted = MutableIpv4Packet::new(&mut message[8..28]).unwrap();
        quoted.set_version(4);
        quoted.set_header_length(5);
        quoted.set_total_length(28);
        quoted.set_ttl(1);
        quoted.set_next_level_protocol(IpNextHeaderProtocols::Udp);
        quoted.set_source(LOCAL);
        quoted.set_destination(probe_dst);
    }
    {
        let mut udp = MutableUdpPacket::new(&mut message[28..]).unwrap();
        udp.set_source(PROBE_SRC_PORT);
        udp.set_destination(dst_port);
        udp.set_length(8);
    }
    finish_icmp(&mut message, icmp_type);
    wrap_ipv4(source, &message)
}

pub fn echo_reply(source: Ipv4Addr) -> Vec<u8> {
    icmp_other(source, IcmpTypes::EchoReply)
}

/// Bare 8-byte ICMP message of any type.
pub fn icmp_other(source: Ipv4Addr, icmp_type: IcmpType) -> Vec<u8> {
    let mut message = vec![0u8; 8];
    finish_icmp(&mut message, icmp_type);
    wrap_ipv4(source, &message)
}
