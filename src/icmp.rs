//! Raw datagram to structured ICMP message.
//!
//! IPv4 raw sockets hand us the IP header followed by the ICMP message. For
//! error messages (time exceeded, destination unreachable) the ICMP payload
//! quotes the IP header and the first 8 bytes of the datagram that caused
//! the error, which for our probes is the UDP header.

use std::net::Ipv4Addr;

use pnet::packet::{
    icmp::{IcmpPacket, IcmpType, IcmpTypes},
    ip::IpNextHeaderProtocols,
    ipv4::Ipv4Packet,
    udp::UdpPacket,
    Packet,
};

use crate::error::TraceError;

/// Unused / next-hop MTU word preceding the quoted datagram in error messages
const ICMP_ERROR_PREFIX: usize = 4;

/// The probe an ICMP error message is complaining about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotedProbe {
    pub destination: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpMessage {
    pub icmp_type: IcmpType,
    pub code: u8,
    pub quoted: Option<QuotedProbe>,
}

/// Parse an IPv4 datagram carrying ICMP.
pub fn parse(buf: &[u8]) -> Result<IcmpMessage, TraceError> {
    let ip = Ipv4Packet::new(buf)
        .ok_or_else(|| TraceError::Parse(format!("datagram too short ({} bytes)", buf.len())))?;

    if ip.get_version() != 4 {
        return Err(TraceError::Parse(format!("not IPv4 (version {})", ip.get_version())));
    }
    if ip.get_next_level_protocol() != IpNextHeaderProtocols::Icmp {
        return Err(TraceError::Parse(format!(
            "not ICMP (protocol {})",
            ip.get_next_level_protocol().0
        )));
    }

    let header_len = usize::from(ip.get_header_length()) * 4;
    if header_len < Ipv4Packet::minimum_packet_size() || header_len > buf.len() {
        return Err(TraceError::Parse(format!("bad IP header length {}", header_len)));
    }

    let icmp = IcmpPacket::new(&buf[header_len..])
        .ok_or_else(|| TraceError::Parse("truncated ICMP header".into()))?;

    let icmp_type = icmp.get_icmp_type();
    let quoted = if icmp_type == IcmpTypes::TimeExceeded
        || icmp_type == IcmpTypes::DestinationUnreachable
    {
        quoted_probe(icmp.payload())
    } else {
        None
    };

    Ok(IcmpMessage {
        icmp_type,
        code: icmp.get_icmp_code().0,
        quoted,
    })
}

fn quoted_probe(payload: &[u8]) -> Option<QuotedProbe> {
    let inner = payload.get(ICMP_ERROR_PREFIX..)?;
    let ip = Ipv4Packet::new(inner)?;
    if ip.get_next_level_protocol() != IpNextHeaderProtocols::Udp {
        return None;
    }
    let header_len = usize::from(ip.get_header_length()) * 4;
    let udp = UdpPacket::new(inner.get(header_len..)?)?;
    Some(QuotedProbe {
        destination: ip.get_destination(),
        src_port: udp.get_source(),
        dst_port: udp.get_destination(),
    })
}

/// Human-readable name for log lines.
pub fn type_name(icmp_type: IcmpType) -> &'static str {
    match icmp_type {
        IcmpTypes::TimeExceeded => "TimeExceeded",
        IcmpTypes::EchoReply => "EchoReply",
        IcmpTypes::DestinationUnreachable => "DestUnreach",
        _ => "Other",
    }
}
