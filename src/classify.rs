//! Decide what an inbound ICMP message means for the probe waiting on it.

use std::net::Ipv4Addr;

use pnet::packet::icmp::IcmpTypes;

use crate::icmp::IcmpMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Time exceeded or destination unreachable from `from`
    Hop { from: Ipv4Addr },
    /// Echo reply from the destination itself
    Destination { from: Ipv4Addr },
    /// Echo reply from somebody else; treated as no response
    Noise,
    /// Any other ICMP type. Counts as a hop response unless the classifier
    /// is strict.
    Unclassified { from: Ipv4Addr },
}

impl Signal {
    /// Address to record for the hop, if this signal carries one.
    pub fn responder(&self, strict: bool) -> Option<Ipv4Addr> {
        match *self {
            Signal::Hop { from } | Signal::Destination { from } => Some(from),
            Signal::Unclassified { from } if !strict => Some(from),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    destination: Ipv4Addr,
    strict: bool,
}

impl Classifier {
    pub fn new(destination: Ipv4Addr, strict: bool) -> Self {
        Self { destination, strict }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Echo replies are matched on source address only; a NATed or
    /// multi-homed destination answering from another address is noise.
    pub fn classify(&self, msg: &IcmpMessage, sender: Ipv4Addr) -> Signal {
        match msg.icmp_type {
            IcmpTypes::TimeExceeded | IcmpTypes::DestinationUnreachable => {
                Signal::Hop { from: sender }
            }
            IcmpTypes::EchoReply if sender == self.destination => {
                Signal::Destination { from: sender }
            }
            IcmpTypes::EchoReply => Signal::Noise,
            _ => Signal::Unclassified { from: sender },
        }
    }

    /// Whether `signal` answers the probe at all.
    pub fn is_response(&self, signal: &Signal) -> bool {
        signal.responder(self.strict).is_some()
    }

    /// Whether `signal` shows the probe got to the destination: an echo
    /// reply from it, or any other response it sent itself (UDP probes to a
    /// closed port come back as port unreachable from the destination).
    pub fn reached_destination(&self, signal: &Signal) -> bool {
        match signal {
            Signal::Destination { .. } => true,
            other => other.responder(self.strict) == Some(self.destination),
        }
    }
}
