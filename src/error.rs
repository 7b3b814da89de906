//! Error taxonomy for a trace run.
//!
//! Only the setup-class variants and [`TraceError::Receive`] ever abort a
//! sweep. Per-probe failures are folded into a
//! [`ProbeOutcome`](crate::hop::ProbeOutcome) by the orchestrator and show up
//! as a `*` in the report.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// The target host could not be turned into an IPv4 address
    #[error("could not resolve hostname {host}: {reason}")]
    Resolution { host: String, reason: String },

    /// Raw ICMP sockets need root or CAP_NET_RAW
    #[error("insufficient privileges: try running with sudo ({0})")]
    Privilege(#[source] io::Error),

    /// The shared ICMP receive socket could not be opened
    #[error("could not create receive socket: {0}")]
    ListenerSetup(#[source] io::Error),

    /// A single probe could not be put on the wire
    #[error("could not send probe at ttl {ttl}: {source}")]
    Send {
        ttl: u8,
        #[source]
        source: io::Error,
    },

    /// The shared receive socket is unusable; the sweep cannot continue
    #[error("could not read ICMP message: {0}")]
    Receive(#[source] io::Error),

    /// An inbound datagram was not a well-formed ICMP message
    #[error("malformed ICMP message: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TraceError {
    /// Whether this error ends the whole run rather than a single probe.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TraceError::Send { .. } | TraceError::Parse(_))
    }
}
