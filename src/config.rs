//! Engine-facing configuration.
//!
//! [`Args`] is the command-line surface; [`TraceConfig`] is what the probing
//! engine actually consumes, so tests and library users never touch clap.

use std::{net::Ipv4Addr, ops::RangeInclusive, time::Duration};

use crate::{error::TraceError, Args};

pub const DEFAULT_PACKET_SIZE: usize = 40;
pub const DEFAULT_FIRST_TTL: u8 = 1;
pub const DEFAULT_MAX_TTL: u8 = 64;
pub const DEFAULT_BASE_PORT: u16 = 33434;
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);
pub const DEFAULT_NQUERIES: usize = 3;

/// Largest UDP payload that fits in one IPv4 datagram
pub const MAX_PACKET_SIZE: usize = 65507;
pub const MAX_WAIT: Duration = Duration::from_secs(3600);

/// Where probes go. Fixed for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTarget {
    pub destination: Ipv4Addr,
    pub base_port: u16,
    pub packet_size: usize,
}

impl ProbeTarget {
    /// Destination port for probes at `ttl`. Distinct per ttl so ICMP errors
    /// quoting the probe UDP header can be mapped back to it.
    pub fn port_for(&self, ttl: u8) -> u16 {
        self.base_port.saturating_add(u16::from(ttl))
    }

    /// Inverse of [`port_for`](Self::port_for).
    pub fn ttl_for_port(&self, port: u16) -> Option<u8> {
        port.checked_sub(self.base_port)
            .and_then(|ttl| u8::try_from(ttl).ok())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraceConfig {
    pub packet_size: usize,
    pub first_ttl: u8,
    /// Number of ttls to try, starting at `first_ttl`
    pub max_ttl: u8,
    pub base_port: u16,
    pub wait: Duration,
    pub nqueries: usize,
    /// Ttls in flight at once; 1 keeps the sequential reference behavior
    pub sim_ttls: usize,
    /// Treat unrecognized ICMP types as noise instead of hop responses
    pub strict: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            packet_size: DEFAULT_PACKET_SIZE,
            first_ttl: DEFAULT_FIRST_TTL,
            max_ttl: DEFAULT_MAX_TTL,
            base_port: DEFAULT_BASE_PORT,
            wait: DEFAULT_WAIT,
            nqueries: DEFAULT_NQUERIES,
            sim_ttls: 1,
            strict: false,
        }
    }
}

impl TraceConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            packet_size: args.packet_size,
            first_ttl: args.first_ttl,
            max_ttl: args.max_ttl,
            base_port: args.port,
            wait: Duration::from_secs(args.wait),
            nqueries: args.nqueries,
            sim_ttls: args.sim_ttls,
            strict: args.strict,
        }
    }

    pub fn validate(&self) -> Result<(), TraceError> {
        if self.first_ttl == 0 {
            return Err(TraceError::Config("first ttl must be at least 1".into()));
        }
        if self.max_ttl == 0 {
            return Err(TraceError::Config("max ttl must be at least 1".into()));
        }
        if self.nqueries == 0 {
            return Err(TraceError::Config("nqueries must be at least 1".into()));
        }
        if self.sim_ttls == 0 {
            return Err(TraceError::Config("sim-ttls must be at least 1".into()));
        }
        if self.wait.is_zero() {
            return Err(TraceError::Config("wait must be at least 1 second".into()));
        }
        if self.wait > MAX_WAIT {
            return Err(TraceError::Config(format!(
                "wait must be at most {} seconds",
                MAX_WAIT.as_secs()
            )));
        }
        if self.packet_size > MAX_PACKET_SIZE {
            return Err(TraceError::Config(format!(
                "packet size {} exceeds {} bytes",
                self.packet_size, MAX_PACKET_SIZE
            )));
        }

        let last_ttl = u16::from(self.first_ttl) + u16::from(self.max_ttl) - 1;
        if last_ttl > u16::from(u8::MAX) {
            return Err(TraceError::Config(format!(
                "first ttl {} plus max ttl {} exceeds 255",
                self.first_ttl, self.max_ttl
            )));
        }
        if u32::from(self.base_port) + u32::from(last_ttl) > u32::from(u16::MAX) {
            return Err(TraceError::Config(format!(
                "port {} plus ttl {} exceeds 65535",
                self.base_port, last_ttl
            )));
        }
        Ok(())
    }

    /// Every ttl the sweep may probe, in order. Only meaningful after
    /// [`validate`](Self::validate) has passed.
    pub fn ttls(&self) -> RangeInclusive<u8> {
        let last = self.first_ttl.saturating_add(self.max_ttl.saturating_sub(1));
        self.first_ttl..=last
    }

    pub fn target(&self, destination: Ipv4Addr) -> ProbeTarget {
        ProbeTarget {
            destination,
            base_port: self.base_port,
            packet_size: self.packet_size,
        }
    }
}
