use std::{net::Ipv4Addr, time::Duration};

use serde::{Serialize, Serializer};

use crate::utils;

/// What happened to a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Success {
        #[serde(rename = "rtt_ms", serialize_with = "serialize_ms")]
        rtt: Duration,
    },
    /// No classifiable response before the deadline
    Timeout,
    /// The probe never left the host
    SendError,
    /// The read deadline could not be installed for this probe
    ReceiveError,
}

impl ProbeOutcome {
    pub fn rtt(&self) -> Option<Duration> {
        match self {
            ProbeOutcome::Success { rtt } => Some(*rtt),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Success { .. })
    }
}

fn serialize_ms<S: Serializer>(rtt: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(utils::time::duration_to_ms_f64(*rtt))
}

/// Per-hop statistics, rtts in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HopSummary {
    pub sent: usize,
    pub received: usize,
    pub loss_percent: f64,
    pub best_ms: Option<f64>,
    pub worst_ms: Option<f64>,
    pub avg_ms: Option<f64>,
}

/// Everything learned about one ttl. Immutable once its probes are done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HopResult {
    pub ttl: u8,
    /// First address to answer a probe at this ttl
    pub addr: Option<Ipv4Addr>,
    /// Reverse lookup of `addr`, filled in after the sweep
    pub hostname: Option<String>,
    /// One entry per probe, in probe order
    pub outcomes: Vec<ProbeOutcome>,
}

impl HopResult {
    pub fn new(ttl: u8, probes: usize) -> Self {
        Self {
            ttl,
            addr: None,
            hostname: None,
            outcomes: Vec::with_capacity(probes),
        }
    }

    /// Record the next probe's outcome, and its responder if this is the
    /// first one at this ttl. Later responders never replace the first.
    pub fn record(&mut self, outcome: ProbeOutcome, responder: Option<Ipv4Addr>) {
        if self.addr.is_none() {
            self.addr = responder;
        }
        self.outcomes.push(outcome);
    }

    pub fn sent(&self) -> usize {
        self.outcomes.len()
    }

    pub fn received(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn loss_percent(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        (self.sent() - self.received()) as f64 / self.sent() as f64 * 100.0
    }

    pub fn rtts(&self) -> impl Iterator<Item = Duration> + '_ {
        self.outcomes.iter().filter_map(ProbeOutcome::rtt)
    }

    pub fn best_rtt(&self) -> Option<Duration> {
        self.rtts().min()
    }

    pub fn worst_rtt(&self) -> Option<Duration> {
        self.rtts().max()
    }

    pub fn avg_rtt(&self) -> Option<Duration> {
        let received = self.received();
        if received == 0 {
            return None;
        }
        let total: Duration = self.rtts().sum();
        Some(total / received as u32)
    }

    pub fn summary(&self) -> HopSummary {
        let ms = |rtt: Option<Duration>| rtt.map(utils::time::duration_to_ms_f64);
        HopSummary {
            sent: self.sent(),
            received: self.received(),
            loss_percent: self.loss_percent(),
            best_ms: ms(self.best_rtt()),
            worst_ms: ms(self.worst_rtt()),
            avg_ms: ms(self.avg_rtt()),
        }
    }

    /// Name to show for this hop: hostname, else the numeric address.
    pub fn display_name(&self) -> Option<String> {
        self.addr.map(|addr| {
            utils::network::format_hostname_with_fallback(self.hostname.clone(), addr)
        })
    }
}
