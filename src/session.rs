//! The probing engine: one pass per ttl, ttls in ascending order.
//!
//! A [`TraceSession`] owns the shared receive socket for its whole life, so
//! the socket is opened once before the sweep and closed when the session is
//! dropped, whether the sweep finished or failed.

use std::{
    net::Ipv4Addr,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    classify::{Classifier, Signal},
    config::{ProbeTarget, TraceConfig},
    error::TraceError,
    hop::{HopResult, ProbeOutcome},
    icmp,
    listener::{Datagram, ListenerError, ResponseListener},
    probe::{ProbeAttempt, ProbeTransmitter},
    utils,
};

/// Final result of a sweep. Hops are in ascending ttl order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceReport {
    pub destination: Ipv4Addr,
    pub started_at: DateTime<Utc>,
    pub reached: bool,
    pub hops: Vec<HopResult>,
}

/// One ttl's worth of probing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlResult {
    pub hop: HopResult,
    pub reached: bool,
}

/// What a single response means for the probe that waited on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Answer {
    pub outcome: ProbeOutcome,
    pub responder: Option<Ipv4Addr>,
    pub reached: bool,
}

impl Answer {
    pub fn missing() -> Self {
        Self {
            outcome: ProbeOutcome::Timeout,
            responder: None,
            reached: false,
        }
    }

    pub fn receive_error() -> Self {
        Self {
            outcome: ProbeOutcome::ReceiveError,
            ..Self::missing()
        }
    }

    /// Settle a classified response. The rtt runs from the send to the
    /// moment the response was read, and never exceeds `wait`.
    pub fn settle(
        classifier: &Classifier,
        signal: &Signal,
        sent_at: Instant,
        received_at: Instant,
        wait: Duration,
    ) -> Self {
        match signal.responder(classifier.is_strict()) {
            Some(from) => Self {
                outcome: ProbeOutcome::Success {
                    rtt: utils::time::bounded_elapsed(sent_at, received_at, wait),
                },
                responder: Some(from),
                reached: classifier.reached_destination(signal),
            },
            None => Self::missing(),
        }
    }

    /// Parse, classify and settle a raw datagram. Anything unparseable
    /// counts as no response.
    pub fn from_datagram(
        classifier: &Classifier,
        datagram: &Datagram,
        sent_at: Instant,
        wait: Duration,
    ) -> Self {
        let msg = match icmp::parse(&datagram.bytes) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Dropping datagram from {}: {}", datagram.sender, e);
                return Self::missing();
            }
        };
        let signal = classifier.classify(&msg, datagram.sender);
        debug!(
            "Got {} from {} classified as {:?}",
            icmp::type_name(msg.icmp_type),
            datagram.sender,
            signal
        );
        Self::settle(classifier, &signal, sent_at, datagram.received_at, wait)
    }
}

/// Accumulates hops in ttl order. The reached flag is the only way a sweep
/// ends before the ttl budget runs out.
#[derive(Debug)]
pub(crate) struct SweepState {
    pub current_ttl: u8,
    pub reached: bool,
    pub hops: Vec<HopResult>,
}

impl SweepState {
    pub fn new(first_ttl: u8) -> Self {
        Self {
            current_ttl: first_ttl,
            reached: false,
            hops: Vec::new(),
        }
    }

    pub fn push(&mut self, result: TtlResult) {
        self.current_ttl = result.hop.ttl.saturating_add(1);
        self.reached |= result.reached;
        self.hops.push(result.hop);
    }

    pub fn into_report(self, destination: Ipv4Addr, started_at: DateTime<Utc>) -> TraceReport {
        TraceReport {
            destination,
            started_at,
            reached: self.reached,
            hops: self.hops,
        }
    }
}

pub struct TraceSession<T, L> {
    config: TraceConfig,
    target: ProbeTarget,
    classifier: Classifier,
    transmitter: T,
    listener: L,
}

impl<T: ProbeTransmitter, L: ResponseListener> TraceSession<T, L> {
    pub fn new(
        config: TraceConfig,
        destination: Ipv4Addr,
        transmitter: T,
        listener: L,
    ) -> Result<Self, TraceError> {
        config.validate()?;
        Ok(Self {
            target: config.target(destination),
            classifier: Classifier::new(destination, config.strict),
            config,
            transmitter,
            listener,
        })
    }

    /// Send every probe for `ttl`, one after another, each followed by a
    /// single bounded read. Only a broken receive socket is an error.
    pub fn probe_ttl(&mut self, ttl: u8) -> Result<TtlResult, TraceError> {
        let mut hop = HopResult::new(ttl, self.config.nqueries);
        let mut reached = false;

        for index in 0..self.config.nqueries {
            let attempt = ProbeAttempt::new(&self.target, ttl, index);
            let sent_at = match self.transmitter.transmit(&attempt) {
                Ok(sent_at) => sent_at,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    debug!("Probe {} at ttl {} not sent: {}", index, ttl, e);
                    hop.record(ProbeOutcome::SendError, None);
                    continue;
                }
            };

            let deadline = sent_at + self.config.wait;
            let answer = match self.listener.read_with_deadline(deadline) {
                Ok(datagram) => {
                    Answer::from_datagram(&self.classifier, &datagram, sent_at, self.config.wait)
                }
                Err(ListenerError::Timeout) => Answer::missing(),
                Err(ListenerError::Deadline(e)) => {
                    debug!("Probe {} at ttl {} lost its read: {}", index, ttl, e);
                    Answer::receive_error()
                }
                Err(ListenerError::Fatal(e)) => return Err(TraceError::Receive(e)),
            };

            reached |= answer.reached;
            hop.record(answer.outcome, answer.responder);
        }

        Ok(TtlResult { hop, reached })
    }

    pub fn run(&mut self) -> Result<TraceReport, TraceError> {
        self.run_with(|_| {})
    }

    /// Sweep from the first ttl until the destination answers or the ttl
    /// budget is spent. `on_hop` sees each hop before it is appended, in
    /// ttl order, and may fill in its hostname.
    pub fn run_with<F>(&mut self, mut on_hop: F) -> Result<TraceReport, TraceError>
    where
        F: FnMut(&mut HopResult),
    {
        let started_at = Utc::now();
        let mut state = SweepState::new(self.config.first_ttl);
        info!(
            "Starting trace to {} (ttl {}..={}, {} probes each)",
            self.target.destination,
            self.config.ttls().start(),
            self.config.ttls().end(),
            self.config.nqueries
        );

        for ttl in self.config.ttls() {
            debug_assert_eq!(ttl, state.current_ttl);
            let mut result = self.probe_ttl(ttl)?;
            on_hop(&mut result.hop);
            state.push(result);

            if state.reached {
                info!("Reached {} at ttl {}", self.target.destination, ttl);
                break;
            }
        }

        if !state.reached {
            info!(
                "Destination {} not reached within {} hops",
                self.target.destination, self.config.max_ttl
            );
        }
        Ok(state.into_report(self.target.destination, started_at))
    }
}
