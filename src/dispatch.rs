//! Concurrent sweep: several ttls in flight, one reader.
//!
//! The receive socket still has exactly one reader, a blocking thread that
//! classifies every datagram and hands it to the probe waiting for it. ICMP
//! errors are matched by the UDP destination port they quote (`base port +
//! ttl`). Direct replies from the destination, and other ICMP types unless
//! strict, go to the lowest ttl still waiting. Probes within a ttl stay sequential, so the first responder rule
//! holds per ttl exactly as in the sequential sweep. Finished ttls are
//! buffered and appended in ttl order.

use std::{
    collections::{BTreeMap, HashMap},
    io,
    net::Ipv4Addr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use chrono::Utc;
use tokio::{sync::oneshot, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    classify::{Classifier, Signal},
    config::{ProbeTarget, TraceConfig},
    error::TraceError,
    hop::{HopResult, ProbeOutcome},
    icmp,
    listener::{Datagram, ListenerError, ResponseListener},
    probe::{ProbeAttempt, ProbeTransmitter},
    session::{Answer, SweepState, TraceReport, TtlResult},
};

/// How long the reader blocks before checking for shutdown
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
enum Delivery {
    Response { signal: Signal, received_at: Instant },
    Failed { kind: io::ErrorKind, message: String },
}

#[derive(Debug, Default)]
struct Pending {
    waiting: HashMap<u8, oneshot::Sender<Delivery>>,
    failed: Option<(io::ErrorKind, String)>,
}

/// Cheap handle the probing tasks use to wait for their responses.
#[derive(Debug, Clone, Default)]
struct Waiters {
    pending: Arc<Mutex<Pending>>,
}

impl Waiters {
    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register interest in the next response for `ttl`. Must happen before
    /// the probe is sent so a fast reply cannot slip past.
    fn register(&self, ttl: u8) -> Result<oneshot::Receiver<Delivery>, TraceError> {
        let mut pending = self.lock();
        if let Some((kind, message)) = &pending.failed {
            return Err(TraceError::Receive(io::Error::new(*kind, message.clone())));
        }
        let (tx, rx) = oneshot::channel();
        pending.waiting.insert(ttl, tx);
        Ok(rx)
    }

    fn unregister(&self, ttl: u8) {
        self.lock().waiting.remove(&ttl);
    }

    /// Hand a response to the waiter for `ttl`, if there still is one.
    fn deliver(&self, ttl: u8, signal: Signal, received_at: Instant) {
        let waiter = self.lock().waiting.remove(&ttl);
        match waiter {
            Some(tx) => {
                let _ = tx.send(Delivery::Response { signal, received_at });
            }
            None => debug!("Late or duplicate response for ttl {}: {:?}", ttl, signal),
        }
    }

    fn lowest_waiting(&self) -> Option<u8> {
        self.lock().waiting.keys().min().copied()
    }

    /// Fail every waiter and refuse new ones.
    fn fail(&self, error: &io::Error) {
        let mut pending = self.lock();
        pending.failed = Some((error.kind(), error.to_string()));
        for (_, tx) in pending.waiting.drain() {
            let _ = tx.send(Delivery::Failed {
                kind: error.kind(),
                message: error.to_string(),
            });
        }
    }
}

/// Owns the listener on a blocking thread until shut down or dropped.
pub struct Dispatcher {
    waiters: Waiters,
    cancel: CancellationToken,
    reader: Option<tokio::task::JoinHandle<()>>,
}

impl Dispatcher {
    pub fn spawn<L>(listener: L, classifier: Classifier, target: ProbeTarget) -> Self
    where
        L: ResponseListener + 'static,
    {
        let waiters = Waiters::default();
        let cancel = CancellationToken::new();
        let reader = {
            let waiters = waiters.clone();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || {
                read_loop(listener, classifier, target, waiters, cancel)
            })
        };
        Self {
            waiters,
            cancel,
            reader: Some(reader),
        }
    }

    /// Stop the reader and wait for it to release the listener.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(reader) = self.reader.take() {
            if let Err(e) = reader.await {
                warn!("ICMP reader did not shut down cleanly: {}", e);
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn read_loop<L: ResponseListener>(
    mut listener: L,
    classifier: Classifier,
    target: ProbeTarget,
    waiters: Waiters,
    cancel: CancellationToken,
) {
    while !cancel.is_cancelled() {
        match listener.read_with_timeout(POLL_INTERVAL) {
            Ok(datagram) => route(&datagram, &classifier, &target, &waiters),
            Err(ListenerError::Timeout) => continue,
            Err(ListenerError::Deadline(e)) => {
                debug!("Could not set reader deadline: {}", e);
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(ListenerError::Fatal(e)) => {
                warn!("ICMP reader failed: {}", e);
                waiters.fail(&e);
                return;
            }
        }
    }
    debug!("ICMP reader stopped");
}

fn route(datagram: &Datagram, classifier: &Classifier, target: &ProbeTarget, waiters: &Waiters) {
    let msg = match icmp::parse(&datagram.bytes) {
        Ok(msg) => msg,
        Err(e) => {
            debug!("Dropping datagram from {}: {}", datagram.sender, e);
            return;
        }
    };
    let signal = classifier.classify(&msg, datagram.sender);

    let ttl = match (msg.quoted, signal) {
        (Some(quoted), _) if quoted.destination == target.destination => {
            target.ttl_for_port(quoted.dst_port)
        }
        (Some(_), _) => None,
        (None, Signal::Destination { .. }) => waiters.lowest_waiting(),
        (None, Signal::Unclassified { .. }) if !classifier.is_strict() => {
            waiters.lowest_waiting()
        }
        (None, _) => None,
    };

    match ttl {
        Some(ttl) => waiters.deliver(ttl, signal, datagram.received_at),
        None => debug!(
            "Unroutable {} from {}",
            icmp::type_name(msg.icmp_type),
            datagram.sender
        ),
    }
}

async fn probe_ttl<T: ProbeTransmitter>(
    ttl: u8,
    config: &TraceConfig,
    target: &ProbeTarget,
    classifier: &Classifier,
    transmitter: &T,
    waiters: &Waiters,
) -> Result<TtlResult, TraceError> {
    let mut hop = HopResult::new(ttl, config.nqueries);
    let mut reached = false;

    for index in 0..config.nqueries {
        let attempt = ProbeAttempt::new(target, ttl, index);
        let response = waiters.register(ttl)?;
        let sent_at = match transmitter.transmit(&attempt) {
            Ok(sent_at) => sent_at,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                debug!("Probe {} at ttl {} not sent: {}", index, ttl, e);
                waiters.unregister(ttl);
                hop.record(ProbeOutcome::SendError, None);
                continue;
            }
        };

        let deadline = tokio::time::Instant::from_std(sent_at + config.wait);
        let answer = match tokio::time::timeout_at(deadline, response).await {
            Ok(Ok(Delivery::Response {
                signal,
                received_at,
            })) => Answer::settle(classifier, &signal, sent_at, received_at, config.wait),
            Ok(Ok(Delivery::Failed { kind, message })) => {
                return Err(TraceError::Receive(io::Error::new(kind, message)));
            }
            // Waiter dropped by the reader, or nothing before the deadline
            Ok(Err(_)) | Err(_) => {
                waiters.unregister(ttl);
                Answer::missing()
            }
        };

        reached |= answer.reached;
        hop.record(answer.outcome, answer.responder);
    }

    Ok(TtlResult { hop, reached })
}

/// Sweep with up to `config.sim_ttls` ttls in flight. Produces the same
/// report shape as the sequential sweep, cut at the first ttl that reached
/// the destination. No window starts once one has reached it.
pub async fn run_concurrent<T, L>(
    config: TraceConfig,
    destination: Ipv4Addr,
    transmitter: T,
    listener: L,
) -> Result<TraceReport, TraceError>
where
    T: ProbeTransmitter + 'static,
    L: ResponseListener + 'static,
{
    config.validate()?;
    let started_at = Utc::now();
    let target = config.target(destination);
    let classifier = Classifier::new(destination, config.strict);
    let dispatcher = Dispatcher::spawn(listener, classifier, target);

    let config = Arc::new(config);
    let transmitter = Arc::new(transmitter);
    let mut state = SweepState::new(config.first_ttl);
    let ttls: Vec<u8> = config.ttls().collect();

    info!(
        "Starting concurrent trace to {} ({} ttls at a time)",
        destination, config.sim_ttls
    );

    for window in ttls.chunks(config.sim_ttls) {
        let mut tasks = JoinSet::new();
        for &ttl in window {
            let config = Arc::clone(&config);
            let transmitter = Arc::clone(&transmitter);
            let waiters = dispatcher.waiters.clone();
            tasks.spawn(async move {
                let result =
                    probe_ttl(ttl, &config, &target, &classifier, transmitter.as_ref(), &waiters).await;
                (ttl, result)
            });
        }

        let mut finished = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((ttl, result)) => {
                    finished.insert(ttl, result?);
                }
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => debug!("Probe task cancelled: {}", e),
            }
        }

        for (_, result) in finished {
            state.push(result);
            if state.reached {
                break;
            }
        }
        if state.reached {
            if let Some(last) = state.hops.last() {
                info!("Reached {} at ttl {}", destination, last.ttl);
            }
            break;
        }
    }

    dispatcher.shutdown().await;
    Ok(state.into_report(destination, started_at))
}
