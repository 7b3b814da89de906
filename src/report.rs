use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::TraceConfig;
use crate::hop::{HopResult, HopSummary, ProbeOutcome};
use crate::session::TraceReport;
use crate::utils;

pub fn header(host: &str, destination: Ipv4Addr, config: &TraceConfig) -> String {
    format!(
        "traceroute to {} ({}), {} hops max, {} byte packets",
        host, destination, config.max_ttl, config.packet_size
    )
}

pub fn multiple_addresses_warning(host: &str, chosen: Ipv4Addr) -> String {
    format!(
        "traceroute: Warning: {} has multiple addresses; using {}",
        host, chosen
    )
}

fn format_outcome(outcome: &ProbeOutcome) -> String {
    match outcome {
        ProbeOutcome::Success { rtt } => utils::time::format_rtt_ms(*rtt),
        ProbeOutcome::Timeout | ProbeOutcome::SendError | ProbeOutcome::ReceiveError => {
            "*".to_string()
        }
    }
}

/// One report line: `ttl  name (ip)  results...`, or `ttl  * * *` when
/// nobody answered.
pub fn format_hop(hop: &HopResult) -> String {
    let results: Vec<String> = hop.outcomes.iter().map(format_outcome).collect();
    match (hop.addr, hop.display_name()) {
        (Some(addr), Some(name)) => {
            format!("{}  {} ({})  {}", hop.ttl, name, addr, results.join(" "))
        }
        _ => format!("{}  {}", hop.ttl, results.join(" ")),
    }
}

pub fn render_text(host: &str, report: &TraceReport, config: &TraceConfig) -> String {
    let mut out = header(host, report.destination, config);
    for hop in &report.hops {
        out.push('\n');
        out.push_str(&format_hop(hop));
    }
    out
}

#[derive(Serialize)]
struct JsonHop<'a> {
    #[serde(flatten)]
    hop: &'a HopResult,
    summary: HopSummary,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    host: &'a str,
    destination: Ipv4Addr,
    started_at: DateTime<Utc>,
    reached: bool,
    hops: Vec<JsonHop<'a>>,
}

/// The report as pretty JSON, each hop carrying its summary statistics.
pub fn render_json(host: &str, report: &TraceReport) -> serde_json::Result<String> {
    let hops = report
        .hops
        .iter()
        .map(|hop| JsonHop {
            hop,
            summary: hop.summary(),
        })
        .collect();
    serde_json::to_string_pretty(&JsonReport {
        host,
        destination: report.destination,
        started_at: report.started_at,
        reached: report.reached,
        hops,
    })
}
