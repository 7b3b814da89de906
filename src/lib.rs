pub mod args;
pub mod classify;
pub mod config;
pub mod dispatch;
pub mod dns;
pub mod error;
pub mod hop;
pub mod icmp;
pub mod listener;
pub mod probe;
pub mod report;
pub mod session;
pub mod utils;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use args::Args;
pub use config::TraceConfig;
pub use error::TraceError;
pub use hop::{HopResult, ProbeOutcome};
pub use session::{TraceReport, TraceSession};

// Re-export external dependencies commonly used across modules
pub use anyhow::Result;
pub use std::net::Ipv4Addr;
pub use std::time::Duration;
