// Individual modules import what they need

/// Time conversion utilities
pub mod time {
    use std::time::{Duration, Instant};

    /// Convert Duration to milliseconds as f64
    pub fn duration_to_ms_f64(duration: Duration) -> f64 {
        duration.as_secs_f64() * 1000.0
    }

    /// Format an RTT the way traceroute does: milliseconds, three decimals
    pub fn format_rtt_ms(duration: Duration) -> String {
        format!("{:.3} ms", duration_to_ms_f64(duration))
    }

    /// Time between `start` and `end`, capped at `limit`. A clock that went
    /// backwards yields zero.
    pub fn bounded_elapsed(start: Instant, end: Instant, limit: Duration) -> Duration {
        end.saturating_duration_since(start).min(limit)
    }
}

/// Network address utilities
pub mod network {
    use std::net::Ipv4Addr;

    /// Format hostname with fallback to IP address
    pub fn format_hostname_with_fallback(hostname: Option<String>, addr: Ipv4Addr) -> String {
        hostname
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| addr.to_string())
    }

    /// Strip the root label from a PTR name
    pub fn trim_root_label(name: &str) -> &str {
        name.strip_suffix('.').unwrap_or(name)
    }
}
