use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "traceroute-ng")]
#[command(about = "print the route packets take to network host")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
    /// Target hostname or IPv4 address
    pub host: String,

    /// Size of the probe payload in bytes
    #[arg(short = 's', long, default_value = "40")]
    pub packet_size: usize,

    /// Initial time-to-live used in outgoing probe packets
    #[arg(short = 'f', long, default_value = "1")]
    pub first_ttl: u8,

    /// Max time-to-live (max number of hops) used in outgoing probe packets
    #[arg(short = 'm', long, default_value = "64")]
    pub max_ttl: u8,

    /// Base port number used in probes; each probe goes to port + ttl
    #[arg(short = 'p', long, default_value = "33434")]
    pub port: u16,

    /// Time (in seconds) to wait for a response to a probe
    #[arg(short = 'w', long, default_value = "5")]
    pub wait: u64,

    /// Number of probes per ttl
    #[arg(short = 'q', long, default_value = "3")]
    pub nqueries: usize,

    /// Number of ttls probed concurrently (1 probes one ttl at a time)
    #[arg(short = 'N', long, default_value = "1")]
    pub sim_ttls: usize,

    /// Show IP addresses only, skip reverse lookups
    #[arg(short, long)]
    pub numeric: bool,

    /// Ignore ICMP types other than time exceeded, unreachable and echo reply
    #[arg(long)]
    pub strict: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Log engine progress to stderr
    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_default_values() {
        let args = Args::try_parse_from(["traceroute-ng", "example.com"]).unwrap();
        assert_eq!(args.host, "example.com");
        assert_eq!(args.packet_size, 40);
        assert_eq!(args.first_ttl, 1);
        assert_eq!(args.max_ttl, 64);
        assert_eq!(args.port, 33434);
        assert_eq!(args.wait, 5);
        assert_eq!(args.nqueries, 3);
        assert_eq!(args.sim_ttls, 1);
        assert!(!args.numeric);
        assert!(!args.strict);
        assert!(!args.json);
        assert!(!args.verbose);
    }

    #[test]
    fn test_args_custom_values() {
        let args = Args::try_parse_from([
            "traceroute-ng",
            "--packet-size",
            "60",
            "--first-ttl",
            "3",
            "--max-ttl",
            "20",
            "--port",
            "40000",
            "--wait",
            "2",
            "--nqueries",
            "5",
            "--sim-ttls",
            "8",
            "--numeric",
            "--strict",
            "--json",
            "10.0.0.1",
        ])
        .unwrap();

        assert_eq!(args.host, "10.0.0.1");
        assert_eq!(args.packet_size, 60);
        assert_eq!(args.first_ttl, 3);
        assert_eq!(args.max_ttl, 20);
        assert_eq!(args.port, 40000);
        assert_eq!(args.wait, 2);
        assert_eq!(args.nqueries, 5);
        assert_eq!(args.sim_ttls, 8);
        assert!(args.numeric);
        assert!(args.strict);
        assert!(args.json);
    }

    #[test]
    fn test_args_short_flags() {
        let args = Args::try_parse_from([
            "traceroute-ng",
            "-s",
            "100",
            "-f",
            "2",
            "-m",
            "30",
            "-p",
            "33000",
            "-w",
            "1",
            "-q",
            "1",
            "-N",
            "4",
            "-n",
            "-v",
            "test.example.com",
        ])
        .unwrap();

        assert_eq!(args.host, "test.example.com");
        assert_eq!(args.packet_size, 100);
        assert_eq!(args.first_ttl, 2);
        assert_eq!(args.max_ttl, 30);
        assert_eq!(args.port, 33000);
        assert_eq!(args.wait, 1);
        assert_eq!(args.nqueries, 1);
        assert_eq!(args.sim_ttls, 4);
        assert!(args.numeric);
        assert!(args.verbose);
    }

    #[test]
    fn test_args_require_host() {
        assert!(Args::try_parse_from(["traceroute-ng"]).is_err());
    }
}
