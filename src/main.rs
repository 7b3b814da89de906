use anyhow::Context;
use clap::Parser;
use tokio::runtime::Handle;
use tracing::info;
use tracing_subscriber::EnvFilter;
use traceroute_ng::{
    dispatch::run_concurrent,
    dns::Resolver,
    listener::IcmpListener,
    probe::UdpTransmitter,
    report, Args, Result, TraceConfig, TraceReport, TraceSession,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Report goes to stdout, logs stay on stderr
    let default_filter = if args.verbose {
        "traceroute_ng=debug"
    } else {
        "traceroute_ng=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting traceroute-ng v{}", env!("CARGO_PKG_VERSION"));

    let config = TraceConfig::from_args(&args);
    config.validate()?;

    let resolver = Resolver::new();
    let resolved = resolver.resolve(&args.host).await?;
    if resolved.is_ambiguous() {
        eprintln!(
            "{}",
            report::multiple_addresses_warning(&args.host, resolved.primary)
        );
    }
    let destination = resolved.primary;
    info!("Target: {} ({})", args.host, destination);

    let listener = IcmpListener::open()?;
    let transmitter = UdpTransmitter::new();

    let trace = if config.sim_ttls > 1 {
        // Hops finish out of order here, so the report is printed in one go
        let text_config = config.clone();
        let mut trace = run_concurrent(config, destination, transmitter, listener).await?;
        if !args.numeric {
            resolver.annotate(&mut trace).await;
        }
        if !args.json {
            println!("{}", report::render_text(&args.host, &trace, &text_config));
        }
        trace
    } else {
        if !args.json {
            println!("{}", report::header(&args.host, destination, &config));
        }
        run_sequential(config, destination, transmitter, listener, resolver, &args).await?
    };

    if args.json {
        println!("{}", report::render_json(&args.host, &trace)?);
    }
    Ok(())
}

/// Blocking sweep on its own thread, printing each hop as it completes.
async fn run_sequential(
    config: TraceConfig,
    destination: std::net::Ipv4Addr,
    transmitter: UdpTransmitter,
    listener: IcmpListener,
    resolver: Resolver,
    args: &Args,
) -> Result<TraceReport> {
    let numeric = args.numeric;
    let stream = !args.json;
    let handle = Handle::current();

    let report = tokio::task::spawn_blocking(move || {
        let mut session = TraceSession::new(config, destination, transmitter, listener)?;
        session.run_with(|hop| {
            if !numeric {
                if let Some(addr) = hop.addr {
                    hop.hostname = handle.block_on(resolver.reverse_lookup(addr));
                }
            }
            if stream {
                println!("{}", report::format_hop(hop));
            }
        })
    })
    .await
    .context("trace thread failed")??;

    Ok(report)
}
