//! NSQ Exporter
//!
//! Polls an NSQ cluster through nsqlookupd and serves topic/channel depths
//! for Prometheus, forgetting nodes, topics and channels that go silent.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          NSQ Exporter                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   Cluster    │───▶│ Observation  │───▶│  Prometheus  │       │
//! │  │   Observer   │    │    Router    │    │     Sink     │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! │                             │                   ▲               │
//! │                             ▼                   │               │
//! │                      ┌──────────────┐    ┌──────────────┐       │
//! │                      │   Ledgers    │◀───│   Janitor    │       │
//! │                      └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nsq_exporter::adapters::DEFAULT_METRICS_PREFIX;
use nsq_exporter::config::{parse_server_address, DEFAULT_EPHEMERAL_SUFFIX};
use nsq_exporter::server::{self, ScrapeState};
use nsq_exporter::{
    ClusterObserver, EphemeralFilter, Error, ExporterConfig, Janitor, LivenessContext,
    NsqClusterObserver, ObservationRouter, ObserverConfig, PrometheusSink, Result,
};

/// Observations buffered between the observer and the router
const OBSERVATION_BUFFER: usize = 1024;

// =============================================================================
// CLI Arguments
// =============================================================================

/// NSQ Exporter - liveness-windowed NSQ cluster metrics for Prometheus
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to serve Prometheus metrics on
    #[arg(long, env = "PORT", default_value = "3000")]
    port: u16,

    /// Address to bind the metrics server to
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0")]
    bind_address: IpAddr,

    /// nsqlookupd HTTP addresses without protocol, comma separated (e.g. 'lookupa:4161,lookupb:4161')
    #[arg(
        long,
        env = "LOOKUPD_HTTP_ADDRESSES",
        value_delimiter = ',',
        required = true,
        value_parser = parse_lookupd_address
    )]
    lookupd_http_addresses: Vec<String>,

    /// Only report topics with this prefix; the prefix is stripped from topic names
    #[arg(long, env = "TOPIC_NAMESPACE")]
    topic_namespace: Option<String>,

    /// Seconds between nsqd stats polls (source of topic/channel depths)
    #[arg(long, env = "NSQD_POLL_INTERVAL", default_value = "30")]
    nsqd_poll_interval: u64,

    /// Seconds between nsqlookupd polls (source of the nsqd node list)
    #[arg(long, env = "LOOKUPD_POLL_INTERVAL", default_value = "30")]
    lookupd_poll_interval: u64,

    /// Ignore topics and channels ending in the ephemeral suffix
    #[arg(long, env = "IGNORE_EPHEMERAL", default_value_t = true, action = ArgAction::Set)]
    ignore_ephemeral: bool,

    /// Suffix that marks a topic or channel as ephemeral
    #[arg(long, env = "EPHEMERAL_SUFFIX", default_value = DEFAULT_EPHEMERAL_SUFFIX)]
    ephemeral_suffix: String,

    /// Seconds a node is assumed alive without hearing from it
    #[arg(long, env = "NODE_TTL", default_value = "60")]
    node_ttl: u64,

    /// Seconds a topic/channel (or a topic without channel) is assumed alive without hearing from it
    #[arg(long, env = "TOPIC_CHANNEL_TTL", default_value = "120")]
    topic_channel_ttl: u64,

    /// Seconds between janitor sweeps
    #[arg(long, env = "JANITOR_INTERVAL", default_value = "15")]
    janitor_interval: u64,

    /// Timeout in seconds for a single nsqlookupd / nsqd request
    #[arg(long, env = "REQUEST_TIMEOUT", default_value = "5")]
    request_timeout: u64,

    /// Prefix for exported metric names; an empty prefix exports bare names (e.g. cluster_node_count)
    #[arg(long, env = "METRICS_PREFIX", default_value = DEFAULT_METRICS_PREFIX)]
    metrics_prefix: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

fn parse_lookupd_address(value: &str) -> std::result::Result<String, String> {
    parse_server_address(value).map_err(|e| e.to_string())
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args)?;

    info!("Starting NSQ exporter");
    info!("  lookupd addresses: {:?}", args.lookupd_http_addresses);
    info!("  topic namespace: {:?}", args.topic_namespace);
    info!(
        "  poll intervals: nsqd {}s, lookupd {}s",
        args.nsqd_poll_interval, args.lookupd_poll_interval
    );
    info!(
        "  TTLs: node {}s, topic/channel {}s",
        args.node_ttl, args.topic_channel_ttl
    );
    info!("  janitor interval: {}s", args.janitor_interval);
    info!(
        "  ignore ephemeral: {} ({})",
        args.ignore_ephemeral, args.ephemeral_suffix
    );

    let config = ExporterConfig {
        node_ttl: Duration::from_secs(args.node_ttl),
        topic_channel_ttl: Duration::from_secs(args.topic_channel_ttl),
        janitor_interval: Duration::from_secs(args.janitor_interval),
        ephemeral: EphemeralFilter::from_flag(args.ignore_ephemeral, args.ephemeral_suffix.clone()),
    };
    config.validate()?;

    let observer = NsqClusterObserver::new(ObserverConfig {
        lookupd_http_addresses: args.lookupd_http_addresses.clone(),
        topic_namespace: args.topic_namespace.clone(),
        nsqd_poll_interval: Duration::from_secs(args.nsqd_poll_interval),
        lookupd_poll_interval: Duration::from_secs(args.lookupd_poll_interval),
        request_timeout: Duration::from_secs(args.request_timeout),
    })?;

    let sink = Arc::new(PrometheusSink::new(&args.metrics_prefix)?);
    let ctx = LivenessContext::new(config, sink.clone());

    // Not being able to serve scrapes is fatal, so bind before anything runs
    let listener = server::bind(SocketAddr::new(args.bind_address, args.port)).await?;

    let shutdown = CancellationToken::new();
    let (events_tx, events_rx) = mpsc::channel(OBSERVATION_BUFFER);

    let router = tokio::spawn(ObservationRouter::new(ctx.clone()).run(events_rx, shutdown.clone()));
    let janitor = tokio::spawn(Janitor::new(ctx.clone()).run(shutdown.clone()));

    let observer_shutdown = shutdown.clone();
    let observer = tokio::spawn(async move {
        if let Err(e) = observer.run(events_tx, observer_shutdown).await {
            error!("Cluster observer error: {}", e);
        }
    });

    let mut metrics_server = tokio::spawn(server::serve(
        listener,
        ScrapeState { sink, ctx },
        shutdown.clone(),
    ));

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Received SIGINT, stopping exporter");
            Ok(())
        }
        served = &mut metrics_server => match served {
            Ok(result) => result,
            Err(e) => Err(Error::Internal(format!("Metrics server task failed: {}", e))),
        },
    };

    shutdown.cancel();
    for task in [router, janitor, observer] {
        if let Err(e) = task.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }

    if let Err(e) = &outcome {
        error!("Exporter stopped: {}", e);
    } else {
        info!("Exporter shutdown complete");
    }
    outcome
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn"] {
        let directive = directive
            .parse::<Directive>()
            .map_err(|e| Error::Config(format!("Invalid log directive: {}", e)))?;
        filter = filter.add_directive(directive);
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }

    Ok(())
}
