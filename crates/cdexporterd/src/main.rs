//! cdexporterd - Connect:Direct queue exporter daemon.
//!
//! Polls the Connect:Direct Web Services queue at a fixed interval and
//! exposes per-category process counts for Prometheus to scrape.

mod server;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use prometheus::Registry;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use cdexporter_core::collector::RestApi;
use cdexporter_core::config::{
    Credentials, DEFAULT_CONTEXT_PATH, NodeEndpoint, PollConfig, PublishMode, ResponseFormat,
    Timeouts,
};
use cdexporter_core::metrics::ExporterMetrics;
use cdexporter_core::poll::PollLoop;

/// Connect:Direct queue exporter daemon.
#[derive(Parser)]
#[command(
    name = "cdexporterd",
    about = "Connect:Direct queue exporter for Prometheus",
    version = cdexporter_core::VERSION
)]
struct Args {
    /// Web services server URL, e.g. https://localhost:9443.
    #[arg(long, env = "CDEXPORTER_CDWS_SERVER")]
    cdws_server: String,

    /// Context path of the web console under the server URL.
    #[arg(long, default_value = DEFAULT_CONTEXT_PATH, env = "CDEXPORTER_CONTEXT_PATH")]
    context_path: String,

    /// Connect:Direct username.
    #[arg(long, env = "CDEXPORTER_CD_USER")]
    cd_user: String,

    /// Connect:Direct password.
    #[arg(long, env = "CDEXPORTER_CD_PASSWORD", hide_env_values = true)]
    cd_password: String,

    /// Connect:Direct node address sent at sign-on.
    #[arg(long, env = "CDEXPORTER_CD_IPADDRESS")]
    cd_ipaddress: String,

    /// Connect:Direct node API port.
    #[arg(long, default_value = "1363", env = "CDEXPORTER_CD_PORT")]
    cd_port: u16,

    /// Connect:Direct node protocol (e.g. TLS1.2, TLS1.3, TCPIP).
    #[arg(long, default_value = "TLS1.3", env = "CDEXPORTER_CD_PROTOCOL")]
    cd_protocol: String,

    /// Listen address for the metrics endpoint.
    #[arg(long, default_value = "0.0.0.0:9400", env = "CDEXPORTER_LISTEN")]
    listen: SocketAddr,

    /// Collection interval in seconds.
    #[arg(short, long, default_value = "60", env = "CDEXPORTER_INTERVAL")]
    interval: u64,

    /// Connect timeout in seconds for upstream calls.
    #[arg(long, default_value = "30", env = "CDEXPORTER_CONNECT_TIMEOUT")]
    connect_timeout: u64,

    /// Read timeout in seconds for upstream calls.
    #[arg(long, default_value = "30", env = "CDEXPORTER_READ_TIMEOUT")]
    read_timeout: u64,

    /// How process counts are exposed: gauge (absolute) or delta (increments).
    #[arg(long, default_value = "gauge", env = "CDEXPORTER_MODE")]
    mode: PublishMode,

    /// Queue response format: json (records) or text (substring scan).
    #[arg(long, default_value = "json", env = "CDEXPORTER_RESPONSE_FORMAT")]
    response_format: ResponseFormat,

    /// Accept invalid TLS certificates from the web services server.
    #[arg(long, env = "CDEXPORTER_INSECURE")]
    insecure: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn poll_config(&self) -> PollConfig {
        PollConfig {
            server: self.cdws_server.clone(),
            context_path: self.context_path.clone(),
            credentials: Credentials {
                user: self.cd_user.clone(),
                password: self.cd_password.clone(),
            },
            node: NodeEndpoint {
                address: self.cd_ipaddress.clone(),
                port: self.cd_port,
                protocol: self.cd_protocol.clone(),
            },
            interval: Duration::from_secs(self.interval),
            timeouts: Timeouts {
                connect: Duration::from_secs(self.connect_timeout),
                read: Duration::from_secs(self.read_timeout),
            },
            mode: self.mode,
            format: self.response_format,
            accept_invalid_certs: self.insecure,
        }
    }
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["cdexporterd", "cdexporter_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let config = args.poll_config();
    if let Err(e) = config.validate() {
        error!(error = %e, "invalid configuration");
        process::exit(1);
    }

    info!("cdexporterd {} starting", cdexporter_core::VERSION);
    info!(
        "Config: server={}, node={}:{} ({}), user={}, interval={}s, mode={}, format={}",
        config.server,
        config.node.address,
        config.node.port,
        config.node.protocol,
        config.credentials.user,
        config.interval.as_secs(),
        config.mode,
        config.format
    );
    if config.accept_invalid_certs {
        warn!("TLS certificate verification disabled");
    }

    let registry = Arc::new(Registry::new());
    let metrics = match ExporterMetrics::new(&registry) {
        Ok(m) => m,
        Err(e) => {
            error!(error = %e, "failed to register metrics");
            process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            process::exit(1);
        }
    };

    let listener = match runtime.block_on(tokio::net::TcpListener::bind(args.listen)) {
        Ok(l) => l,
        Err(e) => {
            error!(addr = %args.listen, error = %e, "failed to bind metrics listener");
            process::exit(1);
        }
    };
    runtime.spawn(server::serve(listener, registry.clone()));

    let api = match RestApi::new(&config) {
        Ok(api) => api,
        Err(e) => {
            error!(error = %e, "failed to create web services client");
            process::exit(1);
        }
    };

    let mut poll = match PollLoop::start(api, metrics, &config) {
        Ok(poll) => poll,
        Err(e) => {
            error!(error = %e, "initial signon failed");
            process::exit(1);
        }
    };

    // Setup graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    poll.run(&running);

    info!("Shutting down...");
    poll.shutdown();
    drop(poll);
    runtime.shutdown_timeout(Duration::from_secs(1));
    info!("Shutdown complete");
}
