//! Wolpertinger
//!
//! Hands out Tor bridges to network-measurement probes so they can test
//! whether bridges are reachable from where the probe sits.
//!
//! 1. **Registry**: BridgeDB's SQLite store is joined with the bridge
//!    authority's extra-info descriptors into one in-memory registry, rebuilt
//!    on a fixed schedule and published atomically.
//!
//! 2. **Distribution**: `GET /bridges` returns a handful of unallocated
//!    bridges, preferring their probing-resistant transports, keyed by an
//!    HMAC-derived identifier so probes never learn fingerprints.
//!
//! The HTTP listener only starts once the first registry is published.

use std::fs::OpenOptions;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use wolpertinger::api;
use wolpertinger::config::{
    self, ConfigFile, ServiceConfig, DEFAULT_PORT, DEFAULT_REFRESH_INTERVAL_SECS,
};
use wolpertinger::distributor::{BridgeDistributor, DEFAULT_MAX_ENDPOINTS};
use wolpertinger::identity::IdDeriver;
use wolpertinger::refresh::Refresher;
use wolpertinger::registry::RegistryStore;
use wolpertinger::{Error, Result};

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "wolpertinger", version, about = "Tor bridge distributor for measurement probes")]
struct Args {
    /// Port to listen on (all IPv4 interfaces)
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "WOLPERTINGER_PORT")]
    port: u16,

    /// Full listen address, e.g. 127.0.0.1:7000 or [::]:7000. Overrides --port.
    #[arg(long, env = "WOLPERTINGER_ADDR")]
    addr: Option<SocketAddr>,

    /// JSON configuration file (master key, API tokens, data sources)
    #[arg(short, long, env = "WOLPERTINGER_CONFIG")]
    config: Option<PathBuf>,

    /// Append logs to this file instead of stderr
    #[arg(long, env = "WOLPERTINGER_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, env = "WOLPERTINGER_LOG_JSON")]
    log_json: bool,

    /// Registry refresh interval in seconds
    #[arg(long, default_value_t = DEFAULT_REFRESH_INTERVAL_SECS, env = "WOLPERTINGER_REFRESH_INTERVAL_SECS")]
    refresh_interval_secs: u64,

    /// Maximum number of endpoints per response
    #[arg(long, default_value_t = DEFAULT_MAX_ENDPOINTS, env = "WOLPERTINGER_MAX_ENDPOINTS")]
    max_endpoints: usize,

    /// Print a new API authentication token and exit
    #[arg(long)]
    new_token: bool,
}

impl Args {
    fn service_config(&self) -> Result<ServiceConfig> {
        if self.refresh_interval_secs == 0 {
            return Err(Error::Config("refresh interval must be at least one second".to_string()));
        }
        if self.max_endpoints == 0 {
            return Err(Error::Config("max endpoints must be at least one".to_string()));
        }
        Ok(ServiceConfig {
            listen_addr: self
                .addr
                .unwrap_or_else(|| SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), self.port)),
            refresh_interval: Duration::from_secs(self.refresh_interval_secs),
            max_endpoints: self.max_endpoints,
        })
    }
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if args.new_token {
        println!("Authentication token: {}", config::generate_token());
        return;
    }

    if let Err(e) = init_tracing(&args) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "Wolpertinger stopped");
        std::process::exit(1);
    }
}

fn init_tracing(args: &Args) -> Result<()> {
    let writer = match &args.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wolpertinger=info,tower_http=info".into()),
        )
        .with_writer(writer);

    if args.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let service = args.service_config()?;
    let config_path = args
        .config
        .ok_or_else(|| Error::Config("no configuration file given, use --config".to_string()))?;
    let config = ConfigFile::load(&config_path)?;

    tracing::info!(
        config = %config_path.display(),
        api_tokens = config.api_tokens.len(),
        max_endpoints = service.max_endpoints,
        "Loaded configuration"
    );

    let deriver = IdDeriver::new(&config.master_key)?;
    let store = RegistryStore::new();
    let distributor = BridgeDistributor::new(store.clone(), deriver, service.max_endpoints);

    // ── Registry Refresh ──────────────────────────────────────────────────

    let refresher = Refresher::new(
        config.sqlite_file.clone(),
        config.extrainfo_file.clone(),
        service.refresh_interval,
        store.clone(),
    );
    let (_refresh_handle, ready) = refresher.spawn();

    tracing::info!("Waiting for the first bridge registry");
    ready
        .await
        .map_err(|_| Error::Task("refresh loop exited before publishing a registry".to_string()))?;

    // ── HTTP Server ───────────────────────────────────────────────────────

    let app = api::router(api::AppState {
        config: Arc::new(config),
        store,
        distributor,
    });

    tracing::info!("Wolpertinger starting on {}", service.listen_addr);

    let listener = tokio::net::TcpListener::bind(service.listen_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
