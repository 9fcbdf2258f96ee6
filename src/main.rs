//! Capture proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net listener ──▶ http server ──▶ routing ──▶ forward ──▶ Upstream
//!                                     │                                     │
//!                                     ▼                                     │
//!                               capture correlator ◀────── response ────────┘
//!                                     │
//!                                     ▼
//!                               breakpoint gate ──▶ client response
//!                                     │
//!                                     ▼
//!                               message bus ──▶ /_viewer/ws ──▶ viewer queue + filter
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;

use capture_proxy::config::{load_config, ConfigWatcher, ProxyConfig};
use capture_proxy::error::StartupError;
use capture_proxy::http::HttpServer;
use capture_proxy::lifecycle::{signals, startup, DataDir, Shutdown};
use capture_proxy::net::{tls, ListenAddress};
use capture_proxy::observability::{init_logging, metrics};
use capture_proxy::store::{JsonFileStore, StateStore};

#[derive(Parser, Debug)]
#[command(name = "capture-proxy", version, about = "Interactive traffic capture and debugging proxy")]
struct Cli {
    /// Listen address, `[host:]port` (default localhost:8888).
    #[arg(long, value_name = "[HOST:]PORT")]
    listen: Option<String>,

    /// Serve HTTPS instead of HTTP.
    #[arg(long)]
    ssl: bool,

    /// TOML configuration file, watched for changes.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Data directory (default $HOME/.allproxy).
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Do not open the companion window.
    #[arg(long)]
    headless: bool,
}

impl Cli {
    fn apply(&self, config: &mut ProxyConfig) {
        if let Some(listen) = &self.listen {
            config.listener.bind_address = listen.clone();
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = Some(dir.clone());
        }
        config.listener.ssl |= self.ssl;
        config.headless |= self.headless;
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("capture-proxy: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    cli.apply(&mut config);

    init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "capture-proxy starting");

    let address = ListenAddress::parse(&config.listener.bind_address)?;
    let data_dir = DataDir::prepare(DataDir::resolve(config.data_dir.as_deref()))?;
    let store: Arc<dyn StateStore> = Arc::new(JsonFileStore::new(data_dir.state_dir()));

    tracing::info!(
        bind_address = %address,
        ssl = config.listener.ssl,
        routes = config.routes.len(),
        data_dir = ?data_dir.root(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = HttpServer::new(&config, store)?;
    let shutdown = Arc::new(Shutdown::new());
    signals::spawn_signal_handler(Arc::clone(&shutdown));

    // The watcher must outlive the server.
    let (config_updates, _watcher) = match &cli.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(watcher) => (updates, Some(watcher)),
                Err(e) => {
                    tracing::warn!(error = %e, "Config hot reload disabled");
                    (updates, None)
                }
            }
        }
        None => {
            let (_, updates) = mpsc::unbounded_channel();
            (updates, None)
        }
    };

    if config.listener.ssl {
        let tls_config = config.listener.tls.as_ref().ok_or(StartupError::MissingTls)?;
        let tls = tls::load_tls_config(tls_config).await.map_err(StartupError::Tls)?;
        let addr = address.resolve().await?;
        if !config.headless {
            startup::open_companion(&startup::dashboard_url(true, &address.host, addr.port()));
        }
        server.run_tls(addr, tls, config_updates, shutdown.subscribe()).await?;
    } else {
        let listener = address.bind().await?;
        let local = listener.local_addr()?;
        tracing::info!(address = %local, "Listening for connections");
        if !config.headless {
            startup::open_companion(&startup::dashboard_url(false, &address.host, local.port()));
        }
        server.run(listener, config_updates, shutdown.subscribe()).await?;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::try_parse_from(["capture-proxy", "--listen", "9999", "--ssl", "--headless"]).unwrap();
        let mut config = ProxyConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.listener.bind_address, "9999");
        assert!(config.listener.ssl);
        assert!(config.headless);
    }

    #[test]
    fn test_unknown_flag_is_usage_error() {
        let err = Cli::try_parse_from(["capture-proxy", "--bogus"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
