//! QNode query router entry point

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use qnode::{
    api::HttpApi, coord::CoordinationStructures, shard::HttpShardClientFactory, QNode,
    QNodeConfig,
};

/// QNode - query router for versioned, sharded SQL tablespaces
#[derive(Parser, Debug)]
#[command(name = "qnode")]
#[command(about = "Query router for a sharded, versioned SQL serving cluster")]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP API listen address
    #[arg(long)]
    http_addr: Option<String>,

    /// Advertised router address
    #[arg(long)]
    address: Option<String>,

    /// Folder for the durable version store
    #[arg(long)]
    persistence_folder: Option<PathBuf>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => QNodeConfig::from_file(path)?,
        None => QNodeConfig::default(),
    };
    if let Some(http_addr) = args.http_addr {
        config.http.listen_addr = http_addr;
    }
    if let Some(address) = args.address {
        config.qnode.address = address;
    }
    if let Some(folder) = args.persistence_folder {
        config.persistence.folder = Some(folder);
    }
    if let Some(level) = args.log_level {
        config.log.level = level;
    }

    // Initialize logging
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting QNode...");
    info!("  Address: {}", config.qnode.address);
    info!("  HTTP API: {}", config.http.listen_addr);
    info!(
        "  Versions per tablespace: {}",
        config.qnode.versions_per_tablespace
    );
    match config.persistence.enabled_folder() {
        Some(folder) => info!("  Persistence folder: {:?}", folder),
        None => info!("  Persistence: disabled"),
    }

    // Standalone mode: the coordination store lives in this process
    let coord = CoordinationStructures::in_memory();
    let factory = Arc::new(HttpShardClientFactory::new(
        config.shard_client.request_timeout(),
    ));
    let listen_addr = config.http.listen_addr.clone();
    let qnode = Arc::new(QNode::init(config, coord, factory).await?);

    let http_api = HttpApi::new(qnode.clone());
    let app = http_api.router();

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    info!("HTTP API listening on {}", listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    qnode.close().await;
    Ok(())
}
