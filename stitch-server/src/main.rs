//! stitch server: chunked upload assembly over HTTP

use anyhow::{anyhow, Context};
use clap::{Arg, ArgAction, Command};
use std::net::SocketAddr;
use std::sync::Arc;
use stitch_engine::{BackendKind, StoreConfig, UploadStore};
use stitch_server::StitchServer;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = Command::new("stitch-server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Assembles files uploaded as independently numbered chunks")
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .value_name("PATH")
                .help("Storage root for chunks and artifacts (overrides STITCH_STORAGE_ROOT)"),
        )
        .arg(
            Arg::new("bind")
                .long("bind")
                .value_name("ADDR")
                .help("Bind address")
                .default_value("127.0.0.1:8080"),
        )
        .arg(
            Arg::new("backend")
                .long("backend")
                .value_name("KIND")
                .help("Chunk backend: fs or keyspace (overrides STITCH_BACKEND)"),
        )
        .arg(
            Arg::new("keep-chunks")
                .long("keep-chunks")
                .action(ArgAction::SetTrue)
                .help("Keep chunk payloads after an upload is finalized"),
        )
        .arg(
            Arg::new("keep-data")
                .long("keep-data")
                .action(ArgAction::SetTrue)
                .help("Leave scratch areas and the storage root in place on shutdown"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["text", "json"])
                .default_value("text")
                .help("Log output format"),
        )
        .get_matches();

    let json_logs = matches.get_one::<String>("log-format").map(String::as_str) == Some("json");
    init_tracing(json_logs);

    let bind_addr: SocketAddr = matches
        .get_one::<String>("bind")
        .ok_or_else(|| anyhow!("missing bind address"))?
        .parse()
        .context("Invalid bind address")?;

    let mut config = StoreConfig::from_env();
    if let Some(dir) = matches.get_one::<String>("data-dir") {
        config.root = dir.into();
    }
    if let Some(kind) = matches.get_one::<String>("backend") {
        let kind: BackendKind = kind.parse().map_err(|e: String| anyhow!(e))?;
        config = config.with_backend(kind);
    }
    if matches.get_flag("keep-chunks") {
        config = config.with_cleanup_chunks(false);
    }
    if matches.get_flag("keep-data") {
        config = config.with_purge_on_shutdown(false);
    }

    info!("Starting stitch server");
    info!("Storage root: {}", config.root.display());
    info!("Chunk backend: {}", config.backend);
    info!("Bind address: {}", bind_addr);

    let store = Arc::new(
        UploadStore::open(config)
            .await
            .context("Failed to initialize upload store")?,
    );

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    let served = StitchServer::new(store.clone())
        .serve(listener, shutdown_signal())
        .await;

    // Release storage even if the accept loop failed
    if let Err(e) = store.shutdown().await {
        warn!("Store shutdown failed: {}", e);
    }

    served.context("Server error")?;
    info!("Server shutdown gracefully");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
