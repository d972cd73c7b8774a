use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use forge::adapters::Adapters;
use forge::config::{Config, StoreKind};
use forge::engine::Engine;
use forge::parser::build_parser;
use forge::store::debounce::{DEFAULT_DEBOUNCE, SnapshotScheduler};
use forge::store::{FileStore, MemoryStore, SnapshotStore};

use forge_server::{AppState, build_app, log_state_updates};

/// Forge server — semantic version control for concurrent editors.
///
/// Flags override the corresponding FORGE_* environment variables; the
/// environment alone is enough to run.
#[derive(Parser, Debug)]
#[command(name = "forge-server", version, about)]
struct Args {
    /// TCP port to listen on (FORGE_PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Bind address.
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Snapshot backend: memory or file (FORGE_STORE).
    #[arg(long)]
    store: Option<String>,

    /// Snapshot path for the file backend (FORGE_STORE_PATH).
    #[arg(long)]
    store_path: Option<PathBuf>,

    /// External python parser binary (FORGE_PYTHON_PARSER_BIN).
    #[arg(long)]
    parser_bin: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(store) = args.store.as_deref() {
        config.store = match store {
            "memory" => StoreKind::Memory,
            _ => StoreKind::File,
        };
    }
    if let Some(path) = args.store_path {
        config.store_path = path;
    }
    if let Some(bin) = args.parser_bin {
        config.parser_bin = Some(bin);
    }

    forge::telemetry::init(config.log_level);
    info!(
        store = %config.store,
        store_path = %config.store_path.display(),
        parser_mode = %config.parser_mode,
        parser_strict = config.parser_strict,
        port = config.port,
        "forge-server starting"
    );

    let store: Arc<dyn SnapshotStore> = match config.store {
        StoreKind::Memory => Arc::new(MemoryStore::new()),
        StoreKind::File => Arc::new(FileStore::new(config.store_path.clone())),
    };

    let adapters = Adapters::new(build_parser(
        config.parser_bin.clone(),
        config.parser_mode,
        config.parser_strict,
    ));
    let engine = match store.load().context("load snapshot")? {
        Some(snapshot) => {
            info!(ops = snapshot.ops.len(), states = snapshot.states.len(), "loaded snapshot");
            Arc::new(Engine::from_snapshot(snapshot, adapters))
        }
        None => Arc::new(Engine::new(adapters)),
    };

    let _scheduler = SnapshotScheduler::spawn(
        Arc::clone(&engine),
        Arc::clone(&store),
        DEFAULT_DEBOUNCE,
    );
    if config.log_state_updates {
        tokio::spawn(log_state_updates(Arc::clone(&engine)));
    }

    let app = build_app(AppState { engine });
    let addr = format!("{}:{}", args.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(addr = %addr, "forge-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("serve")
}
