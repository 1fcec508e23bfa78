use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::prelude::*;

use codeindex::config::AppConfig;
use codeindex::error::AppResult;
use codeindex::server;
use codeindex::state::AppState;
use codeindex::sync::client::SyncClient;
use codeindex::sync::{SyncOrchestrator, SyncPath};
use codeindex::watcher::{FileChangeSink, ProjectState, SharedProjectState, WatcherBridge};

/// Two roles, one binary: `serve` runs the reconciliation server (C8/C9/C10),
/// `watch` runs the client-side chunker/Merkle/dirty-queue/sync stack
/// (C2-C7) against it.
#[derive(Parser)]
#[command(name = "codeindexd", version, about = "Incremental, content-addressed code indexer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP reconciliation server.
    Serve,
    /// Watch a project directory and keep it synced against a running server.
    Watch {
        /// Project root to index and watch.
        path: PathBuf,
        /// Base URL of the reconciliation server (default: CODEINDEX_SERVER_URL or http://127.0.0.1:8731).
        #[arg(long)]
        server: Option<String>,
        /// Bearer token identifying the tenant this project belongs to (default: CODEINDEX_TOKEN).
        #[arg(long)]
        token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => {
            init_tracing("serve");
            install_panic_hook();
            serve().await
        }
        Command::Watch { path, server, token } => {
            init_tracing("watch");
            install_panic_hook();
            let server = server
                .or_else(|| std::env::var("CODEINDEX_SERVER_URL").ok())
                .unwrap_or_else(|| "http://127.0.0.1:8731".to_string());
            let token = token.or_else(|| std::env::var("CODEINDEX_TOKEN").ok()).ok_or_else(|| {
                anyhow::anyhow!("a bearer token is required: pass --token or set CODEINDEX_TOKEN")
            })?;
            watch(path, server, token).await
        }
    }
}

fn init_tracing(role: &str) {
    let log_dir = std::env::var("CODEINDEX_LOG_DIR").unwrap_or_else(|_| {
        dirs::data_local_dir()
            .map(|d| d.join("codeindex-server").join("logs").to_string_lossy().to_string())
            .unwrap_or_else(|| ".codeindex-data/logs".to_string())
    });
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(&log_dir, format!("codeindexd-{role}.log"));
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);
    // Leaked deliberately: the guard must outlive the process for buffered
    // lines to flush on exit, and main never returns before shutdown.
    Box::leak(Box::new(guard));

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "codeindex=info,codeindexd=info,tower_http=info".into());

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_ansi(false)
        .with_writer(non_blocking_writer)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();
}

fn install_panic_hook() {
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_default();
        let payload = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        error!(target: "codeindex::panic", location = %location, payload = %payload, "PANIC: thread panicked");
        default_panic(info);
    }));
}

async fn serve() -> Result<()> {
    let config = AppConfig::from_env();
    let addr: SocketAddr = config.listen_addr.parse()?;

    info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir,
        "starting reconciliation server"
    );

    let state = AppState::new(config).await?;
    let app = server::create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server shutdown complete");
    Ok(())
}

async fn watch(path: PathBuf, server_url: String, token: String) -> Result<()> {
    let path = path.canonicalize()?;
    let config = AppConfig::from_env();

    let mut project_state = ProjectState::load(&path)?;
    let project_id = project_state.store.project_id();

    // Initial synchronous directory walk (§4.5): seeds the tracked-file set
    // before the watcher starts, so `create` events for pre-existing files
    // are suppressed as initial state rather than reported as mutations, and
    // so a stale on-disk merkle state (editor closed while files changed) is
    // repaired before the first sync tick ever runs.
    let rescanned = codeindex::merkle::MerkleTree::rebuild_from_scan(
        &path,
        codeindex::config::SUPPORTED_EXTENSIONS,
        codeindex::project::CONFIG_DIR_NAME,
    )?;
    project_state.tree = rescanned;
    project_state.store.save_merkle_tree(&project_state.tree)?;

    let shared: SharedProjectState = Arc::new(parking_lot::Mutex::new(project_state));

    info!(path = %path.display(), %project_id, server = %server_url, "watching project");

    let _bridge = WatcherBridge::start(path.clone(), &config, shared.clone(), Arc::new(LoggingSink))?;

    let client = SyncClient::new(server_url, token);
    let mut orchestrator = SyncOrchestrator::new(path.clone(), project_id, &config, client);

    // Run one tick immediately so a cold start doesn't sit idle for a full
    // interval before the project is first synced.
    if let Err(e) = run_tick(&shared, &mut orchestrator).await {
        tracing::warn!(error = %e, "initial sync tick failed, will retry on the next interval");
    }

    let interval = Duration::from_secs(config.sync_interval_secs.max(1));
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown_signal() => {
                info!("watch loop shutting down");
                break;
            }
        }

        if let Err(e) = run_tick(&shared, &mut orchestrator).await {
            tracing::warn!(error = %e, "sync tick failed, will retry on the next interval");
        }
    }

    Ok(())
}

/// One sync tick. The Merkle tree and dirty queue are cloned out from behind
/// the shared mutex so the HTTP round trip and any chunking I/O never hold
/// it, then the outcome is merged back (concurrency model: "the state mutex
/// must be released before long network calls"). The merge only ever clears
/// the exact paths this tick's snapshot saw as dirty — a file the watcher
/// marks dirty again mid-tick keeps its live entry. Worst case that produces
/// a stale-but-empty dirty queue against a moved-on local root, which the
/// next check surfaces as a root mismatch and repairs via the reopen path.
async fn run_tick(
    shared: &SharedProjectState,
    orchestrator: &mut SyncOrchestrator,
) -> AppResult<()> {
    let (mut tree, mut dirty) = {
        let guard = shared.lock();
        (guard.tree.clone(), guard.dirty.clone())
    };
    let synced_paths = dirty.snapshot();

    let summary = orchestrator.tick(&mut tree, &mut dirty).await?;

    info!(
        path_taken = ?summary.path_taken,
        chunks_total = summary.chunks_total,
        chunks_needed = summary.chunks_needed,
        chunks_cached = summary.chunks_cached,
        message = %summary.message,
        "sync tick complete"
    );

    if summary.path_taken != SyncPath::NoOp && !synced_paths.is_empty() {
        let mut guard = shared.lock();
        for p in &synced_paths {
            guard.dirty.clear(p);
        }
        guard.store.save_dirty_queue(&guard.dirty)?;
    }

    Ok(())
}

struct LoggingSink;

impl FileChangeSink for LoggingSink {
    fn on_files_changed(&self, changed: &[String], new_root: codeindex::hash::Digest) {
        info!(count = changed.len(), root = %new_root.to_hex(), "files changed");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received ctrl-c, shutting down"); }
        _ = terminate => { info!("received terminate signal, shutting down"); }
    }
}
