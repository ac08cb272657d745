//! SmartKV - A Reactor-Based Key-Value Server
//!
//! This is the main entry point for the SmartKV server.
//! It loads configuration, opens the backing store and runs the reactor
//! until Ctrl+C or SIGTERM.

use anyhow::Context;
use smartkv::config::{help_text, Command, ServerConfig};
use smartkv::reactor::ReactorHandle;
use smartkv::server::Server;
use smartkv::store::{LogStore, MemoryStore, Store};
use std::sync::Arc;
use std::thread;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn print_banner(config: &ServerConfig) {
    println!(
        r#"
SmartKV v{} - Reactor-Based Key-Value Server
──────────────────────────────────────────────
Listening on {}
Workers: {}   Cache: {}   Store: {}

Use Ctrl+C to shutdown gracefully.
"#,
        smartkv::VERSION,
        config.bind_address(),
        config.worker_threads,
        if config.cache_enabled {
            format!("{} MB", config.cache_size_mb)
        } else {
            "off".to_string()
        },
        config
            .store_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "memory".to_string()),
    );
}

fn open_store(config: &ServerConfig) -> anyhow::Result<Arc<dyn Store>> {
    match &config.store_path {
        Some(path) => {
            let store = LogStore::open(path)
                .with_context(|| format!("failed to open store at {}", path.display()))?;
            Ok(Arc::new(store))
        }
        None => {
            info!("Using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
            }
            return;
        }
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to install Ctrl+C handler");
            }
        }
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
    }
}

/// Stops the reactor on Ctrl+C or SIGTERM.
fn spawn_signal_listener(handle: Arc<ReactorHandle>) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
        .context("failed to build signal runtime")?;

    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            runtime.block_on(wait_for_signal());
            info!("Shutdown signal received, stopping server...");
            handle.shutdown();
        })
        .context("failed to spawn signal thread")?;

    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = match ServerConfig::from_args() {
        Ok(Command::Run(config)) => config,
        Ok(Command::Help) => {
            println!("{}", help_text());
            return Ok(());
        }
        Ok(Command::Version) => {
            println!("SmartKV version {}", smartkv::VERSION);
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            println!("{}", help_text());
            std::process::exit(1);
        }
    };

    // Set up logging; RUST_LOG takes precedence over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .init();

    print_banner(&config);

    let store = open_store(&config)?;
    let server = Server::bind(&config, store)
        .with_context(|| format!("failed to start server on {}", config.bind_address()))?;

    spawn_signal_listener(server.handle())?;

    let stats = server.run().context("server terminated with an error")?;
    info!(
        connections = stats.connections_accepted,
        responses = stats.responses_delivered,
        "Server shutdown complete"
    );
    Ok(())
}
