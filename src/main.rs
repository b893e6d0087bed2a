//! cachedkv - A Concurrent In-Memory Cache Server
//!
//! This is the main entry point for the cachedkv server.
//! It loads the configuration, builds the store and starts the workers.

use anyhow::Context;
use cachedkv::config::{CliAction, Config};
use cachedkv::connection::ConnectionStats;
use cachedkv::server::Server;
use cachedkv::storage::{start_expiry_sweeper, Store};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn print_help() {
    println!(
        r#"
cachedkv - A Concurrent In-Memory Cache Server

USAGE:
    cachedkv [OPTIONS]

OPTIONS:
    -h, --host <HOST>            Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>            Port to listen on (default: 23333)
    -t, --workers <N>            Worker threads (default: number of CPUs)
    -m, --memory-limit <MB>      Memory for items with an expiry (default: 64)
    -I, --max-item-size <BYTES>  Largest accepted value (default: 1048576)
        --max-key-len <BYTES>    Longest accepted key (default: 250)
        --max-keys <N>           Keys per get/gets/delete line (default: 1024)
        --hash-power <N>         Use 2^N hash buckets (default: 10)
        --idle-timeout <SECS>    Close idle connections (default: never)
    -v, --version                Print version information
        --help                   Print this help message

ENVIRONMENT:
    CACHED_HOST, CACHED_PORT, CACHED_WORKERS, CACHED_MEMORY_LIMIT
    RUST_LOG                     Log filter (default: cachedkv=info)

CONNECTING:
    $ printf 'set name 0 0 4\r\nAriz\r\nget name\r\n' | nc 127.0.0.1 23333
    STORED
    VALUE name 0 4
    Ariz
    END
"#
    );
}

fn print_banner(config: &Config) {
    println!(
        r#"
cachedkv v{} - Concurrent In-Memory Cache Server
──────────────────────────────────────────────────
Server started on {} ({} workers, {} buckets)
Ready to accept connections.

Use Ctrl+C to shutdown gracefully.
"#,
        cachedkv::VERSION,
        config.bind_address(),
        config.workers,
        1u64 << config.hash_power,
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match Config::load() {
        Ok(CliAction::Run(config)) => config,
        Ok(CliAction::Help) => {
            print_help();
            return Ok(());
        }
        Ok(CliAction::Version) => {
            println!("cachedkv version {}", cachedkv::VERSION);
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    // Set up logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cachedkv=info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .init();

    print_banner(&config);

    // The store is shared by every worker
    let store = Arc::new(Store::new(config.hash_power, config.memory_limit));
    info!(
        buckets = store.bucket_count(),
        memory_limit = config.memory_limit,
        "Store initialized"
    );

    let _sweeper = start_expiry_sweeper(Arc::clone(&store));

    let conn_stats = Arc::new(ConnectionStats::new());
    let server = Server::bind(&config, Arc::clone(&store), Arc::clone(&conn_stats))
        .await
        .with_context(|| format!("failed to start server on {}", config.bind_address()))?;

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    server.run_until(shutdown).await.context("server stopped")?;

    let stats = store.stats();
    info!(
        items = stats.items,
        hits = stats.hits,
        misses = stats.misses,
        evictions = stats.evictions,
        connections = conn_stats.connections_accepted.load(Ordering::Relaxed),
        commands = conn_stats.commands_processed.load(Ordering::Relaxed),
        "Server shutdown complete"
    );
    Ok(())
}
