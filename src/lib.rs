//! # cachedkv - A Concurrent In-Memory Cache Server
//!
//! cachedkv is a memcached-style cache server written in Rust. Clients store
//! and retrieve opaque byte values under string keys over a line-oriented
//! text protocol, with optional expiry and optimistic concurrency (`cas`).
//!
//! ## Features
//!
//! - **Text protocol**: `get`, `gets`, `set`, `add`, `replace`, `append`,
//!   `prepend`, `cas` and `delete`
//! - **Fine-grained locking**: one lock per hash bucket, plus a recency queue
//!   used for eviction
//! - **Incremental parsing**: commands may arrive in any number of fragments
//! - **Worker threads**: each worker runs its own event loop; connections are
//!   handed out round-robin
//! - **Expiry**: lazy on lookup, plus a background sweeper
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              cachedkv                                   │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ Dispatcher  │───>│  Workers    │───>│ Connection  │                  │
//! │  │ (accept)    │    │ (LocalSet)  │    │ (drive)     │                  │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘                  │
//! │                                               │ CommandParser           │
//! │                                               ▼                         │
//! │                                        ┌─────────────┐                  │
//! │                                        │ Command     │                  │
//! │                                        │ Handler     │                  │
//! │                                        └──────┬──────┘                  │
//! │                                               ▼                         │
//! │                     ┌──────────────────────────────────────────────┐    │
//! │                     │                   Store                      │    │
//! │                     │  ┌────────┐ ┌────────┐ ┌────────┐ ┌────────┐ │    │
//! │                     │  │Bucket 0│ │Bucket 1│ │Bucket 2│ │..2^N   │ │    │
//! │                     │  │Mutex   │ │Mutex   │ │Mutex   │ │buckets │ │    │
//! │                     │  └────────┘ └────────┘ └────────┘ └────────┘ │    │
//! │                     │          RecencyQueue (eviction order)       │    │
//! │                     └──────────────────────────────────────────────┘    │
//! │                                               ▲                         │
//! │                     ┌─────────────────────────┴───────────────────────┐ │
//! │                     │           ExpirySweeper                         │ │
//! │                     │      (Background Tokio Task)                    │ │
//! │                     └─────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use cachedkv::config::Config;
//! use cachedkv::connection::ConnectionStats;
//! use cachedkv::server::Server;
//! use cachedkv::storage::{start_expiry_sweeper, Store};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let config = Config::default();
//!     let store = Arc::new(Store::new(config.hash_power, config.memory_limit));
//!     let _sweeper = start_expiry_sweeper(Arc::clone(&store));
//!
//!     let stats = Arc::new(ConnectionStats::new());
//!     let server = Server::bind(&config, store, stats).await?;
//!     server
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: command table, response encoding and the incremental parser
//! - [`storage`]: the concurrent store, recency queue and expiry sweeper
//! - [`commands`]: executes parsed commands against the store
//! - [`connection`]: per-connection state machine
//! - [`server`]: dispatcher and worker threads
//! - [`config`]: settings from flags and environment
//!
//! ## Design Highlights
//!
//! ### Lock Discipline
//!
//! A lookup returns an [`storage::ItemRef`] that owns its bucket's lock. The
//! lock is released when the handle is dropped, so every exit path of a
//! command releases it exactly once. The recency queue lock is only ever
//! taken while holding at most one bucket lock, never the other way round.
//!
//! ### Bounded Memory
//!
//! Items with a finite expiry are tracked in the recency queue by size. Once
//! the tracked total passes the memory limit, the least recently used items
//! are evicted.

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use config::{Config, ConfigError};
pub use connection::{handle_connection, Connection, ConnectionStats};
pub use protocol::{Command, CommandKind, CommandParser, ParseError, Response};
pub use server::Server;
pub use storage::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper, Store};

/// The default port cachedkv listens on
pub const DEFAULT_PORT: u16 = 23333;

/// The default host cachedkv binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of cachedkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
