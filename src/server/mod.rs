//! Server Module
//!
//! Wires the listening socket to a fixed pool of worker threads.
//!
//! ## Architecture
//!
//! ```text
//!                  ┌──────────────────────┐
//!   accept() ────> │      Dispatcher      │  (main runtime)
//!                  └──────────┬───────────┘
//!                             │ round-robin handoff (mpsc)
//!            ┌────────────────┼────────────────┐
//!            ▼                ▼                ▼
//!     ┌────────────┐   ┌────────────┐   ┌────────────┐
//!     │  Worker 0  │   │  Worker 1  │   │  Worker N  │
//!     │ LocalSet + │   │ LocalSet + │   │ LocalSet + │
//!     │ 1-thread rt│   │ 1-thread rt│   │ 1-thread rt│
//!     └─────┬──────┘   └─────┬──────┘   └─────┬──────┘
//!           └────────────────┼────────────────┘
//!                            ▼
//!                    Arc<Store> (shared)
//! ```

pub mod dispatcher;
pub mod worker;

pub use dispatcher::Dispatcher;
pub use worker::{Handoff, Worker, WorkerContext};

use crate::config::Config;
use crate::connection::ConnectionStats;
use crate::storage::Store;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// A bound server: dispatcher plus running workers.
#[derive(Debug)]
pub struct Server {
    dispatcher: Dispatcher,
}

impl Server {
    /// Starts the workers and binds the listener described by `config`.
    pub async fn bind(
        config: &Config,
        store: Arc<Store>,
        stats: Arc<ConnectionStats>,
    ) -> io::Result<Self> {
        let context = WorkerContext {
            store,
            stats,
            connection: config.connection_config(),
        };

        let workers = (0..config.workers)
            .map(|id| Worker::spawn(id, context.clone()))
            .collect::<io::Result<Vec<_>>>()?;

        let dispatcher = Dispatcher::bind(config.bind_address(), workers).await?;
        Ok(Self { dispatcher })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.dispatcher.local_addr()
    }

    /// Serves until `shutdown` completes, then joins the workers.
    pub async fn run_until<F: Future<Output = ()>>(mut self, shutdown: F) -> io::Result<()> {
        let result = tokio::select! {
            result = self.dispatcher.run() => result,
            _ = shutdown => {
                info!("Shutdown signal received, stopping server...");
                Ok(())
            }
        };

        let dispatcher = self.dispatcher;
        tokio::task::spawn_blocking(move || dispatcher.shutdown())
            .await
            .map_err(io::Error::other)?;

        result
    }
}
