//! Connection Dispatcher
//!
//! Accepts connections on the listening socket and hands them to the workers
//! in round-robin order.

use crate::server::worker::Worker;
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{error, info, trace, warn};

/// The accept loop plus the workers it feeds.
#[derive(Debug)]
pub struct Dispatcher {
    listener: TcpListener,
    workers: Vec<Worker>,
    last_worker: usize,
}

impl Dispatcher {
    /// Binds the listening socket. `workers` must not be empty.
    pub async fn bind<A: ToSocketAddrs>(addr: A, workers: Vec<Worker>) -> io::Result<Self> {
        if workers.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "dispatcher needs at least one worker",
            ));
        }

        let listener = TcpListener::bind(addr).await?;
        info!(
            addr = %listener.local_addr()?,
            workers = workers.len(),
            "Listening for connections"
        );

        Ok(Self {
            listener,
            workers,
            last_worker: 0,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever. Returns only if no worker is left.
    pub async fn run(&mut self) -> io::Result<()> {
        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let stream = match stream.into_std() {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(client = %addr, error = %e, "Failed to detach accepted socket");
                    continue;
                }
            };

            self.dispatch(stream, addr)?;
        }
    }

    /// Hands the socket to the next worker, skipping workers that stopped.
    fn dispatch(&mut self, stream: std::net::TcpStream, addr: SocketAddr) -> io::Result<()> {
        let mut handoff = (stream, addr);

        for _ in 0..self.workers.len() {
            self.last_worker = (self.last_worker + 1) % self.workers.len();
            let worker = &self.workers[self.last_worker];

            match worker.dispatch(handoff.0, handoff.1) {
                Ok(()) => {
                    trace!(client = %addr, worker = worker.id(), "Dispatched connection");
                    return Ok(());
                }
                Err(returned) => {
                    warn!(worker = worker.id(), "Worker is not accepting connections");
                    handoff = returned;
                }
            }
        }

        Err(io::Error::other("no worker is running"))
    }

    /// Stops accepting and joins every worker thread.
    pub fn shutdown(self) {
        let Dispatcher {
            listener, workers, ..
        } = self;
        drop(listener);

        for worker in workers {
            worker.join();
        }
    }
}
