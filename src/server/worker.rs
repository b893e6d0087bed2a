//! Worker Threads
//!
//! Each worker is an OS thread running its own single-threaded tokio runtime.
//! Accepted sockets arrive over an unbounded channel; every connection is
//! spawned as a local task, so its state never leaves the worker thread.

use crate::commands::CommandHandler;
use crate::connection::{handle_connection, ConnectionConfig, ConnectionStats};
use crate::storage::Store;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::LocalSet;
use tracing::{debug, error, info, warn};

/// A socket handed from the dispatcher to a worker.
pub type Handoff = (std::net::TcpStream, SocketAddr);

/// State shared by every worker.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub store: Arc<Store>,
    pub stats: Arc<ConnectionStats>,
    pub connection: ConnectionConfig,
}

/// Handle to a running worker thread.
#[derive(Debug)]
pub struct Worker {
    id: usize,
    sender: mpsc::UnboundedSender<Handoff>,
    thread: JoinHandle<()>,
}

impl Worker {
    /// Starts worker `id` on a new thread.
    pub fn spawn(id: usize, context: WorkerContext) -> io::Result<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();

        let thread = std::thread::Builder::new()
            .name(format!("cachedkv-worker-{}", id))
            .spawn(move || run_worker(id, context, receiver))?;

        Ok(Self { id, sender, thread })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Queues a socket for this worker. Gives the socket back if the worker
    /// has stopped.
    pub fn dispatch(&self, stream: std::net::TcpStream, addr: SocketAddr) -> Result<(), Handoff> {
        self.sender.send((stream, addr)).map_err(|e| e.0)
    }

    /// Closes the handoff channel and waits for the thread to finish. Open
    /// connections on this worker are dropped.
    pub fn join(self) {
        let Worker { id, sender, thread } = self;
        drop(sender);
        if thread.join().is_err() {
            error!(worker = id, "Worker thread panicked");
        }
    }
}

fn run_worker(id: usize, context: WorkerContext, receiver: mpsc::UnboundedReceiver<Handoff>) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(worker = id, error = %e, "Failed to build worker runtime");
            return;
        }
    };

    let local = LocalSet::new();
    local.block_on(&runtime, accept_handoffs(id, context, receiver));
    info!(worker = id, "Worker stopped");
}

async fn accept_handoffs(
    id: usize,
    context: WorkerContext,
    mut receiver: mpsc::UnboundedReceiver<Handoff>,
) {
    debug!(worker = id, "Worker started");

    while let Some((stream, addr)) = receiver.recv().await {
        let stream = match stream
            .set_nonblocking(true)
            .and_then(|()| TcpStream::from_std(stream))
        {
            Ok(stream) => stream,
            Err(e) => {
                warn!(worker = id, client = %addr, error = %e, "Failed to register socket");
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(worker = id, client = %addr, error = %e, "Could not set TCP_NODELAY");
        }

        debug!(worker = id, client = %addr, "Connection assigned");
        let handler = CommandHandler::new(Arc::clone(&context.store));
        tokio::task::spawn_local(handle_connection(
            stream,
            addr,
            handler,
            Arc::clone(&context.stats),
            context.connection.clone(),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DEFAULT_MEMORY_LIMIT;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::time::Duration;

    fn context() -> WorkerContext {
        WorkerContext {
            store: Arc::new(Store::new(4, DEFAULT_MEMORY_LIMIT)),
            stats: Arc::new(ConnectionStats::new()),
            connection: ConnectionConfig::default(),
        }
    }

    #[test]
    fn test_worker_serves_handed_off_socket() {
        let context = context();
        let store = Arc::clone(&context.store);
        let worker = Worker::spawn(0, context).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server_side, addr) = listener.accept().unwrap();
        worker.dispatch(server_side, addr).unwrap();

        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        client.write_all(b"set k 0 0 2\r\nhi\r\n").unwrap();
        let mut buf = [0u8; 8];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"STORED\r\n");
        assert_eq!(store.len(), 1);

        worker.join();
    }

    #[test]
    fn test_join_closes_connections() {
        let worker = Worker::spawn(1, context()).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server_side, addr) = listener.accept().unwrap();
        worker.dispatch(server_side, addr).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        worker.join();

        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(client.read(&mut buf).unwrap_or(0), 0);
    }
}
