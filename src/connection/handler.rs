//! Connection Handler Module
//!
//! This module drives individual client connections. Each connection is a
//! small state machine that is run ("driven") whenever its socket is ready,
//! does as much work as it can without blocking, and then tells the caller
//! what to wait for next.
//!
//! ## Connection Lifecycle
//!
//! ```text
//!                 ┌──────────────────────────────────────────┐
//!                 ▼                                          │
//! ┌─────────────────────────┐  buffered bytes   ┌─────────────────────┐
//! │      WaitCommand        │──────────────────>│    ParseCommand     │
//! │ (budget, backpressure)  │                   │ (resumable parser)  │
//! └───────────┬─────────────┘                   └──┬───────────────┬──┘
//!             │ buffer empty                       │ incomplete    │ complete
//!             ▼                                    ▼               ▼
//! ┌─────────────────────────┐<─────────────────────┘     ┌─────────────────┐
//! │     ReadIntoBuffer      │                            │     Execute     │
//! │ (flush, then read)      │─── would block ──> Read    └────────┬────────┘
//! └─────────────────────────┘                                     │
//!                                                    back to WaitCommand
//!
//! Protocol error / EOF / I/O error ──> Closed
//! ```
//!
//! ## Buffer Management
//!
//! Incoming bytes accumulate in a `BytesMut` read buffer that starts at the
//! configured size and doubles at most four times per read round. Replies go
//! to a `BytesMut` write buffer which is flushed with non-blocking writes;
//! while too much output is pending, no new commands are executed.

use crate::commands::CommandHandler;
use crate::protocol::{CommandParser, ParseError, ParserLimits, Response};
use bytes::{Buf, BytesMut};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Commands executed per [`Connection::drive`] call before yielding.
pub const REQUEST_BUDGET: usize = 25;

/// Initial read buffer capacity
pub const DEFAULT_READ_BUFFER_SIZE: usize = 2048;

/// Largest the read buffer may grow to (64 KB)
pub const DEFAULT_MAX_READ_BUFFER: usize = 64 * 1024;

/// Pending output above which command execution pauses (4 MB)
pub const DEFAULT_MAX_PENDING_OUTPUT: usize = 4 * 1024 * 1024;

/// Read buffer doublings allowed per read round
const MAX_READ_REALLOCS: usize = 4;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Connections closed because of malformed input
    pub protocol_errors: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Per-connection limits and timeouts.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub read_buffer_size: usize,
    pub max_read_buffer: usize,
    pub max_pending_output: usize,
    pub request_budget: usize,
    /// Close connections that see no readiness for this long
    pub idle_timeout: Option<Duration>,
    pub parser: ParserLimits,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_read_buffer: DEFAULT_MAX_READ_BUFFER,
            max_pending_output: DEFAULT_MAX_PENDING_OUTPUT,
            request_budget: REQUEST_BUDGET,
            idle_timeout: None,
            parser: ParserLimits::default(),
        }
    }
}

/// Non-blocking byte transport underneath a [`Connection`].
///
/// Both methods return `ErrorKind::WouldBlock` when no progress is possible.
pub trait Transport {
    /// Reads into the spare capacity of `buf`. `Ok(0)` means end of stream.
    fn try_read_buf(&mut self, buf: &mut BytesMut) -> io::Result<usize>;

    /// Writes a prefix of `data`, returning how much was written.
    fn try_write(&mut self, data: &[u8]) -> io::Result<usize>;
}

impl Transport for TcpStream {
    fn try_read_buf(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        TcpStream::try_read_buf(self, buf)
    }

    fn try_write(&mut self, data: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, data)
    }
}

/// What the connection needs before it can make progress again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    /// Wait until the socket is readable
    Read,
    /// Wait until the socket is writable
    Write,
    /// Request budget used up; reschedule behind other connections
    Yield,
    /// The connection is finished
    Close,
}

/// Connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    WaitCommand,
    ReadIntoBuffer,
    ParseCommand,
    Execute,
    Closed,
}

/// Outcome of one read round.
enum ReadOutcome {
    Data,
    WouldBlock,
}

/// The state of one client connection.
pub struct Connection {
    peer: SocketAddr,
    state: ConnState,
    rbuf: BytesMut,
    wbuf: BytesMut,
    parser: CommandParser,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    config: ConnectionConfig,
}

impl Connection {
    /// Creates the state for a freshly accepted connection.
    pub fn new(
        peer: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
        config: ConnectionConfig,
    ) -> Self {
        stats.connection_opened();

        Self {
            peer,
            state: ConnState::WaitCommand,
            rbuf: BytesMut::with_capacity(config.read_buffer_size),
            wbuf: BytesMut::new(),
            parser: CommandParser::new(config.parser),
            command_handler,
            stats,
            config,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Bytes of output not yet written to the transport.
    pub fn pending_output(&self) -> usize {
        self.wbuf.len()
    }

    /// Runs the state machine until it cannot make progress.
    ///
    /// Executes at most `request_budget` commands per call. Errors are fatal;
    /// the connection is left in [`ConnState::Closed`].
    pub fn drive<T: Transport>(&mut self, io: &mut T) -> Result<Interest, ConnectionError> {
        let result = self.drive_inner(io);
        if result.is_err() {
            self.state = ConnState::Closed;
        }
        result
    }

    fn drive_inner<T: Transport>(&mut self, io: &mut T) -> Result<Interest, ConnectionError> {
        let mut budget = self.config.request_budget;

        loop {
            match self.state {
                ConnState::WaitCommand => {
                    if self.wbuf.len() > self.config.max_pending_output {
                        self.flush(io)?;
                        if self.wbuf.len() > self.config.max_pending_output {
                            trace!(client = %self.peer, pending = self.wbuf.len(), "Output backpressure");
                            return Ok(Interest::Write);
                        }
                    }

                    if budget == 0 {
                        return Ok(if self.flush(io)? {
                            Interest::Yield
                        } else {
                            Interest::Write
                        });
                    }

                    self.state = if self.rbuf.is_empty() {
                        ConnState::ReadIntoBuffer
                    } else {
                        ConnState::ParseCommand
                    };
                }
                ConnState::ReadIntoBuffer => {
                    // Replies go out before waiting for more requests
                    if !self.flush(io)? {
                        return Ok(Interest::Write);
                    }

                    match self.read(io)? {
                        ReadOutcome::Data => self.state = ConnState::ParseCommand,
                        ReadOutcome::WouldBlock => return Ok(Interest::Read),
                    }
                }
                ConnState::ParseCommand => {
                    let progress = match self.parser.advance(&self.rbuf) {
                        Ok(progress) => progress,
                        Err(e) => return Err(self.protocol_error(io, e)),
                    };
                    self.rbuf.advance(progress.consumed);

                    self.state = if progress.complete {
                        ConnState::Execute
                    } else {
                        ConnState::ReadIntoBuffer
                    };
                }
                ConnState::Execute => {
                    if let Some(command) = self.parser.command() {
                        self.command_handler.execute(&command, &mut self.wbuf);
                    }
                    self.parser.reset();
                    self.stats.command_processed();
                    budget -= 1;
                    self.state = ConnState::WaitCommand;
                }
                ConnState::Closed => return Ok(Interest::Close),
            }
        }
    }

    /// Reads whatever the transport has, growing the buffer as needed.
    fn read<T: Transport>(&mut self, io: &mut T) -> Result<ReadOutcome, ConnectionError> {
        let mut reallocs = 0;
        let mut total = 0;

        loop {
            if self.rbuf.len() == self.rbuf.capacity() {
                if reallocs == MAX_READ_REALLOCS {
                    break;
                }
                self.grow_read_buffer()?;
                reallocs += 1;
            }

            match io.try_read_buf(&mut self.rbuf) {
                Ok(0) => {
                    if total > 0 {
                        break;
                    }
                    return Err(if self.rbuf.is_empty() && self.parser.is_idle() {
                        ConnectionError::ClientDisconnected
                    } else {
                        ConnectionError::UnexpectedEof
                    });
                }
                Ok(n) => {
                    total += n;
                    self.stats.bytes_read(n);
                    // A short read means the socket is drained
                    if self.rbuf.len() < self.rbuf.capacity() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if total == 0 {
            return Ok(ReadOutcome::WouldBlock);
        }
        trace!(client = %self.peer, bytes = total, buffered = self.rbuf.len(), "Read data");
        Ok(ReadOutcome::Data)
    }

    fn grow_read_buffer(&mut self) -> Result<(), ConnectionError> {
        let len = self.rbuf.len();
        if len >= self.config.max_read_buffer {
            warn!(client = %self.peer, size = len, "Read buffer limit exceeded");
            return Err(ConnectionError::BufferFull);
        }

        let target = (len * 2)
            .max(self.config.read_buffer_size)
            .min(self.config.max_read_buffer);
        self.rbuf.reserve(target - len);
        Ok(())
    }

    /// Writes pending output. Returns true once everything is written.
    fn flush<T: Transport>(&mut self, io: &mut T) -> Result<bool, ConnectionError> {
        while !self.wbuf.is_empty() {
            match io.try_write(&self.wbuf) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => {
                    self.wbuf.advance(n);
                    self.stats.bytes_written(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    /// Sends a best-effort `ERROR` line before the connection is torn down.
    fn protocol_error<T: Transport>(&mut self, io: &mut T, e: ParseError) -> ConnectionError {
        warn!(client = %self.peer, error = %e, "Protocol error");
        self.stats.protocol_error();
        Response::Error.serialize_into(&mut self.wbuf);
        let _ = self.flush(io);
        ConnectionError::Parse(e)
    }

    /// Drives the connection over a tokio socket until it closes.
    pub async fn run(mut self, mut stream: TcpStream) -> Result<(), ConnectionError> {
        debug!(client = %self.peer, "Client connected");

        let result = self.event_loop(&mut stream).await;

        match &result {
            Ok(()) => debug!(client = %self.peer, "Connection closed"),
            Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.peer, "Client disconnected")
            }
            Err(ConnectionError::Io(io_err))
                if io_err.kind() == io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.peer, "Connection reset by client")
            }
            Err(ConnectionError::IdleTimeout) => {
                info!(client = %self.peer, "Closing idle connection")
            }
            Err(e) => warn!(client = %self.peer, error = %e, "Connection error"),
        }

        result
    }

    async fn event_loop(&mut self, stream: &mut TcpStream) -> Result<(), ConnectionError> {
        loop {
            match self.drive(stream)? {
                Interest::Read => self.wait(stream.readable()).await?,
                Interest::Write => self.wait(stream.writable()).await?,
                Interest::Yield => tokio::task::yield_now().await,
                Interest::Close => return Ok(()),
            }
        }
    }

    async fn wait<F>(&self, ready: F) -> Result<(), ConnectionError>
    where
        F: std::future::Future<Output = io::Result<()>>,
    {
        match self.config.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, ready)
                .await
                .map_err(|_| ConnectionError::IdleTimeout)?
                .map_err(ConnectionError::from),
            None => ready.await.map_err(ConnectionError::from),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.stats.connection_closed();
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed request
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial command)
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// Buffer size limit exceeded
    #[error("Buffer size limit exceeded")]
    BufferFull,

    /// No socket activity within the idle timeout
    #[error("Idle timeout")]
    IdleTimeout,
}

/// Handles a client connection.
///
/// Creates a [`Connection`] and runs it to completion. Errors are logged, not
/// returned.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    config: ConnectionConfig,
) {
    let connection = Connection::new(addr, command_handler, stats, config);
    if let Err(e) = connection.run(stream).await {
        trace!(client = %addr, error = %e, "Connection ended with error");
    }
}
