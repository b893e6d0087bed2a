//! Connection Handler Module
//!
//! This module manages individual client connections. Every connection is an
//! explicit state machine ([`Connection`]) that is driven whenever its socket
//! becomes ready and reports back what it is waiting for ([`Interest`]).
//! Connections belong to exactly one worker and never move between threads.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Worker event loop                        │
//! │                  (server::worker)                           │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ drive(&mut socket)
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Connection                              │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ Read bytes  │───>│ Parse (sus- │───>│ Execute cmd │      │
//! │  │ (BytesMut)  │    │ pend/resume)│    │             │      │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘      │
//! │                                               ▼             │
//! │                                      ┌─────────────┐        │
//! │                                      │ Write buffer│        │
//! │                                      └─────────────┘        │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ Interest::{Read, Write, Yield, Close}
//!                        ▼
//!                 await readiness
//! ```
//!
//! ## Features
//!
//! - **Incremental parsing**: partial commands survive across reads
//! - **Pipelining**: several commands in one read are executed in order
//! - **Fairness**: at most 25 commands per drive before yielding
//! - **Backpressure**: execution pauses while too much output is pending
//! - **Statistics**: tracks connection and command metrics

pub mod handler;

// Re-export commonly used types
pub use handler::{
    handle_connection, ConnState, Connection, ConnectionConfig, ConnectionError, ConnectionStats,
    Interest, Transport, DEFAULT_MAX_PENDING_OUTPUT, DEFAULT_MAX_READ_BUFFER,
    DEFAULT_READ_BUFFER_SIZE, REQUEST_BUDGET,
};
