//! Command Execution Module
//!
//! Receives commands from the parser, runs them against the store and writes
//! the protocol replies.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ CommandParser   │  (protocol module)
//! └────────┬────────┘
//!          │ Command
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! └────────┬────────┘
//!          │ find / insert / ItemRef
//!          ▼
//! ┌─────────────────┐
//! │ Store           │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - Retrieval: `get`, `gets`
//! - Storage: `set`, `add`, `replace`, `append`, `prepend`, `cas`
//! - Removal: `delete`

pub mod handler;

pub use handler::CommandHandler;
