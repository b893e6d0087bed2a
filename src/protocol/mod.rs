//! Text Protocol Implementation
//!
//! This module implements the line-oriented memcached-style text protocol:
//! the command table, the response encoder and the incremental parser.
//!
//! ## Modules
//!
//! - `types`: command kinds, the parsed `Command` and `Response` encoding
//! - `parser`: resumable state-machine parser for incoming bytes
//!
//! ## Example
//!
//! ```
//! use cachedkv::protocol::{CommandKind, CommandParser, Response};
//!
//! let mut parser = CommandParser::default();
//!
//! // Bytes may arrive in any number of fragments
//! let first = parser.advance(b"set greeting 0 0 5\r\nhel").unwrap();
//! assert!(!first.complete);
//! let second = parser.advance(b"lo\r\n").unwrap();
//! assert!(second.complete);
//!
//! let cmd = parser.command().unwrap();
//! assert_eq!(cmd.kind, CommandKind::Set);
//! assert_eq!(cmd.payload, b"hello");
//!
//! assert_eq!(Response::Stored.serialize(), b"STORED\r\n");
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{
    CommandParser, ParseError, ParseResult, ParseState, ParserLimits, Progress,
    DEFAULT_MAX_ITEM_SIZE, DEFAULT_MAX_KEYS, DEFAULT_MAX_KEY_LEN,
};
pub use types::{Command, CommandKind, Response, COMMAND_TABLE, CRLF};
