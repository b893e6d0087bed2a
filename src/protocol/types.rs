//! Text Protocol Types
//!
//! This module defines the commands the server understands and the response
//! lines it writes back. Every line on the wire ends with CRLF (`\r\n`).
//!
//! ## Requests
//!
//! ```text
//! get <key> [<key> ...]\r\n
//! gets <key> [<key> ...]\r\n
//! delete <key> [<key> ...]\r\n
//! <set|add|replace|append|prepend> <key> <flags> <exptime> <bytes>\r\n<payload>\r\n
//! cas <key> <flags> <exptime> <bytes> <cas_version>\r\n<payload>\r\n
//! ```
//!
//! ## Responses
//!
//! `STORED`, `NOT_STORED`, `EXISTS`, `NOT_FOUND`, `ERROR`, `DELETED <key>`,
//! and for retrievals one `VALUE <key> <flags> <bytes>[ <cas>]` block per hit
//! followed by `END`.

use bytes::{BufMut, Bytes};
use std::fmt;

/// The CRLF terminator used by the protocol
pub const CRLF: &[u8] = b"\r\n";

/// Longest command keyword in [`COMMAND_TABLE`] ("prepend")
pub const MAX_COMMAND_NAME_LEN: usize = 7;

/// The kinds of command the parser accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Set,
    Add,
    Replace,
    Append,
    Prepend,
    Cas,
    Get,
    Gets,
    Delete,
}

/// Keyword to command mapping consulted by the parser.
pub const COMMAND_TABLE: &[(&str, CommandKind)] = &[
    ("set", CommandKind::Set),
    ("add", CommandKind::Add),
    ("replace", CommandKind::Replace),
    ("append", CommandKind::Append),
    ("prepend", CommandKind::Prepend),
    ("cas", CommandKind::Cas),
    ("get", CommandKind::Get),
    ("gets", CommandKind::Gets),
    ("delete", CommandKind::Delete),
];

impl CommandKind {
    /// Looks up a keyword. Matching is exact and case-sensitive.
    pub fn lookup(name: &[u8]) -> Option<Self> {
        COMMAND_TABLE
            .iter()
            .find(|(keyword, _)| keyword.as_bytes() == name)
            .map(|&(_, kind)| kind)
    }

    /// The wire keyword for this command.
    pub fn name(&self) -> &'static str {
        COMMAND_TABLE
            .iter()
            .find(|(_, kind)| kind == self)
            .map(|&(keyword, _)| keyword)
            .unwrap_or("unknown")
    }

    /// `get` and `gets`.
    #[inline]
    pub fn is_retrieval(&self) -> bool {
        matches!(self, CommandKind::Get | CommandKind::Gets)
    }

    /// Commands whose line is just a list of keys, with no payload.
    #[inline]
    pub fn takes_key_list(&self) -> bool {
        matches!(
            self,
            CommandKind::Get | CommandKind::Gets | CommandKind::Delete
        )
    }

    /// Commands that carry flags, exptime, a length and a payload.
    #[inline]
    pub fn is_storage(&self) -> bool {
        !self.takes_key_list()
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fully parsed command, borrowing the parser's buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command<'a> {
    pub kind: CommandKind,
    /// One or more keys; storage commands carry exactly one
    pub keys: &'a [Bytes],
    pub flags: u32,
    pub exptime: u32,
    /// Expected version, only meaningful for `cas`
    pub cas: u64,
    /// The data block, empty for key-list commands
    pub payload: &'a [u8],
}

impl Command<'_> {
    /// The first (for storage commands, the only) key.
    pub fn key(&self) -> &[u8] {
        self.keys.first().map(|k| k.as_ref()).unwrap_or_default()
    }
}

/// A response written back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response<'a> {
    Stored,
    NotStored,
    Exists,
    NotFound,
    Error,
    /// `DELETED <key>`
    Deleted(&'a [u8]),
    /// Header of one retrieval block, followed by the data and CRLF
    Value {
        key: &'a [u8],
        flags: u32,
        data: &'a [u8],
        cas: Option<u64>,
    },
    End,
}

impl Response<'_> {
    /// Serializes the response to bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the response into an existing buffer.
    pub fn serialize_into<B: BufMut>(&self, buf: &mut B) {
        match self {
            Response::Stored => buf.put_slice(b"STORED"),
            Response::NotStored => buf.put_slice(b"NOT_STORED"),
            Response::Exists => buf.put_slice(b"EXISTS"),
            Response::NotFound => buf.put_slice(b"NOT_FOUND"),
            Response::Error => buf.put_slice(b"ERROR"),
            Response::End => buf.put_slice(b"END"),
            Response::Deleted(key) => {
                buf.put_slice(b"DELETED ");
                buf.put_slice(key);
            }
            Response::Value {
                key,
                flags,
                data,
                cas,
            } => {
                buf.put_slice(b"VALUE ");
                buf.put_slice(key);
                buf.put_u8(b' ');
                buf.put_slice(flags.to_string().as_bytes());
                buf.put_u8(b' ');
                buf.put_slice(data.len().to_string().as_bytes());
                if let Some(cas) = cas {
                    buf.put_u8(b' ');
                    buf.put_slice(cas.to_string().as_bytes());
                }
                buf.put_slice(CRLF);
                buf.put_slice(data);
            }
        }
        buf.put_slice(CRLF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_every_keyword() {
        for (keyword, kind) in COMMAND_TABLE {
            assert_eq!(CommandKind::lookup(keyword.as_bytes()), Some(*kind));
            assert_eq!(kind.name(), *keyword);
            assert!(keyword.len() <= MAX_COMMAND_NAME_LEN);
        }
    }

    #[test]
    fn test_lookup_unknown() {
        assert_eq!(CommandKind::lookup(b"incr"), None);
        assert_eq!(CommandKind::lookup(b"GET"), None);
        assert_eq!(CommandKind::lookup(b"ge"), None);
        assert_eq!(CommandKind::lookup(b""), None);
    }

    #[test]
    fn test_command_classes() {
        assert!(CommandKind::Get.is_retrieval());
        assert!(CommandKind::Delete.takes_key_list());
        assert!(!CommandKind::Delete.is_retrieval());
        assert!(CommandKind::Cas.is_storage());
        assert!(CommandKind::Prepend.is_storage());
    }

    #[test]
    fn test_simple_responses() {
        assert_eq!(Response::Stored.serialize(), b"STORED\r\n");
        assert_eq!(Response::NotStored.serialize(), b"NOT_STORED\r\n");
        assert_eq!(Response::Exists.serialize(), b"EXISTS\r\n");
        assert_eq!(Response::NotFound.serialize(), b"NOT_FOUND\r\n");
        assert_eq!(Response::Error.serialize(), b"ERROR\r\n");
        assert_eq!(Response::End.serialize(), b"END\r\n");
        assert_eq!(Response::Deleted(b"foo").serialize(), b"DELETED foo\r\n");
    }

    #[test]
    fn test_value_block() {
        let value = Response::Value {
            key: b"foo",
            flags: 0,
            data: b"bar",
            cas: None,
        };
        assert_eq!(value.serialize(), b"VALUE foo 0 3\r\nbar\r\n");

        let with_cas = Response::Value {
            key: b"foo",
            flags: 42,
            data: b"bar",
            cas: Some(7),
        };
        assert_eq!(with_cas.serialize(), b"VALUE foo 42 3 7\r\nbar\r\n");
    }

    #[test]
    fn test_serialize_into_bytes_mut() {
        let mut buf = bytes::BytesMut::new();
        Response::Stored.serialize_into(&mut buf);
        Response::End.serialize_into(&mut buf);
        assert_eq!(&buf[..], b"STORED\r\nEND\r\n");
    }
}
