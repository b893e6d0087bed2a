//! Incremental Command Parser
//!
//! Commands arrive over a byte stream in arbitrary fragments. The parser is an
//! explicit state machine that consumes whatever bytes are available, keeps
//! every partially parsed field in its own state, and picks up exactly where
//! it stopped when more bytes arrive. Nothing is ever re-parsed.
//!
//! ## States
//!
//! ```text
//!  CommandName ─> SwallowSpace ─> Key ─┬─> SwallowSpace ─> Key ...      (get/gets/delete)
//!                                      │        └─> SwallowNewline ─> Success
//!                                      │
//!                                      └─> SwallowSpace ─> Flags ─> SwallowSpace ─> Expiry
//!                                            ─> SwallowSpace ─> ItemSize [─> SwallowSpace ─> CasVersion]
//!                                            ─> SwallowSpace ─> SwallowNewline ─> ItemPayload
//!                                            ─> SwallowNewline ─> Success
//! ```
//!
//! ## How the Parser Works
//!
//! [`CommandParser::advance`] returns a [`Progress`]:
//! - `complete == true` - a command is ready; read it with [`CommandParser::command`]
//!   and call [`CommandParser::reset`] before parsing the next one
//! - `complete == false` - every offered byte was used up, feed more
//! - `Err(ParseError)` - the stream is malformed; the connection cannot
//!   resynchronize and must be closed
//!
//! In both `Ok` cases `consumed` says how many bytes of the input were used.

use crate::protocol::types::{Command, CommandKind, MAX_COMMAND_NAME_LEN};
use bytes::Bytes;
use thiserror::Error;

/// Default maximum key length in bytes (same as memcached).
pub const DEFAULT_MAX_KEY_LEN: usize = 250;

/// Default maximum payload size (1 MiB).
pub const DEFAULT_MAX_ITEM_SIZE: usize = 1024 * 1024;

/// Default maximum number of keys on one `get`/`gets`/`delete` line.
pub const DEFAULT_MAX_KEYS: usize = 1024;

/// Payload buffers larger than this are released after each command instead
/// of being kept for reuse.
const PAYLOAD_RETAIN_LIMIT: usize = 64 * 1024;

/// Longest decimal representation of a u64.
const MAX_DIGITS: usize = 20;

/// Errors that can occur during command parsing. All of them are fatal for
/// the connection.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// The command keyword is not in the command table
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),

    /// The line ended before a required field
    #[error("missing {0}")]
    MissingField(&'static str),

    /// Key longer than the configured maximum
    #[error("key too long (max: {max} bytes)")]
    KeyTooLong { max: usize },

    /// More keys on one line than the configured maximum
    #[error("too many keys (max: {max})")]
    TooManyKeys { max: usize },

    /// Control character inside a key
    #[error("invalid key byte: {0:#04x}")]
    InvalidKeyByte(u8),

    /// A numeric field is malformed or out of range
    #[error("invalid number in {0} field")]
    InvalidNumber(&'static str),

    /// Declared payload length above the configured maximum
    #[error("item too large: {size} bytes (max: {max})")]
    ItemTooLarge { size: u64, max: usize },

    /// Something other than CRLF where a line must end
    #[error("expected CRLF, found {0:#04x}")]
    ExpectedCrlf(u8),

    /// The payload is not followed by CRLF at its declared length
    #[error("data block not terminated by CRLF")]
    UnterminatedPayload,
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Size limits enforced while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserLimits {
    pub max_key_len: usize,
    pub max_item_size: usize,
    /// Keys retained for a single key-list command
    pub max_keys: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_key_len: DEFAULT_MAX_KEY_LEN,
            max_item_size: DEFAULT_MAX_ITEM_SIZE,
            max_keys: DEFAULT_MAX_KEYS,
        }
    }
}

/// Parser sub-states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    CommandName,
    Key,
    Flags,
    Expiry,
    CasVersion,
    ItemSize,
    ItemPayload,
    SwallowSpace,
    SwallowNewline,
    Success,
}

/// Outcome of one [`CommandParser::advance`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Bytes of the input that were used
    pub consumed: usize,
    /// Whether a full command is now available
    pub complete: bool,
}

/// What a state handler did.
enum Step {
    /// Moved to another state; keep going
    Next,
    /// Ran out of input
    NeedMore,
}

/// A resumable parser for one connection.
#[derive(Debug)]
pub struct CommandParser {
    limits: ParserLimits,

    state: ParseState,
    /// Where `SwallowSpace` goes once the spaces are gone
    after_space: ParseState,
    /// Where `SwallowNewline` goes once CRLF is consumed
    after_newline: ParseState,

    name: Vec<u8>,
    kind: Option<CommandKind>,
    keys: Vec<Bytes>,
    key_buf: Vec<u8>,
    numbuf: Vec<u8>,

    flags: u32,
    exptime: u32,
    cas: u64,
    item_size: usize,
    payload: Vec<u8>,
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new(ParserLimits::default())
    }
}

impl CommandParser {
    /// Creates a parser enforcing `limits`.
    pub fn new(limits: ParserLimits) -> Self {
        Self {
            limits,
            state: ParseState::CommandName,
            after_space: ParseState::Key,
            after_newline: ParseState::Success,
            name: Vec::with_capacity(MAX_COMMAND_NAME_LEN + 1),
            kind: None,
            keys: Vec::new(),
            key_buf: Vec::new(),
            numbuf: Vec::with_capacity(MAX_DIGITS + 1),
            flags: 0,
            exptime: 0,
            cas: 0,
            item_size: 0,
            payload: Vec::new(),
        }
    }

    /// The current sub-state.
    pub fn state(&self) -> ParseState {
        self.state
    }

    /// True if nothing of the next command has been seen yet.
    pub fn is_idle(&self) -> bool {
        self.state == ParseState::CommandName && self.name.is_empty()
    }

    /// Consumes as much of `input` as possible.
    pub fn advance(&mut self, input: &[u8]) -> ParseResult<Progress> {
        let mut pos = 0;

        loop {
            let step = match self.state {
                ParseState::Success => {
                    return Ok(Progress {
                        consumed: pos,
                        complete: true,
                    })
                }
                ParseState::CommandName => self.parse_name(input, &mut pos)?,
                ParseState::Key => self.parse_key(input, &mut pos)?,
                ParseState::Flags => self.parse_flags(input, &mut pos)?,
                ParseState::Expiry => self.parse_expiry(input, &mut pos)?,
                ParseState::ItemSize => self.parse_item_size(input, &mut pos)?,
                ParseState::CasVersion => self.parse_cas(input, &mut pos)?,
                ParseState::ItemPayload => self.parse_payload(input, &mut pos),
                ParseState::SwallowSpace => self.swallow_space(input, &mut pos),
                ParseState::SwallowNewline => self.swallow_newline(input, &mut pos)?,
            };

            if let Step::NeedMore = step {
                return Ok(Progress {
                    consumed: pos,
                    complete: false,
                });
            }
        }
    }

    /// The parsed command, once [`advance`](Self::advance) reported completion.
    pub fn command(&self) -> Option<Command<'_>> {
        if self.state != ParseState::Success {
            return None;
        }

        self.kind.map(|kind| Command {
            kind,
            keys: &self.keys,
            flags: self.flags,
            exptime: self.exptime,
            cas: self.cas,
            payload: &self.payload,
        })
    }

    /// Clears all per-command fields. The payload buffer keeps its allocation
    /// unless it grew unusually large.
    pub fn reset(&mut self) {
        self.state = ParseState::CommandName;
        self.after_space = ParseState::Key;
        self.after_newline = ParseState::Success;
        self.name.clear();
        self.kind = None;
        self.keys.clear();
        self.key_buf.clear();
        self.numbuf.clear();
        self.flags = 0;
        self.exptime = 0;
        self.cas = 0;
        self.item_size = 0;
        if self.payload.capacity() > PAYLOAD_RETAIN_LIMIT {
            self.payload = Vec::new();
        } else {
            self.payload.clear();
        }
    }

    fn goto_space(&mut self, next: ParseState) -> Step {
        self.state = ParseState::SwallowSpace;
        self.after_space = next;
        Step::Next
    }

    fn parse_name(&mut self, input: &[u8], pos: &mut usize) -> ParseResult<Step> {
        while let Some(&byte) = input.get(*pos) {
            if byte == b' ' || byte == b'\r' || byte == b'\n' {
                let kind = CommandKind::lookup(&self.name).ok_or_else(|| {
                    ParseError::UnknownCommand(String::from_utf8_lossy(&self.name).into_owned())
                })?;
                if byte != b' ' {
                    return Err(ParseError::MissingField("key"));
                }
                self.kind = Some(kind);
                return Ok(self.goto_space(ParseState::Key));
            }

            if self.name.len() == MAX_COMMAND_NAME_LEN {
                self.name.push(byte);
                return Err(ParseError::UnknownCommand(
                    String::from_utf8_lossy(&self.name).into_owned(),
                ));
            }
            self.name.push(byte);
            *pos += 1;
        }
        Ok(Step::NeedMore)
    }

    fn parse_key(&mut self, input: &[u8], pos: &mut usize) -> ParseResult<Step> {
        let kind = self.kind.ok_or(ParseError::MissingField("command"))?;

        while let Some(&byte) = input.get(*pos) {
            match byte {
                b' ' | b'\r' => {
                    if !self.key_buf.is_empty() {
                        if self.keys.len() == self.limits.max_keys {
                            return Err(ParseError::TooManyKeys {
                                max: self.limits.max_keys,
                            });
                        }
                        self.keys.push(Bytes::copy_from_slice(&self.key_buf));
                        self.key_buf.clear();
                    }

                    if byte == b' ' {
                        let next = if kind.takes_key_list() {
                            ParseState::Key
                        } else {
                            ParseState::Flags
                        };
                        return Ok(self.goto_space(next));
                    }

                    // End of line: only key-list commands may stop here
                    if !kind.takes_key_list() {
                        return Err(ParseError::MissingField("flags"));
                    }
                    if self.keys.is_empty() {
                        return Err(ParseError::MissingField("key"));
                    }
                    self.state = ParseState::SwallowNewline;
                    self.after_newline = ParseState::Success;
                    return Ok(Step::Next);
                }
                b if b < 0x20 || b == 0x7f => return Err(ParseError::InvalidKeyByte(b)),
                _ => {
                    if self.key_buf.len() == self.limits.max_key_len {
                        return Err(ParseError::KeyTooLong {
                            max: self.limits.max_key_len,
                        });
                    }
                    self.key_buf.push(byte);
                    *pos += 1;
                }
            }
        }
        Ok(Step::NeedMore)
    }

    /// Accumulates digits into the scratch buffer and converts them once a
    /// non-digit terminator shows up. The terminator is left unconsumed.
    fn take_number(
        &mut self,
        input: &[u8],
        pos: &mut usize,
        field: &'static str,
    ) -> ParseResult<Option<u64>> {
        while let Some(&byte) = input.get(*pos) {
            if !byte.is_ascii_digit() {
                if self.numbuf.is_empty() {
                    return Err(if byte == b'\r' {
                        ParseError::MissingField(field)
                    } else {
                        ParseError::InvalidNumber(field)
                    });
                }

                let value = self
                    .numbuf
                    .iter()
                    .try_fold(0u64, |acc, &d| {
                        acc.checked_mul(10)?.checked_add(u64::from(d - b'0'))
                    })
                    .ok_or(ParseError::InvalidNumber(field))?;
                self.numbuf.clear();
                return Ok(Some(value));
            }

            if self.numbuf.len() == MAX_DIGITS {
                return Err(ParseError::InvalidNumber(field));
            }
            self.numbuf.push(byte);
            *pos += 1;
        }
        Ok(None)
    }

    fn parse_flags(&mut self, input: &[u8], pos: &mut usize) -> ParseResult<Step> {
        match self.take_number(input, pos, "flags")? {
            Some(value) => {
                self.flags = u32::try_from(value).map_err(|_| ParseError::InvalidNumber("flags"))?;
                Ok(self.goto_space(ParseState::Expiry))
            }
            None => Ok(Step::NeedMore),
        }
    }

    fn parse_expiry(&mut self, input: &[u8], pos: &mut usize) -> ParseResult<Step> {
        match self.take_number(input, pos, "exptime")? {
            Some(value) => {
                self.exptime =
                    u32::try_from(value).map_err(|_| ParseError::InvalidNumber("exptime"))?;
                Ok(self.goto_space(ParseState::ItemSize))
            }
            None => Ok(Step::NeedMore),
        }
    }

    fn parse_item_size(&mut self, input: &[u8], pos: &mut usize) -> ParseResult<Step> {
        let value = match self.take_number(input, pos, "bytes")? {
            Some(value) => value,
            None => return Ok(Step::NeedMore),
        };

        // Checked before the payload buffer is sized
        if value > self.limits.max_item_size as u64 {
            return Err(ParseError::ItemTooLarge {
                size: value,
                max: self.limits.max_item_size,
            });
        }
        self.item_size = value as usize;
        self.payload.clear();
        self.payload.reserve_exact(self.item_size);

        if self.kind == Some(CommandKind::Cas) {
            Ok(self.goto_space(ParseState::CasVersion))
        } else {
            self.after_newline = ParseState::ItemPayload;
            Ok(self.goto_space(ParseState::SwallowNewline))
        }
    }

    fn parse_cas(&mut self, input: &[u8], pos: &mut usize) -> ParseResult<Step> {
        match self.take_number(input, pos, "cas")? {
            Some(value) => {
                self.cas = value;
                self.after_newline = ParseState::ItemPayload;
                Ok(self.goto_space(ParseState::SwallowNewline))
            }
            None => Ok(Step::NeedMore),
        }
    }

    fn parse_payload(&mut self, input: &[u8], pos: &mut usize) -> Step {
        let wanted = self.item_size - self.payload.len();
        let available = input.len() - *pos;
        let take = wanted.min(available);

        self.payload.extend_from_slice(&input[*pos..*pos + take]);
        *pos += take;

        if self.payload.len() == self.item_size {
            self.state = ParseState::SwallowNewline;
            self.after_newline = ParseState::Success;
            Step::Next
        } else {
            Step::NeedMore
        }
    }

    fn swallow_space(&mut self, input: &[u8], pos: &mut usize) -> Step {
        while input.get(*pos) == Some(&b' ') {
            *pos += 1;
        }

        if *pos == input.len() {
            return Step::NeedMore;
        }
        self.state = self.after_space;
        Step::Next
    }

    fn swallow_newline(&mut self, input: &[u8], pos: &mut usize) -> ParseResult<Step> {
        let after_payload = self.after_newline == ParseState::Success
            && self.kind.is_some_and(|kind| kind.is_storage());
        let framing_error = |byte: u8| {
            if after_payload {
                ParseError::UnterminatedPayload
            } else {
                ParseError::ExpectedCrlf(byte)
            }
        };

        let rest = &input[*pos..];
        match rest {
            [] => Ok(Step::NeedMore),
            [b'\r'] => Ok(Step::NeedMore),
            [b'\r', b'\n', ..] => {
                *pos += 2;
                self.state = self.after_newline;
                Ok(Step::Next)
            }
            [b'\r', other, ..] => Err(framing_error(*other)),
            [other, ..] => Err(framing_error(*other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Owned copy of a parsed command, for comparing across parsers.
    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Parsed {
        kind: CommandKind,
        keys: Vec<Bytes>,
        flags: u32,
        exptime: u32,
        cas: u64,
        payload: Vec<u8>,
    }

    impl From<Command<'_>> for Parsed {
        fn from(cmd: Command<'_>) -> Self {
            Self {
                kind: cmd.kind,
                keys: cmd.keys.to_vec(),
                flags: cmd.flags,
                exptime: cmd.exptime,
                cas: cmd.cas,
                payload: cmd.payload.to_vec(),
            }
        }
    }

    fn parse_all(input: &[u8]) -> ParseResult<(Parsed, usize)> {
        let mut parser = CommandParser::default();
        let progress = parser.advance(input)?;
        assert!(progress.complete, "command should be complete");
        Ok((parser.command().unwrap().into(), progress.consumed))
    }

    /// Feeds `input` in chunks of the given sizes, carrying unconsumed bytes
    /// over the way the connection's read buffer does.
    fn parse_chunked(input: &[u8], sizes: &[usize]) -> ParseResult<Parsed> {
        let mut parser = CommandParser::default();
        let mut buffer: Vec<u8> = Vec::new();
        let mut offset = 0;
        let mut sizes = sizes.iter().cycle();

        loop {
            let size = (*sizes.next().unwrap()).max(1);
            let end = (offset + size).min(input.len());
            buffer.extend_from_slice(&input[offset..end]);
            offset = end;

            let progress = parser.advance(&buffer)?;
            buffer.drain(..progress.consumed);
            if progress.complete {
                return Ok(parser.command().unwrap().into());
            }
            assert!(offset < input.len(), "ran out of input before completion");
        }
    }

    #[test]
    fn test_parse_set() {
        let (cmd, consumed) = parse_all(b"set foo 5 0 3\r\nbar\r\n").unwrap();
        assert_eq!(cmd.kind, CommandKind::Set);
        assert_eq!(cmd.keys, vec![Bytes::from("foo")]);
        assert_eq!(cmd.flags, 5);
        assert_eq!(cmd.exptime, 0);
        assert_eq!(cmd.payload, b"bar");
        assert_eq!(consumed, 20);
    }

    #[test]
    fn test_parse_cas() {
        let (cmd, _) = parse_all(b"cas foo 1 60 3 17\r\nqux\r\n").unwrap();
        assert_eq!(cmd.kind, CommandKind::Cas);
        assert_eq!(cmd.flags, 1);
        assert_eq!(cmd.exptime, 60);
        assert_eq!(cmd.cas, 17);
        assert_eq!(cmd.payload, b"qux");
    }

    #[test]
    fn test_parse_get_multiple_keys() {
        let (cmd, consumed) = parse_all(b"get a bb ccc\r\n").unwrap();
        assert_eq!(cmd.kind, CommandKind::Get);
        assert_eq!(
            cmd.keys,
            vec![Bytes::from("a"), Bytes::from("bb"), Bytes::from("ccc")]
        );
        assert!(cmd.payload.is_empty());
        assert_eq!(consumed, 14);
    }

    #[test]
    fn test_gets_is_not_get() {
        let (cmd, _) = parse_all(b"gets foo\r\n").unwrap();
        assert_eq!(cmd.kind, CommandKind::Gets);
        assert_eq!(cmd.keys, vec![Bytes::from("foo")]);
    }

    #[test]
    fn test_parse_delete() {
        let (cmd, _) = parse_all(b"delete missingkey\r\n").unwrap();
        assert_eq!(cmd.kind, CommandKind::Delete);
        assert_eq!(cmd.keys, vec![Bytes::from("missingkey")]);
    }

    #[test]
    fn test_extra_spaces_are_tolerated() {
        let (cmd, _) = parse_all(b"get   foo   bar  \r\n").unwrap();
        assert_eq!(cmd.keys, vec![Bytes::from("foo"), Bytes::from("bar")]);

        let (cmd, _) = parse_all(b"set  foo  0  0  3 \r\nbar\r\n").unwrap();
        assert_eq!(cmd.payload, b"bar");
    }

    #[test]
    fn test_payload_may_contain_crlf() {
        let (cmd, _) = parse_all(b"set k 0 0 4\r\na\r\nb\r\n").unwrap();
        assert_eq!(cmd.payload, b"a\r\nb");
    }

    #[test]
    fn test_empty_payload() {
        let (cmd, _) = parse_all(b"set k 0 0 0\r\n\r\n").unwrap();
        assert!(cmd.payload.is_empty());
    }

    #[test]
    fn test_incomplete_then_resume() {
        let mut parser = CommandParser::default();

        let progress = parser.advance(b"set foo 0 0 3\r\nba").unwrap();
        assert!(!progress.complete);
        assert_eq!(progress.consumed, 17);
        assert_eq!(parser.state(), ParseState::ItemPayload);
        assert!(parser.command().is_none());

        let progress = parser.advance(b"r\r\n").unwrap();
        assert!(progress.complete);
        assert_eq!(progress.consumed, 3);
        assert_eq!(parser.command().unwrap().payload, b"bar");
    }

    #[test]
    fn test_lone_cr_is_not_consumed() {
        let mut parser = CommandParser::default();
        let progress = parser.advance(b"get foo\r").unwrap();
        assert!(!progress.complete);
        assert_eq!(progress.consumed, 7);
        assert_eq!(parser.state(), ParseState::SwallowNewline);
    }

    #[test]
    fn test_pipelined_commands() {
        let input = b"get a\r\nget b\r\n";
        let mut parser = CommandParser::default();

        let first = parser.advance(input).unwrap();
        assert!(first.complete);
        assert_eq!(first.consumed, 7);
        assert_eq!(parser.command().unwrap().key(), b"a");

        parser.reset();
        let second = parser.advance(&input[first.consumed..]).unwrap();
        assert!(second.complete);
        assert_eq!(parser.command().unwrap().key(), b"b");
    }

    #[test]
    fn test_reset_clears_previous_command() {
        let mut parser = CommandParser::default();
        parser.advance(b"cas k 3 4 1 9\r\nx\r\n").unwrap();
        parser.reset();
        assert!(parser.is_idle());

        let progress = parser.advance(b"get z\r\n").unwrap();
        assert!(progress.complete);
        let cmd = parser.command().unwrap();
        assert_eq!(cmd.keys.len(), 1);
        assert_eq!(cmd.cas, 0);
        assert!(cmd.payload.is_empty());
    }

    #[test]
    fn test_unknown_command() {
        let mut parser = CommandParser::default();
        assert_eq!(
            parser.advance(b"incr foo 1\r\n"),
            Err(ParseError::UnknownCommand("incr".to_string()))
        );

        let mut parser = CommandParser::default();
        assert!(matches!(
            parser.advance(b"flush_all\r\n"),
            Err(ParseError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_command_without_key() {
        let mut parser = CommandParser::default();
        assert_eq!(
            parser.advance(b"get\r\n"),
            Err(ParseError::MissingField("key"))
        );

        let mut parser = CommandParser::default();
        assert_eq!(
            parser.advance(b"get \r\n"),
            Err(ParseError::MissingField("key"))
        );
    }

    #[test]
    fn test_storage_command_missing_fields() {
        let mut parser = CommandParser::default();
        assert_eq!(
            parser.advance(b"set foo\r\n"),
            Err(ParseError::MissingField("flags"))
        );

        let mut parser = CommandParser::default();
        assert_eq!(
            parser.advance(b"set foo 0 0\r\n"),
            Err(ParseError::MissingField("bytes"))
        );

        let mut parser = CommandParser::default();
        assert_eq!(
            parser.advance(b"cas foo 0 0 3\r\n"),
            Err(ParseError::MissingField("cas"))
        );
    }

    #[test]
    fn test_invalid_numbers() {
        let mut parser = CommandParser::default();
        assert_eq!(
            parser.advance(b"set foo x 0 3\r\n"),
            Err(ParseError::InvalidNumber("flags"))
        );

        let mut parser = CommandParser::default();
        assert_eq!(
            parser.advance(b"set foo 4294967296 0 3\r\n"),
            Err(ParseError::InvalidNumber("flags"))
        );

        let mut parser = CommandParser::default();
        assert_eq!(
            parser.advance(b"set foo 0 0 99999999999999999999999\r\n"),
            Err(ParseError::InvalidNumber("bytes"))
        );
    }

    #[test]
    fn test_key_too_long() {
        let limits = ParserLimits {
            max_key_len: 4,
            ..Default::default()
        };
        let mut parser = CommandParser::new(limits);
        assert_eq!(parser.advance(b"get abcd\r\n").map(|p| p.complete), Ok(true));

        let mut parser = CommandParser::new(limits);
        assert_eq!(
            parser.advance(b"get abcde"),
            Err(ParseError::KeyTooLong { max: 4 })
        );
    }

    #[test]
    fn test_too_many_keys() {
        let limits = ParserLimits {
            max_keys: 3,
            ..Default::default()
        };
        let mut parser = CommandParser::new(limits);
        let parsed = parser.advance(b"get a b c\r\n").unwrap();
        assert!(parsed.complete);
        assert_eq!(parser.command().unwrap().keys.len(), 3);

        let mut parser = CommandParser::new(limits);
        assert_eq!(
            parser.advance(b"delete a b c d\r\n"),
            Err(ParseError::TooManyKeys { max: 3 })
        );
    }

    #[test]
    fn test_endless_key_list_is_cut_off() {
        let mut parser = CommandParser::default();
        let key = [b'k'; DEFAULT_MAX_KEY_LEN];
        assert_eq!(parser.advance(b"get ").map(|p| p.complete), Ok(false));

        let mut result = Ok(Progress {
            consumed: 0,
            complete: false,
        });
        for _ in 0..DEFAULT_MAX_KEYS + 1 {
            let mut chunk = key.to_vec();
            chunk.push(b' ');
            result = parser.advance(&chunk);
            if result.is_err() {
                break;
            }
        }

        assert_eq!(
            result,
            Err(ParseError::TooManyKeys {
                max: DEFAULT_MAX_KEYS
            })
        );
        assert!(parser.keys.len() <= DEFAULT_MAX_KEYS);
    }

    #[test]
    fn test_item_too_large_is_rejected_before_payload() {
        let limits = ParserLimits {
            max_item_size: 10,
            ..Default::default()
        };
        let mut parser = CommandParser::new(limits);
        assert_eq!(
            parser.advance(b"set k 0 0 11\r\n"),
            Err(ParseError::ItemTooLarge { size: 11, max: 10 })
        );
    }

    #[test]
    fn test_payload_without_crlf() {
        let mut parser = CommandParser::default();
        assert_eq!(
            parser.advance(b"set k 0 0 3\r\nbarXX"),
            Err(ParseError::UnterminatedPayload)
        );

        // Payload longer than declared
        let mut parser = CommandParser::default();
        assert_eq!(
            parser.advance(b"set k 0 0 2\r\nbar\r\n"),
            Err(ParseError::UnterminatedPayload)
        );
    }

    #[test]
    fn test_bad_line_ending() {
        let mut parser = CommandParser::default();
        assert_eq!(
            parser.advance(b"set k 0 0 3\rxbar\r\n"),
            Err(ParseError::ExpectedCrlf(b'x'))
        );

        let mut parser = CommandParser::default();
        assert_eq!(
            parser.advance(b"set k 0 0 3 noreply\r\n"),
            Err(ParseError::ExpectedCrlf(b'n'))
        );
    }

    #[test]
    fn test_control_byte_in_key() {
        let mut parser = CommandParser::default();
        assert_eq!(
            parser.advance(b"get fo\to\r\n"),
            Err(ParseError::InvalidKeyByte(b'\t'))
        );
    }

    #[test]
    fn test_one_byte_at_a_time() {
        let input = b"cas some:key 123 456 11 789\r\nhello world\r\n";
        let whole = parse_all(input).unwrap().0;
        let chunked = parse_chunked(input, &[1]).unwrap();
        assert_eq!(whole, chunked);
    }

    fn command_strategy() -> impl Strategy<Value = Vec<u8>> {
        let key = "[a-z0-9:_]{1,16}";
        let storage = (
            prop::sample::select(vec!["set", "add", "replace", "append", "prepend", "cas"]),
            key,
            any::<u32>(),
            0u32..100_000,
            prop::collection::vec(any::<u8>(), 0..64),
            any::<u64>(),
        )
            .prop_map(|(name, key, flags, exptime, payload, cas)| {
                let mut line = format!("{} {} {} {} {}", name, key, flags, exptime, payload.len());
                if name == "cas" {
                    line.push_str(&format!(" {}", cas));
                }
                let mut bytes = line.into_bytes();
                bytes.extend_from_slice(b"\r\n");
                bytes.extend_from_slice(&payload);
                bytes.extend_from_slice(b"\r\n");
                bytes
            });
        let key_list = (
            prop::sample::select(vec!["get", "gets", "delete"]),
            prop::collection::vec(key, 1..5),
        )
            .prop_map(|(name, keys)| format!("{} {}\r\n", name, keys.join(" ")).into_bytes());

        prop_oneof![storage, key_list]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        // Splitting a command into arbitrary fragments never changes the result
        #[test]
        fn prop_chunked_parse_matches_whole(
            input in command_strategy(),
            sizes in prop::collection::vec(1usize..8, 1..16),
        ) {
            let (whole, consumed) = parse_all(&input).unwrap();
            prop_assert_eq!(consumed, input.len());
            let chunked = parse_chunked(&input, &sizes).unwrap();
            prop_assert_eq!(whole, chunked);
        }
    }
}
