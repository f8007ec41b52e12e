//! Command group parsing
//!
//! Each command string of a submitted group becomes one [`Instruction`] for
//! the device interpreter. Two forms are accepted:
//!
//! - plain: `"kwkF"` -> token `k`, args `wkF` as raw character codes
//! - encoded: `"b64:<payload>"` -> payload decoded by [`crate::codec`], first
//!   byte is the token, the rest are args
//!
//! Plain commands always end in a NUL. Encoded commands with an uppercase
//! token get a `~` terminator instead, which the interpreter reads as a
//! binary "hold" command.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{self, Leniency};

/// Prefix marking an encoded sub-command
pub const ENCODED_MARKER: &str = "b64:";

/// Terminator appended after args of encoded uppercase tokens
pub const HOLD_TERMINATOR: u8 = b'~';

/// Terminator appended after args of every other command
pub const NUL_TERMINATOR: u8 = 0;

/// A decoded sub-command, ready for the device interpreter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Single-character opcode
    pub token: u8,
    /// Argument bytes followed by exactly one terminator byte
    pub params: Bytes,
    /// Number of argument bytes (terminator excluded)
    pub len: usize,
}

impl Instruction {
    /// Build an encoded-form instruction, appending the terminator the token calls for
    pub fn new(token: u8, args: &[u8]) -> Self {
        Self::with_terminator(token, args, terminator_for(token))
    }

    /// Build a plain-form instruction; these always end in NUL
    pub fn plain(token: u8, args: &[u8]) -> Self {
        Self::with_terminator(token, args, NUL_TERMINATOR)
    }

    pub fn with_terminator(token: u8, args: &[u8], terminator: u8) -> Self {
        let mut params = BytesMut::with_capacity(args.len() + 1);
        params.put_slice(args);
        params.put_u8(terminator);

        Self {
            token,
            params: params.freeze(),
            len: args.len(),
        }
    }

    /// Argument bytes without the terminator
    pub fn args(&self) -> &[u8] {
        &self.params[..self.len]
    }

    /// The terminator byte following the args
    pub fn terminator(&self) -> u8 {
        self.params[self.len]
    }

    /// Whether the interpreter treats this as a hold-style command
    pub fn is_hold(&self) -> bool {
        self.terminator() == HOLD_TERMINATOR
    }
}

/// Terminator convention for an encoded token
pub fn terminator_for(token: u8) -> u8 {
    if token.is_ascii_uppercase() {
        HOLD_TERMINATOR
    } else {
        NUL_TERMINATOR
    }
}

/// Why a sub-command is skipped without being executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Plain command with no token
    Empty,
    /// Encoded command whose payload decoded to nothing
    EmptyPayload,
}

/// Outcome of parsing one command string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    Execute(Instruction),
    Skip(SkipReason),
}

impl ParsedCommand {
    pub fn is_skip(&self) -> bool {
        matches!(self, ParsedCommand::Skip(_))
    }
}

/// Parse one command string of a group
pub fn parse_command(raw: &str) -> ParsedCommand {
    if let Some(payload) = raw.strip_prefix(ENCODED_MARKER) {
        return match codec::decode(payload, Leniency::SkipInvalid) {
            Some(bytes) => ParsedCommand::Execute(Instruction::new(bytes[0], &bytes[1..])),
            None => ParsedCommand::Skip(SkipReason::EmptyPayload),
        };
    }

    match raw.as_bytes().split_first() {
        Some((&token, args)) => ParsedCommand::Execute(Instruction::plain(token, args)),
        None => ParsedCommand::Skip(SkipReason::Empty),
    }
}

/// Parse a whole command group, preserving order
pub fn parse_group(commands: &[String]) -> Vec<ParsedCommand> {
    commands.iter().map(|c| parse_command(c)).collect()
}
