//! Memcached text wire protocol.
//!
//! Byte-exact encoding and decoding of the CRLF-terminated line protocol:
//! request verbs and wire lengths ([`command`]), reply token parsing
//! ([`reply`]), the exact-size reserved line writer ([`writer`]), the
//! server-side command tokenizer ([`parse`]), and expiration-time helpers
//! ([`expiry`]).

use std::fmt;

pub mod command;
pub mod expiry;
pub mod parse;
pub mod reply;
pub mod writer;

pub use command::{GetCommand, RequestKind, StoreCommand};
pub use parse::{parse_command, Command, CommandError};
pub use reply::{
    is_end, parse_counter_reply, parse_error_line, parse_stat_line, parse_value_header,
    CounterReply, DeleteReply, ErrorLine, StoreReply, TouchReply, ValueHeader,
};
pub use writer::{decimal_len, ReservedWriter};

/// Terminator for every protocol line.
pub const CRLF: &[u8] = b"\r\n";

/// Error from decoding a reply or header line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// A numeric field was empty or contained a non-digit byte.
    BadNumber,
    /// A line was missing a required token.
    Malformed(&'static str),
    /// A reply token outside the closed set for the expected reply kind.
    UnknownToken,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::BadNumber => write!(f, "bad numeric field"),
            ParseError::Malformed(what) => write!(f, "malformed line: {}", what),
            ParseError::UnknownToken => write!(f, "unknown reply token"),
        }
    }
}

impl std::error::Error for ParseError {}
