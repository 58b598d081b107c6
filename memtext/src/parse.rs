//! Server-side command-line tokenizer.

use crate::command::StoreCommand;
use crate::reply::{parse_u32, parse_u64};
use crate::ParseError;

/// One parsed inbound command line. Keys borrow from the input line.
#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Store {
        cmd: StoreCommand,
        key: &'a [u8],
        flags: u32,
        exptime: u64,
        bytes: usize,
        cas: Option<u64>,
        noreply: bool,
    },
    Counter {
        key: &'a [u8],
        delta: u64,
        /// decr rather than incr.
        negative: bool,
        noreply: bool,
    },
    Delete {
        key: &'a [u8],
        noreply: bool,
    },
    Touch {
        key: &'a [u8],
        exptime: u64,
        noreply: bool,
    },
    Get {
        keys: Vec<&'a [u8]>,
        with_cas: bool,
        /// Present for gat/gats (get-and-touch).
        exptime: Option<u64>,
    },
    Stats,
    Version,
    Quit,
}

/// Why a command line was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    /// Unrecognized verb; the wire reply is a bare `ERROR`.
    Unknown,
    /// Recognized verb with bad arguments; the wire reply is
    /// `CLIENT_ERROR <msg>`.
    Bad(&'static str),
}

impl CommandError {
    pub fn message(self) -> &'static str {
        match self {
            CommandError::Unknown => "unknown command",
            CommandError::Bad(msg) => msg,
        }
    }
}

const BAD_FORMAT: CommandError = CommandError::Bad("bad command line format");

/// Parse one CRLF-stripped inbound line.
pub fn parse_command(line: &[u8]) -> Result<Command<'_>, CommandError> {
    let mut tokens = line.split(|&b| b == b' ').filter(|t| !t.is_empty());
    let verb = tokens.next().ok_or(CommandError::Unknown)?;

    if let Some(cmd) = StoreCommand::from_verb(verb) {
        return parse_store(cmd, tokens);
    }

    match verb {
        b"incr" | b"decr" => {
            let key = tokens.next().ok_or(BAD_FORMAT)?;
            let delta = numeric(tokens.next())?;
            let noreply = parse_noreply(&mut tokens)?;
            Ok(Command::Counter {
                key,
                delta,
                negative: verb == b"decr",
                noreply,
            })
        }
        b"delete" => {
            let key = tokens.next().ok_or(BAD_FORMAT)?;
            let noreply = parse_noreply(&mut tokens)?;
            Ok(Command::Delete { key, noreply })
        }
        b"touch" => {
            let key = tokens.next().ok_or(BAD_FORMAT)?;
            let exptime = numeric(tokens.next())?;
            let noreply = parse_noreply(&mut tokens)?;
            Ok(Command::Touch {
                key,
                exptime,
                noreply,
            })
        }
        b"get" | b"gets" | b"gat" | b"gats" => {
            let exptime = if verb == b"gat" || verb == b"gats" {
                Some(numeric(tokens.next())?)
            } else {
                None
            };
            let keys: Vec<&[u8]> = tokens.collect();
            if keys.is_empty() {
                return Err(BAD_FORMAT);
            }
            Ok(Command::Get {
                keys,
                with_cas: verb == b"gets" || verb == b"gats",
                exptime,
            })
        }
        b"stats" => Ok(Command::Stats),
        b"version" => Ok(Command::Version),
        b"quit" => Ok(Command::Quit),
        _ => Err(CommandError::Unknown),
    }
}

fn parse_store<'a>(
    cmd: StoreCommand,
    mut tokens: impl Iterator<Item = &'a [u8]>,
) -> Result<Command<'a>, CommandError> {
    let key = tokens.next().ok_or(BAD_FORMAT)?;
    let flags = numeric_u32(tokens.next())?;
    let exptime = numeric(tokens.next())?;
    let bytes = numeric(tokens.next())? as usize;
    let cas = if cmd.has_cas() {
        Some(numeric(tokens.next())?)
    } else {
        None
    };
    let noreply = parse_noreply(&mut tokens)?;
    Ok(Command::Store {
        cmd,
        key,
        flags,
        exptime,
        bytes,
        cas,
        noreply,
    })
}

/// Consume an optional trailing `noreply` token; anything else trailing is
/// a format error.
fn parse_noreply<'a>(tokens: &mut impl Iterator<Item = &'a [u8]>) -> Result<bool, CommandError> {
    match tokens.next() {
        None => Ok(false),
        Some(b"noreply") => match tokens.next() {
            None => Ok(true),
            Some(_) => Err(BAD_FORMAT),
        },
        Some(_) => Err(BAD_FORMAT),
    }
}

fn numeric(field: Option<&[u8]>) -> Result<u64, CommandError> {
    let field = field.ok_or(BAD_FORMAT)?;
    parse_u64(field).map_err(|_: ParseError| BAD_FORMAT)
}

fn numeric_u32(field: Option<&[u8]>) -> Result<u32, CommandError> {
    let field = field.ok_or(BAD_FORMAT)?;
    parse_u32(field).map_err(|_: ParseError| BAD_FORMAT)
}
