//! Request kinds, wire verbs, and exact request-line lengths.

use crate::writer::decimal_len;

/// Suffix appended to fire-and-forget requests.
pub const NOREPLY: &[u8] = b"noreply";

/// Storage-family command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreCommand {
    Set,
    Add,
    Replace,
    Append,
    Prepend,
    Cas,
}

impl StoreCommand {
    pub fn verb(self) -> &'static [u8] {
        match self {
            StoreCommand::Set => b"set",
            StoreCommand::Add => b"add",
            StoreCommand::Replace => b"replace",
            StoreCommand::Append => b"append",
            StoreCommand::Prepend => b"prepend",
            StoreCommand::Cas => b"cas",
        }
    }

    pub fn from_verb(verb: &[u8]) -> Option<Self> {
        match verb {
            b"set" => Some(StoreCommand::Set),
            b"add" => Some(StoreCommand::Add),
            b"replace" => Some(StoreCommand::Replace),
            b"append" => Some(StoreCommand::Append),
            b"prepend" => Some(StoreCommand::Prepend),
            b"cas" => Some(StoreCommand::Cas),
            _ => None,
        }
    }

    /// Whether the request line carries a cas id field.
    pub fn has_cas(self) -> bool {
        matches!(self, StoreCommand::Cas)
    }
}

/// Get-family command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetCommand {
    Get,
    Gets,
    Gat,
    Gats,
}

impl GetCommand {
    pub fn verb(self) -> &'static [u8] {
        match self {
            GetCommand::Get => b"get",
            GetCommand::Gets => b"gets",
            GetCommand::Gat => b"gat",
            GetCommand::Gats => b"gats",
        }
    }

    /// Whether VALUE reply lines carry a cas id.
    pub fn with_cas(self) -> bool {
        matches!(self, GetCommand::Gets | GetCommand::Gats)
    }

    /// Whether the request line carries an exptime argument (get-and-touch).
    pub fn takes_exptime(self) -> bool {
        matches!(self, GetCommand::Gat | GetCommand::Gats)
    }
}

/// Closed set of outstanding-request kinds for response pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestKind {
    /// No request; the reset state of a popped descriptor slot.
    #[default]
    None,
    Store,
    Counter,
    Delete,
    Touch,
    Get,
    GetCas,
    Stats,
    Version,
}

/// `<verb> <key> <flags> <exptime> <bytes>[ <cas>][ noreply]\r\n`
pub fn store_line_len(
    cmd: StoreCommand,
    key_len: usize,
    flags: u32,
    exptime: u64,
    bytes: usize,
    cas: Option<u64>,
    noreply: bool,
) -> usize {
    let mut len = cmd.verb().len()
        + 1
        + key_len
        + 1
        + decimal_len(u64::from(flags))
        + 1
        + decimal_len(exptime)
        + 1
        + decimal_len(bytes as u64);
    if let Some(cas) = cas {
        len += 1 + decimal_len(cas);
    }
    if noreply {
        len += 1 + NOREPLY.len();
    }
    len + 2
}

/// `incr|decr <key> <delta>[ noreply]\r\n` (both verbs are 4 bytes).
pub fn counter_line_len(key_len: usize, delta: u64, noreply: bool) -> usize {
    let mut len = 4 + 1 + key_len + 1 + decimal_len(delta);
    if noreply {
        len += 1 + NOREPLY.len();
    }
    len + 2
}

/// `delete <key>[ noreply]\r\n`
pub fn delete_line_len(key_len: usize, noreply: bool) -> usize {
    let mut len = 6 + 1 + key_len;
    if noreply {
        len += 1 + NOREPLY.len();
    }
    len + 2
}

/// `touch <key> <exptime>[ noreply]\r\n`
pub fn touch_line_len(key_len: usize, exptime: u64, noreply: bool) -> usize {
    let mut len = 5 + 1 + key_len + 1 + decimal_len(exptime);
    if noreply {
        len += 1 + NOREPLY.len();
    }
    len + 2
}

/// `VALUE <key> <flags> <bytes>[ <cas>]\r\n`
pub fn value_line_len(key_len: usize, flags: u32, bytes: usize, cas: Option<u64>) -> usize {
    let mut len = 5 + 1 + key_len + 1 + decimal_len(u64::from(flags)) + 1 + decimal_len(bytes as u64);
    if let Some(cas) = cas {
        len += 1 + decimal_len(cas);
    }
    len + 2
}

/// `get|gets <key>...\r\n` or `gat|gats <exptime> <key>...\r\n`
pub fn get_line_len<K: AsRef<[u8]>>(cmd: GetCommand, exptime: Option<u64>, keys: &[K]) -> usize {
    let mut len = cmd.verb().len();
    if let Some(exptime) = exptime {
        len += 1 + decimal_len(exptime);
    }
    for key in keys {
        len += 1 + key.as_ref().len();
    }
    len + 2
}
