//! Error types for the protocol engine.

use std::fmt;

/// Error type for engine operations.
///
/// Transient capacity pressure on the pairing queue is deliberately
/// absent: a full ring spins, it never fails the call.
#[derive(Debug)]
pub enum Error {
    /// IO error from the underlying transport glue.
    Io(std::io::Error),
    /// The response stream no longer lines up with the outstanding-request
    /// queue. Fatal: log and close the connection.
    Desync(&'static str),
    /// A handler broke the deferred-reply contract. Fatal: log and close.
    ContractViolation(&'static str),
    /// Key rejected before serialization (empty, too long, or containing
    /// whitespace/control bytes).
    InvalidKey(&'static str),
    /// Value larger than the configured limit.
    ValueTooLarge { len: usize, max: usize },
    /// Operation on a connection that is already closed.
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Desync(what) => write!(f, "protocol desync: {}", what),
            Error::ContractViolation(what) => {
                write!(f, "deferred-reply contract violation: {}", what)
            }
            Error::InvalidKey(what) => write!(f, "invalid key: {}", what),
            Error::ValueTooLarge { len, max } => {
                write!(f, "value too large: {} bytes, max {} bytes", len, max)
            }
            Error::Closed => write!(f, "connection is closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
