//! Outstanding-request descriptors for response pairing.
//!
//! Each descriptor records how the single reply (or reply group, for the
//! get family) of one outbound request must be dispatched. The callback
//! is a sum type over the closed set of request kinds, so dispatch stays
//! a tag match with no type erasure to undo.

use memtext::{CounterReply, DeleteReply, ErrorLine, RequestKind, StoreReply, TouchReply};

/// Terminal failure delivered to a request callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The peer replied `ERROR` (unknown command).
    Error,
    /// The peer replied `CLIENT_ERROR <msg>`.
    Client(String),
    /// The peer replied `SERVER_ERROR <msg>`.
    Server(String),
    /// The reply line could not be interpreted for this request kind.
    Protocol(String),
}

impl From<ErrorLine> for Fault {
    fn from(line: ErrorLine) -> Self {
        match line {
            ErrorLine::Generic => Fault::Error,
            ErrorLine::Client(msg) => Fault::Client(msg),
            ErrorLine::Server(msg) => Fault::Server(msg),
        }
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fault::Error => write!(f, "ERROR"),
            Fault::Client(msg) => write!(f, "CLIENT_ERROR {}", msg),
            Fault::Server(msg) => write!(f, "SERVER_ERROR {}", msg),
            Fault::Protocol(msg) => write!(f, "protocol error: {}", msg),
        }
    }
}

/// One value delivered from a get-family response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetValue {
    pub key: Vec<u8>,
    pub flags: u32,
    /// Present for gets/gats responses.
    pub cas: Option<u64>,
    pub data: Vec<u8>,
}

/// End-of-request summary for a get-family response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GetEnd {
    /// Keys that produced no VALUE line. Populated only when not-found
    /// tracking was requested.
    pub missing: Vec<Vec<u8>>,
}

/// Outcome delivered to a request callback.
pub type ReplyResult<T> = Result<T, Fault>;

pub type StoreCallback = Box<dyn FnOnce(ReplyResult<StoreReply>) + Send>;
pub type CounterCallback = Box<dyn FnOnce(ReplyResult<CounterReply>) + Send>;
pub type DeleteCallback = Box<dyn FnOnce(ReplyResult<DeleteReply>) + Send>;
pub type TouchCallback = Box<dyn FnOnce(ReplyResult<TouchReply>) + Send>;
pub type ValueCallback = Box<dyn FnMut(GetValue) + Send>;
pub type GetEndCallback = Box<dyn FnOnce(ReplyResult<GetEnd>) + Send>;
pub type StatsCallback = Box<dyn FnOnce(ReplyResult<Vec<(String, String)>>) + Send>;
pub type VersionCallback = Box<dyn FnOnce(ReplyResult<String>) + Send>;

/// Per-kind response callback.
#[derive(Default)]
pub enum ResponseHandler {
    #[default]
    None,
    Store(StoreCallback),
    Counter(CounterCallback),
    Delete(DeleteCallback),
    Touch(TouchCallback),
    Get {
        on_value: ValueCallback,
        on_end: GetEndCallback,
    },
    Stats(StatsCallback),
    Version(VersionCallback),
}

/// One outstanding request awaiting its reply.
///
/// Created on the calling thread when the request is serialized, pushed
/// into the pairing ring immediately after the write succeeds, popped by
/// the I/O thread exactly once when the matching reply arrives, and reset
/// to the default (kind [`RequestKind::None`]) in the ring slot.
#[derive(Default)]
pub struct Descriptor {
    pub(crate) kind: RequestKind,
    pub(crate) handler: ResponseHandler,
    /// Request key context: the single key of a simple operation, or every
    /// key of a multi-key get.
    pub(crate) keys: Vec<Vec<u8>>,
    /// Report unmatched keys in the end-of-request callback.
    pub(crate) track_notfound: bool,
}

impl Descriptor {
    pub(crate) fn new(kind: RequestKind, handler: ResponseHandler) -> Self {
        Self {
            kind,
            handler,
            keys: Vec::new(),
            track_notfound: false,
        }
    }

    /// First key, for log context.
    pub(crate) fn key_for_log(&self) -> String {
        self.keys
            .first()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .unwrap_or_default()
    }
}
