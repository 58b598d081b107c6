//! Asynchronous memcached-protocol client and server engine.
//!
//! The engine is transport-agnostic: both halves consume and produce raw
//! bytes, and the socket reactor that moves them is external glue. What
//! it enforces is the pipeline discipline the protocol depends on:
//!
//! - **Client** ([`client::pair`]): every request issued with a response
//!   handler pushes exactly one descriptor into a lock-free pairing ring
//!   ([`seqring::SeqRing`]); every response line pops exactly one and
//!   dispatches its callback. Fire-and-forget (`noreply`) requests skip
//!   the ring entirely. A pop on an empty ring is a fatal desync.
//! - **Server** ([`McServer`]): inbound commands run through an
//!   [`McHandler`]; a handler may postpone its reply by creating exactly
//!   one [`DeferredReply`] and returning `Deferred`, a contract verified
//!   after every call. Replies stay in request order because a connection
//!   suspends inbound processing while deferred replies are outstanding.

pub mod client;
pub mod config;
mod connection;
pub mod deferred;
pub mod descriptor;
pub mod error;
pub mod handler;
pub mod reader;
pub mod server;

pub use client::{pair, McClient, McClientIo};
pub use config::{ClientConfig, ServerConfig};
pub use deferred::{DeferredReply, HandlerCtx};
pub use descriptor::{Fault, GetEnd, GetValue, ReplyResult};
pub use error::{Error, Result};
pub use handler::{
    CounterResult, DeleteResult, GetEndResult, GetResult, GetStartResult, McHandler, StoreRequest,
    StoreResult, TouchResult, ValueEntry,
};
pub use server::{ConnId, McServer};
