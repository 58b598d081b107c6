//! Server-side application handler interface.
//!
//! The engine parses inbound commands and routes them through
//! [`McHandler`]. Every method either produces its reply value
//! synchronously or returns `Deferred` after creating exactly one
//! [`DeferredReply`](crate::deferred::DeferredReply) via the handler
//! context; the connection verifies that contract after every call.

use memtext::{CounterReply, DeleteReply, StoreCommand, StoreReply, TouchReply};

use crate::deferred::HandlerCtx;

/// One stored value, as the cache holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueEntry {
    pub flags: u32,
    /// Unique id for compare-and-swap; emitted on gets/gats replies.
    pub cas: u64,
    pub data: Vec<u8>,
}

/// A fully received storage command.
#[derive(Debug)]
pub struct StoreRequest<'a> {
    pub cmd: StoreCommand,
    pub key: &'a [u8],
    pub flags: u32,
    pub exptime: u64,
    /// Present for `cas` commands.
    pub cas: Option<u64>,
    pub data: &'a [u8],
    pub noreply: bool,
}

pub enum StoreResult {
    Reply(StoreReply),
    /// Report `SERVER_ERROR <msg>`; the connection stays open.
    Fail(String),
    Deferred,
}

pub enum CounterResult {
    Reply(CounterReply),
    /// The stored value is not a decimal number; reported as a
    /// `CLIENT_ERROR`, not as a miss.
    NonNumeric,
    Fail(String),
    Deferred,
}

pub enum DeleteResult {
    Reply(DeleteReply),
    Fail(String),
    Deferred,
}

pub enum TouchResult {
    Reply(TouchReply),
    Fail(String),
    Deferred,
}

pub enum GetStartResult {
    /// Proceed with per-key `on_get` calls.
    Continue,
    /// Abort the request with `SERVER_ERROR <msg>`; no `END` follows.
    Fail(String),
    /// The handler took over the whole batch: it emits values through the
    /// batch deferred reply and the per-key walk is skipped.
    Deferred,
}

pub enum GetResult {
    Value(ValueEntry),
    /// Missing keys produce no output.
    Miss,
    Fail(String),
    Deferred,
}

pub enum GetEndResult {
    Done,
    Fail(String),
    Deferred,
}

/// Application callbacks for one server.
pub trait McHandler {
    fn on_store(&mut self, ctx: &mut HandlerCtx<'_>, req: &StoreRequest<'_>) -> StoreResult;

    fn on_counter(
        &mut self,
        ctx: &mut HandlerCtx<'_>,
        key: &[u8],
        delta: u64,
        negative: bool,
    ) -> CounterResult;

    fn on_delete(&mut self, ctx: &mut HandlerCtx<'_>, key: &[u8]) -> DeleteResult;

    fn on_touch(&mut self, ctx: &mut HandlerCtx<'_>, key: &[u8], exptime: u64) -> TouchResult;

    /// Called once per get-family request, before the per-key walk.
    fn on_get_start(&mut self, ctx: &mut HandlerCtx<'_>, keys: &[&[u8]]) -> GetStartResult {
        let _ = (ctx, keys);
        GetStartResult::Continue
    }

    /// Called once per requested key. `touch_exptime` is present for
    /// gat/gats requests.
    fn on_get(
        &mut self,
        ctx: &mut HandlerCtx<'_>,
        key: &[u8],
        touch_exptime: Option<u64>,
    ) -> GetResult;

    /// Called after the per-key walk; `END` is emitted once this and every
    /// deferred reply created during the request have completed.
    fn on_get_end(&mut self, ctx: &mut HandlerCtx<'_>) -> GetEndResult {
        let _ = ctx;
        GetEndResult::Done
    }

    fn on_stats(&mut self) -> Vec<(String, String)> {
        Vec::new()
    }
}
