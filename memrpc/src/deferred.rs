//! Deferred reply protocol.
//!
//! A handler that cannot answer synchronously creates exactly one
//! [`DeferredReply`] through its [`HandlerCtx`] and returns `Deferred`.
//! The connection reconciles the created count against the declared
//! result after every handler call ([`reconcile_deferred`]); any mismatch
//! is a bug in the handler and closes the connection.
//!
//! A deferred reply must be finished exactly once. Finishing writes the
//! wire reply (if the connection is still open), decrements the
//! outstanding count, and releases a gated get-family `END` once the
//! count drains to zero. The destructor finishes a forgotten reply with a
//! generic `SERVER_ERROR` and a warning, so a handler bug cannot wedge
//! the connection.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{error, warn};

use memtext::{CounterReply, DeleteReply, StoreReply, TouchReply};

use crate::connection::ConnCore;
use crate::handler::ValueEntry;

/// Which wire reply a deferred completion is allowed to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DeferredKind {
    Store,
    Counter,
    Delete,
    Touch,
    /// One key of a get walk.
    GetValue { key: Vec<u8> },
    /// A whole get batch taken over by `on_get_start`.
    GetBatch,
    /// The tail of a get request (`on_get_end`).
    GetEnd,
}

/// Handler context for one command stage.
///
/// Carries the connection reference, the deferred-reply kind appropriate
/// to the current stage, and the request's noreply flag.
pub struct HandlerCtx<'a> {
    core: &'a Rc<RefCell<ConnCore>>,
    kind: DeferredKind,
    noreply: bool,
}

impl<'a> HandlerCtx<'a> {
    pub(crate) fn new(core: &'a Rc<RefCell<ConnCore>>, kind: DeferredKind, noreply: bool) -> Self {
        Self {
            core,
            kind,
            noreply,
        }
    }

    /// Whether the request was fire-and-forget.
    pub fn noreply(&self) -> bool {
        self.noreply
    }

    /// Create the deferred reply for this stage.
    ///
    /// Deferring a noreply request is a contract violation: the creation
    /// is recorded and the connection is closed after the handler
    /// returns.
    pub fn defer(&mut self) -> DeferredReply {
        {
            let mut core = self.core.borrow_mut();
            if self.noreply {
                core.noreply_defer = true;
            }
            core.created += 1;
            core.outstanding += 1;
        }
        DeferredReply {
            core: Rc::clone(self.core),
            kind: self.kind.clone(),
            done: false,
        }
    }
}

/// Verify the created-count delta against the handler's declared result.
///
/// `declared` is whether the handler returned `Deferred`. Exactly one
/// creation is required then, exactly zero otherwise.
pub(crate) fn reconcile_deferred(
    created_before: u64,
    created_after: u64,
    declared: bool,
) -> Result<(), &'static str> {
    match (declared, created_after - created_before) {
        (true, 1) | (false, 0) => Ok(()),
        (true, 0) => Err("handler returned deferred but created no deferred reply"),
        (true, _) => Err("handler returned deferred but created multiple deferred replies"),
        (false, _) => Err("handler created a deferred reply without returning deferred"),
    }
}

/// A postponed reply that must be finished exactly once.
pub struct DeferredReply {
    core: Rc<RefCell<ConnCore>>,
    kind: DeferredKind,
    done: bool,
}

impl DeferredReply {
    /// Finish a deferred storage reply.
    pub fn store(mut self, reply: StoreReply) {
        match self.kind {
            DeferredKind::Store => self.finish(|core| core.write_simple(reply.token())),
            _ => self.wrong_kind("store"),
        }
    }

    /// Finish a deferred incr/decr reply.
    pub fn counter(mut self, reply: CounterReply) {
        match self.kind {
            DeferredKind::Counter => self.finish(|core| match reply {
                CounterReply::Value(v) => core.write_u64(v),
                CounterReply::NotFound => core.write_simple(b"NOT_FOUND"),
            }),
            _ => self.wrong_kind("counter"),
        }
    }

    /// Finish a deferred delete reply.
    pub fn delete(mut self, reply: DeleteReply) {
        match self.kind {
            DeferredKind::Delete => self.finish(|core| core.write_simple(reply.token())),
            _ => self.wrong_kind("delete"),
        }
    }

    /// Finish a deferred touch reply.
    pub fn touch(mut self, reply: TouchReply) {
        match self.kind {
            DeferredKind::Touch => self.finish(|core| core.write_simple(reply.token())),
            _ => self.wrong_kind("touch"),
        }
    }

    /// Finish a deferred per-key get with a value.
    pub fn found(mut self, entry: &ValueEntry) {
        match &self.kind {
            DeferredKind::GetValue { key } => {
                let key = key.clone();
                self.finish(|core| core.write_value(&key, entry));
            }
            _ => self.wrong_kind("found"),
        }
    }

    /// Finish a deferred per-key get with no value; missing keys produce
    /// no output.
    pub fn miss(mut self) {
        match self.kind {
            DeferredKind::GetValue { .. } => self.finish(|_| {}),
            _ => self.wrong_kind("miss"),
        }
    }

    /// Emit one value from a deferred get batch. May be called any number
    /// of times before [`DeferredReply::complete`].
    pub fn batch_value(&mut self, key: &[u8], entry: &ValueEntry) {
        match self.kind {
            DeferredKind::GetBatch => self.core.borrow_mut().write_value(key, entry),
            _ => error!("batch_value on a non-batch deferred reply"),
        }
    }

    /// Finish a deferred stage that produces no reply line of its own
    /// (get batch or get end); releases the gated `END`.
    pub fn complete(mut self) {
        match self.kind {
            DeferredKind::GetBatch | DeferredKind::GetEnd => self.finish(|_| {}),
            _ => self.wrong_kind("complete"),
        }
    }

    /// Finish any deferred reply with `SERVER_ERROR <msg>`.
    pub fn server_error(mut self, msg: &str) {
        self.finish(|core| core.write_error_line("SERVER_ERROR", msg));
    }

    fn wrong_kind(&mut self, called: &str) {
        error!(
            kind = ?self.kind,
            called,
            "deferred reply finished with mismatched method"
        );
        self.finish(|core| core.write_error_line("SERVER_ERROR", "mismatched deferred reply"));
    }

    fn finish(&mut self, write: impl FnOnce(&mut ConnCore)) {
        if self.done {
            return;
        }
        self.done = true;
        let mut core = self.core.borrow_mut();
        write(&mut core);
        core.outstanding -= 1;
        core.maybe_end();
    }
}

impl Drop for DeferredReply {
    fn drop(&mut self) {
        if !self.done {
            warn!(kind = ?self.kind, "deferred reply dropped without being finished");
            self.finish(|core| core.write_error_line("SERVER_ERROR", "unfinished deferred reply"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconcile_matrix() {
        assert!(reconcile_deferred(3, 4, true).is_ok());
        assert!(reconcile_deferred(3, 3, false).is_ok());
        assert!(reconcile_deferred(3, 3, true).is_err());
        assert!(reconcile_deferred(3, 5, true).is_err());
        assert!(reconcile_deferred(3, 4, false).is_err());
    }
}
