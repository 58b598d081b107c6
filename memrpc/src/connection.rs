//! Per-connection server state machine.
//!
//! A connection parses inbound command lines (and fixed-length store
//! bodies), routes them through the application handler, and writes wire
//! replies into its output buffer. While any deferred reply is
//! outstanding (or a get-family `END` is still gated on one), further
//! inbound frames are left buffered, so replies always appear on the wire
//! in request order.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, error};

use memtext::command::value_line_len;
use memtext::{
    parse_command, Command, CommandError, CounterReply, ReservedWriter, StoreCommand, CRLF,
};

use crate::config::ServerConfig;
use crate::deferred::{reconcile_deferred, DeferredKind, HandlerCtx};
use crate::error::{Error, Result};
use crate::handler::{
    CounterResult, DeleteResult, GetEndResult, GetResult, GetStartResult, McHandler, StoreRequest,
    StoreResult, TouchResult, ValueEntry,
};
use crate::reader::{Frame, LineReader};

/// Connection state shared with outstanding deferred replies.
pub(crate) struct ConnCore {
    pub(crate) out: Vec<u8>,
    pub(crate) open: bool,
    /// Deferred replies created over the connection's lifetime; the
    /// per-handler-call delta is reconciled against the declared result.
    pub(crate) created: u64,
    /// Deferred replies created but not yet finished.
    pub(crate) outstanding: u64,
    /// An `END` line is owed once `outstanding` drains to zero.
    pub(crate) end_pending: bool,
    /// The get in progress emits cas ids (gets/gats).
    pub(crate) with_cas: bool,
    /// A handler deferred a noreply request.
    pub(crate) noreply_defer: bool,
}

impl ConnCore {
    fn new() -> Self {
        Self {
            out: Vec::new(),
            open: true,
            created: 0,
            outstanding: 0,
            end_pending: false,
            with_cas: false,
            noreply_defer: false,
        }
    }

    /// Write `<token>\r\n`. Suppressed once the connection is closed.
    pub(crate) fn write_simple(&mut self, token: &[u8]) {
        if !self.open {
            return;
        }
        self.out.extend_from_slice(token);
        self.out.extend_from_slice(CRLF);
    }

    pub(crate) fn write_u64(&mut self, v: u64) {
        self.write_simple(v.to_string().as_bytes());
    }

    /// Write `<prefix> <msg>\r\n` (ERROR lines use `write_simple`).
    pub(crate) fn write_error_line(&mut self, prefix: &str, msg: &str) {
        if !self.open {
            return;
        }
        self.out.extend_from_slice(prefix.as_bytes());
        self.out.push(b' ');
        self.out.extend_from_slice(msg.as_bytes());
        self.out.extend_from_slice(CRLF);
    }

    pub(crate) fn write_stat(&mut self, name: &str, value: &str) {
        if !self.open {
            return;
        }
        self.out.extend_from_slice(b"STAT ");
        self.out.extend_from_slice(name.as_bytes());
        self.out.push(b' ');
        self.out.extend_from_slice(value.as_bytes());
        self.out.extend_from_slice(CRLF);
    }

    /// Write one `VALUE` line plus data block, sized exactly up front.
    pub(crate) fn write_value(&mut self, key: &[u8], entry: &ValueEntry) {
        if !self.open {
            return;
        }
        let cas = if self.with_cas { Some(entry.cas) } else { None };
        let total = value_line_len(key.len(), entry.flags, entry.data.len(), cas)
            + entry.data.len()
            + 2;
        let mut w = ReservedWriter::new(&mut self.out, total);
        w.put(b"VALUE");
        w.space();
        w.put(key);
        w.space();
        w.put_u32(entry.flags);
        w.space();
        w.put_u64(entry.data.len() as u64);
        if let Some(cas) = cas {
            w.space();
            w.put_u64(cas);
        }
        w.crlf();
        w.put(&entry.data);
        w.crlf();
        w.finish();
    }

    /// Emit the gated `END` once every deferred reply has finished.
    pub(crate) fn maybe_end(&mut self) {
        if self.end_pending && self.outstanding == 0 {
            self.end_pending = false;
            self.write_simple(b"END");
        }
    }
}

/// A store command line whose data block has not arrived yet.
struct PendingStore {
    cmd: StoreCommand,
    key: Vec<u8>,
    flags: u32,
    exptime: u64,
    cas: Option<u64>,
    noreply: bool,
    /// Set when the command was rejected up front (oversized value, bad
    /// key); the body is still consumed to keep the stream framed.
    reject: Option<&'static str>,
}

/// One inbound connection.
pub struct Connection {
    core: Rc<RefCell<ConnCore>>,
    reader: LineReader,
    pending_store: Option<PendingStore>,
    max_key_len: usize,
    max_value_len: usize,
    version: String,
}

impl Connection {
    pub(crate) fn new(config: &ServerConfig) -> Self {
        Self {
            core: Rc::new(RefCell::new(ConnCore::new())),
            reader: LineReader::new(),
            pending_store: None,
            max_key_len: config.max_key_len,
            max_value_len: config.max_value_len,
            version: config.version.clone(),
        }
    }

    pub(crate) fn feed(&mut self, data: &[u8]) {
        self.reader.feed(data);
    }

    pub(crate) fn is_open(&self) -> bool {
        self.core.borrow().open
    }

    pub(crate) fn close(&mut self) {
        self.core.borrow_mut().open = false;
    }

    pub(crate) fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.core.borrow_mut().out)
    }

    /// Whether inbound processing is suspended behind deferred replies.
    pub(crate) fn blocked(&self) -> bool {
        let core = self.core.borrow();
        core.outstanding > 0 || core.end_pending
    }

    /// Process buffered frames until input runs out, the connection
    /// closes, or a deferred reply suspends the pipeline.
    pub(crate) fn pump<H: McHandler>(&mut self, handler: &mut H) -> Result<()> {
        while self.is_open() && !self.blocked() {
            match self.reader.next() {
                None => break,
                Some(Frame::Line(line)) => self.on_line(handler, line)?,
                Some(Frame::Body(body)) => self.on_body(handler, body)?,
            }
        }
        Ok(())
    }

    fn on_line<H: McHandler>(&mut self, handler: &mut H, line: Vec<u8>) -> Result<()> {
        let cmd = match parse_command(&line) {
            Ok(cmd) => cmd,
            Err(CommandError::Unknown) => {
                self.core.borrow_mut().write_simple(b"ERROR");
                return Ok(());
            }
            Err(err) => {
                self.core
                    .borrow_mut()
                    .write_error_line("CLIENT_ERROR", err.message());
                return Ok(());
            }
        };

        match cmd {
            Command::Store {
                cmd,
                key,
                flags,
                exptime,
                bytes,
                cas,
                noreply,
            } => {
                let reject = if key.len() > self.max_key_len {
                    Some("bad command line format")
                } else if bytes > self.max_value_len {
                    Some("object too large for cache")
                } else {
                    None
                };
                // The data block (plus CRLF) follows regardless of the
                // verdict; it must be consumed to keep the stream framed.
                self.reader.expect_body(bytes + 2);
                self.pending_store = Some(PendingStore {
                    cmd,
                    key: key.to_vec(),
                    flags,
                    exptime,
                    cas,
                    noreply,
                    reject,
                });
                Ok(())
            }
            Command::Counter {
                key,
                delta,
                negative,
                noreply,
            } => {
                if self.check_key(key, noreply) {
                    return Ok(());
                }
                let before = self.core.borrow().created;
                let mut ctx = HandlerCtx::new(&self.core, DeferredKind::Counter, noreply);
                let result = handler.on_counter(&mut ctx, key, delta, negative);
                self.reconcile(before, matches!(result, CounterResult::Deferred))?;
                match result {
                    CounterResult::Reply(CounterReply::Value(v)) => {
                        if !noreply {
                            self.core.borrow_mut().write_u64(v);
                        }
                    }
                    CounterResult::Reply(CounterReply::NotFound) => {
                        if !noreply {
                            self.core.borrow_mut().write_simple(b"NOT_FOUND");
                        }
                    }
                    CounterResult::NonNumeric => {
                        if !noreply {
                            self.core.borrow_mut().write_error_line(
                                "CLIENT_ERROR",
                                "cannot increment or decrement non-numeric value",
                            );
                        }
                    }
                    CounterResult::Fail(msg) => {
                        if !noreply {
                            self.core.borrow_mut().write_error_line("SERVER_ERROR", &msg);
                        }
                    }
                    CounterResult::Deferred => {}
                }
                Ok(())
            }
            Command::Delete { key, noreply } => {
                if self.check_key(key, noreply) {
                    return Ok(());
                }
                let before = self.core.borrow().created;
                let mut ctx = HandlerCtx::new(&self.core, DeferredKind::Delete, noreply);
                let result = handler.on_delete(&mut ctx, key);
                self.reconcile(before, matches!(result, DeleteResult::Deferred))?;
                match result {
                    DeleteResult::Reply(reply) => {
                        if !noreply {
                            self.core.borrow_mut().write_simple(reply.token());
                        }
                    }
                    DeleteResult::Fail(msg) => {
                        if !noreply {
                            self.core.borrow_mut().write_error_line("SERVER_ERROR", &msg);
                        }
                    }
                    DeleteResult::Deferred => {}
                }
                Ok(())
            }
            Command::Touch {
                key,
                exptime,
                noreply,
            } => {
                if self.check_key(key, noreply) {
                    return Ok(());
                }
                let before = self.core.borrow().created;
                let mut ctx = HandlerCtx::new(&self.core, DeferredKind::Touch, noreply);
                let result = handler.on_touch(&mut ctx, key, exptime);
                self.reconcile(before, matches!(result, TouchResult::Deferred))?;
                match result {
                    TouchResult::Reply(reply) => {
                        if !noreply {
                            self.core.borrow_mut().write_simple(reply.token());
                        }
                    }
                    TouchResult::Fail(msg) => {
                        if !noreply {
                            self.core.borrow_mut().write_error_line("SERVER_ERROR", &msg);
                        }
                    }
                    TouchResult::Deferred => {}
                }
                Ok(())
            }
            Command::Get {
                keys,
                with_cas,
                exptime,
            } => self.on_get(handler, &keys, with_cas, exptime),
            Command::Stats => {
                let entries = handler.on_stats();
                let mut core = self.core.borrow_mut();
                for (name, value) in &entries {
                    core.write_stat(name, value);
                }
                core.write_simple(b"END");
                Ok(())
            }
            Command::Version => {
                let mut line = Vec::with_capacity(8 + self.version.len());
                line.extend_from_slice(b"VERSION ");
                line.extend_from_slice(self.version.as_bytes());
                self.core.borrow_mut().write_simple(&line);
                Ok(())
            }
            Command::Quit => {
                debug!("peer quit");
                self.close();
                Ok(())
            }
        }
    }

    fn on_get<H: McHandler>(
        &mut self,
        handler: &mut H,
        keys: &[&[u8]],
        with_cas: bool,
        exptime: Option<u64>,
    ) -> Result<()> {
        if keys.iter().any(|k| k.len() > self.max_key_len) {
            self.core
                .borrow_mut()
                .write_error_line("CLIENT_ERROR", "bad command line format");
            return Ok(());
        }
        self.core.borrow_mut().with_cas = with_cas;

        let before = self.core.borrow().created;
        let mut ctx = HandlerCtx::new(&self.core, DeferredKind::GetBatch, false);
        let start = handler.on_get_start(&mut ctx, keys);
        self.reconcile(before, matches!(start, GetStartResult::Deferred))?;
        match start {
            GetStartResult::Fail(msg) => {
                self.core.borrow_mut().write_error_line("SERVER_ERROR", &msg);
                return Ok(());
            }
            GetStartResult::Deferred => {
                // The handler owns the batch: values arrive through the
                // batch deferred reply, and completing it releases END.
                let mut core = self.core.borrow_mut();
                core.end_pending = true;
                core.maybe_end();
                return Ok(());
            }
            GetStartResult::Continue => {}
        }

        for key in keys {
            let before = self.core.borrow().created;
            let mut ctx = HandlerCtx::new(
                &self.core,
                DeferredKind::GetValue { key: key.to_vec() },
                false,
            );
            let result = handler.on_get(&mut ctx, key, exptime);
            self.reconcile(before, matches!(result, GetResult::Deferred))?;
            match result {
                GetResult::Value(entry) => self.core.borrow_mut().write_value(key, &entry),
                GetResult::Miss => {}
                GetResult::Fail(msg) => {
                    self.core.borrow_mut().write_error_line("SERVER_ERROR", &msg);
                    return Ok(());
                }
                GetResult::Deferred => {}
            }
        }

        let before = self.core.borrow().created;
        let mut ctx = HandlerCtx::new(&self.core, DeferredKind::GetEnd, false);
        let end = handler.on_get_end(&mut ctx);
        self.reconcile(before, matches!(end, GetEndResult::Deferred))?;
        match end {
            GetEndResult::Fail(msg) => {
                self.core.borrow_mut().write_error_line("SERVER_ERROR", &msg);
                return Ok(());
            }
            GetEndResult::Done | GetEndResult::Deferred => {}
        }

        let mut core = self.core.borrow_mut();
        core.end_pending = true;
        core.maybe_end();
        Ok(())
    }

    fn on_body<H: McHandler>(&mut self, handler: &mut H, body: Vec<u8>) -> Result<()> {
        let pending = self.pending_store.take().unwrap();
        if !body.ends_with(CRLF) {
            // The stream framing is gone; an error line is still safe to
            // send before closing.
            self.core
                .borrow_mut()
                .write_error_line("CLIENT_ERROR", "bad data chunk");
            self.close();
            return Ok(());
        }
        if let Some(msg) = pending.reject {
            if !pending.noreply {
                self.core.borrow_mut().write_error_line("CLIENT_ERROR", msg);
            }
            return Ok(());
        }

        let data = &body[..body.len() - 2];
        let req = StoreRequest {
            cmd: pending.cmd,
            key: &pending.key,
            flags: pending.flags,
            exptime: pending.exptime,
            cas: pending.cas,
            data,
            noreply: pending.noreply,
        };
        let before = self.core.borrow().created;
        let mut ctx = HandlerCtx::new(&self.core, DeferredKind::Store, pending.noreply);
        let result = handler.on_store(&mut ctx, &req);
        self.reconcile(before, matches!(result, StoreResult::Deferred))?;
        match result {
            StoreResult::Reply(reply) => {
                if !pending.noreply {
                    self.core.borrow_mut().write_simple(reply.token());
                }
            }
            StoreResult::Fail(msg) => {
                if !pending.noreply {
                    self.core.borrow_mut().write_error_line("SERVER_ERROR", &msg);
                }
            }
            StoreResult::Deferred => {}
        }
        Ok(())
    }

    /// Reply `CLIENT_ERROR` for an oversized key. Returns whether the
    /// command was rejected.
    fn check_key(&mut self, key: &[u8], noreply: bool) -> bool {
        if key.len() > self.max_key_len {
            if !noreply {
                self.core
                    .borrow_mut()
                    .write_error_line("CLIENT_ERROR", "bad command line format");
            }
            return true;
        }
        false
    }

    /// Post-handler deferred-contract verification. A violation is a bug
    /// in the handler, not recoverable peer input: log, send a
    /// best-effort error line, close.
    fn reconcile(&mut self, created_before: u64, declared: bool) -> Result<()> {
        let (created_after, noreply_defer) = {
            let core = self.core.borrow();
            (core.created, core.noreply_defer)
        };
        if noreply_defer {
            error!("handler deferred a noreply request");
            self.fail_connection();
            return Err(Error::ContractViolation(
                "deferred reply created for a noreply request",
            ));
        }
        if let Err(msg) = reconcile_deferred(created_before, created_after, declared) {
            error!(reason = msg, "deferred-reply contract violated");
            self.fail_connection();
            return Err(Error::ContractViolation(msg));
        }
        Ok(())
    }

    fn fail_connection(&mut self) {
        let mut core = self.core.borrow_mut();
        core.write_error_line("SERVER_ERROR", "deferred reply contract violation");
        core.open = false;
    }
}
