//! Asynchronous client: request serialization and response pairing.
//!
//! [`pair`] returns two halves. [`McClient`] is the producer side: any
//! number of threads call request methods, each of which serializes the
//! request into the shared output buffer and, when a response handler was
//! supplied, pushes one descriptor into the pairing ring, in the same
//! critical section so descriptor order always matches byte order.
//! [`McClientIo`] is owned by the I/O thread: it consumes received bytes,
//! pops exactly one descriptor per response (one per response *group* for
//! the get family) and dispatches the stored callback.
//!
//! A request issued with no handler is sent in `noreply` form and never
//! enters the ring: no pairing obligation exists for it.

use std::sync::{Arc, Mutex};

use seqring::{Consumer, Producer, SeqRing};
use tracing::{debug, error};

use memtext::command::{
    counter_line_len, delete_line_len, get_line_len, store_line_len, touch_line_len, NOREPLY,
};
use memtext::{
    is_end, parse_counter_reply, parse_error_line, parse_stat_line, parse_value_header,
    CounterReply, DeleteReply, GetCommand, RequestKind, ReservedWriter, StoreCommand, StoreReply,
    TouchReply, ValueHeader,
};

use crate::config::ClientConfig;
use crate::descriptor::{
    Descriptor, Fault, GetEnd, GetEndCallback, GetValue, ReplyResult, ResponseHandler,
    StatsCallback, ValueCallback,
};
use crate::error::{Error, Result};
use crate::reader::{Frame, LineReader};

/// Create a connected client/IO pair sharing one pairing ring and one
/// output buffer.
pub fn pair(config: ClientConfig) -> (McClient, McClientIo) {
    let (queue_tx, queue_rx) = SeqRing::with_backoff(config.queue_capacity, config.backoff);
    let client = McClient {
        shared: Arc::new(Shared {
            out: Mutex::new(Vec::new()),
            queue: queue_tx,
            config,
        }),
    };
    let io = McClientIo {
        queue: queue_rx,
        reader: LineReader::new(),
        get: None,
        stats: None,
        pending_value: None,
        closed: false,
    };
    (client, io)
}

struct Shared {
    out: Mutex<Vec<u8>>,
    queue: Producer<Descriptor>,
    config: ClientConfig,
}

/// Producer half: issue requests from any thread.
#[derive(Clone)]
pub struct McClient {
    shared: Arc<Shared>,
}

impl McClient {
    // -- storage family ----------------------------------------------------

    pub fn set<F>(&self, key: &[u8], flags: u32, exptime: u64, data: &[u8], on_reply: F) -> Result<()>
    where
        F: FnOnce(ReplyResult<StoreReply>) + Send + 'static,
    {
        self.store(StoreCommand::Set, key, flags, exptime, None, data, Some(Box::new(on_reply)))
    }

    pub fn set_noreply(&self, key: &[u8], flags: u32, exptime: u64, data: &[u8]) -> Result<()> {
        self.store(StoreCommand::Set, key, flags, exptime, None, data, None)
    }

    pub fn add<F>(&self, key: &[u8], flags: u32, exptime: u64, data: &[u8], on_reply: F) -> Result<()>
    where
        F: FnOnce(ReplyResult<StoreReply>) + Send + 'static,
    {
        self.store(StoreCommand::Add, key, flags, exptime, None, data, Some(Box::new(on_reply)))
    }

    pub fn add_noreply(&self, key: &[u8], flags: u32, exptime: u64, data: &[u8]) -> Result<()> {
        self.store(StoreCommand::Add, key, flags, exptime, None, data, None)
    }

    pub fn replace<F>(&self, key: &[u8], flags: u32, exptime: u64, data: &[u8], on_reply: F) -> Result<()>
    where
        F: FnOnce(ReplyResult<StoreReply>) + Send + 'static,
    {
        self.store(StoreCommand::Replace, key, flags, exptime, None, data, Some(Box::new(on_reply)))
    }

    pub fn replace_noreply(&self, key: &[u8], flags: u32, exptime: u64, data: &[u8]) -> Result<()> {
        self.store(StoreCommand::Replace, key, flags, exptime, None, data, None)
    }

    pub fn append<F>(&self, key: &[u8], data: &[u8], on_reply: F) -> Result<()>
    where
        F: FnOnce(ReplyResult<StoreReply>) + Send + 'static,
    {
        self.store(StoreCommand::Append, key, 0, 0, None, data, Some(Box::new(on_reply)))
    }

    pub fn append_noreply(&self, key: &[u8], data: &[u8]) -> Result<()> {
        self.store(StoreCommand::Append, key, 0, 0, None, data, None)
    }

    pub fn prepend<F>(&self, key: &[u8], data: &[u8], on_reply: F) -> Result<()>
    where
        F: FnOnce(ReplyResult<StoreReply>) + Send + 'static,
    {
        self.store(StoreCommand::Prepend, key, 0, 0, None, data, Some(Box::new(on_reply)))
    }

    pub fn prepend_noreply(&self, key: &[u8], data: &[u8]) -> Result<()> {
        self.store(StoreCommand::Prepend, key, 0, 0, None, data, None)
    }

    pub fn cas<F>(
        &self,
        key: &[u8],
        flags: u32,
        exptime: u64,
        cas_id: u64,
        data: &[u8],
        on_reply: F,
    ) -> Result<()>
    where
        F: FnOnce(ReplyResult<StoreReply>) + Send + 'static,
    {
        self.store(StoreCommand::Cas, key, flags, exptime, Some(cas_id), data, Some(Box::new(on_reply)))
    }

    pub fn cas_noreply(
        &self,
        key: &[u8],
        flags: u32,
        exptime: u64,
        cas_id: u64,
        data: &[u8],
    ) -> Result<()> {
        self.store(StoreCommand::Cas, key, flags, exptime, Some(cas_id), data, None)
    }

    fn store(
        &self,
        cmd: StoreCommand,
        key: &[u8],
        flags: u32,
        exptime: u64,
        cas: Option<u64>,
        data: &[u8],
        handler: Option<crate::descriptor::StoreCallback>,
    ) -> Result<()> {
        self.check_key(key)?;
        let max = self.shared.config.max_value_len;
        if data.len() > max {
            return Err(Error::ValueTooLarge {
                len: data.len(),
                max,
            });
        }
        let noreply = handler.is_none();
        let line_len = store_line_len(cmd, key.len(), flags, exptime, data.len(), cas, noreply);
        let total = line_len + data.len() + 2;
        let desc = handler.map(|cb| {
            let mut d = Descriptor::new(RequestKind::Store, ResponseHandler::Store(cb));
            d.keys.push(key.to_vec());
            d
        });
        self.write_and_pair(total, desc, |w| {
            w.put(cmd.verb());
            w.space();
            w.put(key);
            w.space();
            w.put_u32(flags);
            w.space();
            w.put_u64(exptime);
            w.space();
            w.put_u64(data.len() as u64);
            if let Some(cas) = cas {
                w.space();
                w.put_u64(cas);
            }
            if noreply {
                w.space();
                w.put(NOREPLY);
            }
            w.crlf();
            w.put(data);
            w.crlf();
        });
        Ok(())
    }

    // -- increment / decrement --------------------------------------------

    pub fn incr<F>(&self, key: &[u8], delta: u64, on_reply: F) -> Result<()>
    where
        F: FnOnce(ReplyResult<CounterReply>) + Send + 'static,
    {
        self.counter(false, key, delta, Some(Box::new(on_reply)))
    }

    pub fn incr_noreply(&self, key: &[u8], delta: u64) -> Result<()> {
        self.counter(false, key, delta, None)
    }

    pub fn decr<F>(&self, key: &[u8], delta: u64, on_reply: F) -> Result<()>
    where
        F: FnOnce(ReplyResult<CounterReply>) + Send + 'static,
    {
        self.counter(true, key, delta, Some(Box::new(on_reply)))
    }

    pub fn decr_noreply(&self, key: &[u8], delta: u64) -> Result<()> {
        self.counter(true, key, delta, None)
    }

    fn counter(
        &self,
        negative: bool,
        key: &[u8],
        delta: u64,
        handler: Option<crate::descriptor::CounterCallback>,
    ) -> Result<()> {
        self.check_key(key)?;
        let noreply = handler.is_none();
        let total = counter_line_len(key.len(), delta, noreply);
        let desc = handler.map(|cb| {
            let mut d = Descriptor::new(RequestKind::Counter, ResponseHandler::Counter(cb));
            d.keys.push(key.to_vec());
            d
        });
        self.write_and_pair(total, desc, |w| {
            w.put(if negative { b"decr" } else { b"incr" });
            w.space();
            w.put(key);
            w.space();
            w.put_u64(delta);
            if noreply {
                w.space();
                w.put(NOREPLY);
            }
            w.crlf();
        });
        Ok(())
    }

    // -- delete / touch ----------------------------------------------------

    pub fn delete<F>(&self, key: &[u8], on_reply: F) -> Result<()>
    where
        F: FnOnce(ReplyResult<DeleteReply>) + Send + 'static,
    {
        self.delete_inner(key, Some(Box::new(on_reply)))
    }

    pub fn delete_noreply(&self, key: &[u8]) -> Result<()> {
        self.delete_inner(key, None)
    }

    fn delete_inner(
        &self,
        key: &[u8],
        handler: Option<crate::descriptor::DeleteCallback>,
    ) -> Result<()> {
        self.check_key(key)?;
        let noreply = handler.is_none();
        let total = delete_line_len(key.len(), noreply);
        let desc = handler.map(|cb| {
            let mut d = Descriptor::new(RequestKind::Delete, ResponseHandler::Delete(cb));
            d.keys.push(key.to_vec());
            d
        });
        self.write_and_pair(total, desc, |w| {
            w.put(b"delete");
            w.space();
            w.put(key);
            if noreply {
                w.space();
                w.put(NOREPLY);
            }
            w.crlf();
        });
        Ok(())
    }

    pub fn touch<F>(&self, key: &[u8], exptime: u64, on_reply: F) -> Result<()>
    where
        F: FnOnce(ReplyResult<TouchReply>) + Send + 'static,
    {
        self.touch_inner(key, exptime, Some(Box::new(on_reply)))
    }

    pub fn touch_noreply(&self, key: &[u8], exptime: u64) -> Result<()> {
        self.touch_inner(key, exptime, None)
    }

    fn touch_inner(
        &self,
        key: &[u8],
        exptime: u64,
        handler: Option<crate::descriptor::TouchCallback>,
    ) -> Result<()> {
        self.check_key(key)?;
        let noreply = handler.is_none();
        let total = touch_line_len(key.len(), exptime, noreply);
        let desc = handler.map(|cb| {
            let mut d = Descriptor::new(RequestKind::Touch, ResponseHandler::Touch(cb));
            d.keys.push(key.to_vec());
            d
        });
        self.write_and_pair(total, desc, |w| {
            w.put(b"touch");
            w.space();
            w.put(key);
            w.space();
            w.put_u64(exptime);
            if noreply {
                w.space();
                w.put(NOREPLY);
            }
            w.crlf();
        });
        Ok(())
    }

    // -- get family --------------------------------------------------------

    pub fn get<V, E>(&self, keys: &[&[u8]], track_notfound: bool, on_value: V, on_end: E) -> Result<()>
    where
        V: FnMut(GetValue) + Send + 'static,
        E: FnOnce(ReplyResult<GetEnd>) + Send + 'static,
    {
        self.get_inner(GetCommand::Get, None, keys, track_notfound, Box::new(on_value), Box::new(on_end))
    }

    pub fn gets<V, E>(&self, keys: &[&[u8]], track_notfound: bool, on_value: V, on_end: E) -> Result<()>
    where
        V: FnMut(GetValue) + Send + 'static,
        E: FnOnce(ReplyResult<GetEnd>) + Send + 'static,
    {
        self.get_inner(GetCommand::Gets, None, keys, track_notfound, Box::new(on_value), Box::new(on_end))
    }

    /// Get-and-touch: fetch keys and reset their expiration.
    pub fn gat<V, E>(
        &self,
        exptime: u64,
        keys: &[&[u8]],
        track_notfound: bool,
        on_value: V,
        on_end: E,
    ) -> Result<()>
    where
        V: FnMut(GetValue) + Send + 'static,
        E: FnOnce(ReplyResult<GetEnd>) + Send + 'static,
    {
        self.get_inner(GetCommand::Gat, Some(exptime), keys, track_notfound, Box::new(on_value), Box::new(on_end))
    }

    pub fn gats<V, E>(
        &self,
        exptime: u64,
        keys: &[&[u8]],
        track_notfound: bool,
        on_value: V,
        on_end: E,
    ) -> Result<()>
    where
        V: FnMut(GetValue) + Send + 'static,
        E: FnOnce(ReplyResult<GetEnd>) + Send + 'static,
    {
        self.get_inner(GetCommand::Gats, Some(exptime), keys, track_notfound, Box::new(on_value), Box::new(on_end))
    }

    fn get_inner(
        &self,
        cmd: GetCommand,
        exptime: Option<u64>,
        keys: &[&[u8]],
        track_notfound: bool,
        on_value: ValueCallback,
        on_end: GetEndCallback,
    ) -> Result<()> {
        if keys.is_empty() {
            return Err(Error::InvalidKey("get with no keys"));
        }
        for key in keys {
            self.check_key(key)?;
        }
        let total = get_line_len(cmd, exptime, keys);
        let kind = if cmd.with_cas() {
            RequestKind::GetCas
        } else {
            RequestKind::Get
        };
        let mut desc = Descriptor::new(kind, ResponseHandler::Get { on_value, on_end });
        desc.keys = keys.iter().map(|k| k.to_vec()).collect();
        desc.track_notfound = track_notfound;
        self.write_and_pair(total, Some(desc), |w| {
            w.put(cmd.verb());
            if let Some(exptime) = exptime {
                w.space();
                w.put_u64(exptime);
            }
            for key in keys {
                w.space();
                w.put(key);
            }
            w.crlf();
        });
        Ok(())
    }

    // -- stats / version / quit -------------------------------------------

    pub fn stats<F>(&self, on_reply: F) -> Result<()>
    where
        F: FnOnce(ReplyResult<Vec<(String, String)>>) + Send + 'static,
    {
        let desc = Descriptor::new(RequestKind::Stats, ResponseHandler::Stats(Box::new(on_reply)));
        self.write_and_pair(b"stats\r\n".len(), Some(desc), |w| {
            w.put(b"stats");
            w.crlf();
        });
        Ok(())
    }

    pub fn version<F>(&self, on_reply: F) -> Result<()>
    where
        F: FnOnce(ReplyResult<String>) + Send + 'static,
    {
        let desc = Descriptor::new(RequestKind::Version, ResponseHandler::Version(Box::new(on_reply)));
        self.write_and_pair(b"version\r\n".len(), Some(desc), |w| {
            w.put(b"version");
            w.crlf();
        });
        Ok(())
    }

    /// Ask the server to close the connection. No reply, no descriptor.
    pub fn quit(&self) -> Result<()> {
        self.write_and_pair(b"quit\r\n".len(), None, |w| {
            w.put(b"quit");
            w.crlf();
        });
        Ok(())
    }

    // -- plumbing ----------------------------------------------------------

    /// Drain the pending output bytes for the transport to write.
    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut *self.shared.out.lock().unwrap())
    }

    /// Racy snapshot of outstanding request descriptors.
    pub fn pending(&self) -> usize {
        self.shared.queue.used()
    }

    /// Serialize a request and, when `desc` is present, push it into the
    /// pairing ring. Both happen under the output lock so descriptor order
    /// matches byte order; the push follows the completed write, so a
    /// rejected request never leaves an orphan descriptor behind.
    fn write_and_pair(
        &self,
        total: usize,
        desc: Option<Descriptor>,
        fill: impl FnOnce(&mut ReservedWriter<'_>),
    ) {
        let mut out = self.shared.out.lock().unwrap();
        let mut w = ReservedWriter::new(&mut out, total);
        fill(&mut w);
        w.finish();
        if let Some(desc) = desc {
            self.shared.queue.push(desc);
        }
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidKey("empty key"));
        }
        if key.len() > self.shared.config.max_key_len {
            return Err(Error::InvalidKey("key too long"));
        }
        if key.iter().any(|&b| b <= b' ' || b == 0x7f) {
            return Err(Error::InvalidKey("key contains whitespace or control bytes"));
        }
        Ok(())
    }
}

/// I/O-thread half: feed received bytes, dispatch callbacks.
pub struct McClientIo {
    queue: Consumer<Descriptor>,
    reader: LineReader,
    get: Option<GetState>,
    stats: Option<StatsState>,
    pending_value: Option<ValueHeader>,
    closed: bool,
}

struct GetState {
    on_value: ValueCallback,
    on_end: Option<GetEndCallback>,
    keys: Vec<Vec<u8>>,
    found: Vec<bool>,
    track: bool,
}

struct StatsState {
    entries: Vec<(String, String)>,
    cb: Option<StatsCallback>,
}

impl McClientIo {
    /// Feed bytes received from the server.
    ///
    /// A desync (a reply with no outstanding descriptor, or a token
    /// outside the expected closed set) is fatal: the error is returned,
    /// further input is refused, and the caller must close the
    /// connection.
    pub fn on_bytes(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.reader.feed(data);
        while let Some(frame) = self.reader.next() {
            let step = match frame {
                Frame::Line(line) => self.on_line(line),
                Frame::Body(body) => self.on_body(body),
            };
            if let Err(e) = step {
                self.closed = true;
                error!(error = %e, "response stream desynced, closing connection");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Racy snapshot of descriptors still awaiting replies.
    pub fn outstanding(&self) -> usize {
        self.queue.used()
    }

    /// Whether a fatal desync has shut this half down.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn on_line(&mut self, line: Vec<u8>) -> Result<()> {
        if self.get.is_some() {
            return self.on_get_line(line);
        }
        if self.stats.is_some() {
            return self.on_stats_line(line);
        }

        let desc = self
            .queue
            .pop()
            .ok_or(Error::Desync("response line with no outstanding request"))?;
        debug!(kind = ?desc.kind, key = %desc.key_for_log(), "pairing response line");

        match desc.kind {
            RequestKind::Store => {
                let cb = match desc.handler {
                    ResponseHandler::Store(cb) => cb,
                    _ => return Err(Error::Desync("descriptor kind does not match handler")),
                };
                match StoreReply::parse(&line) {
                    Ok(reply) => {
                        cb(Ok(reply));
                        Ok(())
                    }
                    Err(_) => match parse_error_line(&line) {
                        Some(el) => {
                            cb(Err(el.into()));
                            Ok(())
                        }
                        None => {
                            cb(Err(Fault::Protocol(lossy(&line))));
                            Err(Error::Desync("unexpected store reply token"))
                        }
                    },
                }
            }
            RequestKind::Counter => {
                let cb = match desc.handler {
                    ResponseHandler::Counter(cb) => cb,
                    _ => return Err(Error::Desync("descriptor kind does not match handler")),
                };
                match parse_counter_reply(&line) {
                    Ok(reply) => {
                        cb(Ok(reply));
                        Ok(())
                    }
                    Err(_) => match parse_error_line(&line) {
                        Some(el) => {
                            cb(Err(el.into()));
                            Ok(())
                        }
                        None => {
                            // Not a number, not NOT_FOUND, not an error
                            // line: a parse failure is a protocol error,
                            // never a "not found" result.
                            cb(Err(Fault::Protocol(lossy(&line))));
                            Err(Error::Desync("unparseable counter reply"))
                        }
                    },
                }
            }
            RequestKind::Delete => {
                let cb = match desc.handler {
                    ResponseHandler::Delete(cb) => cb,
                    _ => return Err(Error::Desync("descriptor kind does not match handler")),
                };
                match DeleteReply::parse(&line) {
                    Ok(reply) => {
                        cb(Ok(reply));
                        Ok(())
                    }
                    Err(_) => match parse_error_line(&line) {
                        Some(el) => {
                            cb(Err(el.into()));
                            Ok(())
                        }
                        None => {
                            cb(Err(Fault::Protocol(lossy(&line))));
                            Err(Error::Desync("unexpected delete reply token"))
                        }
                    },
                }
            }
            RequestKind::Touch => {
                let cb = match desc.handler {
                    ResponseHandler::Touch(cb) => cb,
                    _ => return Err(Error::Desync("descriptor kind does not match handler")),
                };
                match TouchReply::parse(&line) {
                    Ok(reply) => {
                        cb(Ok(reply));
                        Ok(())
                    }
                    Err(_) => match parse_error_line(&line) {
                        Some(el) => {
                            cb(Err(el.into()));
                            Ok(())
                        }
                        None => {
                            cb(Err(Fault::Protocol(lossy(&line))));
                            Err(Error::Desync("unexpected touch reply token"))
                        }
                    },
                }
            }
            RequestKind::Get | RequestKind::GetCas => {
                let (on_value, on_end) = match desc.handler {
                    ResponseHandler::Get { on_value, on_end } => (on_value, on_end),
                    _ => return Err(Error::Desync("descriptor kind does not match handler")),
                };
                let found = vec![false; desc.keys.len()];
                self.get = Some(GetState {
                    on_value,
                    on_end: Some(on_end),
                    keys: desc.keys,
                    found,
                    track: desc.track_notfound,
                });
                self.on_get_line(line)
            }
            RequestKind::Stats => {
                let cb = match desc.handler {
                    ResponseHandler::Stats(cb) => cb,
                    _ => return Err(Error::Desync("descriptor kind does not match handler")),
                };
                self.stats = Some(StatsState {
                    entries: Vec::new(),
                    cb: Some(cb),
                });
                self.on_stats_line(line)
            }
            RequestKind::Version => {
                let cb = match desc.handler {
                    ResponseHandler::Version(cb) => cb,
                    _ => return Err(Error::Desync("descriptor kind does not match handler")),
                };
                if let Some(el) = parse_error_line(&line) {
                    cb(Err(el.into()));
                    return Ok(());
                }
                let version = line.strip_prefix(b"VERSION ".as_ref()).unwrap_or(&line[..]);
                cb(Ok(String::from_utf8_lossy(version).into_owned()));
                Ok(())
            }
            RequestKind::None => Err(Error::Desync("reset descriptor in pairing queue")),
        }
    }

    /// A line while a get response group is open: `VALUE` headers, the
    /// terminating `END`, or an error line. Only `END` (or an error)
    /// completes the descriptor; VALUE lines never pop.
    fn on_get_line(&mut self, line: Vec<u8>) -> Result<()> {
        if is_end(&line) {
            let mut st = self.get.take().unwrap();
            let missing = if st.track {
                st.keys
                    .iter()
                    .zip(st.found.iter())
                    .filter(|(_, &found)| !found)
                    .map(|(k, _)| k.clone())
                    .collect()
            } else {
                Vec::new()
            };
            (st.on_end.take().unwrap())(Ok(GetEnd { missing }));
            return Ok(());
        }
        match parse_value_header(&line) {
            Ok(Some(hdr)) => {
                self.reader.expect_body(hdr.bytes + 2);
                self.pending_value = Some(hdr);
                Ok(())
            }
            Ok(None) => match parse_error_line(&line) {
                Some(el) => {
                    let mut st = self.get.take().unwrap();
                    (st.on_end.take().unwrap())(Err(el.into()));
                    Ok(())
                }
                None => Err(Error::Desync("unexpected line in get response")),
            },
            Err(_) => Err(Error::Desync("malformed VALUE header")),
        }
    }

    fn on_stats_line(&mut self, line: Vec<u8>) -> Result<()> {
        if is_end(&line) {
            let mut st = self.stats.take().unwrap();
            (st.cb.take().unwrap())(Ok(st.entries));
            return Ok(());
        }
        if let Some((name, value)) = parse_stat_line(&line) {
            let st = self.stats.as_mut().unwrap();
            st.entries.push((
                String::from_utf8_lossy(&name).into_owned(),
                String::from_utf8_lossy(&value).into_owned(),
            ));
            return Ok(());
        }
        match parse_error_line(&line) {
            Some(el) => {
                let mut st = self.stats.take().unwrap();
                (st.cb.take().unwrap())(Err(el.into()));
                Ok(())
            }
            None => Err(Error::Desync("unexpected line in stats response")),
        }
    }

    fn on_body(&mut self, body: Vec<u8>) -> Result<()> {
        let hdr = self
            .pending_value
            .take()
            .ok_or(Error::Desync("body bytes with no VALUE header"))?;
        if !body.ends_with(b"\r\n") {
            return Err(Error::Desync("value body missing CRLF terminator"));
        }
        let st = self
            .get
            .as_mut()
            .ok_or(Error::Desync("value body outside a get response"))?;
        if st.track {
            if let Some(idx) = st
                .keys
                .iter()
                .enumerate()
                .position(|(i, k)| !st.found[i] && k == &hdr.key)
            {
                st.found[idx] = true;
            }
        }
        (st.on_value)(GetValue {
            key: hdr.key,
            flags: hdr.flags,
            cas: hdr.cas,
            data: body[..body.len() - 2].to_vec(),
        });
        Ok(())
    }
}

fn lossy(line: &[u8]) -> String {
    String::from_utf8_lossy(line).into_owned()
}
