//! Server command handling and deferred-completion protocol tests.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::TestCache;
use memrpc::{
    DeferredReply, Error, GetResult, GetStartResult, HandlerCtx, McHandler, McServer,
    ServerConfig, StoreRequest, StoreResult,
};
use memtext::StoreReply;

/// How the handler treats store commands.
#[derive(Clone, Copy, PartialEq, Eq)]
enum StoreMode {
    Sync,
    /// Create one deferred reply and declare it.
    Defer,
    /// Declare deferred without creating a deferred reply (contract bug).
    DeclareOnly,
    /// Create a deferred reply but answer synchronously (contract bug).
    CreateOnly,
}

/// Handler wrapper that can defer selected operations, stashing the
/// deferred replies for the test to finish later.
struct TestHandler {
    cache: TestCache,
    store_mode: StoreMode,
    defer_keys: Vec<Vec<u8>>,
    batch: bool,
    stash: Rc<RefCell<Vec<DeferredReply>>>,
}

impl TestHandler {
    fn sync() -> Self {
        Self {
            cache: TestCache::default(),
            store_mode: StoreMode::Sync,
            defer_keys: Vec::new(),
            batch: false,
            stash: Rc::new(RefCell::new(Vec::new())),
        }
    }

    fn with_store_mode(mode: StoreMode) -> Self {
        Self {
            store_mode: mode,
            ..Self::sync()
        }
    }
}

impl McHandler for TestHandler {
    fn on_store(&mut self, ctx: &mut HandlerCtx<'_>, req: &StoreRequest<'_>) -> StoreResult {
        match self.store_mode {
            StoreMode::Sync => self.cache.on_store(ctx, req),
            StoreMode::Defer => {
                self.stash.borrow_mut().push(ctx.defer());
                StoreResult::Deferred
            }
            StoreMode::DeclareOnly => StoreResult::Deferred,
            StoreMode::CreateOnly => {
                self.stash.borrow_mut().push(ctx.defer());
                self.cache.on_store(ctx, req)
            }
        }
    }

    fn on_counter(
        &mut self,
        ctx: &mut HandlerCtx<'_>,
        key: &[u8],
        delta: u64,
        negative: bool,
    ) -> memrpc::CounterResult {
        self.cache.on_counter(ctx, key, delta, negative)
    }

    fn on_delete(&mut self, ctx: &mut HandlerCtx<'_>, key: &[u8]) -> memrpc::DeleteResult {
        self.cache.on_delete(ctx, key)
    }

    fn on_touch(
        &mut self,
        ctx: &mut HandlerCtx<'_>,
        key: &[u8],
        exptime: u64,
    ) -> memrpc::TouchResult {
        self.cache.on_touch(ctx, key, exptime)
    }

    fn on_get_start(&mut self, ctx: &mut HandlerCtx<'_>, _keys: &[&[u8]]) -> GetStartResult {
        if self.batch {
            self.stash.borrow_mut().push(ctx.defer());
            GetStartResult::Deferred
        } else {
            GetStartResult::Continue
        }
    }

    fn on_get(
        &mut self,
        ctx: &mut HandlerCtx<'_>,
        key: &[u8],
        touch_exptime: Option<u64>,
    ) -> GetResult {
        if self.defer_keys.iter().any(|k| k == key) {
            self.stash.borrow_mut().push(ctx.defer());
            GetResult::Deferred
        } else {
            self.cache.on_get(ctx, key, touch_exptime)
        }
    }

    fn on_stats(&mut self) -> Vec<(String, String)> {
        self.cache.on_stats()
    }
}

fn server(handler: TestHandler) -> (McServer<TestHandler>, usize) {
    let mut server = McServer::new(handler, ServerConfig::default().with_version("test"));
    let id = server.accept();
    (server, id)
}

// =============================================================================
// Synchronous command handling
// =============================================================================

#[test]
fn store_then_get_round_trip() {
    let (mut srv, id) = server(TestHandler::sync());
    srv.on_bytes(id, b"set mykey 7 0 5\r\nhello\r\n").unwrap();
    assert_eq!(srv.take_output(id), b"STORED\r\n");

    srv.on_bytes(id, b"get mykey missing\r\n").unwrap();
    assert_eq!(srv.take_output(id), b"VALUE mykey 7 5\r\nhello\r\nEND\r\n");

    srv.on_bytes(id, b"gets mykey\r\n").unwrap();
    assert_eq!(srv.take_output(id), b"VALUE mykey 7 5 1\r\nhello\r\nEND\r\n");
}

#[test]
fn noreply_store_is_silent() {
    let (mut srv, id) = server(TestHandler::sync());
    srv.on_bytes(id, b"set k 0 0 3 noreply\r\nabc\r\nget k\r\n")
        .unwrap();
    assert_eq!(srv.take_output(id), b"VALUE k 0 3\r\nabc\r\nEND\r\n");
}

#[test]
fn counter_flow() {
    let (mut srv, id) = server(TestHandler::sync());
    srv.on_bytes(id, b"set n 0 0 2 noreply\r\n10\r\n").unwrap();
    srv.on_bytes(id, b"incr n 5\r\ndecr n 100\r\nincr missing 1\r\n")
        .unwrap();
    assert_eq!(srv.take_output(id), b"15\r\n0\r\nNOT_FOUND\r\n");

    srv.on_bytes(id, b"set s 0 0 3 noreply\r\nabc\r\nincr s 1\r\n")
        .unwrap();
    assert_eq!(
        srv.take_output(id),
        b"CLIENT_ERROR cannot increment or decrement non-numeric value\r\n"
    );
}

#[test]
fn unknown_and_malformed_commands_keep_connection_open() {
    let (mut srv, id) = server(TestHandler::sync());
    srv.on_bytes(id, b"frobnicate k\r\n").unwrap();
    assert_eq!(srv.take_output(id), b"ERROR\r\n");

    srv.on_bytes(id, b"set k abc 0 3\r\n").unwrap();
    assert_eq!(srv.take_output(id), b"CLIENT_ERROR bad command line format\r\n");

    assert!(srv.is_open(id));
    srv.on_bytes(id, b"version\r\n").unwrap();
    assert_eq!(srv.take_output(id), b"VERSION test\r\n");
}

#[test]
fn bad_data_chunk_closes_connection() {
    let (mut srv, id) = server(TestHandler::sync());
    // Declared 3 bytes but the terminator is not where it should be.
    srv.on_bytes(id, b"set k 0 0 3\r\nabcdef\r\n").unwrap();
    let out = srv.take_output(id);
    assert!(out.starts_with(b"CLIENT_ERROR bad data chunk"));
    assert!(!srv.is_open(id));
}

#[test]
fn stats_and_quit() {
    let (mut srv, id) = server(TestHandler::sync());
    srv.on_bytes(id, b"set a 0 0 1 noreply\r\nx\r\nstats\r\n")
        .unwrap();
    assert_eq!(srv.take_output(id), b"STAT curr_items 1\r\nEND\r\n");

    srv.on_bytes(id, b"quit\r\n").unwrap();
    assert!(!srv.is_open(id));
}

// =============================================================================
// Deferred replies
// =============================================================================

#[test]
fn deferred_store_completes_with_wire_reply() {
    let handler = TestHandler::with_store_mode(StoreMode::Defer);
    let stash = Rc::clone(&handler.stash);
    let (mut srv, id) = server(handler);

    srv.on_bytes(id, b"cas k 0 0 3 9\r\nabc\r\n").unwrap();
    assert_eq!(srv.take_output(id), b"");
    assert!(srv.is_open(id));

    // The eventual completion produces the exact wire reply.
    let deferred = stash.borrow_mut().pop().unwrap();
    deferred.store(StoreReply::Exists);
    assert_eq!(srv.take_output(id), b"EXISTS\r\n");
}

#[test]
fn deferred_store_blocks_pipelined_commands_until_completion() {
    let handler = TestHandler::with_store_mode(StoreMode::Defer);
    let stash = Rc::clone(&handler.stash);
    let (mut srv, id) = server(handler);

    srv.on_bytes(id, b"set a 0 0 1\r\nx\r\nversion\r\n").unwrap();
    // The version command is buffered behind the deferred store.
    assert_eq!(srv.take_output(id), b"");

    stash.borrow_mut().pop().unwrap().store(StoreReply::Stored);
    srv.pump(id).unwrap();
    assert_eq!(srv.take_output(id), b"STORED\r\nVERSION test\r\n");
}

#[test]
fn declared_deferred_without_object_is_fatal() {
    let handler = TestHandler::with_store_mode(StoreMode::DeclareOnly);
    let (mut srv, id) = server(handler);

    match srv.on_bytes(id, b"set k 0 0 1\r\nx\r\n") {
        Err(Error::ContractViolation(_)) => {}
        other => panic!("expected contract violation, got {:?}", other),
    }
    let out = srv.take_output(id);
    assert!(out.ends_with(b"SERVER_ERROR deferred reply contract violation\r\n"));
    assert!(!srv.is_open(id));
}

#[test]
fn undeclared_deferred_object_is_fatal() {
    let handler = TestHandler::with_store_mode(StoreMode::CreateOnly);
    let stash = Rc::clone(&handler.stash);
    let (mut srv, id) = server(handler);

    match srv.on_bytes(id, b"set k 0 0 1\r\nx\r\n") {
        Err(Error::ContractViolation(_)) => {}
        other => panic!("expected contract violation, got {:?}", other),
    }
    assert!(!srv.is_open(id));
    stash.borrow_mut().clear();
}

#[test]
fn noreply_request_must_not_defer() {
    let handler = TestHandler::with_store_mode(StoreMode::Defer);
    let stash = Rc::clone(&handler.stash);
    let (mut srv, id) = server(handler);

    match srv.on_bytes(id, b"set k 0 0 1 noreply\r\nx\r\n") {
        Err(Error::ContractViolation(_)) => {}
        other => panic!("expected contract violation, got {:?}", other),
    }
    assert!(!srv.is_open(id));
    stash.borrow_mut().clear();
}

#[test]
fn dropped_deferred_reply_is_finished_defensively() {
    let handler = TestHandler::with_store_mode(StoreMode::Defer);
    let stash = Rc::clone(&handler.stash);
    let (mut srv, id) = server(handler);

    srv.on_bytes(id, b"set k 0 0 1\r\nx\r\n").unwrap();
    // Handler bug: the deferred reply goes out of scope unfinished.
    stash.borrow_mut().clear();
    assert_eq!(
        srv.take_output(id),
        b"SERVER_ERROR unfinished deferred reply\r\n"
    );
    // The pipeline is released; the connection is not wedged.
    srv.on_bytes(id, b"version\r\n").unwrap();
    assert_eq!(srv.take_output(id), b"VERSION test\r\n");
}

// =============================================================================
// Deferred gets
// =============================================================================

#[test]
fn get_with_deferred_key_gates_end() {
    let mut handler = TestHandler::sync();
    handler.defer_keys.push(b"slow".to_vec());
    let stash = Rc::clone(&handler.stash);
    let (mut srv, id) = server(handler);

    srv.on_bytes(id, b"set fast 0 0 4 noreply\r\naaaa\r\n")
        .unwrap();
    srv.on_bytes(id, b"get fast slow\r\n").unwrap();

    // The synchronous key was sent immediately; END waits for the
    // deferred one.
    assert_eq!(srv.take_output(id), b"VALUE fast 0 4\r\naaaa\r\n");

    let deferred = stash.borrow_mut().pop().unwrap();
    deferred.found(&memrpc::ValueEntry {
        flags: 1,
        cas: 7,
        data: b"bb".to_vec(),
    });
    assert_eq!(srv.take_output(id), b"VALUE slow 1 2\r\nbb\r\nEND\r\n");
}

#[test]
fn deferred_key_miss_still_releases_end() {
    let mut handler = TestHandler::sync();
    handler.defer_keys.push(b"slow".to_vec());
    let stash = Rc::clone(&handler.stash);
    let (mut srv, id) = server(handler);

    srv.on_bytes(id, b"get slow\r\n").unwrap();
    assert_eq!(srv.take_output(id), b"");

    stash.borrow_mut().pop().unwrap().miss();
    assert_eq!(srv.take_output(id), b"END\r\n");
}

#[test]
fn batch_deferred_get_emits_values_then_end() {
    let mut handler = TestHandler::sync();
    handler.batch = true;
    let stash = Rc::clone(&handler.stash);
    let (mut srv, id) = server(handler);

    srv.on_bytes(id, b"gets a b\r\n").unwrap();
    assert_eq!(srv.take_output(id), b"");

    let mut deferred = stash.borrow_mut().pop().unwrap();
    deferred.batch_value(
        b"a",
        &memrpc::ValueEntry {
            flags: 0,
            cas: 3,
            data: b"xy".to_vec(),
        },
    );
    deferred.complete();
    assert_eq!(srv.take_output(id), b"VALUE a 0 2 3\r\nxy\r\nEND\r\n");
}
