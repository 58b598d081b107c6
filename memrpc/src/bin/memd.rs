//! In-memory cache server speaking the memcached text protocol.
//!
//! Run with:
//! ```bash
//! cargo run -p memrpc --bin memd --features memd-bin -- --listen 127.0.0.1:11311
//! ```

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use memrpc::{
    CounterResult, DeleteResult, GetResult, HandlerCtx, McHandler, McServer, ServerConfig,
    StoreRequest, StoreResult, TouchResult, ValueEntry,
};
use memtext::expiry::{resolve_exptime, unix_now};
use memtext::{CounterReply, DeleteReply, StoreCommand, StoreReply, TouchReply};

// =============================================================================
// CLI Arguments
// =============================================================================

#[derive(Parser, Debug)]
#[command(name = "memd")]
#[command(about = "In-memory cache server speaking the memcached text protocol")]
struct Args {
    /// Listen address
    #[arg(short, long, default_value = "127.0.0.1:11311")]
    listen: String,

    /// Maximum value size in bytes
    #[arg(long, default_value = "1048576")]
    max_value: usize,
}

// =============================================================================
// Cache
// =============================================================================

struct Entry {
    flags: u32,
    cas: u64,
    data: Vec<u8>,
    expires_at: Option<u64>,
}

#[derive(Default)]
struct CacheState {
    map: HashMap<Vec<u8>, Entry>,
    cas_seq: u64,
    hits: u64,
    misses: u64,
}

impl CacheState {
    fn next_cas(&mut self) -> u64 {
        self.cas_seq += 1;
        self.cas_seq
    }

    /// Drop the entry for `key` if it has expired.
    fn purge_expired(&mut self, key: &[u8], now: u64) {
        let expired = self
            .map
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= now);
        if expired {
            self.map.remove(key);
        }
    }
}

#[derive(Clone)]
struct CacheHandler {
    state: Arc<Mutex<CacheState>>,
}

impl McHandler for CacheHandler {
    fn on_store(&mut self, _ctx: &mut HandlerCtx<'_>, req: &StoreRequest<'_>) -> StoreResult {
        let now = unix_now();
        let mut st = self.state.lock().unwrap();
        st.purge_expired(req.key, now);
        let expires_at = resolve_exptime(req.exptime, now);
        let exists = st.map.contains_key(req.key);
        let cas = st.next_cas();

        let reply = match req.cmd {
            StoreCommand::Set => {
                st.map.insert(
                    req.key.to_vec(),
                    Entry {
                        flags: req.flags,
                        cas,
                        data: req.data.to_vec(),
                        expires_at,
                    },
                );
                StoreReply::Stored
            }
            StoreCommand::Add => {
                if exists {
                    StoreReply::NotStored
                } else {
                    st.map.insert(
                        req.key.to_vec(),
                        Entry {
                            flags: req.flags,
                            cas,
                            data: req.data.to_vec(),
                            expires_at,
                        },
                    );
                    StoreReply::Stored
                }
            }
            StoreCommand::Replace => {
                if exists {
                    st.map.insert(
                        req.key.to_vec(),
                        Entry {
                            flags: req.flags,
                            cas,
                            data: req.data.to_vec(),
                            expires_at,
                        },
                    );
                    StoreReply::Stored
                } else {
                    StoreReply::NotStored
                }
            }
            StoreCommand::Append | StoreCommand::Prepend => match st.map.get_mut(req.key) {
                Some(entry) => {
                    if req.cmd == StoreCommand::Append {
                        entry.data.extend_from_slice(req.data);
                    } else {
                        let mut data = req.data.to_vec();
                        data.extend_from_slice(&entry.data);
                        entry.data = data;
                    }
                    entry.cas = cas;
                    StoreReply::Stored
                }
                None => StoreReply::NotStored,
            },
            StoreCommand::Cas => match st.map.get_mut(req.key) {
                None => StoreReply::NotFound,
                Some(entry) if Some(entry.cas) == req.cas => {
                    *entry = Entry {
                        flags: req.flags,
                        cas,
                        data: req.data.to_vec(),
                        expires_at,
                    };
                    StoreReply::Stored
                }
                Some(_) => StoreReply::Exists,
            },
        };
        StoreResult::Reply(reply)
    }

    fn on_counter(
        &mut self,
        _ctx: &mut HandlerCtx<'_>,
        key: &[u8],
        delta: u64,
        negative: bool,
    ) -> CounterResult {
        let now = unix_now();
        let mut st = self.state.lock().unwrap();
        st.purge_expired(key, now);
        if !st.map.contains_key(key) {
            return CounterResult::Reply(CounterReply::NotFound);
        }
        let cas = st.next_cas();
        let entry = st.map.get_mut(key).unwrap();
        let current = match std::str::from_utf8(&entry.data)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            Some(v) => v,
            None => return CounterResult::NonNumeric,
        };
        // incr wraps at u64, decr clamps at zero.
        let updated = if negative {
            current.saturating_sub(delta)
        } else {
            current.wrapping_add(delta)
        };
        entry.data = updated.to_string().into_bytes();
        entry.cas = cas;
        CounterResult::Reply(CounterReply::Value(updated))
    }

    fn on_delete(&mut self, _ctx: &mut HandlerCtx<'_>, key: &[u8]) -> DeleteResult {
        let now = unix_now();
        let mut st = self.state.lock().unwrap();
        st.purge_expired(key, now);
        let reply = if st.map.remove(key).is_some() {
            DeleteReply::Deleted
        } else {
            DeleteReply::NotFound
        };
        DeleteResult::Reply(reply)
    }

    fn on_touch(&mut self, _ctx: &mut HandlerCtx<'_>, key: &[u8], exptime: u64) -> TouchResult {
        let now = unix_now();
        let mut st = self.state.lock().unwrap();
        st.purge_expired(key, now);
        let expires_at = resolve_exptime(exptime, now);
        let reply = match st.map.get_mut(key) {
            Some(entry) => {
                entry.expires_at = expires_at;
                TouchReply::Touched
            }
            None => TouchReply::NotFound,
        };
        TouchResult::Reply(reply)
    }

    fn on_get(
        &mut self,
        _ctx: &mut HandlerCtx<'_>,
        key: &[u8],
        touch_exptime: Option<u64>,
    ) -> GetResult {
        let now = unix_now();
        let mut st = self.state.lock().unwrap();
        st.purge_expired(key, now);
        match st.map.get_mut(key) {
            Some(entry) => {
                if let Some(exptime) = touch_exptime {
                    entry.expires_at = resolve_exptime(exptime, now);
                }
                let value = ValueEntry {
                    flags: entry.flags,
                    cas: entry.cas,
                    data: entry.data.clone(),
                };
                st.hits += 1;
                GetResult::Value(value)
            }
            None => {
                st.misses += 1;
                GetResult::Miss
            }
        }
    }

    fn on_stats(&mut self) -> Vec<(String, String)> {
        let st = self.state.lock().unwrap();
        vec![
            ("curr_items".into(), st.map.len().to_string()),
            ("get_hits".into(), st.hits.to_string()),
            ("get_misses".into(), st.misses.to_string()),
            ("cas_seq".into(), st.cas_seq.to_string()),
        ]
    }
}

// =============================================================================
// Transport glue
// =============================================================================

fn serve(mut stream: TcpStream, state: Arc<Mutex<CacheState>>, max_value: usize) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();
    debug!(%peer, "connection opened");

    let config = ServerConfig::new().with_max_value_len(max_value);
    let mut server = McServer::new(CacheHandler { state }, config);
    let id = server.accept();

    let mut buf = [0u8; 16 * 1024];
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(%peer, error = %e, "read failed");
                break;
            }
        };
        let result = server.on_bytes(id, &buf[..n]);
        let out = server.take_output(id);
        if !out.is_empty() && stream.write_all(&out).is_err() {
            break;
        }
        if result.is_err() || !server.is_open(id) {
            break;
        }
    }
    server.close(id);
    debug!(%peer, "connection finished");
}

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let state = Arc::new(Mutex::new(CacheState::default()));
    let listener = TcpListener::bind(&args.listen)?;
    info!(addr = %args.listen, "listening");

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&state);
                let max_value = args.max_value;
                std::thread::spawn(move || serve(stream, state, max_value));
            }
            Err(e) => warn!(error = %e, "accept failed"),
        }
    }
    Ok(())
}
