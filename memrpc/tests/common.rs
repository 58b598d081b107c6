//! Common test utilities for engine integration tests.

#![allow(dead_code)]

use std::collections::HashMap;

use memrpc::{
    CounterResult, DeleteResult, GetResult, HandlerCtx, McHandler, StoreRequest, StoreResult,
    TouchResult, ValueEntry,
};
use memtext::{CounterReply, DeleteReply, StoreCommand, StoreReply, TouchReply};

/// Synchronous in-memory cache handler, no expiration.
#[derive(Default)]
pub struct TestCache {
    pub map: HashMap<Vec<u8>, ValueEntry>,
    pub cas_seq: u64,
}

impl TestCache {
    fn next_cas(&mut self) -> u64 {
        self.cas_seq += 1;
        self.cas_seq
    }
}

impl McHandler for TestCache {
    fn on_store(&mut self, _ctx: &mut HandlerCtx<'_>, req: &StoreRequest<'_>) -> StoreResult {
        let cas = self.next_cas();
        let fresh = ValueEntry {
            flags: req.flags,
            cas,
            data: req.data.to_vec(),
        };
        let exists = self.map.contains_key(req.key);
        let reply = match req.cmd {
            StoreCommand::Set => {
                self.map.insert(req.key.to_vec(), fresh);
                StoreReply::Stored
            }
            StoreCommand::Add => {
                if exists {
                    StoreReply::NotStored
                } else {
                    self.map.insert(req.key.to_vec(), fresh);
                    StoreReply::Stored
                }
            }
            StoreCommand::Replace => {
                if exists {
                    self.map.insert(req.key.to_vec(), fresh);
                    StoreReply::Stored
                } else {
                    StoreReply::NotStored
                }
            }
            StoreCommand::Append | StoreCommand::Prepend => match self.map.get_mut(req.key) {
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
            StoreCommand::Cas => match self.map.get_mut(req.key) {
                None => StoreReply::NotFound,
                Some(entry) if Some(entry.cas) == req.cas => {
                    *entry = fresh;
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
        if !self.map.contains_key(key) {
            return CounterResult::Reply(CounterReply::NotFound);
        }
        let cas = self.next_cas();
        let entry = self.map.get_mut(key).unwrap();
        let current = match std::str::from_utf8(&entry.data)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            Some(v) => v,
            None => return CounterResult::NonNumeric,
        };
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
        let reply = if self.map.remove(key).is_some() {
            DeleteReply::Deleted
        } else {
            DeleteReply::NotFound
        };
        DeleteResult::Reply(reply)
    }

    fn on_touch(&mut self, _ctx: &mut HandlerCtx<'_>, key: &[u8], _exptime: u64) -> TouchResult {
        let reply = if self.map.contains_key(key) {
            TouchReply::Touched
        } else {
            TouchReply::NotFound
        };
        TouchResult::Reply(reply)
    }

    fn on_get(
        &mut self,
        _ctx: &mut HandlerCtx<'_>,
        key: &[u8],
        _touch_exptime: Option<u64>,
    ) -> GetResult {
        match self.map.get(key) {
            Some(entry) => GetResult::Value(entry.clone()),
            None => GetResult::Miss,
        }
    }

    fn on_stats(&mut self) -> Vec<(String, String)> {
        vec![("curr_items".into(), self.map.len().to_string())]
    }
}
