//! Server engine: connection registry and byte-stream driving.
//!
//! [`McServer`] owns every [`Connection`](crate::connection::Connection)
//! in a slab; connection ids are allocated by the registry and die with
//! it; there is no process-wide id counter. The server is single-I/O-
//! thread state: transport glue feeds received bytes in, drains pending
//! output, and calls [`McServer::pump`] after deferred replies complete
//! to resume a suspended pipeline.

use slab::Slab;
use tracing::debug;

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::handler::McHandler;

/// Registry-allocated connection id.
pub type ConnId = usize;

/// Protocol server over an application handler.
pub struct McServer<H: McHandler> {
    handler: H,
    config: ServerConfig,
    conns: Slab<Connection>,
}

impl<H: McHandler> McServer<H> {
    pub fn new(handler: H, config: ServerConfig) -> Self {
        Self {
            handler,
            config,
            conns: Slab::new(),
        }
    }

    /// Register a new connection and return its id.
    pub fn accept(&mut self) -> ConnId {
        let id = self.conns.insert(Connection::new(&self.config));
        debug!(conn = id, "connection accepted");
        id
    }

    /// Feed bytes received on a connection and process every complete
    /// frame.
    ///
    /// `Err` means the connection is dead: either the handler broke the
    /// deferred-reply contract (already logged) or the id is unknown. Any
    /// best-effort error line is left in the output buffer; the caller
    /// should flush it with [`McServer::take_output`] and then
    /// [`McServer::close`].
    pub fn on_bytes(&mut self, id: ConnId, data: &[u8]) -> Result<()> {
        let conn = self.conns.get_mut(id).ok_or(Error::Closed)?;
        conn.feed(data);
        conn.pump(&mut self.handler)
    }

    /// Resume processing of frames buffered while the connection was
    /// suspended behind deferred replies.
    pub fn pump(&mut self, id: ConnId) -> Result<()> {
        let conn = self.conns.get_mut(id).ok_or(Error::Closed)?;
        conn.pump(&mut self.handler)
    }

    /// Drain pending reply bytes for the transport to write.
    pub fn take_output(&mut self, id: ConnId) -> Vec<u8> {
        self.conns
            .get_mut(id)
            .map(Connection::take_output)
            .unwrap_or_default()
    }

    /// Whether the connection is still open (a closed connection may
    /// still have output to flush).
    pub fn is_open(&self, id: ConnId) -> bool {
        self.conns.get(id).is_some_and(Connection::is_open)
    }

    /// Tear the connection down and release its id.
    pub fn close(&mut self, id: ConnId) {
        if self.conns.contains(id) {
            let mut conn = self.conns.remove(id);
            conn.close();
            debug!(conn = id, "connection closed");
        }
    }

    /// Number of registered connections.
    pub fn connections(&self) -> usize {
        self.conns.len()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }
}
