//! Configuration types for the client and server engines.

use std::time::Duration;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Capacity of the outstanding-request pairing queue (rounded up to a
    /// power of two).
    /// Default: 1024
    pub queue_capacity: usize,
    /// Sleep between spin attempts when the pairing queue is full.
    /// Default: 10µs
    pub backoff: Duration,
    /// Maximum key length in bytes.
    /// Default: 250
    pub max_key_len: usize,
    /// Maximum value length in bytes.
    /// Default: 1 MiB
    pub max_value_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            backoff: Duration::from_micros(10),
            max_key_len: 250,
            max_value_len: 1 << 20,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pairing queue capacity.
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Set the full-queue backoff sleep.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the maximum key length.
    pub fn with_max_key_len(mut self, max_key_len: usize) -> Self {
        self.max_key_len = max_key_len;
        self
    }

    /// Set the maximum value length.
    pub fn with_max_value_len(mut self, max_value_len: usize) -> Self {
        self.max_value_len = max_value_len;
        self
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum key length in bytes.
    /// Default: 250
    pub max_key_len: usize,
    /// Maximum value length accepted in a store command.
    /// Default: 1 MiB
    pub max_value_len: usize,
    /// Version string reported for the `version` command.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_key_len: 250,
            max_value_len: 1 << 20,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum key length.
    pub fn with_max_key_len(mut self, max_key_len: usize) -> Self {
        self.max_key_len = max_key_len;
        self
    }

    /// Set the maximum value length.
    pub fn with_max_value_len(mut self, max_value_len: usize) -> Self {
        self.max_value_len = max_value_len;
        self
    }

    /// Set the reported version string.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}
