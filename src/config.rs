//! Configuration for rapidnet
//!
//! Centralized configuration with sensible defaults, shared by `Server` and
//! `Client`.

use std::net::{IpAddr, Ipv4Addr};

use crate::error::{NetError, Result};

/// Main configuration for a server or client instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Listener Configuration
    // -------------------------------------------------------------------------
    /// Local address the server binds to (any interface by default)
    pub bind_addr: IpAddr,

    /// Pending connection queue length passed to `listen`
    pub backlog: u32,

    // -------------------------------------------------------------------------
    // Connection Configuration
    // -------------------------------------------------------------------------
    /// Size of the per-connection receive scratch buffer (in bytes).
    /// Upper bound on the length of a single delivered chunk.
    pub receive_buffer_size: usize,

    /// Disable Nagle's algorithm on every connection
    pub nodelay: bool,

    /// Outbound connect timeout (milliseconds, 0 = wait for the OS)
    pub connect_timeout_ms: u64,

    /// Reject chunks that are not valid UTF-8 instead of replacing the
    /// invalid sequences with U+FFFD
    pub strict_utf8: bool,

    // -------------------------------------------------------------------------
    // Event Configuration
    // -------------------------------------------------------------------------
    /// Events buffered per subscriber before it starts lagging
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            backlog: 100,
            receive_buffer_size: 1024,
            nodelay: true,
            connect_timeout_ms: 5000,
            strict_utf8: false,
            event_capacity: 1024,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check the values that would make sockets or channels unusable
    pub fn validate(&self) -> Result<()> {
        if self.receive_buffer_size == 0 {
            return Err(NetError::Config(
                "receive_buffer_size must be greater than zero".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(NetError::Config(
                "event_capacity must be greater than zero".to_string(),
            ));
        }
        if self.backlog == 0 {
            return Err(NetError::Config("backlog must be greater than zero".to_string()));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the local bind address
    pub fn bind_addr(mut self, addr: impl Into<IpAddr>) -> Self {
        self.config.bind_addr = addr.into();
        self
    }

    /// Set the listen backlog
    pub fn backlog(mut self, backlog: u32) -> Self {
        self.config.backlog = backlog;
        self
    }

    /// Set the receive buffer size (in bytes)
    pub fn receive_buffer_size(mut self, size: usize) -> Self {
        self.config.receive_buffer_size = size;
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.config.nodelay = nodelay;
        self
    }

    /// Set the connect timeout (in milliseconds)
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    /// Enable strict UTF-8 decoding of received chunks
    pub fn strict_utf8(mut self, strict: bool) -> Self {
        self.config.strict_utf8 = strict;
        self
    }

    /// Set the per-subscriber event buffer
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
