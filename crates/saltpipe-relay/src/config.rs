//! Configuration for a relay instance.
//!
//! A relay is fully described by its two legs (where to listen, where to
//! forward, and which transport each leg speaks) plus a handful of timeout
//! knobs. Everything arrives via CLI flags; there is no config file.

use saltpipe_core::defaults;
use saltpipe_transport::Transport;

/// One leg of the relay: an address and the transport spoken on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or IP literal, unbracketed.
    pub host: String,

    /// TCP port. For the inbound endpoint, 0 asks the OS for a free port.
    pub port: u16,

    /// Transport spoken on this leg.
    pub transport: Transport,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, transport: Transport) -> Self {
        Self {
            host: host.into(),
            port,
            transport,
        }
    }

    /// The `host:port` authority, bracketing IPv6 literals.
    pub fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Timeout and buffer settings shared by every session.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Timeout for establishing the outbound connection (seconds).
    pub connect_timeout_secs: u64,

    /// Idle session timeout (seconds). 0 disables the idle check.
    pub idle_timeout_secs: u64,

    /// Inbound sealed preamble timeout (seconds).
    pub handshake_timeout_secs: u64,

    /// How long shutdown waits for live sessions to drain (seconds).
    pub shutdown_timeout_secs: u64,

    /// Relay buffer size per direction (bytes).
    pub relay_buffer_size: usize,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: defaults::DEFAULT_CONNECT_TIMEOUT_SECS,
            idle_timeout_secs: defaults::DEFAULT_IDLE_TIMEOUT_SECS,
            handshake_timeout_secs: defaults::DEFAULT_HANDSHAKE_TIMEOUT_SECS,
            shutdown_timeout_secs: defaults::DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            relay_buffer_size: defaults::DEFAULT_RELAY_BUFFER_SIZE,
        }
    }
}

/// Full configuration for one relay instance.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Where to listen and which transport to accept there.
    pub inbound: Endpoint,

    /// Where to forward and which transport to dial with.
    pub outbound: Endpoint,

    /// Timeout settings.
    pub timeouts: TimeoutConfig,
}
