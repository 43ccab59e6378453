//! Default configuration values.
//!
//! Centralized defaults so the config structs and the CLI agree.

// ============================================================================
// Buffer/Size Defaults
// ============================================================================

/// Default relay buffer size per direction (32 KiB).
pub const DEFAULT_RELAY_BUFFER_SIZE: usize = 32768;

// ============================================================================
// Connection Defaults
// ============================================================================

/// Default TCP listener backlog.
pub const DEFAULT_CONNECTION_BACKLOG: u32 = 1024;

// ============================================================================
// Timeout Defaults
// ============================================================================

/// Default outbound connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Default per-leg handshake timeout in seconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;
/// Default session idle timeout in seconds (0 disables the idle check).
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;
/// Default graceful shutdown drain timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;
