//! Chainable TCP relay with optional sealed legs.
//!
//! One relay instance accepts TCP connections on an inbound endpoint and
//! forwards each, byte for byte, to an outbound endpoint. Either leg can
//! independently run the sealed transport, so instances chain into
//! `client -> relay -> ... -> relay -> server` paths where any subset of
//! the hops is encrypted, as long as adjacent legs agree on their mode.
//!
//! The crate splits along the session lifecycle:
//!
//! - [`config`]: endpoints and timeout knobs.
//! - [`server`]: listener, accept loop, graceful drain.
//! - [`session`]: per-connection leg setup and forwarding.
//! - [`cli`]: argument parsing and process wiring.

pub mod cli;
pub mod config;
pub mod error;
pub mod server;
pub mod session;
pub mod util;

pub use cli::Args;
pub use config::{Endpoint, RelayConfig, TimeoutConfig};
pub use error::RelayError;
pub use saltpipe_transport::Transport;
pub use server::{run, Acceptor};
