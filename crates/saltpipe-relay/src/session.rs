//! Per-session leg setup and forwarding.
//!
//! A session starts when the accept loop hands over a TCP connection and
//! ends when both directions have finished (or the session errors out).
//! Setup brings up both legs concurrently: the inbound preamble (when the
//! inbound leg is sealed) overlaps the outbound dial instead of queueing
//! in front of it.

use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, info};

use saltpipe_core::io::relay_bidirectional;

use crate::config::RelayConfig;
use crate::error::RelayError;

/// Establish both legs, then relay until the session is over.
///
/// A failed outbound dial or a failed preamble on either leg tears the
/// whole session down; the accepted connection closes when `tcp` and the
/// half-built legs drop.
pub async fn handle_session(tcp: TcpStream, config: &RelayConfig) -> Result<(), RelayError> {
    let handshake_timeout = Duration::from_secs(config.timeouts.handshake_timeout_secs);
    let connect_timeout = Duration::from_secs(config.timeouts.connect_timeout_secs);
    let idle_timeout = Duration::from_secs(config.timeouts.idle_timeout_secs);

    let target = config.outbound.authority();

    let accept_leg = async {
        tokio::time::timeout(handshake_timeout, config.inbound.transport.accept(tcp))
            .await
            .map_err(|_| RelayError::Handshake("inbound preamble timeout".into()))?
            .map_err(RelayError::from)
    };
    let connect_leg = async {
        tokio::time::timeout(connect_timeout, config.outbound.transport.connect(&target))
            .await
            .map_err(|_| RelayError::ConnectTimeout(target.clone()))?
            .map_err(RelayError::from)
    };
    let (inbound, outbound) = tokio::try_join!(accept_leg, connect_leg)?;

    debug!(target = %target, "session established");

    let start = tokio::time::Instant::now();
    let totals = relay_bidirectional(
        inbound,
        outbound,
        idle_timeout,
        config.timeouts.relay_buffer_size,
    )
    .await?;

    info!(
        bytes_up = totals.upstream,
        bytes_down = totals.downstream,
        duration_ms = start.elapsed().as_millis() as u64,
        "session closed"
    );

    Ok(())
}
