//! Accept loop with graceful shutdown.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use saltpipe_core::defaults;

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::session::handle_session;
use crate::util::{create_listener, ConnectionGuard, ConnectionTracker};

/// Delay before retrying `accept` after a transient failure such as
/// running out of file descriptors.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// A bound listener that has not started accepting yet.
///
/// Splitting bind from run lets callers learn the actual listen address
/// (port 0 requests an OS-assigned port) before traffic starts.
pub struct Acceptor {
    listener: TcpListener,
    config: Arc<RelayConfig>,
}

impl Acceptor {
    /// Resolve the inbound endpoint and bind its listener.
    pub async fn bind(config: RelayConfig) -> Result<Self, RelayError> {
        let addr = resolve_bind_addr(&config.inbound.host, config.inbound.port).await?;
        let listener =
            create_listener(addr, defaults::DEFAULT_CONNECTION_BACKLOG).map_err(|source| {
                RelayError::Bind {
                    addr: config.inbound.authority(),
                    source,
                }
            })?;
        Ok(Self {
            listener,
            config: Arc::new(config),
        })
    }

    /// The bound listen address, including the OS-assigned port when the
    /// configuration asked for port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept sessions until `shutdown` fires, then drain live sessions.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), RelayError> {
        let Acceptor { listener, config } = self;
        let tracker = ConnectionTracker::new();

        info!(
            listen = %listener.local_addr()?,
            inbound = %config.inbound.transport,
            target = %config.outbound.authority(),
            outbound = %config.outbound.transport,
            "relay started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("shutdown signal received, stopping accept loop");
                    break;
                }

                result = listener.accept() => {
                    let (tcp, peer) = match result {
                        Ok(pair) => pair,
                        Err(e) => {
                            // Accept failures (EMFILE and friends) must not
                            // take the listener down.
                            warn!(error = %e, "accept failed, retrying");
                            tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                            continue;
                        }
                    };

                    if let Err(e) = tcp.set_nodelay(true) {
                        debug!(peer = %peer, error = %e, "set_nodelay failed");
                    }

                    debug!(peer = %peer, "new connection");

                    let config = config.clone();
                    tracker.increment();
                    let guard = ConnectionGuard::new(tracker.clone());

                    tokio::spawn(
                        async move {
                            let _guard = guard; // decrements on drop
                            if let Err(e) = handle_session(tcp, &config).await {
                                warn!(error = %e, "session error");
                            }
                        }
                        .instrument(info_span!("session", peer = %peer)),
                    );
                }
            }
        }

        // Graceful drain: wait for live sessions before returning.
        let active = tracker.count();
        if active > 0 {
            let drain = Duration::from_secs(config.timeouts.shutdown_timeout_secs);
            info!("waiting for {active} active sessions to drain");
            if tracker.wait_for_zero(drain).await {
                info!("all sessions drained");
            } else {
                warn!(
                    "shutdown timeout, {} sessions still active",
                    tracker.count()
                );
            }
        }

        info!("relay stopped");
        Ok(())
    }
}

/// Bind and run in one step.
pub async fn run(config: RelayConfig, shutdown: CancellationToken) -> Result<(), RelayError> {
    Acceptor::bind(config).await?.run(shutdown).await
}

/// Resolve the listen host to a socket address. IP literals, with or
/// without brackets around IPv6, bypass the resolver; names go through
/// system DNS and the first result wins.
async fn resolve_bind_addr(host: &str, port: u16) -> Result<SocketAddr, RelayError> {
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| RelayError::Config(format!("listen address {host} did not resolve")))
}
