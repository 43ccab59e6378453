//! CLI entry point for the saltpipe binary.

use std::io;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use saltpipe_core::defaults;
use saltpipe_transport::Transport;

use crate::config::{Endpoint, RelayConfig, TimeoutConfig};

/// CLI arguments for the relay.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "saltpipe",
    version,
    about = "Chainable TCP relay with optional sealed legs"
)]
pub struct Args {
    /// Accept sealed connections on the inbound leg.
    #[arg(short = 'i')]
    pub seal_inbound: bool,

    /// Dial the outbound leg sealed.
    #[arg(short = 'o')]
    pub seal_outbound: bool,

    /// Address to listen on.
    pub in_addr: String,

    /// Port to listen on (0 for an OS-assigned port).
    pub in_port: u16,

    /// Address to forward to.
    pub out_addr: String,

    /// Port to forward to.
    pub out_port: u16,

    /// Log level override (e.g. "info", "debug", "trace").
    #[arg(long)]
    pub log_level: Option<String>,

    /// Timeout for establishing the outbound connection (seconds).
    #[arg(long, default_value_t = defaults::DEFAULT_CONNECT_TIMEOUT_SECS)]
    pub connect_timeout_secs: u64,

    /// Inbound sealed preamble timeout (seconds).
    #[arg(long, default_value_t = defaults::DEFAULT_HANDSHAKE_TIMEOUT_SECS)]
    pub handshake_timeout_secs: u64,

    /// Idle session timeout in seconds, 0 to disable.
    #[arg(long, default_value_t = defaults::DEFAULT_IDLE_TIMEOUT_SECS)]
    pub idle_timeout_secs: u64,
}

impl Args {
    /// Translate parsed flags into a relay configuration.
    pub fn into_config(self) -> RelayConfig {
        RelayConfig {
            inbound: Endpoint::new(self.in_addr, self.in_port, transport(self.seal_inbound)),
            outbound: Endpoint::new(self.out_addr, self.out_port, transport(self.seal_outbound)),
            timeouts: TimeoutConfig {
                connect_timeout_secs: self.connect_timeout_secs,
                idle_timeout_secs: self.idle_timeout_secs,
                handshake_timeout_secs: self.handshake_timeout_secs,
                ..TimeoutConfig::default()
            },
        }
    }
}

fn transport(sealed: bool) -> Transport {
    if sealed {
        Transport::Sealed
    } else {
        Transport::Plain
    }
}

/// Run the relay with the given CLI arguments.
pub async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(args.log_level.as_deref());

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();

    tokio::spawn(async move {
        shutdown_signal_handler().await;
        info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    crate::server::run(args.into_config(), shutdown)
        .await
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}
