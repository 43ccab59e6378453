//! Leg transports for saltpipe.
//!
//! A relay has two legs, inbound and outbound, and each leg independently
//! runs either raw TCP or the sealed protocol: an unauthenticated X25519
//! key exchange followed by ChaCha20-Poly1305 records with per-direction
//! keys and strictly sequential nonces (see [`handshake`] for the trust
//! model and its limits).
//!
//! # Modules
//!
//! - [`handshake`]: preamble exchange and session key derivation.
//! - [`frame`]: the record codec, one sequence-numbered AEAD box per record.
//! - [`sealed`]: [`SealedStream`], plaintext `AsyncRead`/`AsyncWrite` over
//!   the record layer.

pub mod error;
pub mod frame;
pub mod handshake;
pub mod sealed;

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

pub use error::{SealError, TransportError};
pub use sealed::SealedStream;

/// How a single leg moves bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Transport {
    /// Raw TCP pass-through.
    #[default]
    Plain,
    /// Sealed records over TCP.
    Sealed,
}

impl Transport {
    /// Wrap an accepted TCP connection according to this mode.
    ///
    /// For [`Transport::Sealed`] this runs the responder side of the
    /// preamble exchange before returning.
    pub async fn accept(self, tcp: TcpStream) -> Result<LegStream, TransportError> {
        match self {
            Transport::Plain => Ok(LegStream::Plain(tcp)),
            Transport::Sealed => {
                let stream = SealedStream::accept(tcp).await?;
                Ok(LegStream::Sealed(Box::new(stream)))
            }
        }
    }

    /// Dial `addr` (a `host:port` authority) and wrap the connection
    /// according to this mode.
    ///
    /// For [`Transport::Sealed`] this runs the initiator side of the
    /// preamble exchange before returning.
    pub async fn connect(self, addr: &str) -> Result<LegStream, TransportError> {
        let tcp = TcpStream::connect(addr).await?;
        tcp.set_nodelay(true)?;
        match self {
            Transport::Plain => Ok(LegStream::Plain(tcp)),
            Transport::Sealed => {
                let stream = SealedStream::connect(tcp).await?;
                Ok(LegStream::Sealed(Box::new(stream)))
            }
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Plain => f.write_str("plain"),
            Transport::Sealed => f.write_str("sealed"),
        }
    }
}

/// An established leg, ready to relay.
///
/// Both variants expose the same plaintext stream interface; the relay
/// engine never needs to know whether a leg is sealed.
pub enum LegStream {
    Plain(TcpStream),
    Sealed(Box<SealedStream<TcpStream>>),
}

impl AsyncRead for LegStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            LegStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            LegStream::Sealed(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for LegStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            LegStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            LegStream::Sealed(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            LegStream::Plain(s) => Pin::new(s).poll_flush(cx),
            LegStream::Sealed(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            LegStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            LegStream::Sealed(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
