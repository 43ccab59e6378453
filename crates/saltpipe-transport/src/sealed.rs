//! Sealed stream: authenticated encryption over any byte stream.
//!
//! [`SealedStream`] wraps an inner stream after the preamble exchange and
//! exposes plaintext `AsyncRead`/`AsyncWrite`. Reads reassemble one record
//! at a time (partial reads across the header and body are normal) and only
//! surface fully authenticated plaintext. Writes seal at most one record
//! per call, buffer the ciphertext, and drain it across subsequent writes
//! and flushes, so a short write re-sends buffered ciphertext instead of
//! sealing the same chunk twice under a new sequence number.
//!
//! End-of-stream exactly between records is a clean EOF; end-of-stream
//! inside a record surfaces as `UnexpectedEof`, since a truncated record
//! can never be authenticated.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::TransportError;
use crate::frame::{Header, Opener, Sealer, HEADER_LEN, MAX_RECORD_LEN};
use crate::handshake::{self, Role, SessionKeys};

/// Read-side reassembly state.
enum ReadState {
    /// Collecting the fixed-size record header.
    Header { buf: [u8; HEADER_LEN], filled: usize },
    /// Collecting the ciphertext body announced by `header`.
    Body {
        header: Header,
        buf: Vec<u8>,
        filled: usize,
    },
    /// Handing decrypted plaintext to the caller.
    Emit { plaintext: Vec<u8>, pos: usize },
}

impl ReadState {
    fn new_header() -> Self {
        ReadState::Header {
            buf: [0u8; HEADER_LEN],
            filled: 0,
        }
    }
}

/// A stream wrapper that seals written bytes into authenticated records and
/// opens received records back into plaintext.
///
/// One instance serves exactly one leg of one session; the send and receive
/// sequence counters live in the embedded [`Sealer`]/[`Opener`] and are
/// never shared or reset.
pub struct SealedStream<S> {
    inner: S,
    sealer: Sealer,
    opener: Opener,
    read_state: ReadState,
    /// Ciphertext sealed but not yet accepted by the inner stream.
    write_buf: BytesMut,
}

impl<S> SealedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Establish the sealed channel as the dialing (initiator) side.
    pub async fn connect(mut inner: S) -> Result<Self, TransportError> {
        let keys = handshake::exchange(&mut inner, Role::Initiator).await?;
        Ok(Self::with_keys(inner, &keys))
    }

    /// Establish the sealed channel as the accepting (responder) side.
    pub async fn accept(mut inner: S) -> Result<Self, TransportError> {
        let keys = handshake::exchange(&mut inner, Role::Responder).await?;
        Ok(Self::with_keys(inner, &keys))
    }

    fn with_keys(inner: S, keys: &SessionKeys) -> Self {
        Self {
            inner,
            sealer: Sealer::new(&keys.send),
            opener: Opener::new(&keys.recv),
            read_state: ReadState::new_header(),
            write_buf: BytesMut::new(),
        }
    }

    /// Push pending ciphertext into the inner stream until none is left.
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.write_buf.is_empty() {
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, &self.write_buf))?;
            if n == 0 {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "inner stream refused sealed record bytes",
                )));
            }
            self.write_buf.advance(n);
        }
        Poll::Ready(Ok(()))
    }
}

impl<S> AsyncRead for SealedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            match &mut this.read_state {
                ReadState::Header { buf, filled } => {
                    while *filled < HEADER_LEN {
                        let mut read_buf = ReadBuf::new(&mut buf[*filled..]);
                        ready!(Pin::new(&mut this.inner).poll_read(cx, &mut read_buf))?;
                        let n = read_buf.filled().len();
                        if n == 0 {
                            if *filled == 0 {
                                // EOF on a record boundary: clean end of stream.
                                return Poll::Ready(Ok(()));
                            }
                            return Poll::Ready(Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "stream ended inside a record header",
                            )));
                        }
                        *filled += n;
                    }
                    let header = Header::decode(buf).map_err(io::Error::from)?;
                    this.read_state = ReadState::Body {
                        header,
                        buf: vec![0u8; header.len as usize],
                        filled: 0,
                    };
                }
                ReadState::Body {
                    header,
                    buf,
                    filled,
                } => {
                    while *filled < buf.len() {
                        let mut read_buf = ReadBuf::new(&mut buf[*filled..]);
                        ready!(Pin::new(&mut this.inner).poll_read(cx, &mut read_buf))?;
                        let n = read_buf.filled().len();
                        if n == 0 {
                            return Poll::Ready(Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "stream ended inside a record body",
                            )));
                        }
                        *filled += n;
                    }
                    let plaintext = this.opener.open(*header, buf).map_err(io::Error::from)?;
                    this.read_state = ReadState::Emit { plaintext, pos: 0 };
                }
                ReadState::Emit { plaintext, pos } => {
                    let remaining = &plaintext[*pos..];
                    let n = remaining.len().min(out.remaining());
                    out.put_slice(&remaining[..n]);
                    *pos += n;
                    if *pos == plaintext.len() {
                        this.read_state = ReadState::new_header();
                    }
                    return Poll::Ready(Ok(()));
                }
            }
        }
    }
}

impl<S> AsyncWrite for SealedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        // Finish pushing the previous record before sealing another, so
        // pending ciphertext stays bounded at one record.
        ready!(this.poll_drain(cx))?;

        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let take = buf.len().min(MAX_RECORD_LEN);
        this.sealer
            .seal(&buf[..take], &mut this.write_buf)
            .map_err(io::Error::from)?;

        // Opportunistic push; whatever does not fit now is drained by the
        // next write or flush without re-sealing.
        let _ = this.poll_drain(cx)?;
        Poll::Ready(Ok(take))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}
