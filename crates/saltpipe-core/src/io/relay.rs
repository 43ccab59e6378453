//! Bidirectional relay between two byte streams.
//!
//! Each direction is driven as an independent poll-based state machine within
//! a single future, so back-pressure on one direction never stalls the other.
//! This keeps multi-hop relay chains deadlock-free when both peers are
//! mid-transfer in opposite directions.
//!
//! A source reaching end-of-stream half-closes the destination (write
//! shutdown) and only that direction finishes; the relay completes once both
//! directions have finished. Any I/O error on either direction ends the whole
//! relay, since a broken direction poisons the shared sockets.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Instant as TokioInstant;

/// Bytes moved by a finished relay, per direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayTotals {
    /// Bytes copied from the inbound stream to the outbound stream.
    pub upstream: u64,
    /// Bytes copied from the outbound stream back to the inbound stream.
    pub downstream: u64,
}

/// Stand-in duration when the idle check is disabled.
const IDLE_DISABLED: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// State machine for one-directional copy with flush.
enum CopyState {
    Reading,
    Writing(usize, usize), // (pos, len)
    Flushing(usize),       // bytes flushing
    ShuttingDown,
    Done,
}

/// Result of polling one copy direction.
enum CopyPoll {
    /// Data was flushed to the destination; contains the byte count.
    Flushed(usize),
    /// Direction finished (EOF + write shutdown on the destination).
    Finished,
}

/// Poll-driven one-directional copy: read → write → flush.
fn poll_copy_direction<R, W>(
    cx: &mut Context<'_>,
    reader: &mut R,
    writer: &mut W,
    buf: &mut [u8],
    state: &mut CopyState,
) -> Poll<io::Result<CopyPoll>>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    loop {
        match state {
            CopyState::Reading => {
                let mut read_buf = ReadBuf::new(buf);
                match Pin::new(&mut *reader).poll_read(cx, &mut read_buf) {
                    Poll::Ready(Ok(())) => {
                        let n = read_buf.filled().len();
                        if n == 0 {
                            *state = CopyState::ShuttingDown;
                        } else {
                            *state = CopyState::Writing(0, n);
                        }
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
            CopyState::Writing(pos, len) => {
                match Pin::new(&mut *writer).poll_write(cx, &buf[*pos..*len]) {
                    Poll::Ready(Ok(n)) => {
                        *pos += n;
                        if *pos >= *len {
                            let total = *len;
                            *state = CopyState::Flushing(total);
                        }
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
            CopyState::Flushing(bytes) => {
                let bytes = *bytes;
                match Pin::new(&mut *writer).poll_flush(cx) {
                    Poll::Ready(Ok(())) => {
                        *state = CopyState::Reading;
                        return Poll::Ready(Ok(CopyPoll::Flushed(bytes)));
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
            CopyState::ShuttingDown => match Pin::new(&mut *writer).poll_shutdown(cx) {
                Poll::Ready(_) => {
                    *state = CopyState::Done;
                    return Poll::Ready(Ok(CopyPoll::Finished));
                }
                Poll::Pending => return Poll::Pending,
            },
            CopyState::Done => return Poll::Ready(Ok(CopyPoll::Finished)),
        }
    }
}

/// Bidirectional relay with half-close handling.
///
/// Both directions run concurrently within a single task using poll-based
/// I/O, so a blocked write on one direction cannot stall the other. An
/// idle timeout fires when **neither** direction has transferred data within
/// `idle_timeout`; passing a zero duration disables the idle check.
///
/// Returns the bytes moved in each direction. Per-direction write ordering
/// follows read ordering; the two directions have no ordering relationship
/// to each other.
pub async fn relay_bidirectional<A, B>(
    inbound: A,
    outbound: B,
    idle_timeout: Duration,
    buffer_size: usize,
) -> io::Result<RelayTotals>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let idle_timeout = if idle_timeout.is_zero() {
        IDLE_DISABLED
    } else {
        idle_timeout
    };

    let (mut in_r, mut in_w) = tokio::io::split(inbound);
    let (mut out_r, mut out_w) = tokio::io::split(outbound);

    let mut buf_up = vec![0u8; buffer_size];
    let mut buf_down = vec![0u8; buffer_size];
    let mut state_up = CopyState::Reading;
    let mut state_down = CopyState::Reading;

    let idle_sleep = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle_sleep);

    let mut totals = RelayTotals::default();
    let mut up_done = false;
    let mut down_done = false;

    loop {
        if up_done && down_done {
            return Ok(totals);
        }

        // Build a future that polls both directions concurrently.
        // Each direction registers its own waker so either can make progress
        // independently of the other.
        let both = std::future::poll_fn(|cx| {
            let mut any_ready = false;
            let mut activity = false;
            let mut error: Option<io::Error> = None;

            if !up_done {
                match poll_copy_direction(cx, &mut in_r, &mut out_w, &mut buf_up, &mut state_up) {
                    Poll::Ready(Ok(CopyPoll::Flushed(n))) => {
                        totals.upstream += n as u64;
                        activity = true;
                        any_ready = true;
                    }
                    Poll::Ready(Ok(CopyPoll::Finished)) => {
                        up_done = true;
                        any_ready = true;
                    }
                    Poll::Ready(Err(e)) => {
                        error = Some(e);
                        any_ready = true;
                    }
                    Poll::Pending => {}
                }
            }

            if !down_done {
                match poll_copy_direction(cx, &mut out_r, &mut in_w, &mut buf_down, &mut state_down)
                {
                    Poll::Ready(Ok(CopyPoll::Flushed(n))) => {
                        totals.downstream += n as u64;
                        activity = true;
                        any_ready = true;
                    }
                    Poll::Ready(Ok(CopyPoll::Finished)) => {
                        down_done = true;
                        any_ready = true;
                    }
                    Poll::Ready(Err(e)) => {
                        error = Some(e);
                        any_ready = true;
                    }
                    Poll::Pending => {}
                }
            }

            if let Some(e) = error {
                return Poll::Ready(Err(e));
            }

            if any_ready {
                Poll::Ready(Ok(activity))
            } else {
                Poll::Pending
            }
        });

        tokio::select! {
            result = both => {
                let activity = result?;
                if activity {
                    idle_sleep.as_mut().reset(TokioInstant::now() + idle_timeout);
                }
            }
            _ = &mut idle_sleep => {
                return Ok(totals);
            }
        }
    }
}
