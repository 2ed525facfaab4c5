//! Bidirectional byte pump between two established streams.
//!
//! Bytes are copied unmodified in both directions. When one direction hits
//! EOF the write side of the opposite endpoint is shut down and the other
//! direction gets `half_close_timeout` to finish. An I/O error, cancellation
//! or an expired half-close timeout drops both endpoints.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use vtunnel_common::constants::{COPY_BUFFER_SIZE, DEFAULT_HALF_CLOSE_TIMEOUT_MS};

#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// Per-direction buffer size
    pub buffer_size: usize,
    /// Time the second direction may keep running after the first finished
    pub half_close_timeout: Duration,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            buffer_size: COPY_BUFFER_SIZE,
            half_close_timeout: Duration::from_millis(DEFAULT_HALF_CLOSE_TIMEOUT_MS),
        }
    }
}

/// Why a pump stopped
#[derive(Debug)]
pub enum PumpOutcome {
    /// Both directions reached EOF
    Completed,
    /// One direction failed; both endpoints were closed
    Errored(io::Error),
    /// Shutdown was requested
    Cancelled,
    /// One side closed and the other did not follow in time
    HalfCloseTimeout,
}

#[derive(Debug)]
pub struct PumpStats {
    /// Bytes read from `a` and written to `b`
    pub a_to_b: u64,
    /// Bytes read from `b` and written to `a`
    pub b_to_a: u64,
    pub duration: Duration,
    pub outcome: PumpOutcome,
}

/// Copy `reader` into `writer` until EOF, then shut the writer down.
async fn copy_half<R, W>(
    reader: &mut R,
    writer: &mut W,
    buffer_size: usize,
    counter: &AtomicU64,
) -> io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            // Propagate EOF. The remote may already be gone; that is fine.
            let _ = writer.shutdown().await;
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// Relay bytes between `a` and `b` until both directions finish.
///
/// Both streams are dropped, and therefore closed, before this returns.
pub async fn pump<A, B>(
    a: A,
    b: B,
    config: &PumpConfig,
    cancel: &CancellationToken,
) -> PumpStats
where
    A: AsyncRead + AsyncWrite + Send,
    B: AsyncRead + AsyncWrite + Send,
{
    let start = Instant::now();
    let a_to_b = AtomicU64::new(0);
    let b_to_a = AtomicU64::new(0);

    let outcome = {
        let (mut a_read, mut a_write) = tokio::io::split(a);
        let (mut b_read, mut b_write) = tokio::io::split(b);

        let forward = copy_half(&mut a_read, &mut b_write, config.buffer_size, &a_to_b);
        let backward = copy_half(&mut b_read, &mut a_write, config.buffer_size, &b_to_a);
        tokio::pin!(forward, backward);

        // Whichever direction ends first decides how the other one is treated.
        let (first, forward_done) = tokio::select! {
            r = &mut forward => (r, true),
            r = &mut backward => (r, false),
            () = cancel.cancelled() => (Err(cancelled_error()), true),
        };

        match first {
            Err(_) if cancel.is_cancelled() => PumpOutcome::Cancelled,
            Err(e) => PumpOutcome::Errored(e),
            Ok(()) => {
                let rest = async {
                    if forward_done {
                        (&mut backward).await
                    } else {
                        (&mut forward).await
                    }
                };
                tokio::select! {
                    r = tokio::time::timeout(config.half_close_timeout, rest) => match r {
                        Ok(Ok(())) => PumpOutcome::Completed,
                        Ok(Err(e)) => PumpOutcome::Errored(e),
                        Err(_) => PumpOutcome::HalfCloseTimeout,
                    },
                    () = cancel.cancelled() => PumpOutcome::Cancelled,
                }
            }
        }
        // Halves drop here, closing both endpoints.
    };

    PumpStats {
        a_to_b: a_to_b.load(Ordering::Relaxed),
        b_to_a: b_to_a.load(Ordering::Relaxed),
        duration: start.elapsed(),
        outcome,
    }
}

fn cancelled_error() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "pump cancelled")
}
