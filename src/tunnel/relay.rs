//! Opaque bidirectional byte relay.
//!
//! Two read loops, one per direction. EOF on one side becomes a write
//! shutdown on the other, so half-closed connections keep working. An error
//! in either direction ends both.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const BUF_SIZE: usize = 16 * 1024;

/// Bytes moved by a finished tunnel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
}

/// Last time either direction moved bytes.
struct Activity {
    origin: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let now = self.origin.elapsed().as_millis() as u64;
        self.last_ms.store(now, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(last)
    }
}

/// Relay until both directions reach EOF, either side fails, or nothing
/// moves for `idle` (when set).
pub async fn relay<C, U>(client: C, upstream: U, idle: Option<Duration>) -> io::Result<RelayStats>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);
    let activity = Activity::new();

    let copy = async {
        tokio::try_join!(
            pipe(&mut client_read, &mut upstream_write, &activity),
            pipe(&mut upstream_read, &mut client_write, &activity),
        )
    };

    let (client_to_upstream, upstream_to_client) = match idle {
        None => copy.await?,
        Some(window) => tokio::select! {
            result = copy => result?,
            _ = idle_expired(&activity, window) => {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "tunnel idle"));
            }
        },
    };

    Ok(RelayStats {
        client_to_upstream,
        upstream_to_client,
    })
}

async fn pipe<R, W>(reader: &mut R, writer: &mut W, activity: &Activity) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUF_SIZE];
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            writer.shutdown().await?;
            return Ok(total);
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
        activity.touch();
    }
}

async fn idle_expired(activity: &Activity, window: Duration) {
    loop {
        let idle = activity.idle_for();
        if idle >= window {
            return;
        }
        tokio::time::sleep(window - idle).await;
    }
}
