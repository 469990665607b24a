//! Bidirectional byte splice between two live connections.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Copy bytes concurrently in both directions until either side reaches
/// end-of-stream or an I/O error. The first EOF half-closes the peer, the
/// still-open direction flushes to completion, and both endpoints are closed
/// when the call returns. A mid-stream failure ends the session; nothing is
/// retried or re-sent.
///
/// Returns (client-to-upstream, upstream-to-client) byte counts.
pub async fn splice<A, B>(mut client: A, mut upstream: B) -> io::Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let result = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;

    match &result {
        Ok((sent, received)) => debug!(sent, received, "relay finished"),
        Err(e) => debug!(error = %e, "relay ended with error"),
    }

    result
}
