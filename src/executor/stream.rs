//! Streaming passthrough for SSE responses. An upstream call that returns
//! `AttemptResult::Streaming` hands its raw `reqwest::Response` here instead
//! of buffering it; `stream_pump` drains it into a bounded channel so a slow
//! client can only throttle the upstream read, never make the executor hold
//! an unbounded response in memory.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;

pub type StreamItem = Result<Bytes, reqwest::Error>;

/// Default channel depth for `stream_pump`: enough to absorb a burst of SSE
/// events between client reads without the pump task blocking on every chunk.
pub const DEFAULT_STREAM_BUFFER: usize = 32;

/// Spawns a task that reads `upstream` to completion and forwards each chunk
/// over a bounded `mpsc` channel, returned here as a `Stream` the HTTP layer
/// can hand straight to `axum::body::Body::from_stream`. If the receiving
/// end is dropped (client disconnected), the pump task notices the next send
/// fails and stops reading upstream instead of running to completion unread.
pub fn stream_pump(upstream: reqwest::Response, buffer: usize) -> impl Stream<Item = StreamItem> + Send + 'static {
    let (tx, rx) = mpsc::channel::<StreamItem>(buffer);
    tokio::spawn(async move {
        let mut body = upstream.bytes_stream();
        while let Some(chunk) = body.next().await {
            if tx.send(chunk).await.is_err() {
                break;
            }
        }
    });

    futures_util::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
}
