//! Per-connection deferred reply emission.
//!
//! Each connection owns one `ReplyQueue` backed by a single writer
//! task. Replies are queued with an absolute deadline and written
//! strictly in queue order: a later reply with a shorter delay waits
//! behind an earlier reply with a longer one, so pipelined requests
//! on one connection never see reordered replies. The connection's
//! read loop never blocks on a delay.
//!
//! When the peer goes away the first failed write ends the writer
//! task and every reply still queued is dropped, which is the liveness
//! check for scheduled replies on closed connections.

use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::trace;

/// One queued reply awaiting emission.
struct ScheduledReply {
    payload: Bytes,
    deadline: Instant,
}

/// Handle for scheduling replies on a connection.
///
/// Dropping the queue (the read loop ending) lets the writer task
/// finish any already-queued replies and exit.
pub struct ReplyQueue {
    tx: mpsc::UnboundedSender<ScheduledReply>,
}

impl ReplyQueue {
    /// Spawn the writer task over the write half of a connection.
    pub fn spawn<W>(mut writer: W) -> ReplyQueue
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<ScheduledReply>();

        tokio::spawn(async move {
            while let Some(reply) = rx.recv().await {
                tokio::time::sleep_until(reply.deadline).await;
                if let Err(e) = writer.write_all(&reply.payload).await {
                    trace!(error = %e, "Connection gone, dropping scheduled replies");
                    break;
                }
                if let Err(e) = writer.flush().await {
                    trace!(error = %e, "Flush failed, dropping scheduled replies");
                    break;
                }
            }
        });

        ReplyQueue { tx }
    }

    /// Queue a reply for emission after `delay`. Returns `false` when
    /// the writer task has already terminated.
    pub fn push(&self, payload: Bytes, delay: Duration) -> bool {
        self.tx
            .send(ScheduledReply {
                payload,
                deadline: Instant::now() + delay,
            })
            .is_ok()
    }

    /// Queue a reply for emission as soon as its turn comes.
    pub fn push_immediate(&self, payload: Bytes) -> bool {
        self.push(payload, Duration::ZERO)
    }
}
