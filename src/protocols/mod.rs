//! Wire protocol handlers, one submodule per payload family.

pub mod framing;
pub mod http;
pub mod keyvalue;
pub mod xml;

use crate::delay::DelayConfig;
use crate::reply::ReplyQueue;
use bytes::{Buf, BytesMut};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Drive one length-prefixed binary connection to completion.
///
/// Frames are decoded off the socket as they complete and handed to
/// `respond`, whose reply body is framed and queued behind the port's
/// configured delay. Framing errors close the connection because the
/// stream offset is unrecoverable past a corrupt header. A shutdown
/// signal ends the connection at the next read so idle peers cannot
/// hold up the drain.
pub(crate) async fn drive_framed<F>(
    stream: TcpStream,
    delays: Arc<DelayConfig>,
    port: u16,
    mut shutdown: broadcast::Receiver<()>,
    mut respond: F,
) where
    F: FnMut(&[u8]) -> String,
{
    let peer = stream.peer_addr().ok();
    let (mut read_half, write_half) = stream.into_split();
    let queue = ReplyQueue::spawn(write_half);
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

    loop {
        match framing::decode(&buf) {
            framing::DecodeResult::Complete(body, consumed) => {
                buf.advance(consumed);
                let reply = respond(&body);
                match framing::encode(reply.as_bytes()) {
                    Ok(framed) => {
                        let delay = delays.delay_for_port(port);
                        if !queue.push(framed, delay) {
                            debug!(port, "Writer gone, closing connection");
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(port, error = %e, "Dropping unframeable reply");
                        return;
                    }
                }
                continue;
            }
            framing::DecodeResult::Incomplete => {}
            framing::DecodeResult::Error(e) => {
                warn!(port, peer = ?peer, error = %e, "Framing error, closing connection");
                return;
            }
        }

        let read = tokio::select! {
            read = read_half.read_buf(&mut buf) => read,
            _ = shutdown.recv() => {
                debug!(port, peer = ?peer, "Shutdown, closing connection");
                return;
            }
        };
        match read {
            Ok(0) => {
                debug!(port, peer = ?peer, "Connection closed by peer");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(port, peer = ?peer, error = %e, "Read failed");
                return;
            }
        }
    }
}
