//! Bidirectional relay between the client socket and the upstream stream.
//!
//! Two concurrent copies, one per direction. A finished uplink half-closes
//! the upstream write so the server can flush its remaining response; a
//! finished downlink half-closes the client and stops the uplink, since no
//! more response bytes can arrive. Every payload byte passes through the
//! statistics counters, and an idle deadline is enforced per direction.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::shadowsocks::{SsStream, MAX_PAYLOAD};
use crate::stats::Collector;

/// Relay until both directions finish.
pub(crate) async fn run(
    client_reader: BufReader<OwnedReadHalf>,
    client_writer: OwnedWriteHalf,
    ss: SsStream,
    collector: Option<Arc<Collector>>,
    idle: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let (mut ss_read, mut ss_write) = ss.into_split();
    let mut client_reader = client_reader;
    let mut client_writer = client_writer;

    // Downlink completion also stops the uplink
    let stop = cancel.child_token();

    let uplink = {
        let collector = collector.clone();
        let stop = stop.clone();
        async move {
            let mut buf = vec![0u8; MAX_PAYLOAD];
            loop {
                let n = tokio::select! {
                    _ = stop.cancelled() => break,
                    read = timeout(idle, client_reader.read(&mut buf)) => match read {
                        Err(_) => {
                            tracing::debug!("client idle deadline reached");
                            break;
                        }
                        Ok(Ok(0)) => break,
                        Ok(Ok(n)) => n,
                        Ok(Err(e)) => {
                            tracing::debug!(error = %e, "client read failed");
                            break;
                        }
                    },
                };

                if let Err(e) = ss_write.write_frame(&buf[..n]).await {
                    tracing::debug!(error = %e, "upstream write failed");
                    break;
                }
                if let Some(c) = &collector {
                    c.add_bytes_sent(n as u64);
                }
            }

            // Half-close so the server can flush pending response data
            let _ = ss_write.shutdown().await;
        }
    };

    let downlink = {
        let collector = collector.clone();
        let stop = stop.clone();
        async move {
            loop {
                let frame = tokio::select! {
                    _ = stop.cancelled() => break,
                    read = timeout(idle, ss_read.read_frame()) => match read {
                        Err(_) => {
                            tracing::debug!("upstream idle deadline reached");
                            break;
                        }
                        Ok(Ok(Some(frame))) => frame,
                        Ok(Ok(None)) => break,
                        Ok(Err(e)) => {
                            tracing::warn!(error = %e, "upstream frame failed to open");
                            break;
                        }
                    },
                };

                if let Err(e) = client_writer.write_all(&frame).await {
                    tracing::debug!(error = %e, "client write failed");
                    break;
                }
                if let Some(c) = &collector {
                    c.add_bytes_received(frame.len() as u64);
                }
            }

            stop.cancel();
            let _ = client_writer.shutdown().await;
        }
    };

    tokio::join!(uplink, downlink);
    Ok(())
}
