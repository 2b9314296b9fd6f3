//! Local proxy listeners.
//!
//! Unified mode serves SOCKS5 and HTTP on one port by peeking at the first
//! client byte: `0x05` is a SOCKS5 greeting, anything else is treated as
//! HTTP. Separate mode runs each dispatcher on its own listener. All
//! handlers run as independent tasks; a panicking handler is logged and
//! never takes the process down.

mod http;
mod relay;
mod socks5;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::AuthConfig;
use crate::error::{Error, Result};
use crate::manager::DialerCell;
use crate::stats::Collector;

/// Deadline from accept until the target address is known.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a connection handler needs, cloned per listener.
#[derive(Clone)]
pub struct ProxyContext {
    /// Hot-reloadable upstream dialer cell
    pub dialers: DialerCell,
    /// Statistics collector, when enabled
    pub collector: Option<Arc<Collector>>,
    /// SOCKS5 credentials for this listener, when configured
    pub socks5_auth: Option<Arc<AuthConfig>>,
    /// Shutdown signal
    pub cancel: CancellationToken,
    /// Tracker for graceful shutdown of handler tasks
    pub tracker: TaskTracker,
}

/// Bind a listen socket, mapping failure to a startup error.
pub async fn bind(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr).await.map_err(|e| Error::Bind {
        addr: addr.to_string(),
        source: e,
    })
}

/// Serve both protocols on one listener with first-byte detection.
pub async fn serve_unified(listener: TcpListener, ctx: ProxyContext) {
    accept_loop(listener, ctx, |stream, peer, ctx| async move {
        handle_detected(stream, peer, ctx).await
    })
    .await
}

/// Serve HTTP only.
pub async fn serve_http(listener: TcpListener, ctx: ProxyContext) {
    accept_loop(listener, ctx, |stream, peer, ctx| async move {
        http::handle(stream, peer, &ctx).await
    })
    .await
}

/// Serve SOCKS5 only.
pub async fn serve_socks5(listener: TcpListener, ctx: ProxyContext) {
    accept_loop(listener, ctx, |stream, peer, ctx| async move {
        socks5::handle(stream, peer, &ctx).await
    })
    .await
}

async fn accept_loop<F, Fut>(listener: TcpListener, ctx: ProxyContext, handler: F)
where
    F: Fn(TcpStream, SocketAddr, ProxyContext) -> Fut,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    loop {
        let accepted = tokio::select! {
            _ = ctx.cancel.cancelled() => return,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                spawn_guarded(&ctx, peer, handler(stream, peer, ctx.clone()));
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to accept connection");
            }
        }
    }
}

/// Run a handler as its own task; errors are logged, panics are contained.
fn spawn_guarded<Fut>(ctx: &ProxyContext, peer: SocketAddr, fut: Fut)
where
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    let handle = tokio::spawn(fut);
    ctx.tracker.spawn(async move {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(peer = %peer, error = %e, "connection closed with error")
            }
            Err(e) if e.is_panic() => {
                tracing::error!(peer = %peer, "panic in connection handler")
            }
            Err(_) => {}
        }
    });
}

async fn handle_detected(stream: TcpStream, peer: SocketAddr, ctx: ProxyContext) -> Result<()> {
    let mut first = [0u8; 1];
    let n = timeout(HANDSHAKE_TIMEOUT, stream.peek(&mut first))
        .await
        .map_err(|_| Error::Timeout(HANDSHAKE_TIMEOUT.as_millis() as u64))??;
    if n == 0 {
        // Client closed before sending anything
        tracing::debug!(peer = %peer, "connection closed during protocol detection");
        return Ok(());
    }

    if first[0] == 0x05 {
        tracing::debug!(peer = %peer, "detected SOCKS5 protocol");
        socks5::handle(stream, peer, &ctx).await
    } else {
        tracing::debug!(peer = %peer, "detected HTTP protocol");
        http::handle(stream, peer, &ctx).await
    }
}
