//! HTTP dispatcher: CONNECT tunneling and absolute-form forwarding.
//!
//! A single request head (request-line + headers, CRLF-terminated, at most
//! 16 KiB) is parsed from the buffered client stream. `CONNECT` switches
//! straight into the opaque relay after the upstream dial; absolute-form
//! requests are rewritten to origin-form, forwarded once, and the rest of
//! the connection is relayed as opaque bytes.

use std::net::SocketAddr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::proxy::{relay, ProxyContext, HANDSHAKE_TIMEOUT};
use crate::shadowsocks::TargetAddr;
use crate::stats::{ConnectionGuard, ProxyKind};

/// Cap on request-line + headers.
const MAX_REQUEST_HEAD: usize = 16 * 1024;

const RESPONSE_OK: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";
const RESPONSE_BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n";
const RESPONSE_BAD_GATEWAY: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\n\r\n";

/// A parsed request head.
#[derive(Debug)]
struct RequestHead {
    method: String,
    target: String,
    version: String,
    headers: Vec<(String, String)>,
}

/// Handle one HTTP client connection.
pub(crate) async fn handle(stream: TcpStream, peer: SocketAddr, ctx: &ProxyContext) -> Result<()> {
    stream.set_nodelay(true)?;
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = write_half;

    let head = match timeout(HANDSHAKE_TIMEOUT, read_request_head(&mut reader)).await {
        Err(_) => return Err(Error::Timeout(HANDSHAKE_TIMEOUT.as_millis() as u64)),
        Ok(Err(e)) => {
            let _ = writer.write_all(RESPONSE_BAD_REQUEST).await;
            return Err(e);
        }
        Ok(Ok(head)) => head,
    };

    let _guard = ctx
        .collector
        .clone()
        .map(|c| ConnectionGuard::new(c, ProxyKind::Http));

    if head.method.eq_ignore_ascii_case("CONNECT") {
        handle_connect(reader, writer, head, peer, ctx).await
    } else {
        handle_absolute(reader, writer, head, peer, ctx).await
    }
}

async fn handle_connect(
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    mut writer: tokio::net::tcp::OwnedWriteHalf,
    head: RequestHead,
    peer: SocketAddr,
    ctx: &ProxyContext,
) -> Result<()> {
    let target = match connect_target(&head.target) {
        Ok(target) => target,
        Err(e) => {
            let _ = writer.write_all(RESPONSE_BAD_REQUEST).await;
            return Err(e);
        }
    };

    let dialer = ctx.dialers.current();
    let ss = match dialer.connect(&target).await {
        Ok(ss) => ss,
        Err(e) => {
            tracing::warn!(peer = %peer, target = %target, error = %e, "upstream dial failed");
            let _ = writer.write_all(RESPONSE_BAD_GATEWAY).await;
            return Ok(());
        }
    };

    writer.write_all(RESPONSE_OK).await?;
    tracing::debug!(peer = %peer, target = %target, "CONNECT tunnel established");

    relay::run(
        reader,
        writer,
        ss,
        ctx.collector.clone(),
        dialer.timeout(),
        ctx.cancel.clone(),
    )
    .await
}

async fn handle_absolute(
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    mut writer: tokio::net::tcp::OwnedWriteHalf,
    head: RequestHead,
    peer: SocketAddr,
    ctx: &ProxyContext,
) -> Result<()> {
    let (target, rewritten) = match rewrite_absolute_request(&head) {
        Ok(parts) => parts,
        Err(e) => {
            let _ = writer.write_all(RESPONSE_BAD_REQUEST).await;
            return Err(e);
        }
    };

    let dialer = ctx.dialers.current();
    let mut ss = match dialer.connect(&target).await {
        Ok(ss) => ss,
        Err(e) => {
            tracing::warn!(peer = %peer, target = %target, error = %e, "upstream dial failed");
            let _ = writer.write_all(RESPONSE_BAD_GATEWAY).await;
            return Ok(());
        }
    };

    tracing::debug!(peer = %peer, target = %target, method = %head.method, "forwarding HTTP request");

    // The rewritten head goes out first; any request body and all later
    // requests on this connection are relayed as opaque bytes.
    ss.write_payload(rewritten.as_bytes()).await?;
    if let Some(c) = &ctx.collector {
        c.add_bytes_sent(rewritten.len() as u64);
    }

    relay::run(
        reader,
        writer,
        ss,
        ctx.collector.clone(),
        dialer.timeout(),
        ctx.cancel.clone(),
    )
    .await
}

/// Read and parse the request-line and headers.
async fn read_request_head<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<RequestHead> {
    let mut total = 0;
    let request_line = read_line(reader, &mut total).await?;

    let mut parts = request_line.split_whitespace();
    let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v), None) if v.starts_with("HTTP/") => {
            (m.to_string(), t.to_string(), v.to_string())
        }
        _ => {
            return Err(Error::handshake(format!(
                "malformed request line: {:?}",
                request_line
            )))
        }
    };

    let mut headers = Vec::new();
    loop {
        let line = read_line(reader, &mut total).await?;
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(Error::handshake(format!("malformed header: {:?}", line)));
        };
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(RequestHead {
        method,
        target,
        version,
        headers,
    })
}

/// Read one CRLF-terminated line, enforcing the head size cap.
async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R, total: &mut usize) -> Result<String> {
    let mut line = Vec::new();
    let n = reader
        .take((MAX_REQUEST_HEAD - *total) as u64 + 1)
        .read_until(b'\n', &mut line)
        .await?;
    if n == 0 {
        return Err(Error::handshake("connection closed mid-request"));
    }
    *total += n;
    if *total > MAX_REQUEST_HEAD {
        return Err(Error::handshake("request head too large"));
    }
    if !line.ends_with(b"\n") {
        return Err(Error::handshake("request line not terminated"));
    }

    line.pop();
    if line.ends_with(b"\r") {
        line.pop();
    }

    String::from_utf8(line).map_err(|_| Error::handshake("request head is not valid UTF-8"))
}

/// Parse a CONNECT authority, defaulting the port to 443.
fn connect_target(authority: &str) -> Result<TargetAddr> {
    let (host, port) = split_host_port(authority, 443)?;
    TargetAddr::from_host_port(&host, port)
}

/// Split `host[:port]`, handling bracketed IPv6 literals.
fn split_host_port(authority: &str, default_port: u16) -> Result<(String, u16)> {
    if authority.is_empty() {
        return Err(Error::handshake("empty authority"));
    }

    if let Some(rest) = authority.strip_prefix('[') {
        let Some((host, after)) = rest.split_once(']') else {
            return Err(Error::handshake("unterminated IPv6 literal"));
        };
        let port = match after.strip_prefix(':') {
            Some(p) => p
                .parse()
                .map_err(|_| Error::handshake(format!("invalid port: {:?}", p)))?,
            None if after.is_empty() => default_port,
            None => return Err(Error::handshake("garbage after IPv6 literal")),
        };
        return Ok((host.to_string(), port));
    }

    match authority.rsplit_once(':') {
        // More than one colon without brackets is a bare IPv6 address
        Some((host, _)) if host.contains(':') => Ok((authority.to_string(), default_port)),
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| Error::handshake(format!("invalid port: {:?}", port)))?;
            Ok((host.to_string(), port))
        }
        None => Ok((authority.to_string(), default_port)),
    }
}

/// Turn an absolute-form request into the target address plus the
/// origin-form request head to forward.
fn rewrite_absolute_request(head: &RequestHead) -> Result<(TargetAddr, String)> {
    let rest = head
        .target
        .strip_prefix("http://")
        .or_else(|| head.target.strip_prefix("HTTP://"))
        .ok_or_else(|| {
            Error::handshake(format!("not an absolute http URI: {:?}", head.target))
        })?;

    let (authority, origin_form) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };

    let (host, port) = split_host_port(authority, 80)?;
    let target = TargetAddr::from_host_port(&host, port)?;

    let mut rewritten = format!("{} {} {}\r\n", head.method, origin_form, head.version);
    let mut has_host = false;
    for (name, value) in &head.headers {
        if name.eq_ignore_ascii_case("proxy-connection") {
            continue;
        }
        if name.eq_ignore_ascii_case("host") {
            has_host = true;
        }
        rewritten.push_str(name);
        rewritten.push_str(": ");
        rewritten.push_str(value);
        rewritten.push_str("\r\n");
    }
    if !has_host {
        rewritten.push_str("Host: ");
        rewritten.push_str(authority);
        rewritten.push_str("\r\n");
    }
    rewritten.push_str("\r\n");

    Ok((target, rewritten))
}
