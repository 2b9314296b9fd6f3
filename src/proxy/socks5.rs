//! Server-side SOCKS5 dispatcher (RFC 1928, RFC 1929 user/pass auth).
//!
//! Only CONNECT is supported; the request's `ATYP|ADDR|PORT` octets are kept
//! verbatim and handed to the dialer as the upstream target.

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::AuthConfig;
use crate::error::{Error, Result};
use crate::proxy::{relay, ProxyContext, HANDSHAKE_TIMEOUT};
use crate::shadowsocks::TargetAddr;
use crate::stats::{ConnectionGuard, ProxyKind};

const SOCKS_VERSION: u8 = 0x05;
const AUTH_VERSION: u8 = 0x01;

const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USER_PASS: u8 = 0x02;
const METHOD_NO_ACCEPTABLE: u8 = 0xFF;

const CMD_CONNECT: u8 = 0x01;

const REPLY_SUCCESS: u8 = 0x00;
const REPLY_GENERAL_FAILURE: u8 = 0x01;
const REPLY_NETWORK_UNREACHABLE: u8 = 0x03;
const REPLY_HOST_UNREACHABLE: u8 = 0x04;
const REPLY_CONNECTION_REFUSED: u8 = 0x05;
const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
const REPLY_ADDRESS_NOT_SUPPORTED: u8 = 0x08;

/// Reply with the given code and a zero IPv4 bind address.
async fn reply<W: AsyncWrite + Unpin>(writer: &mut W, code: u8) -> Result<()> {
    writer
        .write_all(&[SOCKS_VERSION, code, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await?;
    Ok(())
}

/// Map an upstream dial failure to a SOCKS5 reply code.
fn dial_error_code(err: &Error) -> u8 {
    match err {
        Error::Network(e) => match e.kind() {
            std::io::ErrorKind::NetworkUnreachable => REPLY_NETWORK_UNREACHABLE,
            std::io::ErrorKind::HostUnreachable => REPLY_HOST_UNREACHABLE,
            std::io::ErrorKind::ConnectionRefused => REPLY_CONNECTION_REFUSED,
            _ => REPLY_GENERAL_FAILURE,
        },
        _ => REPLY_GENERAL_FAILURE,
    }
}

/// Handle one SOCKS5 client connection.
pub(crate) async fn handle(stream: TcpStream, peer: SocketAddr, ctx: &ProxyContext) -> Result<()> {
    stream.set_nodelay(true)?;
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = write_half;

    let target = timeout(
        HANDSHAKE_TIMEOUT,
        handshake(&mut reader, &mut writer, ctx.socks5_auth.as_deref()),
    )
    .await
    .map_err(|_| Error::Timeout(HANDSHAKE_TIMEOUT.as_millis() as u64))??;

    let _guard = ctx
        .collector
        .clone()
        .map(|c| ConnectionGuard::new(c, ProxyKind::Socks5));

    let dialer = ctx.dialers.current();
    let ss = match dialer.connect(&target).await {
        Ok(ss) => ss,
        Err(e) => {
            tracing::warn!(peer = %peer, target = %target, error = %e, "upstream dial failed");
            let _ = reply(&mut writer, dial_error_code(&e)).await;
            return Ok(());
        }
    };

    reply(&mut writer, REPLY_SUCCESS).await?;
    tracing::debug!(peer = %peer, target = %target, "SOCKS5 tunnel established");

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

/// Run the greeting, optional auth subnegotiation, and CONNECT request.
async fn handshake<R, W>(
    reader: &mut R,
    writer: &mut W,
    auth: Option<&AuthConfig>,
) -> Result<TargetAddr>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    // Greeting: VER | NMETHODS | METHODS
    let ver = reader.read_u8().await?;
    if ver != SOCKS_VERSION {
        return Err(Error::handshake(format!(
            "unsupported SOCKS version: {:#04x}",
            ver
        )));
    }
    let nmethods = reader.read_u8().await?;
    let mut methods = vec![0u8; nmethods as usize];
    reader.read_exact(&mut methods).await?;

    match auth {
        Some(auth) => {
            if !methods.contains(&METHOD_USER_PASS) {
                writer
                    .write_all(&[SOCKS_VERSION, METHOD_NO_ACCEPTABLE])
                    .await?;
                return Err(Error::handshake(
                    "client does not offer user/pass authentication",
                ));
            }
            writer.write_all(&[SOCKS_VERSION, METHOD_USER_PASS]).await?;
            authenticate(reader, writer, auth).await?;
        }
        None => {
            writer.write_all(&[SOCKS_VERSION, METHOD_NO_AUTH]).await?;
        }
    }

    // Request: VER | CMD | RSV | ATYP | DST.ADDR | DST.PORT
    let mut head = [0u8; 3];
    reader.read_exact(&mut head).await?;
    if head[0] != SOCKS_VERSION {
        return Err(Error::handshake("bad request version"));
    }
    if head[1] != CMD_CONNECT {
        reply(writer, REPLY_COMMAND_NOT_SUPPORTED).await?;
        return Err(Error::handshake(format!(
            "unsupported command: {:#04x}",
            head[1]
        )));
    }

    match TargetAddr::read_from(reader).await {
        Ok(target) => Ok(target),
        Err(e) => {
            let _ = reply(writer, REPLY_ADDRESS_NOT_SUPPORTED).await;
            Err(e)
        }
    }
}

/// RFC 1929 username/password subnegotiation against the static credentials.
async fn authenticate<R, W>(reader: &mut R, writer: &mut W, auth: &AuthConfig) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let ver = reader.read_u8().await?;
    if ver != AUTH_VERSION {
        writer.write_all(&[AUTH_VERSION, 0x01]).await?;
        return Err(Error::handshake(format!(
            "unsupported auth version: {:#04x}",
            ver
        )));
    }

    let ulen = reader.read_u8().await? as usize;
    let mut username = vec![0u8; ulen];
    reader.read_exact(&mut username).await?;

    let plen = reader.read_u8().await? as usize;
    let mut password = vec![0u8; plen];
    reader.read_exact(&mut password).await?;

    if username == auth.username.as_bytes() && password == auth.password.as_bytes() {
        writer.write_all(&[AUTH_VERSION, 0x00]).await?;
        Ok(())
    } else {
        writer.write_all(&[AUTH_VERSION, 0x01]).await?;
        Err(Error::handshake("authentication failed"))
    }
}
