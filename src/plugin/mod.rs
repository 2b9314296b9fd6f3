//! Traffic-shaping plugin layer (simple-obfs).
//!
//! Wraps the upstream TCP connection before AEAD encryption. The plugin
//! polymorphism over `{none, http, tls}` is a tagged enum: each variant is a
//! pure connection wrapper implementing read/write, applied once at dial
//! time and transparent afterwards.

mod simpleobfs;

pub use simpleobfs::{HttpObfsReader, HttpObfsWriter, TlsObfsReader, TlsObfsWriter};

use std::io;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::error::{Error, Result};

/// Default Host header when HTTP obfuscation is enabled without one.
pub const DEFAULT_OBFS_HOST: &str = "www.bing.com";

/// simple-obfs operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObfsMode {
    /// HTTP upgrade-request masquerade
    Http,
    /// TLS 1.2 application-data record framing
    Tls,
}

impl ObfsMode {
    /// Parse an `obfs` option value.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "http" => Ok(ObfsMode::Http),
            "tls" => Ok(ObfsMode::Tls),
            other => Err(Error::config(format!("unsupported obfs mode: {}", other))),
        }
    }
}

/// Resolved plugin settings for the dialer.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    /// Obfuscation mode
    pub mode: ObfsMode,
    /// Host header for HTTP mode
    pub host: String,
}

impl PluginConfig {
    /// Build a plugin config from the `plugin` / `plugin_opts` settings.
    ///
    /// Returns `None` when no plugin is configured.
    pub fn resolve(
        plugin: Option<&str>,
        obfs: Option<&str>,
        obfs_host: Option<&str>,
    ) -> Result<Option<Self>> {
        let name = match plugin {
            None | Some("") => return Ok(None),
            Some(name) => name,
        };

        if name != "simple-obfs" {
            return Err(Error::config(format!("unsupported plugin: {}", name)));
        }

        let mode = match obfs {
            None | Some("") => ObfsMode::Http,
            Some(mode) => ObfsMode::from_name(mode)?,
        };

        let host = match obfs_host {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => DEFAULT_OBFS_HOST.to_string(),
        };

        Ok(Some(PluginConfig { mode, host }))
    }

    /// Plugin name for logging.
    pub fn name(&self) -> &'static str {
        "simple-obfs"
    }
}

/// Read side of the (possibly wrapped) upstream transport.
pub enum TransportReader {
    /// Direct TCP
    Plain(OwnedReadHalf),
    /// HTTP obfs: response headers stripped from the first read
    ObfsHttp(HttpObfsReader<OwnedReadHalf>),
    /// TLS obfs: record headers stripped from every read
    ObfsTls(TlsObfsReader<OwnedReadHalf>),
}

impl TransportReader {
    /// Read some bytes, like `AsyncRead::read`.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            TransportReader::Plain(r) => r.read(buf).await,
            TransportReader::ObfsHttp(r) => r.read(buf).await,
            TransportReader::ObfsTls(r) => r.read(buf).await,
        }
    }

    /// Fill `buf` completely, failing with `UnexpectedEof` on early close.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            filled += n;
        }
        Ok(())
    }
}

/// Write side of the (possibly wrapped) upstream transport.
pub enum TransportWriter {
    /// Direct TCP
    Plain(OwnedWriteHalf),
    /// HTTP obfs: GET preamble prepended to the first write
    ObfsHttp(HttpObfsWriter<OwnedWriteHalf>),
    /// TLS obfs: every write framed as application-data records
    ObfsTls(TlsObfsWriter<OwnedWriteHalf>),
}

impl TransportWriter {
    /// Write the whole buffer.
    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            TransportWriter::Plain(w) => w.write_all(buf).await,
            TransportWriter::ObfsHttp(w) => w.write_all(buf).await,
            TransportWriter::ObfsTls(w) => w.write_all(buf).await,
        }
    }

    /// Half-close the write direction.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            TransportWriter::Plain(w) => w.shutdown().await,
            TransportWriter::ObfsHttp(w) => w.shutdown().await,
            TransportWriter::ObfsTls(w) => w.shutdown().await,
        }
    }
}

/// Wrap split TCP halves according to the plugin configuration.
pub fn wrap(
    read: OwnedReadHalf,
    write: OwnedWriteHalf,
    plugin: Option<&PluginConfig>,
) -> (TransportReader, TransportWriter) {
    match plugin {
        None => (TransportReader::Plain(read), TransportWriter::Plain(write)),
        Some(cfg) => match cfg.mode {
            ObfsMode::Http => (
                TransportReader::ObfsHttp(HttpObfsReader::new(read)),
                TransportWriter::ObfsHttp(HttpObfsWriter::new(write, cfg.host.clone())),
            ),
            ObfsMode::Tls => (
                TransportReader::ObfsTls(TlsObfsReader::new(read)),
                TransportWriter::ObfsTls(TlsObfsWriter::new(write)),
            ),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_no_plugin() {
        assert!(PluginConfig::resolve(None, None, None).unwrap().is_none());
        assert!(PluginConfig::resolve(Some(""), None, None).unwrap().is_none());
    }

    #[test]
    fn test_resolve_defaults() {
        let cfg = PluginConfig::resolve(Some("simple-obfs"), None, None)
            .unwrap()
            .unwrap();
        assert_eq!(cfg.mode, ObfsMode::Http);
        assert_eq!(cfg.host, DEFAULT_OBFS_HOST);
    }

    #[test]
    fn test_resolve_tls_mode() {
        let cfg = PluginConfig::resolve(Some("simple-obfs"), Some("tls"), Some("cdn.test"))
            .unwrap()
            .unwrap();
        assert_eq!(cfg.mode, ObfsMode::Tls);
        assert_eq!(cfg.host, "cdn.test");
    }

    #[test]
    fn test_resolve_rejects_unknown() {
        assert!(PluginConfig::resolve(Some("v2ray-plugin"), None, None).is_err());
        assert!(PluginConfig::resolve(Some("simple-obfs"), Some("quic"), None).is_err());
    }
}
