//! Shadowsocks AEAD client dialer.
//!
//! The dialer owns everything needed to reach the upstream server: address,
//! cipher, derived master key, dial timeout, and the optional plugin. It is
//! immutable once constructed; hot-reload builds a fresh dialer and swaps it
//! in, so in-flight connections keep the one they started with.

mod addr;
mod stream;

pub use addr::{TargetAddr, ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6};
pub use stream::{SsReadHalf, SsStream, SsWriteHalf};

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::ShadowsocksConfig;
use crate::crypto::{session_key, AeadCipher, CipherKind, MasterKey, SecureRandom};
use crate::error::{Error, Result};
use crate::plugin::{self, PluginConfig};

/// Maximum plaintext payload per AEAD frame.
pub const MAX_PAYLOAD: usize = 0x3FFF;

/// A ready-to-use connection factory for one upstream configuration.
pub struct Dialer {
    server_addr: String,
    kind: CipherKind,
    master_key: MasterKey,
    timeout: Duration,
    plugin: Option<PluginConfig>,
}

impl Dialer {
    /// Build a dialer from validated configuration, normalizing the cipher
    /// name and stretching the password into the master key.
    pub fn new(cfg: &ShadowsocksConfig) -> Result<Self> {
        let kind = CipherKind::from_name(&cfg.cipher)?;
        let master_key = MasterKey::derive(&cfg.password, kind.key_len());
        let plugin = PluginConfig::resolve(
            cfg.plugin.as_deref(),
            cfg.plugin_opts.as_ref().and_then(|o| o.obfs.as_deref()),
            cfg.plugin_opts.as_ref().and_then(|o| o.obfs_host.as_deref()),
        )?;

        tracing::info!(
            server = %cfg.server,
            cipher = %kind,
            timeout = cfg.timeout,
            plugin = plugin.as_ref().map(|p| p.name()).unwrap_or("none"),
            "shadowsocks dialer created"
        );

        Ok(Self {
            server_addr: cfg.server.clone(),
            kind,
            master_key,
            timeout: Duration::from_secs(cfg.timeout),
            plugin,
        })
    }

    /// The upstream server address.
    pub fn server_addr(&self) -> &str {
        &self.server_addr
    }

    /// The negotiated cipher.
    pub fn cipher(&self) -> CipherKind {
        self.kind
    }

    /// The configured dial/idle timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Open a tunneled connection to `target` through the upstream server.
    ///
    /// Dials TCP, applies the plugin wrapper, sends the salt, and writes the
    /// SOCKS5-encoded target address as the first encrypted frame.
    pub async fn connect(&self, target: &TargetAddr) -> Result<SsStream> {
        tracing::debug!(target = %target, server = %self.server_addr, "dialing through shadowsocks");

        let stream = timeout(self.timeout, TcpStream::connect(&self.server_addr))
            .await
            .map_err(|_| Error::Timeout(self.timeout.as_millis() as u64))??;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let (transport_read, transport_write) =
            plugin::wrap(read_half, write_half, self.plugin.as_ref());

        let salt = SecureRandom::salt(self.kind.salt_len());
        let subkey = session_key(&self.master_key, &salt, self.kind.key_len())?;
        let sealer = AeadCipher::new(self.kind, &subkey)?;

        let mut write = SsWriteHalf::new(transport_write, sealer);
        write.send_salt(&salt).await?;
        write.write_frame(target.as_bytes()).await?;

        let read = SsReadHalf::new(transport_read, self.kind, self.master_key.clone());
        Ok(SsStream::new(read, write))
    }
}

impl std::fmt::Debug for Dialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialer")
            .field("server_addr", &self.server_addr)
            .field("cipher", &self.kind)
            .field("timeout", &self.timeout)
            .field("plugin", &self.plugin)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Nonce, TAG_SIZE};

    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn test_config(server: String) -> ShadowsocksConfig {
        ShadowsocksConfig {
            server,
            port: 0,
            password: "pw".into(),
            cipher: "aes-128-gcm".into(),
            method: None,
            timeout: 5,
            plugin: None,
            plugin_opts: None,
        }
    }

    #[tokio::test]
    async fn test_first_plaintext_is_target_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let dialer = Dialer::new(&test_config(addr.to_string())).unwrap();
        let target = TargetAddr::from_host_port("example.com", 80).unwrap();

        let server = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();

            let kind = CipherKind::Aes128Gcm;
            let mut salt = vec![0u8; kind.salt_len()];
            conn.read_exact(&mut salt).await.unwrap();

            let master = MasterKey::derive("pw", kind.key_len());
            let subkey = session_key(&master, &salt, kind.key_len()).unwrap();
            let opener = AeadCipher::new(kind, &subkey).unwrap();
            let mut nonce = Nonce::zero(kind.nonce_len());

            let mut sealed_len = [0u8; 2 + TAG_SIZE];
            conn.read_exact(&mut sealed_len).await.unwrap();
            let len_bytes = opener.open(&nonce, &sealed_len).unwrap();
            nonce.increment().unwrap();
            let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;

            let mut sealed = vec![0u8; len + TAG_SIZE];
            conn.read_exact(&mut sealed).await.unwrap();
            opener.open(&nonce, &sealed).unwrap()
        });

        let _stream = dialer.connect(&target).await.unwrap();
        let first_plaintext = server.await.unwrap();

        let mut expected = vec![0x03, 0x0b];
        expected.extend_from_slice(b"example.com");
        expected.extend_from_slice(&[0x00, 0x50]);
        assert_eq!(first_plaintext, expected);
    }

    #[tokio::test]
    async fn test_connect_refused_maps_to_network_error() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dialer = Dialer::new(&test_config(addr.to_string())).unwrap();
        let target = TargetAddr::from_host_port("example.com", 80).unwrap();

        match dialer.connect(&target).await {
            Err(Error::Network(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::ConnectionRefused)
            }
            other => panic!("expected connection refused, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_invalid_cipher_rejected_at_construction() {
        let mut cfg = test_config("127.0.0.1:8388".into());
        cfg.cipher = "rc4-md5".into();
        assert!(Dialer::new(&cfg).is_err());
    }
}
