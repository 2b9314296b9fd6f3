//! Configuration model.
//!
//! The `proxies` key accepts either a single listen address (unified mode,
//! SOCKS5 and HTTP demultiplexed on one port) or an `{http, socks5}` mapping
//! (separate mode); the `socks5` address may embed `user:pass@host:port`
//! credentials.

mod loader;

pub use loader::{apply_env_overrides, load_config};

use serde::{Deserialize, Serialize};

use crate::crypto::CipherKind;
use crate::error::{Error, Result};

/// Default unified listen address.
pub const DEFAULT_UNIFIED_LISTEN: &str = "127.0.0.1:1080";
/// Default connection timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
/// Default stats report interval in seconds.
pub const DEFAULT_STATS_INTERVAL_SECS: u64 = 60;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Optional instance name, included in stats report lines
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Upstream server settings
    pub shadowsocks: ShadowsocksConfig,
    /// Local listener settings
    pub proxies: ProxiesConfig,
    /// Statistics settings
    pub stats: StatsConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

/// Upstream Shadowsocks server settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowsocksConfig {
    /// Server address, `host` or `host:port`
    pub server: String,
    /// Server port when not part of `server`
    #[serde(skip_serializing_if = "is_zero_u16")]
    pub port: u16,
    /// Server password
    pub password: String,
    /// Encryption cipher
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cipher: String,
    /// Alternative name for `cipher`, common in ss configs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Connection timeout in seconds
    #[serde(skip_serializing_if = "is_zero_u64")]
    pub timeout: u64,
    /// Plugin name (`simple-obfs`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    /// Plugin options
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_opts: Option<PluginOpts>,
}

fn is_zero_u16(v: &u16) -> bool {
    *v == 0
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

/// Plugin-specific options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginOpts {
    /// Obfuscation mode: `http` or `tls`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obfs: Option<String>,
    /// Host header for HTTP obfuscation
    #[serde(rename = "obfs-host", skip_serializing_if = "Option::is_none")]
    pub obfs_host: Option<String>,
}

/// Credentials for SOCKS5 user/pass authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Username
    pub username: String,
    /// Password
    pub password: String,
}

/// Local listener configuration (unified or separate mode).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProxiesConfig {
    /// Unified-mode listen address
    pub unified: Option<String>,
    /// Separate-mode HTTP listen address
    pub http_listen: Option<String>,
    /// Separate-mode SOCKS5 listen address (auth already stripped)
    pub socks5_listen: Option<String>,
    /// SOCKS5 credentials extracted from `user:pass@host:port`
    pub socks5_auth: Option<AuthConfig>,
}

impl ProxiesConfig {
    /// Whether any listener is configured.
    pub fn is_empty(&self) -> bool {
        self.unified.is_none() && self.http_listen.is_none() && self.socks5_listen.is_none()
    }

    /// Set the separate-mode SOCKS5 address, splitting off embedded
    /// credentials.
    pub fn set_socks5_listen(&mut self, addr: &str) {
        let (auth, listen) = parse_auth(addr);
        self.socks5_auth = auth;
        self.socks5_listen = Some(listen);
    }
}

/// Extract `user:pass@` credentials from a listen address.
pub fn parse_auth(addr: &str) -> (Option<AuthConfig>, String) {
    let Some(at) = addr.rfind('@') else {
        return (None, addr.to_string());
    };

    let (auth_part, host_part) = (&addr[..at], &addr[at + 1..]);
    let Some((username, password)) = auth_part.split_once(':') else {
        return (None, addr.to_string());
    };

    (
        Some(AuthConfig {
            username: username.to_string(),
            password: password.to_string(),
        }),
        host_part.to_string(),
    )
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProxiesRepr {
    Unified(String),
    Separate {
        #[serde(default)]
        http: Option<String>,
        #[serde(default)]
        socks5: Option<String>,
    },
}

impl<'de> Deserialize<'de> for ProxiesConfig {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let repr = ProxiesRepr::deserialize(deserializer)?;
        let mut cfg = ProxiesConfig::default();
        match repr {
            ProxiesRepr::Unified(addr) => cfg.unified = Some(addr),
            ProxiesRepr::Separate { http, socks5 } => {
                cfg.http_listen = http.filter(|s| !s.is_empty());
                if let Some(addr) = socks5.filter(|s| !s.is_empty()) {
                    cfg.set_socks5_listen(&addr);
                }
            }
        }
        Ok(cfg)
    }
}

impl Serialize for ProxiesConfig {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;

        if let Some(unified) = &self.unified {
            return serializer.serialize_str(unified);
        }

        let mut map = serializer.serialize_map(None)?;
        if let Some(http) = &self.http_listen {
            map.serialize_entry("http", http)?;
        }
        if let Some(socks5) = &self.socks5_listen {
            match &self.socks5_auth {
                Some(auth) => map.serialize_entry(
                    "socks5",
                    &format!("{}:{}@{}", auth.username, auth.password, socks5),
                )?,
                None => map.serialize_entry("socks5", socks5)?,
            }
        }
        map.end()
    }
}

/// Statistics settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Enable statistics collection and periodic reporting
    pub enabled: bool,
    /// Report interval in seconds
    pub interval: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: DEFAULT_STATS_INTERVAL_SECS,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: debug, info, warn, error
    pub level: String,
    /// Log format: text or json
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Config {
    /// Validate the configuration and fill in defaults.
    ///
    /// Combines `server`/`port`, resolves the `method` alias, normalizes the
    /// cipher name to canonical form, and applies listener/logging/stats
    /// defaults.
    pub fn validate(&mut self) -> Result<()> {
        if self.shadowsocks.server.is_empty() {
            return Err(Error::config("shadowsocks server address is required"));
        }
        if self.shadowsocks.port > 0 && !self.shadowsocks.server.contains(':') {
            self.shadowsocks.server =
                format!("{}:{}", self.shadowsocks.server, self.shadowsocks.port);
        }
        if self.shadowsocks.password.is_empty() {
            return Err(Error::config("shadowsocks password is required"));
        }

        if self.shadowsocks.cipher.is_empty() {
            if let Some(method) = self.shadowsocks.method.take() {
                self.shadowsocks.cipher = method;
            } else {
                self.shadowsocks.cipher = CipherKind::ChaCha20Poly1305.name().into();
            }
        }
        self.shadowsocks.cipher = CipherKind::from_name(&self.shadowsocks.cipher)?.name().into();

        if self.shadowsocks.timeout == 0 {
            self.shadowsocks.timeout = DEFAULT_TIMEOUT_SECS;
        }

        if self.proxies.is_empty() {
            self.proxies.unified = Some(DEFAULT_UNIFIED_LISTEN.into());
        }

        if self.logging.level.is_empty() {
            self.logging.level = "info".into();
        }
        if self.logging.format.is_empty() {
            self.logging.format = "text".into();
        }
        match self.logging.level.as_str() {
            "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(Error::config(format!("unknown log level: {}", other)));
            }
        }
        match self.logging.format.as_str() {
            "text" | "json" => {}
            other => {
                return Err(Error::config(format!("unknown log format: {}", other)));
            }
        }

        if self.stats.interval == 0 {
            self.stats.interval = DEFAULT_STATS_INTERVAL_SECS;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_fills_defaults() {
        let mut cfg = Config {
            shadowsocks: ShadowsocksConfig {
                server: "ss.example.net".into(),
                port: 8388,
                password: "pw".into(),
                ..Default::default()
            },
            ..Default::default()
        };

        cfg.validate().unwrap();
        assert_eq!(cfg.shadowsocks.server, "ss.example.net:8388");
        assert_eq!(cfg.shadowsocks.cipher, "AEAD_CHACHA20_POLY1305");
        assert_eq!(cfg.shadowsocks.timeout, 300);
        assert_eq!(cfg.proxies.unified.as_deref(), Some("127.0.0.1:1080"));
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.stats.interval, 60);
    }

    #[test]
    fn test_validate_requires_server_and_password() {
        let mut cfg = Config::default();
        assert!(cfg.validate().is_err());

        cfg.shadowsocks.server = "1.2.3.4:8388".into();
        assert!(cfg.validate().is_err());

        cfg.shadowsocks.password = "pw".into();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_method_alias_and_normalization() {
        let mut cfg = Config {
            shadowsocks: ShadowsocksConfig {
                server: "1.2.3.4:8388".into(),
                password: "pw".into(),
                method: Some("aes-256-gcm".into()),
                ..Default::default()
            },
            ..Default::default()
        };

        cfg.validate().unwrap();
        assert_eq!(cfg.shadowsocks.cipher, "AEAD_AES_256_GCM");
    }

    #[test]
    fn test_unknown_cipher_fails_validation() {
        let mut cfg = Config {
            shadowsocks: ShadowsocksConfig {
                server: "1.2.3.4:8388".into(),
                password: "pw".into(),
                cipher: "rc4-md5".into(),
                ..Default::default()
            },
            ..Default::default()
        };

        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_parse_auth() {
        let (auth, addr) = parse_auth("alice:s3cret@127.0.0.1:1080");
        let auth = auth.unwrap();
        assert_eq!(auth.username, "alice");
        assert_eq!(auth.password, "s3cret");
        assert_eq!(addr, "127.0.0.1:1080");

        let (auth, addr) = parse_auth("127.0.0.1:1080");
        assert!(auth.is_none());
        assert_eq!(addr, "127.0.0.1:1080");

        // Password may contain colons; username may not
        let (auth, _) = parse_auth("bob:pa:ss@0.0.0.0:1");
        let auth = auth.unwrap();
        assert_eq!(auth.username, "bob");
        assert_eq!(auth.password, "pa:ss");
    }

    #[test]
    fn test_proxies_unified_string() {
        let cfg: Config = serde_json::from_str(
            r#"{"shadowsocks":{"server":"a:1","password":"p"},"proxies":"127.0.0.1:7070"}"#,
        )
        .unwrap();
        assert_eq!(cfg.proxies.unified.as_deref(), Some("127.0.0.1:7070"));
    }

    #[test]
    fn test_proxies_separate_object_with_auth() {
        let cfg: Config = serde_json::from_str(
            r#"{"shadowsocks":{"server":"a:1","password":"p"},
                "proxies":{"http":"127.0.0.1:8080","socks5":"u:p@127.0.0.1:1080"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.proxies.http_listen.as_deref(), Some("127.0.0.1:8080"));
        assert_eq!(cfg.proxies.socks5_listen.as_deref(), Some("127.0.0.1:1080"));
        let auth = cfg.proxies.socks5_auth.unwrap();
        assert_eq!(auth.username, "u");
        assert_eq!(auth.password, "p");
    }

    #[test]
    fn test_proxies_roundtrip_serialization() {
        let mut proxies = ProxiesConfig::default();
        proxies.http_listen = Some("127.0.0.1:8080".into());
        proxies.set_socks5_listen("u:p@127.0.0.1:1080");

        let json = serde_json::to_string(&proxies).unwrap();
        assert!(json.contains("u:p@127.0.0.1:1080"));

        let unified = ProxiesConfig {
            unified: Some("127.0.0.1:1080".into()),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_string(&unified).unwrap(),
            "\"127.0.0.1:1080\""
        );
    }
}
