//! Configuration file loading.
//!
//! Files are parsed as JSON or YAML by extension, with a JSON-then-YAML
//! fallback for unknown extensions. Environment variables override file
//! values before validation; CLI flags are applied by the binary on top.

use std::path::Path;

use crate::config::Config;
use crate::error::{Error, Result};

/// Load, override, and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    let mut cfg = parse_config(&data, ext.as_deref())?;
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

fn parse_config(data: &str, ext: Option<&str>) -> Result<Config> {
    match ext {
        Some("json") => serde_json::from_str(data)
            .map_err(|e| Error::config(format!("failed to parse JSON config: {}", e))),
        Some("yaml") | Some("yml") => serde_yaml::from_str(data)
            .map_err(|e| Error::config(format!("failed to parse YAML config: {}", e))),
        _ => serde_json::from_str(data).or_else(|_| {
            serde_yaml::from_str(data)
                .map_err(|e| Error::config(format!("failed to parse config as JSON or YAML: {}", e)))
        }),
    }
}

/// Apply `LIGHT_SS_*` environment overrides.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(server) = std::env::var("LIGHT_SS_SERVER") {
        if !server.is_empty() {
            cfg.shadowsocks.server = server;
        }
    }
    if let Ok(password) = std::env::var("LIGHT_SS_PASSWORD") {
        if !password.is_empty() {
            cfg.shadowsocks.password = password;
        }
    }
    if let Ok(cipher) = std::env::var("LIGHT_SS_CIPHER") {
        if !cipher.is_empty() {
            cfg.shadowsocks.cipher = cipher;
        }
    }
    if let Ok(listen) = std::env::var("LIGHT_SS_HTTP_LISTEN") {
        if !listen.is_empty() {
            cfg.proxies.http_listen = Some(listen);
        }
    }
    if let Ok(listen) = std::env::var("LIGHT_SS_SOCKS5_LISTEN") {
        if !listen.is_empty() {
            cfg.proxies.set_socks5_listen(&listen);
        }
    }
    if let Ok(level) = std::env::var("LIGHT_SS_LOG_LEVEL") {
        if !level.is_empty() {
            cfg.logging.level = level;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
shadowsocks:
  server: ss.example.net
  port: 8388
  password: secret
  cipher: aes-256-gcm
  plugin: simple-obfs
  plugin_opts:
    obfs: http
    obfs-host: www.bing.com
proxies: 127.0.0.1:1080
stats:
  enabled: true
  interval: 30
logging:
  level: debug
  format: json
"#;

        let mut cfg = parse_config(yaml, Some("yaml")).unwrap();
        cfg.validate().unwrap();

        assert_eq!(cfg.shadowsocks.server, "ss.example.net:8388");
        assert_eq!(cfg.shadowsocks.cipher, "AEAD_AES_256_GCM");
        assert_eq!(cfg.shadowsocks.plugin.as_deref(), Some("simple-obfs"));
        let opts = cfg.shadowsocks.plugin_opts.unwrap();
        assert_eq!(opts.obfs.as_deref(), Some("http"));
        assert_eq!(opts.obfs_host.as_deref(), Some("www.bing.com"));
        assert_eq!(cfg.proxies.unified.as_deref(), Some("127.0.0.1:1080"));
        assert!(cfg.stats.enabled);
        assert_eq!(cfg.stats.interval, 30);
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.logging.format, "json");
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{
            "shadowsocks": {"server": "1.2.3.4:8388", "password": "pw"},
            "proxies": {"http": "127.0.0.1:8080", "socks5": "127.0.0.1:1080"}
        }"#;

        let mut cfg = parse_config(json, Some("json")).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.proxies.http_listen.as_deref(), Some("127.0.0.1:8080"));
        assert_eq!(cfg.proxies.socks5_listen.as_deref(), Some("127.0.0.1:1080"));
    }

    #[test]
    fn test_unknown_extension_falls_back() {
        let json = r#"{"shadowsocks": {"server": "a:1", "password": "p"}}"#;
        assert!(parse_config(json, None).is_ok());

        let yaml = "shadowsocks:\n  server: a:1\n  password: p\n";
        assert!(parse_config(yaml, None).is_ok());

        assert!(parse_config("{not valid at all", None).is_err());
    }
}
