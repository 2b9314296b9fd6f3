//! Clash YAML importer.
//!
//! Converts the first `type: ss` proxy from a Clash configuration.

use std::path::Path;

use serde::Deserialize;

use crate::config::{Config, PluginOpts, ShadowsocksConfig};
use crate::converter::normalize_plugin_name;
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct ClashConfig {
    #[serde(default)]
    proxies: Vec<ClashProxy>,
}

#[derive(Debug, Deserialize)]
struct ClashProxy {
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    proxy_type: String,
    #[serde(default)]
    server: String,
    #[serde(default)]
    port: u16,
    #[serde(default)]
    cipher: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    plugin: Option<String>,
    #[serde(default, rename = "plugin-opts")]
    plugin_opts: Option<ClashPluginOpts>,
}

/// Clash uses `mode`/`host` where we use `obfs`/`obfs-host`.
#[derive(Debug, Default, Deserialize)]
struct ClashPluginOpts {
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    host: Option<String>,
}

/// Import a Clash config file.
pub fn from_clash(path: &Path) -> Result<Config> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;
    parse(&data)
}

fn parse(data: &str) -> Result<Config> {
    let clash: ClashConfig = serde_yaml::from_str(data)
        .map_err(|e| Error::config(format!("failed to parse Clash config: {}", e)))?;

    let proxy = clash
        .proxies
        .into_iter()
        .find(|p| p.proxy_type == "ss")
        .ok_or_else(|| Error::config("no shadowsocks proxy found in Clash config"))?;

    let mut cfg = Config {
        name: (!proxy.name.is_empty()).then_some(proxy.name),
        shadowsocks: ShadowsocksConfig {
            server: proxy.server,
            port: proxy.port,
            password: proxy.password,
            cipher: proxy.cipher,
            ..Default::default()
        },
        ..Default::default()
    };

    if let Some(plugin) = proxy.plugin.filter(|p| !p.is_empty()) {
        cfg.shadowsocks.plugin = Some(normalize_plugin_name(&plugin));
        if let Some(opts) = proxy.plugin_opts {
            cfg.shadowsocks.plugin_opts = Some(PluginOpts {
                obfs: opts.mode,
                obfs_host: opts.host,
            });
        }
    }

    cfg.stats.enabled = true;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_picks_first_ss_proxy() {
        let yaml = r#"
proxies:
  - name: "vmess-node"
    type: vmess
    server: v.example.net
    port: 443
  - name: "ss-node"
    type: ss
    server: ss.example.net
    port: 8388
    cipher: aes-256-gcm
    password: secret
    plugin: obfs
    plugin-opts:
      mode: tls
      host: cloudfront.net
  - name: "ss-node-2"
    type: ss
    server: other.example.net
    port: 8389
    cipher: chacha20-ietf-poly1305
    password: other
"#;

        let cfg = parse(yaml).unwrap();
        assert_eq!(cfg.name.as_deref(), Some("ss-node"));
        assert_eq!(cfg.shadowsocks.server, "ss.example.net:8388");
        assert_eq!(cfg.shadowsocks.cipher, "AEAD_AES_256_GCM");
        assert_eq!(cfg.shadowsocks.plugin.as_deref(), Some("simple-obfs"));
        let opts = cfg.shadowsocks.plugin_opts.unwrap();
        assert_eq!(opts.obfs.as_deref(), Some("tls"));
        assert_eq!(opts.obfs_host.as_deref(), Some("cloudfront.net"));
        assert!(cfg.stats.enabled);
    }

    #[test]
    fn test_import_without_ss_proxy_fails() {
        let yaml = r#"
proxies:
  - name: "vmess-node"
    type: vmess
    server: v.example.net
    port: 443
"#;
        assert!(parse(yaml).is_err());
    }

    #[test]
    fn test_import_empty_proxies_fails() {
        assert!(parse("proxies: []\n").is_err());
    }
}
