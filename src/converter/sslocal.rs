//! shadowsocks-libev (`ss-local`) JSON importer.

use std::path::Path;

use serde::Deserialize;

use crate::config::{Config, PluginOpts, ShadowsocksConfig};
use crate::converter::normalize_plugin_name;
use crate::error::{Error, Result};

/// shadowsocks-libev client configuration.
#[derive(Debug, Deserialize)]
struct SsLocalConfig {
    server: String,
    server_port: u16,
    #[serde(default)]
    local_address: Option<String>,
    #[serde(default)]
    local_port: Option<u16>,
    password: String,
    method: String,
    #[serde(default)]
    timeout: u64,
    #[serde(default)]
    plugin: Option<String>,
    #[serde(default)]
    plugin_opts: Option<String>,
}

/// Import an ss-local config file.
pub fn from_sslocal(path: &Path) -> Result<Config> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;
    parse(&data)
}

fn parse(data: &str) -> Result<Config> {
    let ss: SsLocalConfig = serde_json::from_str(data)
        .map_err(|e| Error::config(format!("failed to parse ss-local config: {}", e)))?;

    let mut cfg = Config {
        shadowsocks: ShadowsocksConfig {
            server: ss.server,
            port: ss.server_port,
            password: ss.password,
            method: Some(ss.method),
            timeout: ss.timeout,
            ..Default::default()
        },
        ..Default::default()
    };

    // ss-local only runs a SOCKS5 listener
    let local_address = ss.local_address.unwrap_or_else(|| "127.0.0.1".into());
    let local_port = ss.local_port.unwrap_or(1080);
    cfg.proxies.socks5_listen = Some(format!("{}:{}", local_address, local_port));

    if let Some(plugin) = ss.plugin.filter(|p| !p.is_empty()) {
        cfg.shadowsocks.plugin = Some(normalize_plugin_name(&plugin));
        if let Some(opts) = ss.plugin_opts.as_deref() {
            cfg.shadowsocks.plugin_opts = Some(parse_plugin_opts(opts));
        }
    }

    cfg.validate()?;
    Ok(cfg)
}

/// Parse ss-local style options: `obfs=http;obfs-host=example.com`.
fn parse_plugin_opts(opts: &str) -> PluginOpts {
    let mut result = PluginOpts::default();

    for part in opts.split(';') {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        match key.trim() {
            "obfs" => result.obfs = Some(value.trim().to_string()),
            "obfs-host" => result.obfs_host = Some(value.trim().to_string()),
            _ => {}
        }
    }

    result
}
