//! External configuration importers.
//!
//! Converts shadowsocks-libev (`ss-local`) JSON and Clash YAML
//! configurations into the native format.

mod clash;
mod sslocal;

pub use clash::from_clash;
pub use sslocal::from_sslocal;

use std::path::Path;

use crate::config::Config;
use crate::error::{Error, Result};

/// Convert a foreign config file; write JSON or YAML by output extension,
/// or print JSON to stdout when no output path is given.
pub fn convert(from: &str, input: &Path, output: Option<&Path>) -> Result<()> {
    let cfg = match from {
        "ss-local" | "shadowsocks-libev" => from_sslocal(input)?,
        "clash" => from_clash(input)?,
        other => {
            return Err(Error::config(format!(
                "unsupported format: {} (supported: ss-local, clash)",
                other
            )))
        }
    };

    let Some(output) = output else {
        println!("{}", render_json(&cfg)?);
        return Ok(());
    };

    let ext = output
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    let rendered = match ext.as_deref() {
        Some("yaml") | Some("yml") => serde_yaml::to_string(&cfg)
            .map_err(|e| Error::config(format!("failed to render config: {}", e)))?,
        _ => render_json(&cfg)?,
    };

    std::fs::write(output, rendered)
        .map_err(|e| Error::config(format!("failed to write {}: {}", output.display(), e)))?;
    Ok(())
}

fn render_json(cfg: &Config) -> Result<String> {
    serde_json::to_string_pretty(cfg)
        .map_err(|e| Error::config(format!("failed to render config: {}", e)))
}

/// Map foreign plugin names onto ours.
pub(crate) fn normalize_plugin_name(name: &str) -> String {
    match name {
        "obfs-local" | "obfs" => "simple-obfs".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_plugin_name() {
        assert_eq!(normalize_plugin_name("obfs-local"), "simple-obfs");
        assert_eq!(normalize_plugin_name("obfs"), "simple-obfs");
        assert_eq!(normalize_plugin_name("simple-obfs"), "simple-obfs");
        assert_eq!(normalize_plugin_name("v2ray-plugin"), "v2ray-plugin");
    }

    #[test]
    fn test_unknown_format_rejected() {
        let err = convert("surge", Path::new("/nonexistent"), None);
        assert!(err.is_err());
    }
}
