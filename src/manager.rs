//! Proxy lifecycle: listeners, background tasks, hot-reload, shutdown.
//!
//! The one truly contested piece of shared state is the current upstream
//! dialer. It lives in a reader-writer cell holding an immutable `Dialer`;
//! reload constructs a replacement completely before publishing it, so a
//! handler observes either the old or the new dialer, never a torn value.
//! Replaced dialers are retained so in-flight connections finish on the
//! dialer they started with.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::{Config, ShadowsocksConfig};
use crate::error::{Error, Result};
use crate::proxy::{self, ProxyContext};
use crate::shadowsocks::Dialer;
use crate::stats::{self, Collector};

/// Bound on waiting for in-flight connections during shutdown.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared handle to the current upstream dialer.
#[derive(Clone)]
pub struct DialerCell {
    inner: Arc<RwLock<Arc<Dialer>>>,
}

impl DialerCell {
    pub(crate) fn new(dialer: Dialer) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(dialer))),
        }
    }

    /// The dialer to use for new connections.
    pub fn current(&self) -> Arc<Dialer> {
        Arc::clone(&self.inner.read())
    }

    pub(crate) fn replace(&self, dialer: Dialer) -> Arc<Dialer> {
        let mut slot = self.inner.write();
        std::mem::replace(&mut *slot, Arc::new(dialer))
    }
}

/// Owns the listeners, the dialer cell, and the background tasks.
pub struct Manager {
    config: Mutex<Config>,
    dialers: DialerCell,
    old_dialers: Mutex<Vec<Arc<Dialer>>>,
    collector: Option<Arc<Collector>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Manager {
    /// Build a manager from a validated configuration.
    pub fn new(config: Config) -> Result<Self> {
        let dialer = Dialer::new(&config.shadowsocks)?;

        let collector = if config.stats.enabled {
            tracing::info!(interval = config.stats.interval, "statistics collection enabled");
            Some(Arc::new(Collector::new()))
        } else {
            None
        };

        Ok(Self {
            config: Mutex::new(config),
            dialers: DialerCell::new(dialer),
            old_dialers: Mutex::new(Vec::new()),
            collector,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    /// The hot-reloadable dialer cell.
    pub fn dialer_cell(&self) -> DialerCell {
        self.dialers.clone()
    }

    /// The statistics collector, when enabled.
    pub fn collector(&self) -> Option<Arc<Collector>> {
        self.collector.clone()
    }

    /// The shutdown token propagated to every task.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Bind all configured listeners and start serving.
    ///
    /// Bind failures are fatal and reported before any task is spawned.
    pub async fn start(&self) -> Result<()> {
        let (proxies, instance, stats_cfg) = {
            let cfg = self.config.lock();
            (cfg.proxies.clone(), cfg.name.clone(), cfg.stats.clone())
        };

        let base_ctx = ProxyContext {
            dialers: self.dialers.clone(),
            collector: self.collector.clone(),
            socks5_auth: None,
            cancel: self.cancel.clone(),
            tracker: self.tracker.clone(),
        };

        if let Some(collector) = &self.collector {
            self.tracker.spawn(stats::run_sampler(
                Arc::clone(collector),
                self.cancel.clone(),
            ));
            self.tracker.spawn(stats::run_reporter(
                Arc::clone(collector),
                Duration::from_secs(stats_cfg.interval),
                instance,
                self.cancel.clone(),
            ));
        }

        if let Some(listen) = &proxies.unified {
            let listener = proxy::bind(listen).await?;
            tracing::info!(address = %listen, protocols = "HTTP/HTTPS/SOCKS5", "unified proxy started");
            self.tracker.spawn(proxy::serve_unified(listener, base_ctx));
            return Ok(());
        }

        if let Some(listen) = &proxies.http_listen {
            let listener = proxy::bind(listen).await?;
            tracing::info!(address = %listen, "HTTP proxy started");
            self.tracker
                .spawn(proxy::serve_http(listener, base_ctx.clone()));
        }

        if let Some(listen) = &proxies.socks5_listen {
            let listener = proxy::bind(listen).await?;
            let mut ctx = base_ctx.clone();
            ctx.socks5_auth = proxies.socks5_auth.clone().map(Arc::new);
            if ctx.socks5_auth.is_some() {
                tracing::info!(address = %listen, "SOCKS5 proxy started with authentication");
            } else {
                tracing::info!(address = %listen, "SOCKS5 proxy started");
            }
            self.tracker.spawn(proxy::serve_socks5(listener, ctx));
        }

        Ok(())
    }

    /// Swap in a new upstream configuration without touching the listeners.
    ///
    /// The replacement dialer is fully constructed before publication; an
    /// invalid configuration is rejected and the current dialer stays
    /// active. In-flight connections keep their original dialer.
    pub fn reload(&self, mut new_config: ShadowsocksConfig) -> Result<()> {
        if new_config.server.is_empty() {
            return Err(Error::config("shadowsocks server address is required"));
        }
        if new_config.port > 0 && !new_config.server.contains(':') {
            new_config.server = format!("{}:{}", new_config.server, new_config.port);
        }
        if new_config.password.is_empty() {
            return Err(Error::config("shadowsocks password is required"));
        }
        if new_config.cipher.is_empty() {
            if let Some(method) = new_config.method.take() {
                new_config.cipher = method;
            }
        }
        if new_config.timeout == 0 {
            new_config.timeout = crate::config::DEFAULT_TIMEOUT_SECS;
        }

        let dialer = Dialer::new(&new_config)?;
        let server = new_config.server.clone();

        let old = self.dialers.replace(dialer);
        self.old_dialers.lock().push(old);
        self.config.lock().shadowsocks = new_config;

        tracing::info!(server = %server, "upstream configuration reloaded");
        Ok(())
    }

    /// Signal shutdown, wait for tasks up to [`SHUTDOWN_TIMEOUT`], then give
    /// up and let remaining sockets close with the process.
    pub async fn shutdown(&self) {
        tracing::info!("initiating graceful shutdown");
        self.cancel.cancel();
        self.tracker.close();

        if timeout(SHUTDOWN_TIMEOUT, self.tracker.wait()).await.is_err() {
            tracing::warn!(
                remaining = self.tracker.len(),
                "shutdown deadline reached, closing remaining connections"
            );
        }

        if let Some(collector) = &self.collector {
            let instance = self.config.lock().name.clone();
            stats::report(collector, instance.as_deref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        let mut cfg = Config {
            shadowsocks: ShadowsocksConfig {
                server: "127.0.0.1:8388".into(),
                password: "pw".into(),
                cipher: "aes-128-gcm".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        cfg.validate().unwrap();
        cfg
    }

    #[test]
    fn test_reload_swaps_dialer_and_retains_old() {
        let manager = Manager::new(base_config()).unwrap();
        let before = manager.dialer_cell().current();

        manager
            .reload(ShadowsocksConfig {
                server: "127.0.0.1:9999".into(),
                password: "new-pw".into(),
                cipher: "aes-256-gcm".into(),
                ..Default::default()
            })
            .unwrap();

        let after = manager.dialer_cell().current();
        assert_eq!(after.server_addr(), "127.0.0.1:9999");
        assert!(!Arc::ptr_eq(&before, &after));

        // The replaced dialer is retained, and the handle taken before the
        // reload still points at it
        let retained = manager.old_dialers.lock();
        assert_eq!(retained.len(), 1);
        assert!(Arc::ptr_eq(&before, &retained[0]));
        assert_eq!(before.server_addr(), "127.0.0.1:8388");
    }

    #[test]
    fn test_reload_rejects_invalid_config() {
        let manager = Manager::new(base_config()).unwrap();
        let before = manager.dialer_cell().current();

        // Missing password
        let result = manager.reload(ShadowsocksConfig {
            server: "127.0.0.1:9999".into(),
            ..Default::default()
        });
        assert!(result.is_err());

        // Bad cipher
        let result = manager.reload(ShadowsocksConfig {
            server: "127.0.0.1:9999".into(),
            password: "pw".into(),
            cipher: "rc4-md5".into(),
            ..Default::default()
        });
        assert!(result.is_err());

        // Current dialer untouched
        let after = manager.dialer_cell().current();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_reload_applies_method_alias_and_port() {
        let manager = Manager::new(base_config()).unwrap();

        manager
            .reload(ShadowsocksConfig {
                server: "ss.example.net".into(),
                port: 443,
                password: "pw".into(),
                method: Some("chacha20-ietf-poly1305".into()),
                ..Default::default()
            })
            .unwrap();

        let dialer = manager.dialer_cell().current();
        assert_eq!(dialer.server_addr(), "ss.example.net:443");
        assert_eq!(
            dialer.cipher(),
            crate::crypto::CipherKind::ChaCha20Poly1305
        );
    }

    #[tokio::test]
    async fn test_start_fails_on_bind_conflict() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut cfg = base_config();
        cfg.proxies.unified = Some(addr.to_string());

        let manager = Manager::new(cfg).unwrap();
        match manager.start().await {
            Err(Error::Bind { addr: bound, .. }) => assert_eq!(bound, addr.to_string()),
            other => panic!("expected bind failure, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_shutdown_cancels_listener() {
        let mut cfg = base_config();
        cfg.proxies.unified = Some("127.0.0.1:0".into());

        let manager = Manager::new(cfg).unwrap();
        manager.start().await.unwrap();
        manager.shutdown().await;
        assert!(manager.cancel_token().is_cancelled());
    }
}
