//! light-ss command-line interface.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::signal::unix::{signal, SignalKind};

use light_ss::config::{self, Config, LoggingConfig, PluginOpts};
use light_ss::converter;
use light_ss::manager::Manager;
use light_ss::shadowsocks::{Dialer, TargetAddr};

#[derive(Parser)]
#[command(
    name = "light-ss",
    version,
    about = "Lightweight Shadowsocks client with local HTTP/HTTPS and SOCKS5 proxies"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the shadowsocks client and local proxies
    Start(StartArgs),
    /// Convert a foreign config file (ss-local, Clash) to the native format
    Convert(ConvertArgs),
    /// Test shadowsocks server connectivity and latency
    Test(TestArgs),
}

#[derive(Args, Clone)]
struct StartArgs {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Shadowsocks server address
    #[arg(short, long)]
    server: Option<String>,
    /// Shadowsocks server port
    #[arg(short, long)]
    port: Option<u16>,
    /// Shadowsocks password
    #[arg(long)]
    password: Option<String>,
    /// Encryption method (aes-128-gcm, aes-256-gcm, chacha20-poly1305, ...)
    #[arg(short, long)]
    method: Option<String>,
    /// Connection timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Plugin name (e.g., simple-obfs)
    #[arg(long)]
    plugin: Option<String>,
    /// Obfuscation mode: http or tls
    #[arg(long = "plugin-obfs")]
    plugin_obfs: Option<String>,
    /// Obfuscation host header
    #[arg(long = "plugin-host")]
    plugin_host: Option<String>,

    /// Unified proxy listen address (e.g., 127.0.0.1:1080)
    #[arg(long)]
    proxies: Option<String>,
    /// HTTP/HTTPS proxy listen address
    #[arg(long = "http-proxy")]
    http_proxy: Option<String>,
    /// SOCKS5 proxy listen address (supports user:pass@host:port)
    #[arg(long = "socks5-proxy")]
    socks5_proxy: Option<String>,

    /// Enable statistics reporting
    #[arg(long)]
    stats: bool,
    /// Statistics report interval in seconds
    #[arg(long = "stats-interval")]
    stats_interval: Option<u64>,

    /// Log level (debug, info, warn, error)
    #[arg(long = "log-level")]
    log_level: Option<String>,
    /// Log format (text, json)
    #[arg(long = "log-format")]
    log_format: Option<String>,
}

#[derive(Args)]
struct ConvertArgs {
    /// Input format: ss-local or clash
    #[arg(long)]
    from: String,
    /// Input file
    #[arg(long)]
    input: PathBuf,
    /// Output file (.json or .yaml); prints JSON to stdout when omitted
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct TestArgs {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Shadowsocks server address
    #[arg(short, long)]
    server: Option<String>,
    /// Shadowsocks server port
    #[arg(short, long)]
    port: Option<u16>,
    /// Shadowsocks password
    #[arg(long)]
    password: Option<String>,
    /// Encryption method
    #[arg(short, long)]
    method: Option<String>,
    /// Connection timeout in seconds
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Plugin name (e.g., simple-obfs)
    #[arg(long)]
    plugin: Option<String>,
    /// Obfuscation mode: http or tls
    #[arg(long = "plugin-obfs")]
    plugin_obfs: Option<String>,
    /// Obfuscation host header
    #[arg(long = "plugin-host")]
    plugin_host: Option<String>,

    /// Probe target behind the proxy
    #[arg(long, default_value = "example.com:80")]
    target: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Start(args) => run_start(args).await,
        Command::Convert(args) => run_convert(args),
        Command::Test(args) => run_test(args).await,
    }
}

async fn run_start(args: StartArgs) -> anyhow::Result<()> {
    let mut cfg = match &args.config {
        Some(path) => config::load_config(path)?,
        None => {
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    apply_flags(&mut cfg, &args);
    cfg.validate()?;
    setup_logging(&cfg.logging);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting light-ss");

    let manager = Manager::new(cfg)?;
    manager.start().await?;
    tracing::info!("all servers started successfully");

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(signal = "SIGINT", "received shutdown signal");
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!(signal = "SIGTERM", "received shutdown signal");
                break;
            }
            _ = sighup.recv() => {
                reload_from_file(&manager, args.config.as_deref());
            }
        }
    }

    manager.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}

fn reload_from_file(manager: &Manager, config_path: Option<&std::path::Path>) {
    let Some(path) = config_path else {
        tracing::warn!("SIGHUP received but no config file was given, ignoring");
        return;
    };

    match config::load_config(path) {
        Ok(cfg) => match manager.reload(cfg.shadowsocks) {
            Ok(()) => {}
            Err(e) => tracing::warn!(error = %e, "reload rejected, keeping current upstream"),
        },
        Err(e) => tracing::warn!(error = %e, "failed to re-read config, keeping current upstream"),
    }
}

/// Apply command-line flags on top of file and environment values.
fn apply_flags(cfg: &mut Config, args: &StartArgs) {
    if let Some(server) = &args.server {
        cfg.shadowsocks.server = server.clone();
    }
    if let Some(port) = args.port {
        cfg.shadowsocks.port = port;
    }
    if let Some(password) = &args.password {
        cfg.shadowsocks.password = password.clone();
    }
    if let Some(method) = &args.method {
        cfg.shadowsocks.method = Some(method.clone());
        cfg.shadowsocks.cipher = String::new();
    }
    if let Some(timeout) = args.timeout {
        cfg.shadowsocks.timeout = timeout;
    }

    if let Some(plugin) = &args.plugin {
        cfg.shadowsocks.plugin = Some(plugin.clone());
    }
    if args.plugin_obfs.is_some() || args.plugin_host.is_some() {
        let opts = cfg.shadowsocks.plugin_opts.get_or_insert_with(PluginOpts::default);
        if let Some(obfs) = &args.plugin_obfs {
            opts.obfs = Some(obfs.clone());
        }
        if let Some(host) = &args.plugin_host {
            opts.obfs_host = Some(host.clone());
        }
    }

    // Unified and separate mode are mutually exclusive; the last flag wins
    if let Some(proxies) = &args.proxies {
        cfg.proxies.unified = Some(proxies.clone());
        cfg.proxies.http_listen = None;
        cfg.proxies.socks5_listen = None;
        cfg.proxies.socks5_auth = None;
    }
    if let Some(http) = &args.http_proxy {
        cfg.proxies.http_listen = Some(http.clone());
        cfg.proxies.unified = None;
    }
    if let Some(socks5) = &args.socks5_proxy {
        cfg.proxies.set_socks5_listen(socks5);
        cfg.proxies.unified = None;
    }

    if args.stats {
        cfg.stats.enabled = true;
    }
    if let Some(interval) = args.stats_interval {
        cfg.stats.interval = interval;
    }

    if let Some(level) = &args.log_level {
        cfg.logging.level = level.clone();
    }
    if let Some(format) = &args.log_format {
        cfg.logging.format = format.clone();
    }
}

fn setup_logging(cfg: &LoggingConfig) {
    let level = match cfg.level.as_str() {
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false);

    if cfg.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run_convert(args: ConvertArgs) -> anyhow::Result<()> {
    setup_logging(&LoggingConfig::default());
    converter::convert(&args.from, &args.input, args.output.as_deref())?;
    if let Some(output) = &args.output {
        tracing::info!(output = %output.display(), "configuration converted");
    }
    Ok(())
}

async fn run_test(args: TestArgs) -> anyhow::Result<()> {
    setup_logging(&LoggingConfig::default());

    let mut cfg = match &args.config {
        Some(path) => config::load_config(path)?,
        None => {
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    if let Some(server) = &args.server {
        cfg.shadowsocks.server = server.clone();
    }
    if let Some(port) = args.port {
        cfg.shadowsocks.port = port;
    }
    if let Some(password) = &args.password {
        cfg.shadowsocks.password = password.clone();
    }
    if let Some(method) = &args.method {
        cfg.shadowsocks.method = Some(method.clone());
        cfg.shadowsocks.cipher = String::new();
    }
    cfg.shadowsocks.timeout = args.timeout;
    if let Some(plugin) = &args.plugin {
        cfg.shadowsocks.plugin = Some(plugin.clone());
    }
    if args.plugin_obfs.is_some() || args.plugin_host.is_some() {
        let opts = cfg.shadowsocks.plugin_opts.get_or_insert_with(PluginOpts::default);
        if let Some(obfs) = &args.plugin_obfs {
            opts.obfs = Some(obfs.clone());
        }
        if let Some(host) = &args.plugin_host {
            opts.obfs_host = Some(host.clone());
        }
    }
    cfg.validate()?;

    let dialer = Dialer::new(&cfg.shadowsocks)?;

    let (host, port_str) = args
        .target
        .rsplit_once(':')
        .context("probe target must be host:port")?;
    let port: u16 = port_str.parse().context("invalid probe target port")?;
    let target = TargetAddr::from_host_port(host, port)?;

    tracing::info!(server = %dialer.server_addr(), target = %target, "testing connection");

    let started = Instant::now();
    let ss = dialer.connect(&target).await?;
    let connect_ms = started.elapsed().as_millis();
    tracing::info!(latency_ms = connect_ms as u64, "connected through shadowsocks");

    let (mut read, mut write) = ss.into_split();
    let probe = format!(
        "HEAD / HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        host
    );
    write.write_payload(probe.as_bytes()).await?;

    match tokio::time::timeout(std::time::Duration::from_secs(args.timeout), read.read_frame())
        .await
    {
        Ok(Ok(Some(data))) => {
            let total_ms = started.elapsed().as_millis();
            tracing::info!(
                first_byte_ms = total_ms as u64,
                bytes = data.len(),
                "received response"
            );
            Ok(())
        }
        Ok(Ok(None)) => anyhow::bail!("server closed the tunnel without responding"),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => anyhow::bail!("no response within {}s", args.timeout),
    }
}
