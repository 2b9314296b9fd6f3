//! Periodic statistics reporting.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::stats::Collector;

/// Log one statistics record.
pub fn report(collector: &Collector, instance: Option<&str>) {
    let snap = collector.snapshot();

    tracing::info!(
        instance = instance.unwrap_or(""),
        total_connections = snap.total_connections,
        active_connections = snap.active_connections,
        http_connections = snap.http_connections,
        socks5_connections = snap.socks5_connections,
        bytes_sent = %format_bytes(snap.bytes_sent),
        bytes_received = %format_bytes(snap.bytes_received),
        upload_speed = %format_speed(snap.upload_speed),
        download_speed = %format_speed(snap.download_speed),
        uptime_secs = snap.uptime.as_secs(),
        "statistics"
    );
}

/// Background task emitting a report every `interval` until cancelled.
pub async fn run_reporter(
    collector: Arc<Collector>,
    interval: Duration,
    instance: Option<String>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; skip it
    loop {
        tokio::select! {
            _ = ticker.tick() => report(&collector, instance.as_deref()),
            _ = cancel.cancelled() => return,
        }
    }
}

/// Format a byte count in base-1024 units.
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{} B", bytes);
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }

    let unit = [b'K', b'M', b'G', b'T', b'P', b'E'][exp] as char;
    format!("{:.1} {}B", bytes as f64 / div as f64, unit)
}

/// Format a transfer speed in base-1024 units per second.
pub fn format_speed(bytes_per_sec: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.0 MB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.0 GB");
        assert_eq!(format_bytes(2 * 1024 * 1024 * 1024 * 1024), "2.0 TB");
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(100), "100 B/s");
        assert_eq!(format_speed(2048), "2.0 KB/s");
    }
}
