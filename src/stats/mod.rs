//! Connection and bandwidth statistics.
//!
//! Counters are plain atomics updated from every connection handler; a
//! background sampler feeds a sliding window used to derive instantaneous
//! transfer speeds, and a reporter task logs a summary on an interval.

mod collector;
mod reporter;

pub use collector::{run_sampler, Collector, ConnectionGuard, ProxyKind, Snapshot};
pub use reporter::{format_bytes, format_speed, report, run_reporter};
