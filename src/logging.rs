// src/logging.rs

//! Logging setup for embedders using `tracing` + `tracing-subscriber`.
//!
//! The pool itself only emits `tracing` events (pool-lifecycle events are
//! additionally gated by [`PoolConfig::verbose`](crate::PoolConfig)); wiring
//! a subscriber is the embedder's choice. This helper installs a sensible
//! default:
//!
//! 1. `PROCPOOL_LOG` environment variable (e.g. "info", "debug")
//! 2. default to `info`
//!
//! Logs are sent to STDERR so that stdout stays free for application output.

use anyhow::Result;
use tracing_subscriber::fmt;

/// Initialise a global logging subscriber.
///
/// Safe to call once at startup. Embedders that already install their own
/// subscriber should skip this.
pub fn init_logging() -> Result<()> {
    let level = std::env::var("PROCPOOL_LOG")
        .ok()
        .and_then(|s| parse_level_str(&s))
        .unwrap_or(tracing::Level::INFO);

    fmt()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

fn parse_level_str(s: &str) -> Option<tracing::Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}
