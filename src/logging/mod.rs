//! Process-wide `tracing` setup.
//!
//! Engine, consumers, producer and HTTP layer log under `queueboard::*`
//! targets; `RUST_LOG=queueboard::engine=debug` follows every card move.

use anyhow::Context;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "info,tower_http=debug";

/// Installs the global subscriber with UTC RFC 3339 timestamps and compact
/// lines. Fails if a subscriber is already installed.
pub fn init_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let subscriber = Registry::default().with(filter).with(
        fmt::layer()
            .with_timer(UtcTime::rfc_3339())
            .with_target(true)
            .compact(),
    );

    tracing::subscriber::set_global_default(subscriber)
        .context("a global tracing subscriber is already installed")
}
