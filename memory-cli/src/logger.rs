//! Tracing setup: one fmt layer written to stderr and, optionally, appended to a log file.

use std::fs::OpenOptions;
use std::io;
use std::sync::Arc;

use tracing_subscriber::{
    fmt::format::FmtSpan, fmt::writer::MakeWriterExt, layer::SubscriberExt,
    util::SubscriberInitExt, EnvFilter, Registry,
};

/// Installs the global subscriber. Level comes from `RUST_LOG` (default `warn`), so load
/// `.env` before calling this.
///
/// Logs go to stderr to keep command output on stdout clean.
pub fn init_tracing(log_file_path: Option<&str>) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let layer = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    let registry = Registry::default().with(env_filter);
    let result = match log_file_path {
        Some(path) => {
            let file = Arc::new(OpenOptions::new().create(true).append(true).open(path)?);
            registry
                .with(layer.with_writer(io::stderr.and(file)))
                .try_init()
        }
        None => registry.with(layer.with_writer(io::stderr)).try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to set global subscriber: {}", e))
}
