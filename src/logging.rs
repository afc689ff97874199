//! Structured logging setup using `tracing-subscriber` and `tracing-appender`.
//!
//! Two modes:
//! - **Service** ([`init`]): JSON file layer (daily rotation) + console layer,
//!   for the long-running orchestrator process that serves many concurrent
//!   user turns (spec §5). [`crate::orchestrator::PipelineOrchestrator::handle_message`]
//!   is `#[tracing::instrument]`-ed with the turn's user id, so every
//!   plan/resolve/hitl/reply event it logs can be grepped out of the shared
//!   JSON stream by the user it belongs to, the same way the teacher tags
//!   every tool invocation with `fields(tool = ...)`.
//! - **CLI** ([`init_cli`]): console-only, for the interactive demo binary.
//!
//! Both modes read their filter from `TURNKEEPER_LOG` first, falling back
//! to the ecosystem-standard `RUST_LOG`, matching this crate's own
//! `TURNKEEPER_`-prefixed env override convention ([`crate::config`]) rather
//! than assuming every operator already has `RUST_LOG` set for this service.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Holds the non-blocking writer guard for file logging.
///
/// The [`WorkerGuard`] must be kept alive for the duration of the process.
/// Dropping it flushes pending log entries and closes the file.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

fn env_filter() -> EnvFilter {
    std::env::var("TURNKEEPER_LOG")
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Initialise logging for the long-running orchestrator process.
///
/// Writes JSON logs to `{logs_dir}/turnkeeper.log.YYYY-MM-DD` with daily
/// rotation. Also emits human-readable output to stderr. The filter is
/// read from `TURNKEEPER_LOG`, then `RUST_LOG`, defaulting to `info`.
///
/// Returns a [`LoggingGuard`] that must be kept alive for log flushing.
/// Emits one `info!` event once logging is live, so every run's log file
/// records which `logs_dir` it was initialised against.
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created.
pub fn init(logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir).map_err(|e| {
        anyhow::anyhow!(
            "failed to create logs directory {}: {e}",
            logs_dir.display()
        )
    })?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, "turnkeeper.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_writer(non_blocking);

    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(json_layer)
        .with(console_layer)
        .init();

    tracing::info!(logs_dir = %logs_dir.display(), "structured logging initialized");

    Ok(LoggingGuard { _guard: guard })
}

/// Initialise minimal logging for the CLI demo transport.
///
/// Emits human-readable output to stderr only. No file rotation. The
/// filter is read from `TURNKEEPER_LOG`, then `RUST_LOG`, defaulting to
/// `info`.
pub fn init_cli() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_filter_defaults_to_info_when_unset() {
        std::env::remove_var("TURNKEEPER_LOG");
        std::env::remove_var("RUST_LOG");
        assert_eq!(env_filter().to_string(), "info");
    }
}
