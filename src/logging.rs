//! Tracing setup: a daily-rotated text log, a daily-rotated JSON log, and
//! compact terminal output, all filtered through `RUST_LOG`.

use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const TEXT_LOG: &str = "crawler.log";
const JSON_LOG: &str = "crawler.json.log";
const DEFAULT_FILTER: &str = "info";

/// Keeps the background log writers alive. Dropping it flushes and stops them.
#[must_use = "logs stop being written when the guard is dropped"]
pub struct LogGuard {
    _guards: Vec<WorkerGuard>,
    pub dir: PathBuf,
}

/// Log directory used for a given data directory.
pub fn log_dir_for<P: AsRef<Path>>(data_dir: P) -> PathBuf {
    data_dir.as_ref().join("logs")
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global subscriber, writing files under `log_dir`.
///
/// # Environment Variables
/// * `RUST_LOG` - level filter, default `info`.
///   e.g. `RUST_LOG=hearing_crawler=debug,reqwest=warn`
pub fn init_logging<P: AsRef<Path>>(log_dir: P) -> Result<LogGuard, Box<dyn std::error::Error>> {
    let log_path = log_dir.as_ref();
    std::fs::create_dir_all(log_path)?;

    let (text_writer, text_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_path, TEXT_LOG));
    let (json_writer, json_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_path, JSON_LOG));

    let text_layer = fmt::layer()
        .with_writer(text_writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_ansi(false)
        .compact()
        .with_filter(env_filter());

    let json_layer = fmt::layer()
        .json()
        .with_writer(json_writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_filter(env_filter());

    let stdout_layer = fmt::layer()
        .with_target(false)
        .compact()
        .with_filter(env_filter());

    tracing_subscriber::registry()
        .with(text_layer)
        .with(json_layer)
        .with(stdout_layer)
        .try_init()?;

    tracing::debug!(dir = %log_path.display(), "Logging initialized");

    Ok(LogGuard {
        _guards: vec![text_guard, json_guard],
        dir: log_path.to_path_buf(),
    })
}
