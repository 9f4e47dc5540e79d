use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use file_rotate::{compression::Compression, suffix::AppendCount, ContentLimit, FileRotate};
use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LogConfig;

pub const LOG_FILE_NAME: &str = "companion.log";

static FILE_GUARD: OnceCell<Mutex<Option<WorkerGuard>>> = OnceCell::new();

fn rotating_writer(dir: &Path, config: &LogConfig) -> anyhow::Result<FileRotate<AppendCount>> {
    std::fs::create_dir_all(dir).with_context(|| format!("create log dir {}", dir.display()))?;
    let path = dir.join(LOG_FILE_NAME);
    #[cfg(unix)]
    let writer = FileRotate::new(
        path,
        AppendCount::new(config.max_files),
        ContentLimit::Bytes(config.max_bytes),
        Compression::None,
        None,
    );
    #[cfg(not(unix))]
    let writer = FileRotate::new(
        path,
        AppendCount::new(config.max_files),
        ContentLimit::Bytes(config.max_bytes),
        Compression::None,
    );
    Ok(writer)
}

/// Install the global subscriber: JSON lines on stderr and, when a log
/// directory is configured, a size-rotated JSON file sink.
///
/// Calling this more than once is harmless; only the first call installs.
/// Returns the path of the active log file, if any.
pub fn init(config: &LogConfig) -> anyhow::Result<Option<PathBuf>> {
    let _ = tracing_log::LogTracer::init();

    let stderr_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(&config.filter));

    let (file_layer, log_path) = match &config.dir {
        Some(dir) => {
            let writer = rotating_writer(dir, config)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(writer);
            let slot = FILE_GUARD.get_or_init(|| Mutex::new(None));
            *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(guard);
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_ansi(false)
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new(&config.filter));
            (Some(layer), Some(dir.join(LOG_FILE_NAME)))
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(
            target: "companion",
            event = "logging_initialized",
            filter = %config.filter,
            file = ?log_path
        );
    }

    Ok(log_path)
}

/// Flush and close the file sink. Lines logged afterwards only reach stderr.
pub fn flush_file_logs() {
    if let Some(slot) = FILE_GUARD.get() {
        let guard = slot.lock().unwrap_or_else(|e| e.into_inner()).take();
        drop(guard);
    }
}
