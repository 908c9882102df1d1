use std::fs;
use std::path::Path;
use std::sync::Once;
use std::time::Duration;
use tokio::time;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::AutoscaleError;

static INIT: Once = Once::new();
const LOG_ROTATION_INTERVAL: Duration = Duration::from_secs(86400); // 24 hours

/// Install the global subscriber: console output, plus JSON lines in a
/// daily rolling file when `config.file` is set. `log` records from
/// dependencies are forwarded into tracing. Later calls are no-ops.
pub fn init(config: &LoggingConfig) -> Result<(), AutoscaleError> {
    let mut result = Ok(());
    INIT.call_once(|| {
        result = install(config);
    });
    result
}

fn install(config: &LoggingConfig) -> Result<(), AutoscaleError> {
    tracing_log::LogTracer::init()
        .map_err(|e| AutoscaleError::Config(format!("Failed to bridge log records: {}", e)))?;

    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console = fmt::Layer::new()
        .with_thread_ids(true)
        .with_target(true)
        .with_ansi(true)
        .with_filter(filter());

    let file = if config.file {
        fs::create_dir_all(&config.directory)?;
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("autoscale")
            .filename_suffix("log")
            .build(&config.directory)
            .map_err(|e| AutoscaleError::Config(format!("Failed to create log file appender: {}", e)))?;

        Some(
            fmt::Layer::new()
                .json()
                .with_writer(appender)
                .with_file(true)
                .with_line_number(true)
                .with_thread_ids(true)
                .with_target(true)
                .with_ansi(false)
                .with_filter(filter()),
        )
    } else {
        None
    };

    let subscriber = tracing_subscriber::registry().with(console).with(file);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AutoscaleError::Config(format!("Failed to set tracing subscriber: {}", e)))?;

    if config.file {
        let log_dir = config.directory.clone();
        let keep = config.files_to_keep;
        cleanup_old_logs(&log_dir, keep);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let mut interval = time::interval(LOG_ROTATION_INTERVAL);
                loop {
                    interval.tick().await;
                    cleanup_old_logs(&log_dir, keep);
                }
            });
        }
    }

    Ok(())
}

/// Keep the `keep` most recently modified `.log` files in `log_dir`.
pub fn cleanup_old_logs(log_dir: &Path, keep: usize) {
    if let Ok(entries) = fs::read_dir(log_dir) {
        let mut log_files: Vec<_> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .map(|ext| ext == "log")
                    .unwrap_or(false)
            })
            .collect();

        // newest first
        log_files.sort_by_key(|entry| {
            std::cmp::Reverse(
                entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH),
            )
        });

        for old_file in log_files.iter().skip(keep) {
            let _ = fs::remove_file(old_file.path());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_cleanup_keeps_newest_logs() {
        let dir = tempdir().unwrap();
        for day in 1..=4 {
            let path = dir.path().join(format!("autoscale.2024-01-0{}.log", day));
            fs::write(&path, "{}").unwrap();
            let modified = std::time::SystemTime::UNIX_EPOCH + Duration::from_secs(day * 86400);
            fs::File::options()
                .write(true)
                .open(&path)
                .unwrap()
                .set_modified(modified)
                .unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "keep me").unwrap();

        cleanup_old_logs(dir.path(), 2);

        let mut remaining: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        remaining.sort();
        assert_eq!(
            remaining,
            vec!["autoscale.2024-01-03.log", "autoscale.2024-01-04.log", "notes.txt"]
        );
    }
}
