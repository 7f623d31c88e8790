use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use tracing::{Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, time::FormatTime, MakeWriter},
    prelude::*,
    EnvFilter,
};

/// Appends log lines to `log_file`. Keep the guard alive until exit.
pub fn setup_logging(log_file: &Path, verbose: bool) -> Result<WorkerGuard, io::Error> {
    if let Some(parent) = log_file.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file_appender = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    install(subscriber(non_blocking, verbose));
    Ok(guard)
}

/// Used when the log file can't be opened.
pub fn setup_stderr_logging(verbose: bool) -> WorkerGuard {
    let (non_blocking, guard) = tracing_appender::non_blocking(io::stderr());
    install(subscriber(non_blocking, verbose));
    guard
}

fn install<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    // A subscriber may already be installed (tests); keep that one.
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn subscriber<W>(writer: W, verbose: bool) -> impl Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_timer(ChronoLocalTimer)
        .with_filter(env_filter(verbose));

    tracing_subscriber::registry().with(file_layer)
}

pub fn env_filter(verbose: bool) -> EnvFilter {
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };
    EnvFilter::new(format!(
        "wakatime_cli={},warn",
        log_level.as_str().to_lowercase()
    ))
}

struct ChronoLocalTimer;

impl FormatTime for ChronoLocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = chrono::Local::now();
        write!(w, "{}", now.format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn capture(verbose: bool) -> String {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("logs/.wakatime.log");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let file = OpenOptions::new().create(true).append(true).open(&path).unwrap();

        let (writer, guard) = tracing_appender::non_blocking(file);
        tracing::subscriber::with_default(subscriber(writer, verbose), || {
            tracing::info!(operation = "test", "info line");
            tracing::debug!("debug line");
        });
        drop(guard);

        std::fs::read_to_string(&path).unwrap()
    }

    #[test]
    fn test_info_is_written_without_ansi() {
        let contents = capture(false);
        assert!(contents.contains("info line"));
        assert!(contents.contains("operation=\"test\""));
        assert!(!contents.contains("debug line"));
        assert!(!contents.contains('\u{1b}'));
    }

    #[test]
    fn test_verbose_writes_debug() {
        assert!(capture(true).contains("debug line"));
    }

    #[test]
    fn test_setup_logging_creates_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/.wakatime.log");
        let _guard = setup_logging(&path, false).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_setup_logging_fails_on_unusable_path() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        assert!(setup_logging(&blocker.join(".wakatime.log"), false).is_err());
    }
}
