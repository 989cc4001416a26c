use std::io;
use std::path::Path;

use chrono::Local;
use tracing_appender::rolling;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    prelude::*,
};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Filtering comes from `RUST_LOG`.
///
/// With a `log_dir`, output goes to a timestamp-named file in that directory;
/// otherwise it goes to stderr.
pub fn init_tracing(log_dir: Option<&Path>) -> io::Result<()> {
    match log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir)?;
            let file_name = format!("switchyard-{}.log", Local::now().format("%Y%m%d_%H%M%S"));
            let file_appender = rolling::never(log_dir, &file_name);

            tracing_subscriber::registry()
                .with(
                    fmt::Layer::new()
                        .with_writer(file_appender)
                        .with_ansi(false)
                        .with_span_events(FmtSpan::CLOSE)
                        .with_file(true)
                        .with_line_number(true),
                )
                .with(env_filter())
                .try_init()
                .map_err(io::Error::other)?;

            tracing::debug!(
                target: "switchyard::utils::tracing",
                path = %log_dir.join(&file_name).display(),
                "Tracing initialized with file output"
            );
        }
        None => {
            tracing_subscriber::registry()
                .with(
                    fmt::Layer::default()
                        .with_writer(io::stderr)
                        .with_target(true),
                )
                .with(env_filter())
                .try_init()
                .map_err(io::Error::other)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_logging_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");

        init_tracing(Some(&log_dir)).unwrap();
        tracing::info!(target: "toolkit", "hello from the test");

        assert!(log_dir.is_dir());
        let files: Vec<_> = std::fs::read_dir(&log_dir).unwrap().collect();
        assert_eq!(files.len(), 1);

        assert!(init_tracing(None).is_err());
    }
}
