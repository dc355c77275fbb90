use std::fs;
use std::path::Path;

use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::Subscriber;
use tracing_subscriber::EnvFilter;

use crate::errors::{Result, UpdaterError};

const LOG_FILE_PREFIX: &str = "updater.log";

static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Installs the global subscriber. Events always go to a daily rolling file under
/// `log_dir`; `mirror_stderr` additionally copies warnings and errors to stderr.
pub fn init(log_dir: &Path, mirror_stderr: bool) -> Result<()> {
    fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    if LOG_GUARD.set(guard).is_err() {
        return Err(UpdaterError::Config("logging already initialized".to_string()));
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = Subscriber::builder()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    let installed = if mirror_stderr {
        let writer = non_blocking.and(std::io::stderr.with_max_level(tracing::Level::WARN));
        tracing::subscriber::set_global_default(builder.with_writer(writer).finish())
    } else {
        tracing::subscriber::set_global_default(builder.with_writer(non_blocking).finish())
    };
    installed.map_err(|err| UpdaterError::Config(err.to_string()))?;

    tracing::info!("logging initialized dir={}", log_dir.display());
    Ok(())
}
