use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

const MAX_LOG_SIZE: u64 = 1024 * 1024; // 1MB

/// Initialize logging for a component.
///
/// Console output always goes to stderr so script results printed on stdout
/// stay clean. When `config.file` is set a second, non-blocking layer writes
/// `{component_name}.log` in the configured (or platform default) directory.
///
/// `RUST_LOG` overrides `default_level`. Returns a guard that must be kept
/// alive for the duration of the program when file logging is on.
pub fn init_logging(
    component_name: &str,
    config: &LoggingConfig,
    default_level: &str,
) -> io::Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if !config.file {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(io::stderr)
            .init();
        return Ok(None);
    }

    let log_dir = match &config.dir {
        Some(dir) => dir.clone(),
        None => default_log_directory()?,
    };
    fs::create_dir_all(&log_dir)?;

    let log_path = log_dir.join(format!("{}.log", component_name));
    truncate_if_needed(&log_path)?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let (non_blocking_file, guard) = tracing_appender::non_blocking(BufWriter::new(file));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(io::stderr).with_ansi(true))
        .with(
            fmt::layer()
                .with_writer(non_blocking_file)
                .with_ansi(false)
                .with_target(true),
        )
        .init();

    tracing::info!("Logging to file: {}", log_path.display());

    Ok(Some(guard))
}

fn default_log_directory() -> io::Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("", "", "ethscript").ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "Failed to find home directory")
    })?;

    Ok(proj_dirs.data_dir().join("logs"))
}

/// Start over once a log file grows past MAX_LOG_SIZE.
fn truncate_if_needed(log_path: &Path) -> io::Result<()> {
    if log_path.exists() && fs::metadata(log_path)?.len() > MAX_LOG_SIZE {
        File::create(log_path)?;
    }
    Ok(())
}
