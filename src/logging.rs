use directories::ProjectDirs;
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming};

use crate::config::LoggingConfig;
use crate::error::MendError;

const LOG_FILE_SIZE: u64 = 5 * 1024 * 1024;
const LOG_FILES_KEPT: usize = 10;

/// Log spec for our own crate at the configured level, everything else at warn.
pub fn log_spec(config: &LoggingConfig) -> String {
    format!("warn, schemamend={}", config.schemamend)
}

/// Start the logger. `RUST_LOG`, when set, replaces the configured spec.
///
/// Records go to rotating files under the per-user data directory, with
/// warnings and errors duplicated to stderr. The returned handle must stay
/// alive for as long as logging is wanted.
pub fn init(config: &LoggingConfig) -> Result<LoggerHandle, MendError> {
    let mut logger = Logger::try_with_env_or_str(log_spec(config))
        .map_err(|e| MendError::Error(format!("Invalid log specification: {}", e)))?;

    if let Some(dirs) = ProjectDirs::from("", "", "schemamend") {
        let log_dir = dirs.data_local_dir().join("logs");
        logger = logger
            .log_to_file(FileSpec::default().directory(log_dir).basename("schemamend"))
            .rotate(
                Criterion::Size(LOG_FILE_SIZE),
                Naming::Timestamps,
                Cleanup::KeepLogFiles(LOG_FILES_KEPT),
            )
            .format_for_files(flexi_logger::detailed_format)
            .duplicate_to_stderr(Duplicate::Warn);
    }

    logger
        .start()
        .map_err(|e| MendError::Error(format!("Failed to start logger: {}", e)))
}
