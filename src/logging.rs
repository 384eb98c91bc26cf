use rolling_file::{BasicRollingFileAppender, RollingConditionBasic};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{
    fmt::time::ChronoLocal, prelude::*, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

use crate::errors::AppError;

const LOG_MAX_BYTES: u64 = 1024 * 1024 * 5;
const LOG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Keeps the log file writer alive, and allows changing the level once settings are loaded.
pub struct LoggingGuard {
    _worker: WorkerGuard,
    level: reload::Handle<LevelFilter, Registry>,
}

impl LoggingGuard {
    pub fn set_level(&self, level: LevelFilter) -> Result<(), AppError> {
        self.level
            .modify(|filter| *filter = level)
            .map_err(|e| AppError::Logging(e.to_string()))
    }
}

/// Logs to stdout and to a size-rotated file, starting at DEBUG.
pub fn init_logging(log_path: &Path) -> Result<LoggingGuard, AppError> {
    let file_appender = BasicRollingFileAppender::new(
        log_path,
        RollingConditionBasic::new().max_size(LOG_MAX_BYTES),
        2,
    )?;
    let (non_blocking, worker) = tracing_appender::non_blocking(file_appender);

    let (level_layer, level) = reload::Layer::new(LevelFilter::DEBUG);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_file(false)
        .with_ansi(false)
        .with_target(true)
        .with_timer(ChronoLocal::new(LOG_TIME_FORMAT.to_owned()))
        .with_line_number(true);
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_timer(ChronoLocal::new(LOG_TIME_FORMAT.to_owned()));

    // btleplug and the bluez bindings are very chatty below info
    let env_filter = EnvFilter::new("trace,btleplug=info,bluez_async=info,dbus=info");

    tracing_subscriber::registry()
        .with(level_layer)
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(|e| AppError::Logging(e.to_string()))?;

    Ok(LoggingGuard {
        _worker: worker,
        level,
    })
}
