use std::path::PathBuf;

use thiserror::Error;

/// Represents all possible errors that can occur during the app's lifecycle
///
/// Sensor and protocol failures never show up here, controllers report
/// those through their status string instead.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Failed to create directory \"{path}\": {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to create file \"{path}\": {source}")]
    CreateFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Error parsing config: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Bluetooth Error: {0}")]
    Bt(#[from] btleplug::Error),
    #[error("TOML Serialization Error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("TOML Deserialization Error: {0}")]
    TomlDe(#[from] toml::de::Error),
    #[error("CSV Error: {0}")]
    Csv(#[from] csv_async::Error),
    #[error("Logging setup error: {0}")]
    Logging(String),
    // My errors
    #[error("Failed to get working directory")]
    WorkDir,
    #[error("No Bluetooth adapters found")]
    NoAdapter,
    #[error("Unknown sensor type: \"{0}\"")]
    UnknownSensor(String),
}
