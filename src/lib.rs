#![deny(unused_must_use)]

use args::{SubCommands, TopLevelCmd};
use errors::AppError;
use std::path::{Path, PathBuf};
use tokio::fs::create_dir;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::app::App;
use crate::device_memory::{DeviceMemory, TomlDeviceMemory};
use crate::logging::init_logging;
use crate::sensors::SensorType;
use crate::settings::Settings;

#[cfg(not(any(debug_assertions, feature = "portable")))]
use directories::BaseDirs;

pub mod args;
pub mod device_memory;
pub mod errors;
pub mod heart_rate;
pub mod power;
pub mod sensors;
pub mod settings;

mod app;
mod ble;
mod dummy;
mod logging;
mod macros;
mod session;

pub use app::{AppUpdate, Telemetry};

pub async fn run_headless(
    mut arg_config: TopLevelCmd,
    parent_token: CancellationToken,
) -> Result<(), AppError> {
    let working_directory = determine_working_directory().ok_or(AppError::WorkDir)?;
    // Resolve against the launch directory before moving into the working directory
    if let Some(path) = arg_config.config_override.take() {
        arg_config.config_override = Some(std::env::current_dir()?.join(path));
    }
    if !working_directory.exists() {
        create_dir(&working_directory)
            .await
            .map_err(|e| AppError::CreateDir {
                path: working_directory.clone(),
                source: e,
            })?;
    }
    std::env::set_current_dir(&working_directory)?;

    let log_path = exe_sibling("log")?;
    // Tests may already have a global subscriber installed
    let logging = match init_logging(&log_path) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("File logging unavailable: {e}");
            None
        }
    };

    info!("Starting app... v{}", env!("CARGO_PKG_VERSION"));

    let config_path = match &arg_config.config_override {
        Some(path) => path.clone(),
        None => exe_sibling("toml")?,
    };
    let settings = Settings::load(&config_path, arg_config.config_required).map_err(|e| {
        error!("Failed to load config from {}: {e}", config_path.display());
        e
    })?;
    info!("Loaded config from: {}", config_path.display());

    if let Some(guard) = &logging {
        guard.set_level(settings.get_log_level())?;
    }
    if !arg_config.no_save {
        settings.save(&config_path)?;
    }

    if let Some(SubCommands::Forget(forget)) = &arg_config.subcommands {
        return forget_saved_devices(&settings, forget.sensor.as_deref());
    }

    let mut app = App::build(&arg_config, settings, Some(parent_token));
    app.init(&arg_config).await;

    // Since there's no UI to dismiss errors, just close the app
    // if the actors aren't happy
    while !app.cancel_app.is_cancelled() && !app.cancel_actors.is_cancelled() {
        let data = app.app_receivers().await;
        app.app_handlers(data).await;
    }
    info!("Joining...");
    app.join_threads().await;

    info!("Shutting down gracefully...");

    Ok(())
}

fn forget_saved_devices(settings: &Settings, sensor: Option<&str>) -> Result<(), AppError> {
    let sensors: &[SensorType] = match sensor.unwrap_or("all") {
        "hr" | "heart_rate" => &[SensorType::HeartRate],
        "power" => &[SensorType::Power],
        "all" => &[SensorType::HeartRate, SensorType::Power],
        other => return Err(AppError::UnknownSensor(other.to_owned())),
    };
    let mut memory = TomlDeviceMemory::new(&settings.ble.saved_devices_path);
    for sensor in sensors {
        memory.clear(*sensor);
        info!("Forgot saved {sensor} device");
    }
    Ok(())
}

/// `<exe name>.<extension>`, relative to the working directory.
fn exe_sibling(extension: &str) -> Result<PathBuf, AppError> {
    let exe_path = std::env::current_exe()?;
    Ok(exe_path
        .with_extension(extension)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new(env!("CARGO_PKG_NAME")).with_extension(extension)))
}

/// Returns the directory that logs, config, and other files should be placed in by default.
// The rules for how it determines the directory is as follows:
// If the app is built with the portable feature, it will just return it's parent directory.
// If there is a config file present adjacent to the executable, the executable's parent path is returned.
// Otherwise, it will return the `directories` `config_dir` output.
//
// Debug builds are always portable. Release builds can optionally have the "portable" feature enabled.
fn determine_working_directory() -> Option<PathBuf> {
    let portable = is_portable();
    let exe_path = std::env::current_exe().ok()?;
    let exe_parent = exe_path.parent()?.to_path_buf();
    let config_path = exe_path.with_extension("toml");

    if portable || config_path.exists() {
        Some(exe_parent)
    } else {
        get_user_dir()
    }
}

#[cfg(any(debug_assertions, feature = "portable"))]
fn is_portable() -> bool {
    true
}

#[cfg(not(any(debug_assertions, feature = "portable")))]
fn is_portable() -> bool {
    false
}

#[cfg(any(debug_assertions, feature = "portable"))]
fn get_user_dir() -> Option<PathBuf> {
    None
}

#[cfg(not(any(debug_assertions, feature = "portable")))]
fn get_user_dir() -> Option<PathBuf> {
    if let Some(base_dirs) = BaseDirs::new() {
        let mut config_dir = base_dirs.config_dir().to_owned();
        config_dir.push(env!("CARGO_PKG_NAME"));
        Some(config_dir)
    } else {
        None
    }
}
