use config::{Config, File as ConfigFile};
use serde_derive::{Deserialize, Serialize};
use tracing_subscriber::filter::LevelFilter;

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::AppError;
use crate::sensors::AutoConnectPolicy;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct BleSettings {
    /// Reconnect to the last heart rate monitor when it shows up in a scan
    pub auto_connect: bool,
    pub auto_connect_policy: AutoConnectPolicy,
    /// With no device picked, take the first one advertising the right service
    pub connect_first_found: bool,
    /// Go back to scanning when an established link drops
    pub rescan_after_dropout: bool,
    pub connect_timeout_sec: u16,
    pub cadence_timeout_ms: u32,
    pub cadence_check_interval_ms: u32,
    pub saved_devices_path: String,
}

impl BleSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_sec as u64)
    }
    pub fn cadence_timeout(&self) -> Duration {
        Duration::from_millis(self.cadence_timeout_ms as u64)
    }
    pub fn cadence_check_interval(&self) -> Duration {
        // tokio's interval panics on zero
        Duration::from_millis(self.cadence_check_interval_ms.max(1) as u64)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct MiscSettings {
    log_level: String,
    pub report_interval_ms: u32,
    pub log_sessions_to_csv: bool,
    pub log_sessions_csv_path: String,
}

impl MiscSettings {
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms.max(1) as u64)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct DummySettings {
    pub low_bpm: u16,
    pub high_bpm: u16,
    pub bpm_speed: f32,
    pub low_watts: u16,
    pub high_watts: u16,
    pub cadence_rpm: u16,
    pub loops_before_dc: u16,
}

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct Settings {
    pub ble: BleSettings,
    pub misc: MiscSettings,
    pub dummy: DummySettings,
}

impl Settings {
    pub fn load(config_path: &Path, required: bool) -> Result<Self, AppError> {
        let default_log_level = if cfg!(debug_assertions) {
            "debug"
        } else {
            "info"
        };

        let s = Config::builder()
            .add_source(ConfigFile::from(config_path).required(required))
            .set_default("ble.auto_connect", true)?
            .set_default("ble.auto_connect_policy", "session")?
            .set_default("ble.connect_first_found", true)?
            .set_default("ble.rescan_after_dropout", false)?
            .set_default("ble.connect_timeout_sec", 10)?
            .set_default("ble.cadence_timeout_ms", 3000)?
            .set_default("ble.cadence_check_interval_ms", 250)?
            .set_default("ble.saved_devices_path", "saved_devices.toml")?
            .set_default("misc.log_level", default_log_level)?
            .set_default("misc.report_interval_ms", 1000)?
            .set_default("misc.log_sessions_to_csv", false)?
            .set_default("misc.log_sessions_csv_path", "session_logs")?
            .set_default("dummy.low_bpm", 50)?
            .set_default("dummy.high_bpm", 120)?
            .set_default("dummy.bpm_speed", 1.5)?
            .set_default("dummy.low_watts", 120)?
            .set_default("dummy.high_watts", 320)?
            .set_default("dummy.cadence_rpm", 90)?
            .set_default("dummy.loops_before_dc", 2)?
            .build()?;

        Ok(s.try_deserialize()?)
    }
    pub fn save(&self, config_path: &Path) -> Result<(), AppError> {
        let toml_string = toml::to_string(self)?;

        let mut file = File::create(config_path).map_err(|e| AppError::CreateFile {
            path: PathBuf::from(config_path),
            source: e,
        })?;
        file.write_all(toml_string.as_bytes())?;
        file.sync_all()?;

        Ok(())
    }
    pub fn get_log_level(&self) -> LevelFilter {
        match self.misc.log_level.to_lowercase().as_str() {
            "off" => LevelFilter::OFF,
            "error" => LevelFilter::ERROR,
            "warn" => LevelFilter::WARN,
            "info" => LevelFilter::INFO,
            "debug" => LevelFilter::DEBUG,
            "trace" => LevelFilter::TRACE,
            _ => LevelFilter::INFO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("missing.toml"), false).unwrap();
        assert!(settings.ble.auto_connect);
        assert!(!settings.ble.rescan_after_dropout);
        assert_eq!(settings.ble.auto_connect_policy, AutoConnectPolicy::Session);
        assert_eq!(settings.ble.cadence_timeout(), Duration::from_secs(3));
        assert_eq!(
            settings.ble.cadence_check_interval(),
            Duration::from_millis(250)
        );
        assert_eq!(settings.dummy.high_bpm, 120);
    }

    #[test]
    fn file_overrides_defaults_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("misfit.toml");
        std::fs::write(
            &path,
            "[ble]\nauto_connect_policy = \"per_scan\"\ncadence_timeout_ms = 5000\n",
        )
        .unwrap();

        let settings = Settings::load(&path, true).unwrap();
        assert_eq!(settings.ble.auto_connect_policy, AutoConnectPolicy::PerScan);
        assert_eq!(settings.ble.cadence_timeout(), Duration::from_secs(5));
        assert!(settings.ble.connect_first_found);

        settings.save(&path).unwrap();
        let reloaded = Settings::load(&path, true).unwrap();
        assert_eq!(reloaded.ble.auto_connect_policy, AutoConnectPolicy::PerScan);
        assert_eq!(reloaded.ble.cadence_timeout_ms, 5000);
    }

    #[test]
    fn required_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(&dir.path().join("missing.toml"), true).is_err());
    }
}
