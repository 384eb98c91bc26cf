use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, error, info};

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;

use crate::errors::AppError;
use crate::sensors::SensorType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedDeviceRecord {
    pub identifier: String,
    pub name: Option<String>,
    pub last_connected_at: DateTime<Utc>,
}

/// Remembers the last device connected for each sensor type, so a later
/// session can reconnect to it without the user picking it again.
pub trait DeviceMemory {
    fn save(&mut self, sensor: SensorType, device_id: &str, device_name: Option<&str>);
    fn last_device(&self, sensor: SensorType) -> Option<SavedDeviceRecord>;
    fn clear(&mut self, sensor: SensorType);
    fn matches(&self, device_id: &str, sensor: SensorType) -> bool {
        self.last_device(sensor)
            .is_some_and(|saved| saved.identifier == device_id)
    }
}

impl<T: DeviceMemory + ?Sized> DeviceMemory for Box<T> {
    fn save(&mut self, sensor: SensorType, device_id: &str, device_name: Option<&str>) {
        (**self).save(sensor, device_id, device_name)
    }
    fn last_device(&self, sensor: SensorType) -> Option<SavedDeviceRecord> {
        (**self).last_device(sensor)
    }
    fn clear(&mut self, sensor: SensorType) {
        (**self).clear(sensor)
    }
}

/// Forgets everything when dropped, for runs that shouldn't touch disk.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDeviceMemory {
    records: HashMap<SensorType, SavedDeviceRecord>,
}

impl InMemoryDeviceMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceMemory for InMemoryDeviceMemory {
    fn save(&mut self, sensor: SensorType, device_id: &str, device_name: Option<&str>) {
        self.records.insert(
            sensor,
            SavedDeviceRecord {
                identifier: device_id.to_owned(),
                name: device_name.map(str::to_owned),
                last_connected_at: Utc::now(),
            },
        );
    }
    fn last_device(&self, sensor: SensorType) -> Option<SavedDeviceRecord> {
        self.records.get(&sensor).cloned()
    }
    fn clear(&mut self, sensor: SensorType) {
        self.records.remove(&sensor);
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SavedDevicesFile {
    #[serde(default)]
    heart_rate: Option<SavedDeviceRecord>,
    #[serde(default)]
    power: Option<SavedDeviceRecord>,
}

impl SavedDevicesFile {
    fn slot(&mut self, sensor: SensorType) -> &mut Option<SavedDeviceRecord> {
        match sensor {
            SensorType::HeartRate => &mut self.heart_rate,
            SensorType::Power => &mut self.power,
        }
    }
}

/// Device memory backed by a TOML file.
///
/// Every call re-reads the file, so the heart rate and power controllers
/// can each hold their own handle to the same path.
#[derive(Debug, Clone)]
pub struct TomlDeviceMemory {
    path: PathBuf,
}

impl TomlDeviceMemory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn backup_path(&self) -> PathBuf {
        let mut backup = self.path.clone().into_os_string();
        backup.push(".bak");
        PathBuf::from(backup)
    }

    fn load(&self) -> Result<SavedDevicesFile, AppError> {
        if !self.path.exists() {
            return Ok(SavedDevicesFile::default());
        }
        let mut file = File::open(&self.path)?;
        let mut buffer = String::new();
        file.read_to_string(&mut buffer)?;
        Ok(toml::from_str(&buffer)?)
    }

    fn store(&self, saved: &SavedDevicesFile) -> Result<(), AppError> {
        let buffer = toml::to_string(saved)?;
        let mut file = File::create(&self.path).map_err(|e| AppError::CreateFile {
            path: self.path.clone(),
            source: e,
        })?;
        file.write_all(buffer.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    fn update(
        &self,
        sensor: SensorType,
        record: Option<SavedDeviceRecord>,
    ) -> Result<(), AppError> {
        // A corrupt file shouldn't stop us remembering the new device
        let mut saved = match self.load() {
            Ok(saved) => saved,
            Err(e) => {
                let backup = self.backup_path();
                error!(
                    "Unreadable saved devices file ({e}), moving it to {}",
                    backup.display()
                );
                std::fs::rename(&self.path, &backup)?;
                SavedDevicesFile::default()
            }
        };
        *saved.slot(sensor) = record;
        self.store(&saved)
    }
}

impl DeviceMemory for TomlDeviceMemory {
    fn save(&mut self, sensor: SensorType, device_id: &str, device_name: Option<&str>) {
        let record = SavedDeviceRecord {
            identifier: device_id.to_owned(),
            name: device_name.map(str::to_owned),
            last_connected_at: Utc::now(),
        };
        match self.update(sensor, Some(record)) {
            Ok(()) => info!("Remembering {sensor} device {device_id}"),
            Err(e) => error!("Failed to save {sensor} device: {e}"),
        }
    }
    fn last_device(&self, sensor: SensorType) -> Option<SavedDeviceRecord> {
        match self.load() {
            Ok(mut saved) => saved.slot(sensor).take(),
            Err(e) => {
                error!("Failed to read saved devices: {e}");
                None
            }
        }
    }
    fn clear(&mut self, sensor: SensorType) {
        match self.update(sensor, None) {
            Ok(()) => debug!("Forgot saved {sensor} device"),
            Err(e) => error!("Failed to clear saved {sensor} device: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_matches_saved_identifier() {
        let mut memory = InMemoryDeviceMemory::new();
        assert!(!memory.matches("AA", SensorType::HeartRate));

        memory.save(SensorType::HeartRate, "AA", Some("Strap"));
        assert!(memory.matches("AA", SensorType::HeartRate));
        assert!(!memory.matches("AA", SensorType::Power));
        assert!(!memory.matches("BB", SensorType::HeartRate));

        memory.clear(SensorType::HeartRate);
        assert!(memory.last_device(SensorType::HeartRate).is_none());
    }

    #[test]
    fn toml_handles_share_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved_devices.toml");
        let mut hr = TomlDeviceMemory::new(&path);
        let mut power = TomlDeviceMemory::new(&path);

        hr.save(SensorType::HeartRate, "hr-1", Some("Chest Strap"));
        power.save(SensorType::Power, "pm-1", None);

        let saved_hr = hr.last_device(SensorType::HeartRate).unwrap();
        assert_eq!(saved_hr.identifier, "hr-1");
        assert_eq!(saved_hr.name.as_deref(), Some("Chest Strap"));
        assert!(power.matches("pm-1", SensorType::Power));
        assert!(hr.matches("pm-1", SensorType::Power));

        power.clear(SensorType::Power);
        assert!(hr.last_device(SensorType::Power).is_none());
        assert!(hr.matches("hr-1", SensorType::HeartRate));
    }

    #[test]
    fn boxed_memory_forwards() {
        let mut memory: Box<dyn DeviceMemory> = Box::new(InMemoryDeviceMemory::new());
        memory.save(SensorType::Power, "pm-1", None);
        assert!(memory.matches("pm-1", SensorType::Power));
        memory.clear(SensorType::Power);
        assert!(memory.last_device(SensorType::Power).is_none());
    }

    #[test]
    fn unreadable_file_is_kept_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved_devices.toml");
        let garbage = "[power\nidentifier = \"pm-1\"\n";
        std::fs::write(&path, garbage).unwrap();

        let mut memory = TomlDeviceMemory::new(&path);
        assert!(memory.last_device(SensorType::Power).is_none());
        memory.save(SensorType::HeartRate, "hr-1", None);

        assert!(memory.matches("hr-1", SensorType::HeartRate));
        let backup = dir.path().join("saved_devices.toml.bak");
        assert_eq!(std::fs::read_to_string(backup).unwrap(), garbage);
    }

    #[test]
    fn toml_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let memory = TomlDeviceMemory::new(dir.path().join("nope.toml"));
        assert!(memory.last_device(SensorType::HeartRate).is_none());
    }
}
