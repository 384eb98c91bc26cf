pub mod measurement;

use std::time::Instant;

use tracing::trace;
use uuid::Uuid;

use crate::device_memory::DeviceMemory;
use crate::sensors::{sig_uuid, Radio, SensorController, SensorProfile, SensorType};

use measurement::parse_hrm;

pub const HEART_RATE_SERVICE_UUID: Uuid = sig_uuid(0x180D);
pub const HEART_RATE_MEASUREMENT_CHARACTERISTIC_UUID: Uuid = sig_uuid(0x2A37);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartRateSample {
    /// 0 when unavailable
    pub bpm: u16,
}

#[derive(Debug, Default)]
pub struct HeartRateProfile {
    bpm: u16,
}

impl SensorProfile for HeartRateProfile {
    const SENSOR_TYPE: SensorType = SensorType::HeartRate;
    const SERVICE_UUID: Uuid = HEART_RATE_SERVICE_UUID;
    const MEASUREMENT_UUID: Uuid = HEART_RATE_MEASUREMENT_CHARACTERISTIC_UUID;
    const SUPPORTS_AUTO_CONNECT: bool = true;
    const SCANNING_STATUS: &'static str = "Scanning for devices...";
    const STREAMING_STATUS: &'static str = "Receiving heart rate data";

    fn on_measurement(&mut self, payload: &[u8], _received_at: Instant) {
        match parse_hrm(payload) {
            Some(measurement) => self.bpm = measurement.bpm,
            // Keep showing the last good value
            None => trace!("Ignoring malformed HR payload: {:02x?}", payload),
        }
    }

    fn reset(&mut self) {
        self.bpm = 0;
    }
}

pub type HeartRateMonitor<R, M> = SensorController<HeartRateProfile, R, M>;

impl<R: Radio, M: DeviceMemory> SensorController<HeartRateProfile, R, M> {
    pub fn heart_rate(radio: R, memory: M) -> Self {
        Self::new(HeartRateProfile::default(), radio, memory)
    }

    pub fn bpm(&self) -> u16 {
        self.profile().bpm
    }

    pub fn sample(&self) -> HeartRateSample {
        HeartRateSample { bpm: self.bpm() }
    }
}
