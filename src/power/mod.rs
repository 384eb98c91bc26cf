pub mod cadence;
pub mod measurement;
pub mod rolling;

use std::time::{Duration, Instant};

use tracing::debug;
use uuid::Uuid;

use crate::device_memory::DeviceMemory;
use crate::sensors::{sig_uuid, Radio, SensorController, SensorProfile, SensorType};

use cadence::CrankCounterState;
use measurement::parse_cycling_power;
use rolling::RollingPowerWindow;

pub const CYCLING_POWER_SERVICE_UUID: Uuid = sig_uuid(0x1818);
pub const CYCLING_POWER_MEASUREMENT_CHARACTERISTIC_UUID: Uuid = sig_uuid(0x2A63);

pub const DEFAULT_CADENCE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PowerSample {
    pub instantaneous_watts: u16,
    pub three_second_average_watts: f64,
    /// 0 when the cranks are still or cadence timed out
    pub cadence_rpm: f64,
}

#[derive(Debug)]
pub struct PowerProfile {
    instantaneous_watts: Option<u16>,
    window: RollingPowerWindow,
    crank: CrankCounterState,
    cadence_rpm: f64,
    last_cadence_at: Option<Instant>,
    cadence_timeout: Duration,
}

impl Default for PowerProfile {
    fn default() -> Self {
        Self::new(DEFAULT_CADENCE_TIMEOUT)
    }
}

impl PowerProfile {
    pub fn new(cadence_timeout: Duration) -> Self {
        Self {
            instantaneous_watts: None,
            window: RollingPowerWindow::new(),
            crank: CrankCounterState::new(),
            cadence_rpm: 0.0,
            last_cadence_at: None,
            cadence_timeout,
        }
    }

    pub fn crank_state(&self) -> &CrankCounterState {
        &self.crank
    }

    pub fn window(&self) -> &RollingPowerWindow {
        &self.window
    }

    /// Zeroes cadence once no cadence value has been accepted for longer
    /// than the timeout, so a stopped rider doesn't stay frozen at 90 RPM.
    fn expire_cadence(&mut self, now: Instant) {
        let Some(last) = self.last_cadence_at else {
            return;
        };
        if now.saturating_duration_since(last) > self.cadence_timeout {
            debug!("No crank data for {:?}, zeroing cadence", self.cadence_timeout);
            self.cadence_rpm = 0.0;
            self.last_cadence_at = None;
            self.crank.reset();
        }
    }
}

impl SensorProfile for PowerProfile {
    const SENSOR_TYPE: SensorType = SensorType::Power;
    const SERVICE_UUID: Uuid = CYCLING_POWER_SERVICE_UUID;
    const MEASUREMENT_UUID: Uuid = CYCLING_POWER_MEASUREMENT_CHARACTERISTIC_UUID;
    const SUPPORTS_AUTO_CONNECT: bool = false;
    const SCANNING_STATUS: &'static str = "Scanning for power meters...";
    const STREAMING_STATUS: &'static str = "Receiving power data";

    fn on_measurement(&mut self, payload: &[u8], received_at: Instant) {
        let measurement = parse_cycling_power(payload);
        self.instantaneous_watts = Some(measurement.instantaneous_watts);
        self.window.push(measurement.instantaneous_watts);

        if let Some(crank) = measurement.crank {
            // Out of range values keep the last accepted cadence
            if let Some(rpm) = self.crank.update(crank) {
                self.cadence_rpm = rpm;
                self.last_cadence_at = Some(received_at);
            } else if self.last_cadence_at.is_none() {
                // A lone priming sample still expires, so its counters
                // can't go stale across an event time wrap
                self.last_cadence_at = Some(received_at);
            }
        }
    }

    fn on_tick(&mut self, now: Instant) {
        self.expire_cadence(now);
    }

    fn reset(&mut self) {
        self.instantaneous_watts = None;
        self.window.clear();
        self.crank.reset();
        self.cadence_rpm = 0.0;
        self.last_cadence_at = None;
    }
}

pub type PowerMonitor<R, M> = SensorController<PowerProfile, R, M>;

impl<R: Radio, M: DeviceMemory> SensorController<PowerProfile, R, M> {
    pub fn power(radio: R, memory: M, cadence_timeout: Duration) -> Self {
        Self::new(PowerProfile::new(cadence_timeout), radio, memory)
    }

    /// `None` until the first measurement, and again after a disconnect
    pub fn instantaneous_watts(&self) -> Option<u16> {
        self.profile().instantaneous_watts
    }

    pub fn three_second_average(&self) -> Option<f64> {
        self.profile().window.average()
    }

    pub fn cadence_rpm(&self) -> f64 {
        self.profile().cadence_rpm
    }

    pub fn check_cadence_timeout(&mut self, now: Instant) {
        self.tick(now);
    }

    pub fn sample(&self) -> PowerSample {
        PowerSample {
            instantaneous_watts: self.instantaneous_watts().unwrap_or(0),
            three_second_average_watts: self.three_second_average().unwrap_or(0.0),
            cadence_rpm: self.cadence_rpm(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crank_payload(watts: i16, revs: u16, time: u16) -> Vec<u8> {
        let mut data = vec![0x20, 0x00];
        data.extend_from_slice(&watts.to_le_bytes());
        data.extend_from_slice(&revs.to_le_bytes());
        data.extend_from_slice(&time.to_le_bytes());
        data
    }

    #[test]
    fn short_payload_counts_as_zero_watts() {
        let mut profile = PowerProfile::default();
        let now = Instant::now();
        profile.on_measurement(&[0x00, 0x00, 0xC8, 0x00], now);
        profile.on_measurement(&[0x00], now);
        assert_eq!(profile.instantaneous_watts, Some(0));
        assert_eq!(profile.window.average(), Some(100.0));
    }

    #[test]
    fn cadence_from_consecutive_crank_samples() {
        let mut profile = PowerProfile::default();
        let start = Instant::now();
        profile.on_measurement(&crank_payload(200, 10, 0), start);
        assert_eq!(profile.cadence_rpm, 0.0);
        profile.on_measurement(
            &crank_payload(210, 13, 2048),
            start + Duration::from_millis(250),
        );
        assert!((profile.cadence_rpm - 90.0).abs() < 1e-9);
    }

    #[test]
    fn implausible_cadence_keeps_last_value() {
        let mut profile = PowerProfile::default();
        let start = Instant::now();
        profile.on_measurement(&crank_payload(200, 65530, 0), start);
        profile.on_measurement(&crank_payload(200, 65532, 1024), start);
        assert!((profile.cadence_rpm - 120.0).abs() < 1e-9);

        profile.on_measurement(&crank_payload(200, 65532u16.wrapping_add(6), 1124), start);
        assert!((profile.cadence_rpm - 120.0).abs() < 1e-9);
        assert_eq!(profile.crank.last_cumulative_revolutions(), Some(2));
    }

    #[test]
    fn cadence_times_out() {
        let mut profile = PowerProfile::default();
        let start = Instant::now();
        profile.on_measurement(&crank_payload(200, 1, 0), start);
        profile.on_measurement(&crank_payload(200, 2, 1024), start);
        assert!((profile.cadence_rpm - 60.0).abs() < 1e-9);

        profile.on_tick(start + Duration::from_secs(3));
        assert!((profile.cadence_rpm - 60.0).abs() < 1e-9);

        profile.on_tick(start + Duration::from_millis(3001));
        assert_eq!(profile.cadence_rpm, 0.0);
        assert_eq!(*profile.crank_state(), CrankCounterState::new());
    }

    #[test]
    fn lone_priming_sample_expires() {
        let mut profile = PowerProfile::default();
        let start = Instant::now();
        profile.on_measurement(&crank_payload(200, 10, 0), start);
        assert_eq!(profile.crank.last_cumulative_revolutions(), Some(10));

        profile.on_tick(start + Duration::from_millis(3001));
        assert_eq!(profile.cadence_rpm, 0.0);
        assert_eq!(*profile.crank_state(), CrankCounterState::new());

        // Counters from a minute later prime afresh instead of spanning the gap
        let later = start + Duration::from_secs(70);
        profile.on_measurement(&crank_payload(200, 80, 4096), later);
        assert_eq!(profile.cadence_rpm, 0.0);
        profile.on_measurement(
            &crank_payload(200, 81, 5120),
            later + Duration::from_secs(1),
        );
        assert!((profile.cadence_rpm - 60.0).abs() < 1e-9);
    }
}
