use crate::heart_rate::{HEART_RATE_MEASUREMENT_CHARACTERISTIC_UUID, HEART_RATE_SERVICE_UUID};
use crate::power::{CYCLING_POWER_MEASUREMENT_CHARACTERISTIC_UUID, CYCLING_POWER_SERVICE_UUID};
use crate::sensors::{DiscoveredDevice, RadioCommand, RadioEvent, RadioState, SensorType};
use crate::settings::DummySettings;

use rand::Rng;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const POWER_UPDATE_PERIOD: Duration = Duration::from_millis(250);
const MIN_UPDATE_PERIOD: Duration = Duration::from_millis(1);
const WATTS_STEP: u16 = 5;
const WATTS_JITTER: i16 = 8;

/// Walks a value up and down between two bounds, one step per tick.
struct Oscillator {
    value: u16,
    low: u16,
    high: u16,
    step: u16,
    rising: bool,
    bounces: u16,
}

impl Oscillator {
    fn new(low: u16, high: u16, step: u16) -> Self {
        let (low, high) = (low.min(high), low.max(high));
        Self {
            value: low,
            low,
            high,
            step: step.max(1),
            rising: true,
            bounces: 0,
        }
    }

    /// Returns true when a bound was hit on this step
    fn advance(&mut self) -> bool {
        let bound = if self.rising {
            self.value = self.value.saturating_add(self.step).min(self.high);
            self.high
        } else {
            self.value = self.value.saturating_sub(self.step).max(self.low);
            self.low
        };
        if self.value == bound {
            self.rising = !self.rising;
            self.bounces += 1;
            true
        } else {
            false
        }
    }
}

/// Fake crank counters for a rider spinning at a steady cadence.
struct CrankSimulator {
    rpm: f64,
    elapsed_secs: f64,
}

impl CrankSimulator {
    fn advance(&mut self, dt: Duration) -> (u16, u16) {
        self.elapsed_secs += dt.as_secs_f64();
        if self.rpm <= 0.0 {
            return (0, 0);
        }
        let completed = (self.elapsed_secs * self.rpm / 60.0).floor();
        let last_event_secs = completed * 60.0 / self.rpm;
        // Both counters wrap at u16 like real hardware
        (
            (completed as u64) as u16,
            ((last_event_secs * 1024.0) as u64) as u16,
        )
    }
}

pub(crate) fn encode_hrm(bpm: u16) -> Vec<u8> {
    match u8::try_from(bpm) {
        Ok(bpm) => vec![0x00, bpm],
        Err(_) => {
            let [low, high] = bpm.to_le_bytes();
            vec![0x01, low, high]
        }
    }
}

pub(crate) fn encode_cycling_power(watts: i16, revolutions: u16, event_time: u16) -> Vec<u8> {
    let mut data = Vec::with_capacity(8);
    // Crank revolution data present
    data.extend_from_slice(&0x0020u16.to_le_bytes());
    data.extend_from_slice(&watts.to_le_bytes());
    data.extend_from_slice(&revolutions.to_le_bytes());
    data.extend_from_slice(&event_time.to_le_bytes());
    data
}

/// A pretend peripheral that answers radio commands and streams
/// synthetic measurements, for trying things out without hardware.
struct DummyRadioActor {
    sensor: SensorType,
    device: DiscoveredDevice,
    service: Uuid,
    measurement: Uuid,
    events_tx: UnboundedSender<RadioEvent>,
    loops_before_dc: u16,
    connected: bool,
    streaming: bool,
    oscillator: Oscillator,
    crank: CrankSimulator,
}

impl DummyRadioActor {
    fn new(
        sensor: SensorType,
        settings: &DummySettings,
        events_tx: UnboundedSender<RadioEvent>,
    ) -> Self {
        let (device, service, measurement, oscillator) = match sensor {
            SensorType::HeartRate => (
                DiscoveredDevice::new("dummy-hrm", Some("Dummy HRM".into())),
                HEART_RATE_SERVICE_UUID,
                HEART_RATE_MEASUREMENT_CHARACTERISTIC_UUID,
                Oscillator::new(settings.low_bpm, settings.high_bpm, 1),
            ),
            SensorType::Power => (
                DiscoveredDevice::new("dummy-power", Some("Dummy Power Meter".into())),
                CYCLING_POWER_SERVICE_UUID,
                CYCLING_POWER_MEASUREMENT_CHARACTERISTIC_UUID,
                Oscillator::new(settings.low_watts, settings.high_watts, WATTS_STEP),
            ),
        };
        Self {
            sensor,
            device,
            service,
            measurement,
            events_tx,
            loops_before_dc: settings.loops_before_dc,
            connected: false,
            streaming: false,
            oscillator,
            crank: CrankSimulator {
                rpm: f64::from(settings.cadence_rpm),
                elapsed_secs: 0.0,
            },
        }
    }

    fn emit(&self, event: RadioEvent) {
        if self.events_tx.send(event).is_err() {
            debug!("Controller went away, dropping dummy event");
        }
    }

    fn handle_command(&mut self, command: RadioCommand) {
        match command {
            RadioCommand::StartScan { services } => {
                if services.is_empty() || services.contains(&self.service) {
                    self.emit(RadioEvent::Discovered(self.device.clone()));
                }
            }
            RadioCommand::StopScan => {}
            RadioCommand::Connect { device_id } => {
                if device_id == self.device.id {
                    self.connected = true;
                    self.emit(RadioEvent::Connected { device_id });
                } else {
                    self.emit(RadioEvent::ConnectFailed {
                        device_id,
                        reason: Some("Device not found".into()),
                    });
                }
            }
            RadioCommand::CancelConnection { device_id } => {
                if device_id == self.device.id && self.connected {
                    self.connected = false;
                    self.streaming = false;
                    self.emit(RadioEvent::Disconnected {
                        device_id,
                        reason: None,
                    });
                }
            }
            RadioCommand::DiscoverServices { device_id, .. } => {
                self.emit(RadioEvent::ServicesDiscovered {
                    device_id,
                    result: Ok(vec![self.service]),
                });
            }
            RadioCommand::DiscoverCharacteristics {
                device_id, service, ..
            } => {
                let result = if service == self.service {
                    Ok(vec![self.measurement])
                } else {
                    Err("Service not found".into())
                };
                self.emit(RadioEvent::CharacteristicsDiscovered {
                    device_id,
                    service,
                    result,
                });
            }
            RadioCommand::Subscribe { characteristic, .. } => {
                self.streaming = self.connected && characteristic == self.measurement;
            }
        }
    }

    fn tick(&mut self, period: Duration) {
        let bounced = self.oscillator.advance();
        let value = match self.sensor {
            SensorType::HeartRate => encode_hrm(self.oscillator.value),
            SensorType::Power => {
                let jitter = rand::thread_rng().gen_range(-WATTS_JITTER..=WATTS_JITTER);
                let watts = i16::try_from(self.oscillator.value)
                    .unwrap_or(i16::MAX)
                    .saturating_add(jitter);
                let (revolutions, event_time) = self.crank.advance(period);
                encode_cycling_power(watts, revolutions, event_time)
            }
        };

        if bounced
            && self.loops_before_dc != 0
            && self.oscillator.bounces >= self.loops_before_dc
        {
            self.oscillator.bounces = 0;
            warn!("Dummy {}: simulating lost connection", self.sensor);
            self.connected = false;
            self.streaming = false;
            self.emit(RadioEvent::Disconnected {
                device_id: self.device.id.clone(),
                reason: Some("Simulating lost connection".into()),
            });
            return;
        }

        self.emit(RadioEvent::ValueUpdated {
            device_id: self.device.id.clone(),
            characteristic: self.measurement,
            value,
        });
    }
}

/// `bpm_speed` updates per second, never faster than one per millisecond.
fn heart_rate_period(bpm_speed: f32) -> Duration {
    // tokio's interval panics on zero
    Duration::from_secs_f32(1.0 / bpm_speed.max(f32::EPSILON)).max(MIN_UPDATE_PERIOD)
}

pub async fn dummy_radio_thread(
    sensor: SensorType,
    mut commands: UnboundedReceiver<RadioCommand>,
    events_tx: UnboundedSender<RadioEvent>,
    dummy_settings: DummySettings,
    cancel_token: CancellationToken,
) {
    let period = match sensor {
        SensorType::HeartRate => heart_rate_period(dummy_settings.bpm_speed),
        SensorType::Power => POWER_UPDATE_PERIOD,
    };
    let mut update_interval = time::interval(period);
    let mut actor = DummyRadioActor::new(sensor, &dummy_settings, events_tx);

    actor.emit(RadioEvent::StateChanged(RadioState::PoweredOn));
    info!("Dummy {} radio started!", sensor);

    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(command) => actor.handle_command(command),
                    None => break,
                }
            }
            _ = update_interval.tick() => {
                if actor.streaming {
                    actor.tick(period);
                }
            }
            _ = cancel_token.cancelled() => {
                info!("Shutting down Dummy {} thread!", sensor);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heart_rate::measurement::parse_hrm;
    use crate::power::cadence::cadence_between;
    use crate::power::cadence::CrankRevolutions;

    #[test]
    fn heart_rate_period_is_never_zero() {
        assert_eq!(heart_rate_period(2.0), Duration::from_millis(500));
        assert_eq!(heart_rate_period(f32::INFINITY), MIN_UPDATE_PERIOD);
        assert_eq!(heart_rate_period(1.0e9), MIN_UPDATE_PERIOD);
        assert!(heart_rate_period(0.0) > Duration::from_secs(1));
    }

    #[test]
    fn hrm_switches_to_u16_above_255() {
        assert_eq!(encode_hrm(75), vec![0x00, 75]);
        assert_eq!(encode_hrm(300), vec![0x01, 0x2C, 0x01]);
        assert_eq!(parse_hrm(&encode_hrm(300)).map(|m| m.bpm), Some(300));
    }

    #[test]
    fn oscillator_bounces_between_bounds() {
        let mut oscillator = Oscillator::new(10, 12, 1);
        assert!(!oscillator.advance());
        assert!(oscillator.advance());
        assert_eq!(oscillator.value, 12);
        assert!(!oscillator.advance());
        assert_eq!(oscillator.value, 11);
        assert!(oscillator.advance());
        assert_eq!(oscillator.value, 10);
        assert_eq!(oscillator.bounces, 2);
    }

    #[test]
    fn simulated_crank_matches_target_cadence() {
        let mut crank = CrankSimulator {
            rpm: 90.0,
            elapsed_secs: 0.0,
        };
        let (revs_a, time_a) = crank.advance(Duration::from_secs(10));
        let (revs_b, time_b) = crank.advance(Duration::from_secs(2));
        let rpm = cadence_between(
            CrankRevolutions {
                cumulative_revolutions: revs_a,
                last_event_time: time_a,
            },
            CrankRevolutions {
                cumulative_revolutions: revs_b,
                last_event_time: time_b,
            },
        )
        .unwrap();
        assert!((rpm - 90.0).abs() < 0.5);
    }
}
