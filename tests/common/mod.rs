#![allow(dead_code)]

use misfit_metrics::device_memory::InMemoryDeviceMemory;
use misfit_metrics::heart_rate::HeartRateMonitor;
use misfit_metrics::power::{PowerMonitor, DEFAULT_CADENCE_TIMEOUT};
use misfit_metrics::sensors::{
    DiscoveredDevice, RadioCommand, RadioEvent, RadioState, SensorController, SensorProfile,
};

pub type TestHeartRateMonitor = HeartRateMonitor<Vec<RadioCommand>, InMemoryDeviceMemory>;
pub type TestPowerMonitor = PowerMonitor<Vec<RadioCommand>, InMemoryDeviceMemory>;

pub fn heart_rate_monitor(memory: InMemoryDeviceMemory) -> TestHeartRateMonitor {
    let mut hr = HeartRateMonitor::heart_rate(Vec::new(), memory);
    hr.handle_event(RadioEvent::StateChanged(RadioState::PoweredOn));
    hr
}

pub fn power_monitor() -> TestPowerMonitor {
    let mut power =
        PowerMonitor::power(Vec::new(), InMemoryDeviceMemory::new(), DEFAULT_CADENCE_TIMEOUT);
    power.handle_event(RadioEvent::StateChanged(RadioState::PoweredOn));
    power
}

pub fn device(id: &str, name: &str) -> DiscoveredDevice {
    DiscoveredDevice::new(id, Some(name.to_owned()))
}

/// Plays the peripheral's side of a successful connect, up to streaming.
pub fn bring_up<P: SensorProfile>(
    controller: &mut SensorController<P, Vec<RadioCommand>, InMemoryDeviceMemory>,
    device_id: &str,
) {
    controller.handle_event(RadioEvent::Connected {
        device_id: device_id.to_owned(),
    });
    controller.handle_event(RadioEvent::ServicesDiscovered {
        device_id: device_id.to_owned(),
        result: Ok(vec![P::SERVICE_UUID]),
    });
    controller.handle_event(RadioEvent::CharacteristicsDiscovered {
        device_id: device_id.to_owned(),
        service: P::SERVICE_UUID,
        result: Ok(vec![P::MEASUREMENT_UUID]),
    });
}

pub fn notify<P: SensorProfile>(
    controller: &mut SensorController<P, Vec<RadioCommand>, InMemoryDeviceMemory>,
    device_id: &str,
    value: &[u8],
) {
    controller.handle_event(RadioEvent::ValueUpdated {
        device_id: device_id.to_owned(),
        characteristic: P::MEASUREMENT_UUID,
        value: value.to_vec(),
    });
}

pub fn crank_payload(watts: i16, revolutions: u16, event_time: u16) -> Vec<u8> {
    let mut data = vec![0x20, 0x00];
    data.extend_from_slice(&watts.to_le_bytes());
    data.extend_from_slice(&revolutions.to_le_bytes());
    data.extend_from_slice(&event_time.to_le_bytes());
    data
}

pub fn connect_requests(commands: &[RadioCommand]) -> usize {
    commands
        .iter()
        .filter(|c| matches!(c, RadioCommand::Connect { .. }))
        .count()
}
