use serde_derive::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::{
    ConnectionState, DisconnectReason, DiscoveredDevice, Radio, RadioCommand, RadioEvent,
    RadioState, SensorType,
};
use crate::device_memory::DeviceMemory;

/// What a particular GATT sensor profile adds on top of the shared connection lifecycle.
pub trait SensorProfile {
    const SENSOR_TYPE: SensorType;
    const SERVICE_UUID: Uuid;
    const MEASUREMENT_UUID: Uuid;
    /// Whether `start_scan(true)` may connect to the remembered device on its own
    const SUPPORTS_AUTO_CONNECT: bool;
    const SCANNING_STATUS: &'static str;
    const STREAMING_STATUS: &'static str;

    /// Called with every notification from the measurement characteristic, in arrival order.
    fn on_measurement(&mut self, payload: &[u8], received_at: Instant);
    /// Periodic check for derived values that go stale without new data.
    fn on_tick(&mut self, _now: Instant) {}
    /// Puts every derived value back to its zero/unavailable state.
    fn reset(&mut self);
}

/// How long a manual `connect()` keeps opportunistic auto-connect switched off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoConnectPolicy {
    /// For the rest of the controller's lifetime
    #[default]
    Session,
    /// Until the next `start_scan(true)`
    PerScan,
}

/// Owns the scan/connect/discover/subscribe lifecycle for a single peripheral
/// and feeds its measurement notifications to a [`SensorProfile`].
///
/// All mutation goes through `&mut self`, either from one of the user-facing
/// operations or from [`SensorController::handle_event`]. Callers must drive
/// a controller from one task; nothing here locks.
pub struct SensorController<P, R, M> {
    profile: P,
    radio: R,
    memory: M,

    state: ConnectionState,
    radio_state: RadioState,
    status: String,
    discovered: Vec<DiscoveredDevice>,
    peripheral: Option<DiscoveredDevice>,
    is_connected: bool,
    is_scanning: bool,

    auto_connect_policy: AutoConnectPolicy,
    auto_connect_armed: bool,
    manual_override: bool,
}

impl<P: SensorProfile, R: Radio, M: DeviceMemory> SensorController<P, R, M> {
    pub fn new(profile: P, radio: R, memory: M) -> Self {
        Self {
            profile,
            radio,
            memory,
            state: ConnectionState::Idle,
            radio_state: RadioState::Unknown,
            status: "Not connected".into(),
            discovered: Vec::new(),
            peripheral: None,
            is_connected: false,
            is_scanning: false,
            auto_connect_policy: AutoConnectPolicy::default(),
            auto_connect_armed: false,
            manual_override: false,
        }
    }

    pub fn with_auto_connect_policy(mut self, policy: AutoConnectPolicy) -> Self {
        self.auto_connect_policy = policy;
        self
    }

    pub fn profile(&self) -> &P {
        &self.profile
    }
    pub fn radio(&self) -> &R {
        &self.radio
    }
    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }
    pub fn memory(&self) -> &M {
        &self.memory
    }
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }
    pub fn radio_state(&self) -> RadioState {
        self.radio_state
    }
    pub fn status(&self) -> &str {
        &self.status
    }
    pub fn discovered_devices(&self) -> &[DiscoveredDevice] {
        &self.discovered
    }
    pub fn connected_device(&self) -> Option<&DiscoveredDevice> {
        self.peripheral.as_ref()
    }
    pub fn is_connected(&self) -> bool {
        self.is_connected
    }
    pub fn is_scanning(&self) -> bool {
        self.is_scanning
    }
    pub fn is_auto_connect_armed(&self) -> bool {
        self.auto_connect_armed
    }
    pub fn last_connected_device_name(&self) -> Option<String> {
        self.memory
            .last_device(P::SENSOR_TYPE)
            .and_then(|saved| saved.name)
    }

    pub fn forget_device(&mut self) {
        info!("Forgetting saved {} device", P::SENSOR_TYPE);
        self.memory.clear(P::SENSOR_TYPE);
    }

    pub fn start_scan(&mut self, auto_connect_previous_device: bool) {
        if self.radio_state != RadioState::PoweredOn {
            warn!(
                "{} scan requested while radio is {:?}",
                P::SENSOR_TYPE,
                self.radio_state
            );
            self.status = "Bluetooth not available".into();
            return;
        }

        self.discovered.clear();
        self.is_scanning = true;
        if !self.has_link() {
            self.state = ConnectionState::Scanning;
        }

        let policy_allows = match self.auto_connect_policy {
            AutoConnectPolicy::Session => !self.manual_override,
            AutoConnectPolicy::PerScan => true,
        };
        self.auto_connect_armed =
            P::SUPPORTS_AUTO_CONNECT && auto_connect_previous_device && policy_allows;

        let remembered = if self.auto_connect_armed {
            self.memory.last_device(P::SENSOR_TYPE)
        } else {
            None
        };
        self.status = match remembered {
            Some(saved) => format!(
                "Looking for {}...",
                saved.name.as_deref().unwrap_or("previous device")
            ),
            None => P::SCANNING_STATUS.into(),
        };
        info!("{}: {}", P::SENSOR_TYPE, self.status);

        self.radio.request(RadioCommand::StartScan {
            services: vec![P::SERVICE_UUID],
        });
    }

    pub fn stop_scan(&mut self) {
        if self.is_scanning {
            self.radio.request(RadioCommand::StopScan);
        }
        self.is_scanning = false;
        if !self.is_connected {
            self.status = "Scan stopped".into();
            if self.state == ConnectionState::Scanning {
                self.state = ConnectionState::Idle;
            }
        }
    }

    /// Connects to a device the user picked. Manual selection disarms auto-connect.
    pub fn connect(&mut self, device_id: &str) {
        self.auto_connect_armed = false;
        self.manual_override = true;
        self.begin_connect(device_id);
    }

    pub fn disconnect(&mut self) {
        if let Some(peripheral) = self.peripheral.take() {
            info!(
                "Disconnecting {} sensor {}",
                P::SENSOR_TYPE,
                peripheral.display_name()
            );
            self.radio.request(RadioCommand::CancelConnection {
                device_id: peripheral.id,
            });
        }
        self.profile.reset();
        self.is_connected = false;
        self.status = "Disconnected".into();
        self.state = ConnectionState::Disconnected(DisconnectReason::Requested);
    }

    /// Lets the profile expire stale values, meant to be polled on a fixed interval.
    pub fn tick(&mut self, now: Instant) {
        self.profile.on_tick(now);
    }

    pub fn handle_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::StateChanged(state) => self.on_radio_state(state),
            RadioEvent::Discovered(device) => self.on_discovered(device),
            RadioEvent::Connected { device_id } => self.on_connected(&device_id),
            RadioEvent::ConnectFailed { device_id, reason } => {
                self.on_connect_failed(&device_id, reason)
            }
            RadioEvent::Disconnected { device_id, reason } => {
                self.on_disconnected(&device_id, reason)
            }
            RadioEvent::ServicesDiscovered { device_id, result } => {
                self.on_services_discovered(&device_id, result)
            }
            RadioEvent::CharacteristicsDiscovered {
                device_id,
                service,
                result,
            } => self.on_characteristics_discovered(&device_id, service, result),
            RadioEvent::ValueUpdated {
                device_id,
                characteristic,
                value,
            } => self.on_characteristic_update(&device_id, characteristic, &value, Instant::now()),
        }
    }

    pub fn on_radio_state(&mut self, state: RadioState) {
        debug!("{} radio state: {:?}", P::SENSOR_TYPE, state);
        self.radio_state = state;
        self.status = state.status_message().into();
        // A scan can't outlive the radio that runs it
        if state != RadioState::PoweredOn && self.is_scanning {
            self.is_scanning = false;
            self.auto_connect_armed = false;
            if self.state == ConnectionState::Scanning {
                self.state = ConnectionState::Idle;
            }
        }
    }

    pub fn on_discovered(&mut self, device: DiscoveredDevice) {
        if !self.discovered.iter().any(|d| d.id == device.id) {
            debug!(
                "Discovered {} sensor {} ({})",
                P::SENSOR_TYPE,
                device.display_name(),
                device.id
            );
            self.discovered.push(device.clone());
        }

        if self.auto_connect_armed && self.memory.matches(&device.id, P::SENSOR_TYPE) {
            info!("Found previous {} device, auto-connecting", P::SENSOR_TYPE);
            // Only try once per scan
            self.auto_connect_armed = false;
            self.begin_connect(&device.id);
        }
    }

    pub fn on_connected(&mut self, device_id: &str) {
        let Some(peripheral) = self.ours(device_id).cloned() else {
            return;
        };
        self.is_connected = true;
        self.status = format!("Connected to {}", peripheral.display_name());
        info!("{}: {}", P::SENSOR_TYPE, self.status);

        self.memory
            .save(P::SENSOR_TYPE, &peripheral.id, peripheral.name.as_deref());

        self.state = ConnectionState::DiscoveringServices;
        self.radio.request(RadioCommand::DiscoverServices {
            device_id: peripheral.id,
            services: vec![P::SERVICE_UUID],
        });
    }

    pub fn on_connect_failed(&mut self, device_id: &str, reason: Option<String>) {
        if self.ours(device_id).is_none() {
            return;
        }
        let reason = reason.unwrap_or_else(|| "Unknown error".into());
        self.peripheral = None;
        self.is_connected = false;
        self.status = format!("Failed to connect: {reason}");
        warn!("{}: {}", P::SENSOR_TYPE, self.status);
        self.state = ConnectionState::Disconnected(DisconnectReason::ConnectFailed(reason));
    }

    pub fn on_disconnected(&mut self, device_id: &str, reason: Option<String>) {
        if self.ours(device_id).is_none() {
            return;
        }
        self.peripheral = None;
        self.is_connected = false;
        self.profile.reset();
        self.status = match &reason {
            Some(e) => format!("Disconnected with error: {e}"),
            None => "Disconnected".into(),
        };
        warn!("{}: {}", P::SENSOR_TYPE, self.status);
        self.state = ConnectionState::Disconnected(DisconnectReason::LinkLost(reason));
    }

    pub fn on_services_discovered(&mut self, device_id: &str, result: Result<Vec<Uuid>, String>) {
        if self.ours(device_id).is_none() {
            return;
        }
        match result {
            Err(e) => {
                self.status = format!("Error discovering services: {e}");
                warn!("{}: {}", P::SENSOR_TYPE, self.status);
            }
            Ok(services) if services.contains(&P::SERVICE_UUID) => {
                self.state = ConnectionState::DiscoveringCharacteristics;
                self.radio.request(RadioCommand::DiscoverCharacteristics {
                    device_id: device_id.to_owned(),
                    service: P::SERVICE_UUID,
                    characteristics: vec![P::MEASUREMENT_UUID],
                });
            }
            Ok(_) => warn!("{} service missing from {device_id}", P::SENSOR_TYPE),
        }
    }

    pub fn on_characteristics_discovered(
        &mut self,
        device_id: &str,
        service: Uuid,
        result: Result<Vec<Uuid>, String>,
    ) {
        if service != P::SERVICE_UUID || self.ours(device_id).is_none() {
            return;
        }
        match result {
            Err(e) => {
                self.status = format!("Error discovering characteristics: {e}");
                warn!("{}: {}", P::SENSOR_TYPE, self.status);
            }
            Ok(characteristics) if characteristics.contains(&P::MEASUREMENT_UUID) => {
                self.radio.request(RadioCommand::Subscribe {
                    device_id: device_id.to_owned(),
                    characteristic: P::MEASUREMENT_UUID,
                });
                self.state = ConnectionState::Streaming;
                self.status = P::STREAMING_STATUS.into();
                info!("{}: {}", P::SENSOR_TYPE, self.status);
            }
            Ok(_) => warn!("{} measurement missing from {device_id}", P::SENSOR_TYPE),
        }
    }

    pub fn on_characteristic_update(
        &mut self,
        device_id: &str,
        characteristic: Uuid,
        value: &[u8],
        received_at: Instant,
    ) {
        if characteristic != P::MEASUREMENT_UUID || self.ours(device_id).is_none() {
            return;
        }
        trace!("{} notification: {:02x?}", P::SENSOR_TYPE, value);
        self.profile.on_measurement(value, received_at);
    }

    fn begin_connect(&mut self, device_id: &str) {
        self.stop_scan();

        if let Some(previous) = self.peripheral.take() {
            if previous.id != device_id && self.has_link() {
                self.radio.request(RadioCommand::CancelConnection {
                    device_id: previous.id,
                });
                self.profile.reset();
                self.is_connected = false;
            }
        }

        let device = self
            .discovered
            .iter()
            .find(|d| d.id == device_id)
            .cloned()
            .unwrap_or_else(|| DiscoveredDevice::new(device_id, None));

        self.status = format!("Connecting to {}...", device.display_name());
        info!("{}: {}", P::SENSOR_TYPE, self.status);
        self.peripheral = Some(device);
        self.state = ConnectionState::Connecting;
        self.radio.request(RadioCommand::Connect {
            device_id: device_id.to_owned(),
        });
    }

    fn ours(&self, device_id: &str) -> Option<&DiscoveredDevice> {
        let peripheral = self.peripheral.as_ref().filter(|p| p.id == device_id);
        if peripheral.is_none() {
            trace!("{} ignoring event for {device_id}", P::SENSOR_TYPE);
        }
        peripheral
    }

    fn has_link(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connecting
                | ConnectionState::DiscoveringServices
                | ConnectionState::DiscoveringCharacteristics
                | ConnectionState::Streaming
        )
    }
}
