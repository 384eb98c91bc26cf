use crate::errors::AppError;
use crate::sensors::{DiscoveredDevice, RadioCommand, RadioEvent, RadioState};

use btleplug::api::{
    Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter,
    ValueNotification,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// Carries out [`RadioCommand`]s against a real adapter and reports back
/// with [`RadioEvent`]s. One actor per controller, each with its own adapter handle.
struct BleRadioActor {
    central: Adapter,
    events_tx: UnboundedSender<RadioEvent>,
    connect_timeout: Duration,
    peripherals: HashMap<String, Peripheral>,
    scan_services: Vec<Uuid>,
    scanning: bool,
    notifications: Option<(String, NotificationStream)>,
}

impl BleRadioActor {
    async fn build(
        events_tx: UnboundedSender<RadioEvent>,
        connect_timeout: Duration,
    ) -> Result<Self, AppError> {
        let manager = Manager::new().await?;
        let central = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(AppError::NoAdapter)?;
        Ok(Self {
            central,
            events_tx,
            connect_timeout,
            peripherals: HashMap::new(),
            scan_services: Vec::new(),
            scanning: false,
            notifications: None,
        })
    }

    fn emit(&self, event: RadioEvent) {
        if self.events_tx.send(event).is_err() {
            debug!("Controller went away, dropping radio event");
        }
    }

    async fn run(
        &mut self,
        mut commands: UnboundedReceiver<RadioCommand>,
        cancel_token: CancellationToken,
    ) -> Result<(), AppError> {
        let mut central_events = self.central.events().await?;
        let initial_state = match self.central.adapter_state().await {
            Ok(state) => radio_state(state),
            Err(e) => {
                warn!("Couldn't read adapter state, assuming powered on: {}", e);
                RadioState::PoweredOn
            }
        };
        self.emit(RadioEvent::StateChanged(initial_state));

        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            info!("Radio command channel closed");
                            break;
                        }
                    }
                }
                Some(event) = central_events.next() => {
                    self.handle_central_event(event).await;
                }
                notification = next_notification(&mut self.notifications) => {
                    match notification {
                        Some((device_id, data)) => self.emit(RadioEvent::ValueUpdated {
                            device_id,
                            characteristic: data.uuid,
                            value: data.value,
                        }),
                        None => {
                            info!("BLE notification stream closed!");
                            self.notifications = None;
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    info!("Shutting down BLE radio thread!");
                    break;
                }
            }
        }

        if self.scanning {
            self.central.stop_scan().await?;
        }
        for peripheral in self.peripherals.values() {
            if peripheral.is_connected().await.unwrap_or(false) {
                peripheral.disconnect().await?;
            }
        }
        Ok(())
    }

    async fn handle_command(&mut self, command: RadioCommand) {
        debug!("Radio command: {:?}", command);
        match command {
            RadioCommand::StartScan { services } => {
                let filter = ScanFilter {
                    services: services.clone(),
                };
                self.scan_services = services;
                match self.central.start_scan(filter).await {
                    Ok(()) => self.scanning = true,
                    Err(e) => {
                        error!("Scanning failure: {}", e);
                        self.emit(RadioEvent::StateChanged(RadioState::PoweredOff));
                    }
                }
            }
            RadioCommand::StopScan => {
                if let Err(e) = self.central.stop_scan().await {
                    warn!("Failed to stop scan: {}", e);
                }
                self.scanning = false;
            }
            RadioCommand::Connect { device_id } => self.connect(device_id).await,
            RadioCommand::CancelConnection { device_id } => {
                if let Some(peripheral) = self.peripherals.get(&device_id) {
                    if let Err(e) = peripheral.disconnect().await {
                        warn!("Failed to disconnect {}: {}", device_id, e);
                    }
                }
                if self.streaming_from(&device_id) {
                    self.notifications = None;
                }
            }
            RadioCommand::DiscoverServices {
                device_id,
                services,
            } => {
                let result = match self.peripherals.get(&device_id).cloned() {
                    Some(peripheral) => Self::discover_services(&peripheral, &services).await,
                    None => Err("Device not found".to_string()),
                };
                self.emit(RadioEvent::ServicesDiscovered { device_id, result });
            }
            RadioCommand::DiscoverCharacteristics {
                device_id,
                service,
                characteristics,
            } => {
                let result = self.discover_characteristics(&device_id, service, &characteristics);
                self.emit(RadioEvent::CharacteristicsDiscovered {
                    device_id,
                    service,
                    result,
                });
            }
            RadioCommand::Subscribe {
                device_id,
                characteristic,
            } => self.subscribe(device_id, characteristic).await,
        }
    }

    async fn handle_central_event(&mut self, event: CentralEvent) {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                if !self.scanning {
                    return;
                }
                let Ok(peripheral) = self.central.peripheral(&id).await else {
                    return;
                };
                let properties = match peripheral.properties().await {
                    Ok(Some(properties)) => properties,
                    _ => return,
                };
                // Not every platform honors the scan filter
                if !properties
                    .services
                    .iter()
                    .any(|s| self.scan_services.contains(s))
                {
                    return;
                }
                let device_id = id.to_string();
                self.peripherals.insert(device_id.clone(), peripheral);
                self.emit(RadioEvent::Discovered(DiscoveredDevice::new(
                    device_id,
                    properties.local_name,
                )));
            }
            CentralEvent::StateUpdate(state) => {
                let state = radio_state(state);
                info!("Adapter state changed: {:?}", state);
                if state != RadioState::PoweredOn {
                    self.scanning = false;
                }
                self.emit(RadioEvent::StateChanged(state));
            }
            CentralEvent::DeviceDisconnected(id) => {
                let device_id = id.to_string();
                if !self.peripherals.contains_key(&device_id) {
                    return;
                }
                warn!("Device disconnected: {}", device_id);
                if self.streaming_from(&device_id) {
                    self.notifications = None;
                }
                self.emit(RadioEvent::Disconnected {
                    device_id,
                    reason: None,
                });
            }
            _ => {}
        }
    }

    async fn connect(&mut self, device_id: String) {
        let Some(peripheral) = self.peripherals.get(&device_id) else {
            self.emit(RadioEvent::ConnectFailed {
                device_id,
                reason: Some("Device not found".into()),
            });
            return;
        };
        info!("Connecting to {}", device_id);
        let event = match tokio::time::timeout(self.connect_timeout, peripheral.connect()).await {
            Ok(Ok(())) => RadioEvent::Connected { device_id },
            Ok(Err(e)) => {
                error!("BLE Connection error: {}", e);
                RadioEvent::ConnectFailed {
                    device_id,
                    reason: Some(e.to_string()),
                }
            }
            Err(_) => {
                error!("BLE Connection timed out");
                RadioEvent::ConnectFailed {
                    device_id,
                    reason: Some("Connection timed out".into()),
                }
            }
        };
        self.emit(event);
    }

    async fn discover_services(
        peripheral: &Peripheral,
        wanted: &[Uuid],
    ) -> Result<Vec<Uuid>, String> {
        peripheral
            .discover_services()
            .await
            .map_err(|e| e.to_string())?;
        Ok(peripheral
            .services()
            .into_iter()
            .map(|service| service.uuid)
            .filter(|uuid| wanted.is_empty() || wanted.contains(uuid))
            .collect())
    }

    fn discover_characteristics(
        &self,
        device_id: &str,
        service: Uuid,
        wanted: &[Uuid],
    ) -> Result<Vec<Uuid>, String> {
        let peripheral = self
            .peripherals
            .get(device_id)
            .ok_or_else(|| "Device not found".to_string())?;
        let service = peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == service)
            .ok_or_else(|| "Service not found".to_string())?;
        let found: Vec<Uuid> = service
            .characteristics
            .into_iter()
            .map(|c| c.uuid)
            .filter(|uuid| wanted.is_empty() || wanted.contains(uuid))
            .collect();
        debug!("Found {} characteristics", found.len());
        Ok(found)
    }

    async fn subscribe(&mut self, device_id: String, characteristic: Uuid) {
        let Some(peripheral) = self.peripherals.get(&device_id).cloned() else {
            return;
        };
        let Some(target) = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic)
        else {
            error!("Characteristic {} missing during notification setup!", characteristic);
            Self::drop_link(&peripheral).await;
            return;
        };
        if let Err(e) = peripheral.subscribe(&target).await {
            error!("Failed to subscribe to {}: {}", characteristic, e);
            Self::drop_link(&peripheral).await;
            return;
        }
        match peripheral.notifications().await {
            Ok(stream) => self.notifications = Some((device_id, stream)),
            Err(e) => {
                error!("Failed to get BLE notification stream: {}", e);
                Self::drop_link(&peripheral).await;
            }
        }
    }

    /// Tears the link down, the platform then reports the disconnect as usual.
    async fn drop_link(peripheral: &Peripheral) {
        if let Err(e) = peripheral.disconnect().await {
            error!("Failed to disconnect after setup error: {}", e);
        }
    }

    fn streaming_from(&self, device_id: &str) -> bool {
        self.notifications
            .as_ref()
            .is_some_and(|(id, _)| id == device_id)
    }
}

fn radio_state(state: CentralState) -> RadioState {
    match state {
        CentralState::PoweredOn => RadioState::PoweredOn,
        CentralState::PoweredOff => RadioState::PoweredOff,
        _ => RadioState::Unknown,
    }
}

/// Next notification, or pending forever while nothing is subscribed.
async fn next_notification(
    notifications: &mut Option<(String, NotificationStream)>,
) -> Option<(String, ValueNotification)> {
    match notifications {
        Some((device_id, stream)) => stream.next().await.map(|n| (device_id.clone(), n)),
        None => futures::future::pending().await,
    }
}

pub async fn ble_radio_thread(
    commands: UnboundedReceiver<RadioCommand>,
    events_tx: UnboundedSender<RadioEvent>,
    connect_timeout: Duration,
    cancel_token: CancellationToken,
) {
    let mut actor = match BleRadioActor::build(events_tx.clone(), connect_timeout).await {
        Ok(actor) => actor,
        Err(e) => {
            error!("Failed to set up Bluetooth: {e}");
            let _ = events_tx.send(RadioEvent::StateChanged(RadioState::Unsupported));
            return;
        }
    };

    info!("BLE radio thread started!");

    if let Err(e) = actor.run(commands, cancel_token).await {
        error!("Fatal BLE Error: {e}");
        let _ = events_tx.send(RadioEvent::StateChanged(RadioState::Unknown));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn radio_thread_can_be_spawned() {
        let (_commands_tx, commands) = unbounded_channel();
        let (events_tx, _events) = unbounded_channel();
        let thread = ble_radio_thread(
            commands,
            events_tx,
            Duration::from_secs(1),
            CancellationToken::new(),
        );
        assert_send(&thread);
    }

    #[test]
    fn adapter_states_map_to_radio_states() {
        assert_eq!(radio_state(CentralState::PoweredOn), RadioState::PoweredOn);
        assert_eq!(radio_state(CentralState::PoweredOff), RadioState::PoweredOff);
        assert_eq!(radio_state(CentralState::Unknown), RadioState::Unknown);
    }
}
