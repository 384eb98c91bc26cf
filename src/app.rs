use chrono::{DateTime, Local};
use std::time::Instant;
use tokio::sync::broadcast::Sender as BSender;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{self, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::args::{SubCommands, TopLevelCmd};
use crate::ble::ble_radio_thread;
use crate::broadcast;
use crate::device_memory::{DeviceMemory, InMemoryDeviceMemory, TomlDeviceMemory};
use crate::dummy::dummy_radio_thread;
use crate::heart_rate::HeartRateMonitor;
use crate::power::PowerMonitor;
use crate::sensors::{
    ConnectionState, DisconnectReason, DiscoveredDevice, Radio, RadioCommand, RadioEvent,
    RadioState, SensorController, SensorProfile, SensorType,
};
use crate::session::session_logging_thread;
use crate::settings::Settings;

const BROADCAST_CAPACITY: usize = 16;

type LiveRadio = UnboundedSender<RadioCommand>;
type SharedMemory = Box<dyn DeviceMemory + Send>;

/// One reading of everything the app knows, taken on the report interval.
#[derive(Debug, Clone)]
pub struct Telemetry {
    pub timestamp: DateTime<Local>,
    /// `None` while no heart rate monitor is connected
    pub heart_rate: Option<u16>,
    pub power: Option<u16>,
    pub three_second_power: Option<f64>,
    pub cadence: Option<f64>,
}

#[derive(Debug, Clone)]
pub enum AppUpdate {
    Telemetry(Telemetry),
}

impl From<Telemetry> for AppUpdate {
    fn from(telemetry: Telemetry) -> Self {
        AppUpdate::Telemetry(telemetry)
    }
}

pub enum AppMessage {
    HeartRate(RadioEvent),
    Power(RadioEvent),
    RadioGone(SensorType),
    CadenceCheck,
    Report,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SensorSource {
    Ble,
    Dummy,
}

/// Which device a controller should connect to when it shows up in a scan.
#[derive(Debug, Default)]
struct DeviceTarget {
    device_id: Option<String>,
    /// Scan again after the link drops, instead of waiting to be asked
    rescan_after_dropout: bool,
    rescan_pending: bool,
}

impl DeviceTarget {
    fn new(device_id: Option<String>, rescan_after_dropout: bool) -> Self {
        Self {
            device_id,
            rescan_after_dropout,
            rescan_pending: false,
        }
    }

    fn wants(&self, device: &DiscoveredDevice, first_found: bool) -> bool {
        match &self.device_id {
            Some(id) => *id == device.id,
            None => first_found,
        }
    }
}

pub struct App {
    pub settings: Settings,

    hr: HeartRateMonitor<LiveRadio, SharedMemory>,
    power: PowerMonitor<LiveRadio, SharedMemory>,
    hr_target: DeviceTarget,
    power_target: DeviceTarget,

    hr_events: UnboundedReceiver<RadioEvent>,
    power_events: UnboundedReceiver<RadioEvent>,
    // Handed to the radio actors on init
    pending_radios: Option<PendingRadios>,

    broadcast_tx: BSender<AppUpdate>,
    cadence_check: Interval,
    report: Interval,

    pub cancel_app: CancellationToken,
    pub cancel_actors: CancellationToken,
    actor_handles: Vec<JoinHandle<()>>,
}

struct PendingRadios {
    hr_commands: UnboundedReceiver<RadioCommand>,
    hr_events_tx: UnboundedSender<RadioEvent>,
    power_commands: UnboundedReceiver<RadioCommand>,
    power_events_tx: UnboundedSender<RadioEvent>,
}

impl App {
    pub fn build(
        arg_config: &TopLevelCmd,
        settings: Settings,
        parent_token: Option<CancellationToken>,
    ) -> Self {
        let (hr_commands_tx, hr_commands) = mpsc::unbounded_channel();
        let (hr_events_tx, hr_events) = mpsc::unbounded_channel();
        let (power_commands_tx, power_commands) = mpsc::unbounded_channel();
        let (power_events_tx, power_events) = mpsc::unbounded_channel();
        let (broadcast_tx, _) = tokio::sync::broadcast::channel(BROADCAST_CAPACITY);

        let persist = !arg_config.no_save;
        let hr = HeartRateMonitor::heart_rate(hr_commands_tx, device_memory(&settings, persist))
            .with_auto_connect_policy(settings.ble.auto_connect_policy);
        let power = PowerMonitor::power(
            power_commands_tx,
            device_memory(&settings, persist),
            settings.ble.cadence_timeout(),
        );

        let (hr_device, power_device) = match &arg_config.subcommands {
            Some(SubCommands::Ble(ble)) => (ble.hr_device.clone(), ble.power_device.clone()),
            _ => (None, None),
        };
        // Power meters don't auto-connect on their own, so the app goes
        // looking for the saved one
        let power_device = power_device.or_else(|| {
            power
                .memory()
                .last_device(SensorType::Power)
                .map(|saved| saved.identifier)
        });

        let rescan = settings.ble.rescan_after_dropout;
        let mut cadence_check = time::interval(settings.ble.cadence_check_interval());
        cadence_check.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut report = time::interval(settings.misc.report_interval());
        report.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let cancel_app = parent_token.unwrap_or_default();
        let cancel_actors = cancel_app.child_token();

        Self {
            settings,
            hr,
            power,
            hr_target: DeviceTarget::new(hr_device, rescan),
            power_target: DeviceTarget::new(power_device, rescan),
            hr_events,
            power_events,
            pending_radios: Some(PendingRadios {
                hr_commands,
                hr_events_tx,
                power_commands,
                power_events_tx,
            }),
            broadcast_tx,
            cadence_check,
            report,
            cancel_app,
            cancel_actors,
            actor_handles: Vec::new(),
        }
    }

    /// Spawns the radio actors and the session logger.
    pub async fn init(&mut self, arg_config: &TopLevelCmd) {
        let Some(radios) = self.pending_radios.take() else {
            warn!("App already initialized");
            return;
        };

        let source = match arg_config.subcommands {
            Some(SubCommands::Dummy(_)) => SensorSource::Dummy,
            _ => SensorSource::Ble,
        };
        info!("Using {:?} sensors", source);

        match source {
            SensorSource::Ble => {
                let timeout = self.settings.ble.connect_timeout();
                let hr_token = self.cancel_actors.child_token();
                let power_token = self.cancel_actors.child_token();
                self.actor_handles.push(tokio::spawn(ble_radio_thread(
                    radios.hr_commands,
                    radios.hr_events_tx,
                    timeout,
                    hr_token,
                )));
                self.actor_handles.push(tokio::spawn(ble_radio_thread(
                    radios.power_commands,
                    radios.power_events_tx,
                    timeout,
                    power_token,
                )));
            }
            SensorSource::Dummy => {
                let hr_token = self.cancel_actors.child_token();
                let power_token = self.cancel_actors.child_token();
                self.actor_handles.push(tokio::spawn(dummy_radio_thread(
                    SensorType::HeartRate,
                    radios.hr_commands,
                    radios.hr_events_tx,
                    self.settings.dummy.clone(),
                    hr_token,
                )));
                self.actor_handles.push(tokio::spawn(dummy_radio_thread(
                    SensorType::Power,
                    radios.power_commands,
                    radios.power_events_tx,
                    self.settings.dummy.clone(),
                    power_token,
                )));
            }
        }

        let session_rx = self.broadcast_tx.subscribe();
        let misc_settings = self.settings.misc.clone();
        let session_token = self.cancel_actors.child_token();
        self.actor_handles.push(tokio::spawn(async move {
            session_logging_thread(session_rx, misc_settings, session_token).await;
        }));
    }

    pub async fn app_receivers(&mut self) -> AppMessage {
        tokio::select! {
            event = self.hr_events.recv() => match event {
                Some(event) => AppMessage::HeartRate(event),
                None => AppMessage::RadioGone(SensorType::HeartRate),
            },
            event = self.power_events.recv() => match event {
                Some(event) => AppMessage::Power(event),
                None => AppMessage::RadioGone(SensorType::Power),
            },
            _ = self.cadence_check.tick() => AppMessage::CadenceCheck,
            _ = self.report.tick() => AppMessage::Report,
            _ = self.cancel_app.cancelled() => AppMessage::Shutdown,
        }
    }

    pub async fn app_handlers(&mut self, message: AppMessage) {
        match message {
            AppMessage::HeartRate(event) => {
                let auto_connect = self.settings.ble.auto_connect;
                // Leave remembered straps to the controller's own auto-connect
                let waiting_for_saved = self.hr.is_auto_connect_armed()
                    && self
                        .hr
                        .memory()
                        .last_device(SensorType::HeartRate)
                        .is_some();
                let first_found = self.settings.ble.connect_first_found && !waiting_for_saved;
                route_event(
                    &mut self.hr,
                    &mut self.hr_target,
                    event,
                    auto_connect,
                    first_found,
                );
            }
            AppMessage::Power(event) => {
                let first_found = self.settings.ble.connect_first_found;
                route_event(
                    &mut self.power,
                    &mut self.power_target,
                    event,
                    false,
                    first_found,
                );
            }
            AppMessage::RadioGone(sensor) => {
                error!("{sensor} radio actor stopped, shutting down");
                self.cancel_actors.cancel();
            }
            AppMessage::CadenceCheck => self.power.check_cadence_timeout(Instant::now()),
            AppMessage::Report => {
                let auto_connect = self.settings.ble.auto_connect;
                retry_scan(&mut self.hr, &mut self.hr_target, auto_connect);
                retry_scan(&mut self.power, &mut self.power_target, false);
                self.report_telemetry();
            }
            AppMessage::Shutdown => {
                info!("Shutdown requested");
            }
        }
    }

    pub fn telemetry(&self) -> Telemetry {
        Telemetry {
            timestamp: Local::now(),
            heart_rate: self.hr.is_connected().then(|| self.hr.bpm()),
            power: self.power.instantaneous_watts(),
            three_second_power: self.power.three_second_average(),
            cadence: self.power.is_connected().then(|| self.power.cadence_rpm()),
        }
    }

    fn report_telemetry(&self) {
        let telemetry = self.telemetry();
        let bpm = telemetry
            .heart_rate
            .map_or_else(|| "--".to_string(), |bpm| bpm.to_string());
        let watts = telemetry
            .power
            .map_or_else(|| "--".to_string(), |watts| watts.to_string());
        let average = telemetry
            .three_second_power
            .map_or_else(|| "--".to_string(), |watts| format!("{watts:.1}"));
        let cadence = telemetry
            .cadence
            .map_or_else(|| "--".to_string(), |rpm| format!("{rpm:.1}"));
        info!(
            "HR: {bpm} bpm | Power: {watts} W (3s {average} W) | Cadence: {cadence} rpm | {} / {}",
            self.hr.status(),
            self.power.status()
        );
        broadcast!(self.broadcast_tx, telemetry);
    }

    /// Drops both links and waits for every actor to wind down.
    pub async fn join_threads(&mut self) {
        self.hr.disconnect();
        self.power.disconnect();
        // Give the actors a moment to process the disconnects
        time::sleep(time::Duration::from_millis(100)).await;
        self.cancel_actors.cancel();
        for handle in self.actor_handles.drain(..) {
            if let Err(e) = handle.await {
                error!("Actor panicked while shutting down: {e}");
            }
        }
    }
}

fn device_memory(settings: &Settings, persist: bool) -> SharedMemory {
    if persist {
        Box::new(TomlDeviceMemory::new(&settings.ble.saved_devices_path))
    } else {
        Box::new(InMemoryDeviceMemory::new())
    }
}

fn route_event<P: SensorProfile, R: Radio, M: DeviceMemory>(
    controller: &mut SensorController<P, R, M>,
    target: &mut DeviceTarget,
    event: RadioEvent,
    auto_connect: bool,
    first_found: bool,
) {
    let was_powered = controller.radio_state() == RadioState::PoweredOn;
    let discovered = match &event {
        RadioEvent::Discovered(device) => Some(device.clone()),
        _ => None,
    };

    controller.handle_event(event);

    if !was_powered && controller.radio_state() == RadioState::PoweredOn {
        controller.start_scan(auto_connect);
        return;
    }

    if let Some(device) = discovered {
        // The controller may already be connecting on its own
        if controller.is_scanning()
            && controller.state() == &ConnectionState::Scanning
            && target.wants(&device, first_found)
        {
            info!(
                "Picking {} sensor {} ({})",
                P::SENSOR_TYPE,
                device.display_name(),
                device.id
            );
            controller.connect(&device.id);
        }
        return;
    }

    match controller.state() {
        ConnectionState::Streaming if target.device_id.is_none() => {
            // Stick with this one after a dropout
            target.device_id = controller.connected_device().map(|d| d.id.clone());
        }
        // A failed connect stays failed until something else asks again
        ConnectionState::Disconnected(DisconnectReason::LinkLost(_))
            if target.rescan_after_dropout
                && !target.rescan_pending
                && !controller.is_scanning() =>
        {
            debug!("{} link down, rescanning shortly", P::SENSOR_TYPE);
            target.rescan_pending = true;
        }
        _ => {}
    }
}

fn retry_scan<P: SensorProfile, R: Radio, M: DeviceMemory>(
    controller: &mut SensorController<P, R, M>,
    target: &mut DeviceTarget,
    auto_connect: bool,
) {
    if !target.rescan_pending {
        return;
    }
    target.rescan_pending = false;
    if controller.radio_state() == RadioState::PoweredOn && !controller.is_connected() {
        info!("Rescanning for {} sensor", P::SENSOR_TYPE);
        controller.start_scan(auto_connect);
    }
}
