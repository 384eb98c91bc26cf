pub mod controller;

use serde_derive::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;
use uuid::Uuid;

pub use controller::{AutoConnectPolicy, SensorController, SensorProfile};

/// Expands a 16-bit Bluetooth SIG assigned number into its full 128-bit UUID.
pub const fn sig_uuid(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_0080_5f9b_34fb)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    HeartRate,
    Power,
}

impl std::fmt::Display for SensorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorType::HeartRate => write!(f, "Heart Rate"),
            SensorType::Power => write!(f, "Power"),
        }
    }
}

/// Power state of the local Bluetooth radio, as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RadioState {
    #[default]
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl RadioState {
    pub fn status_message(&self) -> &'static str {
        match self {
            RadioState::Unknown => "Bluetooth state unknown",
            RadioState::Resetting => "Bluetooth resetting...",
            RadioState::Unsupported => "Bluetooth not supported",
            RadioState::Unauthorized => "Bluetooth permission denied",
            RadioState::PoweredOff => "Bluetooth is powered off",
            RadioState::PoweredOn => "Bluetooth ready",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called
    Requested,
    ConnectFailed(String),
    /// The link dropped without us asking, with the platform's error if it gave one
    LinkLost(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Scanning,
    Connecting,
    DiscoveringServices,
    DiscoveringCharacteristics,
    Streaming,
    Disconnected(DisconnectReason),
}

/// An advertiser seen during a scan.
///
/// `id` is only stable for the current OS session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub id: String,
    pub name: Option<String>,
}

impl DiscoveredDevice {
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
        }
    }
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("device")
    }
}

/// Requests a controller makes of its radio. Outcomes come back as [`RadioEvent`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCommand {
    StartScan {
        services: Vec<Uuid>,
    },
    StopScan,
    Connect {
        device_id: String,
    },
    CancelConnection {
        device_id: String,
    },
    DiscoverServices {
        device_id: String,
        services: Vec<Uuid>,
    },
    DiscoverCharacteristics {
        device_id: String,
        service: Uuid,
        characteristics: Vec<Uuid>,
    },
    Subscribe {
        device_id: String,
        characteristic: Uuid,
    },
}

/// Everything the radio stack can tell a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    StateChanged(RadioState),
    Discovered(DiscoveredDevice),
    Connected {
        device_id: String,
    },
    ConnectFailed {
        device_id: String,
        reason: Option<String>,
    },
    Disconnected {
        device_id: String,
        reason: Option<String>,
    },
    ServicesDiscovered {
        device_id: String,
        result: Result<Vec<Uuid>, String>,
    },
    CharacteristicsDiscovered {
        device_id: String,
        service: Uuid,
        result: Result<Vec<Uuid>, String>,
    },
    ValueUpdated {
        device_id: String,
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

/// The radio capability a controller drives. Requests are fire-and-forget.
pub trait Radio {
    fn request(&mut self, command: RadioCommand);
}

/// Hands requests to a radio actor running elsewhere.
impl Radio for UnboundedSender<RadioCommand> {
    fn request(&mut self, command: RadioCommand) {
        if let Err(e) = self.send(command) {
            warn!("Radio actor is gone, dropping {:?}", e.0);
        }
    }
}

/// Records requests in order, without talking to any hardware.
impl Radio for Vec<RadioCommand> {
    fn request(&mut self, command: RadioCommand) {
        self.push(command);
    }
}
