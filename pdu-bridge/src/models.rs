use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;

/// Every supported PDU exposes eight switchable outlets, numbered 1..=8.
pub const OUTLET_COUNT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutletState {
    On,
    Off,
    /// Never inferred as off: an unconfirmed state stays unknown.
    #[default]
    Unknown,
}

impl OutletState {
    /// Parses a device field value (`on`/`off`, any case). Anything else is unknown.
    pub fn from_device(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "on" => OutletState::On,
            "off" => OutletState::Off,
            _ => OutletState::Unknown,
        }
    }

    pub fn from_bool(on: bool) -> Self {
        if on {
            OutletState::On
        } else {
            OutletState::Off
        }
    }

    /// Bus payload for this state; `None` when there is nothing confirmed to publish.
    pub fn payload(&self) -> Option<&'static str> {
        match self {
            OutletState::On => Some("ON"),
            OutletState::Off => Some("OFF"),
            OutletState::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Online,
    /// Last fetch answered but the document was partial.
    Degraded,
    Error,
}

impl Health {
    pub fn as_str(&self) -> &'static str {
        match self {
            Health::Online => "online",
            Health::Degraded => "degraded",
            Health::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Temperature,
    Humidity,
    Current,
}

impl SensorKind {
    pub const ALL: [SensorKind; 3] = [SensorKind::Temperature, SensorKind::Humidity, SensorKind::Current];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
            SensorKind::Current => "current",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "Temperature",
            SensorKind::Humidity => "Humidity",
            SensorKind::Current => "Current",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "°C",
            SensorKind::Humidity => "%",
            SensorKind::Current => "A",
        }
    }
}

/// Identity a PDU reports in its status document. Blank fields stay `None`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<String>,
}

/// Status of one PDU as held by the fleet registry's cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub outlets: [OutletState; OUTLET_COUNT],
    /// Names configured on the device itself, by outlet index
    pub outlet_names: [Option<String>; OUTLET_COUNT],
    pub info: DeviceInfo,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub current: Option<f64>,
    pub health: Health,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_success: Option<OffsetDateTime>,
    pub consecutive_errors: u32,
}

impl DeviceStatus {
    /// Status of a device that has never answered: error health, all outlets unknown.
    pub fn never_seen() -> Self {
        Self {
            outlets: [OutletState::Unknown; OUTLET_COUNT],
            outlet_names: Default::default(),
            info: DeviceInfo::default(),
            temperature: None,
            humidity: None,
            current: None,
            health: Health::Error,
            last_success: None,
            consecutive_errors: 0,
        }
    }

    /// Outlet by its 1-based number.
    pub fn outlet(&self, number: u8) -> Option<OutletState> {
        let idx = usize::from(number).checked_sub(1)?;
        self.outlets.get(idx).copied()
    }

    /// Device-side outlet name, falling back to `Outlet {n}`.
    pub fn outlet_label(&self, number: u8) -> String {
        usize::from(number)
            .checked_sub(1)
            .and_then(|idx| self.outlet_names.get(idx).cloned().flatten())
            .unwrap_or_else(|| format!("Outlet {number}"))
    }

    pub fn sensor(&self, kind: SensorKind) -> Option<f64> {
        match kind {
            SensorKind::Temperature => self.temperature,
            SensorKind::Humidity => self.humidity,
            SensorKind::Current => self.current,
        }
    }

    /// Sensors that currently hold a reading, in a stable order.
    pub fn present_sensors(&self) -> Vec<SensorKind> {
        SensorKind::ALL
            .into_iter()
            .filter(|kind| self.sensor(*kind).is_some())
            .collect()
    }
}

/// Snapshot copy of the whole cache, keyed by device name.
pub type StatusMap = HashMap<String, DeviceStatus>;
