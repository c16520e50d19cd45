//! Home Assistant MQTT discovery payloads
//!
//! One `switch` entity per outlet, one `sensor` entity per reading the device
//! actually reports and one `button` entity for reboot. Payloads depend on the
//! configuration and on the names and identity the device reports, never on
//! readings, so announcing the same entity twice produces byte-identical
//! messages. Renaming an outlet on the device changes its payload, and the
//! record then lets it be announced again.

use crate::config::DeviceConfig;
use crate::models::{DeviceStatus, SensorKind, OUTLET_COUNT};
use crate::topics::Topics;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceBlock {
    pub identifiers: Vec<String>,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<[String; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SwitchConfig {
    pub name: String,
    pub unique_id: String,
    pub object_id: String,
    pub state_topic: String,
    pub command_topic: String,
    pub payload_on: &'static str,
    pub payload_off: &'static str,
    pub state_on: &'static str,
    pub state_off: &'static str,
    pub availability_topic: String,
    pub json_attributes_topic: String,
    pub optimistic: bool,
    pub device: DeviceBlock,
}

#[derive(Debug, Clone, Serialize)]
pub struct SensorConfig {
    pub name: String,
    pub unique_id: String,
    pub object_id: String,
    pub state_topic: String,
    pub device_class: &'static str,
    pub unit_of_measurement: &'static str,
    pub state_class: &'static str,
    pub availability_topic: String,
    pub json_attributes_topic: String,
    pub device: DeviceBlock,
}

#[derive(Debug, Clone, Serialize)]
pub struct RebootConfig {
    pub name: String,
    pub unique_id: String,
    pub object_id: String,
    pub command_topic: String,
    pub payload_press: &'static str,
    pub device_class: &'static str,
    pub entity_category: &'static str,
    pub availability_topic: String,
    pub device: DeviceBlock,
}

/// Something that gets its own discovery message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Outlet(u8),
    Sensor(SensorKind),
    Reboot,
}

/// Ready-to-publish discovery message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub entity: Entity,
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Last payload announced per (device, entity) during this process lifetime.
#[derive(Debug, Default)]
pub struct DiscoveryRecord {
    announced: HashMap<(String, Entity), Vec<u8>>,
}

impl DiscoveryRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` when exactly this payload was already announced for the entity.
    pub fn is_current(&self, device: &str, entity: Entity, payload: &[u8]) -> bool {
        self.announced
            .get(&(device.to_string(), entity))
            .is_some_and(|sent| sent.as_slice() == payload)
    }

    /// Returns `true` when the entity was new or its payload changed.
    pub fn mark(&mut self, device: &str, entity: Entity, payload: &[u8]) -> bool {
        match self.announced.insert((device.to_string(), entity), payload.to_vec()) {
            Some(previous) => previous != payload,
            None => true,
        }
    }
}

fn device_block(cfg: &DeviceConfig, status: &DeviceStatus) -> DeviceBlock {
    let url = if cfg.host.starts_with("http://") || cfg.host.starts_with("https://") {
        cfg.host.clone()
    } else {
        format!("http://{}", cfg.host)
    };

    DeviceBlock {
        identifiers: vec![format!("pdu_{}", cfg.name)],
        name: format!("PDU {}", cfg.name),
        manufacturer: cfg.model.manufacturer().to_string(),
        model: status
            .info
            .model
            .clone()
            .unwrap_or_else(|| format!("{OUTLET_COUNT}-outlet PDU")),
        sw_version: status.info.firmware.clone(),
        connections: status
            .info
            .mac
            .iter()
            .map(|mac| ["mac".to_string(), mac.to_ascii_lowercase()])
            .collect(),
        configuration_url: Some(url),
    }
}

pub fn switch_config(topics: &Topics, cfg: &DeviceConfig, status: &DeviceStatus, outlet: u8) -> SwitchConfig {
    let id = format!("{}_outlet{}", cfg.name, outlet);
    SwitchConfig {
        name: format!("{} {}", cfg.name, status.outlet_label(outlet)),
        unique_id: id.clone(),
        object_id: id,
        state_topic: topics.outlet_state(&cfg.name, outlet),
        command_topic: topics.outlet_set(&cfg.name, outlet),
        payload_on: "ON",
        payload_off: "OFF",
        state_on: "ON",
        state_off: "OFF",
        availability_topic: topics.bridge_status(),
        json_attributes_topic: topics.device_attributes(&cfg.name),
        optimistic: false,
        device: device_block(cfg, status),
    }
}

pub fn sensor_config(topics: &Topics, cfg: &DeviceConfig, status: &DeviceStatus, kind: SensorKind) -> SensorConfig {
    let id = format!("{}_{}", cfg.name, kind.as_str());
    SensorConfig {
        name: format!("{} {}", cfg.name, kind.label()),
        unique_id: id.clone(),
        object_id: id,
        state_topic: topics.sensor(&cfg.name, kind),
        device_class: kind.as_str(),
        unit_of_measurement: kind.unit(),
        state_class: "measurement",
        availability_topic: topics.bridge_status(),
        json_attributes_topic: topics.device_attributes(&cfg.name),
        device: device_block(cfg, status),
    }
}

pub fn reboot_config(topics: &Topics, cfg: &DeviceConfig, status: &DeviceStatus) -> RebootConfig {
    let id = format!("{}_reboot", cfg.name);
    RebootConfig {
        name: format!("{} Reboot", cfg.name),
        unique_id: id.clone(),
        object_id: id,
        command_topic: topics.reboot(&cfg.name),
        payload_press: "REBOOT",
        device_class: "restart",
        entity_category: "config",
        availability_topic: topics.bridge_status(),
        device: device_block(cfg, status),
    }
}

/// Discovery messages for every outlet, every sensor present in `status` and
/// the reboot button.
pub fn announcements(
    topics: &Topics,
    cfg: &DeviceConfig,
    status: &DeviceStatus,
) -> Result<Vec<Announcement>, serde_json::Error> {
    let mut out = Vec::with_capacity(OUTLET_COUNT + SensorKind::ALL.len() + 1);

    for outlet in 1..=OUTLET_COUNT as u8 {
        out.push(Announcement {
            entity: Entity::Outlet(outlet),
            topic: topics.switch_config(&cfg.name, outlet),
            payload: serde_json::to_vec(&switch_config(topics, cfg, status, outlet))?,
        });
    }

    for kind in status.present_sensors() {
        out.push(Announcement {
            entity: Entity::Sensor(kind),
            topic: topics.sensor_config(&cfg.name, kind),
            payload: serde_json::to_vec(&sensor_config(topics, cfg, status, kind))?,
        });
    }

    out.push(Announcement {
        entity: Entity::Reboot,
        topic: topics.reboot_config(&cfg.name),
        payload: serde_json::to_vec(&reboot_config(topics, cfg, status))?,
    });

    Ok(out)
}
