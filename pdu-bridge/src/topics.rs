//! Topic scheme
//!
//! Everything the bridge publishes or listens to lives under the configured
//! prefix (shown here as `pdu`):
//!
//! | topic                                   | payload              |
//! |-----------------------------------------|----------------------|
//! | `pdu/{device}/outlet{N}/state`          | `ON` / `OFF`         |
//! | `pdu/{device}/outlet{N}/set`            | command (subscribed) |
//! | `pdu/{device}/sensor/{kind}`            | numeric string       |
//! | `pdu/{device}/status`                   | device health        |
//! | `pdu/{device}/attributes`               | JSON                 |
//! | `pdu/{device}/system/reboot`            | command (subscribed) |
//! | `pdu/{device}/system/status`            | `REBOOTING`          |
//! | `pdu/bridge/status`                     | `online` / `offline` |
//! | `pdu/bridge/health`                     | JSON                 |
//!
//! `bridge` sits at the device level, so no device may be named that way.

use crate::error::PduError;
use crate::models::SensorKind;

/// Topic level holding the bridge's own topics.
pub const BRIDGE_SEGMENT: &str = "bridge";

#[derive(Debug, Clone)]
pub struct Topics {
    prefix: String,
    discovery_prefix: String,
}

/// Shape of an inbound topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicKind {
    OutletCommand { device: String, outlet: u8 },
    Reboot { device: String },
    Unrecognized,
}

impl Topics {
    pub fn new(prefix: &str, discovery_prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            discovery_prefix: discovery_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn outlet_state(&self, device: &str, outlet: u8) -> String {
        format!("{}/{}/outlet{}/state", self.prefix, device, outlet)
    }

    pub fn outlet_set(&self, device: &str, outlet: u8) -> String {
        format!("{}/{}/outlet{}/set", self.prefix, device, outlet)
    }

    pub fn sensor(&self, device: &str, kind: SensorKind) -> String {
        format!("{}/{}/sensor/{}", self.prefix, device, kind.as_str())
    }

    pub fn device_status(&self, device: &str) -> String {
        format!("{}/{}/status", self.prefix, device)
    }

    pub fn device_attributes(&self, device: &str) -> String {
        format!("{}/{}/attributes", self.prefix, device)
    }

    pub fn reboot(&self, device: &str) -> String {
        format!("{}/{}/system/reboot", self.prefix, device)
    }

    pub fn system_status(&self, device: &str) -> String {
        format!("{}/{}/system/status", self.prefix, device)
    }

    pub fn bridge_status(&self) -> String {
        format!("{}/{}/status", self.prefix, BRIDGE_SEGMENT)
    }

    pub fn bridge_health(&self) -> String {
        format!("{}/{}/health", self.prefix, BRIDGE_SEGMENT)
    }

    /// Single subscription covering every outlet command.
    pub fn command_filter(&self) -> String {
        format!("{}/+/+/set", self.prefix)
    }

    pub fn reboot_filter(&self) -> String {
        format!("{}/+/system/reboot", self.prefix)
    }

    pub fn switch_config(&self, device: &str, outlet: u8) -> String {
        format!("{}/switch/{}_outlet{}/config", self.discovery_prefix, device, outlet)
    }

    pub fn sensor_config(&self, device: &str, kind: SensorKind) -> String {
        format!("{}/sensor/{}_{}/config", self.discovery_prefix, device, kind.as_str())
    }

    pub fn reboot_config(&self, device: &str) -> String {
        format!("{}/button/{}_reboot/config", self.discovery_prefix, device)
    }

    pub fn classify(&self, topic: &str) -> TopicKind {
        let Some(rest) = topic
            .strip_prefix(self.prefix.as_str())
            .and_then(|r| r.strip_prefix('/'))
        else {
            return TopicKind::Unrecognized;
        };

        let parts: Vec<&str> = rest.split('/').collect();
        match parts.as_slice() {
            [device, outlet, "set"] if !device.is_empty() => outlet
                .strip_prefix("outlet")
                .filter(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
                .and_then(|n| n.parse::<u8>().ok())
                .map(|outlet| TopicKind::OutletCommand {
                    device: device.to_string(),
                    outlet,
                })
                .unwrap_or(TopicKind::Unrecognized),
            [device, "system", "reboot"] if !device.is_empty() => TopicKind::Reboot {
                device: device.to_string(),
            },
            _ => TopicKind::Unrecognized,
        }
    }
}

/// Reboot requests must say so explicitly: `REBOOT`, any case.
pub fn parse_reboot_payload(payload: &[u8]) -> Result<(), PduError> {
    match std::str::from_utf8(payload).map(str::trim) {
        Ok(text) if text.eq_ignore_ascii_case("reboot") => Ok(()),
        _ => Err(PduError::InvalidArgument("reboot payload must be REBOOT".into())),
    }
}

/// Normalizes a switch command payload: `on`/`off`, `1`/`0`, `true`/`false`,
/// any case, surrounding whitespace ignored.
pub fn parse_switch_payload(payload: &[u8]) -> Result<bool, PduError> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| PduError::InvalidArgument("command payload is not UTF-8".into()))?;

    match text.trim().to_ascii_lowercase().as_str() {
        "on" | "1" | "true" => Ok(true),
        "off" | "0" | "false" => Ok(false),
        other => Err(PduError::InvalidArgument(format!("unsupported command payload {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics() -> Topics {
        Topics::new("pdu", "homeassistant")
    }

    #[test]
    fn test_topic_names() {
        let t = topics();
        assert_eq!(t.outlet_state("rack1", 3), "pdu/rack1/outlet3/state");
        assert_eq!(t.outlet_set("rack1", 3), "pdu/rack1/outlet3/set");
        assert_eq!(t.sensor("rack1", SensorKind::Humidity), "pdu/rack1/sensor/humidity");
        assert_eq!(t.device_status("rack1"), "pdu/rack1/status");
        assert_eq!(t.bridge_status(), "pdu/bridge/status");
        assert_eq!(t.command_filter(), "pdu/+/+/set");
        assert_eq!(t.reboot("rack1"), "pdu/rack1/system/reboot");
        assert_eq!(t.reboot_filter(), "pdu/+/system/reboot");
        assert_eq!(t.reboot_config("rack1"), "homeassistant/button/rack1_reboot/config");
        assert_eq!(t.switch_config("rack1", 8), "homeassistant/switch/rack1_outlet8/config");
        assert_eq!(
            t.sensor_config("rack1", SensorKind::Temperature),
            "homeassistant/sensor/rack1_temperature/config"
        );
    }

    #[test]
    fn test_classify_outlet_command() {
        assert_eq!(
            topics().classify("pdu/rack1/outlet3/set"),
            TopicKind::OutletCommand { device: "rack1".into(), outlet: 3 }
        );
        // range is checked later, the shape is still a command
        assert_eq!(
            topics().classify("pdu/rack1/outlet12/set"),
            TopicKind::OutletCommand { device: "rack1".into(), outlet: 12 }
        );
    }

    #[test]
    fn test_classify_reboot() {
        assert_eq!(
            topics().classify("pdu/rack1/system/reboot"),
            TopicKind::Reboot { device: "rack1".into() }
        );
        assert_eq!(topics().classify("pdu/rack1/system/status"), TopicKind::Unrecognized);
        assert_eq!(topics().classify("pdu//system/reboot"), TopicKind::Unrecognized);
    }

    #[test]
    fn test_reboot_payload() {
        assert!(parse_reboot_payload(b"REBOOT").is_ok());
        assert!(parse_reboot_payload(b" reboot\n").is_ok());
        for p in ["ON", "", "1", "yes"] {
            assert!(matches!(parse_reboot_payload(p.as_bytes()), Err(PduError::InvalidArgument(_))), "{p}");
        }
    }

    #[test]
    fn test_classify_unrecognized() {
        let t = topics();
        for topic in [
            "pdu/rack1/outlet3/state",
            "pdu/rack1/outletX/set",
            "pdu/rack1/outlet/set",
            "pdu/rack1/outlet-1/set",
            "pdu/rack1/outlet999/set",
            "pdu//outlet1/set",
            "other/rack1/outlet1/set",
            "pdux/rack1/outlet1/set",
            "pdu/rack1/sub/outlet1/set",
            "pdu/bridge/status",
        ] {
            assert_eq!(t.classify(topic), TopicKind::Unrecognized, "{topic}");
        }
    }

    #[test]
    fn test_multi_level_prefix() {
        let t = Topics::new("site/a/pdu/", "ha");
        assert_eq!(t.outlet_state("r", 1), "site/a/pdu/r/outlet1/state");
        assert_eq!(
            t.classify("site/a/pdu/r/outlet1/set"),
            TopicKind::OutletCommand { device: "r".into(), outlet: 1 }
        );
    }

    #[test]
    fn test_switch_payloads() {
        for p in ["ON", "on", " On ", "1", "true", "TRUE"] {
            assert_eq!(parse_switch_payload(p.as_bytes()), Ok(true), "{p}");
        }
        for p in ["OFF", "off", "0", "false", "False\n"] {
            assert_eq!(parse_switch_payload(p.as_bytes()), Ok(false), "{p}");
        }
        for p in ["maybe", "", "2", "toggle", "ONN"] {
            assert!(matches!(parse_switch_payload(p.as_bytes()), Err(PduError::InvalidArgument(_))), "{p}");
        }
        assert!(parse_switch_payload(&[0xff, 0xfe]).is_err());
    }
}
