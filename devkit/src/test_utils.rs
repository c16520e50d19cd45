/*!
Test helpers for the PDU bridge

- `StatusXml`: builds LogiLink status documents field by field
- `TestHarness`: a recording MQTT client with bus assertions
*/

use crate::mqtt_stub::MockMqttClient;
use serde_json::Value;
use std::time::Duration;
use anyhow::Result;

/// Builder for `/status.xml` documents
///
/// Only the fields that were set are emitted, so missing-field behaviour can
/// be tested by simply not setting them.
#[derive(Debug, Clone, Default)]
pub struct StatusXml {
    fields: Vec<(String, String)>,
}

impl StatusXml {
    pub fn new() -> Self {
        Self::default()
    }

    /// Document with all eight outlets set to `value`
    pub fn all_outlets(value: &str) -> Self {
        (0..8).fold(Self::new(), |doc, i| doc.outlet(i, value))
    }

    /// Sets `outletStat{index}` (0-based)
    pub fn outlet(self, index: usize, value: &str) -> Self {
        self.field(&format!("outletStat{}", index), value)
    }

    pub fn temperature(self, value: &str) -> Self {
        self.field("tempBan", value)
    }

    pub fn humidity(self, value: &str) -> Self {
        self.field("humBan", value)
    }

    pub fn current(self, value: &str) -> Self {
        self.field("curBan", value)
    }

    /// Arbitrary top-level field; replaces an earlier value of the same name
    pub fn field(mut self, name: &str, value: &str) -> Self {
        self.fields.retain(|(n, _)| n != name);
        self.fields.push((name.to_string(), value.to_string()));
        self
    }

    pub fn build(&self) -> String {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<response>\n");
        for (name, value) in &self.fields {
            xml.push_str(&format!("<{name}>{value}</{name}>\n"));
        }
        xml.push_str("</response>\n");
        xml
    }
}

/// Recording harness around [`MockMqttClient`]
pub struct TestHarness {
    pub mqtt_client: MockMqttClient,
}

impl TestHarness {
    pub fn new() -> Self {
        env_logger::builder().is_test(true).try_init().ok();

        Self {
            mqtt_client: MockMqttClient::new(),
        }
    }

    /// Polls until something was published on `topic`, or gives up after `timeout_ms`
    pub async fn wait_for_message(&self, topic: &str, timeout_ms: u64) -> Option<String> {
        let start = std::time::Instant::now();

        while start.elapsed() < Duration::from_millis(timeout_ms) {
            if let Some(payload) = self.mqtt_client.last_payload(topic) {
                return Some(payload);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        log::warn!("timeout waiting for message on {}", topic);
        None
    }

    /// Last payload on `topic` must equal `expected`, and must have been retained
    pub fn assert_retained(&self, topic: &str, expected: &str) -> Result<()> {
        let Some(last) = self.mqtt_client.find_messages_by_topic(topic).pop() else {
            anyhow::bail!("nothing published on {}", topic);
        };
        if last.payload_str() != expected {
            anyhow::bail!("{}: expected {:?}, got {:?}", topic, expected, last.payload_str());
        }
        if !last.retain {
            anyhow::bail!("{}: message was not retained", topic);
        }
        Ok(())
    }

    pub fn assert_nothing_published(&self, topic: &str) -> Result<()> {
        let count = self.mqtt_client.find_messages_by_topic(topic).len();
        if count > 0 {
            anyhow::bail!("expected no message on {}, found {}", topic, count);
        }
        Ok(())
    }

    /// Asserts a dotted JSON path in the last message of `topic`
    pub fn assert_field_equals(&self, topic: &str, field_path: &str, expected: &Value) -> Result<()> {
        if let Some(msg) = self.mqtt_client.get_last_json_message::<Value>(topic)? {
            if let Some(actual) = get_nested_field(&msg, field_path) {
                if actual == expected {
                    return Ok(());
                }
                anyhow::bail!("Field '{}' mismatch: expected {:?}, got {:?}", field_path, expected, actual);
            }
        }

        anyhow::bail!("Field '{}' not found for comparison in {}", field_path, topic);
    }

}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn get_nested_field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        match current {
            Value::Object(obj) => current = obj.get(part)?,
            _ => return None,
        }
    }
    Some(current)
}
