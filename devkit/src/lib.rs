/*!
# PDU Bridge DevKit - stubs and helpers for testing the bridge

- Recording MQTT client (no broker needed)
- Fake LogiLink PDU speaking the real HTTP protocol
- Status document builder and an assertion harness
*/

pub mod mqtt_stub;
pub mod fake_pdu;
pub mod test_utils;

pub use mqtt_stub::{MockMessage, MockMqttClient};
pub use fake_pdu::{FakeMode, FakePdu};
pub use test_utils::{StatusXml, TestHarness};
