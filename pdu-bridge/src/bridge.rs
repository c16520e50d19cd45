//! Bridge protocol layer
//!
//! Turns the registry's cache into retained bus messages and inbound command
//! messages into registry calls. The bridge only ever reads snapshots; every
//! cache write goes through [`FleetRegistry`].

use crate::config::BridgeConfig;
use crate::discovery::{announcements, DiscoveryRecord};
use crate::driver::check_outlet;
use crate::error::{BusError, PduError};
use crate::fleet::FleetRegistry;
use crate::health::HealthTracker;
use crate::models::{DeviceInfo, DeviceStatus, Health, OutletState, OUTLET_COUNT};
use crate::mqtt::{BusEvent, SharedBus};
use crate::shutdown::Shutdown;
use crate::topics::{parse_reboot_payload, parse_switch_payload, TopicKind, Topics};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Result of handling one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// Not a topic the bridge acts on
    Ignored,
    /// Refused before any device I/O
    Rejected(PduError),
    /// The device call failed; nothing was published
    Failed(PduError),
    /// The device accepted the command and the state was confirmed on the bus
    Applied { device: String, outlet: u8, on: bool },
    /// The device accepted a reboot request
    Rebooting { device: String },
}

/// Payload of `{prefix}/{device}/attributes`.
#[derive(Debug, Serialize)]
pub struct DeviceAttributes {
    pub health: Health,
    pub consecutive_errors: u32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_success: Option<OffsetDateTime>,
    pub active: bool,
    #[serde(flatten)]
    pub info: DeviceInfo,
}

pub struct Bridge {
    bus: SharedBus,
    registry: Arc<FleetRegistry>,
    topics: Topics,
    retain: bool,
    discovery: bool,
    record: Mutex<DiscoveryRecord>,
    health: HealthTracker,
}

impl Bridge {
    pub fn new(bus: SharedBus, registry: Arc<FleetRegistry>, cfg: &BridgeConfig, health: HealthTracker) -> Self {
        Self {
            bus,
            registry,
            topics: Topics::new(&cfg.mqtt.topic_prefix, &cfg.mqtt.discovery_prefix),
            retain: cfg.mqtt.retain,
            discovery: cfg.bridge.discovery,
            record: Mutex::new(DiscoveryRecord::new()),
            health,
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Runs on every ConnAck: the broker may have lost our session.
    pub async fn on_connected(&self) -> Result<(), BusError> {
        for filter in [self.topics.command_filter(), self.topics.reboot_filter()] {
            self.bus.subscribe(&filter).await?;
            info!("listening for commands on {}", filter);
        }

        self.bus
            .publish(&self.topics.bridge_status(), b"online".to_vec(), true)
            .await?;

        let sent = self.announce(true).await?;
        if sent > 0 {
            info!("published {} discovery messages", sent);
        }
        Ok(())
    }

    /// Publishes discovery for every active device. Without `force` only
    /// entities missing from the record, or whose payload changed, are sent.
    /// Returns how many were sent.
    pub async fn announce(&self, force: bool) -> Result<usize, BusError> {
        if !self.discovery {
            return Ok(0);
        }

        let mut sent = 0;
        for name in self.registry.active_devices() {
            let (Some(cfg), Some(status)) = (self.registry.config(&name), self.registry.status(&name)) else {
                continue;
            };

            for a in announcements(&self.topics, cfg, &status)? {
                if !force && self.record.lock().is_current(&name, a.entity, &a.payload) {
                    continue;
                }
                // discovery is always retained, whatever the state retain flag says
                self.bus.publish(&a.topic, a.payload.clone(), true).await?;
                self.record.lock().mark(&name, a.entity, &a.payload);
                sent += 1;
            }
        }
        Ok(sent)
    }

    pub async fn handle_event(&self, event: BusEvent) -> CommandOutcome {
        match event {
            BusEvent::Connected => {
                if let Err(e) = self.on_connected().await {
                    error!("failed to set up bus session: {}", e);
                }
                CommandOutcome::Ignored
            }
            BusEvent::Message { topic, payload } => self.handle_message(&topic, &payload).await,
        }
    }

    pub async fn handle_message(&self, topic: &str, payload: &[u8]) -> CommandOutcome {
        match self.topics.classify(topic) {
            TopicKind::OutletCommand { device, outlet } => self.switch_outlet(topic, device, outlet, payload).await,
            TopicKind::Reboot { device } => self.reboot_device(topic, device, payload).await,
            TopicKind::Unrecognized => {
                debug!("ignoring message on {}", topic);
                CommandOutcome::Ignored
            }
        }
    }

    async fn switch_outlet(&self, topic: &str, device: String, outlet: u8, payload: &[u8]) -> CommandOutcome {
        let on = match parse_switch_payload(payload) {
            Ok(on) => on,
            Err(e) => return rejected(topic, e),
        };
        if let Err(e) = check_outlet(outlet) {
            return rejected(topic, e);
        }
        if !self.registry.is_active(&device) {
            return rejected(topic, PduError::UnknownDevice(device));
        }

        info!("command {}/outlet{} -> {}", device, outlet, if on { "ON" } else { "OFF" });

        if let Err(e) = self.registry.set_outlet(&device, outlet, on).await {
            error!("command {}/outlet{} failed: {}", device, outlet, e);
            return CommandOutcome::Failed(e);
        }

        // confirm what this command did, not whatever a poll may have cached since
        let payload = OutletState::from_bool(on).payload().unwrap_or_default();
        let state_topic = self.topics.outlet_state(&device, outlet);
        if let Err(e) = self.bus.publish(&state_topic, payload.as_bytes().to_vec(), self.retain).await {
            error!("failed to confirm {}: {}", state_topic, e);
        }

        CommandOutcome::Applied { device, outlet, on }
    }

    async fn reboot_device(&self, topic: &str, device: String, payload: &[u8]) -> CommandOutcome {
        if let Err(e) = parse_reboot_payload(payload) {
            return rejected(topic, e);
        }
        if !self.registry.is_active(&device) {
            return rejected(topic, PduError::UnknownDevice(device));
        }

        info!("reboot requested for {}", device);

        if let Err(e) = self.registry.reboot(&device).await {
            error!("reboot of {} failed: {}", device, e);
            return CommandOutcome::Failed(e);
        }

        let status_topic = self.topics.system_status(&device);
        if let Err(e) = self.bus.publish(&status_topic, b"REBOOTING".to_vec(), false).await {
            error!("failed to publish {}: {}", status_topic, e);
        }

        CommandOutcome::Rebooting { device }
    }

    /// Publishes the whole cache: outlet states, sensors, device health and
    /// attributes, then the bridge health. Late sensors get discovery first.
    pub async fn publish_snapshot(&self) -> Result<(), BusError> {
        self.announce(false).await?;

        let snapshot = self.registry.snapshot();
        for cfg in self.registry.configs() {
            if let Some(status) = snapshot.get(&cfg.name) {
                self.publish_device(&cfg.name, status).await?;
            }
        }

        let report = self
            .health
            .report(self.registry.configs().len(), self.registry.active_devices().len());
        self.bus
            .publish(&self.topics.bridge_health(), serde_json::to_vec(&report)?, false)
            .await?;

        debug!("published snapshot of {} PDUs", snapshot.len());
        Ok(())
    }

    async fn publish_device(&self, name: &str, status: &DeviceStatus) -> Result<(), BusError> {
        for outlet in 1..=OUTLET_COUNT as u8 {
            // unknown is never published as off
            if let Some(payload) = status.outlet(outlet).and_then(|s| s.payload()) {
                self.bus
                    .publish(&self.topics.outlet_state(name, outlet), payload.as_bytes().to_vec(), self.retain)
                    .await?;
            }
        }

        for kind in status.present_sensors() {
            if let Some(value) = status.sensor(kind) {
                self.bus
                    .publish(&self.topics.sensor(name, kind), value.to_string().into_bytes(), self.retain)
                    .await?;
            }
        }

        self.bus
            .publish(
                &self.topics.device_status(name),
                status.health.as_str().as_bytes().to_vec(),
                self.retain,
            )
            .await?;

        let attrs = DeviceAttributes {
            health: status.health,
            consecutive_errors: status.consecutive_errors,
            last_success: status.last_success,
            active: self.registry.is_active(name),
            info: status.info.clone(),
        };
        self.bus
            .publish(&self.topics.device_attributes(name), serde_json::to_vec(&attrs)?, self.retain)
            .await
    }

    /// Marks the bridge offline and closes the bus connection.
    pub async fn go_offline(&self) -> Result<(), BusError> {
        self.bus
            .publish(&self.topics.bridge_status(), b"offline".to_vec(), true)
            .await?;
        self.bus.disconnect().await
    }
}

fn rejected(topic: &str, e: PduError) -> CommandOutcome {
    warn!("rejected command on {}: {}", topic, e);
    CommandOutcome::Rejected(e)
}

/// Publishes a snapshot every `period` until shutdown. A publish in progress
/// always completes.
pub fn spawn_publish_loop(bridge: Arc<Bridge>, period: Duration, mut shutdown: Shutdown) -> JoinHandle<()> {
    task::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = bridge.publish_snapshot().await {
                error!("snapshot publish failed: {}", e);
            }
        }
        debug!("publish loop stopped");
    })
}

/// Handles bus events until shutdown. Each command runs in its own task so a
/// slow PDU never holds up commands for the others. On shutdown every running
/// command is awaited until its device call resolved; none is cancelled.
/// `warn_after` only sets how often a drain that takes long is logged.
pub fn spawn_dispatcher(
    bridge: Arc<Bridge>,
    mut events: mpsc::Receiver<BusEvent>,
    mut shutdown: Shutdown,
    warn_after: Duration,
) -> JoinHandle<()> {
    task::spawn(async move {
        let mut inflight = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                Some(_) = inflight.join_next(), if !inflight.is_empty() => {}
                event = events.recv() => match event {
                    Some(event) => {
                        let bridge = bridge.clone();
                        inflight.spawn(async move { bridge.handle_event(event).await });
                    }
                    None => break,
                },
            }
        }

        if !inflight.is_empty() {
            info!("waiting for {} in-flight commands", inflight.len());
        }
        while !inflight.is_empty() {
            if tokio::time::timeout(warn_after, inflight.join_next()).await.is_err() {
                warn!(
                    "{} commands still waiting on their device after {:?}",
                    inflight.len(),
                    warn_after
                );
            }
        }
        debug!("dispatcher stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::tests::{all, online, registry, ScriptedDriver};
    use crate::shutdown;
    use pdu_bridge_devkit::{MockMqttClient, TestHarness};
    use serde_json::Value;
    use std::sync::atomic::Ordering;

    struct Fixture {
        harness: TestHarness,
        bridge: Arc<Bridge>,
        rack1: Arc<ScriptedDriver>,
        registry: Arc<FleetRegistry>,
    }

    fn rack1_driver() -> ScriptedDriver {
        let mut outlets = all(OutletState::Off);
        outlets[0] = OutletState::On;
        ScriptedDriver::answering(online(outlets))
    }

    async fn fixture() -> Fixture {
        fixture_with(rack1_driver()).await
    }

    /// rack1 answers through `rack1`; rack2 failed registration and is inactive
    async fn fixture_with(rack1: ScriptedDriver) -> Fixture {
        let rack1 = Arc::new(rack1);
        let rack2 = Arc::new(ScriptedDriver::answering(online(all(OutletState::On))).unreachable());
        let registry = Arc::new(registry(vec![("rack1", rack1.clone()), ("rack2", rack2)]).await);

        let harness = TestHarness::new();
        let bridge = Arc::new(Bridge::new(
            Arc::new(harness.mqtt_client.clone()),
            registry.clone(),
            &BridgeConfig::default(),
            HealthTracker::new(),
        ));
        Fixture { harness, bridge, rack1, registry }
    }

    fn mock(f: &Fixture) -> &MockMqttClient {
        &f.harness.mqtt_client
    }

    #[tokio::test]
    async fn test_command_on_publishes_retained_confirmation() {
        let f = fixture().await;
        let outcome = f.bridge.handle_message("pdu/rack1/outlet3/set", b"ON").await;

        assert_eq!(outcome, CommandOutcome::Applied { device: "rack1".into(), outlet: 3, on: true });
        assert_eq!(*f.rack1.sent.lock(), vec![(3, true)]);
        f.harness.assert_retained("pdu/rack1/outlet3/state", "ON").unwrap();
    }

    #[tokio::test]
    async fn test_confirmation_reflects_the_command_not_the_refresh() {
        let f = fixture().await;
        // device refresh still reports outlet 2 as off
        let outcome = f.bridge.handle_message("pdu/rack1/outlet2/set", b"true").await;
        assert!(matches!(outcome, CommandOutcome::Applied { on: true, .. }));
        assert_eq!(mock(&f).last_payload("pdu/rack1/outlet2/state").as_deref(), Some("ON"));
    }

    #[tokio::test]
    async fn test_invalid_payload_is_rejected_without_io() {
        let f = fixture().await;
        let outcome = f.bridge.handle_message("pdu/rack1/outlet3/set", b"maybe").await;

        assert!(matches!(outcome, CommandOutcome::Rejected(PduError::InvalidArgument(_))));
        assert!(f.rack1.sent.lock().is_empty());
        assert_eq!(f.rack1.fetch_calls.load(Ordering::SeqCst), 0);
        assert!(mock(&f).get_published_messages().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_outlet_is_rejected() {
        let f = fixture().await;
        for topic in ["pdu/rack1/outlet0/set", "pdu/rack1/outlet9/set"] {
            let outcome = f.bridge.handle_message(topic, b"ON").await;
            assert!(matches!(outcome, CommandOutcome::Rejected(PduError::InvalidArgument(_))));
        }
        assert!(f.rack1.sent.lock().is_empty());
        assert!(mock(&f).get_published_messages().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_and_inactive_devices_are_rejected() {
        let f = fixture().await;
        for topic in ["pdu/rack9/outlet1/set", "pdu/rack2/outlet1/set"] {
            let outcome = f.bridge.handle_message(topic, b"OFF").await;
            assert!(matches!(outcome, CommandOutcome::Rejected(PduError::UnknownDevice(_))), "{topic}");
        }
        assert!(mock(&f).get_published_messages().is_empty());
    }

    #[tokio::test]
    async fn test_failed_command_publishes_nothing() {
        let f = fixture().await;
        f.rack1.script_command(Err(PduError::AuthFailure));

        let outcome = f.bridge.handle_message("pdu/rack1/outlet1/set", b"off").await;
        assert_eq!(outcome, CommandOutcome::Failed(PduError::AuthFailure));
        f.harness.assert_nothing_published("pdu/rack1/outlet1/state").unwrap();
    }

    #[tokio::test]
    async fn test_unrecognized_topic_is_ignored() {
        let f = fixture().await;
        let outcome = f.bridge.handle_message("pdu/rack1/outlet1/state", b"ON").await;
        assert_eq!(outcome, CommandOutcome::Ignored);
        assert!(f.rack1.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_on_connected_subscribes_and_announces() {
        let f = fixture().await;
        f.registry.poll_all().await;
        f.bridge.on_connected().await.unwrap();

        assert_eq!(
            mock(&f).get_subscriptions(),
            vec!["pdu/+/+/set".to_string(), "pdu/+/system/reboot".to_string()]
        );
        f.harness.assert_retained("pdu/bridge/status", "online").unwrap();

        let configs = mock(&f).topics_with_prefix("homeassistant/");
        // 8 outlets + 3 sensors + reboot for rack1, nothing for the inactive rack2
        assert_eq!(configs.len(), 12);
        assert!(configs.contains(&"homeassistant/button/rack1_reboot/config".to_string()));
        assert!(configs.iter().all(|t| t.contains("rack1_")));

        f.harness
            .assert_field_equals(
                "homeassistant/switch/rack1_outlet1/config",
                "command_topic",
                &Value::String("pdu/rack1/outlet1/set".into()),
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_discovery_is_idempotent() {
        let f = fixture().await;
        f.registry.poll_all().await;
        f.bridge.on_connected().await.unwrap();
        let first = mock(&f).find_messages_by_topic("homeassistant/sensor/rack1_current/config");

        // reconnect: everything re-sent, byte for byte
        f.bridge.on_connected().await.unwrap();
        let again = mock(&f).find_messages_by_topic("homeassistant/sensor/rack1_current/config");
        assert_eq!(again.len(), 2);
        assert_eq!(first[0].payload, again[1].payload);
        assert!(again[1].retain);

        // regular snapshot: nothing new to announce
        assert_eq!(f.bridge.announce(false).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_late_sensor_is_announced_before_its_first_reading() {
        let f = fixture().await;
        let mut no_sensors = online(all(OutletState::Off));
        no_sensors.temperature = None;
        no_sensors.humidity = None;
        no_sensors.current = None;
        *f.rack1.fallback.lock() = Ok(no_sensors.clone());
        f.registry.poll_all().await;
        f.bridge.on_connected().await.unwrap();
        assert!(mock(&f).topics_with_prefix("homeassistant/sensor/").is_empty());

        let mut with_temp = no_sensors;
        with_temp.temperature = Some(24.0);
        *f.rack1.fallback.lock() = Ok(with_temp);
        f.registry.poll_all().await;
        mock(&f).clear();
        f.bridge.publish_snapshot().await.unwrap();

        let published: Vec<String> = mock(&f).get_published_messages().into_iter().map(|m| m.topic).collect();
        let discovery = published
            .iter()
            .position(|t| t == "homeassistant/sensor/rack1_temperature/config")
            .unwrap();
        let reading = published.iter().position(|t| t == "pdu/rack1/sensor/temperature").unwrap();
        assert!(discovery < reading);
        assert_eq!(mock(&f).last_payload("pdu/rack1/sensor/temperature").as_deref(), Some("24"));
    }

    #[tokio::test]
    async fn test_snapshot_publishes_cache_contents() {
        let f = fixture().await;
        f.registry.poll_all().await;
        f.bridge.publish_snapshot().await.unwrap();

        f.harness.assert_retained("pdu/rack1/outlet1/state", "ON").unwrap();
        f.harness.assert_retained("pdu/rack1/outlet2/state", "OFF").unwrap();
        f.harness.assert_retained("pdu/rack1/sensor/temperature", "22").unwrap();
        f.harness.assert_retained("pdu/rack1/sensor/current", "0.8").unwrap();
        f.harness.assert_retained("pdu/rack1/status", "online").unwrap();
        f.harness
            .assert_field_equals("pdu/rack1/attributes", "active", &Value::Bool(true))
            .unwrap();

        // never reached: health published, outlets stay unannounced unknowns
        f.harness.assert_retained("pdu/rack2/status", "error").unwrap();
        f.harness.assert_nothing_published("pdu/rack2/outlet1/state").unwrap();
        f.harness
            .assert_field_equals("pdu/rack2/attributes", "active", &Value::Bool(false))
            .unwrap();

        f.harness
            .assert_field_equals("pdu/bridge/health", "devices_configured", &serde_json::json!(2))
            .unwrap();
        f.harness
            .assert_field_equals("pdu/bridge/health", "devices_active", &serde_json::json!(1))
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_publishing_last_good_state() {
        let f = fixture().await;
        f.registry.poll_all().await;

        *f.rack1.fallback.lock() = Err(PduError::Timeout(Duration::from_secs(1)));
        f.registry.poll_all().await;
        mock(&f).clear();
        f.bridge.publish_snapshot().await.unwrap();

        f.harness.assert_retained("pdu/rack1/outlet1/state", "ON").unwrap();
        f.harness.assert_retained("pdu/rack1/status", "error").unwrap();
        f.harness
            .assert_field_equals("pdu/rack1/attributes", "consecutive_errors", &serde_json::json!(1))
            .unwrap();
    }

    #[tokio::test]
    async fn test_go_offline_publishes_then_disconnects() {
        let f = fixture().await;
        f.bridge.go_offline().await.unwrap();
        f.harness.assert_retained("pdu/bridge/status", "offline").unwrap();
        assert!(mock(&f).is_disconnected());
    }

    #[tokio::test]
    async fn test_dispatcher_handles_events_and_drains_on_shutdown() {
        let f = fixture().await;
        let (tx, rx) = mpsc::channel(8);
        let (stop, signal) = shutdown::channel();
        let handle = spawn_dispatcher(f.bridge.clone(), rx, signal, Duration::from_secs(2));

        tx.send(BusEvent::Connected).await.unwrap();
        tx.send(BusEvent::Message {
            topic: "pdu/rack1/outlet5/set".into(),
            payload: b"1".to_vec(),
        })
        .await
        .unwrap();

        let confirmed = f.harness.wait_for_message("pdu/rack1/outlet5/state", 1000).await;
        assert_eq!(confirmed.as_deref(), Some("ON"));
        assert_eq!(mock(&f).get_subscriptions().len(), 2);

        stop.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(3), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_publish_loop_stops_on_shutdown() {
        let f = fixture().await;
        let (stop, signal) = shutdown::channel();
        let handle = spawn_publish_loop(f.bridge.clone(), Duration::from_millis(20), signal);

        assert!(f.harness.wait_for_message("pdu/bridge/health", 1000).await.is_some());
        stop.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_a_slow_command() {
        let f = fixture_with(rack1_driver().with_command_delay(Duration::from_millis(400))).await;
        let (tx, rx) = mpsc::channel(8);
        let (stop, signal) = shutdown::channel();
        // far shorter than the device call
        let handle = spawn_dispatcher(f.bridge.clone(), rx, signal, Duration::from_millis(50));

        tx.send(BusEvent::Message {
            topic: "pdu/rack1/outlet5/set".into(),
            payload: b"ON".to_vec(),
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(f.rack1.sent.lock().is_empty());

        stop.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(3), handle).await.unwrap().unwrap();

        assert_eq!(*f.rack1.sent.lock(), vec![(5, true)]);
        assert_eq!(mock(&f).last_payload("pdu/rack1/outlet5/state").as_deref(), Some("ON"));
    }

    #[tokio::test]
    async fn test_bridge_status_is_not_overwritten_by_device_health() {
        let f = fixture().await;
        f.registry.poll_all().await;
        f.bridge.on_connected().await.unwrap();
        f.bridge.publish_snapshot().await.unwrap();

        // rack2 is in error, the availability topic must still say online
        f.harness.assert_retained("pdu/rack2/status", "error").unwrap();
        f.harness.assert_retained("pdu/bridge/status", "online").unwrap();
    }

    #[tokio::test]
    async fn test_reboot_command_reaches_the_device() {
        let f = fixture().await;
        let outcome = f.bridge.handle_message("pdu/rack1/system/reboot", b"reboot").await;

        assert_eq!(outcome, CommandOutcome::Rebooting { device: "rack1".into() });
        assert_eq!(f.rack1.reboots.load(Ordering::SeqCst), 1);
        let status = mock(&f).find_messages_by_topic("pdu/rack1/system/status");
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].payload_str(), "REBOOTING");
        assert!(!status[0].retain);
    }

    #[tokio::test]
    async fn test_reboot_needs_explicit_payload_and_active_device() {
        let f = fixture().await;
        let outcome = f.bridge.handle_message("pdu/rack1/system/reboot", b"ON").await;
        assert!(matches!(outcome, CommandOutcome::Rejected(PduError::InvalidArgument(_))));

        let outcome = f.bridge.handle_message("pdu/rack2/system/reboot", b"REBOOT").await;
        assert!(matches!(outcome, CommandOutcome::Rejected(PduError::UnknownDevice(_))));

        assert_eq!(f.rack1.reboots.load(Ordering::SeqCst), 0);
        assert!(mock(&f).get_published_messages().is_empty());
    }

    #[tokio::test]
    async fn test_failed_reboot_publishes_nothing() {
        let f = fixture().await;
        f.rack1.script_command(Err(PduError::AuthFailure));

        let outcome = f.bridge.handle_message("pdu/rack1/system/reboot", b"REBOOT").await;
        assert_eq!(outcome, CommandOutcome::Failed(PduError::AuthFailure));
        f.harness.assert_nothing_published("pdu/rack1/system/status").unwrap();
    }

    #[tokio::test]
    async fn test_renamed_outlet_is_announced_again() {
        let f = fixture().await;
        f.registry.poll_all().await;
        f.bridge.on_connected().await.unwrap();
        f.harness
            .assert_field_equals(
                "homeassistant/switch/rack1_outlet2/config",
                "name",
                &Value::String("rack1 Outlet 2".into()),
            )
            .unwrap();

        let mut renamed = online(all(OutletState::Off));
        renamed.outlet_names[1] = Some("Router".into());
        *f.rack1.fallback.lock() = Ok(renamed);
        f.registry.poll_all().await;
        mock(&f).clear();

        // only the renamed outlet changed
        assert_eq!(f.bridge.announce(false).await.unwrap(), 1);
        f.harness
            .assert_field_equals(
                "homeassistant/switch/rack1_outlet2/config",
                "name",
                &Value::String("rack1 Router".into()),
            )
            .unwrap();
        assert_eq!(f.bridge.announce(false).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_attributes_carry_device_identity() {
        let mut status = online(all(OutletState::On));
        status.info.model = Some("PDU8P01".into());
        status.info.uptime = Some("12d 3h".into());
        let f = fixture_with(ScriptedDriver::answering(status)).await;
        f.registry.poll_all().await;
        f.bridge.publish_snapshot().await.unwrap();

        f.harness
            .assert_field_equals("pdu/rack1/attributes", "model", &Value::String("PDU8P01".into()))
            .unwrap();
        f.harness
            .assert_field_equals("pdu/rack1/attributes", "uptime", &Value::String("12d 3h".into()))
            .unwrap();
        assert!(f.harness.assert_field_equals("pdu/rack1/attributes", "mac", &Value::Null).is_err());
    }
}
