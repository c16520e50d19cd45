use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Payload of `{prefix}/bridge/health`.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct BridgeHealth {
    pub uptime_seconds: u64,
    pub devices_configured: u32,
    pub devices_active: u32,
    pub memory_usage_mb: f32,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<parking_lot::Mutex<String>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            mqtt_status: Arc::new(parking_lot::Mutex::new("connecting".to_string())),
        }
    }

    pub fn mark_bus_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn mark_bus_disconnected(&self) {
        *self.mqtt_status.lock() = "disconnected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn bus_status(&self) -> String {
        self.mqtt_status.lock().clone()
    }

    pub fn report(&self, configured: usize, active: usize) -> BridgeHealth {
        BridgeHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            devices_configured: configured as u32,
            devices_active: active as u32,
            memory_usage_mb: get_memory_usage_mb(),
            mqtt_status: self.bus_status(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Resident set size from /proc; 0 where that is not available.
fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let kb = status
                .lines()
                .find(|l| l.starts_with("VmRSS:"))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|v| v.parse::<u64>().ok());
            if let Some(kb) = kb {
                return kb as f32 / 1024.0;
            }
        }
    }

    0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_status_transitions() {
        let tracker = HealthTracker::new();
        assert_eq!(tracker.bus_status(), "connecting");

        tracker.mark_bus_connected();
        assert_eq!(tracker.bus_status(), "connected");

        tracker.increment_reconnects();
        tracker.increment_reconnects();
        let report = tracker.report(3, 2);
        assert_eq!(report.mqtt_status, "reconnecting");
        assert_eq!(report.mqtt_reconnects, 2);
        assert_eq!(report.devices_configured, 3);
        assert_eq!(report.devices_active, 2);

        tracker.mark_bus_disconnected();
        assert_eq!(tracker.bus_status(), "disconnected");
    }

    #[test]
    fn test_clones_share_counters() {
        let tracker = HealthTracker::new();
        let clone = tracker.clone();
        clone.increment_reconnects();
        assert_eq!(tracker.report(0, 0).mqtt_reconnects, 1);
    }
}
