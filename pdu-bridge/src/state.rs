use crate::models::DeviceStatus;
use parking_lot::Mutex;
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// One cache entry per configured device.
///
/// `status` is only ever locked for synchronous reads/writes. `io_gate` is held
/// across a device round-trip plus the cache write that follows it, so a poll
/// and a command on the same PDU are serialized while different PDUs never wait
/// on each other.
#[derive(Debug)]
pub struct DeviceSlot {
    pub status: Shared<DeviceStatus>,
    pub io_gate: tokio::sync::Mutex<()>,
}

impl DeviceSlot {
    pub fn new() -> Self {
        Self {
            status: new_state(DeviceStatus::never_seen()),
            io_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> DeviceStatus {
        self.status.lock().clone()
    }
}

impl Default for DeviceSlot {
    fn default() -> Self {
        Self::new()
    }
}
