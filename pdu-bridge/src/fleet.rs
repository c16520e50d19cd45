//! Fleet registry & poller
//!
//! Owns the status cache (one [`DeviceSlot`] per configured device, created up
//! front and never removed) and is the only writer to it. Device errors stop
//! here: a failed fetch is folded into the entry's health and error counter,
//! the last good outlet and sensor values stay in place.

use crate::config::DeviceConfig;
use crate::driver::{build_driver, check_outlet, SharedDriver};
use crate::error::PduError;
use crate::models::{DeviceStatus, Health, OutletState, StatusMap};
use crate::retry::RetryPolicy;
use crate::shutdown::Shutdown;
use crate::state::DeviceSlot;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{self, JoinHandle};
use tracing::{debug, info, warn};

pub struct FleetRegistry {
    configs: Vec<DeviceConfig>,
    slots: HashMap<String, DeviceSlot>,
    /// Active adapters only; emptied on shutdown
    drivers: RwLock<HashMap<String, SharedDriver>>,
    last_polled: Mutex<HashMap<String, Instant>>,
}

impl FleetRegistry {
    /// Builds one adapter per device and tests its connection. Devices that cannot be
    /// built or do not answer stay configured but inactive.
    pub async fn initialize(configs: Vec<DeviceConfig>) -> Self {
        let mut drivers = HashMap::new();
        for cfg in &configs {
            match build_driver(cfg) {
                Ok(driver) => {
                    drivers.insert(cfg.name.clone(), driver);
                }
                Err(e) => warn!("cannot build adapter for {}: {}", cfg.name, e),
            }
        }
        Self::with_drivers(configs, drivers).await
    }

    /// Same as [`Self::initialize`] with adapters supplied by the caller.
    pub async fn with_drivers(configs: Vec<DeviceConfig>, drivers: HashMap<String, SharedDriver>) -> Self {
        let checks = configs.iter().filter_map(|cfg| {
            let driver = drivers.get(&cfg.name)?.clone();
            let name = cfg.name.clone();
            Some(async move {
                let ok = driver.test_connection().await;
                (name, driver, ok)
            })
        });

        let mut active = HashMap::new();
        for (name, driver, ok) in join_all(checks).await {
            if ok {
                info!("registered PDU {}", name);
                active.insert(name, driver);
            } else {
                warn!("PDU {} failed the connection test, keeping it inactive", name);
            }
        }

        let slots = configs
            .iter()
            .map(|cfg| (cfg.name.clone(), DeviceSlot::new()))
            .collect();

        info!("{} of {} PDUs active", active.len(), configs.len());

        Self {
            configs,
            slots,
            drivers: RwLock::new(active),
            last_polled: Mutex::new(HashMap::new()),
        }
    }

    pub fn configs(&self) -> &[DeviceConfig] {
        &self.configs
    }

    pub fn config(&self, name: &str) -> Option<&DeviceConfig> {
        self.configs.iter().find(|c| c.name == name)
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.drivers.read().contains_key(name)
    }

    /// Active device names, in configuration order.
    pub fn active_devices(&self) -> Vec<String> {
        let drivers = self.drivers.read();
        self.configs
            .iter()
            .filter(|c| drivers.contains_key(&c.name))
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn status(&self, name: &str) -> Option<DeviceStatus> {
        self.slots.get(name).map(DeviceSlot::snapshot)
    }

    /// Copy of the whole cache: every configured device, active or not.
    pub fn snapshot(&self) -> StatusMap {
        self.slots
            .iter()
            .map(|(name, slot)| (name.clone(), slot.snapshot()))
            .collect()
    }

    /// One concurrent fetch per active device; returns once every fetch resolved.
    pub async fn poll_all(&self) -> StatusMap {
        let targets: Vec<(String, SharedDriver)> = self
            .drivers
            .read()
            .iter()
            .map(|(n, d)| (n.clone(), d.clone()))
            .collect();
        self.poll_targets(targets, Instant::now()).await;
        self.snapshot()
    }

    /// Polls the active devices whose own scan interval has elapsed at `now`.
    /// Polled devices are stamped with `now` itself, so a scheduler passing
    /// its tick instants keeps every device on its interval.
    /// Returns the names that were polled.
    pub async fn poll_due(&self, now: Instant) -> Vec<String> {
        let targets: Vec<(String, SharedDriver)> = {
            let drivers = self.drivers.read();
            let last = self.last_polled.lock();
            self.configs
                .iter()
                .filter(|cfg| {
                    last.get(&cfg.name)
                        .map(|t| now.duration_since(*t) >= cfg.poll_interval())
                        .unwrap_or(true)
                })
                .filter_map(|cfg| drivers.get(&cfg.name).map(|d| (cfg.name.clone(), d.clone())))
                .collect()
        };

        let names = targets.iter().map(|(n, _)| n.clone()).collect();
        self.poll_targets(targets, now).await;
        names
    }

    async fn poll_targets(&self, targets: Vec<(String, SharedDriver)>, started: Instant) {
        if targets.is_empty() {
            return;
        }
        debug!("polling {} PDUs", targets.len());

        {
            let mut last = self.last_polled.lock();
            for (name, _) in &targets {
                last.insert(name.clone(), started);
            }
        }

        // no retry inside a cycle: a failed device waits for the next one
        join_all(targets.iter().map(|(name, driver)| async move {
            if let Some(slot) = self.slots.get(name) {
                let _gate = slot.io_gate.lock().await;
                let result = driver.fetch_status().await;
                apply_fetch(name, slot, result);
            }
        }))
        .await;
    }

    /// Switches one outlet, retrying transient failures, then refreshes that
    /// device only. Invalid outlets and unknown or inactive devices fail
    /// before any network call; a failed command leaves the cache untouched.
    pub async fn set_outlet(&self, name: &str, outlet: u8, on: bool) -> Result<(), PduError> {
        check_outlet(outlet)?;
        let (slot, driver) = self.active_slot(name)?;
        let policy = RetryPolicy::with_attempts(self.config(name).map(|c| c.retry_attempts).unwrap_or(1));

        let _gate = slot.io_gate.lock().await;

        let label = format!("{name}/outlet{outlet}");
        policy.run(&label, || driver.set_outlet(outlet, on)).await.map_err(|e| {
            warn!("command {} -> {} failed: {}", label, if on { "ON" } else { "OFF" }, e);
            e
        })?;
        info!("{} switched {}", label, if on { "ON" } else { "OFF" });

        match driver.fetch_status().await {
            Ok(status) => apply_fetch(name, slot, Ok(status)),
            Err(e) => {
                // the device acknowledged the command, so keep what it was told
                let mut st = slot.status.lock();
                st.outlets[usize::from(outlet - 1)] = OutletState::from_bool(on);
                fold_error(name, &mut st, &e);
            }
        }
        Ok(())
    }

    /// Asks one active device to restart. Sent once, never retried, and the
    /// cache is left as it was: the following polls report the device as
    /// failing until it answers again.
    pub async fn reboot(&self, name: &str) -> Result<(), PduError> {
        let (slot, driver) = self.active_slot(name)?;
        let _gate = slot.io_gate.lock().await;

        driver.reboot().await.map_err(|e| {
            warn!("reboot of {} failed: {}", name, e);
            e
        })?;
        info!("{} is rebooting", name);
        Ok(())
    }

    /// Releases every adapter. The cache stays readable.
    pub fn shutdown(&self) {
        let released = {
            let mut drivers = self.drivers.write();
            let n = drivers.len();
            drivers.clear();
            n
        };
        info!("fleet registry released {} adapters", released);
    }

    fn active_slot(&self, name: &str) -> Result<(&DeviceSlot, SharedDriver), PduError> {
        let driver = self
            .drivers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| PduError::UnknownDevice(name.to_string()))?;
        let slot = self
            .slots
            .get(name)
            .ok_or_else(|| PduError::UnknownDevice(name.to_string()))?;
        Ok((slot, driver))
    }
}

/// Ticks every `tick` and polls the devices that are due. A cycle that has
/// started always runs to completion before shutdown is honoured.
pub fn spawn_poll_scheduler(registry: Arc<FleetRegistry>, tick: Duration, mut shutdown: Shutdown) -> JoinHandle<()> {
    task::spawn(async move {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let tick = tokio::select! {
                _ = shutdown.wait() => break,
                tick = ticker.tick() => tick,
            };
            let polled = registry.poll_due(tick.into_std()).await;
            if !polled.is_empty() {
                debug!("poll cycle done: {}", polled.join(", "));
            }
        }
        debug!("poll scheduler stopped");
    })
}

fn apply_fetch(name: &str, slot: &DeviceSlot, result: Result<DeviceStatus, PduError>) {
    let mut st = slot.status.lock();
    match result {
        Ok(mut fresh) => {
            fresh.consecutive_errors = 0;
            if st.health == Health::Error && st.consecutive_errors > 0 {
                info!("PDU {} is back after {} failed polls", name, st.consecutive_errors);
            }
            *st = fresh;
        }
        Err(e) => fold_error(name, &mut st, &e),
    }
}

fn fold_error(name: &str, st: &mut DeviceStatus, err: &PduError) {
    st.consecutive_errors = st.consecutive_errors.saturating_add(1);
    st.health = Health::Error;
    warn!(
        "poll of {} failed ({}): {} [{} in a row]",
        name,
        err.code(),
        err,
        st.consecutive_errors
    );
}
