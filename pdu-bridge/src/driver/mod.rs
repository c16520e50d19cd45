//! Device protocol adapters
//!
//! One implementation of [`PduDriver`] per PDU family. The fleet registry only
//! talks to the trait, so a new family is a new implementation here and a new
//! arm in [`build_driver`]; nothing else changes.
//!
//! Adapters never retry: one call is one bounded-timeout request. Retry policy
//! belongs to the caller.

pub mod logilink;

use crate::config::{DeviceConfig, DeviceFamily};
use crate::error::PduError;
use crate::models::{DeviceStatus, OUTLET_COUNT};
use async_trait::async_trait;
use std::sync::Arc;

pub use logilink::LogiLinkDriver;

#[async_trait]
pub trait PduDriver: Send + Sync {
    /// One status request, parsed into a fresh [`DeviceStatus`].
    async fn fetch_status(&self) -> Result<DeviceStatus, PduError>;

    /// Switches outlet `outlet` (1..=8). Out-of-range numbers fail before any I/O.
    async fn set_outlet(&self, outlet: u8, on: bool) -> Result<(), PduError>;

    /// Asks the device to restart. The device drops off the network while it
    /// boots, so callers should not expect a status answer right after.
    async fn reboot(&self) -> Result<(), PduError>;

    /// Lightweight reachability check used at registration.
    async fn test_connection(&self) -> bool;
}

pub type SharedDriver = Arc<dyn PduDriver>;

/// Rejects outlet numbers outside 1..=8.
pub fn check_outlet(outlet: u8) -> Result<(), PduError> {
    if outlet == 0 || usize::from(outlet) > OUTLET_COUNT {
        return Err(PduError::InvalidArgument(format!(
            "outlet number must be 1-{OUTLET_COUNT}, got {outlet}"
        )));
    }
    Ok(())
}

/// Picks the adapter for a device's family.
pub fn build_driver(config: &DeviceConfig) -> Result<SharedDriver, PduError> {
    match config.model {
        // Intellinet units speak the LogiLink protocol unchanged
        DeviceFamily::Auto | DeviceFamily::Logilink | DeviceFamily::Intellinet => {
            Ok(Arc::new(LogiLinkDriver::new(config)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_outlet_bounds() {
        for n in 1..=8 {
            assert!(check_outlet(n).is_ok());
        }
        assert!(matches!(check_outlet(0), Err(PduError::InvalidArgument(_))));
        assert!(matches!(check_outlet(9), Err(PduError::InvalidArgument(_))));
    }

    #[test]
    fn test_build_driver_for_every_family() {
        for family in [DeviceFamily::Auto, DeviceFamily::Logilink, DeviceFamily::Intellinet] {
            let mut cfg = DeviceConfig::new("rack1", "127.0.0.1");
            cfg.model = family;
            assert!(build_driver(&cfg).is_ok());
        }
    }
}
