/*!
# PDU Bridge

Bridges LogiLink/Intellinet power distribution units to MQTT.

- `driver`: device protocol adapters (HTTP/XML)
- `fleet`: device registry, status cache and poll scheduler
- `bridge`: topic scheme, Home Assistant discovery, command dispatch, publish loop
*/

pub mod bridge;
pub mod config;
pub mod discovery;
pub mod driver;
pub mod error;
pub mod fleet;
pub mod health;
pub mod models;
pub mod mqtt;
pub mod retry;
pub mod shutdown;
pub mod state;
pub mod topics;

pub use bridge::Bridge;
pub use error::{BusError, ConfigError, PduError};
pub use fleet::FleetRegistry;
