//! Error types: device errors, bus errors, configuration errors.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PduError {
    /// Host unreachable or connection refused
    #[error("connection error: {0}")]
    Connection(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// HTTP 401 from the device
    #[error("authentication rejected by device")]
    AuthFailure,

    /// Malformed or unexpected device document
    #[error("protocol error: {0}")]
    ProtocolParse(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown device: {0}")]
    UnknownDevice(String),
}

impl PduError {
    /// Errors worth a retry with backoff: the device may answer next time.
    pub fn is_transient(&self) -> bool {
        matches!(self, PduError::Connection(_) | PduError::Timeout(_))
    }

    /// Short machine-readable code, used in logs and attribute payloads.
    pub fn code(&self) -> &'static str {
        match self {
            PduError::Connection(_) => "connection_error",
            PduError::Timeout(_) => "timeout",
            PduError::AuthFailure => "auth_failure",
            PduError::ProtocolParse(_) => "protocol_parse_error",
            PduError::InvalidArgument(_) => "invalid_argument",
            PduError::UnknownDevice(_) => "unknown_device",
        }
    }
}

/// Message-bus failures. Never folded into device health.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("subscribe to {filter} failed: {reason}")]
    Subscribe { filter: String, reason: String },

    #[error("disconnect failed: {0}")]
    Disconnect(String),

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("invalid device '{name}': {reason}")]
    InvalidDevice { name: String, reason: String },

    #[error("duplicate device name: {0}")]
    DuplicateDevice(String),
}
