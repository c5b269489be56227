//! Startup errors for the capture client.
//!
//! These are the only errors a host sees. Once a [`crate::Client`] exists,
//! capture calls never fail.

use faultline_delivery::DeliveryError;
use thiserror::Error;

/// Invalid or unloadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The layered configuration could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// Capture is enabled but no collector endpoint is configured.
    #[error("endpoint is required when capture is enabled")]
    MissingEndpoint,

    /// The endpoint is not a usable http(s) URL.
    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint {
        /// Endpoint as configured, with credentials removed
        endpoint: String,
        /// Why it was rejected
        reason: String,
    },

    /// A numeric option is out of range.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Option name
        field: &'static str,
        /// Constraint that was violated
        reason: String,
    },
}

impl From<figment::Error> for ConfigError {
    fn from(error: figment::Error) -> Self {
        Self::Load(Box::new(error))
    }
}

/// Failure to construct a [`crate::Client`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The transport or delivery engine could not be started.
    #[error("failed to start delivery: {0}")]
    Delivery(#[from] DeliveryError),
}
