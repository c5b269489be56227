//! Client configuration with defaults, file, and environment overrides.

use std::{path::Path, time::Duration};

use faultline_core::Tags;
use faultline_delivery::{DeliveryConfig, Endpoint, RetryPolicy};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    value::{Dict, Map},
    Figment, Metadata, Profile, Provider,
};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration file read by [`ClientConfig::load`].
pub const CONFIG_FILE: &str = "faultline.toml";

/// Prefix for environment overrides, e.g. `FAULTLINE_BATCH_SIZE`.
pub const ENV_PREFIX: &str = "FAULTLINE_";

/// Capture client configuration.
///
/// Loaded in priority order:
/// 1. Environment variables prefixed with `FAULTLINE_` (highest priority)
/// 2. Configuration file (`faultline.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// File keys may be written in snake_case or camelCase (`batchSize`).
///
/// # Example
///
/// ```no_run
/// use faultline_client::ClientConfig;
///
/// let config = ClientConfig::load().expect("Failed to load configuration");
/// println!("batches of {} every {}ms", config.batch_size, config.batch_interval_millis);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Collector URL, optionally carrying the key as `https://KEY@host/path`.
    ///
    /// Environment variable: `FAULTLINE_ENDPOINT`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Explicit project key, overriding one embedded in the endpoint.
    ///
    /// Environment variable: `FAULTLINE_API_KEY`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Master switch. When false no transport or background task exists.
    pub enabled: bool,

    /// Tags added to every event. Per-call tags override them.
    pub static_tags: Tags,

    /// HTTP request timeout.
    pub timeout_millis: u64,

    /// Delivery attempts per event, including the first.
    pub max_attempts: u32,

    /// Events per batch.
    pub batch_size: usize,

    /// Longest wait before a partial batch is sent.
    pub batch_interval_millis: u64,

    /// Window in which repeats of a fingerprint are suppressed. 0 disables.
    pub dedup_window_seconds: u64,

    /// Fingerprints remembered for suppression. 0 disables.
    pub dedup_cache_size: usize,

    /// Maximum queued events before new ones are dropped.
    pub queue_capacity: usize,

    /// Upper bound on the flush performed by `shutdown`.
    pub shutdown_grace_millis: u64,

    /// Delay after the first failed attempt.
    pub retry_base_delay_millis: u64,

    /// Upper bound on any retry delay.
    pub retry_max_delay_millis: u64,

    /// Retry jitter fraction, 0.0 to 1.0.
    pub retry_jitter_factor: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            enabled: true,
            static_tags: Tags::new(),
            timeout_millis: faultline_delivery::DEFAULT_TIMEOUT_MILLIS,
            max_attempts: faultline_delivery::DEFAULT_MAX_ATTEMPTS,
            batch_size: faultline_delivery::DEFAULT_BATCH_SIZE,
            batch_interval_millis: 1000,
            dedup_window_seconds: 60,
            dedup_cache_size: faultline_core::dedup::DEFAULT_CAPACITY,
            queue_capacity: faultline_delivery::DEFAULT_QUEUE_CAPACITY,
            shutdown_grace_millis: 5000,
            retry_base_delay_millis: 1000,
            retry_max_delay_millis: 60_000,
            retry_jitter_factor: 0.2,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from defaults, `faultline.toml` and the
    /// environment, then validates it.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a source cannot be parsed or the result is
    /// invalid.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(CONFIG_FILE)
    }

    /// Like [`Self::load`], reading the given file instead. A missing file is
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a source cannot be parsed or the result is
    /// invalid.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(SnakeCaseKeys(Toml::file(path.as_ref())))
            .merge(Env::prefixed(ENV_PREFIX));

        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration, including the endpoint when enabled.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEndpoint` when enabled without an
    /// endpoint, `ConfigError::InvalidEndpoint` for an unusable URL and
    /// `ConfigError::InvalidValue` for out-of-range numbers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled {
            self.endpoint()?;
        }
        self.validate_limits()
    }

    /// Validates everything except the endpoint.
    pub(crate) fn validate_limits(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "must be greater than 0"));
        }

        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity", "must be greater than 0"));
        }

        if self.max_attempts == 0 {
            return Err(invalid("max_attempts", "must be greater than 0"));
        }

        if self.timeout_millis == 0 {
            return Err(invalid("timeout_millis", "must be greater than 0"));
        }

        if self.batch_interval_millis == 0 {
            return Err(invalid("batch_interval_millis", "must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            return Err(invalid("retry_jitter_factor", "must be between 0.0 and 1.0"));
        }

        if self.retry_base_delay_millis > self.retry_max_delay_millis {
            return Err(invalid(
                "retry_base_delay_millis",
                "cannot exceed retry_max_delay_millis",
            ));
        }

        Ok(())
    }

    /// Parses the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEndpoint` or
    /// `ConfigError::InvalidEndpoint`.
    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        let raw = self
            .endpoint
            .as_deref()
            .filter(|endpoint| !endpoint.trim().is_empty())
            .ok_or(ConfigError::MissingEndpoint)?;

        Endpoint::parse(raw, self.api_key.as_deref()).map_err(|e| ConfigError::InvalidEndpoint {
            endpoint: redact_endpoint(raw),
            reason: e.to_string(),
        })
    }

    /// Convert to the delivery crate's configuration.
    pub fn to_delivery_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            queue_capacity: self.queue_capacity,
            batch_size: self.batch_size,
            batch_interval: Duration::from_millis(self.batch_interval_millis),
            retry_policy: self.to_retry_policy(),
            shutdown_grace: self.shutdown_grace(),
        }
    }

    /// Convert to retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_millis),
            max_delay: Duration::from_millis(self.retry_max_delay_millis),
            jitter_factor: self.retry_jitter_factor,
        }
    }

    /// HTTP request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_millis)
    }

    /// Duplicate suppression window.
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_seconds)
    }

    /// Shutdown flush bound.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_millis)
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue { field, reason: reason.to_string() }
}

/// Endpoint with any embedded key masked for error messages.
fn redact_endpoint(raw: &str) -> String {
    match (raw.find("://"), raw.rfind('@')) {
        (Some(scheme_end), Some(at_pos)) if at_pos > scheme_end => {
            let mut masked = raw.to_string();
            masked.replace_range(scheme_end + 3..at_pos, "***");
            masked
        },
        _ => raw.to_string(),
    }
}

/// Provider adapter that rewrites camelCase top-level keys to snake_case.
struct SnakeCaseKeys<P>(P);

impl<P: Provider> Provider for SnakeCaseKeys<P> {
    fn metadata(&self) -> Metadata {
        self.0.metadata()
    }

    fn data(&self) -> Result<Map<Profile, Dict>, figment::Error> {
        Ok(self
            .0
            .data()?
            .into_iter()
            .map(|(profile, dict)| {
                let dict = dict.into_iter().map(|(key, value)| (to_snake_case(&key), value));
                (profile, dict.collect())
            })
            .collect())
    }
}

fn to_snake_case(key: &str) -> String {
    let mut snake = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            snake.push('_');
            snake.push(c.to_ascii_lowercase());
        } else {
            snake.push(c);
        }
    }
    snake
}
