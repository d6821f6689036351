//! Configuration for recording and delivering traces.
//!
//! Settings come from defaults, overridden by `XRAY_*` environment variables,
//! overridden by builder calls or CLI flags.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::delivery::DeliveryPolicy;
use crate::error::ConfigError;
use crate::trace::{
    SamplingPolicy, DEFAULT_SAMPLE_RATE, MAX_SAMPLES_PER_REASON, MIN_SAMPLES_PER_REASON,
};

/// Default API base URL that runs are posted to.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Default bounded wait for one outbound send.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the recording client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XRayConfig {
    /// Base URL of the trace API.
    pub api_url: String,

    /// What to do when a finalized run cannot be delivered.
    pub delivery_policy: DeliveryPolicy,

    /// Directory that holds buffered runs awaiting reconciliation.
    pub offline_dir: PathBuf,

    /// Bounded wait for one outbound send.
    pub send_timeout: Duration,

    /// Probability of retaining a rejection between the floor and the cap.
    pub sample_rate: f64,

    /// Rejection samples always retained per reason.
    pub min_samples_per_reason: usize,

    /// Hard cap on rejection samples retained per reason.
    pub max_samples_per_reason: usize,

    /// Seed for reproducible rejection sampling.
    pub seed: Option<u64>,
}

impl Default for XRayConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            delivery_policy: DeliveryPolicy::default(),
            offline_dir: default_offline_dir(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
            sample_rate: DEFAULT_SAMPLE_RATE,
            min_samples_per_reason: MIN_SAMPLES_PER_REASON,
            max_samples_per_reason: MAX_SAMPLES_PER_REASON,
            seed: None,
        }
    }
}

/// `$HOME/.xray/offline`, or `.xray/offline` when no home directory is set.
pub fn default_offline_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".xray")
        .join("offline")
}

impl XRayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `XRAY_API_URL`: Trace API base URL (default: http://localhost:8000)
    /// - `XRAY_OFFLINE_MODE`: Delivery policy `buffer`, `drop` or `strict` (default: buffer)
    /// - `XRAY_OFFLINE_DIR`: Retry area directory (default: $HOME/.xray/offline)
    /// - `XRAY_SEND_TIMEOUT_SECS`: Bounded wait per send (default: 5)
    /// - `XRAY_SAMPLE_RATE`: Tail sampling probability (default: 0.01)
    /// - `XRAY_MIN_SAMPLES`: Samples kept per reason (default: 5)
    /// - `XRAY_MAX_SAMPLES`: Sample cap per reason (default: 20)
    /// - `XRAY_SEED`: Seed for reproducible sampling (default: unset)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("XRAY_API_URL") {
            config.api_url = val;
        }

        if let Some(val) = lookup("XRAY_OFFLINE_MODE") {
            config.delivery_policy = val.parse()?;
        }

        if let Some(val) = lookup("XRAY_OFFLINE_DIR") {
            config.offline_dir = PathBuf::from(val);
        }

        if let Some(val) = lookup("XRAY_SEND_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "XRAY_SEND_TIMEOUT_SECS")?;
            config.send_timeout = Duration::from_secs(secs);
        }

        // Sampling
        if let Some(val) = lookup("XRAY_SAMPLE_RATE") {
            config.sample_rate = parse_env_value(&val, "XRAY_SAMPLE_RATE")?;
        }

        if let Some(val) = lookup("XRAY_MIN_SAMPLES") {
            config.min_samples_per_reason = parse_env_value(&val, "XRAY_MIN_SAMPLES")?;
        }

        if let Some(val) = lookup("XRAY_MAX_SAMPLES") {
            config.max_samples_per_reason = parse_env_value(&val, "XRAY_MAX_SAMPLES")?;
        }

        if let Some(val) = lookup("XRAY_SEED") {
            config.seed = Some(parse_env_value(&val, "XRAY_SEED")?);
        }

        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_url.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "api_url cannot be empty".to_string(),
            ));
        }

        if self.send_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "send_timeout must be greater than 0".to_string(),
            ));
        }

        self.sampling_policy().validate()
    }

    /// Sampling knobs as a policy for the sampler.
    pub fn sampling_policy(&self) -> SamplingPolicy {
        SamplingPolicy {
            sample_rate: self.sample_rate,
            min_per_reason: self.min_samples_per_reason,
            max_per_reason: self.max_samples_per_reason,
        }
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_delivery_policy(mut self, policy: DeliveryPolicy) -> Self {
        self.delivery_policy = policy;
        self
    }

    pub fn with_offline_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.offline_dir = dir.into();
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }
}

/// Parses an environment variable value, naming the key on failure.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = XRayConfig::default();
        assert_eq!(config.api_url, "http://localhost:8000");
        assert_eq!(config.delivery_policy, DeliveryPolicy::Buffer);
        assert_eq!(config.send_timeout, Duration::from_secs(5));
        assert!(config.offline_dir.ends_with(".xray/offline"));
        assert_eq!(config.sampling_policy(), SamplingPolicy::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = XRayConfig::from_lookup(lookup(&[
            ("XRAY_API_URL", "http://traces.internal:9000"),
            ("XRAY_OFFLINE_MODE", "STRICT"),
            ("XRAY_OFFLINE_DIR", "/tmp/xray"),
            ("XRAY_SEND_TIMEOUT_SECS", "2"),
            ("XRAY_SAMPLE_RATE", "0.25"),
            ("XRAY_MIN_SAMPLES", "3"),
            ("XRAY_MAX_SAMPLES", "10"),
            ("XRAY_SEED", "42"),
        ]))
        .expect("config should parse");

        assert_eq!(config.api_url, "http://traces.internal:9000");
        assert_eq!(config.delivery_policy, DeliveryPolicy::Strict);
        assert_eq!(config.offline_dir, PathBuf::from("/tmp/xray"));
        assert_eq!(config.send_timeout, Duration::from_secs(2));
        assert_eq!(config.min_samples_per_reason, 3);
        assert_eq!(config.max_samples_per_reason, 10);
        assert_eq!(config.seed, Some(42));
        assert!((config.sample_rate - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unparseable_value_names_key() {
        let err = XRayConfig::from_lookup(lookup(&[("XRAY_SAMPLE_RATE", "often")]))
            .expect_err("should fail");
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "XRAY_SAMPLE_RATE"));
    }

    #[test]
    fn test_unknown_policy_fails_fast() {
        let err = XRayConfig::from_lookup(lookup(&[("XRAY_OFFLINE_MODE", "retry")]))
            .expect_err("should fail");
        assert!(matches!(err, ConfigError::UnknownDeliveryPolicy(_)));
    }

    #[test]
    fn test_validation() {
        assert!(XRayConfig::default().with_api_url("  ").validate().is_err());
        assert!(XRayConfig::default()
            .with_send_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(XRayConfig::default().with_sample_rate(-0.1).validate().is_err());

        let mut config = XRayConfig::default();
        config.min_samples_per_reason = 50;
        assert!(config.validate().is_err());
    }
}
