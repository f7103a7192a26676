use crate::error::{ThrottlerError, ThrottlerResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Throttler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Minimum spacing between two deliveries for the same key
    #[serde(with = "humantime_serde")]
    pub release_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            release_interval: Duration::from_secs(10),
        }
    }
}

impl ThrottleConfig {
    pub fn new(release_interval: Duration) -> Self {
        Self { release_interval }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> ThrottlerResult<()> {
        // A zero interval would let an instant delivery overtake a batch that
        // was just flushed for the same key.
        if self.release_interval.is_zero() {
            return Err(ThrottlerError::ConfigurationError(
                "Release interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ThrottleConfig::default();
        assert_eq!(config.release_interval, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = ThrottleConfig::new(Duration::ZERO);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ThrottlerError::ConfigurationError(_)));
    }

    #[test]
    fn test_deserialize_humantime_interval() {
        let config: ThrottleConfig =
            serde_json::from_str(r#"{"release_interval": "1m 30s"}"#).unwrap();
        assert_eq!(config.release_interval, Duration::from_secs(90));

        let config: ThrottleConfig =
            serde_json::from_str(r#"{"release_interval": "250ms"}"#).unwrap();
        assert_eq!(config.release_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_interval_string() {
        let result: Result<ThrottleConfig, _> =
            serde_json::from_str(r#"{"release_interval": "soon"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = ThrottleConfig::new(Duration::from_secs(5));
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(json, r#"{"release_interval":"5s"}"#);
    }
}
