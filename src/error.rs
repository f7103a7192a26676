use thiserror::Error;

/// Errors produced by the throttling engine.
#[derive(Debug, Error)]
pub enum ThrottlerError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("No Tokio runtime available: {0}")]
    RuntimeUnavailable(#[from] tokio::runtime::TryCurrentError),

    /// A delivery callback reported failure. Only ever logged, never returned
    /// to a submitter.
    #[error("{kind} delivery for key '{key}' failed", kind = delivery_kind(.instant))]
    DeliveryFailed {
        key: String,
        instant: bool,
        source: anyhow::Error,
    },
}

pub type ThrottlerResult<T> = Result<T, ThrottlerError>;

fn delivery_kind(instant: &bool) -> &'static str {
    if *instant {
        "Instant"
    } else {
        "Batched"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_failed_display() {
        let err = ThrottlerError::DeliveryFailed {
            key: "orders".to_string(),
            instant: false,
            source: anyhow::anyhow!("sink unavailable"),
        };
        assert_eq!(
            err.to_string(),
            "Batched delivery for key 'orders' failed"
        );

        let err = ThrottlerError::DeliveryFailed {
            key: "orders".to_string(),
            instant: true,
            source: anyhow::anyhow!("timeout"),
        };
        assert!(err.to_string().starts_with("Instant delivery"));
    }

    #[test]
    fn test_delivery_failed_keeps_source() {
        let err = ThrottlerError::DeliveryFailed {
            key: "k".to_string(),
            instant: true,
            source: anyhow::anyhow!("boom"),
        };
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("boom"));
    }
}
