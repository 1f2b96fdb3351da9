//! Logging bootstrap
//!
//! The crates log through `tracing`; this installs a subscriber for
//! applications that have none.

/// Initialize logging from `RUST_LOG`, defaulting to `info`
///
/// Fails if a global subscriber is already installed.
#[cfg(feature = "logging")]
pub fn init_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Initialize logging (no-op when the logging feature is disabled)
#[cfg(not(feature = "logging"))]
pub fn init_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "logging"))]
    #[test]
    fn test_init_logging_without_feature() {
        assert!(init_logging().is_ok());
        assert!(init_logging().is_ok());
    }

    #[cfg(feature = "logging")]
    #[test]
    fn test_init_logging_twice_fails() {
        // Whichever call comes second finds a subscriber installed
        let first = init_logging();
        let second = init_logging();
        assert!(first.is_err() || second.is_err());
    }
}
