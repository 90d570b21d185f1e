//! Per-fiber runtime configuration.
//!
//! Every service a [`Fiber`](crate::fiber::Fiber) owns reads its timeouts
//! and bounds from one [`FiberConfig`].
//!
//! # Example
//!
//! ```rust,ignore
//! let config = FiberConfig::default();
//!
//! let config = FiberConfig::builder()
//!     .call_timeout(Duration::from_secs(5))
//!     .location_retry(3, Duration::from_millis(100))
//!     .build();
//! ```

use std::time::Duration;

/// Default deadline for a correlated call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(40);

/// Default deadline for acquiring and holding a location lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Default bound on re-entrant lock nesting.
pub const DEFAULT_MAX_LOCK_LEVEL: u32 = 100;

/// Default number of resolve-and-send attempts for location-addressed sends.
pub const DEFAULT_LOCATION_RETRY_ATTEMPTS: u32 = 5;

/// Default pause between location-addressed send attempts.
pub const DEFAULT_LOCATION_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Per-fiber configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiberConfig {
    call_timeout: Duration,
    lock_timeout: Duration,
    max_lock_level: u32,
    location_retry_attempts: u32,
    location_retry_interval: Duration,
}

impl Default for FiberConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            max_lock_level: DEFAULT_MAX_LOCK_LEVEL,
            location_retry_attempts: DEFAULT_LOCATION_RETRY_ATTEMPTS,
            location_retry_interval: DEFAULT_LOCATION_RETRY_INTERVAL,
        }
    }
}

impl FiberConfig {
    /// Start building a configuration from the defaults.
    pub fn builder() -> FiberConfigBuilder {
        FiberConfigBuilder::default()
    }

    /// Deadline applied to calls that do not pass their own.
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Deadline for acquiring a location lock, and for holding it.
    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Deepest re-entrant level an [`AsyncMutex`](crate::sync::AsyncMutex) grants.
    pub fn max_lock_level(&self) -> u32 {
        self.max_lock_level
    }

    /// Attempts made by a [`LocationSender`](crate::messaging::LocationSender).
    pub fn location_retry_attempts(&self) -> u32 {
        self.location_retry_attempts
    }

    /// Pause between [`LocationSender`](crate::messaging::LocationSender) attempts.
    pub fn location_retry_interval(&self) -> Duration {
        self.location_retry_interval
    }
}

/// Builder for [`FiberConfig`].
#[derive(Debug, Clone, Default)]
pub struct FiberConfigBuilder {
    config: FiberConfig,
}

impl FiberConfigBuilder {
    /// Set the default call deadline.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    /// Set the location lock deadline.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock_timeout = timeout;
        self
    }

    /// Set the re-entrant nesting bound.
    pub fn max_lock_level(mut self, level: u32) -> Self {
        self.config.max_lock_level = level;
        self
    }

    /// Set the retry policy of location-addressed sends.
    pub fn location_retry(mut self, attempts: u32, interval: Duration) -> Self {
        self.config.location_retry_attempts = attempts.max(1);
        self.config.location_retry_interval = interval;
        self
    }

    /// Build the configuration (infallible).
    pub fn build(self) -> FiberConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let config = FiberConfig::default();
        assert_eq!(config.call_timeout(), Duration::from_secs(40));
        assert_eq!(config.lock_timeout(), Duration::from_secs(60));
        assert_eq!(config.max_lock_level(), 100);
        assert_eq!(config.location_retry_attempts(), 5);
        assert_eq!(config.location_retry_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_builder() {
        let config = FiberConfig::builder()
            .call_timeout(Duration::from_secs(1))
            .lock_timeout(Duration::from_secs(2))
            .max_lock_level(8)
            .location_retry(0, Duration::from_millis(10))
            .build();

        assert_eq!(config.call_timeout(), Duration::from_secs(1));
        assert_eq!(config.lock_timeout(), Duration::from_secs(2));
        assert_eq!(config.max_lock_level(), 8);
        // at least one attempt is always made
        assert_eq!(config.location_retry_attempts(), 1);
        assert_eq!(config.location_retry_interval(), Duration::from_millis(10));
    }
}
