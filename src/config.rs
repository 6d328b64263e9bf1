use std::time::Duration;

/// Configuration for the engine.
///
/// Use [`EngineConfig::builder()`] for ergonomic construction, or
/// [`EngineConfig::default()`] for the stock timings (5 retries from 1 s
/// backoff, 40 alignment polls at 1.5 s, 1 s progress and notification
/// intervals).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the compute server, e.g. `http://192.168.1.50:7860`.
    pub host: String,

    /// Retry attempts for the generation submission call, on top of the
    /// initial attempt.
    pub max_retries: u32,

    /// Wait before the first retry. Each subsequent wait is multiplied by 1.5.
    pub initial_backoff: Duration,

    /// Alignment polls before giving up on a model switch (~60 s at the
    /// default interval).
    pub align_max_attempts: u32,

    /// Wait between alignment polls.
    pub align_interval: Duration,

    /// A switch command is re-issued every this many alignment polls,
    /// starting with the first.
    pub align_switch_every: u32,

    /// Progress endpoint polling interval.
    pub progress_interval: Duration,

    /// Minimum interval between non-forced status notifications.
    pub notify_min_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            max_retries: 5,
            initial_backoff: Duration::from_millis(1000),
            align_max_attempts: 40,
            align_interval: Duration::from_millis(1500),
            align_switch_every: 5,
            progress_interval: Duration::from_millis(1000),
            notify_min_interval: Duration::from_millis(1000),
        }
    }
}

impl EngineConfig {
    /// Start building a config with the builder pattern.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

/// Builder for [`EngineConfig`].
#[derive(Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Set the compute server base URL.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the submission retry budget.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Set the initial submission retry backoff.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.config.initial_backoff = backoff;
        self
    }

    /// Set the alignment poll cap.
    pub fn with_align_max_attempts(mut self, attempts: u32) -> Self {
        self.config.align_max_attempts = attempts;
        self
    }

    /// Set the wait between alignment polls.
    pub fn with_align_interval(mut self, interval: Duration) -> Self {
        self.config.align_interval = interval;
        self
    }

    /// Set the progress polling interval.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.config.progress_interval = interval;
        self
    }

    /// Set the minimum interval between non-forced notifications.
    pub fn with_notify_min_interval(mut self, interval: Duration) -> Self {
        self.config.notify_min_interval = interval;
        self
    }

    /// Build the final [`EngineConfig`].
    pub fn build(self) -> EngineConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_server_tolerances() {
        let config = EngineConfig::default();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.align_max_attempts, 40);
        assert_eq!(config.align_interval, Duration::from_millis(1500));
        assert_eq!(config.align_switch_every, 5);
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::builder()
            .with_host("http://localhost:7860")
            .with_max_retries(2)
            .with_align_interval(Duration::from_millis(10))
            .build();
        assert_eq!(config.host, "http://localhost:7860");
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.align_interval, Duration::from_millis(10));
        assert_eq!(config.progress_interval, Duration::from_millis(1000));
    }
}
