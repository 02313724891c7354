//! Injected configuration for the sync layer.

use std::time::Duration;

use api::client::CallTimeouts;

/// Tunables for the cache and mutation layers. Constructors take this by
/// value; nothing reads ambient state, so tests can pin exact numbers.
#[derive(Debug, Clone)]
pub struct PlanningConfig {
    /// Staleness window for quarter-scoped task data, which other people
    /// edit all day.
    pub task_staleness: Duration,
    /// Staleness window for reference data (users, projects) and settings.
    pub reference_staleness: Duration,
    pub retry: RetryConfig,
    pub timeouts: CallTimeouts,
}

/// Retry policy the cache applies to transient load failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_times: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            task_staleness: Duration::from_secs(5 * 60),
            reference_staleness: Duration::from_secs(30 * 60),
            retry: RetryConfig::default(),
            timeouts: CallTimeouts::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_times: 3,
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_data_goes_stale_before_reference_data() {
        let config = PlanningConfig::default();
        assert!(config.task_staleness < config.reference_staleness);
        assert_eq!(config.task_staleness, Duration::from_secs(300));
        assert_eq!(config.reference_staleness, Duration::from_secs(1800));
    }
}
