//! Configuration for batch application.

use rand::Rng;
use std::time::Duration;

/// How the first attempt of a namespace job picks its mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitialJobMode {
    /// Every attempt starts optimistic; a uniqueness conflict falls back to
    /// pessimistic mode.
    #[default]
    AlwaysOptimistic,
    /// Start optimistic unless the context is explicitly not reapplying.
    FollowReapplyingFlag,
}

impl InitialJobMode {
    /// Returns true if a job applied with `reapplying` starts optimistic.
    pub fn starts_optimistic(&self, reapplying: Option<bool>) -> bool {
        match self {
            InitialJobMode::AlwaysOptimistic => true,
            InitialJobMode::FollowReapplyingFlag => reapplying.unwrap_or(true),
        }
    }
}

/// Configuration of the batch executor.
#[derive(Debug, Clone, Default)]
pub struct ReplConfig {
    /// Retry policy for re-applying a unit after a write conflict.
    pub retry: RetryConfig,
    /// Mode selection for namespace jobs.
    pub initial_job_mode: InitialJobMode,
}

impl ReplConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the initial job mode.
    pub fn with_initial_job_mode(mut self, mode: InitialJobMode) -> Self {
        self.initial_job_mode = mode;
        self
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts.
    pub max_attempts: u32,
    /// Maximum number of attempts for work hinted as critical.
    pub critical_max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Maximum delay between attempts for work hinted as time-sensible.
    pub time_sensible_max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration with `max_attempts` attempts.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            critical_max_attempts: max_attempts.saturating_mul(2),
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(5),
            time_sensible_max_delay: Duration::from_millis(250),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration that retries `max_attempts` times with no
    /// delay, whatever the hints.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            critical_max_attempts: max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            time_sensible_max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the attempt budget for critical work.
    pub fn with_critical_max_attempts(mut self, attempts: u32) -> Self {
        self.critical_max_attempts = attempts;
        self
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the maximum delay for time-sensible work.
    pub fn with_time_sensible_max_delay(mut self, delay: Duration) -> Self {
        self.time_sensible_max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay before `attempt` (1-based), capped at `cap`.
    ///
    /// The first attempt has no delay.
    pub fn delay_for_attempt(&self, attempt: u32, cap: Duration) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self
                .backoff_multiplier
                .powi(attempt.saturating_sub(2).min(i32::MAX as u32) as i32);
        let cap_secs = cap.as_secs_f64();
        let mut delay_secs = base_delay.min(cap_secs).max(0.0);

        if self.add_jitter && delay_secs > 0.0 {
            delay_secs += delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
        }
        Duration::from_secs_f64(delay_secs.min(cap_secs))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repl_config_builder() {
        let config = ReplConfig::new()
            .with_retry(RetryConfig::immediate(2))
            .with_initial_job_mode(InitialJobMode::FollowReapplyingFlag);

        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.initial_job_mode, InitialJobMode::FollowReapplyingFlag);
        assert_eq!(ReplConfig::default().initial_job_mode, InitialJobMode::AlwaysOptimistic);
    }

    #[test]
    fn initial_mode_selection() {
        let always = InitialJobMode::AlwaysOptimistic;
        assert!(always.starts_optimistic(Some(false)));
        assert!(always.starts_optimistic(None));

        let follow = InitialJobMode::FollowReapplyingFlag;
        assert!(!follow.starts_optimistic(Some(false)));
        assert!(follow.starts_optimistic(Some(true)));
        assert!(follow.starts_optimistic(None));
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);
        let cap = Duration::from_secs(10);

        assert_eq!(config.delay_for_attempt(1, cap), Duration::ZERO);

        let delay2 = config.delay_for_attempt(2, cap);
        assert!(delay2 >= Duration::from_millis(100));
        assert!(delay2 <= Duration::from_millis(125));

        let delay3 = config.delay_for_attempt(3, cap);
        assert!(delay3 >= Duration::from_millis(200));
        assert!(delay3 <= Duration::from_millis(250));
    }

    #[test]
    fn retry_delay_respects_cap() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_backoff_multiplier(10.0)
            .with_jitter(false);

        assert_eq!(
            config.delay_for_attempt(6, Duration::from_secs(5)),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn jitter_stays_within_cap() {
        let config = RetryConfig::new(5).with_initial_delay(Duration::from_secs(1));
        let cap = Duration::from_millis(100);

        for attempt in 2..6 {
            for _ in 0..50 {
                assert!(config.delay_for_attempt(attempt, cap) <= cap);
            }
        }
    }

    #[test]
    fn negative_multiplier_yields_no_delay() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(10))
            .with_backoff_multiplier(-2.0);

        assert_eq!(config.delay_for_attempt(3, Duration::from_secs(1)), Duration::ZERO);
        assert!(config.delay_for_attempt(4, Duration::from_secs(1)) <= Duration::from_millis(50));
    }

    #[test]
    fn immediate_has_no_delay() {
        let config = RetryConfig::immediate(3);
        assert_eq!(config.critical_max_attempts, 3);
        assert_eq!(config.delay_for_attempt(3, Duration::from_secs(1)), Duration::ZERO);
    }
}
