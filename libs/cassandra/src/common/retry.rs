use std::time::Duration;

/// Backoff policy for re-applying a configuration whose pool failed to build.
///
/// The default is a fixed one second delay with no attempt limit: the watcher
/// keeps serving on the previous pool and tries again until it succeeds or a
/// newer configuration arrives.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (`None` retries forever)
    pub max_retries: Option<u32>,

    /// Initial delay between retries in milliseconds
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff (1.0 keeps the delay fixed)
    pub backoff_multiplier: f64,

    /// Whether to add jitter to prevent thundering herd
    pub use_jitter: bool,
}

impl RetryConfig {
    /// Create a new retry configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed delay between attempts, retrying forever
    pub fn fixed(delay: Duration) -> Self {
        let ms = delay.as_millis() as u64;
        Self {
            max_retries: None,
            initial_delay_ms: ms,
            max_delay_ms: ms,
            backoff_multiplier: 1.0,
            use_jitter: false,
        }
    }

    /// Exponential backoff starting at `initial` and capped at `max`, with jitter
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            max_retries: None,
            initial_delay_ms: initial.as_millis() as u64,
            max_delay_ms: max.as_millis() as u64,
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }

    /// Limit the number of retry attempts
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Disable jitter
    pub fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }

    /// Whether another attempt is allowed after `attempt` failures
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_retries.is_none_or(|max| attempt <= max)
    }

    /// Delay to wait before retry number `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let raw = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let delay = (raw as u64).min(self.max_delay_ms);

        let delay = if self.use_jitter {
            apply_jitter(delay)
        } else {
            delay
        };
        Duration::from_millis(delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(1))
    }
}

/// Apply jitter to a delay value to prevent thundering herd
///
/// Uses a random value between 50% and 100% of the original delay
fn apply_jitter(delay: u64) -> u64 {
    let random_factor = rand::random::<f64>() * 0.5 + 0.5;
    (delay as f64 * random_factor) as u64
}
