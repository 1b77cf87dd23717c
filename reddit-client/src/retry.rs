use radar_core::{CoreError, RedditApiError};
use std::time::Duration;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts per request, the first one included
    pub max_attempts: u32,
    /// Base delay for exponential backoff (in milliseconds)
    pub base_delay_ms: u64,
    /// Maximum delay between retries (in milliseconds)
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Maximum jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// Create retry config optimized for Reddit API
    pub fn reddit() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 500,
            max_delay_ms: 4000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.2, // 20% jitter to prevent thundering herd
        }
    }

    /// Caps every backoff so a retry can still land inside the window.
    pub fn within_window(mut self, window: Duration) -> Self {
        let window_ms = window.as_millis().min(u64::MAX as u128) as u64;
        self.max_delay_ms = self.max_delay_ms.min(window_ms / 2);
        self.base_delay_ms = self.base_delay_ms.min(self.max_delay_ms);
        self
    }
}

/// Retry strategy based on error type
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// Retry with exponential backoff
    Retry,
    /// Retry after the delay the server asked for
    RetryWithDelay(Duration),
    /// Don't retry (for permanent failures)
    NoRetry,
}

/// Only rate limiting is retried within a search: every other failure
/// simply removes that source from the result.
pub fn get_retry_strategy(error: &CoreError) -> RetryStrategy {
    match error {
        CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after }) => {
            if *retry_after > 0 {
                RetryStrategy::RetryWithDelay(Duration::from_secs(*retry_after))
            } else {
                RetryStrategy::Retry
            }
        }
        _ => RetryStrategy::NoRetry,
    }
}

/// Calculate delay with exponential backoff and jitter
pub fn calculate_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let base_delay = Duration::from_millis(config.base_delay_ms);
    let max_delay = Duration::from_millis(config.max_delay_ms);

    let exponential_delay = if attempt == 0 {
        base_delay
    } else {
        let multiplier = config.backoff_multiplier.powi(attempt as i32);
        let delay_ms = (config.base_delay_ms as f64 * multiplier) as u64;
        Duration::from_millis(delay_ms.min(config.max_delay_ms))
    };

    let jitter_range = (exponential_delay.as_millis() as f64 * config.jitter_factor) as u64;
    let jitter = fastrand::u64(0..=jitter_range);
    let final_delay = exponential_delay + Duration::from_millis(jitter);

    final_delay.min(max_delay)
}

/// Delay before the given retry round of a request that failed with `error`.
pub fn delay_for(error: &CoreError, attempt: u32, config: &RetryConfig) -> Duration {
    match get_retry_strategy(error) {
        RetryStrategy::RetryWithDelay(delay) => delay.min(Duration::from_millis(config.max_delay_ms)),
        _ => calculate_delay(attempt, config),
    }
}
