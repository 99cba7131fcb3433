/// Backoff strategies with jitter for retry operations
///
/// Delay math is done in f64 seconds. Every computed delay, whatever the
/// strategy, is clamped to `[0.1s, max_delay]`; the floor keeps zero or
/// negative jittered delays from turning into a tight retry loop.
use crate::error::ErrorKind;
use crate::McpError;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lower clamp applied to every computed delay.
const MIN_DELAY_SECS: f64 = 0.1;

/// Backoff strategies for retry operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `base * attempt`
    Linear,

    /// `base * multiplier^(attempt - 1)`
    Exponential,

    /// `base * fib(attempt)`, fib(0) = fib(1) = 1
    Fibonacci,

    /// `base + uniform(0, base * attempt)`
    RandomJitter,

    /// Reserved for caller-specific tuning; computes like `Exponential`
    Custom,
}

/// Configuration for retry operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts (>= 1)
    pub max_attempts: u32,

    pub base_delay: Duration,

    /// Upper clamp for every computed delay
    pub max_delay: Duration,

    pub backoff_strategy: BackoffStrategy,

    /// Growth factor for exponential backoff
    pub backoff_multiplier: f64,

    /// Apply symmetric jitter (`delay ± delay * jitter_range`)
    pub jitter: bool,

    pub jitter_range: f64,

    /// Overall budget measured from the first attempt, independent of
    /// per-attempt delays
    pub timeout: Option<Duration>,

    /// When present, only these kinds are retried
    pub retry_on: Option<Vec<ErrorKind>>,

    /// Kinds that stop retrying immediately
    pub stop_on: Option<Vec<ErrorKind>>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_strategy: BackoffStrategy::Exponential,
            backoff_multiplier: 2.0,
            jitter: true,
            jitter_range: 0.1,
            timeout: None,
            retry_on: None,
            stop_on: None,
        }
    }
}

impl RetryConfig {
    /// Network operations: aggressive retry with exponential backoff.
    pub fn network() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_strategy: BackoffStrategy::Exponential,
            backoff_multiplier: 2.0,
            jitter: true,
            timeout: Some(Duration::from_secs(300)),
            ..Self::default()
        }
    }

    /// Deployment operations: moderate retry with longer delays.
    pub fn deployment() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff_strategy: BackoffStrategy::Exponential,
            backoff_multiplier: 1.5,
            jitter: true,
            timeout: Some(Duration::from_secs(600)),
            ..Self::default()
        }
    }

    /// Configuration operations: quick retry with linear backoff.
    pub fn configuration() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            backoff_strategy: BackoffStrategy::Linear,
            jitter: false,
            timeout: Some(Duration::from_secs(30)),
            ..Self::default()
        }
    }

    /// Health checks: frequent retry with short fibonacci delays.
    pub fn health_check() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_strategy: BackoffStrategy::Fibonacci,
            jitter: true,
            timeout: Some(Duration::from_secs(60)),
            ..Self::default()
        }
    }

    /// File operations: quick retry with minimal delay.
    pub fn file_operation() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            backoff_strategy: BackoffStrategy::Linear,
            jitter: false,
            timeout: Some(Duration::from_secs(10)),
            ..Self::default()
        }
    }

    /// Preset for a caller-supplied operation type, if one exists.
    pub fn for_operation_type(operation_type: &str) -> Option<Self> {
        match operation_type {
            "network" => Some(Self::network()),
            "deployment" => Some(Self::deployment()),
            "configuration" => Some(Self::configuration()),
            "health_check" => Some(Self::health_check()),
            "file_operation" => Some(Self::file_operation()),
            _ => None,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Information about one retry attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// 1-based attempt number
    pub attempt_number: u32,

    /// Delay computed before this attempt (zero for the first attempt and for
    /// terminal attempts)
    pub delay: Duration,

    pub timestamp: DateTime<Utc>,

    /// Error captured when the attempt failed
    pub error: Option<McpError>,

    pub success: bool,

    /// Measured duration of the underlying operation call
    pub duration: Option<Duration>,
}

/// Aggregate view over the attempt journal. Purely observational.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryStatistics {
    pub total_attempts: usize,
    pub successful_attempts: usize,
    pub failed_attempts: usize,
    pub success_rate: f64,
    pub total_delay: Duration,
    pub average_delay: Duration,
    pub max_delay: Duration,
    pub total_duration: Duration,
}

/// Computes delays and retry decisions for one logical operation, recording
/// each attempt along the way.
#[derive(Debug, Clone)]
pub struct BackoffEngine {
    config: RetryConfig,
    attempts: Vec<RetryAttempt>,
}

impl BackoffEngine {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempts: Vec::new(),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn attempts(&self) -> &[RetryAttempt] {
        &self.attempts
    }

    /// Calculate the delay before the given 1-based attempt.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay.as_secs_f64();
        let mut rng = rand::thread_rng();

        let mut delay = match self.config.backoff_strategy {
            BackoffStrategy::Linear => base * attempt as f64,
            BackoffStrategy::Exponential | BackoffStrategy::Custom => {
                base * self
                    .config
                    .backoff_multiplier
                    .powi(attempt.saturating_sub(1) as i32)
            }
            BackoffStrategy::Fibonacci => base * fibonacci(attempt) as f64,
            BackoffStrategy::RandomJitter => base + rng.gen_range(0.0..=base * attempt as f64),
        };

        if self.config.jitter {
            let jitter_amount = delay * self.config.jitter_range;
            delay += rng.gen_range(-jitter_amount..=jitter_amount);
        }

        delay = delay
            .min(self.config.max_delay.as_secs_f64())
            .max(MIN_DELAY_SECS);

        Duration::from_secs_f64(delay)
    }

    /// Decide whether to retry after a failed attempt.
    ///
    /// False once the attempt budget is spent; false for kinds on the stop
    /// list; when an allow list is present, only its kinds are retried.
    pub fn should_retry(&self, attempt: u32, error: &McpError) -> bool {
        if attempt > self.config.max_attempts {
            return false;
        }

        let kind = error.kind();

        if let Some(stop_on) = &self.config.stop_on {
            if stop_on.contains(&kind) {
                return false;
            }
        }

        if let Some(retry_on) = &self.config.retry_on {
            return retry_on.contains(&kind);
        }

        true
    }

    /// Record information about an attempt.
    pub fn record_attempt(
        &mut self,
        attempt_number: u32,
        delay: Duration,
        error: Option<McpError>,
        success: bool,
        duration: Option<Duration>,
    ) {
        self.attempts.push(RetryAttempt {
            attempt_number,
            delay,
            timestamp: Utc::now(),
            error,
            success,
            duration,
        });
    }

    /// Aggregate statistics over the attempt journal.
    pub fn statistics(&self) -> RetryStatistics {
        if self.attempts.is_empty() {
            return RetryStatistics {
                total_attempts: 0,
                successful_attempts: 0,
                failed_attempts: 0,
                success_rate: 0.0,
                total_delay: Duration::ZERO,
                average_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
                total_duration: Duration::ZERO,
            };
        }

        let successful = self.attempts.iter().filter(|a| a.success).count();
        let total_delay: Duration = self.attempts.iter().map(|a| a.delay).sum();
        let max_delay = self
            .attempts
            .iter()
            .map(|a| a.delay)
            .max()
            .unwrap_or(Duration::ZERO);
        let total_duration: Duration = self.attempts.iter().filter_map(|a| a.duration).sum();

        RetryStatistics {
            total_attempts: self.attempts.len(),
            successful_attempts: successful,
            failed_attempts: self.attempts.len() - successful,
            success_rate: successful as f64 / self.attempts.len() as f64 * 100.0,
            total_delay,
            average_delay: total_delay / self.attempts.len() as u32,
            max_delay,
            total_duration,
        }
    }
}

/// fib(0) = fib(1) = 1
fn fibonacci(n: u32) -> u64 {
    if n <= 1 {
        return 1;
    }
    let (mut a, mut b) = (1u64, 1u64);
    for _ in 2..=n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    b
}
