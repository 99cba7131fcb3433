/// Retry and backoff engine
///
/// Computes delay sequences under configurable strategies, decides retry
/// eligibility from attempt budgets and error kinds, and keeps an
/// observational journal of attempts. Nothing here feeds control flow back
/// into the caller beyond the delay and the retry decision.
pub mod backoff;

pub use backoff::{BackoffEngine, BackoffStrategy, RetryAttempt, RetryConfig, RetryStatistics};
