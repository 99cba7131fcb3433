/// Automatic recovery orchestration with backoff
///
/// Wraps one fallible async operation per logical operation id in the retry
/// engine. Admission is a bounded semaphore: when the configured number of
/// recoveries is in flight, new requests wait for a free slot instead of being
/// rejected. The only suspension points are that wait and the backoff sleep,
/// so other in-flight operations keep making progress. Cancellation is
/// cooperative: the flag is checked before each attempt, never mid-attempt.
use crate::retry::{BackoffEngine, RetryConfig};
use crate::{McpError, McpResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Default ceiling for concurrently running recoveries.
const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Default cap on the completed-operation history.
const DEFAULT_MAX_HISTORY: usize = 1000;

/// Cooperative cancellation handle for one in-flight recovery.
#[derive(Debug, Clone)]
pub struct RecoveryHandle {
    cancelled: Arc<AtomicBool>,
}

impl RecoveryHandle {
    fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Record of one finished (successful or not) recovery operation.
#[derive(Debug, Clone)]
pub struct CompletedRecovery {
    pub operation_id: String,
    pub operation_type: String,
    pub success: bool,
    pub attempts: usize,
    pub error: Option<McpError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Per-operation-type counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeStatistics {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

/// Rollup over the orchestrator's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStatistics {
    pub total_operations: usize,
    pub successful_operations: usize,
    pub failed_operations: usize,
    pub success_rate: f64,
    pub active_recoveries: usize,
    pub average_attempts: f64,
    pub operation_types: HashMap<String, TypeStatistics>,
}

/// Manages automatic recovery operations with intelligent retry logic.
///
/// Construct one per process or session and share it by reference; there is
/// no global instance.
pub struct AutoRecoveryManager {
    configs: HashMap<String, RetryConfig>,
    semaphore: Arc<Semaphore>,
    active: Mutex<HashMap<String, RecoveryHandle>>,
    history: Mutex<VecDeque<CompletedRecovery>>,
    max_history: usize,
}

impl AutoRecoveryManager {
    pub fn new() -> Self {
        Self::with_max_concurrent(DEFAULT_MAX_CONCURRENT)
    }

    /// Build with an explicit admission ceiling.
    pub fn with_max_concurrent(max_concurrent: usize) -> Self {
        let configs = [
            ("network", RetryConfig::network()),
            ("deployment", RetryConfig::deployment()),
            ("configuration", RetryConfig::configuration()),
            ("health_check", RetryConfig::health_check()),
            ("file_operation", RetryConfig::file_operation()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            configs,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            active: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            max_history: DEFAULT_MAX_HISTORY,
        }
    }

    /// Default retry config for an operation type, if one is registered.
    pub fn config_for(&self, operation_type: &str) -> Option<&RetryConfig> {
        self.configs.get(operation_type)
    }

    /// Register or replace the default config for an operation type.
    pub fn set_config(&mut self, operation_type: impl Into<String>, config: RetryConfig) {
        self.configs.insert(operation_type.into(), config);
    }

    /// Execute an operation with automatic recovery.
    ///
    /// Waits for a free recovery slot, then runs the operation under the
    /// retry engine: per-type default config (overridable per call), backoff
    /// sleeps between attempts, overall timeout enforced from the first
    /// attempt. Returns the operation's value or the last captured error.
    pub async fn execute_with_recovery<T, F, Fut>(
        &self,
        operation_id: &str,
        operation_type: &str,
        recovery_config: Option<RetryConfig>,
        mut operation: F,
    ) -> McpResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = McpResult<T>>,
    {
        if self.semaphore.available_permits() == 0 {
            tracing::warn!(operation_id, "Max concurrent recoveries reached, waiting for a slot");
        }
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| McpError::worker_thread("Recovery manager is shut down"))?;

        let config = recovery_config
            .or_else(|| self.configs.get(operation_type).cloned())
            .unwrap_or_default();
        let mut engine = BackoffEngine::new(config);

        let handle = RecoveryHandle::new();
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(operation_id.to_string(), handle.clone());

        let started_at = Utc::now();
        let result = self
            .run_attempts(operation_id, &mut engine, &handle, &mut operation)
            .await;

        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(operation_id);

        let record = CompletedRecovery {
            operation_id: operation_id.to_string(),
            operation_type: operation_type.to_string(),
            success: result.is_ok(),
            attempts: engine.attempts().len(),
            error: result.as_ref().err().cloned(),
            started_at,
            finished_at: Utc::now(),
        };
        match &result {
            Ok(_) => tracing::info!(
                operation_id,
                attempts = record.attempts,
                "Operation completed successfully"
            ),
            Err(error) => tracing::error!(
                operation_id,
                attempts = record.attempts,
                error = %error,
                "Operation failed after all attempts"
            ),
        }

        let mut history = self
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        history.push_back(record);
        while history.len() > self.max_history {
            history.pop_front();
        }

        result
    }

    /// The per-attempt loop: timeout gate, cancellation gate, invoke, retry
    /// decision, backoff sleep.
    async fn run_attempts<T, F, Fut>(
        &self,
        operation_id: &str,
        engine: &mut BackoffEngine,
        handle: &RecoveryHandle,
        operation: &mut F,
    ) -> McpResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = McpResult<T>>,
    {
        let start = Instant::now();
        let mut attempt: u32 = 1;

        loop {
            if handle.is_cancelled() {
                tracing::info!(operation_id, "Recovery operation cancelled");
                return Err(McpError::WorkerThread {
                    message: format!("Operation {} cancelled", operation_id),
                    worker_type: Some("auto_recovery".to_string()),
                    operation: Some(operation_id.to_string()),
                });
            }

            if let Some(timeout) = engine.config().timeout {
                if start.elapsed() > timeout {
                    let error = McpError::WorkerThread {
                        message: format!(
                            "Operation timed out after {}",
                            humantime::format_duration(Duration::from_secs(
                                start.elapsed().as_secs()
                            ))
                        ),
                        worker_type: Some("auto_recovery".to_string()),
                        operation: Some(operation_id.to_string()),
                    };
                    engine.record_attempt(
                        attempt,
                        Duration::ZERO,
                        Some(error.clone()),
                        false,
                        None,
                    );
                    return Err(error);
                }
            }

            let attempt_start = Instant::now();
            match operation().await {
                Ok(value) => {
                    engine.record_attempt(
                        attempt,
                        Duration::ZERO,
                        None,
                        true,
                        Some(attempt_start.elapsed()),
                    );
                    if attempt > 1 {
                        tracing::info!(operation_id, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    let duration = attempt_start.elapsed();
                    tracing::warn!(
                        operation_id,
                        attempt,
                        error = %error,
                        "Operation attempt failed"
                    );

                    let retry = attempt < engine.config().max_attempts
                        && engine.should_retry(attempt, &error);
                    if !retry {
                        engine.record_attempt(
                            attempt,
                            Duration::ZERO,
                            Some(error.clone()),
                            false,
                            Some(duration),
                        );
                        return Err(error);
                    }

                    let delay = engine.calculate_delay(attempt);
                    engine.record_attempt(
                        attempt,
                        delay,
                        Some(error.clone()),
                        false,
                        Some(duration),
                    );
                    tracing::info!(
                        operation_id,
                        attempt,
                        delay = %humantime::format_duration(delay),
                        "Retrying after delay"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Cancel an active recovery operation. The current attempt finishes; no
    /// further attempts start.
    pub fn cancel_recovery(&self, operation_id: &str) -> bool {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match active.get(operation_id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every active recovery. Returns how many were signalled.
    pub fn cancel_all_recoveries(&self) -> usize {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        for handle in active.values() {
            handle.cancel();
        }
        active.len()
    }

    /// Number of recoveries currently in flight.
    pub fn active_count(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Recent completed operations, oldest first, at most `limit`.
    pub fn recent_operations(&self, limit: usize) -> Vec<CompletedRecovery> {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Statistics over the completed-operation history.
    pub fn statistics(&self) -> RecoveryStatistics {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);

        if history.is_empty() {
            return RecoveryStatistics {
                total_operations: 0,
                successful_operations: 0,
                failed_operations: 0,
                success_rate: 0.0,
                active_recoveries: self.active_count(),
                average_attempts: 0.0,
                operation_types: HashMap::new(),
            };
        }

        let mut operation_types: HashMap<String, TypeStatistics> = HashMap::new();
        let mut successful = 0usize;
        let mut total_attempts = 0usize;

        for op in history.iter() {
            let entry = operation_types
                .entry(op.operation_type.clone())
                .or_default();
            entry.total += 1;
            if op.success {
                entry.successful += 1;
                successful += 1;
            } else {
                entry.failed += 1;
            }
            total_attempts += op.attempts;
        }

        let total = history.len();
        drop(history);

        RecoveryStatistics {
            total_operations: total,
            successful_operations: successful,
            failed_operations: total - successful,
            success_rate: successful as f64 / total as f64 * 100.0,
            active_recoveries: self.active_count(),
            average_attempts: total_attempts as f64 / total as f64,
            operation_types,
        }
    }
}

impl Default for AutoRecoveryManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::BackoffStrategy;
    use std::sync::atomic::AtomicU32;

    /// Tight config so tests spend milliseconds, not seconds, in backoff.
    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(200),
            backoff_strategy: BackoffStrategy::Linear,
            jitter: false,
            timeout: None,
            ..RetryConfig::default()
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let manager = AutoRecoveryManager::new();

        let result = manager
            .execute_with_recovery("op-1", "configuration", Some(fast_config(3)), || async {
                Ok::<_, McpError>(42)
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        let stats = manager.statistics();
        assert_eq!(stats.total_operations, 1);
        assert_eq!(stats.successful_operations, 1);
        assert!((stats.average_attempts - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let manager = AutoRecoveryManager::new();
        let calls = Arc::new(AtomicU32::new(0));

        let calls_clone = calls.clone();
        let result = manager
            .execute_with_recovery("op-2", "network", Some(fast_config(5)), move || {
                let calls = calls_clone.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(McpError::network("flaky"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let ops = manager.recent_operations(10);
        assert_eq!(ops.len(), 1);
        assert!(ops[0].success);
        assert_eq!(ops[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_return_last_error() {
        let manager = AutoRecoveryManager::new();

        let result: McpResult<()> = manager
            .execute_with_recovery("op-3", "network", Some(fast_config(2)), || async {
                Err(McpError::network("always down"))
            })
            .await;

        let error = result.unwrap_err();
        assert_eq!(error.message(), "always down");

        let ops = manager.recent_operations(10);
        assert!(!ops[0].success);
        assert_eq!(ops[0].attempts, 2);
        assert!(ops[0].error.is_some());
    }

    #[tokio::test]
    async fn test_stop_list_prevents_retry() {
        let manager = AutoRecoveryManager::new();
        let calls = Arc::new(AtomicU32::new(0));

        let config = RetryConfig {
            stop_on: Some(vec![crate::error::ErrorKind::Permission]),
            ..fast_config(5)
        };

        let calls_clone = calls.clone();
        let result: McpResult<()> = manager
            .execute_with_recovery("op-4", "file_operation", Some(config), move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(McpError::permission("denied"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_overall_timeout_stops_attempts() {
        let manager = AutoRecoveryManager::new();

        let config = RetryConfig {
            max_attempts: 100,
            timeout: Some(Duration::from_millis(50)),
            base_delay: Duration::from_millis(10),
            jitter: false,
            backoff_strategy: BackoffStrategy::Linear,
            ..RetryConfig::default()
        };

        let result: McpResult<()> = manager
            .execute_with_recovery("op-5", "network", Some(config), || async {
                Err(McpError::network("down"))
            })
            .await;

        let error = result.unwrap_err();
        assert_eq!(error.kind(), crate::error::ErrorKind::WorkerThread);
        assert!(error.message().contains("timed out"));
    }

    #[tokio::test]
    async fn test_admission_ceiling_delays_rather_than_rejects() {
        let manager = Arc::new(AutoRecoveryManager::with_max_concurrent(2));
        let in_flight = Arc::new(AtomicU32::new(0));
        let max_observed = Arc::new(AtomicU32::new(0));

        let mut tasks = Vec::new();
        for i in 0..5 {
            let manager = manager.clone();
            let in_flight = in_flight.clone();
            let max_observed = max_observed.clone();
            tasks.push(tokio::spawn(async move {
                manager
                    .execute_with_recovery(
                        &format!("op-{}", i),
                        "configuration",
                        Some(fast_config(1)),
                        move || {
                            let in_flight = in_flight.clone();
                            let max_observed = max_observed.clone();
                            async move {
                                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                                max_observed.fetch_max(now, Ordering::SeqCst);
                                tokio::time::sleep(Duration::from_millis(30)).await;
                                in_flight.fetch_sub(1, Ordering::SeqCst);
                                Ok::<_, McpError>(())
                            }
                        },
                    )
                    .await
            }));
        }

        for task in tasks {
            // Every operation completes: waiting, never rejection
            task.await.unwrap().unwrap();
        }

        assert!(max_observed.load(Ordering::SeqCst) <= 2);
        assert_eq!(manager.statistics().total_operations, 5);
    }

    #[tokio::test]
    async fn test_cancellation_stops_further_attempts() {
        let manager = Arc::new(AutoRecoveryManager::new());

        let config = RetryConfig {
            max_attempts: 50,
            base_delay: Duration::from_millis(100),
            jitter: false,
            backoff_strategy: BackoffStrategy::Linear,
            timeout: None,
            ..RetryConfig::default()
        };

        let manager_clone = manager.clone();
        let task = tokio::spawn(async move {
            manager_clone
                .execute_with_recovery("op-cancel", "network", Some(config), || async {
                    Err::<(), _>(McpError::network("down"))
                })
                .await
        });

        // Let the first attempt fail and the backoff sleep begin
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(manager.cancel_recovery("op-cancel"));

        let result = task.await.unwrap();
        let error = result.unwrap_err();
        assert!(error.message().contains("cancelled"));

        let ops = manager.recent_operations(10);
        assert!(ops[0].attempts < 50);
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_unknown_operation_returns_false() {
        let manager = AutoRecoveryManager::new();
        assert!(!manager.cancel_recovery("never-started"));
        assert_eq!(manager.cancel_all_recoveries(), 0);
    }

    #[tokio::test]
    async fn test_per_type_statistics() {
        let manager = AutoRecoveryManager::new();

        manager
            .execute_with_recovery("ok-1", "network", Some(fast_config(1)), || async {
                Ok::<_, McpError>(())
            })
            .await
            .unwrap();
        let _ = manager
            .execute_with_recovery("fail-1", "deployment", Some(fast_config(1)), || async {
                Err::<(), _>(McpError::deployment("no"))
            })
            .await;

        let stats = manager.statistics();
        assert_eq!(stats.total_operations, 2);
        assert_eq!(stats.operation_types["network"].successful, 1);
        assert_eq!(stats.operation_types["deployment"].failed, 1);
        assert!((stats.success_rate - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_default_configs_registered() {
        let manager = AutoRecoveryManager::new();
        assert!(manager.config_for("network").is_some());
        assert!(manager.config_for("health_check").is_some());
        assert!(manager.config_for("unknown").is_none());
    }
}
