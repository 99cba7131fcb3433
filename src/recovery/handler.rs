/// Error handler with strategy dispatch and bounded history
///
/// The single entry point callers use when an operation fails: classify once,
/// log with severity, walk the routed strategies until one succeeds or one
/// fails authoritatively, and record the outcome. Construct one handler per
/// process or session and pass it down; lifecycle is explicit, there is no
/// global instance.
use super::strategies::{
    default_strategy_routes, ConfigFixRecovery, NetworkRecovery, RecoveryContext, RecoveryResult,
    RecoveryStrategy, RetryRecovery, RollbackRecovery,
};
use crate::error::{ClassifiedError, ErrorClassifier, ErrorContext, ErrorKind, Severity};
use crate::rollback::RollbackManager;
use crate::McpError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Bounded error history cap (FIFO eviction).
const DEFAULT_MAX_HISTORY: usize = 100;

/// One handled error and what recovery did about it.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub error: ClassifiedError,
    pub result: RecoveryResult,
}

/// Rollup over the handler's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorStatistics {
    pub total_errors: usize,
    pub error_kinds: HashMap<String, usize>,
    pub successful_recoveries: usize,
    pub recovery_rate: f64,
    pub most_common_kind: Option<ErrorKind>,
}

/// Host information attached to diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub kernel_version: Option<String>,
    pub host_name: Option<String>,
    pub total_memory_bytes: u64,
}

impl SystemInfo {
    pub fn collect() -> Self {
        let mut sys = sysinfo::System::new();
        sys.refresh_memory();

        Self {
            os: sysinfo::System::name(),
            os_version: sysinfo::System::os_version(),
            kernel_version: sysinfo::System::kernel_version(),
            host_name: sysinfo::System::host_name(),
            total_memory_bytes: sys.total_memory(),
        }
    }
}

/// Diagnostic bundle for one error, for logs or a human-facing layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDiagnostics {
    pub error_code: String,
    pub timestamp: DateTime<Utc>,
    pub suggested_fixes: Vec<String>,
    pub system_info: SystemInfo,
}

/// Main error handler with recovery capabilities.
pub struct ErrorHandler {
    session_id: Uuid,
    classifier: ErrorClassifier,
    strategies: Vec<Box<dyn RecoveryStrategy>>,
    routes: HashMap<ErrorKind, Vec<&'static str>>,
    history: VecDeque<ErrorRecord>,
    max_history: usize,
}

impl ErrorHandler {
    /// Build a handler with the default strategy chain: retry, rollback,
    /// configuration fixer, network fixer.
    pub fn new(rollback_manager: Arc<Mutex<RollbackManager>>) -> Self {
        let strategies: Vec<Box<dyn RecoveryStrategy>> = vec![
            Box::new(RetryRecovery::default()),
            Box::new(RollbackRecovery::new(rollback_manager)),
            Box::new(ConfigFixRecovery),
            Box::new(NetworkRecovery),
        ];

        Self {
            session_id: Uuid::new_v4(),
            classifier: ErrorClassifier::new(),
            strategies,
            routes: default_strategy_routes(),
            history: VecDeque::new(),
            max_history: DEFAULT_MAX_HISTORY,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Append a custom strategy to the chain. Route it with `set_routes` to
    /// make it reachable for specific kinds.
    pub fn register_strategy(&mut self, strategy: Box<dyn RecoveryStrategy>) {
        self.strategies.push(strategy);
    }

    /// Replace the ordered strategy chain consulted for one kind.
    pub fn set_routes(&mut self, kind: ErrorKind, chain: Vec<&'static str>) {
        self.routes.insert(kind, chain);
    }

    /// Main error handling entry point: classify with defaults, then recover.
    pub fn handle_error(
        &mut self,
        error: McpError,
        context: Option<ErrorContext>,
        auto_recover: bool,
    ) -> RecoveryResult {
        let classified = match context {
            Some(context) => self.classifier.classify(error, context),
            None => ClassifiedError::new(error),
        };
        self.handle_classified(classified, auto_recover)
    }

    /// Handle an already-classified error (callers that overrode severity or
    /// suggested actions come through here).
    pub fn handle_classified(
        &mut self,
        error: ClassifiedError,
        auto_recover: bool,
    ) -> RecoveryResult {
        self.log_error(&error);

        let result = if auto_recover {
            self.attempt_recovery(&error, &RecoveryContext::default())
        } else {
            RecoveryResult::failure("manual_handling", "Error reported for manual handling")
                .with_manual_intervention()
        };

        self.history.push_back(ErrorRecord {
            timestamp: Utc::now(),
            error,
            result: result.clone(),
        });
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }

        result
    }

    /// Walk the routed strategies in order.
    ///
    /// The first strategy that applies and succeeds is the final answer. A
    /// strategy that fails with `manual_intervention_required` is authoritative
    /// and stops the walk. If nothing succeeds, manual intervention is
    /// required.
    pub fn attempt_recovery(
        &self,
        error: &ClassifiedError,
        context: &RecoveryContext,
    ) -> RecoveryResult {
        let chain = self.routes.get(&error.kind());
        let fallback: Vec<&'static str>;
        let candidates: &[&'static str] = match chain {
            Some(chain) => chain,
            None => {
                fallback = self.strategies.iter().map(|s| s.name()).collect();
                &fallback
            }
        };

        for name in candidates {
            let strategy = match self.strategies.iter().find(|s| s.name() == *name) {
                Some(strategy) => strategy,
                None => continue,
            };

            if !strategy.applies_to(error) {
                continue;
            }

            tracing::info!(
                session_id = %self.session_id,
                strategy = name,
                code = error.code(),
                "Attempting recovery"
            );
            let result = strategy.recover(error, context);

            if result.success {
                tracing::info!(
                    session_id = %self.session_id,
                    strategy = name,
                    message = %result.message,
                    "Recovery successful"
                );
                return result;
            }

            tracing::warn!(
                session_id = %self.session_id,
                strategy = name,
                message = %result.message,
                "Recovery failed"
            );
            if result.manual_intervention_required {
                // Authoritative failure, not a cue to try the next strategy
                return result;
            }
        }

        RecoveryResult::failure("no_recovery", "No automatic recovery available")
            .with_manual_intervention()
    }

    /// Log with level mapped from severity, carrying the stable code and
    /// whatever context the error has.
    fn log_error(&self, error: &ClassifiedError) {
        let operation = error.context.as_ref().map(|c| c.operation.as_str());
        let server = error.context.as_ref().and_then(|c| c.server_name.as_deref());
        let platform = error
            .context
            .as_ref()
            .and_then(|c| c.platform_key.as_deref());

        match error.severity {
            Severity::Critical | Severity::Error => tracing::error!(
                session_id = %self.session_id,
                code = error.code(),
                severity = %error.severity,
                operation,
                server,
                platform,
                "{}", error.error
            ),
            Severity::Warning => tracing::warn!(
                session_id = %self.session_id,
                code = error.code(),
                operation,
                server,
                platform,
                "{}", error.error
            ),
            Severity::Info => tracing::info!(
                session_id = %self.session_id,
                code = error.code(),
                operation,
                server,
                platform,
                "{}", error.error
            ),
        }
    }

    /// Generate a diagnostic bundle for an error.
    pub fn diagnostics(&self, error: &ClassifiedError) -> ErrorDiagnostics {
        ErrorDiagnostics {
            error_code: error.code().to_string(),
            timestamp: Utc::now(),
            suggested_fixes: self.classifier.suggested_fixes(&error.error),
            system_info: SystemInfo::collect(),
        }
    }

    /// Recent errors, oldest first, at most `limit`.
    pub fn recent_errors(&self, limit: usize) -> Vec<&ErrorRecord> {
        let skip = self.history.len().saturating_sub(limit);
        self.history.iter().skip(skip).collect()
    }

    /// Statistics over the bounded history.
    pub fn statistics(&self) -> ErrorStatistics {
        if self.history.is_empty() {
            return ErrorStatistics {
                total_errors: 0,
                error_kinds: HashMap::new(),
                successful_recoveries: 0,
                recovery_rate: 0.0,
                most_common_kind: None,
            };
        }

        let mut kind_counts: HashMap<ErrorKind, usize> = HashMap::new();
        let mut successful = 0usize;
        for record in &self.history {
            *kind_counts.entry(record.error.kind()).or_insert(0) += 1;
            if record.result.success {
                successful += 1;
            }
        }

        let most_common_kind = kind_counts
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(kind, _)| *kind);

        ErrorStatistics {
            total_errors: self.history.len(),
            error_kinds: kind_counts
                .into_iter()
                .map(|(kind, count)| (kind.code().to_string(), count))
                .collect(),
            successful_recoveries: successful,
            recovery_rate: successful as f64 / self.history.len() as f64 * 100.0,
            most_common_kind,
        }
    }
}
