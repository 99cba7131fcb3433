/// Recovery strategies and their routing table
///
/// Each strategy answers two questions: does it apply to a classified error
/// (`applies_to`), and what happened when it tried (`recover`). Strategy
/// selection is driven by an explicit kind-to-strategy routing table rather
/// than inspecting concrete error types at runtime.
use crate::error::{ClassifiedError, ErrorKind, SuggestedAction};
use crate::rollback::RollbackManager;
use crate::McpError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Uniform result contract of every recovery strategy and of the dispatcher.
///
/// `action_taken` is a diagnostic label, never used for control flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryResult {
    pub success: bool,
    pub action_taken: String,
    pub message: String,
    pub retry_suggested: bool,
    pub manual_intervention_required: bool,
}

impl RecoveryResult {
    pub fn success(action_taken: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            action_taken: action_taken.into(),
            message: message.into(),
            retry_suggested: false,
            manual_intervention_required: false,
        }
    }

    pub fn failure(action_taken: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            action_taken: action_taken.into(),
            message: message.into(),
            retry_suggested: false,
            manual_intervention_required: false,
        }
    }

    pub fn with_retry_suggested(mut self) -> Self {
        self.retry_suggested = true;
        self
    }

    pub fn with_manual_intervention(mut self) -> Self {
        self.manual_intervention_required = true;
        self
    }
}

/// Caller-supplied state threaded through a recovery attempt.
#[derive(Debug, Clone, Default)]
pub struct RecoveryContext {
    /// How many times the failing operation has already been retried
    pub retry_count: u32,

    /// Arbitrary key/value data for custom strategies
    pub data: HashMap<String, String>,
}

/// A policy object that attempts to resolve a classified error.
pub trait RecoveryStrategy: Send + Sync {
    /// Stable name used by the routing table.
    fn name(&self) -> &'static str;

    /// Whether this strategy can do anything for the given error right now.
    fn applies_to(&self, error: &ClassifiedError) -> bool;

    /// Attempt recovery. Must not panic; failures are reported in the result.
    fn recover(&self, error: &ClassifiedError, context: &RecoveryContext) -> RecoveryResult;
}

/// Suggests retrying with exponential backoff while budget remains.
pub struct RetryRecovery {
    max_retries: u32,
    base_delay: Duration,
}

impl RetryRecovery {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }
}

impl Default for RetryRecovery {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

impl RecoveryStrategy for RetryRecovery {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn applies_to(&self, error: &ClassifiedError) -> bool {
        error.suggests(SuggestedAction::Retry)
    }

    fn recover(&self, _error: &ClassifiedError, context: &RecoveryContext) -> RecoveryResult {
        if context.retry_count >= self.max_retries {
            return RecoveryResult::failure(
                "retry_exhausted",
                format!("Max retries ({}) exceeded", self.max_retries),
            )
            .with_manual_intervention();
        }

        let delay = self.base_delay * 2u32.saturating_pow(context.retry_count);
        RecoveryResult::success(
            "retry_with_backoff",
            format!(
                "Retrying operation in {} (attempt {}/{})",
                humantime::format_duration(delay),
                context.retry_count + 1,
                self.max_retries
            ),
        )
        .with_retry_suggested()
    }
}

/// Rolls back the most recent rollback-able transaction.
pub struct RollbackRecovery {
    rollback_manager: Arc<Mutex<RollbackManager>>,
}

impl RollbackRecovery {
    pub fn new(rollback_manager: Arc<Mutex<RollbackManager>>) -> Self {
        Self { rollback_manager }
    }
}

impl RecoveryStrategy for RollbackRecovery {
    fn name(&self) -> &'static str {
        "rollback"
    }

    fn applies_to(&self, error: &ClassifiedError) -> bool {
        if !error.suggests(SuggestedAction::Rollback) {
            return false;
        }
        match self.rollback_manager.lock() {
            Ok(manager) => manager.can_rollback(None),
            Err(_) => false,
        }
    }

    fn recover(&self, _error: &ClassifiedError, _context: &RecoveryContext) -> RecoveryResult {
        let mut manager = match self.rollback_manager.lock() {
            Ok(manager) => manager,
            Err(_) => {
                return RecoveryResult::failure(
                    "rollback_error",
                    "Rollback manager lock poisoned",
                )
                .with_manual_intervention()
            }
        };

        let transaction_id = match manager.get_last_transaction() {
            Some(tx) => tx.transaction_id.clone(),
            None => {
                return RecoveryResult::failure("rollback_error", "No transaction to roll back")
                    .with_manual_intervention()
            }
        };

        match manager.rollback_transaction(Some(&transaction_id)) {
            Ok(report) if report.succeeded => RecoveryResult::success(
                "rollback_successful",
                "Successfully rolled back changes to previous state",
            ),
            Ok(_) => RecoveryResult::failure("rollback_failed", "Failed to rollback changes")
                .with_manual_intervention(),
            Err(e) => RecoveryResult::failure(
                "rollback_error",
                format!("Error during rollback: {}", e),
            )
            .with_manual_intervention(),
        }
    }
}

/// Analyzes configuration errors and names the likely fix.
///
/// Never succeeds on its own: configuration problems need a human, but the
/// analysis narrows where to look.
#[derive(Debug, Default)]
pub struct ConfigFixRecovery;

impl RecoveryStrategy for ConfigFixRecovery {
    fn name(&self) -> &'static str {
        "config_fix"
    }

    fn applies_to(&self, error: &ClassifiedError) -> bool {
        error.kind() == ErrorKind::Configuration
    }

    fn recover(&self, error: &ClassifiedError, _context: &RecoveryContext) -> RecoveryResult {
        let (config_path, field_name) = match &error.error {
            McpError::Configuration {
                config_path,
                field_name,
                ..
            } => (config_path.as_deref(), field_name.as_deref()),
            _ => {
                return RecoveryResult::failure("not_applicable", "Not a configuration error")
            }
        };

        let mut fixes: Vec<&str> = Vec::new();
        if config_path.is_some() {
            if let Some(field) = field_name {
                match field {
                    "api_key" | "token" => fixes.push("Check API key configuration"),
                    "path" | "file_path" => {
                        fixes.push("Verify file paths exist and are accessible")
                    }
                    "url" | "endpoint" => fixes.push("Check URL format and accessibility"),
                    _ => {}
                }
            }
        }

        if fixes.is_empty() {
            RecoveryResult::failure(
                "config_generic",
                "Configuration error requires manual review",
            )
            .with_manual_intervention()
        } else {
            RecoveryResult::failure(
                "config_analysis",
                format!(
                    "Configuration issue detected. Suggested fixes: {}",
                    fixes.join(", ")
                ),
            )
            .with_manual_intervention()
        }
    }
}

/// Interprets network failures by status code.
#[derive(Debug, Default)]
pub struct NetworkRecovery;

impl RecoveryStrategy for NetworkRecovery {
    fn name(&self) -> &'static str {
        "network"
    }

    fn applies_to(&self, error: &ClassifiedError) -> bool {
        error.kind() == ErrorKind::Network
    }

    fn recover(&self, error: &ClassifiedError, _context: &RecoveryContext) -> RecoveryResult {
        let status_code = match &error.error {
            McpError::Network { status_code, .. } => *status_code,
            _ => return RecoveryResult::failure("not_applicable", "Not a network error"),
        };

        match status_code {
            Some(404) => RecoveryResult::failure(
                "endpoint_not_found",
                "Endpoint not found. Check URL configuration.",
            )
            .with_manual_intervention(),
            Some(401) => RecoveryResult::failure(
                "authentication_failed",
                "Authentication failed. Check API credentials.",
            )
            .with_manual_intervention(),
            Some(code) if code >= 500 => RecoveryResult::success(
                "server_error_retry",
                "Server error detected. Will retry with backoff.",
            )
            .with_retry_suggested(),
            _ => RecoveryResult::success(
                "network_retry",
                "Network error detected. Will retry operation.",
            )
            .with_retry_suggested(),
        }
    }
}

/// Default routing: which strategies to consult, in order, per error kind.
///
/// Retry and rollback are candidates for every kind (their `applies_to` gates
/// on the error's suggested actions and on transaction state); the
/// kind-specific fixers are routed only to their kind.
pub fn default_strategy_routes() -> HashMap<ErrorKind, Vec<&'static str>> {
    let mut routes = HashMap::new();
    for kind in ErrorKind::ALL {
        let mut chain = vec!["retry", "rollback"];
        match kind {
            ErrorKind::Configuration => chain.push("config_fix"),
            ErrorKind::Network => chain.push("network"),
            _ => {}
        }
        routes.insert(kind, chain);
    }
    routes
}
