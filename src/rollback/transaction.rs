/// Transaction and action records for the rollback manager
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// States a rollback transaction moves through.
///
/// `Pending → InProgress → Completed | Failed`; `Cancelled` is the terminal
/// state for transactions abandoned without commit or rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Pending => write!(f, "pending"),
            TransactionState::InProgress => write!(f, "in_progress"),
            TransactionState::Completed => write!(f, "completed"),
            TransactionState::Failed => write!(f, "failed"),
            TransactionState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Individual action that can be rolled back.
///
/// The action type is an open string (`deploy`, `config_change`,
/// `file_modify`, `server_registration`, ...) so callers can introduce new
/// types without touching the transaction engine. Actions are immutable once
/// added to a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackAction {
    /// Unique within the owning transaction (`{action_type}_{index}`)
    pub action_id: String,

    /// Open action type driving undo dispatch
    pub action_type: String,

    pub description: String,

    pub server_name: Option<String>,

    pub platform_key: Option<String>,

    /// Files this action touches
    pub files_affected: Vec<PathBuf>,

    /// Point-in-time snapshot taken when the action was added, if files were
    /// affected and the snapshot succeeded
    pub backup_id: Option<String>,

    /// Literal content to write back when no file backup exists
    /// (map of path to content)
    pub rollback_data: Option<serde_json::Value>,

    pub timestamp: DateTime<Utc>,
}

/// A transaction containing multiple rollback actions.
///
/// Insertion order of `actions` is significant: rollback undoes them in
/// reverse, because later actions may depend on state created by earlier ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackTransaction {
    pub transaction_id: String,

    pub operation: String,

    pub description: String,

    pub actions: Vec<RollbackAction>,

    pub state: TransactionState,

    pub created_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    pub error_message: Option<String>,
}

impl RollbackTransaction {
    /// Open a new transaction in `Pending` state.
    pub fn new(operation: impl Into<String>, description: impl Into<String>) -> Self {
        let operation = operation.into();
        let created_at = Utc::now();
        let transaction_id = format!("{}_{}", operation, created_at.format("%Y%m%d_%H%M%S_%6f"));

        Self {
            transaction_id,
            operation,
            description: description.into(),
            actions: Vec::new(),
            state: TransactionState::Pending,
            created_at,
            completed_at: None,
            error_message: None,
        }
    }

    /// A transaction is rollback-able only once committed with at least one
    /// action. Failed or cancelled transactions are not retried automatically.
    pub fn can_rollback(&self) -> bool {
        self.state == TransactionState::Completed && !self.actions.is_empty()
    }

    pub fn summary(&self) -> TransactionSummary {
        TransactionSummary {
            transaction_id: self.transaction_id.clone(),
            operation: self.operation.clone(),
            description: self.description.clone(),
            state: self.state,
            actions_count: self.actions.len(),
            created_at: self.created_at,
            completed_at: self.completed_at,
            can_rollback: self.can_rollback(),
        }
    }
}

/// Compact view of a transaction for listings and dialogs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub transaction_id: String,
    pub operation: String,
    pub description: String,
    pub state: TransactionState,
    pub actions_count: usize,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub can_rollback: bool,
}
