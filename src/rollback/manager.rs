/// Rollback manager with transaction-like capabilities
///
/// A single manager instance drives one transaction at a time: opening a new
/// transaction while one is open force-cancels the old one (its already-taken
/// backups are kept). Completed, failed and cancelled transactions all land in
/// a persisted history (`transactions.json`), rewritten wholesale on change,
/// with the oldest entries evicted past a retention cap.
use super::transaction::{
    RollbackAction, RollbackTransaction, TransactionState, TransactionSummary,
};
use crate::backup::{AutoBackupManager, BackupStore};
use anyhow::Context;
use chrono::Utc;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default retention for completed transactions.
const DEFAULT_MAX_TRANSACTIONS: usize = 20;

/// History file name inside the state directory.
const TRANSACTIONS_FILE: &str = "transactions.json";

/// Usage failures of the transaction API. These indicate caller mistakes, not
/// recoverable deployment errors, and are never routed through the recovery
/// dispatcher.
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("No active transaction to add action to")]
    NoActiveTransaction,

    #[error("Transaction {0} not found")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backup store error: {0}")]
    Backup(#[from] crate::backup::BackupError),
}

/// Outcome of one action's undo during rollback.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub action_id: String,
    pub action_type: String,
    pub succeeded: bool,
    pub error: Option<String>,
}

/// Per-transaction rollback result with per-action detail.
#[derive(Debug, Clone)]
pub struct RollbackReport {
    pub transaction_id: String,
    pub succeeded: bool,
    pub actions: Vec<ActionOutcome>,
}

/// Manages rollback operations with transaction-like capabilities.
pub struct RollbackManager {
    backup: BackupStore,
    auto_backup: AutoBackupManager,
    transactions_file: PathBuf,
    current: Option<RollbackTransaction>,
    history: Vec<RollbackTransaction>,
    max_transactions: usize,
}

impl RollbackManager {
    /// Open a manager with an explicit state directory and backup store.
    pub fn open(
        state_dir: impl Into<PathBuf>,
        backup: BackupStore,
    ) -> Result<Self, TransactionError> {
        let state_dir = state_dir.into();
        fs::create_dir_all(&state_dir)?;
        let transactions_file = state_dir.join(TRANSACTIONS_FILE);

        let history = match load_history(&transactions_file) {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load transaction history, starting empty");
                Vec::new()
            }
        };

        Ok(Self {
            backup,
            auto_backup: AutoBackupManager::new(),
            transactions_file,
            current: None,
            history,
            max_transactions: DEFAULT_MAX_TRANSACTIONS,
        })
    }

    /// Open at the default per-user location with a default backup store.
    pub fn open_default() -> Result<Self, TransactionError> {
        let backup = BackupStore::open_default()?;
        Self::open(default_state_dir(), backup)
    }

    pub fn with_max_transactions(mut self, max_transactions: usize) -> Self {
        self.max_transactions = max_transactions;
        self
    }

    pub fn backup_store(&self) -> &BackupStore {
        &self.backup
    }

    pub fn backup_store_mut(&mut self) -> &mut BackupStore {
        &mut self.backup
    }

    pub fn current_transaction(&self) -> Option<&RollbackTransaction> {
        self.current.as_ref()
    }

    /// Start a new rollback transaction.
    ///
    /// If a transaction is already open it is force-cancelled first; its
    /// record moves to history and its backups stay in the store.
    pub fn start_transaction(&mut self, operation: &str, description: &str) -> String {
        if let Some(mut old) = self.current.take() {
            old.state = TransactionState::Cancelled;
            old.completed_at = Some(Utc::now());
            tracing::warn!(
                transaction_id = %old.transaction_id,
                "Cancelled open transaction to start a new one"
            );
            self.history.push(old);
            self.cleanup_old_transactions();
            self.persist();
        }

        let tx = RollbackTransaction::new(operation, description);
        let transaction_id = tx.transaction_id.clone();
        self.current = Some(tx);

        tracing::info!(transaction_id = %transaction_id, "Started rollback transaction");
        transaction_id
    }

    /// Add an action to the current transaction.
    ///
    /// When files are affected, a point-in-time snapshot is taken immediately
    /// and tied to the action, so each action can be undone independently. A
    /// failed snapshot is logged and leaves the action without a backup id.
    pub fn add_action(
        &mut self,
        action_type: &str,
        description: &str,
        server_name: Option<&str>,
        platform_key: Option<&str>,
        files_affected: &[PathBuf],
        rollback_data: Option<Value>,
    ) -> Result<String, TransactionError> {
        if self.current.is_none() {
            return Err(TransactionError::NoActiveTransaction);
        }

        let backup_id = if files_affected.is_empty() {
            None
        } else {
            match self.auto_backup.create_auto_backup(
                &mut self.backup,
                action_type,
                files_affected,
                Some(&format!("Backup for {}", description)),
            ) {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::warn!(action_type, error = %e, "Auto-backup failed, action has no snapshot");
                    None
                }
            }
        };

        let tx = match self.current.as_mut() {
            Some(tx) => tx,
            None => return Err(TransactionError::NoActiveTransaction),
        };

        let action_id = format!("{}_{}", action_type, tx.actions.len());
        let action = RollbackAction {
            action_id: action_id.clone(),
            action_type: action_type.to_string(),
            description: description.to_string(),
            server_name: server_name.map(String::from),
            platform_key: platform_key.map(String::from),
            files_affected: files_affected.to_vec(),
            backup_id,
            rollback_data,
            timestamp: Utc::now(),
        };

        tx.actions.push(action);
        tracing::debug!(action_id = %action_id, "Added action to transaction");
        Ok(action_id)
    }

    /// Commit the current transaction: mark it completed and persist it.
    pub fn commit_transaction(&mut self) -> Result<String, TransactionError> {
        let mut tx = self
            .current
            .take()
            .ok_or(TransactionError::NoActiveTransaction)?;

        tx.state = TransactionState::Completed;
        tx.completed_at = Some(Utc::now());
        let transaction_id = tx.transaction_id.clone();

        self.history.push(tx);
        self.cleanup_old_transactions();
        self.persist();

        tracing::info!(transaction_id = %transaction_id, "Transaction committed");
        Ok(transaction_id)
    }

    /// Rollback a transaction: the current one by default, or a historical one
    /// by id.
    ///
    /// Undo runs in reverse insertion order and attempts every action even
    /// after a failure; the transaction ends `Failed` if any individual undo
    /// failed, `Completed` only if all succeeded.
    pub fn rollback_transaction(
        &mut self,
        transaction_id: Option<&str>,
    ) -> Result<RollbackReport, TransactionError> {
        let mut tx = match transaction_id {
            None => self
                .current
                .take()
                .ok_or(TransactionError::NoActiveTransaction)?,
            Some(id) => {
                let pos = self
                    .history
                    .iter()
                    .position(|t| t.transaction_id == id)
                    .ok_or_else(|| TransactionError::NotFound(id.to_string()))?;
                self.history.remove(pos)
            }
        };

        tx.state = TransactionState::InProgress;
        tracing::info!(transaction_id = %tx.transaction_id, "Rolling back transaction");

        let mut outcomes: Vec<ActionOutcome> = Vec::new();
        let mut succeeded = true;

        // Reverse insertion order: later actions may depend on state created
        // by earlier ones.
        for action in tx.actions.iter().rev() {
            let result = self.undo_action(action);
            if let Err(reason) = &result {
                succeeded = false;
                tracing::error!(
                    action_id = %action.action_id,
                    reason = %reason,
                    "Failed to rollback action"
                );
            }
            outcomes.push(ActionOutcome {
                action_id: action.action_id.clone(),
                action_type: action.action_type.clone(),
                succeeded: result.is_ok(),
                error: result.err(),
            });
        }

        tx.completed_at = Some(Utc::now());
        if succeeded {
            tx.state = TransactionState::Completed;
            tracing::info!(transaction_id = %tx.transaction_id, "Transaction rolled back");
        } else {
            tx.state = TransactionState::Failed;
            tx.error_message = Some("Partial rollback failure".to_string());
            tracing::error!(transaction_id = %tx.transaction_id, "Transaction rollback failed");
        }

        let report = RollbackReport {
            transaction_id: tx.transaction_id.clone(),
            succeeded,
            actions: outcomes,
        };

        self.history.push(tx);
        self.cleanup_old_transactions();
        self.persist();

        Ok(report)
    }

    /// Type-specific undo for one action. Unknown action types fail this
    /// action's undo without affecting the remaining undos.
    fn undo_action(&self, action: &RollbackAction) -> Result<(), String> {
        match action.action_type.as_str() {
            "deploy" | "server_registration" => {
                tracing::info!(
                    action_id = %action.action_id,
                    server = action.server_name.as_deref().unwrap_or("-"),
                    platform = action.platform_key.as_deref().unwrap_or("-"),
                    "Rolling back {}", action.action_type
                );
                match &action.backup_id {
                    Some(backup_id) => self.restore_action_backup(backup_id, None),
                    None => Ok(()),
                }
            }
            "config_change" => match &action.backup_id {
                Some(backup_id) => {
                    self.restore_action_backup(backup_id, Some(&action.files_affected))
                }
                None => match &action.rollback_data {
                    Some(data) => write_rollback_data(data),
                    None => Err("no backup or rollback data".to_string()),
                },
            },
            "file_modify" => match &action.backup_id {
                Some(backup_id) => {
                    self.restore_action_backup(backup_id, Some(&action.files_affected))
                }
                None => Err("no backup available".to_string()),
            },
            other => {
                tracing::warn!(action_type = %other, "Unknown action type for rollback");
                Err(format!("unknown action type: {}", other))
            }
        }
    }

    fn restore_action_backup(
        &self,
        backup_id: &str,
        targets: Option<&[PathBuf]>,
    ) -> Result<(), String> {
        match self.backup.restore_backup(backup_id, targets) {
            Ok(outcome) if outcome.is_success() => Ok(()),
            Ok(_) => Err(format!("backup {} restored no files", backup_id)),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Abort the current transaction without rolling anything back.
    pub fn abort_current_transaction(&mut self) {
        if let Some(mut tx) = self.current.take() {
            tx.state = TransactionState::Cancelled;
            tx.completed_at = Some(Utc::now());
            tracing::info!(transaction_id = %tx.transaction_id, "Transaction aborted");
            self.history.push(tx);
            self.cleanup_old_transactions();
            self.persist();
        }
    }

    /// The most recently created historical transaction.
    pub fn get_last_transaction(&self) -> Option<&RollbackTransaction> {
        self.history.iter().max_by_key(|t| t.created_at)
    }

    /// Recent transactions, most recent first.
    pub fn list_transactions(&self, limit: usize) -> Vec<&RollbackTransaction> {
        let mut transactions: Vec<&RollbackTransaction> = self.history.iter().collect();
        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        transactions.truncate(limit);
        transactions
    }

    /// Check whether a transaction can be rolled back: the last one by
    /// default, or a historical one by id.
    pub fn can_rollback(&self, transaction_id: Option<&str>) -> bool {
        let tx = match transaction_id {
            None => self.get_last_transaction(),
            Some(id) => self.history.iter().find(|t| t.transaction_id == id),
        };
        tx.map(RollbackTransaction::can_rollback).unwrap_or(false)
    }

    pub fn transaction_summary(&self, transaction_id: &str) -> Option<TransactionSummary> {
        self.history
            .iter()
            .find(|t| t.transaction_id == transaction_id)
            .map(RollbackTransaction::summary)
    }

    fn cleanup_old_transactions(&mut self) {
        if self.history.len() <= self.max_transactions {
            return;
        }
        self.history.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.history.truncate(self.max_transactions);
    }

    /// Rewrite the history file; failures are logged, never propagated.
    fn persist(&self) {
        if let Err(e) = save_history(&self.transactions_file, &self.history) {
            tracing::error!(error = %e, "Failed to save transaction history");
        }
    }
}

/// Write literal rollback content back: a map of path to content, where string
/// values are written raw and anything else as pretty JSON.
fn write_rollback_data(data: &Value) -> Result<(), String> {
    let entries = data
        .as_object()
        .ok_or_else(|| "rollback data must be a path-to-content map".to_string())?;

    for (path, content) in entries {
        let path = Path::new(path);
        let text = match content {
            Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).map_err(|e| e.to_string())?,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        fs::write(path, text).map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn default_state_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".mcp-manager").join("rollback_state"))
        .unwrap_or_else(|| PathBuf::from(".mcp-manager/rollback_state"))
}

fn load_history(path: &Path) -> anyhow::Result<Vec<RollbackTransaction>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = fs::read_to_string(path).context("Failed to read transaction history")?;
    serde_json::from_str(&data).context("Failed to parse transaction history")
}

fn save_history(path: &Path, history: &[RollbackTransaction]) -> anyhow::Result<()> {
    let json =
        serde_json::to_string_pretty(history).context("Failed to serialize transaction history")?;
    fs::write(path, json).context("Failed to write transaction history")?;
    Ok(())
}
