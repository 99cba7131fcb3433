/// Transaction-oriented rollback
///
/// Groups reversible actions into transactions. Each action with affected
/// files gets its own point-in-time backup snapshot, so actions can be undone
/// independently. Rollback executes undos in reverse insertion order and never
/// reports partial failure as success.
pub mod manager;
pub mod transaction;

pub use manager::{ActionOutcome, RollbackManager, RollbackReport, TransactionError};
pub use transaction::{
    RollbackAction, RollbackTransaction, TransactionState, TransactionSummary,
};
