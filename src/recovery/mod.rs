/// Error recovery system
///
/// Three layers, consumed top-down by callers:
///
/// ```text
/// ┌──────────────────────────────────────────┐
/// │  AutoRecoveryManager (retry orchestration)│
/// └────────────────┬─────────────────────────┘
///                  │
/// ┌────────────────┴─────────────────────────┐
/// │  ErrorHandler (strategy dispatch)         │
/// └────────────────┬─────────────────────────┘
///                  │
/// ┌────────────────┴─────────────────────────┐
/// │  Recovery strategies                      │
/// │   - retry with backoff                    │
/// │   - rollback via transaction manager      │
/// │   - configuration fix heuristics          │
/// │   - network status interpretation         │
/// └──────────────────────────────────────────┘
/// ```
///
/// Every strategy and the dispatcher itself answer with the same
/// [`RecoveryResult`] contract; anything unresolved surfaces with
/// `manual_intervention_required` set.
pub mod auto;
pub mod handler;
pub mod strategies;

pub use auto::{
    AutoRecoveryManager, CompletedRecovery, RecoveryHandle, RecoveryStatistics, TypeStatistics,
};
pub use handler::{ErrorDiagnostics, ErrorHandler, ErrorRecord, ErrorStatistics, SystemInfo};
pub use strategies::{
    default_strategy_routes, ConfigFixRecovery, NetworkRecovery, RecoveryContext, RecoveryResult,
    RecoveryStrategy, RetryRecovery, RollbackRecovery,
};
