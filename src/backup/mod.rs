/// Configuration backup and restore
///
/// Content-copy snapshots of file sets, taken before risky operations so the
/// rollback manager can restore a known-good state. Each snapshot lives in its
/// own directory named by backup id; a single JSON journal tracks metadata.
pub mod store;

pub use store::{AutoBackupManager, BackupError, BackupMetadata, BackupStore, RestoreOutcome};
