/// File-set backup store with a JSON metadata journal
///
/// Snapshots are plain content copies: each backup id names a directory under
/// the store root that mirrors the original absolute paths of the files backed
/// up. Metadata for all backups lives in `backup_metadata.json`, rewritten
/// wholesale on every mutation. File-level copy failures are logged and
/// skipped; a backup only fails outright when not a single file could be
/// copied. A corrupt journal degrades to an empty store, never a crash.
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Default retention cap: evict oldest backups beyond this count.
const DEFAULT_MAX_BACKUPS: usize = 50;

/// Journal file name inside the store root.
const METADATA_FILE: &str = "backup_metadata.json";

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Backup {0} not found")]
    NotFound(String),

    #[error("No files were backed up")]
    NoFilesBackedUp,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata for one backup snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    /// Unique, filesystem-safe id derived from operation name + timestamp
    pub backup_id: String,

    /// When the backup was created
    pub timestamp: DateTime<Utc>,

    /// Operation label this backup was taken for
    pub operation: String,

    /// Free-text description
    pub description: String,

    /// Absolute source paths that were actually copied
    pub files_backed_up: Vec<PathBuf>,

    /// Owning user
    pub user: String,

    /// Total bytes copied
    pub size_bytes: u64,
}

/// Per-file result of a restore operation.
///
/// Restore is best effort: it succeeds when at least one file came back, and
/// every file that did not is listed in `failed` so partial failure is never
/// silent.
#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    pub backup_id: String,
    pub restored: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl RestoreOutcome {
    pub fn is_success(&self) -> bool {
        !self.restored.is_empty()
    }

    pub fn restored_count(&self) -> usize {
        self.restored.len()
    }
}

/// Manages configuration backups for rollback capabilities.
pub struct BackupStore {
    root: PathBuf,
    metadata_file: PathBuf,
    backups: Vec<BackupMetadata>,
    max_backups: usize,
}

impl BackupStore {
    /// Open (or create) a backup store rooted at the given directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BackupError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let metadata_file = root.join(METADATA_FILE);

        let backups = match load_metadata(&metadata_file) {
            Ok(backups) => backups,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load backup metadata, starting empty");
                Vec::new()
            }
        };

        Ok(Self {
            root,
            metadata_file,
            backups,
            max_backups: DEFAULT_MAX_BACKUPS,
        })
    }

    /// Open the store at the default per-user location.
    pub fn open_default() -> Result<Self, BackupError> {
        Self::open(default_backup_root())
    }

    /// Override the retention cap.
    pub fn with_max_backups(mut self, max_backups: usize) -> Self {
        self.max_backups = max_backups;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a backup of the given files before an operation.
    ///
    /// Missing files are skipped with a warning; per-file copy failures are
    /// logged and skipped. Metadata is appended only after at least one file
    /// copied successfully. Returns the new backup id.
    pub fn create_backup(
        &mut self,
        operation: &str,
        description: &str,
        files: &[PathBuf],
    ) -> Result<String, BackupError> {
        let backup_id = self.generate_backup_id(operation);
        let snapshot_dir = self.root.join(&backup_id);
        fs::create_dir_all(&snapshot_dir)?;

        let mut backed_up: Vec<PathBuf> = Vec::new();
        let mut total_size: u64 = 0;

        for file in files {
            if !file.exists() {
                tracing::warn!(file = %file.display(), "File does not exist for backup, skipping");
                continue;
            }

            let dest = snapshot_dir.join(relative_key(file));
            let copied = (|| -> std::io::Result<u64> {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(file, &dest)
            })();

            match copied {
                Ok(bytes) => {
                    tracing::debug!(file = %file.display(), bytes, "Backed up file");
                    backed_up.push(file.clone());
                    total_size += bytes;
                }
                Err(e) => {
                    tracing::error!(file = %file.display(), error = %e, "Failed to backup file, skipping");
                }
            }
        }

        if backed_up.is_empty() {
            let _ = fs::remove_dir_all(&snapshot_dir);
            return Err(BackupError::NoFilesBackedUp);
        }

        let metadata = BackupMetadata {
            backup_id: backup_id.clone(),
            timestamp: Utc::now(),
            operation: operation.to_string(),
            description: description.to_string(),
            files_backed_up: backed_up,
            user: current_user(),
            size_bytes: total_size,
        };

        tracing::info!(
            backup_id = %backup_id,
            files = metadata.files_backed_up.len(),
            bytes = total_size,
            "Created backup"
        );

        self.backups.push(metadata);
        self.cleanup_old_backups();
        self.persist();

        Ok(backup_id)
    }

    /// Restore files from a backup over their original paths.
    ///
    /// When `target_paths` is given, only files nested under one of the
    /// targets are restored. Parent directories are created as needed.
    pub fn restore_backup(
        &self,
        backup_id: &str,
        target_paths: Option<&[PathBuf]>,
    ) -> Result<RestoreOutcome, BackupError> {
        let metadata = self
            .get_backup_info(backup_id)
            .ok_or_else(|| BackupError::NotFound(backup_id.to_string()))?;

        let snapshot_dir = self.root.join(backup_id);
        if !snapshot_dir.exists() {
            return Err(BackupError::NotFound(backup_id.to_string()));
        }

        let mut outcome = RestoreOutcome {
            backup_id: backup_id.to_string(),
            restored: Vec::new(),
            failed: Vec::new(),
        };

        for original in &metadata.files_backed_up {
            if let Some(targets) = target_paths {
                if !targets.iter().any(|t| original.starts_with(t)) {
                    continue;
                }
            }

            let snapshot_file = snapshot_dir.join(relative_key(original));
            if !snapshot_file.exists() {
                tracing::warn!(file = %snapshot_file.display(), "Backup file missing from snapshot");
                outcome
                    .failed
                    .push((original.clone(), "missing from snapshot".to_string()));
                continue;
            }

            let restored = (|| -> std::io::Result<()> {
                if let Some(parent) = original.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(&snapshot_file, original)?;
                Ok(())
            })();

            match restored {
                Ok(()) => {
                    tracing::debug!(file = %original.display(), "Restored file");
                    outcome.restored.push(original.clone());
                }
                Err(e) => {
                    tracing::error!(file = %original.display(), error = %e, "Failed to restore file");
                    outcome.failed.push((original.clone(), e.to_string()));
                }
            }
        }

        tracing::info!(
            backup_id = %backup_id,
            restored = outcome.restored.len(),
            failed = outcome.failed.len(),
            "Restore finished"
        );

        Ok(outcome)
    }

    /// List backups, optionally filtered by operation, most recent first.
    pub fn list_backups(&self, operation_filter: Option<&str>) -> Vec<&BackupMetadata> {
        let mut backups: Vec<&BackupMetadata> = self
            .backups
            .iter()
            .filter(|b| operation_filter.map_or(true, |op| b.operation == op))
            .collect();

        backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        backups
    }

    pub fn get_backup_info(&self, backup_id: &str) -> Option<&BackupMetadata> {
        self.backups.iter().find(|b| b.backup_id == backup_id)
    }

    /// Delete a backup: both its metadata entry and its snapshot directory.
    pub fn delete_backup(&mut self, backup_id: &str) -> Result<(), BackupError> {
        if self.get_backup_info(backup_id).is_none() {
            return Err(BackupError::NotFound(backup_id.to_string()));
        }

        self.backups.retain(|b| b.backup_id != backup_id);

        let snapshot_dir = self.root.join(backup_id);
        if snapshot_dir.exists() {
            fs::remove_dir_all(&snapshot_dir)?;
        }

        self.persist();
        tracing::info!(backup_id = %backup_id, "Deleted backup");
        Ok(())
    }

    /// Estimate the total size of a backup of the given files.
    pub fn estimate_backup_size(files: &[PathBuf]) -> u64 {
        files
            .iter()
            .filter_map(|f| fs::metadata(f).ok())
            .filter(|m| m.is_file())
            .map(|m| m.len())
            .sum()
    }

    /// Total on-disk size of all snapshots and the number of snapshot dirs.
    pub fn get_disk_usage(&self) -> (u64, usize) {
        let mut total_size = 0u64;
        let mut backup_count = 0usize;

        if let Ok(entries) = fs::read_dir(&self.root) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    total_size += dir_size(&path);
                    backup_count += 1;
                }
            }
        }

        (total_size, backup_count)
    }

    /// Evict the oldest backups once the store exceeds the retention cap.
    pub fn cleanup_old_backups(&mut self) {
        if self.backups.len() <= self.max_backups {
            return;
        }

        self.backups.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        let excess = self.backups.len() - self.max_backups;

        for old in self.backups.drain(..excess) {
            let snapshot_dir = self.root.join(&old.backup_id);
            if snapshot_dir.exists() {
                if let Err(e) = fs::remove_dir_all(&snapshot_dir) {
                    tracing::warn!(backup_id = %old.backup_id, error = %e, "Failed to cleanup backup");
                    continue;
                }
            }
            tracing::info!(backup_id = %old.backup_id, "Cleaned up old backup");
        }
    }

    fn generate_backup_id(&self, operation: &str) -> String {
        let base = format!(
            "{}_{}",
            sanitize_id(operation),
            Utc::now().format("%Y%m%d_%H%M%S")
        );

        // Second-level timestamps can collide within a session; disambiguate
        // with a sequence suffix.
        if !self.id_taken(&base) {
            return base;
        }
        let mut seq = 2usize;
        loop {
            let candidate = format!("{}_{}", base, seq);
            if !self.id_taken(&candidate) {
                return candidate;
            }
            seq += 1;
        }
    }

    fn id_taken(&self, id: &str) -> bool {
        self.backups.iter().any(|b| b.backup_id == id) || self.root.join(id).exists()
    }

    /// Rewrite the journal; failures are logged, never propagated.
    fn persist(&self) {
        if let Err(e) = save_metadata(&self.metadata_file, &self.backups) {
            tracing::error!(error = %e, "Failed to save backup metadata");
        }
    }
}

/// Automatically manages backups for operations that warrant them.
pub struct AutoBackupManager {
    auto_backup_operations: HashSet<String>,
}

impl AutoBackupManager {
    pub fn new() -> Self {
        let auto_backup_operations = [
            "deploy",
            "config_change",
            "file_modify",
            "server_registration",
            "batch_operation",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        Self {
            auto_backup_operations,
        }
    }

    /// Whether an operation type warrants a snapshot before it runs.
    pub fn should_auto_backup(&self, operation: &str) -> bool {
        self.auto_backup_operations.contains(operation)
    }

    /// Register an additional operation type for automatic snapshots.
    pub fn register_operation(&mut self, operation: impl Into<String>) {
        self.auto_backup_operations.insert(operation.into());
    }

    /// Snapshot the affected files on behalf of an operation.
    ///
    /// The backup is labeled `auto_<operation>` so automatic snapshots are
    /// distinguishable from explicit ones when listing.
    pub fn create_auto_backup(
        &self,
        store: &mut BackupStore,
        operation: &str,
        affected_files: &[PathBuf],
        description: Option<&str>,
    ) -> Result<String, BackupError> {
        let auto_description = description
            .map(String::from)
            .unwrap_or_else(|| format!("Automatic backup before {}", operation));

        store.create_backup(
            &format!("auto_{}", operation),
            &auto_description,
            affected_files,
        )
    }
}

impl Default for AutoBackupManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot paths mirror the original absolute path with root stripped.
fn relative_key(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}

fn sanitize_id(operation: &str) -> String {
    operation
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn default_backup_root() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".mcp-manager").join("backups"))
        .unwrap_or_else(|| PathBuf::from(".mcp-manager/backups"))
}

fn dir_size(path: &Path) -> u64 {
    let mut total = 0u64;
    if let Ok(entries) = fs::read_dir(path) {
        for entry in entries.flatten() {
            let entry_path = entry.path();
            if entry_path.is_dir() {
                total += dir_size(&entry_path);
            } else if let Ok(meta) = entry.metadata() {
                total += meta.len();
            }
        }
    }
    total
}

fn load_metadata(path: &Path) -> anyhow::Result<Vec<BackupMetadata>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = fs::read_to_string(path).context("Failed to read backup metadata")?;
    serde_json::from_str(&data).context("Failed to parse backup metadata")
}

fn save_metadata(path: &Path, backups: &[BackupMetadata]) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(backups).context("Failed to serialize metadata")?;
    fs::write(path, json).context("Failed to write backup metadata")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn test_store() -> (BackupStore, TempDir, TempDir) {
        let store_dir = TempDir::new().unwrap();
        let work_dir = TempDir::new().unwrap();
        let store = BackupStore::open(store_dir.path().join("backups")).unwrap();
        (store, store_dir, work_dir)
    }

    #[test]
    fn test_create_backup_skips_missing_files() {
        let (mut store, _root, work) = test_store();

        let f1 = write_file(work.path(), "server.json", "{\"a\": 1}");
        let f2 = work.path().join("missing.json");

        let id = store
            .create_backup("deploy", "pre-deploy snapshot", &[f1.clone(), f2])
            .unwrap();

        let info = store.get_backup_info(&id).unwrap();
        assert_eq!(info.files_backed_up, vec![f1.clone()]);
        assert_eq!(info.size_bytes, fs::metadata(&f1).unwrap().len());
    }

    #[test]
    fn test_create_backup_all_missing_fails() {
        let (mut store, _root, work) = test_store();

        let result = store.create_backup(
            "deploy",
            "nothing to snapshot",
            &[work.path().join("a"), work.path().join("b")],
        );

        assert!(matches!(result, Err(BackupError::NoFilesBackedUp)));
        // The empty snapshot directory must not linger
        let (_, count) = store.get_disk_usage();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_backup_restore_round_trip() {
        let (mut store, _root, work) = test_store();

        let file = write_file(work.path(), "config.json", "original content");
        let id = store
            .create_backup("config_change", "before edit", &[file.clone()])
            .unwrap();

        fs::write(&file, "mutated content").unwrap();

        let outcome = store.restore_backup(&id, None).unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.restored_count(), 1);
        assert_eq!(fs::read_to_string(&file).unwrap(), "original content");
    }

    #[test]
    fn test_restore_with_target_filter() {
        let (mut store, _root, work) = test_store();

        let subdir = work.path().join("platform");
        fs::create_dir_all(&subdir).unwrap();
        let inside = write_file(&subdir, "config.json", "inside");
        let outside = write_file(work.path(), "other.json", "outside");

        let id = store
            .create_backup("deploy", "two files", &[inside.clone(), outside.clone()])
            .unwrap();

        fs::write(&inside, "changed").unwrap();
        fs::write(&outside, "changed").unwrap();

        let outcome = store
            .restore_backup(&id, Some(&[subdir.clone()]))
            .unwrap();

        assert_eq!(outcome.restored, vec![inside.clone()]);
        assert_eq!(fs::read_to_string(&inside).unwrap(), "inside");
        // Outside the target, the mutation stays
        assert_eq!(fs::read_to_string(&outside).unwrap(), "changed");
    }

    #[test]
    fn test_restore_reports_unrestorable_files() {
        let (mut store, _root, work) = test_store();

        let f1 = write_file(work.path(), "a.json", "aa");
        let f2 = write_file(work.path(), "b.json", "bb");
        let id = store
            .create_backup("deploy", "two files", &[f1.clone(), f2.clone()])
            .unwrap();

        // Lose one file from the snapshot
        fs::remove_file(store.root().join(&id).join(relative_key(&f2))).unwrap();
        fs::write(&f1, "changed").unwrap();
        fs::write(&f2, "changed").unwrap();

        let outcome = store.restore_backup(&id, None).unwrap();
        assert!(outcome.is_success(), "best-effort restore still succeeds");
        assert_eq!(outcome.restored, vec![f1]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, f2);
    }

    #[test]
    fn test_restore_unknown_backup() {
        let (store, _root, _work) = test_store();
        assert!(matches!(
            store.restore_backup("nope_20240101_000000", None),
            Err(BackupError::NotFound(_))
        ));
    }

    #[test]
    fn test_backup_id_collision_gets_sequence_suffix() {
        let (mut store, _root, work) = test_store();
        let file = write_file(work.path(), "f.json", "x");

        let id1 = store.create_backup("deploy", "first", &[file.clone()]).unwrap();
        let id2 = store.create_backup("deploy", "second", &[file]).unwrap();

        // Ids may share the same second-level timestamp but must differ
        assert_ne!(id1, id2);
        assert!(store.get_backup_info(&id1).is_some());
        assert!(store.get_backup_info(&id2).is_some());
    }

    #[test]
    fn test_list_backups_filter_and_order() {
        let (mut store, _root, work) = test_store();
        let file = write_file(work.path(), "f.json", "x");

        store.create_backup("deploy", "a", &[file.clone()]).unwrap();
        store.create_backup("config_change", "b", &[file]).unwrap();

        assert_eq!(store.list_backups(None).len(), 2);
        let deploys = store.list_backups(Some("deploy"));
        assert_eq!(deploys.len(), 1);
        assert_eq!(deploys[0].operation, "deploy");
    }

    #[test]
    fn test_delete_backup() {
        let (mut store, _root, work) = test_store();
        let file = write_file(work.path(), "f.json", "x");

        let id = store.create_backup("deploy", "a", &[file]).unwrap();
        assert!(store.root().join(&id).exists());

        store.delete_backup(&id).unwrap();
        assert!(store.get_backup_info(&id).is_none());
        assert!(!store.root().join(&id).exists());
    }

    #[test]
    fn test_retention_evicts_oldest() {
        let (store, _root, work) = test_store();
        let mut store = store.with_max_backups(3);
        let file = write_file(work.path(), "f.json", "x");

        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(
                store
                    .create_backup(&format!("op{}", i), "retention", &[file.clone()])
                    .unwrap(),
            );
        }

        assert_eq!(store.list_backups(None).len(), 3);
        // The two oldest are gone, metadata and directory both
        assert!(store.get_backup_info(&ids[0]).is_none());
        assert!(store.get_backup_info(&ids[1]).is_none());
        assert!(!store.root().join(&ids[0]).exists());
        assert!(store.get_backup_info(&ids[4]).is_some());
    }

    #[test]
    fn test_corrupt_metadata_degrades_to_empty() {
        let root = TempDir::new().unwrap();
        let store_root = root.path().join("backups");
        fs::create_dir_all(&store_root).unwrap();
        fs::write(store_root.join(METADATA_FILE), "not json at all").unwrap();

        let store = BackupStore::open(&store_root).unwrap();
        assert!(store.list_backups(None).is_empty());
    }

    #[test]
    fn test_metadata_survives_reopen() {
        let root = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let store_root = root.path().join("backups");
        let file = write_file(work.path(), "f.json", "x");

        let id = {
            let mut store = BackupStore::open(&store_root).unwrap();
            store.create_backup("deploy", "persisted", &[file]).unwrap()
        };

        let store = BackupStore::open(&store_root).unwrap();
        let info = store.get_backup_info(&id).unwrap();
        assert_eq!(info.operation, "deploy");
        assert_eq!(info.description, "persisted");
    }

    #[test]
    fn test_estimate_backup_size() {
        let work = TempDir::new().unwrap();
        let f1 = write_file(work.path(), "a.json", "12345");
        let f2 = write_file(work.path(), "b.json", "123");
        let missing = work.path().join("missing");

        assert_eq!(BackupStore::estimate_backup_size(&[f1, f2, missing]), 8);
    }

    #[test]
    fn test_auto_backup_prefixes_operation() {
        let (mut store, _root, work) = test_store();
        let file = write_file(work.path(), "f.json", "x");

        let auto = AutoBackupManager::new();
        assert!(auto.should_auto_backup("deploy"));
        assert!(!auto.should_auto_backup("health_check"));

        let id = auto
            .create_auto_backup(&mut store, "deploy", &[file], None)
            .unwrap();
        let info = store.get_backup_info(&id).unwrap();
        assert_eq!(info.operation, "auto_deploy");
        assert!(info.description.contains("Automatic backup"));
    }
}
