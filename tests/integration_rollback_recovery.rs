/// Integration tests for the recovery core
///
/// Exercises the components together the way deployment callers use them:
/// - snapshot, mutate, restore round trips through the backup store
/// - transactions wrapping multi-step deployments, rolled back in reverse
/// - the error handler driving a rollback from a deployment failure
/// - the orchestrator retrying an operation and handing the mess to rollback
use mcp_manager::backup::BackupStore;
use mcp_manager::error::{ClassifiedError, SuggestedAction};
use mcp_manager::recovery::{AutoRecoveryManager, ErrorHandler};
use mcp_manager::retry::{BackoffStrategy, RetryConfig};
use mcp_manager::rollback::{RollbackManager, TransactionState};
use mcp_manager::{McpError, McpResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn manager_in(state: &TempDir) -> RollbackManager {
    let backup = BackupStore::open(state.path().join("backups")).unwrap();
    RollbackManager::open(state.path().join("rollback_state"), backup).unwrap()
}

#[test]
fn test_backup_round_trip_is_byte_exact() {
    let state = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let mut store = BackupStore::open(state.path().join("backups")).unwrap();

    // Content with non-UTF8 bytes: restores must be byte-for-byte
    let original: Vec<u8> = (0u8..=255).collect();
    let file = write_file(work.path(), "servers.bin", &original);

    let id = store
        .create_backup("config_change", "pre-edit", &[file.clone()])
        .unwrap();

    fs::write(&file, b"overwritten").unwrap();
    let outcome = store.restore_backup(&id, None).unwrap();

    assert!(outcome.is_success());
    assert_eq!(fs::read(&file).unwrap(), original);
}

#[test]
fn test_backup_skips_missing_and_sizes_the_rest() {
    let state = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let mut store = BackupStore::open(state.path().join("backups")).unwrap();

    let f1 = write_file(work.path(), "present.json", b"{\"servers\": []}");
    let f2 = work.path().join("absent.json");

    let id = store
        .create_backup("deploy", "pre-deploy snapshot", &[f1.clone(), f2])
        .unwrap();

    let info = store.get_backup_info(&id).unwrap();
    assert_eq!(info.files_backed_up, vec![f1.clone()]);
    assert_eq!(info.size_bytes, fs::metadata(&f1).unwrap().len());
}

#[test]
fn test_transaction_rollback_walks_snapshots_in_reverse() {
    let state = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let mut manager = manager_in(&state);

    // Three deployment steps mutate the same config; each action snapshots
    // the state it found.
    let file = write_file(work.path(), "platform.json", b"v0");
    let id = manager.start_transaction("deploy_batch", "three-step deploy");
    for next in ["v1", "v2", "v3"] {
        manager
            .add_action(
                "config_change",
                &format!("write {}", next),
                None,
                None,
                &[file.clone()],
                None,
            )
            .unwrap();
        fs::write(&file, next).unwrap();
    }
    manager.commit_transaction().unwrap();
    assert_eq!(fs::read_to_string(&file).unwrap(), "v3");

    // Undoing C restores v2, then B restores v1, then A restores v0: only the
    // reverse order lands back on the original content.
    let report = manager.rollback_transaction(Some(&id)).unwrap();
    assert!(report.succeeded);
    assert_eq!(fs::read_to_string(&file).unwrap(), "v0");
    assert_eq!(
        manager.transaction_summary(&id).unwrap().state,
        TransactionState::Completed
    );
}

#[test]
fn test_error_handler_rolls_back_failed_deployment() {
    let state = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();

    let desktop = write_file(work.path(), "claude_desktop.json", b"desktop-good");
    let code = write_file(work.path(), "claude_code.json", b"code-good");

    let manager = Arc::new(Mutex::new(manager_in(&state)));
    {
        let mut manager = manager.lock().unwrap();
        manager.start_transaction("deploy_batch", "deploy to two platforms");
        manager
            .add_action(
                "config_change",
                "write desktop config",
                Some("github-mcp"),
                Some("claude-desktop"),
                &[desktop.clone()],
                None,
            )
            .unwrap();
        manager
            .add_action(
                "config_change",
                "write code config",
                Some("github-mcp"),
                Some("claude-code"),
                &[code.clone()],
                None,
            )
            .unwrap();
        manager.commit_transaction().unwrap();
    }

    // The deployment gets halfway and corrupts both files before failing
    fs::write(&desktop, b"desktop-broken").unwrap();
    fs::write(&code, b"code-broken").unwrap();

    let mut handler = ErrorHandler::new(manager);
    let classified = ClassifiedError::new(McpError::Deployment {
        message: "platform write rejected".to_string(),
        server_name: Some("github-mcp".to_string()),
        platform_key: Some("claude-code".to_string()),
        stage: Some("write_config".to_string()),
    })
    .with_actions(vec![SuggestedAction::Rollback, SuggestedAction::ManualFix]);

    let result = handler.handle_classified(classified, true);

    assert!(result.success, "{}", result.message);
    assert_eq!(result.action_taken, "rollback_successful");
    assert_eq!(fs::read(&desktop).unwrap(), b"desktop-good");
    assert_eq!(fs::read(&code).unwrap(), b"code-good");
}

#[tokio::test]
async fn test_orchestrator_retries_then_rollback_cleans_up() {
    let state = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();

    let file = write_file(work.path(), "registry.json", b"registered");
    let manager = Arc::new(Mutex::new(manager_in(&state)));
    let tx_id = {
        let mut manager = manager.lock().unwrap();
        let id = manager.start_transaction("deploy", "single deploy");
        manager
            .add_action(
                "file_modify",
                "update registry",
                None,
                None,
                &[file.clone()],
                None,
            )
            .unwrap();
        manager.commit_transaction().unwrap();
        id
    };

    // Every attempt scribbles over the file and fails
    let orchestrator = AutoRecoveryManager::new();
    let config = RetryConfig {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(200),
        backoff_strategy: BackoffStrategy::Linear,
        jitter: false,
        timeout: None,
        ..RetryConfig::default()
    };

    let target = file.clone();
    let result: McpResult<()> = orchestrator
        .execute_with_recovery("deploy-registry", "deployment", Some(config), move || {
            let target = target.clone();
            async move {
                fs::write(&target, b"half-written garbage").unwrap();
                Err(McpError::deployment("platform unreachable"))
            }
        })
        .await;

    assert!(result.is_err());
    let ops = orchestrator.recent_operations(10);
    assert_eq!(ops[0].attempts, 3);

    // The retries are spent; restore the pre-deploy state
    let report = manager
        .lock()
        .unwrap()
        .rollback_transaction(Some(&tx_id))
        .unwrap();
    assert!(report.succeeded);
    assert_eq!(fs::read(&file).unwrap(), b"registered");
}

#[test]
fn test_handler_statistics_across_mixed_errors() {
    let state = TempDir::new().unwrap();
    let manager = Arc::new(Mutex::new(manager_in(&state)));
    let mut handler = ErrorHandler::new(manager);

    handler.handle_error(McpError::network("reset"), None, true);
    handler.handle_error(McpError::network("refused"), None, true);
    handler.handle_error(McpError::generic("mystery"), None, true);

    let stats = handler.statistics();
    assert_eq!(stats.total_errors, 3);
    assert_eq!(stats.successful_recoveries, 2);
    assert_eq!(
        stats.most_common_kind,
        Some(mcp_manager::error::ErrorKind::Network)
    );
}
