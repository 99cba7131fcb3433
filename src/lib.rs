// Allow complex types where needed for comprehensive error handling and configuration
#![allow(clippy::type_complexity)]

pub mod backup;
pub mod error;
pub mod recovery;
pub mod retry;
pub mod rollback;

// Re-export the main recovery surface for convenience
pub use backup::{AutoBackupManager, BackupMetadata, BackupStore, RestoreOutcome};
pub use error::{
    ClassifiedError, ErrorClassifier, ErrorContext, ErrorKind, Severity, SuggestedAction,
};
pub use recovery::{AutoRecoveryManager, ErrorHandler, RecoveryResult};
pub use retry::{BackoffEngine, BackoffStrategy, RetryAttempt, RetryConfig};
pub use rollback::{RollbackAction, RollbackManager, RollbackTransaction, TransactionState};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Domain error taxonomy for deployment, configuration and recovery operations.
///
/// Every failure that crosses a component boundary is classified into exactly
/// one of these kinds. Payload fields are owned data so errors can be cloned
/// into retry journals and recovery history.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum McpError {
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        config_path: Option<String>,
        field_name: Option<String>,
    },

    #[error("Network error: {message}")]
    Network {
        message: String,
        endpoint: Option<String>,
        status_code: Option<u16>,
    },

    #[error("Deployment failed: {message}")]
    Deployment {
        message: String,
        server_name: Option<String>,
        platform_key: Option<String>,
        stage: Option<String>,
    },

    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        rule: Option<String>,
        invalid_value: Option<String>,
    },

    #[error("Permission error: {message}")]
    Permission {
        message: String,
        path: Option<String>,
        required: Option<String>,
    },

    #[error("Resource error: {message}")]
    Resource {
        message: String,
        resource_type: Option<String>,
        available: Option<String>,
        required: Option<String>,
    },

    #[error("Background operation failed: {message}")]
    WorkerThread {
        message: String,
        worker_type: Option<String>,
        operation: Option<String>,
    },

    #[error("Health check failed: {message}")]
    HealthCheck {
        message: String,
        server_name: Option<String>,
        check_type: Option<String>,
    },

    #[error("Dependency issue: {message}")]
    Dependency {
        message: String,
        name: Option<String>,
        required_version: Option<String>,
        available_version: Option<String>,
    },

    #[error("Conflict detected: {message}")]
    Conflict {
        message: String,
        conflict_type: Option<String>,
        conflicting_servers: Vec<String>,
    },

    #[error("{message}")]
    Generic { message: String },
}

impl McpError {
    pub fn configuration(message: impl Into<String>) -> Self {
        McpError::Configuration {
            message: message.into(),
            config_path: None,
            field_name: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        McpError::Network {
            message: message.into(),
            endpoint: None,
            status_code: None,
        }
    }

    pub fn deployment(message: impl Into<String>) -> Self {
        McpError::Deployment {
            message: message.into(),
            server_name: None,
            platform_key: None,
            stage: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        McpError::Validation {
            message: message.into(),
            rule: None,
            invalid_value: None,
        }
    }

    pub fn permission(message: impl Into<String>) -> Self {
        McpError::Permission {
            message: message.into(),
            path: None,
            required: None,
        }
    }

    pub fn resource(message: impl Into<String>) -> Self {
        McpError::Resource {
            message: message.into(),
            resource_type: None,
            available: None,
            required: None,
        }
    }

    pub fn worker_thread(message: impl Into<String>) -> Self {
        McpError::WorkerThread {
            message: message.into(),
            worker_type: None,
            operation: None,
        }
    }

    pub fn health_check(message: impl Into<String>) -> Self {
        McpError::HealthCheck {
            message: message.into(),
            server_name: None,
            check_type: None,
        }
    }

    pub fn dependency(message: impl Into<String>) -> Self {
        McpError::Dependency {
            message: message.into(),
            name: None,
            required_version: None,
            available_version: None,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        McpError::Conflict {
            message: message.into(),
            conflict_type: None,
            conflicting_servers: Vec::new(),
        }
    }

    pub fn generic(message: impl Into<String>) -> Self {
        McpError::Generic {
            message: message.into(),
        }
    }

    /// The kind this error belongs to. Every error maps to exactly one kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            McpError::Configuration { .. } => ErrorKind::Configuration,
            McpError::Network { .. } => ErrorKind::Network,
            McpError::Deployment { .. } => ErrorKind::Deployment,
            McpError::Validation { .. } => ErrorKind::Validation,
            McpError::Permission { .. } => ErrorKind::Permission,
            McpError::Resource { .. } => ErrorKind::Resource,
            McpError::WorkerThread { .. } => ErrorKind::WorkerThread,
            McpError::HealthCheck { .. } => ErrorKind::HealthCheck,
            McpError::Dependency { .. } => ErrorKind::Dependency,
            McpError::Conflict { .. } => ErrorKind::Conflict,
            McpError::Generic { .. } => ErrorKind::Generic,
        }
    }

    /// Stable machine code for log correlation (`MCP_<KIND>`).
    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// The raw message without the kind prefix added by `Display`.
    pub fn message(&self) -> &str {
        match self {
            McpError::Configuration { message, .. }
            | McpError::Network { message, .. }
            | McpError::Deployment { message, .. }
            | McpError::Validation { message, .. }
            | McpError::Permission { message, .. }
            | McpError::Resource { message, .. }
            | McpError::WorkerThread { message, .. }
            | McpError::HealthCheck { message, .. }
            | McpError::Dependency { message, .. }
            | McpError::Conflict { message, .. }
            | McpError::Generic { message } => message,
        }
    }
}

pub type McpResult<T> = Result<T, McpError>;

/// Set up logging for binaries and tests that want console output.
///
/// Honors `RUST_LOG` when set; otherwise `info`, or `debug` when requested.
/// Safe to call more than once.
pub fn init_logging(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            McpError::configuration("bad field").kind(),
            ErrorKind::Configuration
        );
        assert_eq!(McpError::network("down").kind(), ErrorKind::Network);
        assert_eq!(McpError::generic("odd").kind(), ErrorKind::Generic);
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(McpError::configuration("x").code(), "MCP_CONFIGURATION");
        assert_eq!(McpError::health_check("x").code(), "MCP_HEALTH_CHECK");
        assert_eq!(McpError::worker_thread("x").code(), "MCP_WORKER_THREAD");
        // The code depends on the kind alone, never on the message
        assert_eq!(
            McpError::network("a").code(),
            McpError::network("completely different").code()
        );
    }

    #[test]
    fn test_display_prefixes() {
        let err = McpError::deployment("platform rejected config");
        assert_eq!(
            err.to_string(),
            "Deployment failed: platform rejected config"
        );

        let err = McpError::generic("odd state");
        assert_eq!(err.to_string(), "odd state");
    }

    #[test]
    fn test_structured_payload_round_trip() {
        let err = McpError::Network {
            message: "unreachable".to_string(),
            endpoint: Some("https://registry.example/api".to_string()),
            status_code: Some(503),
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: McpError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }
}
