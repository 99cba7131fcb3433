/// Error classification system for recovery strategy selection
///
/// Errors are classified into a closed set of kinds. The kind determines the
/// stable machine code, the default severity and the default set of suggested
/// recovery actions; callers may override the latter two per error.
use crate::McpError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Recovery actions a caller or strategy may take for an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    Retry,
    Skip,
    Rollback,
    ManualFix,
    Ignore,
    Abort,
}

impl fmt::Display for SuggestedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuggestedAction::Retry => write!(f, "retry"),
            SuggestedAction::Skip => write!(f, "skip"),
            SuggestedAction::Rollback => write!(f, "rollback"),
            SuggestedAction::ManualFix => write!(f, "manual_fix"),
            SuggestedAction::Ignore => write!(f, "ignore"),
            SuggestedAction::Abort => write!(f, "abort"),
        }
    }
}

/// Closed set of error kinds. Mirrors the variants of [`McpError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Network,
    Deployment,
    Validation,
    Permission,
    Resource,
    WorkerThread,
    HealthCheck,
    Dependency,
    Conflict,
    Generic,
}

impl ErrorKind {
    /// All kinds, in declaration order.
    pub const ALL: [ErrorKind; 11] = [
        ErrorKind::Configuration,
        ErrorKind::Network,
        ErrorKind::Deployment,
        ErrorKind::Validation,
        ErrorKind::Permission,
        ErrorKind::Resource,
        ErrorKind::WorkerThread,
        ErrorKind::HealthCheck,
        ErrorKind::Dependency,
        ErrorKind::Conflict,
        ErrorKind::Generic,
    ];

    /// Stable machine code for this kind.
    ///
    /// Used for log correlation and user-facing diagnostics; must never change
    /// for a given kind across versions, and never depends on message text.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "MCP_CONFIGURATION",
            ErrorKind::Network => "MCP_NETWORK",
            ErrorKind::Deployment => "MCP_DEPLOYMENT",
            ErrorKind::Validation => "MCP_VALIDATION",
            ErrorKind::Permission => "MCP_PERMISSION",
            ErrorKind::Resource => "MCP_RESOURCE",
            ErrorKind::WorkerThread => "MCP_WORKER_THREAD",
            ErrorKind::HealthCheck => "MCP_HEALTH_CHECK",
            ErrorKind::Dependency => "MCP_DEPENDENCY",
            ErrorKind::Conflict => "MCP_CONFLICT",
            ErrorKind::Generic => "MCP_GENERIC",
        }
    }

    /// Get human-readable description of this kind
    pub fn description(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "Configuration file or field issue",
            ErrorKind::Network => "Network connectivity or endpoint failure",
            ErrorKind::Deployment => "Server deployment to a platform failed",
            ErrorKind::Validation => "Input or configuration validation failed",
            ErrorKind::Permission => "File system permission denied",
            ErrorKind::Resource => "System resource exhausted or unavailable",
            ErrorKind::WorkerThread => "Background worker operation failed",
            ErrorKind::HealthCheck => "Server health check failed",
            ErrorKind::Dependency => "Missing or incompatible dependency",
            ErrorKind::Conflict => "Deployment conflict between servers",
            ErrorKind::Generic => "Unclassified error",
        }
    }

    /// Default severity attached to freshly classified errors of this kind.
    pub fn default_severity(&self) -> Severity {
        Severity::Error
    }

    /// Default suggested recovery actions for this kind.
    ///
    /// Callers may override per error; the order is the preference order the
    /// recovery dispatcher consults.
    pub fn default_actions(&self) -> &'static [SuggestedAction] {
        use SuggestedAction::*;
        match self {
            ErrorKind::Configuration => &[ManualFix, Rollback, Skip],
            ErrorKind::Network => &[Retry, Skip, ManualFix],
            ErrorKind::Deployment => &[Retry, Rollback, Skip, ManualFix],
            ErrorKind::Validation => &[ManualFix, Skip],
            ErrorKind::Permission => &[ManualFix, Skip],
            ErrorKind::Resource => &[Retry, Abort, ManualFix],
            ErrorKind::WorkerThread => &[Retry, Abort],
            ErrorKind::HealthCheck => &[Retry, Skip],
            ErrorKind::Dependency => &[ManualFix, Skip],
            ErrorKind::Conflict => &[ManualFix, Skip, Rollback],
            ErrorKind::Generic => &[],
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Context information about where and when an error occurred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Operation name (e.g., "deploy_batch", "write_platform_config")
    pub operation: String,

    /// Server being operated on, if any
    pub server_name: Option<String>,

    /// Deployment platform key, if any
    pub platform_key: Option<String>,

    /// Project path for project-scoped configs
    pub project_path: Option<String>,

    /// Arbitrary key/value data attached by the caller
    pub data: HashMap<String, String>,

    /// Timestamp when the context was captured
    pub timestamp: DateTime<Utc>,
}

impl ErrorContext {
    /// Create a new error context for an operation
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            server_name: None,
            platform_key: None,
            project_path: None,
            data: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create context for a deployment of one server to one platform
    pub fn for_deployment(
        server_name: impl Into<String>,
        platform_key: impl Into<String>,
    ) -> Self {
        let server_name = server_name.into();
        let platform_key = platform_key.into();
        let mut ctx = Self::new(format!("deploy_{}_{}", server_name, platform_key));
        ctx.server_name = Some(server_name);
        ctx.platform_key = Some(platform_key);
        ctx
    }

    pub fn with_server(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = Some(server_name.into());
        self
    }

    pub fn with_platform(mut self, platform_key: impl Into<String>) -> Self {
        self.platform_key = Some(platform_key.into());
        self
    }

    pub fn with_project_path(mut self, project_path: impl Into<String>) -> Self {
        self.project_path = Some(project_path.into());
        self
    }

    /// Add arbitrary data to the context
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Classified error with recovery metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedError {
    /// The typed error
    pub error: McpError,

    /// Severity (defaults from the kind)
    pub severity: Severity,

    /// Suggested recovery actions (defaults from the kind, caller may override)
    pub suggested_actions: Vec<SuggestedAction>,

    /// Context about where the error occurred
    pub context: Option<ErrorContext>,

    /// When the error was classified
    pub timestamp: DateTime<Utc>,
}

impl ClassifiedError {
    /// Classify an error with the kind's default severity and actions
    pub fn new(error: McpError) -> Self {
        let kind = error.kind();
        Self {
            error,
            severity: kind.default_severity(),
            suggested_actions: kind.default_actions().to_vec(),
            context: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Override the suggested action set
    pub fn with_actions(mut self, actions: Vec<SuggestedAction>) -> Self {
        self.suggested_actions = actions;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    pub fn code(&self) -> &'static str {
        self.error.code()
    }

    /// Check whether an action is in the suggested set
    pub fn suggests(&self, action: SuggestedAction) -> bool {
        self.suggested_actions.contains(&action)
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(ctx) => write!(
                f,
                "[{}] {} in {} ({})",
                self.code(),
                self.error,
                ctx.operation,
                self.severity
            ),
            None => write!(f, "[{}] {} ({})", self.code(), self.error, self.severity),
        }
    }
}

/// Error classifier - converts native failures into classified errors.
#[derive(Debug, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a typed error, attaching default metadata and context
    pub fn classify(&self, error: McpError, context: ErrorContext) -> ClassifiedError {
        ClassifiedError::new(error).with_context(context)
    }

    /// Classify a native I/O error.
    ///
    /// Well-known failure categories map onto the closed kind set; anything
    /// unmatched becomes `Generic`.
    pub fn classify_io(&self, err: &std::io::Error, context: ErrorContext) -> ClassifiedError {
        use std::io::ErrorKind as IoKind;

        let error = match err.kind() {
            IoKind::NotFound => McpError::configuration(format!("File not found: {}", err)),
            IoKind::PermissionDenied => {
                McpError::permission(format!("Permission denied: {}", err))
            }
            IoKind::ConnectionRefused
            | IoKind::ConnectionReset
            | IoKind::ConnectionAborted
            | IoKind::TimedOut => McpError::network(format!("Connection error: {}", err)),
            IoKind::InvalidInput | IoKind::InvalidData => {
                McpError::validation(format!("Invalid value: {}", err))
            }
            _ => McpError::generic(format!("Unexpected error: {}", err)),
        };

        self.classify(error, context)
    }

    /// Suggested manual fixes for an error, by kind and payload.
    pub fn suggested_fixes(&self, error: &McpError) -> Vec<String> {
        let mut fixes: Vec<String> = Vec::new();

        match error {
            McpError::Configuration { field_name, .. } => {
                fixes.push("Check configuration file syntax and formatting".to_string());
                fixes.push("Verify all required fields are present".to_string());
                fixes.push("Ensure file paths are correct and accessible".to_string());
                if let Some(field) = field_name {
                    fixes.push(format!("Review the value of field '{}'", field));
                }
            }
            McpError::Network { endpoint, .. } => {
                fixes.push("Check network connectivity".to_string());
                fixes.push("Verify endpoint URLs and ports".to_string());
                fixes.push("Check firewall and proxy settings".to_string());
                fixes.push("Validate API credentials".to_string());
                if let Some(endpoint) = endpoint {
                    fixes.push(format!("Confirm {} is reachable", endpoint));
                }
            }
            McpError::Deployment { .. } => {
                fixes.push("Check platform availability".to_string());
                fixes.push("Verify server configuration".to_string());
                fixes.push("Check for resource conflicts".to_string());
                fixes.push("Review deployment permissions".to_string());
            }
            McpError::Permission { path, .. } => {
                fixes.push("Check file and directory permissions".to_string());
                fixes.push("Run with appropriate privileges".to_string());
                if let Some(path) = path {
                    fixes.push(format!("Verify access rights on {}", path));
                }
            }
            McpError::Dependency {
                name,
                required_version,
                ..
            } => {
                fixes.push("Install or upgrade the missing dependency".to_string());
                if let (Some(name), Some(version)) = (name, required_version) {
                    fixes.push(format!("Requires {} {}", name, version));
                }
            }
            McpError::Conflict {
                conflicting_servers,
                ..
            } => {
                fixes.push("Review the deployment conflict matrix".to_string());
                if !conflicting_servers.is_empty() {
                    fixes.push(format!(
                        "Resolve conflicts between: {}",
                        conflicting_servers.join(", ")
                    ));
                }
            }
            _ => {}
        }

        fixes
    }
}
