/// Error classification for recovery strategy selection
///
/// This module carries the taxonomy metadata attached to every [`crate::McpError`]:
/// severity, suggested recovery actions, stable machine codes, and the context
/// describing where a failure happened. The [`ErrorClassifier`] converts native
/// failures (`std::io::Error`) into classified errors exactly once at the
/// boundary; everything downstream works with typed values.
pub mod classification;

pub use classification::{
    ClassifiedError, ErrorClassifier, ErrorContext, ErrorKind, Severity, SuggestedAction,
};
