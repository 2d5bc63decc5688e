//! Error types for the analysis pipeline.
//!
//! Only [`AnalysisError::PermissionDenied`] ever leaves
//! [`AggregationEngine::analyze_all`](crate::analysis::AggregationEngine::analyze_all).
//! Every other variant is absorbed inside the pipeline and reflected as data
//! (a fallback value, or `has_errors` on the aggregate).

use crate::models::ProducerKind;
use std::time::Duration;
use thiserror::Error;

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Errors that can occur while orchestrating analysis producers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    /// The principal may not analyze the target repository.
    #[error("user {user_id} is not permitted to analyze repository {repo_id}: {reason}")]
    PermissionDenied {
        user_id: u64,
        repo_id: u64,
        reason: String,
    },

    /// A producer did not answer within its own deadline.
    #[error("{kind} producer timed out after {}ms", .after.as_millis())]
    ProducerTimeout { kind: ProducerKind, after: Duration },

    /// The producer could not be reached or the connection broke.
    #[error("{kind} producer transport error: {message}")]
    ProducerTransport { kind: ProducerKind, message: String },

    /// The producer answered with a non-success HTTP status.
    #[error("{kind} producer returned status {status}: {body}")]
    ProducerStatus {
        kind: ProducerKind,
        status: u16,
        body: String,
    },

    /// The producer body did not match the expected response shape.
    #[error("{kind} producer returned a malformed body: {message}")]
    ProducerParse { kind: ProducerKind, message: String },

    /// The whole pipeline exceeded its deadline.
    #[error("analysis did not complete within {}ms", .0.as_millis())]
    OverallTimeout(Duration),

    /// The cache store could not be read.
    #[error("cache read failed: {0}")]
    CacheRead(String),

    /// The cache store could not be written.
    #[error("cache write failed: {0}")]
    CacheWrite(String),

    /// Something inside the pipeline panicked.
    #[error("analysis aborted unexpectedly: {0}")]
    Panicked(String),
}

impl AnalysisError {
    /// Returns true for the one error kind that is surfaced to callers.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, AnalysisError::PermissionDenied { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_includes_kind_and_millis() {
        let err = AnalysisError::ProducerTimeout {
            kind: ProducerKind::Title,
            after: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "title producer timed out after 1500ms");
    }

    #[test]
    fn test_overall_timeout_message_keeps_sub_second_deadlines() {
        let err = AnalysisError::OverallTimeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "analysis did not complete within 250ms");
    }

    #[test]
    fn test_only_permission_denied_is_surfaced() {
        let denied = AnalysisError::PermissionDenied {
            user_id: 7,
            repo_id: 42,
            reason: "no grant".to_string(),
        };
        assert!(denied.is_permission_denied());
        assert!(!AnalysisError::OverallTimeout(Duration::from_secs(300)).is_permission_denied());
        assert!(!AnalysisError::CacheWrite("disk full".to_string()).is_permission_denied());
    }
}
