//! Error taxonomy for the orchestrator and its collaborators.
//!
//! `ErrorKind` is the classification consumed by `MonitorAgent::classify`
//! (transient/semantic/unrecoverable) plus the plan-level terminal causes
//! (validation, state_conflict, audit_unavailable, replan_budget_exhausted).
//! `DepctlError` is the `thiserror` type returned by fallible public APIs
//! (store writes, config loading); step-local failures are captured as data
//! on `StepOutcome` and never escape as a Rust `Err` past the executor.

use thiserror::Error;

/// Classification of a failure, used by `MonitorAgent` to decide
/// retry/replan/fail and by the orchestrator's failure semantics table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network timeouts, 5xx, throttling, lock contention. Retry with backoff.
    Transient,
    /// Validation gap, referenced resource not found, schema mismatch.
    /// Escalate to replanning when retry budget is insufficient.
    Semantic,
    /// Permission denied, quota exhausted, dry-run disabled by policy.
    /// Immediate fail, no retry, no replan.
    Unrecoverable,
    /// Guardrails rejected the artifact. Terminates the plan.
    Validation,
    /// An operation's precondition on plan state was not met.
    StateConflict,
    /// AuditSink unreachable beyond `AUDIT_RETRY`.
    AuditUnavailable,
    /// `replan_count == MAX_REPLANS`.
    ReplanBudgetExhausted,
}

impl ErrorKind {
    /// Fixed transient-error classification table (§6, Error taxonomy).
    ///
    /// Matches case-insensitively against a fixed set of substrings drawn
    /// from the spec's examples (network, throttling, conflict-retryable).
    pub fn classify_message(message: &str) -> ErrorKind {
        let lower = message.to_lowercase();
        const TRANSIENT_MARKERS: &[&str] = &[
            "timeout", "timed out", "throttl", "rate limit", "connection reset",
            "connection refused", "temporarily unavailable", "503", "502", "conflict",
            "retry",
        ];
        const UNRECOVERABLE_MARKERS: &[&str] =
            &["permission denied", "access denied", "quota exhausted", "forbidden", "401", "403"];
        const SEMANTIC_MARKERS: &[&str] =
            &["not found", "validation", "invalid", "schema mismatch", "not available"];

        if UNRECOVERABLE_MARKERS.iter().any(|m| lower.contains(m)) {
            ErrorKind::Unrecoverable
        } else if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
            ErrorKind::Transient
        } else if SEMANTIC_MARKERS.iter().any(|m| lower.contains(m)) {
            ErrorKind::Semantic
        } else {
            // Conservative default: treat unrecognized errors as semantic so
            // they escalate to replanning rather than retrying forever.
            ErrorKind::Semantic
        }
    }
}

/// Top-level error type for fallible orchestrator-adjacent operations.
#[derive(Debug, Error)]
pub enum DepctlError {
    #[error("plan not found: {0}")]
    PlanNotFound(uuid::Uuid),

    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("validation failed: {0:?}")]
    ValidationFailed(Vec<String>),

    #[error("replan budget exhausted after {0} replans")]
    ReplanBudgetExhausted(u32),

    #[error("store error: {0}")]
    Store(String),

    #[error("audit sink unavailable: {0}")]
    AuditUnavailable(String),

    #[error("synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("retrieval failed: {0}")]
    RetrievalFailed(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type DepctlResult<T> = Result<T, DepctlError>;

impl From<serde_json::Error> for DepctlError {
    fn from(e: serde_json::Error) -> Self {
        DepctlError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_transient_markers() {
        assert_eq!(ErrorKind::classify_message("connection timeout"), ErrorKind::Transient);
        assert_eq!(ErrorKind::classify_message("rate limit exceeded"), ErrorKind::Transient);
    }

    #[test]
    fn classifies_unrecoverable_markers() {
        assert_eq!(ErrorKind::classify_message("Permission Denied"), ErrorKind::Unrecoverable);
        assert_eq!(ErrorKind::classify_message("quota exhausted for account"), ErrorKind::Unrecoverable);
    }

    #[test]
    fn classifies_semantic_markers() {
        assert_eq!(
            ErrorKind::classify_message("instance type not available in region"),
            ErrorKind::Semantic
        );
        assert_eq!(ErrorKind::classify_message("resource not found"), ErrorKind::Semantic);
    }

    #[test]
    fn unrecoverable_takes_priority_over_transient() {
        // "forbidden" and "timeout" both present; unrecoverable must win.
        assert_eq!(
            ErrorKind::classify_message("request forbidden after timeout"),
            ErrorKind::Unrecoverable
        );
    }
}
