//! Error types and handling
//!
//! This module provides the error taxonomy used throughout the Loom core.
//! Every error is either recovered locally (with a logged event) or surfaced
//! at the next approval gate; the orchestrator loop itself never crashes on
//! anything the user could meaningfully decide about.
//!
//! All errors implement the `CoreErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.

use thiserror::Error;

/// Trait for Loom error extensions
///
/// Provides additional context for errors: a hint safe to display to end
/// users and recoverability information.
pub trait CoreErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or degrade to a checkpoint.
    /// Non-recoverable errors terminate the session.
    fn is_recoverable(&self) -> bool;
}

/// Main core error type
///
/// Each variant corresponds to one row of the error-propagation table:
/// local recovery where possible, gate-visible reporting otherwise.
#[derive(Debug, Error)]
pub enum CoreError {
    // Startup errors
    #[error("Configuration missing: {0}")]
    ConfigMissing(String),

    #[error("Credential not set: {0}")]
    CredentialMissing(String),

    // Memory store errors
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Transient I/O failure after {attempts} attempts: {message}")]
    IoTransient { attempts: u32, message: String },

    // Research errors
    #[error("Research offline")]
    ResearchOffline,

    #[error("Research query timed out: {0}")]
    ResearchTimeout(String),

    // Agent errors
    #[error("Agent {role} failed (retryable): {message}")]
    AgentRetryable { role: String, message: String },

    #[error("Agent {role} failed fatally: {message}")]
    AgentFatal { role: String, message: String },

    #[error("Agent {role} timed out")]
    AgentTimeout { role: String },

    // Dispatch errors
    #[error("Unknown tool: {0}")]
    DispatchInvalidTool(String),

    #[error("Missing tool arguments for {tool}: {fields:?}")]
    DispatchMissingArguments { tool: String, fields: Vec<String> },

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    // Gate errors
    #[error("Gate timed out")]
    GateTimeout,

    // Loop errors
    #[error("Iteration cap exceeded ({0})")]
    IterationCapExceeded(u32),

    #[error("Tool-call cap exceeded ({0} per iteration)")]
    ToolCallCapExceeded(u32),

    // Session errors
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session cancelled")]
    Cancelled,

    // Learning log errors
    #[error("Learning log locked: {0}")]
    LogLocked(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreErrorExt for CoreError {
    fn user_hint(&self) -> &str {
        match self {
            Self::ConfigMissing(_) => "Check the memory root path and config file",
            Self::CredentialMissing(_) => "Set the LOOM_API_KEY environment variable",

            Self::EntityNotFound(_) => "Entity is not in the memory store. Check the name",
            Self::IoTransient { .. } => "Memory store read failed repeatedly. Check the disk",

            Self::ResearchOffline => "No network connection. Planning continues without research",
            Self::ResearchTimeout(_) => "Web search took too long. Results may be incomplete",

            Self::AgentRetryable { .. } => "Agent output was malformed. It will be retried",
            Self::AgentFatal { .. } => "Agent failed repeatedly. See the checkpoint report",
            Self::AgentTimeout { .. } => "Agent took too long to respond. It will be retried",

            Self::DispatchInvalidTool(_) => "The model requested a tool that does not exist",
            Self::DispatchMissingArguments { .. } => "The model omitted required tool arguments",
            Self::ConstraintViolation(_) => {
                "A tool call referenced entities outside the approved set"
            }

            Self::GateTimeout => "No decision arrived in time. The session was aborted",

            Self::IterationCapExceeded(_) => "Too many iterations. Narrow the goal and retry",
            Self::ToolCallCapExceeded(_) => "Too many tool calls this iteration",

            Self::SessionNotFound(_) => "Unknown session id",
            Self::Cancelled => "The session was cancelled",

            Self::LogLocked(_) => "Learning log is locked by another writer. Try again",

            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable: terminate the session (or never start it)
            Self::ConfigMissing(_)
            | Self::CredentialMissing(_)
            | Self::GateTimeout
            | Self::IterationCapExceeded(_)
            | Self::SessionNotFound(_)
            | Self::Cancelled => false,

            // Everything else degrades to a gate or retries locally
            _ => true,
        }
    }
}

/// Process exit codes for CLI termination
///
/// Stable contract for scripts wrapping the `loom` binary.
pub mod exit_codes {
    /// Normal termination; session reached DONE
    pub const DONE: i32 = 0;
    /// Aborted by the user (or gate timeout)
    pub const ABORTED: i32 = 2;
    /// Iteration cap hit
    pub const ITERATION_CAP: i32 = 3;
    /// Configuration error (missing memory root, missing credentials)
    pub const CONFIG_ERROR: i32 = 4;
    /// Unrecoverable internal error
    pub const INTERNAL_ERROR: i32 = 5;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverability() {
        assert!(!CoreError::ConfigMissing("memory root".into()).is_recoverable());
        assert!(!CoreError::GateTimeout.is_recoverable());
        assert!(!CoreError::IterationCapExceeded(10).is_recoverable());

        assert!(CoreError::EntityNotFound("x".into()).is_recoverable());
        assert!(CoreError::DispatchInvalidTool("x".into()).is_recoverable());
        assert!(CoreError::ResearchOffline.is_recoverable());
        assert!(CoreError::AgentRetryable {
            role: "planner".into(),
            message: "bad json".into()
        }
        .is_recoverable());
    }

    #[test]
    fn test_user_hints_are_path_free() {
        let errors: Vec<CoreError> = vec![
            CoreError::ConfigMissing("/home/user/.loom".into()),
            CoreError::EntityNotFound("/etc/passwd".into()),
            CoreError::DispatchInvalidTool("evil".into()),
        ];
        for e in errors {
            assert!(!e.user_hint().contains('/'));
        }
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let codes = [
            exit_codes::DONE,
            exit_codes::ABORTED,
            exit_codes::ITERATION_CAP,
            exit_codes::CONFIG_ERROR,
            exit_codes::INTERNAL_ERROR,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in codes.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }
}
