//! Harness-level errors

use opbench_remote::{ProtocolError, RemoteError};
use std::time::Duration;
use thiserror::Error;

/// Why a single `execute` call produced no results.
///
/// Every variant is recoverable from the caller's side: the caller decides
/// whether to retry, skip the subject or abort the run.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The child exceeded its wall-clock budget and was killed
    #[error("Benchmark timed out after {0:?}")]
    Timeout(Duration),

    /// The child ran but reported a failure; the message is its diagnostic verbatim
    #[error("{message}")]
    Script {
        message: String,
        exit_code: Option<i32>,
    },

    /// The child exited cleanly but its output broke the result protocol
    #[error("Invalid benchmark output: {0}")]
    Protocol(#[from] ProtocolError),

    /// The child could not be started or its output could not be collected
    #[error("Failed to launch benchmark: {0}")]
    Launch(#[source] RemoteError),

    #[error("Invalid execution context: {0}")]
    InvalidContext(String),

    #[error("Invalid executor configuration: {0}")]
    InvalidConfig(String),

    #[error("Incomplete results: no {0} metric")]
    MissingMetric(&'static str),

    #[error("Duplicate {0} metric")]
    DuplicateMetric(&'static str),
}

impl From<RemoteError> for ExecutionError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Timeout(timeout) => ExecutionError::Timeout(timeout),
            RemoteError::Script(error) => ExecutionError::Script {
                message: error.message,
                exit_code: error.exit_code,
            },
            other => ExecutionError::Launch(other),
        }
    }
}

impl ExecutionError {
    /// Whether the subject itself failed, as opposed to the harness
    pub fn is_script_error(&self) -> bool {
        matches!(self, ExecutionError::Script { .. })
    }

    /// Whether the child was killed on timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutionError::Timeout(_))
    }
}
