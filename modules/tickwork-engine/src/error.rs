//! Typed errors for dispatch and scheduling.

use thiserror::Error;

use crate::executor::PayloadKind;
use crate::incident::IncidentCode;
use crate::schedule::TaskHandle;

#[derive(Debug, Error)]
pub enum ProcessError {
    /// Registration against a code the registry never issued.
    #[error("unknown incident code: {0}")]
    UnknownIncident(IncidentCode),

    /// A scheduled payload whose kind has no executor.
    #[error("no executor registered for payload kind: {0}")]
    NoExecutor(PayloadKind),

    /// A scheduled task returned an error while the tick was running it.
    #[error("scheduled task {handle} failed: {source}")]
    Task {
        handle: TaskHandle,
        #[source]
        source: anyhow::Error,
    },
}

/// Result type alias for registry and dispatcher operations.
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;
