//! Error types for the Workflow layer

use crate::RunId;

/// Errors that can occur in Workflow operations
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Workflow already registered: {0}")]
    DuplicateWorkflow(String),

    #[error("Workflow has no steps: {0}")]
    EmptyWorkflow(String),

    #[error("Step not found: {0}")]
    StepNotFound(String),

    #[error("Duplicate step name: {0}")]
    DuplicateStep(String),

    #[error("Invalid step '{step}': {reason}")]
    InvalidStep { step: String, reason: String },

    #[error("Entry step does not exist: {0}")]
    InvalidEntry(String),

    #[error("Branch '{branch}' on step '{step}' targets unknown step '{target}'")]
    DanglingBranch {
        step: String,
        branch: String,
        target: String,
    },

    #[error("Branch not found: {step}/{branch}")]
    BranchNotFound { step: String, branch: String },

    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    #[error("Invalid workflow record: {0}")]
    Record(String),
}

/// Result type alias for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;
