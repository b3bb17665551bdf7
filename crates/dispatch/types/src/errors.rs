//! Error types for the routing layer

use crate::{DepthAction, DepthTier, PriorityTier, WorkItemId};

/// A request failed capability or mode checks. Never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    #[error("Invalid mode '{mode}' for target '{target}'")]
    InvalidMode { target: String, mode: String },

    #[error("Request rejected: {0}")]
    Rejected(String),
}

/// Depth-limit violations raised by strict checks
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DepthError {
    /// Recoverable: the caller must honor `action`
    #[error("Depth limit exceeded: depth {depth} reached {tier} limit {limit}, action {action}")]
    LimitExceeded {
        action: DepthAction,
        depth: u32,
        limit: u32,
        tier: DepthTier,
    },

    /// Fatal: the owning session must snapshot state and halt
    #[error("Panic stop: absolute depth breached at depth {depth}")]
    PanicStop { depth: u32 },
}

impl DepthError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DepthError::PanicStop { .. })
    }

    pub fn action(&self) -> DepthAction {
        match self {
            DepthError::LimitExceeded { action, .. } => *action,
            DepthError::PanicStop { .. } => DepthAction::PanicStop,
        }
    }
}

/// Errors raised by the dispatch queue
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Capacity exhausted with no lower-priority victim; apply backpressure
    #[error("Queue overflow: capacity {capacity} reached, no item below {priority} to evict")]
    Overflow {
        capacity: usize,
        priority: PriorityTier,
    },

    #[error("Queue at capacity {capacity}: background item rejected")]
    BackgroundRejected { capacity: usize },

    #[error("Queue is in maintenance mode")]
    Maintenance,

    /// Cyclic routing found; break the cycle before retrying
    #[error("Deadlock detected: route {0} repeats")]
    DeadlockDetected(String),

    #[error("Junction requires at least one item")]
    EmptyJunction,

    #[error("Junction items must share a target: expected '{expected}', found '{found}'")]
    MismatchedJunction { expected: String, found: String },

    #[error("Work item not queued: {0}")]
    NotFound(WorkItemId),

    #[error("Invalid queue record: {0}")]
    Record(String),
}

/// Errors surfaced by the dispatcher to its immediate caller
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Depth error: {0}")]
    Depth(#[from] DepthError),

    #[error("Parse failed: {0}")]
    Parse(String),
}

/// Result type alias for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Result type alias for queue operations
pub type QueueResult<T> = Result<T, QueueError>;
