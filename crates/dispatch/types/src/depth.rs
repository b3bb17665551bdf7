//! Depth tiers: bounded recursion for routed work
//!
//! Every work item is checked against a tiered depth limit. Reaching a
//! limit never fails silently: it yields a [`DepthAction`] the caller must
//! honor, from review escalation up to a fatal panic stop.

use crate::{ExecutionStatus, WorkItemId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Depth tier that bounds an item's recursion
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepthTier {
    /// Default tier
    Standard,
    /// Selected by the `extended-loop` tag
    Extended,
    /// Selected by the `emergency` tag
    Emergency,
    /// Hard ceiling for every item
    Absolute,
}

impl DepthTier {
    pub fn name(&self) -> &'static str {
        match self {
            DepthTier::Standard => "standard",
            DepthTier::Extended => "extended",
            DepthTier::Emergency => "emergency",
            DepthTier::Absolute => "absolute",
        }
    }
}

impl std::fmt::Display for DepthTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What the caller must do after a depth check
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthAction {
    /// Within limits
    Continue,
    /// Standard limit reached; hand the item to review
    EscalateToReview,
    /// Extended limit reached; stop and report partial work
    ForceTerminateIncomplete,
    /// Emergency limit reached; stop and raise an alert
    ForceTerminateAlert,
    /// Absolute limit breached; the owning session must halt
    PanicStop,
}

impl DepthAction {
    pub fn is_continue(&self) -> bool {
        matches!(self, DepthAction::Continue)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, DepthAction::PanicStop)
    }

    /// The execution status a short-circuited dispatch reports
    pub fn execution_status(&self) -> Option<ExecutionStatus> {
        match self {
            DepthAction::Continue => None,
            DepthAction::EscalateToReview => Some(ExecutionStatus::Escalated),
            DepthAction::ForceTerminateIncomplete | DepthAction::ForceTerminateAlert => {
                Some(ExecutionStatus::Incomplete)
            }
            DepthAction::PanicStop => Some(ExecutionStatus::Panic),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DepthAction::Continue => "continue",
            DepthAction::EscalateToReview => "escalate_to_review",
            DepthAction::ForceTerminateIncomplete => "force_terminate_incomplete",
            DepthAction::ForceTerminateAlert => "force_terminate_alert",
            DepthAction::PanicStop => "panic_stop",
        }
    }
}

impl std::fmt::Display for DepthAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a depth check
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthCheck {
    pub action: DepthAction,
    /// The item's depth at check time
    pub depth: u32,
    /// The tier limit that applied
    pub limit: u32,
    pub tier: DepthTier,
}

/// Snapshot of an item's depth headroom
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepthStatus {
    pub depth: u32,
    pub limit: u32,
    pub tier: DepthTier,
    /// Steps left before the limit
    pub remaining: u32,
    /// True when two or fewer steps remain
    pub at_risk: bool,
    /// `depth / limit * 100`, clamped to 100
    pub percent_used: f64,
}

/// A recorded non-Continue depth check
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExhaustionEvent {
    pub timestamp: DateTime<Utc>,
    pub item_id: WorkItemId,
    pub depth: u32,
    pub limit: u32,
    pub action: DepthAction,
}
