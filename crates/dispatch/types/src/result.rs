//! Execution results: the structured outcome of a dispatch

use crate::{Payload, RequestId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Final status of a dispatch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Escalated,
    Incomplete,
    Panic,
}

impl ExecutionStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionStatus::Success)
    }
}

/// A side effect a dispatch asks the host to carry out
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideEffect {
    /// Kind of effect, e.g. `escalation` or `alert`
    #[serde(rename = "type")]
    pub kind: String,
    /// Who should act on it
    pub target: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl SideEffect {
    pub fn new(kind: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            target: target.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Outcome of a single dispatch. Immutable once produced.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub request_id: RequestId,
    pub target: String,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Payload>,
    #[serde(default)]
    pub output_kind: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub side_effects: Vec<SideEffect>,
}

impl ExecutionResult {
    pub fn new(request_id: RequestId, target: impl Into<String>, status: ExecutionStatus) -> Self {
        Self {
            request_id,
            target: target.into(),
            status,
            output: None,
            output_kind: String::new(),
            duration_ms: 0,
            errors: Vec::new(),
            side_effects: Vec::new(),
        }
    }

    pub fn with_output(mut self, output: Payload, kind: impl Into<String>) -> Self {
        self.output = Some(output);
        self.output_kind = kind.into();
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self
    }

    pub fn with_side_effect(mut self, effect: SideEffect) -> Self {
        self.side_effects.push(effect);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}
