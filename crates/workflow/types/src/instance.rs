//! Workflow runs: one execution of a workflow
//!
//! A WorkflowRun owns its step results and its context exclusively
//! while it executes. Status moves `pending → running` and ends in
//! `completed` or `failed`; `paused` may be resumed and `compensating`
//! is held only while a compensation step runs.

use chrono::{DateTime, Utc};
use dispatch_types::Payload;
use serde::{Deserialize, Serialize};

// ── Run Identifier ───────────────────────────────────────────────────

/// Unique identifier for a workflow run
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Status ───────────────────────────────────────────────────────────

/// Lifecycle state of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
    Compensating,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Paused => "paused",
            RunStatus::Compensating => "compensating",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a single step
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Compensated,
}

// ── Step Result ──────────────────────────────────────────────────────

/// Recorded outcome of one step execution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    /// Name of the branch selected after this step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_taken: Option<String>,
    #[serde(default)]
    pub compensation_triggered: bool,
}

impl StepResult {
    pub fn new(step_name: impl Into<String>, status: StepStatus) -> Self {
        Self {
            step_name: step_name.into(),
            status,
            output: None,
            error: None,
            duration_ms: 0,
            branch_taken: None,
            compensation_triggered: false,
        }
    }

    pub fn skipped(step_name: impl Into<String>) -> Self {
        Self::new(step_name, StepStatus::Skipped)
    }

    pub fn completed(step_name: impl Into<String>, output: Payload) -> Self {
        Self::new(step_name, StepStatus::Completed).with_output(output)
    }

    pub fn failed(step_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(step_name, StepStatus::Failed).with_error(error)
    }

    pub fn with_output(mut self, output: Payload) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn is_failed(&self) -> bool {
        self.status == StepStatus::Failed
    }
}

// ── Workflow Run ─────────────────────────────────────────────────────

/// One execution instance of a workflow
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: RunId,
    pub workflow_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub step_results: Vec<StepResult>,
    /// The step executing, or the step the run paused at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    /// Shared state visible to every step
    #[serde(default)]
    pub context: Payload,
    #[serde(default)]
    pub escalations: Vec<String>,
    #[serde(default)]
    pub compensations_executed: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowRun {
    /// Create a pending run with an initial context
    pub fn new(workflow_name: impl Into<String>, context: Payload) -> Self {
        Self {
            id: RunId::generate(),
            workflow_name: workflow_name.into(),
            status: RunStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            step_results: Vec::new(),
            current_step: None,
            context,
            escalations: Vec::new(),
            compensations_executed: Vec::new(),
            error: None,
        }
    }

    pub fn start(&mut self) {
        self.status = RunStatus::Running;
    }

    pub fn complete(&mut self) {
        self.status = RunStatus::Completed;
        self.current_step = None;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    /// Pause after `step` has executed
    pub fn pause_at(&mut self, step: impl Into<String>) {
        self.status = RunStatus::Paused;
        self.current_step = Some(step.into());
    }

    pub fn record(&mut self, result: StepResult) {
        self.step_results.push(result);
    }

    pub fn escalate(&mut self, target: impl Into<String>) {
        self.escalations.push(target.into());
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The latest result recorded for a step
    pub fn result_for(&self, step: &str) -> Option<&StepResult> {
        self.step_results.iter().rev().find(|r| r.step_name == step)
    }

    /// Names of steps that actually ran, in order
    pub fn executed_steps(&self) -> Vec<&str> {
        self.step_results
            .iter()
            .filter(|r| r.status != StepStatus::Skipped)
            .map(|r| r.step_name.as_str())
            .collect()
    }

    /// Wall-clock duration of a finished run
    pub fn duration_ms(&self) -> Option<u64> {
        self.completed_at.map(|end| {
            end.signed_duration_since(self.started_at)
                .num_milliseconds()
                .max(0) as u64
        })
    }
}
