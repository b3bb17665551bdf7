//! Workflow registry: definitions by name plus bounded run history
//!
//! Definitions are validated on registration and keyed by name. Finished
//! runs are appended to a history list; the oldest entries are evicted
//! once the configured limit is reached.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use workflow_types::{
    RunStatus, Workflow, WorkflowError, WorkflowRecord, WorkflowResult, WorkflowRun,
};

/// Aggregate counts over recorded runs
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub total: usize,
    pub by_status: BTreeMap<RunStatus, usize>,
    /// Mean wall-clock duration of completed runs
    pub mean_duration_ms: Option<f64>,
}

/// Persisted form of a registry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub history_limit: usize,
    pub workflows: Vec<WorkflowRecord>,
    /// Oldest first
    #[serde(default)]
    pub history: Vec<WorkflowRun>,
}

/// Registry of workflow definitions and finished runs
#[derive(Clone, Debug)]
pub struct WorkflowRegistry {
    workflows: BTreeMap<String, Workflow>,
    history: VecDeque<WorkflowRun>,
    history_limit: usize,
}

impl WorkflowRegistry {
    /// Create a new empty registry keeping at most `history_limit` runs
    pub fn new(history_limit: usize) -> Self {
        Self {
            workflows: BTreeMap::new(),
            history: VecDeque::new(),
            history_limit,
        }
    }

    // ── Definitions ──────────────────────────────────────────────────

    /// Register a workflow. Fails if the name is taken or the workflow is invalid.
    pub fn register(&mut self, workflow: Workflow) -> WorkflowResult<()> {
        if self.workflows.contains_key(&workflow.name) {
            return Err(WorkflowError::DuplicateWorkflow(workflow.name));
        }
        workflow.validate()?;

        tracing::info!(
            workflow = %workflow.name,
            steps = workflow.step_count(),
            "Workflow registered"
        );
        self.workflows.insert(workflow.name.clone(), workflow);
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> WorkflowResult<Workflow> {
        let workflow = self
            .workflows
            .remove(name)
            .ok_or_else(|| WorkflowError::WorkflowNotFound(name.to_string()))?;
        tracing::info!(workflow = %name, "Workflow unregistered");
        Ok(workflow)
    }

    pub fn get(&self, name: &str) -> WorkflowResult<&Workflow> {
        self.workflows
            .get(name)
            .ok_or_else(|| WorkflowError::WorkflowNotFound(name.to_string()))
    }

    /// All workflows, ordered by name
    pub fn list(&self) -> Vec<&Workflow> {
        self.workflows.values().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workflows.contains_key(name)
    }

    pub fn count(&self) -> usize {
        self.workflows.len()
    }

    // ── History ──────────────────────────────────────────────────────

    pub fn record_run(&mut self, run: WorkflowRun) {
        if self.history_limit == 0 {
            return;
        }
        while self.history.len() >= self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(run);
    }

    /// Up to `limit` runs of a workflow, most recent first
    pub fn runs_for(&self, workflow_name: &str, limit: usize) -> Vec<&WorkflowRun> {
        self.history
            .iter()
            .rev()
            .filter(|run| run.workflow_name == workflow_name)
            .take(limit)
            .collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Aggregate history, optionally for one workflow
    pub fn stats(&self, workflow_name: Option<&str>) -> RunStats {
        let runs = self
            .history
            .iter()
            .filter(|run| workflow_name.map_or(true, |name| run.workflow_name == name));

        let mut stats = RunStats::default();
        let mut completed_durations = Vec::new();
        for run in runs {
            stats.total += 1;
            *stats.by_status.entry(run.status).or_default() += 1;
            if run.status == RunStatus::Completed {
                if let Some(duration) = run.duration_ms() {
                    completed_durations.push(duration as f64);
                }
            }
        }

        if !completed_durations.is_empty() {
            let sum: f64 = completed_durations.iter().sum();
            stats.mean_duration_ms = Some(sum / completed_durations.len() as f64);
        }
        stats
    }

    // ── Persistence ──────────────────────────────────────────────────

    pub fn to_record(&self) -> RegistryRecord {
        RegistryRecord {
            history_limit: self.history_limit,
            workflows: self.workflows.values().map(Workflow::to_record).collect(),
            history: self.history.iter().cloned().collect(),
        }
    }

    /// Rebuild a registry. Restored workflows are re-validated.
    pub fn from_record(record: RegistryRecord) -> WorkflowResult<Self> {
        let mut registry = Self::new(record.history_limit);
        for workflow in record.workflows {
            registry.register(Workflow::from_record(workflow)?)?;
        }
        for run in record.history {
            registry.record_run(run);
        }
        Ok(registry)
    }

    pub fn to_value(&self) -> WorkflowResult<serde_json::Value> {
        serde_json::to_value(self.to_record()).map_err(|e| WorkflowError::Record(e.to_string()))
    }

    pub fn from_value(value: &serde_json::Value) -> WorkflowResult<Self> {
        let record: RegistryRecord = serde_json::from_value(value.clone())
            .map_err(|e| WorkflowError::Record(e.to_string()))?;
        Self::from_record(record)
    }
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workflow_types::{Payload, Step};

    fn workflow(name: &str) -> Workflow {
        Workflow::new(name)
            .with_step(Step::new("only", "svc", "default"))
            .unwrap()
    }

    fn finished(name: &str, ok: bool) -> WorkflowRun {
        let mut run = WorkflowRun::new(name, Payload::new());
        run.start();
        if ok {
            run.complete();
        } else {
            run.fail("boom");
        }
        run
    }

    #[test]
    fn test_register_get_list() {
        let mut registry = WorkflowRegistry::default();
        registry.register(workflow("b")).unwrap();
        registry.register(workflow("a")).unwrap();

        assert_eq!(registry.get("a").unwrap().name, "a");
        let names: Vec<_> = registry.list().iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(matches!(
            registry.register(workflow("a")),
            Err(WorkflowError::DuplicateWorkflow(_))
        ));
        assert!(matches!(
            registry.get("zzz"),
            Err(WorkflowError::WorkflowNotFound(_))
        ));
    }

    #[test]
    fn test_invalid_workflow_rejected() {
        let mut registry = WorkflowRegistry::default();
        assert!(registry.register(Workflow::new("empty")).is_err());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_unregister() {
        let mut registry = WorkflowRegistry::default();
        registry.register(workflow("a")).unwrap();
        assert!(registry.unregister("a").is_ok());
        assert!(!registry.contains("a"));
        assert!(registry.unregister("a").is_err());
    }

    #[test]
    fn test_history_bounded_and_recent_first() {
        let mut registry = WorkflowRegistry::new(3);
        let runs: Vec<_> = (0..5).map(|_| finished("wf", true)).collect();
        let ids: Vec<_> = runs.iter().map(|r| r.id.clone()).collect();
        for run in runs {
            registry.record_run(run);
        }

        assert_eq!(registry.history_len(), 3);
        let recent: Vec<_> = registry.runs_for("wf", 2).iter().map(|r| r.id.clone()).collect();
        assert_eq!(recent, vec![ids[4].clone(), ids[3].clone()]);
        assert!(registry.runs_for("other", 10).is_empty());
    }

    #[test]
    fn test_stats() {
        let mut registry = WorkflowRegistry::default();
        registry.record_run(finished("a", true));
        registry.record_run(finished("a", false));
        registry.record_run(finished("b", true));

        let all = registry.stats(None);
        assert_eq!(all.total, 3);
        assert_eq!(all.by_status[&RunStatus::Completed], 2);
        assert!(all.mean_duration_ms.is_some());

        let only_a = registry.stats(Some("a"));
        assert_eq!(only_a.total, 2);
        assert_eq!(only_a.by_status[&RunStatus::Failed], 1);

        assert_eq!(registry.stats(Some("none")), RunStats::default());
    }

    #[test]
    fn test_record_round_trip() {
        let mut registry = WorkflowRegistry::new(10);
        registry.register(workflow("a")).unwrap();
        registry.record_run(finished("a", true));

        let value = registry.to_value().unwrap();
        let restored = WorkflowRegistry::from_value(&value).unwrap();
        assert!(restored.contains("a"));
        assert_eq!(restored.history_len(), 1);
        assert_eq!(restored.history_limit(), 10);
    }
}
