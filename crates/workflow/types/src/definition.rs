//! Workflow definitions: ordered steps with branch edges
//!
//! A Workflow is an arena of steps plus a name → index lookup. Branch
//! targets are names resolved against that arena. Structural validation
//! runs on demand, so steps may be added in any order.

use crate::{Branch, Condition, ConditionExpr, Step, WorkflowError, WorkflowResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

// ── Workflow ─────────────────────────────────────────────────────────

/// A named, ordered collection of steps
#[derive(Clone, Debug)]
pub struct Workflow {
    /// Unique registry key
    pub name: String,
    /// What this workflow accomplishes
    pub description: String,
    steps: Vec<Step>,
    index: HashMap<String, usize>,
    entry_step: Option<String>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            steps: Vec::new(),
            index: HashMap::new(),
            entry_step: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Append a step. Names must be unique and fields non-empty.
    pub fn add_step(&mut self, step: Step) -> WorkflowResult<()> {
        step.validate()?;
        if self.index.contains_key(&step.name) {
            return Err(WorkflowError::DuplicateStep(step.name));
        }
        self.index.insert(step.name.clone(), self.steps.len());
        self.steps.push(step);
        Ok(())
    }

    /// Builder form of [`add_step`](Self::add_step)
    pub fn with_step(mut self, step: Step) -> WorkflowResult<Self> {
        self.add_step(step)?;
        Ok(self)
    }

    /// Start at a step other than the first one added
    pub fn set_entry_step(&mut self, name: impl Into<String>) -> WorkflowResult<()> {
        let name = name.into();
        if !self.index.contains_key(&name) {
            return Err(WorkflowError::InvalidEntry(name));
        }
        self.entry_step = Some(name);
        Ok(())
    }

    /// Attach a branch to an existing step. The target is checked by `validate`.
    pub fn add_branch(&mut self, step: &str, branch: Branch) -> WorkflowResult<()> {
        self.step_mut(step)?.branches.push(branch);
        Ok(())
    }

    // ── Lookup ───────────────────────────────────────────────────────

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.index.get(name).map(|&i| &self.steps[i])
    }

    pub fn step_at(&self, position: usize) -> Option<&Step> {
        self.steps.get(position)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// The explicit entry step, else the first step added
    pub fn entry_step(&self) -> Option<&str> {
        self.entry_step
            .as_deref()
            .or_else(|| self.steps.first().map(|s| s.name.as_str()))
    }

    /// The step declared right after `name`
    pub fn next_after(&self, name: &str) -> Option<&Step> {
        self.position(name).and_then(|i| self.steps.get(i + 1))
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    fn step_mut(&mut self, name: &str) -> WorkflowResult<&mut Step> {
        let position = self
            .position(name)
            .ok_or_else(|| WorkflowError::StepNotFound(name.to_string()))?;
        Ok(&mut self.steps[position])
    }

    // ── Validation ───────────────────────────────────────────────────

    /// Validate the workflow for structural correctness
    pub fn validate(&self) -> WorkflowResult<()> {
        if self.steps.is_empty() {
            return Err(WorkflowError::EmptyWorkflow(self.name.clone()));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            step.validate()?;
            if !seen.insert(step.name.as_str()) {
                return Err(WorkflowError::DuplicateStep(step.name.clone()));
            }
        }

        // Compensations share the step name space
        for compensation in self.steps.iter().filter_map(|s| s.compensation.as_deref()) {
            if !seen.insert(compensation.name.as_str()) {
                return Err(WorkflowError::DuplicateStep(compensation.name.clone()));
            }
        }

        if let Some(entry) = &self.entry_step {
            if !self.index.contains_key(entry) {
                return Err(WorkflowError::InvalidEntry(entry.clone()));
            }
        }

        for step in &self.steps {
            for branch in &step.branches {
                if !self.index.contains_key(&branch.target_step) {
                    return Err(WorkflowError::DanglingBranch {
                        step: step.name.clone(),
                        branch: branch.name.clone(),
                        target: branch.target_step.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    // ── Predicates ───────────────────────────────────────────────────

    /// Replace a step's condition, typically to re-attach a predicate
    pub fn attach_step_condition(
        &mut self,
        step: &str,
        condition: impl Into<Condition>,
    ) -> WorkflowResult<()> {
        self.step_mut(step)?.condition = Some(condition.into());
        Ok(())
    }

    /// Replace a branch's condition, typically to re-attach a predicate
    pub fn attach_branch_condition(
        &mut self,
        step: &str,
        branch: &str,
        condition: impl Into<Condition>,
    ) -> WorkflowResult<()> {
        let owner = self.step_mut(step)?;
        let target = owner
            .branches
            .iter_mut()
            .find(|b| b.name == branch)
            .ok_or_else(|| WorkflowError::BranchNotFound {
                step: step.to_string(),
                branch: branch.to_string(),
            })?;
        target.condition = condition.into();
        Ok(())
    }

    /// Conditions awaiting re-attachment, as `step` or `step/branch`
    pub fn detached_conditions(&self) -> Vec<String> {
        let mut detached = Vec::new();
        for step in &self.steps {
            if step.condition.as_ref().is_some_and(Condition::is_detached) {
                detached.push(step.name.clone());
            }
            for branch in &step.branches {
                if branch.condition.is_detached() {
                    detached.push(format!("{}/{}", step.name, branch.name));
                }
            }
        }
        detached
    }

    // ── Persistence ──────────────────────────────────────────────────

    /// Persistable form. Injected predicates are recorded as detached.
    pub fn to_record(&self) -> WorkflowRecord {
        WorkflowRecord {
            name: self.name.clone(),
            description: self.description.clone(),
            entry_step: self.entry_step.clone(),
            steps: self.steps.iter().map(StepRecord::from_step).collect(),
        }
    }

    /// Rebuild a workflow. Detached conditions evaluate false until re-attached.
    pub fn from_record(record: WorkflowRecord) -> WorkflowResult<Self> {
        let mut workflow = Workflow::new(record.name).with_description(record.description);
        for step in record.steps {
            workflow.add_step(step.into_step())?;
        }
        if let Some(entry) = record.entry_step {
            workflow.set_entry_step(entry)?;
        }
        Ok(workflow)
    }

    pub fn to_value(&self) -> WorkflowResult<serde_json::Value> {
        serde_json::to_value(self.to_record()).map_err(|e| WorkflowError::Record(e.to_string()))
    }

    pub fn from_value(value: &serde_json::Value) -> WorkflowResult<Self> {
        let record: WorkflowRecord = serde_json::from_value(value.clone())
            .map_err(|e| WorkflowError::Record(e.to_string()))?;
        Self::from_record(record)
    }
}

// ── Records ──────────────────────────────────────────────────────────

/// Persisted condition slot
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionRecord {
    Expr(ConditionExpr),
    /// An injected predicate that cannot be persisted
    Detached,
}

impl ConditionRecord {
    fn from_condition(condition: &Condition) -> Self {
        match condition.as_expr() {
            Some(expr) => ConditionRecord::Expr(expr.clone()),
            None => ConditionRecord::Detached,
        }
    }

    fn into_condition(self) -> Condition {
        match self {
            ConditionRecord::Expr(expr) => Condition::Expr(expr),
            ConditionRecord::Detached => Condition::Detached,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BranchRecord {
    pub name: String,
    pub target_step: String,
    #[serde(default)]
    pub priority: i32,
    pub condition: ConditionRecord,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub target: String,
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<BranchRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation: Option<Box<StepRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_mapping: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_mapping: Option<BTreeMap<String, String>>,
}

fn default_required() -> bool {
    true
}

impl StepRecord {
    fn from_step(step: &Step) -> Self {
        Self {
            name: step.name.clone(),
            target: step.target.clone(),
            mode: step.mode.clone(),
            condition: step.condition.as_ref().map(ConditionRecord::from_condition),
            branches: step
                .branches
                .iter()
                .map(|b| BranchRecord {
                    name: b.name.clone(),
                    target_step: b.target_step.clone(),
                    priority: b.priority,
                    condition: ConditionRecord::from_condition(&b.condition),
                })
                .collect(),
            compensation: step
                .compensation
                .as_deref()
                .map(|c| Box::new(StepRecord::from_step(c))),
            timeout_ms: step.timeout_ms,
            required: step.required,
            input_mapping: step.input_mapping.clone(),
            output_mapping: step.output_mapping.clone(),
        }
    }

    fn into_step(self) -> Step {
        Step {
            name: self.name,
            target: self.target,
            mode: self.mode,
            condition: self.condition.map(ConditionRecord::into_condition),
            branches: self
                .branches
                .into_iter()
                .map(|b| {
                    Branch::new(b.name, b.target_step, b.condition.into_condition())
                        .with_priority(b.priority)
                })
                .collect(),
            compensation: self.compensation.map(|c| Box::new(c.into_step())),
            timeout_ms: self.timeout_ms,
            required: self.required,
            input_mapping: self.input_mapping,
            output_mapping: self.output_mapping,
        }
    }
}

/// Persisted form of a [`Workflow`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_step: Option<String>,
    pub steps: Vec<StepRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_types::Payload;

    fn linear(names: &[&str]) -> Workflow {
        let mut workflow = Workflow::new("linear");
        for name in names {
            workflow.add_step(Step::new(*name, "svc", "default")).unwrap();
        }
        workflow
    }

    #[test]
    fn test_entry_defaults_to_first_step() {
        let mut workflow = linear(&["a", "b", "c"]);
        assert_eq!(workflow.entry_step(), Some("a"));
        workflow.set_entry_step("b").unwrap();
        assert_eq!(workflow.entry_step(), Some("b"));
        assert!(matches!(
            workflow.set_entry_step("zzz"),
            Err(WorkflowError::InvalidEntry(_))
        ));
        assert_eq!(workflow.next_after("b").unwrap().name, "c");
        assert!(workflow.next_after("c").is_none());
    }

    #[test]
    fn test_duplicate_step_rejected() {
        let mut workflow = linear(&["a"]);
        assert!(matches!(
            workflow.add_step(Step::new("a", "x", "y")),
            Err(WorkflowError::DuplicateStep(_))
        ));
    }

    #[test]
    fn test_validate_on_demand() {
        assert!(matches!(
            Workflow::new("empty").validate(),
            Err(WorkflowError::EmptyWorkflow(_))
        ));

        let mut workflow = linear(&["a", "b"]);
        workflow
            .add_branch("a", Branch::unconditional("jump", "later"))
            .unwrap();
        assert!(matches!(
            workflow.validate(),
            Err(WorkflowError::DanglingBranch { .. })
        ));

        workflow.add_step(Step::new("later", "svc", "default")).unwrap();
        assert!(workflow.validate().is_ok());
    }

    #[test]
    fn test_compensation_names_must_be_unique() {
        let own_name = linear(&["b"])
            .with_step(
                Step::new("a", "svc", "default")
                    .with_compensation(Step::new("a", "svc", "undo")),
            )
            .unwrap();
        assert!(matches!(
            own_name.validate(),
            Err(WorkflowError::DuplicateStep(name)) if name == "a"
        ));

        let sibling_name = linear(&["b"])
            .with_step(
                Step::new("a", "svc", "default")
                    .with_compensation(Step::new("b", "svc", "undo")),
            )
            .unwrap();
        assert!(sibling_name.validate().is_err());

        let mut shared = linear(&["a", "b"]);
        for name in ["a", "b"] {
            shared.steps[shared.index[name]].compensation =
                Some(Box::new(Step::new("undo", "svc", "undo")));
        }
        assert!(matches!(
            shared.validate(),
            Err(WorkflowError::DuplicateStep(name)) if name == "undo"
        ));

        let distinct = linear(&["b"])
            .with_step(
                Step::new("a", "svc", "default")
                    .with_compensation(Step::new("undo_a", "svc", "undo")),
            )
            .unwrap();
        assert!(distinct.validate().is_ok());
    }

    #[test]
    fn test_record_round_trip() {
        let mut workflow = linear(&["a", "b", "c"]);
        workflow.set_entry_step("b").unwrap();
        workflow
            .add_branch(
                "b",
                Branch::new("hot", "a", ConditionExpr::charge_range(71, 100)).with_priority(4),
            )
            .unwrap();

        let value = workflow.to_value().unwrap();
        let restored = Workflow::from_value(&value).unwrap();

        let names: Vec<_> = restored.steps().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(restored.entry_step(), Some("b"));
        assert_eq!(restored.to_record(), workflow.to_record());
        assert!(restored.detached_conditions().is_empty());
    }

    #[test]
    fn test_predicates_come_back_detached() {
        let mut workflow = Workflow::new("live");
        workflow
            .add_step(
                Step::new("gate", "svc", "default")
                    .with_condition(Condition::predicate(|_: &Payload| -> anyhow::Result<bool> {
                        Ok(true)
                    }))
                    .with_branch(Branch::new(
                        "custom",
                        "gate",
                        Condition::predicate(|_: &Payload| -> anyhow::Result<bool> { Ok(true) }),
                    )),
            )
            .unwrap();

        let mut restored = Workflow::from_record(workflow.to_record()).unwrap();
        assert_eq!(restored.detached_conditions(), vec!["gate", "gate/custom"]);
        assert!(!restored.steps()[0].should_run(&Payload::new()));

        restored
            .attach_step_condition("gate", ConditionExpr::Always)
            .unwrap();
        restored
            .attach_branch_condition("gate", "custom", ConditionExpr::Never)
            .unwrap();
        assert!(restored.detached_conditions().is_empty());
        assert!(matches!(
            restored.attach_branch_condition("gate", "missing", ConditionExpr::Never),
            Err(WorkflowError::BranchNotFound { .. })
        ));
    }
}
