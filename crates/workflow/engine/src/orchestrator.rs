//! Workflow Orchestrator: the main entry point for the workflow engine
//!
//! The orchestrator executes workflows step by step. It:
//! 1. Evaluates step conditions, skipping steps whose guard is false
//! 2. Invokes step handlers and captures their output and failures
//! 3. Runs compensation for failed steps
//! 4. Records escalations after every executed step
//! 5. Selects branches and pauses or resumes in step mode
//!
//! Handler failures never propagate: they are recorded on the run.

use crate::config::EngineConfig;
use crate::escalation_handler::EscalationHandler;
use crate::handler::{StepHandler, StepHandlerRegistry, StepInvoker};
use crate::registry::WorkflowRegistry;
use dispatch_engine::run_guarded;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use workflow_types::*;

/// One entry of a dry-run plan
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub step_name: String,
    /// False when the step's condition would skip it
    pub would_execute: bool,
    pub has_compensation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_selected: Option<String>,
}

/// A paused run with what is needed to continue it
#[derive(Clone, Debug)]
struct PausedRun {
    run: WorkflowRun,
    workflow: Workflow,
    /// The step to execute on resume
    next_step: String,
}

/// What the run loop does after a step
enum Advance {
    Continue(Option<String>),
    Stop,
}

/// Executes workflows
pub struct WorkflowOrchestrator {
    config: EngineConfig,
    registry: WorkflowRegistry,
    handlers: StepHandlerRegistry,
    invoker: Option<Box<dyn StepInvoker>>,
    escalation_handler: EscalationHandler,
    paused: HashMap<RunId, PausedRun>,
}

impl WorkflowOrchestrator {
    /// Create an orchestrator with default configuration
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            registry: WorkflowRegistry::new(config.history_limit),
            handlers: StepHandlerRegistry::new(),
            invoker: None,
            escalation_handler: EscalationHandler::new(config.escalation.clone()),
            paused: HashMap::new(),
            config,
        }
    }

    /// Route steps without a registered handler through a host invoker
    pub fn with_invoker<I>(mut self, invoker: I) -> Self
    where
        I: StepInvoker + 'static,
    {
        self.invoker = Some(Box::new(invoker));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Handlers and Definitions ─────────────────────────────────────

    pub fn register_handler<H>(
        &mut self,
        target: impl Into<String>,
        mode: impl Into<String>,
        handler: H,
    ) where
        H: StepHandler + 'static,
    {
        self.handlers.register(target, mode, handler);
    }

    pub fn register_workflow(&mut self, workflow: Workflow) -> WorkflowResult<()> {
        self.registry.register(workflow)
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut WorkflowRegistry {
        &mut self.registry
    }

    // ── Execution ────────────────────────────────────────────────────

    /// Run a workflow from its entry step.
    ///
    /// In step mode the run pauses after each executed step that has a
    /// successor; continue it with [`resume`](Self::resume). Only an
    /// invalid workflow is an error; step failures are recorded on the run.
    pub fn run(
        &mut self,
        workflow: &Workflow,
        context: Payload,
        step_mode: bool,
    ) -> WorkflowResult<WorkflowRun> {
        workflow.validate()?;
        let entry = workflow
            .entry_step()
            .map(str::to_string)
            .ok_or_else(|| WorkflowError::EmptyWorkflow(workflow.name.clone()))?;

        let mut run = WorkflowRun::new(workflow.name.clone(), context);
        run.start();
        tracing::info!(
            run_id = %run.id,
            workflow = %workflow.name,
            step_mode,
            "Workflow run started"
        );

        Ok(self.drive(run, workflow, Some(entry), step_mode))
    }

    /// Run a registered workflow by name
    pub fn run_registered(
        &mut self,
        name: &str,
        context: Payload,
        step_mode: bool,
    ) -> WorkflowResult<WorkflowRun> {
        let workflow = self.registry.get(name)?.clone();
        self.run(&workflow, context, step_mode)
    }

    /// Continue a paused run after the step it paused at
    pub fn resume(&mut self, run_id: &RunId, step_mode: bool) -> WorkflowResult<WorkflowRun> {
        let paused = self
            .paused
            .remove(run_id)
            .ok_or_else(|| WorkflowError::RunNotFound(run_id.clone()))?;

        let mut run = paused.run;
        run.start();
        tracing::info!(
            run_id = %run_id,
            next_step = %paused.next_step,
            "Workflow run resumed"
        );

        Ok(self.drive(run, &paused.workflow, Some(paused.next_step), step_mode))
    }

    /// Cancel a paused run. Returns false for unknown run ids.
    pub fn cancel(&mut self, run_id: &RunId) -> bool {
        let Some(paused) = self.paused.remove(run_id) else {
            return false;
        };

        let mut run = paused.run;
        run.fail("cancelled");
        tracing::info!(run_id = %run_id, "Workflow run cancelled");
        self.registry.record_run(run);
        true
    }

    pub fn is_paused(&self, run_id: &RunId) -> bool {
        self.paused.contains_key(run_id)
    }

    pub fn paused_runs(&self) -> Vec<&WorkflowRun> {
        self.paused.values().map(|p| &p.run).collect()
    }

    /// Plan the step path without running any handler.
    ///
    /// The walk stops when it would revisit a step.
    pub fn dry_run(&self, workflow: &Workflow, context: &Payload) -> WorkflowResult<Vec<PlannedStep>> {
        workflow.validate()?;

        let mut plan = Vec::new();
        let mut visited = HashSet::new();
        let mut next = workflow.entry_step().map(str::to_string);

        while let Some(name) = next.take() {
            if !visited.insert(name.clone()) {
                break;
            }
            let step = workflow
                .step(&name)
                .ok_or_else(|| WorkflowError::StepNotFound(name.clone()))?;

            let would_execute = step.should_run(context);
            let branch = if would_execute {
                select_branch(&step.branches, context)
            } else {
                None
            };

            next = branch
                .map(|b| b.target_step.clone())
                .or_else(|| workflow.next_after(&step.name).map(|s| s.name.clone()));
            plan.push(PlannedStep {
                step_name: step.name.clone(),
                would_execute,
                has_compensation: step.compensation.is_some(),
                branch_selected: branch.map(|b| b.name.clone()),
            });
        }

        Ok(plan)
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn drive(
        &mut self,
        mut run: WorkflowRun,
        workflow: &Workflow,
        mut next: Option<String>,
        step_mode: bool,
    ) -> WorkflowRun {
        let mut visits = 0usize;

        while let Some(name) = next.take() {
            visits += 1;
            if visits > self.config.max_steps_per_run {
                run.fail(format!(
                    "step limit of {} reached at step '{}'",
                    self.config.max_steps_per_run, name
                ));
                break;
            }

            let Some(step) = workflow.step(&name) else {
                run.fail(format!("step not found: {}", name));
                break;
            };
            run.current_step = Some(step.name.clone());

            if !step.should_run(&run.context) {
                tracing::debug!(run_id = %run.id, step = %step.name, "Step skipped");
                run.record(StepResult::skipped(&step.name));
                next = workflow.next_after(&step.name).map(|s| s.name.clone());
                continue;
            }

            let advance = self.execute_step(&mut run, workflow, step);
            self.escalate(&mut run);

            match advance {
                Advance::Stop => break,
                Advance::Continue(following) => next = following,
            }

            if step_mode {
                if let Some(following) = next.take() {
                    run.pause_at(&step.name);
                    tracing::info!(
                        run_id = %run.id,
                        paused_at = %step.name,
                        next_step = %following,
                        "Workflow run paused"
                    );
                    self.paused.insert(
                        run.id.clone(),
                        PausedRun {
                            run: run.clone(),
                            workflow: workflow.clone(),
                            next_step: following,
                        },
                    );
                    return run;
                }
            }
        }

        if !run.is_terminal() {
            run.complete();
        }
        tracing::info!(
            run_id = %run.id,
            workflow = %run.workflow_name,
            status = %run.status,
            steps = run.step_results.len(),
            "Workflow run finished"
        );
        self.registry.record_run(run.clone());
        run
    }

    /// Execute one step, compensating on failure, and choose what follows
    fn execute_step(&mut self, run: &mut WorkflowRun, workflow: &Workflow, step: &Step) -> Advance {
        let mut result = self.invoke(step, &run.context);

        if !result.is_failed() {
            if let Some(output) = &result.output {
                step.apply_output(output, &mut run.context);
            }
            return self.branch_from(run, workflow, step, result);
        }

        let error = result.error.clone().unwrap_or_default();
        tracing::warn!(run_id = %run.id, step = %step.name, error = %error, "Step failed");

        if let Some(compensation) = step.compensation.as_deref() {
            run.status = RunStatus::Compensating;
            result.compensation_triggered = true;

            let compensation_result = self.invoke(compensation, &run.context);
            run.compensations_executed.push(compensation.name.clone());
            let compensated = !compensation_result.is_failed();
            if compensated {
                result.status = StepStatus::Compensated;
                if let Some(output) = &compensation_result.output {
                    compensation.apply_output(output, &mut run.context);
                }
            }
            let compensation_error = compensation_result.error.clone().unwrap_or_default();
            run.record(result);
            run.record(compensation_result);
            run.status = RunStatus::Running;

            if !compensated {
                run.fail(format!(
                    "compensation '{}' for step '{}' failed: {}",
                    compensation.name, step.name, compensation_error
                ));
                return Advance::Stop;
            }
            tracing::info!(
                run_id = %run.id,
                step = %step.name,
                compensation = %compensation.name,
                "Step compensated"
            );
            return self.branch_from_recorded(run, workflow, step);
        }

        if step.required {
            run.record(result);
            run.fail(format!("required step '{}' failed: {}", step.name, error));
            return Advance::Stop;
        }

        self.branch_from(run, workflow, step, result)
    }

    /// Record `result`, then pick the branch or sequential successor
    fn branch_from(
        &self,
        run: &mut WorkflowRun,
        workflow: &Workflow,
        step: &Step,
        result: StepResult,
    ) -> Advance {
        run.record(result);
        self.branch_from_recorded(run, workflow, step)
    }

    fn branch_from_recorded(&self, run: &mut WorkflowRun, workflow: &Workflow, step: &Step) -> Advance {
        let branch = select_branch(&step.branches, &run.context);
        if let Some(branch) = branch {
            if let Some(recorded) = run
                .step_results
                .iter_mut()
                .rev()
                .find(|r| r.step_name == step.name)
            {
                recorded.branch_taken = Some(branch.name.clone());
            }
            tracing::debug!(
                run_id = %run.id,
                step = %step.name,
                branch = %branch.name,
                target_step = %branch.target_step,
                "Branch taken"
            );
        }

        Advance::Continue(
            branch
                .map(|b| b.target_step.clone())
                .or_else(|| workflow.next_after(&step.name).map(|s| s.name.clone())),
        )
    }

    /// Invoke a step's handler. Never fails; errors land in the result.
    fn invoke(&mut self, step: &Step, context: &Payload) -> StepResult {
        let input = step.resolve_input(context);
        let timeout_ms = step.timeout_ms.or(self.config.default_step_timeout_ms);
        let started = Instant::now();

        let outcome = if let Some(handler) = self.handlers.get(&step.target, &step.mode) {
            let owned = step.clone();
            run_guarded(timeout_ms.map(Duration::from_millis), move || {
                handler.handle(&owned, &input)
            })
            .map_err(|e| e.to_string())
        } else if let Some(invoker) = self.invoker.as_mut() {
            invoker
                .invoke(step, &input, timeout_ms)
                .map_err(|e| format!("{:#}", e))
        } else {
            Ok(input)
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(output) => StepResult::completed(&step.name, output),
            Err(error) => StepResult::failed(&step.name, error),
        }
        .with_duration_ms(duration_ms)
    }

    fn escalate(&self, run: &mut WorkflowRun) {
        for escalation in self.escalation_handler.check(&run.context) {
            tracing::warn!(
                run_id = %run.id,
                trigger = ?escalation.trigger,
                escalation_target = %escalation.target,
                "Escalation raised"
            );
            run.escalate(escalation.target);
        }
    }
}

impl Default for WorkflowOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WorkflowOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowOrchestrator")
            .field("workflows", &self.registry.count())
            .field("handlers", &self.handlers)
            .field("invoker", &self.invoker.is_some())
            .field("paused", &self.paused.len())
            .finish()
    }
}
