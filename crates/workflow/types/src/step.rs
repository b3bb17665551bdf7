//! Steps: the units of work in a workflow

use crate::{Branch, Condition, WorkflowError, WorkflowResult};
use dispatch_types::Payload;
use std::collections::BTreeMap;

/// One unit of work, optionally guarded and followed by branches
#[derive(Clone, Debug)]
pub struct Step {
    /// Unique within the owning workflow
    pub name: String,
    /// Capability the step invokes
    pub target: String,
    /// Processing mode within the target
    pub mode: String,
    /// Guard; a false or failing condition skips the step
    pub condition: Option<Condition>,
    /// Conditional edges out of this step
    pub branches: Vec<Branch>,
    /// Fallback run once if this step fails. Never nested.
    pub compensation: Option<Box<Step>>,
    /// Handler deadline in milliseconds
    pub timeout_ms: Option<u64>,
    /// A required step that fails uncompensated fails the run
    pub required: bool,
    /// Step input key → context key
    pub input_mapping: Option<BTreeMap<String, String>>,
    /// Output key → context key
    pub output_mapping: Option<BTreeMap<String, String>>,
}

impl Step {
    /// Create a required, unconditional step
    pub fn new(name: impl Into<String>, target: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            mode: mode.into(),
            condition: None,
            branches: Vec::new(),
            compensation: None,
            timeout_ms: None,
            required: true,
            input_mapping: None,
            output_mapping: None,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<Condition>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_branch(mut self, branch: Branch) -> Self {
        self.branches.push(branch);
        self
    }

    pub fn with_compensation(mut self, compensation: Step) -> Self {
        self.compensation = Some(Box::new(compensation));
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Failure of this step never fails the run
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_input_mapping<I, K, V>(mut self, mapping: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.input_mapping = Some(
            mapping
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn with_output_mapping<I, K, V>(mut self, mapping: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.output_mapping = Some(
            mapping
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Whether the step should run. No condition means always.
    pub fn should_run(&self, context: &Payload) -> bool {
        self.condition
            .as_ref()
            .map_or(true, |condition| condition.evaluate(context))
    }

    /// Build the step input from the run context.
    ///
    /// Without an input mapping the whole context is passed through.
    /// Mapped keys missing from the context are left out.
    pub fn resolve_input(&self, context: &Payload) -> Payload {
        match &self.input_mapping {
            None => context.clone(),
            Some(mapping) => mapping
                .iter()
                .filter_map(|(input_key, context_key)| {
                    context
                        .get(context_key)
                        .map(|value| (input_key.clone(), value.clone()))
                })
                .collect(),
        }
    }

    /// Merge step output into the run context.
    ///
    /// Without an output mapping every output key is merged as is.
    pub fn apply_output(&self, output: &Payload, context: &mut Payload) {
        match &self.output_mapping {
            None => {
                for (key, value) in output {
                    context.insert(key.clone(), value.clone());
                }
            }
            Some(mapping) => {
                for (output_key, context_key) in mapping {
                    if let Some(value) = output.get(output_key) {
                        context.insert(context_key.clone(), value.clone());
                    }
                }
            }
        }
    }

    /// Check required fields and the single-level compensation rule
    pub fn validate(&self) -> WorkflowResult<()> {
        validate_fields(self)?;
        if let Some(compensation) = &self.compensation {
            validate_fields(compensation)?;
            if compensation.compensation.is_some() {
                return Err(WorkflowError::InvalidStep {
                    step: self.name.clone(),
                    reason: "compensation steps cannot carry their own compensation".into(),
                });
            }
        }
        Ok(())
    }
}

fn validate_fields(step: &Step) -> WorkflowResult<()> {
    let missing = [
        ("name", &step.name),
        ("target", &step.target),
        ("mode", &step.mode),
    ]
    .into_iter()
    .find(|(_, value)| value.trim().is_empty());

    match missing {
        Some((field, _)) => Err(WorkflowError::InvalidStep {
            step: step.name.clone(),
            reason: format!("{} must not be empty", field),
        }),
        None => Ok(()),
    }
}
