//! Escalation handler: inspects run context after each executed step
//!
//! The handler does NOT change control flow. It returns escalation
//! decisions and the orchestrator records them on the run.

use crate::config::EscalationConfig;
use serde::{Deserialize, Serialize};
use workflow_types::{is_truthy, Payload};

/// What raised an escalation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscalationTrigger {
    DepthExceeded,
    HighCharge { charge: f64 },
    Contradiction,
    FusionRequest,
}

/// A single escalation decision
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub trigger: EscalationTrigger,
    /// Who should react
    pub target: String,
}

/// Derives escalations from a run context
#[derive(Clone, Debug, Default)]
pub struct EscalationHandler {
    config: EscalationConfig,
}

impl EscalationHandler {
    pub fn new(config: EscalationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    /// Every escalation the context currently warrants, in a fixed order
    pub fn check(&self, context: &Payload) -> Vec<Escalation> {
        let config = &self.config;
        let flagged = |key: &str| context.get(key).is_some_and(is_truthy);
        let mut escalations = Vec::new();

        if flagged(config.depth_exceeded_key.as_str()) {
            escalations.push(Escalation {
                trigger: EscalationTrigger::DepthExceeded,
                target: config.recovery_target.clone(),
            });
        }

        if let Some(charge) = context.get(&config.charge_key).and_then(|v| v.as_f64()) {
            if charge >= f64::from(config.charge_threshold) {
                escalations.push(Escalation {
                    trigger: EscalationTrigger::HighCharge { charge },
                    target: config.review_target.clone(),
                });
            }
        }

        if flagged(config.contradiction_key.as_str()) {
            escalations.push(Escalation {
                trigger: EscalationTrigger::Contradiction,
                target: config.arbitration_target.clone(),
            });
        }

        if flagged(config.fusion_key.as_str()) {
            escalations.push(Escalation {
                trigger: EscalationTrigger::FusionRequest,
                target: config.fusion_target.clone(),
            });
        }

        escalations
    }
}
