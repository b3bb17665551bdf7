//! Workflow Orchestrator
//!
//! Runs workflows: ordered steps with optional guards, prioritized
//! branches and a single-level compensation per step. Runs can execute
//! to completion or one step at a time with pause and resume.
//!
//! # Key Principle
//!
//! **Step failures are recorded, not raised.** A run fails only when a
//! required step fails without a successful compensation, or when a
//! compensation itself fails. Everything else is captured in the run's
//! step results.
//!
//! # Architecture
//!
//! The [`WorkflowOrchestrator`] composes specialized components:
//!
//! - [`WorkflowRegistry`]: Definitions by name and bounded run history
//! - [`StepHandlerRegistry`]: `(target, mode)` step handlers
//! - [`StepInvoker`]: Host execution seam, implemented for the dispatcher
//! - [`EscalationHandler`]: Escalations derived from run context
//!
//! # Example
//!
//! ```rust
//! use workflow_engine::WorkflowOrchestrator;
//! use workflow_types::*;
//!
//! let mut orchestrator = WorkflowOrchestrator::new();
//! let workflow = Workflow::new("review")
//!     .with_step(Step::new("draft", "writer", "default"))
//!     .unwrap()
//!     .with_step(
//!         Step::new("escalate", "review", "default")
//!             .with_condition(ConditionExpr::charge_range(71, 100)),
//!     )
//!     .unwrap();
//!
//! let run = orchestrator.run(&workflow, Payload::new(), false).unwrap();
//! assert_eq!(run.status, RunStatus::Completed);
//! assert_eq!(run.executed_steps(), vec!["draft"]);
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod escalation_handler;
pub mod handler;
pub mod orchestrator;
pub mod registry;

// Re-export main types
pub use config::{EngineConfig, EscalationConfig};
pub use escalation_handler::{Escalation, EscalationHandler, EscalationTrigger};
pub use handler::{request_for_step, StepHandler, StepHandlerRegistry, StepInvoker};
pub use orchestrator::{PlannedStep, WorkflowOrchestrator};
pub use registry::{RegistryRecord, RunStats, WorkflowRegistry};
