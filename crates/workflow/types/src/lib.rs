//! Workflow Domain Types
//!
//! A [`Workflow`] is an ordered arena of [`Step`]s. Each step may be
//! guarded by a [`Condition`], carry a single-level compensation, and
//! leave through prioritized [`Branch`]es to other steps by name.
//!
//! # Key Concepts
//!
//! - **Step**: one unit of work routed to a `(target, mode)` handler.
//! - **Branch**: a conditional edge, chosen by descending priority among
//!   matching candidates; ties keep declaration order.
//! - **Condition**: a serializable [`ConditionExpr`] or an injected
//!   [`ContextPredicate`]. Predicates do not persist.
//! - **WorkflowRun**: one execution, owning its context and step results.

#![deny(unsafe_code)]

mod condition;
mod definition;
mod edge;
mod errors;
mod instance;
mod step;

pub use condition::*;
pub use definition::*;
pub use edge::*;
pub use errors::*;
pub use instance::*;
pub use step::*;

pub use dispatch_types::Payload;
