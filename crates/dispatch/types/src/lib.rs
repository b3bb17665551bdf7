//! Routing Domain Types
//!
//! Units of work enter the routing core as parsed [`Request`]s, become
//! queued [`WorkItem`]s, and leave as [`ExecutionResult`]s.
//!
//! # Key Concepts
//!
//! - **WorkItem**: a queued unit of work. Its [`PriorityTier`] is derived once
//!   from charge and tags and never changes independently.
//! - **Request**: an immutable, already-parsed unit of work produced by an
//!   external parser.
//! - **DepthTier / DepthAction**: tiered recursion limits and the remedial
//!   action chosen when one is reached.
//! - **ExecutionResult**: the structured outcome of one dispatch. Failures are
//!   reported through its status and error list, never by unwinding.

#![deny(unsafe_code)]

mod depth;
mod errors;
mod item;
mod request;
mod result;

pub use depth::*;
pub use errors::*;
pub use item::*;
pub use request::*;
pub use result::*;

/// String-keyed structured payload exchanged with handlers
pub type Payload = serde_json::Map<String, serde_json::Value>;
