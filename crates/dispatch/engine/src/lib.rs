//! Routing Core
//!
//! Accepts parsed requests, orders them by a derived priority, guards
//! recursion depth with tiered limits, and routes each one to a handler
//! registered for its `(target, mode)`.
//!
//! # Key Principle
//!
//! **Failures are results, not unwinding.** Depth limits and handler
//! errors surface as [`ExecutionResult`](dispatch_types::ExecutionResult)
//! statuses. Only validation, parsing and queue pressure reach the caller
//! as errors.
//!
//! # Architecture
//!
//! The [`Dispatcher`] composes specialized components:
//!
//! - [`DispatchQueue`]: Priority queue with collision and cycle detection
//! - [`DepthGuard`]: Tiered depth limits and the exhaustion log
//! - [`HandlerRegistry`]: `(target, mode)` handlers with an echo fallback
//! - [`RequestValidator`]: Capability checks before anything is queued
//!
//! # Example
//!
//! ```rust
//! use dispatch_engine::Dispatcher;
//! use dispatch_types::{ExecutionStatus, Payload, Request, WorkItem};
//!
//! let mut dispatcher = Dispatcher::new();
//! dispatcher.register(
//!     "greet",
//!     "default",
//!     |request: &Request, _item: &WorkItem| -> anyhow::Result<Payload> {
//!         let mut out = Payload::new();
//!         out.insert("greeting".into(), format!("hello {}", request.symbol).into());
//!         Ok(out)
//!     },
//! );
//!
//! let result = dispatcher
//!     .dispatch(&Request::new("greet", "default").with_symbol("world"))
//!     .unwrap();
//! assert_eq!(result.status, ExecutionStatus::Success);
//! assert_eq!(result.output.unwrap()["greeting"], "hello world");
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod depth_guard;
pub mod dispatcher;
pub mod handler;
pub mod queue;
pub mod validator;
pub mod watchdog;

// Re-export main types
pub use config::{DepthConfig, DispatchConfig, QueueConfig};
pub use depth_guard::DepthGuard;
pub use dispatcher::{Dispatcher, ExecutionLogEntry};
pub use handler::{EchoHandler, Handler, HandlerKey, HandlerRegistry};
pub use queue::{DispatchQueue, Enqueued, QueueRecord, QueueState};
pub use validator::{AllowAll, CapabilityRegistry, RequestParser, RequestValidator};
pub use watchdog::{run_guarded, InvocationError};
