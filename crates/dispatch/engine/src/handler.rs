//! Handler registry keyed by `(target, mode)`
//!
//! Absence of a handler is never an error: lookups fall back to
//! [`EchoHandler`], which reflects the request back to the caller.

use dispatch_types::{Payload, Request, WorkItem};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Note attached by the fallback handler
pub const NO_HANDLER_NOTE: &str = "no handler registered";

/// A unit of work bound to a `(target, mode)` pair.
///
/// Handlers may fail; errors are converted into `failed` results by the
/// caller and never propagated further.
pub trait Handler: Send + Sync {
    fn handle(&self, request: &Request, item: &WorkItem) -> anyhow::Result<Payload>;
}

impl<F> Handler for F
where
    F: Fn(&Request, &WorkItem) -> anyhow::Result<Payload> + Send + Sync,
{
    fn handle(&self, request: &Request, item: &WorkItem) -> anyhow::Result<Payload> {
        self(request, item)
    }
}

/// Registry key
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerKey {
    pub target: String,
    pub mode: String,
}

impl HandlerKey {
    pub fn new(target: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            mode: mode.into(),
        }
    }
}

impl std::fmt::Display for HandlerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.target, self.mode)
    }
}

/// Echoes the request's fields with a "no handler registered" note
#[derive(Clone, Copy, Debug, Default)]
pub struct EchoHandler;

impl Handler for EchoHandler {
    fn handle(&self, request: &Request, _item: &WorkItem) -> anyhow::Result<Payload> {
        let mut output = Payload::new();
        output.insert("target".into(), Value::from(request.target.clone()));
        output.insert("mode".into(), Value::from(request.mode.clone()));
        output.insert("symbol".into(), Value::from(request.symbol.clone()));
        output.insert(
            "depth_level".into(),
            Value::from(request.depth_level.to_string()),
        );
        output.insert(
            "flags".into(),
            Value::from(request.flags.iter().cloned().collect::<Vec<_>>()),
        );
        output.insert("charge".into(), Value::from(request.charge));
        output.insert("note".into(), Value::from(NO_HANDLER_NOTE));
        Ok(output)
    }
}

/// Typed `(target, mode)` → handler map
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<HandlerKey, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same key
    pub fn register<H>(&mut self, target: impl Into<String>, mode: impl Into<String>, handler: H)
    where
        H: Handler + 'static,
    {
        let key = HandlerKey::new(target, mode);
        tracing::info!(key = %key, "Handler registered");
        self.handlers.insert(key, Arc::new(handler));
    }

    pub fn unregister(&mut self, target: &str, mode: &str) -> bool {
        self.handlers
            .remove(&HandlerKey::new(target, mode))
            .is_some()
    }

    pub fn contains(&self, target: &str, mode: &str) -> bool {
        self.handlers.contains_key(&HandlerKey::new(target, mode))
    }

    /// The registered handler, if any
    pub fn get(&self, target: &str, mode: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&HandlerKey::new(target, mode)).cloned()
    }

    /// The registered handler, or the echo fallback
    pub fn resolve(&self, target: &str, mode: &str) -> Arc<dyn Handler> {
        self.get(target, mode)
            .unwrap_or_else(|| Arc::new(EchoHandler))
    }

    pub fn keys(&self) -> Vec<&HandlerKey> {
        let mut keys: Vec<_> = self.handlers.keys().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}
