//! Step handlers and the host invoker seam
//!
//! A step is resolved in order: a handler registered for its
//! `(target, mode)`, then the host [`StepInvoker`], then a no-op echo of
//! the step input.

use dispatch_engine::{Dispatcher, HandlerKey};
use dispatch_types::{ExecutionStatus, Request};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use workflow_types::{Payload, Step, CTX_CHARGE, CTX_TAGS};

/// Executes a step registered for a `(target, mode)`
pub trait StepHandler: Send + Sync {
    fn handle(&self, step: &Step, input: &Payload) -> anyhow::Result<Payload>;
}

impl<F> StepHandler for F
where
    F: Fn(&Step, &Payload) -> anyhow::Result<Payload> + Send + Sync,
{
    fn handle(&self, step: &Step, input: &Payload) -> anyhow::Result<Payload> {
        self(step, input)
    }
}

/// Host-provided execution for steps with no registered handler.
///
/// The invoker is responsible for honoring `timeout_ms`.
pub trait StepInvoker: Send {
    fn invoke(
        &mut self,
        step: &Step,
        input: &Payload,
        timeout_ms: Option<u64>,
    ) -> anyhow::Result<Payload>;
}

/// Routes steps through the dispatcher as requests.
///
/// The step name becomes the request symbol. `charge` and `tags` in the
/// step input become the request charge and flags. Any status other than
/// success is reported as an error.
impl StepInvoker for Dispatcher {
    fn invoke(
        &mut self,
        step: &Step,
        input: &Payload,
        timeout_ms: Option<u64>,
    ) -> anyhow::Result<Payload> {
        let request = request_for_step(step, input, timeout_ms);
        let result = self.dispatch(&request)?;

        match result.status {
            ExecutionStatus::Success => Ok(result.output.unwrap_or_default()),
            status => Err(anyhow::anyhow!(
                "dispatch to '{}' ended {:?}: {}",
                step.target,
                status,
                result.errors.join("; ")
            )),
        }
    }
}

/// Build the dispatch request that carries out a step
pub fn request_for_step(step: &Step, input: &Payload, timeout_ms: Option<u64>) -> Request {
    let charge = input
        .get(CTX_CHARGE)
        .and_then(Value::as_u64)
        .map(|c| c.min(u64::from(u8::MAX)) as u8)
        .unwrap_or(0);
    let flags = input
        .get(CTX_TAGS)
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let mut request = Request::new(step.target.clone(), step.mode.clone())
        .with_symbol(step.name.clone())
        .with_charge(charge)
        .with_flags(flags);
    if let Some(timeout_ms) = timeout_ms {
        request = request.with_timeout_ms(timeout_ms);
    }
    request
}

/// Step handlers keyed by `(target, mode)`
#[derive(Clone, Default)]
pub struct StepHandlerRegistry {
    handlers: HashMap<HandlerKey, Arc<dyn StepHandler>>,
}

impl StepHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, target: impl Into<String>, mode: impl Into<String>, handler: H)
    where
        H: StepHandler + 'static,
    {
        let key = HandlerKey::new(target, mode);
        tracing::info!(key = %key, "Step handler registered");
        self.handlers.insert(key, Arc::new(handler));
    }

    pub fn unregister(&mut self, target: &str, mode: &str) -> bool {
        self.handlers
            .remove(&HandlerKey::new(target, mode))
            .is_some()
    }

    pub fn get(&self, target: &str, mode: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(&HandlerKey::new(target, mode)).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for StepHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.handlers.keys().map(ToString::to_string).collect();
        keys.sort();
        f.debug_struct("StepHandlerRegistry")
            .field("keys", &keys)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_for_step() {
        let step = Step::new("classify", "nlp", "labels");
        let input = json!({ "charge": 300, "tags": ["loop", 7, "x"] })
            .as_object()
            .cloned()
            .unwrap_or_default();

        let request = request_for_step(&step, &input, Some(250));
        assert_eq!(request.target, "nlp");
        assert_eq!(request.mode, "labels");
        assert_eq!(request.symbol, "classify");
        assert_eq!(request.charge, 100);
        assert!(request.has_flag("loop") && request.has_flag("x"));
        assert_eq!(request.timeout_ms, Some(250));
    }

    #[test]
    fn test_dispatcher_as_invoker() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(
            "nlp",
            "labels",
            |request: &Request, _: &dispatch_types::WorkItem| -> anyhow::Result<Payload> {
                let mut out = Payload::new();
                out.insert("label".into(), Value::from(request.symbol.clone()));
                Ok(out)
            },
        );

        let step = Step::new("classify", "nlp", "labels");
        let output = dispatcher.invoke(&step, &Payload::new(), None).unwrap();
        assert_eq!(output["label"], "classify");
    }

    #[test]
    fn test_dispatcher_invoker_reports_failures() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(
            "nlp",
            "labels",
            |_: &Request, _: &dispatch_types::WorkItem| -> anyhow::Result<Payload> {
                anyhow::bail!("model offline")
            },
        );

        let step = Step::new("classify", "nlp", "labels");
        let err = dispatcher.invoke(&step, &Payload::new(), None).unwrap_err();
        assert!(err.to_string().contains("model offline"));
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = StepHandlerRegistry::new();
        registry.register(
            "t",
            "m",
            |_: &Step, input: &Payload| -> anyhow::Result<Payload> { Ok(input.clone()) },
        );
        assert!(registry.get("t", "m").is_some());
        assert!(registry.get("t", "other").is_none());
        assert!(registry.unregister("t", "m"));
        assert!(registry.is_empty());
    }
}
