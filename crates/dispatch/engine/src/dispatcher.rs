//! Dispatcher: validates, queues, depth-checks and executes requests
//!
//! A live dispatch follows one path:
//!
//! 1. Validate the request. Failure aborts before any work item exists.
//! 2. Convert it to a work item, enqueue it, then claim it back.
//! 3. Depth-check the item. Anything but Continue short-circuits into an
//!    escalated, incomplete or panic result and no handler runs.
//! 4. Increment depth and run the `(target, mode)` handler under the
//!    watchdog. Handler errors, panics and timeouts become `failed` results.
//! 5. Complete the route, stamp the duration, append to the execution log.

use crate::config::DispatchConfig;
use crate::depth_guard::DepthGuard;
use crate::handler::{Handler, HandlerRegistry};
use crate::queue::{DispatchQueue, Enqueued};
use crate::validator::{AllowAll, RequestParser, RequestValidator};
use crate::watchdog::{run_guarded, InvocationError};
use chrono::{DateTime, Utc};
use dispatch_types::{
    DepthAction, DepthCheck, DispatchError, DispatchResult, ExecutionResult, ExecutionStatus,
    Request, SideEffect, WorkItem,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// One retained dispatch outcome
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub recorded_at: DateTime<Utc>,
    pub result: ExecutionResult,
}

/// Routes requests to registered handlers
pub struct Dispatcher {
    config: DispatchConfig,
    queue: DispatchQueue,
    guard: DepthGuard,
    handlers: HandlerRegistry,
    validator: Box<dyn RequestValidator>,
    execution_log: VecDeque<ExecutionLogEntry>,
}

impl Dispatcher {
    /// Create a dispatcher with default configuration that accepts every request
    pub fn new() -> Self {
        Self::with_config(DispatchConfig::default())
    }

    pub fn with_config(config: DispatchConfig) -> Self {
        Self {
            queue: DispatchQueue::with_config(&config.queue),
            guard: DepthGuard::with_config(config.depth.clone()),
            handlers: HandlerRegistry::new(),
            validator: Box::new(AllowAll),
            execution_log: VecDeque::new(),
            config,
        }
    }

    pub fn with_validator<V>(mut self, validator: V) -> Self
    where
        V: RequestValidator + 'static,
    {
        self.validator = Box::new(validator);
        self
    }

    // ── Handlers ─────────────────────────────────────────────────────

    pub fn register<H>(&mut self, target: impl Into<String>, mode: impl Into<String>, handler: H)
    where
        H: Handler + 'static,
    {
        self.handlers.register(target, mode, handler);
    }

    pub fn unregister(&mut self, target: &str, mode: &str) -> bool {
        self.handlers.unregister(target, mode)
    }

    pub fn has_handler(&self, target: &str, mode: &str) -> bool {
        self.handlers.contains(target, mode)
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    /// Dispatch a single request.
    ///
    /// Only validation and queue failures surface as errors. Depth limits
    /// and handler failures are reported through the result's status.
    pub fn dispatch(&mut self, request: &Request) -> DispatchResult<ExecutionResult> {
        self.validate(request)?;

        let item = WorkItem::from_request(request);
        let enqueued = match self.queue.enqueue(item) {
            Ok(enqueued) => enqueued,
            Err(e) => {
                self.record(rejected(request, &e.to_string()));
                return Err(e.into());
            }
        };
        if let Some(evicted) = &enqueued.evicted {
            self.record_eviction(evicted);
        }
        let item = self.queue.claim(&enqueued.item_id)?;

        Ok(self.execute(request.clone(), item))
    }

    /// Validate and queue a request for a later [`drain_queue`](Self::drain_queue)
    pub fn enqueue_request(&mut self, request: &Request) -> DispatchResult<Enqueued> {
        self.validate(request)?;
        let enqueued = self.queue.enqueue(WorkItem::from_request(request))?;
        if let Some(evicted) = &enqueued.evicted {
            self.record_eviction(evicted);
        }
        Ok(enqueued)
    }

    /// Dispatch requests in order, isolating failures per request
    pub fn dispatch_chain(&mut self, requests: &[Request]) -> Vec<ExecutionResult> {
        requests
            .iter()
            .map(|request| {
                let rebuilt = Request::from_item(&WorkItem::from_request(request));
                self.dispatch(&rebuilt)
                    .unwrap_or_else(|e| rejected(request, &e.to_string()))
            })
            .collect()
    }

    /// Like [`dispatch_chain`](Self::dispatch_chain), but refuses cyclic chains
    pub fn dispatch_chain_checked(
        &mut self,
        requests: &[Request],
    ) -> DispatchResult<Vec<ExecutionResult>> {
        let items: Vec<WorkItem> = requests.iter().map(WorkItem::from_request).collect();
        self.queue.check_cycle(&items)?;
        Ok(self.dispatch_chain(requests))
    }

    /// Pop up to `max_items` queued items and execute each one
    pub fn drain_queue(&mut self, max_items: usize) -> DispatchResult<Vec<ExecutionResult>> {
        let mut results = Vec::new();
        while results.len() < max_items {
            let Some(item) = self.queue.dequeue()? else {
                break;
            };
            let request = Request::from_item(&item);
            results.push(self.execute(request, item));
        }
        tracing::debug!(executed = results.len(), remaining = self.queue.len(), "Queue drained");
        Ok(results)
    }

    /// Parse and dispatch one request. An empty parse is an error.
    pub fn dispatch_text(
        &mut self,
        parser: &dyn RequestParser,
        text: &str,
    ) -> DispatchResult<ExecutionResult> {
        let request = parser
            .parse(text)
            .ok_or_else(|| DispatchError::Parse(format!("no request in '{}'", text)))?;
        self.dispatch(&request)
    }

    /// Parse and dispatch a chain. An empty parse is an error.
    pub fn dispatch_text_chain(
        &mut self,
        parser: &dyn RequestParser,
        text: &str,
    ) -> DispatchResult<Vec<ExecutionResult>> {
        let requests = parser.parse_chain(text);
        if requests.is_empty() {
            return Err(DispatchError::Parse(format!("no requests in '{}'", text)));
        }
        Ok(self.dispatch_chain(&requests))
    }

    // ── Query ────────────────────────────────────────────────────────

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn queue(&self) -> &DispatchQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut DispatchQueue {
        &mut self.queue
    }

    pub fn guard(&self) -> &DepthGuard {
        &self.guard
    }

    /// Retained outcomes, oldest first
    pub fn execution_log(&self) -> impl Iterator<Item = &ExecutionLogEntry> {
        self.execution_log.iter()
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn validate(&self, request: &Request) -> DispatchResult<()> {
        self.validator.validate(request).map_err(|e| {
            tracing::warn!(request_id = %request.id, error = %e, "Request rejected by validator");
            DispatchError::from(e)
        })
    }

    fn execute(&mut self, request: Request, mut item: WorkItem) -> ExecutionResult {
        let started = Instant::now();
        let check = self.guard.check(&item);

        let result = match check.action.execution_status() {
            Some(status) => short_circuit(&request, &check, status),
            None => {
                self.guard.increment(&mut item);
                self.invoke(&request, &item)
            }
        };

        self.queue.complete_route(&item);
        let result = result.with_duration_ms(started.elapsed().as_millis() as u64);
        tracing::info!(
            request_id = %result.request_id,
            target_name = %result.target,
            status = ?result.status,
            duration_ms = result.duration_ms,
            "Dispatch completed"
        );
        self.record(result.clone());
        result
    }

    fn invoke(&self, request: &Request, item: &WorkItem) -> ExecutionResult {
        let handler = self.handlers.resolve(&request.target, &request.mode);
        let timeout = request
            .timeout_ms
            .or(self.config.default_timeout_ms)
            .map(Duration::from_millis);

        let task_request = request.clone();
        let task_item = item.clone();
        let outcome = run_guarded(timeout, move || handler.handle(&task_request, &task_item));

        match outcome {
            Ok(output) => ExecutionResult::new(
                request.id.clone(),
                request.target.clone(),
                ExecutionStatus::Success,
            )
            .with_output(output, request.expected_output_kind.clone()),
            Err(error) => {
                tracing::warn!(
                    request_id = %request.id,
                    target_name = %request.target,
                    mode = %request.mode,
                    error = %error,
                    "Handler failed"
                );
                let message = match &error {
                    InvocationError::Failed(e) => format!("{:#}", e),
                    other => other.to_string(),
                };
                ExecutionResult::new(
                    request.id.clone(),
                    request.target.clone(),
                    ExecutionStatus::Failed,
                )
                .with_error(message)
            }
        }
    }

    /// Log a failed result for a queued request pushed out by a newer one
    fn record_eviction(&mut self, evicted: &WorkItem) {
        let request = Request::from_item(evicted);
        tracing::warn!(
            request_id = %request.id,
            item_id = %evicted.id,
            target_name = %request.target,
            "Queued request evicted"
        );
        self.record(rejected(&request, EVICTED_ERROR));
    }

    fn record(&mut self, result: ExecutionResult) {
        if self.config.execution_log_capacity == 0 {
            return;
        }
        while self.execution_log.len() >= self.config.execution_log_capacity {
            self.execution_log.pop_front();
        }
        self.execution_log.push_back(ExecutionLogEntry {
            recorded_at: Utc::now(),
            result,
        });
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("queue", &self.queue.state())
            .field("handlers", &self.handlers)
            .field("execution_log", &self.execution_log.len())
            .finish()
    }
}

const EVICTED_ERROR: &str = "evicted from full queue";

/// Result for a request that never reached execution
fn rejected(request: &Request, error: &str) -> ExecutionResult {
    ExecutionResult::new(
        request.id.clone(),
        request.target.clone(),
        ExecutionStatus::Failed,
    )
    .with_error(error)
}

/// Result for a depth check that did not allow execution
fn short_circuit(request: &Request, check: &DepthCheck, status: ExecutionStatus) -> ExecutionResult {
    let effect = |kind: &str, target: &str| {
        SideEffect::new(kind, target)
            .with_detail("action", check.action.name())
            .with_detail("depth", check.depth.to_string())
            .with_detail("limit", check.limit.to_string())
            .with_detail("tier", check.tier.name())
    };

    let effects = match check.action {
        DepthAction::EscalateToReview => vec![effect("escalation", "review")],
        DepthAction::ForceTerminateIncomplete => vec![effect("termination", "caller")],
        DepthAction::ForceTerminateAlert => {
            vec![effect("alert", "operator"), effect("termination", "caller")]
        }
        DepthAction::PanicStop => vec![effect("panic_stop", "host")],
        DepthAction::Continue => Vec::new(),
    };

    effects.into_iter().fold(
        ExecutionResult::new(request.id.clone(), request.target.clone(), status).with_error(
            format!(
                "depth {} reached {} limit {}: {}",
                check.depth, check.tier, check.limit, check.action
            ),
        ),
        ExecutionResult::with_side_effect,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::CapabilityRegistry;
    use dispatch_types::{Payload, ValidationError, TAG_EMERGENCY, TAG_EXTENDED_LOOP};
    use serde_json::Value;

    fn upper(request: &Request, _item: &WorkItem) -> anyhow::Result<Payload> {
        let mut out = Payload::new();
        out.insert("text".into(), Value::from(request.symbol.to_uppercase()));
        Ok(out)
    }

    #[test]
    fn test_dispatch_runs_handler() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register("shout", "default", upper);

        let request = Request::new("shout", "default")
            .with_symbol("hello")
            .with_expected_output("text");
        let result = dispatcher.dispatch(&request).unwrap();

        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.output.as_ref().unwrap()["text"], "HELLO");
        assert_eq!(result.output_kind, "text");
        assert!(dispatcher.queue().is_empty());
        assert_eq!(dispatcher.queue().state().active_routes, 0);
        assert_eq!(dispatcher.execution_log().count(), 1);
    }

    #[test]
    fn test_missing_handler_echoes() {
        let mut dispatcher = Dispatcher::new();
        let result = dispatcher
            .dispatch(&Request::new("nowhere", "default"))
            .unwrap();
        assert!(result.is_success());
        assert_eq!(
            result.output.unwrap()["note"],
            crate::handler::NO_HANDLER_NOTE
        );
    }

    #[test]
    fn test_handler_error_becomes_failed_result() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(
            "flaky",
            "default",
            |_: &Request, _: &WorkItem| -> anyhow::Result<Payload> {
                anyhow::bail!("upstream unavailable")
            },
        );

        let result = dispatcher.dispatch(&Request::new("flaky", "default")).unwrap();
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.errors, vec!["upstream unavailable".to_string()]);
    }

    #[test]
    fn test_validation_aborts_before_enqueue() {
        let mut dispatcher = Dispatcher::new()
            .with_validator(CapabilityRegistry::new().with_capability("known", ["default"]));

        let err = dispatcher
            .dispatch(&Request::new("unknown", "default"))
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Validation(ValidationError::UnknownTarget(_))
        ));
        assert_eq!(dispatcher.queue().state().total_enqueued, 0);
        assert_eq!(dispatcher.execution_log().count(), 0);
    }

    #[test]
    fn test_depth_short_circuits_skip_handler() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(
            "t",
            "default",
            |_: &Request, _: &WorkItem| -> anyhow::Result<Payload> {
                anyhow::bail!("handler must not run")
            },
        );

        let cases = [
            (Request::new("t", "default").with_depth(7), ExecutionStatus::Escalated, "escalation"),
            (
                Request::new("t", "default").with_depth(12).with_flag(TAG_EXTENDED_LOOP),
                ExecutionStatus::Incomplete,
                "termination",
            ),
            (
                Request::new("t", "default").with_depth(21).with_flag(TAG_EMERGENCY),
                ExecutionStatus::Incomplete,
                "alert",
            ),
            (Request::new("t", "default").with_depth(40), ExecutionStatus::Panic, "panic_stop"),
        ];

        for (request, status, effect) in cases {
            let result = dispatcher.dispatch(&request).unwrap();
            assert_eq!(result.status, status);
            assert_eq!(result.side_effects[0].kind, effect);
            assert!(result.output.is_none());
        }
        assert_eq!(dispatcher.guard().exhaustion_count(), 4);
    }

    #[test]
    fn test_escalation_targets_review() {
        let mut dispatcher = Dispatcher::new();
        let result = dispatcher
            .dispatch(&Request::new("t", "default").with_depth(7))
            .unwrap();
        let effect = &result.side_effects[0];
        assert_eq!(effect.target, "review");
        assert_eq!(effect.details["depth"], "7");
    }

    #[test]
    fn test_handler_sees_incremented_depth() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(
            "probe",
            "default",
            |_: &Request, item: &WorkItem| -> anyhow::Result<Payload> {
                let mut out = Payload::new();
                out.insert("depth".into(), Value::from(item.depth));
                Ok(out)
            },
        );

        let result = dispatcher
            .dispatch(&Request::new("probe", "default").with_depth(2))
            .unwrap();
        assert_eq!(result.output.unwrap()["depth"], 3);
        assert_eq!(dispatcher.guard().max_depth_observed(), 3);
    }

    #[test]
    fn test_chain_isolates_failures() {
        let mut dispatcher = Dispatcher::new()
            .with_validator(CapabilityRegistry::new().with_capability("ok", ["default"]));
        dispatcher.register("ok", "default", upper);

        let results = dispatcher.dispatch_chain(&[
            Request::new("ok", "default").with_symbol("a"),
            Request::new("bad", "default"),
            Request::new("ok", "default").with_symbol("c"),
        ]);
        let statuses: Vec<_> = results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                ExecutionStatus::Success,
                ExecutionStatus::Failed,
                ExecutionStatus::Success
            ]
        );
        assert_eq!(results[2].output.as_ref().unwrap()["text"], "C");
    }

    #[test]
    fn test_checked_chain_refuses_cycles() {
        let mut dispatcher = Dispatcher::new();
        let chain = [
            Request::new("B", "default").with_symbol("A"),
            Request::new("C", "default").with_symbol("B"),
            Request::new("A", "default").with_symbol("C"),
        ];
        assert!(matches!(
            dispatcher.dispatch_chain_checked(&chain),
            Err(DispatchError::Queue(dispatch_types::QueueError::DeadlockDetected(_)))
        ));
        assert_eq!(dispatcher.execution_log().count(), 0);
    }

    #[test]
    fn test_drain_queue_rebuilds_requests() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register("shout", "loud", upper);
        dispatcher
            .enqueue_request(&Request::new("shout", "loud").with_symbol("low").with_charge(20))
            .unwrap();
        dispatcher
            .enqueue_request(&Request::new("shout", "loud").with_symbol("high").with_charge(90))
            .unwrap();

        let results = dispatcher.drain_queue(1).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].output.as_ref().unwrap()["text"], "HIGH");

        let results = dispatcher.drain_queue(10).unwrap();
        assert_eq!(results.len(), 1);
        assert!(dispatcher.queue().is_empty());
    }

    #[test]
    fn test_parse_failures() {
        struct Never;
        impl RequestParser for Never {
            fn parse(&self, _text: &str) -> Option<Request> {
                None
            }
        }

        let mut dispatcher = Dispatcher::new();
        assert!(matches!(
            dispatcher.dispatch_text(&Never, "???"),
            Err(DispatchError::Parse(_))
        ));
        assert!(matches!(
            dispatcher.dispatch_text_chain(&Never, "???"),
            Err(DispatchError::Parse(_))
        ));
    }

    #[test]
    fn test_execution_log_is_bounded() {
        let config = DispatchConfig {
            execution_log_capacity: 2,
            ..DispatchConfig::default()
        };
        let mut dispatcher = Dispatcher::with_config(config);
        for _ in 0..5 {
            dispatcher.dispatch(&Request::new("t", "default")).unwrap();
        }
        assert_eq!(dispatcher.execution_log().count(), 2);
    }

    #[test]
    fn test_full_queue_is_reported_and_logged() {
        let mut dispatcher = Dispatcher::with_config(DispatchConfig::default().with_capacity(1));
        dispatcher
            .enqueue_request(&Request::new("t", "default").with_charge(90))
            .unwrap();

        let err = dispatcher
            .dispatch(&Request::new("t", "default").with_charge(10))
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Queue(dispatch_types::QueueError::BackgroundRejected { .. })
        ));
        let logged: Vec<_> = dispatcher.execution_log().collect();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].result.status, ExecutionStatus::Failed);
    }

    #[test]
    fn test_live_dispatch_eviction_is_logged() {
        let mut dispatcher = Dispatcher::with_config(DispatchConfig::default().with_capacity(1));
        let queued = Request::new("queued", "default").with_charge(60);
        dispatcher.enqueue_request(&queued).unwrap();

        let result = dispatcher
            .dispatch(&Request::new("live", "default").with_charge(90))
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Success);
        assert!(dispatcher.queue().is_empty());
        assert_eq!(dispatcher.queue().state().evictions, 1);

        let logged: Vec<_> = dispatcher.execution_log().map(|e| &e.result).collect();
        assert_eq!(logged.len(), 2);
        assert_eq!(logged[0].request_id, queued.id);
        assert_eq!(logged[0].target, "queued");
        assert_eq!(logged[0].status, ExecutionStatus::Failed);
        assert_eq!(logged[0].errors, vec![EVICTED_ERROR.to_string()]);
        assert_eq!(logged[1].target, "live");
    }
}
