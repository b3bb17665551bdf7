use dispatch_engine::{CapabilityRegistry, DispatchConfig, DispatchQueue, Dispatcher, RequestParser};
use dispatch_types::{
    DispatchError, ExecutionStatus, Payload, PriorityTier, Request, WorkItem, TAG_EMERGENCY,
};
use serde_json::Value;
use std::sync::Once;
use std::time::Duration;

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// `target:mode:symbol` per line, blank lines ignored
struct LineParser;

impl RequestParser for LineParser {
    fn parse(&self, text: &str) -> Option<Request> {
        let mut parts = text.trim().splitn(3, ':');
        let target = parts.next().filter(|t| !t.is_empty())?;
        let mode = parts.next().unwrap_or("default");
        let symbol = parts.next().unwrap_or_default();
        Some(Request::new(target, mode).with_symbol(symbol))
    }

    fn parse_chain(&self, text: &str) -> Vec<Request> {
        text.lines().filter_map(|line| self.parse(line)).collect()
    }
}

fn echo_symbol(request: &Request, _item: &WorkItem) -> anyhow::Result<Payload> {
    let mut out = Payload::new();
    out.insert("symbol".into(), Value::from(request.symbol.clone()));
    Ok(out)
}

#[test]
fn test_text_chain_through_capability_checks() {
    init_tracing();
    let validator = CapabilityRegistry::new()
        .with_capability("index", ["default"])
        .with_capability("summarize", ["brief"]);
    let mut dispatcher = Dispatcher::new().with_validator(validator);
    dispatcher.register("index", "default", echo_symbol);
    dispatcher.register("summarize", "brief", echo_symbol);

    let results = dispatcher
        .dispatch_text_chain(
            &LineParser,
            "index:default:doc-1\nsummarize:poem:doc-1\nsummarize:brief:doc-1",
        )
        .unwrap();

    let statuses: Vec<_> = results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            ExecutionStatus::Success,
            ExecutionStatus::Failed,
            ExecutionStatus::Success
        ]
    );
    assert!(results[1].errors[0].contains("Invalid mode"));
    assert_eq!(dispatcher.execution_log().count(), 2);
}

#[test]
fn test_blank_text_is_a_parse_error() {
    init_tracing();
    let mut dispatcher = Dispatcher::new();
    assert!(matches!(
        dispatcher.dispatch_text(&LineParser, "   "),
        Err(DispatchError::Parse(_))
    ));
}

#[test]
fn test_slow_handler_times_out() {
    init_tracing();
    let mut dispatcher = Dispatcher::with_config(DispatchConfig::default().with_default_timeout_ms(30));
    dispatcher.register(
        "slow",
        "default",
        |_: &Request, _: &WorkItem| -> anyhow::Result<Payload> {
            std::thread::sleep(Duration::from_millis(400));
            Ok(Payload::new())
        },
    );

    let result = dispatcher.dispatch(&Request::new("slow", "default")).unwrap();
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(result.errors[0].contains("timed out"));

    let result = dispatcher
        .dispatch(&Request::new("slow", "default").with_timeout_ms(5_000))
        .unwrap();
    assert_eq!(result.status, ExecutionStatus::Success);
}

#[test]
fn test_panicking_handler_is_contained() {
    init_tracing();
    let mut dispatcher = Dispatcher::new();
    dispatcher.register(
        "crash",
        "default",
        |_: &Request, _: &WorkItem| -> anyhow::Result<Payload> { panic!("handler exploded") },
    );

    let result = dispatcher.dispatch(&Request::new("crash", "default")).unwrap();
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(result.errors[0].contains("handler exploded"));
    assert_eq!(dispatcher.queue().state().active_routes, 0);
}

#[test]
fn test_queue_snapshot_survives_restart() {
    init_tracing();
    let mut dispatcher = Dispatcher::new();
    for (symbol, charge) in [("low", 10), ("urgent", 40), ("mid", 60)] {
        let mut request = Request::new("store", "default")
            .with_symbol(symbol)
            .with_charge(charge);
        if symbol == "urgent" {
            request = request.with_flag(TAG_EMERGENCY);
        }
        dispatcher.enqueue_request(&request).unwrap();
    }

    let record = dispatcher.queue().to_record().unwrap();
    let text = serde_json::to_string(&record).unwrap();
    let restored = DispatchQueue::from_record(&serde_json::from_str(&text).unwrap()).unwrap();

    let tiers: Vec<_> = restored.items().iter().map(|i| i.priority()).collect();
    assert_eq!(
        tiers,
        vec![
            PriorityTier::Critical,
            PriorityTier::Standard,
            PriorityTier::Background
        ]
    );
    assert_eq!(restored.state().collisions, 2);
}

#[test]
fn test_colliding_items_merge_and_dispatch_once() {
    init_tracing();
    let mut dispatcher = Dispatcher::new();
    dispatcher.register("sink", "default", echo_symbol);

    let a = WorkItem::new("left", "sink", 55);
    let b = WorkItem::new("right", "sink", 80);
    let junction = DispatchQueue::merge_into_junction(&[a, b]).unwrap();
    dispatcher.queue_mut().enqueue(junction).unwrap();

    let results = dispatcher.drain_queue(5).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].output.as_ref().unwrap()["symbol"], "left+right");
}
