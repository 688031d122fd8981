//! Trigger dispatcher tests: webhook authentication, schedule catch-up and
//! event delivery, against an in-memory store.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use flowrun::core::context::{FakeTimeProvider, RuntimeContext};
use flowrun::core::engine::{EngineConfig, ExecutionEngine};
use flowrun::core::variables::VariableStore;
use flowrun::effects::{EffectContext, EffectExecutor, EffectRegistry};
use flowrun::error::NodeError;
use flowrun::model::{
    ActionKind, ExecutionStatus, Flow, FlowConnection, FlowExecution, FlowNode, FlowTrigger,
    HttpMethod, NodeConfig, Position, TriggerConfig, TriggerType,
};
use flowrun::stats::flow_stats;
use flowrun::store::{FlowStore, MemoryStore};
use flowrun::trigger::{webhook, EventBus, TriggerDispatcher};
use flowrun::FlowError;

struct OkEffect;

#[async_trait]
impl EffectExecutor for OkEffect {
    async fn execute(
        &self,
        _config: &Value,
        input: &Value,
        _ctx: &EffectContext,
    ) -> Result<Value, NodeError> {
        Ok(input.clone())
    }
}

struct Harness {
    dispatcher: TriggerDispatcher,
    store: Arc<MemoryStore>,
}

fn harness(ctx: RuntimeContext) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let ctx = Arc::new(ctx);
    let mut effects = EffectRegistry::new();
    effects.register(ActionKind::SendMessage, Box::new(OkEffect));
    let engine = ExecutionEngine::new(
        store.clone(),
        Arc::new(effects),
        Arc::new(VariableStore::new()),
        ctx.clone(),
        EngineConfig::default(),
    );
    let dispatcher = TriggerDispatcher::new(store.clone(), engine, ctx);
    Harness { dispatcher, store }
}

async fn seed_flow(store: &MemoryStore, active: bool) -> Uuid {
    let mut flow = Flow::new(Uuid::new_v4(), "dispatch-target", Utc::now());
    flow.is_active = active;
    flow.nodes = vec![
        FlowNode {
            id: "t".into(),
            config: NodeConfig::Trigger {
                trigger_type: TriggerType::Webhook,
            },
            position: Position::default(),
        },
        FlowNode {
            id: "a".into(),
            config: NodeConfig::Action {
                action: ActionKind::SendMessage,
                params: json!({"text": "hi"}),
            },
            position: Position::default(),
        },
    ];
    flow.connections = vec![FlowConnection {
        id: "c1".into(),
        source: "t".into(),
        source_handle: None,
        target: "a".into(),
        target_handle: None,
    }];
    let id = flow.id;
    store.create_flow(flow).await.unwrap();
    id
}

async fn seed_webhook_trigger(
    store: &MemoryStore,
    flow_id: Uuid,
    path: &str,
    secret: Option<&str>,
) -> FlowTrigger {
    let trigger = FlowTrigger::new(
        flow_id,
        TriggerConfig::Webhook {
            method: HttpMethod::Post,
            path: path.into(),
            webhook_secret: secret.map(String::from),
        },
    );
    store.create_trigger(trigger.clone()).await.unwrap();
    trigger
}

/// Dispatch is fire-and-forget; tests poll the store for the outcome.
async fn wait_terminal(store: &MemoryStore, execution_id: Uuid) -> FlowExecution {
    for _ in 0..200 {
        if let Some(execution) = store.get_execution(execution_id).await.unwrap() {
            if execution.status.is_terminal() {
                return execution;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("execution {execution_id} never reached a terminal status");
}

// --- webhooks ---

#[tokio::test]
async fn signed_webhook_runs_the_flow() {
    let h = harness(RuntimeContext::default());
    let flow_id = seed_flow(&h.store, true).await;
    let trigger = seed_webhook_trigger(&h.store, flow_id, "orders", Some("s3cret")).await;

    let body = br#"{"order_id": 7}"#;
    let signature = webhook::sign("s3cret", body);
    let execution_id = h
        .dispatcher
        .handle_webhook("orders", HttpMethod::Post, body, Some(&signature))
        .await
        .unwrap();

    let execution = wait_terminal(&h.store, execution_id).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.trigger_type, TriggerType::Webhook);
    assert_eq!(execution.input_data["order_id"], 7);

    let trigger = h.store.get_trigger(trigger.id).await.unwrap().unwrap();
    assert_eq!(trigger.trigger_count, 1);
    assert!(trigger.last_triggered_at.is_some());
}

#[tokio::test]
async fn bad_signature_creates_no_execution() {
    let h = harness(RuntimeContext::default());
    let flow_id = seed_flow(&h.store, true).await;
    let trigger = seed_webhook_trigger(&h.store, flow_id, "orders", Some("s3cret")).await;

    let body = br#"{"order_id": 7}"#;
    let forged = webhook::sign("wrong-secret", body);
    let err = h
        .dispatcher
        .handle_webhook("orders", HttpMethod::Post, body, Some(&forged))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Unauthorized));

    // Missing signature is just as unauthorized.
    let err = h
        .dispatcher
        .handle_webhook("orders", HttpMethod::Post, body, None)
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Unauthorized));

    assert!(h.store.list_executions(flow_id).await.unwrap().is_empty());
    let trigger = h.store.get_trigger(trigger.id).await.unwrap().unwrap();
    assert_eq!(trigger.trigger_count, 0);
}

#[tokio::test]
async fn unsigned_trigger_accepts_any_body() {
    let h = harness(RuntimeContext::default());
    let flow_id = seed_flow(&h.store, true).await;
    seed_webhook_trigger(&h.store, flow_id, "open", None).await;

    let execution_id = h
        .dispatcher
        .handle_webhook("open", HttpMethod::Post, br#"{"x": 1}"#, None)
        .await
        .unwrap();
    let execution = wait_terminal(&h.store, execution_id).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn malformed_body_rejected_after_auth() {
    let h = harness(RuntimeContext::default());
    let flow_id = seed_flow(&h.store, true).await;
    seed_webhook_trigger(&h.store, flow_id, "orders", Some("s3cret")).await;

    let body = b"not json";
    let signature = webhook::sign("s3cret", body);
    let err = h
        .dispatcher
        .handle_webhook("orders", HttpMethod::Post, body, Some(&signature))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::InvalidWebhookBody(_)));
    assert!(h.store.list_executions(flow_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn disabled_trigger_and_unknown_path_rejected() {
    let h = harness(RuntimeContext::default());
    let flow_id = seed_flow(&h.store, true).await;
    let mut trigger = seed_webhook_trigger(&h.store, flow_id, "orders", None).await;
    trigger.is_active = false;
    h.store.update_trigger(trigger).await.unwrap();

    let err = h
        .dispatcher
        .handle_webhook("orders", HttpMethod::Post, b"{}", None)
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::TriggerDisabled));

    let err = h
        .dispatcher
        .handle_webhook("nowhere", HttpMethod::Post, b"{}", None)
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::TriggerNotFound(_)));
}

#[tokio::test]
async fn method_mismatch_rejected() {
    let h = harness(RuntimeContext::default());
    let flow_id = seed_flow(&h.store, true).await;
    seed_webhook_trigger(&h.store, flow_id, "orders", None).await;

    let err = h
        .dispatcher
        .handle_webhook("orders", HttpMethod::Get, b"{}", None)
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::TriggerNotFound(_)));
}

#[tokio::test]
async fn inactive_flow_counts_the_attempt_but_does_not_run() {
    let h = harness(RuntimeContext::default());
    let flow_id = seed_flow(&h.store, false).await;
    let trigger = seed_webhook_trigger(&h.store, flow_id, "orders", None).await;

    let err = h
        .dispatcher
        .handle_webhook("orders", HttpMethod::Post, b"{}", None)
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::FlowInactive));

    // The attempt is still recorded on the trigger.
    let trigger = h.store.get_trigger(trigger.id).await.unwrap().unwrap();
    assert_eq!(trigger.trigger_count, 1);
    assert!(h.store.list_executions(flow_id).await.unwrap().is_empty());
}

// --- schedules ---

#[tokio::test]
async fn overdue_schedule_fires_once_and_recomputes() {
    // Now: 2024-01-10 12:00 UTC. Daily 09:00, last due 3 days ago.
    let now = Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap();
    let ctx = RuntimeContext {
        time_provider: Arc::new(FakeTimeProvider::new(now)),
        ..RuntimeContext::default()
    };
    let h = harness(ctx);
    let flow_id = seed_flow(&h.store, true).await;

    let mut trigger = FlowTrigger::new(
        flow_id,
        TriggerConfig::Schedule {
            cron_expression: "0 9 * * *".into(),
            timezone: "UTC".into(),
        },
    );
    trigger.next_run_at = Some(Utc.with_ymd_and_hms(2024, 1, 7, 9, 0, 0).unwrap());
    let trigger_id = trigger.id;
    h.store.create_trigger(trigger).await.unwrap();

    let fired = h.dispatcher.dispatch_due_schedules().await.unwrap();
    // Three missed periods collapse into a single catch-up fire.
    assert_eq!(fired.len(), 1);
    let execution = wait_terminal(&h.store, fired[0]).await;
    assert_eq!(execution.trigger_type, TriggerType::Schedule);
    assert_eq!(execution.status, ExecutionStatus::Completed);

    let trigger = h.store.get_trigger(trigger_id).await.unwrap().unwrap();
    assert_eq!(trigger.trigger_count, 1);
    assert_eq!(
        trigger.next_run_at,
        Some(Utc.with_ymd_and_hms(2024, 1, 11, 9, 0, 0).unwrap())
    );

    // Nothing further is due until the clock moves.
    let fired = h.dispatcher.dispatch_due_schedules().await.unwrap();
    assert!(fired.is_empty());
}

#[tokio::test]
async fn fresh_schedule_is_initialized_without_firing() {
    let now = Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap();
    let ctx = RuntimeContext {
        time_provider: Arc::new(FakeTimeProvider::new(now)),
        ..RuntimeContext::default()
    };
    let h = harness(ctx);
    let flow_id = seed_flow(&h.store, true).await;

    let trigger = FlowTrigger::new(
        flow_id,
        TriggerConfig::Schedule {
            cron_expression: "0 9 * * *".into(),
            timezone: "UTC".into(),
        },
    );
    let trigger_id = trigger.id;
    h.store.create_trigger(trigger).await.unwrap();

    let fired = h.dispatcher.dispatch_due_schedules().await.unwrap();
    assert!(fired.is_empty());

    let trigger = h.store.get_trigger(trigger_id).await.unwrap().unwrap();
    assert_eq!(
        trigger.next_run_at,
        Some(Utc.with_ymd_and_hms(2024, 1, 11, 9, 0, 0).unwrap())
    );
    assert_eq!(trigger.trigger_count, 0);
}

#[tokio::test]
async fn slow_flow_does_not_stall_other_due_schedules() {
    let h = harness(RuntimeContext::default());

    // One flow pauses on a delay node; the other finishes immediately.
    let mut slow_flow = Flow::new(Uuid::new_v4(), "slow-dispatch-target", Utc::now());
    slow_flow.is_active = true;
    slow_flow.nodes = vec![
        FlowNode {
            id: "t".into(),
            config: NodeConfig::Trigger {
                trigger_type: TriggerType::Schedule,
            },
            position: Position::default(),
        },
        FlowNode {
            id: "wait".into(),
            config: NodeConfig::Delay { duration_ms: 500 },
            position: Position::default(),
        },
    ];
    slow_flow.connections = vec![FlowConnection {
        id: "c1".into(),
        source: "t".into(),
        source_handle: None,
        target: "wait".into(),
        target_handle: None,
    }];
    let slow_flow_id = slow_flow.id;
    h.store.create_flow(slow_flow).await.unwrap();
    let quick_flow_id = seed_flow(&h.store, true).await;

    for flow_id in [slow_flow_id, quick_flow_id] {
        let mut trigger = FlowTrigger::new(
            flow_id,
            TriggerConfig::Schedule {
                cron_expression: "0 9 * * *".into(),
                timezone: "UTC".into(),
            },
        );
        trigger.next_run_at = Some(Utc::now() - chrono::Duration::hours(1));
        h.store.create_trigger(trigger).await.unwrap();
    }

    let fired = h.dispatcher.dispatch_due_schedules().await.unwrap();
    assert_eq!(fired.len(), 2);

    // The delayed execution is still in flight when dispatch returns.
    let slow = &h.store.list_executions(slow_flow_id).await.unwrap()[0];
    assert!(!slow.status.is_terminal());

    for execution_id in fired {
        let execution = wait_terminal(&h.store, execution_id).await;
        assert_eq!(execution.status, ExecutionStatus::Completed);
    }
}

// --- events ---

#[tokio::test]
async fn events_match_on_channel_name_and_filter() {
    let h = harness(RuntimeContext::default());
    let flow_id = seed_flow(&h.store, true).await;

    let matching = FlowTrigger::new(
        flow_id,
        TriggerConfig::Event {
            channel: "orders".into(),
            event_name: "created".into(),
            filter: Some(json!({"region": "eu"})),
        },
    );
    let other_channel = FlowTrigger::new(
        flow_id,
        TriggerConfig::Event {
            channel: "billing".into(),
            event_name: "created".into(),
            filter: None,
        },
    );
    h.store.create_trigger(matching.clone()).await.unwrap();
    h.store.create_trigger(other_channel).await.unwrap();

    let fired = h
        .dispatcher
        .handle_event("orders", "created", json!({"region": "eu", "id": 1}))
        .await
        .unwrap();
    assert_eq!(fired.len(), 1);
    let execution = wait_terminal(&h.store, fired[0]).await;
    assert_eq!(execution.input_data["id"], 1);

    // Filter mismatch fires nothing.
    let fired = h
        .dispatcher
        .handle_event("orders", "created", json!({"region": "us"}))
        .await
        .unwrap();
    assert!(fired.is_empty());

    let trigger = h.store.get_trigger(matching.id).await.unwrap().unwrap();
    assert_eq!(trigger.trigger_count, 1);
}

#[tokio::test]
async fn bus_events_reach_the_dispatcher() {
    let h = harness(RuntimeContext::default());
    let flow_id = seed_flow(&h.store, true).await;
    let trigger = FlowTrigger::new(
        flow_id,
        TriggerConfig::Event {
            channel: "orders".into(),
            event_name: "created".into(),
            filter: None,
        },
    );
    h.store.create_trigger(trigger).await.unwrap();

    let bus = EventBus::new(8);
    let rx = bus.subscribe();
    let dispatcher = h.dispatcher.clone();
    let listener = tokio::spawn(async move { dispatcher.listen(rx).await });

    bus.publish("orders", "created", json!({"id": 9}));
    // Give the listener a turn to deliver before tearing the bus down.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    drop(bus);
    listener.await.unwrap();

    let executions = h.store.list_executions(flow_id).await.unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].input_data["id"], 9);
}

// --- stats ---

#[tokio::test]
async fn stats_reflect_dispatched_executions() {
    let h = harness(RuntimeContext::default());
    let flow_id = seed_flow(&h.store, true).await;
    seed_webhook_trigger(&h.store, flow_id, "orders", None).await;

    for _ in 0..3 {
        let execution_id = h
            .dispatcher
            .handle_webhook("orders", HttpMethod::Post, b"{}", None)
            .await
            .unwrap();
        wait_terminal(&h.store, execution_id).await;
    }

    let stats = flow_stats(h.store.as_ref(), flow_id).await.unwrap();
    assert_eq!(stats.total_executions, 3);
    assert_eq!(stats.successful_executions, 3);
    assert_eq!(stats.success_rate, 1.0);
}
