//! Trigger dispatcher: the single ingress point that turns external events
//! into executions.
//!
//! One dispatcher serves every flow. Each trigger kind has its own entry
//! protocol (webhook authentication, schedule catch-up, event matching);
//! they all converge on [`TriggerDispatcher::fire`], which records the
//! trigger attempt and starts an execution. Dispatch is fire-and-forget:
//! the dispatcher returns as soon as the execution is created, and
//! node-level failures surface through the execution record, never as
//! dispatcher errors.

pub mod event;
pub mod schedule;
pub mod webhook;

use serde_json::Value;
use std::sync::Arc;

use crate::core::context::RuntimeContext;
use crate::core::engine::ExecutionEngine;
use crate::error::{FlowError, FlowResult};
use crate::model::{FlowTrigger, HttpMethod, TriggerConfig, TriggerType};
use uuid::Uuid;
use crate::store::FlowStore;

pub use event::{BusEvent, EventBus};

#[derive(Clone)]
pub struct TriggerDispatcher {
    store: Arc<dyn FlowStore>,
    engine: ExecutionEngine,
    ctx: Arc<RuntimeContext>,
}

impl TriggerDispatcher {
    pub fn new(
        store: Arc<dyn FlowStore>,
        engine: ExecutionEngine,
        ctx: Arc<RuntimeContext>,
    ) -> Self {
        TriggerDispatcher { store, engine, ctx }
    }

    /// Handle an inbound webhook request.
    ///
    /// Authentication comes before parsing: when the trigger carries a
    /// secret, a missing or invalid signature is rejected without creating
    /// any execution record. Returns the id of the started execution; its
    /// progress is observed through the store or a status handle.
    pub async fn handle_webhook(
        &self,
        path: &str,
        method: HttpMethod,
        body: &[u8],
        signature: Option<&str>,
    ) -> FlowResult<Uuid> {
        let trigger = self
            .store
            .find_webhook_trigger(path)
            .await?
            .ok_or_else(|| FlowError::TriggerNotFound(path.to_string()))?;
        if !trigger.is_active {
            return Err(FlowError::TriggerDisabled);
        }

        let TriggerConfig::Webhook {
            method: expected_method,
            webhook_secret,
            ..
        } = &trigger.config
        else {
            return Err(FlowError::Internal(format!(
                "trigger {} is not a webhook",
                trigger.id
            )));
        };
        if *expected_method != method {
            return Err(FlowError::TriggerNotFound(path.to_string()));
        }

        if let Some(secret) = webhook_secret {
            let valid = signature.is_some_and(|sig| webhook::verify(secret, body, sig));
            if !valid {
                tracing::warn!(path, "webhook signature rejected");
                return Err(FlowError::Unauthorized);
            }
        }

        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| FlowError::InvalidWebhookBody(e.to_string()))?;

        self.fire(trigger, payload).await
    }

    /// Fire every active schedule trigger whose due time has passed.
    ///
    /// A trigger overdue by several periods fires exactly once and its next
    /// due time is recomputed from `now`, so downtime never produces a burst
    /// of catch-up executions. Triggers without a due time yet are
    /// initialized without firing.
    pub async fn dispatch_due_schedules(&self) -> FlowResult<Vec<Uuid>> {
        let now = self.ctx.now();
        let mut fired = Vec::new();

        for mut trigger in self.store.list_triggers(Some(TriggerType::Schedule)).await? {
            if !trigger.is_active {
                continue;
            }
            let TriggerConfig::Schedule {
                cron_expression,
                timezone,
            } = trigger.config.clone()
            else {
                continue;
            };

            let Some(due) = trigger.next_run_at else {
                match schedule::next_run_after(&cron_expression, &timezone, now) {
                    Ok(next) => {
                        trigger.next_run_at = Some(next);
                        self.store.update_trigger(trigger).await?;
                    }
                    Err(err) => {
                        tracing::warn!(trigger_id = %trigger.id, error = %err, "bad schedule");
                    }
                }
                continue;
            };
            if due > now {
                continue;
            }

            trigger.next_run_at =
                match schedule::next_run_after(&cron_expression, &timezone, now) {
                    Ok(next) => Some(next),
                    Err(err) => {
                        tracing::warn!(trigger_id = %trigger.id, error = %err, "bad schedule");
                        None
                    }
                };
            self.store.update_trigger(trigger.clone()).await?;

            let payload = serde_json::json!({
                "scheduled_for": due,
                "fired_at": now,
            });
            match self.fire(trigger, payload).await {
                Ok(execution_id) => fired.push(execution_id),
                Err(err) => {
                    tracing::warn!(error = %err, "schedule dispatch skipped");
                }
            }
        }

        Ok(fired)
    }

    /// Deliver an application event to every matching event trigger.
    pub async fn handle_event(
        &self,
        channel: &str,
        event_name: &str,
        payload: Value,
    ) -> FlowResult<Vec<Uuid>> {
        let mut fired = Vec::new();
        for trigger in self.store.list_triggers(Some(TriggerType::Event)).await? {
            if !trigger.is_active {
                continue;
            }
            let TriggerConfig::Event {
                channel: want_channel,
                event_name: want_event,
                filter,
            } = &trigger.config
            else {
                continue;
            };
            if want_channel != channel || want_event != event_name {
                continue;
            }
            if let Some(filter) = filter {
                if !filter_matches(filter, &payload) {
                    continue;
                }
            }

            match self.fire(trigger, payload.clone()).await {
                Ok(execution_id) => fired.push(execution_id),
                Err(err) => {
                    tracing::warn!(error = %err, "event dispatch skipped");
                }
            }
        }
        Ok(fired)
    }

    /// Consume an [`EventBus`] subscription until every publisher is gone.
    pub async fn listen(&self, mut rx: tokio::sync::broadcast::Receiver<BusEvent>) {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(err) = self
                        .handle_event(&event.channel, &event.event_name, event.payload)
                        .await
                    {
                        tracing::warn!(error = %err, "event delivery failed");
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event subscriber lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    /// Record the trigger attempt and start an execution, returning its id
    /// without waiting for it to finish. The attempt is counted whether or
    /// not the flow ends up running. Executions started for different
    /// triggers run concurrently; a slow flow never stalls the dispatcher.
    async fn fire(&self, mut trigger: FlowTrigger, input: Value) -> FlowResult<Uuid> {
        let trigger_type = trigger.trigger_type();
        let flow_id = trigger.flow_id;

        trigger.trigger_count += 1;
        trigger.last_triggered_at = Some(self.ctx.now());
        self.store.update_trigger(trigger).await?;

        let flow = self
            .store
            .get_flow(flow_id)
            .await?
            .ok_or(FlowError::FlowNotFound(flow_id))?;
        if !flow.is_active {
            return Err(FlowError::FlowInactive);
        }

        self.engine.execute(flow_id, trigger_type, input).await
    }
}

/// Every key in `filter` must be present in `payload` with an equal value.
fn filter_matches(filter: &Value, payload: &Value) -> bool {
    match (filter, payload) {
        (Value::Object(wanted), Value::Object(actual)) => wanted
            .iter()
            .all(|(k, v)| actual.get(k).is_some_and(|a| a == v)),
        _ => filter == payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_subset_match() {
        let filter = json!({"kind": "order"});
        assert!(filter_matches(&filter, &json!({"kind": "order", "id": 7})));
        assert!(!filter_matches(&filter, &json!({"kind": "refund"})));
        assert!(!filter_matches(&filter, &json!({})));
    }
}
