//! Append-only step log for one execution.
//!
//! Steps are created and updated only here, never reordered or deleted.
//! `step_order` comes from a single per-execution counter so the recorded
//! log replays in one total order even across parallel branches.

use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{FlowError, FlowResult};
use crate::model::{FlowExecutionStep, StepStatus};
use crate::store::FlowStore;

use super::context::RuntimeContext;

pub struct StepRecorder {
    store: Arc<dyn FlowStore>,
    ctx: Arc<RuntimeContext>,
    execution_id: Uuid,
    counter: AtomicU32,
}

impl StepRecorder {
    pub fn new(store: Arc<dyn FlowStore>, ctx: Arc<RuntimeContext>, execution_id: Uuid) -> Self {
        StepRecorder {
            store,
            ctx,
            execution_id,
            counter: AtomicU32::new(0),
        }
    }

    /// Allocate the next step order. Strictly increasing per execution.
    pub fn next_order(&self) -> u32 {
        self.counter.fetch_add(1, Ordering::SeqCst)
    }

    pub async fn begin_step(&self, node_id: &str, order: u32, input: Value) -> FlowResult<Uuid> {
        let step = FlowExecutionStep {
            id: self.ctx.next_id(),
            execution_id: self.execution_id,
            node_id: node_id.to_string(),
            step_order: order,
            input,
            output: Value::Null,
            status: StepStatus::Running,
            started_at: self.ctx.now(),
            completed_at: None,
            duration_ms: None,
            error_message: None,
            retry_count: 0,
            logs: Vec::new(),
        };
        let step_id = step.id;
        self.store.create_step(step).await?;
        Ok(step_id)
    }

    pub async fn complete_step(
        &self,
        step_id: Uuid,
        output: Value,
        retry_count: u32,
    ) -> FlowResult<()> {
        let mut step = self.get(step_id).await?;
        let now = self.ctx.now();
        step.output = output;
        step.status = StepStatus::Completed;
        step.retry_count = retry_count;
        step.duration_ms = Some(elapsed_ms(step.started_at, now));
        step.completed_at = Some(now);
        self.store.update_step(step).await
    }

    pub async fn fail_step(&self, step_id: Uuid, error: &str, retry_count: u32) -> FlowResult<()> {
        let mut step = self.get(step_id).await?;
        let now = self.ctx.now();
        step.status = StepStatus::Failed;
        step.error_message = Some(error.to_string());
        step.retry_count = retry_count;
        step.duration_ms = Some(elapsed_ms(step.started_at, now));
        step.completed_at = Some(now);
        step.logs.push(format!("failed after {retry_count} retries: {error}"));
        self.store.update_step(step).await
    }

    /// Record a condition-skipped node. Skipped nodes get exactly one step
    /// and are never dispatched.
    pub async fn skip_step(&self, node_id: &str, order: u32) -> FlowResult<Uuid> {
        let now = self.ctx.now();
        let step = FlowExecutionStep {
            id: self.ctx.next_id(),
            execution_id: self.execution_id,
            node_id: node_id.to_string(),
            step_order: order,
            input: Value::Null,
            output: Value::Null,
            status: StepStatus::Skipped,
            started_at: now,
            completed_at: Some(now),
            duration_ms: Some(0),
            error_message: None,
            retry_count: 0,
            logs: Vec::new(),
        };
        let step_id = step.id;
        self.store.create_step(step).await?;
        Ok(step_id)
    }

    pub async fn append_log(&self, step_id: Uuid, line: String) -> FlowResult<()> {
        let mut step = self.get(step_id).await?;
        step.logs.push(line);
        self.store.update_step(step).await
    }

    /// Force any step still `running` to `failed`. Used on fatal abort,
    /// cancellation and execution timeout so no step is left in flight.
    pub async fn fail_running_steps(&self, reason: &str) -> FlowResult<()> {
        let steps = self.store.list_steps(self.execution_id).await?;
        for step in steps {
            if step.status == StepStatus::Running {
                self.fail_step(step.id, reason, step.retry_count).await?;
            }
        }
        Ok(())
    }

    async fn get(&self, step_id: Uuid) -> FlowResult<FlowExecutionStep> {
        self.store
            .get_step(step_id)
            .await?
            .ok_or_else(|| FlowError::Internal(format!("step not found: {step_id}")))
    }
}

fn elapsed_ms(from: chrono::DateTime<chrono::Utc>, to: chrono::DateTime<chrono::Utc>) -> u64 {
    (to - from).num_milliseconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn recorder() -> (StepRecorder, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let ctx = Arc::new(RuntimeContext::default());
        let rec = StepRecorder::new(store.clone(), ctx, Uuid::new_v4());
        (rec, store)
    }

    #[tokio::test]
    async fn begin_complete_records_in_order() {
        let (rec, store) = recorder();
        let o1 = rec.next_order();
        let o2 = rec.next_order();
        assert!(o2 > o1);

        let s1 = rec.begin_step("a", o1, json!({"in": 1})).await.unwrap();
        let s2 = rec.begin_step("b", o2, json!({})).await.unwrap();
        rec.complete_step(s2, json!({"out": 2}), 0).await.unwrap();
        rec.complete_step(s1, json!({}), 0).await.unwrap();

        let steps = store.list_steps(rec.execution_id).await.unwrap();
        assert_eq!(steps.len(), 2);
        // Ordered by step_order regardless of completion order.
        assert_eq!(steps[0].node_id, "a");
        assert_eq!(steps[1].node_id, "b");
        assert!(steps.iter().all(|s| s.status == StepStatus::Completed));
    }

    #[tokio::test]
    async fn fail_step_records_error_and_retries() {
        let (rec, store) = recorder();
        let order = rec.next_order();
        let step_id = rec.begin_step("a", order, json!({})).await.unwrap();
        rec.fail_step(step_id, "boom", 2).await.unwrap();

        let step = store.get_step(step_id).await.unwrap().unwrap();
        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.retry_count, 2);
        assert_eq!(step.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn fail_running_steps_leaves_no_step_in_flight() {
        let (rec, store) = recorder();
        let done = rec.begin_step("a", rec.next_order(), json!({})).await.unwrap();
        rec.complete_step(done, json!({}), 0).await.unwrap();
        let hanging = rec.begin_step("b", rec.next_order(), json!({})).await.unwrap();

        rec.fail_running_steps("fatal abort").await.unwrap();

        let steps = store.list_steps(rec.execution_id).await.unwrap();
        assert_eq!(steps[0].status, StepStatus::Completed);
        assert_eq!(steps[1].status, StepStatus::Failed);
        let _ = hanging;
    }
}
