use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{FlowError, FlowResult};
use crate::model::{Flow, FlowExecution, FlowExecutionStep, FlowTrigger, TriggerConfig, TriggerType};

use super::FlowStore;

/// In-memory store. Single-key upsert semantics per entity; no cross-entity
/// transactions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    flows: DashMap<Uuid, Flow>,
    executions: DashMap<Uuid, FlowExecution>,
    steps: DashMap<Uuid, FlowExecutionStep>,
    triggers: DashMap<Uuid, FlowTrigger>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FlowStore for MemoryStore {
    async fn create_flow(&self, flow: Flow) -> FlowResult<()> {
        self.flows.insert(flow.id, flow);
        Ok(())
    }

    async fn get_flow(&self, id: Uuid) -> FlowResult<Option<Flow>> {
        Ok(self.flows.get(&id).map(|f| f.clone()))
    }

    async fn update_flow(&self, flow: Flow) -> FlowResult<()> {
        self.flows.insert(flow.id, flow);
        Ok(())
    }

    async fn delete_flow(&self, id: Uuid) -> FlowResult<()> {
        let in_flight = self
            .executions
            .iter()
            .any(|e| e.flow_id == id && !e.status.is_terminal());
        if in_flight {
            return Err(FlowError::ExecutionInFlight(id));
        }
        self.flows.remove(&id);
        Ok(())
    }

    async fn create_execution(&self, execution: FlowExecution) -> FlowResult<()> {
        self.executions.insert(execution.id, execution);
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> FlowResult<Option<FlowExecution>> {
        Ok(self.executions.get(&id).map(|e| e.clone()))
    }

    async fn update_execution(&self, execution: FlowExecution) -> FlowResult<()> {
        self.executions.insert(execution.id, execution);
        Ok(())
    }

    async fn list_executions(&self, flow_id: Uuid) -> FlowResult<Vec<FlowExecution>> {
        let mut executions: Vec<FlowExecution> = self
            .executions
            .iter()
            .filter(|e| e.flow_id == flow_id)
            .map(|e| e.clone())
            .collect();
        executions.sort_by_key(|e| e.created_at);
        Ok(executions)
    }

    async fn create_step(&self, step: FlowExecutionStep) -> FlowResult<()> {
        self.steps.insert(step.id, step);
        Ok(())
    }

    async fn get_step(&self, id: Uuid) -> FlowResult<Option<FlowExecutionStep>> {
        Ok(self.steps.get(&id).map(|s| s.clone()))
    }

    async fn update_step(&self, step: FlowExecutionStep) -> FlowResult<()> {
        self.steps.insert(step.id, step);
        Ok(())
    }

    async fn list_steps(&self, execution_id: Uuid) -> FlowResult<Vec<FlowExecutionStep>> {
        let mut steps: Vec<FlowExecutionStep> = self
            .steps
            .iter()
            .filter(|s| s.execution_id == execution_id)
            .map(|s| s.clone())
            .collect();
        steps.sort_by_key(|s| s.step_order);
        Ok(steps)
    }

    async fn create_trigger(&self, trigger: FlowTrigger) -> FlowResult<()> {
        self.triggers.insert(trigger.id, trigger);
        Ok(())
    }

    async fn get_trigger(&self, id: Uuid) -> FlowResult<Option<FlowTrigger>> {
        Ok(self.triggers.get(&id).map(|t| t.clone()))
    }

    async fn update_trigger(&self, trigger: FlowTrigger) -> FlowResult<()> {
        self.triggers.insert(trigger.id, trigger);
        Ok(())
    }

    async fn list_triggers(
        &self,
        trigger_type: Option<TriggerType>,
    ) -> FlowResult<Vec<FlowTrigger>> {
        Ok(self
            .triggers
            .iter()
            .filter(|t| trigger_type.map_or(true, |tt| t.trigger_type() == tt))
            .map(|t| t.clone())
            .collect())
    }

    async fn find_webhook_trigger(&self, path: &str) -> FlowResult<Option<FlowTrigger>> {
        Ok(self
            .triggers
            .iter()
            .find(|t| {
                matches!(
                    &t.config,
                    TriggerConfig::Webhook { path: p, .. } if p == path
                )
            })
            .map(|t| t.clone()))
    }
}
