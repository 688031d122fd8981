//! Persistence seam. The engine depends only on create/read/update-by-id
//! operations; provider-specific querying stays out of the contract.

mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::FlowResult;
use crate::model::{Flow, FlowExecution, FlowExecutionStep, FlowTrigger, TriggerType};

pub use memory::MemoryStore;

#[async_trait]
pub trait FlowStore: Send + Sync {
    async fn create_flow(&self, flow: Flow) -> FlowResult<()>;
    async fn get_flow(&self, id: Uuid) -> FlowResult<Option<Flow>>;
    async fn update_flow(&self, flow: Flow) -> FlowResult<()>;
    /// Refuses deletion while any execution referencing the flow is in
    /// flight.
    async fn delete_flow(&self, id: Uuid) -> FlowResult<()>;

    async fn create_execution(&self, execution: FlowExecution) -> FlowResult<()>;
    async fn get_execution(&self, id: Uuid) -> FlowResult<Option<FlowExecution>>;
    async fn update_execution(&self, execution: FlowExecution) -> FlowResult<()>;
    async fn list_executions(&self, flow_id: Uuid) -> FlowResult<Vec<FlowExecution>>;

    async fn create_step(&self, step: FlowExecutionStep) -> FlowResult<()>;
    async fn get_step(&self, id: Uuid) -> FlowResult<Option<FlowExecutionStep>>;
    async fn update_step(&self, step: FlowExecutionStep) -> FlowResult<()>;
    /// Steps for one execution, ordered by `step_order`.
    async fn list_steps(&self, execution_id: Uuid) -> FlowResult<Vec<FlowExecutionStep>>;

    async fn create_trigger(&self, trigger: FlowTrigger) -> FlowResult<()>;
    async fn get_trigger(&self, id: Uuid) -> FlowResult<Option<FlowTrigger>>;
    async fn update_trigger(&self, trigger: FlowTrigger) -> FlowResult<()>;
    async fn list_triggers(&self, trigger_type: Option<TriggerType>) -> FlowResult<Vec<FlowTrigger>>;
    /// Active webhook trigger matching an ingress path.
    async fn find_webhook_trigger(&self, path: &str) -> FlowResult<Option<FlowTrigger>>;
}
