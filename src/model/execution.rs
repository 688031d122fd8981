use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use super::flow::{Flow, FlowConnection, FlowNode, FlowSettings};
use super::trigger::TriggerType;

/// State machine for one flow execution:
/// `pending → running → {completed, failed, cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

/// Copy of the graph an execution runs against. Taken when the execution is
/// created so concurrent flow edits or deletion never affect a run in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<FlowNode>,
    pub connections: Vec<FlowConnection>,
    pub settings: FlowSettings,
    pub variables: HashMap<String, Value>,
}

impl GraphSnapshot {
    pub fn of(flow: &Flow) -> Self {
        GraphSnapshot {
            nodes: flow.nodes.clone(),
            connections: flow.connections.clone(),
            settings: flow.settings.clone(),
            variables: flow.variables.clone(),
        }
    }
}

/// One runtime instance of a flow responding to one triggering event.
/// Immutable once terminal; never deleted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowExecution {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub trigger_type: TriggerType,
    pub input_data: Value,
    pub status: ExecutionStatus,
    pub snapshot: GraphSnapshot,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub error_message: Option<String>,
    /// Structured error detail; `{"fatal": true}` on fatal aborts.
    pub error_details: Option<Value>,
}

impl FlowExecution {
    pub fn new(
        id: Uuid,
        flow: &Flow,
        trigger_type: TriggerType,
        input_data: Value,
        now: DateTime<Utc>,
    ) -> Self {
        FlowExecution {
            id,
            flow_id: flow.id,
            trigger_type,
            input_data,
            status: ExecutionStatus::Pending,
            snapshot: GraphSnapshot::of(flow),
            created_at: now,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            error_message: None,
            error_details: None,
        }
    }
}

/// Status of one recorded step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// The recorded outcome of one node within one execution. Created and
/// updated only by the execution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowExecutionStep {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub node_id: String,
    /// Strictly increasing per execution, even across parallel branches.
    pub step_order: u32,
    pub input: Value,
    pub output: Value,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub logs: Vec<String>,
}
