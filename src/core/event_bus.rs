//! Engine events emitted while an execution runs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Observable engine events, one listener per channel.
#[derive(Clone, Debug, Serialize)]
pub enum FlowEvent {
    ExecutionStarted {
        execution_id: Uuid,
        flow_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        execution_id: Uuid,
        node_id: String,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        execution_id: Uuid,
        node_id: String,
        output: Value,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        execution_id: Uuid,
        node_id: String,
        error: String,
        retry_count: u32,
        timestamp: DateTime<Utc>,
    },
    NodeSkipped {
        execution_id: Uuid,
        node_id: String,
        timestamp: DateTime<Utc>,
    },
    /// Produced by condition nodes; names the taken output handle.
    BranchSelected {
        execution_id: Uuid,
        node_id: String,
        branch: String,
        timestamp: DateTime<Utc>,
    },
    ExecutionCompleted {
        execution_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    ExecutionFailed {
        execution_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },
    ExecutionCancelled {
        execution_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

pub type EventSender = mpsc::UnboundedSender<FlowEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<FlowEvent>;

pub fn create_event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
