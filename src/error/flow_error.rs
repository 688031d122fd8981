//! Flow-level error taxonomy.

use thiserror::Error;
use uuid::Uuid;

use crate::graph::validator::ValidationReport;

/// Structural errors raised while building a [`FlowGraph`](crate::graph::FlowGraph).
/// These are surfaced to the caller before any execution starts and are never
/// retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Duplicate node id: {0}")]
    DuplicateNodeId(String),
    #[error("Connection {connection_id} references missing node: {node_id}")]
    MissingNode {
        connection_id: String,
        node_id: String,
    },
    #[error("Condition node {0} has an outgoing connection without a true/false handle")]
    InvalidConditionEdge(String),
    #[error("Cycle detected in graph")]
    CycleDetected,
}

/// Top-level errors reported by the engine and the trigger dispatcher.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("Flow validation failed")]
    Validation(Box<ValidationReport>),
    #[error("Unauthorized webhook request")]
    Unauthorized,
    #[error("Trigger is disabled")]
    TriggerDisabled,
    #[error("Flow is not active")]
    FlowInactive,
    #[error("Flow not found: {0}")]
    FlowNotFound(Uuid),
    #[error("No trigger matched: {0}")]
    TriggerNotFound(String),
    #[error("Execution not found: {0}")]
    ExecutionNotFound(Uuid),
    #[error("Flow {0} has executions in flight")]
    ExecutionInFlight(Uuid),
    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),
    #[error("Invalid webhook body: {0}")]
    InvalidWebhookBody(String),
    #[error("Execution exceeded timeout")]
    ExecutionTimeout,
    #[error("Execution cancelled")]
    Cancelled,
    #[error("Node {node_id} failed: {error}")]
    NodeFailed { node_id: String, error: String },
    #[error("Fatal: {0}")]
    Fatal(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type FlowResult<T> = Result<T, FlowError>;
