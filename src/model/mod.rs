//! Serde data model: flows, nodes, connections, executions, steps, triggers
//! and variables.

mod execution;
mod flow;
mod trigger;
mod variable;

pub use execution::{
    ExecutionStatus, FlowExecution, FlowExecutionStep, GraphSnapshot, StepStatus,
};
pub use flow::{
    ActionKind, ConditionOperator, DataTransform, ErrorHandling, Flow, FlowConnection, FlowNode,
    FlowSettings, LoggingLevel, NodeConfig, NodeType, Position,
};
pub use trigger::{FlowTrigger, HttpMethod, TriggerConfig, TriggerType};
pub use variable::{FlowVariable, VariableScope};
