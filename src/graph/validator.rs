//! Static flow validation, run before activation and before execution.

use serde::Serialize;

use crate::error::{FlowError, FlowResult, GraphError};
use crate::model::{Flow, NodeConfig, NodeType};

use super::FlowGraph;

/// Outcome of validating a flow. Errors block execution; warnings do not.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub code: IssueCode,
    pub node_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    NoTriggerNodes,
    DanglingConnection,
    DuplicateNodeId,
    InvalidConditionEdge,
    CycleDetected,
    EmptyNodeConfig,
    UnreachableNode,
}

impl ValidationReport {
    fn error(&mut self, code: IssueCode, node_id: Option<String>, message: impl Into<String>) {
        self.errors.push(ValidationIssue {
            code,
            node_id,
            message: message.into(),
        });
        self.is_valid = false;
    }

    fn warning(&mut self, code: IssueCode, node_id: Option<String>, message: impl Into<String>) {
        self.warnings.push(ValidationIssue {
            code,
            node_id,
            message: message.into(),
        });
    }
}

/// Validate a flow's graph. Pure; must be re-run whenever the graph changes.
/// Activation requires `is_valid == true`.
pub fn validate(flow: &Flow) -> ValidationReport {
    let mut report = ValidationReport {
        is_valid: true,
        errors: Vec::new(),
        warnings: Vec::new(),
    };

    let graph = match FlowGraph::build(&flow.nodes, &flow.connections) {
        Ok(graph) => graph,
        Err(err) => {
            let (code, node_id) = match &err {
                GraphError::DuplicateNodeId(id) => (IssueCode::DuplicateNodeId, Some(id.clone())),
                GraphError::MissingNode { node_id, .. } => {
                    (IssueCode::DanglingConnection, Some(node_id.clone()))
                }
                GraphError::InvalidConditionEdge(id) => {
                    (IssueCode::InvalidConditionEdge, Some(id.clone()))
                }
                GraphError::CycleDetected => (IssueCode::CycleDetected, None),
            };
            report.error(code, node_id, err.to_string());
            return report;
        }
    };

    if graph.triggers().is_empty() {
        report.error(
            IssueCode::NoTriggerNodes,
            None,
            "flow has no trigger node",
        );
    }

    if let Err(err) = graph.is_acyclic_from_triggers() {
        report.error(IssueCode::CycleDetected, None, err.to_string());
    }

    let reachable = graph.reachable_from_triggers();
    for node in &flow.nodes {
        if node.config.is_empty() {
            report.warning(
                IssueCode::EmptyNodeConfig,
                Some(node.id.clone()),
                format!("node {} has an empty configuration", node.id),
            );
        }
        let node_type = node.config.node_type();
        if matches!(node_type, NodeType::Action | NodeType::Condition)
            && !reachable.contains(&node.id)
        {
            report.warning(
                IssueCode::UnreachableNode,
                Some(node.id.clone()),
                format!("node {} is unreachable from any trigger", node.id),
            );
        }
    }

    report
}

/// Pure node-configuration mutation: returns a new flow with the node's
/// configuration replaced.
pub fn update_node_config(flow: &Flow, node_id: &str, config: NodeConfig) -> FlowResult<Flow> {
    let mut updated = flow.clone();
    let node = updated
        .nodes
        .iter_mut()
        .find(|n| n.id == node_id)
        .ok_or_else(|| FlowError::Internal(format!("node not found: {node_id}")))?;
    node.config = config;
    Ok(updated)
}
