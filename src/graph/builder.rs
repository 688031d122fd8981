use std::collections::{HashMap, HashSet};

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::error::GraphError;
use crate::model::{FlowConnection, FlowNode};

use super::types::{BranchHandle, GraphEdge, GraphNode};

/// Immutable graph built from a flow's node and connection lists.
///
/// Construction enforces the structural invariants: unique node ids, no
/// connection to a missing node, and branch handles on every outgoing edge
/// of a condition node. Acyclicity is checked separately by
/// [`is_acyclic_from_triggers`](Self::is_acyclic_from_triggers) so the
/// validator can report it as its own error.
#[derive(Debug)]
pub struct FlowGraph {
    graph: StableDiGraph<GraphNode, GraphEdge>,
    index: HashMap<String, NodeIndex>,
}

impl FlowGraph {
    pub fn build(nodes: &[FlowNode], connections: &[FlowConnection]) -> Result<Self, GraphError> {
        let mut graph = StableDiGraph::new();
        let mut index: HashMap<String, NodeIndex> = HashMap::new();

        for node in nodes {
            if index.contains_key(&node.id) {
                return Err(GraphError::DuplicateNodeId(node.id.clone()));
            }
            let idx = graph.add_node(GraphNode {
                id: node.id.clone(),
                config: node.config.clone(),
            });
            index.insert(node.id.clone(), idx);
        }

        for conn in connections {
            let source_idx = *index.get(&conn.source).ok_or_else(|| GraphError::MissingNode {
                connection_id: conn.id.clone(),
                node_id: conn.source.clone(),
            })?;
            let target_idx = *index.get(&conn.target).ok_or_else(|| GraphError::MissingNode {
                connection_id: conn.id.clone(),
                node_id: conn.target.clone(),
            })?;

            let source_node = &graph[source_idx];
            if source_node.config.is_condition()
                && !matches!(conn.source_handle.as_deref(), Some("true") | Some("false"))
            {
                return Err(GraphError::InvalidConditionEdge(conn.source.clone()));
            }

            let edge = GraphEdge {
                id: conn.id.clone(),
                source: conn.source.clone(),
                target: conn.target.clone(),
                handle: BranchHandle::from_source_handle(&conn.source_handle),
            };
            graph.add_edge(source_idx, target_idx, edge);
        }

        Ok(FlowGraph { graph, index })
    }

    pub fn node(&self, node_id: &str) -> Option<&GraphNode> {
        self.index.get(node_id).map(|idx| &self.graph[*idx])
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.graph
            .node_indices()
            .map(|idx| self.graph[idx].id.clone())
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// All trigger nodes. These seed the engine's ready-set.
    pub fn triggers(&self) -> Vec<&GraphNode> {
        self.graph
            .node_indices()
            .map(|idx| &self.graph[idx])
            .filter(|n| n.config.is_trigger())
            .collect()
    }

    /// Outgoing edges from a node, optionally restricted to one handle.
    pub fn outgoing(&self, node_id: &str, handle: Option<BranchHandle>) -> Vec<&GraphEdge> {
        let Some(idx) = self.index.get(node_id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(*idx, Direction::Outgoing)
            .map(|e| e.weight())
            .filter(|e| handle.map_or(true, |h| e.handle == h))
            .collect()
    }

    pub fn incoming(&self, node_id: &str) -> Vec<&GraphEdge> {
        let Some(idx) = self.index.get(node_id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(*idx, Direction::Incoming)
            .map(|e| e.weight())
            .collect()
    }

    /// Depth-first check that no directed path from any trigger node revisits
    /// a node already on the active path.
    pub fn is_acyclic_from_triggers(&self) -> Result<(), GraphError> {
        for trigger in self.triggers() {
            let mut on_path = HashSet::new();
            self.dfs_check(&trigger.id, &mut on_path)?;
        }
        Ok(())
    }

    fn dfs_check(&self, node_id: &str, on_path: &mut HashSet<String>) -> Result<(), GraphError> {
        if !on_path.insert(node_id.to_string()) {
            return Err(GraphError::CycleDetected);
        }
        for edge in self.outgoing(node_id, None) {
            let target = edge.target.clone();
            self.dfs_check(&target, on_path)?;
        }
        on_path.remove(node_id);
        Ok(())
    }

    /// Node ids reachable from any trigger, triggers included.
    pub fn reachable_from_triggers(&self) -> HashSet<String> {
        let mut reachable = HashSet::new();
        let mut stack: Vec<String> = self.triggers().iter().map(|n| n.id.clone()).collect();
        while let Some(node_id) = stack.pop() {
            if !reachable.insert(node_id.clone()) {
                continue;
            }
            for edge in self.outgoing(&node_id, None) {
                stack.push(edge.target.clone());
            }
        }
        reachable
    }
}
