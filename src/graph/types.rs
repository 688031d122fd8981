use crate::model::NodeConfig;

/// Graph node: the flow node id plus its typed configuration.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: String,
    pub config: NodeConfig,
}

/// Graph edge, keyed by the source output handle.
#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub handle: BranchHandle,
}

/// Output handle of an edge. Condition nodes expose exactly `True` and
/// `False`; every other node type exposes `Default`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchHandle {
    Default,
    True,
    False,
}

impl BranchHandle {
    /// Parse a connection's `source_handle` string.
    pub fn from_source_handle(handle: &Option<String>) -> Self {
        match handle.as_deref() {
            Some("true") => BranchHandle::True,
            Some("false") => BranchHandle::False,
            _ => BranchHandle::Default,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BranchHandle::Default => "default",
            BranchHandle::True => "true",
            BranchHandle::False => "false",
        }
    }
}
