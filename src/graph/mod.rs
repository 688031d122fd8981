//! Immutable graph model built from a flow's nodes and connections.

mod builder;
mod types;
pub mod validator;

pub use builder::FlowGraph;
pub use types::{BranchHandle, GraphEdge, GraphNode};
