//! Error types for the flow engine.

mod flow_error;
mod node_error;

pub use flow_error::{FlowError, FlowResult, GraphError};
pub use node_error::NodeError;
