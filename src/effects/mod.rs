//! Effect executors: the external operations nodes perform.
//!
//! The engine treats every effect as a black box behind [`EffectExecutor`]
//! and only enforces the timeout/retry contract around the call. Concrete
//! connectors (messaging, email, HTTP, AI) are collaborators registered by
//! the embedding application; the only built-in is the pure
//! [`DataTransformExecutor`].

mod data_transform;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::context::RuntimeContext;
use crate::error::NodeError;
use crate::model::ActionKind;

pub use data_transform::DataTransformExecutor;

/// Per-call execution context handed to effect implementations.
#[derive(Clone)]
pub struct EffectContext {
    pub execution_id: Uuid,
    pub flow_id: Uuid,
    pub node_id: String,
    pub ctx: Arc<RuntimeContext>,
}

/// One external operation. `config` is the node's (placeholder-resolved)
/// configuration, `input` the merged node input.
#[async_trait]
pub trait EffectExecutor: Send + Sync {
    async fn execute(
        &self,
        config: &Value,
        input: &Value,
        ctx: &EffectContext,
    ) -> Result<Value, NodeError>;
}

/// Dispatch table mapping action kinds to effect implementations.
pub struct EffectRegistry {
    executors: HashMap<ActionKind, Box<dyn EffectExecutor>>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        let mut registry = EffectRegistry {
            executors: HashMap::new(),
        };
        registry.register(ActionKind::DataTransform, Box::new(DataTransformExecutor));
        registry
    }

    pub fn register(&mut self, kind: ActionKind, executor: Box<dyn EffectExecutor>) {
        self.executors.insert(kind, executor);
    }

    pub fn get(&self, kind: ActionKind) -> Option<&dyn EffectExecutor> {
        self.executors.get(&kind).map(|e| e.as_ref())
    }
}

impl Default for EffectRegistry {
    fn default() -> Self {
        Self::new()
    }
}
