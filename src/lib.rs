//! flowrun: a DAG-based flow automation engine.
//!
//! A flow is a directed acyclic graph of typed nodes (triggers, actions,
//! conditions, delays, data transforms) connected by handle-keyed edges.
//! The trigger dispatcher turns external events (webhooks, cron schedules,
//! application events) into executions; the execution engine walks the
//! graph with per-node retry, per-execution timeout and a totally ordered
//! step audit log.
//!
//! ```no_run
//! use std::sync::Arc;
//! use flowrun::core::context::RuntimeContext;
//! use flowrun::core::engine::{EngineConfig, ExecutionEngine};
//! use flowrun::core::variables::VariableStore;
//! use flowrun::effects::EffectRegistry;
//! use flowrun::model::TriggerType;
//! use flowrun::store::MemoryStore;
//!
//! # async fn demo(flow_id: uuid::Uuid) -> flowrun::error::FlowResult<()> {
//! let engine = ExecutionEngine::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(EffectRegistry::new()),
//!     Arc::new(VariableStore::new()),
//!     Arc::new(RuntimeContext::default()),
//!     EngineConfig::default(),
//! );
//! let execution = engine
//!     .run(flow_id, TriggerType::Webhook, serde_json::json!({"hello": "world"}))
//!     .await?;
//! println!("finished: {:?}", execution.status);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod effects;
pub mod error;
pub mod graph;
pub mod model;
pub mod stats;
pub mod store;
pub mod trigger;

pub use crate::core::engine::{EngineConfig, ExecutionEngine, ExecutionHandle};
pub use crate::error::{FlowError, FlowResult};
pub use crate::graph::validator::{validate, ValidationReport};
pub use crate::model::{Flow, FlowExecution, FlowExecutionStep, FlowTrigger};
pub use crate::trigger::TriggerDispatcher;
