pub mod condition;
pub mod context;
pub mod engine;
pub mod event_bus;
pub mod recorder;
pub mod variables;
