use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Visibility tier of a variable. Lookup order during execution is
/// execution → flow → global; first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableScope {
    Global,
    Flow,
    Execution,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowVariable {
    pub scope: VariableScope,
    /// Flow id for flow scope, execution id for execution scope.
    pub scope_id: Option<Uuid>,
    pub name: String,
    pub value: Value,
    /// Secret values resolve normally but never appear verbatim in step logs.
    pub is_secret: bool,
}
