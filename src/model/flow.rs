use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use super::trigger::TriggerType;

/// A user-defined automation: a graph of nodes and connections plus the
/// settings that govern its execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub category: Option<String>,
    pub nodes: Vec<FlowNode>,
    pub connections: Vec<FlowConnection>,
    /// Flow-scope variables seeded into the resolver at execution start.
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    #[serde(default)]
    pub settings: FlowSettings,
    #[serde(default)]
    pub execution_count: u64,
    #[serde(default)]
    pub success_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Flow {
    /// Create an inactive flow with default settings and an empty graph.
    pub fn new(owner_id: Uuid, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Flow {
            id: Uuid::new_v4(),
            owner_id,
            name: name.into(),
            description: String::new(),
            is_active: false,
            category: None,
            nodes: Vec::new(),
            connections: Vec::new(),
            variables: HashMap::new(),
            settings: FlowSettings::default(),
            execution_count: 0,
            success_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn node(&self, node_id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.id == node_id)
    }
}

/// Per-flow execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSettings {
    pub timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub error_handling: ErrorHandling,
    pub logging_level: LoggingLevel,
}

impl Default for FlowSettings {
    fn default() -> Self {
        FlowSettings {
            timeout_ms: 60_000,
            retry_attempts: 3,
            retry_delay_ms: 1_000,
            error_handling: ErrorHandling::Stop,
            logging_level: LoggingLevel::Info,
        }
    }
}

/// What the engine does once a node exhausts its retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorHandling {
    /// Abort the whole execution; in-flight sibling branches finish first.
    Stop,
    /// Mark the failed branch dead and keep dispatching other ready nodes.
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A unit of work in a flow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowNode {
    /// Unique within the owning flow.
    pub id: String,
    #[serde(flatten)]
    pub config: NodeConfig,
    /// Canvas position. Irrelevant to execution.
    #[serde(default)]
    pub position: Position,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Node type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Trigger,
    Action,
    Condition,
    Delay,
    Data,
    Ai,
    Notification,
}

/// Strongly-typed per-node configuration, tagged by node type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeConfig {
    Trigger {
        trigger_type: TriggerType,
    },
    Action {
        action: ActionKind,
        #[serde(default)]
        params: Value,
    },
    Condition {
        field: String,
        operator: ConditionOperator,
        value: Value,
    },
    Delay {
        duration_ms: u64,
    },
    Data {
        transform: DataTransform,
    },
    Ai {
        prompt: String,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        params: Value,
    },
    Notification {
        channel: String,
        #[serde(default)]
        params: Value,
    },
}

impl NodeConfig {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeConfig::Trigger { .. } => NodeType::Trigger,
            NodeConfig::Action { .. } => NodeType::Action,
            NodeConfig::Condition { .. } => NodeType::Condition,
            NodeConfig::Delay { .. } => NodeType::Delay,
            NodeConfig::Data { .. } => NodeType::Data,
            NodeConfig::Ai { .. } => NodeType::Ai,
            NodeConfig::Notification { .. } => NodeType::Notification,
        }
    }

    pub fn is_trigger(&self) -> bool {
        matches!(self, NodeConfig::Trigger { .. })
    }

    pub fn is_condition(&self) -> bool {
        matches!(self, NodeConfig::Condition { .. })
    }

    /// Whether the configuration carries no usable content. Flagged as a
    /// validation warning, not an error.
    pub fn is_empty(&self) -> bool {
        fn params_empty(v: &Value) -> bool {
            match v {
                Value::Null => true,
                Value::Object(m) => m.is_empty(),
                _ => false,
            }
        }
        match self {
            NodeConfig::Trigger { .. } => false,
            NodeConfig::Action { params, .. } => params_empty(params),
            NodeConfig::Condition { field, .. } => field.is_empty(),
            NodeConfig::Delay { duration_ms } => *duration_ms == 0,
            NodeConfig::Data { .. } => false,
            NodeConfig::Ai { prompt, .. } => prompt.is_empty(),
            NodeConfig::Notification { channel, params } => {
                channel.is_empty() && params_empty(params)
            }
        }
    }
}

/// Effect dispatch key for action-like nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    SendMessage,
    SendEmail,
    ApiCall,
    AiGenerate,
    DataTransform,
    NotificationSend,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::SendMessage => "send_message",
            ActionKind::SendEmail => "send_email",
            ActionKind::ApiCall => "api_call",
            ActionKind::AiGenerate => "ai.generate",
            ActionKind::DataTransform => "data.transform",
            ActionKind::NotificationSend => "notification.send",
        }
    }
}

/// Comparison operator for condition nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    IsEmpty,
    IsNotEmpty,
}

/// Pure JSON transforms performed by data nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DataTransform {
    /// Keep only the listed top-level fields.
    Pick { fields: Vec<String> },
    /// Move a top-level field to a new name.
    Rename { from: String, to: String },
    /// Set a top-level field to a fixed value.
    SetField { field: String, value: Value },
    /// Shallow-merge an object over the input.
    Merge { value: Value },
}

/// A directed edge between two nodes, optionally keyed by a named handle.
/// Condition nodes expose exactly two output handles, `true` and `false`;
/// every other node type exposes a single default handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConnection {
    pub id: String,
    pub source: String,
    #[serde(default)]
    pub source_handle: Option<String>,
    pub target: String,
    #[serde(default)]
    pub target_handle: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn node_config_round_trips_with_type_tag() {
        let node = FlowNode {
            id: "cond_1".into(),
            config: NodeConfig::Condition {
                field: "field".into(),
                operator: ConditionOperator::Equals,
                value: json!("x"),
            },
            position: Position::default(),
        };
        let v = serde_json::to_value(&node).unwrap();
        assert_eq!(v["type"], "condition");
        assert_eq!(v["operator"], "equals");
        let back: FlowNode = serde_json::from_value(v).unwrap();
        assert!(back.config.is_condition());
    }

    #[test]
    fn action_kind_serializes_snake_case() {
        let v = serde_json::to_value(ActionKind::SendMessage).unwrap();
        assert_eq!(v, json!("send_message"));
    }

    #[test]
    fn empty_config_detection() {
        let empty = NodeConfig::Action {
            action: ActionKind::SendMessage,
            params: json!({}),
        };
        assert!(empty.is_empty());
        let full = NodeConfig::Action {
            action: ActionKind::SendMessage,
            params: json!({"text": "hi"}),
        };
        assert!(!full.is_empty());
    }

    #[test]
    fn default_settings_match_documented_defaults() {
        let s = FlowSettings::default();
        assert_eq!(s.timeout_ms, 60_000);
        assert_eq!(s.retry_attempts, 3);
        assert_eq!(s.error_handling, ErrorHandling::Stop);
    }
}
