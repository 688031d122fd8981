use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Trigger kind. Each kind maps to one entry protocol on the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Webhook,
    Schedule,
    Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

/// Type-specific trigger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "trigger_type", rename_all = "lowercase")]
pub enum TriggerConfig {
    Webhook {
        method: HttpMethod,
        path: String,
        #[serde(default)]
        webhook_secret: Option<String>,
    },
    Schedule {
        cron_expression: String,
        timezone: String,
    },
    Event {
        channel: String,
        event_name: String,
        #[serde(default)]
        filter: Option<Value>,
    },
}

impl TriggerConfig {
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            TriggerConfig::Webhook { .. } => TriggerType::Webhook,
            TriggerConfig::Schedule { .. } => TriggerType::Schedule,
            TriggerConfig::Event { .. } => TriggerType::Event,
        }
    }
}

/// A configured event source that starts executions of its flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowTrigger {
    pub id: Uuid,
    pub flow_id: Uuid,
    #[serde(flatten)]
    pub config: TriggerConfig,
    pub is_active: bool,
    /// Next due time; schedule triggers only.
    pub next_run_at: Option<DateTime<Utc>>,
    pub trigger_count: u64,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl FlowTrigger {
    pub fn new(flow_id: Uuid, config: TriggerConfig) -> Self {
        FlowTrigger {
            id: Uuid::new_v4(),
            flow_id,
            config,
            is_active: true,
            next_run_at: None,
            trigger_count: 0,
            last_triggered_at: None,
        }
    }

    pub fn trigger_type(&self) -> TriggerType {
        self.config.trigger_type()
    }
}
