//! Layered variable scopes: execution → flow → global, first match wins.

use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use crate::model::{FlowVariable, VariableScope};

pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Shared variable store. Global and flow scopes are read-mostly during a
/// run; execution-scope entries are write-once-per-key (last write wins
/// within that execution) and are dropped once the execution is terminal.
#[derive(Debug, Default)]
pub struct VariableStore {
    global: DashMap<String, FlowVariable>,
    flow: DashMap<(Uuid, String), FlowVariable>,
    execution: DashMap<(Uuid, String), FlowVariable>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a variable. Idempotent by key within a scope.
    pub fn set(
        &self,
        scope: VariableScope,
        scope_id: Option<Uuid>,
        name: impl Into<String>,
        value: Value,
        is_secret: bool,
    ) {
        let name = name.into();
        let variable = FlowVariable {
            scope,
            scope_id,
            name: name.clone(),
            value,
            is_secret,
        };
        match scope {
            VariableScope::Global => {
                self.global.insert(name, variable);
            }
            VariableScope::Flow => {
                let flow_id = scope_id.unwrap_or(Uuid::nil());
                self.flow.insert((flow_id, name), variable);
            }
            VariableScope::Execution => {
                let execution_id = scope_id.unwrap_or(Uuid::nil());
                self.execution.insert((execution_id, name), variable);
            }
        }
    }

    /// Resolve a key, searching execution, then flow, then global scope.
    pub fn resolve(&self, name: &str, flow_id: Uuid, execution_id: Uuid) -> Option<Value> {
        self.resolve_variable(name, flow_id, execution_id)
            .map(|v| v.value)
    }

    pub fn resolve_variable(
        &self,
        name: &str,
        flow_id: Uuid,
        execution_id: Uuid,
    ) -> Option<FlowVariable> {
        if let Some(v) = self.execution.get(&(execution_id, name.to_string())) {
            return Some(v.clone());
        }
        if let Some(v) = self.flow.get(&(flow_id, name.to_string())) {
            return Some(v.clone());
        }
        self.global.get(name).map(|v| v.clone())
    }

    /// Drop all execution-scope variables for a terminal execution so they
    /// never leak into subsequent runs of the same flow.
    pub fn clear_execution(&self, execution_id: Uuid) {
        self.execution.retain(|(id, _), _| *id != execution_id);
    }

    /// Every variable visible to an execution, merged with scope precedence
    /// (global lowest, execution highest). Exposed to nodes as the `vars`
    /// object of their input.
    pub fn visible(&self, flow_id: Uuid, execution_id: Uuid) -> serde_json::Map<String, Value> {
        let mut merged = serde_json::Map::new();
        for entry in self.global.iter() {
            merged.insert(entry.name.clone(), entry.value.clone());
        }
        for entry in self.flow.iter() {
            if entry.key().0 == flow_id {
                merged.insert(entry.name.clone(), entry.value.clone());
            }
        }
        for entry in self.execution.iter() {
            if entry.key().0 == execution_id {
                merged.insert(entry.name.clone(), entry.value.clone());
            }
        }
        merged
    }

    /// String forms of every secret value visible to this execution.
    pub fn secret_values(&self, flow_id: Uuid, execution_id: Uuid) -> Vec<String> {
        let mut secrets = Vec::new();
        let mut push = |v: &FlowVariable| {
            if v.is_secret {
                match &v.value {
                    Value::String(s) => secrets.push(s.clone()),
                    other => secrets.push(other.to_string()),
                }
            }
        };
        for entry in self.global.iter() {
            push(&entry);
        }
        for entry in self.flow.iter() {
            if entry.key().0 == flow_id {
                push(&entry);
            }
        }
        for entry in self.execution.iter() {
            if entry.key().0 == execution_id {
                push(&entry);
            }
        }
        secrets
    }

    /// Replace secret values inside a JSON value with the redaction marker.
    /// Applied to step snapshots and logs before they are persisted.
    pub fn redact(&self, value: &Value, flow_id: Uuid, execution_id: Uuid) -> Value {
        let secrets = self.secret_values(flow_id, execution_id);
        if secrets.is_empty() {
            return value.clone();
        }
        redact_value(value, &secrets)
    }
}

fn redact_value(value: &Value, secrets: &[String]) -> Value {
    match value {
        Value::String(s) => {
            let mut out = s.clone();
            for secret in secrets {
                if !secret.is_empty() && out.contains(secret.as_str()) {
                    out = out.replace(secret.as_str(), REDACTION_MARKER);
                }
            }
            Value::String(out)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(|v| redact_value(v, secrets)).collect()),
        Value::Object(obj) => Value::Object(
            obj.iter()
                .map(|(k, v)| (k.clone(), redact_value(v, secrets)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Substitute `{{var:name}}` placeholders in string values with resolved
/// variables. Unresolvable placeholders are left as-is.
pub fn resolve_placeholders(
    value: &Value,
    store: &VariableStore,
    flow_id: Uuid,
    execution_id: Uuid,
) -> Value {
    match value {
        Value::String(s) => Value::String(substitute(s, store, flow_id, execution_id)),
        Value::Array(arr) => Value::Array(
            arr.iter()
                .map(|v| resolve_placeholders(v, store, flow_id, execution_id))
                .collect(),
        ),
        Value::Object(obj) => Value::Object(
            obj.iter()
                .map(|(k, v)| {
                    (
                        k.clone(),
                        resolve_placeholders(v, store, flow_id, execution_id),
                    )
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

fn substitute(input: &str, store: &VariableStore, flow_id: Uuid, execution_id: Uuid) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("{{var:") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 6..];
        match after.find("}}") {
            Some(end) => {
                let name = after[..end].trim();
                match store.resolve(name, flow_id, execution_id) {
                    Some(Value::String(s)) => out.push_str(&s),
                    Some(other) => out.push_str(&other.to_string()),
                    None => {
                        out.push_str(&rest[start..start + 6 + end + 2]);
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
