use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::NodeError;
use crate::model::DataTransform;

use super::{EffectContext, EffectExecutor};

/// Built-in pure JSON transform. The only effect with no external
/// collaborator.
pub struct DataTransformExecutor;

#[async_trait]
impl EffectExecutor for DataTransformExecutor {
    async fn execute(
        &self,
        config: &Value,
        input: &Value,
        _ctx: &EffectContext,
    ) -> Result<Value, NodeError> {
        let transform: DataTransform = serde_json::from_value(config.clone())?;
        Ok(apply(&transform, input))
    }
}

fn apply(transform: &DataTransform, input: &Value) -> Value {
    let mut object = match input {
        Value::Object(obj) => obj.clone(),
        _ => Map::new(),
    };
    match transform {
        DataTransform::Pick { fields } => {
            object.retain(|k, _| fields.iter().any(|f| f == k));
        }
        DataTransform::Rename { from, to } => {
            if let Some(v) = object.remove(from) {
                object.insert(to.clone(), v);
            }
        }
        DataTransform::SetField { field, value } => {
            object.insert(field.clone(), value.clone());
        }
        DataTransform::Merge { value } => {
            if let Value::Object(overlay) = value {
                for (k, v) in overlay {
                    object.insert(k.clone(), v.clone());
                }
            }
        }
    }
    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pick_keeps_only_listed_fields() {
        let out = apply(
            &DataTransform::Pick {
                fields: vec!["a".into()],
            },
            &json!({"a": 1, "b": 2}),
        );
        assert_eq!(out, json!({"a": 1}));
    }

    #[test]
    fn rename_moves_field() {
        let out = apply(
            &DataTransform::Rename {
                from: "a".into(),
                to: "b".into(),
            },
            &json!({"a": 1}),
        );
        assert_eq!(out, json!({"b": 1}));
    }

    #[test]
    fn merge_overlays_fields() {
        let out = apply(
            &DataTransform::Merge {
                value: json!({"b": 2}),
            },
            &json!({"a": 1}),
        );
        assert_eq!(out, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn set_field_overwrites() {
        let out = apply(
            &DataTransform::SetField {
                field: "a".into(),
                value: json!("x"),
            },
            &json!({"a": 1}),
        );
        assert_eq!(out, json!({"a": "x"}));
    }
}
