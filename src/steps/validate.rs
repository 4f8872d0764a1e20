/// `validate-input`: required fields and property types

use crate::error::StepError;
use crate::ontology::PropertyType;
use crate::steps::{Step, StepInput, StepOutcome};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

/// Expected shape of one property, as embedded by the planner.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropertySchema {
    #[serde(rename = "type")]
    property_type: PropertyType,
    #[serde(default)]
    enum_values: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateParams {
    #[serde(default)]
    entity_type: Option<String>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    required: Vec<String>,
    #[serde(default)]
    properties: Map<String, Value>,
}

/// Checks `data` (or the whole run inputs when `data` is absent) against a
/// required-field list and per-property types. Unknown fields pass through.
pub struct ValidateInput;

#[async_trait]
impl Step for ValidateInput {
    async fn execute(&self, input: StepInput) -> Result<StepOutcome, StepError> {
        let params: ValidateParams = input.params_as()?;
        let data = match params.data {
            Some(Value::Null) | None => input.inputs.clone(),
            Some(data) => data,
        };
        let record = match &data {
            Value::Object(map) => map,
            Value::Null if params.required.is_empty() => {
                return Ok(StepOutcome::completed(json!({"validatedInputs": {}})))
            }
            other => {
                return Err(StepError::Validation(vec![format!(
                    "expected an object, got {}",
                    other
                )]))
            }
        };

        let mut problems = Vec::new();
        for field in &params.required {
            if record.get(field).map_or(true, Value::is_null) {
                problems.push(format!("'{}' is required", field));
            }
        }

        for (name, schema) in &params.properties {
            let Some(value) = record.get(name).filter(|v| !v.is_null()) else {
                continue;
            };
            let schema: PropertySchema = serde_json::from_value(schema.clone())
                .map_err(|e| StepError::invalid(format!("schema of '{}': {}", name, e)))?;
            if !schema.property_type.accepts(value, &schema.enum_values) {
                problems.push(format!(
                    "'{}' must be {:?}, got {}",
                    name, schema.property_type, value
                ));
            }
        }

        if !problems.is_empty() {
            tracing::debug!(
                "❌ Validation of {} failed: {:?}",
                params.entity_type.as_deref().unwrap_or("input"),
                problems
            );
            return Err(StepError::Validation(problems));
        }

        Ok(StepOutcome::completed(json!({ "validatedInputs": data })))
    }
}
