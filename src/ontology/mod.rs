/// Ontology model
///
/// The user-defined schema the planner reads: entity types and their
/// properties, relations between entity types, and business rules. Shapes
/// mirror the ontology API's camelCase JSON so a full ontology export can be
/// posted to the planner unchanged.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn yes() -> bool {
    true
}

/// Complete ontology snapshot handed to the planner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ontology {
    #[serde(default)]
    pub entities: Vec<EntityDefinition>,
    #[serde(default)]
    pub relations: Vec<RelationDefinition>,
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDefinition {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub properties: Vec<PropertyDefinition>,
    #[serde(default = "yes")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropertyType {
    String,
    Number,
    Boolean,
    Date,
    Datetime,
    Enum,
    Reference,
    Array,
    Object,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default = "yes")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Cardinality {
    One,
    ZeroOrOne,
    Many,
    ZeroOrMany,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationDefinition {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub relation_type: RelationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_cardinality: Option<Cardinality>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_cardinality: Option<Cardinality>,
    pub from_entity_id: String,
    pub to_entity_id: String,
    #[serde(default = "yes")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleType {
    Validation,
    Computation,
    Trigger,
    Constraint,
    BusinessLogic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleScope {
    Entity,
    Property,
    Relation,
    Global,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDefinition {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub scope: RuleScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Target relation of a RELATION-scoped rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_id: Option<String>,
    #[serde(default)]
    pub condition: Value,
    #[serde(default)]
    pub action: Value,
    /// Textual condition used when `condition` is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default = "yes")]
    pub is_active: bool,
}

impl Ontology {
    pub fn entity(&self, id: &str) -> Option<&EntityDefinition> {
        self.entities.iter().find(|e| e.id == id)
    }

    pub fn relation(&self, id: &str) -> Option<&RelationDefinition> {
        self.relations.iter().find(|r| r.id == id)
    }

    pub fn active_entities(&self) -> impl Iterator<Item = &EntityDefinition> {
        self.entities.iter().filter(|e| e.is_active)
    }

    pub fn active_relations(&self) -> impl Iterator<Item = &RelationDefinition> {
        self.relations.iter().filter(|r| r.is_active)
    }

    pub fn active_rules(&self) -> impl Iterator<Item = &RuleDefinition> {
        self.rules.iter().filter(|r| r.is_active)
    }
}

impl EntityDefinition {
    /// Human label, falling back to the name.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    pub fn active_properties(&self) -> impl Iterator<Item = &PropertyDefinition> {
        self.properties.iter().filter(|p| p.is_active)
    }
}

impl RuleDefinition {
    /// Condition to evaluate: the structured condition, else the textual
    /// expression, else `null` (always holds).
    pub fn effective_condition(&self) -> Value {
        match (&self.condition, &self.expression) {
            (Value::Null, Some(expr)) => Value::String(expr.clone()),
            (condition, _) => condition.clone(),
        }
    }
}

impl PropertyType {
    /// Whether a JSON value is acceptable for this property type.
    pub fn accepts(&self, value: &Value, enum_values: &[String]) -> bool {
        match self {
            PropertyType::String => value.is_string(),
            PropertyType::Number => value.is_number(),
            PropertyType::Boolean => value.is_boolean(),
            PropertyType::Date => value
                .as_str()
                .is_some_and(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()),
            PropertyType::Datetime => value
                .as_str()
                .is_some_and(|s| DateTime::parse_from_rfc3339(s).is_ok()),
            PropertyType::Enum => value
                .as_str()
                .is_some_and(|s| enum_values.is_empty() || enum_values.iter().any(|v| v == s)),
            PropertyType::Reference => value.is_string() || value.is_number(),
            PropertyType::Array => value.is_array(),
            PropertyType::Object => value.is_object(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_ontology_export() {
        let ontology: Ontology = serde_json::from_value(json!({
            "entities": [{
                "id": "e1",
                "name": "Customer",
                "properties": [
                    {"name": "name", "type": "STRING", "required": true},
                    {"name": "tier", "type": "ENUM", "enumValues": ["gold", "silver"]}
                ]
            }],
            "relations": [{
                "id": "r1", "name": "has_orders", "relationType": "ONE_TO_MANY",
                "fromEntityId": "e1", "toEntityId": "e2", "fromCardinality": "ONE"
            }],
            "rules": [{
                "id": "u1", "name": "vip", "type": "BUSINESS_LOGIC", "scope": "ENTITY",
                "entityId": "e1", "expression": "inputs.total > 1000"
            }]
        }))
        .unwrap();

        assert!(ontology.entities[0].is_active);
        assert_eq!(ontology.entities[0].properties[1].property_type, PropertyType::Enum);
        assert_eq!(ontology.relations[0].relation_type, RelationType::OneToMany);
        assert_eq!(ontology.rules[0].effective_condition(), json!("inputs.total > 1000"));
    }

    #[test]
    fn property_types_check_values() {
        let tiers = vec!["gold".to_string()];
        assert!(PropertyType::Enum.accepts(&json!("gold"), &tiers));
        assert!(!PropertyType::Enum.accepts(&json!("bronze"), &tiers));
        assert!(PropertyType::Date.accepts(&json!("2024-02-29"), &[]));
        assert!(!PropertyType::Date.accepts(&json!("2023-02-29"), &[]));
        assert!(PropertyType::Datetime.accepts(&json!("2024-01-01T10:00:00Z"), &[]));
        assert!(!PropertyType::Number.accepts(&json!("12"), &[]));
    }
}
