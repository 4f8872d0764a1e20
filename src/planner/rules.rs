/// Rule graphs: evaluate a rule's condition, apply its action when it holds

use crate::ontology::{Ontology, RuleDefinition, RuleScope};
use crate::planner::{generated, slug, GraphMeta, PlanError};
use crate::steps::ActionKind;
use crate::workflow::template::ParamExpr;
use crate::workflow::types::{Edge, StepSpec, WorkflowGraph, END};
use serde_json::Value;

const CHECK: &str = "check-rule-condition";
const APPLY: &str = "apply-rule-action";

/// Build the graph of one rule.
///
/// Returns `Ok(None)` when the rule's entity or relation is inactive.
pub fn rule_graph(ontology: &Ontology, rule: &RuleDefinition) -> Result<Option<WorkflowGraph>, PlanError> {
    let (owner, entities, relations) = match rule.scope {
        RuleScope::Entity | RuleScope::Property => {
            let entity_id = rule
                .entity_id
                .as_deref()
                .ok_or_else(|| PlanError::MissingTarget(rule.name.clone()))?;
            let entity = ontology
                .entity(entity_id)
                .ok_or_else(|| PlanError::UnknownEntity {
                    owner: format!("rule '{}'", rule.name),
                    entity_id: entity_id.to_string(),
                })?;
            if !entity.is_active {
                return Ok(None);
            }
            (slug(&entity.name)?, vec![entity.id.clone()], Vec::new())
        }
        RuleScope::Relation => {
            let relation_id = rule
                .relation_id
                .as_deref()
                .ok_or_else(|| PlanError::MissingTarget(rule.name.clone()))?;
            let relation = ontology
                .relation(relation_id)
                .ok_or_else(|| PlanError::UnknownRelation {
                    rule: rule.name.clone(),
                    relation_id: relation_id.to_string(),
                })?;
            if !relation.is_active {
                return Ok(None);
            }
            (
                slug(&relation.name)?,
                vec![relation.from_entity_id.clone(), relation.to_entity_id.clone()],
                vec![relation.id.clone()],
            )
        }
        RuleScope::Global => ("global".to_string(), Vec::new(), Vec::new()),
    };

    let name = format!("rule-{}-{}", owner, slug(&rule.name)?);
    let label = rule.display_name.as_deref().unwrap_or(&rule.name);

    let condition = match rule.effective_condition() {
        Value::Null => Value::Bool(true),
        condition => condition,
    };

    let steps = vec![
        StepSpec::condition(CHECK, &format!("Evaluate the condition of {}", label), condition)
            .at(0.0, 100.0),
        StepSpec::action(APPLY, &format!("Apply the action of {}", label), ActionKind::ApplyRules)
            .with_param("ruleId", ParamExpr::literal(rule.id.as_str()))
            .with_param("entityId", ParamExpr::input("entityId"))
            .with_param("action", ParamExpr::literal(rule.action.clone()))
            .at(250.0, 0.0),
    ];
    let edges = vec![
        Edge::when(CHECK, APPLY, &format!("{}.output.met == true", CHECK)),
        Edge::always(CHECK, END),
    ];

    Ok(Some(generated(
        GraphMeta {
            name,
            display_name: format!("Rule: {}", label),
            description: format!("{:?} rule {}", rule.rule_type, label),
            entities,
            relations,
        },
        steps,
        Some(edges),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::{EntityDefinition, RuleType};
    use serde_json::json;

    fn ontology() -> Ontology {
        Ontology {
            entities: vec![EntityDefinition {
                id: "e1".into(),
                name: "Customer".into(),
                display_name: None,
                description: None,
                properties: Vec::new(),
                is_active: true,
            }],
            relations: Vec::new(),
            rules: Vec::new(),
        }
    }

    fn rule(scope: RuleScope, entity_id: Option<&str>) -> RuleDefinition {
        RuleDefinition {
            id: "rule-1".into(),
            name: "vip".into(),
            display_name: None,
            rule_type: RuleType::BusinessLogic,
            scope,
            entity_id: entity_id.map(str::to_string),
            relation_id: None,
            condition: json!({"field": "inputs.total", "operator": ">", "value": 1000}),
            action: json!({"set": {"tier": "vip"}}),
            expression: None,
            is_active: true,
        }
    }

    #[test]
    fn entity_rule_is_named_after_entity() {
        let graph = rule_graph(&ontology(), &rule(RuleScope::Entity, Some("e1")))
            .unwrap()
            .unwrap();
        assert_eq!(graph.name, "rule-customer-vip");
        assert_eq!(graph.entities, vec!["e1"]);
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn global_rule_without_condition_always_applies() {
        let mut global = rule(RuleScope::Global, None);
        global.condition = Value::Null;
        let graph = rule_graph(&ontology(), &global).unwrap().unwrap();
        assert_eq!(graph.name, "rule-global-vip");
        assert_eq!(graph.step(CHECK).unwrap().condition, Some(json!(true)));
    }

    #[test]
    fn unknown_entity_is_an_error() {
        let err = rule_graph(&ontology(), &rule(RuleScope::Entity, Some("nope"))).unwrap_err();
        assert!(matches!(err, PlanError::UnknownEntity { .. }));

        let err = rule_graph(&ontology(), &rule(RuleScope::Property, None)).unwrap_err();
        assert!(matches!(err, PlanError::MissingTarget(_)));
    }
}
