/// Relationship and cross-entity graphs

use crate::ontology::{EntityDefinition, Ontology, RelationDefinition};
use crate::planner::{generated, slug, GraphMeta, PlanError};
use crate::steps::ActionKind;
use crate::workflow::template::ParamExpr;
use crate::workflow::types::{Edge, StepSpec, WorkflowGraph};
use serde_json::json;

/// `relate-{from}-{relation}`: link two existing entities.
///
/// Returns `Ok(None)` when the target entity is inactive.
pub fn relationship_graph(
    ontology: &Ontology,
    from: &EntityDefinition,
    relation: &RelationDefinition,
) -> Result<Option<WorkflowGraph>, PlanError> {
    let to = ontology
        .entity(&relation.to_entity_id)
        .ok_or_else(|| PlanError::UnknownEntity {
            owner: format!("relation '{}'", relation.name),
            entity_id: relation.to_entity_id.clone(),
        })?;
    if !to.is_active {
        return Ok(None);
    }

    let name = format!("relate-{}-{}", slug(&from.name)?, slug(&relation.name)?);
    let relation_label = relation.display_name.as_deref().unwrap_or(&relation.name);

    let steps = vec![
        StepSpec::validation("validate-relationship-input", "Both endpoint ids are required")
            .with_param("data", ParamExpr::input(""))
            .with_param("required", ParamExpr::literal(json!(["fromId", "toId"])))
            .at(0.0, 100.0),
        StepSpec::action(
            "find-from-entity",
            &format!("Find the {}", from.label()),
            ActionKind::FindEntities,
        )
        .with_param("entityType", ParamExpr::literal(from.name.as_str()))
        .with_param("id", ParamExpr::input("fromId"))
        .at(250.0, 0.0),
        StepSpec::action(
            "find-to-entity",
            &format!("Find the {}", to.label()),
            ActionKind::FindEntities,
        )
        .with_param("entityType", ParamExpr::literal(to.name.as_str()))
        .with_param("id", ParamExpr::input("toId"))
        .at(250.0, 200.0),
        StepSpec::action(
            "create-relationship",
            &format!("Create the {} relationship", relation_label),
            ActionKind::CreateRelationship,
        )
        .with_param("fromEntityId", ParamExpr::step_output("find-from-entity", "entityId"))
        .with_param("toEntityId", ParamExpr::step_output("find-to-entity", "entityId"))
        .with_param("relationshipType", ParamExpr::literal(relation.name.as_str()))
        .with_param("properties", ParamExpr::input("properties"))
        .at(500.0, 100.0),
    ];
    let edges = vec![
        Edge::always("validate-relationship-input", "find-from-entity"),
        Edge::always("validate-relationship-input", "find-to-entity"),
        Edge::always("find-from-entity", "create-relationship"),
        Edge::always("find-to-entity", "create-relationship"),
    ];

    Ok(Some(generated(
        GraphMeta {
            name,
            display_name: format!("Relate {} {}", from.label(), relation_label),
            description: format!(
                "Create a {} relationship from a {} to a {}",
                relation.name,
                from.label(),
                to.label()
            ),
            entities: vec![from.id.clone(), to.id.clone()],
            relations: vec![relation.id.clone()],
        },
        steps,
        Some(edges),
    )))
}

/// Foreign-key field written onto the related entity, e.g. `salesOrderId`.
pub(crate) fn reference_field(entity_name: &str) -> String {
    let mut field = String::new();
    let mut upper_next = false;
    for c in entity_name.chars() {
        if !c.is_alphanumeric() {
            upper_next = !field.is_empty();
            continue;
        }
        if field.is_empty() {
            field.extend(c.to_lowercase());
        } else if upper_next {
            field.extend(c.to_uppercase());
        } else {
            field.push(c);
        }
        upper_next = false;
    }
    field.push_str("Id");
    field
}

/// `create-{main}-with-{related}` for every pair of active entities joined
/// by at least one active relation, in either direction.
///
/// The first such relation decides orientation: its `from` side is the main
/// entity and its name becomes the relationship type.
pub fn cross_entity_graphs(ontology: &Ontology) -> Vec<(String, Result<WorkflowGraph, PlanError>)> {
    let entities: Vec<&EntityDefinition> = ontology.active_entities().collect();
    let mut out = Vec::new();

    for (i, first) in entities.iter().enumerate() {
        for second in &entities[i + 1..] {
            let relation = ontology.active_relations().find(|r| {
                (r.from_entity_id == first.id && r.to_entity_id == second.id)
                    || (r.from_entity_id == second.id && r.to_entity_id == first.id)
            });
            let Some(relation) = relation else { continue };

            let (main, related) = if relation.from_entity_id == first.id {
                (*first, *second)
            } else {
                (*second, *first)
            };
            let unit = format!("entity pair '{}'/'{}'", main.name, related.name);
            out.push((unit, cross_entity_graph(main, related, relation)));
        }
    }
    out
}

fn cross_entity_graph(
    main: &EntityDefinition,
    related: &EntityDefinition,
    relation: &RelationDefinition,
) -> Result<WorkflowGraph, PlanError> {
    let name = format!("create-{}-with-{}", slug(&main.name)?, slug(&related.name)?);

    let steps = vec![
        StepSpec::validation("validate-input", "Both entity payloads are required")
            .with_param("data", ParamExpr::input(""))
            .with_param(
                "required",
                ParamExpr::literal(json!(["mainEntityData", "relatedEntityData"])),
            )
            .at(0.0, 100.0),
        StepSpec::action(
            "create-main-entity",
            &format!("Create the {}", main.label()),
            ActionKind::CreateEntity,
        )
        .with_param("entityType", ParamExpr::literal(main.name.as_str()))
        .with_param("entityData", ParamExpr::input("mainEntityData"))
        .at(250.0, 0.0),
        StepSpec::action(
            "create-related-entity",
            &format!("Create the {}", related.label()),
            ActionKind::CreateEntity,
        )
        .with_param("entityType", ParamExpr::literal(related.name.as_str()))
        .with_param("entityData", ParamExpr::input("relatedEntityData"))
        .at(250.0, 200.0),
        StepSpec::action(
            "link-entities",
            &format!("Link the {} to the {}", related.label(), main.label()),
            ActionKind::CreateRelationship,
        )
        .with_param("fromEntityId", ParamExpr::step_output("create-main-entity", "entityId"))
        .with_param("toEntityId", ParamExpr::step_output("create-related-entity", "entityId"))
        .with_param("relationshipType", ParamExpr::literal(relation.name.as_str()))
        .with_param(
            "toEntityPatch",
            ParamExpr::object([(
                reference_field(&main.name),
                ParamExpr::step_output("create-main-entity", "entityId"),
            )]),
        )
        .at(500.0, 100.0),
    ];
    let edges = vec![
        Edge::always("validate-input", "create-main-entity"),
        Edge::always("validate-input", "create-related-entity"),
        Edge::always("create-main-entity", "link-entities"),
        Edge::always("create-related-entity", "link-entities"),
    ];

    Ok(generated(
        GraphMeta {
            name,
            display_name: format!("Create {} with {}", main.label(), related.label()),
            description: format!(
                "Create a {} and a related {} and link them via {}",
                main.label(),
                related.label(),
                relation.name
            ),
            entities: vec![main.id.clone(), related.id.clone()],
            relations: vec![relation.id.clone()],
        },
        steps,
        Some(edges),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::RelationType;
    use serde_json::Value;

    fn entity(id: &str, name: &str) -> EntityDefinition {
        EntityDefinition {
            id: id.into(),
            name: name.into(),
            display_name: None,
            description: None,
            properties: Vec::new(),
            is_active: true,
        }
    }

    fn relation(from: &str, to: &str) -> RelationDefinition {
        RelationDefinition {
            id: "r1".into(),
            name: "has_orders".into(),
            display_name: None,
            relation_type: RelationType::OneToMany,
            from_cardinality: None,
            to_cardinality: None,
            from_entity_id: from.into(),
            to_entity_id: to.into(),
            is_active: true,
        }
    }

    #[test]
    fn reference_field_is_lower_camel() {
        assert_eq!(reference_field("Customer"), "customerId");
        assert_eq!(reference_field("Sales Order"), "salesOrderId");
    }

    #[test]
    fn relationship_graph_finds_both_ends_in_parallel() {
        let ontology = Ontology {
            entities: vec![entity("c", "Customer"), entity("o", "Order")],
            relations: vec![relation("c", "o")],
            rules: Vec::new(),
        };
        let graph = relationship_graph(&ontology, &ontology.entities[0], &ontology.relations[0])
            .unwrap()
            .unwrap();
        assert_eq!(graph.name, "relate-customer-has_orders");

        let validated = graph.validate().unwrap();
        assert_eq!(validated.outgoing(0).len(), 2);
    }

    #[test]
    fn pair_orientation_follows_relation_direction() {
        // Order is declared first but the relation points Customer -> Order.
        let ontology = Ontology {
            entities: vec![entity("o", "Order"), entity("c", "Customer")],
            relations: vec![relation("c", "o")],
            rules: Vec::new(),
        };
        let graphs = cross_entity_graphs(&ontology);
        assert_eq!(graphs.len(), 1);
        let graph = graphs[0].1.as_ref().unwrap();
        assert_eq!(graph.name, "create-customer-with-order");

        let link = graph.step("link-entities").unwrap();
        let patch: Value = link.params["toEntityPatch"].clone().into();
        assert_eq!(patch, json!({"customerId": "{{create-main-entity.output.entityId}}"}));
    }

    #[test]
    fn inactive_target_is_skipped() {
        let mut order = entity("o", "Order");
        order.is_active = false;
        let ontology = Ontology {
            entities: vec![entity("c", "Customer"), order],
            relations: vec![relation("c", "o")],
            rules: Vec::new(),
        };
        assert!(relationship_graph(&ontology, &ontology.entities[0], &ontology.relations[0])
            .unwrap()
            .is_none());
        assert!(cross_entity_graphs(&ontology).is_empty());
    }
}
