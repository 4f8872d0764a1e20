/// CRUD graphs: create, read, update, delete, search per entity

use crate::ontology::EntityDefinition;
use crate::planner::{generated, slug, GraphMeta, PlanError};
use crate::steps::ActionKind;
use crate::workflow::template::ParamExpr;
use crate::workflow::types::{StepSpec, WorkflowGraph};
use serde_json::{json, Map, Value};

/// Required field names and per-property type schema for `validate-input`.
pub(crate) fn validation_schema(entity: &EntityDefinition) -> (Vec<String>, Value) {
    let mut required = Vec::new();
    let mut properties = Map::new();
    for property in entity.active_properties() {
        if property.required {
            required.push(property.name.clone());
        }
        let mut schema = json!({ "type": property.property_type });
        if !property.enum_values.is_empty() {
            schema["enumValues"] = json!(property.enum_values);
        }
        properties.insert(property.name.clone(), schema);
    }
    (required, Value::Object(properties))
}

fn validate_step(entity: &EntityDefinition, required: Vec<String>, properties: &Value) -> StepSpec {
    StepSpec::validation(
        "validate-input",
        &format!("Validate {} input data", entity.label()),
    )
    .with_param("entityType", ParamExpr::literal(entity.name.as_str()))
    .with_param("data", ParamExpr::input("data"))
    .with_param("required", ParamExpr::literal(json!(required)))
    .with_param("properties", ParamExpr::literal(properties.clone()))
}

fn find_by_id(id: &str, entity: &EntityDefinition, description: &str) -> StepSpec {
    StepSpec::action(id, description, ActionKind::FindEntities)
        .with_param("entityType", ParamExpr::literal(entity.name.as_str()))
        .with_param("id", ParamExpr::input("id"))
}

fn meta(name: String, display_name: String, description: String, entity: &EntityDefinition) -> GraphMeta {
    GraphMeta {
        name,
        display_name,
        description,
        entities: vec![entity.id.clone()],
        relations: Vec::new(),
    }
}

/// The five CRUD graphs of one entity.
pub fn entity_graphs(entity: &EntityDefinition) -> Result<Vec<WorkflowGraph>, PlanError> {
    let key = slug(&entity.name)?;
    let label = entity.label();
    let (required, properties) = validation_schema(entity);

    let create = generated(
        meta(
            format!("create-{}", key),
            format!("Create {}", label),
            format!("Validate and create a new {} in the knowledge graph", label),
            entity,
        ),
        vec![
            validate_step(entity, required, &properties),
            StepSpec::action(
                "create-entity",
                &format!("Create the {} entity", label),
                ActionKind::CreateEntity,
            )
            .with_param("entityType", ParamExpr::literal(entity.name.as_str()))
            .with_param("entityData", ParamExpr::input("data")),
            StepSpec::action(
                "update-knowledge-graph",
                "Record the new node in the knowledge graph",
                ActionKind::UpdateKnowledgeGraph,
            )
            .with_param("nodeId", ParamExpr::step_output("create-entity", "entityId"))
            .with_param("nodeData", ParamExpr::input("data")),
        ],
        None,
    );

    let read = generated(
        meta(
            format!("read-{}", key),
            format!("Read {}", label),
            format!("Look up a {} by id or by property filter", label),
            entity,
        ),
        vec![
            find_by_id("find-entity", entity, &format!("Find the {}", label))
                .with_param("query", ParamExpr::input("query")),
            StepSpec::transformation(
                "format-output",
                "Flatten the matching records",
                ActionKind::FormatEntityData,
            )
            .with_param("data", ParamExpr::step_output("find-entity", "results")),
        ],
        None,
    );

    let update = generated(
        meta(
            format!("update-{}", key),
            format!("Update {}", label),
            format!("Validate changes and merge them into an existing {}", label),
            entity,
        ),
        vec![
            // Partial updates: types are checked, required fields are not.
            validate_step(entity, Vec::new(), &properties),
            find_by_id(
                "find-existing-entity",
                entity,
                &format!("Ensure the {} exists", label),
            ),
            StepSpec::action(
                "update-entity",
                &format!("Merge the changes into the {}", label),
                ActionKind::UpdateEntity,
            )
            .with_param("entityType", ParamExpr::literal(entity.name.as_str()))
            .with_param("id", ParamExpr::step_output("find-existing-entity", "entityId"))
            .with_param("updateData", ParamExpr::input("data")),
        ],
        None,
    );

    let delete = generated(
        meta(
            format!("delete-{}", key),
            format!("Delete {}", label),
            format!("Delete a {} once nothing depends on it", label),
            entity,
        ),
        vec![
            find_by_id("find-entity", entity, &format!("Find the {} to delete", label)),
            StepSpec::validation("check-dependencies", "Refuse while relationships still point here")
                .with_action(ActionKind::CheckDependencies)
                .with_param("id", ParamExpr::step_output("find-entity", "entityId"))
                .with_param("force", ParamExpr::input("force").or_default(false)),
            StepSpec::action(
                "delete-entity",
                &format!("Detach and delete the {}", label),
                ActionKind::DeleteEntity,
            )
            .with_param("entityType", ParamExpr::literal(entity.name.as_str()))
            .with_param("id", ParamExpr::step_output("find-entity", "entityId")),
        ],
        None,
    );

    let search = generated(
        meta(
            format!("search-{}", key),
            format!("Search {}", label),
            format!("Free-text and filtered search over {} entities", label),
            entity,
        ),
        vec![
            StepSpec::transformation("parse-query", "Normalize the search query", ActionKind::ParseQuery)
                .with_param("query", ParamExpr::input("query"))
                .with_param("limit", ParamExpr::input("limit").or_default(10)),
            StepSpec::action(
                "search-knowledge-graph",
                &format!("Search {} entities", label),
                ActionKind::SearchKnowledgeGraph,
            )
            .with_param("entityType", ParamExpr::literal(entity.name.as_str()))
            .with_param("query", ParamExpr::step_output("parse-query", "query"))
            .with_param("limit", ParamExpr::step_output("parse-query", "limit")),
            StepSpec::transformation("rank-results", "Rank matches by relevance", ActionKind::RankResults)
                .with_param("results", ParamExpr::step_output("search-knowledge-graph", "results"))
                .with_param("query", ParamExpr::input("query")),
        ],
        None,
    );

    Ok(vec![create, read, update, delete, search])
}
