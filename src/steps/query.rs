/// Search pipeline operations: parse, search, rank, format

use crate::error::StepError;
use crate::knowledge::KnowledgeStore;
use crate::steps::{Step, StepInput, StepOutcome};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

const DEFAULT_LIMIT: u64 = 10;
const MAX_LIMIT: u64 = 100;

/// `parse-query`: normalizes a free-text or structured query and a limit.
pub struct ParseQuery;

#[async_trait]
impl Step for ParseQuery {
    async fn execute(&self, input: StepInput) -> Result<StepOutcome, StepError> {
        let query = match input.param("query") {
            None => Map::new(),
            Some(Value::String(text)) => {
                let mut map = Map::new();
                map.insert("text".to_string(), Value::String(text.trim().to_string()));
                map
            }
            Some(Value::Object(map)) => map.clone(),
            Some(other) => {
                return Err(StepError::invalid(format!(
                    "query must be a string or an object, got {}",
                    other
                )))
            }
        };

        let limit = match input.param("limit") {
            None => DEFAULT_LIMIT,
            Some(value) => value
                .as_u64()
                .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
                .ok_or_else(|| StepError::invalid(format!("limit must be a positive integer, got {}", value)))?,
        }
        .clamp(1, MAX_LIMIT);

        Ok(StepOutcome::completed(json!({ "query": query, "limit": limit })))
    }
}

/// `search-knowledge-graph`: text match plus equality filter over one type.
pub struct SearchKnowledgeGraph {
    store: Arc<dyn KnowledgeStore>,
}

impl SearchKnowledgeGraph {
    pub fn new(store: Arc<dyn KnowledgeStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Step for SearchKnowledgeGraph {
    async fn execute(&self, input: StepInput) -> Result<StepOutcome, StepError> {
        let entity_type = input.require_str("entityType")?.to_string();
        let mut filter = match input.param("query") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        let text = match filter.remove("text") {
            Some(Value::String(text)) => text,
            _ => input.param_str("query").unwrap_or_default().to_string(),
        };
        let limit = input
            .param("limit")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_LIMIT) as usize;

        let results = self
            .store
            .search_entities(&entity_type, &text, &filter, limit)
            .await?;

        Ok(StepOutcome::completed(json!({
            "results": results,
            "total": results.len(),
        })))
    }
}

/// `rank-results`: scores results by query-term hits, highest first.
pub struct RankResults;

fn query_terms(query: Option<&Value>) -> Vec<String> {
    let raw = match query {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Object(map)) => map
            .values()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    };
    raw.split_whitespace().map(|t| t.to_lowercase()).collect()
}

fn score(result: &Value, terms: &[String]) -> u64 {
    let haystack: Vec<String> = result
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .values()
                .filter_map(Value::as_str)
                .map(str::to_lowercase)
                .collect()
        })
        .unwrap_or_default();

    terms
        .iter()
        .map(|term| haystack.iter().filter(|v| v.contains(term.as_str())).count() as u64)
        .sum()
}

#[async_trait]
impl Step for RankResults {
    async fn execute(&self, input: StepInput) -> Result<StepOutcome, StepError> {
        let results = match input.param("results") {
            None => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(other) => {
                return Err(StepError::invalid(format!("results must be an array, got {}", other)))
            }
        };
        let terms = query_terms(input.param("query"));

        let mut scored: Vec<(u64, Value)> = results
            .into_iter()
            .map(|r| (score(&r, &terms), r))
            .collect();
        // Stable: equal scores keep store order.
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        let ranked: Vec<Value> = scored
            .into_iter()
            .map(|(score, mut result)| {
                if let Value::Object(map) = &mut result {
                    map.insert("score".to_string(), json!(score));
                }
                result
            })
            .collect();

        Ok(StepOutcome::completed(json!({
            "count": ranked.len(),
            "results": ranked,
        })))
    }
}

/// `format-entity-data`: flattens entity records into `{id, type, ...properties}`.
pub struct FormatEntityData;

fn flatten(entity: &Value) -> Value {
    match (entity.get("id"), entity.get("properties").and_then(Value::as_object)) {
        (Some(id), Some(props)) => {
            let mut flat = props.clone();
            flat.insert("id".to_string(), id.clone());
            if let Some(kind) = entity.get("entityType") {
                flat.insert("type".to_string(), kind.clone());
            }
            Value::Object(flat)
        }
        _ => entity.clone(),
    }
}

#[async_trait]
impl Step for FormatEntityData {
    async fn execute(&self, input: StepInput) -> Result<StepOutcome, StepError> {
        let data = match input.param("data") {
            Some(Value::Array(items)) => Value::Array(items.iter().map(flatten).collect()),
            Some(other) => flatten(other),
            None => Value::Null,
        };
        Ok(StepOutcome::completed(json!({ "data": data })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::InMemoryKnowledgeStore;

    fn input(params: Value) -> StepInput {
        StepInput {
            step_id: "test".into(),
            params,
            inputs: Value::Null,
            context: Map::new(),
        }
    }

    #[tokio::test]
    async fn parse_query_normalizes_text_and_limit() {
        let out = ParseQuery
            .execute(input(json!({"query": " jane ", "limit": null})))
            .await
            .unwrap();
        assert_eq!(out.output["query"], json!({"text": "jane"}));
        assert_eq!(out.output["limit"], 10);

        let capped = ParseQuery.execute(input(json!({"limit": 5000}))).await.unwrap();
        assert_eq!(capped.output["limit"], 100);
    }

    #[tokio::test]
    async fn search_then_rank() {
        let store: Arc<dyn KnowledgeStore> = Arc::new(InMemoryKnowledgeStore::new());
        for (name, email) in [("Jane Doe", "doe@x.com"), ("Jane Roe", "jr@x.com"), ("Bob", "b@x.com")] {
            store
                .create_entity("Customer", json!({"name": name, "email": email}).as_object().cloned().unwrap())
                .await
                .unwrap();
        }

        let found = SearchKnowledgeGraph::new(store)
            .execute(input(json!({"entityType": "Customer", "query": {"text": "jane"}, "limit": 10})))
            .await
            .unwrap();
        assert_eq!(found.output["total"], 2);

        let ranked = RankResults
            .execute(input(json!({"results": found.output["results"], "query": "doe"})))
            .await
            .unwrap();
        assert_eq!(ranked.output["results"][0]["properties"]["name"], "Jane Doe");
        assert_eq!(ranked.output["results"][0]["score"], 2);
        assert_eq!(ranked.output["results"][1]["score"], 0);
    }

    #[tokio::test]
    async fn format_flattens_records() {
        let out = FormatEntityData
            .execute(input(json!({"data": [
                {"id": "customer-1", "entityType": "Customer", "properties": {"name": "Jane"}}
            ]})))
            .await
            .unwrap();
        assert_eq!(
            out.output["data"],
            json!([{"id": "customer-1", "type": "Customer", "name": "Jane"}])
        );
    }
}
