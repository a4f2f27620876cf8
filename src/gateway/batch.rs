//! Several named operations answered in one response, GraphQL style: every field that
//! succeeds is returned under its alias, every field that fails is `null` and listed in
//! `errors`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{GatewayError, Result};
use crate::schema::DistinctField;

use super::Gateway;
use super::filter::SearchSpec;
use super::listing::ListRequest;
use super::mutation::VoteRequest;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    ListEntities(ListRequest),
    EntityCount {
        #[serde(default)]
        collection: Option<String>,
        #[serde(default)]
        search: Option<SearchSpec>,
    },
    ReviewSummary {
        #[serde(default)]
        collection: Option<String>,
    },
    DistinctValues {
        field: DistinctField,
        #[serde(default)]
        collection: Option<String>,
    },
    UpdateVote(VoteRequest),
    SubmitFeedback { contact: String, message: String },
}

impl Operation {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ListEntities(_) => "list_entities",
            Self::EntityCount { .. } => "entity_count",
            Self::ReviewSummary { .. } => "review_summary",
            Self::DistinctValues { .. } => "distinct_values",
            Self::UpdateVote(_) => "update_vote",
            Self::SubmitFeedback { .. } => "submit_feedback",
        }
    }
}

/// One field of a batch. Without an alias the operation name is used as the field name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(flatten)]
    pub operation: Operation,
}

impl BatchEntry {
    #[must_use]
    pub fn new(alias: &str, operation: Operation) -> Self {
        Self { alias: Some(alias.to_string()), operation }
    }

    #[must_use]
    pub fn field_name(&self) -> &str {
        self.alias.as_deref().unwrap_or_else(|| self.operation.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphError {
    pub path: String,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphResponse {
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphError>,
}

impl GraphResponse {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

fn to_json<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

impl Gateway {
    /// Run `entries` in order. Individual failures never abort the batch.
    #[must_use]
    pub fn execute_batch(&self, entries: Vec<BatchEntry>) -> GraphResponse {
        let mut response = GraphResponse::default();
        for entry in entries {
            let name = entry.field_name().to_string();
            let outcome = if response.data.contains_key(&name) {
                Err(GatewayError::MalformedSpecification(format!("duplicate field '{name}'")))
            } else {
                self.execute_operation(entry.operation)
            };
            match outcome {
                Ok(value) => {
                    response.data.insert(name, value);
                }
                Err(e) => {
                    log::warn!("batch field '{name}' failed: {e}");
                    response.errors.push(GraphError {
                        path: name.clone(),
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    });
                    response.data.entry(name).or_insert(Value::Null);
                }
            }
        }
        response
    }

    fn execute_operation(&self, op: Operation) -> Result<Value> {
        match op {
            Operation::ListEntities(req) => to_json(self.list_entities(&req)?),
            Operation::EntityCount { collection, search } => {
                to_json(self.entity_count(collection.as_deref(), search.as_ref())?)
            }
            Operation::ReviewSummary { collection } => to_json(self.review_summary(collection.as_deref())?),
            Operation::DistinctValues { field, collection } => {
                to_json(self.distinct_values(field, collection.as_deref())?)
            }
            Operation::UpdateVote(req) => to_json(self.update_vote(&req)?),
            Operation::SubmitFeedback { contact, message } => to_json(self.submit_feedback(&contact, &message)?),
        }
    }
}
