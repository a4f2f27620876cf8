//! Translation of client search specifications into store filters or stage sequences.

use bson::{Bson, Document as BsonDocument};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{GatewayError, Result};
use crate::query::Filter;
use crate::schema::{SEARCHABLE_FIELDS, Schema};
use crate::utils::json::json_value_to_bson_document;

fn malformed(msg: impl Into<String>) -> GatewayError {
    GatewayError::MalformedSpecification(msg.into())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Regex,
    Exists,
}

impl ConditionOp {
    const fn operator(self) -> &'static str {
        match self {
            Self::Eq => "$eq",
            Self::Ne => "$ne",
            Self::Gt => "$gt",
            Self::Gte => "$gte",
            Self::Lt => "$lt",
            Self::Lte => "$lte",
            Self::In => "$in",
            Self::Regex => "$regex",
            Self::Exists => "$exists",
        }
    }
}

impl fmt::Display for ConditionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.operator()[1..])
    }
}

impl FromStr for ConditionOp {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "eq" | "=" | "==" => Self::Eq,
            "ne" | "!=" => Self::Ne,
            "gt" | ">" => Self::Gt,
            "gte" | ">=" => Self::Gte,
            "lt" | "<" => Self::Lt,
            "lte" | "<=" => Self::Lte,
            "in" => Self::In,
            "regex" | "~" => Self::Regex,
            "exists" => Self::Exists,
            other => return Err(malformed(format!("unknown condition operator '{other}'"))),
        })
    }
}

/// One typed filter condition: `field op value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: ConditionOp,
    pub value: serde_json::Value,
}

impl Condition {
    #[must_use]
    pub fn new(field: &str, op: ConditionOp, value: serde_json::Value) -> Self {
        Self { field: field.to_string(), op, value }
    }

    /// Parse `field:op:value`, where `value` is JSON or, failing that, a bare string.
    ///
    /// # Errors
    /// Returns `MalformedSpecification` when a part is missing or the operator is unknown.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, ':');
        let (Some(field), Some(op), Some(raw)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(malformed(format!("condition '{s}' is not field:op:value")));
        };
        let value = serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        Ok(Self::new(field.trim(), op.parse()?, value))
    }
}

/// How a request selects records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSpec {
    /// Case-insensitive pattern over the searchable fields; `None` or empty matches all.
    Text(Option<String>),
    /// JSON text of a stage array, passed to the store verbatim.
    Pipeline(String),
    /// Allowlisted conditions, AND-ed.
    Conditions(Vec<Condition>),
}

impl Default for SearchSpec {
    fn default() -> Self {
        Self::Text(None)
    }
}

impl SearchSpec {
    #[must_use]
    pub fn text(token: &str) -> Self {
        Self::Text(Some(token.to_string()))
    }
}

/// Free-text filter: `$or` of case-insensitive regex matches over [`SEARCHABLE_FIELDS`].
///
/// The token is used as a pattern as-is; metacharacters are not escaped.
#[must_use]
pub fn text_filter(token: Option<&str>) -> Filter {
    match token {
        None | Some("") => Filter::True,
        Some(t) => Filter::Or(SEARCHABLE_FIELDS.iter().map(|f| Filter::regex_ci(f, t)).collect()),
    }
}

/// Parse caller-supplied stages. Only the outer shape is checked: a JSON array of objects.
///
/// # Errors
/// Returns `MalformedSpecification` for invalid JSON, a non-array, or a non-object element.
pub fn parse_stages(json: &str) -> Result<Vec<BsonDocument>> {
    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| malformed(format!("pipeline is not valid JSON: {e}")))?;
    let serde_json::Value::Array(items) = value else {
        return Err(malformed("pipeline must be a JSON array of stage objects"));
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            if !item.is_object() {
                return Err(malformed(format!("pipeline stage {i} is not an object")));
            }
            json_value_to_bson_document(item).map_err(|e| malformed(format!("pipeline stage {i}: {e}")))
        })
        .collect()
}

fn json_to_bson(field: &str, value: &serde_json::Value) -> Result<Bson> {
    Bson::try_from(value.clone()).map_err(|e| malformed(format!("value for '{field}': {e}")))
}

/// Translate conditions into the body of a single `$match` stage.
///
/// # Errors
/// Returns `MalformedSpecification` for a field outside the allowlist or an operand of the
/// wrong shape.
pub fn conditions_match(conditions: &[Condition]) -> Result<BsonDocument> {
    let mut clauses = Vec::with_capacity(conditions.len());
    for c in conditions {
        if !Schema::is_filterable(&c.field) {
            return Err(malformed(format!("field '{}' is not filterable", c.field)));
        }
        let operand = match c.op {
            ConditionOp::In => match &c.value {
                serde_json::Value::Array(_) => json_to_bson(&c.field, &c.value)?,
                _ => return Err(malformed(format!("'in' on '{}' needs an array", c.field))),
            },
            ConditionOp::Exists => match &c.value {
                serde_json::Value::Bool(b) => Bson::Boolean(*b),
                _ => return Err(malformed(format!("'exists' on '{}' needs a boolean", c.field))),
            },
            ConditionOp::Regex => match &c.value {
                serde_json::Value::String(s) => Bson::String(s.clone()),
                _ => return Err(malformed(format!("'regex' on '{}' needs a string", c.field))),
            },
            _ => json_to_bson(&c.field, &c.value)?,
        };
        let mut ops = BsonDocument::new();
        ops.insert(c.op.operator(), operand);
        if c.op == ConditionOp::Regex {
            ops.insert("$options", "i");
        }
        let mut clause = BsonDocument::new();
        clause.insert(c.field.clone(), ops);
        clauses.push(clause);
    }
    Ok(match clauses.len() {
        0 => BsonDocument::new(),
        1 => clauses.remove(0),
        _ => {
            let mut and = BsonDocument::new();
            and.insert("$and", clauses);
            and
        }
    })
}
